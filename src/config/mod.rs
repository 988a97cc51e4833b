pub mod env;
mod loader;

pub use env::{
    AppConfig, CacheBackendKind, CacheConfig, CategoryWeights, ConfigError, DirectoryConfig,
    InputConfig, LlmConfig, LoggingConfig, OcrConfig, OcrMode, ReferenceConfig, ScoringConfig,
    Thresholds, WebContentConfig,
};
pub use loader::load_config;
