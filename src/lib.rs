pub mod ai;
pub mod cache;
pub mod config;
pub mod domain;
pub mod extract;
pub mod infrastructure;
pub mod pipeline;
pub mod scoring;
pub mod signals;
pub mod tasks;

pub use domain::{AnalysisRequest, InputError, ScoreResult, Verdict};
pub use pipeline::{AnalysisError, FraudChecker, FraudCheckerBuilder};
