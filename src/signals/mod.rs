//! Independent evaluators that each turn one [`ExtractedContent`] into zero
//! or more [`Signal`]s.

pub mod brand_guard;
pub mod heuristics;
pub mod safebook;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    ai::LlmError,
    domain::{ExtractedContent, InvalidSignal, Signal, SignalCategory},
};

pub use brand_guard::{Brand, BrandBook, BrandGuard};
pub use heuristics::HeuristicsEngine;
pub use safebook::Safebook;

/// Failure of one producer. It is logged by the pipeline and costs only that
/// producer's signals.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("brand list unavailable: {0}")]
    BrandList(String),
    #[error(transparent)]
    InvalidSignal(#[from] InvalidSignal),
}

#[async_trait]
pub trait SignalProducer: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> SignalCategory;

    async fn produce(&self, content: &ExtractedContent) -> Result<Vec<Signal>, ProducerError>;
}
