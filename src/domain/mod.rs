pub mod content;
pub mod request;
pub mod result;
pub mod signal;

pub use content::{Degradation, ExtractedContent, Link, MailIdentity, PageSnapshot, SourceKind};
pub use request::{AnalysisRequest, InputError};
pub use result::{ExtractionSummary, ScoreResult, Verdict};
pub use signal::{InvalidSignal, Polarity, Severity, Signal, SignalCategory};
