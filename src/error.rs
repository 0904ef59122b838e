use thiserror::Error;

/// Result type for priority pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while negotiating with or waiting on a block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A malformed correlation handle was passed to offer/consume/reserve
    #[error("Invalid message handle: {0}")]
    InvalidHandle(u64),

    /// Confirmed consumption was requested without an offering source
    #[error("Confirmed consumption requires an offering source")]
    MissingSource,

    /// The block terminated with a fault
    #[error("Block faulted: {0}")]
    Faulted(Fault),

    /// A bounded wait on a completion signal elapsed
    #[error("Timed out waiting for completion")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Terminal, block-wide error pushed to every linked target and surfaced
/// through the completion signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The pipeline was cancelled by its owner
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A stage failed while processing a payload
    #[error("stage failed: {0}")]
    Stage(String),
}

impl Fault {
    /// Cancellation-flavored fault.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Fault::Cancelled(reason.into())
    }

    /// Stage failure with a message.
    pub fn stage(message: impl Into<String>) -> Self {
        Fault::Stage(message.into())
    }

    /// Convert any payload-processing error into a fault so a stage can abort
    /// the whole pipeline.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Fault::Stage(err.to_string())
    }

    /// Whether this fault represents a cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Fault::Cancelled(_))
    }
}

impl From<Fault> for PipelineError {
    fn from(fault: Fault) -> Self {
        PipelineError::Faulted(fault)
    }
}
