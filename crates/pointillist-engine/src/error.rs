//! Error types for particle generation.

use pointillist_pipeline::PipelineError;

/// The assembler could not turn samples into particles. The message is
/// reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AssemblyError(pub String);

/// Errors surfaced by [`GenerationCoordinator`](crate::GenerationCoordinator).
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The configuration failed validation before any stage ran.
    #[error("invalid generation configuration: {0}")]
    InvalidConfig(String),

    /// The analysis stage failed.
    #[error("analysis stage failed: {0}")]
    Analysis(PipelineError),

    /// The sampling stage failed.
    #[error("sampling stage failed: {0}")]
    Sampling(PipelineError),

    /// The assembly stage failed.
    #[error("assembly stage failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// A blocking worker panicked or the pool was shut down.
    #[error("worker failed: {0}")]
    Worker(String),

    /// Another generation is already in flight. Retry later.
    #[error("a generation is already in progress")]
    Busy,

    /// The generation was cancelled.
    #[error("generation was cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether this is a normal abort rather than a failure: the caller
    /// cancelled, or the request was turned away because another
    /// generation was running.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Busy | Self::Cancelled)
    }

    /// Wrap an analysis error, keeping cancellation distinct.
    pub(crate) fn analysis(error: PipelineError) -> Self {
        match error {
            PipelineError::Cancelled => Self::Cancelled,
            PipelineError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            other => Self::Analysis(other),
        }
    }

    /// Wrap a sampling error, keeping cancellation distinct.
    pub(crate) fn sampling(error: PipelineError) -> Self {
        match error {
            PipelineError::Cancelled => Self::Cancelled,
            PipelineError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            other => Self::Sampling(other),
        }
    }
}
