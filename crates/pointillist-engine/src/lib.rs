//! pointillist-engine: Async particle generation.
//!
//! Wraps the synchronous pipeline in a [`GenerationCoordinator`] that
//! runs one generation at a time on tokio's blocking pool, reports
//! progress, supports cancellation, and reuses earlier results through a
//! [`ResultCache`](pointillist_cache::ResultCache). Samples are turned
//! into renderer-ready [`Particle`]s by an [`Assembler`].

pub mod assembler;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod particle;
pub mod report;
pub mod state;

pub use assembler::{Assembler, AspectFitAssembler, Projection};
pub use coordinator::{GenerationCoordinator, GenerationOutput, ProgressFn};
pub use error::{AssemblyError, GenerationError};
pub use key::{CachedSamples, cache_key};
pub use particle::{Particle, ScreenSize};
pub use report::{GenerationReport, GenerationSummary, StageMetrics, StageReport};
pub use state::{CoordinatorMetrics, CoordinatorSnapshot, GenerationStage};
