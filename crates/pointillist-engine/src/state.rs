//! Observable coordinator state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Where a generation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GenerationStage {
    /// No generation has run yet.
    #[default]
    Idle,
    /// Configuration accepted, cache being consulted.
    Starting,
    /// Analyzing the image.
    Analyzing,
    /// Selecting samples.
    Sampling,
    /// Building particles.
    Assembling,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl GenerationStage {
    /// Whether no further progress will be reported for this generation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Analyzing => "analyzing",
            Self::Sampling => "sampling",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    /// Whether a generation is in flight.
    pub is_generating: bool,
    /// Progress of the current or last generation, in `[0, 1]`.
    pub progress: f32,
    /// Stage of the current or last generation.
    pub stage: GenerationStage,
}

/// Lifetime counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    /// Generations started (not counting rejected `Busy` requests).
    pub generations: u64,
    /// Generations rejected because another was in flight.
    pub rejected_busy: u64,
    /// Analysis stages run.
    pub analyses: u64,
    /// Sampling stages run.
    pub samplings: u64,
    /// Assembly stages run.
    pub assemblies: u64,
    /// Lookups answered from the cache.
    pub cache_hits: u64,
    /// Lookups that fell through to analysis.
    pub cache_misses: u64,
    /// Generations that ended in failure.
    pub failures: u64,
    /// Generations that ended in cancellation.
    pub cancellations: u64,
}

/// Atomic backing store for [`CoordinatorMetrics`].
#[derive(Debug, Default)]
pub(crate) struct MetricCounters {
    pub generations: AtomicU64,
    pub rejected_busy: AtomicU64,
    pub analyses: AtomicU64,
    pub samplings: AtomicU64,
    pub assemblies: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub failures: AtomicU64,
    pub cancellations: AtomicU64,
}

impl MetricCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CoordinatorMetrics {
            generations: load(&self.generations),
            rejected_busy: load(&self.rejected_busy),
            analyses: load(&self.analyses),
            samplings: load(&self.samplings),
            assemblies: load(&self.assemblies),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            failures: load(&self.failures),
            cancellations: load(&self.cancellations),
        }
    }
}
