//! Cache keys and the cached payload.
//!
//! The cache stores image-space samples, not particles. Screen size and
//! display mode only affect assembly, which is cheap, so one entry serves
//! every screen the same image is shown on.

use pointillist_pipeline::{Dimensions, ParticleGenerationConfig, Sample};
use serde::{Deserialize, Serialize};

/// Key identifying a generation's samples.
///
/// Format: `"{width}x{height}|{count}|{tier}|{strategy}|{threshold:.2}"`.
/// Requests that agree on these fields are treated as cache-equivalent
/// even if other fields differ.
#[must_use]
pub fn cache_key(dimensions: Dimensions, config: &ParticleGenerationConfig) -> String {
    format!(
        "{}x{}|{}|{}|{}|{:.2}",
        dimensions.width,
        dimensions.height,
        config.target_particle_count,
        config.quality_tier,
        config.sampling_strategy,
        config.importance_threshold,
    )
}

/// Payload stored under a [`cache_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSamples {
    /// Particle count requested when the entry was written.
    pub target_particle_count: usize,
    /// Samples in image space.
    pub samples: Vec<Sample>,
}

impl CachedSamples {
    /// Whether this entry can stand in for a fresh generation of
    /// `dimensions` under `config`: the requested count matches and the
    /// sample count is what sampling would have produced.
    #[must_use]
    pub fn matches(&self, dimensions: Dimensions, config: &ParticleGenerationConfig) -> bool {
        let expected = dimensions
            .pixel_count()
            .min(config.target_particle_count as u64);
        self.target_particle_count == config.target_particle_count
            && self.samples.len() as u64 == expected
            && self
                .samples
                .iter()
                .all(|s| s.x < dimensions.width && s.y < dimensions.height)
    }
}
