//! Particle generation configuration.
//!
//! Every option the pipeline, the coordinator, and the assembler read is
//! an explicit typed field here. Nothing is looked up by name at runtime,
//! so renaming a field is a compile error rather than a silent fallback
//! to a default.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sampling::SamplingStrategy;
use crate::types::PipelineError;

/// Fidelity tier. Each tier maps to a fixed row of sampling ratios (see
/// [`SamplingParams::for_config`](crate::SamplingParams::for_config)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityTier {
    /// Fastest; no anti-clustering, narrow contrast neighborhood.
    Draft,
    /// Balanced default.
    #[default]
    Standard,
    /// More detail-driven samples.
    High,
    /// Most detail-driven samples, smallest uniform baseline.
    Ultra,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => f.write_str("draft"),
            Self::Standard => f.write_str("standard"),
            Self::High => f.write_str("high"),
            Self::Ultra => f.write_str("ultra"),
        }
    }
}

/// How source-image coordinates are projected onto the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayMode {
    /// Scale uniformly so the whole image is visible (letterboxed).
    #[default]
    Fit,
    /// Scale uniformly so the screen is covered; overflow is cropped.
    Fill,
    /// Scale each axis independently to the screen.
    Stretch,
}

/// Configuration for one particle generation.
///
/// # Invariants
///
/// Checked by [`validate`](Self::validate):
/// `importance_threshold`, `contrast_weight`, and `saturation_weight` in
/// `[0, 1]`; `1 <= edge_radius <= MAX_EDGE_RADIUS`; `0 < min_particle_size <=
/// max_particle_size`; `max_concurrent_operations >= 1`;
/// `particle_speed` finite and non-negative; a non-zero cache limit when
/// caching is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleGenerationConfig {
    /// Which sampling strategy turns the analysis into samples.
    pub sampling_strategy: SamplingStrategy,

    /// Fidelity tier that selects the sampling ratios.
    pub quality_tier: QualityTier,

    /// Minimum importance score for a pixel to count as salient.
    pub importance_threshold: f32,

    /// Weight of local contrast in the importance score.
    pub contrast_weight: f32,

    /// Weight of saturation in the importance score.
    pub saturation_weight: f32,

    /// Neighborhood radius (pixels) for local contrast.
    pub edge_radius: u32,

    /// Smallest particle size in screen units.
    pub min_particle_size: f32,

    /// Largest particle size in screen units.
    pub max_particle_size: f32,

    /// Number of particles to produce.
    pub target_particle_count: usize,

    /// Whether results are cached between generations.
    pub enable_caching: bool,

    /// Upper bound on total cached payload bytes.
    pub cache_size_limit_bytes: u64,

    /// Size of the coordinator's blocking worker pool.
    pub max_concurrent_operations: usize,

    /// Projection from image space to screen space.
    pub display_mode: DisplayMode,

    /// Scale applied to the seeded particle velocities.
    pub particle_speed: f32,
}

impl ParticleGenerationConfig {
    /// Default sampling strategy.
    pub const DEFAULT_SAMPLING_STRATEGY: SamplingStrategy = SamplingStrategy::Hybrid;
    /// Default quality tier.
    pub const DEFAULT_QUALITY_TIER: QualityTier = QualityTier::Standard;
    /// Default importance threshold.
    pub const DEFAULT_IMPORTANCE_THRESHOLD: f32 = 0.3;
    /// Default local-contrast weight.
    pub const DEFAULT_CONTRAST_WEIGHT: f32 = 0.6;
    /// Default saturation weight.
    pub const DEFAULT_SATURATION_WEIGHT: f32 = 0.4;
    /// Default contrast neighborhood radius.
    pub const DEFAULT_EDGE_RADIUS: u32 = 2;
    /// Largest accepted contrast neighborhood radius. Scoring a candidate
    /// costs `O(edge_radius^2)`.
    pub const MAX_EDGE_RADIUS: u32 = 16;
    /// Default minimum particle size.
    pub const DEFAULT_MIN_PARTICLE_SIZE: f32 = 1.0;
    /// Default maximum particle size.
    pub const DEFAULT_MAX_PARTICLE_SIZE: f32 = 6.0;
    /// Default particle budget.
    pub const DEFAULT_TARGET_PARTICLE_COUNT: usize = 20_000;
    /// Default cache size limit (100 MiB).
    pub const DEFAULT_CACHE_SIZE_LIMIT_BYTES: u64 = 100 * 1024 * 1024;
    /// Default worker pool size.
    pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 2;
    /// Default velocity scale.
    pub const DEFAULT_PARTICLE_SPEED: f32 = 1.0;

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let unit_fields = [
            ("importance_threshold", self.importance_threshold),
            ("contrast_weight", self.contrast_weight),
            ("saturation_weight", self.saturation_weight),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.edge_radius == 0 {
            return Err(PipelineError::InvalidConfig(
                "edge_radius must be at least 1".to_string(),
            ));
        }
        if self.edge_radius > Self::MAX_EDGE_RADIUS {
            return Err(PipelineError::InvalidConfig(format!(
                "edge_radius must be at most {}, got {}",
                Self::MAX_EDGE_RADIUS,
                self.edge_radius
            )));
        }
        if !(self.min_particle_size > 0.0 && self.min_particle_size <= self.max_particle_size) {
            return Err(PipelineError::InvalidConfig(format!(
                "particle sizes must satisfy 0 < min <= max, got min={} max={}",
                self.min_particle_size, self.max_particle_size
            )));
        }
        if self.max_concurrent_operations == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        if !(self.particle_speed.is_finite() && self.particle_speed >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "particle_speed must be finite and non-negative, got {}",
                self.particle_speed
            )));
        }
        if self.enable_caching && self.cache_size_limit_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "cache_size_limit_bytes must be non-zero when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ParticleGenerationConfig {
    fn default() -> Self {
        Self {
            sampling_strategy: Self::DEFAULT_SAMPLING_STRATEGY,
            quality_tier: Self::DEFAULT_QUALITY_TIER,
            importance_threshold: Self::DEFAULT_IMPORTANCE_THRESHOLD,
            contrast_weight: Self::DEFAULT_CONTRAST_WEIGHT,
            saturation_weight: Self::DEFAULT_SATURATION_WEIGHT,
            edge_radius: Self::DEFAULT_EDGE_RADIUS,
            min_particle_size: Self::DEFAULT_MIN_PARTICLE_SIZE,
            max_particle_size: Self::DEFAULT_MAX_PARTICLE_SIZE,
            target_particle_count: Self::DEFAULT_TARGET_PARTICLE_COUNT,
            enable_caching: true,
            cache_size_limit_bytes: Self::DEFAULT_CACHE_SIZE_LIMIT_BYTES,
            max_concurrent_operations: Self::DEFAULT_MAX_CONCURRENT_OPERATIONS,
            display_mode: DisplayMode::default(),
            particle_speed: Self::DEFAULT_PARTICLE_SPEED,
        }
    }
}
