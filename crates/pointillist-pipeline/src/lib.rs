//! pointillist-pipeline: Pure image-to-samples pipeline (sans-IO).
//!
//! Turns a decoded pixel buffer into a budgeted set of colored sample
//! points through:
//! validation -> downsampling -> analysis -> sampling.
//!
//! This crate has **no I/O dependencies** beyond decoding in-memory
//! bytes. Caching, orchestration, and particle assembly live in
//! `pointillist-cache` and `pointillist-engine`.

pub mod analysis;
pub mod buffer;
pub mod config;
pub mod downsample;
pub mod sampling;
pub mod types;

pub use analysis::ImageAnalyzer;
pub use buffer::{AlphaMode, ChannelOrder, PixelBuffer};
pub use config::{DisplayMode, ParticleGenerationConfig, QualityTier};
pub use downsample::DownsampleFilter;
pub use sampling::{Sampler, SamplingParams, SamplingStrategy};
pub use types::{
    Dimensions, ImageAnalysis, PipelineError, ProcessResult, Rect, Rgba, RgbaImage, Sample,
};

/// Analyze and sample a buffer in one call.
///
/// # Pipeline steps
///
/// 1. Validate the configuration
/// 2. Analyze (downsampling internally when the image is large)
/// 3. Derive [`SamplingParams`] from the quality tier
/// 4. Sample with the configured strategy
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an out-of-range
/// configuration, [`PipelineError::AnalysisFailed`] for an image with no
/// colored pixels, and [`PipelineError::SamplingFailed`] if sampling
/// cannot proceed.
pub fn process(
    buffer: &PixelBuffer,
    config: &ParticleGenerationConfig,
) -> Result<ProcessResult, PipelineError> {
    config.validate()?;

    let analysis = ImageAnalyzer::default().analyze(buffer)?;

    let params = SamplingParams::for_config(config);
    let samples = sampling::sample(
        &analysis,
        buffer,
        config.target_particle_count,
        &params,
        config.sampling_strategy,
    )?;

    Ok(ProcessResult { analysis, samples })
}
