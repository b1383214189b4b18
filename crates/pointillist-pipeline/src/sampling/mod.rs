//! Sampling: turn an [`ImageAnalysis`] into a budgeted set of pixels.
//!
//! This module defines the [`Sampler`] trait for pluggable sampling
//! strategies and the [`SamplingStrategy`] enum for selecting one at
//! runtime, mirroring how the rest of the pipeline exposes its
//! strategy points.
//!
//! Every strategy honors the same contract: at most `target` samples,
//! every coordinate inside the buffer, no coordinate repeated. Output
//! order is strategy-specific and not spatially sorted.

pub mod adaptive;
pub mod cluster;
pub mod hybrid;
pub mod importance;
pub mod score;
pub mod stratified;
pub mod uniform;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::config::{ParticleGenerationConfig, QualityTier};
use crate::types::{ImageAnalysis, PipelineError, Rect, Sample};

/// Selects which sampling strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Aspect-matched grid covering the image edge to edge.
    Uniform,
    /// Bias toward high-contrast, saturated, edge pixels.
    Importance,
    /// Sample density follows local edge complexity.
    Adaptive,
    /// Uniform baseline plus importance detail, proportioned by tier.
    #[default]
    Hybrid,
    /// Horizontal bands with quotas proportional to band brightness.
    Stratified,
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => f.write_str("uniform"),
            Self::Importance => f.write_str("importance"),
            Self::Adaptive => f.write_str("adaptive"),
            Self::Hybrid => f.write_str("hybrid"),
            Self::Stratified => f.write_str("stratified"),
        }
    }
}

/// Per-generation sampling parameters, derived from the configuration
/// and its quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Minimum score for a candidate to count as salient.
    pub importance_threshold: f32,
    /// Weight of local contrast in the score.
    pub contrast_weight: f32,
    /// Weight of saturation in the score.
    pub saturation_weight: f32,
    /// Local contrast neighborhood radius.
    pub edge_radius: u32,
    /// Share of the budget chosen by score rather than by grid.
    pub important_sampling_ratio: f32,
    /// Share of the score-driven budget taken from the top scorers; the
    /// rest is spread across lower-scoring candidates.
    pub top_bottom_ratio: f32,
    /// Whether score-driven picks are thinned to one per cell first.
    pub apply_anti_clustering: bool,
    /// Weight of gradient edge strength in the score.
    pub edge_bias: f32,
    /// Share of the budget the hybrid strategy lays down as a grid.
    pub uniform_share: f32,
    /// Number of horizontal bands for stratified sampling.
    pub stratified_bands: u32,
}

impl SamplingParams {
    /// Default band count for stratified sampling.
    pub const DEFAULT_STRATIFIED_BANDS: u32 = 8;

    /// Derive parameters from a configuration.
    #[must_use]
    pub fn for_config(config: &ParticleGenerationConfig) -> Self {
        // (important ratio, top/bottom, anti-clustering, edge bias, uniform share)
        let (ratio, top_bottom, anti_clustering, edge_bias, uniform_share) =
            match config.quality_tier {
                QualityTier::Draft => (0.5, 0.9, false, 0.3, 0.6),
                QualityTier::Standard => (0.7, 0.8, true, 0.5, 0.4),
                QualityTier::High => (0.8, 0.75, true, 0.6, 0.3),
                QualityTier::Ultra => (0.85, 0.7, true, 0.7, 0.2),
            };
        let edge_radius = match config.quality_tier {
            QualityTier::Draft => config.edge_radius.clamp(1, 1),
            _ => config
                .edge_radius
                .clamp(1, ParticleGenerationConfig::MAX_EDGE_RADIUS),
        };
        Self {
            importance_threshold: config.importance_threshold.clamp(0.0, 1.0),
            contrast_weight: config.contrast_weight.clamp(0.0, 1.0),
            saturation_weight: config.saturation_weight.clamp(0.0, 1.0),
            edge_radius,
            important_sampling_ratio: ratio,
            top_bottom_ratio: top_bottom,
            apply_anti_clustering: anti_clustering,
            edge_bias,
            uniform_share,
            stratified_bands: Self::DEFAULT_STRATIFIED_BANDS,
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self::for_config(&ParticleGenerationConfig::default())
    }
}

/// Everything a strategy reads while choosing samples.
pub struct SamplingContext<'a> {
    /// Descriptor of the image being sampled.
    pub analysis: &'a ImageAnalysis,
    /// Source pixels.
    pub buffer: &'a PixelBuffer,
    /// Derived sampling parameters.
    pub params: &'a SamplingParams,
    /// Polled between rows of parallel work.
    pub is_cancelled: &'a (dyn Fn() -> bool + Sync),
}

impl SamplingContext<'_> {
    /// The full-image rectangle.
    #[must_use]
    pub const fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.buffer.width(), self.buffer.height())
    }
}

/// Trait for sampling strategies.
pub trait Sampler {
    /// Choose up to `target` samples.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if cancellation was observed
    /// while scoring.
    fn select(&self, ctx: &SamplingContext<'_>, target: usize) -> Result<Vec<Sample>, PipelineError>;
}

impl Sampler for SamplingStrategy {
    fn select(&self, ctx: &SamplingContext<'_>, target: usize) -> Result<Vec<Sample>, PipelineError> {
        match *self {
            Self::Uniform => Ok(uniform::sample_uniform(ctx.buffer, target)),
            Self::Importance => importance::sample_importance(ctx, target),
            Self::Adaptive => adaptive::sample_adaptive(ctx, target),
            Self::Hybrid => hybrid::sample_hybrid(ctx, target),
            Self::Stratified => stratified::sample_stratified(ctx, target),
        }
    }
}

/// Sample `target_count` pixels from `buffer` using `strategy`.
///
/// A `target_count` of zero yields an empty result.
///
/// # Errors
///
/// Returns [`PipelineError::SamplingFailed`] if the analysis was produced
/// for a buffer of different dimensions.
pub fn sample(
    analysis: &ImageAnalysis,
    buffer: &PixelBuffer,
    target_count: usize,
    params: &SamplingParams,
    strategy: SamplingStrategy,
) -> Result<Vec<Sample>, PipelineError> {
    sample_with_cancel(analysis, buffer, target_count, params, strategy, &|| false)
}

/// [`sample`], polling `is_cancelled` during parallel scoring.
///
/// # Errors
///
/// As [`sample`], plus [`PipelineError::Cancelled`].
pub fn sample_with_cancel(
    analysis: &ImageAnalysis,
    buffer: &PixelBuffer,
    target_count: usize,
    params: &SamplingParams,
    strategy: SamplingStrategy,
    is_cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<Vec<Sample>, PipelineError> {
    if analysis.dimensions() != buffer.dimensions() {
        return Err(PipelineError::SamplingFailed(format!(
            "analysis is for {}x{} but buffer is {}x{}",
            analysis.width,
            analysis.height,
            buffer.width(),
            buffer.height()
        )));
    }
    if target_count == 0 {
        return Ok(Vec::new());
    }

    let ctx = SamplingContext {
        analysis,
        buffer,
        params,
        is_cancelled,
    };
    let samples = strategy.select(&ctx, target_count)?;
    log::debug!(
        "{strategy} sampling chose {} of {target_count} requested samples",
        samples.len()
    );
    Ok(samples)
}

/// `round(n * ratio)`, never more than `n`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn scaled(n: usize, ratio: f32) -> usize {
    let value = (n as f64 * f64::from(ratio.clamp(0.0, 1.0))).round() as usize;
    value.min(n)
}

/// Accumulates unique in-bounds samples up to a fixed budget.
pub(crate) struct Selection<'a> {
    buffer: &'a PixelBuffer,
    target: usize,
    taken: HashSet<(u32, u32)>,
    samples: Vec<Sample>,
}

impl<'a> Selection<'a> {
    pub(crate) fn new(buffer: &'a PixelBuffer, target: usize) -> Self {
        Self {
            buffer,
            target,
            taken: HashSet::with_capacity(target),
            samples: Vec::with_capacity(target),
        }
    }

    /// Add `(x, y)` if there is room, it is in bounds, and it is new.
    pub(crate) fn push(&mut self, x: u32, y: u32) -> bool {
        if self.is_full() || x >= self.buffer.width() || y >= self.buffer.height() {
            return false;
        }
        if !self.taken.insert((x, y)) {
            return false;
        }
        self.samples
            .push(Sample::new(x, y, self.buffer.color_at(x, y)));
        true
    }

    /// Push points in order until full.
    pub(crate) fn extend(&mut self, points: impl IntoIterator<Item = (u32, u32)>) {
        for (x, y) in points {
            if self.is_full() {
                break;
            }
            self.push(x, y);
        }
    }

    pub(crate) fn contains(&self, x: u32, y: u32) -> bool {
        self.taken.contains(&(x, y))
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.target - self.samples.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.samples.len() >= self.target
    }

    /// Fill any shortfall by walking every pixel in row-major order.
    ///
    /// Only reached when the preferred candidates run out (tiny or
    /// mostly transparent images).
    pub(crate) fn fill_exhaustively(&mut self) {
        if self.is_full() {
            return;
        }
        let (w, h) = (self.buffer.width(), self.buffer.height());
        for y in 0..h {
            for x in 0..w {
                if self.is_full() {
                    return;
                }
                self.push(x, y);
            }
        }
    }

    pub(crate) fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}
