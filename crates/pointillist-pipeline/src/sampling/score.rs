//! Per-pixel importance scoring shared by the detail-driven strategies.
//!
//! A candidate's score blends three normalized signals: local brightness
//! contrast over a square neighborhood, color saturation, and Sobel
//! gradient magnitude on the luma channel. Candidates are taken on a
//! stride grid sized to oversample the budget, so scoring cost follows
//! the budget rather than the image resolution.

use image::Luma;
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;
use rayon::prelude::*;

use crate::buffer::PixelBuffer;
use crate::types::{Dimensions, PipelineError};

use super::SamplingContext;

/// Candidates considered per requested sample.
pub const OVERSAMPLE: u64 = 8;

/// Pixels with alpha at or below this are never candidates.
pub const ALPHA_CUTOFF: f32 = 0.1;

/// Sobel magnitude of a full black-to-white step, used to normalize
/// gradient strength into `[0, 1]`.
const SOBEL_STEP: f32 = 1020.0;

/// A scored candidate pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Blended importance in `[0, 1]`.
    pub score: f32,
}

/// Normalized Sobel gradient magnitude for every pixel of a buffer.
#[derive(Debug, Clone)]
pub struct EdgeMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl EdgeMap {
    /// Compute gradient strength from the buffer's luma channel.
    #[must_use]
    pub fn compute(buffer: &PixelBuffer) -> Self {
        let luma = buffer.luma_image();
        let gx: Image<Luma<i16>> = filter_clamped(&luma, kernel::SOBEL_HORIZONTAL_3X3);
        let gy: Image<Luma<i16>> = filter_clamped(&luma, kernel::SOBEL_VERTICAL_3X3);
        let values = gx
            .pixels()
            .zip(gy.pixels())
            .map(|(h, v)| (f32::from(h[0]).hypot(f32::from(v[0])) / SOBEL_STEP).min(1.0))
            .collect();
        Self {
            width: buffer.width(),
            height: buffer.height(),
            values,
        }
    }

    /// Edge strength at `(x, y)`, zero outside the map.
    #[must_use]
    pub fn strength(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.values.get(index).copied().unwrap_or(0.0)
    }
}

/// Distance between candidate rows and columns for a budget of `target`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn candidate_stride(dimensions: Dimensions, target: usize) -> u32 {
    let wanted = (target as u64).saturating_mul(OVERSAMPLE).max(1);
    let ratio = dimensions.pixel_count() as f64 / wanted as f64;
    (ratio.sqrt().floor() as u32).max(1)
}

/// Brightness range (max minus min) over the square window of `radius`
/// around `(x, y)`, clipped to the buffer.
#[must_use]
pub fn local_contrast(buffer: &PixelBuffer, x: u32, y: u32, radius: u32) -> f32 {
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = x.saturating_add(radius).min(buffer.width() - 1);
    let y1 = y.saturating_add(radius).min(buffer.height() - 1);
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for wy in y0..=y1 {
        for wx in x0..=x1 {
            let b = buffer.color_at(wx, wy).brightness();
            lo = lo.min(b);
            hi = hi.max(b);
        }
    }
    if hi >= lo { hi - lo } else { 0.0 }
}

/// Score every non-transparent pixel on the candidate grid for `target`.
///
/// Rows are scored in parallel and gathered in row-major order, so the
/// output is identical from run to run.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if cancellation is observed
/// between rows.
pub fn score_candidates(
    ctx: &SamplingContext<'_>,
    target: usize,
) -> Result<Vec<Candidate>, PipelineError> {
    let buffer = ctx.buffer;
    let params = ctx.params;
    let stride = candidate_stride(buffer.dimensions(), target);
    let edges = EdgeMap::compute(buffer);

    let weight_sum = params.contrast_weight + params.saturation_weight + params.edge_bias;
    let rows: Vec<u32> = (0..buffer.height()).step_by(stride as usize).collect();

    let scored: Option<Vec<Vec<Candidate>>> = rows
        .par_iter()
        .map(|&y| {
            if (ctx.is_cancelled)() {
                return None;
            }
            let row = (0..buffer.width())
                .step_by(stride as usize)
                .filter_map(|x| {
                    let color = buffer.color_at(x, y);
                    if color.a <= ALPHA_CUTOFF {
                        return None;
                    }
                    let blended = params.contrast_weight
                        * local_contrast(buffer, x, y, params.edge_radius)
                        + params.saturation_weight * color.saturation()
                        + params.edge_bias * edges.strength(x, y);
                    let score = if weight_sum > 0.0 {
                        (blended / weight_sum).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    Some(Candidate { x, y, score })
                })
                .collect();
            Some(row)
        })
        .collect();

    let candidates: Vec<Candidate> = scored
        .ok_or(PipelineError::Cancelled)?
        .into_iter()
        .flatten()
        .collect();
    log::trace!(
        "scored {} candidates at stride {stride} for target {target}",
        candidates.len()
    );
    Ok(candidates)
}
