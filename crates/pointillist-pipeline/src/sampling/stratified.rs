//! Stratified band sampling.
//!
//! Horizontal bands receive quotas proportional to the summed visual
//! weight (alpha times brightness) of their candidates. Inside a band the
//! heaviest candidates come first and the quota is drawn at an even step
//! through that order, so each band keeps both its highlights and some
//! of its darker pixels. A second pass tops up any shortfall from all
//! bands in order.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::buffer::PixelBuffer;
use crate::types::{PipelineError, Sample};

use super::score::candidate_stride;
use super::{SamplingContext, Selection, uniform};

#[derive(Debug, Clone, Copy)]
struct Weighted {
    x: u32,
    y: u32,
    weight: f32,
}

/// Stratified samples for `target`.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if cancellation is observed while
/// collecting band candidates.
pub fn sample_stratified(
    ctx: &SamplingContext<'_>,
    target: usize,
) -> Result<Vec<Sample>, PipelineError> {
    let buffer = ctx.buffer;
    let bands = ctx.params.stratified_bands.clamp(1, buffer.height());
    let band_height = buffer.height().div_ceil(bands);
    let stride = candidate_stride(buffer.dimensions(), target);

    let collected: Option<Vec<Vec<Weighted>>> = (0..bands)
        .into_par_iter()
        .map(|band| {
            if (ctx.is_cancelled)() {
                return None;
            }
            let mut members = band_candidates(buffer, band * band_height, band_height, stride);
            members.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
            Some(members)
        })
        .collect();
    let bands = collected.ok_or(PipelineError::Cancelled)?;

    let totals: Vec<f64> = bands
        .iter()
        .map(|members| members.iter().map(|c| f64::from(c.weight)).sum())
        .collect();
    let sizes: Vec<usize> = bands.iter().map(Vec::len).collect();
    let quotas = band_quotas(&totals, &sizes, target);

    let mut selection = Selection::new(buffer, target);
    for (members, &quota) in bands.iter().zip(&quotas) {
        if quota == 0 || members.is_empty() {
            continue;
        }
        let step = (members.len() / quota).max(1);
        selection.extend(
            members
                .iter()
                .step_by(step)
                .take(quota)
                .map(|c| (c.x, c.y)),
        );
    }

    for members in &bands {
        selection.extend(members.iter().map(|c| (c.x, c.y)));
    }
    selection.extend(uniform::grid_points(ctx.full_rect(), target));
    selection.fill_exhaustively();
    Ok(selection.into_samples())
}

/// Per-band quotas summing to `target`.
///
/// Each band gets the floor of its proportional share. Leftover units go
/// one per band, heaviest band first (ties to the upper band). When no
/// band has any weight, candidate counts stand in for weights.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn band_quotas(totals: &[f64], sizes: &[usize], target: usize) -> Vec<usize> {
    if totals.is_empty() {
        return Vec::new();
    }
    let mut weights: Vec<f64> = totals.iter().map(|t| t.max(0.0)).collect();
    let mut sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        weights = sizes.iter().map(|&n| n as f64).collect();
        sum = weights.iter().sum();
    }
    if sum <= 0.0 {
        weights = vec![1.0; totals.len()];
        sum = weights.len() as f64;
    }

    let mut quotas: Vec<usize> = weights
        .iter()
        .map(|w| (w / sum * target as f64).floor() as usize)
        .collect();
    let placed: usize = quotas.iter().sum();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        weights[b]
            .partial_cmp(&weights[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    for &band in order.iter().cycle().take(target.saturating_sub(placed)) {
        quotas[band] += 1;
    }
    quotas
}

fn band_candidates(buffer: &PixelBuffer, top: u32, height: u32, stride: u32) -> Vec<Weighted> {
    let bottom = top.saturating_add(height).min(buffer.height());
    let first = top.div_ceil(stride) * stride;
    (first..bottom)
        .step_by(stride as usize)
        .flat_map(|y| {
            (0..buffer.width()).step_by(stride as usize).map(move |x| {
                let color = buffer.color_at(x, y);
                Weighted {
                    x,
                    y,
                    weight: color.a * color.brightness(),
                }
            })
        })
        .collect()
}
