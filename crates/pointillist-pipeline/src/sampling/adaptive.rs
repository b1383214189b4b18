//! Complexity-adaptive sampling.
//!
//! The image is cut into square tiles. Each tile's share of the budget
//! follows a baseline weight plus its mean edge strength, so busy tiles
//! get dense grids and flat tiles get sparse ones. Tiles with no colored
//! pixel get nothing until every other tile is full.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::buffer::PixelBuffer;
use crate::types::{Dimensions, PipelineError, Rect, Sample};

use super::score::{ALPHA_CUTOFF, EdgeMap};
use super::{SamplingContext, Selection, uniform};

/// Weight every colored tile receives regardless of edge content.
pub const BASELINE_WEIGHT: f64 = 0.2;

/// Smallest tile side in pixels.
const MIN_TILE: u32 = 4;

/// Tile side for a budget of `target`: roughly four uniform spacings, so
/// an average tile holds about sixteen samples.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn tile_size(dimensions: Dimensions, target: usize) -> u32 {
    let spacing = (dimensions.pixel_count() as f64 / target.max(1) as f64).sqrt();
    ((spacing * 4.0).round() as u32).max(MIN_TILE)
}

/// Adaptive samples for `target`.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if cancellation is observed while
/// weighing tiles.
pub fn sample_adaptive(
    ctx: &SamplingContext<'_>,
    target: usize,
) -> Result<Vec<Sample>, PipelineError> {
    let buffer = ctx.buffer;
    let edges = EdgeMap::compute(buffer);
    let size = tile_size(buffer.dimensions(), target);
    let tiles = tiles(buffer.dimensions(), size);

    let weights: Option<Vec<f64>> = tiles
        .par_iter()
        .map(|&rect| (!(ctx.is_cancelled)()).then(|| tile_weight(buffer, &edges, rect)))
        .collect();
    let weights = weights.ok_or(PipelineError::Cancelled)?;

    let capacities: Vec<u64> = tiles
        .iter()
        .map(|r| u64::from(r.width) * u64::from(r.height))
        .collect();
    let quotas = allocate(&weights, &capacities, target);
    log::trace!("adaptive sampling over {} tiles of {size}px", tiles.len());

    let mut selection = Selection::new(buffer, target);
    for (&rect, &quota) in tiles.iter().zip(&quotas) {
        selection.extend(uniform::grid_points(rect, quota));
    }
    selection.fill_exhaustively();
    Ok(selection.into_samples())
}

/// Split `total` across tiles by weight, capped at each tile's capacity.
///
/// Whole shares are granted first; leftover units go to the largest
/// fractional parts, ties to the lower tile index. Capacity freed by
/// full tiles is redistributed until `total` is placed or every tile is
/// full. When every open tile has zero weight, capacity is the weight.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn allocate(weights: &[f64], capacities: &[u64], total: usize) -> Vec<usize> {
    let mut quotas = vec![0usize; weights.len()];
    let room = |quotas: &[usize], i: usize| capacities[i].saturating_sub(quotas[i] as u64) as usize;
    let capacity: u64 = capacities.iter().sum();
    let mut remaining = total.min(usize::try_from(capacity).unwrap_or(usize::MAX));

    while remaining > 0 {
        let open: Vec<usize> = (0..quotas.len()).filter(|&i| room(&quotas, i) > 0).collect();
        if open.is_empty() {
            break;
        }
        let weighted: f64 = open.iter().map(|&i| weights[i].max(0.0)).sum();
        let weight_of = |i: usize, quotas: &[usize]| {
            if weighted > 0.0 {
                weights[i].max(0.0)
            } else {
                room(quotas, i) as f64
            }
        };
        let weight_sum: f64 = open.iter().map(|&i| weight_of(i, &quotas)).sum();

        let mut placed = 0;
        let mut fractions = Vec::with_capacity(open.len());
        for &i in &open {
            let exact = remaining as f64 * weight_of(i, &quotas) / weight_sum;
            let whole = (exact.floor() as usize).min(room(&quotas, i));
            quotas[i] += whole;
            placed += whole;
            if room(&quotas, i) > 0 {
                fractions.push((exact - exact.floor(), i));
            }
        }

        fractions.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        for &(_, i) in fractions.iter().take(remaining - placed) {
            quotas[i] += 1;
            placed += 1;
        }
        remaining -= placed;
    }
    quotas
}

fn tiles(dimensions: Dimensions, size: u32) -> Vec<Rect> {
    (0..dimensions.height)
        .step_by(size as usize)
        .flat_map(|y| {
            (0..dimensions.width)
                .step_by(size as usize)
                .map(move |x| Rect::new(x, y, size, size))
        })
        .filter_map(|rect| rect.clip_to(dimensions))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn tile_weight(buffer: &PixelBuffer, edges: &EdgeMap, rect: Rect) -> f64 {
    let step = (rect.width.max(rect.height) / 8).max(1) as usize;
    let mut colored = 0u32;
    let mut strength = 0.0f64;
    for y in (rect.y..rect.y + rect.height).step_by(step) {
        for x in (rect.x..rect.x + rect.width).step_by(step) {
            if buffer.color_at(x, y).a > ALPHA_CUTOFF {
                colored += 1;
                strength += f64::from(edges.strength(x, y));
            }
        }
    }
    if colored == 0 {
        0.0
    } else {
        BASELINE_WEIGHT + strength / f64::from(colored)
    }
}
