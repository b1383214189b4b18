//! Importance sampling.
//!
//! The budget is split between score-driven picks and a uniform grid.
//! Score-driven picks take the best candidates above the importance
//! threshold first, then spread the rest of their share evenly over the
//! lower-scoring candidates so flat regions are never empty.

use std::cmp::Ordering;

use crate::types::{PipelineError, Sample};

use super::score::{self, Candidate};
use super::{SamplingContext, Selection, cluster, scaled, uniform};

/// Importance samples for `target`.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if scoring was cancelled.
pub fn sample_importance(
    ctx: &SamplingContext<'_>,
    target: usize,
) -> Result<Vec<Sample>, PipelineError> {
    let ranked = rank(score::score_candidates(ctx, target)?);
    let mut selection = Selection::new(ctx.buffer, target);

    let important = scaled(target, ctx.params.important_sampling_ratio);
    select_salient(ctx, &ranked, important, target, &mut selection);

    let grid = selection.remaining();
    selection.extend(uniform::grid_points(ctx.full_rect(), grid));
    selection.extend(ranked.iter().map(|c| (c.x, c.y)));
    selection.fill_exhaustively();
    Ok(selection.into_samples())
}

/// Sort by score descending, ties broken by row then column.
#[must_use]
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (a.y, a.x).cmp(&(b.y, b.x)))
    });
    candidates
}

/// Add up to `budget` score-driven picks from `ranked` to `selection`.
///
/// `target` is the overall budget and sizes the thinning cell. Returns
/// the number of samples added.
pub(crate) fn select_salient(
    ctx: &SamplingContext<'_>,
    ranked: &[Candidate],
    budget: usize,
    target: usize,
    selection: &mut Selection<'_>,
) -> usize {
    let before = selection.len();
    let budget = budget.min(selection.remaining());
    if budget == 0 {
        return 0;
    }

    let threshold = ctx.params.importance_threshold;
    let split = ranked.partition_point(|c| c.score > threshold);
    let (above, below) = ranked.split_at(split);
    let cell = ctx
        .params
        .apply_anti_clustering
        .then(|| cluster::cell_size(ctx.buffer.dimensions(), target));

    let top_budget = scaled(budget, ctx.params.top_bottom_ratio);
    let fresh: Vec<(u32, u32)> = above
        .iter()
        .map(|c| (c.x, c.y))
        .filter(|&(x, y)| !selection.contains(x, y))
        .collect();
    selection.extend(pick(&fresh, cell, top_budget));

    let bottom_budget = budget - (selection.len() - before);
    let spread: Vec<(u32, u32)> = cluster::spread_order(below.len(), bottom_budget)
        .map(|i| (below[i].x, below[i].y))
        .filter(|&(x, y)| !selection.contains(x, y))
        .collect();
    selection.extend(pick(&spread, cell, bottom_budget));

    // Not enough low scorers: give the rest back to the high scorers.
    let rest = budget - (selection.len() - before);
    if rest > 0 {
        let fresh: Vec<(u32, u32)> = above
            .iter()
            .map(|c| (c.x, c.y))
            .filter(|&(x, y)| !selection.contains(x, y))
            .collect();
        selection.extend(pick(&fresh, cell, rest));
    }

    selection.len() - before
}

fn pick(points: &[(u32, u32)], cell: Option<u32>, limit: usize) -> Vec<(u32, u32)> {
    match cell {
        Some(cell) => cluster::thin(points, cell, limit),
        None => points.iter().copied().take(limit).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::analysis::ImageAnalyzer;
    use crate::buffer::PixelBuffer;
    use crate::sampling::SamplingParams;
    use crate::sampling::tests::{assert_valid, half_busy};

    fn run(buf: &PixelBuffer, target: usize, params: &SamplingParams) -> Vec<Sample> {
        let analysis = ImageAnalyzer::default().analyze(buf).unwrap();
        let ctx = SamplingContext {
            analysis: &analysis,
            buffer: buf,
            params,
            is_cancelled: &|| false,
        };
        sample_importance(&ctx, target).unwrap()
    }

    // --- rank ---

    #[test]
    fn rank_orders_by_score_then_position() {
        let c = |x, y, score| Candidate { x, y, score };
        let ranked = rank(vec![c(5, 1, 0.2), c(3, 0, 0.9), c(1, 1, 0.2), c(0, 2, 0.9)]);
        let order: Vec<(u32, u32)> = ranked.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(order, vec![(3, 0), (0, 2), (1, 1), (5, 1)]);
    }

    // --- sample_importance ---

    #[test]
    fn detail_attracts_samples() {
        let buf = half_busy(60, 60);
        let samples = run(&buf, 300, &SamplingParams::default());
        assert_eq!(samples.len(), 300);
        assert_valid(&samples, buf.dimensions());
        let busy = samples.iter().filter(|s| s.x >= 30).count();
        assert!(busy > 180, "busy half got {busy} of 300");
    }

    #[test]
    fn flat_half_is_not_starved() {
        let buf = half_busy(60, 60);
        let samples = run(&buf, 300, &SamplingParams::default());
        let flat = samples.iter().filter(|s| s.x < 30).count();
        assert!(flat >= 30, "flat half got {flat} of 300");
    }

    #[test]
    fn mostly_transparent_image_still_fills_budget() {
        let mut bytes = vec![0; 8 * 8 * 4];
        bytes[0..4].copy_from_slice(&[255, 0, 0, 255]);
        let buf = PixelBuffer::from_rgba(8, 8, bytes).unwrap();
        let samples = run(&buf, 20, &SamplingParams::default());
        assert_eq!(samples.len(), 20);
        assert_valid(&samples, buf.dimensions());
    }

    #[test]
    fn output_is_deterministic() {
        let buf = half_busy(50, 40);
        let params = SamplingParams::default();
        assert_eq!(run(&buf, 150, &params), run(&buf, 150, &params));
    }

    #[test]
    fn without_anti_clustering_budget_is_still_met() {
        let buf = half_busy(50, 40);
        let params = SamplingParams {
            apply_anti_clustering: false,
            ..SamplingParams::default()
        };
        let samples = run(&buf, 400, &params);
        assert_eq!(samples.len(), 400);
        assert_valid(&samples, buf.dimensions());
    }
}
