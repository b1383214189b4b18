//! Hybrid sampling: a uniform baseline plus importance detail.
//!
//! The baseline keeps the whole image legible at any budget; the detail
//! share concentrates on edges and saturated regions. The tier decides
//! the split through [`SamplingParams::uniform_share`](super::SamplingParams::uniform_share).

use crate::types::{PipelineError, Sample};

use super::importance::{rank, select_salient};
use super::score::score_candidates;
use super::{SamplingContext, Selection, scaled, uniform};

/// Hybrid samples for `target`.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if scoring was cancelled.
pub fn sample_hybrid(ctx: &SamplingContext<'_>, target: usize) -> Result<Vec<Sample>, PipelineError> {
    let mut selection = Selection::new(ctx.buffer, target);
    let baseline = scaled(target, ctx.params.uniform_share);
    selection.extend(uniform::grid_points(ctx.full_rect(), baseline));

    let ranked = rank(score_candidates(ctx, target)?);
    let detail = selection.remaining();
    select_salient(ctx, &ranked, detail, target, &mut selection);

    // Dedup losses are made up from the ranked list, then the grid.
    selection.extend(ranked.iter().map(|c| (c.x, c.y)));
    selection.extend(uniform::grid_points(ctx.full_rect(), target));
    selection.fill_exhaustively();
    Ok(selection.into_samples())
}
