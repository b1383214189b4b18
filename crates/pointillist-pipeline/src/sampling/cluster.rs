//! Spatial thinning for score-ranked picks.
//!
//! High scores tend to bunch along a few strong edges. Thinning walks a
//! ranked list and keeps at most one point per grid cell on the first
//! pass; points displaced by an occupied cell are deferred and only
//! used if the first pass cannot fill the limit.

use std::collections::HashSet;

use crate::types::Dimensions;

/// Side of the thinning cell for a budget of `target`: half the mean
/// spacing a uniform layout of `target` points would have.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn cell_size(dimensions: Dimensions, target: usize) -> u32 {
    let spacing = (dimensions.pixel_count() as f64 / target.max(1) as f64).sqrt();
    ((spacing / 2.0).floor() as u32).max(1)
}

/// Keep up to `limit` points from `ranked`, one per `cell`-sized cell
/// first, then deferred points in their original order.
#[must_use]
pub fn thin(ranked: &[(u32, u32)], cell: u32, limit: usize) -> Vec<(u32, u32)> {
    let cell = cell.max(1);
    let mut occupied = HashSet::new();
    let mut kept = Vec::with_capacity(limit.min(ranked.len()));
    let mut deferred = Vec::new();

    for &(x, y) in ranked {
        if kept.len() == limit {
            return kept;
        }
        if occupied.insert((x / cell, y / cell)) {
            kept.push((x, y));
        } else {
            deferred.push((x, y));
        }
    }

    let room = limit.saturating_sub(kept.len());
    kept.extend(deferred.into_iter().take(room));
    kept
}

/// Indices `0..len` ordered so that any prefix of length `want` is
/// spread evenly across the range.
pub fn spread_order(len: usize, want: usize) -> impl Iterator<Item = usize> {
    let step = if want == 0 { 1 } else { (len / want).max(1) };
    (0..step).flat_map(move |offset| (offset..len).step_by(step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_is_half_the_spacing() {
        assert_eq!(cell_size(Dimensions::new(100, 100), 100), 5);
        assert_eq!(cell_size(Dimensions::new(10, 10), 1000), 1);
    }

    #[test]
    fn one_point_per_cell_first() {
        let ranked = [(0, 0), (1, 1), (5, 0), (6, 1), (0, 5)];
        let kept = thin(&ranked, 4, 3);
        assert_eq!(kept, vec![(0, 0), (5, 0), (0, 5)]);
    }

    #[test]
    fn deferred_points_fill_the_remainder() {
        let ranked = [(0, 0), (1, 1), (2, 2), (9, 9)];
        let kept = thin(&ranked, 4, 3);
        assert_eq!(kept, vec![(0, 0), (9, 9), (1, 1)]);
    }

    #[test]
    fn limit_larger_than_input_keeps_everything() {
        let ranked = [(0, 0), (1, 0), (2, 0)];
        assert_eq!(thin(&ranked, 8, 10).len(), 3);
    }

    #[test]
    fn unit_cell_keeps_order() {
        let ranked = [(3, 3), (1, 1), (2, 2)];
        assert_eq!(thin(&ranked, 1, 2), vec![(3, 3), (1, 1)]);
    }

    #[test]
    fn spread_prefix_is_even() {
        let order: Vec<usize> = spread_order(10, 5).collect();
        assert_eq!(&order[..5], &[0, 2, 4, 6, 8]);
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn spread_visits_every_index_once() {
        let mut order: Vec<usize> = spread_order(17, 4).collect();
        order.sort_unstable();
        assert_eq!(order, (0..17).collect::<Vec<_>>());
    }
}
