//! Uniform grid sampling.
//!
//! The grid is shaped to the region's aspect ratio so spacing is close
//! to equal on both axes, and its outermost rows and columns sit on the
//! region's edges. Points are emitted row-major and the last row may be
//! partial.

use crate::buffer::PixelBuffer;
use crate::types::{Rect, Sample};

use super::Selection;

/// Columns and rows of the grid used to place `count` points in `rect`.
///
/// Both values are at least 1 and never exceed the rect's extent, and
/// the last row is never empty: `(rows - 1) * cols < count`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn grid_shape(rect: Rect, count: usize) -> (u32, u32) {
    let (w, h) = (rect.width.max(1), rect.height.max(1));
    let count = count.max(1) as u64;
    let aspect = f64::from(w) / f64::from(h);
    let rows = ((count as f64 / aspect).sqrt().round() as u64).clamp(1, u64::from(h));
    let cols = count.div_ceil(rows).clamp(1, u64::from(w));
    let rows = count.div_ceil(cols).min(u64::from(h));
    (cols as u32, rows as u32)
}

/// Up to `count` distinct grid points inside `rect`, row-major.
///
/// When `count` covers the whole rect every pixel is returned.
#[must_use]
pub fn grid_points(rect: Rect, count: usize) -> Vec<(u32, u32)> {
    if count == 0 || rect.width == 0 || rect.height == 0 {
        return Vec::new();
    }
    let area = u64::from(rect.width) * u64::from(rect.height);
    if count as u64 >= area {
        return (rect.y..rect.y + rect.height)
            .flat_map(|y| (rect.x..rect.x + rect.width).map(move |x| (x, y)))
            .collect();
    }

    let (cols, rows) = grid_shape(rect, count);
    let mut points = Vec::with_capacity(count);
    'rows: for row in 0..rows {
        let y = rect.y + spread(row, rows, rect.height);
        for col in 0..cols {
            if points.len() == count {
                break 'rows;
            }
            points.push((rect.x + spread(col, cols, rect.width), y));
        }
    }
    points
}

/// Uniform samples over the whole buffer, exactly `min(target, pixels)`.
#[must_use]
pub fn sample_uniform(buffer: &PixelBuffer, target: usize) -> Vec<Sample> {
    let rect = Rect::new(0, 0, buffer.width(), buffer.height());
    let mut selection = Selection::new(buffer, target);
    selection.extend(grid_points(rect, target));
    selection.into_samples()
}

/// Offset of grid line `i` of `n` across `len` pixels. A single line is
/// centered; otherwise the first and last lines touch the edges.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn spread(i: u32, n: u32, len: u32) -> u32 {
    if n <= 1 {
        return (len - 1) / 2;
    }
    let offset = f64::from(i) * f64::from(len - 1) / f64::from(n - 1);
    (offset.round() as u32).min(len - 1)
}
