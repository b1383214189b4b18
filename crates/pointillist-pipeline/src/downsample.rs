//! Working-resolution reduction before analysis.
//!
//! Analysis cost must not grow with arbitrary input resolution, so a
//! buffer whose longest axis exceeds the analyzer's cap is resized down
//! (aspect preserved) before the row scan. Buffers already within the
//! cap are borrowed unchanged.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::types::PipelineError;

/// Resampling filter used when downsampling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality,
/// with a `Disabled` variant to skip downsampling entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownsampleFilter {
    /// Skip downsampling regardless of image size.
    Disabled,
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl DownsampleFilter {
    /// The matching `image` crate filter, `None` for [`Self::Disabled`].
    const fn to_image_filter(self) -> Option<image::imageops::FilterType> {
        match self {
            Self::Disabled => None,
            Self::Nearest => Some(image::imageops::FilterType::Nearest),
            Self::Triangle => Some(image::imageops::FilterType::Triangle),
            Self::CatmullRom => Some(image::imageops::FilterType::CatmullRom),
            Self::Lanczos3 => Some(image::imageops::FilterType::Lanczos3),
        }
    }
}

impl fmt::Display for DownsampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Shrink `buffer` so its longest axis is at most `max_dimension`.
///
/// Returns the borrowed buffer when no resize is needed (already small
/// enough, or the filter is [`DownsampleFilter::Disabled`]).
///
/// # Errors
///
/// Returns [`PipelineError::InvalidImage`] only if the resized image
/// cannot be rewrapped, which would indicate a zero-sized result.
pub fn downsample(
    buffer: &PixelBuffer,
    max_dimension: u32,
    filter: DownsampleFilter,
) -> Result<Cow<'_, PixelBuffer>, PipelineError> {
    let Some(image_filter) = filter.to_image_filter() else {
        return Ok(Cow::Borrowed(buffer));
    };

    let max_dimension = max_dimension.max(1);
    let (w, h) = (buffer.width(), buffer.height());
    if w.max(h) <= max_dimension {
        return Ok(Cow::Borrowed(buffer));
    }

    let (new_w, new_h) = fit_within(w, h, max_dimension);
    log::debug!("downsampling {w}x{h} -> {new_w}x{new_h} with {filter}");
    let resized = image::imageops::resize(&buffer.to_rgba_image(), new_w, new_h, image_filter);
    PixelBuffer::from_rgba_image(&resized).map(Cow::Owned)
}

/// Scale `(w, h)` so the longest side equals `max`, keeping at least one
/// pixel on the short side.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fit_within(w: u32, h: u32, max: u32) -> (u32, u32) {
    if w >= h {
        let scaled = (f64::from(h) * f64::from(max) / f64::from(w)).round() as u32;
        (max, scaled.max(1))
    } else {
        let scaled = (f64::from(w) * f64::from(max) / f64::from(h)).round() as u32;
        (scaled.max(1), max)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gray_buffer(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::from_rgba(w, h, vec![128; (w * h * 4) as usize]).unwrap()
    }

    #[test]
    fn default_filter_is_bilinear() {
        assert_eq!(DownsampleFilter::default(), DownsampleFilter::Triangle);
    }

    #[test]
    fn small_buffer_is_borrowed() {
        let buf = gray_buffer(100, 80);
        let result = downsample(&buf, 256, DownsampleFilter::Triangle).unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn exact_match_is_borrowed() {
        let buf = gray_buffer(256, 10);
        let result = downsample(&buf, 256, DownsampleFilter::Triangle).unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn landscape_keeps_aspect() {
        let buf = gray_buffer(1024, 768);
        let result = downsample(&buf, 256, DownsampleFilter::Triangle).unwrap();
        assert_eq!(result.width(), 256);
        assert_eq!(result.height(), 192);
    }

    #[test]
    fn portrait_keeps_aspect() {
        let buf = gray_buffer(600, 1200);
        let result = downsample(&buf, 256, DownsampleFilter::Triangle).unwrap();
        assert_eq!(result.width(), 128);
        assert_eq!(result.height(), 256);
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let buf = gray_buffer(4000, 1);
        let result = downsample(&buf, 100, DownsampleFilter::Nearest).unwrap();
        assert_eq!(result.width(), 100);
        assert_eq!(result.height(), 1);
    }

    #[test]
    fn disabled_filter_skips_large_buffer() {
        let buf = gray_buffer(1024, 768);
        let result = downsample(&buf, 256, DownsampleFilter::Disabled).unwrap();
        assert_eq!(result.width(), 1024);
    }

    #[test]
    fn resized_colors_stay_uniform() {
        let buf = gray_buffer(300, 300);
        let result = downsample(&buf, 100, DownsampleFilter::Triangle).unwrap();
        assert_eq!(result.color_at(50, 50).to_bytes(), [128, 128, 128, 128]);
    }
}
