//! Shared types for the pointillist analysis and sampling pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hand decoded images to
/// [`PixelBuffer::from_rgba_image`](crate::PixelBuffer::from_rgba_image)
/// without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width divided by height. Zero-height images report `1.0`.
    #[must_use]
    pub fn aspect_ratio(self) -> f64 {
        if self.height == 0 {
            1.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    /// Returns `true` if either dimension is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A color with four `f32` channels in canonical RGBA order.
///
/// Channels are in `[0, 1]` with straight (not premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    /// Red channel.
    pub r: f32,
    /// Green channel.
    pub g: f32,
    /// Blue channel.
    pub b: f32,
    /// Alpha channel.
    pub a: f32,
}

impl Rgba {
    /// Fully opaque black, the fallback for unreadable pixels.
    pub const OPAQUE_BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Create a color from four channels.
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Convert 8-bit channels (already in RGBA order) to floats.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(
            f32::from(bytes[0]) / 255.0,
            f32::from(bytes[1]) / 255.0,
            f32::from(bytes[2]) / 255.0,
            f32::from(bytes[3]) / 255.0,
        )
    }

    /// Convert back to 8-bit channels, rounding and clamping.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_bytes(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    /// Mean of the three color channels.
    #[must_use]
    pub fn brightness(self) -> f32 {
        (self.r + self.g + self.b) / 3.0
    }

    /// HSV-style saturation: `(max - min) / max`, zero for black.
    #[must_use]
    pub fn saturation(self) -> f32 {
        let max = self.r.max(self.g).max(self.b);
        if max <= 0.0 {
            return 0.0;
        }
        let min = self.r.min(self.g).min(self.b);
        (max - min) / max
    }

    /// Rec. 601 luma, used for sizing and grayscale conversion.
    #[must_use]
    pub fn luma(self) -> f32 {
        0.114f32.mul_add(self.b, 0.299f32.mul_add(self.r, 0.587 * self.g))
    }

    /// The color channels without alpha.
    #[must_use]
    pub const fn rgb(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// All four channels as an array.
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Returns `true` if every channel is finite and inside `[0, 1]`.
    #[must_use]
    pub fn is_normalized(self) -> bool {
        self.to_array()
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }
}

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x: u32,
    /// Top edge (inclusive).
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip this rectangle to an image of the given dimensions.
    ///
    /// Returns `None` when nothing remains.
    #[must_use]
    pub fn clip_to(self, dimensions: Dimensions) -> Option<Self> {
        if self.x >= dimensions.width || self.y >= dimensions.height {
            return None;
        }
        let right = self.x.saturating_add(self.width).min(dimensions.width);
        let bottom = self.y.saturating_add(self.height).min(dimensions.height);
        if right <= self.x || bottom <= self.y {
            return None;
        }
        Some(Self::new(self.x, self.y, right - self.x, bottom - self.y))
    }
}

/// A single chosen pixel coordinate plus its color, pre-assembly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Column, `0 <= x < width`.
    pub x: u32,
    /// Row, `0 <= y < height`.
    pub y: u32,
    /// Canonical RGBA color at `(x, y)`.
    pub color: Rgba,
}

impl Sample {
    /// Create a new sample.
    #[must_use]
    pub const fn new(x: u32, y: u32, color: Rgba) -> Self {
        Self { x, y, color }
    }
}

/// Immutable statistical descriptor of an image, produced once by the
/// [`ImageAnalyzer`](crate::ImageAnalyzer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    /// Width of the source buffer in pixels.
    pub width: u32,
    /// Height of the source buffer in pixels.
    pub height: u32,
    /// Width actually scanned after downsampling.
    pub analyzed_width: u32,
    /// Height actually scanned after downsampling.
    pub analyzed_height: u32,
    /// Mean color of all colored (non-transparent) pixels.
    pub average_color: [f32; 3],
    /// Normalized brightness range, `0.5` for flat images.
    pub contrast: f32,
    /// Mean of `average_color`.
    pub brightness: f32,
    /// Fraction of pixels that are colored.
    pub pixel_density: f32,
    /// Fraction of pixels that sit on a horizontal brightness edge.
    pub edge_density: f32,
    /// Mean per-pixel saturation.
    pub saturation: f32,
    /// `round(edge_density * 20)` clamped to `0..=10`.
    pub complexity: u8,
    /// Up to five most frequent quantized colors, most frequent first.
    pub dominant_colors: Vec<[f32; 3]>,
    /// Frequency-weighted RMS distance of histogram buckets from the
    /// average color.
    pub color_variance: f32,
    /// Number of pixels with alpha above the transparency threshold.
    pub colored_pixel_count: u64,
}

impl ImageAnalysis {
    /// Dimensions of the source buffer.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Output of [`process`](crate::process): the analysis plus the samples
/// drawn from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Descriptor of the source image.
    pub analysis: ImageAnalysis,
    /// Chosen pixels, in strategy order.
    pub samples: Vec<Sample>,
}

/// Errors that can occur during analysis or sampling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The pixel buffer has zero dimensions or is too short for its
    /// declared layout.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Generation configuration is invalid.
    #[error("invalid generation configuration: {0}")]
    InvalidConfig(String),

    /// The analyzer could not produce a descriptor.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    /// The sampler could not produce samples.
    #[error("sampling failed: {0}")]
    SamplingFailed(String),

    /// The operation observed a cancellation request.
    #[error("operation was cancelled")]
    Cancelled,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Dimensions tests ---

    #[test]
    fn dimensions_pixel_count_does_not_overflow() {
        let d = Dimensions::new(100_000, 100_000);
        assert_eq!(d.pixel_count(), 10_000_000_000);
    }

    #[test]
    fn dimensions_aspect_ratio() {
        assert!((Dimensions::new(200, 100).aspect_ratio() - 2.0).abs() < f64::EPSILON);
        assert!((Dimensions::new(5, 0).aspect_ratio() - 1.0).abs() < f64::EPSILON);
    }

    // --- Rgba tests ---

    #[test]
    fn rgba_byte_round_trip() {
        let bytes = [12, 200, 7, 255];
        assert_eq!(Rgba::from_bytes(bytes).to_bytes(), bytes);
    }

    #[test]
    fn rgba_saturation_of_gray_is_zero() {
        assert!(Rgba::new(0.4, 0.4, 0.4, 1.0).saturation().abs() < f32::EPSILON);
        assert!(Rgba::OPAQUE_BLACK.saturation().abs() < f32::EPSILON);
    }

    #[test]
    fn rgba_saturation_of_pure_red_is_one() {
        assert!((Rgba::new(1.0, 0.0, 0.0, 1.0).saturation() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rgba_is_normalized_rejects_nan() {
        assert!(!Rgba::new(f32::NAN, 0.0, 0.0, 1.0).is_normalized());
        assert!(Rgba::new(0.0, 0.5, 1.0, 1.0).is_normalized());
    }

    // --- Rect tests ---

    #[test]
    fn rect_clip_inside_is_unchanged() {
        let r = Rect::new(1, 1, 2, 2);
        assert_eq!(r.clip_to(Dimensions::new(10, 10)), Some(r));
    }

    #[test]
    fn rect_clip_overhanging_is_trimmed() {
        let r = Rect::new(8, 8, 5, 5);
        assert_eq!(
            r.clip_to(Dimensions::new(10, 10)),
            Some(Rect::new(8, 8, 2, 2))
        );
    }

    #[test]
    fn rect_clip_outside_is_none() {
        assert_eq!(Rect::new(10, 0, 1, 1).clip_to(Dimensions::new(10, 10)), None);
        assert_eq!(Rect::new(0, 0, 0, 4).clip_to(Dimensions::new(10, 10)), None);
    }

    // --- Error tests ---

    #[test]
    fn error_display_names_the_failure() {
        assert_eq!(
            PipelineError::SamplingFailed("dimension mismatch".to_string()).to_string(),
            "sampling failed: dimension mismatch",
        );
        assert_eq!(PipelineError::Cancelled.to_string(), "operation was cancelled");
    }

    // --- Serde round-trip tests ---

    #[test]
    fn sample_serde_round_trip() {
        let s = Sample::new(3, 4, Rgba::new(0.1, 0.2, 0.3, 1.0));
        let json = serde_json::to_string(&s).unwrap();
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
