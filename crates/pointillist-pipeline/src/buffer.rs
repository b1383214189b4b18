//! Decoded pixel storage with bounds-checked, lock-free color reads.
//!
//! A [`PixelBuffer`] owns 4-byte-per-pixel color data in one of several
//! native channel orders and exposes it as canonical straight-alpha
//! [`Rgba`]. It is immutable after construction, so any number of
//! threads may read it through a shared reference without locking.

use std::fmt;

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PipelineError, Rect, Rgba, RgbaImage};

/// Bytes per pixel for every supported layout.
pub const BYTES_PER_PIXEL: usize = 4;

/// Number of random pixels inspected by [`PixelBuffer::validate`].
const VALIDATION_SPOT_CHECKS: usize = 16;

/// Byte order of the four channels of each pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Red, green, blue, alpha.
    #[default]
    Rgba,
    /// Blue, green, red, alpha.
    Bgra,
    /// Alpha, red, green, blue.
    Argb,
}

impl ChannelOrder {
    /// Reorder one native pixel into RGBA byte order.
    #[must_use]
    const fn to_rgba(self, px: [u8; 4]) -> [u8; 4] {
        match self {
            Self::Rgba => px,
            Self::Bgra => [px[2], px[1], px[0], px[3]],
            Self::Argb => [px[1], px[2], px[3], px[0]],
        }
    }
}

impl fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgba => f.write_str("RGBA"),
            Self::Bgra => f.write_str("BGRA"),
            Self::Argb => f.write_str("ARGB"),
        }
    }
}

/// Whether color channels are stored multiplied by alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlphaMode {
    /// Color channels are independent of alpha.
    #[default]
    Straight,
    /// Color channels have already been multiplied by alpha.
    Premultiplied,
}

/// An immutable, decoded pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride_bytes: usize,
    channel_order: ChannelOrder,
    alpha_mode: AlphaMode,
    bytes: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride_bytes", &self.stride_bytes)
            .field("channel_order", &self.channel_order)
            .field("alpha_mode", &self.alpha_mode)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Wrap raw pixel bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if either dimension is
    /// zero, the stride is shorter than one row of pixels, or `bytes`
    /// is too short for the declared layout.
    pub fn new(
        width: u32,
        height: u32,
        stride_bytes: usize,
        channel_order: ChannelOrder,
        alpha_mode: AlphaMode,
        bytes: Vec<u8>,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidImage(format!(
                "dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        if stride_bytes < row_bytes {
            return Err(PipelineError::InvalidImage(format!(
                "stride {stride_bytes} is shorter than a row of {row_bytes} bytes"
            )));
        }
        let required = required_len(height, stride_bytes, row_bytes);
        if bytes.len() < required {
            return Err(PipelineError::InvalidImage(format!(
                "buffer holds {} bytes but {width}x{height} with stride {stride_bytes} needs {required}",
                bytes.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride_bytes,
            channel_order,
            alpha_mode,
            bytes,
        })
    }

    /// Build a tightly packed straight-alpha RGBA buffer.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_rgba(width: u32, height: u32, bytes: Vec<u8>) -> Result<Self, PipelineError> {
        Self::new(
            width,
            height,
            width as usize * BYTES_PER_PIXEL,
            ChannelOrder::Rgba,
            AlphaMode::Straight,
            bytes,
        )
    }

    /// Copy a decoded [`RgbaImage`] into a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] for zero-sized images.
    pub fn from_rgba_image(image: &RgbaImage) -> Result<Self, PipelineError> {
        Self::from_rgba(image.width(), image.height(), image.as_raw().clone())
    }

    /// Decode encoded image bytes (PNG, JPEG, BMP, WebP).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidImage`] if `bytes` is empty or the
    /// format is unrecognized or corrupt.
    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidImage(
                "input image data is empty".to_string(),
            ));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::InvalidImage(format!("decode failed: {e}")))?;
        Self::from_rgba_image(&image.to_rgba8())
    }

    /// Convert to a packed straight-alpha [`RgbaImage`].
    #[must_use]
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            image::Rgba(self.color_at(x, y).to_bytes())
        })
    }

    /// Grayscale (luma) copy, used for gradient-based edge strength.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn luma_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let c = self.color_at(x, y);
            image::Luma([(c.luma().clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width and height.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.dimensions().pixel_count()
    }

    /// Bytes between the starts of consecutive rows.
    #[must_use]
    pub const fn stride_bytes(&self) -> usize {
        self.stride_bytes
    }

    /// Native channel order of the stored bytes.
    #[must_use]
    pub const fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    /// Whether stored colors are premultiplied.
    #[must_use]
    pub const fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    /// Canonical straight-alpha color at `(x, y)`.
    ///
    /// Out-of-range coordinates and byte offsets past the end of the
    /// buffer return [`Rgba::OPAQUE_BLACK`].
    #[must_use]
    pub fn color_at(&self, x: u32, y: u32) -> Rgba {
        if x >= self.width || y >= self.height {
            return Rgba::OPAQUE_BLACK;
        }
        let offset = y as usize * self.stride_bytes + x as usize * BYTES_PER_PIXEL;
        let Some(px) = self.bytes.get(offset..offset + BYTES_PER_PIXEL) else {
            return Rgba::OPAQUE_BLACK;
        };
        let rgba = self.channel_order.to_rgba([px[0], px[1], px[2], px[3]]);
        let color = Rgba::from_bytes(rgba);
        match self.alpha_mode {
            AlphaMode::Straight => color,
            AlphaMode::Premultiplied => unpremultiply(color),
        }
    }

    /// Lazily yield colors on a `step`-spaced grid inside `rect`.
    ///
    /// The rectangle is clipped to the buffer; a rectangle entirely
    /// outside yields nothing. A `step` of zero is treated as one.
    pub fn colors_in_region(&self, rect: Rect, step: u32) -> impl Iterator<Item = Rgba> + '_ {
        let step = step.max(1) as usize;
        let clipped = rect.clip_to(self.dimensions());
        clipped.into_iter().flat_map(move |r| {
            (r.y..r.y + r.height).step_by(step).flat_map(move |y| {
                (r.x..r.x + r.width)
                    .step_by(step)
                    .map(move |x| self.color_at(x, y))
            })
        })
    }

    /// Mean color over every pixel of `rect` (clipped to the buffer).
    ///
    /// An empty region yields [`Rgba::OPAQUE_BLACK`].
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn average_color(&self, rect: Rect) -> Rgba {
        let (sum, count) = self
            .colors_in_region(rect, 1)
            .fold(([0.0f64; 4], 0u64), |(mut acc, n), c| {
                acc[0] += f64::from(c.r);
                acc[1] += f64::from(c.g);
                acc[2] += f64::from(c.b);
                acc[3] += f64::from(c.a);
                (acc, n + 1)
            });
        if count == 0 {
            return Rgba::OPAQUE_BLACK;
        }
        let n = count as f64;
        Rgba::new(
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
            (sum[3] / n) as f32,
        )
    }

    /// Spot-check structural invariants and a few pixels.
    ///
    /// Returns `false` instead of failing so callers can run it as a
    /// cheap health check before expensive analysis. The pixel picks are
    /// seeded from the dimensions, so repeated calls inspect the same
    /// pixels.
    #[must_use]
    pub fn validate(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        if self.stride_bytes < row_bytes
            || self.bytes.len() < required_len(self.height, self.stride_bytes, row_bytes)
        {
            return false;
        }

        let seed = (u64::from(self.width) << 32) | u64::from(self.height);
        let mut rng = StdRng::seed_from_u64(seed);
        let corners = [
            (0, 0),
            (self.width - 1, self.height - 1),
        ];
        let random = (0..VALIDATION_SPOT_CHECKS).map(|_| {
            (
                rng.gen_range(0..self.width),
                rng.gen_range(0..self.height),
            )
        });
        corners
            .into_iter()
            .chain(random)
            .all(|(x, y)| self.color_at(x, y).is_normalized())
    }
}

/// Minimum byte length for `height` rows of `row_bytes` spaced `stride` apart.
const fn required_len(height: u32, stride: usize, row_bytes: usize) -> usize {
    (height as usize - 1) * stride + row_bytes
}

/// Undo alpha premultiplication, leaving fully transparent pixels black.
fn unpremultiply(c: Rgba) -> Rgba {
    if c.a <= 0.0 {
        return Rgba::new(0.0, 0.0, 0.0, 0.0);
    }
    Rgba::new(
        (c.r / c.a).min(1.0),
        (c.g / c.a).min(1.0),
        (c.b / c.a).min(1.0),
        c.a,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn two_by_two(order: ChannelOrder, alpha: AlphaMode) -> PixelBuffer {
        // Native pixels: (0,0) (1,0) / (0,1) (1,1)
        let bytes = vec![
            10, 20, 30, 255, 40, 50, 60, 255, //
            70, 80, 90, 255, 100, 110, 120, 128,
        ];
        PixelBuffer::new(2, 2, 8, order, alpha, bytes).unwrap()
    }

    // --- Construction ---

    #[test]
    fn zero_dimensions_are_invalid() {
        let result = PixelBuffer::from_rgba(0, 4, vec![]);
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn short_stride_is_invalid() {
        let result = PixelBuffer::new(
            4,
            1,
            8,
            ChannelOrder::Rgba,
            AlphaMode::Straight,
            vec![0; 16],
        );
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn truncated_bytes_are_invalid() {
        let result = PixelBuffer::from_rgba(2, 2, vec![0; 15]);
        assert!(matches!(result, Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn padded_last_row_is_not_required() {
        // Stride 12 for a 2-pixel row: the last row only needs 8 bytes.
        let bytes = vec![0; 12 + 8];
        let buffer = PixelBuffer::new(2, 2, 12, ChannelOrder::Rgba, AlphaMode::Straight, bytes);
        assert!(buffer.is_ok());
    }

    // --- Channel order ---

    #[test]
    fn rgba_order_reads_directly() {
        let buf = two_by_two(ChannelOrder::Rgba, AlphaMode::Straight);
        assert_eq!(buf.color_at(1, 0).to_bytes(), [40, 50, 60, 255]);
    }

    #[test]
    fn bgra_order_swaps_red_and_blue() {
        let buf = two_by_two(ChannelOrder::Bgra, AlphaMode::Straight);
        assert_eq!(buf.color_at(0, 0).to_bytes(), [30, 20, 10, 255]);
    }

    #[test]
    fn argb_order_moves_alpha_last() {
        let buf = two_by_two(ChannelOrder::Argb, AlphaMode::Straight);
        assert_eq!(buf.color_at(0, 0).to_bytes(), [20, 30, 255, 10]);
    }

    #[test]
    fn stride_padding_is_skipped() {
        let bytes = vec![
            1, 2, 3, 255, 0xAA, 0xAA, 0xAA, 0xAA, //
            4, 5, 6, 255,
        ];
        let buf =
            PixelBuffer::new(1, 2, 8, ChannelOrder::Rgba, AlphaMode::Straight, bytes).unwrap();
        assert_eq!(buf.color_at(0, 1).to_bytes(), [4, 5, 6, 255]);
    }

    // --- Alpha ---

    #[test]
    fn premultiplied_colors_are_restored() {
        let buf = PixelBuffer::new(
            1,
            1,
            4,
            ChannelOrder::Rgba,
            AlphaMode::Premultiplied,
            vec![64, 0, 32, 128],
        )
        .unwrap();
        let c = buf.color_at(0, 0);
        assert!((c.r - 0.5).abs() < 0.01, "r = {}", c.r);
        assert!((c.b - 0.25).abs() < 0.01, "b = {}", c.b);
    }

    #[test]
    fn premultiplied_transparent_is_black() {
        let buf = PixelBuffer::new(
            1,
            1,
            4,
            ChannelOrder::Rgba,
            AlphaMode::Premultiplied,
            vec![9, 9, 9, 0],
        )
        .unwrap();
        assert_eq!(buf.color_at(0, 0), Rgba::new(0.0, 0.0, 0.0, 0.0));
    }

    // --- Bounds ---

    #[test]
    fn out_of_range_reads_return_opaque_black() {
        let buf = two_by_two(ChannelOrder::Rgba, AlphaMode::Straight);
        assert_eq!(buf.color_at(2, 0), Rgba::OPAQUE_BLACK);
        assert_eq!(buf.color_at(0, 2), Rgba::OPAQUE_BLACK);
        assert_eq!(buf.color_at(u32::MAX, u32::MAX), Rgba::OPAQUE_BLACK);
    }

    // --- Regions ---

    #[test]
    fn colors_in_region_clips_and_steps() {
        let buf = PixelBuffer::from_rgba(4, 4, vec![255; 64]).unwrap();
        assert_eq!(buf.colors_in_region(Rect::new(0, 0, 4, 4), 2).count(), 4);
        assert_eq!(buf.colors_in_region(Rect::new(2, 2, 10, 10), 1).count(), 4);
        assert_eq!(buf.colors_in_region(Rect::new(9, 9, 1, 1), 1).count(), 0);
        assert_eq!(buf.colors_in_region(Rect::new(0, 0, 2, 1), 0).count(), 2);
    }

    #[test]
    fn average_color_of_region() {
        let buf = two_by_two(ChannelOrder::Rgba, AlphaMode::Straight);
        let avg = buf.average_color(Rect::new(0, 0, 2, 1));
        assert_eq!(avg.to_bytes(), [25, 35, 45, 255]);
    }

    #[test]
    fn average_color_of_empty_region_is_default() {
        let buf = two_by_two(ChannelOrder::Rgba, AlphaMode::Straight);
        assert_eq!(buf.average_color(Rect::new(5, 5, 1, 1)), Rgba::OPAQUE_BLACK);
    }

    // --- Validation and conversions ---

    #[test]
    fn valid_buffer_validates() {
        let buf = PixelBuffer::from_rgba(16, 9, vec![128; 16 * 9 * 4]).unwrap();
        assert!(buf.validate());
    }

    #[test]
    fn rgba_image_round_trip() {
        let img = RgbaImage::from_fn(3, 2, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            image::Rgba([(x * 50) as u8, (y * 90) as u8, 7, 255])
        });
        let buf = PixelBuffer::from_rgba_image(&img).unwrap();
        assert_eq!(buf.to_rgba_image(), img);
    }

    // --- Decoding ---

    fn encode_png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut out);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        out
    }

    #[test]
    fn decode_png() {
        let img = RgbaImage::from_pixel(5, 3, image::Rgba([200, 10, 40, 255]));
        let buf = PixelBuffer::decode(&encode_png(&img)).unwrap();
        assert_eq!(buf.dimensions(), Dimensions::new(5, 3));
        assert_eq!(buf.color_at(4, 2).to_bytes(), [200, 10, 40, 255]);
    }

    #[test]
    fn decode_empty_is_invalid() {
        assert!(matches!(
            PixelBuffer::decode(&[]),
            Err(PipelineError::InvalidImage(_))
        ));
    }

    #[test]
    fn decode_garbage_is_invalid() {
        assert!(matches!(
            PixelBuffer::decode(b"definitely not an image"),
            Err(PipelineError::InvalidImage(_))
        ));
    }

    #[test]
    fn buffer_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PixelBuffer>();
    }
}
