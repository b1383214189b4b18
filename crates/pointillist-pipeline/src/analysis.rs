//! Parallel single-pass image analysis.
//!
//! [`ImageAnalyzer::analyze`] scans every row of a (possibly
//! downsampled) [`PixelBuffer`] on the rayon thread pool. Each row fills
//! a private `RowAccumulator`; the accumulators are then reduced on the
//! calling thread, so the scan takes no locks at all. The reduced totals
//! are turned into an immutable [`ImageAnalysis`].
//!
//! Rows are the unit of cancellation: a row that starts after
//! cancellation is observed is skipped, and the whole pass is discarded.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::downsample::{DownsampleFilter, downsample};
use crate::types::{ImageAnalysis, PipelineError, Rgba};

/// Number of dominant colors reported.
pub const DOMINANT_COLOR_COUNT: usize = 5;

/// Quantization levels per channel for the color histogram.
const HISTOGRAM_LEVELS: f32 = 8.0;

/// Analyzer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAnalyzer {
    /// Longest axis (pixels) scanned; larger buffers are downsampled.
    pub max_dimension: u32,
    /// Filter used when downsampling.
    pub filter: DownsampleFilter,
    /// Pixels with alpha at or below this are ignored.
    pub alpha_threshold: f32,
    /// Minimum brightness step between horizontal neighbours that counts
    /// as an edge.
    pub edge_threshold: f32,
}

impl ImageAnalyzer {
    /// Default analysis resolution cap.
    pub const DEFAULT_MAX_DIMENSION: u32 = 2048;
    /// Default transparency cutoff.
    pub const DEFAULT_ALPHA_THRESHOLD: f32 = 0.1;
    /// Default edge brightness step.
    pub const DEFAULT_EDGE_THRESHOLD: f32 = 0.1;

    /// Analyze `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AnalysisFailed`] if no pixel has alpha
    /// above the transparency threshold.
    pub fn analyze(&self, buffer: &PixelBuffer) -> Result<ImageAnalysis, PipelineError> {
        self.analyze_with_cancel(buffer, &|| false)
    }

    /// Analyze `buffer`, polling `is_cancelled` before each row.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `is_cancelled` returned
    /// `true` for any row, and [`PipelineError::AnalysisFailed`] if no
    /// pixel is colored.
    pub fn analyze_with_cancel(
        &self,
        buffer: &PixelBuffer,
        is_cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<ImageAnalysis, PipelineError> {
        let working = downsample(buffer, self.max_dimension, self.filter)?;
        let working: &PixelBuffer = &working;

        // Rows are scanned in parallel but combined in row order, so float
        // sums come out bit-identical on every run.
        let rows: Vec<RowAccumulator> = (0..working.height())
            .into_par_iter()
            .map(|y| {
                if is_cancelled() {
                    RowAccumulator::cancelled()
                } else {
                    self.scan_row(working, y)
                }
            })
            .collect();
        let totals = rows
            .into_iter()
            .fold(RowAccumulator::empty(), RowAccumulator::merge);

        if totals.cancelled {
            log::debug!("analysis pass discarded after cancellation");
            return Err(PipelineError::Cancelled);
        }
        if totals.colored == 0 {
            return Err(PipelineError::AnalysisFailed(
                "image has no colored pixels".to_string(),
            ));
        }

        let analysis = totals.into_analysis(buffer, working);
        log::debug!(
            "analyzed {}x{} (working {}x{}): contrast={:.3} edges={:.3} complexity={}",
            analysis.width,
            analysis.height,
            analysis.analyzed_width,
            analysis.analyzed_height,
            analysis.contrast,
            analysis.edge_density,
            analysis.complexity,
        );
        Ok(analysis)
    }

    /// Accumulate one row.
    fn scan_row(&self, buffer: &PixelBuffer, y: u32) -> RowAccumulator {
        let mut acc = RowAccumulator::empty();
        let width = u64::from(buffer.width());
        let mut previous: Option<f32> = None;

        for x in 0..buffer.width() {
            let color = buffer.color_at(x, y);
            if color.a <= self.alpha_threshold {
                previous = None;
                continue;
            }

            let brightness = color.brightness();
            acc.colored += 1;
            acc.sum_rgb[0] += f64::from(color.r);
            acc.sum_rgb[1] += f64::from(color.g);
            acc.sum_rgb[2] += f64::from(color.b);
            acc.sum_saturation += f64::from(color.saturation());
            acc.min_brightness = acc.min_brightness.min(brightness);
            acc.max_brightness = acc.max_brightness.max(brightness);

            if let Some(prev) = previous
                && (brightness - prev).abs() > self.edge_threshold
            {
                acc.edges += 1;
            }
            previous = Some(brightness);

            let index = u64::from(y) * width + u64::from(x);
            acc.histogram
                .entry(quantize(color))
                .or_insert_with(|| Bucket::new(index))
                .add(color);
        }
        acc
    }
}

impl Default for ImageAnalyzer {
    fn default() -> Self {
        Self {
            max_dimension: Self::DEFAULT_MAX_DIMENSION,
            filter: DownsampleFilter::default(),
            alpha_threshold: Self::DEFAULT_ALPHA_THRESHOLD,
            edge_threshold: Self::DEFAULT_EDGE_THRESHOLD,
        }
    }
}

/// Histogram key: 3 bits per channel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(c: Rgba) -> u16 {
    let level = |v: f32| ((v.clamp(0.0, 1.0) * HISTOGRAM_LEVELS) as u16).min(7);
    (level(c.r) << 6) | (level(c.g) << 3) | level(c.b)
}

/// One histogram bucket: how many pixels fell in it, where the first one
/// was (row-major index), and the sum of their colors.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    first_seen: u64,
    sum: [f64; 3],
}

impl Bucket {
    const fn new(first_seen: u64) -> Self {
        Self {
            count: 0,
            first_seen,
            sum: [0.0; 3],
        }
    }

    fn add(&mut self, c: Rgba) {
        self.count += 1;
        self.sum[0] += f64::from(c.r);
        self.sum[1] += f64::from(c.g);
        self.sum[2] += f64::from(c.b);
    }

    fn absorb(&mut self, other: &Self) {
        self.count += other.count;
        self.first_seen = self.first_seen.min(other.first_seen);
        for (a, b) in self.sum.iter_mut().zip(other.sum) {
            *a += b;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self) -> [f64; 3] {
        let n = self.count.max(1) as f64;
        [self.sum[0] / n, self.sum[1] / n, self.sum[2] / n]
    }
}

/// Partial statistics for a contiguous set of rows.
#[derive(Debug, Clone)]
struct RowAccumulator {
    colored: u64,
    sum_rgb: [f64; 3],
    sum_saturation: f64,
    min_brightness: f32,
    max_brightness: f32,
    edges: u64,
    histogram: HashMap<u16, Bucket>,
    cancelled: bool,
}

impl RowAccumulator {
    fn empty() -> Self {
        Self {
            colored: 0,
            sum_rgb: [0.0; 3],
            sum_saturation: 0.0,
            min_brightness: f32::INFINITY,
            max_brightness: f32::NEG_INFINITY,
            edges: 0,
            histogram: HashMap::new(),
            cancelled: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::empty()
        }
    }

    fn merge(mut self, mut other: Self) -> Self {
        // Fold the smaller histogram into the larger one.
        if other.histogram.len() > self.histogram.len() {
            std::mem::swap(&mut self.histogram, &mut other.histogram);
        }
        for (key, bucket) in &other.histogram {
            self.histogram
                .entry(*key)
                .and_modify(|b| b.absorb(bucket))
                .or_insert(*bucket);
        }
        self.colored += other.colored;
        for (a, b) in self.sum_rgb.iter_mut().zip(other.sum_rgb) {
            *a += b;
        }
        self.sum_saturation += other.sum_saturation;
        self.min_brightness = self.min_brightness.min(other.min_brightness);
        self.max_brightness = self.max_brightness.max(other.max_brightness);
        self.edges += other.edges;
        self.cancelled |= other.cancelled;
        self
    }

    /// Derive the final descriptor. Requires `colored > 0`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn into_analysis(self, source: &PixelBuffer, working: &PixelBuffer) -> ImageAnalysis {
        let total = working.pixel_count().max(1) as f64;
        let colored = self.colored as f64;

        let average = [
            self.sum_rgb[0] / colored,
            self.sum_rgb[1] / colored,
            self.sum_rgb[2] / colored,
        ];
        let brightness = (average[0] + average[1] + average[2]) / 3.0;
        let saturation = self.sum_saturation / colored;

        let range = f64::from(self.max_brightness - self.min_brightness);
        let contrast = if range <= 0.0 || self.max_brightness <= 0.0 {
            0.5
        } else {
            range / f64::from(self.max_brightness)
        };

        let edge_density = self.edges as f64 / total;
        let complexity = (edge_density * 20.0).round().clamp(0.0, 10.0) as u8;

        let mut buckets: Vec<Bucket> = self.histogram.into_values().collect();
        buckets.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });

        let (weighted, weight) = buckets.iter().fold((0.0f64, 0.0f64), |(sum, n), b| {
            let m = b.mean();
            let d2 = (m[0] - average[0]).powi(2)
                + (m[1] - average[1]).powi(2)
                + (m[2] - average[2]).powi(2);
            let count = b.count as f64;
            (count.mul_add(d2, sum), n + count)
        });
        let color_variance = if weight > 0.0 {
            (weighted / weight).sqrt()
        } else {
            0.0
        };

        let dominant_colors = buckets
            .iter()
            .take(DOMINANT_COLOR_COUNT)
            .map(|b| {
                let m = b.mean();
                [unit(m[0]), unit(m[1]), unit(m[2])]
            })
            .collect();

        ImageAnalysis {
            width: source.width(),
            height: source.height(),
            analyzed_width: working.width(),
            analyzed_height: working.height(),
            average_color: [unit(average[0]), unit(average[1]), unit(average[2])],
            contrast: unit(contrast),
            brightness: unit(brightness),
            pixel_density: unit(colored / total),
            edge_density: unit(edge_density),
            saturation: unit(saturation),
            complexity,
            dominant_colors,
            color_variance: color_variance.max(0.0) as f32,
            colored_pixel_count: self.colored,
        }
    }
}

/// Clamp into `[0, 1]`, mapping NaN to zero.
#[allow(clippy::cast_possible_truncation)]
fn unit(v: f64) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) as f32 }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn buffer_from_fn(w: u32, h: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> PixelBuffer {
        let mut bytes = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                bytes.extend_from_slice(&f(x, y));
            }
        }
        PixelBuffer::from_rgba(w, h, bytes).unwrap()
    }

    fn checkerboard(n: u32) -> PixelBuffer {
        buffer_from_fn(n, n, |x, y| {
            if (x + y) % 2 == 0 {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            }
        })
    }

    fn assert_in_unit_range(a: &ImageAnalysis) {
        for (name, v) in [
            ("contrast", a.contrast),
            ("brightness", a.brightness),
            ("pixel_density", a.pixel_density),
            ("edge_density", a.edge_density),
            ("saturation", a.saturation),
        ] {
            assert!((0.0..=1.0).contains(&v), "{name} = {v} out of range");
        }
        for c in a.average_color {
            assert!((0.0..=1.0).contains(&c));
        }
        assert!(a.complexity <= 10);
        assert!(a.color_variance >= 0.0);
        assert!(a.dominant_colors.len() <= DOMINANT_COLOR_COUNT);
    }

    #[test]
    fn checkerboard_statistics() {
        let analysis = ImageAnalyzer::default().analyze(&checkerboard(4)).unwrap();
        assert!((analysis.pixel_density - 1.0).abs() < 1e-6);
        for c in analysis.average_color {
            assert!((c - 0.5).abs() < 1e-3, "average channel {c}");
        }
        assert!(analysis.dominant_colors.contains(&[0.0, 0.0, 0.0]));
        assert!(analysis.dominant_colors.contains(&[1.0, 1.0, 1.0]));
        assert!((analysis.contrast - 1.0).abs() < 1e-6);
        // 3 edges per row, 4 rows, 16 pixels.
        assert!((analysis.edge_density - 0.75).abs() < 1e-6);
        assert_eq!(analysis.complexity, 10);
        assert!((analysis.color_variance - 0.75f32.sqrt()).abs() < 1e-3);
    }

    #[test]
    fn solid_image_uses_default_contrast() {
        let buf = buffer_from_fn(8, 8, |_, _| [200, 40, 40, 255]);
        let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
        assert!((analysis.contrast - 0.5).abs() < f32::EPSILON);
        assert!(analysis.edge_density.abs() < f32::EPSILON);
        assert_eq!(analysis.complexity, 0);
        assert_eq!(analysis.dominant_colors.len(), 1);
        assert!(analysis.color_variance.abs() < 1e-6);
        assert!((analysis.saturation - 0.8).abs() < 1e-3);
    }

    #[test]
    fn black_image_uses_default_contrast() {
        let buf = buffer_from_fn(4, 4, |_, _| [0, 0, 0, 255]);
        let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
        assert!((analysis.contrast - 0.5).abs() < f32::EPSILON);
        assert!(analysis.brightness.abs() < f32::EPSILON);
    }

    #[test]
    fn transparent_image_fails() {
        let buf = buffer_from_fn(4, 4, |_, _| [255, 255, 255, 20]);
        let result = ImageAnalyzer::default().analyze(&buf);
        assert!(matches!(result, Err(PipelineError::AnalysisFailed(_))));
    }

    #[test]
    fn transparent_pixels_are_skipped() {
        // Left half opaque red, right half transparent.
        let buf = buffer_from_fn(10, 4, |x, _| {
            if x < 5 { [255, 0, 0, 255] } else { [0, 0, 255, 0] }
        });
        let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
        assert!((analysis.pixel_density - 0.5).abs() < 1e-6);
        assert_eq!(analysis.colored_pixel_count, 20);
        assert!((analysis.average_color[0] - 1.0).abs() < 1e-6);
        assert!(analysis.average_color[2].abs() < 1e-6);
        // The transparent gap breaks neighbour pairs, so no edges.
        assert_eq!(analysis.complexity, 0);
    }

    #[test]
    fn dominant_ties_follow_first_encounter() {
        // Two colors with equal counts; blue appears first in row-major order.
        let buf = buffer_from_fn(2, 2, |x, _| {
            if x == 0 { [0, 0, 255, 255] } else { [0, 255, 0, 255] }
        });
        let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
        assert_eq!(analysis.dominant_colors[0], [0.0, 0.0, 1.0]);
        assert_eq!(analysis.dominant_colors[1], [0.0, 1.0, 0.0]);
    }

    #[test]
    fn dominant_colors_order_by_frequency() {
        let buf = buffer_from_fn(10, 1, |x, _| if x < 3 { [255, 0, 0, 255] } else { [0, 0, 0, 255] });
        let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
        assert_eq!(analysis.dominant_colors[0], [0.0, 0.0, 0.0]);
        assert_eq!(analysis.dominant_colors[1], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn noisy_images_stay_in_bounds() {
        for seed in 0..6u32 {
            let buf = buffer_from_fn(37, 23, |x, y| {
                let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503)) ^ seed;
                let b = v.to_le_bytes();
                [b[0], b[1], b[2], b[3].max(30)]
            });
            let analysis = ImageAnalyzer::default().analyze(&buf).unwrap();
            assert_in_unit_range(&analysis);
        }
    }

    #[test]
    fn analysis_is_deterministic() {
        let buf = buffer_from_fn(64, 48, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            [(x * 4) as u8, (y * 5) as u8, ((x ^ y) * 3) as u8, 255]
        });
        let analyzer = ImageAnalyzer::default();
        assert_eq!(analyzer.analyze(&buf).unwrap(), analyzer.analyze(&buf).unwrap());
    }

    #[test]
    fn large_buffers_are_downsampled() {
        let buf = buffer_from_fn(300, 30, |_, _| [90, 90, 90, 255]);
        let analyzer = ImageAnalyzer {
            max_dimension: 100,
            ..ImageAnalyzer::default()
        };
        let analysis = analyzer.analyze(&buf).unwrap();
        assert_eq!((analysis.width, analysis.height), (300, 30));
        assert_eq!((analysis.analyzed_width, analysis.analyzed_height), (100, 10));
        assert!((analysis.pixel_density - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cancellation_discards_the_pass() {
        let buf = checkerboard(32);
        let calls = AtomicUsize::new(0);
        let is_cancelled = || calls.fetch_add(1, Ordering::Relaxed) >= 3;
        let result = ImageAnalyzer::default().analyze_with_cancel(&buf, &is_cancelled);
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn quantize_separates_extremes() {
        assert_eq!(quantize(Rgba::new(0.0, 0.0, 0.0, 1.0)), 0);
        assert_eq!(quantize(Rgba::new(1.0, 1.0, 1.0, 1.0)), 0o777);
    }
}
