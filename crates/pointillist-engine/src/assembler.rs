//! Turning image-space samples into screen-space particles.
//!
//! The [`Assembler`] trait is the seam between sampling and rendering.
//! [`AspectFitAssembler`] is the stock implementation: it projects each
//! sample's pixel centre through the configured [`DisplayMode`], seeds a
//! small deterministic drift velocity, and sizes the particle by the
//! sample's luma.

use pointillist_pipeline::{Dimensions, DisplayMode, ParticleGenerationConfig, Sample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::AssemblyError;
use crate::particle::{Particle, ScreenSize};

/// Assembles particles from samples.
///
/// Implementations run on a blocking worker thread and must be safe to
/// share across generations.
pub trait Assembler: Send + Sync {
    /// Build one particle per retained sample.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] if the samples cannot be laid out on
    /// `screen`. The message is surfaced to the caller verbatim.
    fn assemble(
        &self,
        samples: &[Sample],
        source: Dimensions,
        screen: ScreenSize,
        config: &ParticleGenerationConfig,
    ) -> Result<Vec<Particle>, AssemblyError>;
}

/// Affine mapping from source pixels to screen units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Horizontal scale, screen units per pixel.
    pub scale_x: f32,
    /// Vertical scale, screen units per pixel.
    pub scale_y: f32,
    /// Screen x of the image's left edge.
    pub offset_x: f32,
    /// Screen y of the image's top edge.
    pub offset_y: f32,
}

impl Projection {
    /// Projection placing `source` on `screen` under `mode`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(source: Dimensions, screen: ScreenSize, mode: DisplayMode) -> Self {
        let sx = screen.width / source.width as f32;
        let sy = screen.height / source.height as f32;
        let (scale_x, scale_y) = match mode {
            DisplayMode::Fit => (sx.min(sy), sx.min(sy)),
            DisplayMode::Fill => (sx.max(sy), sx.max(sy)),
            DisplayMode::Stretch => (sx, sy),
        };
        Self {
            scale_x,
            scale_y,
            offset_x: (source.width as f32).mul_add(-scale_x, screen.width) / 2.0,
            offset_y: (source.height as f32).mul_add(-scale_y, screen.height) / 2.0,
        }
    }

    /// Screen position of the centre of pixel `(x, y)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn project(&self, x: u32, y: u32) -> (f32, f32) {
        (
            (x as f32 + 0.5).mul_add(self.scale_x, self.offset_x),
            (y as f32 + 0.5).mul_add(self.scale_y, self.offset_y),
        )
    }
}

/// Stock assembler honoring [`DisplayMode`].
///
/// In [`DisplayMode::Fill`] the image overflows the screen on one axis;
/// samples whose projected centre falls outside the screen are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct AspectFitAssembler;

impl AspectFitAssembler {
    /// Peak drift speed at `particle_speed == 1.0`, screen units per second.
    pub const BASE_DRIFT: f32 = 0.5;
}

impl Assembler for AspectFitAssembler {
    fn assemble(
        &self,
        samples: &[Sample],
        source: Dimensions,
        screen: ScreenSize,
        config: &ParticleGenerationConfig,
    ) -> Result<Vec<Particle>, AssemblyError> {
        if !screen.is_valid() {
            return Err(AssemblyError(format!(
                "screen size must be positive, got {}x{}",
                screen.width, screen.height
            )));
        }
        if source.is_empty() {
            return Err(AssemblyError("source image has no pixels".to_string()));
        }

        let projection = Projection::new(source, screen, config.display_mode);
        let drift = Self::BASE_DRIFT * config.particle_speed;
        let size_span = config.max_particle_size - config.min_particle_size;
        let mut rng = StdRng::seed_from_u64(samples.len() as u64);

        let mut particles = Vec::with_capacity(samples.len());
        for sample in samples {
            if sample.x >= source.width || sample.y >= source.height {
                return Err(AssemblyError(format!(
                    "sample ({}, {}) lies outside the {}x{} source",
                    sample.x, sample.y, source.width, source.height
                )));
            }
            let (px, py) = projection.project(sample.x, sample.y);
            // Draw the velocity before the bounds check so a particle's
            // drift does not depend on which neighbours were cropped.
            let vx = rng.gen_range(-1.0f32..=1.0) * drift;
            let vy = rng.gen_range(-1.0f32..=1.0) * drift;
            if !(0.0..screen.width).contains(&px) || !(0.0..screen.height).contains(&py) {
                continue;
            }

            let color = sample.color.to_array();
            let size = sample.color.luma().mul_add(size_span, config.min_particle_size);
            let position = [px, py, 0.0];
            particles.push(Particle {
                position,
                velocity: [vx, vy, 0.0],
                target_position: position,
                color,
                original_color: color,
                size,
                base_size: size,
                life: 1.0,
                idle_chaotic_motion: false,
            });
        }

        let dropped = samples.len() - particles.len();
        if dropped > 0 {
            log::debug!(
                "assembler: dropped {dropped} of {} samples outside the {}x{} screen",
                samples.len(),
                screen.width,
                screen.height
            );
        }
        Ok(particles)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use pointillist_pipeline::Rgba;

    use super::*;

    fn config(mode: DisplayMode) -> ParticleGenerationConfig {
        ParticleGenerationConfig {
            display_mode: mode,
            ..ParticleGenerationConfig::default()
        }
    }

    fn corners(w: u32, h: u32) -> Vec<Sample> {
        let c = Rgba::new(0.5, 0.5, 0.5, 1.0);
        vec![
            Sample::new(0, 0, c),
            Sample::new(w - 1, 0, c),
            Sample::new(0, h - 1, c),
            Sample::new(w - 1, h - 1, c),
        ]
    }

    // --- Projection ---

    #[test]
    fn fit_letterboxes_wide_screen() {
        let p = Projection::new(
            Dimensions::new(100, 100),
            ScreenSize::new(400.0, 200.0),
            DisplayMode::Fit,
        );
        assert_eq!(p.scale_x, 2.0);
        assert_eq!(p.scale_y, 2.0);
        assert_eq!(p.offset_x, 100.0);
        assert_eq!(p.offset_y, 0.0);
    }

    #[test]
    fn fill_crops_wide_screen() {
        let p = Projection::new(
            Dimensions::new(100, 100),
            ScreenSize::new(400.0, 200.0),
            DisplayMode::Fill,
        );
        assert_eq!(p.scale_x, 4.0);
        assert_eq!(p.offset_x, 0.0);
        assert_eq!(p.offset_y, -100.0);
    }

    #[test]
    fn stretch_scales_axes_independently() {
        let p = Projection::new(
            Dimensions::new(100, 50),
            ScreenSize::new(300.0, 300.0),
            DisplayMode::Stretch,
        );
        assert_eq!((p.scale_x, p.scale_y), (3.0, 6.0));
        assert_eq!((p.offset_x, p.offset_y), (0.0, 0.0));
        assert_eq!(p.project(0, 0), (1.5, 3.0));
    }

    // --- Assembly ---

    #[test]
    fn fit_keeps_every_sample_on_screen() {
        let samples = corners(64, 32);
        let screen = ScreenSize::new(320.0, 240.0);
        let particles = AspectFitAssembler
            .assemble(&samples, Dimensions::new(64, 32), screen, &config(DisplayMode::Fit))
            .unwrap();
        assert_eq!(particles.len(), 4);
        for p in &particles {
            assert!((0.0..320.0).contains(&p.position[0]));
            assert!((0.0..240.0).contains(&p.position[1]));
            assert_eq!(p.position, p.target_position);
            assert_eq!(p.position[2], 0.0);
        }
    }

    #[test]
    fn fill_drops_cropped_samples() {
        // 100x100 on 400x200: the top and bottom quarters are cropped.
        let samples = corners(100, 100);
        let particles = AspectFitAssembler
            .assemble(
                &samples,
                Dimensions::new(100, 100),
                ScreenSize::new(400.0, 200.0),
                &config(DisplayMode::Fill),
            )
            .unwrap();
        assert!(particles.is_empty());

        let centre = [Sample::new(50, 50, Rgba::OPAQUE_BLACK)];
        let particles = AspectFitAssembler
            .assemble(
                &centre,
                Dimensions::new(100, 100),
                ScreenSize::new(400.0, 200.0),
                &config(DisplayMode::Fill),
            )
            .unwrap();
        assert_eq!(particles.len(), 1);
    }

    #[test]
    fn size_follows_luma() {
        let samples = [
            Sample::new(0, 0, Rgba::new(0.0, 0.0, 0.0, 1.0)),
            Sample::new(1, 0, Rgba::new(1.0, 1.0, 1.0, 1.0)),
        ];
        let cfg = config(DisplayMode::Fit);
        let particles = AspectFitAssembler
            .assemble(&samples, Dimensions::new(2, 1), ScreenSize::new(2.0, 1.0), &cfg)
            .unwrap();
        assert!((particles[0].size - cfg.min_particle_size).abs() < 1e-5);
        assert!((particles[1].size - cfg.max_particle_size).abs() < 1e-5);
        assert_eq!(particles[1].base_size, particles[1].size);
        assert_eq!(particles[1].original_color, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn velocity_is_deterministic_and_scaled() {
        let samples = corners(10, 10);
        let screen = ScreenSize::new(10.0, 10.0);
        let mut cfg = config(DisplayMode::Fit);
        let a = AspectFitAssembler
            .assemble(&samples, Dimensions::new(10, 10), screen, &cfg)
            .unwrap();
        let b = AspectFitAssembler
            .assemble(&samples, Dimensions::new(10, 10), screen, &cfg)
            .unwrap();
        assert_eq!(a, b);
        for p in &a {
            assert!(p.velocity[0].abs() <= AspectFitAssembler::BASE_DRIFT);
        }

        cfg.particle_speed = 0.0;
        let still = AspectFitAssembler
            .assemble(&samples, Dimensions::new(10, 10), screen, &cfg)
            .unwrap();
        assert!(still.iter().all(|p| p.velocity == [0.0, 0.0, 0.0]));
    }

    #[test]
    fn invalid_screen_is_an_error() {
        let err = AspectFitAssembler
            .assemble(
                &corners(4, 4),
                Dimensions::new(4, 4),
                ScreenSize::new(0.0, 100.0),
                &config(DisplayMode::Fit),
            )
            .unwrap_err();
        assert!(err.0.contains("screen size"));
    }

    #[test]
    fn out_of_bounds_sample_is_an_error() {
        let samples = [Sample::new(9, 0, Rgba::OPAQUE_BLACK)];
        let result = AspectFitAssembler.assemble(
            &samples,
            Dimensions::new(4, 4),
            ScreenSize::new(4.0, 4.0),
            &config(DisplayMode::Fit),
        );
        assert!(result.is_err());
    }
}
