//! The renderer-facing particle and the screen it is laid out on.

use serde::{Deserialize, Serialize};

/// Target drawing surface, in screen units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    /// Width in screen units.
    pub width: f32,
    /// Height in screen units.
    pub height: f32,
}

impl ScreenSize {
    /// Create a new screen size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Whether both sides are finite and positive.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// One particle as consumed by a renderer.
///
/// Positions are in screen units with the origin at the top-left corner
/// and `z = 0` on the image plane. Colors are straight-alpha RGBA in
/// `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Current position.
    pub position: [f32; 3],
    /// Current velocity, screen units per second.
    pub velocity: [f32; 3],
    /// Rest position the particle settles toward.
    pub target_position: [f32; 3],
    /// Current color.
    pub color: [f32; 4],
    /// Color sampled from the image.
    pub original_color: [f32; 4],
    /// Current size.
    pub size: f32,
    /// Size at rest.
    pub base_size: f32,
    /// Remaining life, `1.0` when freshly assembled.
    pub life: f32,
    /// Whether the particle wanders while idle.
    pub idle_chaotic_motion: bool,
}
