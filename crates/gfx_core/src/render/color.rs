//! Colour types and gamma conversion

use serde::{Deserialize, Serialize};

/// Floating-point RGBA colour, nominally in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Colorf {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
    /// Alpha
    pub a: f32,
}

impl Colorf {
    /// Opaque white
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    /// Opaque black
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Fully transparent black
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a colour from components
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Clamp every channel to [0, 1]
    pub fn clamped(self) -> Self {
        Self::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
    }

    /// Convert the RGB channels from sRGB to linear space; alpha is untouched
    pub fn gamma_to_linear(self) -> Self {
        Self::new(
            srgb_to_linear(self.r),
            srgb_to_linear(self.g),
            srgb_to_linear(self.b),
            self.a,
        )
    }

    /// Convert the RGB channels from linear to sRGB space; alpha is untouched
    pub fn linear_to_gamma(self) -> Self {
        Self::new(
            linear_to_srgb(self.r),
            linear_to_srgb(self.g),
            linear_to_srgb(self.b),
            self.a,
        )
    }

    /// Quantise to 8 bits per channel
    pub fn to_color(self) -> Color {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        Color::new(q(self.r), q(self.g), q(self.b), q(self.a))
    }
}

impl Default for Colorf {
    fn default() -> Self {
        Self::WHITE
    }
}

impl std::ops::Mul for Colorf {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(self.r * rhs.r, self.g * rhs.g, self.b * rhs.b, self.a * rhs.a)
    }
}

/// 8-bit RGBA colour as stored in vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Color {
    /// Opaque white
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    /// Create a colour from components
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// sRGB transfer function, decoding
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB transfer function, encoding
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Gamma-correct a colour when the subsystem renders in linear space
pub fn gamma_correct(color: Colorf, gamma_correct: bool) -> Colorf {
    if gamma_correct {
        color.gamma_to_linear()
    } else {
        color
    }
}

/// Inverse of [`gamma_correct`]
pub fn un_gamma_correct(color: Colorf, gamma_correct: bool) -> Colorf {
    if gamma_correct {
        color.linear_to_gamma()
    } else {
        color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_srgb_round_trip() {
        for v in [0.0, 0.02, 0.2, 0.5, 0.9, 1.0] {
            assert_relative_eq!(linear_to_srgb(srgb_to_linear(v)), v, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_quantise() {
        assert_eq!(Colorf::WHITE.to_color(), Color::WHITE);
        assert_eq!(Colorf::new(0.5, 2.0, -1.0, 1.0).to_color(), Color::new(128, 255, 0, 255));
    }

    #[test]
    fn test_gamma_correct_disabled_is_identity() {
        let c = Colorf::new(0.3, 0.4, 0.5, 0.6);
        assert_eq!(gamma_correct(c, false), c);
        assert_relative_eq!(gamma_correct(c, true).a, 0.6);
    }
}
