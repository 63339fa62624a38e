//! Vertex layout for glyph quads

use super::color::Color;

/// A glyph quad corner: XY floats, normalised 16-bit texture coordinates, RGBA8 colour
///
/// Quads are stored as four vertices in the order
///
/// ```text
/// 0---2
/// | / |
/// 1---3
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GlyphVertex {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Normalised horizontal texture coordinate
    pub s: u16,
    /// Normalised vertical texture coordinate
    pub t: u16,
    /// Vertex colour
    pub color: Color,
}

/// Map [0, 1] onto the full `u16` range
pub fn norm_to_u16(n: f64) -> u16 {
    (n.clamp(0.0, 1.0) * f64::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<GlyphVertex>(), 16);
        let pair = [GlyphVertex::default(); 2];
        let bytes: &[u8] = bytemuck::cast_slice(&pair);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn test_norm_to_u16_bounds() {
        assert_eq!(norm_to_u16(0.0), 0);
        assert_eq!(norm_to_u16(1.0), u16::MAX);
        assert_eq!(norm_to_u16(0.5), 32767);
    }
}
