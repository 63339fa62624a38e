//! Cached glyph records

use crate::render::backend::TextureHandle;
use crate::render::vertex::GlyphVertex;

/// Texel rectangle a glyph occupies in its atlas surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasRegion {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
    /// Width of the surface when the glyph was packed
    pub surface_width: u32,
    /// Height of the surface when the glyph was packed
    pub surface_height: u32,
}

/// How to draw one codepoint
///
/// Vertices are relative to the pen position on the baseline-adjusted line
/// top; colours are placeholders overwritten during shaping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    /// Atlas surface, `None` for glyphs with nothing to draw
    pub texture: Option<TextureHandle>,
    /// Quad corners
    pub vertices: [GlyphVertex; 4],
    /// Advance in logical pixels
    pub spacing: f32,
    /// Packed location, when the glyph has a texture
    pub region: Option<AtlasRegion>,
}

impl Glyph {
    /// A glyph that only advances the pen
    pub fn blank(spacing: f32) -> Self {
        Self {
            texture: None,
            vertices: [GlyphVertex::default(); 4],
            spacing,
            region: None,
        }
    }

    /// Whether the glyph has a visible quad
    pub const fn is_visible(&self) -> bool {
        self.texture.is_some()
    }
}
