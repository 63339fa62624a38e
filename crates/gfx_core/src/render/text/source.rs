//! Glyph sources
//!
//! A [`GlyphSource`] turns codepoints into bitmaps and metrics. The font
//! never rasterises anything itself; it asks its primary source and then its
//! fallbacks.

use std::collections::HashMap;
use std::path::Path;

use fontdue::{Font as OutlineFont, FontSettings};
use image::RgbaImage;

use super::{FontError, FontResult};
use crate::render::backend::PixelFormat;

/// What kind of data a source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Scalable outlines rasterised on demand
    TrueType,
    /// Pre-drawn bitmap glyphs
    Bitmap,
}

/// Placement metrics of one glyph, in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphMetrics {
    /// Bitmap width
    pub width: u32,
    /// Bitmap height
    pub height: u32,
    /// Horizontal advance
    pub advance: f32,
    /// Offset from the pen position to the bitmap's left edge
    pub bearing_x: f32,
    /// Offset from the baseline up to the bitmap's top edge
    pub bearing_y: f32,
}

/// A rasterised glyph
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphData {
    /// Placement metrics
    pub metrics: GlyphMetrics,
    /// Pixel layout of `pixels`
    pub format: PixelFormat,
    /// Tightly packed rows, top row first
    pub pixels: Vec<u8>,
}

impl GlyphData {
    /// A glyph with metrics but no pixels
    pub fn empty(metrics: GlyphMetrics, format: PixelFormat) -> Self {
        Self {
            metrics: GlyphMetrics { width: 0, height: 0, ..metrics },
            format,
            pixels: Vec::new(),
        }
    }
}

/// Produces glyph bitmaps and metrics
pub trait GlyphSource {
    /// Outline or bitmap data
    fn kind(&self) -> SourceKind;

    /// Line height in source pixels
    fn height(&self) -> f32;

    /// Distance from the baseline to the top of the tallest glyphs
    fn ascent(&self) -> f32;

    /// Distance from the baseline to the bottom of the lowest glyphs (usually negative)
    fn descent(&self) -> f32;

    /// Source pixels per logical pixel
    fn pixel_density(&self) -> f32 {
        1.0
    }

    /// Whether the source can draw `codepoint`
    fn has_glyph(&self, codepoint: u32) -> bool;

    /// Rasterise `codepoint`; missing glyphs produce an empty bitmap
    fn glyph_data(&self, codepoint: u32) -> FontResult<GlyphData>;

    /// Extra advance between a pair of glyphs
    fn kerning(&self, left: u32, right: u32) -> f32;
}

#[derive(Debug, Clone, Copy)]
struct StripGlyph {
    x: u32,
    width: u32,
}

/// Bitmap font cut from a horizontal strip image
///
/// Glyphs are separated by columns of a spacer colour, which is whatever
/// colour the top-left pixel has. Glyphs appear in the strip in the order of
/// the `glyphs` string.
#[derive(Debug)]
pub struct ImageGlyphSource {
    image: RgbaImage,
    spacer: image::Rgba<u8>,
    glyphs: HashMap<u32, StripGlyph>,
    extra_spacing: i32,
    pixel_density: f32,
}

impl ImageGlyphSource {
    /// Cut glyphs out of `image`
    pub fn new(image: RgbaImage, glyphs: &str, extra_spacing: i32) -> FontResult<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(FontError::Load("glyph strip image is empty".into()));
        }

        let spacer = *image.get_pixel(0, 0);
        let mut map = HashMap::new();
        let mut start = 0;

        for ch in glyphs.chars() {
            while start < width && *image.get_pixel(start, 0) == spacer {
                start += 1;
            }

            let mut end = start;
            while end < width && *image.get_pixel(end, 0) != spacer {
                end += 1;
            }

            if start >= end {
                break;
            }

            map.insert(u32::from(ch), StripGlyph { x: start, width: end - start });
            start = end;
        }

        if map.len() < glyphs.chars().count() {
            log::warn!(
                "Glyph strip only contains {} of {} glyphs",
                map.len(),
                glyphs.chars().count()
            );
        }

        Ok(Self {
            image,
            spacer,
            glyphs: map,
            extra_spacing,
            pixel_density: 1.0,
        })
    }

    /// Load the strip image from disk
    pub fn from_file<P: AsRef<Path>>(path: P, glyphs: &str, extra_spacing: i32) -> FontResult<Self> {
        let image = image::open(path.as_ref())
            .map_err(|e| FontError::Load(format!("{}: {e}", path.as_ref().display())))?
            .to_rgba8();
        Self::new(image, glyphs, extra_spacing)
    }

    /// Report a pixel density other than 1
    #[must_use]
    pub const fn with_pixel_density(mut self, density: f32) -> Self {
        self.pixel_density = density;
        self
    }

    /// Number of glyphs found in the strip
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }
}

impl GlyphSource for ImageGlyphSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Bitmap
    }

    fn height(&self) -> f32 {
        self.image.height() as f32
    }

    fn ascent(&self) -> f32 {
        0.0
    }

    fn descent(&self) -> f32 {
        0.0
    }

    fn pixel_density(&self) -> f32 {
        self.pixel_density
    }

    fn has_glyph(&self, codepoint: u32) -> bool {
        self.glyphs.contains_key(&codepoint)
    }

    fn glyph_data(&self, codepoint: u32) -> FontResult<GlyphData> {
        let Some(glyph) = self.glyphs.get(&codepoint) else {
            return Ok(GlyphData::empty(GlyphMetrics::default(), PixelFormat::Rgba8));
        };

        let height = self.image.height();
        let mut pixels = Vec::with_capacity(glyph.width as usize * height as usize * 4);
        for y in 0..height {
            for x in glyph.x..glyph.x + glyph.width {
                let px = self.image.get_pixel(x, y);
                // Spacer-coloured texels inside a glyph are transparent
                if *px == self.spacer {
                    pixels.extend_from_slice(&[0, 0, 0, 0]);
                } else {
                    pixels.extend_from_slice(&px.0);
                }
            }
        }

        Ok(GlyphData {
            metrics: GlyphMetrics {
                width: glyph.width,
                height,
                advance: (glyph.width as i32 + self.extra_spacing) as f32,
                bearing_x: 0.0,
                bearing_y: 0.0,
            },
            format: PixelFormat::Rgba8,
            pixels,
        })
    }

    fn kerning(&self, _left: u32, _right: u32) -> f32 {
        0.0
    }
}

/// Outline font rasterised with `fontdue`
pub struct TrueTypeSource {
    font: OutlineFont,
    size: f32,
    pixel_density: f32,
    ascent: f32,
    descent: f32,
    height: f32,
}

impl std::fmt::Debug for TrueTypeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrueTypeSource")
            .field("size", &self.size)
            .field("pixel_density", &self.pixel_density)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl TrueTypeSource {
    /// Parse TTF/OTF data at `size` logical pixels
    pub fn from_bytes(data: &[u8], size: f32) -> FontResult<Self> {
        Self::with_pixel_density(data, size, 1.0)
    }

    /// Parse TTF/OTF data, rasterising at `size * density` pixels
    pub fn with_pixel_density(data: &[u8], size: f32, density: f32) -> FontResult<Self> {
        if size <= 0.0 || density <= 0.0 {
            return Err(FontError::Load(format!("invalid font size {size} at density {density}")));
        }

        let px = size * density;
        let settings = FontSettings { scale: px, ..FontSettings::default() };
        let font = OutlineFont::from_bytes(data, settings)
            .map_err(|e| FontError::Load(format!("fontdue error: {e}")))?;

        let (ascent, descent, height) = font.horizontal_line_metrics(px).map_or((px, 0.0, px), |m| {
            (m.ascent.floor(), m.descent.floor(), m.new_line_size.floor())
        });

        log::info!("Loaded TrueType font at {size}px (density {density})");

        Ok(Self { font, size, pixel_density: density, ascent, descent, height })
    }

    /// Load a font file from disk
    pub fn from_file<P: AsRef<Path>>(path: P, size: f32) -> FontResult<Self> {
        let data = std::fs::read(path.as_ref())
            .map_err(|e| FontError::Load(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_bytes(&data, size)
    }

    fn rasterized_size(&self) -> f32 {
        self.size * self.pixel_density
    }
}

impl GlyphSource for TrueTypeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::TrueType
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn ascent(&self) -> f32 {
        self.ascent
    }

    fn descent(&self) -> f32 {
        self.descent
    }

    fn pixel_density(&self) -> f32 {
        self.pixel_density
    }

    fn has_glyph(&self, codepoint: u32) -> bool {
        char::from_u32(codepoint).is_some_and(|c| self.font.lookup_glyph_index(c) != 0)
    }

    fn glyph_data(&self, codepoint: u32) -> FontResult<GlyphData> {
        // Invalid scalar values fall back to the font's missing-glyph box
        let ch = char::from_u32(codepoint).unwrap_or(char::REPLACEMENT_CHARACTER);
        let (metrics, coverage) = self.font.rasterize(ch, self.rasterized_size());

        // White luminance, coverage in alpha
        let pixels = coverage.iter().flat_map(|&a| [255, a]).collect();

        Ok(GlyphData {
            metrics: GlyphMetrics {
                width: metrics.width as u32,
                height: metrics.height as u32,
                advance: metrics.advance_width.round(),
                bearing_x: metrics.xmin as f32,
                bearing_y: (metrics.ymin + metrics.height as i32) as f32,
            },
            format: PixelFormat::La8,
            pixels,
        })
    }

    fn kerning(&self, left: u32, right: u32) -> f32 {
        match (char::from_u32(left), char::from_u32(right)) {
            (Some(l), Some(r)) => self
                .font
                .horizontal_kern(l, r, self.rasterized_size())
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Strip: spacer, "A" 2 wide, spacer, "B" 3 wide, spacer
    fn strip() -> RgbaImage {
        let spacer = Rgba([255, 0, 255, 255]);
        let ink = Rgba([10, 20, 30, 255]);
        let columns = [spacer, ink, ink, spacer, ink, ink, ink, spacer];
        RgbaImage::from_fn(columns.len() as u32, 4, |x, _| columns[x as usize])
    }

    #[test]
    fn test_strip_glyph_widths() {
        let source = ImageGlyphSource::new(strip(), "AB", 1).unwrap();
        assert_eq!(source.glyph_count(), 2);
        assert!(source.has_glyph('A' as u32));
        assert!(!source.has_glyph('C' as u32));

        let b = source.glyph_data('B' as u32).unwrap();
        assert_eq!(b.metrics.width, 3);

        let a = source.glyph_data('A' as u32).unwrap();
        assert_eq!((a.metrics.width, a.metrics.height), (2, 4));
        assert_eq!(a.metrics.advance, 3.0);
        assert_eq!(a.pixels.len(), 2 * 4 * 4);
        assert_eq!(a.format, PixelFormat::Rgba8);
    }

    #[test]
    fn test_spacer_texels_become_transparent() {
        let mut image = strip();
        // Make a texel of "A" spacer-coloured below the first row
        image.put_pixel(1, 3, Rgba([255, 0, 255, 255]));
        let source = ImageGlyphSource::new(image, "A", 0).unwrap();

        let a = source.glyph_data('A' as u32).unwrap();
        let last_row = &a.pixels[3 * 2 * 4..];
        assert_eq!(&last_row[..4], &[0, 0, 0, 0]);
        assert_eq!(&last_row[4..], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_missing_glyph_is_empty() {
        let source = ImageGlyphSource::new(strip(), "AB", 0).unwrap();
        let missing = source.glyph_data('Z' as u32).unwrap();
        assert_eq!(missing.metrics.width, 0);
        assert!(missing.pixels.is_empty());
        assert_eq!(source.kind(), SourceKind::Bitmap);
        assert_eq!(source.ascent(), 0.0);
    }

    #[test]
    fn test_invalid_truetype_data() {
        assert!(matches!(
            TrueTypeSource::from_bytes(&[0, 1, 2, 3], 12.0),
            Err(FontError::Load(_))
        ));
    }
}
