//! Text rendering
//!
//! A [`Font`] owns a glyph atlas, a glyph cache and a kerning cache, and
//! turns coloured text into textured quads.
//!
//! # Architecture
//!
//! - [`GlyphSource`]: rasterises glyphs ([`TrueTypeSource`], [`ImageGlyphSource`])
//! - [`TextureAtlas`]: shelf-packed GPU surfaces that grow on demand
//! - [`Font`]: glyph lookup, kerning, metrics, wrapping and shaping
//!
//! Growing the atlas can move every packed glyph. The font exposes a
//! generation counter ([`Font::texture_cache_id`]) and the shaping loops
//! restart whenever it changes underneath them.

mod atlas;
mod codepoints;
mod glyph;
mod shaper;
mod source;
mod wrap;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::config::FontConfig;
use crate::render::backend::{BackendError, SharedBackend};
use crate::render::texture::{Filter, FilterMode};
use crate::render::vertex::{norm_to_u16, GlyphVertex};

pub use atlas::{next_texture_size, AtlasSurface, Placement, SurfaceChange, TextureAtlas};
pub use codepoints::{decode_utf8, ColoredCodepoints, ColoredString, IndexedColor};
pub use glyph::{AtlasRegion, Glyph};
pub use shaper::{AlignMode, DrawCommand, ShapedText, TextInfo};
pub use source::{GlyphData, GlyphMetrics, GlyphSource, ImageGlyphSource, SourceKind, TrueTypeSource};

/// Result type for font operations
pub type FontResult<T> = Result<T, FontError>;

/// Errors that can occur during font operations
#[derive(Debug, thiserror::Error)]
pub enum FontError {
    /// Text was not valid UTF-8
    #[error("UTF-8 decoding error: {0}")]
    Decode(String),

    /// A fallback source is of a different kind than the primary
    #[error("Font fallbacks must be of the same font type")]
    FallbackKindMismatch,

    /// A glyph is larger than the biggest atlas surface
    #[error("Glyph U+{codepoint:04X} ({width}x{height}) does not fit in a glyph atlas")]
    GlyphTooLarge {
        /// Codepoint
        codepoint: u32,
        /// Bitmap width
        width: u32,
        /// Bitmap height
        height: u32,
    },

    /// A glyph source misbehaved
    #[error("Glyph source error: {0}")]
    Source(String),

    /// Font data could not be loaded
    #[error("Failed to load font: {0}")]
    Load(String),

    /// The backend rejected an atlas operation
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Line height of a font relative to its glyph size, for fonts without ascent data
pub const LEGACY_LINE_HEIGHT_RATIO: f32 = 1.25;

const TAB: u32 = 9;
const SPACE: u32 = 32;

/// A font: glyph sources plus the atlas their glyphs are packed into
pub struct Font {
    sources: Vec<Rc<dyn GlyphSource>>,
    atlas: TextureAtlas,
    glyphs: HashMap<u32, Glyph>,
    kerning: HashMap<u64, f32>,
    backend: SharedBackend,
    config: FontConfig,
    gamma_correct: bool,
    height: f32,
    line_height: f32,
    pixel_density: f32,
    use_spaces_as_tab: bool,
}

impl fmt::Debug for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Font")
            .field("sources", &self.sources.len())
            .field("atlas", &self.atlas)
            .field("glyphs", &self.glyphs.len())
            .field("height", &self.height)
            .field("line_height", &self.line_height)
            .field("pixel_density", &self.pixel_density)
            .finish_non_exhaustive()
    }
}

impl Font {
    /// Create a font and its first atlas surface
    pub fn new(
        backend: SharedBackend,
        source: Rc<dyn GlyphSource>,
        config: &FontConfig,
        filter: Filter,
        gamma_correct: bool,
    ) -> FontResult<Self> {
        let height = source.height();
        let pixel_density = source.pixel_density();
        if pixel_density <= 0.0 {
            return Err(FontError::Source(format!("invalid pixel density {pixel_density}")));
        }

        // The space glyph decides the atlas texel format
        let format = source.glyph_data(SPACE)?.format;
        let use_spaces_as_tab = !source.has_glyph(TAB);

        let filter = Filter { mipmap: FilterMode::None, ..filter };
        let max_texture_size = backend.borrow().capabilities().max_texture_size;
        let mut atlas = TextureAtlas::new(format, filter, config, max_texture_size, height);
        atlas.create_surface(&mut *backend.borrow_mut())?;

        let (w, h) = atlas.size();
        log::info!("Created font: height {height}, density {pixel_density}, atlas {w}x{h}");

        Ok(Self {
            sources: vec![source],
            atlas,
            glyphs: HashMap::new(),
            kerning: HashMap::new(),
            backend,
            config: config.clone(),
            gamma_correct,
            height,
            line_height: config.default_line_height,
            pixel_density,
            use_spaces_as_tab,
        })
    }

    fn primary(&self) -> &dyn GlyphSource {
        &*self.sources[0]
    }

    fn scale(&self, value: f32) -> f32 {
        (value / self.pixel_density + 0.5).floor()
    }

    /// Rasterise a codepoint from the first source that has it
    fn rasterize(&self, codepoint: u32) -> FontResult<GlyphData> {
        if codepoint == TAB && self.use_spaces_as_tab {
            let space = self.primary().glyph_data(SPACE)?;
            let metrics = GlyphMetrics {
                advance: space.metrics.advance * self.config.spaces_per_tab as f32,
                ..space.metrics
            };
            return Ok(GlyphData::empty(metrics, space.format));
        }

        for source in &self.sources {
            if source.has_glyph(codepoint) {
                return source.glyph_data(codepoint);
            }
        }

        self.primary().glyph_data(codepoint)
    }

    /// Rasterise and pack one glyph; `Ok(false)` means the atlas needs a new surface
    fn place_glyph(&mut self, codepoint: u32) -> FontResult<bool> {
        let data = self.rasterize(codepoint)?;
        let (w, h) = (data.metrics.width, data.metrics.height);
        let spacing = self.scale(data.metrics.advance);

        if w == 0 || h == 0 {
            self.glyphs.insert(codepoint, Glyph::blank(spacing));
            return Ok(true);
        }

        let (x, y) = match self.atlas.place(w, h) {
            Placement::At { x, y } => (x, y),
            Placement::Full => return Ok(false),
            Placement::TooLarge => {
                return Err(FontError::GlyphTooLarge { codepoint, width: w, height: h });
            }
        };

        let texture = self.atlas.upload(&mut *self.backend.borrow_mut(), x, y, &data)?;
        let (tw, th) = self.atlas.size();
        let d = self.pixel_density;

        let (tx, ty) = (f64::from(x), f64::from(y));
        let (tw_f, th_f) = (f64::from(tw), f64::from(th));
        let (gw, gh) = (f64::from(w), f64::from(h));
        let corner = |px: f32, py: f32, u: f64, v: f64| GlyphVertex {
            x: px + data.metrics.bearing_x / d,
            y: py - data.metrics.bearing_y / d,
            s: norm_to_u16(u / tw_f),
            t: norm_to_u16(v / th_f),
            color: crate::render::color::Color::WHITE,
        };

        // 0---2
        // | / |
        // 1---3
        let (qw, qh) = (w as f32 / d, h as f32 / d);
        let vertices = [
            corner(0.0, 0.0, tx, ty),
            corner(0.0, qh, tx, ty + gh),
            corner(qw, 0.0, tx + gw, ty),
            corner(qw, qh, tx + gw, ty + gh),
        ];

        log::trace!("Packed glyph U+{codepoint:04X} ({w}x{h}) at {x},{y}");

        self.glyphs.insert(
            codepoint,
            Glyph {
                texture: Some(texture),
                vertices,
                spacing,
                region: Some(AtlasRegion {
                    x,
                    y,
                    width: w,
                    height: h,
                    surface_width: tw,
                    surface_height: th,
                }),
            },
        );
        Ok(true)
    }

    /// Pack `codepoint`, growing the atlas as often as needed
    fn add_glyph(&mut self, codepoint: u32) -> FontResult<()> {
        let mut pending = vec![codepoint];

        while let Some(cp) = pending.pop() {
            if self.glyphs.contains_key(&cp) {
                continue;
            }

            if self.place_glyph(cp)? {
                continue;
            }

            let change = self.atlas.create_surface(&mut *self.backend.borrow_mut())?;
            pending.push(cp);

            if change == SurfaceChange::Replaced {
                // Every packed glyph pointed into the old surface
                let mut repack: Vec<u32> = self.glyphs.drain().map(|(k, _)| k).collect();
                repack.sort_unstable_by(|a, b| b.cmp(a));
                pending.extend(repack);
            }
        }

        Ok(())
    }

    /// The glyph record for `codepoint`, packing it on first use
    pub fn find_glyph(&mut self, codepoint: u32) -> FontResult<Glyph> {
        if let Some(glyph) = self.glyphs.get(&codepoint) {
            return Ok(*glyph);
        }

        self.add_glyph(codepoint)?;
        self.glyphs
            .get(&codepoint)
            .copied()
            .ok_or_else(|| FontError::Source(format!("glyph U+{codepoint:04X} was not cached")))
    }

    /// Kerning between two glyphs in logical pixels
    pub fn kerning(&mut self, left: u32, right: u32) -> f32 {
        let key = (u64::from(left) << 32) | u64::from(right);
        if let Some(&k) = self.kerning.get(&key) {
            return k;
        }

        let raw = self
            .sources
            .iter()
            .find(|s| s.has_glyph(left) && s.has_glyph(right))
            .map_or_else(|| self.primary().kerning(left, right), |s| s.kerning(left, right));

        let k = self.scale(raw);
        self.kerning.insert(key, k);
        k
    }

    /// Replace the fallback sources
    ///
    /// Glyphs that were already packed are not re-rasterised.
    pub fn set_fallbacks(&mut self, fallbacks: &[Rc<dyn GlyphSource>]) -> FontResult<()> {
        let kind = self.primary().kind();
        if fallbacks.iter().any(|f| f.kind() != kind) {
            return Err(FontError::FallbackKindMismatch);
        }

        self.sources.truncate(1);
        self.sources.extend(fallbacks.iter().cloned());
        Ok(())
    }

    /// Whether any source has `codepoint`
    pub fn has_glyph(&self, codepoint: u32) -> bool {
        self.sources.iter().any(|s| s.has_glyph(codepoint))
    }

    /// Whether every character of `text` is available; false for empty text
    pub fn has_glyphs(&self, text: &str) -> bool {
        !text.is_empty() && text.chars().all(|c| self.has_glyph(u32::from(c)))
    }

    /// Line height in logical pixels
    pub fn height(&self) -> f32 {
        self.scale(self.height)
    }

    /// Ascent in logical pixels
    pub fn ascent(&self) -> f32 {
        self.scale(self.primary().ascent())
    }

    /// Descent in logical pixels
    pub fn descent(&self) -> f32 {
        self.scale(self.primary().descent())
    }

    /// Distance from the top of a line to its baseline
    pub fn baseline(&self) -> f32 {
        let ascent = self.ascent();
        if ascent != 0.0 {
            ascent
        } else if self.primary().kind() == SourceKind::TrueType {
            (self.height() / LEGACY_LINE_HEIGHT_RATIO + 0.5).floor()
        } else {
            0.0
        }
    }

    /// Line spacing multiplier
    pub const fn line_height(&self) -> f32 {
        self.line_height
    }

    /// Set the line spacing multiplier
    pub fn set_line_height(&mut self, height: f32) {
        self.line_height = height;
    }

    /// Source pixels per logical pixel
    pub const fn pixel_density(&self) -> f32 {
        self.pixel_density
    }

    /// Generation counter of the atlas
    pub const fn texture_cache_id(&self) -> u32 {
        self.atlas.generation()
    }

    /// Atlas surfaces
    pub const fn atlas(&self) -> &TextureAtlas {
        &self.atlas
    }

    /// Sampling filter of the atlas
    pub const fn filter(&self) -> &Filter {
        self.atlas.filter()
    }

    /// Change the sampling filter of every atlas surface
    pub fn set_filter(&mut self, filter: Filter) -> FontResult<()> {
        self.atlas.set_filter(&mut *self.backend.borrow_mut(), filter)
    }

    /// Number of cached glyph records
    pub fn cached_glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    /// Whether colours are blended in linear space
    pub const fn gamma_correct(&self) -> bool {
        self.gamma_correct
    }
}

impl Drop for Font {
    fn drop(&mut self) {
        match self.backend.try_borrow_mut() {
            Ok(mut backend) => self.atlas.release(&mut *backend),
            Err(_) => log::warn!("Backend busy while dropping font; atlas textures leaked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{font_with, shared_backend, FixedSource};
    use super::*;
    use crate::render::headless::HeadlessBackend;

    #[test]
    fn test_glyph_lookup_is_idempotent() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let first = font.find_glyph('A' as u32).unwrap();
        let second = font.find_glyph('A' as u32).unwrap();
        assert_eq!(first, second);
        assert_eq!(font.cached_glyph_count(), 1);
    }

    #[test]
    fn test_space_has_no_texture() {
        let (backend, mut font) = font_with(FixedSource::new(10.0));
        let uploads = backend.borrow().stats().uploads;
        let space = font.find_glyph(' ' as u32).unwrap();
        assert!(!space.is_visible());
        assert_eq!(space.spacing, 4.0);
        assert_eq!(backend.borrow().stats().uploads, uploads);
    }

    #[test]
    fn test_tab_uses_spaces() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let tab = font.find_glyph('\t' as u32).unwrap();
        assert_eq!(tab.spacing, 16.0);
        assert!(!tab.is_visible());
    }

    #[test]
    fn test_glyph_vertices_follow_bearing() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        let g = font.find_glyph('A' as u32).unwrap();
        // 6x8 bitmap, bearing (1, 7)
        assert_eq!(g.vertices[0].x, 1.0);
        assert_eq!(g.vertices[0].y, -7.0);
        assert_eq!(g.vertices[3].x, 7.0);
        assert_eq!(g.vertices[3].y, 1.0);
        assert_eq!(g.spacing, 7.0);

        let region = g.region.unwrap();
        assert_eq!((region.x, region.y), (2, 2));
    }

    #[test]
    fn test_kerning_is_cached_and_scaled() {
        let (_, mut font) = font_with(FixedSource::new(10.0));
        assert_eq!(font.kerning('A' as u32, 'V' as u32), -2.0);
        assert_eq!(font.kerning('A' as u32, 'V' as u32), -2.0);
        assert_eq!(font.kerning('V' as u32, 'A' as u32), 0.0);
    }

    #[test]
    fn test_metrics() {
        let (_, font) = font_with(FixedSource::new(10.0));
        assert_eq!(font.height(), 10.0);
        assert_eq!(font.ascent(), 8.0);
        assert_eq!(font.baseline(), 8.0);
        assert_eq!(font.texture_cache_id(), 1);

        let (_, no_ascent) = font_with(FixedSource::new(10.0).with_ascent(0.0));
        assert_eq!(no_ascent.baseline(), 8.0);

        let (_, bitmap) = font_with(FixedSource::new(10.0).with_ascent(0.0).bitmap());
        assert_eq!(bitmap.baseline(), 0.0);
    }

    #[test]
    fn test_pixel_density_scales_metrics() {
        let (_, mut font) = font_with(FixedSource::new(20.0).with_density(2.0));
        assert_eq!(font.height(), 10.0);
        let g = font.find_glyph('A' as u32).unwrap();
        assert_eq!(g.spacing, 4.0);
        assert_eq!(g.vertices[3].x - g.vertices[0].x, 3.0);
    }

    #[test]
    fn test_fallbacks() {
        let (_, mut font) = font_with(FixedSource::new(10.0).only("AB"));
        assert!(!font.has_glyph('Z' as u32));

        let fallback: Rc<dyn GlyphSource> = Rc::new(FixedSource::new(10.0).only("Z"));
        font.set_fallbacks(&[fallback]).unwrap();
        assert!(font.has_glyph('Z' as u32));
        assert!(font.has_glyphs("ABZ"));
        assert!(!font.has_glyphs(""));

        let bitmap: Rc<dyn GlyphSource> = Rc::new(FixedSource::new(10.0).bitmap());
        assert!(matches!(font.set_fallbacks(&[bitmap]), Err(FontError::FallbackKindMismatch)));
    }

    #[test]
    fn test_atlas_replacement_repacks_glyphs() {
        let (backend, mut font) = font_with(FixedSource::new(10.0).with_glyph_size(40, 40));
        let before = font.texture_cache_id();

        // 40x40 glyphs: three shelves of three fit in 128x128
        let text: Vec<u32> = ('A'..='Z').map(u32::from).collect();
        let mut spacings = Vec::new();
        for &cp in &text[..9] {
            spacings.push(font.find_glyph(cp).unwrap().spacing);
        }
        assert_eq!(font.texture_cache_id(), before);

        font.find_glyph(text[9]).unwrap();
        assert!(font.texture_cache_id() > before);
        let (tw, th) = font.atlas().size();
        assert_eq!((tw, th), (256, 128));
        assert_eq!(backend.borrow().texture_count(), 1);

        for (i, &cp) in text[..9].iter().enumerate() {
            let g = font.find_glyph(cp).unwrap();
            let region = g.region.unwrap();
            assert_eq!((region.surface_width, region.surface_height), (tw, th));
            assert!(region.x + region.width <= tw && region.y + region.height <= th);
            assert_eq!(g.spacing, spacings[i]);
        }
    }

    #[test]
    fn test_glyph_too_large() {
        let backend = shared_backend(HeadlessBackend::new(1, 1).with_capabilities(
            crate::render::backend::Capabilities {
                max_texture_size: 128,
                ..Default::default()
            },
        ));
        let source: Rc<dyn GlyphSource> = Rc::new(FixedSource::new(10.0).with_glyph_size(200, 20));
        let mut font = Font::new(backend, source, &FontConfig::default(), Filter::default(), false).unwrap();
        assert!(matches!(
            font.find_glyph('A' as u32),
            Err(FontError::GlyphTooLarge { width: 200, .. })
        ));
    }

    #[test]
    fn test_oversized_glyph_leaves_atlas_alone() {
        let backend = shared_backend(HeadlessBackend::new(1, 1).with_capabilities(
            crate::render::backend::Capabilities {
                max_texture_size: 1024,
                ..Default::default()
            },
        ));
        let source: Rc<dyn GlyphSource> = Rc::new(FixedSource::new(10.0).with_sized_glyph('Z', 2000, 10));
        let mut font = Font::new(backend.clone(), source, &FontConfig::default(), Filter::default(), false).unwrap();

        let before = font.find_glyph('A' as u32).unwrap();
        let generation = font.texture_cache_id();
        let size = font.atlas().size();
        let memory = font.atlas().texture_memory();

        assert!(matches!(
            font.find_glyph('Z' as u32),
            Err(FontError::GlyphTooLarge { width: 2000, height: 10, .. })
        ));
        assert_eq!(font.texture_cache_id(), generation);
        assert_eq!(font.atlas().size(), size);
        assert_eq!(font.cached_glyph_count(), 1);
        assert_eq!(font.atlas().texture_memory(), memory);
        assert_eq!(backend.borrow().texture_count(), 1);
        assert_eq!(font.find_glyph('A' as u32).unwrap().vertices, before.vertices);
    }

    #[test]
    fn test_drop_releases_atlas() {
        let (backend, font) = font_with(FixedSource::new(10.0));
        assert_eq!(backend.borrow().texture_count(), 1);
        drop(font);
        assert_eq!(backend.borrow().texture_count(), 0);
    }
}
