//! Deterministic glyph source for tests

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::{Font, FontResult, GlyphData, GlyphMetrics, GlyphSource, SourceKind};
use crate::config::FontConfig;
use crate::render::backend::PixelFormat;
use crate::render::headless::HeadlessBackend;
use crate::render::texture::Filter;

/// Every glyph is a solid `w` x `h` box advancing `w + 1`; space advances 4
#[derive(Debug, Clone)]
pub(crate) struct FixedSource {
    height: f32,
    ascent: f32,
    density: f32,
    kind: SourceKind,
    glyph_size: (u32, u32),
    sized_glyph: Option<(u32, (u32, u32))>,
    only: Option<HashSet<u32>>,
}

impl FixedSource {
    pub(crate) fn new(height: f32) -> Self {
        Self {
            height,
            ascent: height * 0.8,
            density: 1.0,
            kind: SourceKind::TrueType,
            glyph_size: (6, 8),
            sized_glyph: None,
            only: None,
        }
    }

    pub(crate) fn with_ascent(mut self, ascent: f32) -> Self {
        self.ascent = ascent;
        self
    }

    pub(crate) fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub(crate) fn with_glyph_size(mut self, width: u32, height: u32) -> Self {
        self.glyph_size = (width, height);
        self
    }

    /// Give one glyph its own size
    pub(crate) fn with_sized_glyph(mut self, glyph: char, width: u32, height: u32) -> Self {
        self.sized_glyph = Some((u32::from(glyph), (width, height)));
        self
    }

    pub(crate) fn bitmap(mut self) -> Self {
        self.kind = SourceKind::Bitmap;
        self
    }

    /// Restrict the glyph set (space is always drawable)
    pub(crate) fn only(mut self, glyphs: &str) -> Self {
        self.only = Some(glyphs.chars().map(u32::from).collect());
        self
    }
}

impl GlyphSource for FixedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn ascent(&self) -> f32 {
        self.ascent
    }

    fn descent(&self) -> f32 {
        -(self.height - self.ascent)
    }

    fn pixel_density(&self) -> f32 {
        self.density
    }

    fn has_glyph(&self, codepoint: u32) -> bool {
        if codepoint == '\t' as u32 {
            return false;
        }
        codepoint == ' ' as u32 || self.only.as_ref().map_or(true, |set| set.contains(&codepoint))
    }

    fn glyph_data(&self, codepoint: u32) -> FontResult<GlyphData> {
        if codepoint == ' ' as u32 {
            let metrics = GlyphMetrics { advance: 4.0, ..GlyphMetrics::default() };
            return Ok(GlyphData::empty(metrics, PixelFormat::La8));
        }
        if !self.has_glyph(codepoint) {
            return Ok(GlyphData::empty(GlyphMetrics::default(), PixelFormat::La8));
        }

        let (w, h) = match self.sized_glyph {
            Some((cp, size)) if cp == codepoint => size,
            _ => self.glyph_size,
        };
        Ok(GlyphData {
            metrics: GlyphMetrics {
                width: w,
                height: h,
                advance: (w + 1) as f32,
                bearing_x: 1.0,
                bearing_y: (h - 1) as f32,
            },
            format: PixelFormat::La8,
            pixels: vec![255; (w * h * 2) as usize],
        })
    }

    fn kerning(&self, left: u32, right: u32) -> f32 {
        if (left, right) == ('A' as u32, 'V' as u32) {
            -2.0
        } else {
            0.0
        }
    }
}

pub(crate) fn shared_backend(backend: HeadlessBackend) -> Rc<RefCell<HeadlessBackend>> {
    Rc::new(RefCell::new(backend))
}

/// A font over `source` on a fresh headless backend
pub(crate) fn font_with(source: FixedSource) -> (Rc<RefCell<HeadlessBackend>>, Font) {
    let backend = shared_backend(HeadlessBackend::new(64, 64));
    let font = Font::new(
        backend.clone(),
        Rc::new(source),
        &FontConfig::default(),
        Filter::default(),
        false,
    )
    .unwrap();
    (backend, font)
}
