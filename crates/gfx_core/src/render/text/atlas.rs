//! Glyph atlas surfaces and shelf packing
//!
//! Surfaces grow along the sequence 128x128, 256x128, 256x256, 512x256, ...
//! While the sequence can still grow, a full surface is replaced by the next
//! size (and every cached glyph has to be packed again). Once capped, further
//! surfaces of the capped size are appended and existing glyphs stay put.

use super::source::GlyphData;
use super::{FontError, FontResult};
use crate::config::FontConfig;
use crate::render::backend::{GraphicsBackend, PixelFormat, Rect, TextureHandle};
use crate::render::texture::{Filter, TextureShape};

/// A texture used to store packed glyphs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasSurface {
    /// Backend texture
    pub texture: TextureHandle,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

/// How the last surface creation changed the atlas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceChange {
    /// The last surface was swapped for a larger one; packed glyphs are gone
    Replaced,
    /// A surface was added; existing glyphs are still valid
    Appended,
}

/// Outcome of asking for space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Space reserved at this texel position in the last surface
    At {
        /// Left edge
        x: u32,
        /// Top edge
        y: u32,
    },
    /// The surface is full; create a new one and try again
    Full,
    /// The glyph can never fit, even in an empty surface of the largest size
    TooLarge,
}

/// Next size in the growth sequence, or the same size when capped
pub fn next_texture_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let can_widen = width.saturating_mul(2) <= max_width;
    let can_heighten = height.saturating_mul(2) <= max_height;

    if width == height && can_widen {
        (width * 2, height)
    } else if can_heighten {
        (width, height * 2)
    } else if can_widen {
        (width * 2, height)
    } else {
        (width, height)
    }
}

/// Shelf-packed glyph surfaces for one font
#[derive(Debug)]
pub struct TextureAtlas {
    surfaces: Vec<AtlasSurface>,
    format: PixelFormat,
    filter: Filter,
    padding: u32,
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    cursor_x: u32,
    cursor_y: u32,
    row_height: u32,
    generation: u32,
}

impl TextureAtlas {
    /// Size an atlas for a font of `font_height` pixels
    ///
    /// No surface exists until [`Self::create_surface`] is called.
    pub fn new(
        format: PixelFormat,
        filter: Filter,
        config: &FontConfig,
        max_texture_size: u32,
        font_height: f32,
    ) -> Self {
        let max_width = config.max_texture_width.min(max_texture_size);
        let max_height = config.max_texture_height.min(max_texture_size);
        let initial = config.initial_texture_size.min(max_width).min(max_height);

        // Grow until roughly 30 lines' worth of glyphs fit
        let (mut width, mut height) = (initial, initial);
        let target = f64::from(font_height) * 0.8 * f64::from(font_height) * 30.0;
        while target > f64::from(width) * f64::from(height) {
            let next = next_texture_size(width, height, max_width, max_height);
            if next == (width, height) {
                break;
            }
            (width, height) = next;
        }

        Self {
            surfaces: Vec::new(),
            format,
            filter,
            padding: config.texture_padding,
            width,
            height,
            max_width,
            max_height,
            cursor_x: config.texture_padding,
            cursor_y: config.texture_padding,
            row_height: config.texture_padding,
            generation: 0,
        }
    }

    /// Current surface size
    pub const fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Texel format of every surface
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Live surfaces, oldest first
    pub fn surfaces(&self) -> &[AtlasSurface] {
        &self.surfaces
    }

    /// Bumped on every surface creation
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Bytes of texture memory held by all surfaces
    pub fn texture_memory(&self) -> usize {
        let bpp = self.format.bytes_per_pixel();
        self.surfaces
            .iter()
            .map(|s| s.width as usize * s.height as usize * bpp)
            .sum()
    }

    /// Sampling filter of the surfaces
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Next size in the growth sequence
    pub fn next_size(&self) -> (u32, u32) {
        next_texture_size(self.width, self.height, self.max_width, self.max_height)
    }

    fn can_grow(&self) -> bool {
        self.next_size() != (self.width, self.height)
    }

    /// Largest surface the growth sequence reaches
    pub fn largest_size(&self) -> (u32, u32) {
        let mut size = (self.width, self.height);
        loop {
            let next = next_texture_size(size.0, size.1, self.max_width, self.max_height);
            if next == size {
                return size;
            }
            size = next;
        }
    }

    /// Create a surface, replacing the current one when a larger size is available
    pub fn create_surface(&mut self, backend: &mut dyn GraphicsBackend) -> FontResult<SurfaceChange> {
        let replace = !self.surfaces.is_empty() && self.can_grow();
        let (width, height) = if replace { self.next_size() } else { (self.width, self.height) };

        // Transparent black
        let shape = TextureShape::flat(width, height).map_err(|e| FontError::Source(e.to_string()))?;
        let empty = vec![0u8; shape.texel_count() * self.format.bytes_per_pixel()];
        let texture = backend.create_texture(&shape, self.format, Some(&empty))?;
        if let Err(e) = backend.set_texture_filter(texture, &self.filter) {
            backend.delete_texture(texture);
            return Err(e.into());
        }

        let change = if replace {
            if let Some(old) = self.surfaces.pop() {
                backend.delete_texture(old.texture);
            }
            SurfaceChange::Replaced
        } else {
            SurfaceChange::Appended
        };

        self.surfaces.push(AtlasSurface { texture, width, height });
        self.width = width;
        self.height = height;
        self.cursor_x = self.padding;
        self.cursor_y = self.padding;
        self.row_height = self.padding;
        self.generation = self.generation.wrapping_add(1);

        log::info!(
            "Glyph atlas surface {} at {}x{} ({} surfaces)",
            if change == SurfaceChange::Replaced { "replaced" } else { "created" },
            width,
            height,
            self.surfaces.len()
        );

        Ok(change)
    }

    /// Reserve a `width` x `height` rectangle in the last surface
    pub fn place(&mut self, width: u32, height: u32) -> Placement {
        let p = self.padding;

        // Larger than any surface the atlas can grow to
        let (max_width, max_height) = self.largest_size();
        if width + p * 2 > max_width || height + p * 2 > max_height {
            return Placement::TooLarge;
        }

        if width + p * 2 > self.width || height + p * 2 > self.height {
            return Placement::Full;
        }

        if self.cursor_x + width + p > self.width {
            // New shelf
            self.cursor_x = p;
            self.cursor_y += self.row_height;
            self.row_height = p;
        }

        if self.cursor_y + height + p > self.height || self.surfaces.is_empty() {
            return Placement::Full;
        }

        let at = Placement::At { x: self.cursor_x, y: self.cursor_y };
        self.cursor_x += width + p;
        self.row_height = self.row_height.max(height + p);
        at
    }

    /// Copy glyph pixels into the last surface at `(x, y)`
    pub fn upload(
        &self,
        backend: &mut dyn GraphicsBackend,
        x: u32,
        y: u32,
        data: &GlyphData,
    ) -> FontResult<TextureHandle> {
        let surface = self
            .surfaces
            .last()
            .ok_or_else(|| FontError::Source("atlas has no surface".into()))?;

        let rect = Rect::new(
            x as i32,
            y as i32,
            data.metrics.width as i32,
            data.metrics.height as i32,
        );
        backend.replace_pixels(surface.texture, rect, &data.pixels)?;
        Ok(surface.texture)
    }

    /// Change the filter of every surface
    pub fn set_filter(&mut self, backend: &mut dyn GraphicsBackend, filter: Filter) -> FontResult<()> {
        for surface in &self.surfaces {
            backend.set_texture_filter(surface.texture, &filter)?;
        }
        self.filter = filter;
        Ok(())
    }

    /// Delete every surface
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for surface in self.surfaces.drain(..) {
            backend.delete_texture(surface.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::HeadlessBackend;

    fn atlas(height: f32) -> TextureAtlas {
        TextureAtlas::new(PixelFormat::La8, Filter::default(), &FontConfig::default(), 8192, height)
    }

    #[test]
    fn test_growth_sequence() {
        assert_eq!(next_texture_size(128, 128, 8192, 4096), (256, 128));
        assert_eq!(next_texture_size(256, 128, 8192, 4096), (256, 256));
        assert_eq!(next_texture_size(8192, 4096, 8192, 4096), (8192, 4096));
        // Width capped: grow height instead
        assert_eq!(next_texture_size(256, 256, 256, 1024), (256, 512));
    }

    #[test]
    fn test_initial_size_fits_font_height() {
        assert_eq!(atlas(8.0).size(), (128, 128));
        // 24 * 0.8 * 24 * 30 = 13824 <= 16384
        assert_eq!(atlas(24.0).size(), (128, 128));
        // 40 * 0.8 * 40 * 30 = 38400 > 32768 -> 256x256
        assert_eq!(atlas(40.0).size(), (256, 256));
    }

    #[test]
    fn test_shelf_packing() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut atlas = atlas(8.0);
        atlas.create_surface(&mut backend).unwrap();
        assert_eq!(atlas.generation(), 1);

        assert_eq!(atlas.place(10, 12), Placement::At { x: 2, y: 2 });
        assert_eq!(atlas.place(10, 8), Placement::At { x: 14, y: 2 });

        // Fill the rest of the shelf, then wrap to the next one
        let mut last = Placement::Full;
        for _ in 0..9 {
            last = atlas.place(10, 4);
        }
        assert_eq!(last, Placement::At { x: 2, y: 16 });
    }

    #[test]
    fn test_oversized_glyph_rejected_without_growth() {
        let mut backend = HeadlessBackend::new(1, 1);
        let mut atlas = TextureAtlas::new(PixelFormat::La8, Filter::default(), &FontConfig::default(), 1024, 8.0);
        atlas.create_surface(&mut backend).unwrap();
        assert_eq!(atlas.largest_size(), (1024, 1024));

        assert_eq!(atlas.place(2000, 10), Placement::TooLarge);
        assert_eq!(atlas.place(10, 1021), Placement::TooLarge);
        assert_eq!(atlas.size(), (128, 128));
        assert_eq!(atlas.generation(), 1);

        // Fits a grown surface but not this one
        assert_eq!(atlas.place(500, 10), Placement::Full);
        assert_eq!(atlas.place(10, 10), Placement::At { x: 2, y: 2 });
    }

    #[test]
    fn test_replace_then_append_when_capped() {
        let mut backend = HeadlessBackend::new(1, 1);
        let config = FontConfig {
            max_texture_width: 256,
            max_texture_height: 128,
            ..FontConfig::default()
        };
        let mut atlas = TextureAtlas::new(PixelFormat::La8, Filter::default(), &config, 8192, 8.0);

        assert_eq!(atlas.create_surface(&mut backend).unwrap(), SurfaceChange::Appended);
        assert_eq!(atlas.create_surface(&mut backend).unwrap(), SurfaceChange::Replaced);
        assert_eq!(atlas.size(), (256, 128));
        assert_eq!(backend.texture_count(), 1);

        assert_eq!(atlas.create_surface(&mut backend).unwrap(), SurfaceChange::Appended);
        assert_eq!(atlas.surfaces().len(), 2);
        assert_eq!(atlas.generation(), 3);

        assert_eq!(atlas.place(300, 4), Placement::TooLarge);

        atlas.release(&mut backend);
        assert_eq!(backend.texture_count(), 0);
    }
}
