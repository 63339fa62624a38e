//! In-memory graphics backend
//!
//! `HeadlessBackend` implements [`GraphicsBackend`] without a GPU. Objects
//! live in slotmap tables and colour images are stored as float pixels, so
//! clears, resolves, readback and quad draws all produce real data. Quads are
//! rasterised as axis-aligned rectangles with nearest sampling and src-over
//! blending, which is all glyph quads need.
//!
//! Every call is counted, so tests can assert how many GPU objects a code
//! path creates.

use std::collections::{HashMap, HashSet};

use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use super::backend::{
    Attachment, BackendError, BackendResult, BlendState, Capabilities, ClearRequest,
    FramebufferHandle, FramebufferStatus, FramebufferTarget, GraphicsBackend, PixelFormat,
    ReadbackFormat, Rect, RenderbufferHandle, ShaderHandle, StencilState, TextureHandle,
};
use super::color::Colorf;
use super::state::{BlendMode, BlendAlpha, ColorMask};
use super::texture::{Filter, TextureShape};
use super::vertex::GlyphVertex;

fn to_handle(key: DefaultKey) -> u64 {
    key.data().as_ffi()
}

fn to_key(handle: u64) -> DefaultKey {
    KeyData::from_ffi(handle).into()
}

/// A colour image, row 0 first
#[derive(Debug, Clone)]
struct ImageBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Colorf>,
}

impl ImageBuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Colorf::TRANSPARENT; width as usize * height as usize],
        }
    }

    fn fill(&mut self, color: Colorf) {
        self.pixels.fill(color);
    }

    fn get(&self, x: u32, y: u32) -> Colorf {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Debug)]
struct TextureObject {
    shape: TextureShape,
    format: PixelFormat,
    image: ImageBuffer,
    filter: Filter,
}

#[derive(Debug)]
struct RenderbufferObject {
    samples: u32,
    image: ImageBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachedImage {
    Texture(DefaultKey),
    Renderbuffer(DefaultKey),
}

#[derive(Debug, Default)]
struct FramebufferObject {
    attachments: HashMap<Attachment, AttachedImage>,
    draw_buffers: Vec<u32>,
}

/// Per-call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Textures created
    pub textures_created: usize,
    /// Renderbuffers created
    pub renderbuffers_created: usize,
    /// Framebuffers created
    pub framebuffers_created: usize,
    /// `clear` calls
    pub clears: usize,
    /// `clear_color_buffer` calls
    pub indexed_clears: usize,
    /// `set_draw_buffers` calls
    pub draw_buffer_changes: usize,
    /// `draw_quads` calls
    pub draw_calls: usize,
    /// Quads submitted
    pub quads: usize,
    /// Texture uploads through `replace_pixels`
    pub uploads: usize,
    /// Multisample resolves
    pub resolves: usize,
    /// `read_pixels` calls
    pub readbacks: usize,
    /// `swap_buffers` calls
    pub swaps: usize,
}

/// Fixed-function state as last set by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessState {
    /// Viewport size
    pub viewport: (u32, u32),
    /// sRGB write conversion
    pub framebuffer_srgb: bool,
    /// Constant colour
    pub constant_color: Colorf,
    /// Blend configuration
    pub blend: BlendState,
    /// Colour write mask
    pub color_mask: ColorMask,
    /// Scissor rectangle
    pub scissor: Option<Rect>,
    /// Stencil test
    pub stencil: Option<StencilState>,
    /// Point size
    pub point_size: f32,
    /// Wireframe rasterisation
    pub wireframe: bool,
    /// Active shader
    pub shader: Option<ShaderHandle>,
}

impl Default for HeadlessState {
    fn default() -> Self {
        Self {
            viewport: (0, 0),
            framebuffer_srgb: false,
            constant_color: Colorf::WHITE,
            blend: BlendMode::Alpha.blend_state(BlendAlpha::Multiply),
            color_mask: ColorMask::all(),
            scissor: None,
            stencil: None,
            point_size: 1.0,
            wireframe: false,
            shader: None,
        }
    }
}

/// One recorded `draw_quads` call
#[derive(Debug, Clone)]
pub struct DrawRecord {
    /// Sampled texture
    pub texture: TextureHandle,
    /// Draw framebuffer, `None` for the default surface
    pub target: Option<FramebufferHandle>,
    /// Submitted vertices
    pub vertices: Vec<GlyphVertex>,
}

/// GPU-less backend
#[derive(Debug)]
pub struct HeadlessBackend {
    capabilities: Capabilities,
    unsupported_formats: HashSet<PixelFormat>,
    textures: SlotMap<DefaultKey, TextureObject>,
    renderbuffers: SlotMap<DefaultKey, RenderbufferObject>,
    framebuffers: SlotMap<DefaultKey, FramebufferObject>,
    surface: ImageBuffer,
    draw_framebuffer: Option<FramebufferHandle>,
    read_framebuffer: Option<FramebufferHandle>,
    state: HeadlessState,
    stats: HeadlessStats,
    draws: Vec<DrawRecord>,
    forced_status: Option<FramebufferStatus>,
}

impl HeadlessBackend {
    /// Create a backend with a default surface of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            capabilities: Capabilities::default(),
            unsupported_formats: HashSet::new(),
            textures: SlotMap::new(),
            renderbuffers: SlotMap::new(),
            framebuffers: SlotMap::new(),
            surface: ImageBuffer::new(width, height),
            draw_framebuffer: None,
            read_framebuffer: None,
            state: HeadlessState::default(),
            stats: HeadlessStats::default(),
            draws: Vec::new(),
            forced_status: None,
        }
    }

    /// Replace the reported capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Report `format` as unsupported for sampling and rendering
    #[must_use]
    pub fn without_format(mut self, format: PixelFormat) -> Self {
        self.unsupported_formats.insert(format);
        self
    }

    /// Make every existing framebuffer report `status`; `None` restores real checks
    pub fn force_framebuffer_status(&mut self, status: Option<FramebufferStatus>) {
        self.forced_status = status;
    }

    /// Call counters
    pub const fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    /// Last fixed-function state
    pub const fn state(&self) -> &HeadlessState {
        &self.state
    }

    /// Every quad draw since creation or the last [`Self::clear_draw_log`]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Forget recorded draws
    pub fn clear_draw_log(&mut self) {
        self.draws.clear();
    }

    /// Live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Live renderbuffers
    pub fn renderbuffer_count(&self) -> usize {
        self.renderbuffers.len()
    }

    /// Live framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Size of a live texture
    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures
            .get(to_key(texture.0))
            .map(|t| (t.shape.width(), t.shape.height()))
    }

    /// Sampling filter of a live texture
    pub fn texture_filter(&self, texture: TextureHandle) -> Option<Filter> {
        self.textures.get(to_key(texture.0)).map(|t| t.filter)
    }

    /// Colour of one default-surface pixel
    pub fn surface_pixel(&self, x: u32, y: u32) -> Option<Colorf> {
        (x < self.surface.width && y < self.surface.height).then(|| self.surface.get(x, y))
    }

    /// Colour of one texel of a texture's first slice
    pub fn texture_pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<Colorf> {
        let image = &self.textures.get(to_key(texture.0))?.image;
        (x < image.width && y < image.height).then(|| image.get(x, y))
    }

    fn attached_image(&self, image: AttachedImage) -> Option<&ImageBuffer> {
        match image {
            AttachedImage::Texture(key) => self.textures.get(key).map(|t| &t.image),
            AttachedImage::Renderbuffer(key) => self.renderbuffers.get(key).map(|r| &r.image),
        }
    }

    fn attached_image_mut(&mut self, image: AttachedImage) -> Option<&mut ImageBuffer> {
        match image {
            AttachedImage::Texture(key) => self.textures.get_mut(key).map(|t| &mut t.image),
            AttachedImage::Renderbuffer(key) => {
                self.renderbuffers.get_mut(key).map(|r| &mut r.image)
            }
        }
    }

    fn attached_samples(&self, image: AttachedImage) -> Option<u32> {
        match image {
            AttachedImage::Texture(key) => self.textures.get(key).map(|_| 0),
            AttachedImage::Renderbuffer(key) => self.renderbuffers.get(key).map(|r| r.samples),
        }
    }

    /// Colour attachment `index` of `framebuffer`, or the surface for `None`
    fn color_target(&self, framebuffer: Option<FramebufferHandle>, index: u32) -> Option<&ImageBuffer> {
        match framebuffer {
            None => (index == 0).then_some(&self.surface),
            Some(fb) => {
                let image = *self.framebuffers.get(to_key(fb.0))?.attachments.get(&Attachment::Color(index))?;
                self.attached_image(image)
            }
        }
    }

    fn color_target_mut(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        index: u32,
    ) -> Option<&mut ImageBuffer> {
        match framebuffer {
            None => (index == 0).then_some(&mut self.surface),
            Some(fb) => {
                let image = *self.framebuffers.get(to_key(fb.0))?.attachments.get(&Attachment::Color(index))?;
                self.attached_image_mut(image)
            }
        }
    }

    /// Colour attachments currently receiving draws
    fn active_draw_buffers(&self) -> Vec<u32> {
        match self.draw_framebuffer {
            None => vec![0],
            Some(fb) => self
                .framebuffers
                .get(to_key(fb.0))
                .map(|f| f.draw_buffers.clone())
                .unwrap_or_default(),
        }
    }

    fn decode_pixels(format: PixelFormat, data: &[u8], out: &mut [Colorf]) {
        let unorm = |v: u8| f32::from(v) / 255.0;
        match format {
            PixelFormat::La8 => {
                for (dst, px) in out.iter_mut().zip(data.chunks_exact(2)) {
                    let l = unorm(px[0]);
                    *dst = Colorf::new(l, l, l, unorm(px[1]));
                }
            }
            PixelFormat::Rgba8 | PixelFormat::Srgba8 | PixelFormat::Normal => {
                for (dst, px) in out.iter_mut().zip(data.chunks_exact(4)) {
                    *dst = Colorf::new(unorm(px[0]), unorm(px[1]), unorm(px[2]), unorm(px[3]));
                }
            }
            PixelFormat::R8 => {
                for (dst, &v) in out.iter_mut().zip(data) {
                    *dst = Colorf::new(unorm(v), 0.0, 0.0, 1.0);
                }
            }
            _ => {}
        }
    }

    fn blend_over(dst: Colorf, src: Colorf) -> Colorf {
        let inv = 1.0 - src.a;
        Colorf::new(
            src.r * src.a + dst.r * inv,
            src.g * src.a + dst.g * inv,
            src.b * src.a + dst.b * inv,
            src.a + dst.a * inv,
        )
    }

    /// Fragments `(x, y, colour)` covered by one quad on a `width` x `height` target
    fn rasterize_quad(
        texture: &ImageBuffer,
        quad: &[GlyphVertex],
        constant: Colorf,
        width: u32,
        height: u32,
        scissor: Option<Rect>,
    ) -> Vec<(u32, u32, Colorf)> {
        let (min_x, max_x) = quad
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
        let (min_y, max_y) = quad
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));

        let mut clip = (0.0f32, 0.0f32, width as f32, height as f32);
        if let Some(r) = scissor {
            clip = (
                clip.0.max(r.x as f32),
                clip.1.max(r.y as f32),
                clip.2.min((r.x + r.w) as f32),
                clip.3.min((r.y + r.h) as f32),
            );
        }

        let x0 = min_x.max(clip.0).floor() as i64;
        let x1 = max_x.min(clip.2).ceil() as i64;
        let y0 = min_y.max(clip.1).floor() as i64;
        let y1 = max_y.min(clip.3).ceil() as i64;
        if x1 <= x0 || y1 <= y0 || max_x <= min_x || max_y <= min_y {
            return Vec::new();
        }

        let norm = |v: u16| f32::from(v) / f32::from(u16::MAX);
        let (s0, t0) = (norm(quad[0].s), norm(quad[0].t));
        let (s1, t1) = (norm(quad[3].s), norm(quad[3].t));
        let c = quad[0].color;
        let tint = Colorf::new(
            f32::from(c.r) / 255.0,
            f32::from(c.g) / 255.0,
            f32::from(c.b) / 255.0,
            f32::from(c.a) / 255.0,
        ) * constant;

        let mut fragments = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
                if cx < min_x || cx > max_x || cy < min_y || cy > max_y {
                    continue;
                }
                let u = s0 + (s1 - s0) * (cx - min_x) / (max_x - min_x);
                let v = t0 + (t1 - t0) * (cy - min_y) / (max_y - min_y);
                let tx = ((u * texture.width as f32) as u32).min(texture.width - 1);
                let ty = ((v * texture.height as f32) as u32).min(texture.height - 1);
                let texel = texture.get(tx, ty) * tint;
                fragments.push((x as u32, y as u32, texel));
            }
        }
        fragments
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn is_render_format_supported(&self, format: PixelFormat, readable: bool) -> bool {
        if self.unsupported_formats.contains(&format) {
            return false;
        }
        // Packed depth/stencil can't be sampled here
        !(readable && matches!(format, PixelFormat::Stencil8 | PixelFormat::Depth24Stencil8))
    }

    fn is_texture_format_supported(&self, format: PixelFormat) -> bool {
        !self.unsupported_formats.contains(&format)
    }

    fn default_surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    fn create_texture(
        &mut self,
        shape: &TextureShape,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> BackendResult<TextureHandle> {
        if self.unsupported_formats.contains(&format) {
            return Err(BackendError::Unsupported(format!("{format:?} textures")));
        }

        let mut image = ImageBuffer::new(shape.width(), shape.height());
        if let Some(data) = data {
            let expected = shape.width() as usize * shape.height() as usize * format.bytes_per_pixel();
            if data.len() < expected {
                return Err(BackendError::InvalidRegion);
            }
            Self::decode_pixels(format, data, &mut image.pixels);
        }

        let key = self.textures.insert(TextureObject {
            shape: *shape,
            format,
            image,
            filter: Filter::default(),
        });
        self.stats.textures_created += 1;
        Ok(TextureHandle(to_handle(key)))
    }

    fn replace_pixels(&mut self, texture: TextureHandle, rect: Rect, data: &[u8]) -> BackendResult<()> {
        let object = self
            .textures
            .get_mut(to_key(texture.0))
            .ok_or(BackendError::InvalidHandle("texture"))?;

        if !rect.fits_within(object.image.width, object.image.height) {
            return Err(BackendError::InvalidRegion);
        }

        let bpp = object.format.bytes_per_pixel();
        let row_bytes = rect.w as usize * bpp;
        if data.len() < row_bytes * rect.h as usize {
            return Err(BackendError::InvalidRegion);
        }

        let width = object.image.width as usize;
        for (row, src) in data.chunks_exact(row_bytes).take(rect.h as usize).enumerate() {
            let start = (rect.y as usize + row) * width + rect.x as usize;
            let dst = &mut object.image.pixels[start..start + rect.w as usize];
            Self::decode_pixels(object.format, src, dst);
        }

        self.stats.uploads += 1;
        Ok(())
    }

    fn set_texture_filter(&mut self, texture: TextureHandle, filter: &Filter) -> BackendResult<()> {
        let object = self
            .textures
            .get_mut(to_key(texture.0))
            .ok_or(BackendError::InvalidHandle("texture"))?;
        object.filter = *filter;
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(to_key(texture.0));
    }

    fn create_renderbuffer(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        samples: u32,
    ) -> BackendResult<(RenderbufferHandle, u32)> {
        if self.unsupported_formats.contains(&format) {
            return Err(BackendError::Unsupported(format!("{format:?} renderbuffers")));
        }
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidRegion);
        }

        let samples = samples.min(self.capabilities.max_samples);
        let key = self.renderbuffers.insert(RenderbufferObject {
            samples,
            image: ImageBuffer::new(width, height),
        });
        self.stats.renderbuffers_created += 1;
        Ok((RenderbufferHandle(to_handle(key)), samples))
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(to_key(renderbuffer.0));
    }

    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle> {
        let key = self.framebuffers.insert(FramebufferObject {
            attachments: HashMap::new(),
            draw_buffers: vec![0],
        });
        self.stats.framebuffers_created += 1;
        Ok(FramebufferHandle(to_handle(key)))
    }

    fn attach_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        texture: TextureHandle,
    ) -> BackendResult<()> {
        let key = to_key(texture.0);
        if !self.textures.contains_key(key) {
            return Err(BackendError::InvalidHandle("texture"));
        }
        self.framebuffers
            .get_mut(to_key(framebuffer.0))
            .ok_or(BackendError::InvalidHandle("framebuffer"))?
            .attachments
            .insert(attachment, AttachedImage::Texture(key));
        Ok(())
    }

    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()> {
        let key = to_key(renderbuffer.0);
        if !self.renderbuffers.contains_key(key) {
            return Err(BackendError::InvalidHandle("renderbuffer"));
        }
        self.framebuffers
            .get_mut(to_key(framebuffer.0))
            .ok_or(BackendError::InvalidHandle("framebuffer"))?
            .attachments
            .insert(attachment, AttachedImage::Renderbuffer(key));
        Ok(())
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferHandle, buffers: &[u32]) -> BackendResult<()> {
        let object = self
            .framebuffers
            .get_mut(to_key(framebuffer.0))
            .ok_or(BackendError::InvalidHandle("framebuffer"))?;
        object.draw_buffers = buffers.to_vec();
        self.stats.draw_buffer_changes += 1;
        Ok(())
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(object) = self.framebuffers.get(to_key(framebuffer.0)) else {
            return FramebufferStatus::Unsupported;
        };
        if let Some(status) = self.forced_status {
            return status;
        }
        if object.attachments.is_empty() {
            return FramebufferStatus::MissingAttachment;
        }

        let mut size = None;
        let mut color_samples = None;
        for (attachment, &image) in &object.attachments {
            let (Some(buffer), Some(samples)) = (self.attached_image(image), self.attached_samples(image)) else {
                return FramebufferStatus::IncompleteAttachment;
            };

            let dims = (buffer.width, buffer.height);
            if *size.get_or_insert(dims) != dims {
                return FramebufferStatus::IncompleteDimensions;
            }
            if matches!(attachment, Attachment::Color(_)) && *color_samples.get_or_insert(samples) != samples {
                return FramebufferStatus::IncompleteMultisample;
            }
        }

        if let Some(color) = color_samples {
            let depth_mismatch = object
                .attachments
                .iter()
                .filter(|(a, _)| !matches!(a, Attachment::Color(_)))
                .any(|(_, &image)| self.attached_samples(image) != Some(color));
            if depth_mismatch {
                return FramebufferStatus::IncompleteMultisample;
            }
        }

        FramebufferStatus::Complete
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferHandle>) {
        match target {
            FramebufferTarget::All => {
                self.draw_framebuffer = framebuffer;
                self.read_framebuffer = framebuffer;
            }
            FramebufferTarget::Draw => self.draw_framebuffer = framebuffer,
            FramebufferTarget::Read => self.read_framebuffer = framebuffer,
        }
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.draw_framebuffer
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(to_key(framebuffer.0));
        if self.draw_framebuffer == Some(framebuffer) {
            self.draw_framebuffer = None;
        }
        if self.read_framebuffer == Some(framebuffer) {
            self.read_framebuffer = None;
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.state.viewport = (width, height);
    }

    fn set_framebuffer_srgb(&mut self, enabled: bool) {
        self.state.framebuffer_srgb = enabled;
    }

    fn clear(&mut self, request: ClearRequest) -> BackendResult<()> {
        self.stats.clears += 1;
        if let Some(color) = request.color {
            let target = self.draw_framebuffer;
            for index in self.active_draw_buffers() {
                if let Some(image) = self.color_target_mut(target, index) {
                    image.fill(color);
                }
            }
        }
        Ok(())
    }

    fn clear_color_buffer(&mut self, index: u32, color: Colorf) -> BackendResult<()> {
        self.stats.indexed_clears += 1;
        let target = self.draw_framebuffer;
        self.color_target_mut(target, index)
            .ok_or(BackendError::InvalidHandle("colour attachment"))?
            .fill(color);
        Ok(())
    }

    fn resolve_multisample(
        &mut self,
        src: FramebufferHandle,
        src_attachment: u32,
        dst: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let source = self
            .color_target(Some(src), src_attachment)
            .ok_or(BackendError::InvalidHandle("framebuffer"))?;
        if source.width < width || source.height < height {
            return Err(BackendError::InvalidRegion);
        }
        let pixels = source.pixels.clone();

        let dest = self
            .color_target_mut(Some(dst), 0)
            .ok_or(BackendError::InvalidHandle("framebuffer"))?;
        if dest.width != width || dest.height != height {
            return Err(BackendError::InvalidRegion);
        }
        dest.pixels = pixels;

        self.stats.resolves += 1;
        Ok(())
    }

    fn read_pixels(
        &mut self,
        source: Option<FramebufferHandle>,
        attachment: u32,
        rect: Rect,
        format: ReadbackFormat,
    ) -> BackendResult<Vec<u8>> {
        let image = self
            .color_target(source, attachment)
            .ok_or(BackendError::InvalidHandle("framebuffer"))?;
        if !rect.fits_within(image.width, image.height) {
            return Err(BackendError::InvalidRegion);
        }

        // The surface is stored top-down but read like a window: bottom-up
        let flip = source.is_none();
        let last_row = image.height as i32 - 1;

        let mut out = Vec::with_capacity(rect.w as usize * rect.h as usize * format.bytes_per_pixel());
        for y in rect.y..rect.y + rect.h {
            let row = if flip { last_row - y } else { y };
            for x in rect.x..rect.x + rect.w {
                let c = image.get(x as u32, row as u32).clamped();
                let channels = [c.r, c.g, c.b, c.a];
                match format {
                    ReadbackFormat::Rgba8 => {
                        out.extend(channels.iter().map(|&v| (v * 255.0 + 0.5) as u8));
                    }
                    ReadbackFormat::Rgba16 => {
                        for v in channels {
                            out.extend_from_slice(&((v * 65535.0 + 0.5) as u16).to_ne_bytes());
                        }
                    }
                    ReadbackFormat::Rgba32F => {
                        for v in channels {
                            out.extend_from_slice(&v.to_ne_bytes());
                        }
                    }
                    ReadbackFormat::Rgba16F => {
                        return Err(BackendError::Unsupported("half-float readback".into()));
                    }
                }
            }
        }

        self.stats.readbacks += 1;
        Ok(out)
    }

    fn draw_quads(&mut self, texture: TextureHandle, vertices: &[GlyphVertex]) -> BackendResult<()> {
        if vertices.len() % 4 != 0 {
            return Err(BackendError::InvalidRegion);
        }

        let source = &self
            .textures
            .get(to_key(texture.0))
            .ok_or(BackendError::InvalidHandle("texture"))?
            .image;

        let target = self.draw_framebuffer;
        let buffers = self.active_draw_buffers();
        let mut writes = Vec::new();
        for index in buffers {
            let Some(dest) = self.color_target(target, index) else {
                continue;
            };
            let (width, height) = (dest.width, dest.height);
            for quad in vertices.chunks_exact(4) {
                let fragments = Self::rasterize_quad(
                    source,
                    quad,
                    self.state.constant_color,
                    width,
                    height,
                    self.state.scissor,
                );
                writes.push((index, fragments));
            }
        }

        for (index, fragments) in writes {
            if let Some(dest) = self.color_target_mut(target, index) {
                for (x, y, color) in fragments {
                    let i = (y * dest.width + x) as usize;
                    dest.pixels[i] = Self::blend_over(dest.pixels[i], color);
                }
            }
        }

        self.stats.draw_calls += 1;
        self.stats.quads += vertices.len() / 4;
        self.draws.push(DrawRecord {
            texture,
            target,
            vertices: vertices.to_vec(),
        });
        Ok(())
    }

    fn swap_buffers(&mut self) {
        self.stats.swaps += 1;
    }

    fn set_constant_color(&mut self, color: Colorf) {
        self.state.constant_color = color;
    }

    fn set_blend_state(&mut self, state: BlendState) {
        self.state.blend = state;
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.state.color_mask = mask;
    }

    fn set_scissor(&mut self, rect: Option<Rect>) {
        self.state.scissor = rect;
    }

    fn set_stencil(&mut self, state: Option<StencilState>) {
        self.state.stencil = state;
    }

    fn set_point_size(&mut self, size: f32) {
        self.state.point_size = size;
    }

    fn set_wireframe(&mut self, enabled: bool) -> bool {
        if !self.capabilities.wireframe {
            return false;
        }
        self.state.wireframe = enabled;
        true
    }

    fn use_shader(&mut self, shader: Option<ShaderHandle>) {
        self.state.shader = shader;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::color::Color;

    fn solid_texture(backend: &mut HeadlessBackend) -> TextureHandle {
        let shape = TextureShape::flat(2, 2).unwrap();
        let data = [255u8; 16];
        backend.create_texture(&shape, PixelFormat::Rgba8, Some(&data)).unwrap()
    }

    #[test]
    fn test_clear_default_surface() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend
            .clear(ClearRequest { color: Some(Colorf::BLACK), depth_stencil: true })
            .unwrap();

        let pixels = backend
            .read_pixels(None, 0, Rect::new(0, 0, 4, 4), ReadbackFormat::Rgba8)
            .unwrap();
        assert_eq!(pixels.len(), 64);
        assert_eq!(&pixels[..4], &[0, 0, 0, 255]);
        assert_eq!(backend.stats().clears, 1);
    }

    #[test]
    fn test_framebuffer_status() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fb = backend.create_framebuffer().unwrap();
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::MissingAttachment);

        let a = backend.create_texture(&TextureShape::flat(8, 8).unwrap(), PixelFormat::Rgba8, None).unwrap();
        let b = backend.create_texture(&TextureShape::flat(4, 4).unwrap(), PixelFormat::Rgba8, None).unwrap();
        backend.attach_texture(fb, Attachment::Color(0), a).unwrap();
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::Complete);

        backend.attach_texture(fb, Attachment::Color(1), b).unwrap();
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::IncompleteDimensions);

        backend.delete_texture(b);
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::IncompleteAttachment);
    }

    #[test]
    fn test_multisample_mismatch_is_incomplete() {
        let mut backend = HeadlessBackend::new(4, 4);
        let fb = backend.create_framebuffer().unwrap();
        let (color, _) = backend.create_renderbuffer(PixelFormat::Rgba8, 8, 8, 4).unwrap();
        let (depth, _) = backend.create_renderbuffer(PixelFormat::Depth24Stencil8, 8, 8, 0).unwrap();
        backend.attach_renderbuffer(fb, Attachment::Color(0), color).unwrap();
        backend.attach_renderbuffer(fb, Attachment::DepthStencil, depth).unwrap();
        assert_eq!(backend.framebuffer_status(fb), FramebufferStatus::IncompleteMultisample);
    }

    #[test]
    fn test_renderbuffer_samples_clamped() {
        let mut backend = HeadlessBackend::new(4, 4).with_capabilities(Capabilities {
            max_samples: 4,
            ..Capabilities::default()
        });
        let (_, samples) = backend.create_renderbuffer(PixelFormat::Rgba8, 8, 8, 16).unwrap();
        assert_eq!(samples, 4);
    }

    #[test]
    fn test_draw_quad_covers_rectangle() {
        let mut backend = HeadlessBackend::new(8, 8);
        backend.clear(ClearRequest { color: Some(Colorf::BLACK), depth_stencil: false }).unwrap();
        let texture = solid_texture(&mut backend);

        let corner = |x: f32, y: f32, s: u16, t: u16| GlyphVertex { x, y, s, t, color: Color::WHITE };
        let quad = [
            corner(2.0, 2.0, 0, 0),
            corner(2.0, 4.0, 0, u16::MAX),
            corner(4.0, 2.0, u16::MAX, 0),
            corner(4.0, 4.0, u16::MAX, u16::MAX),
        ];
        backend.draw_quads(texture, &quad).unwrap();

        assert_eq!(backend.surface_pixel(3, 3), Some(Colorf::WHITE));
        assert_eq!(backend.surface_pixel(5, 5), Some(Colorf::BLACK));
        assert_eq!(backend.stats().quads, 1);
        assert_eq!(backend.draws().len(), 1);
    }

    #[test]
    fn test_replace_pixels_bounds() {
        let mut backend = HeadlessBackend::new(4, 4);
        let texture = solid_texture(&mut backend);
        let err = backend.replace_pixels(texture, Rect::new(1, 1, 2, 2), &[0; 16]);
        assert_eq!(err, Err(BackendError::InvalidRegion));

        backend.replace_pixels(texture, Rect::new(1, 1, 1, 1), &[0, 0, 0, 0]).unwrap();
        assert_eq!(backend.texture_pixel(texture, 1, 1), Some(Colorf::TRANSPARENT));
    }
}
