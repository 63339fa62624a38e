//! Offscreen render targets
//!
//! A [`Canvas`] is a texture that passes can draw into. Readable canvases
//! own a sampled texture plus a canvas-local framebuffer used for readback
//! and as the multisample resolve destination. Multisampled and non-readable
//! canvases also own a renderbuffer, which is what passes actually render to.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};

use super::backend::{
    Attachment, BackendError, ClearRequest, FramebufferHandle, FramebufferStatus, FramebufferTarget,
    GraphicsBackend, PixelFormat, ReadbackFormat, Rect, RenderbufferHandle, SharedBackend,
    TextureHandle,
};
use super::color::Colorf;
use super::texture::{Filter, TextureKind, TextureShape};
use super::{GraphicsError, GraphicsResult};

/// Identity of a canvas within one graphics subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanvasId(pub u64);

/// Canvas creation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSettings {
    /// Width in logical pixels
    pub width: u32,
    /// Height in logical pixels
    pub height: u32,
    /// Texture topology
    pub kind: TextureKind,
    /// Pixel format; `Normal` and `Hdr` are resolved per system
    pub format: PixelFormat,
    /// Requested multisample count (0 or 1 disables MSAA)
    pub msaa: u32,
    /// Pixels per logical pixel
    pub pixel_density: f32,
    /// Whether the canvas can be sampled; defaults to true for colour formats
    pub readable: Option<bool>,
}

impl CanvasSettings {
    /// A flat canvas in the system's normal format
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            kind: TextureKind::Flat,
            format: PixelFormat::Normal,
            msaa: 0,
            pixel_density: 1.0,
            readable: None,
        }
    }
}

/// What a pass attaches for a canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAttachment {
    /// The sampled texture itself
    Texture(TextureHandle),
    /// The multisample or non-readable renderbuffer
    Renderbuffer(RenderbufferHandle),
}

/// Book-keeping shared between a graphics subsystem and its canvases
#[derive(Debug, Default)]
pub(crate) struct CanvasRegistry {
    pub(crate) live: usize,
    pub(crate) texture_memory: usize,
    /// Canvases dropped since the framebuffer cache last looked
    pub(crate) graveyard: Vec<CanvasId>,
}

/// An offscreen render target
pub struct Canvas {
    id: CanvasId,
    backend: SharedBackend,
    registry: Rc<RefCell<CanvasRegistry>>,
    shape: TextureShape,
    width: u32,
    height: u32,
    pixel_density: f32,
    format: PixelFormat,
    readable: bool,
    texture: Option<TextureHandle>,
    framebuffer: Option<FramebufferHandle>,
    renderbuffer: Option<RenderbufferHandle>,
    requested_samples: u32,
    actual_samples: u32,
    texture_memory: usize,
    filter: Cell<Filter>,
    active: Cell<bool>,
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("format", &self.format)
            .field("readable", &self.readable)
            .field("msaa", &self.actual_samples)
            .finish_non_exhaustive()
    }
}

/// Resolve the logical `Normal` and `Hdr` formats to sized ones
pub fn sized_format(format: PixelFormat, gamma_correct: bool, backend: &dyn GraphicsBackend) -> PixelFormat {
    match format {
        PixelFormat::Normal if gamma_correct => PixelFormat::Srgba8,
        // 32-bit targets aren't guaranteed everywhere
        PixelFormat::Normal if !backend.is_render_format_supported(PixelFormat::Rgba8, true) => {
            PixelFormat::Rgba4
        }
        PixelFormat::Normal => PixelFormat::Rgba8,
        PixelFormat::Hdr => PixelFormat::Rgba16F,
        other => other,
    }
}

/// Turn raw readback bytes into an image
pub(crate) fn image_from_readback(
    format: ReadbackFormat,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
) -> GraphicsResult<DynamicImage> {
    let image = match format {
        ReadbackFormat::Rgba8 => RgbaImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgba8),
        ReadbackFormat::Rgba16 => {
            let channels: Vec<u16> = bytemuck::pod_collect_to_vec(&bytes);
            ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, channels).map(DynamicImage::ImageRgba16)
        }
        ReadbackFormat::Rgba32F => {
            let channels: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
            ImageBuffer::<Rgba<f32>, _>::from_raw(width, height, channels).map(DynamicImage::ImageRgba32F)
        }
        ReadbackFormat::Rgba16F => {
            return Err(BackendError::Unsupported("half-float image data".into()).into());
        }
    };

    image.ok_or(GraphicsError::Backend(BackendError::InvalidRegion))
}

impl Canvas {
    pub(crate) fn new(
        backend: SharedBackend,
        registry: Rc<RefCell<CanvasRegistry>>,
        id: CanvasId,
        settings: &CanvasSettings,
        gamma_correct: bool,
        filter: Filter,
    ) -> GraphicsResult<Self> {
        if settings.width == 0 || settings.height == 0 || settings.pixel_density <= 0.0 {
            return Err(GraphicsError::InvalidDimensions);
        }

        if settings.kind != TextureKind::Flat && settings.msaa > 1 {
            return Err(GraphicsError::MsaaRequiresFlatTexture);
        }

        let pixel_width = (settings.width as f32 * settings.pixel_density + 0.5) as u32;
        let pixel_height = (settings.height as f32 * settings.pixel_density + 0.5) as u32;
        let shape = TextureShape::new(settings.kind, pixel_width, pixel_height)?;

        let mut gpu = backend.borrow_mut();

        let format = sized_format(settings.format, gamma_correct, &*gpu);
        let readable = settings.readable.unwrap_or(!format.is_depth_stencil());

        if readable && format.is_depth_stencil() && settings.msaa > 1 {
            return Err(GraphicsError::ReadableDepthMsaa);
        }

        if !gpu.is_render_format_supported(format, readable) {
            return Err(GraphicsError::UnsupportedFormat { format, readable });
        }

        if !readable && settings.kind != TextureKind::Flat {
            return Err(GraphicsError::NonReadableRequiresFlatTexture);
        }

        shape.check_limits(gpu.capabilities())?;

        let mut texture = None;
        let mut framebuffer = None;

        if readable {
            let tex = gpu.create_texture(&shape, format, None)?;
            texture = Some(tex);

            let local = create_local_framebuffer(&mut *gpu, tex, &filter);
            match local {
                Ok(fb) => framebuffer = Some(fb),
                Err(e) => {
                    gpu.delete_texture(tex);
                    return Err(e);
                }
            }
        }

        let requested_samples = settings.msaa;
        let mut actual_samples = requested_samples.min(gpu.capabilities().max_samples);
        if actual_samples == 1 {
            actual_samples = 0;
        }

        let mut renderbuffer = None;
        if !readable || actual_samples > 0 {
            match gpu.create_renderbuffer(format, pixel_width, pixel_height, actual_samples) {
                Ok((rb, samples)) => {
                    if samples != actual_samples {
                        log::warn!("Canvas MSAA clamped from {actual_samples} to {samples}");
                    }
                    actual_samples = if samples > 1 { samples } else { 0 };
                    renderbuffer = Some(rb);
                }
                Err(e) => {
                    if let Some(fb) = framebuffer {
                        gpu.delete_framebuffer(fb);
                    }
                    if let Some(tex) = texture {
                        gpu.delete_texture(tex);
                    }
                    return Err(e.into());
                }
            }
        }

        let mut texture_memory = format.bytes_per_pixel() * shape.texel_count();
        if actual_samples > 0 && readable {
            texture_memory += texture_memory * actual_samples as usize;
        } else if actual_samples > 0 {
            texture_memory *= actual_samples as usize;
        }

        drop(gpu);

        {
            let mut reg = registry.borrow_mut();
            reg.live += 1;
            reg.texture_memory += texture_memory;
        }

        log::info!(
            "Created canvas {}: {}x{} {} {:?}, msaa {}",
            id.0,
            pixel_width,
            pixel_height,
            settings.kind.name(),
            format,
            actual_samples
        );

        Ok(Self {
            id,
            backend,
            registry,
            shape,
            width: settings.width,
            height: settings.height,
            pixel_density: settings.pixel_density,
            format,
            readable,
            texture,
            framebuffer,
            renderbuffer,
            requested_samples,
            actual_samples,
            texture_memory,
            filter: Cell::new(filter),
            active: Cell::new(false),
        })
    }

    /// Identity used by the framebuffer cache
    pub const fn id(&self) -> CanvasId {
        self.id
    }

    /// Width in logical pixels
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in logical pixels
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width in pixels
    pub const fn pixel_width(&self) -> u32 {
        self.shape.width()
    }

    /// Height in pixels
    pub const fn pixel_height(&self) -> u32 {
        self.shape.height()
    }

    /// Pixels per logical pixel
    pub const fn pixel_density(&self) -> f32 {
        self.pixel_density
    }

    /// Texture topology
    pub const fn kind(&self) -> TextureKind {
        self.shape.kind()
    }

    /// Sized pixel format
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether the canvas has a sampled texture
    pub const fn is_readable(&self) -> bool {
        self.readable
    }

    /// MSAA sample count asked for at creation
    pub const fn requested_msaa(&self) -> u32 {
        self.requested_samples
    }

    /// MSAA sample count actually allocated (0 when disabled)
    pub const fn msaa(&self) -> u32 {
        self.actual_samples
    }

    /// Bytes of GPU memory attributed to this canvas
    pub const fn texture_memory(&self) -> usize {
        self.texture_memory
    }

    /// Sampled texture, if readable
    pub const fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// Canvas-local framebuffer, if readable
    pub const fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    /// Whether a pass is currently rendering into this canvas
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    /// The image a pass attaches when rendering into this canvas
    pub fn render_attachment(&self) -> Option<RenderAttachment> {
        match (self.texture, self.renderbuffer) {
            (_, Some(rb)) if self.actual_samples > 0 => Some(RenderAttachment::Renderbuffer(rb)),
            (Some(tex), _) => Some(RenderAttachment::Texture(tex)),
            (None, Some(rb)) => Some(RenderAttachment::Renderbuffer(rb)),
            (None, None) => None,
        }
    }

    /// Sampling filter
    pub fn filter(&self) -> Filter {
        self.filter.get()
    }

    /// Change the sampling filter; canvases have no mipmaps
    pub fn set_filter(&self, filter: Filter) -> GraphicsResult<()> {
        if !filter.is_valid(false) {
            return Err(GraphicsError::InvalidFilter);
        }
        if let Some(tex) = self.texture {
            self.backend.borrow_mut().set_texture_filter(tex, &filter)?;
        }
        self.filter.set(filter);
        Ok(())
    }

    /// Read back a rectangle of the canvas
    ///
    /// Fails for non-readable canvases, rectangles outside the canvas and
    /// canvases a pass is currently drawing into.
    pub fn new_image_data(&self, rect: Rect) -> GraphicsResult<DynamicImage> {
        let framebuffer = match (self.readable, self.framebuffer) {
            (true, Some(fb)) => fb,
            _ => return Err(GraphicsError::CanvasNotReadable),
        };

        if !rect.fits_within(self.pixel_width(), self.pixel_height()) {
            return Err(GraphicsError::InvalidRectangle);
        }

        if self.is_active() {
            return Err(GraphicsError::CanvasActive);
        }

        let format = self.format.readback_format();
        let bytes = self
            .backend
            .borrow_mut()
            .read_pixels(Some(framebuffer), 0, rect, format)?;
        image_from_readback(format, rect.w as u32, rect.h as u32, bytes)
    }
}

/// Create the readback framebuffer around a fresh texture and clear it to transparent black
fn create_local_framebuffer(
    gpu: &mut dyn GraphicsBackend,
    texture: TextureHandle,
    filter: &Filter,
) -> GraphicsResult<FramebufferHandle> {
    gpu.set_texture_filter(texture, filter)?;

    let previous = gpu.bound_framebuffer();
    let fb = gpu.create_framebuffer()?;
    gpu.bind_framebuffer(FramebufferTarget::All, Some(fb));

    let status = match gpu.attach_texture(fb, Attachment::Color(0), texture) {
        Ok(()) => gpu.framebuffer_status(fb),
        Err(_) => FramebufferStatus::IncompleteAttachment,
    };

    if status == FramebufferStatus::Complete {
        gpu.clear(ClearRequest {
            color: Some(Colorf::TRANSPARENT),
            depth_stencil: false,
        })?;
    }

    gpu.bind_framebuffer(FramebufferTarget::All, previous);

    if status != FramebufferStatus::Complete {
        gpu.delete_framebuffer(fb);
        return Err(GraphicsError::FramebufferIncomplete(status));
    }

    Ok(fb)
}

impl Drop for Canvas {
    fn drop(&mut self) {
        match self.backend.try_borrow_mut() {
            Ok(mut gpu) => {
                if let Some(fb) = self.framebuffer.take() {
                    gpu.delete_framebuffer(fb);
                }
                if let Some(rb) = self.renderbuffer.take() {
                    gpu.delete_renderbuffer(rb);
                }
                if let Some(tex) = self.texture.take() {
                    gpu.delete_texture(tex);
                }
            }
            Err(_) => log::warn!("Backend busy while dropping canvas {}; GPU objects leaked", self.id.0),
        }

        if let Ok(mut reg) = self.registry.try_borrow_mut() {
            reg.live = reg.live.saturating_sub(1);
            reg.texture_memory = reg.texture_memory.saturating_sub(self.texture_memory);
            reg.graveyard.push(self.id);
        }
    }
}
