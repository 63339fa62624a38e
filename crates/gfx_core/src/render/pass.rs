//! Render passes and the framebuffer cache
//!
//! A pass targets either the default surface or a list of canvases. Canvas
//! passes bind a framebuffer object looked up by the exact target list, so
//! repeating a pass over the same canvases never creates GPU objects. Every
//! cached framebuffer gets a depth/stencil renderbuffer shared between all
//! framebuffers of the same size and sample count.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use image::DynamicImage;

use super::backend::{
    Attachment, ClearRequest, FramebufferHandle, FramebufferStatus, FramebufferTarget,
    GraphicsBackend, PixelFormat, Rect, RenderbufferHandle,
};
use super::canvas::{image_from_readback, Canvas, CanvasId, RenderAttachment};
use super::color::{gamma_correct, Colorf};
use super::{GraphicsError, GraphicsResult};

/// What happens to a target's contents when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BeginAction {
    /// Clear to a colour
    Clear(Colorf),
    /// Keep the existing contents
    #[default]
    Load,
}

/// One colour target of a pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    /// Canvas rendered into
    pub canvas: Rc<Canvas>,
    /// Begin action for this canvas
    pub action: BeginAction,
}

impl ColorAttachment {
    /// Render into `canvas`, clearing it first
    pub fn clear(canvas: Rc<Canvas>, color: Colorf) -> Self {
        Self { canvas, action: BeginAction::Clear(color) }
    }

    /// Render into `canvas`, keeping its contents
    pub const fn load(canvas: Rc<Canvas>) -> Self {
        Self { canvas, action: BeginAction::Load }
    }
}

/// Targets of a canvas pass
#[derive(Debug, Clone, Default)]
pub struct PassInfo {
    /// Colour targets, bound to sequential attachment slots
    pub attachments: Vec<ColorAttachment>,
    /// Whether stencil operations are allowed during the pass
    pub stencil: bool,
}

impl PassInfo {
    /// A pass over `attachments` without stencil
    pub fn new(attachments: Vec<ColorAttachment>) -> Self {
        Self { attachments, stencil: false }
    }

    /// Enable stencil for the pass
    #[must_use]
    pub const fn with_stencil(mut self) -> Self {
        self.stencil = true;
        self
    }
}

/// Readback of the first target, performed when a pass ends
pub struct Capture {
    /// Region in pixels
    pub rect: Rect,
    callback: Box<dyn FnOnce(Option<DynamicImage>)>,
}

impl Capture {
    /// Capture `rect`; the callback gets `None` if the capture can't be made
    pub fn new(rect: Rect, callback: impl FnOnce(Option<DynamicImage>) + 'static) -> Self {
        Self { rect, callback: Box::new(callback) }
    }

    fn deliver(self, image: Option<DynamicImage>) {
        (self.callback)(image);
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture").field("rect", &self.rect).finish_non_exhaustive()
    }
}

/// Structural cache key: exact target identities, in order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FramebufferKey {
    stencil: bool,
    targets: Vec<CanvasId>,
}

#[derive(Debug, Clone, Copy)]
struct StencilBuffer {
    width: u32,
    height: u32,
    samples: u32,
    renderbuffer: RenderbufferHandle,
    attachment: Attachment,
}

#[derive(Debug)]
enum ActivePass {
    Default,
    Canvases {
        info: PassInfo,
        framebuffer: FramebufferHandle,
    },
}

/// Pass state machine plus the framebuffer and stencil caches
#[derive(Debug, Default)]
pub struct RenderPassManager {
    active: Option<ActivePass>,
    framebuffers: HashMap<FramebufferKey, FramebufferHandle>,
    stencil_buffers: Vec<StencilBuffer>,
    pass_count: usize,
}

impl RenderPassManager {
    /// An idle manager with empty caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pass is active
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the active pass allows stencil operations
    pub fn has_stencil(&self) -> bool {
        match &self.active {
            Some(ActivePass::Default) => true,
            Some(ActivePass::Canvases { info, .. }) => info.stencil,
            None => false,
        }
    }

    /// Colour targets of the active canvas pass
    pub fn active_attachments(&self) -> &[ColorAttachment] {
        match &self.active {
            Some(ActivePass::Canvases { info, .. }) => &info.attachments,
            _ => &[],
        }
    }

    /// Passes begun since the last [`Self::reset_pass_count`]
    pub const fn pass_count(&self) -> usize {
        self.pass_count
    }

    /// Start a new frame's pass count
    pub fn reset_pass_count(&mut self) {
        self.pass_count = 0;
    }

    /// Framebuffers currently cached
    pub fn cached_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Shared depth/stencil renderbuffers currently cached
    pub fn stencil_buffer_count(&self) -> usize {
        self.stencil_buffers.len()
    }

    /// Begin a pass on the default surface
    ///
    /// Depth and stencil are always cleared; colour only for [`BeginAction::Clear`].
    pub fn begin_default(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        action: BeginAction,
        gamma: bool,
    ) -> GraphicsResult<()> {
        if self.active.is_some() {
            return Err(GraphicsError::PassAlreadyActive);
        }

        backend.bind_framebuffer(FramebufferTarget::All, None);
        let (width, height) = backend.default_surface_size();
        backend.set_viewport(width, height);

        if backend.capabilities().srgb_write_control {
            backend.set_framebuffer_srgb(gamma);
        }

        let color = match action {
            BeginAction::Clear(c) => Some(gamma_correct(c, gamma)),
            BeginAction::Load => None,
        };
        backend.clear(ClearRequest { color, depth_stencil: true })?;

        self.active = Some(ActivePass::Default);
        self.pass_count += 1;
        Ok(())
    }

    /// Begin a pass over the canvases in `info`
    ///
    /// Nothing is bound or created unless every target agrees on size,
    /// format and multisampling.
    pub fn begin(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        info: PassInfo,
        gamma: bool,
    ) -> GraphicsResult<()> {
        if info.attachments.is_empty() {
            return Err(GraphicsError::NoTargets);
        }

        if self.active.is_some() {
            return Err(GraphicsError::PassAlreadyActive);
        }

        let caps = backend.capabilities();
        let max = caps.max_render_targets as usize;
        let multi_format = caps.multi_format_targets && max > 1;

        if info.attachments.len() > max {
            return Err(GraphicsError::TooManyTargets { requested: info.attachments.len(), max });
        }

        let first = &info.attachments[0].canvas;
        for attachment in &info.attachments[1..] {
            let canvas = &attachment.canvas;
            if canvas.width() != first.width()
                || canvas.height() != first.height()
                || canvas.pixel_width() != first.pixel_width()
                || canvas.pixel_height() != first.pixel_height()
            {
                return Err(GraphicsError::DimensionMismatch);
            }
            if !multi_format && canvas.format() != first.format() {
                return Err(GraphicsError::FormatMismatch);
            }
            if canvas.requested_msaa() != first.requested_msaa() {
                return Err(GraphicsError::MsaaMismatch);
            }
        }

        let framebuffer = self.bind_cached_framebuffer(backend, &info)?;

        let (width, height) = (first.pixel_width(), first.pixel_height());
        backend.set_viewport(width, height);

        if backend.capabilities().srgb_write_control {
            let srgb = info.attachments.iter().any(|a| a.canvas.format() == PixelFormat::Srgba8);
            backend.set_framebuffer_srgb(srgb);
        }

        Self::clear_targets(backend, &info, framebuffer, gamma)?;

        for attachment in &info.attachments {
            attachment.canvas.set_active(true);
        }

        self.active = Some(ActivePass::Canvases { info, framebuffer });
        self.pass_count += 1;
        Ok(())
    }

    fn clear_targets(
        backend: &mut dyn GraphicsBackend,
        info: &PassInfo,
        framebuffer: FramebufferHandle,
        gamma: bool,
    ) -> GraphicsResult<()> {
        let mut request = ClearRequest { color: None, depth_stencil: info.stencil };

        if info.attachments.len() == 1 {
            if let BeginAction::Clear(c) = info.attachments[0].action {
                request.color = Some(gamma_correct(c, gamma));
            }
        } else {
            let indexed = backend.capabilities().indexed_clear;
            let mut draw_buffers_changed = false;

            for (i, attachment) in info.attachments.iter().enumerate() {
                let BeginAction::Clear(c) = attachment.action else {
                    continue;
                };
                let c = gamma_correct(c, gamma);

                if indexed {
                    backend.clear_color_buffer(i as u32, c)?;
                } else {
                    backend.set_draw_buffers(framebuffer, &[i as u32])?;
                    backend.clear(ClearRequest { color: Some(c), depth_stencil: false })?;
                    draw_buffers_changed = true;
                }
            }

            if draw_buffers_changed {
                let all: Vec<u32> = (0..info.attachments.len() as u32).collect();
                backend.set_draw_buffers(framebuffer, &all)?;
            }
        }

        if request.color.is_some() || request.depth_stencil {
            backend.clear(request)?;
        }
        Ok(())
    }

    fn bind_cached_framebuffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        info: &PassInfo,
    ) -> GraphicsResult<FramebufferHandle> {
        let key = FramebufferKey {
            stencil: info.stencil,
            targets: info.attachments.iter().map(|a| a.canvas.id()).collect(),
        };

        if let Some(&framebuffer) = self.framebuffers.get(&key) {
            backend.bind_framebuffer(FramebufferTarget::All, Some(framebuffer));
            return Ok(framebuffer);
        }

        let framebuffer = backend.create_framebuffer()?;
        backend.bind_framebuffer(FramebufferTarget::All, Some(framebuffer));

        match self.populate_framebuffer(backend, framebuffer, info) {
            Ok(()) => {
                log::debug!("Created framebuffer {} for {:?}", framebuffer.0, key);
                self.framebuffers.insert(key, framebuffer);
                Ok(framebuffer)
            }
            Err(e) => {
                backend.delete_framebuffer(framebuffer);
                Err(e)
            }
        }
    }

    fn populate_framebuffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        framebuffer: FramebufferHandle,
        info: &PassInfo,
    ) -> GraphicsResult<()> {
        for (i, attachment) in info.attachments.iter().enumerate() {
            let slot = Attachment::Color(i as u32);
            match attachment.canvas.render_attachment() {
                Some(RenderAttachment::Renderbuffer(rb)) => backend.attach_renderbuffer(framebuffer, slot, rb)?,
                Some(RenderAttachment::Texture(tex)) => backend.attach_texture(framebuffer, slot, tex)?,
                None => return Err(GraphicsError::FramebufferIncomplete(FramebufferStatus::MissingAttachment)),
            }
        }

        if info.attachments.len() > 1 {
            let buffers: Vec<u32> = (0..info.attachments.len() as u32).collect();
            backend.set_draw_buffers(framebuffer, &buffers)?;
        }

        let first = &info.attachments[0].canvas;
        let stencil = self
            .stencil_buffer(backend, first.pixel_width(), first.pixel_height(), first.msaa())
            .ok_or(GraphicsError::StencilBufferCreation)?;
        backend
            .attach_renderbuffer(framebuffer, stencil.attachment, stencil.renderbuffer)
            .map_err(|e| {
                log::warn!("Could not attach stencil buffer {}: {e}", stencil.renderbuffer.0);
                GraphicsError::StencilBufferCreation
            })?;

        match backend.framebuffer_status(framebuffer) {
            FramebufferStatus::Complete => Ok(()),
            status => Err(GraphicsError::FramebufferIncomplete(status)),
        }
    }

    /// Shared depth/stencil renderbuffer for a size and sample count, created on first use
    fn stencil_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
        samples: u32,
    ) -> Option<StencilBuffer> {
        let samples = if samples == 1 { 0 } else { samples };

        if let Some(buffer) = self
            .stencil_buffers
            .iter()
            .find(|b| b.width == width && b.height == height && b.samples == samples)
        {
            return Some(*buffer);
        }

        let (format, attachment) = if backend.capabilities().packed_depth_stencil {
            (PixelFormat::Depth24Stencil8, Attachment::DepthStencil)
        } else {
            (PixelFormat::Stencil8, Attachment::Stencil)
        };

        let (renderbuffer, _) = match backend.create_renderbuffer(format, width, height, samples) {
            Ok(created) => created,
            Err(e) => {
                log::warn!("Could not create {format:?} stencil buffer {width}x{height}: {e}");
                return None;
            }
        };
        log::debug!("Created {format:?} stencil buffer {width}x{height}, {samples} samples");

        let buffer = StencilBuffer { width, height, samples, renderbuffer, attachment };
        self.stencil_buffers.push(buffer);
        Some(buffer)
    }

    /// End the active pass, resolving multisampled targets and running `capture`
    ///
    /// Ending while idle does nothing. A capture that can't be made still ends
    /// the pass; its callback gets `None` and the error is returned.
    pub fn end(&mut self, backend: &mut dyn GraphicsBackend, capture: Option<Capture>) -> GraphicsResult<()> {
        let Some(pass) = self.active.take() else {
            if let Some(capture) = capture {
                capture.deliver(None);
            }
            return Ok(());
        };

        match pass {
            ActivePass::Default => match capture {
                Some(capture) => {
                    capture.deliver(None);
                    Err(GraphicsError::CaptureDefaultSurface)
                }
                None => Ok(()),
            },
            ActivePass::Canvases { info, framebuffer } => {
                let result = Self::finish_canvas_pass(backend, &info, framebuffer, capture);
                for attachment in &info.attachments {
                    attachment.canvas.set_active(false);
                }
                result
            }
        }
    }

    fn finish_canvas_pass(
        backend: &mut dyn GraphicsBackend,
        info: &PassInfo,
        framebuffer: FramebufferHandle,
        capture: Option<Capture>,
    ) -> GraphicsResult<()> {
        let first = &info.attachments[0].canvas;

        let valid_capture = capture
            .as_ref()
            .map_or(true, |c| c.rect.fits_within(first.pixel_width(), first.pixel_height()));

        let resolved = Self::resolve_targets(backend, info, framebuffer);

        let Some(capture) = capture else {
            return resolved;
        };

        let image = if valid_capture {
            resolved.and_then(|()| {
                let (source, attachment) = match first.framebuffer() {
                    Some(local) if first.msaa() > 0 => (local, 0),
                    _ => (framebuffer, 0),
                };
                let format = first.format().readback_format();
                let bytes = backend.read_pixels(Some(source), attachment, capture.rect, format)?;
                image_from_readback(format, capture.rect.w as u32, capture.rect.h as u32, bytes)
            })
        } else {
            Err(GraphicsError::InvalidRectangle)
        };

        match image {
            Ok(image) => {
                capture.deliver(Some(image));
                Ok(())
            }
            Err(e) => {
                capture.deliver(None);
                Err(e)
            }
        }
    }

    /// Copy each multisampled target into its canvas's sampled texture
    fn resolve_targets(
        backend: &mut dyn GraphicsBackend,
        info: &PassInfo,
        framebuffer: FramebufferHandle,
    ) -> GraphicsResult<()> {
        for (i, attachment) in info.attachments.iter().enumerate() {
            let canvas = &attachment.canvas;
            if canvas.msaa() == 0 {
                continue;
            }
            if let Some(local) = canvas.framebuffer() {
                backend.resolve_multisample(framebuffer, i as u32, local, canvas.pixel_width(), canvas.pixel_height())?;
            }
        }
        Ok(())
    }

    /// Delete cached framebuffers that reference any of `dead`
    pub fn evict(&mut self, backend: &mut dyn GraphicsBackend, dead: &[CanvasId]) {
        if dead.is_empty() {
            return;
        }

        self.framebuffers.retain(|key, framebuffer| {
            let stale = key.targets.iter().any(|id| dead.contains(id));
            if stale {
                log::debug!("Evicting framebuffer {} for released canvases", framebuffer.0);
                backend.delete_framebuffer(*framebuffer);
            }
            !stale
        });
    }

    /// Delete every cached GPU object
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, framebuffer) in self.framebuffers.drain() {
            backend.delete_framebuffer(framebuffer);
        }
        for buffer in self.stencil_buffers.drain(..) {
            backend.delete_renderbuffer(buffer.renderbuffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::render::backend::Capabilities;
    use crate::render::canvas::{CanvasRegistry, CanvasSettings};
    use crate::render::headless::HeadlessBackend;
    use crate::render::texture::Filter;

    struct Fixture {
        backend: Rc<RefCell<HeadlessBackend>>,
        registry: Rc<RefCell<CanvasRegistry>>,
        next_id: u64,
    }

    impl Fixture {
        fn new(backend: HeadlessBackend) -> Self {
            Self {
                backend: Rc::new(RefCell::new(backend)),
                registry: Rc::new(RefCell::new(CanvasRegistry::default())),
                next_id: 0,
            }
        }

        fn canvas(&mut self, settings: CanvasSettings) -> Rc<Canvas> {
            self.next_id += 1;
            Rc::new(
                Canvas::new(
                    self.backend.clone(),
                    self.registry.clone(),
                    CanvasId(self.next_id),
                    &settings,
                    false,
                    Filter::default(),
                )
                .unwrap(),
            )
        }
    }

    #[test]
    fn test_default_pass_clears_everything() {
        let fx = Fixture::new(HeadlessBackend::new(4, 4));
        let mut passes = RenderPassManager::new();
        let mut gpu = fx.backend.borrow_mut();

        passes
            .begin_default(&mut *gpu, BeginAction::Clear(Colorf::new(0.0, 1.0, 0.0, 1.0)), false)
            .unwrap();
        assert!(passes.is_active());
        assert!(passes.has_stencil());
        assert_eq!(gpu.stats().clears, 1);
        assert_eq!(gpu.surface_pixel(2, 2), Some(Colorf::new(0.0, 1.0, 0.0, 1.0)));
        assert_eq!(gpu.state().viewport, (4, 4));

        passes.end(&mut *gpu, None).unwrap();
        assert!(!passes.is_active());
        assert_eq!(passes.pass_count(), 1);
    }

    #[test]
    fn test_validation_order() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let a = fx.canvas(CanvasSettings::new(8, 8));
        let b = fx.canvas(CanvasSettings::new(8, 4));
        let c = fx.canvas(CanvasSettings { msaa: 4, ..CanvasSettings::new(8, 8) });
        let mut passes = RenderPassManager::new();
        let mut gpu = fx.backend.borrow_mut();

        assert!(matches!(
            passes.begin(&mut *gpu, PassInfo::default(), false),
            Err(GraphicsError::NoTargets)
        ));

        let mismatched = PassInfo::new(vec![ColorAttachment::load(a.clone()), ColorAttachment::load(b.clone())]);
        assert!(matches!(passes.begin(&mut *gpu, mismatched, false), Err(GraphicsError::DimensionMismatch)));

        let msaa = PassInfo::new(vec![ColorAttachment::load(a.clone()), ColorAttachment::load(c.clone())]);
        assert!(matches!(passes.begin(&mut *gpu, msaa, false), Err(GraphicsError::MsaaMismatch)));

        let nine = PassInfo::new(vec![ColorAttachment::load(a.clone()); 9]);
        assert!(matches!(
            passes.begin(&mut *gpu, nine, false),
            Err(GraphicsError::TooManyTargets { requested: 9, max: 8 })
        ));
        assert!(!passes.is_active());
        assert_eq!(passes.cached_framebuffer_count(), 0);
    }

    #[test]
    fn test_format_mismatch_needs_multi_format() {
        let caps = Capabilities { multi_format_targets: false, ..Capabilities::default() };
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4).with_capabilities(caps));
        let a = fx.canvas(CanvasSettings::new(8, 8));
        let b = fx.canvas(CanvasSettings { format: PixelFormat::Rgba16, ..CanvasSettings::new(8, 8) });
        let mut passes = RenderPassManager::new();
        let mut gpu = fx.backend.borrow_mut();

        let info = PassInfo::new(vec![ColorAttachment::load(a), ColorAttachment::load(b)]);
        assert!(matches!(passes.begin(&mut *gpu, info, false), Err(GraphicsError::FormatMismatch)));
    }

    #[test]
    fn test_multiple_targets_clear_individually() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let a = fx.canvas(CanvasSettings::new(2, 2));
        let b = fx.canvas(CanvasSettings::new(2, 2));
        let mut passes = RenderPassManager::new();
        let red = Colorf::new(1.0, 0.0, 0.0, 1.0);

        {
            let mut gpu = fx.backend.borrow_mut();
            let info = PassInfo::new(vec![ColorAttachment::clear(a.clone(), red), ColorAttachment::load(b.clone())]);
            passes.begin(&mut *gpu, info, false).unwrap();
            assert_eq!(gpu.stats().indexed_clears, 1);
            assert!(a.is_active() && b.is_active());
            passes.end(&mut *gpu, None).unwrap();
        }

        assert!(!a.is_active());
        let gpu = fx.backend.borrow();
        assert_eq!(gpu.texture_pixel(a.texture().unwrap(), 1, 1), Some(red));
        assert_eq!(gpu.texture_pixel(b.texture().unwrap(), 1, 1), Some(Colorf::TRANSPARENT));
    }

    #[test]
    fn test_clear_fallback_restores_draw_buffers() {
        let caps = Capabilities { indexed_clear: false, ..Capabilities::default() };
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4).with_capabilities(caps));
        let a = fx.canvas(CanvasSettings::new(2, 2));
        let b = fx.canvas(CanvasSettings::new(2, 2));
        let mut passes = RenderPassManager::new();
        let blue = Colorf::new(0.0, 0.0, 1.0, 1.0);
        let mut gpu = fx.backend.borrow_mut();

        let info = PassInfo::new(vec![ColorAttachment::clear(a.clone(), blue), ColorAttachment::clear(b.clone(), blue)]);
        passes.begin(&mut *gpu, info, false).unwrap();

        // One at creation, one per cleared target, one restore
        assert_eq!(gpu.stats().draw_buffer_changes, 4);
        assert_eq!(gpu.stats().indexed_clears, 0);
        assert_eq!(gpu.texture_pixel(b.texture().unwrap(), 0, 0), Some(blue));
    }

    #[test]
    fn test_stencil_buffer_shared_by_size() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let a = fx.canvas(CanvasSettings::new(8, 8));
        let b = fx.canvas(CanvasSettings::new(8, 8));
        let c = fx.canvas(CanvasSettings::new(16, 16));
        let mut passes = RenderPassManager::new();
        let mut gpu = fx.backend.borrow_mut();

        for canvas in [&a, &b, &c] {
            let info = PassInfo::new(vec![ColorAttachment::load(canvas.clone())]).with_stencil();
            passes.begin(&mut *gpu, info, false).unwrap();
            assert!(passes.has_stencil());
            passes.end(&mut *gpu, None).unwrap();
        }

        assert_eq!(passes.cached_framebuffer_count(), 3);
        assert_eq!(passes.stencil_buffer_count(), 2);
    }

    #[test]
    fn test_msaa_resolve_and_capture() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let canvas = fx.canvas(CanvasSettings { msaa: 4, ..CanvasSettings::new(4, 4) });
        let mut passes = RenderPassManager::new();
        let captured = Rc::new(RefCell::new(None));
        let mut gpu = fx.backend.borrow_mut();

        let info = PassInfo::new(vec![ColorAttachment::clear(canvas.clone(), Colorf::WHITE)]);
        passes.begin(&mut *gpu, info, false).unwrap();

        let sink = captured.clone();
        let capture = Capture::new(Rect::new(0, 0, 2, 2), move |image| *sink.borrow_mut() = image);
        passes.end(&mut *gpu, Some(capture)).unwrap();

        assert_eq!(gpu.stats().resolves, 1);
        assert_eq!(gpu.texture_pixel(canvas.texture().unwrap(), 3, 3), Some(Colorf::WHITE));

        let image = captured.borrow_mut().take().unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_bad_capture_still_ends_pass() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let canvas = fx.canvas(CanvasSettings::new(4, 4));
        let mut passes = RenderPassManager::new();
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let mut gpu = fx.backend.borrow_mut();

        passes
            .begin(&mut *gpu, PassInfo::new(vec![ColorAttachment::load(canvas.clone())]), false)
            .unwrap();
        let sink = delivered.clone();
        let capture = Capture::new(Rect::new(2, 2, 4, 4), move |image| sink.borrow_mut().push(image.is_some()));
        assert!(matches!(passes.end(&mut *gpu, Some(capture)), Err(GraphicsError::InvalidRectangle)));
        assert!(!passes.is_active());
        assert!(!canvas.is_active());

        passes.begin_default(&mut *gpu, BeginAction::Load, false).unwrap();
        let sink = delivered.clone();
        let capture = Capture::new(Rect::new(0, 0, 1, 1), move |image| sink.borrow_mut().push(image.is_some()));
        assert!(matches!(passes.end(&mut *gpu, Some(capture)), Err(GraphicsError::CaptureDefaultSurface)));

        assert_eq!(*delivered.borrow(), vec![false, false]);
    }

    #[test]
    fn test_evict_and_release() {
        let mut fx = Fixture::new(HeadlessBackend::new(4, 4));
        let a = fx.canvas(CanvasSettings::new(4, 4));
        let b = fx.canvas(CanvasSettings::new(4, 4));
        let mut passes = RenderPassManager::new();
        let mut gpu = fx.backend.borrow_mut();

        for canvas in [&a, &b] {
            passes
                .begin(&mut *gpu, PassInfo::new(vec![ColorAttachment::load(canvas.clone())]), false)
                .unwrap();
            passes.end(&mut *gpu, None).unwrap();
        }
        assert_eq!(passes.cached_framebuffer_count(), 2);

        passes.evict(&mut *gpu, &[a.id()]);
        assert_eq!(passes.cached_framebuffer_count(), 1);

        let before = gpu.framebuffer_count();
        passes.release(&mut *gpu);
        assert_eq!(passes.cached_framebuffer_count(), 0);
        assert_eq!(passes.stencil_buffer_count(), 0);
        assert_eq!(gpu.framebuffer_count(), before - 1);
    }
}
