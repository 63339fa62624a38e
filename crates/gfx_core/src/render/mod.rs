//! # Rendering Core
//!
//! [`Graphics`] is the subsystem object applications talk to. It owns the
//! render-pass manager with its framebuffer cache, the display-state and
//! transform stacks, pending screenshots and per-frame statistics. Fonts and
//! canvases are created through it and share its backend.
//!
//! ## Architecture
//!
//! - **Backend**: [`GraphicsBackend`] is the GPU seam; [`HeadlessBackend`]
//!   implements it in memory
//! - **Text**: [`text::Font`] owns a glyph atlas and shapes text into quads
//! - **Targets**: [`canvas::Canvas`] render targets drawn into by [`pass`] passes
//! - **State**: [`state::DisplayStateStack`] for push/pop of display state

pub mod backend;
pub mod canvas;
pub mod color;
pub mod headless;
pub mod pass;
pub mod state;
pub mod text;
pub mod texture;
pub mod vertex;


pub use backend::{GraphicsBackend, SharedBackend};
pub use headless::HeadlessBackend;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use image::RgbaImage;
use thiserror::Error;

use crate::config::{ConfigError, GraphicsConfig};
use crate::foundation::math::Transform2D;
use backend::{
    BackendError, ClearRequest, FramebufferStatus, PixelFormat, ReadbackFormat, Rect, ShaderHandle,
    StencilFunc, StencilOp, StencilState,
};
use canvas::{Canvas, CanvasId, CanvasRegistry, CanvasSettings};
use color::{gamma_correct, Colorf};
use pass::{BeginAction, Capture, PassInfo, RenderPassManager};
use state::{
    BlendAlpha, BlendMode, ColorMask, CompareMode, DisplayStateStack, LineJoin, LineStyle, StackType,
    StateChanges, StencilAction,
};
use text::{AlignMode, ColoredString, Font, FontError, GlyphSource, ShapedText};
use texture::{Filter, FilterMode};

/// Errors reported by the graphics subsystem
#[derive(Debug, Error)]
pub enum GraphicsError {
    /// The backend can't render to this format
    #[error("The {format:?} format is not supported by this system (readable: {readable})")]
    UnsupportedFormat {
        /// Sized format
        format: PixelFormat,
        /// Whether a sampled texture was asked for
        readable: bool,
    },

    /// A texture dimension exceeds the backend's limit
    #[error("Cannot create texture: {dimension} of {pixels} pixels is too large for this system")]
    TextureTooLarge {
        /// Which dimension
        dimension: &'static str,
        /// Requested size
        pixels: u32,
    },

    /// Zero or negative texture dimensions
    #[error("Texture dimensions must be greater than 0")]
    InvalidDimensions,

    /// Multisampling was asked for on a non-2D texture
    #[error("MSAA is only supported for 2D texture types")]
    MsaaRequiresFlatTexture,

    /// A non-readable canvas was asked for with a non-2D topology
    #[error("Non-readable pixel formats are only supported for 2D texture types")]
    NonReadableRequiresFlatTexture,

    /// Cube faces must be square
    #[error("Cubemap textures must have equal width and height")]
    CubeNotSquare,

    /// Readable depth/stencil canvases can't be multisampled
    #[error("Readable depth/stencil canvases with MSAA are not currently supported")]
    ReadableDepthMsaa,

    /// Targets of one pass differ in size
    #[error("All canvases in a render pass must have the same dimensions")]
    DimensionMismatch,

    /// Targets of one pass differ in format
    #[error("This system doesn't support multi-canvas rendering with different canvas formats")]
    FormatMismatch,

    /// Targets of one pass differ in multisample count
    #[error("All canvases in a render pass must have the same MSAA value")]
    MsaaMismatch,

    /// More targets than the backend can bind at once
    #[error("This system can't simultaneously render to {requested} canvases (maximum {max})")]
    TooManyTargets {
        /// Targets in the pass
        requested: usize,
        /// Backend limit
        max: usize,
    },

    /// The blend mode needs min/max blending
    #[error("The '{0:?}' blend mode is not supported on this system")]
    BlendModeUnsupported(BlendMode),

    /// The blend mode only works with premultiplied alpha
    #[error("The '{0:?}' blend mode must be used with premultiplied alpha")]
    BlendModeRequiresPremultiplied(BlendMode),

    /// Filter combination isn't valid for the texture
    #[error("Invalid texture filter")]
    InvalidFilter,

    /// `begin` while a pass is running
    #[error("Cannot begin a render pass while another is active")]
    PassAlreadyActive,

    /// A canvas pass with no targets
    #[error("A render pass needs at least one canvas")]
    NoTargets,

    /// Drawing with no pass active
    #[error("Drawing requires an active render pass")]
    DrawOutsidePass,

    /// Stencil use in a pass without stencil
    #[error("Stencil operations require a render pass with stencil enabled")]
    StencilNotEnabled,

    /// Too many nested pushes
    #[error("Maximum stack depth reached (more pushes than pops?)")]
    StackOverflow,

    /// Pop with nothing pushed
    #[error("Minimum stack depth reached (more pops than pushes?)")]
    StackUnderflow,

    /// `present` while a pass is running
    #[error("present cannot be called while a render pass is active")]
    PresentDuringPass,

    /// Screenshot requested after main-surface rendering began this frame
    #[error("captureScreenshot cannot be called once rendering to the main screen has begun")]
    ScreenshotUnavailable,

    /// Pass capture aimed at the default surface
    #[error("Pass captures can't read the main screen; use capture_screenshot instead")]
    CaptureDefaultSurface,

    /// Readback from a canvas a pass is drawing into
    #[error("Canvas:newImageData cannot be called while that Canvas is currently active")]
    CanvasActive,

    /// Readback from a canvas without a sampled texture
    #[error("Canvas:newImageData cannot be called on non-readable Canvases")]
    CanvasNotReadable,

    /// Rectangle outside its target
    #[error("Invalid rectangle dimensions")]
    InvalidRectangle,

    /// Text drawing with no font set and no default
    #[error("No font is active and no default glyph source is configured")]
    NoActiveFont,

    /// A framebuffer failed its completeness check
    #[error("Cannot create framebuffer: {0}")]
    FramebufferIncomplete(FramebufferStatus),

    /// The shared depth/stencil renderbuffer couldn't be made
    #[error("Could not create stencil buffer")]
    StencilBufferCreation,

    /// Backend failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Font failure
    #[error("Font error: {0}")]
    Font(#[from] FontError),

    /// Bad configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// CPU allocation failure
    #[error("Out of memory")]
    OutOfMemory,
}

/// Result type for graphics operations
pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Per-frame and resource statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphicsStats {
    /// Draw calls since the last present
    pub draw_calls: usize,
    /// Passes begun since the last present
    pub render_passes: usize,
    /// Live fonts
    pub fonts: usize,
    /// Live canvases
    pub canvases: usize,
    /// Bytes of texture memory held by canvases and font atlases
    pub texture_memory: usize,
}

/// Queryable system limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Largest point size
    PointSize,
    /// Largest 2D texture dimension
    TextureSize,
    /// Most canvases in one pass
    MultiCanvas,
    /// Most MSAA samples for a canvas
    CanvasMsaa,
    /// Largest anisotropy level
    Anisotropy,
}

/// Optional features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Passes can mix canvas formats
    MultiCanvasFormats,
    /// Clamp-to-zero texture wrapping
    ClampZero,
    /// Lighten and darken blend modes
    Lighten,
    /// Unrestricted non-power-of-two textures
    FullNpot,
}

/// # Graphics
///
/// One graphics subsystem: everything a frame of drawing needs besides the
/// backend itself. Single-threaded; fonts and canvases hold the same
/// [`SharedBackend`] and release their GPU objects when dropped.
pub struct Graphics {
    backend: SharedBackend,
    config: GraphicsConfig,
    passes: RenderPassManager,

    states: DisplayStateStack,
    stack_types: Vec<StackType>,
    transforms: Vec<Transform2D>,
    pixel_scales: Vec<f32>,

    canvases: Rc<RefCell<CanvasRegistry>>,
    next_canvas_id: u64,
    fonts: Vec<Weak<RefCell<Font>>>,
    default_font: Option<Rc<RefCell<Font>>>,
    default_font_source: Option<Rc<dyn GlyphSource>>,

    pending_screenshots: Vec<Box<dyn FnOnce(RgbaImage)>>,
    can_capture_screenshot: bool,
    writing_to_stencil: bool,
    draw_calls: usize,
}

impl Graphics {
    /// Create a subsystem over `backend`
    pub fn new(backend: SharedBackend, config: GraphicsConfig) -> GraphicsResult<Self> {
        config.validate()?;

        {
            let gpu = backend.borrow();
            let caps = gpu.capabilities();
            log::info!(
                "Graphics created: max texture {}, {} render targets, {}x MSAA, gamma correct {}",
                caps.max_texture_size,
                caps.max_render_targets,
                caps.max_samples,
                config.gamma_correct
            );
        }

        let mut graphics = Self {
            backend,
            config,
            passes: RenderPassManager::new(),
            states: DisplayStateStack::new(),
            stack_types: Vec::new(),
            transforms: vec![Transform2D::identity()],
            pixel_scales: vec![1.0],
            canvases: Rc::new(RefCell::new(CanvasRegistry::default())),
            next_canvas_id: 0,
            fonts: Vec::new(),
            default_font: None,
            default_font_source: None,
            pending_screenshots: Vec::new(),
            can_capture_screenshot: true,
            writing_to_stencil: false,
            draw_calls: 0,
        };

        graphics.apply_state(StateChanges::all());
        Ok(graphics)
    }

    /// The backend shared with fonts and canvases
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Configuration the subsystem was created with
    pub const fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    /// Whether colours are converted to linear space
    pub const fn is_gamma_correct(&self) -> bool {
        self.config.gamma_correct
    }

    // === Resources ===

    /// Create a font over `source`, using the default texture filter
    pub fn new_font(&mut self, source: Rc<dyn GlyphSource>) -> GraphicsResult<Rc<RefCell<Font>>> {
        let filter = self.states.current().default_filter;
        let font = Font::new(
            self.backend.clone(),
            source,
            &self.config.font,
            filter,
            self.config.gamma_correct,
        )?;

        let font = Rc::new(RefCell::new(font));
        self.fonts.retain(|f| f.strong_count() > 0);
        self.fonts.push(Rc::downgrade(&font));
        Ok(font)
    }

    /// Create a canvas, using the default texture filter
    pub fn new_canvas(&mut self, settings: &CanvasSettings) -> GraphicsResult<Rc<Canvas>> {
        self.next_canvas_id += 1;
        let filter = self.states.current().default_filter;
        let canvas = Canvas::new(
            self.backend.clone(),
            self.canvases.clone(),
            CanvasId(self.next_canvas_id),
            settings,
            self.config.gamma_correct,
            filter,
        )?;
        Ok(Rc::new(canvas))
    }

    /// Glyph source used to build a font when text is drawn with none set
    pub fn set_default_font_source(&mut self, source: Option<Rc<dyn GlyphSource>>) {
        self.default_font_source = source;
        self.default_font = None;
    }

    // === Passes ===

    /// Begin a pass on the default surface
    pub fn begin_default_pass(&mut self, action: BeginAction) -> GraphicsResult<()> {
        let gamma = self.config.gamma_correct;
        self.passes.begin_default(&mut *self.backend.borrow_mut(), action, gamma)?;
        self.can_capture_screenshot = false;
        Ok(())
    }

    /// Begin a pass over canvases
    pub fn begin_pass(&mut self, info: PassInfo) -> GraphicsResult<()> {
        // Targets may be the last owners; they must not drop while the backend is borrowed
        let targets: Vec<Rc<Canvas>> = info.attachments.iter().map(|a| a.canvas.clone()).collect();
        let dead: Vec<CanvasId> = std::mem::take(&mut self.canvases.borrow_mut().graveyard);
        let gamma = self.config.gamma_correct;

        let result = {
            let mut gpu = self.backend.borrow_mut();
            self.passes.evict(&mut *gpu, &dead);
            self.passes.begin(&mut *gpu, info, gamma)
        };

        drop(targets);
        result
    }

    /// End the active pass; does nothing when idle
    pub fn end_pass(&mut self) -> GraphicsResult<()> {
        self.finish_pass(None)
    }

    /// End the active pass and read back part of its first target
    pub fn end_pass_with_capture(&mut self, capture: Capture) -> GraphicsResult<()> {
        self.finish_pass(Some(capture))
    }

    fn finish_pass(&mut self, capture: Option<Capture>) -> GraphicsResult<()> {
        let targets: Vec<Rc<Canvas>> =
            self.passes.active_attachments().iter().map(|a| a.canvas.clone()).collect();

        let result = self.passes.end(&mut *self.backend.borrow_mut(), capture);
        self.writing_to_stencil = false;

        drop(targets);
        result
    }

    /// Whether a pass is active
    pub const fn is_pass_active(&self) -> bool {
        self.passes.is_active()
    }

    /// Queue a screenshot of the default surface, taken at the next [`Self::present`]
    pub fn capture_screenshot(&mut self, callback: impl FnOnce(RgbaImage) + 'static) -> GraphicsResult<()> {
        if !self.can_capture_screenshot {
            return Err(GraphicsError::ScreenshotUnavailable);
        }
        self.pending_screenshots.push(Box::new(callback));
        Ok(())
    }

    /// Deliver pending screenshots, swap buffers and start a new frame
    pub fn present(&mut self) -> GraphicsResult<()> {
        if self.passes.is_active() {
            return Err(GraphicsError::PresentDuringPass);
        }

        let pending = std::mem::take(&mut self.pending_screenshots);
        if !pending.is_empty() {
            let screenshot = self.read_screen()?;
            for callback in pending {
                callback(screenshot.clone());
            }
        }

        self.backend.borrow_mut().swap_buffers();

        self.draw_calls = 0;
        self.passes.reset_pass_count();
        self.can_capture_screenshot = true;
        Ok(())
    }

    fn read_screen(&self) -> GraphicsResult<RgbaImage> {
        let mut gpu = self.backend.borrow_mut();
        let (width, height) = gpu.default_surface_size();
        gpu.bind_framebuffer(backend::FramebufferTarget::All, None);

        let mut pixels = gpu.read_pixels(
            None,
            0,
            Rect::new(0, 0, width as i32, height as i32),
            ReadbackFormat::Rgba8,
        )?;

        // Screenshots are always opaque
        for px in pixels.chunks_exact_mut(4) {
            px[3] = 255;
        }

        let mut image = RgbaImage::from_raw(width, height, pixels).ok_or(GraphicsError::OutOfMemory)?;
        image::imageops::flip_vertical_in_place(&mut image);
        Ok(image)
    }

    // === Text ===

    fn active_font(&mut self) -> GraphicsResult<Rc<RefCell<Font>>> {
        if let Some(font) = &self.states.current().font {
            return Ok(font.clone());
        }
        if let Some(font) = &self.default_font {
            return Ok(font.clone());
        }

        let source = self.default_font_source.clone().ok_or(GraphicsError::NoActiveFont)?;
        let font = self.new_font(source)?;
        self.default_font = Some(font.clone());
        Ok(font)
    }

    /// Draw text on one line (newlines start new lines)
    pub fn print(&mut self, text: &[ColoredString], transform: &Transform2D) -> GraphicsResult<()> {
        if !self.passes.is_active() {
            return Err(GraphicsError::DrawOutsidePass);
        }

        let font = self.active_font()?;
        let shaped = font.borrow_mut().shape(text, Colorf::WHITE)?;
        self.submit_text(shaped, transform)
    }

    /// Draw text wrapped to `wrap` pixels and aligned
    pub fn printf(
        &mut self,
        text: &[ColoredString],
        wrap: f32,
        align: AlignMode,
        transform: &Transform2D,
    ) -> GraphicsResult<()> {
        if !self.passes.is_active() {
            return Err(GraphicsError::DrawOutsidePass);
        }

        let font = self.active_font()?;
        let shaped = font.borrow_mut().shape_formatted(text, Colorf::WHITE, wrap, align)?;
        self.submit_text(shaped, transform)
    }

    fn submit_text(&mut self, mut shaped: ShapedText, transform: &Transform2D) -> GraphicsResult<()> {
        let matrix = self.transform().then(transform);
        for vertex in &mut shaped.vertices {
            let (x, y) = matrix.transform_point(vertex.x, vertex.y);
            vertex.x = x;
            vertex.y = y;
        }

        let mut gpu = self.backend.borrow_mut();
        for command in &shaped.commands {
            let range = command.start_vertex..command.start_vertex + command.vertex_count;
            gpu.draw_quads(command.texture, &shaped.vertices[range])?;
            self.draw_calls += 1;
        }
        Ok(())
    }

    // === Display state ===

    fn stencil_state(compare: CompareMode, value: i32) -> Option<StencilState> {
        (compare != CompareMode::Always).then(|| StencilState {
            func: compare.to_stencil_func(),
            reference: value,
            pass_op: StencilOp::Keep,
        })
    }

    /// Push the parts of the live state named in `changes` to the backend
    fn apply_state(&mut self, changes: StateChanges) {
        let gamma = self.config.gamma_correct;
        let state = self.states.current();
        let mut gpu = self.backend.borrow_mut();

        if changes.contains(StateChanges::COLOR) {
            gpu.set_constant_color(gamma_correct(state.color, gamma));
        }
        if changes.contains(StateChanges::BLEND) {
            gpu.set_blend_state(state.blend_mode.blend_state(state.blend_alpha));
        }
        if changes.contains(StateChanges::POINT_SIZE) {
            gpu.set_point_size(state.point_size);
        }
        if changes.contains(StateChanges::SCISSOR) {
            gpu.set_scissor(state.scissor);
        }
        if changes.contains(StateChanges::STENCIL) && !self.writing_to_stencil {
            gpu.set_stencil(Self::stencil_state(state.stencil_compare, state.stencil_value));
        }
        if changes.contains(StateChanges::SHADER) {
            gpu.use_shader(state.shader);
        }
        if changes.contains(StateChanges::COLOR_MASK) && !self.writing_to_stencil {
            gpu.set_color_mask(state.color_mask);
        }
        if changes.contains(StateChanges::WIREFRAME) {
            gpu.set_wireframe(state.wireframe);
        }
    }

    /// Restore the default state and the identity transform
    pub fn reset(&mut self) {
        let changes = self.states.reset_current();
        self.apply_state(changes);
        self.origin();
    }

    /// Set the foreground colour
    pub fn set_color(&mut self, color: Colorf) {
        self.states.current_mut().color = color;
        self.apply_state(StateChanges::COLOR);
    }

    /// Foreground colour
    pub fn color(&self) -> Colorf {
        self.states.current().color
    }

    /// Set the background colour
    pub fn set_background_color(&mut self, color: Colorf) {
        self.states.current_mut().background_color = color;
    }

    /// Background colour
    pub fn background_color(&self) -> Colorf {
        self.states.current().background_color
    }

    /// Set the blend mode
    pub fn set_blend_mode(&mut self, mode: BlendMode, alpha: BlendAlpha) -> GraphicsResult<()> {
        if mode.needs_minmax() && !self.backend.borrow().capabilities().blend_minmax {
            return Err(GraphicsError::BlendModeUnsupported(mode));
        }
        if mode.requires_premultiplied() && alpha == BlendAlpha::Multiply {
            return Err(GraphicsError::BlendModeRequiresPremultiplied(mode));
        }

        let state = self.states.current_mut();
        state.blend_mode = mode;
        state.blend_alpha = alpha;
        self.apply_state(StateChanges::BLEND);
        Ok(())
    }

    /// Blend mode and alpha mode
    pub fn blend_mode(&self) -> (BlendMode, BlendAlpha) {
        let state = self.states.current();
        (state.blend_mode, state.blend_alpha)
    }

    /// Set the line width
    pub fn set_line_width(&mut self, width: f32) {
        self.states.current_mut().line_width = width;
    }

    /// Line width
    pub fn line_width(&self) -> f32 {
        self.states.current().line_width
    }

    /// Set the line style
    pub fn set_line_style(&mut self, style: LineStyle) {
        self.states.current_mut().line_style = style;
    }

    /// Line style
    pub fn line_style(&self) -> LineStyle {
        self.states.current().line_style
    }

    /// Set the line join
    pub fn set_line_join(&mut self, join: LineJoin) {
        self.states.current_mut().line_join = join;
    }

    /// Line join
    pub fn line_join(&self) -> LineJoin {
        self.states.current().line_join
    }

    /// Set the point size
    pub fn set_point_size(&mut self, size: f32) {
        self.states.current_mut().point_size = size;
        self.apply_state(StateChanges::POINT_SIZE);
    }

    /// Point size
    pub fn point_size(&self) -> f32 {
        self.states.current().point_size
    }

    /// Restrict drawing to `rect`
    pub fn set_scissor(&mut self, rect: Rect) {
        self.states.current_mut().scissor = Some(rect);
        self.apply_state(StateChanges::SCISSOR);
    }

    /// Restrict drawing to the intersection of `rect` and the current scissor
    pub fn intersect_scissor(&mut self, rect: Rect) {
        let current = self
            .states
            .current()
            .scissor
            .unwrap_or_else(|| Rect::new(0, 0, i32::MAX, i32::MAX));

        let x1 = i64::from(current.x).max(i64::from(rect.x));
        let y1 = i64::from(current.y).max(i64::from(rect.y));
        let x2 = (i64::from(current.x) + i64::from(current.w)).min(i64::from(rect.x) + i64::from(rect.w));
        let y2 = (i64::from(current.y) + i64::from(current.h)).min(i64::from(rect.y) + i64::from(rect.h));

        let clipped = Rect::new(x1 as i32, y1 as i32, (x2 - x1).max(0) as i32, (y2 - y1).max(0) as i32);
        self.set_scissor(clipped);
    }

    /// Remove the scissor
    pub fn clear_scissor(&mut self) {
        self.states.current_mut().scissor = None;
        self.apply_state(StateChanges::SCISSOR);
    }

    /// Scissor rectangle
    pub fn scissor(&self) -> Option<Rect> {
        self.states.current().scissor
    }

    /// Start writing to the stencil buffer instead of the colour targets
    pub fn draw_to_stencil_buffer(&mut self, action: StencilAction, value: i32) -> GraphicsResult<()> {
        if !self.passes.is_active() {
            return Err(GraphicsError::DrawOutsidePass);
        }
        if !self.passes.has_stencil() {
            return Err(GraphicsError::StencilNotEnabled);
        }

        self.writing_to_stencil = true;
        let mut gpu = self.backend.borrow_mut();
        gpu.set_color_mask(ColorMask::empty());
        gpu.set_stencil(Some(StencilState {
            func: StencilFunc::Always,
            reference: value,
            pass_op: action.to_stencil_op(),
        }));
        Ok(())
    }

    /// Return to drawing into the colour targets
    pub fn stop_draw_to_stencil_buffer(&mut self) {
        if !self.writing_to_stencil {
            return;
        }
        self.writing_to_stencil = false;
        self.apply_state(StateChanges::COLOR_MASK | StateChanges::STENCIL);
    }

    /// Only draw where `value COMPARE stored` holds
    pub fn set_stencil_test(&mut self, compare: CompareMode, value: i32) -> GraphicsResult<()> {
        if compare != CompareMode::Always && self.passes.is_active() && !self.passes.has_stencil() {
            return Err(GraphicsError::StencilNotEnabled);
        }

        let state = self.states.current_mut();
        state.stencil_compare = compare;
        state.stencil_value = value;
        self.apply_state(StateChanges::STENCIL);
        Ok(())
    }

    /// Disable the stencil test
    pub fn clear_stencil_test(&mut self) {
        let state = self.states.current_mut();
        state.stencil_compare = CompareMode::Always;
        state.stencil_value = 0;
        self.apply_state(StateChanges::STENCIL);
    }

    /// Stencil comparison and reference value
    pub fn stencil_test(&self) -> (CompareMode, i32) {
        let state = self.states.current();
        (state.stencil_compare, state.stencil_value)
    }

    /// Reset the stencil buffer of the active pass to 0
    pub fn clear_stencil(&mut self) -> GraphicsResult<()> {
        if !self.passes.is_active() {
            return Err(GraphicsError::DrawOutsidePass);
        }
        if !self.passes.has_stencil() {
            return Err(GraphicsError::StencilNotEnabled);
        }
        self.backend
            .borrow_mut()
            .clear(ClearRequest { color: None, depth_stencil: true })?;
        Ok(())
    }

    /// Set the font used by [`Self::print`]
    pub fn set_font(&mut self, font: Option<Rc<RefCell<Font>>>) {
        self.states.current_mut().font = font;
    }

    /// Active font
    pub fn font(&self) -> Option<Rc<RefCell<Font>>> {
        self.states.current().font.clone()
    }

    /// Set the shader program
    pub fn set_shader(&mut self, shader: Option<ShaderHandle>) {
        self.states.current_mut().shader = shader;
        self.apply_state(StateChanges::SHADER);
    }

    /// Active shader program
    pub fn shader(&self) -> Option<ShaderHandle> {
        self.states.current().shader
    }

    /// Set which colour channels draws write
    pub fn set_color_mask(&mut self, mask: ColorMask) {
        self.states.current_mut().color_mask = mask;
        self.apply_state(StateChanges::COLOR_MASK);
    }

    /// Colour write mask
    pub fn color_mask(&self) -> ColorMask {
        self.states.current().color_mask
    }

    /// Toggle wireframe rasterisation; ignored when unsupported
    pub fn set_wireframe(&mut self, enable: bool) {
        if !self.backend.borrow().capabilities().wireframe {
            return;
        }
        self.states.current_mut().wireframe = enable;
        self.apply_state(StateChanges::WIREFRAME);
    }

    /// Whether wireframe rasterisation is on
    pub fn is_wireframe(&self) -> bool {
        self.states.current().wireframe
    }

    /// Set the filter given to new fonts and canvases
    pub fn set_default_filter(&mut self, filter: Filter) -> GraphicsResult<()> {
        if !filter.is_valid(false) {
            return Err(GraphicsError::InvalidFilter);
        }
        self.states.current_mut().default_filter = filter;
        Ok(())
    }

    /// Filter given to new fonts and canvases
    pub fn default_filter(&self) -> Filter {
        self.states.current().default_filter
    }

    /// Set the mipmap filter and sharpness given to new textures
    pub fn set_default_mipmap_filter(&mut self, filter: FilterMode, sharpness: f32) {
        let state = self.states.current_mut();
        state.default_mipmap_filter = filter;
        state.default_mipmap_sharpness = sharpness;
    }

    /// Mipmap filter and sharpness given to new textures
    pub fn default_mipmap_filter(&self) -> (FilterMode, f32) {
        let state = self.states.current();
        (state.default_mipmap_filter, state.default_mipmap_sharpness)
    }

    // === Transform stack ===

    fn current_transform_mut(&mut self) -> &mut Transform2D {
        let top = self.transforms.len() - 1;
        &mut self.transforms[top]
    }

    fn current_pixel_scale_mut(&mut self) -> &mut f32 {
        let top = self.pixel_scales.len() - 1;
        &mut self.pixel_scales[top]
    }

    /// Save the transform, and with [`StackType::All`] the display state too
    pub fn push(&mut self, stack_type: StackType) -> GraphicsResult<()> {
        if self.stack_types.len() >= self.config.max_stack_depth {
            return Err(GraphicsError::StackOverflow);
        }

        let transform = self.transform();
        let pixel_scale = self.pixel_scale();
        self.transforms.push(transform);
        self.pixel_scales.push(pixel_scale);

        if stack_type == StackType::All {
            self.states.push();
        }
        self.stack_types.push(stack_type);
        Ok(())
    }

    /// Restore what the matching [`Self::push`] saved
    pub fn pop(&mut self) -> GraphicsResult<()> {
        let stack_type = self.stack_types.pop().ok_or(GraphicsError::StackUnderflow)?;

        self.transforms.pop();
        self.pixel_scales.pop();

        if stack_type == StackType::All {
            if let Some(changes) = self.states.pop() {
                self.apply_state(changes);
            }
        }
        Ok(())
    }

    /// Current transform
    pub fn transform(&self) -> Transform2D {
        self.transforms.last().copied().unwrap_or_default()
    }

    /// Approximate scale of the current transform
    pub fn pixel_scale(&self) -> f32 {
        self.pixel_scales.last().copied().unwrap_or(1.0)
    }

    /// Rotate the coordinate system
    pub fn rotate(&mut self, angle: f32) {
        self.current_transform_mut().rotate(angle);
    }

    /// Scale the coordinate system
    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.current_transform_mut().scale(sx, sy);
        *self.current_pixel_scale_mut() *= (sx.abs() + sy.abs()) / 2.0;
    }

    /// Move the origin
    pub fn translate(&mut self, x: f32, y: f32) {
        self.current_transform_mut().translate(x, y);
    }

    /// Shear the coordinate system
    pub fn shear(&mut self, kx: f32, ky: f32) {
        self.current_transform_mut().shear(kx, ky);
    }

    /// Reset the current transform to identity
    pub fn origin(&mut self) {
        self.current_transform_mut().set_identity();
        *self.current_pixel_scale_mut() = 1.0;
    }

    /// Multiply `transform` into the current transform
    pub fn apply_transform(&mut self, transform: &Transform2D) {
        let combined = self.transform().then(transform);
        self.replace_transform(&combined);
    }

    /// Replace the current transform
    pub fn replace_transform(&mut self, transform: &Transform2D) {
        *self.current_transform_mut() = *transform;
        let (sx, sy) = transform.approximate_scale();
        *self.current_pixel_scale_mut() = (sx + sy) / 2.0;
    }

    /// Map a point from local to global coordinates
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        self.transform().transform_point(x, y)
    }

    /// Map a point from global to local coordinates; `None` for a singular transform
    pub fn inverse_transform_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        self.transform().inverse().map(|t| t.transform_point(x, y))
    }

    /// Number of pushes not yet popped
    pub fn stack_depth(&self) -> usize {
        self.stack_types.len()
    }

    // === Queries ===

    /// Per-frame and resource statistics
    pub fn stats(&self) -> GraphicsStats {
        let fonts: Vec<Rc<RefCell<Font>>> = self.fonts.iter().filter_map(Weak::upgrade).collect();
        let font_memory: usize = fonts
            .iter()
            .filter_map(|f| f.try_borrow().ok().map(|f| f.atlas().texture_memory()))
            .sum();

        let registry = self.canvases.borrow();
        GraphicsStats {
            draw_calls: self.draw_calls,
            render_passes: self.passes.pass_count(),
            fonts: fonts.len(),
            canvases: registry.live,
            texture_memory: registry.texture_memory + font_memory,
        }
    }

    /// A system limit
    pub fn system_limit(&self, limit: Limit) -> f64 {
        let gpu = self.backend.borrow();
        let caps = gpu.capabilities();
        match limit {
            Limit::PointSize => f64::from(caps.max_point_size),
            Limit::TextureSize => f64::from(caps.max_texture_size),
            Limit::MultiCanvas => f64::from(caps.max_render_targets),
            Limit::CanvasMsaa => f64::from(caps.max_samples),
            Limit::Anisotropy => f64::from(caps.max_anisotropy),
        }
    }

    /// Whether an optional feature is available
    pub fn is_supported(&self, feature: Feature) -> bool {
        let gpu = self.backend.borrow();
        let caps = gpu.capabilities();
        match feature {
            Feature::MultiCanvasFormats => caps.max_render_targets > 1 && caps.multi_format_targets,
            Feature::ClampZero => caps.clamp_zero_wrap,
            Feature::Lighten => caps.blend_minmax,
            Feature::FullNpot => caps.full_npot,
        }
    }
}

impl Drop for Graphics {
    fn drop(&mut self) {
        match self.backend.try_borrow_mut() {
            Ok(mut gpu) => self.passes.release(&mut *gpu),
            Err(_) => log::warn!("Backend busy while dropping graphics; cached framebuffers leaked"),
        }
    }
}
