//! Backend abstraction for the rendering core
//!
//! This module defines the GPU interface that the font, canvas and pass code
//! drives. It is shaped after OpenGL: objects are opaque handles, framebuffers
//! get attachments, and draw-buffer and clear state is explicit.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::color::Colorf;
use super::state::ColorMask;
use super::texture::{Filter, TextureShape};
use super::vertex::GlyphVertex;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A backend shared by every object that owns GPU resources
///
/// Rendering is single-threaded; fonts and canvases keep a clone so they can
/// release their objects when dropped.
pub type SharedBackend = Rc<RefCell<dyn GraphicsBackend>>;

/// Errors reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// GPU or CPU allocation failed
    #[error("Out of memory")]
    OutOfMemory,

    /// A handle did not name a live object
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// The backend can't perform the request
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A pixel rectangle fell outside the object it addresses
    #[error("Region is outside the target")]
    InvalidRegion,
}

/// Handle to a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Handle to a renderbuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderbufferHandle(pub u64);

/// Handle to a framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u64);

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub w: i32,
    /// Height
    pub h: i32,
}

impl Rect {
    /// Create a rectangle
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Whether the rectangle is non-empty and lies within `width` x `height`
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.w > 0
            && self.h > 0
            && (self.x as i64 + self.w as i64) <= width as i64
            && (self.y as i64 + self.h as i64) <= height as i64
    }
}

/// Pixel formats for textures and render targets
///
/// `Normal` and `Hdr` are logical formats resolved to a sized format when a
/// canvas is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Default colour format for the current gamma mode
    Normal,
    /// Default high dynamic range format
    Hdr,
    /// 8-bit luminance + alpha (glyph bitmaps)
    La8,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit RGBA, sRGB encoded
    Srgba8,
    /// 4-bit RGBA
    Rgba4,
    /// 16-bit RGBA
    Rgba16,
    /// Half-float RGBA
    Rgba16F,
    /// Float RGBA
    Rgba32F,
    /// 10-bit RGB + 2-bit alpha
    Rgb10A2,
    /// Packed float RGB
    Rg11B10F,
    /// 8-bit red
    R8,
    /// 8-bit red/green
    Rg8,
    /// Half-float red
    R16F,
    /// Half-float red/green
    Rg16F,
    /// Float red
    R32F,
    /// Float red/green
    Rg32F,
    /// 8-bit stencil
    Stencil8,
    /// 16-bit depth
    Depth16,
    /// 24-bit depth
    Depth24,
    /// Packed 24-bit depth + 8-bit stencil
    Depth24Stencil8,
    /// Float depth
    Depth32F,
}

impl PixelFormat {
    /// Bytes per pixel; logical formats report their common sized format
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::R8 | Self::Stencil8 => 1,
            Self::La8 | Self::Rg8 | Self::Rgba4 | Self::R16F | Self::Depth16 => 2,
            Self::Depth24 => 3,
            Self::Normal
            | Self::Rgba8
            | Self::Srgba8
            | Self::Rgb10A2
            | Self::Rg11B10F
            | Self::Rg16F
            | Self::R32F
            | Self::Depth24Stencil8
            | Self::Depth32F => 4,
            Self::Hdr | Self::Rgba16 | Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgba32F => 16,
        }
    }

    /// Whether this is a depth and/or stencil format
    pub const fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Stencil8 | Self::Depth16 | Self::Depth24 | Self::Depth24Stencil8 | Self::Depth32F
        )
    }

    /// Format used when reading pixels of this format back to the CPU
    pub const fn readback_format(&self) -> ReadbackFormat {
        match self {
            Self::Rgb10A2 | Self::Rgba16 => ReadbackFormat::Rgba16,
            Self::Hdr | Self::R16F | Self::Rg16F | Self::Rgba16F | Self::Rg11B10F => {
                ReadbackFormat::Rgba16F
            }
            Self::R32F | Self::Rg32F | Self::Rgba32F => ReadbackFormat::Rgba32F,
            _ => ReadbackFormat::Rgba8,
        }
    }
}

/// CPU-side layout of pixels read back from the GPU (always RGBA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadbackFormat {
    /// 8 bits per channel
    Rgba8,
    /// 16 bits per channel
    Rgba16,
    /// Half float per channel
    Rgba16F,
    /// Float per channel
    Rgba32F,
}

impl ReadbackFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 | Self::Rgba16F => 8,
            Self::Rgba32F => 16,
        }
    }
}

/// Framebuffer completeness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    /// Usable
    Complete,
    /// An attachment is not renderable
    IncompleteAttachment,
    /// Nothing is attached
    MissingAttachment,
    /// Attachments disagree on size
    IncompleteDimensions,
    /// Attachments disagree on sample count
    IncompleteMultisample,
    /// The combination of formats is not supported
    Unsupported,
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "complete (no error)",
            Self::IncompleteAttachment => "an attachment is incomplete",
            Self::MissingAttachment => "no image is attached",
            Self::IncompleteDimensions => "attachments have different dimensions",
            Self::IncompleteMultisample => "attachments have different sample counts",
            Self::Unsupported => "the attachment formats are not supported",
        };
        f.write_str(s)
    }
}

/// Framebuffer attachment point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// Colour attachment N
    Color(u32),
    /// Combined depth/stencil
    DepthStencil,
    /// Depth only
    Depth,
    /// Stencil only
    Stencil,
}

/// Which framebuffer binding point to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    /// Read and draw
    All,
    /// Read only
    Read,
    /// Draw only
    Draw,
}

/// One clear call on the bound draw framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearRequest {
    /// Clear all enabled draw buffers to this colour
    pub color: Option<Colorf>,
    /// Clear depth to 1 and stencil to 0
    pub depth_stencil: bool,
}

/// Blend equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    /// src + dst
    Add,
    /// dst - src
    ReverseSubtract,
    /// max(src, dst)
    Max,
    /// min(src, dst)
    Min,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// 1 - source colour
    OneMinusSrcColor,
    /// Destination colour
    DstColor,
}

/// Full fixed-function blend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Equation
    pub equation: BlendEquation,
    /// Source RGB factor
    pub src_rgb: BlendFactor,
    /// Source alpha factor
    pub src_alpha: BlendFactor,
    /// Destination RGB factor
    pub dst_rgb: BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: BlendFactor,
}

/// Stencil comparison as performed by the GPU (reference OP stored value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFunc {
    /// ref < stored
    Less,
    /// ref <= stored
    LessEqual,
    /// ref == stored
    Equal,
    /// ref >= stored
    GreaterEqual,
    /// ref > stored
    Greater,
    /// ref != stored
    NotEqual,
    /// Always passes
    Always,
}

/// Stencil write operation applied when both tests pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    /// Keep the stored value
    Keep,
    /// Write the reference value
    Replace,
    /// Saturating increment
    Increment,
    /// Saturating decrement
    Decrement,
    /// Wrapping increment
    IncrementWrap,
    /// Wrapping decrement
    DecrementWrap,
    /// Bitwise invert
    Invert,
}

/// Enabled stencil test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    /// Comparison function
    pub func: StencilFunc,
    /// Reference value
    pub reference: i32,
    /// Operation on depth-pass
    pub pass_op: StencilOp,
}

/// Capabilities and limits reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    /// Largest 2D texture dimension
    pub max_texture_size: u32,
    /// Largest volume texture dimension
    pub max_volume_texture_size: u32,
    /// Largest cube face dimension
    pub max_cube_texture_size: u32,
    /// Most layers in an array texture
    pub max_texture_layers: u32,
    /// Most simultaneous colour targets
    pub max_render_targets: u32,
    /// Most renderbuffer samples (0 when multisampling is unavailable)
    pub max_samples: u32,
    /// Largest point size
    pub max_point_size: f32,
    /// Largest anisotropy level
    pub max_anisotropy: f32,
    /// Colour targets of different formats may be bound together
    pub multi_format_targets: bool,
    /// Per-attachment clears are available
    pub indexed_clear: bool,
    /// Min/max blend equations are available
    pub blend_minmax: bool,
    /// Clamp-to-zero wrapping is available
    pub clamp_zero_wrap: bool,
    /// Non-power-of-two textures are fully supported
    pub full_npot: bool,
    /// Combined depth/stencil renderbuffers are available
    pub packed_depth_stencil: bool,
    /// Framebuffer sRGB conversion can be toggled
    pub srgb_write_control: bool,
    /// Polygon fill mode can be switched to lines
    pub wireframe: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            max_volume_texture_size: 2048,
            max_cube_texture_size: 8192,
            max_texture_layers: 256,
            max_render_targets: 8,
            max_samples: 8,
            max_point_size: 64.0,
            max_anisotropy: 16.0,
            multi_format_targets: true,
            indexed_clear: true,
            blend_minmax: true,
            clamp_zero_wrap: true,
            full_npot: true,
            packed_depth_stencil: true,
            srgb_write_control: true,
            wireframe: true,
        }
    }
}

/// GPU interface consumed by the rendering core
pub trait GraphicsBackend {
    /// Capabilities and limits
    fn capabilities(&self) -> &Capabilities;

    /// Whether `format` can be rendered to, as a texture (`readable`) or a renderbuffer
    fn is_render_format_supported(&self, format: PixelFormat, readable: bool) -> bool;

    /// Whether `format` can be sampled from
    fn is_texture_format_supported(&self, format: PixelFormat) -> bool;

    /// Size of the default (window) surface in pixels
    fn default_surface_size(&self) -> (u32, u32);

    // === Textures ===

    /// Create a texture, optionally initialised with `data`
    fn create_texture(
        &mut self,
        shape: &TextureShape,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> BackendResult<TextureHandle>;

    /// Overwrite a rectangle of slice 0
    fn replace_pixels(&mut self, texture: TextureHandle, rect: Rect, data: &[u8]) -> BackendResult<()>;

    /// Set sampling filters
    fn set_texture_filter(&mut self, texture: TextureHandle, filter: &Filter) -> BackendResult<()>;

    /// Delete a texture; unknown handles are ignored
    fn delete_texture(&mut self, texture: TextureHandle);

    // === Renderbuffers ===

    /// Create a renderbuffer, returning it with the sample count actually allocated
    fn create_renderbuffer(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        samples: u32,
    ) -> BackendResult<(RenderbufferHandle, u32)>;

    /// Delete a renderbuffer; unknown handles are ignored
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);

    // === Framebuffers ===

    /// Create an empty framebuffer object
    fn create_framebuffer(&mut self) -> BackendResult<FramebufferHandle>;

    /// Attach slice 0 of a texture
    fn attach_texture(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        texture: TextureHandle,
    ) -> BackendResult<()>;

    /// Attach a renderbuffer
    fn attach_renderbuffer(
        &mut self,
        framebuffer: FramebufferHandle,
        attachment: Attachment,
        renderbuffer: RenderbufferHandle,
    ) -> BackendResult<()>;

    /// Select which colour attachments receive draws and clears
    fn set_draw_buffers(&mut self, framebuffer: FramebufferHandle, buffers: &[u32]) -> BackendResult<()>;

    /// Completeness of a framebuffer
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Bind a framebuffer, `None` being the default surface
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferHandle>);

    /// Currently bound draw framebuffer
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;

    /// Delete a framebuffer; unknown handles are ignored
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // === Pass-level operations ===

    /// Set the viewport for subsequent draws
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Toggle linear-to-sRGB conversion on write
    fn set_framebuffer_srgb(&mut self, enabled: bool);

    /// Clear the bound draw framebuffer
    fn clear(&mut self, request: ClearRequest) -> BackendResult<()>;

    /// Clear a single colour attachment of the bound framebuffer
    fn clear_color_buffer(&mut self, index: u32, color: Colorf) -> BackendResult<()>;

    /// Copy colour attachment `src_attachment` of `src` into colour 0 of `dst`, resolving samples
    fn resolve_multisample(
        &mut self,
        src: FramebufferHandle,
        src_attachment: u32,
        dst: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    /// Read pixels from a colour attachment (`None` reads the default surface)
    ///
    /// The default surface is addressed from its bottom-left corner and its
    /// rows come back bottom-up. Framebuffer attachments come back in storage
    /// order.
    fn read_pixels(
        &mut self,
        source: Option<FramebufferHandle>,
        attachment: u32,
        rect: Rect,
        format: ReadbackFormat,
    ) -> BackendResult<Vec<u8>>;

    /// Submit textured quads (4 vertices each) to the bound framebuffer
    fn draw_quads(&mut self, texture: TextureHandle, vertices: &[GlyphVertex]) -> BackendResult<()>;

    /// Present the default surface
    fn swap_buffers(&mut self);

    // === Fixed-function state ===

    /// Constant colour multiplied into every vertex
    fn set_constant_color(&mut self, color: Colorf);

    /// Blend configuration
    fn set_blend_state(&mut self, state: BlendState);

    /// Colour write mask
    fn set_color_mask(&mut self, mask: ColorMask);

    /// Scissor rectangle, `None` to disable
    fn set_scissor(&mut self, rect: Option<Rect>);

    /// Stencil test, `None` to disable
    fn set_stencil(&mut self, state: Option<StencilState>);

    /// Point rasterisation size
    fn set_point_size(&mut self, size: f32);

    /// Wireframe rasterisation; returns false when unsupported
    fn set_wireframe(&mut self, enabled: bool) -> bool;

    /// Active shader program, `None` for the default
    fn use_shader(&mut self, shader: Option<ShaderHandle>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_bounds() {
        assert!(Rect::new(0, 0, 4, 4).fits_within(4, 4));
        assert!(!Rect::new(1, 0, 4, 4).fits_within(4, 4));
        assert!(!Rect::new(0, 0, 0, 4).fits_within(4, 4));
        assert!(!Rect::new(-1, 0, 2, 2).fits_within(4, 4));
    }

    #[test]
    fn test_readback_formats() {
        assert_eq!(PixelFormat::Rgba8.readback_format(), ReadbackFormat::Rgba8);
        assert_eq!(PixelFormat::Rgb10A2.readback_format(), ReadbackFormat::Rgba16);
        assert_eq!(PixelFormat::Rg11B10F.readback_format(), ReadbackFormat::Rgba16F);
        assert_eq!(PixelFormat::R32F.readback_format(), ReadbackFormat::Rgba32F);
        assert!(PixelFormat::Depth24Stencil8.is_depth_stencil());
        assert!(!PixelFormat::Srgba8.is_depth_stencil());
    }
}
