//! Display state and the push/pop state stack

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::backend::{BlendEquation, BlendFactor, BlendState, Rect, ShaderHandle, StencilFunc, StencilOp};
use super::color::Colorf;
use super::text::Font;
use super::texture::{Filter, FilterMode};

/// How drawn pixels combine with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// Standard alpha blending
    #[default]
    Alpha,
    /// Additive
    Add,
    /// Reverse subtract
    Subtract,
    /// Multiply with the destination
    Multiply,
    /// Per-channel maximum
    Lighten,
    /// Per-channel minimum
    Darken,
    /// Screen
    Screen,
    /// Overwrite
    Replace,
}

/// Whether source colours are premultiplied by their alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendAlpha {
    /// The blend stage multiplies RGB by alpha
    #[default]
    Multiply,
    /// RGB is already premultiplied
    Premultiplied,
}

impl BlendMode {
    /// Whether this mode needs min/max blend equations
    pub const fn needs_minmax(&self) -> bool {
        matches!(self, Self::Lighten | Self::Darken)
    }

    /// Whether this mode only works with premultiplied alpha
    pub const fn requires_premultiplied(&self) -> bool {
        matches!(self, Self::Multiply | Self::Lighten | Self::Darken)
    }

    /// Fixed-function blend configuration for this mode
    pub const fn blend_state(&self, alpha: BlendAlpha) -> BlendState {
        use BlendFactor::{DstColor, One, OneMinusSrcAlpha, OneMinusSrcColor, SrcAlpha, Zero};

        let (equation, src_rgb, src_alpha, dst_rgb, dst_alpha) = match self {
            Self::Alpha => (BlendEquation::Add, One, One, OneMinusSrcAlpha, OneMinusSrcAlpha),
            Self::Multiply => (BlendEquation::Add, DstColor, DstColor, Zero, Zero),
            Self::Subtract => (BlendEquation::ReverseSubtract, One, Zero, One, One),
            Self::Add => (BlendEquation::Add, One, Zero, One, One),
            Self::Lighten => (BlendEquation::Max, One, One, One, One),
            Self::Darken => (BlendEquation::Min, One, One, One, One),
            Self::Screen => (BlendEquation::Add, One, One, OneMinusSrcColor, OneMinusSrcColor),
            Self::Replace => (BlendEquation::Add, One, One, Zero, Zero),
        };

        // The shader leaves RGB unmultiplied, so let the blend stage do it
        let src_rgb = match (src_rgb, alpha) {
            (One, BlendAlpha::Multiply) => SrcAlpha,
            (factor, _) => factor,
        };

        BlendState { equation, src_rgb, src_alpha, dst_rgb, dst_alpha }
    }
}

/// Stencil comparison, written as `value COMPARE stored`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompareMode {
    /// value < stored
    Less,
    /// value <= stored
    LessEqual,
    /// value == stored
    Equal,
    /// value >= stored
    GreaterEqual,
    /// value > stored
    Greater,
    /// value != stored
    NotEqual,
    /// Always passes (stencil test disabled)
    #[default]
    Always,
}

impl CompareMode {
    /// GPU stencil function
    ///
    /// The GPU compares `reference OP stored` with the operands swapped relative
    /// to how scripts phrase it, so ordered comparisons are mirrored.
    pub const fn to_stencil_func(&self) -> StencilFunc {
        match self {
            Self::Less => StencilFunc::Greater,
            Self::LessEqual => StencilFunc::GreaterEqual,
            Self::Equal => StencilFunc::Equal,
            Self::GreaterEqual => StencilFunc::LessEqual,
            Self::Greater => StencilFunc::Less,
            Self::NotEqual => StencilFunc::NotEqual,
            Self::Always => StencilFunc::Always,
        }
    }
}

/// What drawing to the stencil buffer does to stored values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilAction {
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

impl StencilAction {
    /// GPU stencil operation
    pub const fn to_stencil_op(&self) -> StencilOp {
        match self {
            Self::Replace => StencilOp::Replace,
            Self::Increment => StencilOp::Increment,
            Self::Decrement => StencilOp::Decrement,
            Self::IncrementWrap => StencilOp::IncrementWrap,
            Self::DecrementWrap => StencilOp::DecrementWrap,
            Self::Invert => StencilOp::Invert,
        }
    }
}

/// Line rasterisation style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LineStyle {
    /// Antialiased
    #[default]
    Smooth,
    /// Aliased
    Rough,
}

/// How polyline segments are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LineJoin {
    /// Overlapping segment ends
    None,
    /// Sharp corners
    #[default]
    Miter,
    /// Cut corners
    Bevel,
}

/// What a `push` saves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StackType {
    /// Only the coordinate transform
    #[default]
    Transform,
    /// The transform and the whole display state
    All,
}

bitflags! {
    /// Colour channels written by draws
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        /// Red channel
        const RED = 1 << 0;
        /// Green channel
        const GREEN = 1 << 1;
        /// Blue channel
        const BLUE = 1 << 2;
        /// Alpha channel
        const ALPHA = 1 << 3;
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        Self::all()
    }
}

bitflags! {
    /// Which parts of a [`DisplayState`] differ from another one
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateChanges: u16 {
        /// Foreground colour
        const COLOR = 1 << 0;
        /// Background colour
        const BACKGROUND = 1 << 1;
        /// Blend mode or alpha mode
        const BLEND = 1 << 2;
        /// Line width, style or join
        const LINE = 1 << 3;
        /// Point size
        const POINT_SIZE = 1 << 4;
        /// Scissor rectangle
        const SCISSOR = 1 << 5;
        /// Stencil compare mode or value
        const STENCIL = 1 << 6;
        /// Active font
        const FONT = 1 << 7;
        /// Active shader
        const SHADER = 1 << 8;
        /// Colour write mask
        const COLOR_MASK = 1 << 9;
        /// Wireframe flag
        const WIREFRAME = 1 << 10;
        /// Default texture filters
        const FILTER = 1 << 11;
    }
}

/// Everything a full `push` saves and a `pop` restores
#[derive(Debug, Clone)]
pub struct DisplayState {
    /// Foreground colour, gamma space
    pub color: Colorf,
    /// Background colour, gamma space
    pub background_color: Colorf,
    /// Blend mode
    pub blend_mode: BlendMode,
    /// Alpha mode of the blend
    pub blend_alpha: BlendAlpha,
    /// Line width
    pub line_width: f32,
    /// Line style
    pub line_style: LineStyle,
    /// Line join
    pub line_join: LineJoin,
    /// Point size
    pub point_size: f32,
    /// Scissor rectangle in pixels
    pub scissor: Option<Rect>,
    /// Stencil comparison
    pub stencil_compare: CompareMode,
    /// Stencil reference value
    pub stencil_value: i32,
    /// Active font
    pub font: Option<Rc<RefCell<Font>>>,
    /// Active shader
    pub shader: Option<ShaderHandle>,
    /// Colour write mask
    pub color_mask: ColorMask,
    /// Wireframe rasterisation
    pub wireframe: bool,
    /// Filter given to new textures
    pub default_filter: Filter,
    /// Mipmap filter given to new textures
    pub default_mipmap_filter: FilterMode,
    /// Mipmap sharpness given to new textures
    pub default_mipmap_sharpness: f32,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            color: Colorf::WHITE,
            background_color: Colorf::BLACK,
            blend_mode: BlendMode::Alpha,
            blend_alpha: BlendAlpha::Multiply,
            line_width: 1.0,
            line_style: LineStyle::Smooth,
            line_join: LineJoin::Miter,
            point_size: 1.0,
            scissor: None,
            stencil_compare: CompareMode::Always,
            stencil_value: 0,
            font: None,
            shader: None,
            color_mask: ColorMask::all(),
            wireframe: false,
            default_filter: Filter::default(),
            default_mipmap_filter: FilterMode::Linear,
            default_mipmap_sharpness: 0.0,
        }
    }
}

impl DisplayState {
    /// Fields that differ between `self` and `other`
    pub fn diff(&self, other: &Self) -> StateChanges {
        let mut changes = StateChanges::empty();

        if self.color != other.color {
            changes |= StateChanges::COLOR;
        }
        if self.background_color != other.background_color {
            changes |= StateChanges::BACKGROUND;
        }
        if self.blend_mode != other.blend_mode || self.blend_alpha != other.blend_alpha {
            changes |= StateChanges::BLEND;
        }
        if self.line_width != other.line_width
            || self.line_style != other.line_style
            || self.line_join != other.line_join
        {
            changes |= StateChanges::LINE;
        }
        if self.point_size != other.point_size {
            changes |= StateChanges::POINT_SIZE;
        }
        if self.scissor != other.scissor {
            changes |= StateChanges::SCISSOR;
        }
        if self.stencil_compare != other.stencil_compare || self.stencil_value != other.stencil_value {
            changes |= StateChanges::STENCIL;
        }
        let same_font = match (&self.font, &other.font) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same_font {
            changes |= StateChanges::FONT;
        }
        if self.shader != other.shader {
            changes |= StateChanges::SHADER;
        }
        if self.color_mask != other.color_mask {
            changes |= StateChanges::COLOR_MASK;
        }
        if self.wireframe != other.wireframe {
            changes |= StateChanges::WIREFRAME;
        }
        if self.default_filter != other.default_filter
            || self.default_mipmap_filter != other.default_mipmap_filter
            || self.default_mipmap_sharpness != other.default_mipmap_sharpness
        {
            changes |= StateChanges::FILTER;
        }

        changes
    }
}

/// Stack of saved display states; the top entry is the live state
#[derive(Debug)]
pub struct DisplayStateStack {
    states: Vec<DisplayState>,
}

impl Default for DisplayStateStack {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayStateStack {
    /// A stack holding one default state
    pub fn new() -> Self {
        Self { states: vec![DisplayState::default()] }
    }

    /// The live state
    pub fn current(&self) -> &DisplayState {
        // The stack is never empty
        &self.states[self.states.len() - 1]
    }

    /// The live state, mutably
    pub fn current_mut(&mut self) -> &mut DisplayState {
        let top = self.states.len() - 1;
        &mut self.states[top]
    }

    /// Number of saved states below the live one
    pub fn depth(&self) -> usize {
        self.states.len() - 1
    }

    /// Duplicate the live state
    pub fn push(&mut self) {
        let copy = self.current().clone();
        self.states.push(copy);
    }

    /// Discard the live state, returning what differs in the restored one
    ///
    /// Returns `None` when nothing has been pushed.
    pub fn pop(&mut self) -> Option<StateChanges> {
        if self.states.len() < 2 {
            return None;
        }

        let popped = self.states.pop()?;
        Some(popped.diff(self.current()))
    }

    /// Replace the live state with defaults, returning what changed
    pub fn reset_current(&mut self) -> StateChanges {
        let defaults = DisplayState::default();
        let changes = self.current().diff(&defaults);
        *self.current_mut() = defaults;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_reports_only_changed_fields() {
        let mut stack = DisplayStateStack::new();
        stack.push();
        stack.current_mut().color = Colorf::new(1.0, 0.0, 0.0, 1.0);
        stack.current_mut().wireframe = true;

        let changes = stack.pop().unwrap();
        assert_eq!(changes, StateChanges::COLOR | StateChanges::WIREFRAME);
        assert_eq!(stack.current().color, Colorf::WHITE);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_pop_without_push() {
        let mut stack = DisplayStateStack::new();
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_unchanged_state_has_no_diff() {
        let a = DisplayState::default();
        assert!(a.diff(&a.clone()).is_empty());
    }

    #[test]
    fn test_stencil_compare_is_mirrored() {
        assert_eq!(CompareMode::Less.to_stencil_func(), StencilFunc::Greater);
        assert_eq!(CompareMode::GreaterEqual.to_stencil_func(), StencilFunc::LessEqual);
        assert_eq!(CompareMode::Equal.to_stencil_func(), StencilFunc::Equal);
    }

    #[test]
    fn test_alpha_multiply_uses_src_alpha() {
        let state = BlendMode::Alpha.blend_state(BlendAlpha::Multiply);
        assert_eq!(state.src_rgb, BlendFactor::SrcAlpha);
        assert_eq!(state.src_alpha, BlendFactor::One);

        let premultiplied = BlendMode::Alpha.blend_state(BlendAlpha::Premultiplied);
        assert_eq!(premultiplied.src_rgb, BlendFactor::One);
        assert!(BlendMode::Lighten.requires_premultiplied());
        assert!(!BlendMode::Add.needs_minmax());
    }
}
