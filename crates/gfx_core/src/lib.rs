//! # gfx_core
//!
//! The rendering core of a 2D game framework: glyph atlases and text shaping,
//! offscreen render passes with a cached set of framebuffer objects, and the
//! display-state stack that scripts push and pop around their drawing code.
//!
//! ## Features
//!
//! - **Dynamic glyph atlas**: glyphs are rasterised on first use and packed into
//!   shelf-allocated texture surfaces that grow on demand
//! - **Text shaping**: kerning, colour runs, word wrapping and alignment, producing a
//!   minimal list of texture-sorted draw commands
//! - **Render passes**: default-surface and multi-target offscreen passes with a
//!   framebuffer cache and shared depth/stencil renderbuffers
//! - **Backend abstraction**: everything talks to a [`render::GraphicsBackend`];
//!   [`render::HeadlessBackend`] is an in-memory implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use gfx_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend: SharedBackend = Rc::new(RefCell::new(HeadlessBackend::new(800, 600)));
//!     let mut graphics = Graphics::new(backend, GraphicsConfig::default())?;
//!
//!     let data = std::fs::read("resources/fonts/default.ttf")?;
//!     let font = graphics.new_font(Rc::new(TrueTypeSource::from_bytes(&data, 16.0)?))?;
//!     graphics.set_font(Some(font));
//!
//!     graphics.begin_default_pass(BeginAction::Clear(Colorf::BLACK))?;
//!     graphics.print(&[ColoredString::plain("Hello")], &Transform2D::identity())?;
//!     graphics.end_pass()?;
//!     graphics.present()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for framework users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, FontConfig, GraphicsConfig},
        foundation::math::Transform2D,
        render::{
            backend::{GraphicsBackend, SharedBackend},
            canvas::{Canvas, CanvasSettings},
            color::{Color, Colorf},
            headless::HeadlessBackend,
            pass::{BeginAction, ColorAttachment, PassInfo},
            state::{BlendAlpha, BlendMode, CompareMode, StackType},
            text::{
                AlignMode, ColoredString, Font, GlyphSource, ImageGlyphSource, TrueTypeSource,
            },
            Graphics, GraphicsError,
        },
    };
}
