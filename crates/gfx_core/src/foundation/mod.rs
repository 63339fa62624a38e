//! Foundation module - Core utilities and types
//!
//! - Math types and the 2D affine transform used by the graphics stack
//! - Logging utilities

pub mod logging;
pub mod math;
