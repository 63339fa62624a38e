//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system, ignoring an already-installed logger
///
/// Tests and tools that may run `init` more than once use this.
pub fn try_init() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}
