//! Locator Configuration Module
//!
//! Runtime settings for the three roles, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `CELL_LOCATOR_CONFIG` environment variable (path to TOML file)
//! 2. `cell_locator.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(LocatorConfig::load());
//!
//! // Anywhere else:
//! let path = &config::get().sockets.router_path;
//! ```

pub mod defaults;
mod locator_config;
pub mod validation;

pub use locator_config::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static LOCATOR_CONFIG: OnceLock<LocatorConfig> = OnceLock::new();

/// Install the global configuration. Later calls are ignored.
pub fn init(config: LocatorConfig) {
    if LOCATOR_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// The global configuration, or built-in defaults if `init()` never ran.
pub fn get() -> &'static LocatorConfig {
    LOCATOR_CONFIG.get_or_init(LocatorConfig::default)
}

pub fn is_initialized() -> bool {
    LOCATOR_CONFIG.get().is_some()
}
