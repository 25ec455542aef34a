//! Configuration management for Vesper
//!
//! Configuration is loaded in layers: built-in defaults, then the first
//! `vesper.toml` or `config.toml` found on the search paths, then
//! `VESPER_SECTION_KEY` environment variables. The merged result is
//! validated before it is returned.
//!
//! ```rust,no_run
//! use vesper_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("Failed to load configuration");
//! println!("ack queue limit: {:?}", config.ack.max_queue_size);
//! ```

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::ConfigValidator;

use crate::Result;

/// Load configuration from the default search paths and the process
/// environment
pub fn load_default() -> Result<VesperConfig> {
    ConfigLoader::new().load()
}

/// Validate a configuration object
pub fn validate(config: &VesperConfig) -> Result<()> {
    ConfigValidator::validate(config)
}
