//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables
//! 3. Config file given with `--config`
//! 4. Defaults
//!
//! The resolved [`Config`] is immutable for the lifetime of a selector.

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, load_config_file, resolve_config, validate};
pub use types::{Config, SelectorConfig, WorkersConfig};
