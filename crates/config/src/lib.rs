//! Configuration loading, validation and env substitution.
//!
//! Config files: `parlor.toml`, `parlor.yaml`, or `parlor.json`
//! Searched in `./` then `~/.config/parlor/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, parse_config},
    schema::{ParlorConfig, PluginConfig, PluginsConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate_config, validate_plugin_config},
};
