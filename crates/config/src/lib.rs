//! Configuration loading, validation, and env substitution.
//!
//! Config files: `quill.toml`, `quill.yaml`, or `quill.json`
//! Searched in an explicit directory, then `./`, then `~/.config/quill/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        REMOTE_URL_ENV, apply_env_overrides, config_dir, data_dir, discover_and_load,
        load_config, save_config,
    },
    schema::{AutosaveConfig, QuillConfig, RemoteConfig, StorageConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
