use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::QuillConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["quill.toml", "quill.yaml", "quill.yml", "quill.json"];

/// Environment variable overriding `remote.base_url`.
pub const REMOTE_URL_ENV: &str = "QUILL_REMOTE_URL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<QuillConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `config_dir` when the host passes one explicitly
/// 2. `./quill.{toml,yaml,yml,json}` (project-local)
/// 3. `~/.config/quill/quill.{toml,yaml,yml,json}` (user-global)
///
/// Returns `QuillConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load(config_dir: Option<&Path>) -> QuillConfig {
    if let Some(path) = find_config_file(config_dir) {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    QuillConfig::default()
}

/// Apply environment variable overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut QuillConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut QuillConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(REMOTE_URL_ENV).filter(|u| !u.trim().is_empty()) {
        debug!(url = %url, "remote url overridden from environment");
        config.remote.base_url = url;
    }
}

/// Find the first config file in standard locations.
fn find_config_file(explicit_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit_dir {
        return first_existing(dir);
    }
    first_existing(Path::new(".")).or_else(|| config_dir().and_then(|d| first_existing(&d)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/quill/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "quill").map(|d| d.config_dir().to_path_buf())
}

/// Directory for local durable state. `storage.data_dir` wins over the
/// platform default.
pub fn data_dir(config: &QuillConfig) -> PathBuf {
    if let Some(dir) = &config.storage.data_dir {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "quill")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".quill"))
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config(config: &QuillConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<QuillConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
