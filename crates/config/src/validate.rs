//! Semantic validation of a loaded configuration.

use crate::schema::QuillConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "remote.base_url"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check values that parse fine but cannot work at runtime.
pub fn validate(config: &QuillConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    match url::Url::parse(&config.remote.base_url) {
        Ok(url) => {
            if !matches!(url.scheme(), "http" | "https") {
                result.push(
                    Severity::Error,
                    "remote.base_url",
                    format!("unsupported scheme `{}`", url.scheme()),
                );
            }
            if !url.path().ends_with('/') {
                result.push(
                    Severity::Warning,
                    "remote.base_url",
                    "base url without a trailing `/` drops its last path segment when joined",
                );
            }
        },
        Err(e) => result.push(Severity::Error, "remote.base_url", format!("invalid url: {e}")),
    }

    if config.remote.request_timeout_ms == 0 {
        result.push(
            Severity::Error,
            "remote.request_timeout_ms",
            "must be greater than zero",
        );
    }
    if config.remote.health_interval_ms == 0 {
        result.push(
            Severity::Error,
            "remote.health_interval_ms",
            "must be greater than zero",
        );
    }
    if config.autosave.enabled && config.autosave.debounce_ms == 0 {
        result.push(
            Severity::Warning,
            "autosave.debounce_ms",
            "zero delay writes on every edit",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_clean() {
        let result = validate(&QuillConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn reports_bad_url_and_zero_intervals() {
        let mut cfg = QuillConfig::default();
        cfg.remote.base_url = "not a url".into();
        cfg.remote.health_interval_ms = 0;
        cfg.autosave.debounce_ms = 0;

        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.count(Severity::Error), 2);
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn warns_on_missing_trailing_slash() {
        let mut cfg = QuillConfig::default();
        cfg.remote.base_url = "https://example.com/store".into();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics[0].path, "remote.base_url");
    }
}
