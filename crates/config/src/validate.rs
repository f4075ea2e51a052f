//! Configuration validation.
//!
//! Plugin configuration is checked before any plugin is initialized so a
//! malformed entry is rejected up front instead of surfacing as a runtime
//! failure inside the plugin.

use crate::schema::{ParlorConfig, PluginConfig};

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
    /// Dotted path, e.g. "plugins.entries.audit.timeout"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
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

    /// All error messages joined into one line.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn push(&mut self, severity: Severity, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }

    fn extend(&mut self, other: ValidationResult) {
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Validate one plugin's configuration entry.
pub fn validate_plugin_config(name: &str, config: &PluginConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let base = format!("plugins.entries.{name}");

    if name.trim().is_empty() {
        result.push(Severity::Error, "plugins.entries", "plugin name is empty");
    }

    if config.timeout == Some(0) {
        result.push(
            Severity::Error,
            format!("{base}.timeout"),
            "timeout must be at least 1 second",
        );
    }

    match config.settings.as_object() {
        Some(settings) => {
            for key in settings.keys().filter(|k| k.trim().is_empty()) {
                result.push(
                    Severity::Error,
                    format!("{base}.settings"),
                    format!("setting key {key:?} is blank"),
                );
            }
        },
        None => result.push(
            Severity::Error,
            format!("{base}.settings"),
            format!("settings must be a table, got {}", kind_of(&config.settings)),
        ),
    }

    if !config.enabled && (config.priority.is_some() || config.timeout.is_some()) {
        result.push(
            Severity::Warning,
            base,
            "overrides on a disabled plugin have no effect",
        );
    }

    result
}

/// Validate the whole configuration, including every plugin entry.
pub fn validate_config(config: &ParlorConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let plugins = &config.plugins;

    if plugins.failure_threshold == 0 {
        result.push(
            Severity::Error,
            "plugins.failure_threshold",
            "must be at least 1",
        );
    }
    if plugins.hook_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "plugins.hook_timeout_secs",
            "must be at least 1",
        );
    }
    if plugins.max_concurrent == 0 {
        result.push(Severity::Error, "plugins.max_concurrent", "must be at least 1");
    }
    if let Some(dir) = &plugins.directory
        && !dir.is_dir()
    {
        result.push(
            Severity::Warning,
            "plugins.directory",
            format!("{} is not a directory", dir.display()),
        );
    }

    let mut names: Vec<&String> = plugins.entries.keys().collect();
    names.sort();
    for name in names {
        result.extend(validate_plugin_config(name, &plugins.entries[name]));
    }

    result
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "a table",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parlor_common::Priority, serde_json::json};

    #[test]
    fn default_config_is_valid() {
        let result = validate_config(&ParlorConfig::default());
        assert!(!result.has_errors());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let result = validate_plugin_config("audit", &PluginConfig::default().with_timeout(0));
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].path, "plugins.entries.audit.timeout");
    }

    #[test]
    fn non_table_settings_are_rejected() {
        let config = PluginConfig {
            settings: json!(["not", "a", "table"]),
            ..PluginConfig::default()
        };
        let result = validate_plugin_config("filter", &config);
        assert!(result.has_errors());
        assert!(result.error_summary().contains("an array"));
    }

    #[test]
    fn overrides_on_disabled_plugin_warn_only() {
        let config = PluginConfig::disabled().with_priority(Priority::High);
        let result = validate_plugin_config("filter", &config);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn core_limits_must_be_positive() {
        let mut config = ParlorConfig::default();
        config.plugins.failure_threshold = 0;
        config.plugins.max_concurrent = 0;
        let result = validate_config(&config);
        assert_eq!(result.count(Severity::Error), 2);
    }
}
