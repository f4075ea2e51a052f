//! Config schema types.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    parlor_common::Priority,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParlorConfig {
    pub plugins: PluginsConfig,
}

/// Plugin core settings plus the per-plugin entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for `*.plugin.toml` manifests.
    pub directory: Option<PathBuf>,
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// Seconds after the last failure before an open circuit allows a trial call.
    pub breaker_timeout_secs: u64,
    /// Default time budget for one guarded plugin call.
    pub hook_timeout_secs: u64,
    /// Maximum number of guarded plugin calls in flight at once.
    pub max_concurrent: usize,
    /// Per-plugin configuration keyed by plugin name.
    pub entries: HashMap<String, PluginConfig>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            failure_threshold: 5,
            breaker_timeout_secs: 60,
            hook_timeout_secs: 30,
            max_concurrent: 16,
            entries: HashMap::new(),
        }
    }
}

impl PluginsConfig {
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// Config for `name`, or the defaults when the plugin has no entry.
    pub fn entry(&self, name: &str) -> PluginConfig {
        self.entries.get(name).cloned().unwrap_or_default()
    }
}

/// Configuration handed to a single plugin's `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub enabled: bool,
    /// Overrides the priority tier declared by the plugin.
    pub priority: Option<Priority>,
    /// Overrides the hook time budget, in seconds.
    pub timeout: Option<u64>,
    /// Free-form plugin settings. Must be a table.
    pub settings: Value,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: None,
            timeout: None,
            settings: Value::Object(Map::new()),
        }
    }
}

impl PluginConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.settings.is_object() {
            self.settings = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.settings {
            map.insert(key.into(), value.into());
        }
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.setting(key).and_then(Value::as_str)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PluginsConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.breaker_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.hook_timeout(), Duration::from_secs(30));
        assert!(cfg.entry("anything").enabled);
    }

    #[test]
    fn plugin_entries_deserialize_from_toml() {
        let raw = r#"
[plugins]
failure_threshold = 3

[plugins.entries.profanity-filter]
priority = "high"
timeout = 5

[plugins.entries.profanity-filter.settings]
words = ["darn"]

[plugins.entries.audit]
enabled = false
"#;
        let cfg: ParlorConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.plugins.failure_threshold, 3);
        assert_eq!(cfg.plugins.hook_timeout_secs, 30);

        let filter = cfg.plugins.entry("profanity-filter");
        assert!(filter.enabled);
        assert_eq!(filter.priority, Some(Priority::High));
        assert_eq!(filter.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(filter.setting("words"), Some(&serde_json::json!(["darn"])));

        assert!(!cfg.plugins.entry("audit").enabled);
    }

    #[test]
    fn with_setting_builds_table() {
        let cfg = PluginConfig::default().with_setting("model", "llama3");
        assert_eq!(cfg.setting_str("model"), Some("llama3"));
    }
}
