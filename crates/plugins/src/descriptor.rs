//! Plugin identity and contract metadata.

use {
    parlor_common::Priority,
    semver::Version,
    serde::{Deserialize, Serialize},
};

use crate::error::{PluginError, PluginResult};

/// The capability a plugin declares. Decides which category contract the
/// manager expects it to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginCategory {
    MessageProcessor,
    BackendProvider,
    FeatureExtension,
    Middleware,
}

impl PluginCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageProcessor => "message-processor",
            Self::BackendProvider => "backend-provider",
            Self::FeatureExtension => "feature-extension",
            Self::Middleware => "middleware",
        }
    }
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a plugin. Immutable once the plugin is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: Version,
    pub category: PluginCategory,
    /// Plugins that must be ACTIVE before this one loads, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: Version, category: PluginCategory) -> Self {
        Self {
            name: name.into(),
            version,
            category,
            dependencies: Vec::new(),
            priority: Priority::default(),
        }
    }

    /// Add a dependency. Repeats are ignored so the list stays a set.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Reject descriptors the manager cannot load.
    pub fn validate(&self) -> PluginResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PluginError::load("<unnamed>", "plugin name is empty"));
        }
        if name != self.name || self.name.chars().any(char::is_whitespace) {
            return Err(PluginError::load(
                &self.name,
                "plugin name must not contain whitespace",
            ));
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(PluginError::load(&self.name, "plugin depends on itself"));
        }
        if let Some(blank) = self.dependencies.iter().find(|d| d.trim().is_empty()) {
            return Err(PluginError::load(
                &self.name,
                format!("invalid dependency name {blank:?}"),
            ));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, Version::new(1, 0, 0), PluginCategory::MessageProcessor)
    }

    #[test]
    fn depends_on_deduplicates() {
        let d = descriptor("filter")
            .depends_on("auth")
            .depends_on("auth")
            .depends_on("ratelimit");
        assert_eq!(d.dependencies, vec!["auth", "ratelimit"]);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = descriptor("filter").depends_on("filter").validate().unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn whitespace_names_are_rejected() {
        assert!(descriptor("").validate().is_err());
        assert!(descriptor("my filter").validate().is_err());
        assert!(descriptor("my-filter").validate().is_ok());
    }

    #[test]
    fn category_uses_kebab_case() {
        let json = serde_json::to_string(&PluginCategory::BackendProvider).unwrap();
        assert_eq!(json, "\"backend-provider\"");
        assert_eq!(PluginCategory::FeatureExtension.to_string(), "feature-extension");
    }
}
