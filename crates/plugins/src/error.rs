use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

use crate::lifecycle::LifecycleState;

/// Coarse classification of a [`PluginError`], stable enough to branch on
/// and to report in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    Load,
    Dependency,
    Initialization,
    HookTimeout,
    CircuitOpen,
    Execution,
}

impl PluginErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Dependency => "dependency",
            Self::Initialization => "initialization",
            Self::HookTimeout => "hook_timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Execution => "execution",
        }
    }

    /// Lifecycle errors abort only the affected plugin's load.
    pub fn is_lifecycle(self) -> bool {
        matches!(self, Self::Load | Self::Dependency | Self::Initialization)
    }
}

impl std::fmt::Display for PluginErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("failed to load plugin '{plugin}': {reason}")]
    Load { plugin: String, reason: String },

    #[error("invalid configuration for plugin '{plugin}': {reason}")]
    Config { plugin: String, reason: String },

    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("plugin '{plugin}' requires '{dependency}' to be active, but it is {state}")]
    Dependency {
        plugin: String,
        dependency: String,
        state: LifecycleState,
    },

    #[error("dependency cycle detected: {}", members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    Initialization { plugin: String, reason: String },

    #[error("plugin '{plugin}' timed out after {timeout:?} in {operation}")]
    HookTimeout {
        plugin: String,
        operation: String,
        timeout: Duration,
    },

    #[error("circuit open for plugin '{plugin}' ({operation})")]
    CircuitOpen { plugin: String, operation: String },

    #[error("plugin '{plugin}' failed in {operation}: {reason}")]
    Execution {
        plugin: String,
        operation: String,
        reason: String,
    },

    #[error("plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("plugin '{0}' is not loaded")]
    NotFound(String),

    #[error("backend provider '{0}' is not available")]
    MissingBackend(String),
}

impl PluginError {
    #[must_use]
    pub fn load(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn initialization(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Initialization {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn execution(
        plugin: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Execution {
            plugin: plugin.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> PluginErrorKind {
        match self {
            Self::Load { .. } | Self::Config { .. } | Self::AlreadyLoaded(_) => {
                PluginErrorKind::Load
            },
            Self::Dependency { .. } | Self::DependencyCycle { .. } => PluginErrorKind::Dependency,
            Self::Initialization { .. } => PluginErrorKind::Initialization,
            Self::HookTimeout { .. } => PluginErrorKind::HookTimeout,
            Self::CircuitOpen { .. } => PluginErrorKind::CircuitOpen,
            Self::Execution { .. }
            | Self::InvalidTransition { .. }
            | Self::NotFound(_)
            | Self::MissingBackend(_) => PluginErrorKind::Execution,
        }
    }
}

/// Outcome of every plugin-facing operation: a payload or a failure, never both.
pub type PluginResult<T> = Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            PluginError::load("a", "bad manifest").kind(),
            PluginErrorKind::Load
        );
        assert_eq!(
            PluginError::DependencyCycle {
                members: vec!["a".into(), "b".into(), "a".into()],
            }
            .kind(),
            PluginErrorKind::Dependency
        );
        assert_eq!(
            PluginError::CircuitOpen {
                plugin: "a".into(),
                operation: "chat".into(),
            }
            .kind(),
            PluginErrorKind::CircuitOpen
        );
        assert!(PluginErrorKind::Initialization.is_lifecycle());
        assert!(!PluginErrorKind::HookTimeout.is_lifecycle());
    }

    #[test]
    fn messages_name_the_plugin() {
        let err = PluginError::Dependency {
            plugin: "b".into(),
            dependency: "a".into(),
            state: LifecycleState::Unloaded,
        };
        assert_eq!(
            err.to_string(),
            "plugin 'b' requires 'a' to be active, but it is unloaded"
        );

        let cycle = PluginError::DependencyCycle {
            members: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.to_string(), "dependency cycle detected: a -> b -> a");
    }
}
