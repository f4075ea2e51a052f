//! The plugin contract.
//!
//! Any type implementing [`Plugin`] is loadable. Category contracts are not
//! expressed through inheritance: a plugin advertises what it can do by
//! returning itself from the matching `as_*` accessor, and the manager checks
//! at load time that the capability matches the declared
//! [`PluginCategory`].

use std::{fmt, pin::Pin, sync::Arc};

use {
    async_trait::async_trait,
    parlor_common::{ChatContext, Message, Priority},
    parlor_config::PluginConfig,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio_stream::Stream,
};

use crate::{
    descriptor::{PluginCategory, PluginDescriptor},
    error::{PluginError, PluginResult},
    hooks::{HookCallback, HookEvent},
};

/// Incremental text produced by a streaming backend.
pub type TextStream = Pin<Box<dyn Stream<Item = PluginResult<String>> + Send>>;

/// What a backend returns for one chat turn.
pub enum ChatOutput {
    Message(Message),
    Stream(TextStream),
}

impl ChatOutput {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for ChatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of a plugin health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: Value::Null,
        }
    }

    pub fn unhealthy(details: impl Into<Value>) -> Self {
        Self {
            healthy: false,
            details: details.into(),
        }
    }
}

/// A hook a plugin wants registered while it is ACTIVE.
#[derive(Clone)]
pub struct HookSubscription {
    pub event: HookEvent,
    pub callback: Arc<dyn HookCallback>,
    /// Defaults to the plugin's own priority tier.
    pub priority: Option<Priority>,
}

impl HookSubscription {
    pub fn new(event: HookEvent, callback: Arc<dyn HookCallback>) -> Self {
        Self {
            event,
            callback,
            priority: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Lifecycle contract shared by every plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    async fn initialize(&self, config: &PluginConfig) -> PluginResult<()>;

    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> PluginResult<HealthReport> {
        Ok(HealthReport::healthy())
    }

    /// Hooks registered on activation and removed on unload.
    fn hooks(&self) -> Vec<HookSubscription> {
        Vec::new()
    }

    fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
        None
    }

    fn as_backend_provider(&self) -> Option<&dyn BackendProvider> {
        None
    }

    fn as_feature_extension(&self) -> Option<&dyn FeatureExtension> {
        None
    }

    fn as_middleware(&self) -> Option<&dyn Middleware> {
        None
    }
}

#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Return the message to hand to the next processor.
    async fn process_message(
        &self,
        message: Message,
        context: &ChatContext,
    ) -> PluginResult<Message>;
}

#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn chat(&self, context: &ChatContext) -> PluginResult<ChatOutput>;

    async fn list_models(&self) -> PluginResult<Vec<String>>;
}

#[async_trait]
pub trait FeatureExtension: Send + Sync {
    async fn extend(&self, context: ChatContext) -> PluginResult<ChatContext>;
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process_request(&self, context: ChatContext) -> PluginResult<ChatContext>;

    async fn process_response(
        &self,
        response: Message,
        context: &ChatContext,
    ) -> PluginResult<Message>;
}

/// Check that `plugin` exposes the contract its declared category requires.
pub fn check_capabilities(plugin: &dyn Plugin) -> PluginResult<()> {
    let descriptor = plugin.descriptor();
    let exposed = match descriptor.category {
        PluginCategory::MessageProcessor => plugin.as_message_processor().is_some(),
        PluginCategory::BackendProvider => plugin.as_backend_provider().is_some(),
        PluginCategory::FeatureExtension => plugin.as_feature_extension().is_some(),
        PluginCategory::Middleware => plugin.as_middleware().is_some(),
    };
    if exposed {
        Ok(())
    } else {
        Err(PluginError::load(
            &descriptor.name,
            format!(
                "declares category {} but does not implement its contract",
                descriptor.category
            ),
        ))
    }
}
