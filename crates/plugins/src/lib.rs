//! Plugin orchestration core.
//!
//! Plugins are trait objects with a declared category. The
//! [`PluginManager`] loads them in dependency order, drives their lifecycle,
//! and runs chat requests through them. Every call into plugin code goes
//! through the [`HookDispatcher`], which applies per-(plugin, operation)
//! circuit breakers, a time budget and panic capture.

pub mod circuit_breaker;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod manager;
pub mod metrics;
pub mod plugin;
pub mod registry;
pub mod resolver;

pub use {
    circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    descriptor::{PluginCategory, PluginDescriptor},
    discovery::{
        DiscoveryReport, FsPluginDiscoverer, MANIFEST_SUFFIX, PluginCatalog, PluginDiscoverer,
        PluginFactory, PluginManifest, parse_manifest,
    },
    error::{PluginError, PluginErrorKind, PluginResult},
    hooks::{
        BreakerStatus, HookCallback, HookDispatcher, HookEvent, HookOutcome, HookRegistration,
        hook_fn,
    },
    lifecycle::LifecycleState,
    manager::{LoadReport, LoadStatus, PluginManager, PluginStatus, StatusSnapshot},
    metrics::{HookMetrics, MetricsRecorder},
    plugin::{
        BackendProvider, ChatOutput, FeatureExtension, HealthReport, HookSubscription,
        MessageProcessor, Middleware, Plugin, TextStream, check_capabilities,
    },
    registry::{PluginEntry, PluginRegistry, RegistrySnapshot},
};
