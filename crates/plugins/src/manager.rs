//! Plugin manager: loading, unloading and the chat pipeline.
//!
//! Owns the [`PluginRegistry`] and the [`HookDispatcher`]. Every call into a
//! plugin goes through the dispatcher, so a slow, failing or panicking plugin
//! costs its own contribution and nothing else.

use std::sync::Arc;

use {
    parlor_common::{ChatContext, Message, Priority},
    parlor_config::{PluginConfig, PluginsConfig, validate_plugin_config},
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parlor_metrics::{gauge, plugins as plugin_metrics};

use crate::{
    descriptor::PluginCategory,
    discovery::{PluginCatalog, PluginDiscoverer},
    error::{PluginError, PluginResult},
    hooks::{BreakerStatus, HookCallback, HookDispatcher, HookEvent, HookOutcome},
    lifecycle::LifecycleState,
    metrics::HookMetrics,
    plugin::{ChatOutput, HealthReport, Plugin, check_capabilities},
    registry::{PluginEntry, PluginRegistry},
    resolver,
};

/// How a successful [`PluginManager::load`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Active,
    /// `enabled = false` in config; nothing was registered.
    Disabled,
}

/// Per-plugin outcomes of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub disabled: Vec<String>,
    pub failed: Vec<(String, PluginError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    pub priority: Priority,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Present for initialized plugins that are not being unloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

/// Pull-based view of the whole plugin system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub plugins: Vec<PluginStatus>,
    pub breakers: Vec<BreakerStatus>,
    pub metrics: HookMetrics,
}

pub struct PluginManager {
    registry: PluginRegistry,
    dispatcher: HookDispatcher,
    catalog: PluginCatalog,
    config: PluginsConfig,
}

impl PluginManager {
    pub fn new(config: PluginsConfig) -> Self {
        Self {
            registry: PluginRegistry::new(),
            dispatcher: HookDispatcher::from_config(&config),
            catalog: PluginCatalog::new(),
            config,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PluginsConfig {
        &self.config
    }

    /// Config for `name` from the config file, or the default.
    pub fn plugin_config(&self, name: &str) -> PluginConfig {
        self.config.entry(name)
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Load and initialize one plugin.
    ///
    /// Every dependency must already be ACTIVE. A failed `initialize` leaves
    /// the plugin registered in ERROR state and returns
    /// [`PluginError::Initialization`].
    pub async fn load(
        &self,
        plugin: Arc<dyn Plugin>,
        config: PluginConfig,
    ) -> PluginResult<LoadStatus> {
        let mut descriptor = plugin.descriptor().clone();
        descriptor.validate()?;
        check_capabilities(plugin.as_ref())?;
        let name = descriptor.name.clone();

        if !config.enabled {
            info!(plugin = %name, "plugin disabled by config, skipping");
            return Ok(LoadStatus::Disabled);
        }

        let validation = validate_plugin_config(&name, &config);
        if validation.has_errors() {
            return Err(PluginError::Config {
                plugin: name,
                reason: validation.error_summary(),
            });
        }

        if self.registry.snapshot().contains(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }

        for dependency in &descriptor.dependencies {
            let state = self.registry.get_state(dependency);
            if state != LifecycleState::Active {
                return Err(PluginError::Dependency {
                    plugin: name,
                    dependency: dependency.clone(),
                    state,
                });
            }
        }

        if let Some(priority) = config.priority {
            descriptor.priority = priority;
        }
        let priority = descriptor.priority;
        let version = descriptor.version.to_string();

        self.registry
            .add(Arc::clone(&plugin), descriptor, config.clone())?;
        self.dispatcher.set_owner_timeout(&name, config.timeout());
        self.registry.set_state(&name, LifecycleState::Loaded)?;
        self.registry
            .set_state(&name, LifecycleState::Initializing)?;

        let initialized = self
            .dispatcher
            .run_bounded(&name, "initialize", plugin.initialize(&config))
            .await;

        if let Err(e) = initialized {
            warn!(plugin = %name, error = %e, "plugin failed to initialize");
            self.registry.set_state(&name, LifecycleState::Error)?;
            return Err(PluginError::initialization(&name, e.to_string()));
        }

        self.registry.set_state(&name, LifecycleState::Active)?;
        for subscription in plugin.hooks() {
            self.dispatcher.register(
                subscription.event,
                subscription.callback,
                subscription.priority.unwrap_or(priority),
                &name,
            );
        }

        self.record_active();
        info!(plugin = %name, %version, %priority, "plugin active");
        self.dispatcher
            .execute(
                &HookEvent::PluginLoaded,
                &json!({ "plugin": name, "version": version }),
                false,
            )
            .await;
        Ok(LoadStatus::Active)
    }

    /// Load a batch in dependency order.
    ///
    /// A dependency cycle fails the whole batch before anything is
    /// initialized. Any other failure only affects that plugin and, through
    /// the dependency check, the plugins that need it.
    pub async fn load_batch(
        &self,
        batch: Vec<(Arc<dyn Plugin>, PluginConfig)>,
    ) -> PluginResult<LoadReport> {
        let descriptors: Vec<_> = batch.iter().map(|(p, _)| p.descriptor().clone()).collect();
        let order = resolver::load_order(&descriptors)?;

        let mut slots: Vec<Option<(Arc<dyn Plugin>, PluginConfig)>> =
            batch.into_iter().map(Some).collect();
        let mut report = LoadReport::default();
        for index in order {
            let Some((plugin, config)) = slots[index].take() else {
                continue;
            };
            let name = descriptors[index].name.clone();
            match self.load(plugin, config).await {
                Ok(LoadStatus::Active) => report.loaded.push(name),
                Ok(LoadStatus::Disabled) => report.disabled.push(name),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "plugin load failed");
                    report.failed.push((name, e));
                },
            }
        }

        info!(
            loaded = report.loaded.len(),
            disabled = report.disabled.len(),
            failed = report.failed.len(),
            "plugin batch loaded"
        );
        Ok(report)
    }

    /// Discover manifests, build their plugins from the catalog, and load
    /// them as one batch. Config file entries take precedence over a
    /// manifest's own `[config]`.
    pub async fn discover_and_load(
        &self,
        discoverer: &dyn PluginDiscoverer,
    ) -> PluginResult<LoadReport> {
        let discovered = discoverer.discover().await;
        let mut rejected: Vec<(String, PluginError)> = discovered
            .errors
            .into_iter()
            .map(|(path, e)| (path.display().to_string(), e))
            .collect();

        let mut batch = Vec::with_capacity(discovered.manifests.len());
        for (path, manifest) in discovered.manifests {
            match self.catalog.instantiate(&manifest) {
                Ok(plugin) => {
                    let config = self
                        .config
                        .entries
                        .get(&manifest.name)
                        .cloned()
                        .or(manifest.config)
                        .unwrap_or_default();
                    batch.push((plugin, config));
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot build plugin");
                    rejected.push((manifest.name, e));
                },
            }
        }

        let mut report = self.load_batch(batch).await?;
        rejected.append(&mut report.failed);
        report.failed = rejected;
        Ok(report)
    }

    // ── Unloading and state changes ─────────────────────────────────────────

    /// Shut down and remove a plugin. Shutdown failures are logged only.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let dependents: Vec<String> = snapshot
            .dependents_of(name)
            .into_iter()
            .filter(|d| snapshot.state(d) != LifecycleState::Unloading)
            .collect();
        if !dependents.is_empty() {
            warn!(plugin = name, ?dependents, "unloading plugin that others depend on");
        }
        drop(snapshot);

        self.registry.set_state(name, LifecycleState::Unloading)?;
        self.dispatcher.suspend_owner(name);

        if entry.state.was_initialized()
            && let Err(e) = self
                .dispatcher
                .run_bounded(name, "shutdown", entry.plugin.shutdown())
                .await
        {
            warn!(plugin = name, error = %e, "plugin shutdown failed");
        }

        let removed = self.dispatcher.clear_owner(name);
        self.registry.remove(name)?;

        self.record_active();
        info!(plugin = name, hooks_removed = removed, "plugin unloaded");
        self.dispatcher
            .execute(&HookEvent::PluginUnloaded, &json!({ "plugin": name }), false)
            .await;
        Ok(())
    }

    /// Unload then load the same instance with its stored config.
    pub async fn reload(&self, name: &str) -> PluginResult<LoadStatus> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        self.unload(name).await?;
        self.load(entry.plugin, entry.config).await
    }

    /// ACTIVE -> PAUSED. The plugin keeps its hooks but they are skipped.
    pub fn pause(&self, name: &str) -> PluginResult<()> {
        self.registry.set_state(name, LifecycleState::Paused)?;
        self.dispatcher.suspend_owner(name);
        self.record_active();
        Ok(())
    }

    pub fn resume(&self, name: &str) -> PluginResult<()> {
        self.registry.set_state(name, LifecycleState::Active)?;
        self.dispatcher.resume_owner(name);
        self.record_active();
        Ok(())
    }

    /// Take an ACTIVE plugin out of service. Only unload leaves ERROR.
    pub fn mark_error(&self, name: &str, reason: &str) -> PluginResult<()> {
        self.registry.set_state(name, LifecycleState::Error)?;
        self.dispatcher.suspend_owner(name);
        self.record_active();
        warn!(plugin = name, reason, "plugin marked as failed");
        Ok(())
    }

    /// Unload everything, dependents before their dependencies.
    pub async fn shutdown(&self) {
        let snapshot = self.registry.snapshot();
        let descriptors: Vec<_> = snapshot
            .entries()
            .into_iter()
            .map(|e| e.descriptor.clone())
            .collect();
        drop(snapshot);

        for index in resolver::shutdown_order(&descriptors) {
            let name = &descriptors[index].name;
            if let Err(e) = self.unload(name).await {
                warn!(plugin = %name, error = %e, "failed to unload during shutdown");
            }
        }
        info!("plugin manager shut down");
    }

    // ── Hooks ───────────────────────────────────────────────────────────────

    pub fn register_hook(
        &self,
        event: HookEvent,
        callback: Arc<dyn HookCallback>,
        priority: Priority,
        owner: &str,
    ) {
        self.dispatcher.register(event, callback, priority, owner);
    }

    pub fn unregister_hook(&self, event: &HookEvent, owner: &str) -> bool {
        self.dispatcher.unregister(event, owner)
    }

    pub async fn execute_hook(
        &self,
        event: &HookEvent,
        context: &Value,
        fail_fast: bool,
    ) -> Vec<HookOutcome> {
        self.dispatcher.execute(event, context, fail_fast).await
    }

    // ── Pipeline ────────────────────────────────────────────────────────────

    /// Thread `message` through every ACTIVE message processor in priority
    /// order. A failing processor is skipped and its input passed on, so the
    /// result is always `Ok`.
    pub async fn execute_message_processors(
        &self,
        message: Message,
        context: &ChatContext,
    ) -> PluginResult<Message> {
        let snapshot = self.registry.snapshot();
        let mut current = message;
        for entry in snapshot.active(PluginCategory::MessageProcessor) {
            let Some(processor) = entry.plugin.as_message_processor() else {
                continue;
            };
            let name = &entry.descriptor.name;
            let call = processor.process_message(current.clone(), context);
            match self.dispatcher.guard(name, "process_message", call).await {
                Ok(next) => current = next,
                Err(e) => degraded(name, "process_message", &e),
            }
        }
        Ok(current)
    }

    /// Thread the context through every ACTIVE feature extension.
    pub async fn apply_extensions(&self, context: ChatContext) -> ChatContext {
        let snapshot = self.registry.snapshot();
        let mut current = context;
        for entry in snapshot.active(PluginCategory::FeatureExtension) {
            let Some(extension) = entry.plugin.as_feature_extension() else {
                continue;
            };
            let name = &entry.descriptor.name;
            let call = extension.extend(current.clone());
            match self.dispatcher.guard(name, "extend", call).await {
                Ok(next) => current = next,
                Err(e) => degraded(name, "extend", &e),
            }
        }
        current
    }

    /// Request side of the middleware chain, in priority order.
    pub async fn process_request(&self, context: ChatContext) -> ChatContext {
        let snapshot = self.registry.snapshot();
        let mut current = context;
        for entry in snapshot.active(PluginCategory::Middleware) {
            let Some(middleware) = entry.plugin.as_middleware() else {
                continue;
            };
            let name = &entry.descriptor.name;
            let call = middleware.process_request(current.clone());
            match self.dispatcher.guard(name, "process_request", call).await {
                Ok(next) => current = next,
                Err(e) => degraded(name, "process_request", &e),
            }
        }
        current
    }

    /// Response side of the middleware chain, in reverse priority order.
    pub async fn process_response(&self, response: Message, context: &ChatContext) -> Message {
        let snapshot = self.registry.snapshot();
        let mut current = response;
        for entry in snapshot.active(PluginCategory::Middleware).into_iter().rev() {
            let Some(middleware) = entry.plugin.as_middleware() else {
                continue;
            };
            let name = &entry.descriptor.name;
            let call = middleware.process_response(current.clone(), context);
            match self.dispatcher.guard(name, "process_response", call).await {
                Ok(next) => current = next,
                Err(e) => degraded(name, "process_response", &e),
            }
        }
        current
    }

    fn backend(&self, name: &str) -> PluginResult<PluginEntry> {
        self.registry
            .get(name)
            .filter(|e| {
                e.state == LifecycleState::Active
                    && e.descriptor.category == PluginCategory::BackendProvider
                    && e.plugin.as_backend_provider().is_some()
            })
            .ok_or_else(|| PluginError::MissingBackend(name.to_string()))
    }

    /// Names of ACTIVE backend providers in priority order.
    pub fn backends(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .active(PluginCategory::BackendProvider)
            .into_iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    /// Ask one backend for a chat response. Errors are the caller's to handle.
    pub async fn chat(&self, backend: &str, context: &ChatContext) -> PluginResult<ChatOutput> {
        let entry = self.backend(backend)?;
        let provider = entry
            .plugin
            .as_backend_provider()
            .ok_or_else(|| PluginError::MissingBackend(backend.to_string()))?;
        self.dispatcher
            .guard(backend, "chat", provider.chat(context))
            .await
    }

    pub async fn list_models(&self, backend: &str) -> PluginResult<Vec<String>> {
        let entry = self.backend(backend)?;
        let provider = entry
            .plugin
            .as_backend_provider()
            .ok_or_else(|| PluginError::MissingBackend(backend.to_string()))?;
        self.dispatcher
            .guard(backend, "list_models", provider.list_models())
            .await
    }

    /// Full request flow: hooks, request middleware, extensions, message
    /// processors on the latest user message, backend call, response
    /// middleware. Streaming output skips the response middleware.
    pub async fn handle_chat(
        &self,
        backend: &str,
        context: ChatContext,
    ) -> PluginResult<ChatOutput> {
        self.dispatcher
            .execute(&HookEvent::RequestReceived, &to_value(&context), false)
            .await;

        let context = self.process_request(context).await;
        let mut context = self.apply_extensions(context).await;
        if let Some(index) = context.last_user_index() {
            let message = context.messages[index].clone();
            let processed = self.execute_message_processors(message, &context).await?;
            context.messages[index] = processed;
        }

        self.dispatcher
            .execute(&HookEvent::BeforeBackendCall, &to_value(&context), false)
            .await;

        let output = self.chat(backend, &context).await?;
        let output = match output {
            ChatOutput::Message(response) => {
                let response = self.process_response(response, &context).await;
                self.dispatcher
                    .execute(
                        &HookEvent::AfterBackendCall,
                        &json!({ "backend": backend, "response": to_value(&response) }),
                        false,
                    )
                    .await;
                ChatOutput::Message(response)
            },
            ChatOutput::Stream(stream) => {
                self.dispatcher
                    .execute(
                        &HookEvent::AfterBackendCall,
                        &json!({ "backend": backend, "stream": true }),
                        false,
                    )
                    .await;
                ChatOutput::Stream(stream)
            },
        };
        Ok(output)
    }

    // ── Observability ───────────────────────────────────────────────────────

    /// Lifecycle state and health of every registered plugin, in load order.
    pub async fn status(&self) -> StatusSnapshot {
        let snapshot = self.registry.snapshot();
        let mut plugins = Vec::with_capacity(snapshot.len());
        for entry in snapshot.entries() {
            let name = &entry.descriptor.name;
            let health = if entry.state.was_initialized() {
                let checked = self
                    .dispatcher
                    .run_bounded(name, "health_check", entry.plugin.health_check())
                    .await;
                Some(checked.unwrap_or_else(|e| {
                    HealthReport::unhealthy(json!({ "error": e.to_string() }))
                }))
            } else {
                None
            };
            plugins.push(PluginStatus {
                name: name.clone(),
                version: entry.descriptor.version.to_string(),
                category: entry.descriptor.category,
                priority: entry.descriptor.priority,
                state: entry.state,
                dependencies: entry.descriptor.dependencies.clone(),
                health,
            });
        }

        StatusSnapshot {
            plugins,
            breakers: self.dispatcher.breaker_statuses(),
            metrics: self.dispatcher.metrics(None),
        }
    }

    /// Invocation statistics, globally or for one plugin.
    pub fn metrics(&self, plugin: Option<&str>) -> HookMetrics {
        self.dispatcher.metrics(plugin)
    }

    fn record_active(&self) {
        #[cfg(feature = "metrics")]
        {
            let snapshot = self.registry.snapshot();
            let active = snapshot
                .entries()
                .iter()
                .filter(|e| e.state == LifecycleState::Active)
                .count();
            gauge!(plugin_metrics::ACTIVE).set(active as f64);
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(PluginsConfig::default())
    }
}

fn degraded(plugin: &str, operation: &str, error: &PluginError) {
    match error {
        PluginError::CircuitOpen { .. } => {
            debug!(plugin, operation, "circuit open, skipping plugin");
        },
        _ => warn!(plugin, operation, %error, "plugin failed, continuing without it"),
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            descriptor::PluginDescriptor,
            plugin::{BackendProvider, MessageProcessor, Middleware},
        },
        async_trait::async_trait,
        semver::Version,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Appends a suffix to messages; optionally fails every call.
    struct Suffix {
        descriptor: PluginDescriptor,
        suffix: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Suffix {
        fn new(name: &str, suffix: &'static str) -> Arc<Self> {
            Arc::new(Self {
                descriptor: PluginDescriptor::new(
                    name,
                    Version::new(1, 0, 0),
                    PluginCategory::MessageProcessor,
                ),
                suffix,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                descriptor: PluginDescriptor::new(
                    name,
                    Version::new(1, 0, 0),
                    PluginCategory::MessageProcessor,
                ),
                suffix: "",
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Plugin for Suffix {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        async fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
            Ok(())
        }

        fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
            Some(self)
        }
    }

    #[async_trait]
    impl MessageProcessor for Suffix {
        async fn process_message(
            &self,
            mut message: Message,
            _context: &ChatContext,
        ) -> PluginResult<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::execution(
                    &self.descriptor.name,
                    "process_message",
                    "broken",
                ));
            }
            message.content.push_str(self.suffix);
            Ok(message)
        }
    }

    /// Records the order it sees requests and responses in.
    struct Tracer {
        descriptor: PluginDescriptor,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Tracer {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        async fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
            Ok(())
        }

        fn as_middleware(&self) -> Option<&dyn Middleware> {
            Some(self)
        }
    }

    #[async_trait]
    impl Middleware for Tracer {
        async fn process_request(&self, context: ChatContext) -> PluginResult<ChatContext> {
            self.log
                .lock()
                .unwrap()
                .push(format!("req:{}", self.descriptor.name));
            Ok(context)
        }

        async fn process_response(
            &self,
            response: Message,
            _context: &ChatContext,
        ) -> PluginResult<Message> {
            self.log
                .lock()
                .unwrap()
                .push(format!("resp:{}", self.descriptor.name));
            Ok(response)
        }
    }

    struct Echo(PluginDescriptor);

    #[async_trait]
    impl Plugin for Echo {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.0
        }

        async fn initialize(&self, _config: &PluginConfig) -> PluginResult<()> {
            Ok(())
        }

        fn as_backend_provider(&self) -> Option<&dyn BackendProvider> {
            Some(self)
        }
    }

    #[async_trait]
    impl BackendProvider for Echo {
        async fn chat(&self, context: &ChatContext) -> PluginResult<ChatOutput> {
            let last = context.last_user_message().map(|m| m.content.clone());
            Ok(ChatOutput::Message(Message::assistant(format!(
                "echo: {}",
                last.unwrap_or_default()
            ))))
        }

        async fn list_models(&self) -> PluginResult<Vec<String>> {
            Ok(vec!["echo-1".into()])
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo(PluginDescriptor::new(
            "echo",
            Version::new(0, 1, 0),
            PluginCategory::BackendProvider,
        )))
    }

    fn tracer(name: &str, priority: Priority, log: &Arc<Mutex<Vec<String>>>) -> Arc<Tracer> {
        Arc::new(Tracer {
            descriptor: PluginDescriptor::new(
                name,
                Version::new(1, 0, 0),
                PluginCategory::Middleware,
            )
            .with_priority(priority),
            log: Arc::clone(log),
        })
    }

    fn context(text: &str) -> ChatContext {
        ChatContext::new("s1").with_message(Message::user(text))
    }

    #[tokio::test]
    async fn load_activates_and_unload_removes() {
        let manager = PluginManager::default();
        let status = manager
            .load(Suffix::new("bang", "!"), PluginConfig::default())
            .await
            .unwrap();
        assert_eq!(status, LoadStatus::Active);
        assert_eq!(manager.registry().get_state("bang"), LifecycleState::Active);

        manager.unload("bang").await.unwrap();
        assert_eq!(manager.registry().get_state("bang"), LifecycleState::Unloaded);
        assert!(matches!(
            manager.unload("bang").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn disabled_plugins_are_not_registered() {
        let manager = PluginManager::default();
        let status = manager
            .load(Suffix::new("bang", "!"), PluginConfig::disabled())
            .await
            .unwrap();
        assert_eq!(status, LoadStatus::Disabled);
        assert!(manager.registry().snapshot().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_initialize() {
        let manager = PluginManager::default();
        let err = manager
            .load(Suffix::new("bang", "!"), PluginConfig::default().with_timeout(0))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Config { .. }));
        assert!(manager.registry().snapshot().is_empty());
    }

    #[tokio::test]
    async fn duplicate_load_is_rejected() {
        let manager = PluginManager::default();
        manager
            .load(Suffix::new("bang", "!"), PluginConfig::default())
            .await
            .unwrap();
        let err = manager
            .load(Suffix::new("bang", "?"), PluginConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(_)));
    }

    #[tokio::test]
    async fn processors_run_in_priority_order_and_failures_degrade() {
        let manager = PluginManager::default();
        manager
            .load(Suffix::new("second", "-2"), PluginConfig::default())
            .await
            .unwrap();
        manager
            .load(Suffix::failing("broken"), PluginConfig::default())
            .await
            .unwrap();
        manager
            .load(
                Suffix::new("first", "-1"),
                PluginConfig::default().with_priority(Priority::High),
            )
            .await
            .unwrap();

        let out = manager
            .execute_message_processors(Message::user("hi"), &context("hi"))
            .await
            .unwrap();
        assert_eq!(out.content, "hi-1-2");
        assert_eq!(manager.metrics(Some("broken")).failures, 1);
    }

    #[tokio::test]
    async fn middleware_wraps_the_backend_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = PluginManager::default();
        manager
            .load(tracer("outer", Priority::High, &log), PluginConfig::default())
            .await
            .unwrap();
        manager
            .load(tracer("inner", Priority::Normal, &log), PluginConfig::default())
            .await
            .unwrap();
        manager
            .load(Suffix::new("bang", "!"), PluginConfig::default())
            .await
            .unwrap();
        manager.load(echo(), PluginConfig::default()).await.unwrap();

        let output = manager.handle_chat("echo", context("hello")).await.unwrap();
        assert_eq!(output.into_message().unwrap().content, "echo: hello!");
        assert_eq!(*log.lock().unwrap(), vec![
            "req:outer",
            "req:inner",
            "resp:inner",
            "resp:outer"
        ]);
    }

    #[tokio::test]
    async fn missing_or_paused_backend_is_an_error() {
        let manager = PluginManager::default();
        assert!(matches!(
            manager.chat("echo", &context("x")).await,
            Err(PluginError::MissingBackend(_))
        ));

        manager.load(echo(), PluginConfig::default()).await.unwrap();
        assert_eq!(manager.list_models("echo").await.unwrap(), vec!["echo-1"]);
        assert_eq!(manager.backends(), vec!["echo"]);

        manager.pause("echo").unwrap();
        assert!(manager.chat("echo", &context("x")).await.is_err());
        manager.resume("echo").unwrap();
        assert!(manager.chat("echo", &context("x")).await.is_ok());
    }

    #[tokio::test]
    async fn paused_processors_are_skipped() {
        let manager = PluginManager::default();
        let bang = Suffix::new("bang", "!");
        manager
            .load(bang.clone(), PluginConfig::default())
            .await
            .unwrap();
        manager.pause("bang").unwrap();

        let out = manager
            .execute_message_processors(Message::user("hi"), &context("hi"))
            .await
            .unwrap();
        assert_eq!(out.content, "hi");
        assert_eq!(bang.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reload_keeps_config() {
        let manager = PluginManager::default();
        manager
            .load(
                Suffix::new("bang", "!"),
                PluginConfig::default().with_priority(Priority::Low),
            )
            .await
            .unwrap();
        assert_eq!(manager.reload("bang").await.unwrap(), LoadStatus::Active);
        let entry = manager.registry().get("bang").unwrap();
        assert_eq!(entry.descriptor.priority, Priority::Low);
    }

    #[tokio::test]
    async fn status_reports_state_and_health() {
        let manager = PluginManager::default();
        manager.load(echo(), PluginConfig::default()).await.unwrap();
        manager.chat("echo", &context("x")).await.unwrap();

        let status = manager.status().await;
        assert_eq!(status.plugins.len(), 1);
        assert_eq!(status.plugins[0].state, LifecycleState::Active);
        assert!(status.plugins[0].health.as_ref().unwrap().healthy);
        assert_eq!(status.metrics.invocations, 1);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["plugins"][0]["category"], "backend-provider");
    }
}
