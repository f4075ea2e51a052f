//! Hook dispatcher: priority-ordered callbacks per event, isolated by
//! per-(owner, event) circuit breakers and a bounded time budget.
//!
//! Registrations for an event live in an immutable `Arc<Vec<_>>` that is
//! replaced wholesale on every register/unregister. `execute` clones the
//! `Arc` once up front, so an in-flight execution never sees registrations
//! made after it started and never skips or repeats an entry.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    parlor_common::Priority,
    parlor_config::PluginsConfig,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::sync::{Semaphore, SemaphorePermit},
    tracing::{debug, info, warn},
};

use crate::{
    circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    error::{PluginError, PluginResult},
    metrics::{HookMetrics, MetricsRecorder},
};

// ── HookEvent ───────────────────────────────────────────────────────────────

/// Named event types hooks can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// A chat request entered the manager, before any processing.
    RequestReceived,
    /// The processed request is about to be handed to the backend.
    BeforeBackendCall,
    /// The backend returned (or started streaming) a response.
    AfterBackendCall,
    PluginLoaded,
    PluginUnloaded,
    /// Application-defined event.
    Custom(String),
}

impl HookEvent {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RequestReceived => "request_received",
            Self::BeforeBackendCall => "before_backend_call",
            Self::AfterBackendCall => "after_backend_call",
            Self::PluginLoaded => "plugin_loaded",
            Self::PluginUnloaded => "plugin_unloaded",
            Self::Custom(name) => name,
        }
    }
}

impl HookEvent {
    /// Breaker and metrics key for hooks on this event. Prefixed so a custom
    /// event never shares state with a pipeline operation of the same name.
    pub fn operation(&self) -> String {
        format!("hook:{}", self.as_str())
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── HookCallback ────────────────────────────────────────────────────────────

#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, event: &HookEvent, context: &Value) -> PluginResult<Value>;
}

struct FnHook<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> HookCallback for FnHook<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<Value>> + Send,
{
    async fn call(&self, _event: &HookEvent, context: &Value) -> PluginResult<Value> {
        (self.f)(context.clone()).await
    }
}

/// Wrap an async closure as a hook callback.
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn HookCallback>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<Value>> + Send + 'static,
{
    Arc::new(FnHook { f })
}

// ── Registrations and outcomes ──────────────────────────────────────────────

#[derive(Clone)]
pub struct HookRegistration {
    pub event: HookEvent,
    pub owner: String,
    pub priority: Priority,
    /// Global registration counter; breaks ties within a priority tier.
    pub sequence: u64,
    callback: Arc<dyn HookCallback>,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// One callback's contribution to an `execute` call.
#[derive(Debug)]
pub struct HookOutcome {
    pub owner: String,
    pub priority: Priority,
    pub result: PluginResult<Value>,
}

impl HookOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Breaker state for one (owner, operation) key, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub owner: String,
    pub operation: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

// ── HookDispatcher ──────────────────────────────────────────────────────────

pub struct HookDispatcher {
    hooks: RwLock<HashMap<HookEvent, Arc<Vec<HookRegistration>>>>,
    sequence: AtomicU64,
    breakers: Mutex<HashMap<(String, String), CircuitBreaker>>,
    breaker_config: BreakerConfig,
    default_timeout: Duration,
    owner_timeouts: RwLock<HashMap<String, Duration>>,
    suspended: RwLock<HashSet<String>>,
    limiter: Semaphore,
    metrics: MetricsRecorder,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            breakers: Mutex::new(HashMap::new()),
            breaker_config: BreakerConfig::default(),
            default_timeout: Duration::from_secs(30),
            owner_timeouts: RwLock::new(HashMap::new()),
            suspended: RwLock::new(HashSet::new()),
            limiter: Semaphore::new(16),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn from_config(config: &PluginsConfig) -> Self {
        Self::new()
            .with_circuit_breaker(config.failure_threshold, config.breaker_timeout())
            .with_default_timeout(config.hook_timeout())
            .with_max_concurrent(config.max_concurrent)
    }

    /// Set circuit breaker parameters.
    #[must_use]
    pub fn with_circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
        self.breaker_config = BreakerConfig {
            failure_threshold: threshold.max(1),
            timeout,
        };
        self
    }

    /// Time budget for a guarded call when the owner has no override.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Cap on plugin calls in flight at once, guarded and lifecycle alike;
    /// excess callers wait.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.limiter = Semaphore::new(max.max(1));
        self
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Register `callback` for `event` on behalf of `owner`.
    ///
    /// An existing registration by the same owner for the same event is
    /// replaced; the replacement gets a fresh sequence number.
    pub fn register(
        &self,
        event: HookEvent,
        callback: Arc<dyn HookCallback>,
        priority: Priority,
        owner: &str,
    ) {
        let registration = HookRegistration {
            event: event.clone(),
            owner: owner.to_string(),
            priority,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            callback,
        };

        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<HookRegistration> = hooks
            .get(&event)
            .map(|current| {
                current
                    .iter()
                    .filter(|r| r.owner != owner)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        list.push(registration);
        list.sort_by_key(|r| (r.priority, r.sequence));
        hooks.insert(event.clone(), Arc::new(list));
        drop(hooks);

        info!(owner, event = %event, %priority, "hook registered");
    }

    /// Remove `owner`'s registration for `event`. No-op if absent.
    pub fn unregister(&self, event: &HookEvent, owner: &str) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let Some(current) = hooks.get(event) else {
            return false;
        };
        if !current.iter().any(|r| r.owner == owner) {
            return false;
        }
        let remaining: Vec<HookRegistration> = current
            .iter()
            .filter(|r| r.owner != owner)
            .cloned()
            .collect();
        if remaining.is_empty() {
            hooks.remove(event);
        } else {
            hooks.insert(event.clone(), Arc::new(remaining));
        }
        drop(hooks);

        debug!(owner, event = %event, "hook unregistered");
        true
    }

    /// Remove every registration `owner` holds, across all events.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        hooks.retain(|_, list| {
            let before = list.len();
            if list.iter().any(|r| r.owner == owner) {
                let remaining: Vec<HookRegistration> =
                    list.iter().filter(|r| r.owner != owner).cloned().collect();
                *list = Arc::new(remaining);
            }
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Drop all per-owner state: hooks, breakers, stats, overrides and
    /// suspension.
    pub fn clear_owner(&self, owner: &str) -> usize {
        let removed = self.unregister_owner(owner);
        self.metrics.clear_owner(owner);
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(o, _), _| o != owner);
        self.owner_timeouts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(owner);
        self.suspended
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(owner);
        removed
    }

    /// Point-in-time copy of the registrations for `event`, in execution order.
    pub fn registrations(&self, event: &HookEvent) -> Arc<Vec<HookRegistration>> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if any handlers are registered for the given event.
    pub fn has_hooks(&self, event: &HookEvent) -> bool {
        !self.registrations(event).is_empty()
    }

    /// Skip `owner`'s hooks until [`resume_owner`](Self::resume_owner).
    pub fn suspend_owner(&self, owner: &str) {
        self.suspended
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(owner.to_string());
    }

    pub fn resume_owner(&self, owner: &str) {
        self.suspended
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(owner);
    }

    pub fn is_suspended(&self, owner: &str) -> bool {
        self.suspended
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(owner)
    }

    /// Override the time budget for `owner`'s guarded calls (`None` clears it).
    pub fn set_owner_timeout(&self, owner: &str, timeout: Option<Duration>) {
        let mut timeouts = self.owner_timeouts.write().unwrap_or_else(|e| e.into_inner());
        match timeout {
            Some(t) => timeouts.insert(owner.to_string(), t),
            None => timeouts.remove(owner),
        };
    }

    pub fn timeout_for(&self, owner: &str) -> Duration {
        self.owner_timeouts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    // ── Execution ───────────────────────────────────────────────────────────

    /// Run every hook registered for `event` in priority order.
    ///
    /// Failures never escape: each callback's error, timeout, panic or open
    /// circuit becomes a failed [`HookOutcome`]. With `fail_fast`, execution
    /// stops after the first failed outcome.
    pub async fn execute(
        &self,
        event: &HookEvent,
        context: &Value,
        fail_fast: bool,
    ) -> Vec<HookOutcome> {
        let snapshot = self.registrations(event);
        if snapshot.is_empty() {
            return Vec::new();
        }

        debug!(event = %event, count = snapshot.len(), "dispatching hook event");

        let operation = event.operation();
        let mut outcomes = Vec::with_capacity(snapshot.len());
        for registration in snapshot.iter() {
            if self.is_suspended(&registration.owner) {
                debug!(owner = %registration.owner, event = %event, "owner suspended, skipping hook");
                continue;
            }

            let result = self
                .guard(
                    &registration.owner,
                    &operation,
                    registration.callback.call(event, context),
                )
                .await;

            if let Err(e) = &result {
                warn!(owner = %registration.owner, event = %event, error = %e, "hook failed");
            }
            let failed = result.is_err();
            outcomes.push(HookOutcome {
                owner: registration.owner.clone(),
                priority: registration.priority,
                result,
            });
            if fail_fast && failed {
                break;
            }
        }
        outcomes
    }

    /// Run `call` on behalf of `owner` with full fault isolation: circuit
    /// breaker, concurrency limit, time budget and panic capture.
    ///
    /// Dropping the returned future while a half-open trial is in flight
    /// counts the trial as failed, so the circuit reopens.
    pub async fn guard<T, Fut>(&self, owner: &str, operation: &str, call: Fut) -> PluginResult<T>
    where
        Fut: Future<Output = PluginResult<T>>,
    {
        let Some(admission) = self.admit(owner, operation) else {
            debug!(owner, operation, "circuit open, skipping call");
            self.metrics.record_rejection(owner, operation);
            return Err(PluginError::CircuitOpen {
                plugin: owner.to_string(),
                operation: operation.to_string(),
            });
        };

        let _permit = match self.permit(owner, operation).await {
            Ok(permit) => permit,
            Err(e) => {
                admission.settle(false);
                return Err(e);
            },
        };

        let start = Instant::now();
        let result = self.bounded(owner, operation, call).await;
        let latency = start.elapsed();

        admission.settle(result.is_ok());
        self.metrics
            .record(owner, operation, latency, result.as_ref().err());
        result
    }

    /// Run `call` under the concurrency limit and `owner`'s time budget with
    /// panic capture, without consulting the circuit breaker. Used for
    /// lifecycle operations.
    pub async fn run_bounded<T, Fut>(
        &self,
        owner: &str,
        operation: &str,
        call: Fut,
    ) -> PluginResult<T>
    where
        Fut: Future<Output = PluginResult<T>>,
    {
        let _permit = self.permit(owner, operation).await?;
        self.bounded(owner, operation, call).await
    }

    async fn permit(&self, owner: &str, operation: &str) -> PluginResult<SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|e| PluginError::execution(owner, operation, e.to_string()))
    }

    async fn bounded<T, Fut>(&self, owner: &str, operation: &str, call: Fut) -> PluginResult<T>
    where
        Fut: Future<Output = PluginResult<T>>,
    {
        let budget = self.timeout_for(owner);
        match tokio::time::timeout(budget, AssertUnwindSafe(call).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(PluginError::execution(
                owner,
                operation,
                format!("panicked: {}", panic_message(panic.as_ref())),
            )),
            Err(_) => Err(PluginError::HookTimeout {
                plugin: owner.to_string(),
                operation: operation.to_string(),
                timeout: budget,
            }),
        }
    }

    fn admit<'a>(&'a self, owner: &'a str, operation: &'a str) -> Option<Admission<'a>> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers
            .entry((owner.to_string(), operation.to_string()))
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config));
        if !breaker.can_execute() {
            return None;
        }
        let trial = breaker.state() == CircuitState::HalfOpen;
        if trial {
            info!(owner, operation, "circuit half-open, allowing trial call");
        }
        Some(Admission {
            dispatcher: self,
            owner,
            operation,
            trial,
            settled: false,
        })
    }

    fn record_breaker(&self, owner: &str, operation: &str, success: bool) {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers
            .entry((owner.to_string(), operation.to_string()))
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config));
        let was = breaker.state();
        if success {
            breaker.record_success();
            if was != CircuitState::Closed {
                info!(owner, operation, "circuit closed after successful trial");
            }
        } else {
            breaker.record_failure();
            if was != CircuitState::Open && breaker.state() == CircuitState::Open {
                warn!(
                    owner,
                    operation,
                    failures = breaker.consecutive_failures(),
                    "circuit breaker opened"
                );
            }
        }
    }

    /// Current breaker state for one key, if a call was ever guarded for it.
    pub fn breaker_state(&self, owner: &str, operation: &str) -> Option<CircuitState> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(owner.to_string(), operation.to_string()))
            .map(CircuitBreaker::state)
    }

    /// All breaker states, sorted by owner then operation.
    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<BreakerStatus> = breakers
            .iter()
            .map(|((owner, operation), b)| BreakerStatus {
                owner: owner.clone(),
                operation: operation.clone(),
                state: b.state(),
                consecutive_failures: b.consecutive_failures(),
            })
            .collect();
        drop(breakers);
        statuses.sort_by(|a, b| (&a.owner, &a.operation).cmp(&(&b.owner, &b.operation)));
        statuses
    }

    /// Invocation statistics, globally or for one owner.
    pub fn metrics(&self, owner: Option<&str>) -> HookMetrics {
        self.metrics.snapshot(owner)
    }
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A call let through by its breaker. The outcome is reported through
/// [`settle`](Self::settle); a half-open trial dropped before that is
/// recorded as a failure.
struct Admission<'a> {
    dispatcher: &'a HookDispatcher,
    owner: &'a str,
    operation: &'a str,
    trial: bool,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.dispatcher
            .record_breaker(self.owner, self.operation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            warn!(
                owner = self.owner,
                operation = self.operation,
                "trial call cancelled, reopening circuit"
            );
            self.dispatcher
                .record_breaker(self.owner, self.operation, false);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
