//! Metric name and label definitions.

/// Guarded plugin call metrics
pub mod plugins {
    /// Total number of guarded plugin invocations
    pub const INVOCATIONS_TOTAL: &str = "parlor_plugin_invocations_total";
    /// Guarded invocations that failed, timed out, or panicked
    pub const FAILURES_TOTAL: &str = "parlor_plugin_failures_total";
    /// Calls skipped because the circuit was open
    pub const CIRCUIT_REJECTIONS_TOTAL: &str = "parlor_plugin_circuit_rejections_total";
    /// Duration of guarded invocations in seconds
    pub const INVOCATION_DURATION_SECONDS: &str = "parlor_plugin_invocation_duration_seconds";
    /// Number of plugins currently ACTIVE
    pub const ACTIVE: &str = "parlor_plugins_active";
}

/// Common label keys
pub mod labels {
    pub const PLUGIN: &str = "plugin";
    pub const OPERATION: &str = "operation";
    pub const ERROR_KIND: &str = "error_kind";
}
