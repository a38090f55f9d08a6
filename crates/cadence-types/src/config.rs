//! Configuration types for Cadence.
//!
//! `AppConfig` represents the top-level `cadence.toml`. The engine itself
//! only needs `EngineConfig`; the rest is consumed by the binary.

use serde::{Deserialize, Serialize};

/// Top-level configuration file.
///
/// All sections are optional and fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agents exposed by the in-process demo agent directory.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// Tuning knobs for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission limit for simultaneously active (non-terminal) executions.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Timeout applied to steps that declare none. `None` disables it.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: Option<u64>,

    /// Sub-step concurrency for `parallel` steps that declare none.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Cap for exponential backoff when a retry policy sets no `max_delay_ms`.
    #[serde(default = "default_max_backoff_delay_ms")]
    pub max_backoff_delay_ms: u64,

    /// Broadcast channel capacity for lifecycle events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Register the built-in `task_assignment` workflow on startup.
    #[serde(default = "default_true")]
    pub seed_builtin_workflows: bool,
}

fn default_max_concurrent_executions() -> usize {
    10
}

fn default_step_timeout_ms() -> Option<u64> {
    Some(300_000)
}

fn default_max_parallelism() -> usize {
    4
}

fn default_max_backoff_delay_ms() -> u64 {
    60_000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent_executions(),
            default_step_timeout_ms: default_step_timeout_ms(),
            max_parallelism: default_max_parallelism(),
            max_backoff_delay_ms: default_max_backoff_delay_ms(),
            event_capacity: default_event_capacity(),
            seed_builtin_workflows: default_true(),
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            otel: false,
        }
    }
}

/// An agent known to the demo agent directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}
