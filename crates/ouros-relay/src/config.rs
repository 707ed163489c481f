//! Limits and timeouts shared by the session store and the engine.

use std::time::Duration;

/// Default inactivity window after which a session may be reclaimed.
///
/// Mirrors the idle-sleep policy of the instance hosting the interpreter.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default period of the background reaper.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);
/// Shortest reaper period accepted.
pub const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);
/// Longest reaper period accepted.
pub const MAX_REAP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default cap on concurrently registered sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 256;
/// Default cap on stateless executions running at once.
pub const DEFAULT_MAX_EPHEMERAL_CONTEXTS: usize = 64;
/// Default time an HTTP caller waits for a busy session before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default wall-clock budget for a single submission.
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);
/// Default cap on captured output per submission (1 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
/// Default VM operation budget per submission.
pub const DEFAULT_MAX_OPERATIONS: usize = 10_000_000;
/// Default allocation budget per interpreter context.
pub const DEFAULT_MAX_ALLOCATIONS: usize = 1_000_000;
/// Default memory cap per interpreter context (256 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 256 * 1024 * 1024;

/// Session store configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Sessions untouched for longer than this are eligible for reaping.
    pub idle_timeout: Duration,
    /// How often the background reaper scans the registry.
    pub reap_interval: Duration,
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Maximum number of throwaway contexts alive at once for stateless
    /// execution.
    pub max_ephemeral_contexts: usize,
    /// How long a waiting HTTP caller blocks on a busy session.
    pub busy_timeout: Duration,
    /// Limits applied by the engine to every context it creates.
    pub engine: EngineLimits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_ephemeral_contexts: DEFAULT_MAX_EPHEMERAL_CONTEXTS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            engine: EngineLimits::default(),
        }
    }
}

impl RelayConfig {
    /// The reaper period, clamped to `MIN_REAP_INTERVAL..=MAX_REAP_INTERVAL`.
    #[must_use]
    pub fn effective_reap_interval(&self) -> Duration {
        self.reap_interval.clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL)
    }
}

/// Per-context and per-submission resource limits enforced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLimits {
    /// Wall-clock cap for one submission.
    pub max_execution_time: Duration,
    /// Output beyond this many bytes is dropped and the result marked truncated.
    pub max_output_bytes: usize,
    /// VM operation budget per submission.
    pub max_operations: usize,
    /// Heap allocation budget per context.
    pub max_allocations: usize,
    /// Approximate heap memory cap per context.
    pub max_memory_bytes: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_allocations: DEFAULT_MAX_ALLOCATIONS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}
