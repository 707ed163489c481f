//! Command-line and environment configuration for the relay server.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use ouros_relay::{
    EngineLimits, RelayConfig,
    config::{
        DEFAULT_BUSY_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_EPHEMERAL_CONTEXTS, DEFAULT_MAX_EXECUTION_TIME,
        DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MAX_SESSIONS, DEFAULT_REAP_INTERVAL, MAX_REAP_INTERVAL,
    },
};

/// Remote Python execution with persistent sessions and a live REPL channel.
#[derive(Debug, Clone, Parser)]
#[command(name = "ouros-relay", version, about)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "OUROS_RELAY_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Seconds of inactivity after which a session is reaped.
    #[arg(long, env = "OUROS_RELAY_IDLE_TIMEOUT_SECS", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub idle_timeout_secs: u64,

    /// Seconds between reaper scans.
    #[arg(long, env = "OUROS_RELAY_REAP_INTERVAL_SECS", default_value_t = DEFAULT_REAP_INTERVAL.as_secs())]
    pub reap_interval_secs: u64,

    /// Maximum number of concurrently open sessions.
    #[arg(long, env = "OUROS_RELAY_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Maximum number of stateless executions running at once.
    #[arg(long, env = "OUROS_RELAY_MAX_EPHEMERAL", default_value_t = DEFAULT_MAX_EPHEMERAL_CONTEXTS)]
    pub max_ephemeral: usize,

    /// Seconds an HTTP request waits for a busy session before giving up.
    #[arg(long, env = "OUROS_RELAY_BUSY_TIMEOUT_SECS", default_value_t = DEFAULT_BUSY_TIMEOUT.as_secs())]
    pub busy_timeout_secs: u64,

    /// Wall-clock limit for a single execution, in seconds.
    #[arg(long, env = "OUROS_RELAY_MAX_EXECUTION_SECS", default_value_t = DEFAULT_MAX_EXECUTION_TIME.as_secs())]
    pub max_execution_secs: u64,

    /// Output captured per execution before it is truncated.
    #[arg(long, env = "OUROS_RELAY_MAX_OUTPUT_BYTES", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: usize,
}

impl Args {
    /// Builds the store configuration; unset engine limits keep their defaults.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs.clamp(1, MAX_REAP_INTERVAL.as_secs())),
            max_sessions: self.max_sessions,
            max_ephemeral_contexts: self.max_ephemeral,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            engine: EngineLimits {
                max_execution_time: Duration::from_secs(self.max_execution_secs),
                max_output_bytes: self.max_output_bytes,
                ..EngineLimits::default()
            },
        }
    }
}
