//! Session and execution-protocol layer for remote Ouros interpreters.
//!
//! This crate owns everything between a transport and the interpreter:
//!
//! - [`engine`]: the [`ExecutionEngine`] contract and the Ouros-backed engine.
//! - [`context`]: one worker thread per interpreter context, reached through
//!   a [`ContextHandle`].
//! - [`session_store`]: the registry of addressable sessions, per-session
//!   execution locking, live-channel binding and idle expiry.
//! - [`reaper`]: the periodic task driving expiry.
//!
//! It contains no HTTP or WebSocket concerns; those live in
//! `ouros-relay-server`.

pub mod config;
pub mod context;
pub mod engine;
mod error;
pub mod input;
pub mod output;
pub mod reaper;
pub mod session_store;

pub use crate::{
    config::{EngineLimits, RelayConfig},
    context::{ContextFactory, ContextHandle, ThreadedEngine},
    engine::{ExecutionEngine, ExecutionResult, OurosEngine, Outcome},
    error::RelayError,
    output::{FragmentSender, OutputSink},
    reaper::spawn_reaper,
    session_store::{BusyPolicy, LiveBinding, Session, SessionInfo, SessionStore},
};
