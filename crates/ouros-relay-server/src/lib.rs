//! HTTP and WebSocket front end for the Ouros session relay.
//!
//! Exposes three access patterns over one [`SessionStore`](ouros_relay::SessionStore):
//!
//! - `POST /exec` runs a snippet in a throwaway context.
//! - `POST /session` then `POST /exec/{session_id}` run snippets in a
//!   persistent, addressable context.
//! - `GET /ws` opens a live REPL channel with streamed output.
//!
//! Sessions can be listed with `GET /sessions` and torn down early with
//! `DELETE /session/{session_id}`; otherwise the reaper removes them once
//! they have been idle for the configured window.

pub mod api_error;
pub mod args;
pub mod http;
pub mod live;
pub mod router;

pub use crate::{
    api_error::ApiError,
    args::Args,
    router::{AppState, build_router, serve},
};
