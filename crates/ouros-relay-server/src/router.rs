//! Route table and server loop.

use std::{io, sync::Arc};

use axum::{
    Router,
    routing::{delete, get, post},
};
use ouros_relay::SessionStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{http, live};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    /// Cancelled when the server begins shutting down; live channels close
    /// on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, shutdown: CancellationToken) -> Self {
        Self { store, shutdown }
    }
}

/// Builds the HTTP and live-channel routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/exec", post(http::exec_stateless))
        .route("/exec/{session_id}", post(http::exec_in_session))
        .route("/session", post(http::create_session))
        .route("/session/{session_id}", delete(http::delete_session))
        .route("/sessions", get(http::list_sessions))
        .route("/ws", get(live::ws_handler))
        .with_state(state)
}

/// Serves the router on `listener` until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
