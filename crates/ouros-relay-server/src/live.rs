//! Live REPL channel over WebSocket.
//!
//! `GET /ws[?session_id=<id>]` upgrades to a persistent channel bound to one
//! session. Each inbound text message is one submission; output is relayed
//! back as text fragments while the interpreter produces it. Submissions are
//! handled strictly in receipt order, and the next one is not read until the
//! previous one's output has been fully relayed. A blank message finishes a
//! block typed line by line.
//!
//! Closing the channel releases the session's binding but keeps the session,
//! so a client can reconnect with the id from the greeting and pick up the
//! same interpreter state until the idle window runs out.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use ouros_relay::{BusyPolicy, LiveBinding, RelayError, SessionStore};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::router::AppState;

/// Close code sent when the session is held by another live channel.
pub const CLOSE_SESSION_BUSY: u16 = 4409;
/// Close code sent when the session was reaped or destroyed.
pub const CLOSE_SESSION_GONE: u16 = 4408;
/// Close code sent when the interpreter context died or cannot be reached.
pub const CLOSE_ENGINE_UNAVAILABLE: u16 = 1011;
/// Close code sent when no session could be allocated.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Close code sent on server shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Appended after a submission whose output hit the cap.
const TRUNCATION_NOTICE: &str = "[output truncated]\n";

type Sender = SplitSink<WebSocket, Message>;
type Receiver = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    /// Session to resume; a fresh one is created if absent or gone.
    pub session_id: Option<String>,
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, requested: Option<String>) {
    let (mut sender, receiver) = socket.split();

    let binding = match resolve_binding(&state.store, requested.as_deref()) {
        Ok(binding) => binding,
        Err(error) => {
            tracing::info!(requested = ?requested, %error, "live channel refused");
            close(&mut sender, close_code(&error), &error.to_string()).await;
            return;
        }
    };

    let session_id = binding.session().id().to_owned();
    tracing::info!(session_id = %session_id, "live channel opened");

    let greeting = format!("# Connected. Session = {session_id}\n");
    if sender.send(Message::Text(greeting.into())).await.is_ok() {
        let submissions = run_channel(&state, &binding, &mut sender, receiver).await;
        tracing::info!(session_id = %session_id, submissions, "live channel closed");
    }
    // dropping the binding releases the session for the next connection
}

/// Binds the requested session, or a fresh one if it no longer exists.
fn resolve_binding(store: &SessionStore, requested: Option<&str>) -> Result<LiveBinding, RelayError> {
    if let Some(id) = requested {
        match store.bind_live_channel(id) {
            Err(RelayError::SessionNotFound(_)) => {
                tracing::info!(session_id = %id, "requested session is gone, starting a fresh one");
            }
            bound => return bound,
        }
    }
    let session = store.create()?;
    store.bind_live_channel(session.id())
}

/// Runs the open channel until the client leaves, the session goes away, or
/// the server shuts down. Returns the number of submissions handled.
async fn run_channel(state: &AppState, binding: &LiveBinding, sender: &mut Sender, mut receiver: Receiver) -> usize {
    let session = binding.session();
    let mut submissions = 0;

    loop {
        let message = tokio::select! {
            () = session.closed() => {
                close(sender, CLOSE_SESSION_GONE, "session expired").await;
                break;
            }
            () = state.shutdown.cancelled() => {
                close(sender, CLOSE_GOING_AWAY, "server shutting down").await;
                break;
            }
            message = receiver.next() => message,
        };

        let code = match message {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => {
                if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                    text
                } else {
                    if send_text(sender, "invalid request: submissions must be UTF-8 text\n").await.is_err() {
                        break;
                    }
                    continue;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(error)) => {
                tracing::debug!(session_id = %session.id(), %error, "live channel transport error");
                break;
            }
        };

        match relay_submission(&state.store, session.id(), code, sender).await {
            Ok(Delivery::Delivered) => submissions += 1,
            Ok(Delivery::ClientGone) => break,
            Err(error @ RelayError::Validation(_)) => {
                if send_text(sender, &format!("{error}\n")).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(session_id = %session.id(), %error, "live submission failed");
                close(sender, close_code(&error), &error.to_string()).await;
                break;
            }
        }
    }

    submissions
}

/// Whether a submission's output reached the client.
enum Delivery {
    Delivered,
    /// The client went away mid-relay; the execution runs on and its output
    /// is discarded.
    ClientGone,
}

/// Executes one submission and relays its output as it is produced.
async fn relay_submission(
    store: &Arc<SessionStore>,
    session_id: &str,
    code: String,
    sender: &mut Sender,
) -> Result<Delivery, RelayError> {
    let (fragments, mut stream) = mpsc::unbounded_channel();
    let execution = {
        let store = Arc::clone(store);
        let session_id = session_id.to_owned();
        tokio::spawn(async move {
            store
                .execute(&session_id, &code, Some(fragments), BusyPolicy::Wait)
                .await
        })
    };

    while let Some(fragment) = stream.recv().await {
        if send_text(sender, &fragment).await.is_err() {
            return Ok(Delivery::ClientGone);
        }
    }

    let result = execution
        .await
        .map_err(|error| RelayError::EngineUnavailable(format!("execution task failed: {error}")))??;

    if let Some(mut error) = result.error {
        if !error.ends_with('\n') {
            error.push('\n');
        }
        if send_text(sender, &error).await.is_err() {
            return Ok(Delivery::ClientGone);
        }
    }
    if result.truncated && send_text(sender, TRUNCATION_NOTICE).await.is_err() {
        return Ok(Delivery::ClientGone);
    }
    Ok(Delivery::Delivered)
}

async fn send_text(sender: &mut Sender, text: &str) -> Result<(), axum::Error> {
    sender.send(Message::Text(text.to_owned().into())).await
}

async fn close(sender: &mut Sender, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    // the peer may already be gone
    let _ = sender.send(Message::Close(Some(frame))).await;
}

/// Close code reported for a relay error that ends the channel.
#[must_use]
pub fn close_code(error: &RelayError) -> u16 {
    match error {
        RelayError::SessionBusy(_) => CLOSE_SESSION_BUSY,
        RelayError::SessionNotFound(_) => CLOSE_SESSION_GONE,
        RelayError::EngineUnavailable(_) => CLOSE_ENGINE_UNAVAILABLE,
        RelayError::CapacityExceeded(_) => CLOSE_TRY_AGAIN_LATER,
        RelayError::Validation(_) => 1008,
    }
}
