//! Integration tests for `SessionStore`.
//!
//! Covers session lifecycle (create / get / touch / destroy), capacity,
//! live-channel binding, idle reaping, per-session serialization, and the
//! handling of a context that dies mid-execution. A small scripted engine
//! stands in for the interpreter so timing and failures can be controlled.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use ouros_relay::{
    BusyPolicy, ExecutionEngine, OutputSink, Outcome, RelayConfig, RelayError, SessionStore, ThreadedEngine,
    spawn_reaper,
};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Scripted engine
// =============================================================================

/// Engine driven by tiny commands, one per submission:
///
/// - `say <text>` prints `<text>` and a newline
/// - `sleep <ms>` blocks the worker for that long
/// - `history` prints how many submissions this context has seen before
/// - `fail` reports an engine-level failure
/// - `open` starts a statement that needs more input
/// - a blank line finishes an open statement and prints `closed`
/// - `panic` kills the worker
struct ScriptEngine;

impl ExecutionEngine for ScriptEngine {
    type Context = Vec<String>;

    fn create_context(&self) -> Vec<String> {
        Vec::new()
    }

    fn execute(&self, context: &mut Vec<String>, code: &str, output: &mut OutputSink) -> Outcome {
        let outcome = if let Some(text) = code.strip_prefix("say ") {
            output.write(text);
            output.push('\n');
            Outcome::Complete
        } else if let Some(ms) = code.strip_prefix("sleep ") {
            thread::sleep(Duration::from_millis(ms.parse().unwrap()));
            Outcome::Complete
        } else if code == "history" {
            output.write(&context.len().to_string());
            output.push('\n');
            Outcome::Complete
        } else if code == "fail" {
            Outcome::Failed("scripted failure".to_owned())
        } else if code == "open" {
            Outcome::Incomplete
        } else if code.trim().is_empty() {
            output.write("closed\n");
            Outcome::Complete
        } else if code == "panic" {
            panic!("scripted worker crash");
        } else {
            Outcome::Complete
        };
        context.push(code.to_owned());
        outcome
    }

    fn max_output_bytes(&self) -> usize {
        1024
    }
}

fn store_with(config: RelayConfig) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(Arc::new(ThreadedEngine::new(ScriptEngine)), config))
}

fn store() -> Arc<SessionStore> {
    store_with(RelayConfig::default())
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn create_issues_unique_ids_that_resolve() {
    let store = store();
    let a = store.create().unwrap();
    let b = store.create().unwrap();

    assert_ne!(a.id(), b.id(), "each session must get its own id");
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(a.id()).unwrap().id(), a.id());
    assert_eq!(store.get(b.id()).unwrap().id(), b.id());
}

#[test]
fn get_unknown_id_is_not_found() {
    let store = store();
    let err = store.get("never-issued").unwrap_err();
    assert_eq!(err, RelayError::SessionNotFound("never-issued".to_owned()));
}

#[test]
fn touch_is_idempotent_and_requires_existing_session() {
    let store = store();
    let session = store.create().unwrap();
    store.touch(session.id()).unwrap();
    store.touch(session.id()).unwrap();
    assert!(session.idle_for(Instant::now()) < Duration::from_secs(1));

    let err = store.touch("ghost").unwrap_err();
    assert!(matches!(err, RelayError::SessionNotFound(_)));
}

#[test]
fn create_beyond_capacity_fails() {
    let store = store_with(RelayConfig {
        max_sessions: 2,
        ..RelayConfig::default()
    });
    store.create().unwrap();
    store.create().unwrap();

    let err = store.create().unwrap_err();
    assert!(
        matches!(err, RelayError::CapacityExceeded(_)),
        "third session should exceed capacity, got: {err}"
    );
    assert_eq!(store.len(), 2, "failed create must not register anything");
}

#[test]
fn destroy_removes_session_and_signals_close() {
    let store = store();
    let session = store.create().unwrap();
    assert!(!session.is_closed());

    store.destroy(session.id()).unwrap();
    assert!(session.is_closed(), "destroyed session should report closed");
    assert!(matches!(store.get(session.id()), Err(RelayError::SessionNotFound(_))));

    let err = store.destroy(session.id()).unwrap_err();
    assert!(matches!(err, RelayError::SessionNotFound(_)), "double destroy is not found");
}

#[test]
fn list_reports_sessions_oldest_first() {
    let store = store();
    let first = store.create().unwrap();
    thread::sleep(Duration::from_millis(5));
    let second = store.create().unwrap();

    let infos = store.list();
    let ids: Vec<&str> = infos.iter().map(|info| info.session_id.as_str()).collect();
    assert_eq!(ids, vec![first.id(), second.id()]);
    assert!(infos.iter().all(|info| !info.live_bound));
}

// =============================================================================
// Live-channel binding
// =============================================================================

#[test]
fn live_binding_is_exclusive_until_dropped() {
    let store = store();
    let session = store.create().unwrap();

    let binding = store.bind_live_channel(session.id()).unwrap();
    assert!(session.is_live_bound());

    let err = store.bind_live_channel(session.id()).unwrap_err();
    assert!(
        matches!(err, RelayError::SessionBusy(_)),
        "second live channel must be refused, got: {err}"
    );

    drop(binding);
    assert!(!session.is_live_bound(), "dropping the binding releases the session");
    assert!(store.get(session.id()).is_ok(), "releasing a binding must not destroy the session");
    store.bind_live_channel(session.id()).unwrap();
}

#[test]
fn bind_unknown_session_is_not_found() {
    let store = store();
    let err = store.bind_live_channel("ghost").unwrap_err();
    assert!(matches!(err, RelayError::SessionNotFound(_)));
}

// =============================================================================
// Reaping
// =============================================================================

#[test]
fn reap_removes_only_sessions_past_the_idle_window() {
    let store = store_with(RelayConfig {
        idle_timeout: Duration::from_millis(200),
        ..RelayConfig::default()
    });
    let stale = store.create().unwrap();
    thread::sleep(Duration::from_millis(300));
    let fresh = store.create().unwrap();

    let reaped = store.reap(Instant::now());
    assert_eq!(reaped, 1, "only the stale session should be reaped");
    assert!(stale.is_closed());
    assert!(matches!(store.get(stale.id()), Err(RelayError::SessionNotFound(_))));
    assert!(store.get(fresh.id()).is_ok());
}

#[test]
fn reap_with_future_clock_expires_everything_idle() {
    let store = store();
    store.create().unwrap();
    store.create().unwrap();

    assert_eq!(store.reap(Instant::now()), 0, "nothing is idle yet");
    let later = Instant::now() + store.config().idle_timeout + Duration::from_secs(1);
    assert_eq!(store.reap(later), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn reaped_session_rejects_execution() {
    let store = store();
    let session = store.create().unwrap();
    let later = Instant::now() + store.config().idle_timeout + Duration::from_secs(1);
    store.reap(later);

    let err = store
        .execute(session.id(), "say hi", None, BusyPolicy::WaitBounded)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::SessionNotFound(_)));
}

#[tokio::test]
async fn reap_skips_sessions_with_execution_in_flight() {
    let store = store_with(RelayConfig {
        idle_timeout: Duration::from_millis(10),
        ..RelayConfig::default()
    });
    let session = store.create().unwrap();
    let id = session.id().to_owned();

    let running = {
        let store = Arc::clone(&store);
        let id = id.clone();
        tokio::spawn(async move { store.execute(&id, "sleep 300", None, BusyPolicy::Wait).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.reap(Instant::now() + Duration::from_secs(60)), 0, "busy session counts as active");
    running.await.unwrap().unwrap();
    assert!(store.get(&id).is_ok());
}

#[tokio::test]
async fn reaper_task_expires_idle_sessions_and_stops_on_shutdown() {
    let store = store_with(RelayConfig {
        idle_timeout: Duration::from_millis(20),
        reap_interval: Duration::from_millis(20),
        ..RelayConfig::default()
    });
    let session = store.create().unwrap();

    let shutdown = CancellationToken::new();
    let reaper = spawn_reaper(Arc::clone(&store), shutdown.clone());

    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("reaper should close the idle session");
    assert!(store.is_empty());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), reaper)
        .await
        .expect("reaper should stop after shutdown")
        .unwrap();
}

// =============================================================================
// Execution
// =============================================================================

#[tokio::test]
async fn context_state_persists_across_executions() {
    let store = store();
    let session = store.create().unwrap();

    for code in ["first", "second"] {
        store.execute(session.id(), code, None, BusyPolicy::WaitBounded).await.unwrap();
    }
    let result = store
        .execute(session.id(), "history", None, BusyPolicy::WaitBounded)
        .await
        .unwrap();
    assert_eq!(result.stdout, "2\n", "the third call should see the two earlier submissions");
}

#[tokio::test]
async fn engine_failure_is_data_and_keeps_session() {
    let store = store();
    let session = store.create().unwrap();

    let result = store
        .execute(session.id(), "fail", None, BusyPolicy::WaitBounded)
        .await
        .unwrap();
    assert_eq!(result.error.as_deref(), Some("scripted failure"));

    let result = store
        .execute(session.id(), "history", None, BusyPolicy::WaitBounded)
        .await
        .unwrap();
    assert_eq!(result.stdout, "1\n", "failed submission must not reset the context");
}

#[tokio::test]
async fn empty_code_is_rejected_before_lookup() {
    let store = store();
    let err = store
        .execute("ghost", "   \n", None, BusyPolicy::WaitBounded)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)), "validation comes first, got: {err}");
}

#[tokio::test]
async fn blank_line_runs_a_pending_statement_only() {
    let store = store();
    let session = store.create().unwrap();
    let id = session.id();

    let err = store.execute(id, "", None, BusyPolicy::WaitBounded).await.unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)), "nothing pending, got: {err}");

    let opened = store.execute(id, "open", None, BusyPolicy::WaitBounded).await.unwrap();
    assert!(opened.incomplete);
    assert!(session.has_pending_input());

    let closed = store.execute(id, "\n", None, BusyPolicy::WaitBounded).await.unwrap();
    assert_eq!(closed.stdout, "closed\n");
    assert!(!session.has_pending_input());

    let err = store.execute(id, "  ", None, BusyPolicy::WaitBounded).await.unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)), "buffer was consumed, got: {err}");
}

#[tokio::test]
async fn abandoned_caller_keeps_the_session_busy_until_the_worker_replies() {
    let store = store_with(RelayConfig {
        busy_timeout: Duration::from_millis(50),
        ..RelayConfig::default()
    });
    let session = store.create().unwrap();
    let id = session.id().to_owned();

    let abandoned = {
        let store = Arc::clone(&store);
        let id = id.clone();
        tokio::spawn(async move { store.execute(&id, "sleep 400", None, BusyPolicy::Wait).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    let err = store.execute(&id, "say x", None, BusyPolicy::WaitBounded).await.unwrap_err();
    assert!(matches!(err, RelayError::SessionBusy(_)), "bounded waiter, got: {err}");
    assert_eq!(store.reap(Instant::now() + Duration::from_secs(3600)), 0, "still executing");

    let result = store.execute(&id, "history", None, BusyPolicy::Wait).await.unwrap();
    assert_eq!(result.stdout, "1\n", "the abandoned submission still ran to completion");
}

#[tokio::test]
async fn busy_session_fails_fast_or_after_bounded_wait() {
    let store = store_with(RelayConfig {
        busy_timeout: Duration::from_millis(50),
        ..RelayConfig::default()
    });
    let session = store.create().unwrap();
    let id = session.id().to_owned();

    let running = {
        let store = Arc::clone(&store);
        let id = id.clone();
        tokio::spawn(async move { store.execute(&id, "sleep 400", None, BusyPolicy::Wait).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = store.execute(&id, "say x", None, BusyPolicy::FailFast).await.unwrap_err();
    assert!(matches!(err, RelayError::SessionBusy(_)), "fail-fast caller, got: {err}");

    let err = store.execute(&id, "say x", None, BusyPolicy::WaitBounded).await.unwrap_err();
    assert!(matches!(err, RelayError::SessionBusy(_)), "bounded waiter, got: {err}");

    let result = store.execute(&id, "say after", None, BusyPolicy::Wait).await.unwrap();
    assert_eq!(result.stdout, "after\n", "unbounded waiter runs once the session frees up");
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_executions_on_one_session_do_not_interleave() {
    let store = store();
    let session = store.create().unwrap();
    let id = session.id().to_owned();

    let slow = {
        let store = Arc::clone(&store);
        let id = id.clone();
        tokio::spawn(async move {
            store.execute(&id, "sleep 200", None, BusyPolicy::Wait).await.unwrap();
            Instant::now()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started_second = Instant::now();
    let result = store.execute(&id, "history", None, BusyPolicy::Wait).await.unwrap();
    let finished_second = Instant::now();
    let finished_first = slow.await.unwrap();

    assert_eq!(result.stdout, "1\n", "second call must observe the completed first call");
    assert!(finished_first <= finished_second);
    assert!(finished_second - started_second >= Duration::from_millis(100));
}

#[tokio::test]
async fn dead_context_destroys_session() {
    let store = store();
    let session = store.create().unwrap();

    let err = store
        .execute(session.id(), "panic", None, BusyPolicy::WaitBounded)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::EngineUnavailable(_)), "got: {err}");
    assert!(session.is_closed());
    assert!(matches!(store.get(session.id()), Err(RelayError::SessionNotFound(_))));
}

#[tokio::test]
async fn streaming_execution_forwards_fragments_in_order() {
    let store = store();
    let session = store.create().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let result = store
        .execute(session.id(), "say streamed", Some(tx), BusyPolicy::Wait)
        .await
        .unwrap();
    assert_eq!(result.stdout, "streamed\n");
    assert_eq!(rx.recv().await.as_deref(), Some("streamed\n"));
    assert_eq!(rx.recv().await, None, "stream ends with the execution");
}

#[tokio::test]
async fn ephemeral_contexts_share_nothing() {
    let store = store();

    store.execute_ephemeral("first").await.unwrap();
    let result = store.execute_ephemeral("history").await.unwrap();
    assert_eq!(result.stdout, "0\n", "a fresh context must not see earlier submissions");

    let err = store.execute_ephemeral("").await.unwrap_err();
    assert!(matches!(err, RelayError::Validation(_)));
    assert!(store.is_empty(), "stateless execution registers no session");
}

#[tokio::test]
async fn ephemeral_executions_are_bounded() {
    let store = store_with(RelayConfig {
        max_ephemeral_contexts: 1,
        ..RelayConfig::default()
    });

    let running = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.execute_ephemeral("sleep 300").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = store.execute_ephemeral("say x").await.unwrap_err();
    assert!(matches!(err, RelayError::CapacityExceeded(_)), "got: {err}");

    running.await.unwrap().unwrap();
    let result = store.execute_ephemeral("say again").await.unwrap();
    assert_eq!(result.stdout, "again\n", "the slot is released when the execution ends");
}
