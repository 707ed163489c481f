//! In-memory registry of interpreter sessions.
//!
//! `SessionStore` maps opaque session ids to [`Session`]s, each of which owns
//! exactly one interpreter context. It is the only component with shared
//! mutable state: handlers resolve a session here, run code through it, and
//! leave lifecycle decisions (touch, expiry, destruction) to the store.
//!
//! Execution within one session is strictly serialized by a per-session
//! async lock around the context handle. Callers choose how to wait for it
//! through [`BusyPolicy`]. Expiry is handled by a single periodic scan
//! ([`SessionStore::reap`]) rather than per-session timers.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    context::{ContextFactory, ContextHandle, ThreadedEngine},
    engine::{ExecutionResult, OurosEngine},
    error::RelayError,
    input::validate_submission,
    output::FragmentSender,
};

// =============================================================================
// Session
// =============================================================================

/// A logical binding to one persistent interpreter context.
#[derive(Debug)]
pub struct Session {
    /// Opaque external handle.
    id: String,
    /// Wall-clock creation time, for reporting.
    created_at: DateTime<Utc>,
    /// Monotonic time of the last execution or channel activity.
    last_active: Mutex<Instant>,
    /// Set while a live channel holds this session.
    live_bound: AtomicBool,
    /// The interpreter context; the lock is the per-session execution lock.
    /// It is held until the worker replies, even if the caller goes away.
    context: Arc<AsyncMutex<ContextHandle>>,
    /// The context is buffering an unfinished statement.
    pending_input: AtomicBool,
    /// Fired when the session is destroyed or reaped.
    closed: CancellationToken,
}

impl Session {
    fn new(id: String, context: ContextHandle) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            last_active: Mutex::new(Instant::now()),
            live_bound: AtomicBool::new(false),
            context: Arc::new(AsyncMutex::new(context)),
            pending_input: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Records activity now.
    pub fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time elapsed between the last activity and `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last_active = *self.last_active.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last_active)
    }

    #[must_use]
    pub fn is_live_bound(&self) -> bool {
        self.live_bound.load(Ordering::Acquire)
    }

    /// Returns `true` while the context holds an unfinished statement, in
    /// which case a blank submission runs it.
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        self.pending_input.load(Ordering::Acquire)
    }

    /// Returns `true` once the session has been destroyed or reaped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the session is destroyed or reaped.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Returns `true` while an execution holds the session's context.
    fn is_executing(&self) -> bool {
        self.context.try_lock().is_err()
    }
}

/// Exclusive claim of a session by a live channel.
///
/// Dropping the binding releases the claim and counts as activity, so a
/// reconnecting client gets the full idle window to come back.
#[derive(Debug)]
pub struct LiveBinding {
    session: Arc<Session>,
}

impl LiveBinding {
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for LiveBinding {
    fn drop(&mut self) {
        self.session.live_bound.store(false, Ordering::Release);
        self.session.touch();
        tracing::debug!(session_id = %self.session.id, "live channel released");
    }
}

/// Summary of one session, as returned by [`SessionStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    /// Whole seconds since the last activity.
    pub idle_secs: u64,
    pub live_bound: bool,
}

/// What a caller does when the session is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Wait up to the store's configured busy timeout, then fail with
    /// `SessionBusy`. Used by HTTP callers.
    WaitBounded,
    /// Wait as long as it takes. Used by the live channel, which is already
    /// one-message-at-a-time.
    Wait,
    /// Fail with `SessionBusy` immediately.
    FailFast,
}

// =============================================================================
// SessionStore
// =============================================================================

type Registry = Mutex<HashMap<String, Arc<Session>>>;

/// Registry of live sessions keyed by session id.
pub struct SessionStore {
    sessions: Arc<Registry>,
    factory: Arc<dyn ContextFactory>,
    /// Permits for throwaway contexts used by stateless execution.
    ephemeral_slots: Arc<Semaphore>,
    config: RelayConfig,
}

impl SessionStore {
    /// Creates an empty store whose contexts come from `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn ContextFactory>, config: RelayConfig) -> Self {
        let slots = config.max_ephemeral_contexts.min(Semaphore::MAX_PERMITS);
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            factory,
            ephemeral_slots: Arc::new(Semaphore::new(slots)),
            config,
        }
    }

    /// Creates an empty store backed by the Ouros interpreter, using the
    /// engine limits from `config`.
    #[must_use]
    pub fn with_ouros(config: RelayConfig) -> Self {
        let engine = ThreadedEngine::new(OurosEngine::new(config.engine.clone()));
        Self::new(Arc::new(engine), config)
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The factory backing this store and its stateless executions.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn ContextFactory> {
        &self.factory
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        lock_registry(&self.sessions)
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl SessionStore {
    /// Allocates a fresh session with its own interpreter context.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` when `max_sessions` sessions already exist
    /// or a context worker cannot be started.
    pub fn create(&self) -> Result<Arc<Session>, RelayError> {
        let mut sessions = self.registry();
        if sessions.len() >= self.config.max_sessions {
            tracing::warn!(max_sessions = self.config.max_sessions, "session capacity exceeded");
            return Err(RelayError::CapacityExceeded(format!(
                "{} sessions already open",
                self.config.max_sessions
            )));
        }

        let context = self.factory.create_context()?;
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let context_id = context.id();
        let session = Arc::new(Session::new(id.clone(), context));
        sessions.insert(id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, context_id, sessions = sessions.len(), "session created");
        Ok(session)
    }

    /// Looks up a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the id was never issued or the session is
    /// gone.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, RelayError> {
        self.registry()
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::SessionNotFound(id.to_owned()))
    }

    /// Marks a session as active now.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session does not exist.
    pub fn touch(&self, id: &str) -> Result<(), RelayError> {
        self.get(id)?.touch();
        Ok(())
    }

    /// Claims a session for a live channel.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session does not exist, or
    /// `SessionBusy` if another live channel already holds it.
    pub fn bind_live_channel(&self, id: &str) -> Result<LiveBinding, RelayError> {
        let session = self.get(id)?;
        if session
            .live_bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::SessionBusy(format!(
                "session {id} is already bound to a live channel"
            )));
        }
        session.touch();
        tracing::debug!(session_id = %id, "live channel bound");
        Ok(LiveBinding { session })
    }

    /// Destroys a session, releasing its interpreter context and closing
    /// any live channel bound to it.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session does not exist.
    pub fn destroy(&self, id: &str) -> Result<(), RelayError> {
        self.remove(id, "destroyed")
            .map(|_| ())
            .ok_or_else(|| RelayError::SessionNotFound(id.to_owned()))
    }

    /// Destroys every session idle for longer than the idle window at `now`.
    ///
    /// Sessions with an execution in flight count as active. Returns the
    /// number of sessions reaped.
    pub fn reap(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.registry();
            let ids: Vec<String> = sessions
                .values()
                .filter(|session| session.idle_for(now) > idle_timeout && !session.is_executing())
                .map(|session| session.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            session.closed.cancel();
            tracing::info!(
                session_id = %session.id,
                idle_secs = session.idle_for(now).as_secs(),
                live_bound = session.is_live_bound(),
                "session reaped"
            );
        }
        expired.len()
    }

    /// Lists all registered sessions, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let mut infos: Vec<SessionInfo> = self
            .registry()
            .values()
            .map(|session| SessionInfo {
                session_id: session.id.clone(),
                created_at: session.created_at,
                idle_secs: session.idle_for(now).as_secs(),
                live_bound: session.is_live_bound(),
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));
        infos
    }

    fn remove(&self, id: &str, reason: &'static str) -> Option<Arc<Session>> {
        remove_session(&self.sessions, id, reason)
    }
}

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_session(registry: &Registry, id: &str, reason: &'static str) -> Option<Arc<Session>> {
    let session = lock_registry(registry).remove(id)?;
    session.closed.cancel();
    tracing::info!(session_id = %id, reason, "session removed");
    Some(session)
}

// =============================================================================
// Execution
// =============================================================================

impl SessionStore {
    /// Runs `code` in a session, streaming output to `fragments` if given.
    ///
    /// Only one execution runs per session at a time; `policy` decides what
    /// happens when the session is busy. The execution lock stays held until
    /// the interpreter finishes, even if the caller stops waiting. Failures
    /// of the code itself come back inside the `ExecutionResult` and leave the
    /// session intact. If the session's context dies, the session is
    /// destroyed.
    ///
    /// A blank `code` is accepted only while the session is buffering an
    /// unfinished statement, and runs that statement.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty code, `SessionNotFound`, `SessionBusy`
    /// per `policy`, or `EngineUnavailable`.
    pub async fn execute(
        &self,
        id: &str,
        code: &str,
        fragments: Option<FragmentSender>,
        policy: BusyPolicy,
    ) -> Result<ExecutionResult, RelayError> {
        let session = match self.get(id) {
            Ok(session) => session,
            Err(not_found) => {
                validate_submission(code)?;
                return Err(not_found);
            }
        };
        if !session.has_pending_input() {
            validate_submission(code)?;
        }

        let context = self.lock_context(&session, policy).await?;
        if session.is_closed() {
            return Err(RelayError::SessionNotFound(id.to_owned()));
        }
        if !session.has_pending_input() {
            validate_submission(code)?;
        }
        session.touch();

        let run = tokio::spawn(run_locked(
            Arc::clone(&self.sessions),
            Arc::clone(&session),
            context,
            code.to_owned(),
            fragments,
        ));
        let result = run.await.map_err(execution_task_failed)??;
        tracing::debug!(
            session_id = %id,
            stdout_bytes = result.stdout.len(),
            failed = result.error.is_some(),
            incomplete = result.incomplete,
            truncated = result.truncated,
            "session execution finished"
        );
        Ok(result)
    }

    /// Runs `code` against a throwaway context that is destroyed afterwards.
    ///
    /// At most `max_ephemeral_contexts` of these run at once.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for empty code, `CapacityExceeded` if every slot
    /// is taken or no context can be started, or `EngineUnavailable` if the
    /// context dies.
    pub async fn execute_ephemeral(&self, code: &str) -> Result<ExecutionResult, RelayError> {
        validate_submission(code)?;
        let permit = Arc::clone(&self.ephemeral_slots).try_acquire_owned().map_err(|_| {
            let limit = self.config.max_ephemeral_contexts;
            tracing::warn!(max_ephemeral_contexts = limit, "stateless capacity exceeded");
            RelayError::CapacityExceeded(format!("{limit} stateless executions already running"))
        })?;
        let context = self.factory.create_context()?;
        let code = code.to_owned();

        let run = tokio::spawn(async move {
            let result = context.execute(&code, None).await;
            tracing::debug!(context_id = context.id(), ok = result.is_ok(), "ephemeral execution finished");
            drop(permit);
            result
        });
        run.await.map_err(execution_task_failed)?
    }

    async fn lock_context(
        &self,
        session: &Session,
        policy: BusyPolicy,
    ) -> Result<OwnedMutexGuard<ContextHandle>, RelayError> {
        let busy = || RelayError::SessionBusy(format!("session {} is executing another submission", session.id));
        let context = Arc::clone(&session.context);
        match policy {
            BusyPolicy::Wait => Ok(context.lock_owned().await),
            BusyPolicy::FailFast => context.try_lock_owned().map_err(|_| busy()),
            BusyPolicy::WaitBounded => tokio::time::timeout(self.config.busy_timeout, context.lock_owned())
                .await
                .map_err(|_| busy()),
        }
    }
}

/// Drives one execution while holding the session's lock, so the session
/// stays busy until the worker replies.
async fn run_locked(
    registry: Arc<Registry>,
    session: Arc<Session>,
    context: OwnedMutexGuard<ContextHandle>,
    code: String,
    fragments: Option<FragmentSender>,
) -> Result<ExecutionResult, RelayError> {
    let result = context.execute(&code, fragments).await;
    session.touch();
    match &result {
        Ok(result) => session.pending_input.store(result.incomplete, Ordering::Release),
        Err(error) => {
            tracing::error!(session_id = %session.id, %error, "interpreter context failed");
            remove_session(&registry, &session.id, "engine failure");
        }
    }
    drop(context);
    result
}

fn execution_task_failed(error: tokio::task::JoinError) -> RelayError {
    RelayError::EngineUnavailable(format!("execution task failed: {error}"))
}
