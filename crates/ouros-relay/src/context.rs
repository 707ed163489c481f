//! Worker threads that own interpreter contexts.
//!
//! Every context lives on its own OS thread and is driven through a job
//! queue, so the engine never sees two callers at once and its contexts are
//! free to hold non-`Send` state. A [`ContextHandle`] is the only way to reach
//! a worker; dropping the last handle closes the queue, the worker finishes
//! the job it is running (if any) and then drops the context.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use tokio::sync::{mpsc, oneshot};

use crate::{
    engine::{ExecutionEngine, ExecutionResult},
    error::RelayError,
    output::{FragmentSender, OutputSink},
};

/// One unit of work for a context worker.
struct Job {
    code: String,
    fragments: Option<FragmentSender>,
    reply: oneshot::Sender<ExecutionResult>,
}

/// Handle to a live interpreter context.
///
/// Exclusively owned by one session (or one stateless request). Dropping it
/// is the `destroyContext` operation.
#[derive(Debug)]
pub struct ContextHandle {
    id: u64,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ContextHandle {
    /// Process-unique id of the underlying context, used in logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs `code` on the worker and waits for it to finish.
    ///
    /// When `fragments` is given, output is streamed to it while the code
    /// runs. The caller is responsible for never having two executions in
    /// flight on one handle; the worker queue would serialize them anyway,
    /// but interleaved callers would observe each other's turn order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::EngineUnavailable`] if the worker has exited,
    /// including when it died while running this job.
    pub async fn execute(&self, code: &str, fragments: Option<FragmentSender>) -> Result<ExecutionResult, RelayError> {
        let (reply, response) = oneshot::channel();
        let job = Job {
            code: code.to_owned(),
            fragments,
            reply,
        };
        self.jobs
            .send(job)
            .map_err(|_| RelayError::EngineUnavailable(format!("context {} has shut down", self.id)))?;
        response
            .await
            .map_err(|_| RelayError::EngineUnavailable(format!("context {} failed during execution", self.id)))
    }

    /// Returns `true` once the worker has stopped accepting jobs.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// Object-safe factory for contexts, so the session store does not need to
/// be generic over the engine.
pub trait ContextFactory: Send + Sync + 'static {
    /// Starts a new worker with a fresh context.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CapacityExceeded`] when the worker thread cannot
    /// be spawned.
    fn create_context(&self) -> Result<ContextHandle, RelayError>;
}

/// Runs an [`ExecutionEngine`] with one worker thread per context.
#[derive(Debug)]
pub struct ThreadedEngine<E> {
    engine: Arc<E>,
    next_id: AtomicU64,
}

impl<E: ExecutionEngine> ThreadedEngine<E> {
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E: ExecutionEngine> ContextFactory for ThreadedEngine<E> {
    fn create_context(&self) -> Result<ContextHandle, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (jobs, queue) = mpsc::unbounded_channel();
        let engine = Arc::clone(&self.engine);

        thread::Builder::new()
            .name(format!("ouros-context-{id}"))
            .spawn(move || run_worker(id, engine.as_ref(), queue))
            .map_err(|err| {
                tracing::error!(context_id = id, error = %err, "failed to spawn context worker");
                RelayError::CapacityExceeded(format!("cannot start context worker: {err}"))
            })?;

        tracing::debug!(context_id = id, "context created");
        Ok(ContextHandle { id, jobs })
    }
}

/// Worker loop: owns the context until the job queue closes.
fn run_worker<E: ExecutionEngine>(id: u64, engine: &E, mut queue: mpsc::UnboundedReceiver<Job>) {
    let mut context = engine.create_context();

    while let Some(job) = queue.blocking_recv() {
        let limit = engine.max_output_bytes();
        let mut output = match job.fragments {
            Some(fragments) => OutputSink::streaming(limit, fragments),
            None => OutputSink::collecting(limit),
        };
        let outcome = engine.execute(&mut context, &job.code, &mut output);
        let result = ExecutionResult::from_outcome(outcome, output);
        // the caller may have gone away; its result is simply discarded
        let _ = job.reply.send(result);
    }

    tracing::debug!(context_id = id, "context destroyed");
}
