//! Execution engine adapter.
//!
//! The interpreter is treated as an opaque engine behind [`ExecutionEngine`]:
//! it creates contexts and runs code against them, writing output into an
//! [`OutputSink`]. Contexts are only ever touched from the worker thread that
//! created them (see [`crate::context`]), so they do not need to be `Send`.
//!
//! [`OurosEngine`] is the production engine, backed by `ouros::ReplSession`.

use std::borrow::Cow;

use ouros::{Exception, LimitedTracker, Object, PrintWriter, ReplSession, ResourceLimits};
use serde::{Deserialize, Serialize};

use crate::{
    config::EngineLimits,
    input::{continues_block, is_blank, needs_more_input},
    output::OutputSink,
};

/// Script name reported in tracebacks for submitted code.
const SCRIPT_NAME: &str = "<stdin>";

/// Outcome of one submission.
///
/// A failing snippet is still a successful execution from the relay's point
/// of view: the failure text lands in `error` and the context stays usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Everything the snippet printed, plus the echoed value of a trailing
    /// expression.
    pub stdout: String,
    /// Error text when the snippet raised, failed to parse, or hit a limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The submission opened a statement that needs more input; nothing ran.
    #[serde(default)]
    pub incomplete: bool,
    /// Output exceeded the cap and was cut short.
    #[serde(default)]
    pub truncated: bool,
}

/// How the engine finished one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The snippet ran to completion.
    Complete,
    /// The snippet failed; the text describes the failure.
    Failed(String),
    /// The snippet opened a statement and needs more input before running.
    Incomplete,
}

impl ExecutionResult {
    /// Assembles a result from an engine outcome and the sink it wrote to.
    #[must_use]
    pub fn from_outcome(outcome: Outcome, output: OutputSink) -> Self {
        let (stdout, truncated) = output.finish();
        let (error, incomplete) = match outcome {
            Outcome::Complete => (None, false),
            Outcome::Failed(message) => (Some(message), false),
            Outcome::Incomplete => (None, true),
        };
        Self {
            stdout,
            error,
            incomplete,
            truncated,
        }
    }
}

/// The contract consumed by the session layer.
///
/// Implementations must be shareable across threads, but their contexts are
/// created and used on a single worker thread and may hold non-`Send` state.
pub trait ExecutionEngine: Send + Sync + 'static {
    /// Stateful execution context (variable bindings, imports, buffered input).
    type Context;

    /// Creates a fresh, empty context.
    fn create_context(&self) -> Self::Context;

    /// Runs `code` against `context`, writing output into `output`.
    ///
    /// A blank `code` runs whatever statement the context has buffered, and
    /// is a no-op when nothing is buffered. Failures of the code itself are
    /// reported as [`Outcome::Failed`], never by panicking.
    fn execute(&self, context: &mut Self::Context, code: &str, output: &mut OutputSink) -> Outcome;

    /// Output cap for sinks feeding this engine.
    fn max_output_bytes(&self) -> usize;
}

// =============================================================================
// Ouros engine
// =============================================================================

/// Engine backed by the Ouros sandboxed Python interpreter.
#[derive(Debug, Clone, Default)]
pub struct OurosEngine {
    limits: EngineLimits,
}

/// Interpreter state for one Ouros context.
pub struct OurosContext {
    /// The persistent interpreter session.
    session: ReplSession,
    /// Lines received so far for a statement that is not yet complete.
    pending_source: String,
}

impl OurosEngine {
    #[must_use]
    pub fn new(limits: EngineLimits) -> Self {
        Self { limits }
    }

    /// Limits applied to every context this engine creates.
    #[must_use]
    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    fn session_limits(&self) -> ResourceLimits {
        ResourceLimits::new()
            .max_operations(self.limits.max_operations)
            .max_allocations(self.limits.max_allocations)
            .max_memory(self.limits.max_memory_bytes)
    }
}

impl ExecutionEngine for OurosEngine {
    type Context = OurosContext;

    fn create_context(&self) -> OurosContext {
        OurosContext {
            session: ReplSession::new_with_resource_limits(Vec::new(), SCRIPT_NAME, self.session_limits()),
            pending_source: String::new(),
        }
    }

    fn execute(&self, context: &mut OurosContext, code: &str, output: &mut OutputSink) -> Outcome {
        let continuing = !context.pending_source.is_empty();
        if is_blank(code) {
            if !continuing {
                return Outcome::Complete;
            }
        } else {
            if continuing {
                context.pending_source.push('\n');
            }
            context.pending_source.push_str(code);

            if needs_more_input(&context.pending_source) || (continuing && continues_block(&context.pending_source)) {
                return Outcome::Incomplete;
            }
        }

        let source = std::mem::take(&mut context.pending_source);
        let tracker = LimitedTracker::new(ResourceLimits::new().max_duration(self.limits.max_execution_time));
        let mut printer = SinkPrinter(output);
        match context.session.execute_with_limits(&source, tracker, &mut printer) {
            Ok(Object::None) => Outcome::Complete,
            Ok(value) => {
                output.write(&value.py_repr());
                output.push('\n');
                Outcome::Complete
            }
            Err(error) => Outcome::Failed(error.to_string()),
        }
    }

    fn max_output_bytes(&self) -> usize {
        self.limits.max_output_bytes
    }
}

/// Adapts an [`OutputSink`] to the interpreter's print hook.
struct SinkPrinter<'a>(&'a mut OutputSink);

impl PrintWriter for SinkPrinter<'_> {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.write(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.0.push(end);
        Ok(())
    }
}
