//! `Task`: the unit the state machine drives through its phases.
//!
//! Grounded on `ob-workflow::engine::WorkflowEngine` owning instances keyed
//! by id behind a repository; reworked into an in-process `Arc<Task>` with
//! a single interior mutex guarding everything a phase can mutate, since
//! there is no database in scope here and the state machine already
//! guarantees a single driver at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use supernode_types::{Input, Output, Status, TaskKind, TaskState, Vars};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::context::TaskContext;
use crate::handler::Handler3;

struct TaskMutable {
    vars: Vars,
    input: Input,
    output: Output,
    last_status: Status,
    state: TaskState,
    chunk_tx: Option<UnboundedSender<Vec<u8>>>,
}

/// A single in-flight request, periodic tick, or upstream-blocking
/// continuation, identified by a UUID and bound to one `Handler3` for its
/// whole lifetime.
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub handler: Handler3,
    pub ctx: Arc<TaskContext>,
    inner: Mutex<TaskMutable>,
}

impl Task {
    pub fn new(kind: TaskKind, handler: Handler3, vars: Vars, input: Input, global: Arc<crate::context::GlobalContext>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            handler,
            ctx: Arc::new(TaskContext::new(global)),
            inner: Mutex::new(TaskMutable {
                vars,
                input,
                output: Output::default(),
                last_status: Status::None,
                state: TaskState::Execute,
                chunk_tx: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TaskMutable> {
        self.inner.lock().expect("task mutex poisoned")
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn set_state(&self, state: TaskState) {
        self.lock().state = state;
    }

    pub fn last_status(&self) -> Status {
        self.lock().last_status
    }

    pub fn set_last_status(&self, status: Status) {
        self.lock().last_status = status;
    }

    pub fn vars(&self) -> Vars {
        self.lock().vars.clone()
    }

    pub fn input(&self) -> Input {
        self.lock().input.clone()
    }

    pub fn output(&self) -> Output {
        self.lock().output.clone()
    }

    pub fn set_output(&self, output: Output) {
        self.lock().output = output;
    }

    /// Replace the request-side buffer with a postpone-resumption answer
    /// before re-entering the phase the task was suspended from.
    pub fn set_input(&self, input: Input) {
        self.lock().input = input;
    }

    /// Wires a channel the state machine feeds one body chunk into per
    /// `Status::Again` round, framed as chunked transfer encoding (see
    /// DESIGN.md). The caller owns the receiving end and decides how to
    /// frame it onto the wire.
    pub fn attach_chunk_sink(&self, tx: UnboundedSender<Vec<u8>>) {
        self.lock().chunk_tx = Some(tx);
    }

    /// Forwards the current output body to the chunk sink, if one is
    /// attached. A no-op for tasks driven without HTTP streaming (periodic
    /// ticks, tests).
    pub fn emit_chunk(&self, bytes: Vec<u8>) {
        if let Some(tx) = self.lock().chunk_tx.as_ref() {
            let _ = tx.send(bytes);
        }
    }

    /// Snapshot everything a phase call needs in one lock acquisition.
    pub fn snapshot(&self) -> (Vars, Input, Output) {
        let guard = self.lock();
        (guard.vars.clone(), guard.input.clone(), guard.output.clone())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("handler", &self.handler.name)
            .field("state", &self.state())
            .field("last_status", &self.last_status())
            .finish()
    }
}
