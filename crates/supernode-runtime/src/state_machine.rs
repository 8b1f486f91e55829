//! The task state machine: `EXECUTE → PRE_ACTION → CHK_PRE_ACTION →
//! WORKER_ACTION → CHK_WORKER_ACTION → WORKER_ACTION_DONE → POST_ACTION →
//! CHK_POST_ACTION → EXIT`, driven entirely within one `drive` call.
//!
//! Grounded on `WorkflowInstance::transition_to`'s guarded-transition shape,
//! reworked into a table-driven loop over `supernode_types::TaskState` —
//! Rust's exhaustive `match` makes the "table gap" failure class from the
//! original a compile error instead of a runtime one, so `CoreError::
//! TableGap` is reserved for states this machine's own invariants forbid
//! reaching (defensive, never expected to fire).
//!
//! `Status::Forward` and `Status::Postpone` are both modeled as a plain
//! `.await` inside `drive` rather than as a true suspend-and-resume of the
//! calling task: forwarding awaits the Upstream Manager directly, and
//! postponing awaits a receiver that some *other* task's phase resolves
//! later by UUID. Either way the `Task` itself needs no out-of-band
//! wakeup — it's just one future parked mid-poll, which is what async Rust
//! is for.

use std::sync::Arc;
use std::time::Duration;

use supernode_types::{Status, TaskState};

use crate::error::CoreError;
use crate::postpone::{ParkResult, PostponeRegistry};
use crate::task::Task;
use crate::upstream::UpstreamManager;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    Pre,
    Worker,
    Post,
}

pub struct StateMachine {
    pool: Arc<WorkerPool>,
    upstream: Arc<UpstreamManager>,
    postpone: Arc<PostponeRegistry>,
    postpone_timeout: Duration,
    resume_stage_ttl: Duration,
}

impl StateMachine {
    pub fn new(
        pool: Arc<WorkerPool>,
        upstream: Arc<UpstreamManager>,
        postpone: Arc<PostponeRegistry>,
        postpone_timeout: Duration,
        resume_stage_ttl: Duration,
    ) -> Self {
        Self { pool, upstream, postpone, postpone_timeout, resume_stage_ttl }
    }

    /// Drive `task` from wherever its `TaskState` currently sits through to
    /// `EXIT`. Safe to call again on a task that was last left at `EXIT` —
    /// it returns immediately.
    pub async fn drive(&self, task: Arc<Task>) {
        loop {
            match task.state() {
                TaskState::Execute => self.enter_execute(&task),
                TaskState::PreAction => {
                    self.invoke_phase(&task, After::Pre).await;
                    task.set_state(TaskState::ChkPreAction);
                }
                TaskState::ChkPreAction => {
                    if self.route(&task, After::Pre).await {
                        return;
                    }
                }
                TaskState::WorkerAction => {
                    self.invoke_worker(&task).await;
                    task.set_state(TaskState::ChkWorkerAction);
                }
                TaskState::ChkWorkerAction => {
                    if self.route(&task, After::Worker).await {
                        return;
                    }
                }
                TaskState::WorkerActionDone => {
                    task.set_state(TaskState::PostAction);
                }
                TaskState::PostAction => {
                    self.invoke_phase(&task, After::Post).await;
                    task.set_state(TaskState::ChkPostAction);
                }
                TaskState::ChkPostAction => {
                    if self.route(&task, After::Post).await {
                        return;
                    }
                }
                TaskState::Exit => return,
            }
        }
    }

    /// Thread-pool overflow guard: a handler that will need
    /// `worker_action` is refused up front with `Busy` if the pool is
    /// already saturated, instead of admitting it only to queue forever.
    fn enter_execute(&self, task: &Arc<Task>) {
        if task.handler.worker_action.is_some() && self.pool.is_saturated() {
            task.set_last_status(Status::Busy);
            task.set_state(TaskState::Exit);
        } else {
            task.set_state(TaskState::PreAction);
        }
    }

    async fn invoke_phase(&self, task: &Arc<Task>, which: After) {
        let phase = match which {
            After::Pre => task.handler.pre_action.clone(),
            After::Post => task.handler.post_action.clone(),
            After::Worker => unreachable!("invoke_phase is never called for After::Worker"),
        };
        let Some(phase) = phase else {
            task.set_last_status(Status::Ok);
            return;
        };
        let (vars, input, output) = task.snapshot();
        let ctx = task.ctx.clone();
        match tokio::spawn(phase.call(vars, input, ctx, output)).await {
            Ok((status, output)) => {
                task.set_output(output);
                task.set_last_status(status.normalize());
            }
            Err(join_err) => {
                tracing::error!(task_id = %task.id, panicked = join_err.is_panic(), phase = ?which, "handler phase failed");
                task.set_last_status(Status::InternalError);
            }
        }
    }

    async fn invoke_worker(&self, task: &Arc<Task>) {
        let Some(phase) = task.handler.worker_action.clone() else {
            task.set_last_status(Status::Ok);
            return;
        };
        let (vars, input, output) = task.snapshot();
        let ctx = task.ctx.clone();
        match self.pool.dispatch_and_await(task.id, vars, input, ctx, output, phase, true).await {
            Ok((status, output)) => {
                task.set_output(output);
                task.set_last_status(status.normalize());
            }
            Err(CoreError::WorkerQueueFull) => task.set_last_status(Status::Busy),
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "worker_action dispatch failed");
                task.set_last_status(Status::InternalError);
            }
        }
    }

    /// CHK_PRE_ACTION / CHK_WORKER_ACTION / CHK_POST_ACTION: route on the
    /// phase's `Status`. Returns `true` when `drive` should stop (EXIT
    /// reached).
    async fn route(&self, task: &Arc<Task>, after: After) -> bool {
        match task.last_status().normalize() {
            Status::Ok => {
                self.resume_correlated_task(task);
                self.advance_on_success(task, after)
            }
            Status::Forward => self.route_forward(task, after).await,
            Status::Again => {
                // Status::Again: the phase wants another round with its
                // current Output flushed as one chunk of a chunked
                // transfer (the Status::Again framing decision). Re-enter
                // the same phase for the next chunk.
                task.emit_chunk(task.output().body.clone());
                match after {
                    After::Pre => task.set_state(TaskState::PreAction),
                    After::Worker => task.set_state(TaskState::WorkerAction),
                    After::Post => task.set_state(TaskState::PostAction),
                }
                false
            }
            Status::Postpone => self.route_postpone(task, after).await,
            Status::Error | Status::InternalError | Status::Drop | Status::Busy | Status::Stop => {
                task.set_state(TaskState::Exit);
                true
            }
            Status::None => unreachable!("Status::normalize maps None to Ok"),
        }
    }

    /// A phase that succeeds while its `Context` carries a resume target
    /// (set via `Context.set_next_task_id`) hands this task's current
    /// `Input` to whichever other task is parked under that UUID. This is
    /// the general mechanism behind postpone/resume: any handler can
    /// resume a parked task this way, not only the one wired up to an
    /// HTTP callback route.
    fn resume_correlated_task(&self, task: &Arc<Task>) {
        if let Some(target) = task.ctx.take_next_task_id() {
            self.postpone.resume(target, task.input(), self.resume_stage_ttl);
        }
    }

    fn advance_on_success(&self, task: &Arc<Task>, after: After) -> bool {
        match after {
            After::Pre => {
                if task.handler.worker_action.is_some() {
                    task.set_state(TaskState::WorkerAction);
                } else {
                    task.set_state(TaskState::PostAction);
                }
                false
            }
            After::Worker => {
                task.set_state(TaskState::WorkerActionDone);
                false
            }
            After::Post => {
                task.set_state(TaskState::Exit);
                true
            }
        }
    }

    /// Forward hands the task's current `Output` to the Upstream Manager
    /// and always resumes at `POST_ACTION`, regardless of which phase
    /// returned `Forward`.
    async fn route_forward(&self, task: &Arc<Task>, after: After) -> bool {
        match self.upstream.send(task).await {
            Ok(()) => task.set_last_status(Status::Ok),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "upstream forward failed");
                task.set_last_status(if matches!(e, CoreError::UpstreamTimeout) { Status::Error } else { Status::InternalError });
                task.set_state(TaskState::Exit);
                return true;
            }
        }
        if after == After::Post {
            task.set_state(TaskState::Exit);
            true
        } else {
            task.set_state(TaskState::PostAction);
            false
        }
    }

    /// Postpone suspends the task behind a UUID until a correlated later
    /// task resolves it, then resumes as if the phase had returned `Ok`.
    async fn route_postpone(&self, task: &Arc<Task>, after: After) -> bool {
        let park_id = task.ctx.take_next_task_id().unwrap_or(task.id);
        let answer = match self.postpone.park(park_id) {
            ParkResult::Immediate(input) => Ok(input),
            ParkResult::Pending(rx) => match tokio::time::timeout(self.postpone_timeout, rx).await {
                Ok(Ok(input)) => Ok(input),
                Ok(Err(_)) | Err(_) => Err(CoreError::PostponeTimeout),
            },
        };
        match answer {
            Ok(input) => {
                task.set_input(input);
                self.advance_on_success(task, after)
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "postponed task never resumed");
                task.set_last_status(Status::InternalError);
                task.set_state(TaskState::Exit);
                true
            }
        }
    }
}
