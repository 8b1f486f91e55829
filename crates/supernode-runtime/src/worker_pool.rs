//! Bounded MPMC worker pool executing CPU-bound `worker_action` callbacks,
//! plus the `Strand` serialization primitive layered on top of it.
//!
//! Grounded on `ob-workflow::listener::TaskQueueListener`'s poll/claim loop
//! shape (a dedicated consumer draining a queue with bounded retry), here
//! reworked from a database poll into an in-process bounded channel per
//! worker with round-robin dispatch and elastic worker expelling.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use supernode_types::{Input, Output, Vars};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::context::TaskContext;
use crate::error::CoreError;
use crate::handler::{BoxedPhase, PhaseOutcome};

/// One unit of work handed to the pool: a `worker_action` invocation plus a
/// one-shot channel the dispatcher awaits for the result.
pub struct Job {
    pub task_id: Uuid,
    pub vars: Vars,
    pub input: Input,
    pub ctx: Arc<TaskContext>,
    pub output: Output,
    pub phase: BoxedPhase,
    pub respond: oneshot::Sender<Result<PhaseOutcome, String>>,
}

struct Slot {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

/// Fixed set of worker "threads" (in practice, pool-driven async tasks),
/// each owning a bounded channel. Workers idle longer than `expel_after`
/// are expelled; a new job elastically respawns one.
pub struct WorkerPool {
    slots: Vec<Arc<Slot>>,
    queue_len: usize,
    expel_after: Duration,
    rr: AtomicUsize,
}

impl WorkerPool {
    /// `worker_count` is rounded up to a power of two.
    pub fn new(worker_count: usize, queue_len: usize, expel_after: Duration) -> Arc<Self> {
        let worker_count = worker_count.max(1).next_power_of_two();
        let slots = (0..worker_count).map(|_| Arc::new(Slot { sender: Mutex::new(None) })).collect();
        let pool = Arc::new(Self { slots, queue_len, expel_after, rr: AtomicUsize::new(0) });
        for idx in 0..pool.slots.len() {
            pool.ensure_worker(idx);
        }
        pool
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn resident_worker_count(&self) -> usize {
        self.slots.iter().filter(|s| s.sender.lock().expect("slot poisoned").is_some()).count()
    }

    /// True when every resident worker's queue is at capacity — the
    /// thread-pool overflow guard the state machine checks before even
    /// entering `PRE_ACTION` for a handler with a `worker_action`. An
    /// expelled (absent) worker respawns fresh, so its absence never
    /// counts toward saturation.
    pub fn is_saturated(&self) -> bool {
        self.slots.iter().all(|s| match s.sender.lock().expect("slot poisoned").as_ref() {
            Some(tx) => tx.capacity() == 0,
            None => false,
        })
    }

    fn ensure_worker(self: &Arc<Self>, idx: usize) {
        let mut guard = self.slots[idx].sender.lock().expect("slot poisoned");
        if guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(self.queue_len);
        *guard = Some(tx);
        drop(guard);
        let slot = self.slots[idx].clone();
        let expel_after = self.expel_after;
        tokio::spawn(Self::worker_loop(rx, slot, expel_after));
    }

    async fn worker_loop(mut rx: mpsc::Receiver<Job>, slot: Arc<Slot>, expel_after: Duration) {
        loop {
            match tokio::time::timeout(expel_after, rx.recv()).await {
                Ok(Some(job)) => {
                    let Job { task_id: _, vars, input, ctx, output, phase, respond } = job;
                    let outcome = tokio::spawn(phase.call(vars, input, ctx, output)).await;
                    let reported = match outcome {
                        Ok(result) => Ok(result),
                        Err(join_err) if join_err.is_panic() => {
                            Err("worker_action panicked".to_string())
                        }
                        Err(_) => Err("worker_action cancelled".to_string()),
                    };
                    let _ = respond.send(reported);
                }
                Ok(None) => break,
                Err(_timeout) => {
                    let mut guard = slot.sender.lock().expect("slot poisoned");
                    *guard = None;
                    break;
                }
            }
        }
    }

    /// Non-blocking dispatch. `retry_siblings` controls whether a full
    /// queue on the selected worker falls through to the next one instead
    /// of failing outright; reactor→worker handoffs never block.
    pub fn try_dispatch(self: &Arc<Self>, mut job: Job, retry_siblings: bool) -> Result<(), CoreError> {
        let n = self.slots.len();
        let start = self.rr.fetch_add(1, Ordering::Relaxed) % n;
        let attempts = if retry_siblings { n } else { 1 };
        for offset in 0..attempts {
            let idx = (start + offset) % n;
            self.ensure_worker(idx);
            let sender = self.slots[idx].sender.lock().expect("slot poisoned").clone();
            if let Some(tx) = sender {
                match tx.try_send(job) {
                    Ok(()) => return Ok(()),
                    Err(mpsc::error::TrySendError::Full(returned)) => job = returned,
                    Err(mpsc::error::TrySendError::Closed(returned)) => job = returned,
                }
            }
        }
        Err(CoreError::WorkerQueueFull)
    }

    /// Dispatch and await completion — the call pattern the task state
    /// machine uses for `CHK_PRE_ACTION` → `WORKER_ACTION`.
    pub async fn dispatch_and_await(
        self: &Arc<Self>,
        task_id: Uuid,
        vars: Vars,
        input: Input,
        ctx: Arc<TaskContext>,
        output: Output,
        phase: BoxedPhase,
        retry_siblings: bool,
    ) -> Result<PhaseOutcome, CoreError> {
        let (tx, rx) = oneshot::channel();
        let job = Job { task_id, vars, input, ctx, output, phase, respond: tx };
        self.try_dispatch(job, retry_siblings)?;
        match rx.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(msg)) => Err(CoreError::HandlerPanic(msg)),
            Err(_) => Err(CoreError::Internal(anyhow::anyhow!("worker dropped without responding"))),
        }
    }
}

type BoxedUnitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serializes arbitrary callables in submission order while still running
/// them on the ambient async runtime, for collaborators needing a per-key
/// single-writer discipline without a dedicated thread.
pub struct Strand {
    queue: Mutex<VecDeque<BoxedUnitFuture>>,
    running: AtomicBool,
}

impl Strand {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(VecDeque::new()), running: AtomicBool::new(false) })
    }

    pub fn submit<F>(self: &Arc<Self>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.queue.lock().expect("strand queue poisoned").push_back(Box::pin(fut));
        self.try_start_drain();
    }

    fn try_start_drain(self: &Arc<Self>) {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            let strand = self.clone();
            tokio::spawn(async move { strand.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().expect("strand queue poisoned").pop_front();
            match next {
                Some(fut) => fut.await,
                None => {
                    self.running.store(false, Ordering::SeqCst);
                    let still_empty = self.queue.lock().expect("strand queue poisoned").is_empty();
                    if still_empty {
                        break;
                    }
                    if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalContext;
    use supernode_types::Status;

    fn ctx() -> Arc<TaskContext> {
        Arc::new(TaskContext::new(Arc::new(GlobalContext::new())))
    }

    #[tokio::test]
    async fn dispatch_and_await_runs_worker_action() {
        let pool = WorkerPool::new(1, 4, Duration::from_secs(60));
        let phase: BoxedPhase = Arc::new(|_v, _i, _c, mut o: Output| {
            Box::pin(async move {
                o.body = b"done".to_vec();
                (Status::Ok, o)
            }) as crate::handler::PhaseFuture
        });
        let outcome = pool
            .dispatch_and_await(Uuid::new_v4(), Vars::new(), Input::default(), ctx(), Output::default(), phase, true)
            .await
            .unwrap();
        assert_eq!(outcome.0, Status::Ok);
        assert_eq!(outcome.1.body, b"done");
    }

    #[tokio::test]
    async fn overflow_without_sibling_retry_reports_busy() {
        let pool = WorkerPool::new(1, 1, Duration::from_secs(60));
        let blocking_phase: BoxedPhase = Arc::new(|_v, _i, _c, o: Output| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                (Status::Ok, o)
            }) as crate::handler::PhaseFuture
        });
        // saturate the single worker's queue (capacity 1): one in flight, one queued
        let _first = pool.try_dispatch(
            Job {
                task_id: Uuid::new_v4(),
                vars: Vars::new(),
                input: Input::default(),
                ctx: ctx(),
                output: Output::default(),
                phase: blocking_phase.clone(),
                respond: oneshot::channel().0,
            },
            false,
        );
        let (tx, _rx) = oneshot::channel();
        let _second = pool.try_dispatch(
            Job {
                task_id: Uuid::new_v4(),
                vars: Vars::new(),
                input: Input::default(),
                ctx: ctx(),
                output: Output::default(),
                phase: blocking_phase,
                respond: tx,
            },
            false,
        );
        // give the worker a tick to pull the first job off the channel
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (tx, _rx) = oneshot::channel();
        let third = pool.try_dispatch(
            Job {
                task_id: Uuid::new_v4(),
                vars: Vars::new(),
                input: Input::default(),
                ctx: ctx(),
                output: Output::default(),
                phase: Arc::new(|_v, _i, _c, o| Box::pin(async move { (Status::Ok, o) }) as crate::handler::PhaseFuture),
                respond: tx,
            },
            false,
        );
        assert!(matches!(third, Err(CoreError::WorkerQueueFull)));
    }

    #[tokio::test]
    async fn strand_preserves_submission_order() {
        let strand = Strand::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            strand.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                order.lock().unwrap().push(i);
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
