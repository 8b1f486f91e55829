//! The Reactor: the single loop that, each tick, sweeps expired context
//! entries, sweeps stale postpone stages, and fires any periodic task
//! whose interval has elapsed — then decides whether to stop.
//!
//! The accept loop itself (listener sockets, upstream client sockets) is
//! `axum`/`hyper`'s job in `supernode-server`, not reimplemented here —
//! this `Reactor` models exactly the maintenance-and-periodic-dispatch half
//! that has no ready-made equivalent in the HTTP framework: draining
//! worker-completion, blocking-upstream, add-periodic-task, postpone-
//! resumption and LRU-expiration work each iteration becomes one
//! `tokio::time::interval` tick doing the same bounded sweep of work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use supernode_types::{Status, TaskKind, Vars};
use tracing::{debug, info};

use crate::context::GlobalContext;
use crate::handler::Handler3;
use crate::postpone::PostponeRegistry;
use crate::state_machine::StateMachine;
use crate::task::Task;

struct PeriodicTask {
    name: String,
    interval: Duration,
    handler: Handler3,
    next_due: Mutex<Instant>,
    stopped: AtomicBool,
}

/// Ties the context store's expiry sweep, the postpone registry's stale-
/// stage sweep, and periodic task dispatch into one interval loop, and
/// tracks in-flight work so `stop()` can wait for a clean drain.
pub struct Reactor {
    global: Arc<GlobalContext>,
    postpone: Arc<PostponeRegistry>,
    sm: Arc<StateMachine>,
    periodic: Mutex<Vec<Arc<PeriodicTask>>>,
    in_flight: Arc<AtomicUsize>,
    stop_requested: Arc<AtomicBool>,
    timer_poll_interval: Duration,
    lru_sweep_batch: usize,
}

impl Reactor {
    pub fn new(
        global: Arc<GlobalContext>,
        postpone: Arc<PostponeRegistry>,
        sm: Arc<StateMachine>,
        timer_poll_interval: Duration,
    ) -> Self {
        Self {
            global,
            postpone,
            sm,
            periodic: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            timer_poll_interval,
            lru_sweep_batch: 1024,
        }
    }

    /// Register a recurring task. It first fires after `interval` has
    /// elapsed at least once; returning `Status::Stop` from any phase
    /// deregisters it permanently.
    pub fn add_periodic(&self, name: impl Into<String>, interval: Duration, handler: Handler3) {
        self.periodic.lock().expect("periodic list poisoned").push(Arc::new(PeriodicTask {
            name: name.into(),
            interval,
            handler,
            next_due: Mutex::new(Instant::now() + interval),
            stopped: AtomicBool::new(false),
        }));
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one maintenance tick: expiry sweeps plus due periodic tasks.
    /// Exposed separately from `run` so `supernode-server` can drive it
    /// from the same interval as its own graceful-shutdown watcher.
    pub async fn tick(&self) {
        let expired_ctx = self.global.expire_due(self.lru_sweep_batch);
        let expired_postpone = self.postpone.expire_stale_early(Instant::now());
        if expired_ctx > 0 || expired_postpone > 0 {
            debug!(expired_ctx, expired_postpone, "reactor expiry sweep");
        }
        self.dispatch_due_periodic_tasks().await;
    }

    async fn dispatch_due_periodic_tasks(&self) {
        let now = Instant::now();
        let due: Vec<Arc<PeriodicTask>> = {
            let tasks = self.periodic.lock().expect("periodic list poisoned");
            tasks
                .iter()
                .filter(|t| !t.stopped.load(Ordering::SeqCst) && *t.next_due.lock().expect("periodic due poisoned") <= now)
                .cloned()
                .collect()
        };
        for pt in due {
            *pt.next_due.lock().expect("periodic due poisoned") = now + pt.interval;
            let sm = self.sm.clone();
            let global = self.global.clone();
            let in_flight = self.in_flight.clone();
            let name = pt.name.clone();
            in_flight.fetch_add(1, Ordering::SeqCst);
            let task = Task::new(TaskKind::Periodic, pt.handler.clone(), Vars::new(), Default::default(), global);
            let pt_for_stop = pt.clone();
            tokio::spawn(async move {
                sm.drive(task.clone()).await;
                if task.last_status() == Status::Stop {
                    info!(task = %name, "periodic task requested Stop, deregistering");
                    pt_for_stop.stopped.store(true, Ordering::SeqCst);
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    /// Loop until `request_stop` has been called and every in-flight task
    /// (periodic dispatch, upstream-blocking continuation) has finished.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.timer_poll_interval);
        loop {
            ticker.tick().await;
            self.tick().await;
            if self.stop_requested.load(Ordering::SeqCst) && self.in_flight_count() == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postpone::PostponeRegistry;
    use crate::upstream::{DestinationConfig, UpstreamManager};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use supernode_types::Output;

    fn state_machine() -> Arc<StateMachine> {
        let pool = crate::worker_pool::WorkerPool::new(1, 4, Duration::from_secs(60));
        let upstream = Arc::new(
            UpstreamManager::new(
                DestinationConfig { base_uri: "http://127.0.0.1:1".into(), max_connections: 1, keep_alive: true, timeout: Duration::from_millis(50) },
                HashMap::new(),
            )
            .unwrap(),
        );
        Arc::new(StateMachine::new(
            pool,
            upstream,
            Arc::new(PostponeRegistry::new()),
            Duration::from_millis(200),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_fires_on_schedule_and_stops_on_request() {
        let reactor = Reactor::new(Arc::new(GlobalContext::new()), Arc::new(PostponeRegistry::new()), state_machine(), Duration::from_millis(10));
        let fire_count = Arc::new(StdAtomicUsize::new(0));
        let counter = fire_count.clone();
        let handler = Handler3::new("tick").with_pre(move |_v, _i, _c, o: Output| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (Status::Ok, o)
            }
        });
        reactor.add_periodic("tick", Duration::from_millis(50), handler);

        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(10)).await;
            reactor.tick().await;
        }
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(fire_count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stop_requested_with_no_in_flight_is_immediately_satisfied() {
        let reactor = Reactor::new(Arc::new(GlobalContext::new()), Arc::new(PostponeRegistry::new()), state_machine(), Duration::from_millis(5));
        reactor.request_stop();
        assert_eq!(reactor.in_flight_count(), 0);
        tokio::time::timeout(Duration::from_millis(200), reactor.run()).await.expect("reactor should stop promptly");
    }
}
