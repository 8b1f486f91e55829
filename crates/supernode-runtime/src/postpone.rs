//! Postpone/resume: suspend a task pending a correlated later task (a
//! `/callback/{uuid}` arriving, an async cryptonode notification) and wake
//! it by UUID.
//!
//! Two races are possible: the resuming answer can land before the task
//! ever parks (the correlated work finished fast), or the park can happen
//! first and wait. `early` stages the former case with a short TTL so a
//! fast answer is never lost waiting for a park that's already too late.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use supernode_types::Input;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::expiring::ExpiringMap;

pub enum ParkResult {
    Immediate(Input),
    Pending(oneshot::Receiver<Input>),
}

pub struct PostponeRegistry {
    parked: Mutex<HashMap<Uuid, oneshot::Sender<Input>>>,
    early: Mutex<ExpiringMap<Uuid, Input>>,
}

impl PostponeRegistry {
    pub fn new() -> Self {
        Self { parked: Mutex::new(HashMap::new()), early: Mutex::new(ExpiringMap::new()) }
    }

    pub fn park(&self, id: Uuid) -> ParkResult {
        if let Some(input) = self.early.lock().expect("postpone early poisoned").extract(&id) {
            return ParkResult::Immediate(input);
        }
        let (tx, rx) = oneshot::channel();
        self.parked.lock().expect("postpone parked poisoned").insert(id, tx);
        ParkResult::Pending(rx)
    }

    /// Deliver a resumption answer. Returns `true` if a parked waiter took
    /// it immediately, `false` if it was staged because nobody has parked
    /// for `id` yet (the stage expires after `stage_ttl` if nobody ever
    /// does).
    pub fn resume(&self, id: Uuid, input: Input, stage_ttl: Duration) -> bool {
        if let Some(tx) = self.parked.lock().expect("postpone parked poisoned").remove(&id) {
            let _ = tx.send(input);
            return true;
        }
        self.early.lock().expect("postpone early poisoned").add(id, input, Instant::now() + stage_ttl);
        false
    }

    /// Drop stale staged answers nobody ever parked for. Called by the
    /// reactor's periodic cleanup pass.
    pub fn expire_stale_early(&self, now: Instant) -> usize {
        self.early.lock().expect("postpone early poisoned").expire_due(now).len()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.lock().expect("postpone parked poisoned").len()
    }
}

impl Default for PostponeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
