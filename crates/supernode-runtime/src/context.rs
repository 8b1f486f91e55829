//! Context store: per-task `LocalContext` (single-writer, unlocked) and
//! process-scoped `GlobalContext` (sharded by key hash, per-key mutual
//! exclusion, TTL expiry with a one-shot `on_expire` callback).
//!
//! Grounded on the `sem_os_core` pattern of passing shared state behind
//! `Arc<dyn Port>` trait objects; reworked here into a concrete sharded map
//! since there is no database in scope for this module.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use supernode_types::ContextValue;
use uuid::Uuid;

const DEFAULT_SHARD_COUNT: usize = 16;

/// Task-scoped key-value store. Mutated only by the task's current driver,
/// so no synchronization is needed.
#[derive(Debug, Default)]
pub struct LocalContext {
    map: HashMap<String, ContextValue>,
}

impl LocalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.map.get(key)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.map.get(key).and_then(ContextValue::as_int).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(ContextValue::as_bool).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.map.get(key).and_then(ContextValue::as_str).unwrap_or(default).to_string()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.map.remove(key)
    }

    pub fn apply<F>(&mut self, key: &str, default: ContextValue, mutator: F)
    where
        F: FnOnce(ContextValue) -> ContextValue,
    {
        let current = self.map.remove(key).unwrap_or(default);
        self.map.insert(key.to_string(), mutator(current));
    }
}

struct GlobalEntry {
    value: ContextValue,
    expires_at: Option<Instant>,
    on_expire: Option<Box<dyn FnOnce(&ContextValue) + Send>>,
}

/// Process-scoped key-value store shared by the Reactor, worker threads,
/// and the periodic cleaner. Sharded by key hash so concurrent readers of
/// distinct keys never contend; within a shard, a `Mutex` makes `apply` an
/// atomic single-key critical section.
pub struct GlobalContext {
    shards: Vec<Mutex<HashMap<String, GlobalEntry>>>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    pub fn with_shards(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self { shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn shard_for(&self, key: &str) -> MutexGuard<'_, HashMap<String, GlobalEntry>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock().expect("global context shard poisoned")
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.set_with_ttl(key, value, None, None);
    }

    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
        ttl: Option<Duration>,
        on_expire: Option<Box<dyn FnOnce(&ContextValue) + Send>>,
    ) {
        let key = key.into();
        let mut shard = self.shard_for(&key);
        shard.insert(
            key,
            GlobalEntry {
                value: value.into(),
                expires_at: ttl.map(|d| Instant::now() + d),
                on_expire,
            },
        );
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.shard_for(key).get(key).and_then(|e| e.value.as_int()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.shard_for(key).get(key).and_then(|e| e.value.as_bool()).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.shard_for(key).get(key).and_then(|e| e.value.as_str()).unwrap_or(default).to_string()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.shard_for(key).contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<ContextValue> {
        self.shard_for(key).remove(key).map(|e| e.value)
    }

    /// Atomic read-modify-write over a single entry — used for counters.
    pub fn apply<F>(&self, key: &str, default: ContextValue, mutator: F)
    where
        F: FnOnce(ContextValue) -> ContextValue,
    {
        let mut shard = self.shard_for(key);
        let entry = shard.remove(key);
        let (current, expires_at, on_expire) = match entry {
            Some(e) => (e.value, e.expires_at, e.on_expire),
            None => (default, None, None),
        };
        shard.insert(
            key.to_string(),
            GlobalEntry { value: mutator(current), expires_at, on_expire },
        );
    }

    /// Sweep every shard for expired entries, firing each `on_expire`
    /// callback exactly once. Called by the Reactor's periodic cleaner
    /// with bounded work per iteration via `max_per_shard`.
    pub fn expire_due(&self, max_per_shard: usize) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        for shard_lock in &self.shards {
            let mut shard = shard_lock.lock().expect("global context shard poisoned");
            let due: Vec<String> = shard
                .iter()
                .filter(|(_, e)| matches!(e.expires_at, Some(t) if t <= now))
                .take(max_per_shard)
                .map(|(k, _)| k.clone())
                .collect();
            for key in due {
                if let Some(entry) = shard.remove(&key) {
                    if let Some(cb) = entry.on_expire {
                        cb(&entry.value);
                    }
                    expired += 1;
                }
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().expect("poisoned").len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The `Context` a handler phase actually receives: its task-local store
/// plus a handle to the shared global store, and the postpone-resumption
/// target id a handler sets via `set_next_task_id`.
///
/// `local` is behind a `Mutex` rather than handed out as `&mut` so
/// `Handler3` phases can be plain `Fn`s taking `Arc<TaskContext>` — the
/// state machine still guarantees only one phase runs at a time per task,
/// so the lock is never contended.
pub struct TaskContext {
    pub local: Mutex<LocalContext>,
    pub global: Arc<GlobalContext>,
    next_task_id: Mutex<Option<Uuid>>,
}

impl TaskContext {
    pub fn new(global: Arc<GlobalContext>) -> Self {
        Self { local: Mutex::new(LocalContext::new()), global, next_task_id: Mutex::new(None) }
    }

    pub fn set_next_task_id(&self, id: Uuid) {
        *self.next_task_id.lock().expect("task context poisoned") = Some(id);
    }

    pub fn take_next_task_id(&self) -> Option<Uuid> {
        self.next_task_id.lock().expect("task context poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn local_apply_mutates_counter() {
        let mut ctx = LocalContext::new();
        ctx.apply("n", ContextValue::Int(0), |v| ContextValue::Int(v.as_int().unwrap() + 1));
        ctx.apply("n", ContextValue::Int(0), |v| ContextValue::Int(v.as_int().unwrap() + 1));
        assert_eq!(ctx.get_int("n", -1), 2);
    }

    #[test]
    fn global_ttl_expires_and_fires_callback_once() {
        let ctx = GlobalContext::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        ctx.set_with_ttl(
            "k",
            ContextValue::Int(7),
            Some(Duration::from_millis(1)),
            Some(Box::new(move |_| fired2.store(true, Ordering::SeqCst))),
        );
        assert!(ctx.has_key("k"));
        std::thread::sleep(Duration::from_millis(5));
        let expired = ctx.expire_due(usize::MAX);
        assert_eq!(expired, 1);
        assert!(!ctx.has_key("k"));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn global_apply_is_atomic_per_key() {
        let ctx = Arc::new(GlobalContext::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    ctx.apply("counter", ContextValue::Int(0), |v| {
                        ContextValue::Int(v.as_int().unwrap() + 1)
                    });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctx.get_int("counter", -1), 8000);
    }

    #[test]
    fn distinct_keys_get_distinct_shards_when_possible() {
        let ctx = GlobalContext::with_shards(4);
        ctx.set("a", ContextValue::Int(1));
        ctx.set("b", ContextValue::Int(2));
        assert_eq!(ctx.get_int("a", 0), 1);
        assert_eq!(ctx.get_int("b", 0), 2);
    }
}
