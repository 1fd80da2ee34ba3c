use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::core::error::ResourceError;
use crate::pool::handle::{Checkout, PooledResource};
use crate::stream::TaskPool;

/// Requirements for a resource description used as a pool key
pub trait PoolKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + Unpin + 'static {}

impl<T> PoolKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + Unpin + 'static {}

pub(crate) type SharedLoad<R> = Shared<BoxFuture<'static, Result<Arc<R>, ResourceError>>>;

/// Pool caching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolConfig {
    /// Zero-count resources kept resident, least recently returned evicted first
    pub keep_alive: usize,
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Constructions started
    pub constructions: u64,
    /// Checkouts served by an existing or in-flight entry
    pub hits: u64,
    /// Constructions that failed
    pub failures: u64,
    /// Resources released after their count reached zero
    pub evictions: u64,
}

pub(crate) enum Slot<R> {
    Loading(SharedLoad<R>),
    Ready(Arc<R>),
}

struct Entry<R> {
    slot: Slot<R>,
    ref_count: usize,
    /// Distinguishes this entry from a later one with the same key
    generation: u64,
}

pub(crate) struct PoolState<K, R> {
    label: &'static str,
    config: PoolConfig,
    entries: HashMap<K, Entry<R>>,
    /// Resident zero-count entries, oldest first
    idle: VecDeque<K>,
    next_generation: u64,
    stats: PoolStats,
}

impl<K: PoolKey, R> PoolState<K, R> {
    fn park_idle(&mut self, key: K, evicted: &mut Vec<Arc<R>>) {
        if self.config.keep_alive == 0 {
            self.evict(&key, evicted);
            return;
        }
        self.idle.push_back(key);
        while self.idle.len() > self.config.keep_alive {
            if let Some(oldest) = self.idle.pop_front() {
                self.evict(&oldest, evicted);
            }
        }
    }

    fn unpark(&mut self, key: &K) {
        if let Some(pos) = self.idle.iter().position(|k| k == key) {
            self.idle.remove(pos);
        }
    }

    fn evict(&mut self, key: &K, evicted: &mut Vec<Arc<R>>) {
        if let Some(entry) = self.entries.remove(key) {
            log::debug!("[{}] releasing {:?}", self.label, key);
            self.stats.evictions += 1;
            if let Slot::Ready(resource) = entry.slot {
                evicted.push(resource);
            }
        }
    }

    fn finish_construction(&mut self, key: &K, generation: u64, resource: Arc<R>, evicted: &mut Vec<Arc<R>>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.slot = Slot::Ready(resource);
        if entry.ref_count == 0 {
            // Every checkout was dropped while loading
            self.park_idle(key.clone(), evicted);
        }
    }

    fn fail_construction(&mut self, key: &K, generation: u64, err: &ResourceError) {
        let matches = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation && matches!(entry.slot, Slot::Loading(_)));
        if matches {
            self.entries.remove(key);
            self.stats.failures += 1;
            log::warn!("[{}] construction of {:?} failed: {}", self.label, key, err);
        }
    }

    /// Drop one reference. Returns false for stale or over-released handles.
    pub(crate) fn release(&mut self, key: &K, generation: u64, evicted: &mut Vec<Arc<R>>) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            log::debug!("[{}] release of {:?} after its entry was removed", self.label, key);
            return false;
        };
        if entry.generation != generation || entry.ref_count == 0 {
            log::warn!("[{}] ignoring stale release of {:?}", self.label, key);
            return false;
        }
        entry.ref_count -= 1;
        log::debug!("[{}] returned {:?}, {} references left", self.label, key, entry.ref_count);
        if entry.ref_count == 0 && matches!(entry.slot, Slot::Ready(_)) {
            self.park_idle(key.clone(), evicted);
        }
        true
    }
}

/// Reference-counted cache of resources keyed by their description
pub struct ResourcePool<K, R> {
    state: Arc<Mutex<PoolState<K, R>>>,
    tasks: TaskPool,
}

impl<K, R> Clone for ResourcePool<K, R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            tasks: self.tasks.clone(),
        }
    }
}

impl<K: PoolKey, R: Send + Sync + 'static> ResourcePool<K, R> {
    /// Create an empty pool. `label` prefixes this pool's log lines.
    pub fn new(label: &'static str, tasks: TaskPool, config: PoolConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                label,
                config,
                entries: HashMap::new(),
                idle: VecDeque::new(),
                next_generation: 0,
                stats: PoolStats::default(),
            })),
            tasks,
        }
    }

    /// Check out the resource for `key`.
    ///
    /// The reference count is incremented before this returns, even when the
    /// resource is still being constructed. If no entry exists, `create` is
    /// called with the key and its future is spawned on the task pool; its
    /// result is shared with every checkout issued before it completes.
    ///
    /// `create` runs while the pool is locked, so it must not call back into
    /// this pool. The future it returns may.
    pub fn checkout<F, Fut>(&self, key: K, create: F) -> Checkout<K, R>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<R, ResourceError>> + Send + 'static,
    {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.ref_count += 1;
            let count = entry.ref_count;
            let generation = entry.generation;
            let slot = match &entry.slot {
                Slot::Ready(resource) => Slot::Ready(Arc::clone(resource)),
                Slot::Loading(load) => Slot::Loading(load.clone()),
            };
            if count == 1 {
                state.unpark(&key);
            }
            state.stats.hits += 1;
            log::debug!("[{}] checkout {:?}, {} references", state.label, key, count);
            return Checkout::new(key, generation, slot, Arc::downgrade(&self.state));
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.stats.constructions += 1;
        log::debug!("[{}] constructing {:?}", state.label, key);

        let construction = create(key.clone());
        let weak = Arc::downgrade(&self.state);
        let task = self
            .tasks
            .spawn(Self::construct(Weak::clone(&weak), key.clone(), generation, construction));

        let cleanup_key = key.clone();
        let load: SharedLoad<R> = async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => {
                    let err = ResourceError::new(&cleanup_key, format!("construction task aborted: {join_err}"));
                    if let Some(state) = weak.upgrade() {
                        state.lock().fail_construction(&cleanup_key, generation, &err);
                    }
                    Err(err)
                }
            }
        }
        .boxed()
        .shared();

        state.entries.insert(
            key.clone(),
            Entry {
                slot: Slot::Loading(load.clone()),
                ref_count: 1,
                generation,
            },
        );

        Checkout::new(key, generation, Slot::Loading(load), Arc::downgrade(&self.state))
    }

    async fn construct<Fut>(
        state: Weak<Mutex<PoolState<K, R>>>,
        key: K,
        generation: u64,
        construction: Fut,
    ) -> Result<Arc<R>, ResourceError>
    where
        Fut: Future<Output = Result<R, ResourceError>>,
    {
        let result = construction.await.map(Arc::new);
        if let Some(state) = state.upgrade() {
            let mut evicted = Vec::new();
            {
                let mut state = state.lock();
                match &result {
                    Ok(resource) => {
                        state.finish_construction(&key, generation, Arc::clone(resource), &mut evicted)
                    }
                    Err(err) => state.fail_construction(&key, generation, err),
                }
            }
            drop(evicted);
        }
        result
    }

    /// Give a handle back to the pool.
    pub fn return_handle(&self, handle: PooledResource<K, R>) {
        if !handle.belongs_to(&self.state) {
            log::warn!("[{}] {:?} was checked out from another pool", self.state.lock().label, handle.key());
        }
        // Releasing happens in the handle's drop, against the pool it came from
        drop(handle);
    }

    /// Give back a handle if there is one.
    ///
    /// Cleanup paths pass `field.take()`, which makes a second call a no-op.
    pub fn try_return(&self, handle: Option<PooledResource<K, R>>) {
        if let Some(handle) = handle {
            self.return_handle(handle);
        }
    }

    /// Current reference count for `key`, zero if absent or idle
    pub fn ref_count(&self, key: &K) -> usize {
        self.state.lock().entries.get(key).map_or(0, |e| e.ref_count)
    }

    /// Whether an entry (loading, in use or idle) exists for `key`
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Whether the resource for `key` has finished constructing
    pub fn is_ready(&self, key: &K) -> bool {
        matches!(self.state.lock().entries.get(key), Some(Entry { slot: Slot::Ready(_), .. }))
    }

    /// Number of entries, including idle ones
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resident zero-count entries
    pub fn idle_len(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Release every idle resource now.
    pub fn purge_idle(&self) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            while let Some(key) = state.idle.pop_front() {
                state.evict(&key, &mut evicted);
            }
        }
        drop(evicted);
    }
}
