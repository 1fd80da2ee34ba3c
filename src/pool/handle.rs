use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::core::error::ResourceError;
use crate::pool::resource_pool::{PoolKey, PoolState, Slot};

/// A checked-out pooled resource.
///
/// Holding one keeps the pool entry's reference count above zero. Hand it back
/// with [`ResourcePool::return_handle`](crate::pool::ResourcePool::return_handle).
/// A handle dropped without being returned, for example by a load future that
/// panicked, gives its reference back on drop.
#[must_use = "dropping a pooled resource gives its reference back immediately"]
pub struct PooledResource<K: PoolKey, R> {
    key: K,
    generation: u64,
    resource: Arc<R>,
    pool: Weak<Mutex<PoolState<K, R>>>,
}

impl<K: PoolKey, R> PooledResource<K, R> {
    /// Description this resource was checked out with
    pub fn key(&self) -> &K {
        &self.key
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<Mutex<PoolState<K, R>>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }
}

impl<K: PoolKey, R> Drop for PooledResource<K, R> {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut evicted = Vec::new();
        pool.lock().release(&self.key, self.generation, &mut evicted);
        // The pool's Arc goes first; ours is dropped with the fields
        drop(evicted);
    }
}

impl<K: PoolKey, R> Deref for PooledResource<K, R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<K: PoolKey, R> fmt::Debug for PooledResource<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Pending checkout returned by [`ResourcePool::checkout`](crate::pool::ResourcePool::checkout).
///
/// The reference is already counted. Dropping the future before it resolves
/// gives the reference back.
#[must_use = "dropping a checkout gives its reference back immediately"]
pub struct Checkout<K: PoolKey, R> {
    /// `Some` while this checkout still owns a reference it has not handed out
    key: Option<K>,
    generation: u64,
    pending: Option<Slot<R>>,
    pool: Weak<Mutex<PoolState<K, R>>>,
}

impl<K: PoolKey, R> Checkout<K, R> {
    pub(crate) fn new(key: K, generation: u64, slot: Slot<R>, pool: Weak<Mutex<PoolState<K, R>>>) -> Self {
        Self {
            key: Some(key),
            generation,
            pending: Some(slot),
            pool,
        }
    }
}

impl<K: PoolKey, R> Future for Checkout<K, R> {
    type Output = Result<PooledResource<K, R>, ResourceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match this.pending.take() {
            Some(Slot::Ready(resource)) => Ok(resource),
            Some(Slot::Loading(mut load)) => match Pin::new(&mut load).poll(cx) {
                Poll::Pending => {
                    this.pending = Some(Slot::Loading(load));
                    return Poll::Pending;
                }
                Poll::Ready(result) => result,
            },
            None => panic!("Checkout polled after completion"),
        };

        let key = this.key.take();
        match (result, key) {
            (Ok(resource), Some(key)) => Poll::Ready(Ok(PooledResource {
                key,
                generation: this.generation,
                resource,
                pool: Weak::clone(&this.pool),
            })),
            (Ok(_), None) => panic!("Checkout resolved without a reference"),
            // A failed construction already removed the entry and its count
            (Err(err), _) => Poll::Ready(Err(err)),
        }
    }
}

impl<K: PoolKey, R> Drop for Checkout<K, R> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        // Drop our view of the load before the pool can release the resource
        self.pending = None;
        if let Some(pool) = self.pool.upgrade() {
            let mut evicted = Vec::new();
            pool.lock().release(&key, self.generation, &mut evicted);
            drop(evicted);
        }
    }
}
