//! Background task pool for resource construction and object loads

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::core::error::{Error, Result};

/// Handle to the tokio runtime that runs background work.
///
/// Either owns a dedicated multi-threaded runtime or borrows the runtime the
/// caller is already running in. Cheap to clone.
#[derive(Clone)]
pub struct TaskPool {
    handle: Handle,
    /// Keeps an owned runtime alive while any clone exists
    _runtime: Option<Arc<Runtime>>,
}

impl TaskPool {
    /// Create a dedicated runtime with `worker_threads` workers.
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("rtstream-worker")
            .enable_all()
            .build()?;
        log::info!("Started background task pool with {} workers", worker_threads.max(1));
        Ok(Self {
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }

    /// Use the tokio runtime of the calling context.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("no tokio runtime in this context: {e}")))?;
        Ok(Self { handle, _runtime: None })
    }

    /// Run a unit of work in the background.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run blocking work (file reads, decoding) off the async workers.
    pub fn spawn_blocking<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Block the calling thread until `future` completes.
    ///
    /// Must not be called from inside the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_outside_runtime_fails() {
        assert!(TaskPool::current().is_err());
    }

    #[test]
    fn test_owned_pool_runs_work() {
        let pool = TaskPool::new(1).unwrap();
        let task = pool.spawn(async { 21 * 2 });
        assert_eq!(pool.block_on(task).unwrap(), 42);

        let blocking = pool.spawn_blocking(|| "done");
        assert_eq!(pool.block_on(blocking).unwrap(), "done");
    }

    #[tokio::test]
    async fn test_current_pool_shares_runtime() {
        let pool = TaskPool::current().unwrap();
        let value = pool.spawn(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
