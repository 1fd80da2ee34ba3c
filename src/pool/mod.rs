//! Reference-counted pools of GPU resources
//!
//! A pool maps a resource description to at most one live resource. The first
//! checkout of a description starts its construction on the task pool; every
//! other checkout of the same description shares that construction. The pool
//! owns the resource. Callers hold a [`PooledResource`] handle that must be
//! given back with [`ResourcePool::return_handle`] or [`ResourcePool::try_return`]. A
//! handle dropped without being given back releases its reference on drop.

mod handle;
mod resource_pool;

pub use handle::{Checkout, PooledResource};
pub use resource_pool::{PoolConfig, PoolKey, PoolStats, ResourcePool};
