//! Destruction gate
//!
//! Defers an object's teardown while asynchronous work that still needs the
//! object is in flight. Teardown runs exactly once, on the transition into
//! "no blocks and destruction requested", whichever of the two happens last.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

struct GateState {
    blocks: usize,
    requested: bool,
    /// One-shot; taken when teardown fires
    teardown: Option<Teardown>,
}

impl GateState {
    fn take_teardown_if_ready(&mut self) -> Option<Teardown> {
        if self.requested && self.blocks == 0 {
            self.teardown.take()
        } else {
            None
        }
    }
}

/// Per-object destruction guard. Clones share the same gate.
#[derive(Clone)]
pub struct DestructionGate {
    inner: Arc<Mutex<GateState>>,
}

impl DestructionGate {
    /// Create a gate that calls `teardown` once destruction may proceed.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateState {
                blocks: 0,
                requested: false,
                teardown: Some(Box::new(teardown)),
            })),
        }
    }

    /// Hold off teardown until the returned block is released.
    pub fn block_destruction(&self) -> DestructionBlock {
        let mut state = self.inner.lock();
        if state.teardown.is_none() {
            log::warn!("Blocking destruction of an object that was already torn down");
        }
        state.blocks += 1;
        DestructionBlock {
            gate: Some(Arc::clone(&self.inner)),
        }
    }

    /// Ask for teardown. Fires now if nothing blocks it, otherwise when the
    /// last block is released. Repeated requests are ignored.
    pub fn request_destruction(&self) {
        let teardown = {
            let mut state = self.inner.lock();
            state.requested = true;
            state.take_teardown_if_ready()
        };
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether teardown has been requested. In-flight work checks this to
    /// skip publishing an object nobody wants anymore.
    pub fn destruction_requested(&self) -> bool {
        self.inner.lock().requested
    }

    /// Whether teardown has fired
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().teardown.is_none()
    }

    /// Number of outstanding blocks
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks
    }
}

impl fmt::Debug for DestructionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("DestructionGate")
            .field("blocks", &state.blocks)
            .field("requested", &state.requested)
            .field("destroyed", &state.teardown.is_none())
            .finish()
    }
}

/// Scoped block on a [`DestructionGate`]; released on drop.
#[must_use = "dropping a destruction block releases it immediately"]
pub struct DestructionBlock {
    gate: Option<Arc<Mutex<GateState>>>,
}

impl DestructionBlock {
    /// Release the block now.
    pub fn release(mut self) {
        self.unblock();
    }

    fn unblock(&mut self) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        let teardown = {
            let mut state = gate.lock();
            state.blocks = state.blocks.saturating_sub(1);
            state.take_teardown_if_ready()
        };
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl Drop for DestructionBlock {
    fn drop(&mut self) {
        self.unblock();
    }
}

impl fmt::Debug for DestructionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestructionBlock")
            .field("released", &self.gate.is_none())
            .finish()
    }
}
