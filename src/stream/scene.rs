//! Streaming scene: runs the object lifecycle on the update thread
//!
//! Background loads never touch the registries. A finished load is sent back
//! over a channel together with the object's destruction block, and
//! [`StreamingScene::update`] publishes or abandons it. Gate teardowns are
//! queued the same way and disposed in `update`, so publication and
//! withdrawal only ever happen between frames.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::core::config::StreamingConfig;
use crate::core::error::{Error, Result};
use crate::core::id::ObjectId;
use crate::gpu::{GraphicsDevice, TextureDesc, TextureFormat};
use crate::registry::InstanceRegistry;
use crate::slots::ActiveSlotTable;
use crate::stream::gate::{DestructionBlock, DestructionGate};
use crate::stream::object::{LoadState, StreamedObject};
use crate::stream::TaskPool;

/// Registries the renderer reads each frame. Owned by the update thread.
pub struct SceneRegistries {
    pub slots: ActiveSlotTable,
    pub instances: InstanceRegistry,
}

impl SceneRegistries {
    pub fn new(slots: ActiveSlotTable, instances: InstanceRegistry) -> Self {
        Self { slots, instances }
    }

    /// Registries sized by `config`, with a 1x1 white placeholder in every
    /// unused texture slot.
    pub fn from_config(config: &StreamingConfig, device: &dyn GraphicsDevice) -> Result<Self> {
        let placeholder = device.create_texture(&TextureDesc {
            name: "placeholder",
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            pixels: &[0xFF; 4],
        })?;
        let mut slots = ActiveSlotTable::new(config.max_textures, placeholder);
        slots.set_raycast_small_offset(config.raycast_small_offset);
        Ok(Self::new(slots, InstanceRegistry::new()))
    }
}

/// Lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub spawned: u64,
    pub published: u64,
    pub aborted: u64,
    pub disposed: u64,
}

type LoadPayload = std::result::Result<Box<dyn Any + Send>, String>;

struct LoadCompletion {
    id: ObjectId,
    loaded: LoadPayload,
    /// Held until the completion has been handled
    block: DestructionBlock,
}

/// Object-safe view of a [`StreamedObject`]
trait ErasedObject: Send {
    fn erased_name(&self) -> &str;
    fn erased_publish(&mut self, id: ObjectId, loaded: Box<dyn Any + Send>, registries: &mut SceneRegistries) -> Result<()>;
    fn erased_abandon(&mut self, id: ObjectId, loaded: Box<dyn Any + Send>);
    fn erased_unpublish(&mut self, registries: &mut SceneRegistries);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: StreamedObject> ErasedObject for T {
    fn erased_name(&self) -> &str {
        self.instance_name()
    }

    fn erased_publish(&mut self, id: ObjectId, loaded: Box<dyn Any + Send>, registries: &mut SceneRegistries) -> Result<()> {
        let loaded = loaded.downcast::<T::Loaded>().map_err(|_| Error::PayloadMismatch(id))?;
        self.publish(*loaded, registries)
    }

    fn erased_abandon(&mut self, id: ObjectId, loaded: Box<dyn Any + Send>) {
        match loaded.downcast::<T::Loaded>() {
            Ok(loaded) => self.abandon(*loaded),
            Err(_) => log::error!("{}", Error::PayloadMismatch(id)),
        }
    }

    fn erased_unpublish(&mut self, registries: &mut SceneRegistries) {
        self.unpublish(registries);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ObjectEntry {
    object: Box<dyn ErasedObject>,
    gate: DestructionGate,
    state: LoadState,
}

/// Owns the scene registries and every streamed object.
pub struct StreamingScene {
    registries: SceneRegistries,
    objects: HashMap<ObjectId, ObjectEntry>,
    tasks: TaskPool,
    completion_tx: mpsc::UnboundedSender<LoadCompletion>,
    completion_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    disposal_tx: mpsc::UnboundedSender<ObjectId>,
    disposal_rx: mpsc::UnboundedReceiver<ObjectId>,
    stats: SceneStats,
}

impl StreamingScene {
    pub fn new(tasks: TaskPool, registries: SceneRegistries) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (disposal_tx, disposal_rx) = mpsc::unbounded_channel();
        Self {
            registries,
            objects: HashMap::new(),
            tasks,
            completion_tx,
            completion_rx,
            disposal_tx,
            disposal_rx,
            stats: SceneStats::default(),
        }
    }

    /// Add an object and start loading it.
    ///
    /// `load` receives the object's gate and returns the background load. It
    /// is called right away, so checkouts made while building the future are
    /// counted before this returns.
    pub fn spawn<T, F, Fut>(&mut self, object: T, load: F) -> ObjectId
    where
        T: StreamedObject,
        F: FnOnce(DestructionGate) -> Fut,
        Fut: Future<Output = T::Loaded> + Send + 'static,
    {
        let id = ObjectId::next();
        let name = object.instance_name().to_string();

        let disposals = self.disposal_tx.clone();
        let gate = DestructionGate::new(move || {
            // The scene may already be gone during shutdown
            let _ = disposals.send(id);
        });
        self.objects.insert(
            id,
            ObjectEntry {
                object: Box::new(object),
                gate: gate.clone(),
                state: LoadState::Constructing,
            },
        );

        let block = gate.block_destruction();
        let load = load(gate);
        let completions = self.completion_tx.clone();
        self.tasks.spawn(async move {
            let loaded = AssertUnwindSafe(load)
                .catch_unwind()
                .await
                .map(|loaded| Box::new(loaded) as Box<dyn Any + Send>)
                .map_err(|panic| panic_message(panic.as_ref()));
            if completions.send(LoadCompletion { id, loaded, block }).is_err() {
                log::debug!("{} finished loading after its scene was dropped", name);
            }
        });

        if let Some(entry) = self.objects.get_mut(&id) {
            entry.state = LoadState::Loading;
        }
        self.stats.spawned += 1;
        log::debug!("Spawned {} ({})", self.objects[&id].object.erased_name(), id);
        id
    }

    /// Ask for an object's teardown. Returns false for unknown ids.
    ///
    /// Disposal itself happens in the next [`update`](Self::update).
    pub fn request_destruction(&self, id: ObjectId) -> bool {
        match self.objects.get(&id) {
            Some(entry) => {
                entry.gate.request_destruction();
                true
            }
            None => false,
        }
    }

    /// Publish finished loads and dispose destroyed objects.
    ///
    /// Call once per frame before rendering. Fatal errors are returned
    /// immediately; load failures only abort the object concerned.
    pub fn update(&mut self) -> Result<()> {
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.handle_completion(completion)?;
        }
        self.process_disposals();
        Ok(())
    }

    /// Wait until no object is loading, running [`update`](Self::update) as
    /// loads finish.
    pub async fn settle(&mut self) -> Result<()> {
        loop {
            self.update()?;
            if !self.has_pending_loads() {
                return Ok(());
            }
            match self.completion_rx.recv().await {
                Some(completion) => self.handle_completion(completion)?,
                None => return Ok(()),
            }
        }
    }

    /// Request destruction of every object and dispose those that can go now.
    pub fn shutdown(&mut self) {
        for entry in self.objects.values() {
            entry.gate.request_destruction();
        }
        self.process_disposals();
        if !self.objects.is_empty() {
            log::info!("{} objects still loading at shutdown", self.objects.len());
        }
    }

    fn handle_completion(&mut self, completion: LoadCompletion) -> Result<()> {
        let LoadCompletion { id, loaded, block } = completion;
        let result = self.finish_load(id, loaded);
        // May fire the gate and queue a disposal
        drop(block);
        result
    }

    fn finish_load(&mut self, id: ObjectId, loaded: LoadPayload) -> Result<()> {
        let Some(entry) = self.objects.get_mut(&id) else {
            log::warn!("Load finished for unknown {}", id);
            return Ok(());
        };

        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(panic) => {
                log::error!("Load of '{}' panicked: {}", entry.object.erased_name(), panic);
                entry.state = LoadState::Aborted;
                self.stats.aborted += 1;
                return Ok(());
            }
        };

        if entry.gate.destruction_requested() {
            log::info!("'{}' was destroyed while loading, returning its resources", entry.object.erased_name());
            entry.object.erased_abandon(id, loaded);
            entry.state = LoadState::Aborted;
            self.stats.aborted += 1;
            return Ok(());
        }

        match entry.object.erased_publish(id, loaded, &mut self.registries) {
            Ok(()) => {
                entry.state = LoadState::Live;
                self.stats.published += 1;
                log::info!("'{}' is live", entry.object.erased_name());
                Ok(())
            }
            Err(err) => {
                entry.state = LoadState::Aborted;
                self.stats.aborted += 1;
                if err.is_fatal() {
                    log::error!("Publishing '{}' failed: {}", entry.object.erased_name(), err);
                    Err(err)
                } else {
                    log::warn!("Could not load '{}': {}", entry.object.erased_name(), err);
                    Ok(())
                }
            }
        }
    }

    fn process_disposals(&mut self) {
        while let Ok(id) = self.disposal_rx.try_recv() {
            let Some(mut entry) = self.objects.remove(&id) else {
                continue;
            };
            let was_live = entry.state == LoadState::Live;
            entry.state = LoadState::Disposing;
            if was_live {
                entry.object.erased_unpublish(&mut self.registries);
            }
            entry.state = LoadState::Disposed;
            self.stats.disposed += 1;
            log::info!("'{}' disposed", entry.object.erased_name());
        }
    }

    /// State of an object; `None` once it has been disposed
    pub fn state(&self, id: ObjectId) -> Option<LoadState> {
        self.objects.get(&id).map(|e| e.state)
    }

    pub fn gate(&self, id: ObjectId) -> Option<&DestructionGate> {
        self.objects.get(&id).map(|e| &e.gate)
    }

    pub fn object<T: StreamedObject>(&self, id: ObjectId) -> Option<&T> {
        self.objects.get(&id)?.object.as_any().downcast_ref()
    }

    /// Run `f` with mutable access to an object and the registries.
    pub fn with_object<T, R>(&mut self, id: ObjectId, f: impl FnOnce(&mut T, &mut SceneRegistries) -> R) -> Option<R>
    where
        T: StreamedObject,
    {
        let object = self.objects.get_mut(&id)?.object.as_any_mut().downcast_mut::<T>()?;
        Some(f(object, &mut self.registries))
    }

    pub fn has_pending_loads(&self) -> bool {
        self.objects
            .values()
            .any(|e| matches!(e.state, LoadState::Constructing | LoadState::Loading))
    }

    pub fn registries(&self) -> &SceneRegistries {
        &self.registries
    }

    pub fn registries_mut(&mut self) -> &mut SceneRegistries {
        &mut self.registries
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// Number of objects not yet disposed
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
