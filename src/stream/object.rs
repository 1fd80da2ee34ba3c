//! Streamed object protocol
//!
//! Every object streamed into the scene follows the same lifecycle:
//!
//! 1. Constructing: placement data is set up synchronously, a destruction
//!    block is taken and the background load is started.
//! 2. Loading: all resources are checked out concurrently and awaited.
//! 3. On completion, back on the update thread, an object whose destruction
//!    was requested meanwhile gives everything back and is never published.
//! 4. Live: otherwise it binds its textures, adds its TLAS instance and its
//!    shader table binder, and releases its destruction block.
//! 5. Disposing: binder, TLAS instance and active slots are withdrawn, then
//!    pooled resources are returned.

use crate::core::error::Result;
use crate::core::id::ResourceId;
use crate::gpu::BlasInstanceData;
use crate::registry::{ShaderTableBinder, TlasInstanceData};
use crate::slots::ActiveTextureSource;
use crate::stream::SceneRegistries;

/// Lifecycle state of a streamed object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Constructing,
    Loading,
    Live,
    /// The load failed or the object was destroyed while loading
    Aborted,
    Disposing,
    Disposed,
}

/// A scene object whose resources load in the background.
///
/// The scene calls these methods on the update thread only.
pub trait StreamedObject: Send + 'static {
    /// Everything the background load produced, successful or not
    type Loaded: Send + 'static;

    fn instance_name(&self) -> &str;

    /// Publish into the registries.
    ///
    /// On error the object must already have withdrawn whatever it published
    /// and returned every resource in `loaded`.
    fn publish(&mut self, loaded: Self::Loaded, registries: &mut SceneRegistries) -> Result<()>;

    /// Return every resource in `loaded` without publishing anything.
    fn abandon(&mut self, loaded: Self::Loaded);

    /// Withdraw from the registries and return pooled resources.
    fn unpublish(&mut self, registries: &mut SceneRegistries);
}

/// What one object has published, so it can be withdrawn in reverse order.
#[derive(Debug)]
pub struct Publication {
    instance_name: String,
    active_textures: Vec<ResourceId>,
    tlas: bool,
    binder: bool,
}

impl Publication {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            active_textures: Vec::new(),
            tlas: false,
            binder: false,
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn add_active_texture(
        &mut self,
        registries: &mut SceneRegistries,
        source: &dyn ActiveTextureSource,
    ) -> Result<BlasInstanceData> {
        let record = registries.slots.add_active_texture(source)?;
        self.active_textures.push(source.resource_id());
        Ok(record)
    }

    pub fn add_active_textures(
        &mut self,
        registries: &mut SceneRegistries,
        sources: &[&dyn ActiveTextureSource],
    ) -> Result<BlasInstanceData> {
        let record = registries.slots.add_active_textures(sources)?;
        self.active_textures.extend(sources.iter().map(|s| s.resource_id()));
        Ok(record)
    }

    pub fn add_tlas_build(&mut self, registries: &mut SceneRegistries, instance: TlasInstanceData) -> Result<()> {
        debug_assert_eq!(instance.instance_name, self.instance_name);
        registries.instances.add_tlas_build(instance)?;
        self.tlas = true;
        Ok(())
    }

    pub fn add_shader_table_binder(
        &mut self,
        registries: &mut SceneRegistries,
        binder: impl ShaderTableBinder + 'static,
    ) -> Result<()> {
        registries
            .instances
            .add_shader_table_binder(self.instance_name.clone(), binder)?;
        self.binder = true;
        Ok(())
    }

    /// Whether the TLAS instance is registered
    pub fn is_live(&self) -> bool {
        self.tlas
    }

    /// Whether nothing is published
    pub fn is_empty(&self) -> bool {
        !self.tlas && !self.binder && self.active_textures.is_empty()
    }

    /// Withdraw binder, then TLAS instance, then active slots.
    ///
    /// Pooled resources may be returned once this has run.
    pub fn withdraw(&mut self, registries: &mut SceneRegistries) {
        self.withdraw_with(registries, |_, _| {});
    }

    /// Like [`withdraw`](Self::withdraw), calling `after_step` once each step
    /// that had something to withdraw is done.
    pub fn withdraw_with(
        &mut self,
        registries: &mut SceneRegistries,
        mut after_step: impl FnMut(WithdrawStep, &SceneRegistries),
    ) {
        if std::mem::take(&mut self.binder) {
            if let Err(err) = registries.instances.remove_shader_table_binder(&self.instance_name) {
                log::error!("Withdrawing '{}': {}", self.instance_name, err);
            }
            after_step(WithdrawStep::Binder, registries);
        }
        if std::mem::take(&mut self.tlas) {
            if let Err(err) = registries.instances.remove_tlas_build(&self.instance_name) {
                log::error!("Withdrawing '{}': {}", self.instance_name, err);
            }
            after_step(WithdrawStep::TlasInstance, registries);
        }
        if !self.active_textures.is_empty() {
            while let Some(id) = self.active_textures.pop() {
                registries.slots.remove_active_texture(id);
            }
            after_step(WithdrawStep::ActiveSlots, registries);
        }
    }
}

/// One step of [`Publication::withdraw_with`], in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawStep {
    Binder,
    TlasInstance,
    ActiveSlots,
}
