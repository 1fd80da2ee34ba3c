//! Streamed scene objects built on the load protocol

pub mod cube;
pub mod sprite;

pub use cube::{CubeDesc, CubeMaterial, SceneCube};
pub use sprite::{SceneSprite, SpriteDesc};

use std::sync::Arc;

use crate::core::config::StreamingConfig;
use crate::core::error::ResourceError;
use crate::gpu::{GraphicsDevice, MeshBuilder};
use crate::pool::PoolConfig;
use crate::resources::{
    BlasLibrary, PrimaryHitShaderFactory, ShaderVariant, SpriteMaterialManager, TextureManager, TextureSource,
};
use crate::stream::TaskPool;

/// The resource pools streamed objects check out from. Cheap to clone.
#[derive(Clone)]
pub struct ObjectServices {
    pub textures: TextureManager,
    pub shaders: PrimaryHitShaderFactory,
    pub geometry: BlasLibrary,
    pub sprite_materials: SpriteMaterialManager,
}

impl ObjectServices {
    pub fn new(
        tasks: &TaskPool,
        config: &StreamingConfig,
        source: Arc<dyn TextureSource>,
        device: Arc<dyn GraphicsDevice>,
        builder: Arc<dyn MeshBuilder>,
    ) -> Self {
        let pool = PoolConfig {
            keep_alive: config.pool_keep_alive,
        };
        let variant = ShaderVariant {
            num_textures: config.max_textures,
            num_lights: config.num_lights,
        };
        Self {
            textures: TextureManager::new(tasks.clone(), pool, Arc::clone(&source), Arc::clone(&device)),
            shaders: PrimaryHitShaderFactory::new(tasks.clone(), pool, Arc::clone(&device), variant),
            geometry: BlasLibrary::new(tasks.clone(), pool, builder),
            sprite_materials: SpriteMaterialManager::new(tasks.clone(), pool, source, device),
        }
    }
}

/// Keep a successful checkout, remembering the first failure.
fn keep_loaded<T>(result: Result<T, ResourceError>, first_error: &mut Option<ResourceError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            first_error.get_or_insert(err);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gpu::{GpuObjectId, HeadlessDevice, TextureView};
    use crate::registry::InstanceRegistry;
    use crate::resources::{MemoryTextureSource, TextureData, TextureSetDescription};
    use crate::slots::ActiveSlotTable;
    use crate::stream::{SceneRegistries, StreamingScene};

    pub struct Harness {
        pub device: Arc<HeadlessDevice>,
        pub source: Arc<MemoryTextureSource>,
        pub services: ObjectServices,
        pub scene: StreamingScene,
    }

    impl Harness {
        /// Scene with `slots` texture slots on the current tokio runtime
        pub fn new(slots: u32) -> Self {
            crate::core::logging::init_for_tests();
            let tasks = TaskPool::current().unwrap();
            let device = Arc::new(HeadlessDevice::new());
            let source = Arc::new(MemoryTextureSource::new());
            let config = StreamingConfig::default();
            let services = ObjectServices::new(&tasks, &config, source.clone(), device.clone(), device.clone());
            let registries = SceneRegistries::new(
                ActiveSlotTable::new(slots, TextureView(GpuObjectId(0))),
                InstanceRegistry::new(),
            );
            Self {
                device,
                source,
                services,
                scene: StreamingScene::new(tasks, registries),
            }
        }

        /// Register a colour map for `name` and return its description.
        pub fn texture_set(&self, name: &str) -> TextureSetDescription {
            let desc = TextureSetDescription::new(name);
            self.source.insert(desc.color_map_path(), TextureData::solid(2, 2, [200, 100, 50, 255]));
            desc
        }
    }
}
