//! An animated sprite plane streamed into the scene

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::error::{ResourceError, Result};
use crate::core::id::{instance_name, ObjectId};
use crate::gpu::record::{shader_for_description, SpecialMaterial};
use crate::gpu::{BlasInstanceData, GeometryDesc, InstanceMatrix, ShaderBindingTable, TlasRef};
use crate::objects::{keep_loaded, ObjectServices};
use crate::registry::{instance_flags, HitGroupBinder, ShaderTableBinder, TlasInstanceData};
use crate::resources::{BlasHandle, ShaderHandle, Sprite, SpriteMaterialDescription, SpriteMaterialHandle};
use crate::stream::{Publication, SceneRegistries, StreamedObject, StreamingScene};

#[derive(Debug, Clone)]
pub struct SpriteDesc {
    pub transform: InstanceMatrix,
    pub material: SpriteMaterialDescription,
    pub sprite: Sprite,
}

struct SpriteResources {
    material: SpriteMaterialHandle,
    shader: ShaderHandle,
    blas: BlasHandle,
}

impl SpriteResources {
    fn return_to(self, services: &ObjectServices) {
        services.sprite_materials.return_handle(self.material);
        services.shaders.return_handle(self.shader);
        services.geometry.return_handle(self.blas);
    }
}

pub struct SpriteLoad {
    material: std::result::Result<SpriteMaterialHandle, ResourceError>,
    shader: std::result::Result<ShaderHandle, ResourceError>,
    blas: std::result::Result<BlasHandle, ResourceError>,
}

impl SpriteLoad {
    fn into_resources(self, services: &ObjectServices) -> std::result::Result<SpriteResources, ResourceError> {
        let mut first_error = None;
        let material = keep_loaded(self.material, &mut first_error);
        let shader = keep_loaded(self.shader, &mut first_error);
        let blas = keep_loaded(self.blas, &mut first_error);
        match (material, shader, blas) {
            (Some(material), Some(shader), Some(blas)) => Ok(SpriteResources { material, shader, blas }),
            (material, shader, blas) => {
                services.sprite_materials.try_return(material);
                services.shaders.try_return(shader);
                services.geometry.try_return(blas);
                Err(first_error.unwrap_or_else(|| ResourceError::new("sprite", "incomplete load")))
            }
        }
    }
}

/// Writes the current animation frame's UVs before binding the record
struct SpriteBinder {
    hit_groups: HitGroupBinder,
    sprite: Arc<Mutex<Sprite>>,
}

impl ShaderTableBinder for SpriteBinder {
    fn bind(&mut self, sbt: &mut dyn ShaderBindingTable, tlas: TlasRef) {
        let frame = self.sprite.lock().current_frame();
        self.hit_groups
            .record
            .set_sprite_uvs(frame.left, frame.top, frame.right, frame.bottom);
        self.hit_groups.bind(sbt, tlas);
    }
}

/// A sprite on a shared plane BLAS
pub struct SceneSprite {
    instance_name: String,
    transform: InstanceMatrix,
    sprite: Arc<Mutex<Sprite>>,
    services: ObjectServices,
    publication: Publication,
    resources: Option<SpriteResources>,
}

impl SceneSprite {
    pub fn spawn(scene: &mut StreamingScene, services: &ObjectServices, desc: SpriteDesc) -> ObjectId {
        let name = instance_name("SceneSprite");
        let sprite = SceneSprite {
            publication: Publication::new(name.clone()),
            instance_name: name,
            transform: desc.transform,
            sprite: Arc::new(Mutex::new(desc.sprite)),
            services: services.clone(),
            resources: None,
        };

        let services = services.clone();
        let material = desc.material;
        scene.spawn(sprite, move |_gate| {
            let material = services.sprite_materials.checkout(material);
            let shader = services.shaders.checkout();
            let blas = services.geometry.checkout(GeometryDesc::SpritePlane);
            async move {
                let (material, shader, blas) = futures::join!(material, shader, blas);
                SpriteLoad { material, shader, blas }
            }
        })
    }

    /// Advance the animation. Returns true if the visible frame changed.
    pub fn update(&self, dt: Duration) -> bool {
        self.sprite.lock().update(dt)
    }

    pub fn set_animation(&self, name: &str) {
        self.sprite.lock().set_animation(name);
    }

    pub fn animation_name(&self) -> String {
        self.sprite.lock().animation_name().to_string()
    }

    pub fn transform(&self) -> InstanceMatrix {
        self.transform
    }

    pub fn set_transform(&mut self, transform: InstanceMatrix, registries: &mut SceneRegistries) -> Result<()> {
        self.transform = transform;
        if self.publication.is_live() {
            registries.instances.set_transform(&self.instance_name, transform)?;
        }
        Ok(())
    }

    fn publish_resources(&mut self, resources: &SpriteResources, registries: &mut SceneRegistries) -> Result<()> {
        let material = &*resources.material;
        let mut record: BlasInstanceData = self.publication.add_active_texture(registries, material)?;
        record.dispatch_type = shader_for_description(
            material.has_normal(),
            material.has_physical(),
            material.is_reflective(),
            false,
            SpecialMaterial::Sprite,
        );
        resources.blas.apply_offsets(&mut record);

        let instance = TlasInstanceData::new(self.instance_name.clone(), self.transform)
            .with_blas(resources.blas.blas())
            .with_flags(instance_flags::TRIANGLE_FACING_CULL_DISABLE);
        self.publication.add_tlas_build(registries, instance)?;
        let binder = SpriteBinder {
            hit_groups: resources.shader.binder(&self.instance_name, record),
            sprite: Arc::clone(&self.sprite),
        };
        self.publication.add_shader_table_binder(registries, binder)?;
        Ok(())
    }
}

impl StreamedObject for SceneSprite {
    type Loaded = SpriteLoad;

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn publish(&mut self, loaded: SpriteLoad, registries: &mut SceneRegistries) -> Result<()> {
        let resources = loaded.into_resources(&self.services)?;
        if let Err(err) = self.publish_resources(&resources, registries) {
            self.publication.withdraw(registries);
            resources.return_to(&self.services);
            return Err(err);
        }
        self.resources = Some(resources);
        Ok(())
    }

    fn abandon(&mut self, loaded: SpriteLoad) {
        if let Ok(resources) = loaded.into_resources(&self.services) {
            resources.return_to(&self.services);
        }
    }

    fn unpublish(&mut self, registries: &mut SceneRegistries) {
        self.publication.withdraw(registries);
        if let Some(resources) = self.resources.take() {
            resources.return_to(&self.services);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::ObjectKind;
    use crate::gpu::record::dispatch;
    use crate::gpu::{PRIMARY_RAY_INDEX, SHADOW_RAY_INDEX};
    use crate::objects::testing::Harness;
    use crate::render::FrameRenderer;
    use crate::resources::{SpriteAnimation, SpriteFrame, TextureData};
    use crate::stream::LoadState;

    fn dino(h: &Harness) -> SpriteDesc {
        h.source.insert("sprites/dino.png", TextureData::solid(32, 16, [10, 200, 10, 255]));
        let frames = vec![
            SpriteFrame::from_pixels(0, 0, 16, 16, 32, 16),
            SpriteFrame::from_pixels(16, 0, 32, 16, 32, 16),
        ];
        SpriteDesc {
            transform: InstanceMatrix::IDENTITY,
            material: SpriteMaterialDescription::new("sprites/dino.png"),
            sprite: Sprite::new(vec![(
                "run".to_string(),
                SpriteAnimation::new(Duration::from_millis(100), frames),
            )]),
        }
    }

    fn record_of(h: &Harness) -> BlasInstanceData {
        let row = h
            .device
            .shader_table()
            .into_iter()
            .find(|row| row.ray_index == PRIMARY_RAY_INDEX)
            .unwrap();
        bytemuck::pod_read_unaligned(&row.record)
    }

    #[tokio::test]
    async fn test_sprite_binder_follows_animation() {
        let mut h = Harness::new(4);
        let desc = dino(&h);
        let id = SceneSprite::spawn(&mut h.scene, &h.services, desc);
        h.scene.settle().await.unwrap();
        assert_eq!(h.scene.state(id), Some(LoadState::Live));

        let mut renderer = FrameRenderer::new(h.device.clone());
        renderer.render_frame(h.scene.registries_mut()).unwrap();
        let record = record_of(&h);
        assert_eq!((record.u1, record.u2), (0.0, 0.5));
        assert_eq!(record.dispatch_type, dispatch::LIGHT_AND_SHADE_BASE | dispatch::SPRITE_DATA);
        assert_eq!(record.tex0, 0);
        assert_eq!(h.device.shader_table().iter().filter(|r| r.ray_index == SHADOW_RAY_INDEX).count(), 1);

        let changed = h
            .scene
            .object::<SceneSprite>(id)
            .unwrap()
            .update(Duration::from_millis(120));
        assert!(changed);
        renderer.render_frame(h.scene.registries_mut()).unwrap();
        let record = record_of(&h);
        assert_eq!((record.u1, record.u2), (0.5, 1.0));
    }

    #[tokio::test]
    async fn test_sprite_destroyed_while_loading() {
        let mut h = Harness::new(4);
        let desc = dino(&h);
        let material = desc.material.clone();
        let id = SceneSprite::spawn(&mut h.scene, &h.services, desc);
        assert_eq!(h.services.sprite_materials.pool().ref_count(&material), 1);

        h.scene.request_destruction(id);
        h.scene.settle().await.unwrap();
        assert!(h.scene.is_empty());
        assert!(h.scene.registries().instances.is_empty());
        assert_eq!(h.services.sprite_materials.pool().ref_count(&material), 0);
        assert_eq!(h.device.live_count(ObjectKind::Texture), 0);
    }

    #[tokio::test]
    async fn test_sprite_and_cube_share_shader() {
        use crate::objects::{CubeDesc, SceneCube};

        let mut h = Harness::new(4);
        let desc = dino(&h);
        let rock = h.texture_set("Rock");
        let sprite = SceneSprite::spawn(&mut h.scene, &h.services, desc);
        let cube = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(InstanceMatrix::IDENTITY, rock)).unwrap();
        h.scene.settle().await.unwrap();

        assert_eq!(h.services.shaders.pool().stats().constructions, 1);
        assert_eq!(h.device.live_count(ObjectKind::Shader), 3);
        assert_eq!(h.device.live_count(ObjectKind::Blas), 2);

        h.scene.request_destruction(sprite);
        h.scene.request_destruction(cube);
        h.scene.update().unwrap();
        assert_eq!(h.device.live_count(ObjectKind::Shader), 0);
        assert_eq!(h.device.live_count(ObjectKind::Blas), 0);
        assert_eq!(h.scene.stats().disposed, 2);
    }
}
