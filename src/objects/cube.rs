//! A textured or glass cube streamed into the scene

use futures::future::join_all;

use crate::core::error::{Error, ResourceError, Result};
use crate::core::id::{instance_name, ObjectId};
use crate::gpu::record::{shader_for_description, SpecialMaterial};
use crate::gpu::{BlasInstanceData, GeometryDesc, InstanceMatrix, OPAQUE_GEOM_MASK, TRANSPARENT_GEOM_MASK};
use crate::objects::{keep_loaded, ObjectServices};
use crate::registry::TlasInstanceData;
use crate::resources::{BlasHandle, ShaderHandle, TextureSetDescription, TextureSetHandle};
use crate::slots::{ActiveTextureSource, MAX_TEXTURE_LAYERS};
use crate::stream::{Publication, SceneRegistries, StreamedObject, StreamingScene};

/// Surface of a cube
#[derive(Debug, Clone)]
pub enum CubeMaterial {
    /// One to four texture sets, blended in layer order
    Textured(Vec<TextureSetDescription>),
    /// A glass record, see [`BlasInstanceData::glass`]. Samples no textures.
    Glass(BlasInstanceData),
}

#[derive(Debug, Clone)]
pub struct CubeDesc {
    pub transform: InstanceMatrix,
    pub material: CubeMaterial,
}

impl CubeDesc {
    pub fn textured(transform: InstanceMatrix, texture: TextureSetDescription) -> Self {
        Self {
            transform,
            material: CubeMaterial::Textured(vec![texture]),
        }
    }
}

struct CubeResources {
    textures: Vec<TextureSetHandle>,
    shader: ShaderHandle,
    blas: BlasHandle,
}

impl CubeResources {
    fn return_to(self, services: &ObjectServices) {
        for texture in self.textures {
            services.textures.return_handle(texture);
        }
        services.shaders.return_handle(self.shader);
        services.geometry.return_handle(self.blas);
    }
}

/// Outcome of every checkout a cube makes
pub struct CubeLoad {
    textures: Vec<std::result::Result<TextureSetHandle, ResourceError>>,
    shader: std::result::Result<ShaderHandle, ResourceError>,
    blas: std::result::Result<BlasHandle, ResourceError>,
}

impl CubeLoad {
    /// All resources, or the first failure after returning whatever did load.
    fn into_resources(self, services: &ObjectServices) -> std::result::Result<CubeResources, ResourceError> {
        let mut first_error = None;
        let textures: Vec<_> = self
            .textures
            .into_iter()
            .filter_map(|t| keep_loaded(t, &mut first_error))
            .collect();
        let shader = keep_loaded(self.shader, &mut first_error);
        let blas = keep_loaded(self.blas, &mut first_error);

        match (first_error, shader, blas) {
            (None, Some(shader), Some(blas)) => Ok(CubeResources { textures, shader, blas }),
            (err, shader, blas) => {
                for texture in textures {
                    services.textures.return_handle(texture);
                }
                services.shaders.try_return(shader);
                services.geometry.try_return(blas);
                Err(err.unwrap_or_else(|| ResourceError::new("cube", "incomplete load")))
            }
        }
    }
}

/// A cube mesh instance.
///
/// Its transform can be queried and changed from the moment it is spawned;
/// the TLAS entry follows once its resources are loaded.
pub struct SceneCube {
    instance_name: String,
    transform: InstanceMatrix,
    material: CubeMaterial,
    services: ObjectServices,
    publication: Publication,
    resources: Option<CubeResources>,
    record: Option<BlasInstanceData>,
}

impl SceneCube {
    /// Start streaming a cube into `scene`.
    pub fn spawn(scene: &mut StreamingScene, services: &ObjectServices, desc: CubeDesc) -> Result<ObjectId> {
        if let CubeMaterial::Textured(sets) = &desc.material {
            if sets.is_empty() || sets.len() > MAX_TEXTURE_LAYERS {
                return Err(Error::TooManyTextureLayers(sets.len()));
            }
        }

        let name = instance_name("SceneCube");
        let texture_sets = match &desc.material {
            CubeMaterial::Textured(sets) => sets.clone(),
            CubeMaterial::Glass(_) => Vec::new(),
        };
        let cube = SceneCube {
            publication: Publication::new(name.clone()),
            instance_name: name,
            transform: desc.transform,
            material: desc.material,
            services: services.clone(),
            resources: None,
            record: None,
        };

        let services = services.clone();
        Ok(scene.spawn(cube, move |_gate| {
            let textures: Vec<_> = texture_sets
                .into_iter()
                .map(|desc| services.textures.checkout(desc))
                .collect();
            let shader = services.shaders.checkout();
            let blas = services.geometry.checkout(GeometryDesc::Cube);
            async move {
                let (textures, shader, blas) = futures::join!(join_all(textures), shader, blas);
                CubeLoad { textures, shader, blas }
            }
        }))
    }

    pub fn transform(&self) -> InstanceMatrix {
        self.transform
    }

    /// Move the cube. Only a live cube touches the TLAS build list.
    pub fn set_transform(&mut self, transform: InstanceMatrix, registries: &mut SceneRegistries) -> Result<()> {
        self.transform = transform;
        if self.publication.is_live() {
            registries.instances.set_transform(&self.instance_name, transform)?;
        }
        Ok(())
    }

    /// Shader record written for this cube, once live
    pub fn record(&self) -> Option<BlasInstanceData> {
        self.record
    }

    fn publish_resources(&mut self, resources: &CubeResources, registries: &mut SceneRegistries) -> Result<()> {
        let (mut record, mask) = match &self.material {
            CubeMaterial::Glass(glass) => {
                let mut record = *glass;
                record.raycast_small_offset = registries.slots.raycast_small_offset();
                (record, TRANSPARENT_GEOM_MASK)
            }
            CubeMaterial::Textured(_) => {
                let sources: Vec<&dyn ActiveTextureSource> = resources
                    .textures
                    .iter()
                    .map(|t| &**t as &dyn ActiveTextureSource)
                    .collect();
                let mut record = self.publication.add_active_textures(registries, &sources)?;
                let base = &resources.textures[0];
                let special = if sources.len() > 1 {
                    SpecialMaterial::MultiTexture
                } else {
                    SpecialMaterial::None
                };
                record.dispatch_type = shader_for_description(
                    base.has_normal(),
                    base.has_physical(),
                    base.is_reflective(),
                    base.has_emissive(),
                    special,
                );
                (record, OPAQUE_GEOM_MASK)
            }
        };
        resources.blas.apply_offsets(&mut record);

        let instance = TlasInstanceData::new(self.instance_name.clone(), self.transform)
            .with_blas(resources.blas.blas())
            .with_mask(mask);
        self.publication.add_tlas_build(registries, instance)?;
        let binder = resources.shader.binder(&self.instance_name, record);
        self.publication.add_shader_table_binder(registries, binder)?;
        self.record = Some(record);
        Ok(())
    }
}

impl StreamedObject for SceneCube {
    type Loaded = CubeLoad;

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn publish(&mut self, loaded: CubeLoad, registries: &mut SceneRegistries) -> Result<()> {
        let resources = loaded.into_resources(&self.services)?;
        if let Err(err) = self.publish_resources(&resources, registries) {
            self.publication.withdraw(registries);
            resources.return_to(&self.services);
            return Err(err);
        }
        self.resources = Some(resources);
        Ok(())
    }

    fn abandon(&mut self, loaded: CubeLoad) {
        if let Ok(resources) = loaded.into_resources(&self.services) {
            resources.return_to(&self.services);
        }
    }

    fn unpublish(&mut self, registries: &mut SceneRegistries) {
        self.publication.withdraw(registries);
        self.record = None;
        if let Some(resources) = self.resources.take() {
            resources.return_to(&self.services);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{DeviceEvent, ObjectKind};
    use crate::gpu::record::dispatch;
    use crate::objects::testing::Harness;
    use crate::render::FrameRenderer;
    use crate::stream::LoadState;
    use glam::{Vec2, Vec3};

    fn at(x: f32) -> InstanceMatrix {
        InstanceMatrix::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    #[tokio::test]
    async fn test_cube_goes_live() {
        let mut h = Harness::new(8);
        let rock = h.texture_set("Rock");
        let id = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(1.0), rock)).unwrap();
        assert_eq!(h.scene.state(id), Some(LoadState::Loading));
        assert_eq!(h.scene.object::<SceneCube>(id).unwrap().transform(), at(1.0));

        h.scene.settle().await.unwrap();
        assert_eq!(h.scene.state(id), Some(LoadState::Live));

        let cube = h.scene.object::<SceneCube>(id).unwrap();
        let record = cube.record().unwrap();
        assert_eq!(record.texture_sets(), [0, -1, -1, -1]);
        assert_eq!(record.dispatch_type, dispatch::LIGHT_AND_SHADE_BASE);
        let name = cube.instance_name().to_string();
        assert!(h.scene.registries().instances.contains(&name));
        assert!(h.scene.registries().instances.has_binder(&name));
        assert_eq!(h.scene.registries().slots.len(), 1);

        let mut renderer = FrameRenderer::new(h.device.clone());
        let stats = renderer.render_frame(h.scene.registries_mut()).unwrap();
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.binders, 1);
        // Primary and shadow rows
        assert_eq!(h.device.shader_table().len(), 2);
        assert!(h.device.shader_table().iter().all(|row| row.record == record.as_bytes()));
    }

    #[tokio::test]
    async fn test_destroyed_while_loading_never_publishes() {
        let mut h = Harness::new(8);
        let x = h.texture_set("X");
        let y = h.texture_set("Y");
        let desc = CubeDesc {
            transform: at(0.0),
            material: CubeMaterial::Textured(vec![x.clone(), y.clone()]),
        };
        let id = SceneCube::spawn(&mut h.scene, &h.services, desc).unwrap();

        // Counted at checkout, before any load has run
        assert_eq!(h.services.textures.pool().ref_count(&x), 1);
        assert_eq!(h.services.textures.pool().ref_count(&y), 1);

        assert!(h.scene.request_destruction(id));
        h.scene.settle().await.unwrap();

        assert_eq!(h.scene.state(id), None);
        assert_eq!(h.scene.stats().aborted, 1);
        assert_eq!(h.scene.stats().published, 0);
        assert!(h.scene.registries().instances.is_empty());
        assert!(h.scene.registries().slots.is_empty());
        assert_eq!(h.scene.registries().instances.stats().instances_added, 0);
        assert_eq!(h.services.textures.pool().ref_count(&x), 0);
        assert_eq!(h.services.textures.pool().ref_count(&y), 0);
        assert_eq!(h.device.live_count(ObjectKind::Texture), 0);
        assert_eq!(h.device.live_count(ObjectKind::Blas), 0);
    }

    #[tokio::test]
    async fn test_shared_texture_loads_once() {
        let mut h = Harness::new(8);
        let t = h.texture_set("Shared");
        let a = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), t.clone())).unwrap();
        let b = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(2.0), t.clone())).unwrap();
        assert_eq!(h.services.textures.pool().ref_count(&t), 2);

        h.scene.settle().await.unwrap();
        assert_eq!(h.services.textures.pool().stats().constructions, 1);
        assert_eq!(h.device.live_count(ObjectKind::Texture), 1);
        assert_eq!(h.scene.registries().slots.len(), 1);
        let rec_a = h.scene.object::<SceneCube>(a).unwrap().record().unwrap();
        let rec_b = h.scene.object::<SceneCube>(b).unwrap().record().unwrap();
        assert_eq!(rec_a.tex0, rec_b.tex0);

        h.scene.request_destruction(a);
        h.scene.update().unwrap();
        assert_eq!(h.services.textures.pool().ref_count(&t), 1);
        assert_eq!(h.device.live_count(ObjectKind::Texture), 1);
        assert_eq!(h.scene.registries().slots.len(), 1);

        h.scene.request_destruction(b);
        h.scene.update().unwrap();
        assert_eq!(h.services.textures.pool().ref_count(&t), 0);
        assert!(!h.services.textures.pool().contains(&t));
        assert_eq!(h.device.live_count(ObjectKind::Texture), 0);
    }

    #[tokio::test]
    async fn test_disposal_withdraws_before_releasing() {
        let mut h = Harness::new(8);
        let rock = h.texture_set("Rock");
        let a = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), rock.clone())).unwrap();
        let b = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(3.0), rock)).unwrap();
        h.scene.settle().await.unwrap();

        let mut renderer = FrameRenderer::new(h.device.clone());
        renderer.render_frame(h.scene.registries_mut()).unwrap();
        let blas = h.services.geometry.checkout(GeometryDesc::Cube).await.unwrap();
        let blas_id = blas.blas().0;
        h.services.geometry.return_handle(blas);

        // Requested but not yet disposed: the frame still sees both cubes
        h.scene.request_destruction(a);
        let stats = renderer.render_frame(h.scene.registries_mut()).unwrap();
        assert_eq!(stats.instances, 2);

        h.scene.update().unwrap();
        assert_eq!(h.scene.registries().instances.instance_count(), 1);
        assert_eq!(h.scene.registries().instances.binder_count(), 1);
        assert!(h.device.is_live(blas_id));
        let stats = renderer.render_frame(h.scene.registries_mut()).unwrap();
        assert_eq!(stats.instances, 1);

        h.device.clear_events();
        h.scene.request_destruction(b);
        h.scene.update().unwrap();
        assert!(h.scene.registries().instances.is_empty());
        assert!(h.scene.registries().slots.is_empty());
        assert!(!h.device.is_live(blas_id));
        assert_eq!(
            h.device.count_events(|e| matches!(e, DeviceEvent::Release { kind: ObjectKind::Blas, .. })),
            1
        );

        // No TLAS is built over the released BLAS
        let stats = renderer.render_frame(h.scene.registries_mut()).unwrap();
        assert_eq!(stats.mode, None);
        assert_eq!(h.device.count_events(|e| matches!(e, DeviceEvent::BuildTlas { .. })), 0);
    }

    #[tokio::test]
    async fn test_load_failure_aborts_and_returns_siblings() {
        let mut h = Harness::new(8);
        let good = h.texture_set("Good");
        let missing = TextureSetDescription::new("Missing");
        let desc = CubeDesc {
            transform: at(0.0),
            material: CubeMaterial::Textured(vec![good.clone(), missing.clone()]),
        };
        let id = SceneCube::spawn(&mut h.scene, &h.services, desc).unwrap();
        h.scene.settle().await.unwrap();

        assert_eq!(h.scene.state(id), Some(LoadState::Aborted));
        assert!(h.scene.registries().instances.is_empty());
        assert!(h.scene.registries().slots.is_empty());
        assert_eq!(h.services.textures.pool().ref_count(&good), 0);
        assert!(!h.services.textures.pool().contains(&missing));
        assert_eq!(h.services.shaders.pool().len(), 0);
        assert_eq!(h.device.live_count(ObjectKind::Texture), 0);

        // Disposing an aborted object has nothing to withdraw
        h.scene.request_destruction(id);
        h.scene.update().unwrap();
        assert!(h.scene.is_empty());
    }

    #[tokio::test]
    async fn test_slot_exhaustion_is_fatal() {
        let mut h = Harness::new(1);
        let first = h.texture_set("First");
        let second = h.texture_set("Second");
        SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), first)).unwrap();
        h.scene.settle().await.unwrap();
        SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(1.0), second.clone())).unwrap();

        let err = h.scene.settle().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::SlotCapacityExceeded { capacity: 1, .. }));
        assert_eq!(h.scene.registries().instances.instance_count(), 1);
        assert_eq!(h.services.textures.pool().ref_count(&second), 0);
    }

    #[tokio::test]
    async fn test_freed_slot_is_reused() {
        let mut h = Harness::new(1);
        let first = h.texture_set("First");
        let second = h.texture_set("Second");

        let a = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), first)).unwrap();
        h.scene.settle().await.unwrap();
        let old_name = h.scene.object::<SceneCube>(a).unwrap().instance_name().to_string();
        h.scene.request_destruction(a);
        h.scene.update().unwrap();
        assert!(!h.scene.registries().instances.has_binder(&old_name));

        let b = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), second)).unwrap();
        h.scene.settle().await.unwrap();
        let record = h.scene.object::<SceneCube>(b).unwrap().record().unwrap();
        assert_eq!(record.tex0, 0);

        let mut renderer = FrameRenderer::new(h.device.clone());
        renderer.render_frame(h.scene.registries_mut()).unwrap();
        assert!(h
            .device
            .shader_table()
            .iter()
            .all(|row| row.instance_name.as_deref() != Some(old_name.as_str())));
    }

    #[tokio::test]
    async fn test_transform_before_and_after_load() {
        let mut h = Harness::new(4);
        let rock = h.texture_set("Rock");
        let id = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc::textured(at(0.0), rock)).unwrap();

        h.scene
            .with_object::<SceneCube, _>(id, |cube, regs| cube.set_transform(at(5.0), regs))
            .unwrap()
            .unwrap();
        h.scene.settle().await.unwrap();
        let name = h.scene.object::<SceneCube>(id).unwrap().instance_name().to_string();
        assert_eq!(h.scene.registries().instances.get(&name).unwrap().transform, at(5.0));

        h.scene.registries_mut().instances.prepare_build();
        h.scene
            .with_object::<SceneCube, _>(id, |cube, regs| cube.set_transform(at(6.0), regs))
            .unwrap()
            .unwrap();
        assert_eq!(
            h.scene.registries().instances.pending_mode(),
            crate::gpu::BuildMode::Refit
        );
    }

    #[tokio::test]
    async fn test_glass_cube_takes_no_slots() {
        let mut h = Harness::new(4);
        let glass = BlasInstanceData::glass(Vec3::ONE, 4.0, Vec2::new(1.5, 1.0 / 1.5), 0xFFFFFF);
        let id = SceneCube::spawn(
            &mut h.scene,
            &h.services,
            CubeDesc {
                transform: at(0.0),
                material: CubeMaterial::Glass(glass),
            },
        )
        .unwrap();
        h.scene.settle().await.unwrap();

        let cube = h.scene.object::<SceneCube>(id).unwrap();
        assert_eq!(cube.record().unwrap().dispatch_type, dispatch::GLASS);
        let name = cube.instance_name().to_string();
        assert!(h.scene.registries().slots.is_empty());
        assert_eq!(h.scene.registries().instances.get(&name).unwrap().mask, TRANSPARENT_GEOM_MASK);
    }

    #[tokio::test]
    async fn test_multi_texture_cube() {
        let mut h = Harness::new(8);
        let layers = vec![h.texture_set("A"), h.texture_set("B"), h.texture_set("C")];
        let id = SceneCube::spawn(
            &mut h.scene,
            &h.services,
            CubeDesc {
                transform: at(0.0),
                material: CubeMaterial::Textured(layers),
            },
        )
        .unwrap();
        h.scene.settle().await.unwrap();

        let record = h.scene.object::<SceneCube>(id).unwrap().record().unwrap();
        assert_eq!(record.dispatch_type & dispatch::MULTI_TEXTURE_MESH_DATA, dispatch::MULTI_TEXTURE_MESH_DATA);
        assert!(record.texture_sets()[..3].iter().all(|&i| i >= 0));
        assert_eq!(record.tex3, -1);

        let too_many = CubeMaterial::Textured(vec![TextureSetDescription::new("x"); 5]);
        let err = SceneCube::spawn(&mut h.scene, &h.services, CubeDesc { transform: at(0.0), material: too_many });
        assert!(matches!(err, Err(Error::TooManyTextureLayers(5))));
    }
}
