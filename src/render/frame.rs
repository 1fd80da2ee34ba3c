//! Per-frame acceleration structure and shader table update

use std::sync::Arc;

use crate::core::error::Result;
use crate::gpu::{BuildMode, GraphicsDevice, TlasRef};
use crate::stream::SceneRegistries;

/// What one frame did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    /// `None` when there was nothing to trace
    pub mode: Option<BuildMode>,
    pub instances: usize,
    pub binders: usize,
    /// Whether the texture array was re-uploaded
    pub rebound: bool,
}

/// Rebuilds or refits the TLAS and rewrites the shader table once per frame.
pub struct FrameRenderer {
    device: Arc<dyn GraphicsDevice>,
    tlas: Option<TlasRef>,
    frame: u64,
}

impl FrameRenderer {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            tlas: None,
            frame: 0,
        }
    }

    /// Prepare everything the ray dispatch of this frame reads.
    ///
    /// Registries must not change while this runs; call it after
    /// [`StreamingScene::update`](crate::stream::StreamingScene::update).
    pub fn render_frame(&mut self, registries: &mut SceneRegistries) -> Result<FrameStats> {
        self.frame += 1;
        let mut stats = FrameStats {
            frame: self.frame,
            ..Default::default()
        };

        // The request stays pending until an upload succeeds
        if registries.slots.rebind_requested() {
            self.device
                .bind_textures(registries.slots.textures(), registries.slots.texture_sets())?;
            registries.slots.take_rebind_request();
            stats.rebound = true;
        }

        let build = registries.instances.prepare_build();
        if build.instances.is_empty() {
            if let Some(old) = self.tlas.take() {
                self.device.release(old.0);
            }
            return Ok(stats);
        }

        let mode = match (build.mode, self.tlas) {
            (BuildMode::Reuse, Some(_)) => BuildMode::Reuse,
            (BuildMode::Refit, Some(_)) => BuildMode::Refit,
            _ => BuildMode::Build,
        };
        let result = match mode {
            BuildMode::Build => self.device.build_tlas(build.instances).map(|tlas| {
                if let Some(old) = self.tlas.replace(tlas) {
                    self.device.release(old.0);
                }
            }),
            BuildMode::Refit => match self.tlas {
                Some(tlas) => self.device.refit_tlas(tlas, build.instances),
                None => Ok(()),
            },
            BuildMode::Reuse => Ok(()),
        };
        stats.instances = build.instances.len();
        if let Err(err) = result {
            registries.instances.invalidate();
            return Err(err.into());
        }

        let Some(tlas) = self.tlas else {
            return Ok(stats);
        };
        stats.mode = Some(mode);

        let mut table = self.device.begin_shader_table(tlas)?;
        stats.binders = registries.instances.bind_shaders(table.as_mut(), tlas);
        table.submit()?;

        log::trace!(
            "Frame {}: {:?} over {} instances, {} binders",
            stats.frame,
            mode,
            stats.instances,
            stats.binders
        );
        Ok(stats)
    }

    /// TLAS of the last frame
    pub fn tlas(&self) -> Option<TlasRef> {
        self.tlas
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl Drop for FrameRenderer {
    fn drop(&mut self) {
        if let Some(tlas) = self.tlas.take() {
            self.device.release(tlas.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::DeviceEvent;
    use crate::gpu::{BlasRef, GeometryDesc, HeadlessDevice, InstanceMatrix, MeshBuilder, ShaderBindingTable, TextureView, GpuObjectId};
    use crate::registry::{InstanceRegistry, TlasInstanceData};
    use crate::slots::ActiveSlotTable;
    use glam::Vec3;

    fn setup() -> (Arc<HeadlessDevice>, FrameRenderer, SceneRegistries) {
        let device = Arc::new(HeadlessDevice::new());
        let renderer = FrameRenderer::new(device.clone());
        let registries = SceneRegistries::new(
            ActiveSlotTable::new(4, TextureView(GpuObjectId(0))),
            InstanceRegistry::new(),
        );
        (device, renderer, registries)
    }

    fn add_instance(device: &HeadlessDevice, registries: &mut SceneRegistries, name: &str) -> BlasRef {
        let mesh = device.build(&GeometryDesc::Cube).unwrap();
        let instance = TlasInstanceData::new(name, InstanceMatrix::IDENTITY).with_blas(mesh.blas);
        registries.instances.add_tlas_build(instance).unwrap();
        let owned = name.to_string();
        registries
            .instances
            .add_shader_table_binder(name, move |sbt: &mut dyn ShaderBindingTable, _: TlasRef| {
                sbt.bind_hit_group_for_instance(&owned, 0, "hit", &[1, 2, 3, 4]);
            })
            .unwrap();
        mesh.blas
    }

    #[test]
    fn test_empty_scene_skips_trace() {
        let (device, mut renderer, mut registries) = setup();
        let stats = renderer.render_frame(&mut registries).unwrap();
        assert_eq!(stats.mode, None);
        assert!(stats.rebound);
        assert_eq!(device.count_events(|e| matches!(e, DeviceEvent::BuildTlas { .. })), 0);
    }

    #[test]
    fn test_build_then_reuse_then_refit() {
        let (device, mut renderer, mut registries) = setup();
        add_instance(&device, &mut registries, "a");

        let first = renderer.render_frame(&mut registries).unwrap();
        assert_eq!(first.mode, Some(BuildMode::Build));
        assert_eq!(first.binders, 1);

        let second = renderer.render_frame(&mut registries).unwrap();
        assert_eq!(second.mode, Some(BuildMode::Reuse));
        assert!(!second.rebound);

        registries
            .instances
            .set_transform("a", InstanceMatrix::from_translation(Vec3::Z))
            .unwrap();
        let third = renderer.render_frame(&mut registries).unwrap();
        assert_eq!(third.mode, Some(BuildMode::Refit));
        assert_eq!(device.count_events(|e| matches!(e, DeviceEvent::RefitTlas { .. })), 1);

        // Binders rewrite their rows every frame
        assert_eq!(device.shader_table().len(), 1);
    }

    #[test]
    fn test_rebuild_releases_previous_tlas() {
        let (device, mut renderer, mut registries) = setup();
        add_instance(&device, &mut registries, "a");
        renderer.render_frame(&mut registries).unwrap();
        let old = renderer.tlas().unwrap();

        add_instance(&device, &mut registries, "b");
        renderer.render_frame(&mut registries).unwrap();
        assert_ne!(renderer.tlas(), Some(old));
        assert!(!device.is_live(old.0));
    }

    #[test]
    fn test_failed_texture_upload_is_retried() {
        let (device, mut renderer, mut registries) = setup();
        device.fail_texture_binds(1);

        assert!(renderer.render_frame(&mut registries).is_err());
        assert!(registries.slots.rebind_requested());
        assert_eq!(device.count_events(|e| matches!(e, DeviceEvent::BindTextures { .. })), 0);

        let stats = renderer.render_frame(&mut registries).unwrap();
        assert!(stats.rebound);
        assert!(!registries.slots.rebind_requested());
        assert_eq!(device.count_events(|e| matches!(e, DeviceEvent::BindTextures { .. })), 1);
    }

    #[test]
    fn test_failed_build_forces_rebuild_next_frame() {
        let (device, mut renderer, mut registries) = setup();
        let blas = add_instance(&device, &mut registries, "a");
        // Releasing the BLAS while its instance is still registered
        GraphicsDevice::release(device.as_ref(), blas.0);

        assert!(renderer.render_frame(&mut registries).is_err());
        assert_eq!(registries.instances.pending_mode(), BuildMode::Build);
    }
}
