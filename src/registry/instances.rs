//! TLAS build list and shader table binders
//!
//! Live objects publish one [`TlasInstanceData`] and one binder under their
//! unique instance name. The renderer reads both once per frame.

use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::gpu::{BlasRef, BuildMode, InstanceMatrix, ShaderBindingTable, TlasRef, OPAQUE_GEOM_MASK};
use crate::registry::ShaderTableBinder;

/// TLAS instance flags
pub mod instance_flags {
    pub const NONE: u8 = 0;
    pub const TRIANGLE_FACING_CULL_DISABLE: u8 = 0x01;
    pub const TRIANGLE_FRONT_COUNTERCLOCKWISE: u8 = 0x02;
    pub const FORCE_OPAQUE: u8 = 0x04;
    pub const FORCE_NO_OPAQUE: u8 = 0x08;
}

/// One instance of the top level acceleration structure
#[derive(Debug, Clone, PartialEq)]
pub struct TlasInstanceData {
    /// Unique name; also identifies the instance's shader table rows
    pub instance_name: String,
    pub blas: Option<BlasRef>,
    pub transform: InstanceMatrix,
    pub custom_id: u32,
    pub flags: u8,
    pub mask: u8,
    /// `None` lets the device assign the hit group offset
    pub contribution_to_hit_group_index: Option<u32>,
}

impl TlasInstanceData {
    /// Opaque instance with no BLAS yet
    pub fn new(instance_name: impl Into<String>, transform: InstanceMatrix) -> Self {
        Self {
            instance_name: instance_name.into(),
            blas: None,
            transform,
            custom_id: 0,
            flags: instance_flags::NONE,
            mask: OPAQUE_GEOM_MASK,
            contribution_to_hit_group_index: None,
        }
    }

    pub fn with_blas(mut self, blas: BlasRef) -> Self {
        self.blas = Some(blas);
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }
}

/// What the renderer must do with the TLAS this frame
#[derive(Debug)]
pub struct TlasBuild<'a> {
    pub mode: BuildMode,
    pub instances: &'a [TlasInstanceData],
}

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub instances_added: u64,
    pub instances_removed: u64,
    pub transform_updates: u64,
    pub binders_added: u64,
    pub binders_removed: u64,
}

/// Scene-wide TLAS build list and shader table binder list.
///
/// Names must be unique in each list. Registering a name twice, or removing
/// one that was never added, means an object's lifecycle is broken and is
/// reported as an error.
pub struct InstanceRegistry {
    instances: Vec<TlasInstanceData>,
    instance_index: HashMap<String, usize>,
    binders: Vec<(String, Box<dyn ShaderTableBinder>)>,
    binder_index: HashMap<String, usize>,
    pending: BuildMode,
    stats: RegistryStats,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            instance_index: HashMap::new(),
            binders: Vec::new(),
            binder_index: HashMap::new(),
            pending: BuildMode::Reuse,
            stats: RegistryStats::default(),
        }
    }

    /// Add an instance to the TLAS build list. Forces a full build.
    pub fn add_tlas_build(&mut self, instance: TlasInstanceData) -> Result<()> {
        if instance.blas.is_none() {
            log::error!("add_tlas_build: '{}' has no BLAS", instance.instance_name);
            return Err(Error::MissingBlas(instance.instance_name));
        }
        if self.instance_index.contains_key(&instance.instance_name) {
            log::error!("add_tlas_build: '{}' is already registered", instance.instance_name);
            return Err(Error::DuplicateInstance(instance.instance_name));
        }

        self.instance_index.insert(instance.instance_name.clone(), self.instances.len());
        self.instances.push(instance);
        self.pending = BuildMode::Build;
        self.stats.instances_added += 1;
        Ok(())
    }

    /// Remove an instance from the TLAS build list. Forces a full build.
    pub fn remove_tlas_build(&mut self, instance_name: &str) -> Result<TlasInstanceData> {
        let Some(index) = self.instance_index.remove(instance_name) else {
            log::error!("remove_tlas_build: '{}' was never added", instance_name);
            return Err(Error::UnknownInstance(instance_name.to_string()));
        };

        let removed = self.instances.swap_remove(index);
        if let Some(moved) = self.instances.get(index) {
            self.instance_index.insert(moved.instance_name.clone(), index);
        }
        self.pending = BuildMode::Build;
        self.stats.instances_removed += 1;
        Ok(removed)
    }

    /// Move a registered instance. A transform-only change allows a refit.
    pub fn set_transform(&mut self, instance_name: &str, transform: InstanceMatrix) -> Result<()> {
        let Some(&index) = self.instance_index.get(instance_name) else {
            return Err(Error::UnknownInstance(instance_name.to_string()));
        };
        self.instances[index].transform = transform;
        if self.pending == BuildMode::Reuse {
            self.pending = BuildMode::Refit;
        }
        self.stats.transform_updates += 1;
        Ok(())
    }

    pub fn get(&self, instance_name: &str) -> Option<&TlasInstanceData> {
        self.instance_index.get(instance_name).map(|&i| &self.instances[i])
    }

    pub fn contains(&self, instance_name: &str) -> bool {
        self.instance_index.contains_key(instance_name)
    }

    /// Register the binder writing `instance_name`'s shader table rows.
    pub fn add_shader_table_binder(
        &mut self,
        instance_name: impl Into<String>,
        binder: impl ShaderTableBinder + 'static,
    ) -> Result<()> {
        let instance_name = instance_name.into();
        if self.binder_index.contains_key(&instance_name) {
            log::error!("add_shader_table_binder: '{}' is already registered", instance_name);
            return Err(Error::DuplicateBinder(instance_name));
        }
        self.binder_index.insert(instance_name.clone(), self.binders.len());
        self.binders.push((instance_name, Box::new(binder)));
        self.stats.binders_added += 1;
        Ok(())
    }

    pub fn remove_shader_table_binder(&mut self, instance_name: &str) -> Result<()> {
        let Some(index) = self.binder_index.remove(instance_name) else {
            log::error!("remove_shader_table_binder: '{}' was never added", instance_name);
            return Err(Error::UnknownBinder(instance_name.to_string()));
        };
        self.binders.swap_remove(index);
        if let Some((moved, _)) = self.binders.get(index) {
            self.binder_index.insert(moved.clone(), index);
        }
        self.stats.binders_removed += 1;
        Ok(())
    }

    pub fn has_binder(&self, instance_name: &str) -> bool {
        self.binder_index.contains_key(instance_name)
    }

    /// Mode the next [`prepare_build`](Self::prepare_build) will report
    pub fn pending_mode(&self) -> BuildMode {
        self.pending
    }

    /// Take this frame's build list and reset the change tracking.
    pub fn prepare_build(&mut self) -> TlasBuild<'_> {
        let mode = std::mem::replace(&mut self.pending, BuildMode::Reuse);
        TlasBuild {
            mode,
            instances: &self.instances,
        }
    }

    /// Force a full build next frame, e.g. after the TLAS was lost.
    pub fn invalidate(&mut self) {
        self.pending = BuildMode::Build;
    }

    /// Run every binder against this frame's shader table. Returns the number run.
    pub fn bind_shaders(&mut self, sbt: &mut dyn ShaderBindingTable, tlas: TlasRef) -> usize {
        for (_, binder) in &mut self.binders {
            binder.bind(sbt, tlas);
        }
        self.binders.len()
    }

    pub fn instances(&self) -> &[TlasInstanceData] {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn binder_count(&self) -> usize {
        self.binders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.binders.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceError, GpuObjectId};
    use glam::Vec3;

    fn entry(name: &str, blas: u64) -> TlasInstanceData {
        TlasInstanceData::new(name, InstanceMatrix::IDENTITY).with_blas(BlasRef(GpuObjectId(blas)))
    }

    #[derive(Default)]
    struct RecordingTable {
        rows: Vec<(String, u32)>,
    }

    impl ShaderBindingTable for RecordingTable {
        fn bind_hit_group_for_instance(&mut self, instance_name: &str, ray_index: u32, _: &str, _: &[u8]) {
            self.rows.push((instance_name.to_string(), ray_index));
        }

        fn bind_hit_group_for_tlas(&mut self, _: u32, _: &str, _: &[u8]) {}

        fn submit(self: Box<Self>) -> std::result::Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = InstanceRegistry::new();
        registry.add_tlas_build(entry("a", 1)).unwrap();
        registry.add_tlas_build(entry("b", 2)).unwrap();
        registry.add_tlas_build(entry("c", 3)).unwrap();

        let removed = registry.remove_tlas_build("a").unwrap();
        assert_eq!(removed.instance_name, "a");
        assert_eq!(registry.instance_count(), 2);
        // Index of the swapped entry is kept in sync
        assert_eq!(registry.get("c").unwrap().blas, Some(BlasRef(GpuObjectId(3))));
        registry.remove_tlas_build("c").unwrap();
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_duplicate_and_unknown_names_are_errors() {
        let mut registry = InstanceRegistry::new();
        registry.add_tlas_build(entry("a", 1)).unwrap();

        assert!(matches!(registry.add_tlas_build(entry("a", 2)), Err(Error::DuplicateInstance(_))));
        assert!(matches!(registry.remove_tlas_build("missing"), Err(Error::UnknownInstance(_))));
        assert!(matches!(
            registry.add_tlas_build(TlasInstanceData::new("no-blas", InstanceMatrix::IDENTITY)),
            Err(Error::MissingBlas(_))
        ));

        registry.add_shader_table_binder("a", |_: &mut dyn ShaderBindingTable, _: TlasRef| {}).unwrap();
        assert!(matches!(
            registry.add_shader_table_binder("a", |_: &mut dyn ShaderBindingTable, _: TlasRef| {}),
            Err(Error::DuplicateBinder(_))
        ));
        assert!(matches!(registry.remove_shader_table_binder("b"), Err(Error::UnknownBinder(_))));
    }

    #[test]
    fn test_build_mode_tracking() {
        let mut registry = InstanceRegistry::new();
        assert_eq!(registry.prepare_build().mode, BuildMode::Reuse);

        registry.add_tlas_build(entry("a", 1)).unwrap();
        registry.set_transform("a", InstanceMatrix::from_translation(Vec3::X)).unwrap();
        assert_eq!(registry.prepare_build().mode, BuildMode::Build);
        assert_eq!(registry.prepare_build().mode, BuildMode::Reuse);

        registry.set_transform("a", InstanceMatrix::from_translation(Vec3::Y)).unwrap();
        let build = registry.prepare_build();
        assert_eq!(build.mode, BuildMode::Refit);
        assert_eq!(build.instances[0].transform.translation(), Vec3::Y);

        registry.remove_tlas_build("a").unwrap();
        assert_eq!(registry.prepare_build().mode, BuildMode::Build);
    }

    #[test]
    fn test_set_transform_of_unknown_instance() {
        let mut registry = InstanceRegistry::new();
        assert!(registry.set_transform("ghost", InstanceMatrix::IDENTITY).is_err());
        assert_eq!(registry.pending_mode(), BuildMode::Reuse);
    }

    #[test]
    fn test_binders_run_once_per_call() {
        let mut registry = InstanceRegistry::new();
        for name in ["a", "b", "c"] {
            let owned = name.to_string();
            registry
                .add_shader_table_binder(name, move |sbt: &mut dyn ShaderBindingTable, _: TlasRef| {
                    sbt.bind_hit_group_for_instance(&owned, 0, "hit", &[]);
                })
                .unwrap();
        }
        registry.remove_shader_table_binder("a").unwrap();

        let mut table = RecordingTable::default();
        let ran = registry.bind_shaders(&mut table, TlasRef(GpuObjectId(9)));
        assert_eq!(ran, 2);
        let mut names: Vec<_> = table.rows.iter().map(|(n, _)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn test_hit_group_binder_writes_both_rays() {
        let mut registry = InstanceRegistry::new();
        registry
            .add_shader_table_binder(
                "cube",
                crate::registry::HitGroupBinder {
                    instance_name: "cube".to_string(),
                    primary_hit_group: "primary".to_string(),
                    shadow_hit_group: "shadow".to_string(),
                    record: Default::default(),
                },
            )
            .unwrap();

        let mut table = RecordingTable::default();
        registry.bind_shaders(&mut table, TlasRef(GpuObjectId(1)));
        assert_eq!(table.rows, vec![("cube".to_string(), 0), ("cube".to_string(), 1)]);
    }
}
