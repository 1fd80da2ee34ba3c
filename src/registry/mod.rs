//! Per-frame instance and shader table registries

mod binder;
mod instances;

pub use binder::{HitGroupBinder, ShaderTableBinder};
pub use instances::{InstanceRegistry, RegistryStats, TlasBuild, TlasInstanceData, instance_flags};
pub use crate::gpu::BuildMode;
