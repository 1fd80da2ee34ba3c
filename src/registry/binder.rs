use crate::gpu::{BlasInstanceData, ShaderBindingTable, TlasRef, PRIMARY_RAY_INDEX, SHADOW_RAY_INDEX};

/// Writes one instance's shader binding table rows each frame.
///
/// Binders are owned by the [`InstanceRegistry`](crate::registry::InstanceRegistry)
/// and keyed by instance name. They must only capture plain data (names,
/// offsets, records), never pooled resources.
pub trait ShaderTableBinder: Send {
    fn bind(&mut self, sbt: &mut dyn ShaderBindingTable, tlas: TlasRef);
}

impl<F> ShaderTableBinder for F
where
    F: FnMut(&mut dyn ShaderBindingTable, TlasRef) + Send,
{
    fn bind(&mut self, sbt: &mut dyn ShaderBindingTable, tlas: TlasRef) {
        self(sbt, tlas)
    }
}

/// Binder writing a fixed record for the primary and shadow hit groups
#[derive(Debug, Clone)]
pub struct HitGroupBinder {
    pub instance_name: String,
    pub primary_hit_group: String,
    pub shadow_hit_group: String,
    pub record: BlasInstanceData,
}

impl ShaderTableBinder for HitGroupBinder {
    fn bind(&mut self, sbt: &mut dyn ShaderBindingTable, _tlas: TlasRef) {
        let record = self.record.as_bytes();
        sbt.bind_hit_group_for_instance(&self.instance_name, PRIMARY_RAY_INDEX, &self.primary_hit_group, record);
        sbt.bind_hit_group_for_instance(&self.instance_name, SHADOW_RAY_INDEX, &self.shadow_hit_group, record);
    }
}
