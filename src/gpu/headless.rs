//! Headless graphics device
//!
//! Implements the device seam without a GPU. Every call is recorded so tools
//! and tests can inspect what would have reached the graphics API, and the
//! liveness of every object is tracked: a TLAS build that references a
//! released BLAS fails with [`DeviceError::DanglingReference`].

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::gpu::{
    BlasRef, BuiltMesh, DeviceError, GeometryDesc, GpuObjectId, GraphicsDevice, MeshBuilder,
    ShaderBindingTable, ShaderDesc, ShaderModule, TextureDesc, TextureSet, TextureView, TlasRef,
};
use crate::registry::TlasInstanceData;

/// Kind of a live GPU object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Texture,
    Shader,
    Blas,
    Tlas,
}

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    CreateTexture { id: GpuObjectId, name: String },
    CreateShader { id: GpuObjectId, name: String },
    BuildBlas { id: GpuObjectId, geometry: GeometryDesc },
    Release { id: GpuObjectId, kind: ObjectKind },
    BuildTlas { id: GpuObjectId, instances: Vec<String> },
    RefitTlas { id: GpuObjectId, instances: Vec<String> },
    BindTextures { textures: usize, sets: usize },
    SubmitShaderTable { tlas: TlasRef, rows: usize },
}

/// A shader binding table row as written by a binder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTableRow {
    /// `None` for rows bound for the whole TLAS
    pub instance_name: Option<String>,
    pub ray_index: u32,
    pub hit_group: String,
    pub record: Vec<u8>,
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    live: HashMap<GpuObjectId, ObjectKind>,
    events: Vec<DeviceEvent>,
    shader_table: Vec<ShaderTableRow>,
    bound_textures: Vec<TextureView>,
    bound_sets: Vec<TextureSet>,
    failing_textures: HashSet<String>,
    fail_shaders: bool,
    /// Texture binds left to fail
    failing_binds: usize,
}

impl HeadlessState {
    fn allocate(&mut self, kind: ObjectKind) -> GpuObjectId {
        self.next_id += 1;
        let id = GpuObjectId(self.next_id);
        self.live.insert(id, kind);
        id
    }

    fn release(&mut self, id: GpuObjectId) {
        if let Some(kind) = self.live.remove(&id) {
            self.events.push(DeviceEvent::Release { id, kind });
        }
    }

    fn check_instances(&self, instances: &[TlasInstanceData]) -> Result<(), DeviceError> {
        for instance in instances {
            if let Some(BlasRef(object)) = instance.blas {
                if self.live.get(&object) != Some(&ObjectKind::Blas) {
                    return Err(DeviceError::DanglingReference {
                        instance: instance.instance_name.clone(),
                        object,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Recording device with no GPU behind it
#[derive(Default)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make texture creation fail for textures with this name.
    pub fn fail_texture(&self, name: impl Into<String>) {
        self.state.lock().failing_textures.insert(name.into());
    }

    /// Make the next `count` texture array uploads fail.
    pub fn fail_texture_binds(&self, count: usize) {
        self.state.lock().failing_binds = count;
    }

    /// Make every shader compilation fail.
    pub fn set_fail_shaders(&self, fail: bool) {
        self.state.lock().fail_shaders = fail;
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn is_live(&self, id: GpuObjectId) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    /// Number of live objects of one kind
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Rows of the last submitted shader binding table
    pub fn shader_table(&self) -> Vec<ShaderTableRow> {
        self.state.lock().shader_table.clone()
    }

    /// Texture array and texture sets of the last rebind
    pub fn bound_textures(&self) -> (Vec<TextureView>, Vec<TextureSet>) {
        let state = self.state.lock();
        (state.bound_textures.clone(), state.bound_sets.clone())
    }

    /// Number of recorded events matching `pred`
    pub fn count_events(&self, pred: impl Fn(&DeviceEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<TextureView, DeviceError> {
        let mut state = self.state.lock();
        if state.failing_textures.contains(desc.name) {
            return Err(DeviceError::Texture(format!("{} rejected by device", desc.name)));
        }
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.pixels.len() != expected {
            return Err(DeviceError::Texture(format!(
                "{}: expected {} bytes of pixel data, got {}",
                desc.name,
                expected,
                desc.pixels.len()
            )));
        }
        let id = state.allocate(ObjectKind::Texture);
        state.events.push(DeviceEvent::CreateTexture { id, name: desc.name.to_string() });
        Ok(TextureView(id))
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> Result<ShaderModule, DeviceError> {
        let mut state = self.state.lock();
        if state.fail_shaders {
            return Err(DeviceError::Shader(format!("{} failed to compile", desc.name)));
        }
        let id = state.allocate(ObjectKind::Shader);
        state.events.push(DeviceEvent::CreateShader { id, name: desc.name.to_string() });
        Ok(ShaderModule(id))
    }

    fn build_tlas(&self, instances: &[TlasInstanceData]) -> Result<TlasRef, DeviceError> {
        let mut state = self.state.lock();
        state.check_instances(instances)?;
        let id = state.allocate(ObjectKind::Tlas);
        let names = instances.iter().map(|i| i.instance_name.clone()).collect();
        state.events.push(DeviceEvent::BuildTlas { id, instances: names });
        Ok(TlasRef(id))
    }

    fn refit_tlas(&self, tlas: TlasRef, instances: &[TlasInstanceData]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.live.get(&tlas.0) != Some(&ObjectKind::Tlas) {
            return Err(DeviceError::AccelerationStructure(format!("refit of unknown TLAS {:?}", tlas)));
        }
        state.check_instances(instances)?;
        let names = instances.iter().map(|i| i.instance_name.clone()).collect();
        state.events.push(DeviceEvent::RefitTlas { id: tlas.0, instances: names });
        Ok(())
    }

    fn bind_textures(&self, textures: &[TextureView], sets: &[TextureSet]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.failing_binds > 0 {
            state.failing_binds -= 1;
            return Err(DeviceError::Texture("texture array upload failed".to_string()));
        }
        state.bound_textures = textures.to_vec();
        state.bound_sets = sets.to_vec();
        state.events.push(DeviceEvent::BindTextures { textures: textures.len(), sets: sets.len() });
        Ok(())
    }

    fn begin_shader_table(&self, tlas: TlasRef) -> Result<Box<dyn ShaderBindingTable + '_>, DeviceError> {
        Ok(Box::new(HeadlessShaderTable {
            device: self,
            tlas,
            rows: Vec::new(),
        }))
    }

    fn release(&self, object: GpuObjectId) {
        self.state.lock().release(object);
    }
}

impl MeshBuilder for HeadlessDevice {
    fn build(&self, geometry: &GeometryDesc) -> Result<BuiltMesh, DeviceError> {
        let (vertices, indices) = match geometry {
            GeometryDesc::Cube => (24, 36),
            GeometryDesc::SpritePlane => (4, 6),
            GeometryDesc::Mesh(name) if name.is_empty() => {
                return Err(DeviceError::AccelerationStructure("unnamed mesh".to_string()));
            }
            GeometryDesc::Mesh(_) => (0, 0),
        };
        let mut state = self.state.lock();
        let id = state.allocate(ObjectKind::Blas);
        state.events.push(DeviceEvent::BuildBlas { id, geometry: geometry.clone() });
        // Each mesh gets its own region of the shared geometry buffers
        let slot = (id.0 as u32).wrapping_mul(64);
        Ok(BuiltMesh {
            blas: BlasRef(id),
            vertex_offset: slot.wrapping_add(vertices),
            index_offset: slot.wrapping_add(indices),
        })
    }

    fn release(&self, mesh: &BuiltMesh) {
        self.state.lock().release(mesh.blas.0);
    }
}

struct HeadlessShaderTable<'a> {
    device: &'a HeadlessDevice,
    tlas: TlasRef,
    rows: Vec<ShaderTableRow>,
}

impl ShaderBindingTable for HeadlessShaderTable<'_> {
    fn bind_hit_group_for_instance(
        &mut self,
        instance_name: &str,
        ray_index: u32,
        hit_group: &str,
        record: &[u8],
    ) {
        self.rows.push(ShaderTableRow {
            instance_name: Some(instance_name.to_string()),
            ray_index,
            hit_group: hit_group.to_string(),
            record: record.to_vec(),
        });
    }

    fn bind_hit_group_for_tlas(&mut self, ray_index: u32, hit_group: &str, record: &[u8]) {
        self.rows.push(ShaderTableRow {
            instance_name: None,
            ray_index,
            hit_group: hit_group.to_string(),
            record: record.to_vec(),
        });
    }

    fn submit(self: Box<Self>) -> Result<(), DeviceError> {
        let HeadlessShaderTable { device, tlas, rows } = *self;
        let mut state = device.state.lock();
        if state.live.get(&tlas.0) != Some(&ObjectKind::Tlas) {
            return Err(DeviceError::AccelerationStructure(format!(
                "shader table submitted for unknown TLAS {:?}",
                tlas
            )));
        }
        state.events.push(DeviceEvent::SubmitShaderTable { tlas, rows: rows.len() });
        state.shader_table = rows;
        Ok(())
    }
}
