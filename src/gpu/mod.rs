//! Graphics API seam
//!
//! The streaming core never allocates GPU memory itself. Everything it needs
//! from the graphics layer goes through [`GraphicsDevice`], [`ShaderBindingTable`]
//! and [`MeshBuilder`]. GPU objects are referred to by small copyable ids; the
//! resource that created an id is responsible for releasing it.

pub mod headless;
pub mod record;
pub mod transform;

pub use headless::HeadlessDevice;
pub use record::{BlasInstanceData, TextureSet};
pub use transform::InstanceMatrix;

use thiserror::Error;

use crate::registry::TlasInstanceData;

/// Ray index of primary rays in the shader binding table
pub const PRIMARY_RAY_INDEX: u32 = 0;
/// Ray index of shadow rays in the shader binding table
pub const SHADOW_RAY_INDEX: u32 = 1;

/// Instance mask for opaque geometry
pub const OPAQUE_GEOM_MASK: u8 = 0x01;
/// Instance mask for geometry that lets light through (glass, water)
pub const TRANSPARENT_GEOM_MASK: u8 = 0x02;

/// Raw id of any GPU object created by a [`GraphicsDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuObjectId(pub u64);

/// Shader resource view of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureView(pub GpuObjectId);

/// Compiled shader module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderModule(pub GpuObjectId);

/// Bottom level acceleration structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasRef(pub GpuObjectId);

/// Top level acceleration structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlasRef(pub GpuObjectId);

/// Errors reported by the graphics layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("texture creation failed: {0}")]
    Texture(String),
    #[error("shader compilation failed: {0}")]
    Shader(String),
    #[error("acceleration structure build failed: {0}")]
    AccelerationStructure(String),
    #[error("instance '{instance}' references released object {object:?}")]
    DanglingReference { instance: String, object: GpuObjectId },
}

/// Pixel layout of uploaded texture data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
}

/// Description of a 2D texture to upload
#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub pixels: &'a [u8],
}

/// Stage a shader module is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    ClosestHit,
    AnyHit,
    Miss,
}

/// Description of a ray tracing shader module
#[derive(Debug, Clone)]
pub struct ShaderDesc<'a> {
    pub name: &'a str,
    pub stage: ShaderStage,
    pub entry_point: &'a str,
    pub macros: &'a [(&'a str, String)],
}

/// How the top level acceleration structure is produced this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Instances were added or removed; full rebuild
    Build,
    /// Only transforms changed; update in place
    Refit,
    /// Nothing changed since the last frame
    Reuse,
}

/// Factory and command surface of the graphics API
pub trait GraphicsDevice: Send + Sync {
    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<TextureView, DeviceError>;

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> Result<ShaderModule, DeviceError>;

    /// Build a new TLAS over `instances`.
    fn build_tlas(&self, instances: &[TlasInstanceData]) -> Result<TlasRef, DeviceError>;

    /// Update the transforms of an existing TLAS in place.
    fn refit_tlas(&self, tlas: TlasRef, instances: &[TlasInstanceData]) -> Result<(), DeviceError>;

    /// Upload the shader-visible texture array and texture-set buffer.
    fn bind_textures(&self, textures: &[TextureView], sets: &[TextureSet]) -> Result<(), DeviceError>;

    /// Start writing the shader binding table for `tlas`.
    fn begin_shader_table(&self, tlas: TlasRef) -> Result<Box<dyn ShaderBindingTable + '_>, DeviceError>;

    /// Release a GPU object. Releasing an unknown id is a no-op.
    fn release(&self, object: GpuObjectId);
}

/// Writer for per-instance shader binding table rows
pub trait ShaderBindingTable {
    /// Bind a hit group and its record to the row of one TLAS instance.
    fn bind_hit_group_for_instance(
        &mut self,
        instance_name: &str,
        ray_index: u32,
        hit_group: &str,
        record: &[u8],
    );

    /// Bind a hit group for every instance of the TLAS.
    fn bind_hit_group_for_tlas(&mut self, ray_index: u32, hit_group: &str, record: &[u8]);

    /// Finish writing and upload the table.
    fn submit(self: Box<Self>) -> Result<(), DeviceError>;
}

/// Geometry a [`MeshBuilder`] can turn into a BLAS
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeometryDesc {
    /// Unit cube with per-face UVs
    Cube,
    /// Camera-facing quad used by sprites
    SpritePlane,
    /// Named mesh provided by content
    Mesh(String),
}

/// A built BLAS plus where its geometry lives in the shared buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltMesh {
    pub blas: BlasRef,
    pub vertex_offset: u32,
    pub index_offset: u32,
}

/// External mesh builder producing bottom level acceleration structures
pub trait MeshBuilder: Send + Sync {
    fn build(&self, geometry: &GeometryDesc) -> Result<BuiltMesh, DeviceError>;

    fn release(&self, mesh: &BuiltMesh);
}
