//! Pooled bottom level acceleration structures

use std::sync::Arc;

use crate::core::error::ResourceError;
use crate::gpu::{BlasInstanceData, BlasRef, BuiltMesh, GeometryDesc, MeshBuilder};
use crate::pool::{Checkout, PoolConfig, PooledResource, ResourcePool};
use crate::stream::TaskPool;

/// A BLAS built by the mesh builder, released on drop
pub struct MeshBlas {
    mesh: BuiltMesh,
    builder: Arc<dyn MeshBuilder>,
}

impl MeshBlas {
    pub fn blas(&self) -> BlasRef {
        self.mesh.blas
    }

    pub fn vertex_offset(&self) -> u32 {
        self.mesh.vertex_offset
    }

    pub fn index_offset(&self) -> u32 {
        self.mesh.index_offset
    }

    /// Write this mesh's buffer offsets into an instance record.
    pub fn apply_offsets(&self, record: &mut BlasInstanceData) {
        record.vertex_offset = self.mesh.vertex_offset;
        record.index_offset = self.mesh.index_offset;
    }
}

impl Drop for MeshBlas {
    fn drop(&mut self) {
        self.builder.release(&self.mesh);
    }
}

/// Handle to a pooled BLAS
pub type BlasHandle = PooledResource<GeometryDesc, MeshBlas>;

/// Shares one BLAS per geometry between all instances using it
#[derive(Clone)]
pub struct BlasLibrary {
    pool: ResourcePool<GeometryDesc, MeshBlas>,
    builder: Arc<dyn MeshBuilder>,
}

impl BlasLibrary {
    pub fn new(tasks: TaskPool, config: PoolConfig, builder: Arc<dyn MeshBuilder>) -> Self {
        Self {
            pool: ResourcePool::new("geometry", tasks, config),
            builder,
        }
    }

    pub fn checkout(&self, geometry: GeometryDesc) -> Checkout<GeometryDesc, MeshBlas> {
        let builder = Arc::clone(&self.builder);
        self.pool.checkout(geometry, move |geometry| async move {
            let mesh = builder
                .build(&geometry)
                .map_err(|e| ResourceError::new(&geometry, e.to_string()))?;
            Ok(MeshBlas { mesh, builder })
        })
    }

    pub fn return_handle(&self, handle: BlasHandle) {
        self.pool.return_handle(handle);
    }

    pub fn try_return(&self, handle: Option<BlasHandle>) {
        self.pool.try_return(handle);
    }

    pub fn pool(&self) -> &ResourcePool<GeometryDesc, MeshBlas> {
        &self.pool
    }
}
