//! Pooled texture sets
//!
//! A texture set is the group of maps one material samples: base colour,
//! normal, a physical descriptor (roughness in G, metalness in B) and
//! emissive. Maps are looked up by naming convention next to a base path:
//! `{base}_1K_Color.{ext}`, `{base}_1K_Normal.{ext}` and so on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::ResourceError;
use crate::core::id::ResourceId;
use crate::gpu::{GraphicsDevice, TextureDesc, TextureFormat, TextureView};
use crate::pool::{Checkout, PoolConfig, PooledResource, ResourcePool};
use crate::slots::{ActiveTextureSource, TextureMaps};
use crate::stream::TaskPool;

/// Physical descriptor value used where no roughness or metalness map exists
pub const DEFAULT_PHYSICAL: [u8; 4] = [0x00, 0xFF, 0x00, 0x00];

/// Decoded RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Image filled with one colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat(width as usize * height as usize);
        Self { width, height, pixels }
    }
}

/// Where decoded images come from. Decoding itself happens outside this crate.
pub trait TextureSource: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<TextureData, ResourceError>;
}

/// Texture source backed by a map of already decoded images
#[derive(Default)]
pub struct MemoryTextureSource {
    images: RwLock<HashMap<String, TextureData>>,
}

impl MemoryTextureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: TextureData) {
        self.images.write().insert(path.into(), data);
    }

    pub fn remove(&self, path: &str) -> Option<TextureData> {
        self.images.write().remove(path)
    }
}

impl TextureSource for MemoryTextureSource {
    fn exists(&self, path: &str) -> bool {
        self.images.read().contains_key(path)
    }

    fn read(&self, path: &str) -> Result<TextureData, ResourceError> {
        self.images
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ResourceError::new(path, "file not found"))
    }
}

/// Texture views released on drop
pub struct OwnedTextureMaps {
    maps: TextureMaps,
    device: Arc<dyn GraphicsDevice>,
}

impl OwnedTextureMaps {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            maps: TextureMaps::default(),
            device,
        }
    }

    pub fn maps(&self) -> &TextureMaps {
        &self.maps
    }

    pub fn maps_mut(&mut self) -> &mut TextureMaps {
        &mut self.maps
    }
}

impl Drop for OwnedTextureMaps {
    fn drop(&mut self) {
        for view in [self.maps.base_color, self.maps.normal, self.maps.physical, self.maps.emissive]
            .into_iter()
            .flatten()
        {
            self.device.release(view.0);
        }
    }
}

/// Upload one image from `source`.
pub(crate) fn upload(
    source: &dyn TextureSource,
    device: &dyn GraphicsDevice,
    path: &str,
    format: TextureFormat,
) -> Result<TextureView, ResourceError> {
    let image = source.read(path)?;
    upload_data(device, path, &image, format)
}

pub(crate) fn upload_data(
    device: &dyn GraphicsDevice,
    name: &str,
    image: &TextureData,
    format: TextureFormat,
) -> Result<TextureView, ResourceError> {
    device
        .create_texture(&TextureDesc {
            name,
            width: image.width,
            height: image.height,
            format,
            pixels: &image.pixels,
        })
        .map_err(|e| ResourceError::new(name, e.to_string()))
}

/// Identifies one texture set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureSetDescription {
    pub base_path: String,
    pub ext: String,
    /// Take the colour map from another set
    pub color_path: Option<String>,
    pub color_ext: Option<String>,
    /// Whether the material reflects rays
    pub reflective: bool,
}

impl TextureSetDescription {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            ext: "jpg".to_string(),
            color_path: None,
            color_ext: None,
            reflective: false,
        }
    }

    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = ext.into();
        self
    }

    pub fn with_color(mut self, color_path: impl Into<String>, color_ext: impl Into<String>) -> Self {
        self.color_path = Some(color_path.into());
        self.color_ext = Some(color_ext.into());
        self
    }

    pub fn reflective(mut self) -> Self {
        self.reflective = true;
        self
    }

    pub fn color_map_path(&self) -> String {
        format!(
            "{}_1K_Color.{}",
            self.color_path.as_deref().unwrap_or(&self.base_path),
            self.color_ext.as_deref().unwrap_or(&self.ext)
        )
    }

    pub fn map_path(&self, map: &str) -> String {
        format!("{}_1K_{}.{}", self.base_path, map, self.ext)
    }
}

/// A loaded texture set, shared through the [`TextureManager`]
pub struct MaterialTextures {
    id: ResourceId,
    textures: OwnedTextureMaps,
    reflective: bool,
}

impl MaterialTextures {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn maps(&self) -> &TextureMaps {
        self.textures.maps()
    }

    pub fn has_normal(&self) -> bool {
        self.maps().normal.is_some()
    }

    pub fn has_physical(&self) -> bool {
        self.maps().physical.is_some()
    }

    pub fn has_emissive(&self) -> bool {
        self.maps().emissive.is_some()
    }

    pub fn is_reflective(&self) -> bool {
        self.reflective
    }
}

impl ActiveTextureSource for MaterialTextures {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn texture_maps(&self) -> TextureMaps {
        *self.maps()
    }
}

/// Combine optional roughness and metalness images into one physical map.
fn pack_physical(
    roughness: Option<TextureData>,
    metalness: Option<TextureData>,
) -> Result<Option<TextureData>, String> {
    let (width, height) = match (&roughness, &metalness) {
        (None, None) => return Ok(None),
        (Some(r), Some(m)) if (r.width, r.height) != (m.width, m.height) => {
            return Err(format!(
                "roughness is {}x{} but metalness is {}x{}",
                r.width, r.height, m.width, m.height
            ));
        }
        (_, Some(m)) => (m.width, m.height),
        (Some(r), None) => (r.width, r.height),
    };

    let mut packed = TextureData::solid(width, height, DEFAULT_PHYSICAL);
    // Single channel sources: take their red channel
    if let Some(r) = &roughness {
        for (dst, src) in packed.pixels.chunks_exact_mut(4).zip(r.pixels.chunks_exact(4)) {
            dst[1] = src[0];
        }
    }
    if let Some(m) = &metalness {
        for (dst, src) in packed.pixels.chunks_exact_mut(4).zip(m.pixels.chunks_exact(4)) {
            dst[2] = src[0];
        }
    }
    Ok(Some(packed))
}

fn read_optional(source: &dyn TextureSource, path: &str) -> Result<Option<TextureData>, ResourceError> {
    if source.exists(path) {
        source.read(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Load every map of `desc`. Blocking; run off the async workers.
pub fn load_texture_set(
    desc: &TextureSetDescription,
    source: &dyn TextureSource,
    device: Arc<dyn GraphicsDevice>,
) -> Result<MaterialTextures, ResourceError> {
    let color_path = desc.color_map_path();
    if !source.exists(&color_path) {
        return Err(ResourceError::new(desc, format!("missing colour map {color_path}")));
    }

    // Views created so far are released if a later map fails
    let mut textures = OwnedTextureMaps::new(Arc::clone(&device));
    textures.maps_mut().base_color = Some(upload(source, device.as_ref(), &color_path, TextureFormat::Rgba8UnormSrgb)?);

    let normal_path = desc.map_path("Normal");
    if source.exists(&normal_path) {
        textures.maps_mut().normal = Some(upload(source, device.as_ref(), &normal_path, TextureFormat::Rgba8Unorm)?);
    }

    let roughness = read_optional(source, &desc.map_path("Roughness"))?;
    let metalness = read_optional(source, &desc.map_path("Metalness"))?;
    let physical = pack_physical(roughness, metalness).map_err(|msg| ResourceError::new(desc, msg))?;
    if let Some(physical) = physical {
        let name = desc.map_path("Physical");
        textures.maps_mut().physical = Some(upload_data(device.as_ref(), &name, &physical, TextureFormat::Rgba8Unorm)?);
    }

    let emissive_path = desc.map_path("Emissive");
    if source.exists(&emissive_path) {
        textures.maps_mut().emissive = Some(upload(source, device.as_ref(), &emissive_path, TextureFormat::Rgba8UnormSrgb)?);
    }

    log::debug!("Loaded texture set {} ({} maps)", desc.base_path, textures.maps().count());
    Ok(MaterialTextures {
        id: ResourceId::next(),
        textures,
        reflective: desc.reflective,
    })
}

/// Handle to a pooled texture set
pub type TextureSetHandle = PooledResource<TextureSetDescription, MaterialTextures>;

/// Pool of texture sets keyed by description
#[derive(Clone)]
pub struct TextureManager {
    pool: ResourcePool<TextureSetDescription, MaterialTextures>,
    source: Arc<dyn TextureSource>,
    device: Arc<dyn GraphicsDevice>,
}

impl TextureManager {
    pub fn new(
        tasks: TaskPool,
        config: PoolConfig,
        source: Arc<dyn TextureSource>,
        device: Arc<dyn GraphicsDevice>,
    ) -> Self {
        Self {
            pool: ResourcePool::new("textures", tasks, config),
            source,
            device,
        }
    }

    /// Check out the texture set for `desc`, loading it if needed.
    pub fn checkout(&self, desc: TextureSetDescription) -> Checkout<TextureSetDescription, MaterialTextures> {
        let source = Arc::clone(&self.source);
        let device = Arc::clone(&self.device);
        self.pool.checkout(desc, move |desc| async move {
            let label = desc.base_path.clone();
            tokio::task::spawn_blocking(move || load_texture_set(&desc, source.as_ref(), device))
                .await
                .map_err(|e| ResourceError::new(label, format!("texture load task failed: {e}")))?
        })
    }

    pub fn return_handle(&self, handle: TextureSetHandle) {
        self.pool.return_handle(handle);
    }

    pub fn try_return(&self, handle: Option<TextureSetHandle>) {
        self.pool.try_return(handle);
    }

    pub fn pool(&self) -> &ResourcePool<TextureSetDescription, MaterialTextures> {
        &self.pool
    }
}
