//! Sprite materials and frame animation

use std::sync::Arc;
use std::time::Duration;

use crate::core::error::ResourceError;
use crate::core::id::ResourceId;
use crate::gpu::{GraphicsDevice, TextureFormat};
use crate::pool::{Checkout, PoolConfig, PooledResource, ResourcePool};
use crate::resources::textures::{upload, upload_data, OwnedTextureMaps, TextureSource};
use crate::slots::{ActiveTextureSource, TextureMaps};
use crate::stream::TaskPool;

/// Identifies one sprite material
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpriteMaterialDescription {
    pub color_map: String,
    pub normal_map: Option<String>,
    pub physical_map: Option<String>,
    pub reflective: bool,
}

impl SpriteMaterialDescription {
    pub fn new(color_map: impl Into<String>) -> Self {
        Self {
            color_map: color_map.into(),
            normal_map: None,
            physical_map: None,
            reflective: false,
        }
    }

    pub fn with_normal(mut self, path: impl Into<String>) -> Self {
        self.normal_map = Some(path.into());
        self
    }

    pub fn with_physical(mut self, path: impl Into<String>) -> Self {
        self.physical_map = Some(path.into());
        self
    }

    pub fn reflective(mut self) -> Self {
        self.reflective = true;
        self
    }
}

/// Loaded sprite material
pub struct SpriteMaterial {
    id: ResourceId,
    width: u32,
    height: u32,
    textures: OwnedTextureMaps,
    reflective: bool,
}

impl SpriteMaterial {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Size of the colour map in pixels
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_normal(&self) -> bool {
        self.textures.maps().normal.is_some()
    }

    pub fn has_physical(&self) -> bool {
        self.textures.maps().physical.is_some()
    }

    pub fn is_reflective(&self) -> bool {
        self.reflective
    }
}

impl ActiveTextureSource for SpriteMaterial {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn texture_maps(&self) -> TextureMaps {
        *self.textures.maps()
    }
}

fn load_sprite_material(
    desc: &SpriteMaterialDescription,
    source: &dyn TextureSource,
    device: Arc<dyn GraphicsDevice>,
) -> Result<SpriteMaterial, ResourceError> {
    let color = source.read(&desc.color_map)?;
    let mut textures = OwnedTextureMaps::new(Arc::clone(&device));
    textures.maps_mut().base_color = Some(upload_data(
        device.as_ref(),
        &desc.color_map,
        &color,
        TextureFormat::Rgba8UnormSrgb,
    )?);
    if let Some(path) = &desc.normal_map {
        textures.maps_mut().normal = Some(upload(source, device.as_ref(), path, TextureFormat::Rgba8Unorm)?);
    }
    if let Some(path) = &desc.physical_map {
        textures.maps_mut().physical = Some(upload(source, device.as_ref(), path, TextureFormat::Rgba8Unorm)?);
    }

    Ok(SpriteMaterial {
        id: ResourceId::next(),
        width: color.width,
        height: color.height,
        textures,
        reflective: desc.reflective,
    })
}

/// Handle to a pooled sprite material
pub type SpriteMaterialHandle = PooledResource<SpriteMaterialDescription, SpriteMaterial>;

#[derive(Clone)]
pub struct SpriteMaterialManager {
    pool: ResourcePool<SpriteMaterialDescription, SpriteMaterial>,
    source: Arc<dyn TextureSource>,
    device: Arc<dyn GraphicsDevice>,
}

impl SpriteMaterialManager {
    pub fn new(
        tasks: TaskPool,
        config: PoolConfig,
        source: Arc<dyn TextureSource>,
        device: Arc<dyn GraphicsDevice>,
    ) -> Self {
        Self {
            pool: ResourcePool::new("sprite-materials", tasks, config),
            source,
            device,
        }
    }

    pub fn checkout(&self, desc: SpriteMaterialDescription) -> Checkout<SpriteMaterialDescription, SpriteMaterial> {
        let source = Arc::clone(&self.source);
        let device = Arc::clone(&self.device);
        self.pool.checkout(desc, move |desc| async move {
            let label = desc.color_map.clone();
            tokio::task::spawn_blocking(move || load_sprite_material(&desc, source.as_ref(), device))
                .await
                .map_err(|e| ResourceError::new(label, format!("sprite material task failed: {e}")))?
        })
    }

    pub fn return_handle(&self, handle: SpriteMaterialHandle) {
        self.pool.return_handle(handle);
    }

    pub fn try_return(&self, handle: Option<SpriteMaterialHandle>) {
        self.pool.try_return(handle);
    }

    pub fn pool(&self) -> &ResourcePool<SpriteMaterialDescription, SpriteMaterial> {
        &self.pool
    }
}

/// UV rectangle of one animation frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteFrame {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl SpriteFrame {
    pub const FULL: SpriteFrame = SpriteFrame {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Frame from a pixel rectangle on a sheet of `width` x `height` pixels.
    pub fn from_pixels(left: u32, top: u32, right: u32, bottom: u32, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            left: left as f32 / w,
            top: top as f32 / h,
            right: right as f32 / w,
            bottom: bottom as f32 / h,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteAnimation {
    pub frame_duration: Duration,
    pub frames: Vec<SpriteFrame>,
}

impl SpriteAnimation {
    pub fn new(frame_duration: Duration, frames: Vec<SpriteFrame>) -> Self {
        Self { frame_duration, frames }
    }

    pub fn duration(&self) -> Duration {
        self.frame_duration * self.frames.len() as u32
    }
}

/// Named animations and the playback position within the current one
#[derive(Debug, Clone)]
pub struct Sprite {
    animations: Vec<(String, SpriteAnimation)>,
    current: usize,
    elapsed: Duration,
    frame: usize,
    /// Keep the playback position when switching animations
    pub keep_time: bool,
}

impl Default for Sprite {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Sprite {
    /// Animations without frames are dropped. With none left, the sprite
    /// shows the whole texture.
    pub fn new(animations: Vec<(String, SpriteAnimation)>) -> Self {
        let mut animations: Vec<_> = animations
            .into_iter()
            .filter(|(_, a)| !a.frames.is_empty())
            .collect();
        if animations.is_empty() {
            animations.push((
                "default".to_string(),
                SpriteAnimation::new(Duration::from_micros(1), vec![SpriteFrame::FULL]),
            ));
        }
        Self {
            animations,
            current: 0,
            elapsed: Duration::ZERO,
            frame: 0,
            keep_time: false,
        }
    }

    /// Switch animation. Unknown names fall back to the first animation.
    pub fn set_animation(&mut self, name: &str) {
        if self.animation_name() == name {
            return;
        }
        self.current = self.animations.iter().position(|(n, _)| n == name).unwrap_or(0);
        if self.keep_time {
            self.advance(Duration::ZERO);
        } else {
            self.elapsed = Duration::ZERO;
            self.frame = 0;
        }
    }

    /// Advance playback by `dt`. Returns true if the visible frame changed.
    pub fn update(&mut self, dt: Duration) -> bool {
        let old = self.frame;
        self.advance(dt);
        old != self.frame
    }

    fn advance(&mut self, dt: Duration) {
        let animation = &self.animations[self.current].1;
        let total = animation.duration().as_nanos().max(1);
        let elapsed = (self.elapsed + dt).as_nanos() % total;
        self.elapsed = Duration::from_nanos(elapsed as u64);
        let frame = elapsed * animation.frames.len() as u128 / total;
        self.frame = (frame as usize).min(animation.frames.len() - 1);
    }

    pub fn current_frame(&self) -> SpriteFrame {
        self.animations[self.current].1.frames[self.frame]
    }

    pub fn frame_index(&self) -> usize {
        self.frame
    }

    pub fn animation_name(&self) -> &str {
        &self.animations[self.current].0
    }

    pub fn animations(&self) -> impl Iterator<Item = &str> {
        self.animations.iter().map(|(n, _)| n.as_str())
    }
}
