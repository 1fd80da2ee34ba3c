//! Pooled GPU resources shared between streamed objects

pub mod geometry;
pub mod shaders;
pub mod sprites;
pub mod textures;

pub use geometry::{BlasHandle, BlasLibrary, MeshBlas};
pub use shaders::{HitGroups, PrimaryHitShader, PrimaryHitShaderFactory, ShaderHandle, ShaderVariant};
pub use sprites::{
    Sprite, SpriteAnimation, SpriteFrame, SpriteMaterial, SpriteMaterialDescription, SpriteMaterialHandle,
    SpriteMaterialManager,
};
pub use textures::{
    MaterialTextures, MemoryTextureSource, TextureData, TextureManager, TextureSetDescription, TextureSetHandle,
    TextureSource,
};
