//! Per-instance shader table record
//!
//! These layouts are read verbatim by the hit shaders. Any change here must be
//! matched by the shader side; the size assertions below catch accidental drift.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Record written into the shader binding table row of each instance.
///
/// For meshes `u1..v4` carry per-map extras; for sprites they hold the UV
/// corners of the current frame; for glass the material parameters.
/// `tex0..tex3` are texture-set indices, `-1` when unused.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlasInstanceData {
    pub u1: f32,
    pub v1: f32,
    pub u2: f32,
    pub v2: f32,
    pub u3: f32,
    pub v3: f32,
    pub u4: f32,
    pub v4: f32,

    pub tex0: i32,
    pub tex1: i32,
    pub tex2: i32,
    pub tex3: i32,
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub dispatch_type: u32,
    pub padding: u32,
    pub raycast_small_offset: f32,
    pub extra1: u32,
    pub extra2: u32,
    pub extra3: u32,
    pub extra4: u32,
    pub extra5: u32,
    pub extra6: u32,
    pub extra7: u32,
}

/// Size of [`BlasInstanceData`] expected by the shaders
pub const BLAS_INSTANCE_DATA_SIZE: usize = 96;

const _: () = assert!(std::mem::size_of::<BlasInstanceData>() == BLAS_INSTANCE_DATA_SIZE);
const _: () = assert!(std::mem::size_of::<TextureSet>() == 16);

/// Default ray offset used when no config is at hand
pub const DEFAULT_RAYCAST_SMALL_OFFSET: f32 = 0.0001;

impl Default for BlasInstanceData {
    fn default() -> Self {
        Self {
            tex0: -1,
            tex1: -1,
            tex2: -1,
            tex3: -1,
            raycast_small_offset: DEFAULT_RAYCAST_SMALL_OFFSET,
            ..Zeroable::zeroed()
        }
    }
}

impl BlasInstanceData {
    /// Record for a glass surface. Glass samples no textures.
    pub fn glass(
        reflection_color_mask: Vec3,
        absorption: f32,
        index_of_refraction: Vec2,
        material_rgb: u32,
    ) -> Self {
        Self {
            u1: reflection_color_mask.x,
            v1: reflection_color_mask.y,
            u2: reflection_color_mask.z,
            v2: absorption,
            u3: index_of_refraction.x,
            v3: index_of_refraction.y,
            padding: material_rgb,
            dispatch_type: dispatch::GLASS,
            ..Default::default()
        }
    }

    /// Texture-set indices in layer order
    pub fn texture_sets(&self) -> [i32; 4] {
        [self.tex0, self.tex1, self.tex2, self.tex3]
    }

    pub(crate) fn set_texture_layer(&mut self, layer: usize, set_index: i32) {
        match layer {
            0 => self.tex0 = set_index,
            1 => self.tex1 = set_index,
            2 => self.tex2 = set_index,
            _ => self.tex3 = set_index,
        }
    }

    /// Write the four UV corners of a sprite frame.
    pub fn set_sprite_uvs(&mut self, left: f32, top: f32, right: f32, bottom: f32) {
        self.u1 = left;
        self.v1 = top;
        self.u2 = right;
        self.v2 = top;
        self.u3 = right;
        self.v3 = bottom;
        self.u4 = left;
        self.v4 = bottom;
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Texture indices of one material, `-1` for absent maps
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureSet {
    pub base_texture: i32,
    pub normal_texture: i32,
    pub physical_texture: i32,
    pub emissive_texture: i32,
}

impl TextureSet {
    pub const EMPTY: TextureSet = TextureSet {
        base_texture: -1,
        normal_texture: -1,
        physical_texture: -1,
        emissive_texture: -1,
    };
}

impl Default for TextureSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Dispatch flags selecting the shading path in the hit shader
pub mod dispatch {
    pub const MESH_DATA: u32 = 0;
    pub const SPRITE_DATA: u32 = 1;
    pub const MULTI_TEXTURE_MESH_DATA: u32 = 2;

    pub const LIGHT_AND_SHADE_BASE: u32 = 8;
    pub const LIGHT_AND_SHADE_BASE_EMISSIVE: u32 = 16;
    pub const LIGHT_AND_SHADE_BASE_NORMAL: u32 = 32;
    pub const LIGHT_AND_SHADE_BASE_NORMAL_EMISSIVE: u32 = 64;
    pub const LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL: u32 = 128;
    pub const LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_EMISSIVE: u32 = 256;
    pub const LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_REFLECTIVE: u32 = 512;
    pub const LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_REFLECTIVE_EMISSIVE: u32 = 1024;
    pub const GLASS: u32 = 2048;
    pub const WATER: u32 = 4096;
}

/// Material variants that change the dispatch type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecialMaterial {
    #[default]
    None,
    Sprite,
    MultiTexture,
    Glass,
    Water,
}

/// Pick the dispatch type for a material with the given maps.
pub fn shader_for_description(
    has_normal: bool,
    has_physical: bool,
    reflective: bool,
    emissive: bool,
    special: SpecialMaterial,
) -> u32 {
    use dispatch::*;

    let base = match special {
        SpecialMaterial::Water => return WATER,
        SpecialMaterial::Glass => return GLASS,
        _ => match (has_normal, has_physical, reflective, emissive) {
            (true, true, true, true) => LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_REFLECTIVE_EMISSIVE,
            (true, true, true, false) => LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_REFLECTIVE,
            (true, true, false, true) => LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_EMISSIVE,
            (true, true, false, false) => LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL,
            (true, false, _, true) => LIGHT_AND_SHADE_BASE_NORMAL_EMISSIVE,
            (true, false, _, false) => LIGHT_AND_SHADE_BASE_NORMAL,
            (false, _, _, true) => LIGHT_AND_SHADE_BASE_EMISSIVE,
            (false, _, _, false) => LIGHT_AND_SHADE_BASE,
        },
    };

    match special {
        SpecialMaterial::Sprite => base | SPRITE_DATA,
        SpecialMaterial::MultiTexture => base | MULTI_TEXTURE_MESH_DATA,
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<BlasInstanceData>(), 96);
        assert_eq!(std::mem::offset_of!(BlasInstanceData, tex0), 32);
        assert_eq!(std::mem::offset_of!(BlasInstanceData, index_offset), 48);
        assert_eq!(std::mem::offset_of!(BlasInstanceData, dispatch_type), 56);
        assert_eq!(std::mem::offset_of!(BlasInstanceData, raycast_small_offset), 64);
        assert_eq!(std::mem::offset_of!(BlasInstanceData, extra7), 92);
    }

    #[test]
    fn test_record_bytes_follow_field_layout() {
        let record = BlasInstanceData {
            tex0: 3,
            vertex_offset: 0x0102_0304,
            ..Default::default()
        };
        let bytes = record.as_bytes();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[32..36], &3i32.to_ne_bytes());
        assert_eq!(&bytes[36..40], &(-1i32).to_ne_bytes());
        assert_eq!(&bytes[52..56], &0x0102_0304u32.to_ne_bytes());
    }

    #[test]
    fn test_default_record_has_no_texture_sets() {
        let record = BlasInstanceData::default();
        assert_eq!(record.texture_sets(), [-1; 4]);
        assert_eq!(record.raycast_small_offset, DEFAULT_RAYCAST_SMALL_OFFSET);
    }

    #[test]
    fn test_dispatch_for_mesh_maps() {
        assert_eq!(
            shader_for_description(false, false, false, false, SpecialMaterial::None),
            dispatch::LIGHT_AND_SHADE_BASE
        );
        assert_eq!(
            shader_for_description(true, false, true, false, SpecialMaterial::None),
            dispatch::LIGHT_AND_SHADE_BASE_NORMAL
        );
        assert_eq!(
            shader_for_description(true, true, true, true, SpecialMaterial::None),
            dispatch::LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL_REFLECTIVE_EMISSIVE
        );
    }

    #[test]
    fn test_dispatch_special_materials() {
        assert_eq!(
            shader_for_description(true, true, false, false, SpecialMaterial::Sprite),
            dispatch::LIGHT_AND_SHADE_BASE_NORMAL_PHYSICAL | dispatch::SPRITE_DATA
        );
        assert_eq!(
            shader_for_description(false, false, false, true, SpecialMaterial::MultiTexture),
            dispatch::LIGHT_AND_SHADE_BASE_EMISSIVE | dispatch::MULTI_TEXTURE_MESH_DATA
        );
        assert_eq!(
            shader_for_description(true, true, true, true, SpecialMaterial::Glass),
            dispatch::GLASS
        );
        assert_eq!(
            shader_for_description(false, false, false, false, SpecialMaterial::Water),
            dispatch::WATER
        );
    }

    #[test]
    fn test_glass_record() {
        let glass = BlasInstanceData::glass(Vec3::new(0.9, 0.8, 0.7), 4.0, Vec2::new(1.5, 1.02), 0x00ff00);
        assert_eq!(glass.dispatch_type, dispatch::GLASS);
        assert_eq!(glass.v2, 4.0);
        assert_eq!(glass.padding, 0x00ff00);
        assert_eq!(glass.texture_sets(), [-1; 4]);
    }
}
