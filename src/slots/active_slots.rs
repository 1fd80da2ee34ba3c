//! Active texture slots
//!
//! Textures referenced by at least one live instance are placed in a fixed
//! size, shader-visible texture array, and each material gets a row in the
//! texture-set buffer pointing into that array. Counting here is separate
//! from the pool's: a pooled texture only occupies slots while some live
//! instance uses it.

use std::collections::HashMap;

use crate::core::error::{Error, Result, SlotKind};
use crate::core::id::ResourceId;
use crate::gpu::{BlasInstanceData, TextureSet, TextureView};
use crate::gpu::record::DEFAULT_RAYCAST_SMALL_OFFSET;
use crate::slots::SlotAllocator;

/// Texture sets one record can reference (`tex0..tex3`)
pub const MAX_TEXTURE_LAYERS: usize = 4;

/// Views of the maps making up one material
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureMaps {
    pub base_color: Option<TextureView>,
    pub normal: Option<TextureView>,
    pub physical: Option<TextureView>,
    pub emissive: Option<TextureView>,
}

impl TextureMaps {
    /// Number of maps present
    pub fn count(&self) -> u32 {
        [self.base_color, self.normal, self.physical, self.emissive]
            .iter()
            .filter(|m| m.is_some())
            .count() as u32
    }
}

/// A resource that can be bound into the active texture array
pub trait ActiveTextureSource {
    /// Identity used to share slots between instances
    fn resource_id(&self) -> ResourceId;

    fn texture_maps(&self) -> TextureMaps;
}

#[derive(Debug)]
struct ActiveBinding {
    ref_count: u32,
    set_index: u32,
    texture_slots: Vec<u32>,
}

/// Slot assignments for the shader-visible texture array.
///
/// Only the render/update thread mutates this table.
pub struct ActiveSlotTable {
    texture_slots: SlotAllocator,
    set_slots: SlotAllocator,
    textures: Vec<TextureView>,
    texture_sets: Vec<TextureSet>,
    bindings: HashMap<ResourceId, ActiveBinding>,
    placeholder: TextureView,
    raycast_small_offset: f32,
    rebind_requested: bool,
}

impl ActiveSlotTable {
    /// Create a table with `capacity` texture slots and `capacity` set slots.
    /// Unused texture slots point at `placeholder`.
    pub fn new(capacity: u32, placeholder: TextureView) -> Self {
        Self {
            texture_slots: SlotAllocator::new(capacity),
            set_slots: SlotAllocator::new(capacity),
            textures: vec![placeholder; capacity as usize],
            texture_sets: vec![TextureSet::EMPTY; capacity as usize],
            bindings: HashMap::new(),
            placeholder,
            raycast_small_offset: DEFAULT_RAYCAST_SMALL_OFFSET,
            rebind_requested: true,
        }
    }

    /// Offset written into every record this table produces
    pub fn set_raycast_small_offset(&mut self, offset: f32) {
        self.raycast_small_offset = offset;
    }

    pub fn raycast_small_offset(&self) -> f32 {
        self.raycast_small_offset
    }

    /// Bind one material and return a record whose `tex0` is its set index.
    ///
    /// Adding a resource that is already bound only bumps its count.
    /// Running out of slots is fatal for the caller.
    pub fn add_active_texture(&mut self, source: &dyn ActiveTextureSource) -> Result<BlasInstanceData> {
        let set_index = self.acquire(source)?;
        let mut record = self.empty_record();
        record.tex0 = set_index as i32;
        Ok(record)
    }

    /// Bind up to [`MAX_TEXTURE_LAYERS`] materials into one record, in layer order.
    ///
    /// Either every material is bound or none is.
    pub fn add_active_textures(&mut self, sources: &[&dyn ActiveTextureSource]) -> Result<BlasInstanceData> {
        if sources.len() > MAX_TEXTURE_LAYERS {
            return Err(Error::TooManyTextureLayers(sources.len()));
        }

        let mut record = self.empty_record();
        for (layer, source) in sources.iter().enumerate() {
            match self.acquire(*source) {
                Ok(set_index) => record.set_texture_layer(layer, set_index as i32),
                Err(err) => {
                    for added in &sources[..layer] {
                        self.remove_active_texture(added.resource_id());
                    }
                    return Err(err);
                }
            }
        }
        Ok(record)
    }

    /// Drop one reference to `id`. Frees its slots at zero.
    ///
    /// Returns false if `id` is not bound; that is not an error.
    pub fn remove_active_texture(&mut self, id: ResourceId) -> bool {
        let Some(binding) = self.bindings.get_mut(&id) else {
            log::debug!("remove_active_texture: {:?} is not bound", id);
            return false;
        };

        binding.ref_count -= 1;
        if binding.ref_count > 0 {
            return true;
        }

        if let Some(binding) = self.bindings.remove(&id) {
            for slot in binding.texture_slots {
                self.textures[slot as usize] = self.placeholder;
                self.texture_slots.free(slot);
            }
            self.texture_sets[binding.set_index as usize] = TextureSet::EMPTY;
            self.set_slots.free(binding.set_index);
            self.rebind_requested = true;
            log::debug!("Freed texture set {} of {:?}", binding.set_index, id);
        }
        true
    }

    /// Consume the pending rebind request, if any.
    pub fn take_rebind_request(&mut self) -> bool {
        std::mem::take(&mut self.rebind_requested)
    }

    pub fn rebind_requested(&self) -> bool {
        self.rebind_requested
    }

    /// Texture-set index of a bound resource
    pub fn set_index(&self, id: ResourceId) -> Option<u32> {
        self.bindings.get(&id).map(|b| b.set_index)
    }

    /// Active reference count of a resource, zero if unbound
    pub fn ref_count(&self, id: ResourceId) -> u32 {
        self.bindings.get(&id).map_or(0, |b| b.ref_count)
    }

    /// The texture array as the shaders see it
    pub fn textures(&self) -> &[TextureView] {
        &self.textures
    }

    /// The texture-set buffer as the shaders see it
    pub fn texture_sets(&self) -> &[TextureSet] {
        &self.texture_sets
    }

    /// Number of bound resources
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.set_slots.capacity()
    }

    fn empty_record(&self) -> BlasInstanceData {
        BlasInstanceData {
            raycast_small_offset: self.raycast_small_offset,
            ..Default::default()
        }
    }

    fn acquire(&mut self, source: &dyn ActiveTextureSource) -> Result<u32> {
        let id = source.resource_id();
        if let Some(binding) = self.bindings.get_mut(&id) {
            binding.ref_count += 1;
            return Ok(binding.set_index);
        }

        let maps = source.texture_maps();
        if self.set_slots.available() == 0 {
            return Err(self.capacity_error(SlotKind::TextureSet));
        }
        if self.texture_slots.available() < maps.count() {
            return Err(self.capacity_error(SlotKind::Texture));
        }
        let Some(set_index) = self.set_slots.alloc() else {
            return Err(self.capacity_error(SlotKind::TextureSet));
        };

        let mut set = TextureSet::EMPTY;
        let mut texture_slots = Vec::with_capacity(maps.count() as usize);
        for (target, view) in [
            (&mut set.base_texture, maps.base_color),
            (&mut set.normal_texture, maps.normal),
            (&mut set.physical_texture, maps.physical),
            (&mut set.emissive_texture, maps.emissive),
        ] {
            let Some(view) = view else { continue };
            // Availability was checked above
            if let Some(slot) = self.texture_slots.alloc() {
                self.textures[slot as usize] = view;
                *target = slot as i32;
                texture_slots.push(slot);
            }
        }

        self.texture_sets[set_index as usize] = set;
        self.bindings.insert(
            id,
            ActiveBinding {
                ref_count: 1,
                set_index,
                texture_slots,
            },
        );
        self.rebind_requested = true;
        log::debug!("Bound {:?} to texture set {}", id, set_index);
        Ok(set_index)
    }

    fn capacity_error(&self, kind: SlotKind) -> Error {
        let capacity = self.set_slots.capacity();
        log::error!(
            "{} slot table is full ({} slots, {} bound); raise max_textures",
            kind,
            capacity,
            self.bindings.len()
        );
        Error::SlotCapacityExceeded { kind, capacity }
    }
}
