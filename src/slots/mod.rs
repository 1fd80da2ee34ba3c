//! Shader-visible slot bookkeeping

mod active_slots;
mod allocator;

pub use active_slots::{ActiveSlotTable, ActiveTextureSource, TextureMaps, MAX_TEXTURE_LAYERS};
pub use allocator::SlotAllocator;
