//! rtstream - lifetime management for GPU resources streamed into a ray-traced scene
//!
//! Scene objects load their textures, shader variants and acceleration
//! structures in the background and publish themselves into the per-frame
//! registries only once everything is ready. Destroying an object while it
//! loads, or sharing one resource between many objects, never leaves the
//! renderer with a dangling reference.

pub mod core;
pub mod gpu;
pub mod objects;
pub mod pool;
pub mod registry;
pub mod render;
pub mod resources;
pub mod slots;
pub mod stream;
