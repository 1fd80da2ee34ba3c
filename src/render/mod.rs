//! Per-frame consumption of the scene registries

pub mod frame;

pub use frame::{FrameRenderer, FrameStats};
