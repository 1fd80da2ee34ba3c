//! Streaming configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Default capacity of the shader-visible texture and texture-set arrays
pub const DEFAULT_MAX_TEXTURES: u32 = 100;

/// Configuration for the streaming core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Size of the bound texture array and of the texture-set buffer
    pub max_textures: u32,
    /// Zero-count resources each pool keeps resident before releasing them
    pub pool_keep_alive: usize,
    /// Worker threads for an owned background runtime
    pub worker_threads: usize,
    /// Ray self-intersection offset written into instance records
    pub raycast_small_offset: f32,
    /// Light count compiled into the primary hit shader
    pub num_lights: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_textures: DEFAULT_MAX_TEXTURES,
            pool_keep_alive: 0,
            worker_threads: 2,
            raycast_small_offset: 0.0001,
            num_lights: 1,
        }
    }
}

impl StreamingConfig {
    /// Parse from a JSON string. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from file (sync)
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded streaming config from {}", path.display());
        Ok(config)
    }
}
