//! Error types for the streaming core

use std::fmt;

use thiserror::Error;

use crate::core::id::ObjectId;
use crate::gpu::DeviceError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the streaming core
#[derive(Debug, Error)]
pub enum Error {
    #[error("Resource load error: {0}")]
    ResourceLoad(#[from] ResourceError),

    #[error("{kind} slot table is full ({capacity} slots)")]
    SlotCapacityExceeded { kind: SlotKind, capacity: u32 },

    #[error("A record can reference at most 4 texture sets, got {0}")]
    TooManyTextureLayers(usize),

    #[error("Instance '{0}' is already registered for TLAS build")]
    DuplicateInstance(String),

    #[error("Instance '{0}' is not registered for TLAS build")]
    UnknownInstance(String),

    #[error("A shader table binder is already registered for '{0}'")]
    DuplicateBinder(String),

    #[error("No shader table binder is registered for '{0}'")]
    UnknownBinder(String),

    #[error("Instance '{0}' has no bottom level acceleration structure")]
    MissingBlas(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Load payload for {0} has the wrong type")]
    PayloadMismatch(ObjectId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Fatal errors stop the update loop instead of only aborting one object.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SlotCapacityExceeded { .. } | Error::PayloadMismatch(_)
        )
    }
}

/// Which shader-visible array ran out of slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Texture,
    TextureSet,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Texture => write!(f, "Texture"),
            SlotKind::TextureSet => write!(f, "Texture set"),
        }
    }
}

/// Failure to construct a pooled resource.
///
/// Cloneable because one failed construction is reported to every checkout
/// that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("could not create '{description}': {message}")]
pub struct ResourceError {
    pub description: String,
    pub message: String,
}

impl ResourceError {
    pub fn new(description: impl fmt::Debug, message: impl Into<String>) -> Self {
        Self {
            description: format!("{description:?}"),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_is_fatal() {
        let err = Error::SlotCapacityExceeded {
            kind: SlotKind::Texture,
            capacity: 4,
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Texture slot table is full (4 slots)");
    }

    #[test]
    fn test_resource_error_is_not_fatal() {
        let err: Error = ResourceError::new("stone.png", "file not found").into();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("\"stone.png\""));
    }
}
