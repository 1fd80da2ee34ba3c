//! Core types and utilities

pub mod config;
pub mod error;
pub mod id;
pub mod logging;

pub use config::StreamingConfig;
pub use error::{Error, Result};
