//! Filesystem primitives for Convoy
//!
//! Provides normalized path handling, atomic writes and format-agnostic
//! (YAML/JSON/TOML) configuration loading used by the metadata repository
//! and settings layers.

pub mod config;
pub mod error;
pub mod io;
pub mod path;

pub use config::{ConfigFormat, ConfigStore};
pub use error::{Error, Result};
pub use path::NormalizedPath;
