// src/vfs/mod.rs
//! Virtual filesystem
//!
//! - **Model**: caller-owned file set and run list
//! - **MemFs**: in-memory filesystem used inside sandboxed contexts
//! - **path**: sandbox-relative path normalisation

pub mod memfs;
pub mod model;
pub mod path;

pub use memfs::MemFs;
pub use model::{FileEntry, Model};
