//! Device backends.

pub mod null;
pub mod wgpu_backend;
pub mod wgpu_translate;
