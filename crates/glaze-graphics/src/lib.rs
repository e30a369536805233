//! Render-state tracking and pipeline-state caching over an explicit
//! graphics API.
//!
//! The [`Graphics`] context exposes an immediate-mode surface (set blend
//! mode, bind textures and shaders, draw) and lazily folds that state into
//! the immutable pipeline objects and resource bindings of the underlying
//! device (any [`glaze_hal::RenderDevice`] implementation). Pipelines are
//! cached by the full combination of contributing state, shared constant
//! buffers are deduplicated per (stage, slot, size), and every draw commits
//! only the state that actually changed.
//!
//! The execution model is single-threaded and synchronous: one `Graphics`
//! per device context, driven from one thread, no internal locking.

pub use glaze_hal as hal;

mod buffer;
mod constant_buffer;
pub mod defs;
mod error;
mod graphics;
mod pipeline;
mod program;
mod shader;
mod state;
mod texture;

pub use buffer::{IndexBuffer, VertexBuffer};
pub use constant_buffer::ConstantBuffer;
pub use defs::{
    BlendMode, ClearFlags, CompareMode, CullMode, FillMode, IntRect, NormalizedRect,
    PrimitiveType, ShaderParameterGroup, StencilOp, VertexElement, VertexElementSemantic,
    VertexElementType, MAX_RENDER_TARGETS, MAX_SHADER_PARAMETER_GROUPS, MAX_TEXTURE_UNITS,
    MAX_VERTEX_STREAMS,
};
pub use error::GraphicsError;
pub use graphics::{FrameStats, Graphics};
pub use pipeline::{CachedPipeline, PipelineKey, TextureMapEntry};
pub use program::{ProgramParameter, ShaderProgram};
pub use shader::{ShaderParameter, ShaderVariation};
pub use texture::{RenderSurface, Texture2D, Texture2DDesc, TextureUsageKind};
