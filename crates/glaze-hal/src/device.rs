//! Object traits of the explicit graphics API.
//!
//! The render-state layer above consumes these interfaces only; it never
//! names a concrete backend. Handles are `Arc`s so device objects follow
//! ordinary ownership: the last holder to drop a handle releases the object.

use std::fmt::Debug;
use std::sync::Arc;

use crate::types::*;

pub type BufferHandle = Arc<dyn GpuBuffer>;
pub type TextureHandle = Arc<dyn GpuTexture>;
pub type TextureViewHandle = Arc<dyn TextureView>;
pub type SamplerHandle = Arc<dyn GpuSampler>;
pub type ShaderHandle = Arc<dyn GpuShader>;
pub type PipelineHandle = Arc<dyn PipelineState>;
pub type BindingHandle = Arc<dyn ShaderResourceBinding>;

/// Stable identity for device objects. Assigned once at creation, never
/// reused; suitable as a map key where pointer identity is too fragile.
pub type ObjectId = u64;

pub trait GpuBuffer: Debug {
    fn id(&self) -> ObjectId;
    fn desc(&self) -> &BufferDesc;
}

pub trait TextureView: Debug {
    fn id(&self) -> ObjectId;
}

pub trait GpuTexture: Debug {
    fn id(&self) -> ObjectId;
    fn desc(&self) -> &TextureDesc;
    /// Shader-resource view over all mip levels.
    fn srv(&self) -> Option<TextureViewHandle>;
    /// Render-target view of one mip level.
    fn rtv(&self, mip_level: u32) -> Option<TextureViewHandle>;
    /// Depth-stencil view; `read_only` views permit simultaneous sampling.
    fn dsv(&self, read_only: bool) -> Option<TextureViewHandle>;
}

pub trait GpuSampler: Debug {
    fn id(&self) -> ObjectId;
}

pub trait GpuShader: Debug {
    fn id(&self) -> ObjectId;
    fn stage(&self) -> ShaderStage;
    fn reflection(&self) -> &ShaderReflection;
}

pub trait PipelineState: Debug {
    fn id(&self) -> ObjectId;
    /// Bind a constant buffer to a static variable by name. Static variables
    /// are baked into every resource binding created afterwards.
    fn set_static_variable(
        &self,
        stage: ShaderStage,
        name: &str,
        buffer: &BufferHandle,
    ) -> Result<(), DeviceError>;
    fn create_resource_binding(&self) -> Result<BindingHandle, DeviceError>;
}

pub trait ShaderResourceBinding: Debug {
    fn id(&self) -> ObjectId;
    /// Number of dynamic (per-draw rebindable) variables for a stage.
    fn variable_count(&self, stage: ShaderStage) -> u32;
    fn variable_name(&self, stage: ShaderStage, index: u32) -> Option<String>;
    /// Point a dynamic texture variable at a view/sampler pair.
    fn set_texture(
        &self,
        stage: ShaderStage,
        name: &str,
        view: &TextureViewHandle,
        sampler: &SamplerHandle,
    ) -> Result<(), DeviceError>;
}

/// One vertex stream bound to the input assembler.
#[derive(Debug, Clone)]
pub struct VertexStream {
    pub buffer: BufferHandle,
    pub offset: u64,
}

pub trait RenderDevice: Debug {
    fn create_buffer(
        &self,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> Result<BufferHandle, DeviceError>;
    fn create_texture(
        &self,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError>;
    fn create_shader(&self, desc: &ShaderDesc) -> Result<ShaderHandle, DeviceError>;
    fn create_graphics_pipeline(
        &self,
        vs: &ShaderHandle,
        fs: &ShaderHandle,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineHandle, DeviceError>;
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle, DeviceError>;
    /// Minimum alignment constant-buffer sizes are rounded up to.
    fn min_uniform_buffer_alignment(&self) -> u64;
}

/// Immediate device context. All mutation is synchronous and single-threaded;
/// calls either take effect immediately or are latched until the next draw.
pub trait DeviceContext: Debug {
    fn set_render_targets(
        &mut self,
        colors: &[Option<TextureViewHandle>],
        depth_stencil: Option<TextureViewHandle>,
    );
    fn set_viewports(&mut self, viewports: &[Viewport]);
    fn set_scissor_rects(&mut self, rects: &[ScissorRect]);
    fn set_vertex_buffers(&mut self, first_slot: u32, streams: &[Option<VertexStream>]);
    fn set_index_buffer(&mut self, buffer: Option<&BufferHandle>, offset: u64);
    fn set_pipeline_state(&mut self, pipeline: &PipelineHandle);
    fn commit_shader_resources(&mut self, binding: &BindingHandle);
    fn set_stencil_reference(&mut self, reference: u32);
    fn draw(&mut self, attribs: &DrawAttribs);
    fn draw_indexed(&mut self, attribs: &DrawIndexedAttribs);
    fn clear_render_target(&mut self, view: &TextureViewHandle, color: [f32; 4]);
    fn clear_depth_stencil(
        &mut self,
        view: &TextureViewHandle,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
    );
    fn update_buffer(
        &mut self,
        buffer: &BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn update_texture(
        &mut self,
        texture: &TextureHandle,
        mip_level: u32,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn resolve_texture(
        &mut self,
        src: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<(), DeviceError>;
    fn copy_texture(&mut self, src: &TextureHandle, dst: &TextureHandle)
        -> Result<(), DeviceError>;
    fn generate_mips(&mut self, texture: &TextureHandle) -> Result<(), DeviceError>;
    /// Submit all recorded work to the device queue.
    fn flush(&mut self);
}

pub trait SwapChain: Debug {
    fn desc(&self) -> SwapChainDesc;
    fn resize(&mut self, width: u32, height: u32);
    fn current_backbuffer_rtv(&self) -> TextureViewHandle;
    fn depth_stencil_dsv(&self) -> TextureViewHandle;
    fn present(&mut self, sync_interval: u32);
}
