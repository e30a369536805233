//! Recording null backend.
//!
//! Creates placeholder objects and records every context call into a shared
//! log. The test suites of the layers above drive this backend to observe
//! exactly what would reach a real device, in order, without needing a GPU.
//! Descriptor validation mirrors what real backends reject (zero-sized
//! buffers, out-of-bounds updates) so error paths are exercised too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::device::*;
use crate::types::*;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One recorded context (or resource-binding) call.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextCall {
    SetRenderTargets {
        colors: Vec<Option<ObjectId>>,
        depth_stencil: Option<ObjectId>,
    },
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<ScissorRect>),
    SetVertexBuffers {
        first_slot: u32,
        streams: Vec<Option<(ObjectId, u64)>>,
    },
    SetIndexBuffer {
        buffer: Option<ObjectId>,
        offset: u64,
    },
    SetPipelineState(ObjectId),
    CommitShaderResources(ObjectId),
    SetStencilReference(u32),
    SetShaderTexture {
        stage: ShaderStage,
        name: String,
        view: ObjectId,
        sampler: ObjectId,
    },
    Draw(DrawAttribs),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
        instance_count: u32,
    },
    ClearRenderTarget {
        view: ObjectId,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: ObjectId,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
    },
    UpdateBuffer {
        buffer: ObjectId,
        offset: u64,
        len: usize,
    },
    UpdateTexture {
        texture: ObjectId,
        mip_level: u32,
    },
    ResolveTexture {
        src: ObjectId,
        dst: ObjectId,
    },
    CopyTexture {
        src: ObjectId,
        dst: ObjectId,
    },
    GenerateMips(ObjectId),
    Flush,
    Present,
}

/// Shared recording of context calls, in submission order.
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ContextCall>>>,
}

impl CallLog {
    pub fn push(&self, call: ContextCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<ContextCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Calls recorded since the log was last cleared, filtered by predicate.
    pub fn filtered(&self, mut pred: impl FnMut(&ContextCall) -> bool) -> Vec<ContextCall> {
        self.calls().into_iter().filter(|c| pred(c)).collect()
    }
}

#[derive(Debug, Default)]
pub struct CreationCounters {
    pub buffers: u64,
    pub textures: u64,
    pub shaders: u64,
    pub pipelines: u64,
    pub samplers: u64,
    pub resource_bindings: u64,
}

#[derive(Debug)]
pub struct NullBuffer {
    id: ObjectId,
    desc: BufferDesc,
}

impl GpuBuffer for NullBuffer {
    fn id(&self) -> ObjectId {
        self.id
    }
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}

#[derive(Debug)]
pub struct NullTextureView {
    id: ObjectId,
}

impl TextureView for NullTextureView {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug)]
pub struct NullTexture {
    id: ObjectId,
    desc: TextureDesc,
    srv: Option<TextureViewHandle>,
    rtv: Option<TextureViewHandle>,
    dsv: Option<TextureViewHandle>,
    dsv_read_only: Option<TextureViewHandle>,
}

impl GpuTexture for NullTexture {
    fn id(&self) -> ObjectId {
        self.id
    }
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }
    fn srv(&self) -> Option<TextureViewHandle> {
        self.srv.clone()
    }
    fn rtv(&self, _mip_level: u32) -> Option<TextureViewHandle> {
        self.rtv.clone()
    }
    fn dsv(&self, read_only: bool) -> Option<TextureViewHandle> {
        if read_only {
            self.dsv_read_only.clone()
        } else {
            self.dsv.clone()
        }
    }
}

#[derive(Debug)]
pub struct NullSampler {
    id: ObjectId,
}

impl GpuSampler for NullSampler {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug)]
pub struct NullShader {
    id: ObjectId,
    stage: ShaderStage,
    reflection: ShaderReflection,
}

impl GpuShader for NullShader {
    fn id(&self) -> ObjectId {
        self.id
    }
    fn stage(&self) -> ShaderStage {
        self.stage
    }
    fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

/// A static variable assignment baked into the pipeline.
#[derive(Debug, Clone)]
pub struct StaticBinding {
    pub stage: ShaderStage,
    pub name: String,
    pub buffer: ObjectId,
}

#[derive(Debug)]
pub struct NullPipeline {
    id: ObjectId,
    desc: GraphicsPipelineDesc,
    log: CallLog,
    static_bindings: Mutex<Vec<StaticBinding>>,
    bindings_created: AtomicU64,
}

impl NullPipeline {
    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    pub fn static_bindings(&self) -> Vec<StaticBinding> {
        self.static_bindings.lock().unwrap().clone()
    }

    pub fn bindings_created(&self) -> u64 {
        self.bindings_created.load(Ordering::Relaxed)
    }

    fn dynamic_variables(&self, stage: ShaderStage) -> Vec<String> {
        self.desc
            .variables
            .iter()
            .filter(|v| v.stage == stage && v.kind == ShaderVariableKind::Dynamic)
            .map(|v| v.name.clone())
            .collect()
    }
}

impl PipelineState for NullPipeline {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_static_variable(
        &self,
        stage: ShaderStage,
        name: &str,
        buffer: &BufferHandle,
    ) -> Result<(), DeviceError> {
        self.static_bindings.lock().unwrap().push(StaticBinding {
            stage,
            name: name.to_owned(),
            buffer: buffer.id(),
        });
        Ok(())
    }

    fn create_resource_binding(&self) -> Result<BindingHandle, DeviceError> {
        self.bindings_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(NullBinding {
            id: next_id(),
            vertex_variables: self.dynamic_variables(ShaderStage::Vertex),
            fragment_variables: self.dynamic_variables(ShaderStage::Fragment),
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct NullBinding {
    id: ObjectId,
    vertex_variables: Vec<String>,
    fragment_variables: Vec<String>,
    log: CallLog,
}

impl NullBinding {
    fn variables(&self, stage: ShaderStage) -> &[String] {
        match stage {
            ShaderStage::Vertex => &self.vertex_variables,
            ShaderStage::Fragment => &self.fragment_variables,
        }
    }
}

impl ShaderResourceBinding for NullBinding {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn variable_count(&self, stage: ShaderStage) -> u32 {
        self.variables(stage).len() as u32
    }

    fn variable_name(&self, stage: ShaderStage, index: u32) -> Option<String> {
        self.variables(stage).get(index as usize).cloned()
    }

    fn set_texture(
        &self,
        stage: ShaderStage,
        name: &str,
        view: &TextureViewHandle,
        sampler: &SamplerHandle,
    ) -> Result<(), DeviceError> {
        if !self.variables(stage).iter().any(|v| v == name) {
            return Err(DeviceError::UnknownShaderVariable {
                stage,
                name: name.to_owned(),
            });
        }
        self.log.push(ContextCall::SetShaderTexture {
            stage,
            name: name.to_owned(),
            view: view.id(),
            sampler: sampler.id(),
        });
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullDevice {
    log: CallLog,
    counters: Mutex<CreationCounters>,
    min_uniform_alignment: u64,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            counters: Mutex::new(CreationCounters::default()),
            min_uniform_alignment: 16,
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn counters(&self) -> std::sync::MutexGuard<'_, CreationCounters> {
        self.counters.lock().unwrap()
    }

    pub fn pipelines_created(&self) -> u64 {
        self.counters.lock().unwrap().pipelines
    }

    /// Context paired with this device's log.
    pub fn create_context(&self) -> NullContext {
        NullContext {
            log: self.log.clone(),
        }
    }

    pub fn create_swap_chain(&self, desc: SwapChainDesc) -> NullSwapChain {
        NullSwapChain {
            desc,
            backbuffer: Arc::new(NullTextureView { id: next_id() }),
            depth: Arc::new(NullTextureView { id: next_id() }),
            log: self.log.clone(),
        }
    }
}

impl RenderDevice for NullDevice {
    fn create_buffer(
        &self,
        desc: &BufferDesc,
        _initial: Option<&[u8]>,
    ) -> Result<BufferHandle, DeviceError> {
        if desc.size == 0 {
            error!("refusing to create zero-sized buffer");
            return Err(DeviceError::InvalidDescriptor {
                kind: "buffer",
                reason: "size must be non-zero".into(),
            });
        }
        self.counters.lock().unwrap().buffers += 1;
        Ok(Arc::new(NullBuffer {
            id: next_id(),
            desc: desc.clone(),
        }))
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        _initial: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidDescriptor {
                kind: "texture",
                reason: "extent must be non-zero".into(),
            });
        }
        self.counters.lock().unwrap().textures += 1;
        let depth = desc.format.is_depth();
        Ok(Arc::new(NullTexture {
            id: next_id(),
            desc: desc.clone(),
            srv: desc
                .usage
                .contains(TextureUsage::SHADER_RESOURCE)
                .then(|| Arc::new(NullTextureView { id: next_id() }) as TextureViewHandle),
            rtv: (desc.usage.contains(TextureUsage::RENDER_TARGET) && !depth)
                .then(|| Arc::new(NullTextureView { id: next_id() }) as TextureViewHandle),
            dsv: (desc.usage.contains(TextureUsage::DEPTH_STENCIL) && depth)
                .then(|| Arc::new(NullTextureView { id: next_id() }) as TextureViewHandle),
            dsv_read_only: (desc.usage.contains(TextureUsage::DEPTH_STENCIL) && depth)
                .then(|| Arc::new(NullTextureView { id: next_id() }) as TextureViewHandle),
        }))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<ShaderHandle, DeviceError> {
        self.counters.lock().unwrap().shaders += 1;
        Ok(Arc::new(NullShader {
            id: next_id(),
            stage: desc.stage,
            reflection: desc.reflection.clone(),
        }))
    }

    fn create_graphics_pipeline(
        &self,
        _vs: &ShaderHandle,
        _fs: &ShaderHandle,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineHandle, DeviceError> {
        self.counters.lock().unwrap().pipelines += 1;
        Ok(Arc::new(NullPipeline {
            id: next_id(),
            desc: desc.clone(),
            log: self.log.clone(),
            static_bindings: Mutex::new(Vec::new()),
            bindings_created: AtomicU64::new(0),
        }))
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<SamplerHandle, DeviceError> {
        self.counters.lock().unwrap().samplers += 1;
        Ok(Arc::new(NullSampler { id: next_id() }))
    }

    fn min_uniform_buffer_alignment(&self) -> u64 {
        self.min_uniform_alignment
    }
}

#[derive(Debug)]
pub struct NullContext {
    log: CallLog,
}

impl DeviceContext for NullContext {
    fn set_render_targets(
        &mut self,
        colors: &[Option<TextureViewHandle>],
        depth_stencil: Option<TextureViewHandle>,
    ) {
        self.log.push(ContextCall::SetRenderTargets {
            colors: colors
                .iter()
                .map(|c| c.as_ref().map(|v| v.id()))
                .collect(),
            depth_stencil: depth_stencil.map(|v| v.id()),
        });
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.log.push(ContextCall::SetViewports(viewports.to_vec()));
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        self.log.push(ContextCall::SetScissorRects(rects.to_vec()));
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, streams: &[Option<VertexStream>]) {
        self.log.push(ContextCall::SetVertexBuffers {
            first_slot,
            streams: streams
                .iter()
                .map(|s| s.as_ref().map(|s| (s.buffer.id(), s.offset)))
                .collect(),
        });
    }

    fn set_index_buffer(&mut self, buffer: Option<&BufferHandle>, offset: u64) {
        self.log.push(ContextCall::SetIndexBuffer {
            buffer: buffer.map(|b| b.id()),
            offset,
        });
    }

    fn set_pipeline_state(&mut self, pipeline: &PipelineHandle) {
        self.log.push(ContextCall::SetPipelineState(pipeline.id()));
    }

    fn commit_shader_resources(&mut self, binding: &BindingHandle) {
        self.log
            .push(ContextCall::CommitShaderResources(binding.id()));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.log.push(ContextCall::SetStencilReference(reference));
    }

    fn draw(&mut self, attribs: &DrawAttribs) {
        self.log.push(ContextCall::Draw(*attribs));
    }

    fn draw_indexed(&mut self, attribs: &DrawIndexedAttribs) {
        self.log.push(ContextCall::DrawIndexed {
            index_count: attribs.index_count,
            first_index: attribs.first_index,
            base_vertex: attribs.base_vertex,
            instance_count: attribs.instance_count,
        });
    }

    fn clear_render_target(&mut self, view: &TextureViewHandle, color: [f32; 4]) {
        self.log.push(ContextCall::ClearRenderTarget {
            view: view.id(),
            color,
        });
    }

    fn clear_depth_stencil(
        &mut self,
        view: &TextureViewHandle,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
    ) {
        self.log.push(ContextCall::ClearDepthStencil {
            view: view.id(),
            flags,
            depth,
            stencil,
        });
    }

    fn update_buffer(
        &mut self,
        buffer: &BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let end = offset + data.len() as u64;
        if end > buffer.desc().size {
            return Err(DeviceError::UpdateOutOfBounds {
                buffer_size: buffer.desc().size,
                update_end: end,
            });
        }
        self.log.push(ContextCall::UpdateBuffer {
            buffer: buffer.id(),
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn update_texture(
        &mut self,
        texture: &TextureHandle,
        mip_level: u32,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let expected =
            (region.width * region.height * texture.desc().format.block_size()) as usize;
        if data.len() != expected {
            return Err(DeviceError::TextureUpdateSizeMismatch {
                mip_level,
                expected,
                actual: data.len(),
            });
        }
        self.log.push(ContextCall::UpdateTexture {
            texture: texture.id(),
            mip_level,
        });
        Ok(())
    }

    fn resolve_texture(
        &mut self,
        src: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<(), DeviceError> {
        self.log.push(ContextCall::ResolveTexture {
            src: src.id(),
            dst: dst.id(),
        });
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<(), DeviceError> {
        self.log.push(ContextCall::CopyTexture {
            src: src.id(),
            dst: dst.id(),
        });
        Ok(())
    }

    fn generate_mips(&mut self, texture: &TextureHandle) -> Result<(), DeviceError> {
        self.log.push(ContextCall::GenerateMips(texture.id()));
        Ok(())
    }

    fn flush(&mut self) {
        self.log.push(ContextCall::Flush);
    }
}

#[derive(Debug)]
pub struct NullSwapChain {
    desc: SwapChainDesc,
    backbuffer: Arc<NullTextureView>,
    depth: Arc<NullTextureView>,
    log: CallLog,
}

impl NullSwapChain {
    pub fn backbuffer_id(&self) -> ObjectId {
        self.backbuffer.id
    }

    pub fn depth_id(&self) -> ObjectId {
        self.depth.id
    }
}

impl SwapChain for NullSwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.desc
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.desc.width = width;
        self.desc.height = height;
        self.backbuffer = Arc::new(NullTextureView { id: next_id() });
        self.depth = Arc::new(NullTextureView { id: next_id() });
    }

    fn current_backbuffer_rtv(&self) -> TextureViewHandle {
        self.backbuffer.clone()
    }

    fn depth_stencil_dsv(&self) -> TextureViewHandle {
        self.depth.clone()
    }

    fn present(&mut self, _sync_interval: u32) {
        self.log.push(ContextCall::Present);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let device = NullDevice::new();
        let err = device
            .create_buffer(&BufferDesc::default(), None)
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidDescriptor { .. }));
        assert_eq!(device.counters().buffers, 0);
    }

    #[test]
    fn out_of_bounds_update_is_rejected_and_not_recorded() {
        let device = NullDevice::new();
        let mut ctx = device.create_context();
        let buffer = device
            .create_buffer(
                &BufferDesc {
                    size: 16,
                    bind: BindFlags::VERTEX,
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert!(ctx.update_buffer(&buffer, 8, &[0u8; 16]).is_err());
        assert!(device.log().calls().is_empty());
    }

    #[test]
    fn binding_rejects_unknown_variable() {
        let device = NullDevice::new();
        let reflection = ShaderReflection::default();
        let vs = device
            .create_shader(&ShaderDesc {
                label: None,
                stage: ShaderStage::Vertex,
                source: String::new(),
                entry_point: "vs_main".into(),
                reflection: reflection.clone(),
            })
            .unwrap();
        let fs = device
            .create_shader(&ShaderDesc {
                label: None,
                stage: ShaderStage::Fragment,
                source: String::new(),
                entry_point: "fs_main".into(),
                reflection,
            })
            .unwrap();
        let pipeline = device
            .create_graphics_pipeline(
                &vs,
                &fs,
                &GraphicsPipelineDesc {
                    label: None,
                    input_layout: Vec::new(),
                    blend: BlendStateDesc::default(),
                    depth_stencil: DepthStencilStateDesc::default(),
                    rasterizer: RasterizerStateDesc::default(),
                    topology: PrimitiveTopology::TriangleList,
                    color_formats: vec![TextureFormat::Rgba8Unorm],
                    depth_format: None,
                    sample_count: 1,
                    variables: vec![ShaderVariableDesc {
                        stage: ShaderStage::Fragment,
                        name: "tAlbedoMap".into(),
                        kind: ShaderVariableKind::Dynamic,
                    }],
                    default_variable_kind: ShaderVariableKind::Static,
                },
            )
            .unwrap();
        let binding = pipeline.create_resource_binding().unwrap();
        assert_eq!(binding.variable_count(ShaderStage::Fragment), 1);
        assert_eq!(
            binding.variable_name(ShaderStage::Fragment, 0).as_deref(),
            Some("tAlbedoMap")
        );

        let texture = device
            .create_texture(&TextureDesc::default(), None)
            .unwrap();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
        let srv = texture.srv().unwrap();
        assert!(binding
            .set_texture(ShaderStage::Fragment, "tNope", &srv, &sampler)
            .is_err());
        assert!(binding
            .set_texture(ShaderStage::Fragment, "tAlbedoMap", &srv, &sampler)
            .is_ok());
    }
}
