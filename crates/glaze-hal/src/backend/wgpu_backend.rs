//! wgpu implementation of the device traits.
//!
//! wgpu has no persistent output-merger state: pipelines, attachments and
//! bindings only exist inside a render pass. The context therefore latches
//! everything it is told and realizes one short render pass per draw call.
//! Swap chains are offscreen texture-backed targets with RGBA8 readback;
//! presenting to an OS surface is a platform wrapper outside this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::backend::wgpu_translate as translate;
use crate::device::*;
use crate::types::*;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct ShaderEntry {
    module: wgpu::ShaderModule,
    entry_point: String,
}

#[derive(Debug)]
struct ViewEntry {
    raw: wgpu::TextureView,
    width: u32,
    height: u32,
    read_only_depth: bool,
}

#[derive(Debug)]
struct TextureEntry {
    raw: wgpu::Texture,
}

/// Binding slots derived from the pipeline's reflection at creation time.
/// Group 0 carries uniform buffers, group 1 carries texture/sampler pairs.
#[derive(Debug)]
struct PipelineMeta {
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    /// (stage, constant buffer name) -> binding index in group 0.
    uniform_bindings: Vec<(ShaderStage, String, u32)>,
    /// (stage, variable name) -> texture binding index in group 1; the
    /// companion sampler sits at index + 1.
    texture_bindings: Vec<(ShaderStage, String, u32)>,
    color_target_count: usize,
    has_depth: bool,
}

#[derive(Debug)]
struct PipelineEntry {
    raw: wgpu::RenderPipeline,
    meta: Arc<PipelineMeta>,
    static_buffers: Arc<Mutex<HashMap<(ShaderStage, String), ObjectId>>>,
}

#[derive(Debug)]
struct BindGroupCache {
    signature: Vec<ObjectId>,
    uniform_group: Arc<wgpu::BindGroup>,
    texture_group: Arc<wgpu::BindGroup>,
}

#[derive(Debug)]
struct BindingData {
    meta: Arc<PipelineMeta>,
    static_buffers: Arc<Mutex<HashMap<(ShaderStage, String), ObjectId>>>,
    textures: Mutex<HashMap<(ShaderStage, String), (ObjectId, ObjectId)>>,
    cache: Mutex<Option<BindGroupCache>>,
}

#[derive(Debug, Default)]
struct Registry {
    buffers: HashMap<ObjectId, wgpu::Buffer>,
    textures: HashMap<ObjectId, TextureEntry>,
    views: HashMap<ObjectId, ViewEntry>,
    samplers: HashMap<ObjectId, wgpu::Sampler>,
    shaders: HashMap<ObjectId, ShaderEntry>,
    pipelines: HashMap<ObjectId, PipelineEntry>,
    bindings: HashMap<ObjectId, Arc<BindingData>>,
}

#[derive(Debug)]
pub struct DeviceShared {
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: Mutex<Registry>,
    supports_line_fill: bool,
    mip_blit: Mutex<MipBlit>,
}

impl DeviceShared {
    fn register_view(
        self: &Arc<Self>,
        raw: wgpu::TextureView,
        width: u32,
        height: u32,
        read_only_depth: bool,
    ) -> TextureViewHandle {
        let id = next_id();
        self.registry.lock().unwrap().views.insert(
            id,
            ViewEntry {
                raw,
                width,
                height,
                read_only_depth,
            },
        );
        Arc::new(WgpuTextureView {
            id,
            shared: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct WgpuBuffer {
    id: ObjectId,
    desc: BufferDesc,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuBuffer {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().buffers.remove(&self.id);
    }
}

impl GpuBuffer for WgpuBuffer {
    fn id(&self) -> ObjectId {
        self.id
    }
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}

#[derive(Debug)]
pub struct WgpuTextureView {
    id: ObjectId,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuTextureView {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().views.remove(&self.id);
    }
}

impl TextureView for WgpuTextureView {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug)]
pub struct WgpuTexture {
    id: ObjectId,
    desc: TextureDesc,
    shared: Arc<DeviceShared>,
    srv: Option<TextureViewHandle>,
    dsv: Option<TextureViewHandle>,
    dsv_read_only: Option<TextureViewHandle>,
    rtvs: Mutex<HashMap<u32, TextureViewHandle>>,
}

impl Drop for WgpuTexture {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().textures.remove(&self.id);
    }
}

impl GpuTexture for WgpuTexture {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn srv(&self) -> Option<TextureViewHandle> {
        self.srv.clone()
    }

    fn rtv(&self, mip_level: u32) -> Option<TextureViewHandle> {
        if !self.desc.usage.contains(TextureUsage::RENDER_TARGET)
            || mip_level >= self.desc.mip_levels
        {
            return None;
        }
        let mut rtvs = self.rtvs.lock().unwrap();
        if let Some(view) = rtvs.get(&mip_level) {
            return Some(view.clone());
        }
        let raw = {
            let registry = self.shared.registry.lock().unwrap();
            let entry = registry.textures.get(&self.id)?;
            entry.raw.create_view(&wgpu::TextureViewDescriptor {
                label: None,
                base_mip_level: mip_level,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };
        let view = self.shared.register_view(
            raw,
            (self.desc.width >> mip_level).max(1),
            (self.desc.height >> mip_level).max(1),
            false,
        );
        rtvs.insert(mip_level, view.clone());
        Some(view)
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
pub struct WgpuSampler {
    id: ObjectId,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuSampler {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().samplers.remove(&self.id);
    }
}

impl GpuSampler for WgpuSampler {
    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Debug)]
pub struct WgpuShader {
    id: ObjectId,
    stage: ShaderStage,
    reflection: ShaderReflection,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuShader {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().shaders.remove(&self.id);
    }
}

impl GpuShader for WgpuShader {
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

#[derive(Debug)]
pub struct WgpuPipeline {
    id: ObjectId,
    meta: Arc<PipelineMeta>,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuPipeline {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().pipelines.remove(&self.id);
    }
}

impl PipelineState for WgpuPipeline {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_static_variable(
        &self,
        stage: ShaderStage,
        name: &str,
        buffer: &BufferHandle,
    ) -> Result<(), DeviceError> {
        if !self
            .meta
            .uniform_bindings
            .iter()
            .any(|(s, n, _)| *s == stage && n == name)
        {
            return Err(DeviceError::UnknownShaderVariable {
                stage,
                name: name.to_owned(),
            });
        }
        let registry = self.shared.registry.lock().unwrap();
        let entry = registry
            .pipelines
            .get(&self.id)
            .expect("pipeline registered for its own lifetime");
        entry
            .static_buffers
            .lock()
            .unwrap()
            .insert((stage, name.to_owned()), buffer.id());
        Ok(())
    }

    fn create_resource_binding(&self) -> Result<BindingHandle, DeviceError> {
        let static_buffers = {
            let registry = self.shared.registry.lock().unwrap();
            let entry = registry
                .pipelines
                .get(&self.id)
                .expect("pipeline registered for its own lifetime");
            entry.static_buffers.clone()
        };
        let data = Arc::new(BindingData {
            meta: self.meta.clone(),
            static_buffers,
            textures: Mutex::new(HashMap::new()),
            cache: Mutex::new(None),
        });
        let id = next_id();
        self.shared
            .registry
            .lock()
            .unwrap()
            .bindings
            .insert(id, data.clone());
        Ok(Arc::new(WgpuBinding {
            id,
            data,
            shared: self.shared.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct WgpuBinding {
    id: ObjectId,
    data: Arc<BindingData>,
    shared: Arc<DeviceShared>,
}

impl Drop for WgpuBinding {
    fn drop(&mut self) {
        self.shared.registry.lock().unwrap().bindings.remove(&self.id);
    }
}

impl WgpuBinding {
    fn stage_variables(&self, stage: ShaderStage) -> Vec<String> {
        self.data
            .meta
            .texture_bindings
            .iter()
            .filter(|(s, _, _)| *s == stage)
            .map(|(_, n, _)| n.clone())
            .collect()
    }
}

impl ShaderResourceBinding for WgpuBinding {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn variable_count(&self, stage: ShaderStage) -> u32 {
        self.stage_variables(stage).len() as u32
    }

    fn variable_name(&self, stage: ShaderStage, index: u32) -> Option<String> {
        self.stage_variables(stage).get(index as usize).cloned()
    }

    fn set_texture(
        &self,
        stage: ShaderStage,
        name: &str,
        view: &TextureViewHandle,
        sampler: &SamplerHandle,
    ) -> Result<(), DeviceError> {
        if !self
            .data
            .meta
            .texture_bindings
            .iter()
            .any(|(s, n, _)| *s == stage && n == name)
        {
            return Err(DeviceError::UnknownShaderVariable {
                stage,
                name: name.to_owned(),
            });
        }
        self.data
            .textures
            .lock()
            .unwrap()
            .insert((stage, name.to_owned()), (view.id(), sampler.id()));
        // Any rebind may change the bound-resource signature.
        *self.data.cache.lock().unwrap() = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MipBlit {
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    layout: Option<wgpu::BindGroupLayout>,
    sampler: Option<wgpu::Sampler>,
}

const MIP_BLIT_WGSL: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> VsOut {
    var out: VsOut;
    let x = f32(i32(vi & 1u) * 4 - 1);
    let y = f32(i32(vi >> 1u) * 4 - 1);
    out.pos = vec4<f32>(x, -y, 0.0, 1.0);
    out.uv = vec2<f32>((x + 1.0) * 0.5, (y + 1.0) * 0.5);
    return out;
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(src, src_sampler, in.uv);
}
"#;

#[derive(Debug, Clone)]
pub struct WgpuDeviceConfig {
    /// Prefer the GL backend first on Linux; some Vulkan software adapters
    /// found on CI machines crash during device creation.
    pub prefer_gl_on_linux: bool,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            prefer_gl_on_linux: true,
        }
    }
}

#[derive(Debug)]
pub struct WgpuDevice {
    shared: Arc<DeviceShared>,
}

impl WgpuDevice {
    pub async fn new_headless(config: WgpuDeviceConfig) -> Result<Self, DeviceError> {
        let backends = if config.prefer_gl_on_linux && cfg!(target_os = "linux") {
            wgpu::Backends::GL
        } else {
            wgpu::Backends::PRIMARY
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(adapter) => adapter,
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok_or(DeviceError::AdapterNotFound)?,
        };

        let mut features = wgpu::Features::empty();
        let supports_line_fill = adapter
            .features()
            .contains(wgpu::Features::POLYGON_MODE_LINE);
        if supports_line_fill {
            features |= wgpu::Features::POLYGON_MODE_LINE;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glaze wgpu device"),
                    required_features: features,
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::RequestDevice(e.to_string()))?;

        debug!(backend = ?adapter.get_info().backend, "created wgpu device");

        Ok(Self {
            shared: Arc::new(DeviceShared {
                device,
                queue,
                registry: Mutex::new(Registry::default()),
                supports_line_fill,
                mip_blit: Mutex::new(MipBlit::default()),
            }),
        })
    }

    pub fn create_context(&self) -> WgpuContext {
        WgpuContext {
            shared: self.shared.clone(),
            encoder: None,
            colors: Vec::new(),
            depth: None,
            viewport: None,
            scissor: None,
            vertex_streams: Vec::new(),
            index_buffer: None,
            pipeline: None,
            committed: None,
            stencil_reference: 0,
        }
    }

    pub fn create_swap_chain(&self, desc: SwapChainDesc) -> Result<WgpuSwapChain, DeviceError> {
        let mut swap_chain = WgpuSwapChain {
            shared: self.shared.clone(),
            desc,
            color: None,
            color_rtv: None,
            depth_dsv: None,
        };
        swap_chain.recreate()?;
        Ok(swap_chain)
    }

    fn build_uniform_layout(
        &self,
        vs: &ShaderReflection,
        fs: &ShaderReflection,
    ) -> (wgpu::BindGroupLayout, Vec<(ShaderStage, String, u32)>) {
        let mut entries = Vec::new();
        let mut bindings = Vec::new();
        let mut next = 0u32;
        for (stage, reflection, visibility) in [
            (ShaderStage::Vertex, vs, wgpu::ShaderStages::VERTEX),
            (ShaderStage::Fragment, fs, wgpu::ShaderStages::FRAGMENT),
        ] {
            for resource in &reflection.resources {
                if resource.kind != ShaderResourceKind::ConstantBuffer {
                    continue;
                }
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: next,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                });
                bindings.push((stage, resource.name.clone(), next));
                next += 1;
            }
        }
        let layout = self
            .shared
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("glaze uniforms"),
                entries: &entries,
            });
        (layout, bindings)
    }

    fn build_texture_layout(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> (wgpu::BindGroupLayout, Vec<(ShaderStage, String, u32)>) {
        let mut entries = Vec::new();
        let mut bindings = Vec::new();
        let mut next = 0u32;
        for variable in &desc.variables {
            if variable.kind != ShaderVariableKind::Dynamic {
                continue;
            }
            let visibility = match variable.stage {
                ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
                ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: next,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: next + 1,
                visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
            bindings.push((variable.stage, variable.name.clone(), next));
            next += 2;
        }
        let layout = self
            .shared
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("glaze textures"),
                entries: &entries,
            });
        (layout, bindings)
    }
}

impl RenderDevice for WgpuDevice {
    fn create_buffer(
        &self,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> Result<BufferHandle, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::InvalidDescriptor {
                kind: "buffer",
                reason: "size must be non-zero".into(),
            });
        }
        let raw = self.shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: translate::buffer_usages(desc),
            mapped_at_creation: false,
        });
        if let Some(data) = initial {
            self.shared.queue.write_buffer(&raw, 0, data);
        }
        let id = next_id();
        self.shared.registry.lock().unwrap().buffers.insert(id, raw);
        Ok(Arc::new(WgpuBuffer {
            id,
            desc: desc.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn create_texture(
        &self,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidDescriptor {
                kind: "texture",
                reason: "extent must be non-zero".into(),
            });
        }
        let format = translate::texture_format(desc.format);
        let raw = self.shared.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels,
            sample_count: desc.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: translate::texture_usages(desc),
            view_formats: &[],
        });
        if let Some(data) = initial {
            self.shared.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &raw,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.block_size()),
                    rows_per_image: Some(desc.height),
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        let is_depth = desc.format.is_depth();
        let srv = desc.usage.contains(TextureUsage::SHADER_RESOURCE).then(|| {
            self.shared.register_view(
                raw.create_view(&wgpu::TextureViewDescriptor::default()),
                desc.width,
                desc.height,
                false,
            )
        });
        let dsv = (desc.usage.contains(TextureUsage::DEPTH_STENCIL) && is_depth).then(|| {
            self.shared.register_view(
                raw.create_view(&wgpu::TextureViewDescriptor::default()),
                desc.width,
                desc.height,
                false,
            )
        });
        let dsv_read_only = (desc.usage.contains(TextureUsage::DEPTH_STENCIL) && is_depth)
            .then(|| {
                self.shared.register_view(
                    raw.create_view(&wgpu::TextureViewDescriptor::default()),
                    desc.width,
                    desc.height,
                    true,
                )
            });

        let id = next_id();
        self.shared
            .registry
            .lock()
            .unwrap()
            .textures
            .insert(id, TextureEntry { raw });
        Ok(Arc::new(WgpuTexture {
            id,
            desc: desc.clone(),
            shared: self.shared.clone(),
            srv,
            dsv,
            dsv_read_only,
            rtvs: Mutex::new(HashMap::new()),
        }))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<ShaderHandle, DeviceError> {
        let module = self
            .shared
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
        let id = next_id();
        self.shared.registry.lock().unwrap().shaders.insert(
            id,
            ShaderEntry {
                module,
                entry_point: desc.entry_point.clone(),
            },
        );
        Ok(Arc::new(WgpuShader {
            id,
            stage: desc.stage,
            reflection: desc.reflection.clone(),
            shared: self.shared.clone(),
        }))
    }

    fn create_graphics_pipeline(
        &self,
        vs: &ShaderHandle,
        fs: &ShaderHandle,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineHandle, DeviceError> {
        let (uniform_layout, uniform_bindings) =
            self.build_uniform_layout(vs.reflection(), fs.reflection());
        let (texture_layout, texture_bindings) = self.build_texture_layout(desc);

        let pipeline_layout =
            self.shared
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label.as_deref(),
                    bind_group_layouts: &[&uniform_layout, &texture_layout],
                    push_constant_ranges: &[],
                });

        // Vertex buffer layouts are positional in wgpu; emit one layout per
        // slot up to the highest slot the input layout references.
        let max_slot = desc
            .input_layout
            .iter()
            .map(|e| e.buffer_slot)
            .max()
            .map(|s| s as usize + 1)
            .unwrap_or(0);
        let mut attributes: Vec<Vec<wgpu::VertexAttribute>> = vec![Vec::new(); max_slot];
        let mut strides = vec![0u64; max_slot];
        let mut step_modes = vec![wgpu::VertexStepMode::Vertex; max_slot];
        for element in &desc.input_layout {
            let Some(format) = translate::vertex_format(element) else {
                warn!(
                    semantic = element.semantic_name,
                    "unsupported vertex element format, skipping"
                );
                continue;
            };
            let Some(input) = vs.reflection().vertex_inputs.iter().find(|input| {
                input.semantic_name.eq_ignore_ascii_case(element.semantic_name)
                    && input.semantic_index == element.semantic_index
            }) else {
                // Attribute not consumed by this vertex shader.
                continue;
            };
            let slot = element.buffer_slot as usize;
            attributes[slot].push(wgpu::VertexAttribute {
                format,
                offset: element.byte_offset as u64,
                shader_location: input.location,
            });
            strides[slot] = element.buffer_stride;
            if element.frequency == InputFrequency::PerInstance {
                step_modes[slot] = wgpu::VertexStepMode::Instance;
            }
        }
        let buffer_layouts: Vec<wgpu::VertexBufferLayout> = (0..max_slot)
            .map(|slot| wgpu::VertexBufferLayout {
                array_stride: strides[slot],
                step_mode: step_modes[slot],
                attributes: &attributes[slot],
            })
            .collect();

        let ds = &desc.depth_stencil;
        let stencil = if ds.stencil_enable {
            wgpu::StencilState {
                front: translate::stencil_face(&ds.front_face),
                back: translate::stencil_face(&ds.back_face),
                read_mask: ds.stencil_read_mask as u32,
                write_mask: ds.stencil_write_mask as u32,
            }
        } else {
            wgpu::StencilState::default()
        };
        let depth_stencil = desc.depth_format.map(|format| wgpu::DepthStencilState {
            format: translate::texture_format(format),
            depth_write_enabled: ds.depth_enable && ds.depth_write,
            depth_compare: if ds.depth_enable {
                translate::compare_function(ds.depth_func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil,
            bias: wgpu::DepthBiasState {
                constant: desc.rasterizer.depth_bias,
                slope_scale: desc.rasterizer.slope_scaled_depth_bias,
                clamp: 0.0,
            },
        });

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: translate::texture_format(*format),
                    blend: translate::blend_state(&desc.blend),
                    write_mask: translate::color_writes(desc.blend.color_write_mask),
                })
            })
            .collect();

        let registry = self.shared.registry.lock().unwrap();
        let vs_entry = registry
            .shaders
            .get(&vs.id())
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "pipeline",
                reason: "vertex shader was released".into(),
            })?;
        let fs_entry = registry
            .shaders
            .get(&fs.id())
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "pipeline",
                reason: "fragment shader was released".into(),
            })?;

        let raw = self
            .shared
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs_entry.module,
                    entry_point: &vs_entry.entry_point,
                    compilation_options: Default::default(),
                    buffers: &buffer_layouts,
                },
                primitive: wgpu::PrimitiveState {
                    topology: translate::primitive_topology(desc.topology),
                    strip_index_format: translate::strip_index_format(desc.topology),
                    front_face: if desc.rasterizer.front_counter_clockwise {
                        wgpu::FrontFace::Ccw
                    } else {
                        wgpu::FrontFace::Cw
                    },
                    cull_mode: translate::cull_mode(desc.rasterizer.cull_mode),
                    unclipped_depth: false,
                    polygon_mode: translate::polygon_mode(
                        desc.rasterizer.fill_mode,
                        self.shared.supports_line_fill,
                    ),
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count,
                    mask: !0,
                    alpha_to_coverage_enabled: desc.blend.alpha_to_coverage,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs_entry.module,
                    entry_point: &fs_entry.entry_point,
                    compilation_options: Default::default(),
                    targets: &color_targets,
                }),
                multiview: None,
            });
        drop(registry);

        let meta = Arc::new(PipelineMeta {
            uniform_layout,
            texture_layout,
            uniform_bindings,
            texture_bindings,
            color_target_count: desc.color_formats.len(),
            has_depth: desc.depth_format.is_some(),
        });
        let id = next_id();
        self.shared.registry.lock().unwrap().pipelines.insert(
            id,
            PipelineEntry {
                raw,
                meta: meta.clone(),
                static_buffers: Arc::new(Mutex::new(HashMap::new())),
            },
        );
        Ok(Arc::new(WgpuPipeline {
            id,
            meta,
            shared: self.shared.clone(),
        }))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerHandle, DeviceError> {
        let raw = self.shared.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: translate::address_mode(desc.address_u),
            address_mode_v: translate::address_mode(desc.address_v),
            address_mode_w: translate::address_mode(desc.address_w),
            mag_filter: translate::filter_mode(desc.mag_filter),
            min_filter: translate::filter_mode(desc.min_filter),
            mipmap_filter: translate::filter_mode(desc.mip_filter),
            lod_min_clamp: desc.lod_min,
            lod_max_clamp: desc.lod_max,
            compare: desc.compare.map(translate::compare_function),
            anisotropy_clamp: desc.anisotropy.max(1),
            border_color: None,
        });
        let id = next_id();
        self.shared.registry.lock().unwrap().samplers.insert(id, raw);
        Ok(Arc::new(WgpuSampler {
            id,
            shared: self.shared.clone(),
        }))
    }

    fn min_uniform_buffer_alignment(&self) -> u64 {
        self.shared
            .device
            .limits()
            .min_uniform_buffer_offset_alignment as u64
    }
}

#[derive(Debug)]
pub struct WgpuContext {
    shared: Arc<DeviceShared>,
    encoder: Option<wgpu::CommandEncoder>,
    colors: Vec<Option<ObjectId>>,
    depth: Option<ObjectId>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    vertex_streams: Vec<Option<(ObjectId, u64)>>,
    index_buffer: Option<(ObjectId, u64)>,
    pipeline: Option<ObjectId>,
    committed: Option<(Arc<wgpu::BindGroup>, Arc<wgpu::BindGroup>)>,
    stencil_reference: u32,
}

/// One latched draw, realized as its own render pass.
#[derive(Debug, Clone, Copy)]
enum SubmitCommand {
    Draw(DrawAttribs),
    DrawIndexed(DrawIndexedAttribs),
}

impl WgpuContext {
    fn ensure_encoder(&mut self) -> &mut wgpu::CommandEncoder {
        if self.encoder.is_none() {
            self.encoder = Some(self.shared.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("glaze context"),
                },
            ));
        }
        self.encoder.as_mut().unwrap()
    }

    /// Open a render pass over the latched state and issue one draw.
    fn submit(&mut self, command: SubmitCommand) {
        let Some(pipeline_id) = self.pipeline else {
            warn!("draw without a bound pipeline, skipping");
            return;
        };
        let committed = self.committed.clone();
        let viewport = self.viewport;
        let scissor = self.scissor;
        let stencil_reference = self.stencil_reference;
        let colors = self.colors.clone();
        let depth = self.depth;
        let vertex_streams = self.vertex_streams.clone();
        let index_binding = self.index_buffer;
        let encoder = {
            // Borrow dance: the encoder must outlive the pass but the registry
            // lock must be taken after the encoder exists.
            self.ensure_encoder();
            self.encoder.as_mut().unwrap()
        };

        let registry = self.shared.registry.lock().unwrap();
        let Some(pipeline) = registry.pipelines.get(&pipeline_id) else {
            warn!("bound pipeline was released, skipping draw");
            return;
        };

        let mut target_size: Option<(u32, u32)> = None;
        let mut color_attachments = Vec::new();
        for slot in 0..pipeline.meta.color_target_count {
            let view = colors
                .get(slot)
                .copied()
                .flatten()
                .and_then(|id| registry.views.get(&id));
            match view {
                Some(entry) => {
                    target_size.get_or_insert((entry.width, entry.height));
                    color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                        view: &entry.raw,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    }));
                }
                None => {
                    warn!(slot, "pipeline expects a color target that is not bound");
                    return;
                }
            }
        }

        let depth_attachment = if pipeline.meta.has_depth {
            let Some(entry) = depth.and_then(|id| registry.views.get(&id)) else {
                warn!("pipeline expects a depth target that is not bound");
                return;
            };
            target_size.get_or_insert((entry.width, entry.height));
            let ops = (!entry.read_only_depth).then_some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            });
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &entry.raw,
                depth_ops: ops,
                stencil_ops: (!entry.read_only_depth).then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            })
        } else {
            None
        };

        let Some((width, height)) = target_size else {
            warn!("draw with no attachments, skipping");
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glaze pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&pipeline.raw);
        if let Some((uniforms, textures)) = committed.as_ref() {
            pass.set_bind_group(0, uniforms, &[]);
            pass.set_bind_group(1, textures, &[]);
        }
        pass.set_stencil_reference(stencil_reference);

        let vp = viewport.unwrap_or(Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        let vx = vp.x.clamp(0.0, width as f32);
        let vy = vp.y.clamp(0.0, height as f32);
        let vw = vp.width.min(width as f32 - vx).max(1.0);
        let vh = vp.height.min(height as f32 - vy).max(1.0);
        pass.set_viewport(vx, vy, vw, vh, vp.min_depth, vp.max_depth);

        if let Some(rect) = scissor {
            let left = rect.left.clamp(0, width as i32) as u32;
            let top = rect.top.clamp(0, height as i32) as u32;
            let right = rect.right.clamp(left as i32, width as i32) as u32;
            let bottom = rect.bottom.clamp(top as i32, height as i32) as u32;
            if right > left && bottom > top {
                pass.set_scissor_rect(left, top, right - left, bottom - top);
            }
        }

        for (slot, stream) in vertex_streams.iter().enumerate() {
            if let Some((buffer_id, offset)) = stream {
                if let Some(buffer) = registry.buffers.get(buffer_id) {
                    pass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
                }
            }
        }

        match command {
            SubmitCommand::Draw(attribs) => {
                pass.draw(
                    attribs.start_vertex..attribs.start_vertex + attribs.vertex_count,
                    0..attribs.instance_count.max(1),
                );
            }
            SubmitCommand::DrawIndexed(attribs) => {
                let Some((buffer_id, offset)) = index_binding else {
                    warn!("indexed draw without an index buffer, skipping");
                    return;
                };
                let Some(buffer) = registry.buffers.get(&buffer_id) else {
                    warn!("index buffer was released, skipping draw");
                    return;
                };
                pass.set_index_buffer(
                    buffer.slice(offset..),
                    translate::index_format(attribs.index_type),
                );
                pass.draw_indexed(
                    attribs.first_index..attribs.first_index + attribs.index_count,
                    attribs.base_vertex,
                    0..attribs.instance_count.max(1),
                );
            }
        }
    }
}

impl DeviceContext for WgpuContext {
    fn set_render_targets(
        &mut self,
        colors: &[Option<TextureViewHandle>],
        depth_stencil: Option<TextureViewHandle>,
    ) {
        self.colors = colors
            .iter()
            .map(|c| c.as_ref().map(|v| v.id()))
            .collect();
        self.depth = depth_stencil.map(|v| v.id());
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.viewport = viewports.first().copied();
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        self.scissor = rects.first().copied();
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, streams: &[Option<VertexStream>]) {
        let needed = first_slot as usize + streams.len();
        if self.vertex_streams.len() < needed {
            self.vertex_streams.resize(needed, None);
        }
        for (i, stream) in streams.iter().enumerate() {
            self.vertex_streams[first_slot as usize + i] =
                stream.as_ref().map(|s| (s.buffer.id(), s.offset));
        }
    }

    fn set_index_buffer(&mut self, buffer: Option<&BufferHandle>, offset: u64) {
        self.index_buffer = buffer.map(|b| (b.id(), offset));
    }

    fn set_pipeline_state(&mut self, pipeline: &PipelineHandle) {
        self.pipeline = Some(pipeline.id());
    }

    fn commit_shader_resources(&mut self, binding: &BindingHandle) {
        let data = {
            let registry = self.shared.registry.lock().unwrap();
            let Some(data) = registry.bindings.get(&binding.id()).cloned() else {
                warn!("commit of an unknown resource binding");
                return;
            };
            data
        };

        // Signature of everything bound; rebuild groups only when it changes.
        let statics = data.static_buffers.lock().unwrap().clone();
        let textures = data.textures.lock().unwrap().clone();
        let mut signature: Vec<ObjectId> = Vec::new();
        let mut uniform_ids: Vec<(u32, ObjectId)> = Vec::new();
        for (stage, name, binding_index) in &data.meta.uniform_bindings {
            if let Some(id) = statics.get(&(*stage, name.clone())) {
                uniform_ids.push((*binding_index, *id));
                signature.push(*id);
            } else {
                signature.push(0);
            }
        }
        let mut texture_ids: Vec<(u32, ObjectId, ObjectId)> = Vec::new();
        for (stage, name, binding_index) in &data.meta.texture_bindings {
            if let Some((view, sampler)) = textures.get(&(*stage, name.clone())) {
                texture_ids.push((*binding_index, *view, *sampler));
                signature.push(*view);
                signature.push(*sampler);
            } else {
                signature.push(0);
                signature.push(0);
            }
        }

        {
            let cache = data.cache.lock().unwrap();
            if let Some(entry) = cache.as_ref() {
                if entry.signature == signature {
                    self.committed = Some((entry.uniform_group.clone(), entry.texture_group.clone()));
                    return;
                }
            }
        }

        let registry = self.shared.registry.lock().unwrap();
        let mut uniform_entries = Vec::new();
        for (binding_index, buffer_id) in &uniform_ids {
            let Some(buffer) = registry.buffers.get(buffer_id) else {
                warn!(buffer = *buffer_id, "static uniform buffer was released");
                return;
            };
            uniform_entries.push(wgpu::BindGroupEntry {
                binding: *binding_index,
                resource: buffer.as_entire_binding(),
            });
        }
        let mut texture_entries = Vec::new();
        for (binding_index, view_id, sampler_id) in &texture_ids {
            let (Some(view), Some(sampler)) = (
                registry.views.get(view_id),
                registry.samplers.get(sampler_id),
            ) else {
                warn!("bound texture or sampler was released");
                return;
            };
            texture_entries.push(wgpu::BindGroupEntry {
                binding: *binding_index,
                resource: wgpu::BindingResource::TextureView(&view.raw),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: *binding_index + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        let uniform_group = Arc::new(self.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glaze uniforms"),
            layout: &data.meta.uniform_layout,
            entries: &uniform_entries,
        }));
        let texture_group = Arc::new(self.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("glaze textures"),
            layout: &data.meta.texture_layout,
            entries: &texture_entries,
        }));
        drop(registry);

        *data.cache.lock().unwrap() = Some(BindGroupCache {
            signature,
            uniform_group: uniform_group.clone(),
            texture_group: texture_group.clone(),
        });
        self.committed = Some((uniform_group, texture_group));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.stencil_reference = reference;
    }

    fn draw(&mut self, attribs: &DrawAttribs) {
        self.submit(SubmitCommand::Draw(*attribs));
    }

    fn draw_indexed(&mut self, attribs: &DrawIndexedAttribs) {
        self.submit(SubmitCommand::DrawIndexed(*attribs));
    }

    fn clear_render_target(&mut self, view: &TextureViewHandle, color: [f32; 4]) {
        let view_id = view.id();
        self.ensure_encoder();
        let encoder = self.encoder.as_mut().unwrap();
        let registry = self.shared.registry.lock().unwrap();
        let Some(entry) = registry.views.get(&view_id) else {
            return;
        };
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glaze clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &entry.raw,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: color[0] as f64,
                        g: color[1] as f64,
                        b: color[2] as f64,
                        a: color[3] as f64,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn clear_depth_stencil(
        &mut self,
        view: &TextureViewHandle,
        flags: ClearDepthStencilFlags,
        depth: f32,
        stencil: u8,
    ) {
        let view_id = view.id();
        self.ensure_encoder();
        let encoder = self.encoder.as_mut().unwrap();
        let registry = self.shared.registry.lock().unwrap();
        let Some(entry) = registry.views.get(&view_id) else {
            return;
        };
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glaze clear depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &entry.raw,
                depth_ops: Some(wgpu::Operations {
                    load: if flags.contains(ClearDepthStencilFlags::DEPTH) {
                        wgpu::LoadOp::Clear(depth)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if flags.contains(ClearDepthStencilFlags::STENCIL) {
                        wgpu::LoadOp::Clear(stencil as u32)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
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
        let registry = self.shared.registry.lock().unwrap();
        let raw = registry
            .buffers
            .get(&buffer.id())
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "buffer update",
                reason: "buffer was released".into(),
            })?;
        self.shared.queue.write_buffer(raw, offset, data);
        Ok(())
    }

    fn update_texture(
        &mut self,
        texture: &TextureHandle,
        mip_level: u32,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let block_size = texture.desc().format.block_size();
        let expected = (region.width * region.height * block_size) as usize;
        if data.len() != expected {
            return Err(DeviceError::TextureUpdateSizeMismatch {
                mip_level,
                expected,
                actual: data.len(),
            });
        }
        let registry = self.shared.registry.lock().unwrap();
        let entry = registry
            .textures
            .get(&texture.id())
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "texture update",
                reason: "texture was released".into(),
            })?;
        self.shared.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.raw,
                mip_level,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.width * block_size),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn resolve_texture(
        &mut self,
        src: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<(), DeviceError> {
        let (src_id, dst_id) = (src.id(), dst.id());
        self.ensure_encoder();
        let encoder = self.encoder.as_mut().unwrap();
        let registry = self.shared.registry.lock().unwrap();
        let (Some(src_entry), Some(dst_entry)) =
            (registry.textures.get(&src_id), registry.textures.get(&dst_id))
        else {
            return Err(DeviceError::CreationFailed {
                kind: "resolve",
                reason: "source or destination was released".into(),
            });
        };
        let src_view = src_entry
            .raw
            .create_view(&wgpu::TextureViewDescriptor::default());
        let dst_view = dst_entry
            .raw
            .create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: 0,
                mip_level_count: Some(1),
                ..Default::default()
            });
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glaze resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &src_view,
                resolve_target: Some(&dst_view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: &TextureHandle,
        dst: &TextureHandle,
    ) -> Result<(), DeviceError> {
        let (src_id, dst_id) = (src.id(), dst.id());
        let width = src.desc().width.min(dst.desc().width);
        let height = src.desc().height.min(dst.desc().height);
        self.ensure_encoder();
        let encoder = self.encoder.as_mut().unwrap();
        let registry = self.shared.registry.lock().unwrap();
        let (Some(src_entry), Some(dst_entry)) =
            (registry.textures.get(&src_id), registry.textures.get(&dst_id))
        else {
            return Err(DeviceError::CreationFailed {
                kind: "copy",
                reason: "source or destination was released".into(),
            });
        };
        encoder.copy_texture_to_texture(
            src_entry.raw.as_image_copy(),
            dst_entry.raw.as_image_copy(),
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn generate_mips(&mut self, texture: &TextureHandle) -> Result<(), DeviceError> {
        let desc = texture.desc().clone();
        if desc.mip_levels < 2 {
            return Ok(());
        }
        let format = translate::texture_format(desc.format);
        let texture_id = texture.id();

        // Lazily build the blit pipeline for this format.
        {
            let mut blit = self.shared.mip_blit.lock().unwrap();
            if blit.layout.is_none() {
                let layout = self.shared.device.create_bind_group_layout(
                    &wgpu::BindGroupLayoutDescriptor {
                        label: Some("glaze mip blit"),
                        entries: &[
                            wgpu::BindGroupLayoutEntry {
                                binding: 0,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Texture {
                                    sample_type: wgpu::TextureSampleType::Float {
                                        filterable: true,
                                    },
                                    view_dimension: wgpu::TextureViewDimension::D2,
                                    multisampled: false,
                                },
                                count: None,
                            },
                            wgpu::BindGroupLayoutEntry {
                                binding: 1,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Sampler(
                                    wgpu::SamplerBindingType::Filtering,
                                ),
                                count: None,
                            },
                        ],
                    },
                );
                blit.sampler = Some(self.shared.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("glaze mip blit"),
                    mag_filter: wgpu::FilterMode::Linear,
                    min_filter: wgpu::FilterMode::Linear,
                    ..Default::default()
                }));
                blit.layout = Some(layout);
            }
            if !blit.pipelines.contains_key(&format) {
                let module =
                    self.shared
                        .device
                        .create_shader_module(wgpu::ShaderModuleDescriptor {
                            label: Some("glaze mip blit"),
                            source: wgpu::ShaderSource::Wgsl(MIP_BLIT_WGSL.into()),
                        });
                let layout = blit.layout.as_ref().unwrap();
                let pipeline_layout = self.shared.device.create_pipeline_layout(
                    &wgpu::PipelineLayoutDescriptor {
                        label: Some("glaze mip blit"),
                        bind_group_layouts: &[layout],
                        push_constant_ranges: &[],
                    },
                );
                let pipeline = self.shared.device.create_render_pipeline(
                    &wgpu::RenderPipelineDescriptor {
                        label: Some("glaze mip blit"),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: "vs_main",
                            compilation_options: Default::default(),
                            buffers: &[],
                        },
                        primitive: wgpu::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgpu::MultisampleState::default(),
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: "fs_main",
                            compilation_options: Default::default(),
                            targets: &[Some(wgpu::ColorTargetState {
                                format,
                                blend: None,
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                        }),
                        multiview: None,
                    },
                );
                blit.pipelines.insert(format, pipeline);
            }
        }

        self.ensure_encoder();
        let encoder = self.encoder.as_mut().unwrap();
        let blit = self.shared.mip_blit.lock().unwrap();
        let registry = self.shared.registry.lock().unwrap();
        let entry = registry
            .textures
            .get(&texture_id)
            .ok_or_else(|| DeviceError::CreationFailed {
                kind: "mip generation",
                reason: "texture was released".into(),
            })?;
        let pipeline = blit.pipelines.get(&format).unwrap();
        let sampler = blit.sampler.as_ref().unwrap();
        let layout = blit.layout.as_ref().unwrap();

        for level in 1..desc.mip_levels {
            let src_view = entry.raw.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level - 1,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let dst_view = entry.raw.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let bind_group = self.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("glaze mip blit"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("glaze mip blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.shared.queue.submit([encoder.finish()]);
        }
    }
}

#[derive(Debug)]
pub struct WgpuSwapChain {
    shared: Arc<DeviceShared>,
    desc: SwapChainDesc,
    color: Option<TextureHandle>,
    color_rtv: Option<TextureViewHandle>,
    depth_dsv: Option<TextureViewHandle>,
}

impl WgpuSwapChain {
    fn recreate(&mut self) -> Result<(), DeviceError> {
        let device = WgpuDevice {
            shared: self.shared.clone(),
        };
        let color = device.create_texture(
            &TextureDesc {
                label: Some("glaze backbuffer".into()),
                width: self.desc.width,
                height: self.desc.height,
                mip_levels: 1,
                sample_count: self.desc.sample_count,
                format: self.desc.color_format,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
            },
            None,
        )?;
        let depth = device.create_texture(
            &TextureDesc {
                label: Some("glaze depth".into()),
                width: self.desc.width,
                height: self.desc.height,
                mip_levels: 1,
                sample_count: self.desc.sample_count,
                format: self.desc.depth_format,
                usage: TextureUsage::DEPTH_STENCIL,
            },
            None,
        )?;
        self.color_rtv = color.rtv(0);
        self.depth_dsv = depth.dsv(false);
        self.color = Some(color);
        Ok(())
    }

    /// Synchronously read the backbuffer as tightly packed RGBA8 rows.
    pub fn read_back_rgba8(&self) -> Result<Vec<u8>, DeviceError> {
        let color = self.color.as_ref().ok_or_else(|| {
            DeviceError::Readback("swap chain has no backbuffer".into())
        })?;
        let bytes_per_pixel = 4u32;
        let width = self.desc.width;
        let height = self.desc.height;
        let unpadded = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let size = padded as u64 * height as u64;

        let staging = self.shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("glaze readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder =
            self.shared
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("glaze readback"),
                });
        {
            let registry = self.shared.registry.lock().unwrap();
            let entry = registry
                .textures
                .get(&color.id())
                .ok_or_else(|| DeviceError::Readback("backbuffer was released".into()))?;
            encoder.copy_texture_to_buffer(
                entry.raw.as_image_copy(),
                wgpu::ImageCopyBuffer {
                    buffer: &staging,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.shared.queue.submit([encoder.finish()]);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.shared.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| DeviceError::Readback("map_async callback dropped".into()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded * height) as usize);
        for row in 0..height {
            let start = (row * padded) as usize;
            out.extend_from_slice(&mapped[start..start + unpadded as usize]);
        }
        drop(mapped);
        staging.unmap();
        Ok(out)
    }
}

impl SwapChain for WgpuSwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.desc
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == self.desc.width && height == self.desc.height {
            return;
        }
        self.desc.width = width.max(1);
        self.desc.height = height.max(1);
        if let Err(error) = self.recreate() {
            warn!(%error, "swap chain resize failed");
        }
    }

    fn current_backbuffer_rtv(&self) -> TextureViewHandle {
        self.color_rtv
            .clone()
            .expect("swap chain owns a backbuffer view")
    }

    fn depth_stencil_dsv(&self) -> TextureViewHandle {
        self.depth_dsv
            .clone()
            .expect("swap chain owns a depth view")
    }

    fn present(&mut self, _sync_interval: u32) {
        // Offscreen swap chain; work is submitted by the context's flush.
        let _ = self.shared.device.poll(wgpu::Maintain::Poll);
    }
}
