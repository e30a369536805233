//! Descriptors and enumerations of the explicit graphics API surface.
//!
//! These are "semantic" types (not any particular native API's constants) so
//! that the render-state layer above stays backend-independent. Each backend
//! translates them to its own vocabulary.

use bitflags::bitflags;
use thiserror::Error;

/// Texture formats supported across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    R32Float,
    Rg16Float,
    Rg32Float,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    /// Bytes per pixel for uncompressed color formats; depth formats report
    /// their nominal storage size.
    pub fn block_size(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float | Self::Depth16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::R32Float
            | Self::Rg16Float
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rg32Float | Self::Rgba16Unorm | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Number of depth bits, used for constant depth-bias quantization.
    pub fn depth_bits(self) -> u32 {
        match self {
            Self::Depth16Unorm => 16,
            Self::Depth24PlusStencil8 => 24,
            Self::Depth32Float => 24,
            _ => 0,
        }
    }
}

/// How buffer/texture storage is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceUsage {
    /// Device-local, updated rarely via full uploads.
    #[default]
    Default,
    /// Updated from the CPU every frame or more.
    Dynamic,
    /// CPU-readable staging storage.
    Staging,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BindFlags: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextureUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
    }
}

#[derive(Debug, Clone, Default)]
pub struct BufferDesc {
    pub label: Option<String>,
    pub size: u64,
    pub usage: ResourceUsage,
    pub bind: BindFlags,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            sample_count: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SHADER_RESOURCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// Comparison function used for depth/stencil tests and comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub label: Option<String>,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub anisotropy: u16,
    pub compare: Option<ComparisonFunc>,
    pub lod_min: f32,
    pub lod_max: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            anisotropy: 1,
            compare: None,
            lod_min: 0.0,
            lod_max: 32.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Kinds of resources a shader declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderResourceKind {
    ConstantBuffer,
    Texture,
    Sampler,
}

/// One resource slot reported by shader reflection.
#[derive(Debug, Clone)]
pub struct ShaderResourceDesc {
    pub name: String,
    pub kind: ShaderResourceKind,
}

/// One scalar/vector member of a reflected constant buffer.
#[derive(Debug, Clone)]
pub struct ReflectedVariable {
    pub name: String,
    /// Byte offset within the owning constant buffer.
    pub offset: u32,
    pub size: u32,
}

/// Layout of one reflected constant buffer.
#[derive(Debug, Clone)]
pub struct ConstantBufferLayout {
    pub name: String,
    pub size: u32,
    pub variables: Vec<ReflectedVariable>,
}

/// A vertex input attribute expected by a vertex shader.
#[derive(Debug, Clone)]
pub struct VertexInputDesc {
    pub semantic_name: String,
    pub semantic_index: u32,
    /// Numeric attribute location for backends without semantic matching.
    pub location: u32,
}

/// Reflection metadata for one compiled shader.
///
/// The shader-compilation collaborator produces this alongside the bytecode
/// (`compile(source, defines) -> bytecode + reflection`); devices store it
/// verbatim and serve it back through [`crate::GpuShader::reflection`].
#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub resources: Vec<ShaderResourceDesc>,
    pub constant_buffers: Vec<ConstantBufferLayout>,
    pub vertex_inputs: Vec<VertexInputDesc>,
}

#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub label: Option<String>,
    pub stage: ShaderStage,
    /// Backend-native shader text (WGSL for the wgpu backend). Ignored by the
    /// null backend.
    pub source: String,
    pub entry_point: String,
    pub reflection: ShaderReflection,
}

/// Primitive topology at the pipeline level. Strip cut values and fans are
/// the concern of the layer above; this is what devices accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexValueType {
    Int32,
    Float32,
    Uint8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFrequency {
    PerVertex,
    PerInstance,
}

/// One attribute of a pipeline's vertex input layout, identified by HLSL-style
/// semantic name + index. Backends that address attributes numerically resolve
/// the location through the vertex shader's reflected inputs.
#[derive(Debug, Clone)]
pub struct LayoutElement {
    pub semantic_name: &'static str,
    pub semantic_index: u32,
    pub value_type: VertexValueType,
    pub components: u32,
    pub normalized: bool,
    pub buffer_slot: u32,
    pub byte_offset: u32,
    pub buffer_stride: u64,
    pub frequency: InputFrequency,
    pub instance_step_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    SrcAlpha,
    DstColor,
    DstAlpha,
    InvSrcAlpha,
    InvDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOperation {
    Add,
    RevSubtract,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ColorMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const ALL = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BlendStateDesc {
    pub blend_enable: bool,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
    pub blend_op: BlendOperation,
    pub src_blend_alpha: BlendFactor,
    pub dst_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOperation,
    pub color_write_mask: ColorMask,
    pub alpha_to_coverage: bool,
}

impl Default for BlendStateDesc {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_blend: BlendFactor::One,
            dst_blend: BlendFactor::Zero,
            blend_op: BlendOperation::Add,
            src_blend_alpha: BlendFactor::One,
            dst_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOperation::Add,
            color_write_mask: ColorMask::ALL,
            alpha_to_coverage: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy)]
pub struct StencilOpDesc {
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub func: ComparisonFunc,
}

impl Default for StencilOpDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilStateDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilOpDesc,
    pub back_face: StencilOpDesc,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write: true,
            depth_func: ComparisonFunc::LessEqual,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front_face: StencilOpDesc::default(),
            back_face: StencilOpDesc::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillModeDesc {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullModeDesc {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizerStateDesc {
    pub fill_mode: FillModeDesc,
    pub cull_mode: CullModeDesc,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub antialiased_lines: bool,
}

impl Default for RasterizerStateDesc {
    fn default() -> Self {
        Self {
            fill_mode: FillModeDesc::Solid,
            cull_mode: CullModeDesc::None,
            front_counter_clockwise: false,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
            antialiased_lines: false,
        }
    }
}

/// Whether a declared shader variable can be rebound per draw or is fixed at
/// resource-binding creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderVariableKind {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct ShaderVariableDesc {
    pub stage: ShaderStage,
    pub name: String,
    pub kind: ShaderVariableKind,
}

/// Full description of an immutable graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub label: Option<String>,
    pub input_layout: Vec<LayoutElement>,
    pub blend: BlendStateDesc,
    pub depth_stencil: DepthStencilStateDesc,
    pub rasterizer: RasterizerStateDesc,
    pub topology: PrimitiveTopology,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
    pub variables: Vec<ShaderVariableDesc>,
    pub default_variable_kind: ShaderVariableKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Uint16,
    Uint32,
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawAttribs {
    pub vertex_count: u32,
    pub start_vertex: u32,
    pub instance_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexedAttribs {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub instance_count: u32,
    pub index_type: IndexType,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearDepthStencilFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
    }
}

/// Region of a texture subresource targeted by an update.
#[derive(Debug, Clone, Copy)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub sample_count: u32,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            color_format: TextureFormat::Rgba8Unorm,
            depth_format: TextureFormat::Depth24PlusStencil8,
            sample_count: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no suitable graphics adapter found")]
    AdapterNotFound,
    #[error("device request failed: {0}")]
    RequestDevice(String),
    #[error("invalid {kind} descriptor: {reason}")]
    InvalidDescriptor { kind: &'static str, reason: String },
    #[error("{kind} creation failed: {reason}")]
    CreationFailed { kind: &'static str, reason: String },
    #[error("buffer update out of bounds (buffer size {buffer_size}, update end {update_end})")]
    UpdateOutOfBounds { buffer_size: u64, update_end: u64 },
    #[error("texture update for mip {mip_level} expects {expected} bytes but got {actual}")]
    TextureUpdateSizeMismatch {
        mip_level: u32,
        expected: usize,
        actual: usize,
    },
    #[error("unknown shader variable {stage:?}/{name}")]
    UnknownShaderVariable { stage: ShaderStage, name: String },
    #[error("readback failed: {0}")]
    Readback(String),
}
