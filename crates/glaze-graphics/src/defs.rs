//! Semantic render-state vocabulary and its fixed mappings to the HAL.
//!
//! These enums are what callers speak; each has a data-table translation to
//! the descriptor types in `glaze-hal`. Keeping the mappings as plain match
//! tables (rather than anything dispatched) makes the state translation
//! auditable at a glance.

use bitflags::bitflags;
use glaze_hal as hal;

pub const MAX_VERTEX_STREAMS: usize = 4;
pub const MAX_TEXTURE_UNITS: usize = 16;
pub const MAX_RENDER_TARGETS: usize = 4;
pub const MAX_SHADER_PARAMETER_GROUPS: usize = 7;

/// Marker prefix on uniform names that should be registered as settable
/// shader parameters ("cMatDiffColor" -> "MatDiffColor").
pub const PARAMETER_MARKER: char = 'c';
/// Stage prefix on texture variable names ("tAlbedoMap" -> "AlbedoMap").
pub const TEXTURE_MARKER: char = 't';

/// High-level blend modes, expanded into full blend equations by
/// [`blend_state_desc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Replace,
    Add,
    Multiply,
    Alpha,
    AddAlpha,
    PremulAlpha,
    InvDestAlpha,
    Subtract,
    SubtractAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    Always,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// Cull mode in terms of the winding that gets culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillMode {
    Solid,
    Wireframe,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Ref,
    Incr,
    Decr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    TriangleList,
    LineList,
    PointList,
    TriangleStrip,
    LineStrip,
    TriangleFan,
}

/// Well-known constant-buffer groups, in update-frequency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderParameterGroup {
    Frame,
    Camera,
    Scene,
    Light,
    Material,
    Object,
    Custom,
}

impl ShaderParameterGroup {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Parameter group for a reflected constant-buffer name, per stage.
/// Unlisted names fall back to first-fit slot assignment in the reflection
/// adapter.
pub fn parameter_group_for_buffer(
    stage: hal::ShaderStage,
    name: &str,
) -> Option<ShaderParameterGroup> {
    use ShaderParameterGroup::*;
    match (stage, name) {
        (hal::ShaderStage::Vertex, "FrameVS") => Some(Frame),
        (hal::ShaderStage::Vertex, "CameraVS") => Some(Camera),
        (hal::ShaderStage::Vertex, "SceneVS") => Some(Scene),
        (hal::ShaderStage::Vertex, "LightVS") => Some(Light),
        (hal::ShaderStage::Vertex, "MaterialVS") => Some(Material),
        (hal::ShaderStage::Vertex, "ObjectVS") => Some(Object),
        (hal::ShaderStage::Fragment, "FramePS") => Some(Frame),
        (hal::ShaderStage::Fragment, "CameraPS") => Some(Camera),
        (hal::ShaderStage::Fragment, "ScenePS") => Some(Scene),
        (hal::ShaderStage::Fragment, "LightPS") => Some(Light),
        (hal::ShaderStage::Fragment, "MaterialPS") => Some(Material),
        _ => None,
    }
}

/// Named texture units. Several shader-visible names alias one unit (regular
/// material maps and the deferred G-buffer reuse the same slots).
pub fn texture_unit_from_name(name: &str) -> Option<usize> {
    match name {
        "AlbedoMap" | "AlbedoBuffer" => Some(TU_ALBEDO),
        "NormalMap" | "NormalBuffer" => Some(TU_NORMAL),
        "SpecMap" => Some(TU_SPECULAR),
        "EmissiveMap" => Some(TU_EMISSIVE),
        "EnvMap" => Some(TU_ENVIRONMENT),
        "VolumeMap" => Some(TU_VOLUME),
        "LightRampMap" => Some(TU_LIGHT_RAMP),
        "LightShapeMap" => Some(TU_LIGHT_SHAPE),
        "ShadowMap" => Some(TU_SHADOW),
        "DepthBuffer" => Some(TU_DEPTH_BUFFER),
        "LightBuffer" => Some(TU_LIGHT_BUFFER),
        "AmbientMap" => Some(TU_AMBIENT),
        _ => None,
    }
}

pub const TU_ALBEDO: usize = 0;
pub const TU_NORMAL: usize = 1;
pub const TU_SPECULAR: usize = 2;
pub const TU_EMISSIVE: usize = 3;
pub const TU_ENVIRONMENT: usize = 4;
pub const TU_VOLUME: usize = 5;
pub const TU_CUSTOM1: usize = 6;
pub const TU_CUSTOM2: usize = 7;
pub const TU_LIGHT_RAMP: usize = 8;
pub const TU_LIGHT_SHAPE: usize = 9;
pub const TU_SHADOW: usize = 10;
pub const TU_DEPTH_BUFFER: usize = 13;
pub const TU_LIGHT_BUFFER: usize = 14;
pub const TU_AMBIENT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexElementSemantic {
    Position,
    Normal,
    Binormal,
    Tangent,
    TexCoord,
    Color,
    BlendWeights,
    BlendIndices,
    ObjectIndex,
}

impl VertexElementSemantic {
    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "POSITION",
            Self::Normal => "NORMAL",
            Self::Binormal => "BINORMAL",
            Self::Tangent => "TANGENT",
            Self::TexCoord => "TEXCOORD",
            Self::Color => "COLOR",
            Self::BlendWeights => "BLENDWEIGHT",
            Self::BlendIndices => "BLENDINDICES",
            Self::ObjectIndex => "OBJECTINDEX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexElementType {
    Int,
    Float,
    Vector2,
    Vector3,
    Vector4,
    Ubyte4,
    Ubyte4Norm,
}

impl VertexElementType {
    pub fn size(self) -> u32 {
        match self {
            Self::Int | Self::Float | Self::Ubyte4 | Self::Ubyte4Norm => 4,
            Self::Vector2 => 8,
            Self::Vector3 => 12,
            Self::Vector4 => 16,
        }
    }

    pub fn value_type(self) -> hal::VertexValueType {
        match self {
            Self::Int => hal::VertexValueType::Int32,
            Self::Float | Self::Vector2 | Self::Vector3 | Self::Vector4 => {
                hal::VertexValueType::Float32
            }
            Self::Ubyte4 | Self::Ubyte4Norm => hal::VertexValueType::Uint8,
        }
    }

    pub fn components(self) -> u32 {
        match self {
            Self::Int | Self::Float => 1,
            Self::Vector2 => 2,
            Self::Vector3 => 3,
            Self::Vector4 | Self::Ubyte4 | Self::Ubyte4Norm => 4,
        }
    }

    pub fn normalized(self) -> bool {
        matches!(self, Self::Ubyte4Norm)
    }
}

/// One element of a vertex buffer's layout. Offsets are filled in when the
/// owning buffer computes its stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub element_type: VertexElementType,
    pub semantic: VertexElementSemantic,
    pub index: u8,
    pub per_instance: bool,
    pub offset: u32,
}

impl VertexElement {
    pub fn new(element_type: VertexElementType, semantic: VertexElementSemantic) -> Self {
        Self {
            element_type,
            semantic,
            index: 0,
            per_instance: false,
            offset: 0,
        }
    }

    pub fn with_index(mut self, index: u8) -> Self {
        self.index = index;
        self
    }

    pub fn per_instance(mut self) -> Self {
        self.per_instance = true;
        self
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Integer rectangle, left/top inclusive, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub const ZERO: Self = Self {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Normalized rectangle in [-1, 1] viewport space, used by the float scissor
/// setter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

/// Primitives contributed by a draw of `element_count` vertices or indices.
pub fn primitive_count(element_count: u32, primitive_type: PrimitiveType) -> u32 {
    match primitive_type {
        PrimitiveType::TriangleList => element_count / 3,
        PrimitiveType::LineList => element_count / 2,
        PrimitiveType::PointList => element_count,
        PrimitiveType::TriangleStrip => element_count.saturating_sub(2),
        PrimitiveType::LineStrip => element_count.saturating_sub(1),
        // Triangle fans are not supported by the target API family.
        PrimitiveType::TriangleFan => 0,
    }
}

pub fn compare_func(mode: CompareMode) -> hal::ComparisonFunc {
    match mode {
        CompareMode::Always => hal::ComparisonFunc::Always,
        CompareMode::Equal => hal::ComparisonFunc::Equal,
        CompareMode::NotEqual => hal::ComparisonFunc::NotEqual,
        CompareMode::Less => hal::ComparisonFunc::Less,
        CompareMode::LessEqual => hal::ComparisonFunc::LessEqual,
        CompareMode::Greater => hal::ComparisonFunc::Greater,
        CompareMode::GreaterEqual => hal::ComparisonFunc::GreaterEqual,
    }
}

pub fn stencil_op(op: StencilOp) -> hal::StencilOperation {
    match op {
        StencilOp::Keep => hal::StencilOperation::Keep,
        StencilOp::Zero => hal::StencilOperation::Zero,
        StencilOp::Ref => hal::StencilOperation::Replace,
        StencilOp::Incr => hal::StencilOperation::IncrementWrap,
        StencilOp::Decr => hal::StencilOperation::DecrementWrap,
    }
}

pub fn cull_mode_desc(mode: CullMode) -> hal::CullModeDesc {
    match mode {
        CullMode::None => hal::CullModeDesc::None,
        CullMode::Ccw => hal::CullModeDesc::Back,
        CullMode::Cw => hal::CullModeDesc::Front,
    }
}

pub fn fill_mode_desc(mode: FillMode) -> hal::FillModeDesc {
    match mode {
        FillMode::Solid => hal::FillModeDesc::Solid,
        // Point fill is approximated with wireframe; draw calls additionally
        // coerce the topology to a point list.
        FillMode::Wireframe | FillMode::Point => hal::FillModeDesc::Wireframe,
    }
}

pub fn primitive_topology(primitive_type: PrimitiveType) -> hal::PrimitiveTopology {
    match primitive_type {
        PrimitiveType::TriangleList | PrimitiveType::TriangleFan => {
            hal::PrimitiveTopology::TriangleList
        }
        PrimitiveType::LineList => hal::PrimitiveTopology::LineList,
        PrimitiveType::PointList => hal::PrimitiveTopology::PointList,
        PrimitiveType::TriangleStrip => hal::PrimitiveTopology::TriangleStrip,
        PrimitiveType::LineStrip => hal::PrimitiveTopology::LineStrip,
    }
}

/// Expand a blend mode plus color-write and alpha-to-coverage flags into the
/// full blend descriptor.
pub fn blend_state_desc(
    mode: BlendMode,
    color_write: bool,
    alpha_to_coverage: bool,
) -> hal::BlendStateDesc {
    use hal::{BlendFactor as F, BlendOperation as Op};
    let (enable, src, dst, op) = match mode {
        BlendMode::Replace => (false, F::One, F::Zero, Op::Add),
        BlendMode::Add => (true, F::One, F::One, Op::Add),
        BlendMode::Multiply => (true, F::DstColor, F::Zero, Op::Add),
        BlendMode::Alpha => (true, F::SrcAlpha, F::InvSrcAlpha, Op::Add),
        BlendMode::AddAlpha => (true, F::SrcAlpha, F::One, Op::Add),
        BlendMode::PremulAlpha => (true, F::One, F::InvSrcAlpha, Op::Add),
        BlendMode::InvDestAlpha => (true, F::InvDstAlpha, F::DstAlpha, Op::Add),
        BlendMode::Subtract => (true, F::One, F::One, Op::RevSubtract),
        BlendMode::SubtractAlpha => (true, F::SrcAlpha, F::One, Op::RevSubtract),
    };
    hal::BlendStateDesc {
        blend_enable: enable,
        src_blend: src,
        dst_blend: dst,
        blend_op: op,
        src_blend_alpha: src,
        dst_blend_alpha: dst,
        blend_op_alpha: op,
        color_write_mask: if color_write {
            hal::ColorMask::ALL
        } else {
            hal::ColorMask::empty()
        },
        alpha_to_coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_counts_match_topology_divisors() {
        assert_eq!(primitive_count(9, PrimitiveType::TriangleList), 3);
        assert_eq!(primitive_count(8, PrimitiveType::LineList), 4);
        assert_eq!(primitive_count(7, PrimitiveType::PointList), 7);
        assert_eq!(primitive_count(5, PrimitiveType::TriangleStrip), 3);
        assert_eq!(primitive_count(5, PrimitiveType::LineStrip), 4);
        assert_eq!(primitive_count(100, PrimitiveType::TriangleFan), 0);
        assert_eq!(primitive_count(1, PrimitiveType::TriangleStrip), 0);
    }

    #[test]
    fn replace_mode_disables_blending() {
        let desc = blend_state_desc(BlendMode::Replace, true, false);
        assert!(!desc.blend_enable);
        assert_eq!(desc.color_write_mask, hal::ColorMask::ALL);

        let desc = blend_state_desc(BlendMode::Alpha, false, false);
        assert!(desc.blend_enable);
        assert_eq!(desc.src_blend, hal::BlendFactor::SrcAlpha);
        assert_eq!(desc.dst_blend, hal::BlendFactor::InvSrcAlpha);
        assert!(desc.color_write_mask.is_empty());
    }

    #[test]
    fn cull_mode_culls_the_named_winding() {
        assert_eq!(cull_mode_desc(CullMode::None), hal::CullModeDesc::None);
        assert_eq!(cull_mode_desc(CullMode::Ccw), hal::CullModeDesc::Back);
        assert_eq!(cull_mode_desc(CullMode::Cw), hal::CullModeDesc::Front);
    }

    #[test]
    fn named_texture_units_resolve() {
        assert_eq!(texture_unit_from_name("AlbedoMap"), Some(TU_ALBEDO));
        assert_eq!(texture_unit_from_name("AlbedoBuffer"), Some(TU_ALBEDO));
        assert_eq!(texture_unit_from_name("ShadowMap"), Some(TU_SHADOW));
        assert_eq!(texture_unit_from_name("NoSuchMap"), None);
    }
}
