//! Fixed mapping tables from the HAL vocabulary to wgpu's.
//!
//! Kept as plain data (match expressions), one function per enum, so state
//! translation stays trivially auditable and testable without a device.

use crate::types::*;

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba16Unorm => wgpu::TextureFormat::Rgba16Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth16Unorm => wgpu::TextureFormat::Depth16Unorm,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Border => wgpu::AddressMode::ClampToBorder,
    }
}

pub fn compare_function(func: ComparisonFunc) -> wgpu::CompareFunction {
    match func {
        ComparisonFunc::Never => wgpu::CompareFunction::Never,
        ComparisonFunc::Less => wgpu::CompareFunction::Less,
        ComparisonFunc::Equal => wgpu::CompareFunction::Equal,
        ComparisonFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        ComparisonFunc::Greater => wgpu::CompareFunction::Greater,
        ComparisonFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        ComparisonFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        ComparisonFunc::Always => wgpu::CompareFunction::Always,
    }
}

pub fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::InvSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::InvDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

pub fn blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
    match op {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
    }
}

pub fn color_writes(mask: ColorMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    if mask.contains(ColorMask::R) {
        writes |= wgpu::ColorWrites::RED;
    }
    if mask.contains(ColorMask::G) {
        writes |= wgpu::ColorWrites::GREEN;
    }
    if mask.contains(ColorMask::B) {
        writes |= wgpu::ColorWrites::BLUE;
    }
    if mask.contains(ColorMask::A) {
        writes |= wgpu::ColorWrites::ALPHA;
    }
    writes
}

pub fn blend_state(desc: &BlendStateDesc) -> Option<wgpu::BlendState> {
    desc.blend_enable.then(|| wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(desc.src_blend),
            dst_factor: blend_factor(desc.dst_blend),
            operation: blend_operation(desc.blend_op),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(desc.src_blend_alpha),
            dst_factor: blend_factor(desc.dst_blend_alpha),
            operation: blend_operation(desc.blend_op_alpha),
        },
    })
}

pub fn stencil_operation(op: StencilOperation) -> wgpu::StencilOperation {
    match op {
        StencilOperation::Keep => wgpu::StencilOperation::Keep,
        StencilOperation::Zero => wgpu::StencilOperation::Zero,
        StencilOperation::Replace => wgpu::StencilOperation::Replace,
        StencilOperation::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOperation::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

pub fn stencil_face(desc: &StencilOpDesc) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: compare_function(desc.func),
        fail_op: stencil_operation(desc.fail_op),
        depth_fail_op: stencil_operation(desc.depth_fail_op),
        pass_op: stencil_operation(desc.pass_op),
    }
}

pub fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

/// Strip topologies require an index format at pipeline creation.
pub fn strip_index_format(topology: PrimitiveTopology) -> Option<wgpu::IndexFormat> {
    match topology {
        PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip => {
            Some(wgpu::IndexFormat::Uint32)
        }
        _ => None,
    }
}

pub fn polygon_mode(fill: FillModeDesc, supports_line: bool) -> wgpu::PolygonMode {
    match fill {
        FillModeDesc::Solid => wgpu::PolygonMode::Fill,
        // Wireframe needs an optional feature; degrade to solid when absent.
        FillModeDesc::Wireframe if supports_line => wgpu::PolygonMode::Line,
        FillModeDesc::Wireframe => wgpu::PolygonMode::Fill,
    }
}

pub fn cull_mode(cull: CullModeDesc) -> Option<wgpu::Face> {
    match cull {
        CullModeDesc::None => None,
        CullModeDesc::Front => Some(wgpu::Face::Front),
        CullModeDesc::Back => Some(wgpu::Face::Back),
    }
}

pub fn index_format(index_type: IndexType) -> wgpu::IndexFormat {
    match index_type {
        IndexType::Uint16 => wgpu::IndexFormat::Uint16,
        IndexType::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

/// Vertex attribute format from (type, components, normalized).
pub fn vertex_format(element: &LayoutElement) -> Option<wgpu::VertexFormat> {
    match (element.value_type, element.components, element.normalized) {
        (VertexValueType::Int32, 1, false) => Some(wgpu::VertexFormat::Sint32),
        (VertexValueType::Float32, 1, false) => Some(wgpu::VertexFormat::Float32),
        (VertexValueType::Float32, 2, false) => Some(wgpu::VertexFormat::Float32x2),
        (VertexValueType::Float32, 3, false) => Some(wgpu::VertexFormat::Float32x3),
        (VertexValueType::Float32, 4, false) => Some(wgpu::VertexFormat::Float32x4),
        (VertexValueType::Uint8, 4, false) => Some(wgpu::VertexFormat::Uint8x4),
        (VertexValueType::Uint8, 4, true) => Some(wgpu::VertexFormat::Unorm8x4),
        _ => None,
    }
}

pub fn buffer_usages(desc: &BufferDesc) -> wgpu::BufferUsages {
    let mut usages = wgpu::BufferUsages::COPY_DST;
    if desc.bind.contains(BindFlags::VERTEX) {
        usages |= wgpu::BufferUsages::VERTEX;
    }
    if desc.bind.contains(BindFlags::INDEX) {
        usages |= wgpu::BufferUsages::INDEX;
    }
    if desc.bind.contains(BindFlags::UNIFORM) {
        usages |= wgpu::BufferUsages::UNIFORM;
    }
    if desc.usage == ResourceUsage::Staging {
        usages |= wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_SRC;
    }
    usages
}

pub fn texture_usages(desc: &TextureDesc) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::COPY_DST;
    if desc.usage.contains(TextureUsage::SHADER_RESOURCE) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if desc.usage.contains(TextureUsage::RENDER_TARGET) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
    }
    if desc.usage.contains(TextureUsage::DEPTH_STENCIL) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    usages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn compare_func_maps_correctly() {
        assert_eq!(
            compare_function(ComparisonFunc::LessEqual),
            wgpu::CompareFunction::LessEqual
        );
        assert_eq!(
            compare_function(ComparisonFunc::Always),
            wgpu::CompareFunction::Always
        );
    }

    #[test]
    fn blend_factor_maps_correctly() {
        assert_eq!(blend_factor(BlendFactor::SrcAlpha), wgpu::BlendFactor::SrcAlpha);
        assert_eq!(
            blend_factor(BlendFactor::InvDstAlpha),
            wgpu::BlendFactor::OneMinusDstAlpha
        );
    }

    #[test]
    fn disabled_blend_translates_to_none() {
        assert!(blend_state(&BlendStateDesc::default()).is_none());
        let enabled = BlendStateDesc {
            blend_enable: true,
            ..Default::default()
        };
        assert!(blend_state(&enabled).is_some());
    }

    #[test]
    fn color_mask_maps_per_channel() {
        let writes = color_writes(ColorMask::R | ColorMask::B);
        assert!(writes.contains(wgpu::ColorWrites::RED));
        assert!(!writes.contains(wgpu::ColorWrites::GREEN));
        assert!(writes.contains(wgpu::ColorWrites::BLUE));
        assert!(!writes.contains(wgpu::ColorWrites::ALPHA));
    }

    #[test]
    fn wireframe_degrades_without_feature() {
        assert_eq!(
            polygon_mode(FillModeDesc::Wireframe, false),
            wgpu::PolygonMode::Fill
        );
        assert_eq!(
            polygon_mode(FillModeDesc::Wireframe, true),
            wgpu::PolygonMode::Line
        );
    }

    #[test]
    fn normalized_u8_vertex_format() {
        let element = LayoutElement {
            semantic_name: "COLOR",
            semantic_index: 0,
            value_type: VertexValueType::Uint8,
            components: 4,
            normalized: true,
            buffer_slot: 0,
            byte_offset: 0,
            buffer_stride: 4,
            frequency: InputFrequency::PerVertex,
            instance_step_rate: 0,
        };
        assert_eq!(vertex_format(&element), Some(wgpu::VertexFormat::Unorm8x4));
    }
}
