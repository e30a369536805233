//! Shared fixture: a `Graphics` context over the recording null backend.
#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Arc;

use glaze_graphics::hal::backend::null::{CallLog, ContextCall, NullDevice};
use glaze_graphics::hal::{self, RenderDevice, SwapChainDesc};
use glaze_graphics::{
    Graphics, ShaderVariation, Texture2D, Texture2DDesc, TextureUsageKind, VertexBuffer,
    VertexElement, VertexElementSemantic, VertexElementType,
};

pub struct Fixture {
    pub device: Arc<NullDevice>,
    pub log: CallLog,
    pub graphics: Graphics,
}

pub fn fixture() -> Fixture {
    let device = Arc::new(NullDevice::new());
    let log = device.log();
    let context = device.create_context();
    let swap_chain = device.create_swap_chain(SwapChainDesc::default());
    let graphics = Graphics::new(
        device.clone() as Arc<dyn RenderDevice>,
        Box::new(context),
        Box::new(swap_chain),
    );
    Fixture {
        device,
        log,
        graphics,
    }
}

pub fn vs_reflection() -> hal::ShaderReflection {
    vs_reflection_sized(64)
}

/// Vertex reflection with a camera buffer of the given size.
pub fn vs_reflection_sized(camera_size: u32) -> hal::ShaderReflection {
    hal::ShaderReflection {
        resources: vec![hal::ShaderResourceDesc {
            name: "CameraVS".into(),
            kind: hal::ShaderResourceKind::ConstantBuffer,
        }],
        constant_buffers: vec![hal::ConstantBufferLayout {
            name: "CameraVS".into(),
            size: camera_size,
            variables: vec![hal::ReflectedVariable {
                name: "cViewProj".into(),
                offset: 0,
                size: 64,
            }],
        }],
        vertex_inputs: vec![
            hal::VertexInputDesc {
                semantic_name: "POSITION".into(),
                semantic_index: 0,
                location: 0,
            },
            hal::VertexInputDesc {
                semantic_name: "TEXCOORD".into(),
                semantic_index: 0,
                location: 1,
            },
        ],
    }
}

/// Fragment reflection with a material buffer and the given texture
/// variables.
pub fn fs_reflection(texture_names: &[&str]) -> hal::ShaderReflection {
    let mut resources = vec![hal::ShaderResourceDesc {
        name: "MaterialPS".into(),
        kind: hal::ShaderResourceKind::ConstantBuffer,
    }];
    for name in texture_names {
        resources.push(hal::ShaderResourceDesc {
            name: (*name).to_owned(),
            kind: hal::ShaderResourceKind::Texture,
        });
    }
    hal::ShaderReflection {
        resources,
        constant_buffers: vec![hal::ConstantBufferLayout {
            name: "MaterialPS".into(),
            size: 32,
            variables: vec![hal::ReflectedVariable {
                name: "cMatDiffColor".into(),
                offset: 0,
                size: 16,
            }],
        }],
        vertex_inputs: Vec::new(),
    }
}

pub fn make_shader(
    graphics: &Graphics,
    stage: hal::ShaderStage,
    label: &str,
    reflection: hal::ShaderReflection,
) -> Rc<ShaderVariation> {
    ShaderVariation::new(
        graphics.device(),
        &hal::ShaderDesc {
            label: Some(label.to_owned()),
            stage,
            source: String::new(),
            entry_point: match stage {
                hal::ShaderStage::Vertex => "vs_main".into(),
                hal::ShaderStage::Fragment => "fs_main".into(),
            },
            reflection,
        },
    )
    .unwrap()
}

/// Shader pair: a camera-buffer vertex shader and a material-buffer fragment
/// shader sampling `texture_names`.
pub fn shader_pair(
    graphics: &Graphics,
    texture_names: &[&str],
) -> (Rc<ShaderVariation>, Rc<ShaderVariation>) {
    (
        make_shader(graphics, hal::ShaderStage::Vertex, "test.vs", vs_reflection()),
        make_shader(
            graphics,
            hal::ShaderStage::Fragment,
            "test.fs",
            fs_reflection(texture_names),
        ),
    )
}

pub fn quad_buffer(graphics: &Graphics) -> Rc<VertexBuffer> {
    VertexBuffer::new(
        graphics.device(),
        4,
        &[
            VertexElement::new(VertexElementType::Vector3, VertexElementSemantic::Position),
            VertexElement::new(VertexElementType::Vector2, VertexElementSemantic::TexCoord),
        ],
        false,
    )
    .unwrap()
}

pub fn plain_texture(graphics: &Graphics) -> Rc<Texture2D> {
    Texture2D::new(
        graphics.device(),
        Texture2DDesc {
            width: 4,
            height: 4,
            ..Default::default()
        },
    )
    .unwrap()
}

pub fn render_target_texture(graphics: &Graphics) -> Rc<Texture2D> {
    Texture2D::new(
        graphics.device(),
        Texture2DDesc {
            width: 64,
            height: 64,
            usage: TextureUsageKind::RenderTarget,
            ..Default::default()
        },
    )
    .unwrap()
}

pub fn draw_calls(log: &CallLog) -> usize {
    log.filtered(|c| matches!(c, ContextCall::Draw(_) | ContextCall::DrawIndexed { .. }))
        .len()
}

/// Ids passed to SetPipelineState, in order.
pub fn pipeline_binds(log: &CallLog) -> Vec<u64> {
    log.calls()
        .into_iter()
        .filter_map(|c| match c {
            ContextCall::SetPipelineState(id) => Some(id),
            _ => None,
        })
        .collect()
}

/// Names of texture variables pushed into the resource binding, in order.
pub fn committed_texture_variables(log: &CallLog) -> Vec<String> {
    log.calls()
        .into_iter()
        .filter_map(|c| match c {
            ContextCall::SetShaderTexture { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}
