//! The pipeline state cache.
//!
//! Draw-time state is folded into a [`PipelineKey`]; a miss builds the
//! immutable pipeline object, binds the shared constant buffers to its
//! static variables, creates the companion resource binding and derives the
//! texture-unit map from the binding's dynamic variables. The resulting
//! triple is immutable and lives until the cache drops it, either wholesale
//! or when a contributing shader is released.

use std::rc::Rc;
use std::sync::Arc;

use glaze_hal::{
    self as hal, BindingHandle, GpuShader, PipelineHandle, PipelineState, RenderDevice,
    ShaderResourceBinding,
};
use hashbrown::HashMap;
use tracing::debug;

use crate::defs::*;
use crate::error::GraphicsError;
use crate::program::ShaderProgram;
use crate::shader::ShaderVariation;
use crate::state::{scaled_depth_bias, RenderState};
use crate::buffer::VertexBuffer;

/// Identity of one cached pipeline: everything that feeds its immutable
/// state. Two draws with equal observable state must produce equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex_shader: u64,
    pub fragment_shader: u64,
    pub blend_hash: u32,
    pub depth_hash: u32,
    pub rasterizer_hash: u32,
    pub vertex_declaration_hash: u64,
    pub primitive_type: PrimitiveType,
}

/// A texture unit wired to one dynamic shader variable.
#[derive(Debug, Clone)]
pub struct TextureMapEntry {
    pub unit: usize,
    pub stage: hal::ShaderStage,
    pub variable: String,
}

#[derive(Debug, Clone)]
pub struct CachedPipeline {
    pub pipeline: PipelineHandle,
    pub binding: BindingHandle,
    pub texture_map: Rc<Vec<TextureMapEntry>>,
}

/// Output formats and sampling of the targets a pipeline renders into.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetFormats {
    pub color: hal::TextureFormat,
    pub depth: hal::TextureFormat,
    pub sample_count: u32,
    pub depth_bits: u32,
}

/// Trailing digits of a shader variable name, used as the texture unit when
/// no named unit matches.
fn numeric_suffix(name: &str) -> Option<usize> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Map a reflected texture variable to a texture unit: strip the stage
/// marker, try the named-unit table, then fall back to a numeric suffix.
fn texture_unit_for_variable(name: &str) -> Option<usize> {
    let stripped = name.strip_prefix(TEXTURE_MARKER).unwrap_or(name);
    texture_unit_from_name(stripped)
        .or_else(|| numeric_suffix(stripped))
        .filter(|unit| *unit < MAX_TEXTURE_UNITS)
}

/// Merge the vertex elements of every bound buffer into one input layout.
/// Elements are deduplicated by semantic name + index; when a later buffer
/// redeclares a semantic, the element keeps its insertion position but its
/// buffer slot, offset and stepping follow the later declaration.
fn merge_input_layout(
    vertex_buffers: &[Option<Rc<VertexBuffer>>],
) -> Vec<hal::LayoutElement> {
    let mut layout: Vec<hal::LayoutElement> = Vec::new();
    let mut prev_count = 0;
    for (slot, buffer) in vertex_buffers.iter().enumerate() {
        let Some(buffer) = buffer else {
            continue;
        };
        for element in buffer.elements() {
            let semantic_name = element.semantic.name();
            let mut exists = false;
            for earlier in layout.iter_mut().take(prev_count) {
                if earlier.semantic_name == semantic_name
                    && earlier.semantic_index == element.index as u32
                {
                    exists = true;
                    earlier.buffer_slot = slot as u32;
                    earlier.byte_offset = element.offset;
                    earlier.buffer_stride = buffer.vertex_size() as u64;
                    earlier.frequency = if element.per_instance {
                        hal::InputFrequency::PerInstance
                    } else {
                        hal::InputFrequency::PerVertex
                    };
                    earlier.instance_step_rate = element.per_instance as u32;
                    break;
                }
            }
            if exists {
                continue;
            }
            layout.push(hal::LayoutElement {
                semantic_name,
                semantic_index: element.index as u32,
                value_type: element.element_type.value_type(),
                components: element.element_type.components(),
                normalized: element.element_type.normalized(),
                buffer_slot: slot as u32,
                byte_offset: element.offset,
                buffer_stride: buffer.vertex_size() as u64,
                frequency: if element.per_instance {
                    hal::InputFrequency::PerInstance
                } else {
                    hal::InputFrequency::PerVertex
                },
                instance_step_rate: element.per_instance as u32,
            });
        }
        prev_count = layout.len();
    }
    layout
}

#[derive(Debug)]
pub struct PipelineCache {
    device: Arc<dyn RenderDevice>,
    pipelines: HashMap<PipelineKey, CachedPipeline>,
}

impl PipelineCache {
    pub(crate) fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            pipelines: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Drop every cached pipeline that references the shader identity.
    /// Called when a shader variation is released so no cache entry can
    /// outlive its shaders.
    pub fn remove_shader(&mut self, shader_id: u64) {
        self.pipelines
            .retain(|key, _| key.vertex_shader != shader_id && key.fragment_shader != shader_id);
    }

    /// Look up or build the pipeline for `key`. Creation failures propagate;
    /// nothing is inserted on error.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn get_or_create(
        &mut self,
        key: PipelineKey,
        vs: &Rc<ShaderVariation>,
        fs: &Rc<ShaderVariation>,
        program: &ShaderProgram,
        vertex_buffers: &[Option<Rc<VertexBuffer>>],
        state: &RenderState,
        formats: &TargetFormats,
    ) -> Result<CachedPipeline, GraphicsError> {
        if let Some(cached) = self.pipelines.get(&key) {
            return Ok(cached.clone());
        }
        debug!(
            pipelines = self.pipelines.len(),
            "pipeline cache miss, building"
        );

        let input_layout = merge_input_layout(vertex_buffers);

        // Every texture-type resource is declared dynamic so draws can
        // rebind it; everything else stays static (bound once below).
        let mut variables = Vec::new();
        for (stage, shader) in [
            (hal::ShaderStage::Vertex, vs),
            (hal::ShaderStage::Fragment, fs),
        ] {
            for resource in &shader.gpu().reflection().resources {
                if resource.kind == hal::ShaderResourceKind::Texture {
                    variables.push(hal::ShaderVariableDesc {
                        stage,
                        name: resource.name.clone(),
                        kind: hal::ShaderVariableKind::Dynamic,
                    });
                }
            }
        }

        let desc = hal::GraphicsPipelineDesc {
            label: Some(format!("{}+{}", vs.name(), fs.name())),
            input_layout,
            blend: blend_state_desc(
                state.blend_mode,
                state.color_write,
                state.alpha_to_coverage,
            ),
            depth_stencil: hal::DepthStencilStateDesc {
                depth_enable: true,
                depth_write: state.depth_write,
                depth_func: compare_func(state.depth_test_mode),
                stencil_enable: state.stencil_test,
                stencil_read_mask: state.stencil_compare_mask as u8,
                stencil_write_mask: state.stencil_write_mask as u8,
                front_face: hal::StencilOpDesc {
                    fail_op: stencil_op(state.stencil_fail),
                    depth_fail_op: stencil_op(state.stencil_z_fail),
                    pass_op: stencil_op(state.stencil_pass),
                    func: compare_func(state.stencil_test_mode),
                },
                back_face: hal::StencilOpDesc {
                    fail_op: stencil_op(state.stencil_fail),
                    depth_fail_op: stencil_op(state.stencil_z_fail),
                    pass_op: stencil_op(state.stencil_pass),
                    func: compare_func(state.stencil_test_mode),
                },
            },
            rasterizer: hal::RasterizerStateDesc {
                fill_mode: fill_mode_desc(state.fill_mode),
                cull_mode: cull_mode_desc(state.cull_mode),
                front_counter_clockwise: false,
                depth_bias: scaled_depth_bias(state, formats.depth_bits),
                slope_scaled_depth_bias: state.slope_scaled_depth_bias,
                depth_clip_enable: true,
                scissor_enable: state.scissor_test,
                antialiased_lines: state.line_anti_alias,
            },
            topology: primitive_topology(key.primitive_type),
            color_formats: vec![formats.color],
            depth_format: Some(formats.depth),
            sample_count: formats.sample_count,
            variables,
            default_variable_kind: hal::ShaderVariableKind::Static,
        };

        let pipeline = self
            .device
            .create_graphics_pipeline(vs.gpu(), fs.gpu(), &desc)?;

        // Wire the shared constant buffers to the static variables by name.
        for (stage, shader) in [
            (hal::ShaderStage::Vertex, vs),
            (hal::ShaderStage::Fragment, fs),
        ] {
            for group in 0..MAX_SHADER_PARAMETER_GROUPS {
                if shader.constant_buffer_size(group) == 0 {
                    continue;
                }
                let Some(name) = shader.constant_buffer_name(group) else {
                    continue;
                };
                if let Some(buffer) = program.constant_buffer(stage, group) {
                    pipeline.set_static_variable(stage, name, buffer.gpu())?;
                }
            }
        }

        let binding = pipeline.create_resource_binding()?;

        let mut texture_map = Vec::new();
        for stage in [hal::ShaderStage::Vertex, hal::ShaderStage::Fragment] {
            for index in 0..binding.variable_count(stage) {
                let Some(name) = binding.variable_name(stage, index) else {
                    continue;
                };
                if let Some(unit) = texture_unit_for_variable(&name) {
                    texture_map.push(TextureMapEntry {
                        unit,
                        stage,
                        variable: name,
                    });
                }
            }
        }

        let cached = CachedPipeline {
            pipeline,
            binding,
            texture_map: Rc::new(texture_map),
        };
        self.pipelines.insert(key, cached.clone());
        Ok(cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{VertexElementSemantic as Semantic, VertexElementType as Type};
    use glaze_hal::backend::null::NullDevice;

    #[test]
    fn numeric_suffix_parses_trailing_digits_only() {
        assert_eq!(numeric_suffix("Tex12"), Some(12));
        assert_eq!(numeric_suffix("Tex7Extra"), Some(7));
        assert_eq!(numeric_suffix("NoDigits"), None);
    }

    #[test]
    fn texture_units_resolve_by_name_then_suffix() {
        assert_eq!(texture_unit_for_variable("tAlbedoMap"), Some(TU_ALBEDO));
        assert_eq!(texture_unit_for_variable("tShadowMap"), Some(TU_SHADOW));
        assert_eq!(texture_unit_for_variable("tTex5"), Some(5));
        // Out-of-range suffixes do not map.
        assert_eq!(texture_unit_for_variable("tTex99"), None);
        assert_eq!(texture_unit_for_variable("tMystery"), None);
    }

    #[test]
    fn merged_layout_dedups_semantics_but_keeps_insertion_order() {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let geometry = VertexBuffer::new(
            &device,
            4,
            &[
                VertexElement::new(Type::Vector3, Semantic::Position),
                VertexElement::new(Type::Vector2, Semantic::TexCoord),
            ],
            false,
        )
        .unwrap();
        let overriding = VertexBuffer::new(
            &device,
            4,
            &[
                VertexElement::new(Type::Vector2, Semantic::TexCoord),
                VertexElement::new(Type::Vector4, Semantic::Color),
            ],
            false,
        )
        .unwrap();

        let layout = merge_input_layout(&[Some(geometry), Some(overriding)]);
        let names: Vec<&str> = layout.iter().map(|e| e.semantic_name).collect();
        assert_eq!(names, vec!["POSITION", "TEXCOORD", "COLOR"]);
        // TEXCOORD moved to the later buffer's slot and offset but kept its
        // position in the layout.
        let texcoord = &layout[1];
        assert_eq!(texcoord.buffer_slot, 1);
        assert_eq!(texcoord.byte_offset, 0);
        // COLOR comes from buffer 1 at its declared offset.
        assert_eq!(layout[2].buffer_slot, 1);
        assert_eq!(layout[2].byte_offset, 8);
    }

    #[test]
    fn distinct_semantic_indices_are_not_merged() {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let uv0 = VertexBuffer::new(
            &device,
            4,
            &[VertexElement::new(Type::Vector2, Semantic::TexCoord)],
            false,
        )
        .unwrap();
        let uv1 = VertexBuffer::new(
            &device,
            4,
            &[VertexElement::new(Type::Vector2, Semantic::TexCoord).with_index(1)],
            false,
        )
        .unwrap();
        let layout = merge_input_layout(&[Some(uv0), Some(uv1)]);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].semantic_index, 0);
        assert_eq!(layout[1].semantic_index, 1);
    }
}
