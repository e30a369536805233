//! Shader variations and the reflection adapter.
//!
//! A [`ShaderVariation`] wraps one compiled device shader and digests its
//! reflection metadata into the form the rest of the layer consumes: each
//! constant buffer is assigned a parameter-group slot (well-known names map
//! to their fixed group, everything else gets the first free slot in
//! ascending order), and every buffer member carrying the parameter marker
//! prefix is registered as a named, settable parameter.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glaze_hal::{self as hal, RenderDevice, ShaderHandle};
use hashbrown::HashMap;
use tracing::debug;

use crate::defs::*;
use crate::error::GraphicsError;

static NEXT_VARIATION_ID: AtomicU64 = AtomicU64::new(1);

/// One named uniform: where it lives and which group buffer owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderParameter {
    pub stage: hal::ShaderStage,
    pub name: String,
    /// Byte offset within the owning constant buffer.
    pub offset: u32,
    pub size: u32,
    /// Parameter-group slot of the owning buffer.
    pub group: usize,
}

#[derive(Debug)]
pub struct ShaderVariation {
    id: u64,
    name: String,
    stage: hal::ShaderStage,
    gpu: ShaderHandle,
    parameters: HashMap<String, ShaderParameter>,
    constant_buffer_sizes: [u32; MAX_SHADER_PARAMETER_GROUPS],
    constant_buffer_names: [Option<String>; MAX_SHADER_PARAMETER_GROUPS],
}

impl ShaderVariation {
    pub fn new(
        device: &Arc<dyn RenderDevice>,
        desc: &hal::ShaderDesc,
    ) -> Result<Rc<Self>, GraphicsError> {
        let gpu = device.create_shader(desc)?;
        let mut variation = Self {
            id: NEXT_VARIATION_ID.fetch_add(1, Ordering::Relaxed),
            name: desc.label.clone().unwrap_or_default(),
            stage: desc.stage,
            gpu,
            parameters: HashMap::new(),
            constant_buffer_sizes: [0; MAX_SHADER_PARAMETER_GROUPS],
            constant_buffer_names: Default::default(),
        };
        variation.reflect(desc.stage, &desc.reflection);
        Ok(Rc::new(variation))
    }

    /// Walk the reflected resources in their reported order. Determinism of
    /// group assignment depends only on that order, so re-creating the same
    /// shader yields the same slots.
    fn reflect(&mut self, stage: hal::ShaderStage, reflection: &hal::ShaderReflection) {
        struct ConstantResource<'a> {
            layout: Option<&'a hal::ConstantBufferLayout>,
            name: &'a str,
            group: Option<usize>,
        }

        let mut used_groups = [false; MAX_SHADER_PARAMETER_GROUPS];
        let mut resources = Vec::new();
        for resource in &reflection.resources {
            if resource.kind != hal::ShaderResourceKind::ConstantBuffer {
                continue;
            }
            let group = parameter_group_for_buffer(stage, &resource.name).map(|g| g.index());
            if let Some(group) = group {
                used_groups[group] = true;
            }
            resources.push(ConstantResource {
                layout: reflection
                    .constant_buffers
                    .iter()
                    .find(|cb| cb.name == resource.name),
                name: &resource.name,
                group,
            });
        }

        // First-fit the unmatched buffers into the remaining slots.
        let mut next_group = 0;
        for resource in &mut resources {
            if resource.group.is_some() {
                continue;
            }
            for slot in next_group..MAX_SHADER_PARAMETER_GROUPS {
                if !used_groups[slot] {
                    resource.group = Some(slot);
                    used_groups[slot] = true;
                    next_group = slot + 1;
                    break;
                }
            }
        }

        for resource in &resources {
            let Some(group) = resource.group else {
                debug!(buffer = resource.name, "no free parameter group slot");
                continue;
            };
            let Some(layout) = resource.layout else {
                debug!(buffer = resource.name, "constant buffer has no layout");
                continue;
            };
            self.constant_buffer_sizes[group] = layout.size;
            self.constant_buffer_names[group] = Some(layout.name.clone());

            for variable in &layout.variables {
                if let Some(stripped) = variable.name.strip_prefix(PARAMETER_MARKER) {
                    self.parameters.insert(
                        stripped.to_owned(),
                        ShaderParameter {
                            stage,
                            name: stripped.to_owned(),
                            offset: variable.offset,
                            size: variable.size,
                            group,
                        },
                    );
                }
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> hal::ShaderStage {
        self.stage
    }

    pub fn gpu(&self) -> &ShaderHandle {
        &self.gpu
    }

    pub fn parameters(&self) -> &HashMap<String, ShaderParameter> {
        &self.parameters
    }

    pub fn constant_buffer_size(&self, group: usize) -> u32 {
        self.constant_buffer_sizes[group]
    }

    pub fn constant_buffer_name(&self, group: usize) -> Option<&str> {
        self.constant_buffer_names[group].as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glaze_hal::backend::null::NullDevice;

    fn reflection_with_buffers(names: &[&str]) -> hal::ShaderReflection {
        hal::ShaderReflection {
            resources: names
                .iter()
                .map(|n| hal::ShaderResourceDesc {
                    name: (*n).to_owned(),
                    kind: hal::ShaderResourceKind::ConstantBuffer,
                })
                .collect(),
            constant_buffers: names
                .iter()
                .map(|n| hal::ConstantBufferLayout {
                    name: (*n).to_owned(),
                    size: 64,
                    variables: vec![
                        hal::ReflectedVariable {
                            name: format!("c{n}Param"),
                            offset: 0,
                            size: 16,
                        },
                        hal::ReflectedVariable {
                            name: "unmarked".into(),
                            offset: 16,
                            size: 16,
                        },
                    ],
                })
                .collect(),
            vertex_inputs: Vec::new(),
        }
    }

    fn make_variation(names: &[&str]) -> Rc<ShaderVariation> {
        let device: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        ShaderVariation::new(
            &device,
            &hal::ShaderDesc {
                label: Some("test".into()),
                stage: hal::ShaderStage::Vertex,
                source: String::new(),
                entry_point: "vs_main".into(),
                reflection: reflection_with_buffers(names),
            },
        )
        .unwrap()
    }

    #[test]
    fn well_known_buffers_map_to_their_groups() {
        let variation = make_variation(&["CameraVS", "ObjectVS"]);
        assert_eq!(
            variation.constant_buffer_name(ShaderParameterGroup::Camera.index()),
            Some("CameraVS")
        );
        assert_eq!(
            variation.constant_buffer_name(ShaderParameterGroup::Object.index()),
            Some("ObjectVS")
        );
        assert_eq!(
            variation.constant_buffer_size(ShaderParameterGroup::Camera.index()),
            64
        );
    }

    #[test]
    fn unknown_buffers_first_fit_free_slots() {
        // Frame (slot 0) is taken; the two unknown buffers must land in the
        // next free slots in reflection order.
        let variation = make_variation(&["FrameVS", "Goop", "Gloop"]);
        assert_eq!(variation.constant_buffer_name(0), Some("FrameVS"));
        assert_eq!(variation.constant_buffer_name(1), Some("Goop"));
        assert_eq!(variation.constant_buffer_name(2), Some("Gloop"));
    }

    #[test]
    fn group_assignment_is_deterministic_across_recreation() {
        let a = make_variation(&["Goop", "CameraVS", "Gloop"]);
        let b = make_variation(&["Goop", "CameraVS", "Gloop"]);
        for group in 0..MAX_SHADER_PARAMETER_GROUPS {
            assert_eq!(
                a.constant_buffer_name(group),
                b.constant_buffer_name(group)
            );
        }
    }

    #[test]
    fn marked_parameters_are_registered_stripped() {
        let variation = make_variation(&["MaterialVS"]);
        let parameter = variation.parameters().get("MaterialVSParam").unwrap();
        assert_eq!(parameter.group, ShaderParameterGroup::Material.index());
        assert_eq!(parameter.offset, 0);
        assert!(variation.parameters().get("unmarked").is_none());
    }
}
