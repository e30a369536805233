//! Linked shader pairs and the shared constant-buffer cache.
//!
//! A [`ShaderProgram`] is the long-lived association between a vertex and a
//! fragment shader variation: the merged name -> parameter map plus one
//! constant buffer per used parameter group. Buffers come from
//! [`ConstantBufferCache`], which dedups by (stage, slot, size) so distinct
//! programs with a compatible group layout share one physical buffer.

use std::rc::Rc;
use std::sync::Arc;

use glaze_hal::{self as hal, RenderDevice};
use hashbrown::HashMap;

use crate::constant_buffer::ConstantBuffer;
use crate::defs::MAX_SHADER_PARAMETER_GROUPS;
use crate::error::GraphicsError;
use crate::shader::{ShaderParameter, ShaderVariation};

/// Dedup cache for constant buffers, keyed by a packed (stage, slot, size)
/// integer so different stages and slots never alias even at equal sizes.
#[derive(Debug)]
pub(crate) struct ConstantBufferCache {
    device: Arc<dyn RenderDevice>,
    buffers: HashMap<u64, Rc<ConstantBuffer>>,
}

impl ConstantBufferCache {
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            buffers: HashMap::new(),
        }
    }

    fn key(stage: hal::ShaderStage, slot: usize, size: u32) -> u64 {
        let stage_bit = match stage {
            hal::ShaderStage::Vertex => 0u64,
            hal::ShaderStage::Fragment => 1u64,
        };
        stage_bit | ((slot as u64) << 1) | ((size as u64) << 4)
    }

    pub fn get_or_create(
        &mut self,
        stage: hal::ShaderStage,
        slot: usize,
        size: u32,
    ) -> Result<Rc<ConstantBuffer>, GraphicsError> {
        let key = Self::key(stage, slot, size);
        if let Some(buffer) = self.buffers.get(&key) {
            return Ok(buffer.clone());
        }
        let buffer = ConstantBuffer::new(&self.device, size)?;
        self.buffers.insert(key, buffer.clone());
        Ok(buffer)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

/// One parameter as seen through a program: the reflected description plus
/// the physical buffer that backs its group.
#[derive(Debug, Clone)]
pub struct ProgramParameter {
    pub parameter: ShaderParameter,
    pub buffer: Rc<ConstantBuffer>,
}

#[derive(Debug)]
pub struct ShaderProgram {
    vertex_buffers: [Option<Rc<ConstantBuffer>>; MAX_SHADER_PARAMETER_GROUPS],
    fragment_buffers: [Option<Rc<ConstantBuffer>>; MAX_SHADER_PARAMETER_GROUPS],
    parameters: HashMap<String, ProgramParameter>,
}

impl ShaderProgram {
    pub(crate) fn new(
        vs: &Rc<ShaderVariation>,
        fs: &Rc<ShaderVariation>,
        cache: &mut ConstantBufferCache,
    ) -> Result<Rc<Self>, GraphicsError> {
        let mut vertex_buffers: [Option<Rc<ConstantBuffer>>; MAX_SHADER_PARAMETER_GROUPS] =
            Default::default();
        let mut fragment_buffers: [Option<Rc<ConstantBuffer>>; MAX_SHADER_PARAMETER_GROUPS] =
            Default::default();

        for group in 0..MAX_SHADER_PARAMETER_GROUPS {
            let vs_size = vs.constant_buffer_size(group);
            if vs_size > 0 {
                vertex_buffers[group] =
                    Some(cache.get_or_create(hal::ShaderStage::Vertex, group, vs_size)?);
            }
            let fs_size = fs.constant_buffer_size(group);
            if fs_size > 0 {
                fragment_buffers[group] =
                    Some(cache.get_or_create(hal::ShaderStage::Fragment, group, fs_size)?);
            }
        }

        let mut parameters = HashMap::new();
        for (name, parameter) in vs.parameters() {
            if let Some(buffer) = &vertex_buffers[parameter.group] {
                parameters.insert(
                    name.clone(),
                    ProgramParameter {
                        parameter: parameter.clone(),
                        buffer: buffer.clone(),
                    },
                );
            }
        }
        // Fragment-stage parameters win on a name collision, matching the
        // order the original linked them in.
        for (name, parameter) in fs.parameters() {
            if let Some(buffer) = &fragment_buffers[parameter.group] {
                parameters.insert(
                    name.clone(),
                    ProgramParameter {
                        parameter: parameter.clone(),
                        buffer: buffer.clone(),
                    },
                );
            }
        }

        Ok(Rc::new(Self {
            vertex_buffers,
            fragment_buffers,
            parameters,
        }))
    }

    pub fn parameter(&self, name: &str) -> Option<&ProgramParameter> {
        self.parameters.get(name)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub(crate) fn constant_buffer(
        &self,
        stage: hal::ShaderStage,
        group: usize,
    ) -> Option<&Rc<ConstantBuffer>> {
        match stage {
            hal::ShaderStage::Vertex => self.vertex_buffers[group].as_ref(),
            hal::ShaderStage::Fragment => self.fragment_buffers[group].as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glaze_hal::backend::null::NullDevice;

    fn device() -> Arc<dyn RenderDevice> {
        Arc::new(NullDevice::new())
    }

    #[test]
    fn same_triple_returns_same_buffer() {
        let mut cache = ConstantBufferCache::new(device());
        let a = cache
            .get_or_create(hal::ShaderStage::Vertex, 1, 64)
            .unwrap();
        let b = cache
            .get_or_create(hal::ShaderStage::Vertex, 1, 64)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stage_slot_and_size_all_separate_buffers() {
        let mut cache = ConstantBufferCache::new(device());
        let base = cache
            .get_or_create(hal::ShaderStage::Vertex, 1, 64)
            .unwrap();
        let other_stage = cache
            .get_or_create(hal::ShaderStage::Fragment, 1, 64)
            .unwrap();
        let other_slot = cache
            .get_or_create(hal::ShaderStage::Vertex, 2, 64)
            .unwrap();
        let other_size = cache
            .get_or_create(hal::ShaderStage::Vertex, 1, 128)
            .unwrap();
        assert!(!Rc::ptr_eq(&base, &other_stage));
        assert!(!Rc::ptr_eq(&base, &other_slot));
        assert!(!Rc::ptr_eq(&base, &other_size));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn zero_size_request_fails_without_creation() {
        let null = Arc::new(NullDevice::new());
        let mut cache = ConstantBufferCache::new(null.clone() as Arc<dyn RenderDevice>);
        assert!(cache
            .get_or_create(hal::ShaderStage::Vertex, 0, 0)
            .is_err());
        assert_eq!(null.counters().buffers, 0);
        assert_eq!(cache.len(), 0);
    }
}
