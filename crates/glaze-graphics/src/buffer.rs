//! Vertex and index buffer objects.
//!
//! Element layouts are fixed at creation; data updates validate their range
//! before anything reaches the device. Each vertex buffer contributes a
//! per-slot hash to the combined vertex-declaration hash: the element hash
//! rotated by the stream slot, so the same buffer bound to a different slot
//! hashes differently.

use std::rc::Rc;
use std::sync::Arc;

use glaze_hal::{
    BindFlags, BufferDesc, BufferHandle, DeviceContext, IndexType, RenderDevice, ResourceUsage,
};
use tracing::error;
use xxhash_rust::xxh3::Xxh3;

use crate::defs::VertexElement;
use crate::error::GraphicsError;

fn element_hash(elements: &[VertexElement]) -> u64 {
    let mut hasher = Xxh3::new();
    for element in elements {
        hasher.update(&[
            element.element_type as u8,
            element.semantic as u8,
            element.index,
            element.per_instance as u8,
        ]);
        hasher.update(&element.offset.to_le_bytes());
    }
    hasher.digest()
}

#[derive(Debug)]
pub struct VertexBuffer {
    gpu: BufferHandle,
    vertex_count: u32,
    vertex_size: u32,
    elements: Vec<VertexElement>,
    element_hash: u64,
    dynamic: bool,
}

impl VertexBuffer {
    pub fn new(
        device: &Arc<dyn RenderDevice>,
        vertex_count: u32,
        elements: &[VertexElement],
        dynamic: bool,
    ) -> Result<Rc<Self>, GraphicsError> {
        if vertex_count == 0 || elements.is_empty() {
            error!("vertex buffer must have a non-zero size and at least one element");
            return Err(GraphicsError::Device(
                glaze_hal::DeviceError::InvalidDescriptor {
                    kind: "vertex buffer",
                    reason: "zero vertices or empty element list".into(),
                },
            ));
        }

        // Assign packed offsets in declaration order.
        let mut elements = elements.to_vec();
        let mut offset = 0u32;
        for element in &mut elements {
            element.offset = offset;
            offset += element.element_type.size();
        }
        let vertex_size = offset;

        let gpu = device.create_buffer(
            &BufferDesc {
                label: Some("vertex buffer".into()),
                size: vertex_count as u64 * vertex_size as u64,
                usage: if dynamic {
                    ResourceUsage::Dynamic
                } else {
                    ResourceUsage::Default
                },
                bind: BindFlags::VERTEX,
            },
            None,
        )?;

        let element_hash = element_hash(&elements);
        Ok(Rc::new(Self {
            gpu,
            vertex_count,
            vertex_size,
            elements,
            element_hash,
            dynamic,
        }))
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn vertex_size(&self) -> u32 {
        self.vertex_size
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn has_instance_data(&self) -> bool {
        self.elements.first().is_some_and(|e| e.per_instance)
    }

    pub(crate) fn gpu(&self) -> &BufferHandle {
        &self.gpu
    }

    /// This buffer's contribution to the combined vertex-declaration hash
    /// when bound at `stream_index`.
    pub fn buffer_hash(&self, stream_index: usize) -> u64 {
        self.element_hash.rotate_left(stream_index as u32 * 13)
    }

    /// Replace the whole buffer contents.
    pub fn set_data(
        &self,
        context: &mut dyn DeviceContext,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let expected = self.vertex_count as usize * self.vertex_size as usize;
        if data.len() != expected {
            error!(
                expected,
                actual = data.len(),
                "vertex data size mismatch"
            );
            return Err(GraphicsError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        context.update_buffer(&self.gpu, 0, data)?;
        Ok(())
    }

    /// Update a vertex range; fails without touching the device if the range
    /// exceeds the buffer.
    pub fn set_data_range(
        &self,
        context: &mut dyn DeviceContext,
        data: &[u8],
        start_vertex: u32,
        vertex_count: u32,
    ) -> Result<(), GraphicsError> {
        if start_vertex + vertex_count > self.vertex_count {
            error!(
                start_vertex,
                vertex_count,
                capacity = self.vertex_count,
                "vertex range out of bounds"
            );
            return Err(GraphicsError::RangeOutOfBounds {
                start: start_vertex,
                count: vertex_count,
                capacity: self.vertex_count,
            });
        }
        let expected = vertex_count as usize * self.vertex_size as usize;
        if data.len() != expected {
            return Err(GraphicsError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        context.update_buffer(
            &self.gpu,
            start_vertex as u64 * self.vertex_size as u64,
            data,
        )?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct IndexBuffer {
    gpu: BufferHandle,
    index_count: u32,
    index_type: IndexType,
    dynamic: bool,
}

impl IndexBuffer {
    pub fn new(
        device: &Arc<dyn RenderDevice>,
        index_count: u32,
        index_type: IndexType,
        dynamic: bool,
    ) -> Result<Rc<Self>, GraphicsError> {
        if index_count == 0 {
            error!("index buffer must have a non-zero size");
            return Err(GraphicsError::Device(
                glaze_hal::DeviceError::InvalidDescriptor {
                    kind: "index buffer",
                    reason: "zero indices".into(),
                },
            ));
        }
        let gpu = device.create_buffer(
            &BufferDesc {
                label: Some("index buffer".into()),
                size: index_count as u64 * index_type.size(),
                usage: if dynamic {
                    ResourceUsage::Dynamic
                } else {
                    ResourceUsage::Default
                },
                bind: BindFlags::INDEX,
            },
            None,
        )?;
        Ok(Rc::new(Self {
            gpu,
            index_count,
            index_type,
            dynamic,
        }))
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub(crate) fn gpu(&self) -> &BufferHandle {
        &self.gpu
    }

    pub fn set_data(
        &self,
        context: &mut dyn DeviceContext,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let expected = self.index_count as usize * self.index_type.size() as usize;
        if data.len() != expected {
            return Err(GraphicsError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        context.update_buffer(&self.gpu, 0, data)?;
        Ok(())
    }

    pub fn set_data_range(
        &self,
        context: &mut dyn DeviceContext,
        data: &[u8],
        start_index: u32,
        index_count: u32,
    ) -> Result<(), GraphicsError> {
        if start_index + index_count > self.index_count {
            return Err(GraphicsError::RangeOutOfBounds {
                start: start_index,
                count: index_count,
                capacity: self.index_count,
            });
        }
        let expected = index_count as usize * self.index_type.size() as usize;
        if data.len() != expected {
            return Err(GraphicsError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        context.update_buffer(&self.gpu, start_index as u64 * self.index_type.size(), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{VertexElementSemantic as Semantic, VertexElementType as Type};
    use glaze_hal::backend::null::NullDevice;

    fn device() -> Arc<dyn RenderDevice> {
        Arc::new(NullDevice::new())
    }

    fn position_color() -> Vec<VertexElement> {
        vec![
            VertexElement::new(Type::Vector3, Semantic::Position),
            VertexElement::new(Type::Ubyte4Norm, Semantic::Color),
        ]
    }

    #[test]
    fn offsets_and_stride_are_packed_in_declaration_order() {
        let device = device();
        let buffer = VertexBuffer::new(&device, 4, &position_color(), false).unwrap();
        assert_eq!(buffer.vertex_size(), 16);
        assert_eq!(buffer.elements()[0].offset, 0);
        assert_eq!(buffer.elements()[1].offset, 12);
    }

    #[test]
    fn buffer_hash_is_slot_sensitive() {
        let device = device();
        let a = VertexBuffer::new(&device, 4, &position_color(), false).unwrap();
        assert_ne!(a.buffer_hash(0), a.buffer_hash(1));
        // Identical layouts at the same slot contribute identically.
        let b = VertexBuffer::new(&device, 8, &position_color(), false).unwrap();
        assert_eq!(a.buffer_hash(2), b.buffer_hash(2));
    }

    #[test]
    fn swapping_two_distinct_buffers_across_slots_changes_the_or_hash() {
        let device = device();
        let a = VertexBuffer::new(&device, 4, &position_color(), false).unwrap();
        let b = VertexBuffer::new(
            &device,
            4,
            &[VertexElement::new(Type::Vector2, Semantic::TexCoord)],
            false,
        )
        .unwrap();
        let forward = a.buffer_hash(0) | b.buffer_hash(1);
        let swapped = a.buffer_hash(1) | b.buffer_hash(0);
        assert_ne!(forward, swapped);
    }

    #[test]
    fn range_update_past_the_end_fails_without_device_call() {
        let null = Arc::new(NullDevice::new());
        let mut context = null.create_context();
        let device: Arc<dyn RenderDevice> = null.clone();
        let buffer = VertexBuffer::new(&device, 4, &position_color(), true).unwrap();
        null.log().clear();
        let err = buffer
            .set_data_range(&mut context, &[0u8; 32], 3, 2)
            .unwrap_err();
        assert!(matches!(err, GraphicsError::RangeOutOfBounds { .. }));
        assert!(null.log().calls().is_empty());
    }
}
