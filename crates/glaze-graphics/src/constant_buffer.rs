//! Constant buffers with a CPU shadow copy.
//!
//! Parameter writes land in the shadow; the whole buffer is uploaded at most
//! once per draw when [`ConstantBuffer::apply`] runs during draw preparation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use glaze_hal::{
    BindFlags, BufferDesc, BufferHandle, DeviceContext, RenderDevice, ResourceUsage,
};
use tracing::error;

use crate::error::GraphicsError;

#[derive(Debug)]
pub struct ConstantBuffer {
    gpu: BufferHandle,
    size: u32,
    shadow: RefCell<Vec<u8>>,
    dirty: Cell<bool>,
}

impl ConstantBuffer {
    pub(crate) fn new(
        device: &Arc<dyn RenderDevice>,
        size: u32,
    ) -> Result<Rc<Self>, GraphicsError> {
        if size == 0 {
            error!("cannot create zero-sized constant buffer");
            return Err(GraphicsError::ZeroSizedConstantBuffer);
        }
        let align = device.min_uniform_buffer_alignment().max(16) as u32;
        let size = size.div_ceil(align) * align;
        let gpu = device.create_buffer(
            &BufferDesc {
                label: Some("constant buffer".into()),
                size: size as u64,
                usage: ResourceUsage::Dynamic,
                bind: BindFlags::UNIFORM,
            },
            None,
        )?;
        Ok(Rc::new(Self {
            gpu,
            size,
            shadow: RefCell::new(vec![0; size as usize]),
            dirty: Cell::new(false),
        }))
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub(crate) fn gpu(&self) -> &BufferHandle {
        &self.gpu
    }

    /// Write raw bytes into the shadow copy. Out-of-range writes are dropped.
    pub fn set_parameter(&self, offset: u32, data: &[u8]) {
        let end = offset as usize + data.len();
        if end > self.size as usize {
            return;
        }
        self.shadow.borrow_mut()[offset as usize..end].copy_from_slice(data);
        self.dirty.set(true);
    }

    /// Write three-component rows at 16-byte stride, the layout constant
    /// buffers use for 3x3 matrices.
    pub fn set_vector3_array_parameter(&self, offset: u32, rows: &[[f32; 3]]) {
        let mut row_offset = offset as usize;
        let mut shadow = self.shadow.borrow_mut();
        for row in rows {
            let end = row_offset + 12;
            if end > self.size as usize {
                return;
            }
            shadow[row_offset..end].copy_from_slice(bytemuck::cast_slice(row));
            row_offset += 16;
        }
        self.dirty.set(true);
    }

    /// Upload the shadow copy if any parameter changed since the last apply.
    pub(crate) fn apply(&self, context: &mut dyn DeviceContext) -> Result<(), GraphicsError> {
        if self.dirty.get() {
            context.update_buffer(&self.gpu, 0, &self.shadow.borrow())?;
            self.dirty.set(false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glaze_hal::backend::null::{ContextCall, NullDevice};

    #[test]
    fn zero_size_is_rejected_without_device_object() {
        let null = Arc::new(NullDevice::new());
        let device_dyn: Arc<dyn RenderDevice> = null.clone();
        let err = ConstantBuffer::new(&device_dyn, 0).unwrap_err();
        assert!(matches!(err, GraphicsError::ZeroSizedConstantBuffer));
        assert_eq!(null.counters().buffers, 0);
    }

    #[test]
    fn size_rounds_up_to_device_alignment() {
        let device_dyn: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let buffer = ConstantBuffer::new(&device_dyn, 20).unwrap();
        assert_eq!(buffer.size(), 32);
    }

    #[test]
    fn apply_uploads_once_and_clears_dirty() {
        let device = NullDevice::new();
        let log = device.log();
        let mut context = device.create_context();
        let device_dyn: Arc<dyn RenderDevice> = Arc::new(device);
        let buffer = ConstantBuffer::new(&device_dyn, 64).unwrap();

        buffer.set_parameter(0, &[1, 2, 3, 4]);
        assert!(buffer.is_dirty());
        buffer.apply(&mut context).unwrap();
        assert!(!buffer.is_dirty());
        // A second apply with no writes must not upload again.
        buffer.apply(&mut context).unwrap();

        let uploads: Vec<_> = log
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ContextCall::UpdateBuffer { .. }))
            .collect();
        assert_eq!(uploads.len(), 1);
        // The upload covers the whole aligned shadow copy.
        assert!(matches!(
            uploads[0],
            ContextCall::UpdateBuffer { offset: 0, len: 64, .. }
        ));
    }

    #[test]
    fn out_of_range_write_is_dropped() {
        let device_dyn: Arc<dyn RenderDevice> = Arc::new(NullDevice::new());
        let buffer = ConstantBuffer::new(&device_dyn, 16).unwrap();
        buffer.set_parameter(12, &[0u8; 8]);
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn vector3_rows_are_packed_at_16_byte_stride() {
        let device = NullDevice::new();
        let log = device.log();
        let mut context = device.create_context();
        let device_dyn: Arc<dyn RenderDevice> = Arc::new(device);
        let buffer = ConstantBuffer::new(&device_dyn, 48).unwrap();
        buffer.set_vector3_array_parameter(0, &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        assert!(buffer.is_dirty());
        buffer.apply(&mut context).unwrap();
        let uploads: Vec<_> = log
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ContextCall::UpdateBuffer { .. }))
            .collect();
        assert_eq!(uploads.len(), 1);
    }
}
