use glaze_hal::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("too many vertex buffers ({requested}, limit {limit})")]
    TooManyVertexBuffers { requested: usize, limit: usize },
    #[error("cannot create zero-sized constant buffer")]
    ZeroSizedConstantBuffer,
    #[error("buffer range out of bounds (start {start}, count {count}, capacity {capacity})")]
    RangeOutOfBounds { start: u32, count: u32, capacity: u32 },
    #[error("data size {actual} does not match expected {expected} bytes")]
    DataSizeMismatch { expected: usize, actual: usize },
    #[error("indexed draw without an index buffer")]
    NoIndexBuffer,
    #[error("partial clears outside the full viewport are not supported")]
    PartialClear,
    #[error("texture has no resolve target")]
    NoResolveTarget,
}
