//! Ring buffer, cursors and the device seam

pub mod buffer;
pub mod cursor;
pub mod device;
pub mod format;

#[cfg(test)]
mod tests;

pub use buffer::{LockRegion, RingBuffer};
pub use cursor::{CursorSnapshot, CursorTracker};
pub use device::{
    AudioDevice, BufferDevice, CooperativeLevel, DeviceError, DeviceHandle, PositionNotify,
    SegmentSpans, Span, WindowHandle,
};
pub use format::FormatDescriptor;
