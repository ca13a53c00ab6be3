use crate::audio::{AudioDevice, CooperativeLevel, DeviceHandle, FormatDescriptor, WindowHandle};
use crate::error::StreamError;
use crate::testing::SimulatedDevice;
use crate::types::BufferStatus;

#[test]
fn test_create_secondary_buffer() {
    let device = SimulatedDevice::new();
    let buffer = device
        .create_buffer(&FormatDescriptor::CD_QUALITY, 8192, false)
        .unwrap();

    assert_eq!(buffer.capacity(), 8192);
    assert!(!buffer.is_primary());
    assert_eq!(buffer.status().unwrap(), BufferStatus::Stopped);

    let sim = device.last_buffer().unwrap();
    assert!(sim.applied_format().is_none());
}

#[test]
fn test_create_primary_applies_format() {
    let device = SimulatedDevice::new();
    let format = FormatDescriptor::pcm(1, 48_000, 16).unwrap();
    let buffer = device.create_buffer(&format, 4800, true).unwrap();

    assert!(buffer.is_primary());
    assert_eq!(device.last_buffer().unwrap().applied_format(), Some(format));
}

#[test]
fn test_create_rejects_bad_size() {
    let device = SimulatedDevice::new();
    let format = FormatDescriptor::CD_QUALITY;

    assert!(matches!(
        device.create_buffer(&format, 0, false),
        Err(StreamError::InvalidParameter { .. })
    ));
    assert!(matches!(
        device.create_buffer(&format, 1001, false),
        Err(StreamError::InvalidParameter { .. })
    ));
    assert!(device.buffers().is_empty());
}

#[test]
fn test_read_ahead_scales_with_frames() {
    let device = SimulatedDevice::new().with_read_ahead_frames(32);
    let buffer = device
        .create_buffer(&FormatDescriptor::CD_QUALITY, 4096, false)
        .unwrap();

    buffer.play(true).unwrap();
    let snapshot = buffer.cursor_tracker().positions().unwrap();
    assert_eq!(snapshot.play, 0);
    assert_eq!(snapshot.write, 128);
}

#[test]
fn test_device_handle_closes_on_drop() {
    let device = SimulatedDevice::new();
    let observer = device.clone();

    {
        let handle =
            DeviceHandle::open(device, WindowHandle(0x1234), CooperativeLevel::Priority).unwrap();
        let _buffer = handle
            .create_buffer(&FormatDescriptor::CD_QUALITY, 4096, false)
            .unwrap();
        assert!(!observer.is_closed());
    }

    assert!(observer.is_closed());
    assert_eq!(
        observer.cooperative_level(),
        Some((WindowHandle(0x1234), CooperativeLevel::Priority))
    );
    let buffers = observer.buffers();
    assert_eq!(buffers.len(), 1);
    assert!(buffers[0].was_released());
}

#[test]
fn test_closed_device_refuses_buffers() {
    let device = SimulatedDevice::new();
    device.close().unwrap();

    assert!(matches!(
        device.create_buffer(&FormatDescriptor::CD_QUALITY, 4096, false),
        Err(StreamError::DeviceFailure { .. })
    ));
}
