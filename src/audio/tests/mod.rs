mod device;

use std::sync::Arc;

use crate::audio::{FormatDescriptor, RingBuffer};
use crate::testing::SimulatedBuffer;

/// 4096-byte CD-quality ring over a simulated buffer with 256 bytes of read-ahead
fn cd_ring() -> (Arc<SimulatedBuffer>, RingBuffer) {
    let sim = Arc::new(SimulatedBuffer::new(4096, 256));
    let ring = RingBuffer::new(FormatDescriptor::CD_QUALITY, 4096, sim.clone()).unwrap();
    (sim, ring)
}
