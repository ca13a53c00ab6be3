//! Payload producers

use std::io;

/// Supplies PCM payload to the stream engine
///
/// The engine passes a segment of at most the bytes it can place in the ring.
/// Filling fewer bytes than the segment length signals end-of-stream; zero
/// means the stream ended immediately.
pub trait Producer: Send {
    /// Fill up to `buffer.len()` bytes, returning the count written
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be produced
    fn fill_next(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

impl<P: Producer + ?Sized> Producer for Box<P> {
    fn fill_next(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).fill_next(buffer)
    }
}

/// Producer over an owned byte vector
pub struct SliceProducer {
    data: Vec<u8>,
    position: usize,
}

impl SliceProducer {
    /// Create from raw PCM data
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Create from i16 samples
    #[must_use]
    pub fn from_i16(samples: &[i16]) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data)
    }

    /// Bytes not yet handed out
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl Producer for SliceProducer {
    fn fill_next(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let to_read = buffer.len().min(self.remaining());
        if to_read == 0 {
            return Ok(0);
        }

        buffer[..to_read].copy_from_slice(&self.data[self.position..self.position + to_read]);
        self.position += to_read;

        Ok(to_read)
    }
}

/// Producer from a callback function
pub struct CallbackProducer<F> {
    callback: F,
}

impl<F> CallbackProducer<F>
where
    F: FnMut(&mut [u8]) -> io::Result<usize> + Send,
{
    /// Create from callback
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Producer for CallbackProducer<F>
where
    F: FnMut(&mut [u8]) -> io::Result<usize> + Send,
{
    fn fill_next(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (self.callback)(buffer)
    }
}

/// Endless silence
pub struct SilenceProducer {
    silence: u8,
}

impl SilenceProducer {
    /// Silence for signed PCM
    #[must_use]
    pub fn new() -> Self {
        Self { silence: 0 }
    }

    /// Silence using a specific byte value (0x80 for 8-bit unsigned PCM)
    #[must_use]
    pub fn with_byte(silence: u8) -> Self {
        Self { silence }
    }
}

impl Default for SilenceProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer for SilenceProducer {
    fn fill_next(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        buffer.fill(self.silence);
        Ok(buffer.len())
    }
}
