//! PCM format description

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StreamError};

/// PCM layout of the samples stored in a ring buffer
///
/// Every offset and length handed to a [`RingBuffer`](crate::audio::RingBuffer)
/// is expressed in bytes and must be a multiple of [`block_align`](Self::block_align).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Number of interleaved channels
    pub channel_count: u16,
    /// Frames per second
    pub sample_rate: u32,
    /// Bits per single-channel sample
    pub bits_per_sample: u16,
    /// Bytes per frame (`channel_count * bits_per_sample / 8`)
    pub block_align: u16,
    /// Bytes per second (`sample_rate * block_align`)
    pub avg_bytes_per_sec: u32,
}

impl FormatDescriptor {
    /// Standard CD audio format (16-bit 44.1kHz stereo)
    pub const CD_QUALITY: Self = Self {
        channel_count: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        block_align: 4,
        avg_bytes_per_sec: 176_400,
    };

    /// Describe integer PCM, deriving block alignment and byte rate
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the layout yields an empty or fractional frame.
    pub fn pcm(channel_count: u16, sample_rate: u32, bits_per_sample: u16) -> Result<Self> {
        if bits_per_sample == 0 || bits_per_sample % 8 != 0 {
            return Err(StreamError::InvalidFormat {
                message: format!("bits per sample must be a non-zero multiple of 8, got {bits_per_sample}"),
            });
        }
        if sample_rate == 0 {
            return Err(StreamError::InvalidFormat {
                message: "sample rate must be non-zero".to_string(),
            });
        }

        let block_align = u32::from(channel_count) * u32::from(bits_per_sample) / 8;
        let block_align = u16::try_from(block_align).map_err(|_| StreamError::InvalidFormat {
            message: format!("frame size {block_align} does not fit in 16 bits"),
        })?;
        let avg_bytes_per_sec = sample_rate
            .checked_mul(u32::from(block_align))
            .ok_or_else(|| StreamError::InvalidFormat {
                message: "byte rate overflows 32 bits".to_string(),
            })?;

        let format = Self {
            channel_count,
            sample_rate,
            bits_per_sample,
            block_align,
            avg_bytes_per_sec,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check the derived fields against the primary ones
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if `block_align` is zero or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.block_align == 0 {
            return Err(StreamError::InvalidFormat {
                message: "block align must be non-zero".to_string(),
            });
        }
        let expected_align = u32::from(self.channel_count) * u32::from(self.bits_per_sample) / 8;
        if u32::from(self.block_align) != expected_align {
            return Err(StreamError::InvalidFormat {
                message: format!(
                    "block align {} does not match {} channels of {} bits",
                    self.block_align, self.channel_count, self.bits_per_sample
                ),
            });
        }
        if u64::from(self.avg_bytes_per_sec)
            != u64::from(self.sample_rate) * u64::from(self.block_align)
        {
            return Err(StreamError::InvalidFormat {
                message: format!(
                    "byte rate {} does not match {} Hz at {} bytes per frame",
                    self.avg_bytes_per_sec, self.sample_rate, self.block_align
                ),
            });
        }
        Ok(())
    }

    /// Check whether a byte offset or length falls on a frame boundary
    #[must_use]
    pub fn is_aligned(&self, bytes: u32) -> bool {
        bytes % u32::from(self.block_align) == 0
    }

    /// Round a byte count down to a whole number of frames
    #[must_use]
    pub fn align_down(&self, bytes: u32) -> u32 {
        bytes - bytes % u32::from(self.block_align)
    }

    /// Byte value that renders as silence
    ///
    /// 8-bit PCM is unsigned and centred on 0x80.
    #[must_use]
    pub fn silence_byte(&self) -> u8 {
        if self.bits_per_sample == 8 { 0x80 } else { 0 }
    }

    /// Calculate duration for given number of frames
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Calculate play time of a byte span
    #[must_use]
    pub fn bytes_to_duration(&self, bytes: u32) -> Duration {
        self.frames_to_duration(u64::from(bytes / u32::from(self.block_align)))
    }

    /// Calculate frames for given duration
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * f64::from(self.sample_rate)) as u64
    }

    /// Calculate frame-aligned bytes for given duration, saturating at `u32::MAX` frames
    #[must_use]
    pub fn duration_to_bytes(&self, duration: Duration) -> u32 {
        let bytes = self.duration_to_frames(duration) * u64::from(self.block_align);
        self.align_down(u32::try_from(bytes).unwrap_or(u32::MAX))
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::CD_QUALITY
    }
}
