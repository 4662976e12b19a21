use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Capture options applied to the backend before (or at) start.
///
/// Which fields a backend honours is up to the backend; `validate` only
/// rejects values no backend could support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Specific input device ID, or None for the system default.
    pub device_id: Option<String>,

    /// Sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Bits per sample (default: 16). Valid values: 8, 16, 24, 32.
    pub bit_depth: u16,

    /// Channel count (default: 2). Valid range: 1..=8.
    pub channels: u16,

    /// Target duration of each delivered chunk in milliseconds (default: 100).
    pub chunk_duration_ms: u32,
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::UnsupportedOption(
                "sample rate must be positive".into(),
            ));
        }
        if ![8, 16, 24, 32].contains(&self.bit_depth) {
            return Err(CaptureError::UnsupportedOption(format!(
                "unsupported bit depth: {}",
                self.bit_depth
            )));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(CaptureError::UnsupportedOption(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if !(1..=1000).contains(&self.chunk_duration_ms) {
            return Err(CaptureError::UnsupportedOption(format!(
                "chunk duration out of range: {}ms",
                self.chunk_duration_ms
            )));
        }
        Ok(())
    }

    /// Bytes in one interleaved frame.
    pub fn frame_size(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }

    /// Expected size in bytes of a full chunk.
    pub fn chunk_size_bytes(&self) -> usize {
        let frames = self.sample_rate as u64 * self.chunk_duration_ms as u64 / 1000;
        frames as usize * self.frame_size()
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: 48000,
            bit_depth: 16,
            channels: 2,
            chunk_duration_ms: 100,
        }
    }
}
