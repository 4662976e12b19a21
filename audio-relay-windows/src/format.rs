//! Matching requested capture options against an endpoint's shared-mode
//! mix format.
//!
//! Shared-mode WASAPI streams deliver the engine's mix format; this backend
//! does no conversion, so options must describe that format exactly.

use audio_relay_core::{CaptureError, CaptureOptions};

/// The format an endpoint delivers in shared mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl DeviceFormat {
    /// Bytes in one interleaved frame.
    pub fn block_align(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }
}

/// Reject options the endpoint cannot deliver without conversion.
pub fn check_options(options: &CaptureOptions, format: &DeviceFormat) -> Result<(), CaptureError> {
    if options.sample_rate != format.sample_rate {
        return Err(CaptureError::UnsupportedOption(format!(
            "sample rate {} Hz not supported (device mixes at {} Hz)",
            options.sample_rate, format.sample_rate
        )));
    }
    if options.channels != format.channels {
        return Err(CaptureError::UnsupportedOption(format!(
            "channel count {} not supported (device has {})",
            options.channels, format.channels
        )));
    }
    if options.bit_depth != format.bit_depth {
        return Err(CaptureError::UnsupportedOption(format!(
            "bit depth {} not supported (device delivers {}-bit)",
            options.bit_depth, format.bit_depth
        )));
    }
    Ok(())
}

/// Endpoint buffer duration in 100-nanosecond units, sized to hold two chunks.
pub fn buffer_duration_hns(options: &CaptureOptions) -> i64 {
    options.chunk_duration_ms as i64 * 2 * 10_000
}
