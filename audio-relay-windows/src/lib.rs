//! # audio-relay-windows
//!
//! Windows WASAPI backend for audio-relay.
//!
//! Provides:
//! - `WasapiCaptureBackend`: shared-mode capture of a microphone endpoint,
//!   implementing `CaptureBackend`
//! - `DeviceEnumerator`: capture endpoint enumeration via the MMDevice API
//! - `format`: matching `CaptureOptions` against an endpoint's mix format
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use audio_relay_core::{delivery_queue, CaptureSessionManager};
//! use audio_relay_windows::WasapiCaptureBackend;
//!
//! let (dispatcher, consumer) = delivery_queue();
//! let manager = CaptureSessionManager::new(dispatcher, || Ok(WasapiCaptureBackend::new()));
//! ```

pub mod format;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use device_enumerator::{CaptureDevice, DeviceEnumerator};
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCaptureBackend;
pub use format::DeviceFormat;
