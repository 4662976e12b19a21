//! Capture endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture endpoints with friendly
//! names, resolve a configured device ID, and read an endpoint's mix format.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::*;
use windows::Win32::System::Variant::*;

use audio_relay_core::CaptureError;

use crate::format::DeviceFormat;

/// An active capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Capture endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
                    CaptureError::BackendUnavailable(format!("failed to create enumerator: {}", e))
                })?;
            Ok(Self { enumerator })
        }
    }

    /// List active capture (microphone) endpoints.
    pub fn list_capture_devices(&self) -> Result<Vec<CaptureDevice>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::Backend(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::Backend(format!("GetCount failed: {}", e)))?;

            let default_id = self.default_capture_device_id().ok();

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let name = friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push(CaptureDevice { id, name, is_default });
            }
            Ok(devices)
        }
    }

    /// Get the default capture endpoint ID.
    pub fn default_capture_device_id(&self) -> Result<String, CaptureError> {
        let device = self.capture_device(None)?;
        device_id(&device).ok_or(CaptureError::DeviceNotAvailable)
    }

    /// Resolve `id` to an endpoint, or the default capture endpoint for None.
    pub fn capture_device(&self, id: Option<&str>) -> Result<IMMDevice, CaptureError> {
        unsafe {
            match id {
                Some(id) => {
                    let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    self.enumerator
                        .GetDevice(PCWSTR(wide_id.as_ptr()))
                        .map_err(|_| CaptureError::UnsupportedOption(format!("unknown capture device: {}", id)))
                }
                None => self
                    .enumerator
                    .GetDefaultAudioEndpoint(eCapture, eConsole)
                    .map_err(|_| CaptureError::DeviceNotAvailable),
            }
        }
    }
}

/// Read the shared-mode mix format of an endpoint.
pub fn mix_format(device: &IMMDevice) -> Result<DeviceFormat, CaptureError> {
    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::Backend(format!("Activate failed: {}", e)))?;
        let format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| CaptureError::Backend(format!("GetMixFormat failed: {}", e)))?;

        let format = &*format_ptr;
        let result = DeviceFormat {
            sample_rate: format.nSamplesPerSec,
            channels: format.nChannels,
            bit_depth: format.wBitsPerSample,
        };
        CoTaskMemFree(Some(format_ptr as *const _ as *const _));
        Ok(result)
    }
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        let value = id.to_string().ok();
        CoTaskMemFree(Some(id.0 as *const _));
        value
    }
}

/// Read the PKEY_Device_FriendlyName property from a device.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;

        let mut prop_variant = std::mem::zeroed::<PROPVARIANT>();
        store
            .GetValue(&PKEY_Device_FriendlyName, &mut prop_variant)
            .ok()?;

        let name = if prop_variant.Anonymous.Anonymous.vt == VT_LPWSTR {
            let pwsz = prop_variant.Anonymous.Anonymous.Anonymous.pwszVal;
            if pwsz.is_null() {
                None
            } else {
                pwsz.to_string().ok()
            }
        } else {
            None
        };

        PropVariantClear(&mut prop_variant).ok();
        name
    }
}
