//! WASAPI capture backend.
//!
//! Captures a capture endpoint (microphone) in shared mode and delivers each
//! packet as raw mix-format bytes through the backend's data callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use audio_relay_core::{CaptureBackend, CaptureError, CaptureOptions, ChunkCallback};

use crate::com::ComGuard;
use crate::device_enumerator::{mix_format, DeviceEnumerator};
use crate::format::{self, DeviceFormat};

/// Shared-mode WASAPI capture.
///
/// Each `start` opens the configured endpoint on a dedicated thread
/// registered with MMCSS. On `stop`, packets still queued in the endpoint
/// buffer are drained into the terminal chunk.
pub struct WasapiCaptureBackend {
    options: Option<CaptureOptions>,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiCaptureBackend {
    /// Capture from the system default microphone in its mix format.
    pub fn new() -> Self {
        Self {
            options: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    fn join_capture_thread(&mut self) {
        if let Some(handle) = self.capture_handle.take() {
            if handle.join().is_err() {
                log::error!("WASAPI capture thread panicked");
            }
        }
    }
}

impl Default for WasapiCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for WasapiCaptureBackend {
    fn is_available(&self) -> bool {
        let _com = ComGuard::enter();
        let device_id = self.options.as_ref().and_then(|o| o.device_id.clone());
        DeviceEnumerator::new()
            .and_then(|e| e.capture_device(device_id.as_deref()))
            .is_ok()
    }

    fn start(
        &mut self,
        on_data: ChunkCallback,
        on_finished: ChunkCallback,
    ) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::Backend("WASAPI capture already running".into()));
        }
        self.join_capture_thread();

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let options = self.options.clone();

        let handle = thread::Builder::new()
            .name("wasapi-capture".into())
            .spawn(move || {
                let tail = match capture_loop(&running, options.as_ref(), &on_data) {
                    Ok(tail) => tail,
                    Err(e) => {
                        log::error!("WASAPI capture error: {}", e);
                        Vec::new()
                    }
                };
                running.store(false, Ordering::SeqCst);
                on_finished(tail.as_slice());
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Backend(format!("failed to spawn capture thread: {}", e))
            })?;

        self.capture_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        self.join_capture_thread();
        Ok(())
    }

    fn configure(&mut self, options: &CaptureOptions) -> Result<(), CaptureError> {
        let _com = ComGuard::enter();
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.capture_device(options.device_id.as_deref())?;
        format::check_options(options, &mix_format(&device)?)?;

        if self.running.load(Ordering::SeqCst) {
            log::info!("WASAPI options updated; they apply from the next capture run");
        }
        self.options = Some(options.clone());
        Ok(())
    }
}

impl Drop for WasapiCaptureBackend {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.join_capture_thread();
    }
}

/// Capture loop running on the dedicated thread. Returns the bytes drained
/// after the stop request, which become the terminal chunk.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Resolve the configured or default capture endpoint
/// 3. Activate IAudioClient and read its mix format
/// 4. Initialize in shared mode
/// 5. Get IAudioCaptureClient service
/// 6. Register with MMCSS for real-time priority
/// 7. Start capture, poll for packets
fn capture_loop(
    running: &AtomicBool,
    options: Option<&CaptureOptions>,
    on_data: &ChunkCallback,
) -> Result<Vec<u8>, CaptureError> {
    let _com = ComGuard::enter();
    let defaults = CaptureOptions::default();
    let options = options.unwrap_or(&defaults);

    let enumerator = DeviceEnumerator::new()?;
    let device = enumerator.capture_device(options.device_id.as_deref())?;

    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::Backend(format!("Activate failed: {}", e)))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| CaptureError::Backend(format!("GetMixFormat failed: {}", e)))?;
        let mix_format = &*mix_format_ptr;
        let device_format = DeviceFormat {
            sample_rate: mix_format.nSamplesPerSec,
            channels: mix_format.nChannels,
            bit_depth: mix_format.wBitsPerSample,
        };
        let block_align = device_format.block_align();

        let initialized = audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            format::buffer_duration_hns(options),
            0,
            mix_format_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _ as *const _));
        initialized.map_err(|e| {
            CaptureError::Backend(format!("IAudioClient::Initialize failed: {}", e))
        })?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| CaptureError::Backend(format!("GetService failed: {}", e)))?;

        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client
            .Start()
            .map_err(|e| CaptureError::Backend(format!("IAudioClient::Start failed: {}", e)))?;

        log::debug!(
            "WASAPI capture started: {} Hz, {} ch, {}-bit",
            device_format.sample_rate,
            device_format.channels,
            device_format.bit_depth
        );

        let poll_interval = Duration::from_millis((options.chunk_duration_ms / 2).max(1) as u64);
        while running.load(Ordering::SeqCst) {
            thread::sleep(poll_interval);
            read_packets(&capture_client, block_align, |bytes| on_data(bytes))?;
        }

        let mut tail = Vec::new();
        read_packets(&capture_client, block_align, |bytes| tail.extend_from_slice(bytes))?;

        let _ = audio_client.Stop();
        Ok(tail)
    }
}

/// Drain every packet currently queued in the endpoint buffer.
unsafe fn read_packets<F>(
    capture_client: &IAudioCaptureClient,
    block_align: usize,
    mut sink: F,
) -> Result<(), CaptureError>
where
    F: FnMut(&[u8]),
{
    let mut packet_length = capture_client
        .GetNextPacketSize()
        .map_err(|e| CaptureError::Backend(format!("GetNextPacketSize failed: {}", e)))?;

    while packet_length > 0 {
        let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
        let mut num_frames: u32 = 0;
        let mut flags: u32 = 0;

        capture_client
            .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
            .map_err(|e| CaptureError::Backend(format!("GetBuffer failed: {}", e)))?;

        if num_frames > 0 && !buffer_ptr.is_null() {
            let total_bytes = num_frames as usize * block_align;
            if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                sink(vec![0u8; total_bytes].as_slice());
            } else {
                sink(std::slice::from_raw_parts(buffer_ptr, total_bytes));
            }
        }

        capture_client
            .ReleaseBuffer(num_frames)
            .map_err(|e| CaptureError::Backend(format!("ReleaseBuffer failed: {}", e)))?;

        packet_length = capture_client
            .GetNextPacketSize()
            .map_err(|e| CaptureError::Backend(format!("GetNextPacketSize failed: {}", e)))?;
    }
    Ok(())
}
