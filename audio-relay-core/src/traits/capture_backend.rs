use std::sync::Arc;

use crate::models::config::CaptureOptions;
use crate::models::error::CaptureError;

/// Callback invoked by a backend with a chunk of raw PCM bytes.
///
/// The slice is only valid for the duration of the call. Callbacks fire on
/// the backend's producer thread and must return quickly.
pub type ChunkCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Interface for device-specific capture sessions.
///
/// Implemented by:
/// - `ScriptedBackend` (in-process, deterministic)
/// - `WasapiCaptureBackend` (Windows)
pub trait CaptureBackend: Send {
    /// Whether the backing device can currently be opened.
    fn is_available(&self) -> bool {
        true
    }

    /// Begin producing chunks asynchronously.
    ///
    /// `on_data` fires zero or more times, then `on_finished` fires exactly
    /// once when the stream ends, whether because of `stop` or because the
    /// device went away.
    fn start(
        &mut self,
        on_data: ChunkCallback,
        on_finished: ChunkCallback,
    ) -> Result<(), CaptureError>;

    /// Request termination. Must eventually cause `on_finished` to fire, not
    /// necessarily before returning.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Apply options. Returns `UnsupportedOption` for values the device
    /// cannot honour. Whether a change takes effect mid-run is up to the
    /// backend.
    fn configure(&mut self, options: &CaptureOptions) -> Result<(), CaptureError>;
}
