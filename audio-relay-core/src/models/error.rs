use thiserror::Error;

/// Errors surfaced by the capture relay.
///
/// Control operations (`start_capture`, `stop_capture`, `set_options`) return
/// these synchronously. `ListenerReactionFailed` is only ever reported through
/// the diagnostic channel; it never propagates to the backend or the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("capture already in progress")]
    AlreadyCapturing,

    #[error("no capture backend has been created yet")]
    NoActiveBackend,

    #[error("unsupported option: {0}")]
    UnsupportedOption(String),

    #[error("listener reaction failed: {0}")]
    ListenerReactionFailed(String),

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("consumer context is closed")]
    ConsumerClosed,

    #[error("consumer thread {0}")]
    ConsumerPanicked(String),
}
