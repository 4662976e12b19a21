use crate::models::error::CaptureError;
use crate::models::state::CaptureState;

/// Diagnostic channel for session events.
///
/// `on_state_changed` fires on whichever thread caused the transition: the
/// caller's thread for start/stop, the producer thread when the backend
/// finishes on its own. `on_listener_error` fires on the consumer context.
pub trait SessionDelegate: Send + Sync {
    fn on_state_changed(&self, state: &CaptureState);

    /// Called once per failed listener reaction. The failure has already been
    /// isolated; delivery to other listeners continues.
    fn on_listener_error(&self, error: &CaptureError);
}
