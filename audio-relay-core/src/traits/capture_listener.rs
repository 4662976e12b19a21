use crate::models::chunk::AudioChunk;

/// Error type a listener may return from a reaction.
pub type ListenerFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An observer that reacts to captured audio.
///
/// Both reactions are invoked only on the consumer context, never on the
/// capture thread. The relay holds listeners by weak reference: dropping the
/// last `Arc` unregisters the listener implicitly.
pub trait CaptureListener: Send + Sync {
    /// Called for every data chunk of a run, in production order.
    fn on_audio_data(&self, chunk: &AudioChunk) -> Result<(), ListenerFailure>;

    /// Called once per run, after every data chunk of that run.
    fn on_capture_finished(&self, chunk: &AudioChunk) -> Result<(), ListenerFailure> {
        let _ = chunk;
        Ok(())
    }
}
