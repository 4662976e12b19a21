//! Deterministic in-process backend.
//!
//! Replays a fixed list of chunks from its own producer thread, which makes
//! the relay testable without audio hardware and gives hosts something to
//! wire up before a device backend is available.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::models::config::CaptureOptions;
use crate::models::error::CaptureError;
use crate::traits::capture_backend::{CaptureBackend, ChunkCallback};

#[derive(Debug, Default)]
struct ScriptLog {
    starts: usize,
    stops: usize,
    applied: Option<CaptureOptions>,
}

/// Read-only view of what a `ScriptedBackend` has been asked to do.
///
/// Stays valid after the backend has been moved into a session manager.
#[derive(Clone, Default)]
pub struct ScriptHandle {
    log: Arc<Mutex<ScriptLog>>,
    running: Arc<AtomicBool>,
}

impl ScriptHandle {
    pub fn starts(&self) -> usize {
        self.log.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.log.lock().stops
    }

    /// Options accepted by the most recent successful `configure`.
    pub fn applied_options(&self) -> Option<CaptureOptions> {
        self.log.lock().applied.clone()
    }

    /// Whether the producer thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A backend that plays back a scripted capture run.
///
/// Each `start` emits the data chunks in order, then the terminal chunk.
/// By default the terminal chunk is held back until `stop` is called, like a
/// live device; `finish_when_drained` makes the run end by itself instead.
/// A paced script (`with_chunk_interval`) may be cut short by `stop`; an
/// unpaced one always emits every chunk first.
pub struct ScriptedBackend {
    chunks: Arc<Vec<Vec<u8>>>,
    terminal: Arc<Vec<u8>>,
    finish_when_drained: bool,
    chunk_interval: Duration,
    supported_sample_rates: Option<Vec<u32>>,
    available: bool,
    handle: ScriptHandle,
    stop_tx: Option<Sender<()>>,
    producer: Option<thread::JoinHandle<()>>,
}

impl ScriptedBackend {
    pub fn new(chunks: Vec<Vec<u8>>, terminal: Vec<u8>) -> Self {
        Self {
            chunks: Arc::new(chunks),
            terminal: Arc::new(terminal),
            finish_when_drained: false,
            chunk_interval: Duration::ZERO,
            supported_sample_rates: None,
            available: true,
            handle: ScriptHandle::default(),
            stop_tx: None,
            producer: None,
        }
    }

    /// End the run once every chunk has been emitted, without waiting for `stop`.
    pub fn finish_when_drained(mut self) -> Self {
        self.finish_when_drained = true;
        self
    }

    /// Pause between chunks, to simulate device pacing.
    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = interval;
        self
    }

    /// Reject `configure` for any sample rate outside `rates`.
    pub fn with_supported_sample_rates(mut self, rates: Vec<u32>) -> Self {
        self.supported_sample_rates = Some(rates);
        self
    }

    /// Report the device as missing.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    fn join_producer(&mut self) {
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("scripted producer thread panicked");
            }
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start(
        &mut self,
        on_data: ChunkCallback,
        on_finished: ChunkCallback,
    ) -> Result<(), CaptureError> {
        if self.handle.is_running() {
            return Err(CaptureError::Backend("scripted capture already running".into()));
        }
        // Reap a producer that finished on its own; it is at most returning
        // from its terminal callback.
        self.join_producer();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let chunks = Arc::clone(&self.chunks);
        let terminal = Arc::clone(&self.terminal);
        let running = Arc::clone(&self.handle.running);
        let finish_when_drained = self.finish_when_drained;
        let interval = self.chunk_interval;

        running.store(true, Ordering::SeqCst);
        let producer = thread::Builder::new()
            .name("scripted-capture".into())
            .spawn(move || {
                produce(&chunks, interval, finish_when_drained, &stop_rx, &on_data);
                // Cleared first so a restart triggered by the terminal chunk is accepted.
                running.store(false, Ordering::SeqCst);
                on_finished(terminal.as_slice());
            })
            .map_err(|e| {
                self.handle.running.store(false, Ordering::SeqCst);
                CaptureError::Backend(format!("failed to spawn producer thread: {}", e))
            })?;

        self.stop_tx = Some(stop_tx);
        self.producer = Some(producer);
        self.handle.log.lock().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(tx) = self.stop_tx.take() {
            // The producer may already have exited; a full or closed channel is fine.
            let _ = tx.try_send(());
        }
        self.join_producer();
        self.handle.log.lock().stops += 1;
        Ok(())
    }

    fn configure(&mut self, options: &CaptureOptions) -> Result<(), CaptureError> {
        if let Some(ref rates) = self.supported_sample_rates {
            if !rates.contains(&options.sample_rate) {
                return Err(CaptureError::UnsupportedOption(format!(
                    "sample rate {} not supported",
                    options.sample_rate
                )));
            }
        }
        self.handle.log.lock().applied = Some(options.clone());
        Ok(())
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.stop_tx.take();
        self.join_producer();
    }
}

/// Emit the scripted chunks, returning early if a stop arrives.
/// Blocks until stopped when the run is not set to finish by itself.
fn produce(
    chunks: &[Vec<u8>],
    interval: Duration,
    finish_when_drained: bool,
    stop_rx: &Receiver<()>,
    on_data: &ChunkCallback,
) {
    for chunk in chunks {
        on_data(chunk.as_slice());
        // Only a paced script can be cut short; an unpaced one always drains.
        if !interval.is_zero() {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
    if !finish_when_drained {
        // Either a stop request or the backend being dropped ends the run.
        let _ = stop_rx.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_callback() -> (ChunkCallback, Arc<Mutex<Vec<Vec<u8>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChunkCallback = Arc::new(move |bytes: &[u8]| sink.lock().push(bytes.to_vec()));
        (callback, seen)
    }

    #[test]
    fn emits_chunks_then_terminal_on_stop() {
        let mut backend = ScriptedBackend::new(vec![vec![0x01], vec![0x02]], vec![0xFF]);
        let (on_data, data) = recording_callback();
        let (on_finished, finished) = recording_callback();

        backend.start(on_data, on_finished).unwrap();
        backend.stop().unwrap();

        assert_eq!(*data.lock(), vec![vec![0x01], vec![0x02]]);
        assert_eq!(*finished.lock(), vec![vec![0xFF]]);
        assert!(!backend.handle().is_running());
    }

    #[test]
    fn finishes_by_itself_when_drained() {
        let mut backend = ScriptedBackend::new(vec![vec![0x01]], vec![0xFF]).finish_when_drained();
        let handle = backend.handle();
        let (on_data, _data) = recording_callback();
        let (on_finished, finished) = recording_callback();

        backend.start(on_data, on_finished).unwrap();
        // Joining through stop after a natural finish must not emit a second terminal chunk.
        backend.join_producer();
        backend.stop().unwrap();

        assert_eq!(finished.lock().len(), 1);
        assert_eq!(handle.starts(), 1);
        assert_eq!(handle.stops(), 1);
    }

    #[test]
    fn stop_interrupts_paced_run() {
        let chunks = vec![vec![0x00]; 1000];
        let mut backend = ScriptedBackend::new(chunks, vec![0xFF])
            .with_chunk_interval(Duration::from_millis(5));
        let (on_data, data) = recording_callback();
        let (on_finished, finished) = recording_callback();

        backend.start(on_data, on_finished).unwrap();
        thread::sleep(Duration::from_millis(20));
        backend.stop().unwrap();

        assert!(data.lock().len() < 1000);
        assert_eq!(*finished.lock(), vec![vec![0xFF]]);
    }

    #[test]
    fn configure_checks_supported_rates() {
        let mut backend =
            ScriptedBackend::new(Vec::new(), Vec::new()).with_supported_sample_rates(vec![16000, 48000]);
        let handle = backend.handle();

        let bad = CaptureOptions {
            sample_rate: 44100,
            ..Default::default()
        };
        assert!(matches!(
            backend.configure(&bad),
            Err(CaptureError::UnsupportedOption(_))
        ));
        assert_eq!(handle.applied_options(), None);

        let good = CaptureOptions {
            sample_rate: 16000,
            ..Default::default()
        };
        backend.configure(&good).unwrap();
        assert_eq!(handle.applied_options(), Some(good));
    }

    #[test]
    fn restart_replays_script() {
        let mut backend = ScriptedBackend::new(vec![vec![0x01]], vec![0xFF]);
        let (on_data, data) = recording_callback();
        let (on_finished, finished) = recording_callback();

        backend.start(on_data.clone(), on_finished.clone()).unwrap();
        backend.stop().unwrap();
        backend.start(on_data, on_finished).unwrap();
        backend.stop().unwrap();

        assert_eq!(data.lock().len(), 2);
        assert_eq!(finished.lock().len(), 2);
    }
}
