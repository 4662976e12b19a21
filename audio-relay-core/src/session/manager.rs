use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::models::chunk::AudioChunk;
use crate::models::config::CaptureOptions;
use crate::models::diagnostics::DeliveryDiagnostics;
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::registry::listener_registry::{panic_message, BroadcastPhase, ListenerRegistry};
use crate::traits::capture_backend::{CaptureBackend, ChunkCallback};
use crate::traits::capture_delegate::SessionDelegate;
use crate::traits::capture_listener::CaptureListener;

/// Caller-level callback passed to `start_capture`. Runs on the consumer
/// context after every registered listener has seen the chunk.
pub type AudioCallback = Arc<dyn Fn(&AudioChunk) + Send + Sync + 'static>;

/// Builds the backend on first use.
pub type BackendFactory<B> = Box<dyn FnMut() -> Result<B, CaptureError> + Send + 'static>;

struct BackendSlot<B> {
    backend: Option<B>,
    factory: Option<BackendFactory<B>>,
}

impl<B: CaptureBackend> BackendSlot<B> {
    fn get_or_create(&mut self) -> Result<&mut B, CaptureError> {
        if self.backend.is_none() {
            let factory = self.factory.as_mut().ok_or_else(|| {
                CaptureError::BackendUnavailable("no backend factory configured".into())
            })?;
            let backend = factory().map_err(|e| match e {
                CaptureError::BackendUnavailable(_) => e,
                other => CaptureError::BackendUnavailable(other.to_string()),
            })?;
            log::debug!("capture backend created");
            self.backend = Some(backend);
        }
        self.backend
            .as_mut()
            .ok_or_else(|| CaptureError::BackendUnavailable("backend missing".into()))
    }
}

/// State shared between the manager, the producer-side wrappers, and the
/// consumer-side delivery tasks.
struct Shared {
    state: Mutex<CaptureState>,
    /// Held while a run leaves or enters `Idle`, so a new run cannot start
    /// between the old run going idle and its finished task being queued.
    run_gate: Mutex<()>,
    diagnostics: Mutex<DeliveryDiagnostics>,
    delegate: Mutex<Option<Arc<dyn SessionDelegate>>>,
}

impl Shared {
    fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Move to `next` only if the current state is `expected`.
    fn transition(&self, expected: CaptureState, next: CaptureState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != expected {
                return false;
            }
            *state = next;
        }
        self.notify_state(&next);
        true
    }

    /// Return to idle if `run_id` is still the current run.
    fn end_run(&self, run_id: Uuid) -> bool {
        {
            let mut state = self.state.lock();
            if state.run_id() != Some(run_id) {
                return false;
            }
            *state = CaptureState::Idle;
        }
        self.notify_state(&CaptureState::Idle);
        true
    }

    fn notify_state(&self, state: &CaptureState) {
        let delegate = self.delegate.lock().clone();
        if let Some(delegate) = delegate {
            delegate.on_state_changed(state);
        }
    }

    fn report_listener_errors(&self, errors: &[CaptureError]) {
        if errors.is_empty() {
            return;
        }
        self.diagnostics.lock().listener_failures += errors.len() as u64;
        let delegate = self.delegate.lock().clone();
        if let Some(delegate) = delegate {
            for error in errors {
                delegate.on_listener_error(error);
            }
        }
    }
}

/// Per-run bookkeeping captured by that run's wrapped callbacks.
struct RunContext {
    run_id: Uuid,
    delivery: Mutex<RunDelivery>,
}

/// Locked across the finished check, sequencing and dispatch of every chunk.
#[derive(Default)]
struct RunDelivery {
    next_sequence: u64,
    finished: bool,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            delivery: Mutex::new(RunDelivery::default()),
        }
    }
}

/// Owns one capture backend and fans its chunks out to listeners.
///
/// Data flow for one run:
/// ```text
/// [backend thread] → wrapped callback → copy + sequence → Dispatcher
///                                                           ↓
/// [consumer context] ← ConsumerLoop ← broadcast to listeners → caller callback
/// ```
///
/// Every method takes `&self`; share the manager behind an `Arc` to control
/// it from several threads. Listeners and caller callbacks only ever run on
/// the consumer context that drains the `Dispatcher` given at construction.
///
/// `start_capture` while a run is active (or still stopping) is rejected with
/// `AlreadyCapturing`; there is no implicit restart.
pub struct CaptureSessionManager<B: CaptureBackend> {
    slot: Mutex<BackendSlot<B>>,
    registry: Arc<ListenerRegistry>,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
}

impl<B: CaptureBackend + 'static> CaptureSessionManager<B> {
    /// Create a manager that builds its backend lazily on the first
    /// `start_capture`. The factory is retried on the next start if it fails.
    pub fn new<F>(dispatcher: Dispatcher, factory: F) -> Self
    where
        F: FnMut() -> Result<B, CaptureError> + Send + 'static,
    {
        Self::from_slot(
            dispatcher,
            BackendSlot {
                backend: None,
                factory: Some(Box::new(factory)),
            },
        )
    }

    /// Create a manager around an already constructed backend, so options can
    /// be set before the first start.
    pub fn with_backend(dispatcher: Dispatcher, backend: B) -> Self {
        Self::from_slot(
            dispatcher,
            BackendSlot {
                backend: Some(backend),
                factory: None,
            },
        )
    }

    fn from_slot(dispatcher: Dispatcher, slot: BackendSlot<B>) -> Self {
        Self {
            slot: Mutex::new(slot),
            registry: Arc::new(ListenerRegistry::new()),
            dispatcher,
            shared: Arc::new(Shared {
                state: Mutex::new(CaptureState::Idle),
                run_gate: Mutex::new(()),
                diagnostics: Mutex::new(DeliveryDiagnostics::default()),
                delegate: Mutex::new(None),
            }),
        }
    }

    /// Install the diagnostic delegate. The delegate must not call back into
    /// `start_capture`, `stop_capture` or `set_options`.
    pub fn set_delegate(&self, delegate: Arc<dyn SessionDelegate>) {
        *self.shared.delegate.lock() = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    /// True while a run is capturing or winding down.
    pub fn is_active(&self) -> bool {
        !self.shared.state().is_idle()
    }

    pub fn has_backend(&self) -> bool {
        self.slot.lock().backend.is_some()
    }

    pub fn diagnostics(&self) -> DeliveryDiagnostics {
        self.shared.diagnostics.lock().clone()
    }

    /// Start a capture run and return its ID.
    ///
    /// Creates the backend if needed, wraps both backend callbacks so their
    /// bodies run on the consumer context, and starts the backend.
    pub fn start_capture(
        &self,
        on_audio_data: Option<AudioCallback>,
        on_capture_finished: Option<AudioCallback>,
    ) -> Result<Uuid, CaptureError> {
        let mut slot = self.slot.lock();

        if !self.shared.state().is_idle() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let backend = slot.get_or_create()?;
        if !backend.is_available() {
            return Err(CaptureError::BackendUnavailable(
                "capture device not available".into(),
            ));
        }

        let run = Arc::new(RunContext::new());
        let on_data = self.wrap_data(Arc::clone(&run), on_audio_data);
        let on_finished = self.wrap_finished(Arc::clone(&run), on_capture_finished);

        // Enter the run before the backend starts: its first callbacks may
        // fire before `start` returns.
        let capturing = CaptureState::Capturing { run_id: run.run_id };
        let entered = {
            let _gate = self.shared.run_gate.lock();
            self.shared.transition(CaptureState::Idle, capturing)
        };
        if !entered {
            return Err(CaptureError::AlreadyCapturing);
        }
        self.shared.diagnostics.lock().runs_started += 1;

        if let Err(e) = backend.start(on_data, on_finished) {
            run.delivery.lock().finished = true;
            self.shared.end_run(run.run_id);
            log::error!("failed to start capture run {}: {}", run.run_id, e);
            return Err(e);
        }

        log::info!("capture run {} started", run.run_id);
        Ok(run.run_id)
    }

    /// Request the active run to stop. Idle sessions return `Ok(())`.
    ///
    /// The terminal chunk arrives through the backend's finished callback,
    /// which may or may not fire before this returns.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        let mut slot = self.slot.lock();

        let run_id = match self.shared.state() {
            CaptureState::Capturing { run_id } => run_id,
            CaptureState::Idle | CaptureState::Stopping { .. } => return Ok(()),
        };
        let Some(backend) = slot.backend.as_mut() else {
            return Ok(());
        };

        self.shared.transition(
            CaptureState::Capturing { run_id },
            CaptureState::Stopping { run_id },
        );

        if let Err(e) = backend.stop() {
            // The backend refused; the run is still live.
            self.shared.transition(
                CaptureState::Stopping { run_id },
                CaptureState::Capturing { run_id },
            );
            log::error!("failed to stop capture run {}: {}", run_id, e);
            return Err(e);
        }

        log::info!("capture run {} stop requested", run_id);
        Ok(())
    }

    /// Forward `options` to the backend.
    ///
    /// Fails with `NoActiveBackend` until a backend exists, regardless of the
    /// option values. Changes during a run are passed through; the backend
    /// decides when they apply.
    pub fn set_options(&self, options: CaptureOptions) -> Result<(), CaptureError> {
        let mut slot = self.slot.lock();
        let backend = slot.backend.as_mut().ok_or(CaptureError::NoActiveBackend)?;
        options.validate()?;
        backend.configure(&options)?;
        log::debug!(
            "capture options applied: {} Hz, {} bit, {} ch",
            options.sample_rate,
            options.bit_depth,
            options.channels
        );
        Ok(())
    }

    /// Register a listener. The manager keeps only a weak reference.
    /// Returns false if it was already registered.
    pub fn add_listener<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CaptureListener + 'static,
    {
        self.registry.add(listener)
    }

    /// Register a type-erased listener. Same semantics as `add_listener`.
    pub fn add_dyn_listener(&self, listener: &Arc<dyn CaptureListener>) -> bool {
        self.registry.add_dyn(listener)
    }

    /// Unregister a listener. Absent listeners are ignored.
    pub fn remove_listener<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CaptureListener + ?Sized,
    {
        self.registry.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    fn wrap_data(&self, run: Arc<RunContext>, callback: Option<AudioCallback>) -> ChunkCallback {
        let registry = Arc::clone(&self.registry);
        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();

        Arc::new(move |bytes: &[u8]| {
            let mut delivery = run.delivery.lock();
            if delivery.finished {
                drop(delivery);
                shared.diagnostics.lock().late_chunks_dropped += 1;
                log::warn!("run {}: dropping data chunk received after finish", run.run_id);
                return;
            }

            let sequence = delivery.next_sequence;
            delivery.next_sequence += 1;
            let chunk = AudioChunk::new(bytes, sequence);
            let registry = Arc::clone(&registry);
            let task_shared = Arc::clone(&shared);
            let callback = callback.clone();

            let queued = dispatcher.dispatch(move || {
                deliver(&registry, &task_shared, BroadcastPhase::Data, &chunk, callback.as_ref());
            });
            drop(delivery);
            match queued {
                Ok(()) => shared.diagnostics.lock().chunks_marshaled += 1,
                Err(e) => log::warn!("run {}: chunk {} not delivered: {}", run.run_id, sequence, e),
            }
        })
    }

    fn wrap_finished(&self, run: Arc<RunContext>, callback: Option<AudioCallback>) -> ChunkCallback {
        let registry = Arc::clone(&self.registry);
        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();

        Arc::new(move |bytes: &[u8]| {
            let mut delivery = run.delivery.lock();
            if delivery.finished {
                log::warn!("run {}: ignoring duplicate finished callback", run.run_id);
                return;
            }
            delivery.finished = true;

            let chunk = AudioChunk::new(bytes, delivery.next_sequence);
            let registry = Arc::clone(&registry);
            let task_shared = Arc::clone(&shared);
            let callback = callback.clone();

            // The next run can only start once the terminal chunk is queued.
            let gate = shared.run_gate.lock();
            shared.end_run(run.run_id);
            let queued = dispatcher.dispatch(move || {
                deliver(&registry, &task_shared, BroadcastPhase::Finished, &chunk, callback.as_ref());
            });
            drop(gate);
            drop(delivery);

            match queued {
                Ok(()) => log::info!("capture run {} finished", run.run_id),
                Err(e) => log::warn!("run {}: finished chunk not delivered: {}", run.run_id, e),
            }
        })
    }
}

impl<B: CaptureBackend> Drop for CaptureSessionManager<B> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if self.shared.state().is_capturing() {
            if let Some(backend) = slot.backend.as_mut() {
                if let Err(e) = backend.stop() {
                    log::error!("failed to stop capture on shutdown: {}", e);
                }
            }
        }
    }
}

/// Consumer-side body of every marshaled task: listeners first, then the
/// caller's callback.
fn deliver(
    registry: &ListenerRegistry,
    shared: &Shared,
    phase: BroadcastPhase,
    chunk: &AudioChunk,
    callback: Option<&AudioCallback>,
) {
    let mut failures = registry.broadcast(phase, chunk);
    {
        let mut diagnostics = shared.diagnostics.lock();
        match phase {
            BroadcastPhase::Data => diagnostics.data_broadcasts += 1,
            BroadcastPhase::Finished => diagnostics.finished_broadcasts += 1,
        }
    }

    if let Some(callback) = callback {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(chunk))) {
            let message = format!("caller callback {}", panic_message(payload.as_ref()));
            log::warn!("{:?} delivery of chunk {}: {}", phase, chunk.sequence(), message);
            failures.push(CaptureError::ListenerReactionFailed(message));
        }
    }

    shared.report_listener_errors(&failures);
}
