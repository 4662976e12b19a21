use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::models::chunk::AudioChunk;
use crate::models::error::CaptureError;
use crate::traits::capture_listener::CaptureListener;

/// Which listener reaction a broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPhase {
    Data,
    Finished,
}

struct Entry {
    listener: Weak<dyn CaptureListener>,
    /// Cleared by `remove` so in-flight snapshots skip the entry.
    registered: AtomicBool,
}

impl Entry {
    fn is(&self, ptr: *const ()) -> bool {
        self.listener.as_ptr() as *const () == ptr
    }

    fn is_live(&self) -> bool {
        self.registered.load(Ordering::Acquire) && self.listener.strong_count() > 0
    }
}

/// Ordered, duplicate-free set of non-owning listener references.
///
/// Mutation may happen from any thread. `broadcast` copies the entry list
/// under the lock and iterates the copy with the lock released, so listeners
/// may add or remove listeners (including themselves) from inside a reaction.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Arc<Entry>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Adding an already-registered listener is a no-op.
    /// Returns whether the listener was newly added.
    pub fn add<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CaptureListener + 'static,
    {
        let listener: Arc<dyn CaptureListener> = listener.clone();
        self.add_dyn(&listener)
    }

    /// `add` for hosts that only hold a type-erased listener.
    pub fn add_dyn(&self, listener: &Arc<dyn CaptureListener>) -> bool {
        let ptr = Arc::as_ptr(listener) as *const ();
        let mut entries = self.entries.lock();
        entries.retain(|e| e.is_live());
        if entries.iter().any(|e| e.is(ptr)) {
            return false;
        }

        entries.push(Arc::new(Entry {
            listener: Arc::downgrade(listener),
            registered: AtomicBool::new(true),
        }));
        true
    }

    /// Unregister `listener`. Removing an absent listener is a no-op.
    /// Returns whether anything was removed.
    ///
    /// Once this returns, no broadcast delivers to `listener` again, including
    /// one already in progress on another thread that has not reached it yet.
    pub fn remove<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CaptureListener + ?Sized,
    {
        let ptr = Arc::as_ptr(listener) as *const ();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| {
            if e.is(ptr) {
                e.registered.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        let removed = entries.len() != before;
        entries.retain(|e| e.is_live());
        removed
    }

    pub fn contains<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CaptureListener + ?Sized,
    {
        let ptr = Arc::as_ptr(listener) as *const ();
        self.entries
            .lock()
            .iter()
            .any(|e| e.is(ptr) && e.is_live())
    }

    /// Number of registered listeners that are still alive.
    pub fn len(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter() {
            entry.registered.store(false, Ordering::Release);
        }
        entries.clear();
    }

    /// Deliver `chunk` to every registered listener in insertion order.
    ///
    /// A listener that returns an error or panics does not stop delivery to
    /// the rest. Each failure is logged and returned.
    pub fn broadcast(&self, phase: BroadcastPhase, chunk: &AudioChunk) -> Vec<CaptureError> {
        let snapshot: Vec<Arc<Entry>> = {
            let mut entries = self.entries.lock();
            entries.retain(|e| e.is_live());
            entries.clone()
        };

        let mut failures = Vec::new();
        for entry in snapshot {
            if !entry.registered.load(Ordering::Acquire) {
                continue;
            }
            let Some(listener) = entry.listener.upgrade() else {
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match phase {
                BroadcastPhase::Data => listener.on_audio_data(chunk),
                BroadcastPhase::Finished => listener.on_capture_finished(chunk),
            }));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            log::warn!(
                "listener failed during {:?} broadcast of chunk {}: {}",
                phase,
                chunk.sequence(),
                message
            );
            failures.push(CaptureError::ListenerReactionFailed(message));
        }
        failures
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::capture_listener::ListenerFailure;

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<Vec<u8>>>,
        finished: Mutex<Vec<Vec<u8>>>,
    }

    impl CaptureListener for Recorder {
        fn on_audio_data(&self, chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            self.data.lock().push(chunk.to_vec());
            Ok(())
        }

        fn on_capture_finished(&self, chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            self.finished.lock().push(chunk.to_vec());
            Ok(())
        }
    }

    struct Failing;

    impl CaptureListener for Failing {
        fn on_audio_data(&self, _chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            Err("decoder rejected chunk".into())
        }
    }

    struct Panicking;

    impl CaptureListener for Panicking {
        fn on_audio_data(&self, _chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            panic!("listener blew up");
        }
    }

    /// Appends its tag to a shared log so ordering across listeners is visible.
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CaptureListener for Tagged {
        fn on_audio_data(&self, _chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            self.log.lock().push(self.tag);
            Ok(())
        }
    }

    fn chunk(bytes: &[u8]) -> AudioChunk {
        AudioChunk::new(bytes, 0)
    }

    #[test]
    fn add_is_idempotent() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());

        assert!(registry.add(&listener));
        assert!(!registry.add(&listener));
        assert_eq!(registry.len(), 1);

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0xAA]));
        assert_eq!(listener.data.lock().len(), 1);
    }

    #[test]
    fn type_erased_listener_matches_its_concrete_handle() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());
        let erased: Arc<dyn CaptureListener> = listener.clone();

        assert!(registry.add_dyn(&erased));
        assert!(!registry.add(&listener));
        assert_eq!(registry.len(), 1);

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0xAB]));
        assert_eq!(*listener.data.lock(), vec![vec![0xAB]]);

        assert!(registry.remove(&listener));
        assert!(!registry.contains(&erased));
        assert!(!registry.remove(&erased));
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = ListenerRegistry::new();
        let present = Arc::new(Recorder::default());
        let absent = Arc::new(Recorder::default());
        registry.add(&present);

        assert!(!registry.remove(&absent));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&present));
    }

    #[test]
    fn broadcasts_in_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Tagged { tag: "L1", log: Arc::clone(&log) });
        let second = Arc::new(Tagged { tag: "L2", log: Arc::clone(&log) });
        registry.add(&first);
        registry.add(&second);

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0xAA]));
        assert_eq!(*log.lock(), vec!["L1", "L2"]);
    }

    #[test]
    fn finished_phase_targets_finished_reaction() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());
        registry.add(&listener);

        registry.broadcast(BroadcastPhase::Finished, &chunk(&[0xFF]));
        assert!(listener.data.lock().is_empty());
        assert_eq!(*listener.finished.lock(), vec![vec![0xFF]]);
    }

    #[test]
    fn failures_are_isolated() {
        let registry = ListenerRegistry::new();
        let before = Arc::new(Recorder::default());
        let failing = Arc::new(Failing);
        let panicking = Arc::new(Panicking);
        let after = Arc::new(Recorder::default());
        registry.add(&before);
        registry.add(&failing);
        registry.add(&panicking);
        registry.add(&after);

        let failures = registry.broadcast(BroadcastPhase::Data, &chunk(&[0x01]));

        assert_eq!(failures.len(), 2);
        assert_eq!(
            failures[0],
            CaptureError::ListenerReactionFailed("decoder rejected chunk".into())
        );
        assert_eq!(
            failures[1],
            CaptureError::ListenerReactionFailed("panicked: listener blew up".into())
        );
        assert_eq!(*before.data.lock(), vec![vec![0x01]]);
        assert_eq!(*after.data.lock(), vec![vec![0x01]]);
    }

    #[test]
    fn dropped_listener_is_pruned() {
        let registry = ListenerRegistry::new();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        registry.add(&kept);
        registry.add(&dropped);
        drop(dropped);

        assert_eq!(registry.len(), 1);
        let failures = registry.broadcast(BroadcastPhase::Data, &chunk(&[0x02]));
        assert!(failures.is_empty());
        assert_eq!(kept.data.lock().len(), 1);
    }

    /// Removes another listener from inside its own reaction.
    struct Remover {
        registry: Arc<ListenerRegistry>,
        victim: Arc<Recorder>,
    }

    impl CaptureListener for Remover {
        fn on_audio_data(&self, _chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            self.registry.remove(&self.victim);
            Ok(())
        }
    }

    #[test]
    fn removal_during_broadcast_skips_removed_listener() {
        let registry = Arc::new(ListenerRegistry::new());
        let victim = Arc::new(Recorder::default());
        let remover = Arc::new(Remover {
            registry: Arc::clone(&registry),
            victim: Arc::clone(&victim),
        });
        registry.add(&remover);
        registry.add(&victim);

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0x03]));

        assert!(victim.data.lock().is_empty());
        assert_eq!(registry.len(), 1);
    }

    /// Registers a late listener from inside its reaction.
    struct Adder {
        registry: Arc<ListenerRegistry>,
        late: Arc<Recorder>,
    }

    impl CaptureListener for Adder {
        fn on_audio_data(&self, _chunk: &AudioChunk) -> Result<(), ListenerFailure> {
            self.registry.add(&self.late);
            Ok(())
        }
    }

    #[test]
    fn listener_added_mid_broadcast_waits_for_next_chunk() {
        let registry = Arc::new(ListenerRegistry::new());
        let late = Arc::new(Recorder::default());
        let adder = Arc::new(Adder {
            registry: Arc::clone(&registry),
            late: Arc::clone(&late),
        });
        registry.add(&adder);

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0x04]));
        assert!(late.data.lock().is_empty());

        registry.broadcast(BroadcastPhase::Data, &chunk(&[0x05]));
        assert_eq!(*late.data.lock(), vec![vec![0x05]]);
    }

    #[test]
    fn clear_unregisters_everything() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Recorder::default());
        registry.add(&listener);
        registry.clear();

        assert!(registry.is_empty());
        registry.broadcast(BroadcastPhase::Data, &chunk(&[0x06]));
        assert!(listener.data.lock().is_empty());
    }
}
