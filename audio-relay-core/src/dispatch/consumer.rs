use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::models::error::CaptureError;
use crate::registry::listener_registry::panic_message;

/// A unit of work marshaled onto the consumer context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Create a connected dispatcher / consumer loop pair.
///
/// The queue is unbounded: the capture thread never blocks and chunks are
/// never dropped while the consumer is alive.
pub fn delivery_queue() -> (Dispatcher, ConsumerLoop) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Dispatcher { tx }, ConsumerLoop { rx })
}

/// Producer-side handle. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Task>,
}

impl Dispatcher {
    /// Queue `task` for the consumer context. Never runs it inline.
    pub fn dispatch<F>(&self, task: F) -> Result<(), CaptureError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(task))
            .map_err(|_| CaptureError::ConsumerClosed)
    }

    /// Number of tasks queued but not yet run.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer-side half. Whoever owns it is the consumer context.
pub struct ConsumerLoop {
    rx: Receiver<Task>,
}

impl ConsumerLoop {
    /// Run every task already queued, without blocking. Returns how many ran.
    ///
    /// Intended for hosts that already have a main loop or frame tick.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for the first task, then drain whatever else is
    /// queued. Returns how many tasks ran.
    pub fn run_until_idle(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep running tasks until `done` returns true or `timeout` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until<P>(&self, timeout: Duration, mut done: P) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => return done(),
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// Block running tasks until every `Dispatcher` has been dropped and the
    /// queue is empty.
    pub fn run(self) {
        for task in self.rx.iter() {
            task();
        }
    }
}

/// Handle to a dedicated consumer thread started by `spawn_consumer_thread`.
pub struct ConsumerHandle {
    handle: thread::JoinHandle<()>,
}

impl ConsumerHandle {
    /// Wait for the consumer thread to finish. It exits once every
    /// dispatcher is dropped and all queued tasks have run.
    pub fn join(self) -> Result<(), CaptureError> {
        self.handle.join().map_err(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("consumer thread {}", message);
            CaptureError::ConsumerPanicked(message)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Start a thread that acts as the consumer context.
///
/// For hosts without a main loop of their own.
pub fn spawn_consumer_thread(name: &str) -> Result<(Dispatcher, ConsumerHandle), CaptureError> {
    let (dispatcher, consumer) = delivery_queue();
    let handle = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            consumer.run();
            log::debug!("consumer thread exiting");
        })
        .map_err(|e| CaptureError::Backend(format!("failed to spawn consumer thread: {}", e)))?;
    Ok((dispatcher, ConsumerHandle { handle }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[test]
    fn dispatch_does_not_run_inline() {
        let (dispatcher, consumer) = delivery_queue();
        let ran = Arc::new(Mutex::new(false));

        let flag = Arc::clone(&ran);
        dispatcher.dispatch(move || *flag.lock() = true).unwrap();

        assert!(!*ran.lock());
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(consumer.run_pending(), 1);
        assert!(*ran.lock());
    }

    #[test]
    fn preserves_submission_order_across_threads() {
        let (dispatcher, consumer) = delivery_queue();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producer = {
            let dispatcher = dispatcher.clone();
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..500 {
                    let seen = Arc::clone(&seen);
                    dispatcher.dispatch(move || seen.lock().push(i)).unwrap();
                }
            })
        };
        producer.join().unwrap();

        assert_eq!(consumer.run_pending(), 500);
        let seen = seen.lock();
        assert!(seen.iter().copied().eq(0..500));
    }

    #[test]
    fn tasks_run_on_consumer_thread() {
        let (dispatcher, consumer) = delivery_queue();
        let consumer_thread = thread::current().id();
        let observed = Arc::new(Mutex::new(None));

        let producer = {
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                dispatcher
                    .dispatch(move || *observed.lock() = Some(thread::current().id()))
                    .unwrap();
            })
        };
        producer.join().unwrap();

        assert_eq!(consumer.run_until_idle(Duration::from_secs(1)), 1);
        assert_eq!(*observed.lock(), Some(consumer_thread));
    }

    #[test]
    fn dispatch_after_consumer_dropped_fails() {
        let (dispatcher, consumer) = delivery_queue();
        drop(consumer);

        assert_eq!(dispatcher.dispatch(|| {}), Err(CaptureError::ConsumerClosed));
    }

    #[test]
    fn run_until_idle_times_out_when_empty() {
        let (_dispatcher, consumer) = delivery_queue();
        assert_eq!(consumer.run_until_idle(Duration::from_millis(10)), 0);
    }

    #[test]
    fn run_until_stops_when_predicate_holds() {
        let (dispatcher, consumer) = delivery_queue();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            dispatcher.dispatch(move || *count.lock() += 1).unwrap();
        }

        let check = Arc::clone(&count);
        assert!(consumer.run_until(Duration::from_secs(1), || *check.lock() == 3));
        assert!(!consumer.run_until(Duration::from_millis(10), || *check.lock() == 4));
    }

    #[test]
    fn consumer_thread_drains_then_exits() {
        let (dispatcher, handle) = spawn_consumer_thread("test-consumer").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = Arc::clone(&seen);
            dispatcher
                .dispatch(move || {
                    assert_eq!(thread::current().name(), Some("test-consumer"));
                    seen.lock().push(i);
                })
                .unwrap();
        }
        drop(dispatcher);
        handle.join().unwrap();

        assert!(seen.lock().iter().copied().eq(0..10));
    }

    #[test]
    fn panicking_task_is_reported_as_consumer_failure() {
        let (dispatcher, handle) = spawn_consumer_thread("test-consumer-panic").unwrap();
        dispatcher.dispatch(|| panic!("task exploded")).unwrap();
        drop(dispatcher);

        assert_eq!(
            handle.join(),
            Err(CaptureError::ConsumerPanicked("panicked: task exploded".into()))
        );
    }
}
