//! # audio-relay-core
//!
//! Platform-agnostic audio capture relay.
//!
//! Owns a single capture backend, moves every chunk it produces off the
//! capture thread onto a consumer context chosen by the host, and fans each
//! chunk out to a dynamic set of listeners. Platform backends (Windows
//! WASAPI, or the in-process `ScriptedBackend`) implement `CaptureBackend`
//! and plug into the generic `CaptureSessionManager`.
//!
//! ## Architecture
//!
//! ```text
//! audio-relay-core (this crate)
//! ├── traits/    ← CaptureBackend, CaptureListener, SessionDelegate
//! ├── models/    ← AudioChunk, CaptureOptions, CaptureError, CaptureState, diagnostics
//! ├── dispatch/  ← Dispatcher / ConsumerLoop (cross-thread marshaling)
//! ├── registry/  ← ListenerRegistry (snapshot broadcast)
//! ├── session/   ← CaptureSessionManager (lifecycle orchestrator)
//! └── backends/  ← ScriptedBackend
//! ```
//!
//! ## Usage
//! ```ignore
//! use audio_relay_core::{delivery_queue, CaptureSessionManager, ScriptedBackend};
//!
//! let (dispatcher, consumer) = delivery_queue();
//! let manager = CaptureSessionManager::new(dispatcher, || {
//!     Ok(ScriptedBackend::new(vec![vec![0x01, 0x02]], vec![0xFF]))
//! });
//! manager.add_listener(&my_listener);
//! manager.start_capture(None, None)?;
//!
//! // On the host's main loop:
//! consumer.run_pending();
//! ```

pub mod backends;
pub mod dispatch;
pub mod models;
pub mod registry;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::scripted::{ScriptHandle, ScriptedBackend};
pub use dispatch::consumer::{delivery_queue, spawn_consumer_thread, ConsumerHandle, ConsumerLoop, Dispatcher};
pub use models::chunk::AudioChunk;
pub use models::config::CaptureOptions;
pub use models::diagnostics::DeliveryDiagnostics;
pub use models::error::CaptureError;
pub use models::state::CaptureState;
pub use registry::listener_registry::{BroadcastPhase, ListenerRegistry};
pub use session::manager::{AudioCallback, BackendFactory, CaptureSessionManager};
pub use traits::capture_backend::{CaptureBackend, ChunkCallback};
pub use traits::capture_delegate::SessionDelegate;
pub use traits::capture_listener::{CaptureListener, ListenerFailure};
