pub mod listener_registry;

pub use listener_registry::{BroadcastPhase, ListenerRegistry};
