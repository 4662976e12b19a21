pub mod scripted;

pub use scripted::{ScriptHandle, ScriptedBackend};
