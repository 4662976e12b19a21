//! Delivery marshaling between the capture thread and the consumer context.
//!
//! ```text
//! [backend thread] --dispatch()--> [unbounded FIFO] --run_*()--> [consumer context]
//! ```
//!
//! The producer side only ever enqueues. Tasks run on whichever thread drives
//! the `ConsumerLoop`, in the order they were submitted.

pub mod consumer;

pub use consumer::{
    delivery_queue, spawn_consumer_thread, ConsumerHandle, ConsumerLoop, Dispatcher, Task,
};
