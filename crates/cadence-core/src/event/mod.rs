//! Lifecycle event delivery.
//!
//! Every engine owns one `EventSink`, which fans each `WorkflowEvent` out to
//! a broadcast `EventBus` (for async subscribers) and to any registered
//! `ExecutionObserver`s (called synchronously, in registration order).

pub mod bus;
pub mod observer;

pub use bus::EventBus;
pub use observer::{EventSink, ExecutionObserver};
