//! Synchronous observers and the engine-wide event sink.

use std::sync::{Arc, PoisonError, RwLock};

use cadence_types::event::WorkflowEvent;
use tokio::sync::broadcast;

use super::bus::EventBus;

/// Receives every lifecycle event emitted by an engine.
///
/// Called inline on the emitting task, so implementations must be quick and
/// must not block. Anything slow belongs behind `EventBus::subscribe`.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

impl<F> ExecutionObserver for F
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    fn on_event(&self, event: &WorkflowEvent) {
        self(event)
    }
}

/// Fans events out to the broadcast bus and all registered observers.
#[derive(Clone)]
pub struct EventSink {
    bus: EventBus,
    observers: Arc<RwLock<Vec<Arc<dyn ExecutionObserver>>>>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            bus: EventBus::new(capacity),
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ExecutionObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }

    /// Deliver to observers first, then publish on the bus.
    pub fn emit(&self, event: WorkflowEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer.on_event(&event);
        }
        self.bus.publish(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let observers = self
            .observers
            .read()
            .map(|o| o.len())
            .unwrap_or_default();
        f.debug_struct("EventSink")
            .field("bus", &self.bus)
            .field("observers", &observers)
            .finish()
    }
}
