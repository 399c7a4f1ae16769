// Typed publish/subscribe bus between the connection manager and its consumers
// Delivery is synchronous on the publishing task, in registration order.

use crate::error::StreamError;
use crate::models::PriceUpdate;
use crate::stats::Statistics;
use log::error;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Message,
    PriceUpdate,
    StatsUpdated,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected,
    Disconnected { code: u16, reason: String },
    Error(Arc<StreamError>),
    /// Any decoded application frame, price frames included
    Message(Value),
    PriceUpdate(PriceUpdate),
    StatsUpdated(Statistics),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Connected => EventKind::Connected,
            StreamEvent::Disconnected { .. } => EventKind::Disconnected,
            StreamEvent::Error(_) => EventKind::Error,
            StreamEvent::Message(_) => EventKind::Message,
            StreamEvent::PriceUpdate(_) => EventKind::PriceUpdate,
            StreamEvent::StatsUpdated(_) => EventKind::StatsUpdated,
        }
    }

    pub fn error(err: StreamError) -> Self {
        StreamEvent::Error(Arc::new(err))
    }
}

/// Handlers are compared by `Arc` identity; keep the `Arc` to unsubscribe later.
pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. Registering the same handler twice is a no-op.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let list = handlers.entry(kind).or_default();
        if !list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            list.push(handler);
        }
    }

    /// Remove every registration of `handler` for `kind`. Unknown handlers are ignored.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to the handlers registered for its kind.
    /// A panicking handler is logged and skipped.
    pub fn publish(&self, event: &StreamEvent) {
        let kind = event.kind();
        // handlers may (un)subscribe while being called
        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&kind) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => return,
            }
        };

        for (idx, handler) in targets.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("{:?} handler #{} panicked; continuing delivery", kind, idx);
            }
        }
    }
}
