//! Fire-and-forget event emission.
//!
//! The emitter is called only after a transaction has committed. A handler
//! failure (error or panic) is logged and swallowed; observability must never
//! break a committed financial operation.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::RwLock;

use crate::event::DomainEvent;

type Handler = Box<dyn Fn(&DomainEvent) + Send + Sync>;

/// Registry of per-event-name handlers with best-effort dispatch.
///
/// - No IO / no async
/// - At-most-once: no retry, no durable queue
/// - Handlers for the same name run in registration order
#[derive(Default)]
pub struct EventEmitter {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `name`.
    pub fn on_event(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) {
        // A poisoned registry only loses future registrations, never posted data.
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.entry(name.into()).or_default().push(Box::new(handler));
        }
    }

    /// Deliver `event` to every handler registered for its name.
    ///
    /// Handler panics are caught and logged; nothing propagates to the caller.
    pub fn emit(&self, event: &DomainEvent) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers,
            Err(_) => {
                tracing::warn!(event = %event.name, "event emitter registry poisoned; dropping event");
                return;
            }
        };

        let Some(matching) = handlers.get(&event.name) else {
            return;
        };

        for handler in matching {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(
                    event = %event.name,
                    tenant = %event.tenant_id,
                    "event handler panicked; continuing"
                );
            }
        }
    }
}

impl core::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let count = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventEmitter").field("event_names", &count).finish()
    }
}
