use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::protocol::{EventKind, InboundEvent};

type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
type WildcardHandler = Arc<dyn Fn(EventKind, &InboundEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventKind, Vec<(u64, Handler)>>,
    wildcard_subscribers: Vec<(u64, WildcardHandler)>,
}

impl Registry {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Synchronous publish/subscribe bus keyed by [`EventKind`].
///
/// Handlers for a kind run in registration order, followed by the wildcard
/// handlers in registration order. `dispatch` returns only after every
/// handler has run, so one event is fully applied before the next is
/// dispatched.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

/// Handle returned by [`Dispatcher::on`] and [`Dispatcher::on_any`].
///
/// Dropping the handle leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    id: u64,
    kind: Option<EventKind>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        match self.kind {
            Some(kind) => {
                if let Some(subs) = registry.subscribers.get_mut(&kind) {
                    subs.retain(|(id, _)| *id != self.id);
                }
            }
            None => registry
                .wildcard_subscribers
                .retain(|(id, _)| *id != self.id),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("next_id", &self.next_id)
            .field("kinds", &self.subscribers.len())
            .field("wildcard", &self.wildcard_subscribers.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.allocate_id();
        registry
            .subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
            kind: Some(kind),
        }
    }

    /// Registers a wildcard handler that sees every dispatched event.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(EventKind, &InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.allocate_id();
        registry.wildcard_subscribers.push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            id,
            kind: None,
        }
    }

    pub fn dispatch(&self, event: &InboundEvent) {
        let kind = event.kind();

        // Snapshot the handler lists so handlers may (un)subscribe re-entrantly.
        let (handlers, wildcard): (Vec<Handler>, Vec<WildcardHandler>) = {
            let registry = self.registry.lock();
            (
                registry
                    .subscribers
                    .get(&kind)
                    .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default(),
                registry
                    .wildcard_subscribers
                    .iter()
                    .map(|(_, h)| Arc::clone(h))
                    .collect(),
            )
        };

        tracing::trace!(
            kind = %kind,
            handlers = handlers.len(),
            wildcard = wildcard.len(),
            "dispatching event"
        );

        for handler in handlers {
            handler(event);
        }
        for handler in wildcard {
            handler(kind, event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .subscribers
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn wildcard_count(&self) -> usize {
        self.registry.lock().wildcard_subscribers.len()
    }
}
