//! Domain event dispatcher: deliver committed facts to subscribers.
//!
//! Subscription happens before operations begin; dispatch happens
//! synchronously after a unit of work commits. A failing handler never
//! prevents the remaining handlers from running; collected failures are
//! reported to the dispatch caller as one aggregate error, never dropped.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use trellis_core::{CoreError, CoreResult, EventRecord};

/// One handler's failure during a dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub subscriber: String,
    pub event_type: String,
    pub error: CoreError,
}

/// Aggregate of every handler failure collected while dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event delivery partially failed: {}", summary(failures))]
pub struct DeliveryError {
    pub failures: Vec<HandlerFailure>,
}

fn summary(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} <- {} ({})", f.subscriber, f.event_type, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<DeliveryError> for CoreError {
    fn from(value: DeliveryError) -> Self {
        CoreError::unexpected(value.to_string())
    }
}

struct Subscriber {
    name: String,
    handler: Box<dyn Fn(&EventRecord) -> CoreResult<()> + Send + Sync>,
}

/// Pub/sub dispatcher for domain events, keyed by event type tag.
///
/// Handlers per event type are invoked in subscription order. Handlers
/// receive a shared reference to the immutable record; mutation is not
/// possible through its API.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<String, usize> = match self.subscribers.read() {
            Ok(map) => map.iter().map(|(k, v)| (k.clone(), v.len())).collect(),
            Err(_) => HashMap::new(),
        };
        f.debug_struct("EventDispatcher")
            .field("subscribers", &counts)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. Multiple handlers per type are
    /// supported; they run in subscription order.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, name: impl Into<String>, handler: F)
    where
        F: Fn(&EventRecord) -> CoreResult<()> + Send + Sync + 'static,
    {
        let subscriber = Subscriber {
            name: name.into(),
            handler: Box::new(handler),
        };
        if let Ok(mut map) = self.subscribers.write() {
            map.entry(event_type.into()).or_default().push(subscriber);
        }
    }

    /// Invoke every handler matching the event's type tag.
    ///
    /// Every handler runs even when an earlier one fails; failures are
    /// collected and returned together after the pass. An event type with
    /// no subscribers is a successful no-op.
    pub fn dispatch(&self, event: &EventRecord) -> Result<(), DeliveryError> {
        let mut failures = Vec::new();
        self.dispatch_into(event, &mut failures);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError { failures })
        }
    }

    /// Dispatch a batch in order, aggregating failures across all events.
    pub fn dispatch_all(&self, events: &[EventRecord]) -> Result<(), DeliveryError> {
        let mut failures = Vec::new();
        for event in events {
            self.dispatch_into(event, &mut failures);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError { failures })
        }
    }

    fn dispatch_into(&self, event: &EventRecord, failures: &mut Vec<HandlerFailure>) {
        let map = match self.subscribers.read() {
            Ok(map) => map,
            Err(_) => {
                failures.push(HandlerFailure {
                    subscriber: "<dispatcher>".into(),
                    event_type: event.event_type().to_string(),
                    error: CoreError::unexpected("subscriber registry lock poisoned"),
                });
                return;
            }
        };

        let Some(subscribers) = map.get(event.event_type()) else {
            return;
        };

        for subscriber in subscribers {
            match (subscriber.handler)(event) {
                Ok(()) => {
                    tracing::debug!(
                        target: "trellis::dispatch",
                        event_type = event.event_type(),
                        subscriber = subscriber.name.as_str(),
                        "event delivered"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        target: "trellis::dispatch",
                        event_type = event.event_type(),
                        subscriber = subscriber.name.as_str(),
                        %error,
                        "event handler failed"
                    );
                    failures.push(HandlerFailure {
                        subscriber: subscriber.name.clone(),
                        event_type: event.event_type().to_string(),
                        error,
                    });
                }
            }
        }
    }
}
