//! Multi-subscriber event fan-out.
//!
//! Subscribers live in an index-based arena so handles never form ownership
//! cycles with the worker. Delivery is synchronous and in emission order; a
//! failing sink is logged and pruned without affecting its siblings.

use crate::protocol::{EventKind, EventMessage, EventPayload};
use rustc_hash::FxHashSet;
use tracing::warn;

/// Handle to a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

/// Raised by a sink when its receiver is gone.
#[derive(Debug)]
pub struct SinkClosed;

type Sink = Box<dyn FnMut(&EventMessage) -> Result<(), SinkClosed> + Send>;

struct Subscriber {
    /// `None` subscribes to every stream.
    kinds: Option<FxHashSet<EventKind>>,
    sink: Sink,
}

#[derive(Default)]
pub struct EventBroker {
    slots: Vec<Option<Subscriber>>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink for the given streams (`None` = all five).
    pub fn subscribe(
        &mut self,
        kinds: Option<impl IntoIterator<Item = EventKind>>,
        sink: Sink,
    ) -> SubscriberId {
        let subscriber = Subscriber {
            kinds: kinds.map(|kinds| kinds.into_iter().collect()),
            sink,
        };
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(subscriber);
                return SubscriberId(index);
            }
        }
        self.slots.push(Some(subscriber));
        SubscriberId(self.slots.len() - 1)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.slots
            .get_mut(id.0)
            .map(Option::take)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Delivers one event to every matching subscriber, in registration
    /// order. Sinks whose receiver vanished are pruned.
    pub fn emit(&mut self, payload: EventPayload) {
        let message = EventMessage {
            event: payload.kind(),
            payload,
        };
        for slot in &mut self.slots {
            let Some(subscriber) = slot else {
                continue;
            };
            if subscriber
                .kinds
                .as_ref()
                .is_some_and(|kinds| !kinds.contains(&message.event))
            {
                continue;
            }
            if (subscriber.sink)(&message).is_err() {
                warn!(event = ?message.event, "event subscriber closed, dropping it");
                *slot = None;
            }
        }
    }
}
