//! In-process message bus with request/response correlation.
//!
//! Every posted [`Message`] is appended to an in-memory log and handed to all
//! subscribed [`MessageHandler`]s concurrently. Posting a request registers a
//! single-use waiter keyed by its conversation id; the built-in correlator
//! fulfills that waiter when the matching response is posted, which is what
//! `post` returns to the requester.
//!
//! The log, the handler list and the correlation table are the only shared
//! state. Each sits behind its own lock and no lock is held across an await.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::error::{BusError, Error, Result};
use crate::event::{DomainEvent, EventBus};
use crate::message::{ConversationId, Message};

/// A subscriber invoked for every message posted on the bus.
///
/// Handlers may post further messages from inside `handle`, including the
/// response to the request they are handling.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, message: Arc<Message>, cancel: CancellationToken) -> Result<()>;
}

/// Correlation state of one conversation id.
enum Slot {
    /// A request is waiting for its response.
    Pending(oneshot::Sender<Arc<Message>>),
    /// The response has been delivered.
    Resolved,
    /// The requester gave up (cancelled or a handler failed).
    Abandoned,
}

struct BusState {
    log: RwLock<Vec<Arc<Message>>>,
    slots: Mutex<HashMap<ConversationId, Slot>>,
    orphans: Mutex<Vec<Arc<Message>>>,
    events: Option<Arc<EventBus>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusState {
    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    fn append(&self, message: Arc<Message>) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Insert-if-absent registration of a waiter. Ids are single-use.
    fn register(&self, conversation_id: &ConversationId) -> Result<oneshot::Receiver<Arc<Message>>> {
        let mut slots = lock(&self.slots);
        match slots.entry(conversation_id.clone()) {
            Entry::Occupied(existing) => {
                let reason = match existing.get() {
                    Slot::Pending(_) => "a request is already awaiting resolution",
                    Slot::Resolved | Slot::Abandoned => "conversation id has already been used",
                };
                Err(BusError::CorrelationConflict {
                    conversation_id: conversation_id.clone(),
                    reason: reason.into(),
                }
                .into())
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(Slot::Pending(tx));
                Ok(rx)
            }
        }
    }

    /// Give up on a waiter that has not been fulfilled yet.
    fn abandon(&self, conversation_id: &ConversationId) {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get_mut(conversation_id) {
            if matches!(slot, Slot::Pending(_)) {
                *slot = Slot::Abandoned;
                debug!(conversation_id = %conversation_id, "Waiter abandoned");
            }
        }
    }

    /// Fulfill the waiter for a response, or record it as an orphan.
    ///
    /// The slot transition happens under a single guard so a concurrent
    /// `register` can never observe the id as free.
    fn resolve(&self, response: &Arc<Message>) -> Result<()> {
        let conversation_id = &response.conversation_id;
        let mut slots = lock(&self.slots);

        match slots.get(conversation_id) {
            Some(Slot::Pending(_)) => {
                let previous = slots.insert(conversation_id.clone(), Slot::Resolved);
                drop(slots);
                if let Some(Slot::Pending(tx)) = previous {
                    if tx.send(Arc::clone(response)).is_err() {
                        debug!(conversation_id = %conversation_id, "Requester went away before resolution");
                    }
                }
                self.publish(DomainEvent::ResponseCorrelated {
                    conversation_id: conversation_id.to_string(),
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Some(Slot::Resolved) => Err(BusError::CorrelationConflict {
                conversation_id: conversation_id.clone(),
                reason: "conversation has already been resolved".into(),
            }
            .into()),
            Some(Slot::Abandoned) => {
                drop(slots);
                self.record_orphan(response, "waiter was abandoned");
                Ok(())
            }
            None => {
                drop(slots);
                self.record_orphan(response, "no matching request");
                Ok(())
            }
        }
    }

    fn record_orphan(&self, response: &Arc<Message>, reason: &str) {
        warn!(
            conversation_id = %response.conversation_id,
            message_id = %response.id,
            reason,
            "Dropping orphan response"
        );
        lock(&self.orphans).push(Arc::clone(response));
        self.publish(DomainEvent::OrphanResponse {
            message_id: response.id.clone(),
            conversation_id: response.conversation_id.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Built-in subscriber that matches responses to outstanding requests.
struct Correlator {
    state: Arc<BusState>,
}

#[async_trait]
impl MessageHandler for Correlator {
    fn name(&self) -> &str {
        "correlator"
    }

    async fn handle(&self, message: Arc<Message>, _cancel: CancellationToken) -> Result<()> {
        if !message.is_response() {
            return Ok(());
        }
        self.state.resolve(&message)
    }
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Append-only, in-memory publish/subscribe bus.
///
/// Nothing is ever evicted. The message log keeps every post, and the
/// correlation table keeps a resolved or abandoned marker for every
/// conversation id so ids stay single-use. Both grow for the lifetime of
/// the bus.
pub struct MessageBus {
    state: Arc<BusState>,
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a bus that reports correlation activity as domain events.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self::build(Some(events))
    }

    fn build(events: Option<Arc<EventBus>>) -> Self {
        let state = Arc::new(BusState {
            log: RwLock::new(Vec::new()),
            slots: Mutex::new(HashMap::new()),
            orphans: Mutex::new(Vec::new()),
            events,
        });
        let correlator: Arc<dyn MessageHandler> = Arc::new(Correlator {
            state: Arc::clone(&state),
        });
        Self {
            state,
            handlers: RwLock::new(vec![correlator]),
        }
    }

    /// Register a handler for every future post.
    ///
    /// Returns `false` if this exact handler is already subscribed.
    pub fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        debug!(handler = handler.name(), "Subscribed to bus");
        handlers.push(handler);
        true
    }

    /// Remove a previously subscribed handler.
    pub fn unsubscribe(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        handlers.len() != before
    }

    /// Post a message and, for requests, wait for the correlated response.
    ///
    /// Responses are returned as soon as every handler has seen them.
    /// Requests resolve to the response carrying the same conversation id.
    /// Errors from any handler propagate to this caller.
    pub async fn post(&self, message: Message, cancel: CancellationToken) -> Result<Arc<Message>> {
        let span = debug_span!(
            "bus.post",
            conversation_id = %message.conversation_id,
            direction = ?message.direction,
        );
        self.dispatch(Arc::new(message), cancel).instrument(span).await
    }

    async fn dispatch(&self, message: Arc<Message>, cancel: CancellationToken) -> Result<Arc<Message>> {
        let conversation_id = message.conversation_id.clone();

        let waiter = if message.is_request() {
            Some(self.state.register(&conversation_id)?)
        } else {
            None
        };

        self.state.append(Arc::clone(&message));
        self.state.publish(DomainEvent::MessagePosted {
            message_id: message.id.clone(),
            conversation_id: conversation_id.to_string(),
            is_request: message.is_request(),
            timestamp: Utc::now(),
        });

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(handlers = handlers.len(), "Dispatching to subscribers");

        let fan_out = join_all(
            handlers
                .iter()
                .map(|h| h.handle(Arc::clone(&message), cancel.clone())),
        );
        let results = tokio::select! {
            biased;
            results = fan_out => results,
            _ = cancel.cancelled() => {
                if waiter.is_some() {
                    self.state.abandon(&conversation_id);
                }
                return Err(Error::Cancelled);
            }
        };

        let mut first_error = None;
        for (handler, result) in handlers.iter().zip(results) {
            if let Err(e) = result {
                warn!(handler = handler.name(), error = %e, "Subscriber failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            if waiter.is_some() {
                self.state.abandon(&conversation_id);
            }
            return Err(e);
        }

        let Some(waiter) = waiter else {
            return Ok(message);
        };

        tokio::select! {
            biased;
            response = waiter => {
                response.map_err(|_| BusError::WaiterAbandoned(conversation_id).into())
            }
            _ = cancel.cancelled() => {
                self.state.abandon(&conversation_id);
                Err(Error::Cancelled)
            }
        }
    }

    /// Snapshot of the message log in posting order.
    pub fn log(&self) -> Vec<Arc<Message>> {
        self.state
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of messages ever posted.
    pub fn len(&self) -> usize {
        self.state
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The request posted under `conversation_id`, if any.
    pub fn request_for(&self, conversation_id: &ConversationId) -> Option<Arc<Message>> {
        self.state
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.is_request() && &m.conversation_id == conversation_id)
            .cloned()
    }

    /// Number of requests still awaiting a response.
    pub fn pending(&self) -> usize {
        lock(&self.state.slots)
            .values()
            .filter(|s| matches!(s, Slot::Pending(_)))
            .count()
    }

    /// Responses that matched no live waiter.
    pub fn orphans(&self) -> Vec<Arc<Message>> {
        lock(&self.state.orphans).clone()
    }

    /// Subscribed handlers, including the built-in correlator.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
