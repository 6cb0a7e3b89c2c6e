//! Domain event system: observability without coupling.
//!
//! Events are published when something interesting happens on the bus or in
//! the tool-call loop. Observers subscribe to react without being part of the
//! request path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A message was appended to the bus log
    MessagePosted {
        message_id: String,
        conversation_id: String,
        is_request: bool,
        timestamp: DateTime<Utc>,
    },

    /// A response fulfilled the waiter of its request
    ResponseCorrelated {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A response arrived with no request or no live waiter
    OrphanResponse {
        message_id: String,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The model answered one round of the tool-call loop
    ModelResponded {
        model: String,
        tool_calls: usize,
        tokens_used: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A subscriber failed while handling a request
    HandlerFault {
        conversation_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Slow observers lag and lose events; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
