//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Observability events emitted by the kernel.
//!
//! Every component reports its lifecycle through a shared [`EventBus`].
//! The event *names* (as returned by [`NodeEvent::name`]) are the
//! contract; payloads are structural and may grow fields. Listener
//! panics are isolated and logged so observability can never affect
//! kernel state.

use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{trace, warn};
use uuid::Uuid;

/// Point-in-time counters for one node, carried by `system:stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests awaiting a terminal transition.
    pub active_requests: usize,
    /// Recently terminated request ids retained for late-response
    /// attribution.
    pub expired_requests: usize,
    /// Items sitting in the outbound request queue.
    pub queue_size: usize,
    /// Registered methods.
    pub methods: usize,
    /// Live topic subscriptions.
    pub subscriptions: usize,
    /// Outbound frames waiting in the send buffer.
    pub buffered: usize,
}

/// A structured observability event.
///
/// Variants map one-to-one to the event names in the protocol contract;
/// see [`NodeEvent::name`].
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// An outbound frame was written to the transport.
    SendSuccess {
        /// Byte size of the written frame.
        size: usize,
    },
    /// The transport rejected an outbound frame.
    SendFailed {
        /// Stringified transport error.
        error: String,
    },
    /// A non-JSON text frame arrived.
    TextReceived {
        /// The raw text content.
        content: String,
    },
    /// A JSON frame arrived that does not belong to the protocol.
    JsonReceived {
        /// The parsed document.
        value: Value,
    },
    /// An opaque binary frame arrived.
    BinaryReceived {
        /// Frame length in bytes.
        size: usize,
    },
    /// An inbound frame violated the protocol.
    ProtocolError {
        /// Accumulated violation messages, one per broken invariant.
        violations: Vec<String>,
    },
    /// The kernel itself failed while processing a valid frame.
    InternalError {
        /// Description of the failure.
        message: String,
    },
    /// A top-level error envelope arrived from the peer.
    ErrorReceived {
        /// `protocol` or `application`.
        severity: String,
        /// Error code carried by the envelope.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// An outbound frame was accepted while the transport is down.
    Buffered {
        /// Frames currently held back.
        pending: usize,
    },
    /// A context reached its terminal reply.
    Processed {
        /// Wall time between context creation and the reply.
        duration_ms: u64,
        /// Request id, when the context wraps a request.
        request_id: Option<String>,
        /// Whether intermediate notifications were sent.
        streaming: bool,
        /// How many intermediate notifications were sent.
        notifications: u64,
    },
    /// A request entered the outbound queue.
    QueueAdded {
        /// Request id.
        id: Uuid,
        /// Queue size after the insert.
        size: usize,
    },
    /// A request left the outbound queue.
    QueueRemoved {
        /// Request id.
        id: Uuid,
        /// Queue size after the removal.
        size: usize,
    },
    /// The outbound queue size changed.
    QueueSizeChanged {
        /// New queue size.
        size: usize,
    },
    /// A request was accepted for transmission.
    RequestQueued {
        /// Request id.
        id: Uuid,
        /// Target method.
        method: String,
    },
    /// A request reached its terminal state.
    RequestCompleted {
        /// Request id.
        id: Uuid,
        /// Whether it was fulfilled rather than rejected.
        success: bool,
    },
    /// A correlated notification was delivered to a live request.
    RequestNotification {
        /// Request id.
        id: Uuid,
    },
    /// A response arrived for a request that already terminated.
    LateResponse {
        /// Request id.
        id: Uuid,
        /// Milliseconds between termination and the response.
        response_delay_ms: u64,
    },
    /// A response arrived for an id this node never issued (or one
    /// evicted from the expired table).
    UnknownResponse {
        /// The unrecognized request id.
        id: String,
    },
    /// Pending requests were cancelled in bulk.
    RequestsCancelled {
        /// Cancellation reason.
        reason: String,
        /// How many requests were cancelled.
        count: usize,
    },
    /// A successful response was routed to its request.
    ResponseReceived {
        /// Request id.
        id: Uuid,
    },
    /// A failure response was routed to its request.
    ResponseError {
        /// Request id.
        id: Uuid,
        /// Error code carried by the response.
        code: String,
    },
    /// A locally-originated request failed before or during transmission.
    RequestFailed {
        /// Request id.
        id: Uuid,
        /// Failure code.
        code: String,
    },
    /// A method was added to the registry.
    MethodRegistered {
        /// Method name.
        name: String,
    },
    /// A method was removed from the registry.
    MethodUnregistered {
        /// Method name.
        name: String,
    },
    /// A notification was dispatched to topic subscribers.
    TopicHandled {
        /// The notification topic.
        topic: String,
        /// Number of handlers that ran.
        handlers: usize,
    },
    /// A topic handler failed.
    TopicError {
        /// The notification topic.
        topic: String,
        /// Stringified handler error.
        error: String,
    },
    /// A notification could not be routed.
    NotificationError {
        /// Description of the routing failure.
        message: String,
    },
    /// Periodic node counters.
    SystemStats {
        /// The snapshot.
        stats: StatsSnapshot,
    },
}

impl NodeEvent {
    /// The contract name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendSuccess { .. } => "message:send:success",
            Self::SendFailed { .. } => "message:send:failed",
            Self::TextReceived { .. } => "message:text",
            Self::JsonReceived { .. } => "message:json",
            Self::BinaryReceived { .. } => "message:binary",
            Self::ProtocolError { .. } => "message:protocol_error",
            Self::InternalError { .. } => "message:internal_error",
            Self::ErrorReceived { .. } => "message:error",
            Self::Buffered { .. } => "message:buffered",
            Self::Processed { .. } => "message:processed",
            Self::QueueAdded { .. } => "queue:added",
            Self::QueueRemoved { .. } => "queue:removed",
            Self::QueueSizeChanged { .. } => "queue:size_changed",
            Self::RequestQueued { .. } => "request:queued",
            Self::RequestCompleted { .. } => "request:completed",
            Self::RequestNotification { .. } => "request:notification",
            Self::LateResponse { .. } => "request:late_response",
            Self::UnknownResponse { .. } => "request:unknown_response",
            Self::RequestsCancelled { .. } => "requests:cancelled",
            Self::ResponseReceived { .. } => "response:received",
            Self::ResponseError { .. } => "response:error",
            Self::RequestFailed { .. } => "request:error",
            Self::MethodRegistered { .. } => "method:registered",
            Self::MethodUnregistered { .. } => "method:unregistered",
            Self::TopicHandled { .. } => "topic:handled",
            Self::TopicError { .. } => "topic:error",
            Self::NotificationError { .. } => "notification:error",
            Self::SystemStats { .. } => "system:stats",
        }
    }
}

/// Callback invoked for every emitted event.
pub type EventCallback = Box<dyn Fn(&NodeEvent) + Send + Sync>;

/// Fan-out registry for observability callbacks.
///
/// # Examples
///
/// ```rust
/// use helios_starling::events::{EventBus, NodeEvent};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let seen_clone = seen.clone();
/// bus.on_event(move |_event| {
///     seen_clone.fetch_add(1, Ordering::SeqCst);
/// });
///
/// bus.emit(NodeEvent::QueueSizeChanged { size: 1 });
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventCallback>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked for every subsequent event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(callback));
    }

    /// Emits an event to every registered listener.
    ///
    /// A panicking listener is logged and skipped; it cannot disturb the
    /// emitter or sibling listeners.
    pub fn emit(&self, event: NodeEvent) {
        trace!(event = event.name(), "node event");
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = event.name(), "event listener panicked");
            }
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Removes every registered listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_listeners() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count_clone = count.clone();
            bus.on_event(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(NodeEvent::QueueSizeChanged { size: 0 });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.on_event(|_| panic!("listener bug"));
        let count_clone = count.clone();
        bus.on_event(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(NodeEvent::SystemStats {
            stats: StatsSnapshot::default(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_names_are_stable() {
        assert_eq!(
            NodeEvent::SendSuccess { size: 1 }.name(),
            "message:send:success"
        );
        assert_eq!(
            NodeEvent::LateResponse {
                id: Uuid::new_v4(),
                response_delay_ms: 10
            }
            .name(),
            "request:late_response"
        );
        assert_eq!(
            NodeEvent::RequestFailed {
                id: Uuid::new_v4(),
                code: "X".into()
            }
            .name(),
            "request:error"
        );
        assert_eq!(
            NodeEvent::RequestsCancelled {
                reason: String::new(),
                count: 0
            }
            .name(),
            "requests:cancelled"
        );
    }

    #[test]
    fn test_clear_removes_listeners() {
        let bus = EventBus::new();
        bus.on_event(|_| {});
        assert_eq!(bus.listener_count(), 1);
        bus.clear();
        assert_eq!(bus.listener_count(), 0);
    }
}
