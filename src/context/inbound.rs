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

//! Read-only carriers for non-request inbound frames.

use std::sync::Arc;

use serde_json::Value;

use super::ProcessingMeta;
use crate::error::StarlingError;
use crate::events::EventBus;
use crate::protocol::{ErrorBody, Peer, Severity};

/// Carrier for an inbound notification, handed to topic subscribers.
#[derive(Debug, Clone)]
pub struct NotificationContext {
    topic: Option<String>,
    data: Option<Value>,
    request_id: Option<String>,
    peer: Peer,
    timestamp: u64,
}

impl NotificationContext {
    /// Builds the carrier from envelope parts.
    #[must_use]
    pub fn new(
        topic: Option<String>,
        data: Option<Value>,
        request_id: Option<String>,
        peer: Peer,
        timestamp: u64,
    ) -> Self {
        Self {
            topic,
            data,
            request_id,
            peer,
            timestamp,
        }
    }

    /// The topic this notification was published on.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// The notification payload.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The correlated request id, for streaming notifications.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The payload `type` discriminator, distinguishing progress
    /// frames from ordinary notifications.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("type")?.as_str()
    }

    /// The envelope's relay marker.
    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The envelope timestamp, Unix milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Carrier for an inbound response, handed to the proxy hook when the
/// frame is relayed.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    request_id: String,
    success: bool,
    data: Option<Value>,
    error: Option<ErrorBody>,
    peer: Peer,
    timestamp: u64,
}

impl ResponseContext {
    /// Builds the carrier from envelope parts.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        success: bool,
        data: Option<Value>,
        error: Option<ErrorBody>,
        peer: Peer,
        timestamp: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success,
            data,
            error,
            peer,
            timestamp,
        }
    }

    /// The answered request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the invocation succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    /// Result payload on success.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Failure payload on failure.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorBody> {
        self.error.as_ref()
    }

    /// The envelope's relay marker.
    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The envelope timestamp, Unix milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Carrier for an inbound top-level error envelope.
#[derive(Debug, Clone)]
pub struct ErrorMessageContext {
    severity: Severity,
    code: String,
    message: String,
    details: Option<Value>,
    peer: Peer,
    timestamp: u64,
}

impl ErrorMessageContext {
    /// Builds the carrier from envelope parts.
    #[must_use]
    pub fn new(
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
        peer: Peer,
        timestamp: u64,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            details,
            peer,
            timestamp,
        }
    }

    /// The error severity axis.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Optional structured detail.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// The envelope's relay marker.
    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The envelope timestamp, Unix milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

macro_rules! raw_context {
    ($(#[$doc:meta])* $name:ident, $field:ident: $ty:ty, $accessor_doc:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            $field: $ty,
            timestamp: u64,
            meta: Arc<ProcessingMeta>,
        }

        impl $name {
            /// Builds the carrier.
            #[must_use]
            pub fn new($field: $ty, timestamp: u64, events: Arc<EventBus>) -> Self {
                Self {
                    $field,
                    timestamp,
                    meta: Arc::new(ProcessingMeta::new(events)),
                }
            }

            #[doc = $accessor_doc]
            #[must_use]
            pub fn $field(&self) -> &$ty {
                &self.$field
            }

            /// The arrival timestamp, Unix milliseconds.
            #[must_use]
            pub fn timestamp(&self) -> u64 {
                self.timestamp
            }

            /// Whether the frame has been acknowledged.
            #[must_use]
            pub fn is_processed(&self) -> bool {
                self.meta.is_processed()
            }

            /// Marks the frame processed, emitting the processing
            /// metric. Single-shot.
            pub fn acknowledge(&self) -> Result<(), StarlingError> {
                self.meta.claim()?;
                self.meta.emit_processed(None);
                Ok(())
            }
        }
    };
}

raw_context!(
    /// Carrier for a non-JSON text frame.
    TextContext,
    content: String,
    "The raw text content."
);

raw_context!(
    /// Carrier for a foreign JSON frame.
    JsonContext,
    value: Value,
    "The parsed document."
);

raw_context!(
    /// Carrier for an opaque binary frame.
    BinaryContext,
    bytes: Vec<u8>,
    "The raw frame bytes."
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_kind() {
        let ctx = NotificationContext::new(
            Some("job:events".into()),
            Some(json!({"type": "progress", "progress": 50})),
            Some("id".into()),
            Peer::None,
            0,
        );
        assert_eq!(ctx.kind(), Some("progress"));

        let plain = NotificationContext::new(
            Some("user:presence".into()),
            Some(json!({"online": true})),
            None,
            Peer::None,
            0,
        );
        assert_eq!(plain.kind(), None);
    }

    #[test]
    fn test_acknowledge_is_single_shot() {
        let ctx = TextContext::new("hello".into(), 0, Arc::new(EventBus::new()));
        assert!(!ctx.is_processed());
        assert!(ctx.acknowledge().is_ok());
        assert!(ctx.is_processed());
        assert!(ctx.acknowledge().is_err());
    }

    #[test]
    fn test_acknowledge_emits_processed() {
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.on_event(move |event| {
            seen_clone.lock().push(event.name().to_string());
        });

        let ctx = BinaryContext::new(vec![1, 2], 0, events);
        ctx.acknowledge().unwrap();
        assert_eq!(seen.lock().as_slice(), ["message:processed"]);
    }

    #[test]
    fn test_json_context_carries_value() {
        let ctx = JsonContext::new(json!({"a": 1}), 7, Arc::new(EventBus::new()));
        assert_eq!(ctx.value(), &json!({"a": 1}));
        assert_eq!(ctx.timestamp(), 7);
    }
}
