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

//! The wire envelope and its codec.
//!
//! Every protocol frame is a flat JSON object carrying the universal
//! envelope fields plus one type-specific body, discriminated by `type`.
//! Payloads are opaque [`Value`]s and survive round-trips verbatim.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::code::Severity;
use crate::timer;

/// The exact protocol marker every envelope carries.
pub const PROTOCOL_NAME: &str = "helios-starling";

/// Wire-format version stamped on outbound envelopes.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default per-message size ceiling in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum byte length of method and topic names.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum byte length of the error `message` field.
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 1024;

/// Failure while encoding or decoding an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message could not be serialized to JSON.
    #[error("failed to encode message: {source}")]
    Encode {
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },
    /// A validated document still failed typed decoding.
    #[error("failed to decode message: {source}")]
    Decode {
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },
}

/// Relay marker on an envelope.
///
/// Absent or `false` means the frame addresses this node directly; a
/// mapping means the frame is being relayed on behalf of a third party
/// and must be handed to the proxy hook instead of executed locally.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Peer {
    /// The frame is addressed to this node.
    #[default]
    None,
    /// The frame is relayed; the mapping identifies origin/destination.
    Marker(Map<String, Value>),
}

impl Peer {
    /// Returns `true` when the frame is not relayed.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns `true` when the frame carries a relay marker.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker(_))
    }

    /// The relay mapping, when present.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::None => None,
            Self::Marker(map) => Some(map),
        }
    }
}

impl Serialize for Peer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_bool(false),
            Self::Marker(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Peer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(false) => Ok(Self::None),
            Value::Object(map) => Ok(Self::Marker(map)),
            other => Err(serde::de::Error::custom(format!(
                "peer must be false or an object, got {other}"
            ))),
        }
    }
}

/// Error payload carried by failure responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail; never `null` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Body of a top-level error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLevelError {
    /// Whether the fault is a protocol or application failure.
    pub severity: Severity,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Body of a notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBody {
    /// Colon-separated topic address, when topic-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Opaque notification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Type-specific portion of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    /// A method invocation awaiting a response.
    Request {
        /// UUID binding the response(s) back to the caller.
        #[serde(rename = "requestId")]
        request_id: String,
        /// `namespace:action` target.
        method: String,
        /// Opaque invocation payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// The reply to a request.
    Response {
        /// UUID of the request being answered.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Whether the invocation succeeded.
        success: bool,
        /// Result payload on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Failure payload; present iff `success` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// A topic-scoped or request-correlated notification.
    Notification {
        /// Topic and payload.
        notification: NotificationBody,
        /// Correlates the notification to an outstanding request.
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<String>,
    },
    /// A top-level protocol- or application-wide error.
    Error {
        /// The error body.
        error: TopLevelError,
    },
    /// Acknowledgement of a received message.
    Ack {
        /// UUID of the acknowledged message.
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// Liveness probe.
    Ping,
}

impl Body {
    /// Wire name of the `type` discriminator.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Notification { .. } => "notification",
            Self::Error { .. } => "error",
            Self::Ack { .. } => "ack",
            Self::Ping => "ping",
        }
    }
}

/// One protocol frame: universal envelope plus typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Always [`PROTOCOL_NAME`].
    pub protocol: String,
    /// Semver `MAJOR.MINOR.PATCH`.
    pub version: String,
    /// Integer Unix milliseconds.
    pub timestamp: u64,
    /// Relay marker; absent on the wire when [`Peer::None`].
    #[serde(default, skip_serializing_if = "Peer::is_none")]
    pub peer: Peer,
    /// Type-specific fields.
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    fn envelope(body: Body) -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            timestamp: timer::now_millis(),
            peer: Peer::None,
            body,
        }
    }

    /// Builds a request envelope.
    #[must_use]
    pub fn request(request_id: Uuid, method: impl Into<String>, payload: Option<Value>) -> Self {
        Self::envelope(Body::Request {
            request_id: request_id.to_string(),
            method: method.into(),
            payload,
        })
    }

    /// Builds a successful response envelope.
    #[must_use]
    pub fn response_ok(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self::envelope(Body::Response {
            request_id: request_id.into(),
            success: true,
            data,
            error: None,
        })
    }

    /// Builds a failure response envelope.
    ///
    /// The message field is clamped to [`MAX_ERROR_MESSAGE_LENGTH`] bytes.
    #[must_use]
    pub fn response_err(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::envelope(Body::Response {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: clamp_error_message(message.into()),
                details,
            }),
        })
    }

    /// Builds a notification envelope.
    ///
    /// Signature is fixed as `(topic, data, request_id)`; pass a request
    /// id to correlate the notification with an outstanding request.
    #[must_use]
    pub fn notification(
        topic: Option<String>,
        data: Option<Value>,
        request_id: Option<String>,
    ) -> Self {
        Self::envelope(Body::Notification {
            notification: NotificationBody { topic, data },
            request_id,
        })
    }

    /// Builds a top-level error envelope.
    ///
    /// The message field is clamped to [`MAX_ERROR_MESSAGE_LENGTH`] bytes.
    #[must_use]
    pub fn error(
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::envelope(Body::Error {
            error: TopLevelError {
                severity,
                code: code.into(),
                message: clamp_error_message(message.into()),
                details,
            },
        })
    }

    /// Builds an acknowledgement envelope with a fresh message id.
    #[must_use]
    pub fn ack() -> Self {
        Self::envelope(Body::Ack {
            message_id: Uuid::new_v4().to_string(),
        })
    }

    /// Builds a liveness probe envelope.
    #[must_use]
    pub fn ping() -> Self {
        Self::envelope(Body::Ping)
    }

    /// Attaches a relay marker.
    #[must_use]
    pub fn with_peer(mut self, peer: Peer) -> Self {
        self.peer = peer;
        self
    }

    /// Request id carried by the body, when any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match &self.body {
            Body::Request { request_id, .. } | Body::Response { request_id, .. } => {
                Some(request_id)
            }
            Body::Notification { request_id, .. } => request_id.as_deref(),
            Body::Error { .. } | Body::Ack { .. } | Body::Ping => None,
        }
    }

    /// Serializes to compact JSON.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|source| CodecError::Encode { source })
    }

    /// UTF-8 byte length of the serialized form.
    pub fn encoded_size(&self) -> Result<usize, CodecError> {
        self.encode().map(|s| s.len())
    }

    /// Typed decoding of an already-validated protocol document.
    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        serde_json::from_value(value).map_err(|source| CodecError::Decode { source })
    }
}

/// Truncates an error message to [`MAX_ERROR_MESSAGE_LENGTH`] bytes on a
/// character boundary.
#[must_use]
pub fn clamp_error_message(message: String) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LENGTH {
        return message;
    }
    let mut end = MAX_ERROR_MESSAGE_LENGTH;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// One raw frame as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// A text frame.
    Text(String),
    /// An opaque binary frame.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Byte length of the frame.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Returns `true` for zero-length frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for RawFrame {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RawFrame {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// Classification of a raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// Binary content, passed through opaquely.
    Binary(Vec<u8>),
    /// Text that is not valid JSON.
    Text(String),
    /// Valid JSON that does not carry the protocol marker.
    Json(Value),
    /// A document claiming [`PROTOCOL_NAME`]; not yet validated.
    Protocol(Value),
}

/// Classifies a raw frame without validating it.
///
/// Binary frames pass through opaquely. Text frames are JSON-parsed;
/// parse failures classify as [`DecodedFrame::Text`]. Parsed objects
/// carrying `protocol == "helios-starling"` classify as
/// [`DecodedFrame::Protocol`], everything else as [`DecodedFrame::Json`].
///
/// # Examples
///
/// ```rust
/// use helios_starling::protocol::{DecodedFrame, RawFrame, decode};
///
/// let frame = decode(RawFrame::Text("not json".into()));
/// assert!(matches!(frame, DecodedFrame::Text(_)));
///
/// let frame = decode(RawFrame::Text(r#"{"hello":"world"}"#.into()));
/// assert!(matches!(frame, DecodedFrame::Json(_)));
/// ```
#[must_use]
pub fn decode(raw: RawFrame) -> DecodedFrame {
    let text = match raw {
        RawFrame::Binary(bytes) => return DecodedFrame::Binary(bytes),
        RawFrame::Text(text) => text,
    };
    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => return DecodedFrame::Text(text),
    };
    let is_protocol = value
        .get("protocol")
        .and_then(Value::as_str)
        .is_some_and(|p| p == PROTOCOL_NAME);
    if is_protocol {
        DecodedFrame::Protocol(value)
    } else {
        DecodedFrame::Json(value)
    }
}
