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

//! Inbound frame classification.
//!
//! [`resolve`] classifies a raw frame exactly once, then exposes typed
//! subscription methods that run synchronously in declaration order
//! against the classified result. A frame with violations fires only
//! `on_violation`; the typed callbacks are suppressed. The resolver
//! never panics and never surfaces an error to the transport.

use serde_json::Value;

use crate::protocol::{
    Body, DecodedFrame, ErrorCode, MAX_MESSAGE_SIZE, Message, RawFrame, decode, validate_message,
    version_compatible,
};

/// Options governing classification strictness.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Enforce the version compatibility class and the foreign-protocol
    /// marker rule. Default `true`.
    pub strict: bool,
    /// Accept unknown `type` discriminators. Default `false`.
    pub allow_custom_types: bool,
    /// Per-frame byte ceiling. Default [`MAX_MESSAGE_SIZE`].
    pub max_message_size: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            strict: true,
            allow_custom_types: false,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// The classified content of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedFrame {
    /// An opaque binary frame.
    Binary(Vec<u8>),
    /// Text that is not JSON.
    Text(String),
    /// JSON that does not belong to the protocol.
    Json(Value),
    /// A validated protocol envelope.
    Protocol(Message),
}

/// Outcome of resolving one frame: either a classified frame or a
/// violation list, never both.
#[derive(Debug)]
pub struct Resolution {
    frame: Option<ResolvedFrame>,
    violations: Vec<String>,
    violation_code: ErrorCode,
}

/// Classifies a raw frame and validates protocol envelopes.
///
/// # Examples
///
/// ```rust
/// use helios_starling::resolver::{ResolveOptions, resolve};
/// use helios_starling::protocol::RawFrame;
///
/// let opts = ResolveOptions::default();
/// let mut seen_text = false;
/// resolve(RawFrame::Text("plain text".into()), &opts)
///     .on_text(|content| seen_text = content == "plain text")
///     .on_violation(|_| unreachable!("plain text is not a violation"));
/// assert!(seen_text);
/// ```
#[must_use]
pub fn resolve(raw: RawFrame, opts: &ResolveOptions) -> Resolution {
    if raw.len() > opts.max_message_size {
        return Resolution::violation(
            vec![format!(
                "message: {} bytes exceeds the {} byte limit",
                raw.len(),
                opts.max_message_size
            )],
            ErrorCode::ProtocolViolation,
        );
    }

    let value = match decode(raw) {
        DecodedFrame::Binary(bytes) => return Resolution::frame(ResolvedFrame::Binary(bytes)),
        DecodedFrame::Text(text) => return Resolution::frame(ResolvedFrame::Text(text)),
        DecodedFrame::Json(value) => {
            // A frame claiming some other protocol is a violation in
            // strict mode; plain JSON without a marker passes through.
            if opts.strict
                && value
                    .as_object()
                    .is_some_and(|o| o.get("protocol").is_some_and(Value::is_string))
            {
                return Resolution::violation(
                    vec!["protocol: frame carries a foreign protocol marker".to_string()],
                    ErrorCode::ProtocolViolation,
                );
            }
            return Resolution::frame(ResolvedFrame::Json(value));
        }
        DecodedFrame::Protocol(value) => value,
    };

    let validation = validate_message(&value, opts.allow_custom_types);
    if !validation.valid() {
        return Resolution::violation(validation.errors, ErrorCode::ProtocolViolation);
    }

    if opts.strict {
        let version = value.get("version").and_then(Value::as_str).unwrap_or("");
        if !version_compatible(version) {
            return Resolution::violation(
                vec![format!("version: \"{version}\" is not a supported version")],
                ErrorCode::ProtocolVersionMismatch,
            );
        }
    }

    match Message::from_value(value) {
        Ok(message) => Resolution::frame(ResolvedFrame::Protocol(message)),
        Err(error) => Resolution::violation(
            vec![format!("message: {error}")],
            ErrorCode::ProtocolInvalidMessage,
        ),
    }
}

impl Resolution {
    fn frame(frame: ResolvedFrame) -> Self {
        Self {
            frame: Some(frame),
            violations: Vec::new(),
            violation_code: ErrorCode::ProtocolViolation,
        }
    }

    fn violation(violations: Vec<String>, code: ErrorCode) -> Self {
        Self {
            frame: None,
            violations,
            violation_code: code,
        }
    }

    /// The accumulated violations, empty for a clean frame.
    #[must_use]
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// The code describing why the frame was rejected.
    #[must_use]
    pub fn violation_code(&self) -> ErrorCode {
        self.violation_code
    }

    /// Returns `true` when the frame was rejected.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Runs `handler` if the frame was rejected.
    #[must_use]
    pub fn on_violation(self, handler: impl FnOnce(&[String])) -> Self {
        if self.is_violation() {
            handler(&self.violations);
        }
        self
    }

    /// Runs `handler` for an opaque binary frame.
    #[must_use]
    pub fn on_binary(self, handler: impl FnOnce(&[u8])) -> Self {
        if let Some(ResolvedFrame::Binary(bytes)) = &self.frame {
            handler(bytes);
        }
        self
    }

    /// Runs `handler` for a non-JSON text frame.
    #[must_use]
    pub fn on_text(self, handler: impl FnOnce(&str)) -> Self {
        if let Some(ResolvedFrame::Text(text)) = &self.frame {
            handler(text);
        }
        self
    }

    /// Runs `handler` for a foreign JSON frame.
    #[must_use]
    pub fn on_json(self, handler: impl FnOnce(&Value)) -> Self {
        if let Some(ResolvedFrame::Json(value)) = &self.frame {
            handler(value);
        }
        self
    }

    fn on_protocol(self, want: fn(&Body) -> bool, handler: impl FnOnce(&Message)) -> Self {
        if let Some(ResolvedFrame::Protocol(message)) = &self.frame
            && want(&message.body)
        {
            handler(message);
        }
        self
    }

    /// Runs `handler` for a validated request envelope.
    #[must_use]
    pub fn on_request(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Request { .. }), handler)
    }

    /// Runs `handler` for a validated response envelope.
    #[must_use]
    pub fn on_response(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Response { .. }), handler)
    }

    /// Runs `handler` for a validated notification envelope.
    #[must_use]
    pub fn on_notification(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Notification { .. }), handler)
    }

    /// Runs `handler` for a validated top-level error envelope.
    #[must_use]
    pub fn on_error_message(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Error { .. }), handler)
    }

    /// Runs `handler` for a validated ack envelope.
    #[must_use]
    pub fn on_ack(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Ack { .. }), handler)
    }

    /// Runs `handler` for a validated ping envelope.
    #[must_use]
    pub fn on_ping(self, handler: impl FnOnce(&Message)) -> Self {
        self.on_protocol(|b| matches!(b, Body::Ping), handler)
    }

    /// Consumes the resolution, yielding the classified frame or the
    /// violation list.
    pub fn into_outcome(self) -> Result<ResolvedFrame, (Vec<String>, ErrorCode)> {
        match self.frame {
            Some(frame) => Ok(frame),
            None => Err((self.violations, self.violation_code)),
        }
    }
}
