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

//! The closed set of error codes the kernel produces.
//!
//! Application code travels as opaque strings; these are only the codes
//! the kernel itself attaches to responses and error envelopes.

use std::fmt;

/// Error codes produced by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// An inbound frame failed envelope validation.
    ProtocolInvalidMessage,
    /// The peer speaks an incompatible protocol version.
    ProtocolVersionMismatch,
    /// An inbound frame broke a protocol invariant.
    ProtocolViolation,
    /// The requested method is not registered.
    MethodNotFound,
    /// A method handler failed.
    MethodError,
    /// A locally-issued request was malformed.
    RequestInvalid,
    /// No response arrived within the request timeout.
    RequestTimeout,
    /// The request was cancelled before completion.
    RequestCancelled,
    /// The queue gave up after exhausting its retries.
    QueueRetryExceeded,
    /// The request aged out of the queue before it could be sent.
    QueueDrainTimeout,
    /// A payload failed the method's validator.
    ValidationError,
    /// The kernel failed while processing a valid frame.
    InternalError,
    /// A proxied frame arrived but no proxy is configured.
    ProxyForbidden,
    /// A proxied request timed out at the relay.
    ProxyTimeout,
    /// The relay failed to forward a proxied frame.
    ProxyError,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolInvalidMessage => "PROTOCOL_INVALID_MESSAGE",
            Self::ProtocolVersionMismatch => "PROTOCOL_VERSION_MISMATCH",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::MethodError => "METHOD_ERROR",
            Self::RequestInvalid => "REQUEST_INVALID",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::RequestCancelled => "REQUEST_CANCELLED",
            Self::QueueRetryExceeded => "QUEUE_RETRY_EXCEEDED",
            Self::QueueDrainTimeout => "QUEUE_DRAIN_TIMEOUT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ProxyForbidden => "PROXY_FORBIDDEN",
            Self::ProxyTimeout => "PROXY_TIMEOUT",
            Self::ProxyError => "PROXY_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity axis of a top-level error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The frame itself broke the protocol.
    Protocol,
    /// The frame was valid but processing failed.
    Application,
}

impl Severity {
    /// Wire representation of the severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_strings() {
        assert_eq!(ErrorCode::MethodNotFound.as_str(), "METHOD_NOT_FOUND");
        assert_eq!(ErrorCode::RequestTimeout.as_str(), "REQUEST_TIMEOUT");
        assert_eq!(
            ErrorCode::QueueRetryExceeded.as_str(),
            "QUEUE_RETRY_EXCEEDED"
        );
        assert_eq!(ErrorCode::ProxyForbidden.to_string(), "PROXY_FORBIDDEN");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Protocol).unwrap(),
            "\"protocol\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Application).unwrap(),
            "\"application\""
        );
    }
}
