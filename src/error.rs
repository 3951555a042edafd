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

//! Layered error types for the kernel.
//!
//! Three layers with distinct handling strategies:
//!
//! - **Transport**: the collaborator rejected a write; recovered by the
//!   queue for requests, at-most-once for everything else.
//! - **Request**: a single call failed (timeout, cancellation, remote
//!   error); surfaced on the request handle, never breaks the node.
//! - **Registry / context / codec**: usage errors surfaced to the caller
//!   at the call site.

use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::{CodecError, ErrorBody, ErrorCode};
use crate::transport::TransportError;

/// Failure of one request, shaped like the wire error body.
///
/// Kernel-produced failures carry a code from the closed
/// [`ErrorCode`] set; remote application failures carry opaque codes.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    pub details: Option<Value>,
}

impl RequestError {
    /// Builds a kernel failure from the closed code set.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Builds a failure from an opaque code.
    #[must_use]
    pub fn from_parts(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the failure carries the given kernel code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl From<ErrorBody> for RequestError {
    fn from(body: ErrorBody) -> Self {
        Self {
            code: body.code,
            message: body.message,
            details: body.details,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for RequestError {}

/// Rejection of a registry operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The method name failed validation.
    #[error("invalid method name: {reasons:?}")]
    InvalidMethodName {
        /// The accumulated validation messages.
        reasons: Vec<String>,
    },
    /// A method with this name is already registered.
    #[error("method \"{name}\" is already registered")]
    DuplicateMethod {
        /// The conflicting name.
        name: String,
    },
    /// The topic pattern failed validation.
    #[error("invalid topic pattern \"{pattern}\": {reasons:?}")]
    InvalidTopicPattern {
        /// The offending pattern.
        pattern: String,
        /// The accumulated validation messages.
        reasons: Vec<String>,
    },
}

/// Misuse of a single-use context.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// A terminal reply was attempted after the context was processed.
    #[error("context already processed; replies are single-shot")]
    AlreadyProcessed,
}

/// Top-level error type composing every layer.
#[derive(Debug)]
pub enum StarlingError {
    /// The transport collaborator failed.
    Transport(TransportError),
    /// One request failed.
    Request(RequestError),
    /// Envelope encoding or decoding failed.
    Codec(CodecError),
    /// A registry operation was rejected.
    Registry(RegistryError),
    /// A context was misused.
    Context(ContextError),
    /// The outbound queue refused an item.
    QueueFull {
        /// Queue capacity at the time of rejection.
        capacity: usize,
    },
}

impl StarlingError {
    /// Returns `true` if this is a transport-layer failure.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this is a per-request failure.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Transport write failures and queue saturation are transient;
    /// registry and context misuse are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::QueueFull { .. } => true,
            Self::Request(_) | Self::Codec(_) | Self::Registry(_) | Self::Context(_) => false,
        }
    }
}

impl fmt::Display for StarlingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Request(e) => write!(f, "request error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Registry(e) => write!(f, "registry error: {e}"),
            Self::Context(e) => write!(f, "context error: {e}"),
            Self::QueueFull { capacity } => {
                write!(f, "request queue is full (capacity {capacity})")
            }
        }
    }
}

impl StdError for StarlingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Request(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::Context(e) => Some(e),
            Self::QueueFull { .. } => None,
        }
    }
}

impl From<TransportError> for StarlingError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<RequestError> for StarlingError {
    fn from(error: RequestError) -> Self {
        Self::Request(error)
    }
}

impl From<CodecError> for StarlingError {
    fn from(error: CodecError) -> Self {
        Self::Codec(error)
    }
}

impl From<RegistryError> for StarlingError {
    fn from(error: RegistryError) -> Self {
        Self::Registry(error)
    }
}

impl From<ContextError> for StarlingError {
    fn from(error: ContextError) -> Self {
        Self::Context(error)
    }
}
