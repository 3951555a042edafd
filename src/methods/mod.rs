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

//! Named method handlers and inbound request dispatch.

mod registry;

pub use registry::{Method, MethodMetricsSnapshot, MethodsRegistry};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::context::RequestContext;

/// Boxed future returned by method handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a handler invocation. `Ok(())` means the handler ran to
/// completion; it is still expected to have replied via the context.
pub type MethodResult = Result<(), MethodError>;

/// Failure raised by a method handler.
///
/// When `code` is set it is forwarded to the caller verbatim; otherwise
/// the dispatcher replies with `METHOD_ERROR`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodError {
    /// Optional application error code.
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    pub details: Option<Value>,
}

impl MethodError {
    /// Builds a failure with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches an application error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<crate::error::StarlingError> for MethodError {
    fn from(error: crate::error::StarlingError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for MethodError {}

/// A registered method handler.
pub trait MethodHandler: Send + Sync {
    /// Handles one inbound request. The context carries the payload and
    /// the reply surface.
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, MethodResult>;
}

/// Adapter turning an async closure into a [`MethodHandler`].
pub(crate) struct FnHandler<F>(pub(crate) F);

impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, MethodResult> {
        Box::pin((self.0)(ctx))
    }
}

/// Payload validator gate run before the handler.
pub type PayloadValidator = Arc<dyn Fn(Option<&Value>) -> Result<(), String> + Send + Sync>;

/// Per-method registration options.
#[derive(Clone, Default)]
pub struct MethodOptions {
    /// Handler execution budget; `None` uses the registry default of
    /// 30 seconds.
    pub timeout: Option<Duration>,
    /// Skip name validation; reserved for kernel-registered methods.
    pub internal: bool,
    /// Optional payload gate; a failure replies `VALIDATION_ERROR`.
    pub validator: Option<PayloadValidator>,
    /// Opaque registration metadata.
    pub metadata: Map<String, Value>,
}

impl MethodOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the execution budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the method as kernel-internal, skipping name validation.
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets the payload validator.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Attaches registration metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Debug for MethodOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodOptions")
            .field("timeout", &self.timeout)
            .field("internal", &self.internal)
            .field("validator", &self.validator.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}
