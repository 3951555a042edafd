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

//! The methods registry and its dispatcher.
//!
//! Registration is rare and serialized against dispatch behind a
//! readers-writer lock. Dispatch races the handler against the method's
//! timeout without cancelling it; a handler that outlives the race is
//! expected to observe the context's `processed` bit before replying.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{FnHandler, MethodHandler, MethodOptions, MethodResult};
use crate::context::RequestContext;
use crate::error::RegistryError;
use crate::events::{EventBus, NodeEvent};
use crate::protocol::{ErrorCode, validate_method_name};

/// Default handler execution budget.
const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(30);

/// Point-in-time metrics for one method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodMetricsSnapshot {
    /// Invocations dispatched.
    pub calls: u64,
    /// Invocations that failed.
    pub errors: u64,
    /// Sum of execution times in milliseconds.
    pub total_execution_ms: u64,
    /// Execution time of the most recent invocation.
    pub last_execution_ms: u64,
    /// Mean execution time across all invocations.
    pub average_execution_ms: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MethodMetrics {
    calls: AtomicU64,
    errors: AtomicU64,
    total_execution_ms: AtomicU64,
    last_execution_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MethodMetrics {
    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, message: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message.to_string());
    }

    fn record_execution(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.total_execution_ms.fetch_add(ms, Ordering::Relaxed);
        self.last_execution_ms.store(ms, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MethodMetricsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let total = self.total_execution_ms.load(Ordering::Relaxed);
        MethodMetricsSnapshot {
            calls,
            errors: self.errors.load(Ordering::Relaxed),
            total_execution_ms: total,
            last_execution_ms: self.last_execution_ms.load(Ordering::Relaxed),
            average_execution_ms: if calls > 0 { total / calls } else { 0 },
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// One registered method: an immutable handler reference plus options
/// and metrics, stable for the node's lifetime.
pub struct Method {
    name: String,
    handler: Box<dyn MethodHandler>,
    options: MethodOptions,
    metrics: MethodMetrics,
}

impl Method {
    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration options.
    #[must_use]
    pub fn options(&self) -> &MethodOptions {
        &self.options
    }

    /// Point-in-time metrics.
    #[must_use]
    pub fn metrics(&self) -> MethodMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn timeout(&self) -> Duration {
        self.options.timeout.unwrap_or(DEFAULT_METHOD_TIMEOUT)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

/// Named handlers with validation and per-call timeouts.
pub struct MethodsRegistry {
    methods: RwLock<HashMap<String, Arc<Method>>>,
    events: Arc<EventBus>,
}

impl MethodsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Registers an async closure as a method handler.
    ///
    /// The name must be `namespace:action` outside the reserved
    /// namespaces unless the options mark the method internal;
    /// duplicates are rejected.
    pub fn register<F, Fut>(
        &self,
        name: &str,
        handler: F,
        options: MethodOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.register_handler(name, Box::new(FnHandler(handler)), options)
    }

    /// Registers a boxed handler.
    pub fn register_handler(
        &self,
        name: &str,
        handler: Box<dyn MethodHandler>,
        options: MethodOptions,
    ) -> Result<(), RegistryError> {
        if !options.internal {
            let validation = validate_method_name(name);
            if !validation.valid() {
                return Err(RegistryError::InvalidMethodName {
                    reasons: validation.errors,
                });
            }
        }
        let mut methods = self.methods.write();
        if methods.contains_key(name) {
            return Err(RegistryError::DuplicateMethod {
                name: name.to_string(),
            });
        }
        methods.insert(
            name.to_string(),
            Arc::new(Method {
                name: name.to_string(),
                handler,
                options,
                metrics: MethodMetrics::default(),
            }),
        );
        drop(methods);
        self.events.emit(NodeEvent::MethodRegistered {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Removes a method. Returns `false` when it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.methods.write().remove(name).is_some();
        if removed {
            self.events.emit(NodeEvent::MethodUnregistered {
                name: name.to_string(),
            });
        }
        removed
    }

    /// Looks up a method by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.read().get(name).cloned()
    }

    /// Whether a method is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Returns `true` when no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Metrics for one method, when registered.
    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<MethodMetricsSnapshot> {
        self.get(name).map(|m| m.metrics())
    }

    /// Dispatches one validated inbound request to its handler.
    ///
    /// Unknown methods reply `METHOD_NOT_FOUND`. The handler is raced
    /// against the method timeout; if the timeout wins the reply is
    /// `REQUEST_TIMEOUT` and the handler keeps running detached, gated
    /// by the context's `processed` bit. Handler failures reply with
    /// their own code when shaped like the error taxonomy, otherwise
    /// `METHOD_ERROR`. A handler that returns without replying gets
    /// `METHOD_ERROR("Method did not provide a response")` on its
    /// behalf.
    pub async fn dispatch(&self, ctx: RequestContext) {
        let Some(method) = self.get(ctx.method()) else {
            let message = format!("Method '{}' not found", ctx.method());
            self.reply_error(&ctx, ErrorCode::MethodNotFound.as_str(), &message, None)
                .await;
            return;
        };

        if let Some(validator) = &method.options.validator
            && let Err(reason) = validator(ctx.payload())
        {
            method.metrics.record_call();
            method.metrics.record_error(&reason);
            self.reply_error(&ctx, ErrorCode::ValidationError.as_str(), &reason, None)
                .await;
            return;
        }

        method.metrics.record_call();
        let start = Instant::now();
        let mut task = tokio::spawn(method.handler.call(ctx.clone()));
        let raced = tokio::time::timeout(method.timeout(), &mut task).await;
        method.metrics.record_execution(start.elapsed());

        match raced {
            Ok(Ok(Ok(()))) => {
                if !ctx.is_processed() {
                    method.metrics.record_error("method did not provide a response");
                    self.reply_error(
                        &ctx,
                        ErrorCode::MethodError.as_str(),
                        "Method did not provide a response",
                        None,
                    )
                    .await;
                }
            }
            Ok(Ok(Err(error))) => {
                method.metrics.record_error(&error.message);
                if !ctx.is_processed() {
                    let code = error
                        .code
                        .unwrap_or_else(|| ErrorCode::MethodError.as_str().to_string());
                    self.reply_error(&ctx, &code, &error.message, error.details)
                        .await;
                }
            }
            Ok(Err(join_error)) => {
                // The handler panicked.
                let message = format!("method handler panicked: {join_error}");
                warn!(method = method.name(), "{message}");
                method.metrics.record_error(&message);
                if !ctx.is_processed() {
                    self.reply_error(&ctx, ErrorCode::MethodError.as_str(), &message, None)
                        .await;
                }
            }
            Err(_elapsed) => {
                // Timeout won the race; the handler keeps running and
                // must check the processed bit before a late reply.
                method.metrics.record_error("method timed out");
                if !ctx.is_processed() {
                    let message = format!(
                        "Method '{}' did not respond within {}ms",
                        method.name(),
                        method.timeout().as_millis()
                    );
                    self.reply_error(&ctx, ErrorCode::RequestTimeout.as_str(), &message, None)
                        .await;
                }
            }
        }
    }

    async fn reply_error(
        &self,
        ctx: &RequestContext,
        code: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        if let Err(error) = ctx.error(code, message, details).await {
            debug!(%error, request_id = ctx.request_id(), "error reply not sent");
        }
    }
}

impl std::fmt::Debug for MethodsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodsRegistry")
            .field("methods", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SendBuffer;
    use crate::config::OnFull;
    use crate::protocol::Peer;
    use crate::timer::TimerGroup;
    use crate::transport::{Frame, MemoryTransport};
    use serde_json::{Value, json};
    use uuid::Uuid;

    struct Harness {
        registry: Arc<MethodsRegistry>,
        buffer: SendBuffer,
        events: Arc<EventBus>,
        transport: Arc<MemoryTransport>,
        timers: TimerGroup,
    }

    fn harness() -> Harness {
        let transport = Arc::new(MemoryTransport::connected());
        let events = Arc::new(EventBus::new());
        let timers = TimerGroup::new();
        let buffer = SendBuffer::new(
            transport.clone(),
            events.clone(),
            64,
            OnFull::Block,
            Duration::from_millis(1),
            Duration::from_secs(300),
            &timers,
        );
        Harness {
            registry: Arc::new(MethodsRegistry::new(events.clone())),
            buffer,
            events,
            transport,
            timers,
        }
    }

    impl Harness {
        fn context(&self, method: &str, payload: Option<Value>) -> RequestContext {
            RequestContext::new(
                self.buffer.clone(),
                self.events.clone(),
                Uuid::new_v4().to_string(),
                method,
                payload,
                Peer::None,
                0,
            )
        }

        async fn dispatch_and_reply(&self, method: &str, payload: Option<Value>) -> String {
            let ctx = self.context(method, payload);
            self.registry.dispatch(ctx).await;
            let sent = tokio::time::timeout(
                Duration::from_secs(1),
                self.transport.wait_for_sent(1),
            )
            .await
            .expect("a reply should be written");
            let Frame::Text(text) = sent.into_iter().next_back().unwrap() else {
                panic!("expected text frame");
            };
            text
        }
    }

    #[tokio::test]
    async fn test_register_validates_names() {
        let h = harness();
        assert!(
            h.registry
                .register("users:get", |_ctx| async { Ok(()) }, MethodOptions::new())
                .is_ok()
        );
        assert!(matches!(
            h.registry
                .register("nonamespace", |_ctx| async { Ok(()) }, MethodOptions::new()),
            Err(RegistryError::InvalidMethodName { .. })
        ));
        assert!(matches!(
            h.registry
                .register("system:op", |_ctx| async { Ok(()) }, MethodOptions::new()),
            Err(RegistryError::InvalidMethodName { .. })
        ));
        // Internal registration bypasses validation.
        assert!(
            h.registry
                .register(
                    "system:op",
                    |_ctx| async { Ok(()) },
                    MethodOptions::new().internal()
                )
                .is_ok()
        );
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let h = harness();
        h.registry
            .register("a:b", |_ctx| async { Ok(()) }, MethodOptions::new())
            .unwrap();
        assert!(matches!(
            h.registry
                .register("a:b", |_ctx| async { Ok(()) }, MethodOptions::new()),
            Err(RegistryError::DuplicateMethod { .. })
        ));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_unregister() {
        let h = harness();
        h.registry
            .register("a:b", |_ctx| async { Ok(()) }, MethodOptions::new())
            .unwrap();
        assert!(h.registry.unregister("a:b"));
        assert!(!h.registry.unregister("a:b"));
        assert!(h.registry.is_empty());
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let h = harness();
        h.registry
            .register(
                "users:getProfile",
                |ctx| async move {
                    ctx.success(Some(json!({"name": "John"}))).await?;
                    Ok(())
                },
                MethodOptions::new(),
            )
            .unwrap();
        let reply = h.dispatch_and_reply("users:getProfile", Some(json!({}))).await;
        assert!(reply.contains("\"success\":true"));
        assert!(reply.contains("John"));

        let metrics = h.registry.metrics("users:getProfile").unwrap();
        assert_eq!(metrics.calls, 1);
        assert_eq!(metrics.errors, 0);
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let h = harness();
        let reply = h.dispatch_and_reply("users:missing", None).await;
        assert!(reply.contains("\"success\":false"));
        assert!(reply.contains("METHOD_NOT_FOUND"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let h = harness();
        h.registry
            .register(
                "slow:op",
                |_ctx| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                MethodOptions::new().with_timeout(Duration::from_millis(50)),
            )
            .unwrap();
        let start = Instant::now();
        let reply = h.dispatch_and_reply("slow:op", None).await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(reply.contains("REQUEST_TIMEOUT"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_with_code() {
        let h = harness();
        h.registry
            .register(
                "fail:shaped",
                |_ctx| async {
                    Err(super::super::MethodError::new("denied")
                        .with_code("FORBIDDEN")
                        .with_details(json!({"who": "me"})))
                },
                MethodOptions::new(),
            )
            .unwrap();
        let reply = h.dispatch_and_reply("fail:shaped", None).await;
        assert!(reply.contains("FORBIDDEN"));
        assert!(reply.contains("denied"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_without_code() {
        let h = harness();
        h.registry
            .register(
                "fail:plain",
                |_ctx| async { Err("something broke".into()) },
                MethodOptions::new(),
            )
            .unwrap();
        let reply = h.dispatch_and_reply("fail:plain", None).await;
        assert!(reply.contains("METHOD_ERROR"));
        assert!(reply.contains("something broke"));

        let metrics = h.registry.metrics("fail:plain").unwrap();
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.last_error, Some("something broke".to_string()));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_no_reply_from_handler() {
        let h = harness();
        h.registry
            .register("quiet:op", |_ctx| async { Ok(()) }, MethodOptions::new())
            .unwrap();
        let reply = h.dispatch_and_reply("quiet:op", None).await;
        assert!(reply.contains("Method did not provide a response"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_handler_panic() {
        let h = harness();
        h.registry
            .register(
                "bad:op",
                |_ctx| async { panic!("handler bug") },
                MethodOptions::new(),
            )
            .unwrap();
        let reply = h.dispatch_and_reply("bad:op", None).await;
        assert!(reply.contains("METHOD_ERROR"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_payload_validator_gate() {
        let h = harness();
        h.registry
            .register(
                "users:create",
                |ctx| async move {
                    ctx.success(None).await?;
                    Ok(())
                },
                MethodOptions::new().with_validator(|payload| {
                    payload
                        .and_then(|p| p.get("name"))
                        .map(|_| ())
                        .ok_or_else(|| "payload must carry a name".to_string())
                }),
            )
            .unwrap();

        let reply = h.dispatch_and_reply("users:create", Some(json!({}))).await;
        assert!(reply.contains("VALIDATION_ERROR"));
        assert!(reply.contains("payload must carry a name"));
        h.timers.shutdown();
    }

    #[tokio::test]
    async fn test_metrics_accumulate() {
        let h = harness();
        h.registry
            .register(
                "fast:op",
                |ctx| async move {
                    ctx.success(None).await?;
                    Ok(())
                },
                MethodOptions::new(),
            )
            .unwrap();
        for _ in 0..3 {
            let ctx = h.context("fast:op", None);
            h.registry.dispatch(ctx).await;
        }
        let metrics = h.registry.metrics("fast:op").unwrap();
        assert_eq!(metrics.calls, 3);
        assert_eq!(metrics.average_execution_ms, metrics.total_execution_ms / 3);
        h.timers.shutdown();
    }
}
