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

//! The node: one endpoint of a connection running this kernel.
//!
//! A node owns its registries, request tables, send buffer, queue and
//! timer group; no global state. The transport collaborator feeds raw
//! frames into [`Node::deliver`]; the application surface issues
//! requests, publishes notifications, registers methods and
//! subscribes to topics.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::trace;

use crate::buffer::SendBuffer;
use crate::config::NodeConfig;
use crate::context::{
    BinaryContext, ErrorMessageContext, JsonContext, NotificationContext, RequestContext,
    ResponseContext, TextContext,
};
use crate::error::{RequestError, StarlingError};
use crate::events::{EventBus, NodeEvent, StatsSnapshot};
use crate::methods::{BoxFuture, MethodOptions, MethodResult, MethodsRegistry};
use crate::protocol::{
    Body, ErrorCode, Message, RawFrame, Severity, clamp_error_message, method_name_format,
    validate_topic_name,
};
use crate::request::{
    QueueOptions, Request, RequestOptions, RequestQueue, RequestsManager,
};
use crate::resolver::{ResolveOptions, ResolvedFrame, resolve};
use crate::timer::{Clock, SystemClock, TimerGroup};
use crate::topics::{SubscribeOptions, SubscriptionHandle, TopicResult, TopicsRegistry};
use crate::transport::Transport;

/// Callback relaying one proxied frame on behalf of a third party.
pub type ProxyHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Relay hooks invoked for frames whose `peer` marker is set.
///
/// The kernel only recognizes the fork: a frame carrying a relay
/// marker is handed to the matching hook instead of being executed
/// locally. A proxied request with no hook configured is answered
/// `PROXY_FORBIDDEN`; other proxied frames are dropped with an event.
#[derive(Clone, Default)]
pub struct ProxyConfiguration {
    /// Relays proxied requests.
    pub request: Option<ProxyHandler<RequestContext>>,
    /// Relays proxied responses.
    pub response: Option<ProxyHandler<ResponseContext>>,
    /// Relays proxied notifications.
    pub notification: Option<ProxyHandler<NotificationContext>>,
    /// Relays proxied top-level errors.
    pub error_message: Option<ProxyHandler<ErrorMessageContext>>,
}

impl ProxyConfiguration {
    /// Creates an empty configuration (every proxied frame refused).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the proxied-request hook.
    #[must_use]
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(RequestContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.request = Some(Arc::new(handler));
        self
    }

    /// Sets the proxied-response hook.
    #[must_use]
    pub fn on_response<F>(mut self, handler: F) -> Self
    where
        F: Fn(ResponseContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.response = Some(Arc::new(handler));
        self
    }

    /// Sets the proxied-notification hook.
    #[must_use]
    pub fn on_notification<F>(mut self, handler: F) -> Self
    where
        F: Fn(NotificationContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.notification = Some(Arc::new(handler));
        self
    }

    /// Sets the proxied-error hook.
    #[must_use]
    pub fn on_error_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(ErrorMessageContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.error_message = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for ProxyConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfiguration")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .field("notification", &self.notification.is_some())
            .field("error_message", &self.error_message.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Hooks {
    text: Vec<Arc<dyn Fn(&TextContext) + Send + Sync>>,
    json: Vec<Arc<dyn Fn(&JsonContext) + Send + Sync>>,
    binary: Vec<Arc<dyn Fn(&BinaryContext) + Send + Sync>>,
    error: Vec<Arc<dyn Fn(&ErrorMessageContext) + Send + Sync>>,
}

struct NodeInner {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    buffer: SendBuffer,
    queue: RequestQueue,
    manager: RequestsManager,
    methods: Arc<MethodsRegistry>,
    topics: TopicsRegistry,
    timers: Arc<TimerGroup>,
    proxy: RwLock<ProxyConfiguration>,
    hooks: RwLock<Hooks>,
    resolve_opts: ResolveOptions,
}

/// One protocol endpoint.
///
/// Cloning is cheap; clones share the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a node over a transport with the given configuration.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        Self::build(transport, config, Arc::new(SystemClock), None)
    }

    /// Creates a node with an injected clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        config: NodeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(transport, config, clock, None)
    }

    /// Creates a node sharing a topics registry with other owners
    /// (fan-in/fan-out between per-connection nodes and a hub). The
    /// shared registry is itself concurrency-safe.
    #[must_use]
    pub fn with_shared_topics(
        transport: Arc<dyn Transport>,
        config: NodeConfig,
        topics: TopicsRegistry,
    ) -> Self {
        Self::build(transport, config, Arc::new(SystemClock), Some(topics))
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: NodeConfig,
        clock: Arc<dyn Clock>,
        topics: Option<TopicsRegistry>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let timers = Arc::new(TimerGroup::new());
        let buffer = SendBuffer::new(
            transport.clone(),
            events.clone(),
            config.message_buffer_size,
            config.on_full,
            config.batch_window,
            config.message_max_age,
            &timers,
        );
        let queue = RequestQueue::new(
            QueueOptions::from(&config),
            buffer.clone(),
            events.clone(),
            clock.clone(),
            transport.state(),
            &timers,
        );
        let manager = RequestsManager::new(events.clone(), clock.clone(), &timers);
        let methods = Arc::new(MethodsRegistry::new(events.clone()));
        let topics = topics.unwrap_or_else(|| TopicsRegistry::new(events.clone()));
        let resolve_opts = ResolveOptions {
            strict: true,
            allow_custom_types: config.allow_custom_types,
            max_message_size: config.max_message_size,
        };

        // Non-persistent subscriptions die with the connection.
        let ephemeral = topics.clone();
        let mut state = transport.state();
        timers.spawn(async move {
            while state.changed().await.is_ok() {
                if !*state.borrow() {
                    ephemeral.drop_ephemeral();
                }
            }
        });

        Self {
            inner: Arc::new(NodeInner {
                config,
                transport,
                clock,
                events,
                buffer,
                queue,
                manager,
                methods,
                topics,
                timers,
                proxy: RwLock::new(ProxyConfiguration::default()),
                hooks: RwLock::new(Hooks::default()),
                resolve_opts,
            }),
        }
    }

    /// Whether the transport reports a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// The node's observability bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Registers an observability callback.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&NodeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_event(callback);
    }

    /// Installs the proxy configuration for relayed frames.
    pub fn set_proxy(&self, proxy: ProxyConfiguration) {
        *self.inner.proxy.write() = proxy;
    }

    /// Feeds one raw inbound frame into the kernel.
    ///
    /// Never blocks and never surfaces an error to the caller: protocol
    /// violations are answered on the wire and reported as events,
    /// valid frames are routed to their handlers.
    pub fn deliver(&self, raw: impl Into<RawFrame>) {
        let resolution = resolve(raw.into(), &self.inner.resolve_opts);
        match resolution.into_outcome() {
            Err((violations, code)) => {
                self.inner.events.emit(NodeEvent::ProtocolError {
                    violations: violations.clone(),
                });
                let message = Message::error(
                    Severity::Protocol,
                    code.as_str(),
                    clamp_error_message(violations.join("; ")),
                    Some(json!({ "violations": violations })),
                );
                self.send_detached(message);
            }
            Ok(ResolvedFrame::Binary(bytes)) => {
                self.inner
                    .events
                    .emit(NodeEvent::BinaryReceived { size: bytes.len() });
                let ctx = BinaryContext::new(
                    bytes,
                    self.inner.clock.now_millis(),
                    self.inner.events.clone(),
                );
                let hooks = self.inner.hooks.read().binary.clone();
                for hook in hooks {
                    hook(&ctx);
                }
            }
            Ok(ResolvedFrame::Text(text)) => {
                self.inner.events.emit(NodeEvent::TextReceived {
                    content: text.clone(),
                });
                let ctx = TextContext::new(
                    text,
                    self.inner.clock.now_millis(),
                    self.inner.events.clone(),
                );
                let hooks = self.inner.hooks.read().text.clone();
                for hook in hooks {
                    hook(&ctx);
                }
            }
            Ok(ResolvedFrame::Json(value)) => {
                self.inner.events.emit(NodeEvent::JsonReceived {
                    value: value.clone(),
                });
                let ctx = JsonContext::new(
                    value,
                    self.inner.clock.now_millis(),
                    self.inner.events.clone(),
                );
                let hooks = self.inner.hooks.read().json.clone();
                for hook in hooks {
                    hook(&ctx);
                }
            }
            Ok(ResolvedFrame::Protocol(message)) => self.dispatch_message(message),
        }
    }

    fn dispatch_message(&self, message: Message) {
        let peer = message.peer;
        let timestamp = message.timestamp;
        match message.body {
            Body::Request {
                request_id,
                method,
                payload,
            } => {
                let ctx = RequestContext::new(
                    self.inner.buffer.clone(),
                    self.inner.events.clone(),
                    request_id,
                    method,
                    payload,
                    peer.clone(),
                    timestamp,
                );
                if peer.is_marker() {
                    match self.inner.proxy.read().request.clone() {
                        Some(handler) => self.inner.timers.spawn(handler(ctx)),
                        None => self.inner.timers.spawn(async move {
                            let _ = ctx
                                .error(
                                    ErrorCode::ProxyForbidden.as_str(),
                                    "no proxy is configured for relayed requests",
                                    None,
                                )
                                .await;
                        }),
                    }
                    return;
                }
                let methods = self.inner.methods.clone();
                self.inner
                    .timers
                    .spawn(async move { methods.dispatch(ctx).await });
            }
            Body::Response {
                request_id,
                success,
                data,
                error,
            } => {
                if peer.is_marker() {
                    let ctx =
                        ResponseContext::new(request_id, success, data, error, peer, timestamp);
                    match self.inner.proxy.read().response.clone() {
                        Some(handler) => self.inner.timers.spawn(handler(ctx)),
                        None => self.drop_proxied("response"),
                    }
                    return;
                }
                self.inner
                    .manager
                    .handle_response(&request_id, success, data, error);
            }
            Body::Notification {
                notification,
                request_id,
            } => {
                let ctx = NotificationContext::new(
                    notification.topic,
                    notification.data,
                    request_id,
                    peer.clone(),
                    timestamp,
                );
                if peer.is_marker() {
                    match self.inner.proxy.read().notification.clone() {
                        Some(handler) => self.inner.timers.spawn(handler(ctx)),
                        None => self.drop_proxied("notification"),
                    }
                    return;
                }
                if let Some(id) = ctx.request_id() {
                    let data = ctx.data().cloned().unwrap_or(Value::Null);
                    self.inner.manager.handle_notification(id, &data);
                } else if ctx.topic().is_some() {
                    let topics = self.inner.topics.clone();
                    self.inner
                        .timers
                        .spawn(async move { topics.dispatch(&ctx).await });
                } else {
                    self.inner.events.emit(NodeEvent::NotificationError {
                        message: "notification carries neither topic nor requestId".to_string(),
                    });
                }
            }
            Body::Error { error } => {
                let ctx = ErrorMessageContext::new(
                    error.severity,
                    error.code.clone(),
                    error.message.clone(),
                    error.details,
                    peer.clone(),
                    timestamp,
                );
                if peer.is_marker() {
                    match self.inner.proxy.read().error_message.clone() {
                        Some(handler) => self.inner.timers.spawn(handler(ctx)),
                        None => self.drop_proxied("error"),
                    }
                    return;
                }
                self.inner.events.emit(NodeEvent::ErrorReceived {
                    severity: error.severity.as_str().to_string(),
                    code: error.code,
                    message: error.message,
                });
                let hooks = self.inner.hooks.read().error.clone();
                for hook in hooks {
                    hook(&ctx);
                }
            }
            Body::Ack { message_id } => {
                trace!(message_id = %message_id, "ack received");
            }
            Body::Ping => {
                self.send_detached(Message::ack());
            }
        }
    }

    fn drop_proxied(&self, kind: &str) {
        self.inner.events.emit(NodeEvent::InternalError {
            message: format!("proxied {kind} dropped: no proxy configured"),
        });
    }

    fn send_detached(&self, message: Message) {
        let buffer = self.inner.buffer.clone();
        self.inner.timers.spawn(async move {
            let _ = buffer.add(message).await;
        });
    }

    /// Issues an outbound request.
    ///
    /// The returned handle resolves with the remote response or rejects
    /// with a timeout, cancellation, or queue failure; await it with
    /// [`Request::result`].
    pub async fn request(
        &self,
        method: &str,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> Result<Request, StarlingError> {
        let validation = method_name_format(method);
        if !validation.valid() {
            return Err(RequestError::new(
                ErrorCode::RequestInvalid,
                validation.errors.join("; "),
            )
            .into());
        }
        let request = Request::new(method, payload, options);
        self.inner.manager.track(&request);
        let accepted = match self.inner.queue.enqueue(request.clone()).await {
            Ok(accepted) => accepted,
            Err(error) => {
                request.cancel("Queue rejected the request");
                return Err(error);
            }
        };
        if !accepted {
            request.cancel("Queue full, request dropped");
        }
        Ok(request)
    }

    /// Publishes a notification, optionally correlated to a request.
    pub async fn notify(
        &self,
        topic: &str,
        data: Option<Value>,
        request_id: Option<String>,
    ) -> Result<bool, StarlingError> {
        let validation = validate_topic_name(topic);
        if !validation.valid() {
            return Err(RequestError::new(
                ErrorCode::RequestInvalid,
                validation.errors.join("; "),
            )
            .into());
        }
        self.inner
            .buffer
            .add(Message::notification(
                Some(topic.to_string()),
                data,
                request_id,
            ))
            .await
    }

    /// Sends a top-level application error to the peer.
    pub async fn send_error(
        &self,
        code: &str,
        message: &str,
        details: Option<Value>,
    ) -> Result<bool, StarlingError> {
        self.inner
            .buffer
            .add(Message::error(Severity::Application, code, message, details))
            .await
    }

    /// Sends a pre-built protocol envelope.
    pub async fn send(&self, message: Message) -> Result<bool, StarlingError> {
        self.inner.buffer.add(message).await
    }

    /// Registers a method handler.
    pub fn register_method<F, Fut>(
        &self,
        name: &str,
        handler: F,
        options: MethodOptions,
    ) -> Result<(), StarlingError>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        Ok(self.inner.methods.register(name, handler, options)?)
    }

    /// Removes a method handler.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.inner.methods.unregister(name)
    }

    /// Subscribes a handler to a topic or wildcard pattern.
    pub fn subscribe<F, Fut>(
        &self,
        pattern: &str,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, StarlingError>
    where
        F: Fn(NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TopicResult> + Send + 'static,
    {
        Ok(self.inner.topics.subscribe(pattern, handler, options)?)
    }

    /// Registers a hook for non-JSON text frames.
    pub fn on_text<F>(&self, hook: F)
    where
        F: Fn(&TextContext) + Send + Sync + 'static,
    {
        self.inner.hooks.write().text.push(Arc::new(hook));
    }

    /// Registers a hook for foreign JSON frames.
    pub fn on_json<F>(&self, hook: F)
    where
        F: Fn(&JsonContext) + Send + Sync + 'static,
    {
        self.inner.hooks.write().json.push(Arc::new(hook));
    }

    /// Registers a hook for opaque binary frames.
    pub fn on_binary<F>(&self, hook: F)
    where
        F: Fn(&BinaryContext) + Send + Sync + 'static,
    {
        self.inner.hooks.write().binary.push(Arc::new(hook));
    }

    /// Registers a hook for inbound top-level error envelopes.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&ErrorMessageContext) + Send + Sync + 'static,
    {
        self.inner.hooks.write().error.push(Arc::new(hook));
    }

    /// Per-method metrics, when the method is registered.
    #[must_use]
    pub fn method_metrics(&self, name: &str) -> Option<crate::methods::MethodMetricsSnapshot> {
        self.inner.methods.metrics(name)
    }

    /// Point-in-time node counters; also emitted as `system:stats`.
    pub fn stats(&self) -> StatsSnapshot {
        let stats = StatsSnapshot {
            active_requests: self.inner.manager.active_count(),
            expired_requests: self.inner.manager.expired_count(),
            queue_size: self.inner.queue.len(),
            methods: self.inner.methods.len(),
            subscriptions: self.inner.topics.len(),
            buffered: self.inner.buffer.len(),
        };
        self.inner
            .events
            .emit(NodeEvent::SystemStats { stats: stats.clone() });
        stats
    }

    /// The node configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Cancels every outstanding request with "Manager disposed",
    /// empties the queue, and releases every timer the node owns.
    pub fn shutdown(&self) {
        self.inner.queue.clear("Manager disposed");
        self.inner.queue.close();
        self.inner.manager.dispose();
        self.inner.buffer.close();
        self.inner.timers.shutdown();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("connected", &self.is_connected())
            .field("methods", &self.inner.methods.len())
            .field("subscriptions", &self.inner.topics.len())
            .finish()
    }
}
