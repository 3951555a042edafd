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

//! Pattern-subscribed notification dispatch.
//!
//! Subscriptions match topics exactly or with `*` segment wildcards.
//! A `*` matches exactly one segment: `user:*` matches `user:presence`
//! but neither `data:sync` nor `user:a:b`. Handlers run in descending
//! priority, registration order within a priority; one handler's
//! failure never stops its siblings.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::context::NotificationContext;
use crate::error::RegistryError;
use crate::events::{EventBus, NodeEvent};
use crate::methods::BoxFuture;
use crate::protocol::validate_topic_name;

/// A compiled topic pattern.
///
/// The matcher is `^` + pattern with each `*` replaced by `[^:]+` +
/// `$`: a wildcard spans one segment, never several.
///
/// # Examples
///
/// ```rust
/// use helios_starling::topics::TopicPattern;
///
/// let pattern = TopicPattern::compile("user:*").unwrap();
/// assert!(pattern.matches("user:presence"));
/// assert!(!pattern.matches("data:sync"));
/// assert!(!pattern.matches("user:presence:changed"));
/// ```
#[derive(Debug, Clone)]
pub struct TopicPattern {
    pattern: String,
    regex: Regex,
}

impl TopicPattern {
    /// Compiles a topic pattern, validating every non-wildcard segment.
    pub fn compile(pattern: &str) -> Result<Self, RegistryError> {
        let invalid = |reasons: Vec<String>| RegistryError::InvalidTopicPattern {
            pattern: pattern.to_string(),
            reasons,
        };
        if pattern.is_empty() {
            return Err(invalid(vec!["pattern: must not be empty".to_string()]));
        }
        // Validate with wildcards substituted by a plain segment so the
        // topic name rules apply to the literal parts.
        let probe = pattern
            .split(':')
            .map(|segment| if segment == "*" { "x" } else { segment })
            .collect::<Vec<_>>()
            .join(":");
        let validation = validate_topic_name(&probe);
        if !validation.valid() {
            return Err(invalid(validation.errors));
        }

        let mut source = String::from("^");
        for (index, segment) in pattern.split(':').enumerate() {
            if index > 0 {
                source.push(':');
            }
            if segment == "*" {
                source.push_str("[^:]+");
            } else {
                source.push_str(&regex::escape(segment));
            }
        }
        source.push('$');
        let regex = Regex::new(&source)
            .map_err(|e| invalid(vec![format!("pattern: {e}")]))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `topic` matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

/// Outcome of one topic handler invocation.
pub type TopicResult = Result<(), String>;

type TopicHandler = Arc<dyn Fn(NotificationContext) -> BoxFuture<'static, TopicResult> + Send + Sync>;

/// Filter gating delivery to one subscription.
pub type TopicFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Survive disconnects. Non-persistent subscriptions are discarded
    /// when the transport drops.
    ///
    /// Default: false
    pub persistent: bool,
    /// Dispatch ordering; higher runs first.
    ///
    /// Default: 0
    pub priority: i32,
    /// Optional payload gate; delivery is skipped when it returns
    /// false.
    pub filter: Option<TopicFilter>,
}

impl SubscribeOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the subscription persistent across disconnects.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Sets the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the payload filter.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("persistent", &self.persistent)
            .field("priority", &self.priority)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

struct Subscription {
    id: u64,
    pattern: TopicPattern,
    handler: TopicHandler,
    priority: i32,
    persistent: bool,
    filter: Option<TopicFilter>,
}

/// Opaque unsubscribe handle returned by `subscribe`.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    registry: std::sync::Weak<RegistryShared>,
}

impl SubscriptionHandle {
    /// The subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscription. Idempotent.
    pub fn off(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscriptions.write().retain(|s| s.id != self.id);
        }
    }
}

struct RegistryShared {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    events: Arc<EventBus>,
}

/// Topic subscription registry shared by a node (or, fan-in/fan-out,
/// by several).
#[derive(Clone)]
pub struct TopicsRegistry {
    shared: Arc<RegistryShared>,
}

impl TopicsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                subscriptions: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Subscribes an async handler to a topic or `*` pattern.
    pub fn subscribe<F, Fut>(
        &self,
        pattern: &str,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, RegistryError>
    where
        F: Fn(NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TopicResult> + Send + 'static,
    {
        let pattern = TopicPattern::compile(pattern)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: TopicHandler =
            Arc::new(move |ctx| -> BoxFuture<'static, TopicResult> { Box::pin(handler(ctx)) });
        self.shared.subscriptions.write().push(Subscription {
            id,
            pattern,
            handler,
            priority: options.priority,
            persistent: options.persistent,
            filter: options.filter,
        });
        Ok(SubscriptionHandle {
            id,
            registry: Arc::downgrade(&self.shared),
        })
    }

    /// Dispatches one inbound notification to every matching
    /// subscription, in descending priority then registration order.
    ///
    /// Handler failures emit `topic:error` and do not stop siblings.
    pub async fn dispatch(&self, ctx: &NotificationContext) {
        let Some(topic) = ctx.topic() else {
            return;
        };
        let mut matching: Vec<(i32, u64, Option<TopicFilter>, TopicHandler)> = {
            let subscriptions = self.shared.subscriptions.read();
            subscriptions
                .iter()
                .filter(|s| s.pattern.matches(topic))
                .map(|s| (s.priority, s.id, s.filter.clone(), s.handler.clone()))
                .collect()
        };
        matching.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut handled = 0usize;
        for (_, _, filter, handler) in matching {
            if let (Some(filter), Some(data)) = (&filter, ctx.data())
                && !filter(data)
            {
                continue;
            }
            handled += 1;
            if let Err(error) = handler(ctx.clone()).await {
                warn!(topic, %error, "topic handler failed");
                self.shared.events.emit(NodeEvent::TopicError {
                    topic: topic.to_string(),
                    error,
                });
            }
        }
        if handled > 0 {
            self.shared.events.emit(NodeEvent::TopicHandled {
                topic: topic.to_string(),
                handlers: handled,
            });
        }
    }

    /// Drops every non-persistent subscription; called on disconnect.
    pub fn drop_ephemeral(&self) {
        self.shared.subscriptions.write().retain(|s| s.persistent);
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    /// Returns `true` when no subscriptions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.subscriptions.read().is_empty()
    }
}

impl std::fmt::Debug for TopicsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicsRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Peer;
    use parking_lot::Mutex;
    use serde_json::json;

    fn notification(topic: &str, data: Value) -> NotificationContext {
        NotificationContext::new(Some(topic.to_string()), Some(data), None, Peer::None, 0)
    }

    #[test]
    fn test_pattern_exact_match() {
        let pattern = TopicPattern::compile("user:presence").unwrap();
        assert!(pattern.matches("user:presence"));
        assert!(!pattern.matches("user:presences"));
        assert!(!pattern.matches("user"));
    }

    #[test]
    fn test_pattern_wildcard_matches_exactly_one_segment() {
        let pattern = TopicPattern::compile("user:*").unwrap();
        assert!(pattern.matches("user:presence"));
        assert!(pattern.matches("user:status"));
        assert!(!pattern.matches("data:sync"));
        assert!(!pattern.matches("user"));
        assert!(!pattern.matches("user:presence:changed"));

        let middle = TopicPattern::compile("data:*:end").unwrap();
        assert!(middle.matches("data:sync:end"));
        assert!(!middle.matches("data:end"));
        assert!(!middle.matches("data:a:b:end"));
    }

    #[test]
    fn test_pattern_rejects_invalid() {
        assert!(TopicPattern::compile("").is_err());
        assert!(TopicPattern::compile("9bad:*").is_err());
        assert!(TopicPattern::compile("user:").is_err());
    }

    fn make_registry() -> (TopicsRegistry, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        (TopicsRegistry::new(events.clone()), events)
    }

    #[tokio::test]
    async fn test_dispatch_priority_then_registration_order() {
        let (registry, _events) = make_registry();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, pattern, priority) in [
            ("wild", "user:*", 10),
            ("exact", "user:presence", 0),
            ("tied", "user:*", 10),
        ] {
            let order = order.clone();
            registry
                .subscribe(
                    pattern,
                    move |_ctx| {
                        let order = order.clone();
                        async move {
                            order.lock().push(name);
                            Ok(())
                        }
                    },
                    SubscribeOptions::new().with_priority(priority),
                )
                .unwrap();
        }

        registry
            .dispatch(&notification("user:presence", json!({"online": true})))
            .await;
        assert_eq!(order.lock().as_slice(), ["wild", "tied", "exact"]);

        order.lock().clear();
        registry
            .dispatch(&notification("chat:message", json!({})))
            .await;
        assert!(order.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_siblings() {
        let (registry, events) = make_registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.on_event(move |event| {
            seen_clone.lock().push(event.name().to_string());
        });

        registry
            .subscribe(
                "jobs:done",
                |_ctx| async { Err("first handler failed".to_string()) },
                SubscribeOptions::new().with_priority(1),
            )
            .unwrap();
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();
        registry
            .subscribe(
                "jobs:done",
                move |_ctx| {
                    let ran = ran_clone.clone();
                    async move {
                        *ran.lock() = true;
                        Ok(())
                    }
                },
                SubscribeOptions::new(),
            )
            .unwrap();

        registry.dispatch(&notification("jobs:done", json!({}))).await;
        assert!(*ran.lock());
        let names = seen.lock().clone();
        assert!(names.contains(&"topic:error".to_string()));
        assert!(names.contains(&"topic:handled".to_string()));
    }

    #[tokio::test]
    async fn test_filter_gates_delivery() {
        let (registry, _events) = make_registry();
        let count = Arc::new(Mutex::new(0usize));
        let count_clone = count.clone();
        registry
            .subscribe(
                "metrics:*",
                move |_ctx| {
                    let count = count_clone.clone();
                    async move {
                        *count.lock() += 1;
                        Ok(())
                    }
                },
                SubscribeOptions::new().with_filter(|data| {
                    data.get("level").and_then(Value::as_str) == Some("high")
                }),
            )
            .unwrap();

        registry
            .dispatch(&notification("metrics:cpu", json!({"level": "high"})))
            .await;
        registry
            .dispatch(&notification("metrics:cpu", json!({"level": "low"})))
            .await;
        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_handle() {
        let (registry, _events) = make_registry();
        let handle = registry
            .subscribe("a:b", |_ctx| async { Ok(()) }, SubscribeOptions::new())
            .unwrap();
        assert_eq!(registry.len(), 1);
        handle.off();
        assert_eq!(registry.len(), 0);
        // A second off is harmless.
        handle.off();
    }

    #[tokio::test]
    async fn test_drop_ephemeral_keeps_persistent() {
        let (registry, _events) = make_registry();
        registry
            .subscribe("a:b", |_ctx| async { Ok(()) }, SubscribeOptions::new())
            .unwrap();
        registry
            .subscribe(
                "a:c",
                |_ctx| async { Ok(()) },
                SubscribeOptions::new().persistent(),
            )
            .unwrap();

        registry.drop_ephemeral();
        assert_eq!(registry.len(), 1);
    }
}
