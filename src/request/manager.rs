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

//! Ownership of outstanding requests.
//!
//! The manager holds the *active* table (id to request) and the
//! *expired* table (id to termination record). When a request
//! terminates it moves from active to expired, where its id lives long
//! enough to classify a tardy response as late rather than unknown. An
//! orphan response never produces an error back to the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::request::Request;
use crate::error::RequestError;
use crate::events::{EventBus, NodeEvent};
use crate::protocol::ErrorBody;
use crate::timer::{Clock, TimerGroup};

/// How often the expired table is swept.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// How long a terminated request id is retained for late-response
/// attribution.
pub const EXPIRED_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
struct ExpiredEntry {
    /// When the request terminated, Unix milliseconds.
    terminated_at: u64,
    /// The timeout the request ran with.
    #[allow(dead_code)]
    timeout: Duration,
}

struct ManagerInner {
    active: Mutex<HashMap<Uuid, Request>>,
    expired: Mutex<HashMap<Uuid, ExpiredEntry>>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

/// Routes inbound responses and correlated notifications to their
/// requests.
#[derive(Clone)]
pub struct RequestsManager {
    inner: Arc<ManagerInner>,
}

impl RequestsManager {
    /// Creates a manager and spawns its cleanup sweep into `timers`.
    #[must_use]
    pub fn new(events: Arc<EventBus>, clock: Arc<dyn Clock>, timers: &TimerGroup) -> Self {
        let inner = Arc::new(ManagerInner {
            active: Mutex::new(HashMap::new()),
            expired: Mutex::new(HashMap::new()),
            events,
            clock,
        });
        let sweeper = Arc::downgrade(&inner);
        timers.spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                let Some(inner) = sweeper.upgrade() else {
                    break;
                };
                let cutoff = inner
                    .clock
                    .now_millis()
                    .saturating_sub(EXPIRED_TTL.as_millis() as u64);
                inner
                    .expired
                    .lock()
                    .retain(|_, entry| entry.terminated_at >= cutoff);
            }
        });
        Self { inner }
    }

    /// Takes ownership of a request until its terminal transition.
    ///
    /// On termination the id moves to the expired table so a tardy
    /// response can be attributed; the `request:completed` event fires
    /// there as well.
    pub fn track(&self, request: &Request) {
        self.inner
            .active
            .lock()
            .insert(request.id(), request.clone());

        let weak = Arc::downgrade(&self.inner);
        let id = request.id();
        let timeout = request.options().timeout;
        request.on_terminal(move |result| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.active.lock().remove(&id);
            inner.expired.lock().insert(
                id,
                ExpiredEntry {
                    terminated_at: inner.clock.now_millis(),
                    timeout,
                },
            );
            inner.events.emit(NodeEvent::RequestCompleted {
                id,
                success: result.is_ok(),
            });
        });
    }

    /// Routes an inbound response to its request.
    ///
    /// An active hit resolves or rejects the request. A miss consults
    /// the expired table: a hit there emits `request:late_response`
    /// with the delay, anything else `request:unknown_response`.
    pub fn handle_response(
        &self,
        request_id: &str,
        success: bool,
        data: Option<Value>,
        error: Option<ErrorBody>,
    ) {
        let Ok(id) = Uuid::parse_str(request_id) else {
            self.inner.events.emit(NodeEvent::UnknownResponse {
                id: request_id.to_string(),
            });
            return;
        };

        let request = self.inner.active.lock().get(&id).cloned();
        if let Some(request) = request {
            if success {
                self.inner.events.emit(NodeEvent::ResponseReceived { id });
                request.resolve(data);
            } else {
                let error = error.map(RequestError::from).unwrap_or_else(|| {
                    RequestError::from_parts("UNKNOWN", "failure response carried no error body")
                });
                self.inner.events.emit(NodeEvent::ResponseError {
                    id,
                    code: error.code.clone(),
                });
                request.reject(error);
            }
            // The terminal hook moved it to the expired table already.
            return;
        }

        let expired = self.inner.expired.lock().get(&id).copied();
        match expired {
            Some(entry) => {
                let delay = self
                    .inner
                    .clock
                    .now_millis()
                    .saturating_sub(entry.terminated_at);
                debug!(request_id = %id, delay_ms = delay, "late response");
                self.inner.events.emit(NodeEvent::LateResponse {
                    id,
                    response_delay_ms: delay,
                });
            }
            None => {
                self.inner.events.emit(NodeEvent::UnknownResponse {
                    id: id.to_string(),
                });
            }
        }
    }

    /// Routes a correlated notification to its request's listeners.
    ///
    /// Unknown or already-terminated ids are dropped with an
    /// observability event; routing never fails.
    pub fn handle_notification(&self, request_id: &str, data: &Value) {
        let request = Uuid::parse_str(request_id)
            .ok()
            .and_then(|id| self.inner.active.lock().get(&id).cloned());
        match request {
            Some(request) => {
                request.deliver_notification(data);
                self.inner.events.emit(NodeEvent::RequestNotification {
                    id: request.id(),
                });
            }
            None => {
                self.inner.events.emit(NodeEvent::NotificationError {
                    message: format!(
                        "correlated notification for unknown request {request_id}"
                    ),
                });
            }
        }
    }

    /// Requests still awaiting termination.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Terminated ids retained for late-response attribution.
    #[must_use]
    pub fn expired_count(&self) -> usize {
        self.inner.expired.lock().len()
    }

    /// Cancels every active request with the reason "Manager disposed".
    pub fn dispose(&self) {
        let active: Vec<Request> = {
            let mut table = self.inner.active.lock();
            table.drain().map(|(_, request)| request).collect()
        };
        let count = active.len();
        for request in active {
            request.cancel("Manager disposed");
        }
        if count > 0 {
            self.inner.events.emit(NodeEvent::RequestsCancelled {
                reason: "Manager disposed".to_string(),
                count,
            });
        }
    }
}

impl std::fmt::Debug for RequestsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestsManager")
            .field("active", &self.active_count())
            .field("expired", &self.expired_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::request::RequestOptions;
    use crate::timer::SystemClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> (RequestsManager, Arc<EventBus>, TimerGroup) {
        let events = Arc::new(EventBus::new());
        let timers = TimerGroup::new();
        let manager = RequestsManager::new(events.clone(), Arc::new(SystemClock), &timers);
        (manager, events, timers)
    }

    fn collect(events: &EventBus) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.on_event(move |event| {
            seen_clone.lock().push(event.name().to_string());
        });
        seen
    }

    #[tokio::test]
    async fn test_response_resolves_active_request() {
        let (manager, _events, timers) = manager();
        let request = Request::new("a:b", None, RequestOptions::default());
        manager.track(&request);
        assert_eq!(manager.active_count(), 1);

        manager.handle_response(
            &request.id().to_string(),
            true,
            Some(json!({"name": "John"})),
            None,
        );
        assert_eq!(request.result().await, Ok(Some(json!({"name": "John"}))));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.expired_count(), 1);
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_failure_response_rejects() {
        let (manager, _events, timers) = manager();
        let request = Request::new("a:b", None, RequestOptions::default());
        manager.track(&request);

        manager.handle_response(
            &request.id().to_string(),
            false,
            None,
            Some(ErrorBody {
                code: "APP_FAIL".into(),
                message: "remote failure".into(),
                details: None,
            }),
        );
        let error = request.result().await.unwrap_err();
        assert_eq!(error.code, "APP_FAIL");
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_late_response_attribution() {
        let (manager, events, timers) = manager();
        let seen = collect(&events);
        let request = Request::new(
            "slow:op",
            None,
            RequestOptions {
                timeout: Duration::from_millis(30),
                ..Default::default()
            },
        );
        manager.track(&request);
        request.arm_timeout();

        let error = request.result().await.unwrap_err();
        assert!(error.is(ErrorCode::RequestTimeout));
        assert_eq!(manager.expired_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.handle_response(&request.id().to_string(), true, Some(json!(1)), None);

        let names = seen.lock().clone();
        assert!(names.contains(&"request:late_response".to_string()));
        assert!(!names.contains(&"request:unknown_response".to_string()));
        // The terminated request kept its original outcome.
        assert!(request.result().await.unwrap_err().is(ErrorCode::RequestTimeout));
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_response() {
        let (manager, events, timers) = manager();
        let seen = collect(&events);
        manager.handle_response(&Uuid::new_v4().to_string(), true, None, None);
        manager.handle_response("not-a-uuid", true, None, None);
        let names = seen.lock().clone();
        assert_eq!(
            names
                .iter()
                .filter(|n| *n == "request:unknown_response")
                .count(),
            2
        );
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_correlated_notification_routing() {
        let (manager, events, timers) = manager();
        let seen = collect(&events);
        let request = Request::new("job:run", None, RequestOptions::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        request.on_progress(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        manager.track(&request);

        manager.handle_notification(
            &request.id().to_string(),
            &json!({"type": "progress", "progress": 25}),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        manager.handle_notification(&Uuid::new_v4().to_string(), &json!({}));
        let names = seen.lock().clone();
        assert!(names.contains(&"request:notification".to_string()));
        assert!(names.contains(&"notification:error".to_string()));
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_dispose_cancels_active() {
        let (manager, _events, timers) = manager();
        let r1 = Request::new("a:b", None, RequestOptions::default());
        let r2 = Request::new("a:c", None, RequestOptions::default());
        manager.track(&r1);
        manager.track(&r2);

        manager.dispose();
        assert_eq!(manager.active_count(), 0);
        let error = r1.result().await.unwrap_err();
        assert!(error.is(ErrorCode::RequestCancelled));
        assert!(error.message.contains("Manager disposed"));
        assert!(r2.is_terminal());
        timers.shutdown();
    }
}
