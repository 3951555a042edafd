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

//! One pending outbound call.
//!
//! A request is a completion primitive with listener registries on the
//! side: `pending -> fulfilled | rejected`, exactly one terminal
//! transition, sticky thereafter. Correlated notifications fan out to
//! the progress or notification listeners, discriminated by the
//! payload's `type` field.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::RequestError;
use crate::protocol::{ErrorCode, Message};
use crate::timer;

/// Terminal outcome of a request: response data or a failure.
pub type RequestResult = Result<Option<Value>, RequestError>;

type Listener = Box<dyn Fn(&Value) + Send + Sync>;
type TerminalHook = Box<dyn FnOnce(&RequestResult) + Send>;

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// How long to wait for a response once the request is sent; zero
    /// disables the timer.
    ///
    /// Default: 30 seconds
    pub timeout: Duration,
    /// Fire-and-forget: resolve as soon as the frame is written.
    ///
    /// Default: false
    pub no_response: bool,
    /// Scheduling priority when the queue runs in priority mode.
    ///
    /// Default: 0
    pub priority: i32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            no_response: false,
            priority: 0,
        }
    }
}

enum CompletionState {
    Pending {
        waiters: Vec<oneshot::Sender<RequestResult>>,
        hooks: Vec<TerminalHook>,
        timer: Option<JoinHandle<()>>,
    },
    Done(RequestResult),
}

struct RequestShared {
    state: Mutex<CompletionState>,
    progress_listeners: Mutex<Vec<Listener>>,
    notification_listeners: Mutex<Vec<Listener>>,
}

fn complete_shared(shared: &RequestShared, result: RequestResult) -> bool {
    let (waiters, hooks, timer) = {
        let mut state = shared.state.lock();
        match &mut *state {
            CompletionState::Done(_) => return false,
            CompletionState::Pending {
                waiters,
                hooks,
                timer,
            } => {
                let waiters = std::mem::take(waiters);
                let hooks = std::mem::take(hooks);
                let timer = timer.take();
                *state = CompletionState::Done(result.clone());
                (waiters, hooks, timer)
            }
        }
    };
    if let Some(timer) = timer {
        timer.abort();
    }
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
    for hook in hooks {
        hook(&result);
    }
    true
}

/// Handle to one outbound call.
///
/// Cloning is cheap; every clone observes the same completion.
#[derive(Clone)]
pub struct Request {
    id: Uuid,
    method: String,
    payload: Option<Value>,
    options: RequestOptions,
    created_at: u64,
    shared: Arc<RequestShared>,
}

impl Request {
    /// Creates a pending request with a fresh UUID.
    #[must_use]
    pub fn new(method: impl Into<String>, payload: Option<Value>, options: RequestOptions) -> Self {
        Self::with_id(Uuid::new_v4(), method, payload, options)
    }

    /// Creates a pending request with an injected id, for deterministic
    /// tests.
    #[must_use]
    pub fn with_id(
        id: Uuid,
        method: impl Into<String>,
        payload: Option<Value>,
        options: RequestOptions,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            payload,
            options,
            created_at: timer::now_millis(),
            shared: Arc::new(RequestShared {
                state: Mutex::new(CompletionState::Pending {
                    waiters: Vec::new(),
                    hooks: Vec::new(),
                    timer: None,
                }),
                progress_listeners: Mutex::new(Vec::new()),
                notification_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The request id binding responses back to this call.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Target method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Invocation payload.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// The options this request was created with.
    #[must_use]
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Creation time in Unix milliseconds.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// The wire envelope for this request.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message::request(self.id, &self.method, self.payload.clone())
    }

    /// Fulfills the request. Returns `false` if already terminal.
    pub fn resolve(&self, data: Option<Value>) -> bool {
        complete_shared(&self.shared, Ok(data))
    }

    /// Rejects the request. Returns `false` if already terminal.
    pub fn reject(&self, error: RequestError) -> bool {
        complete_shared(&self.shared, Err(error))
    }

    /// Rejects with `REQUEST_CANCELLED` and the given reason.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.reject(RequestError::new(ErrorCode::RequestCancelled, reason.into()))
    }

    /// Whether the terminal transition has happened.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(&*self.shared.state.lock(), CompletionState::Done(_))
    }

    /// Whether the request is still pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// The terminal outcome, when already reached.
    #[must_use]
    pub fn outcome(&self) -> Option<RequestResult> {
        match &*self.shared.state.lock() {
            CompletionState::Done(result) => Some(result.clone()),
            CompletionState::Pending { .. } => None,
        }
    }

    /// Waits for the terminal outcome.
    pub async fn result(&self) -> RequestResult {
        let rx = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                CompletionState::Done(result) => return result.clone(),
                CompletionState::Pending { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        rx.await.unwrap_or_else(|_| {
            Err(RequestError::new(
                ErrorCode::RequestCancelled,
                "request dropped before completion",
            ))
        })
    }

    /// Registers a hook run exactly once on the terminal transition.
    ///
    /// A hook registered after termination runs immediately.
    pub fn on_terminal<F>(&self, hook: F)
    where
        F: FnOnce(&RequestResult) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match &mut *state {
            CompletionState::Done(result) => {
                let result = result.clone();
                drop(state);
                hook(&result);
            }
            CompletionState::Pending { hooks, .. } => hooks.push(Box::new(hook)),
        }
    }

    /// Registers a listener for correlated notifications whose payload
    /// `type` is `"progress"`.
    pub fn on_progress<F>(&self, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.progress_listeners.lock().push(Box::new(listener));
    }

    /// Registers a listener for every other correlated notification.
    pub fn on_notification<F>(&self, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared
            .notification_listeners
            .lock()
            .push(Box::new(listener));
    }

    /// Routes a correlated notification payload to the right listener
    /// set. Deliveries after the terminal transition are ignored;
    /// listener panics are logged and contained.
    pub fn deliver_notification(&self, data: &Value) {
        if self.is_terminal() {
            return;
        }
        let is_progress = data
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t == "progress");
        let listeners = if is_progress {
            self.shared.progress_listeners.lock()
        } else {
            self.shared.notification_listeners.lock()
        };
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(data))).is_err() {
                warn!(request_id = %self.id, "notification listener panicked");
            }
        }
    }

    /// Arms the response timer.
    ///
    /// Called when the frame is written. No-op for zero timeouts and
    /// fire-and-forget requests; rearming replaces the previous timer.
    pub fn arm_timeout(&self) {
        if self.options.timeout.is_zero() || self.options.no_response {
            return;
        }
        let timeout = self.options.timeout;
        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                complete_shared(
                    &shared,
                    Err(RequestError::new(
                        ErrorCode::RequestTimeout,
                        format!("no response within {}ms", timeout.as_millis()),
                    )),
                );
            }
        });
        let mut state = self.shared.state.lock();
        match &mut *state {
            CompletionState::Pending { timer, .. } => {
                if let Some(old) = timer.replace(handle) {
                    old.abort();
                }
            }
            CompletionState::Done(_) => handle.abort(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("terminal", &self.is_terminal())
            .finish()
    }
}
