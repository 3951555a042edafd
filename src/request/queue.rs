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

//! Flow control over outbound requests.
//!
//! A bounded queue with a cooperative scheduler: items are selected
//! FIFO (or by priority), written through the send buffer, and hold a
//! concurrency slot until their request terminates. Transport write
//! failures are retried with backoff up to the retry budget; items that
//! age out fail with a drain timeout. The scheduler suspends while the
//! transport is disconnected and resumes, order preserved, on
//! reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::debug;

use super::request::Request;
use super::retry::{DEFAULT_JITTER, retry_delay};
use crate::buffer::SendBuffer;
use crate::config::{NodeConfig, OnFull};
use crate::error::{RequestError, StarlingError};
use crate::events::{EventBus, NodeEvent};
use crate::protocol::ErrorCode;
use crate::timer::{Clock, TimerGroup};

/// Queue tuning knobs, usually derived from the node configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Capacity in pending items. Default: 1000
    pub max_size: usize,
    /// Transmission retries beyond the first attempt. Default: 3
    pub max_retries: u32,
    /// Backoff base delay. Default: 1 second
    pub base_delay: Duration,
    /// Absolute retry delays overriding the backoff curve when set.
    pub retry_delays: Option<Vec<Duration>>,
    /// In-flight concurrency ceiling. Default: 10
    pub max_concurrent: usize,
    /// Select by priority instead of FIFO. Default: false
    pub priority_queuing: bool,
    /// Back-pressure policy when full. Default: [`OnFull::Block`]
    pub on_full: OnFull,
    /// Age at which a queued item fails. Default: 30 seconds
    pub drain_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            retry_delays: None,
            max_concurrent: 10,
            priority_queuing: false,
            on_full: OnFull::Block,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&NodeConfig> for QueueOptions {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_size: config.queue_max_size,
            max_retries: config.queue_max_retries,
            base_delay: config.queue_base_delay,
            retry_delays: config.queue_retry_delays.clone(),
            max_concurrent: config.max_concurrent,
            priority_queuing: config.priority_queuing,
            on_full: config.on_full,
            drain_timeout: config.drain_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Running,
}

struct QueueEntry {
    request: Request,
    retry_count: u32,
    added_at: u64,
    priority: i32,
    seq: u64,
    not_before: u64,
    state: EntryState,
}

struct QueueInner {
    opts: QueueOptions,
    entries: Mutex<Vec<QueueEntry>>,
    running: AtomicUsize,
    seq: AtomicU64,
    work: Notify,
    space: Notify,
    closed: AtomicBool,
    buffer: SendBuffer,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

/// Bounded FIFO (or priority) queue of pending outbound requests.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Creates a queue and spawns its scheduler and drain monitor into
    /// `timers`.
    #[must_use]
    pub fn new(
        opts: QueueOptions,
        buffer: SendBuffer,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        state: watch::Receiver<bool>,
        timers: &TimerGroup,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            opts,
            entries: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            work: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            buffer,
            events,
            clock,
        });
        let scheduler = inner.clone();
        timers.spawn(async move { run_scheduler(scheduler, state).await });
        let drainer = inner.clone();
        timers.spawn(async move { run_drain_monitor(drainer).await });
        Self { inner }
    }

    /// Adds a request to the queue.
    ///
    /// Returns `Ok(true)` on acceptance. A full queue applies the
    /// back-pressure policy: `Drop` returns `Ok(false)`, `Error` fails
    /// with [`StarlingError::QueueFull`], `Block` suspends until space
    /// frees or the drain timer fires (in which case the request is
    /// rejected with `QUEUE_DRAIN_TIMEOUT` and `Ok(false)` is
    /// returned).
    pub async fn enqueue(&self, request: Request) -> Result<bool, StarlingError> {
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Ok(false);
            }
            let accepted = {
                let mut entries = self.inner.entries.lock();
                if entries.len() < self.inner.opts.max_size {
                    let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
                    let now = self.inner.clock.now_millis();
                    entries.push(QueueEntry {
                        request: request.clone(),
                        retry_count: 0,
                        added_at: now,
                        priority: request.options().priority,
                        seq,
                        not_before: now,
                        state: EntryState::Pending,
                    });
                    Some((seq, entries.len()))
                } else {
                    None
                }
            };
            if let Some((seq, size)) = accepted {
                self.inner.events.emit(NodeEvent::QueueAdded {
                    id: request.id(),
                    size,
                });
                self.inner.events.emit(NodeEvent::QueueSizeChanged { size });
                self.inner.events.emit(NodeEvent::RequestQueued {
                    id: request.id(),
                    method: request.method().to_string(),
                });
                install_removal_hook(&self.inner, &request, seq);
                self.inner.work.notify_one();
                return Ok(true);
            }
            match self.inner.opts.on_full {
                OnFull::Drop => return Ok(false),
                OnFull::Error => {
                    return Err(StarlingError::QueueFull {
                        capacity: self.inner.opts.max_size,
                    });
                }
                OnFull::Block => {
                    tokio::select! {
                        _ = self.inner.space.notified() => {}
                        _ = tokio::time::sleep(self.inner.opts.drain_timeout) => {
                            request.reject(RequestError::new(
                                ErrorCode::QueueDrainTimeout,
                                "timed out waiting for queue capacity",
                            ));
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    /// Cancels every queued request with `REQUEST_CANCELLED(reason)`
    /// and empties the queue. Returns the number of cancelled items.
    pub fn clear(&self, reason: &str) -> usize {
        let drained: Vec<QueueEntry> = {
            let mut entries = self.inner.entries.lock();
            std::mem::take(&mut *entries)
        };
        let count = drained.len();
        let running_freed = drained
            .iter()
            .filter(|e| e.state == EntryState::Running)
            .count();
        if running_freed > 0 {
            self.inner.running.fetch_sub(running_freed, Ordering::SeqCst);
        }
        for entry in drained {
            entry.request.cancel(reason);
        }
        if count > 0 {
            self.inner.events.emit(NodeEvent::RequestsCancelled {
                reason: reason.to_string(),
                count,
            });
            self.inner.events.emit(NodeEvent::QueueSizeChanged { size: 0 });
        }
        self.inner.space.notify_waiters();
        self.inner.work.notify_one();
        count
    }

    /// Items currently queued or in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the scheduler and refuses further enqueues.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.work.notify_waiters();
        self.inner.space.notify_waiters();
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("size", &self.len())
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn install_removal_hook(inner: &Arc<QueueInner>, request: &Request, seq: u64) {
    let weak = Arc::downgrade(inner);
    let id = request.id();
    request.on_terminal(move |_result| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let removed = {
            let mut entries = inner.entries.lock();
            entries
                .iter()
                .position(|e| e.seq == seq)
                .map(|index| (entries.remove(index).state, entries.len()))
        };
        if let Some((state, size)) = removed {
            if state == EntryState::Running {
                inner.running.fetch_sub(1, Ordering::SeqCst);
            }
            inner.events.emit(NodeEvent::QueueRemoved { id, size });
            inner.events.emit(NodeEvent::QueueSizeChanged { size });
            inner.work.notify_one();
            inner.space.notify_one();
        }
    });
}

async fn run_scheduler(inner: Arc<QueueInner>, mut state: watch::Receiver<bool>) {
    loop {
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        if !*state.borrow() {
            // Suspended until the transport reconnects; items keep
            // their order and priority meanwhile.
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = inner.work.notified() => {}
            }
            continue;
        }
        if inner.running.load(Ordering::SeqCst) >= inner.opts.max_concurrent {
            inner.work.notified().await;
            continue;
        }

        let now = inner.clock.now_millis();
        let picked = {
            let mut entries = inner.entries.lock();
            let due = |e: &QueueEntry| e.state == EntryState::Pending && e.not_before <= now;
            let candidate = if inner.opts.priority_queuing {
                // Highest priority wins; insertion order breaks ties.
                entries
                    .iter()
                    .filter(|e| due(e))
                    .max_by(|a, b| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
                    .map(|e| e.seq)
            } else {
                entries.iter().filter(|e| due(e)).map(|e| e.seq).min()
            };
            candidate.and_then(|seq| {
                entries.iter_mut().find(|e| e.seq == seq).map(|entry| {
                    entry.state = EntryState::Running;
                    (entry.request.clone(), seq)
                })
            })
        };

        match picked {
            Some((request, seq)) => {
                inner.running.fetch_add(1, Ordering::SeqCst);
                let task = inner.clone();
                tokio::spawn(async move { execute_entry(task, request, seq).await });
            }
            None => {
                let next_due = {
                    let entries = inner.entries.lock();
                    entries
                        .iter()
                        .filter(|e| e.state == EntryState::Pending)
                        .map(|e| e.not_before)
                        .min()
                };
                match next_due {
                    Some(due) if due > now => {
                        tokio::select! {
                            _ = inner.work.notified() => {}
                            _ = tokio::time::sleep(Duration::from_millis(due - now)) => {}
                            changed = state.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    _ => {
                        tokio::select! {
                            _ = inner.work.notified() => {}
                            changed = state.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn execute_entry(inner: Arc<QueueInner>, request: Request, seq: u64) {
    let written = inner
        .buffer
        .add(request.to_message())
        .await
        .unwrap_or(false);

    if written {
        if request.options().no_response {
            // Fire-and-forget completes on write; the removal hook
            // frees the slot.
            request.resolve(None);
        } else {
            request.arm_timeout();
        }
        return;
    }

    enum AfterFailure {
        Retry,
        Exhausted(u32),
        Gone,
    }
    let outcome = {
        let mut entries = inner.entries.lock();
        match entries.iter_mut().find(|e| e.seq == seq) {
            None => AfterFailure::Gone,
            Some(entry) => {
                entry.retry_count += 1;
                entry.state = EntryState::Pending;
                if entry.retry_count > inner.opts.max_retries {
                    AfterFailure::Exhausted(entry.retry_count)
                } else {
                    let delay = retry_delay(
                        inner.opts.retry_delays.as_deref(),
                        inner.opts.base_delay,
                        entry.retry_count,
                        DEFAULT_JITTER,
                    );
                    entry.not_before = inner.clock.now_millis() + delay.as_millis() as u64;
                    debug!(
                        request_id = %request.id(),
                        attempt = entry.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "transport write failed, backing off"
                    );
                    AfterFailure::Retry
                }
            }
        }
    };

    match outcome {
        AfterFailure::Gone => {}
        AfterFailure::Retry => {
            inner.running.fetch_sub(1, Ordering::SeqCst);
            inner.work.notify_one();
        }
        AfterFailure::Exhausted(attempts) => {
            inner.running.fetch_sub(1, Ordering::SeqCst);
            inner.events.emit(NodeEvent::RequestFailed {
                id: request.id(),
                code: ErrorCode::QueueRetryExceeded.as_str().to_string(),
            });
            request.reject(
                RequestError::new(
                    ErrorCode::QueueRetryExceeded,
                    format!("transport write failed after {attempts} attempts"),
                )
                .with_details(serde_json::json!({
                    "cause": "transport write failed",
                    "attempts": attempts,
                })),
            );
            inner.work.notify_one();
        }
    }
}

async fn run_drain_monitor(inner: Arc<QueueInner>) {
    let interval = (inner.opts.drain_timeout / 4)
        .clamp(Duration::from_millis(10), Duration::from_secs(5));
    let timeout_ms = inner.opts.drain_timeout.as_millis() as u64;
    loop {
        tokio::time::sleep(interval).await;
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let now = inner.clock.now_millis();
        let stale: Vec<Request> = {
            let entries = inner.entries.lock();
            entries
                .iter()
                .filter(|e| now.saturating_sub(e.added_at) > timeout_ms)
                .map(|e| e.request.clone())
                .collect()
        };
        for request in stale {
            request.reject(RequestError::new(
                ErrorCode::QueueDrainTimeout,
                format!("request queued for more than {timeout_ms}ms"),
            ));
        }
    }
}
