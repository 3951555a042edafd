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

//! Connection-gated outbound buffer.
//!
//! Every outbound frame funnels through here. Frames accumulate while
//! the transport is down and are flushed in insertion order once it is
//! up; frames accepted within one batching window flush together. The
//! buffer never retries a failed write: the request queue owns retry
//! for requests, and everything else is at-most-once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot, watch};
use tracing::debug;

use crate::config::OnFull;
use crate::error::StarlingError;
use crate::events::{EventBus, NodeEvent};
use crate::protocol::Message;
use crate::timer::TimerGroup;
use crate::transport::{Frame, Transport};

/// Anything the buffer accepts for transmission.
#[derive(Debug)]
pub enum OutboundPayload {
    /// A protocol envelope, serialized on add.
    Message(Box<Message>),
    /// Pre-serialized text.
    Text(String),
    /// Opaque bytes.
    Binary(Vec<u8>),
}

impl From<Message> for OutboundPayload {
    fn from(message: Message) -> Self {
        Self::Message(Box::new(message))
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for OutboundPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

struct OutboundItem {
    frame: Frame,
    added_at: Instant,
    done: oneshot::Sender<bool>,
}

struct BufferInner {
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    queue: Mutex<VecDeque<OutboundItem>>,
    capacity: usize,
    on_full: OnFull,
    batch_window: Duration,
    max_age: Duration,
    item_signal: Notify,
    space_signal: Notify,
    closed: AtomicBool,
}

/// FIFO buffer between the kernel and the transport.
#[derive(Clone)]
pub struct SendBuffer {
    inner: Arc<BufferInner>,
}

impl SendBuffer {
    /// Creates a buffer and spawns its flush loop into `timers`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        capacity: usize,
        on_full: OnFull,
        batch_window: Duration,
        max_age: Duration,
        timers: &TimerGroup,
    ) -> Self {
        let state = transport.state();
        let inner = Arc::new(BufferInner {
            transport,
            events,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            on_full,
            batch_window,
            max_age,
            item_signal: Notify::new(),
            space_signal: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let flusher = inner.clone();
        timers.spawn(async move { run_flush(flusher, state).await });
        Self { inner }
    }

    /// Accepts one payload for transmission.
    ///
    /// Resolves `true` once the frame is written to the transport and
    /// `false` when it is dropped or the write fails. With
    /// [`OnFull::Block`] the call suspends until space frees; with
    /// [`OnFull::Drop`] a full buffer resolves `false`; with
    /// [`OnFull::Error`] it fails with [`StarlingError::QueueFull`].
    pub async fn add(&self, payload: impl Into<OutboundPayload>) -> Result<bool, StarlingError> {
        let frame = match payload.into() {
            OutboundPayload::Message(message) => Frame::Text(message.encode()?),
            OutboundPayload::Text(text) => Frame::Text(text),
            OutboundPayload::Binary(bytes) => Frame::Binary(bytes),
        };

        let rx = loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Ok(false);
            }
            {
                let mut queue = self.inner.queue.lock();
                if queue.len() < self.inner.capacity {
                    let (done, rx) = oneshot::channel();
                    queue.push_back(OutboundItem {
                        frame,
                        added_at: Instant::now(),
                        done,
                    });
                    let pending = queue.len();
                    drop(queue);
                    if !self.inner.transport.is_connected() {
                        self.inner.events.emit(NodeEvent::Buffered { pending });
                    }
                    self.inner.item_signal.notify_one();
                    break rx;
                }
            }
            match self.inner.on_full {
                OnFull::Drop => return Ok(false),
                OnFull::Error => {
                    return Err(StarlingError::QueueFull {
                        capacity: self.inner.capacity,
                    });
                }
                OnFull::Block => self.inner.space_signal.notified().await,
            }
        };

        Ok(rx.await.unwrap_or(false))
    }

    /// Frames currently held back.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Returns `true` when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting payloads and lets the flush loop drain out.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.item_signal.notify_waiters();
        self.inner.space_signal.notify_waiters();
    }
}

impl std::fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendBuffer")
            .field("pending", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

fn purge_stale(inner: &BufferInner) {
    let mut expired = Vec::new();
    {
        let mut queue = inner.queue.lock();
        while queue
            .front()
            .is_some_and(|item| item.added_at.elapsed() > inner.max_age)
        {
            if let Some(item) = queue.pop_front() {
                expired.push(item);
            }
        }
    }
    for item in expired {
        debug!("discarding outbound frame older than the buffer max age");
        inner.events.emit(NodeEvent::SendFailed {
            error: "buffered frame exceeded its maximum age".to_string(),
        });
        let _ = item.done.send(false);
        inner.space_signal.notify_one();
    }
}

async fn run_flush(inner: Arc<BufferInner>, mut state: watch::Receiver<bool>) {
    loop {
        let pending = !inner.queue.lock().is_empty();
        if inner.closed.load(Ordering::SeqCst) && !pending {
            break;
        }

        if !pending {
            tokio::select! {
                _ = inner.item_signal.notified() => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        if !*state.borrow() {
            // Disconnected: hold the items, ageing them out meanwhile.
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = inner.item_signal.notified() => {}
            }
            purge_stale(&inner);
            continue;
        }

        // Connected with work queued: let one batching window close,
        // then flush everything accumulated, in insertion order.
        tokio::time::sleep(inner.batch_window).await;
        let batch: Vec<OutboundItem> = inner.queue.lock().drain(..).collect();
        for item in batch {
            let size = item.frame.len();
            match inner.transport.send_raw(item.frame).await {
                Ok(()) => {
                    inner.events.emit(NodeEvent::SendSuccess { size });
                    let _ = item.done.send(true);
                }
                Err(error) => {
                    debug!(%error, "outbound frame write failed");
                    inner.events.emit(NodeEvent::SendFailed {
                        error: error.to_string(),
                    });
                    let _ = item.done.send(false);
                }
            }
            inner.space_signal.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn buffer_with(
        transport: Arc<MemoryTransport>,
        capacity: usize,
        on_full: OnFull,
    ) -> (SendBuffer, TimerGroup) {
        let timers = TimerGroup::new();
        let buffer = SendBuffer::new(
            transport,
            Arc::new(EventBus::new()),
            capacity,
            on_full,
            Duration::from_millis(1),
            Duration::from_secs(300),
            &timers,
        );
        (buffer, timers)
    }

    #[tokio::test]
    async fn test_add_flushes_in_order_when_connected() {
        let transport = Arc::new(MemoryTransport::connected());
        let (buffer, timers) = buffer_with(transport.clone(), 16, OnFull::Block);

        let a = buffer.add("first".to_string());
        let b = buffer.add("second".to_string());
        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap());
        assert!(b.unwrap());

        let sent = transport.sent();
        assert_eq!(
            sent,
            vec![
                Frame::Text("first".to_string()),
                Frame::Text("second".to_string())
            ]
        );
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_accumulates_while_disconnected() {
        let transport = Arc::new(MemoryTransport::disconnected());
        let (buffer, timers) = buffer_with(transport.clone(), 16, OnFull::Block);

        let pending = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.add("held".to_string()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(buffer.len(), 1);
        assert!(transport.sent().is_empty());

        transport.set_connected(true);
        assert!(pending.await.unwrap().unwrap());
        assert_eq!(transport.sent(), vec![Frame::Text("held".to_string())]);
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_full() {
        let transport = Arc::new(MemoryTransport::disconnected());
        let (buffer, timers) = buffer_with(transport, 1, OnFull::Drop);

        let first = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.add("a".to_string()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!buffer.add("b".to_string()).await.unwrap());
        first.abort();
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_error_policy_fails_when_full() {
        let transport = Arc::new(MemoryTransport::disconnected());
        let (buffer, timers) = buffer_with(transport, 1, OnFull::Error);

        let first = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.add("a".to_string()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = buffer.add("b".to_string()).await;
        assert!(matches!(result, Err(StarlingError::QueueFull { .. })));
        first.abort();
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_write_failure_resolves_false_without_retry() {
        let transport = Arc::new(MemoryTransport::connected());
        transport.fail_writes(true);
        let (buffer, timers) = buffer_with(transport.clone(), 16, OnFull::Block);

        assert!(!buffer.add("doomed".to_string()).await.unwrap());
        assert!(transport.sent().is_empty());
        assert!(buffer.is_empty());
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_message_payload_is_serialized() {
        let transport = Arc::new(MemoryTransport::connected());
        let (buffer, timers) = buffer_with(transport.clone(), 16, OnFull::Block);

        assert!(buffer.add(Message::ping()).await.unwrap());
        let sent = transport.sent();
        let Frame::Text(text) = &sent[0] else {
            panic!("expected text frame");
        };
        assert!(text.contains("\"type\":\"ping\""));
        timers.shutdown();
    }

    #[tokio::test]
    async fn test_closed_buffer_rejects() {
        let transport = Arc::new(MemoryTransport::connected());
        let (buffer, timers) = buffer_with(transport, 16, OnFull::Block);
        buffer.close();
        assert!(!buffer.add("late".to_string()).await.unwrap());
        timers.shutdown();
    }
}
