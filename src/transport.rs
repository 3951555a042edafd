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

//! The transport collaborator interface.
//!
//! The kernel does not bind, accept, or connect; a transport
//! implementation owns the socket and exposes connection state, an
//! outbound write primitive, and a connected/disconnected signal. The
//! inbound direction is a push: the transport calls the node's
//! `deliver` with each raw frame.
//!
//! [`MemoryTransport`] is an in-process implementation for tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, watch};

/// One outbound frame handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// An opaque binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Byte length of the frame.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Returns `true` for zero-length frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text content, when this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

/// Transport-layer failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A write was attempted while disconnected.
    #[error("transport is not connected")]
    NotConnected,
    /// The transport rejected a write.
    #[error("transport write failed: {reason}")]
    WriteFailed {
        /// Transport-specific failure description.
        reason: String,
    },
    /// The transport is permanently closed.
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the write may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotConnected | Self::WriteFailed { .. })
    }
}

/// Connection-state and outbound-write surface the kernel requires.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// A watch over the connected flag; every transition is observable.
    fn state(&self) -> watch::Receiver<bool>;

    /// Writes one frame. Must not be called concurrently by the kernel;
    /// the send buffer serializes flushes.
    async fn send_raw(&self, frame: Frame) -> Result<(), TransportError>;
}

/// In-process transport that records written frames.
///
/// Connection state is script-controlled via
/// [`set_connected`](MemoryTransport::set_connected), and writes can be
/// made to fail to exercise retry paths.
///
/// # Examples
///
/// ```rust
/// use helios_starling::transport::{Frame, MemoryTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = MemoryTransport::connected();
/// transport.send_raw(Frame::Text("hi".into())).await.unwrap();
/// assert_eq!(transport.sent().len(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryTransport {
    connected: watch::Sender<bool>,
    sent: Mutex<Vec<Frame>>,
    sent_signal: Notify,
    fail_writes: AtomicBool,
}

impl MemoryTransport {
    /// Creates a transport in the connected state.
    #[must_use]
    pub fn connected() -> Self {
        Self::with_state(true)
    }

    /// Creates a transport in the disconnected state.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::with_state(false)
    }

    fn with_state(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self {
            connected: tx,
            sent: Mutex::new(Vec::new()),
            sent_signal: Notify::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Flips the connection state, notifying state watchers.
    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Makes subsequent writes fail until cleared.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every frame written so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Removes and returns every frame written so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Waits until at least `count` frames have been written, then
    /// returns a snapshot. Intended for tests; pair with an outer
    /// `tokio::time::timeout`.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Frame> {
        loop {
            {
                let sent = self.sent.lock();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            self.sent_signal.notified().await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn send_raw(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed {
                reason: "simulated write failure".to_string(),
            });
        }
        self.sent.lock().push(frame);
        self.sent_signal.notify_waiters();
        Ok(())
    }
}
