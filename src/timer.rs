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

//! Time sources and node-scoped timer management.
//!
//! Every background task a node spawns (request timeouts, queue drain
//! scans, expired-table cleanup, buffer flushing) is registered with a
//! [`TimerGroup`] so that node shutdown releases all of them at once.
//! Wall-clock reads go through the [`Clock`] trait so tests can inject a
//! deterministic source.

use std::fmt;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A source of Unix-millisecond timestamps.
///
/// The kernel reads time through this trait wherever elapsed time is
/// load-bearing (queue item ages, expired-request attribution), allowing
/// tests to substitute a fixed or scripted clock.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time as integer Unix milliseconds.
    fn now_millis(&self) -> u64;
}

/// The default [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}

/// Current system time as integer Unix milliseconds.
///
/// # Examples
///
/// ```rust
/// let ts = helios_starling::timer::now_millis();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns the background tasks spawned on behalf of one node.
///
/// Tasks registered here keep running until they complete on their own or
/// the group is [shut down](TimerGroup::shutdown). Shutting the group down
/// aborts every task that is still live; finished handles are pruned
/// opportunistically on each spawn so the group does not grow without
/// bound on long-lived nodes.
#[derive(Debug, Default)]
pub struct TimerGroup {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerGroup {
    /// Creates an empty timer group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a future onto the runtime and tracks its handle.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tracked tasks that have not yet finished.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Returns `true` if no tracked task is still running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aborts every tracked task that is still running.
    ///
    /// Idempotent: a second call is a no-op.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}
