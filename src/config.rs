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

//! Node configuration.

use std::time::Duration;

use crate::protocol::MAX_MESSAGE_SIZE;

/// Back-pressure policy when a bounded structure is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnFull {
    /// Suspend the caller until space frees or the drain timer fires.
    #[default]
    Block,
    /// Reject the item, returning `false`.
    Drop,
    /// Fail the call with a queue-full error.
    Error,
}

/// Configuration for one node.
///
/// # Examples
///
/// ```rust
/// use helios_starling::config::{NodeConfig, OnFull};
/// use std::time::Duration;
///
/// let config = NodeConfig::default()
///     .with_queue_max_size(50)
///     .with_on_full(OnFull::Drop)
///     .with_drain_timeout(Duration::from_secs(10));
/// assert_eq!(config.queue_max_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Send-buffer capacity in frames.
    ///
    /// Default: 1000
    pub message_buffer_size: usize,

    /// How long a buffered outbound frame may wait before it is
    /// discarded with a send-failure event.
    ///
    /// Default: 5 minutes
    pub message_max_age: Duration,

    /// Outbound request queue capacity.
    ///
    /// Default: 1000
    pub queue_max_size: usize,

    /// Transmission attempts beyond the first before a request fails
    /// with a retry-exceeded error.
    ///
    /// Default: 3
    pub queue_max_retries: u32,

    /// Absolute retry delays. When set, attempt `k` waits
    /// `queue_retry_delays[k]` (the last entry repeats); when unset,
    /// delays follow the exponential backoff curve.
    ///
    /// Default: unset
    pub queue_retry_delays: Option<Vec<Duration>>,

    /// Base delay for the exponential backoff curve.
    ///
    /// Default: 1 second
    pub queue_base_delay: Duration,

    /// Requests allowed in flight concurrently.
    ///
    /// Default: 10
    pub max_concurrent: usize,

    /// Whether the scheduler picks by priority instead of FIFO.
    ///
    /// Default: false
    pub priority_queuing: bool,

    /// Back-pressure policy for the queue and the send buffer.
    ///
    /// Default: [`OnFull::Block`]
    pub on_full: OnFull,

    /// Age at which a queued request fails with a drain-timeout error.
    ///
    /// Default: 30 seconds
    pub drain_timeout: Duration,

    /// Inbound frame size ceiling in bytes.
    ///
    /// Default: 1 MiB
    pub max_message_size: usize,

    /// How long per-connection state survives a disconnect.
    ///
    /// Default: 5 minutes
    pub disconnection_ttl: Duration,

    /// Window within which outbound frames are flushed as one batch.
    ///
    /// Default: 100 milliseconds
    pub batch_window: Duration,

    /// Accept unknown `type` discriminators on inbound frames.
    ///
    /// Default: false
    pub allow_custom_types: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            message_buffer_size: 1000,
            message_max_age: Duration::from_secs(300),
            queue_max_size: 1000,
            queue_max_retries: 3,
            queue_retry_delays: None,
            queue_base_delay: Duration::from_millis(1000),
            max_concurrent: 10,
            priority_queuing: false,
            on_full: OnFull::Block,
            drain_timeout: Duration::from_secs(30),
            max_message_size: MAX_MESSAGE_SIZE,
            disconnection_ttl: Duration::from_secs(300),
            batch_window: Duration::from_millis(100),
            allow_custom_types: false,
        }
    }
}

impl NodeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the send-buffer capacity.
    #[must_use]
    pub fn with_message_buffer_size(mut self, size: usize) -> Self {
        self.message_buffer_size = size;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_max_size(mut self, size: usize) -> Self {
        self.queue_max_size = size;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_queue_max_retries(mut self, retries: u32) -> Self {
        self.queue_max_retries = retries;
        self
    }

    /// Sets absolute retry delays, overriding the backoff curve.
    #[must_use]
    pub fn with_queue_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.queue_retry_delays = Some(delays);
        self
    }

    /// Sets the backoff base delay.
    #[must_use]
    pub fn with_queue_base_delay(mut self, delay: Duration) -> Self {
        self.queue_base_delay = delay;
        self
    }

    /// Sets the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Enables or disables priority scheduling.
    #[must_use]
    pub fn with_priority_queuing(mut self, enabled: bool) -> Self {
        self.priority_queuing = enabled;
        self
    }

    /// Sets the back-pressure policy.
    #[must_use]
    pub fn with_on_full(mut self, on_full: OnFull) -> Self {
        self.on_full = on_full;
        self
    }

    /// Sets the drain timeout.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the inbound frame size ceiling.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the batching window for outbound flushes.
    #[must_use]
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }
}
