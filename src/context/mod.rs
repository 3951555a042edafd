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

//! Handler-facing context objects.
//!
//! One context per inbound frame, single-use. The `processed` latch is
//! the invariant that makes every reply path single-shot; its first
//! flip emits the `message:processed` metric.

mod inbound;
mod request;

pub use inbound::{
    BinaryContext, ErrorMessageContext, JsonContext, NotificationContext, ResponseContext,
    TextContext,
};
pub use request::RequestContext;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::error::ContextError;
use crate::events::{EventBus, NodeEvent};

/// Shared single-shot latch and processing metric for a context.
#[derive(Debug)]
pub(crate) struct ProcessingMeta {
    started: Instant,
    processed: AtomicBool,
    streaming: AtomicBool,
    notifications: AtomicU64,
    events: Arc<EventBus>,
}

impl ProcessingMeta {
    pub(crate) fn new(events: Arc<EventBus>) -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            notifications: AtomicU64::new(0),
            events,
        }
    }

    pub(crate) fn is_processed(&self) -> bool {
        self.processed.load(Ordering::SeqCst)
    }

    /// Claims the latch; exactly one caller wins.
    pub(crate) fn claim(&self) -> Result<(), ContextError> {
        if self
            .processed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(())
        } else {
            Err(ContextError::AlreadyProcessed)
        }
    }

    pub(crate) fn mark_streaming(&self) {
        self.streaming.store(true, Ordering::SeqCst);
        self.notifications.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn notifications_sent(&self) -> u64 {
        self.notifications.load(Ordering::SeqCst)
    }

    pub(crate) fn emit_processed(&self, request_id: Option<String>) {
        self.events.emit(NodeEvent::Processed {
            duration_ms: self.started.elapsed().as_millis() as u64,
            request_id,
            streaming: self.streaming.load(Ordering::SeqCst),
            notifications: self.notifications.load(Ordering::SeqCst),
        });
    }
}
