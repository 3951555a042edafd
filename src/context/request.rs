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

//! The context handed to method handlers.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::ProcessingMeta;
use crate::buffer::SendBuffer;
use crate::error::StarlingError;
use crate::events::EventBus;
use crate::protocol::{Message, Peer};

struct RequestContextInner {
    request_id: String,
    method: String,
    payload: Option<Value>,
    peer: Peer,
    metadata: Map<String, Value>,
    timestamp: u64,
    meta: ProcessingMeta,
    buffer: SendBuffer,
}

/// Single-use context for one inbound request.
///
/// The reply surface is single-shot: the first `success` or `error`
/// claims the `processed` latch, and any later reply is a usage error.
/// Intermediate notifications (`notify`, `progress`) do not claim the
/// latch; they mark the context as streaming.
///
/// Cloning is cheap; clones share the same latch.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<RequestContextInner>,
}

impl RequestContext {
    /// Builds the context for one validated request envelope.
    #[must_use]
    pub fn new(
        buffer: SendBuffer,
        events: Arc<EventBus>,
        request_id: impl Into<String>,
        method: impl Into<String>,
        payload: Option<Value>,
        peer: Peer,
        timestamp: u64,
    ) -> Self {
        Self {
            inner: Arc::new(RequestContextInner {
                request_id: request_id.into(),
                method: method.into(),
                payload,
                peer,
                metadata: Map::new(),
                timestamp,
                meta: ProcessingMeta::new(events),
                buffer,
            }),
        }
    }

    /// The id the reply will be correlated under.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// The invoked method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// The invocation payload.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.inner.payload.as_ref()
    }

    /// The envelope's relay marker.
    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.inner.peer
    }

    /// Application metadata attached to the dispatch.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.inner.metadata
    }

    /// The envelope timestamp, Unix milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.inner.timestamp
    }

    /// Whether a terminal reply has been sent.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.inner.meta.is_processed()
    }

    /// Sends the successful response.
    ///
    /// Returns `Ok(written)` where `written` reflects transport
    /// delivery, or [`StarlingError::Context`] when a reply was already
    /// sent.
    pub async fn success(&self, data: Option<Value>) -> Result<bool, StarlingError> {
        self.inner.meta.claim()?;
        let message = Message::response_ok(self.inner.request_id.clone(), data);
        let written = self.inner.buffer.add(message).await?;
        self.inner
            .meta
            .emit_processed(Some(self.inner.request_id.clone()));
        Ok(written)
    }

    /// Sends the failure response.
    pub async fn error(
        &self,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Result<bool, StarlingError> {
        self.inner.meta.claim()?;
        let message =
            Message::response_err(self.inner.request_id.clone(), code, message, details);
        let written = self.inner.buffer.add(message).await?;
        self.inner
            .meta
            .emit_processed(Some(self.inner.request_id.clone()));
        Ok(written)
    }

    /// Sends an intermediate notification correlated to this request.
    ///
    /// Does not claim the latch; marks the context as streaming.
    pub async fn notify(
        &self,
        topic: impl Into<String>,
        data: Value,
    ) -> Result<bool, StarlingError> {
        self.inner.meta.mark_streaming();
        let message = Message::notification(
            Some(topic.into()),
            Some(data),
            Some(self.inner.request_id.clone()),
        );
        Ok(self.inner.buffer.add(message).await?)
    }

    /// Sends a progress notification on the `{requestId}:progress`
    /// topic with a payload of type `"progress"`.
    pub async fn progress(
        &self,
        percent: u8,
        status: Option<&str>,
        details: Option<Value>,
    ) -> Result<bool, StarlingError> {
        let mut data = json!({
            "type": "progress",
            "progress": percent,
        });
        if let Some(status) = status {
            data["status"] = json!(status);
        }
        if let Some(details) = details {
            data["details"] = details;
        }
        let topic = format!("{}:progress", self.inner.request_id);
        self.notify(topic, data).await
    }

    /// Number of intermediate notifications sent so far.
    #[must_use]
    pub fn stream_stats(&self) -> u64 {
        self.inner.meta.notifications_sent()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("method", &self.inner.method)
            .field("processed", &self.is_processed())
            .finish()
    }
}
