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

//! Outbound request lifecycle.
//!
//! A call becomes a [`Request`], enters the [`RequestQueue`] for
//! transmission, and is owned by the [`RequestsManager`] until its
//! terminal transition. Retry pacing lives in the backoff helpers.

mod manager;
mod queue;
mod request;
mod retry;

pub use manager::{CLEANUP_INTERVAL, EXPIRED_TTL, RequestsManager};
pub use queue::{QueueOptions, RequestQueue};
pub use request::{Request, RequestOptions, RequestResult};
pub use retry::{DEFAULT_JITTER, MAX_BACKOFF, backoff_delay, retry_delay};
