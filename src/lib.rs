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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! ## Architecture
//!
//! The crate is organized in layers, leaves first:
//!
//! - [`protocol`]: wire envelope, codec, and accumulating validators
//! - [`resolver`]: one-shot inbound frame classification
//! - [`buffer`]: connection-gated, batching send buffer
//! - [`request`]: request objects, the bounded queue, and the
//!   active/expired request tables
//! - [`methods`]: named handlers with validation and timeouts
//! - [`topics`]: wildcard-subscribed notification dispatch
//! - [`context`]: single-use handler-facing reply surfaces
//! - [`events`]: the observability bus
//! - [`node`]: the facade wiring a transport to all of the above
//!
//! Each node owns its registries, tables, and timer group; there is no
//! global state. Clock and id generation are injectable where tests
//! need determinism.

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod methods;
pub mod node;
pub mod protocol;
pub mod request;
pub mod resolver;
pub mod timer;
pub mod topics;
pub mod transport;

pub use buffer::SendBuffer;
pub use config::{NodeConfig, OnFull};
pub use context::RequestContext;
pub use error::{RequestError, StarlingError};
pub use events::{EventBus, NodeEvent, StatsSnapshot};
pub use methods::{MethodError, MethodOptions, MethodsRegistry};
pub use node::{Node, ProxyConfiguration};
pub use protocol::{ErrorCode, Message, Peer, RawFrame, Severity};
pub use request::{Request, RequestOptions, RequestQueue, RequestsManager};
pub use resolver::{ResolveOptions, Resolution, resolve};
pub use timer::{Clock, SystemClock, TimerGroup};
pub use topics::{SubscribeOptions, TopicPattern, TopicsRegistry};
pub use transport::{Frame, MemoryTransport, Transport, TransportError};
