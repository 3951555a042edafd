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

//! Wire envelope, codec, and validators.
//!
//! The envelope layout is the protocol contract: a flat JSON object with
//! the universal fields (`protocol`, `version`, `timestamp`, optional
//! `peer`) plus one typed body discriminated by `type`. This module owns
//! the typed model ([`Message`]), classification ([`decode`]), and the
//! pure accumulating validators.

mod code;
mod message;
mod validate;

pub use code::{ErrorCode, Severity};
pub use message::{
    Body, CodecError, DecodedFrame, ErrorBody, MAX_ERROR_MESSAGE_LENGTH, MAX_MESSAGE_SIZE,
    MAX_NAME_LENGTH, Message, NotificationBody, PROTOCOL_NAME, PROTOCOL_VERSION, Peer, RawFrame,
    TopLevelError, clamp_error_message, decode,
};
pub use validate::{
    RESERVED_NAMESPACES, Validation, method_name_format, validate_ack, validate_base,
    validate_error, validate_message, validate_method_name, validate_notification,
    validate_request, validate_response, validate_topic_name, version_compatible,
};
