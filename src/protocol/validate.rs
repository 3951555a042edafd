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

//! Pure, error-accumulating envelope validators.
//!
//! Validators operate on parsed JSON documents before typed decoding.
//! They never short-circuit: one call surfaces every violation, and each
//! message names the offending field.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use super::message::{MAX_ERROR_MESSAGE_LENGTH, MAX_NAME_LENGTH, PROTOCOL_NAME};

/// Namespaces reserved for the kernel; user registration rejects them.
pub const RESERVED_NAMESPACES: [&str; 4] = ["system", "internal", "stream", "helios"];

static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*(?::[a-zA-Z][a-zA-Z0-9_]*)+$").expect("method name regex")
});

static TOPIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*(?::[a-zA-Z][a-zA-Z0-9_]*)*$").expect("topic name regex")
});

static SEMVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver regex"));

/// Accumulated result of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// One message per broken invariant, each naming the field.
    pub errors: Vec<String>,
}

impl Validation {
    /// An empty, passing validation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every invariant held.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records one violation.
    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Folds another validation's violations into this one.
    pub fn merge(&mut self, other: Validation) {
        self.errors.extend(other.errors);
    }
}

fn is_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// Validates the universal envelope fields and the `peer` type.
///
/// An absent `peer` is treated as `false`; typed decoding normalizes it
/// so downstream code reads the field uniformly.
#[must_use]
pub fn validate_base(value: &Value) -> Validation {
    let mut v = Validation::new();
    let Some(object) = value.as_object() else {
        v.push("message: must be a JSON object");
        return v;
    };

    match object.get("protocol").and_then(Value::as_str) {
        Some(PROTOCOL_NAME) => {}
        Some(other) => v.push(format!(
            "protocol: must be \"{PROTOCOL_NAME}\", got \"{other}\""
        )),
        None => v.push("protocol: required string field is missing"),
    }

    match object.get("version") {
        Some(Value::String(version)) if SEMVER_RE.is_match(version) => {}
        Some(Value::String(version)) => {
            v.push(format!("version: must match MAJOR.MINOR.PATCH, got \"{version}\""));
        }
        Some(_) => v.push("version: must be a string"),
        None => v.push("version: required string field is missing"),
    }

    match object.get("timestamp") {
        Some(ts) if ts.is_u64() => {}
        Some(_) => v.push("timestamp: must be a non-negative integer"),
        None => v.push("timestamp: required integer field is missing"),
    }

    match object.get("type") {
        Some(Value::String(_)) => {}
        Some(_) => v.push("type: must be a string"),
        None => v.push("type: required string field is missing"),
    }

    match object.get("peer") {
        None | Some(Value::Bool(false)) | Some(Value::Object(_)) => {}
        Some(_) => v.push("peer: must be false or an object"),
    }

    v
}

/// Validates the type-specific fields of a request envelope.
#[must_use]
pub fn validate_request(value: &Value) -> Validation {
    let mut v = Validation::new();
    match value.get("requestId").and_then(Value::as_str) {
        Some(id) if is_uuid(id) => {}
        Some(_) => v.push("requestId: must be an RFC-4122 UUID string"),
        None => v.push("requestId: required UUID field is missing"),
    }
    match value.get("method").and_then(Value::as_str) {
        Some(method) => v.merge(method_name_format(method)),
        None => v.push("method: required string field is missing"),
    }
    v
}

/// Validates the type-specific fields of a response envelope.
#[must_use]
pub fn validate_response(value: &Value) -> Validation {
    let mut v = Validation::new();
    match value.get("requestId").and_then(Value::as_str) {
        Some(id) if is_uuid(id) => {}
        Some(_) => v.push("requestId: must be an RFC-4122 UUID string"),
        None => v.push("requestId: required UUID field is missing"),
    }
    let success = match value.get("success") {
        Some(Value::Bool(success)) => Some(*success),
        Some(_) => {
            v.push("success: must be a boolean");
            None
        }
        None => {
            v.push("success: required boolean field is missing");
            None
        }
    };
    match success {
        Some(true) => {
            if value.get("error").is_some() {
                v.push("error: must not be present on a successful response");
            }
        }
        Some(false) => match value.get("error") {
            Some(error) => validate_error_body(error, "error", &mut v),
            None => v.push("error: required on a failure response"),
        },
        None => {}
    }
    v
}

/// Validates the type-specific fields of a notification envelope.
#[must_use]
pub fn validate_notification(value: &Value) -> Validation {
    let mut v = Validation::new();
    match value.get("notification") {
        Some(Value::Object(body)) => {
            match body.get("topic") {
                None => {}
                Some(Value::String(topic)) => {
                    for error in validate_topic_name(topic).errors {
                        v.push(format!("notification.topic: {error}"));
                    }
                }
                Some(_) => v.push("notification.topic: must be a string"),
            }
        }
        Some(_) => v.push("notification: must be an object"),
        None => v.push("notification: required object field is missing"),
    }
    match value.get("requestId") {
        None => {}
        Some(Value::String(id)) if is_uuid(id) => {}
        Some(_) => v.push("requestId: must be an RFC-4122 UUID string when present"),
    }
    v
}

/// Validates the type-specific fields of a top-level error envelope.
#[must_use]
pub fn validate_error(value: &Value) -> Validation {
    let mut v = Validation::new();
    match value.get("error") {
        Some(error @ Value::Object(body)) => {
            match body.get("severity").and_then(Value::as_str) {
                Some("protocol" | "application") => {}
                Some(_) | None => {
                    v.push("error.severity: must be \"protocol\" or \"application\"");
                }
            }
            validate_error_body(error, "error", &mut v);
        }
        Some(_) => v.push("error: must be an object"),
        None => v.push("error: required object field is missing"),
    }
    v
}

/// Validates the type-specific fields of an ack envelope.
#[must_use]
pub fn validate_ack(value: &Value) -> Validation {
    let mut v = Validation::new();
    match value.get("messageId").and_then(Value::as_str) {
        Some(id) if is_uuid(id) => {}
        Some(_) => v.push("messageId: must be an RFC-4122 UUID string"),
        None => v.push("messageId: required UUID field is missing"),
    }
    v
}

fn validate_error_body(value: &Value, field: &str, v: &mut Validation) {
    let Some(body) = value.as_object() else {
        v.push(format!("{field}: must be an object"));
        return;
    };
    match body.get("code").and_then(Value::as_str) {
        Some(code) if !code.is_empty() => {}
        Some(_) => v.push(format!("{field}.code: must be a non-empty string")),
        None => v.push(format!("{field}.code: required string field is missing")),
    }
    match body.get("message").and_then(Value::as_str) {
        Some(message) if !message.is_empty() => {
            if message.len() > MAX_ERROR_MESSAGE_LENGTH {
                v.push(format!(
                    "{field}.message: exceeds {MAX_ERROR_MESSAGE_LENGTH} bytes"
                ));
            }
        }
        Some(_) => v.push(format!("{field}.message: must be a non-empty string")),
        None => v.push(format!("{field}.message: required string field is missing")),
    }
    if let Some(details) = body.get("details")
        && details.is_null()
    {
        v.push(format!("{field}.details: must not be null when present"));
    }
}

/// Checks method-name length and shape without the reserved-namespace
/// rule; outbound calls may target reserved namespaces.
#[must_use]
pub fn method_name_format(name: &str) -> Validation {
    let mut v = Validation::new();
    if name.len() > MAX_NAME_LENGTH {
        v.push(format!("method: exceeds {MAX_NAME_LENGTH} characters"));
    }
    if !METHOD_RE.is_match(name) {
        v.push("method: must match namespace:action");
    }
    v
}

/// Validates a method name for registration: length, shape, and the
/// reserved-namespace rule.
///
/// # Examples
///
/// ```rust
/// use helios_starling::protocol::validate_method_name;
///
/// assert!(validate_method_name("users:getProfile").valid());
/// assert!(!validate_method_name("users").valid());
/// assert!(!validate_method_name("system:shutdown").valid());
/// ```
#[must_use]
pub fn validate_method_name(name: &str) -> Validation {
    let mut v = method_name_format(name);
    if let Some(namespace) = name.split(':').next()
        && RESERVED_NAMESPACES.contains(&namespace)
    {
        v.push(format!("method: namespace \"{namespace}\" is reserved"));
    }
    v
}

/// Validates a topic name: length and shape.
#[must_use]
pub fn validate_topic_name(name: &str) -> Validation {
    let mut v = Validation::new();
    if name.len() > MAX_NAME_LENGTH {
        v.push(format!("topic: exceeds {MAX_NAME_LENGTH} characters"));
    }
    if !TOPIC_RE.is_match(name) {
        v.push("topic: must be colon-separated segments");
    }
    v
}

/// Whether a peer-announced version belongs to our compatibility class
/// (same MAJOR component).
#[must_use]
pub fn version_compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(version) == major(super::message::PROTOCOL_VERSION)
}

/// Runs the base validator plus the validator selected by `type`.
///
/// Unknown `type` values are violations unless `allow_custom_types` is
/// set, in which case only the base envelope is enforced.
#[must_use]
pub fn validate_message(value: &Value, allow_custom_types: bool) -> Validation {
    let mut v = validate_base(value);
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return v;
    };
    match kind {
        "request" => v.merge(validate_request(value)),
        "response" => v.merge(validate_response(value)),
        "notification" => v.merge(validate_notification(value)),
        "error" => v.merge(validate_error(value)),
        "ack" => v.merge(validate_ack(value)),
        "ping" => {}
        other if !allow_custom_types => {
            v.push(format!("type: unknown message type \"{other}\""));
        }
        _ => {}
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base(kind: &str) -> Value {
        json!({
            "protocol": PROTOCOL_NAME,
            "version": "1.0.0",
            "timestamp": 1_700_000_000_000u64,
            "type": kind,
        })
    }

    #[test]
    fn test_base_accepts_well_formed_envelope() {
        assert!(validate_base(&base("ping")).valid());
    }

    #[test]
    fn test_base_accumulates_all_violations() {
        let value = json!({
            "protocol": "other",
            "version": "1.0",
            "timestamp": -5,
            "peer": "yes",
        });
        let v = validate_base(&value);
        assert!(!v.valid());
        assert_eq!(v.errors.len(), 5);
        assert!(v.errors.iter().any(|e| e.starts_with("protocol:")));
        assert!(v.errors.iter().any(|e| e.starts_with("version:")));
        assert!(v.errors.iter().any(|e| e.starts_with("timestamp:")));
        assert!(v.errors.iter().any(|e| e.starts_with("type:")));
        assert!(v.errors.iter().any(|e| e.starts_with("peer:")));
    }

    #[test]
    fn test_base_rejects_non_object() {
        assert!(!validate_base(&json!(42)).valid());
    }

    #[test]
    fn test_request_requires_uuid_and_method() {
        let mut value = base("request");
        value["requestId"] = json!("not-a-uuid");
        value["method"] = json!("nonamespace");
        let v = validate_request(&value);
        assert_eq!(v.errors.len(), 2);

        value["requestId"] = json!("123e4567-e89b-12d3-a456-426614174000");
        value["method"] = json!("users:getProfile");
        assert!(validate_request(&value).valid());
    }

    #[test]
    fn test_response_success_excludes_error() {
        let mut value = base("response");
        value["requestId"] = json!("123e4567-e89b-12d3-a456-426614174000");
        value["success"] = json!(true);
        value["error"] = json!({"code": "X", "message": "y"});
        let v = validate_response(&value);
        assert!(v.errors.iter().any(|e| e.contains("must not be present")));
    }

    #[test]
    fn test_response_failure_requires_error_shape() {
        let mut value = base("response");
        value["requestId"] = json!("123e4567-e89b-12d3-a456-426614174000");
        value["success"] = json!(false);
        assert!(!validate_response(&value).valid());

        value["error"] = json!({"code": "", "message": "", "details": null});
        let v = validate_response(&value);
        assert!(v.errors.iter().any(|e| e.starts_with("error.code:")));
        assert!(v.errors.iter().any(|e| e.starts_with("error.message:")));
        assert!(v.errors.iter().any(|e| e.starts_with("error.details:")));

        value["error"] = json!({"code": "APP_FAIL", "message": "went wrong"});
        assert!(validate_response(&value).valid());
    }

    #[test]
    fn test_notification_topic_and_correlation() {
        let mut value = base("notification");
        assert!(!validate_notification(&value).valid());

        value["notification"] = json!({"topic": "user:presence", "data": {"online": true}});
        assert!(validate_notification(&value).valid());

        value["notification"] = json!({"topic": "9bad"});
        assert!(!validate_notification(&value).valid());

        value["notification"] = json!({});
        value["requestId"] = json!("nope");
        assert!(!validate_notification(&value).valid());
    }

    #[test]
    fn test_error_envelope_severity() {
        let mut value = base("error");
        value["error"] = json!({"severity": "fatal", "code": "X", "message": "y"});
        let v = validate_error(&value);
        assert!(v.errors.iter().any(|e| e.starts_with("error.severity:")));

        value["error"] = json!({"severity": "protocol", "code": "X", "message": "y"});
        assert!(validate_error(&value).valid());
    }

    #[test]
    fn test_ack_requires_message_id() {
        let mut value = base("ack");
        assert!(!validate_ack(&value).valid());
        value["messageId"] = json!("123e4567-e89b-12d3-a456-426614174000");
        assert!(validate_ack(&value).valid());
    }

    #[test]
    fn test_method_name_rules() {
        assert!(validate_method_name("users:getProfile").valid());
        assert!(validate_method_name("a:b:c").valid());
        assert!(validate_method_name("ns_1:action_2").valid());

        // No namespace separator.
        assert!(!validate_method_name("users").valid());
        // Leading digit.
        assert!(!validate_method_name("9users:get").valid());
        // Empty segment.
        assert!(!validate_method_name("users:").valid());
        // Illegal character.
        assert!(!validate_method_name("users:get-profile").valid());
        // Reserved namespaces.
        for reserved in RESERVED_NAMESPACES {
            assert!(!validate_method_name(&format!("{reserved}:op")).valid());
        }
        // Length cap.
        let long = format!("a:{}", "b".repeat(MAX_NAME_LENGTH));
        assert!(!validate_method_name(&long).valid());
    }

    #[test]
    fn test_method_format_allows_reserved_targets() {
        assert!(method_name_format("system:ping").valid());
        assert!(!method_name_format("system").valid());
    }

    #[test]
    fn test_topic_name_rules() {
        assert!(validate_topic_name("user").valid());
        assert!(validate_topic_name("user:presence:changed").valid());
        assert!(!validate_topic_name("user:*").valid());
        assert!(!validate_topic_name(":user").valid());
        assert!(!validate_topic_name("").valid());
    }

    #[test]
    fn test_version_compatibility_classes() {
        assert!(version_compatible("1.0.0"));
        assert!(version_compatible("1.9.3"));
        assert!(!version_compatible("2.0.0"));
    }

    #[test]
    fn test_validate_message_unknown_type() {
        let value = base("gossip");
        assert!(!validate_message(&value, false).valid());
        assert!(validate_message(&value, true).valid());
    }

    #[test]
    fn test_validate_message_merges_base_and_typed() {
        // Malformed version and missing request fields surface together.
        let value = json!({
            "protocol": PROTOCOL_NAME,
            "version": "1.0",
            "timestamp": 0,
            "type": "request",
        });
        let v = validate_message(&value, false);
        assert!(v.errors.len() >= 3);
    }
}
