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

//! End-to-end scenarios over the in-memory transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};

use helios_starling::config::{NodeConfig, OnFull};
use helios_starling::events::NodeEvent;
use helios_starling::methods::MethodOptions;
use helios_starling::protocol::{ErrorCode, Message, PROTOCOL_NAME};
use helios_starling::request::RequestOptions;
use helios_starling::topics::SubscribeOptions;
use helios_starling::Node;
use helios_starling::transport::{Frame, MemoryTransport};

const PROFILE_REQUEST_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

fn fast_config() -> NodeConfig {
    NodeConfig::default().with_batch_window(Duration::from_millis(1))
}

fn make_node(config: NodeConfig) -> (Node, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::connected());
    let node = Node::new(transport.clone(), config);
    (node, transport)
}

fn capture_events(node: &Node) -> Arc<Mutex<Vec<NodeEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    node.on_event(move |event| {
        seen_clone.lock().push(event.clone());
    });
    seen
}

async fn sent_json(transport: &MemoryTransport, count: usize) -> Vec<Value> {
    let frames = tokio::time::timeout(Duration::from_secs(2), transport.wait_for_sent(count))
        .await
        .expect("expected outbound frames");
    frames
        .into_iter()
        .map(|frame| match frame {
            Frame::Text(text) => serde_json::from_str(&text).expect("outbound frame is JSON"),
            Frame::Binary(_) => panic!("unexpected binary frame"),
        })
        .collect()
}

fn request_envelope(request_id: &str, method: &str, payload: Value) -> String {
    json!({
        "protocol": PROTOCOL_NAME,
        "version": "1.0.0",
        "timestamp": 1_700_000_000_000u64,
        "type": "request",
        "requestId": request_id,
        "method": method,
        "payload": payload,
    })
    .to_string()
}

#[tokio::test]
async fn test_successful_request() {
    let (node, transport) = make_node(fast_config());
    node.register_method(
        "users:getProfile",
        |ctx| async move {
            ctx.success(Some(json!({"name": "John"}))).await?;
            Ok(())
        },
        MethodOptions::new(),
    )
    .unwrap();

    node.deliver(request_envelope(
        PROFILE_REQUEST_ID,
        "users:getProfile",
        json!({"userId": "123"}),
    ));

    let sent = sent_json(&transport, 1).await;
    let response = &sent[0];
    assert_eq!(response["type"], "response");
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["data"], json!({"name": "John"}));
    assert_eq!(response["requestId"], json!(PROFILE_REQUEST_ID));
    assert!(response.get("error").is_none());
    node.shutdown();
}

#[tokio::test]
async fn test_unknown_method() {
    let (node, transport) = make_node(fast_config());
    let request_id = uuid::Uuid::new_v4().to_string();
    node.deliver(request_envelope(&request_id, "users:missing", json!({})));

    let sent = sent_json(&transport, 1).await;
    let response = &sent[0];
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error"]["code"], json!("METHOD_NOT_FOUND"));
    assert_eq!(response["requestId"], json!(request_id));
    node.shutdown();
}

#[tokio::test]
async fn test_method_timeout() {
    let (node, transport) = make_node(fast_config());
    node.register_method(
        "slow:op",
        |_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        },
        MethodOptions::new().with_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let start = Instant::now();
    node.deliver(request_envelope(
        &uuid::Uuid::new_v4().to_string(),
        "slow:op",
        json!({}),
    ));

    let sent = sent_json(&transport, 1).await;
    assert!(start.elapsed() <= Duration::from_millis(150));
    let response = &sent[0];
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error"]["code"], json!("REQUEST_TIMEOUT"));
    node.shutdown();
}

#[tokio::test]
async fn test_progress_streaming_server_side() {
    let (node, transport) = make_node(fast_config());
    node.register_method(
        "job:run",
        |ctx| async move {
            ctx.progress(25, None, None).await?;
            ctx.progress(50, None, None).await?;
            ctx.progress(75, None, None).await?;
            ctx.success(Some(json!({"done": true}))).await?;
            Ok(())
        },
        MethodOptions::new(),
    )
    .unwrap();

    let request_id = uuid::Uuid::new_v4().to_string();
    node.deliver(request_envelope(&request_id, "job:run", json!({})));

    let sent = sent_json(&transport, 4).await;
    let progress_topic = format!("{request_id}:progress");
    for (index, expected) in [25, 50, 75].iter().enumerate() {
        let frame = &sent[index];
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["requestId"], json!(request_id));
        assert_eq!(frame["notification"]["topic"], json!(progress_topic));
        assert_eq!(frame["notification"]["data"]["type"], json!("progress"));
        assert_eq!(frame["notification"]["data"]["progress"], json!(expected));
    }
    let response = &sent[3];
    assert_eq!(response["type"], "response");
    assert_eq!(response["data"], json!({"done": true}));
    node.shutdown();
}

#[tokio::test]
async fn test_progress_streaming_caller_side() {
    let (node, transport) = make_node(fast_config());
    let request = node
        .request("job:run", None, RequestOptions::default())
        .await
        .unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let progress_clone = progress.clone();
    request.on_progress(move |data| {
        progress_clone
            .lock()
            .push(data["progress"].as_u64().unwrap_or(0));
    });
    let stray = Arc::new(Mutex::new(0usize));
    let stray_clone = stray.clone();
    request.on_notification(move |_| {
        *stray_clone.lock() += 1;
    });

    // Wait for the request frame to go out, then stream the replies.
    let _ = sent_json(&transport, 1).await;
    let request_id = request.id().to_string();
    for pct in [25, 50, 75] {
        let frame = Message::notification(
            Some(format!("{request_id}:progress")),
            Some(json!({"type": "progress", "progress": pct})),
            Some(request_id.clone()),
        );
        node.deliver(frame.encode().unwrap());
    }
    let response = Message::response_ok(request_id, Some(json!({"done": true})));
    node.deliver(response.encode().unwrap());

    let outcome = tokio::time::timeout(Duration::from_secs(1), request.result())
        .await
        .expect("response should resolve the request");
    assert_eq!(outcome, Ok(Some(json!({"done": true}))));
    assert_eq!(progress.lock().as_slice(), [25, 50, 75]);
    // Progress frames never reach the plain notification listener.
    assert_eq!(*stray.lock(), 0);
    node.shutdown();
}

#[tokio::test]
async fn test_topic_wildcard_priority() {
    let (node, _transport) = make_node(fast_config());
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_clone = order.clone();
    node.subscribe(
        "user:*",
        move |_ctx| {
            let order = order_clone.clone();
            async move {
                order.lock().push("wildcard");
                Ok(())
            }
        },
        SubscribeOptions::new().with_priority(10),
    )
    .unwrap();
    let order_clone = order.clone();
    node.subscribe(
        "user:presence",
        move |_ctx| {
            let order = order_clone.clone();
            async move {
                order.lock().push("exact");
                Ok(())
            }
        },
        SubscribeOptions::new(),
    )
    .unwrap();

    let frame = Message::notification(
        Some("user:presence".to_string()),
        Some(json!({"online": true})),
        None,
    );
    node.deliver(frame.encode().unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(order.lock().as_slice(), ["wildcard", "exact"]);

    order.lock().clear();
    let other = Message::notification(
        Some("chat:message".to_string()),
        Some(json!({"text": "hi"})),
        None,
    );
    node.deliver(other.encode().unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(order.lock().is_empty());
    node.shutdown();
}

#[tokio::test]
async fn test_late_response() {
    let (node, transport) = make_node(fast_config());
    let events = capture_events(&node);

    let request = node
        .request(
            "slow:remote",
            None,
            RequestOptions {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let _ = sent_json(&transport, 1).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), request.result())
        .await
        .expect("timeout should fire");
    assert!(outcome.unwrap_err().is(ErrorCode::RequestTimeout));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = Message::response_ok(request.id().to_string(), Some(json!({"too": "late"})));
    node.deliver(response.encode().unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let seen = events.lock();
    let late = seen
        .iter()
        .find_map(|event| match event {
            NodeEvent::LateResponse {
                response_delay_ms, ..
            } => Some(*response_delay_ms),
            _ => None,
        })
        .expect("a late-response event should fire");
    assert!(late >= 150, "delay {late}ms should reflect the 200ms gap");
    assert!(
        !seen
            .iter()
            .any(|event| matches!(event, NodeEvent::UnknownResponse { .. }))
    );
    drop(seen);

    // The terminated request kept its timeout outcome.
    assert!(request.result().await.unwrap_err().is(ErrorCode::RequestTimeout));
    node.shutdown();
}

#[tokio::test]
async fn test_queue_overflow_drop() {
    let transport = Arc::new(MemoryTransport::disconnected());
    let config = fast_config()
        .with_queue_max_size(2)
        .with_on_full(OnFull::Drop);
    let node = Node::new(transport, config);

    let r1 = node
        .request("a:one", None, RequestOptions::default())
        .await
        .unwrap();
    let r2 = node
        .request("a:two", None, RequestOptions::default())
        .await
        .unwrap();
    let r3 = node
        .request("a:three", None, RequestOptions::default())
        .await
        .unwrap();

    assert!(r1.is_pending());
    assert!(r2.is_pending());
    // The third was dropped by the full queue and cancelled.
    let outcome = tokio::time::timeout(Duration::from_secs(1), r3.result())
        .await
        .expect("dropped request should terminate");
    assert!(outcome.unwrap_err().is(ErrorCode::RequestCancelled));
    assert_eq!(node.stats().queue_size, 2);
    node.shutdown();
}

#[tokio::test]
async fn test_protocol_violation() {
    let (node, transport) = make_node(fast_config());
    let events = capture_events(&node);

    node.deliver(
        r#"{"protocol":"helios-starling","version":"1.0","timestamp":0,"type":"request"}"#,
    );

    let sent = sent_json(&transport, 1).await;
    let error = &sent[0];
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"]["severity"], json!("protocol"));
    assert_eq!(error["error"]["code"], json!("PROTOCOL_VIOLATION"));

    let violations = events
        .lock()
        .iter()
        .find_map(|event| match event {
            NodeEvent::ProtocolError { violations } => Some(violations.clone()),
            _ => None,
        })
        .expect("a protocol-error event should fire");
    assert!(violations.len() >= 3, "got {violations:?}");
    node.shutdown();
}

#[tokio::test]
async fn test_requests_resume_in_order_after_reconnect() {
    let transport = Arc::new(MemoryTransport::disconnected());
    let node = Node::new(transport.clone(), fast_config().with_max_concurrent(1));

    let mut requests = Vec::new();
    for name in ["seq:one", "seq:two", "seq:three"] {
        let request = node
            .request(
                name,
                None,
                RequestOptions {
                    no_response: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        requests.push(request);
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(transport.sent().is_empty());

    transport.set_connected(true);
    let sent = sent_json(&transport, 3).await;
    let methods: Vec<&str> = sent
        .iter()
        .map(|frame| frame["method"].as_str().unwrap())
        .collect();
    assert_eq!(methods, ["seq:one", "seq:two", "seq:three"]);
    for request in requests {
        assert!(request.result().await.is_ok());
    }
    node.shutdown();
}

#[tokio::test]
async fn test_node_shutdown_cancels_outstanding_requests() {
    let transport = Arc::new(MemoryTransport::disconnected());
    let node = Node::new(transport, fast_config());
    let request = node
        .request("a:b", None, RequestOptions::default())
        .await
        .unwrap();

    node.shutdown();
    let outcome = tokio::time::timeout(Duration::from_secs(1), request.result())
        .await
        .expect("shutdown should cancel the request");
    let error = outcome.unwrap_err();
    assert!(error.is(ErrorCode::RequestCancelled));
    assert!(error.message.contains("Manager disposed"));
}
