// End-to-end tests: Agent + HttpTransport against a mock broker.

use broker_agent::config::{BrokerConfig, PollConfig};
use broker_agent::subscription::handler;
use broker_agent::transport::{HttpTransport, TransportError};
use broker_agent::{Agent, AgentState, LoopOutcome};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn make_agent(server: &ServerGuard) -> Agent {
    let transport = HttpTransport::new(&BrokerConfig {
        url: server.url(),
        entity_id: "plugin-7".to_string(),
        api_key: "secret".to_string(),
        request_timeout_secs: 5,
    })
    .unwrap();

    Agent::from_broker(
        PollConfig {
            interval_ms: 10,
            stop_on_interrupt: false,
            ..PollConfig::default()
        },
        Arc::new(transport),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_cycle_over_http() {
    let mut server = Server::new_async().await;

    let connect = server
        .mock("POST", "/plugin/connect")
        .match_body(Matcher::Json(json!({"entity_id": "plugin-7", "api_key": "secret"})))
        .with_status(200)
        .with_body("OK")
        .create_async()
        .await;
    let subscribe = server
        .mock("POST", "/plugin/subscribe")
        .match_body(Matcher::Json(json!({"message_name": "grade_update"})))
        .with_status(200)
        .with_body("OK")
        .create_async()
        .await;
    let _subscriptions = server
        .mock("GET", "/plugin/subscription/list")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"subscriptions": ["grade_update"]}"#)
        .create_async()
        .await;
    let messages = server
        .mock("GET", "/plugin/message/list")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"messages": [{
                "message_id": "1",
                "sender_entity_id": "tutorA",
                "message_name": "grade_update",
                "message": {"score": 90}
            }]}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let transactions = server
        .mock("GET", "/plugin/transaction/list")
        .with_status(200)
        .with_body(r#"{"transactions": []}"#)
        .expect(1)
        .create_async()
        .await;
    let responses = server
        .mock("GET", "/response/list")
        .with_status(200)
        .with_body(r#"{"responses": []}"#)
        .expect(1)
        .create_async()
        .await;
    let disconnect = server
        .mock("POST", "/plugin/disconnect")
        .with_status(200)
        .with_body("OK")
        .create_async()
        .await;
    let reply = server
        .mock("POST", "/response")
        .match_body(Matcher::Json(json!({"message_id": "1", "payload": {"grade": "A"}})))
        .with_status(200)
        .with_body("OK")
        .create_async()
        .await;

    let agent = make_agent(&server);
    let stop = agent.stop_handle();
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    agent
        .subscribe([(
            "grade_update",
            handler(move |payload| {
                sink.lock().unwrap().push(Value::Object(payload));
                stop.stop();
                Ok(())
            }),
        )])
        .await
        .unwrap();

    let outcome = agent.start().await.unwrap();
    assert_eq!(outcome, LoopOutcome::Stopped);
    assert_eq!(agent.state(), AgentState::Stopped);

    assert_eq!(
        *received.lock().unwrap(),
        vec![json!({"score": 90, "message_id": "1", "sender_entity_id": "tutorA"})]
    );

    agent
        .send_response("1", json!({"grade": "A"}))
        .await
        .unwrap();

    connect.assert_async().await;
    subscribe.assert_async().await;
    messages.assert_async().await;
    transactions.assert_async().await;
    responses.assert_async().await;
    disconnect.assert_async().await;
    reply.assert_async().await;
}

#[tokio::test]
async fn test_authentication_failure_stops_start() {
    let mut server = Server::new_async().await;
    let _connect = server
        .mock("POST", "/plugin/connect")
        .with_status(401)
        .with_body("bad api key")
        .create_async()
        .await;
    let disconnect = server
        .mock("POST", "/plugin/disconnect")
        .expect(0)
        .create_async()
        .await;

    let agent = make_agent(&server);
    let err = agent.start().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::Authentication { .. })
    ));
    assert_eq!(agent.state(), AgentState::Stopped);
    disconnect.assert_async().await;
}

#[tokio::test]
async fn test_subscribe_rejected_by_broker() {
    let mut server = Server::new_async().await;
    let _subscribe = server
        .mock("POST", "/plugin/subscribe")
        .with_status(403)
        .with_body("not allowed")
        .create_async()
        .await;

    let agent = make_agent(&server);
    let err = agent
        .subscribe([("grade_update", handler(|_| Ok(())))])
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::Authorization { .. })
    ));
    assert!(!agent.subscriptions().is_subscribed("grade_update"));
}
