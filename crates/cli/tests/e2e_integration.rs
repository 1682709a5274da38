//! End-to-end tests for the assembled service.
//!
//! Everything is built from an `AppConfig` the way `chatloom serve` does it:
//! the OpenAI-compatible provider points at a mock server, the store is a
//! sqlite file in a temp dir, and requests go through the HTTP router.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatloom_config::{AppConfig, ProviderConfig};
use chatloom_engine::{StreamEvent, apply, parse_frames};
use chatloom_gateway::{GatewayState, build_orchestrator, build_router};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

fn text_reply(fragments: &[&str]) -> ResponseTemplate {
    let mut events: Vec<String> = fragments
        .iter()
        .map(|f| serde_json::json!({"choices": [{"delta": {"content": f}}]}).to_string())
        .collect();
    events.push("[DONE]".into());
    let events: Vec<&str> = events.iter().map(String::as_str).collect();
    ResponseTemplate::new(200).set_body_raw(sse(&events), "text/event-stream")
}

fn config_for(server: &MockServer, dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.default_provider = "openai".into();
    config.providers.insert(
        "openai".into(),
        ProviderConfig {
            api_key: Some("sk-e2e".into()),
            api_url: Some(server.uri()),
            default_model: Some("gpt-test".into()),
        },
    );
    config.store.backend = "sqlite".into();
    config.store.path = Some(dir.path().join("data").join("chat.db"));
    config
}

async fn app(config: &AppConfig) -> Router {
    let orchestrator = build_orchestrator(config).await.unwrap();
    let state = Arc::new(GatewayState {
        orchestrator: Arc::new(orchestrator),
    });
    build_router(state, config.gateway.body_limit_bytes)
}

async fn post_message(app: &Router, conversation: &str, message: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/conversations/{conversation}/messages"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "message": message }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> serde_json::Value {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn replay(body: &str) -> serde_json::Value {
    let mut doc = serde_json::Value::Null;
    for event in parse_frames(body) {
        if let StreamEvent::Delta(payload) = event {
            apply(&mut doc, &payload).unwrap();
        }
    }
    doc
}

#[tokio::test]
async fn calculator_turn_streams_and_persists() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("tool_call_id"))
        .respond_with(text_reply(&["It is ", "42."]))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"calculator\""))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calculator","arguments":"{\"expression\":\"6 * 7\"}"}}]},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, &dir);
    let app = app(&config).await;

    let (status, body) = post_message(&app, "math", "what is 6 times 7?").await;
    assert_eq!(status, StatusCode::OK);

    let doc = replay(&body);
    assert_eq!(doc["message"]["content"]["parts"][0], "It is 42.");
    assert_eq!(doc["message"]["status"], "finished_successfully");
    let calls = doc["message"]["metadata"]["tool_calls"].as_array().unwrap();
    let completed = calls.iter().find(|c| c["status"] == "completed").unwrap();
    assert_eq!(completed["result"], "42");

    let events = parse_frames(&body);
    assert!(matches!(events.last(), Some(StreamEvent::Completion(_))));

    let history = get_json(&app, "/v1/conversations/math/messages").await;
    let roles: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(history["messages"][1]["id"], doc["message"]["id"]);
    assert!(dir.path().join("data").join("chat.db").exists());
}

#[tokio::test]
async fn second_turn_carries_history_across_restart() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("remember me"))
        .and(body_string_contains("noted"))
        .respond_with(text_reply(&["You said remember me."]))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(text_reply(&["noted"]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, &dir);

    let first = app(&config).await;
    let (_, body) = post_message(&first, "c1", "remember me").await;
    assert_eq!(replay(&body)["message"]["content"]["parts"][0], "noted");
    drop(first);

    // A fresh app over the same database file.
    let second = app(&config).await;
    let (_, body) = post_message(&second, "c1", "what did I say?").await;
    assert_eq!(
        replay(&body)["message"]["content"]["parts"][0],
        "You said remember me."
    );

    let history = get_json(&second, "/v1/conversations/c1/messages").await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn upstream_failure_is_an_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, &dir);
    let app = app(&config).await;

    let (status, body) = post_message(&app, "c2", "hello").await;
    // Headers were committed by the first frame; the failure rides the stream.
    assert_eq!(status, StatusCode::OK);

    let events = parse_frames(&body);
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Error(err) => Some(err.error_type.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec!["generation_error"]);
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Completion(_))));

    let history = get_json(&app, "/v1/conversations/c2/messages").await;
    assert!(history["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn tool_catalog_and_health() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, &dir);
    let app = app(&config).await;

    let health = get_json(&app, "/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["provider"], "openai");

    let tools = get_json(&app, "/v1/tools").await;
    assert_eq!(tools["count"], 3);
}
