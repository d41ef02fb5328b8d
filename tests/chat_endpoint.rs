// Chat endpoint round trips against a mocked OpenAI-compatible server.

use std::sync::Arc;

use anyhow::Result;
use codeai_rs::error::SessionError;
use codeai_rs::llm::openai_client::OpenAIClient;
use codeai_rs::session::{Message, Role};
use codeai_rs::streaming::{spawn_turn, SessionEvent, StreamingSession};
use codeai_rs::tools::ToolRegistry;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(payloads: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for p in payloads {
        body.push_str(&format!("data: {}\n\n", p));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_delta(text: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
}

fn finish(reason: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
}

fn sse_response(payloads: &[serde_json::Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse_body(payloads))
}

fn session_for(server: &MockServer) -> StreamingSession {
    let client = OpenAIClient::new(Some("test-key".to_string()), &format!("{}/v1", server.uri()), "gpt-test");
    StreamingSession::new(
        Arc::new(client),
        Arc::new(ToolRegistry::with_builtin_tools(Duration::from_secs(5))),
        "You are a test assistant.",
        3,
    )
}

async fn collect(mut rx: UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn streamed_text_becomes_one_assistant_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(sse_response(&[text_delta("Hello"), text_delta(", world"), finish("stop")]))
        .expect(1)
        .mount(&server)
        .await;

    let history = vec![Message::user("say hello")];
    let (handle, rx) = spawn_turn(session_for(&server), history);
    let events = collect(rx).await;
    let message = handle.join().await.expect("turn should complete");

    assert_eq!(message.role(), Role::Assistant);
    assert_eq!(message.content(), "Hello, world");
    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::TextDelta(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hello", ", world"]);
    assert!(matches!(events.last(), Some(SessionEvent::Done(_))));
    Ok(())
}

#[tokio::test]
async fn tool_call_result_is_fed_back_to_the_endpoint() -> Result<()> {
    let server = MockServer::start().await;

    // second request: carries the tool output
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"tool_call_id\":\"call_1\""))
        .respond_with(sse_response(&[text_delta("The code looks fine."), finish("stop")]))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    // first request: the model asks for analyzeCode, arguments split across chunks
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "analyzeCode", "arguments": "{\"code\":\"let x = 1;\","}}]}, "finish_reason": null}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"language\":\"rust\"}"}}]}, "finish_reason": null}]}),
            finish("tool_calls"),
        ]))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let (handle, rx) = spawn_turn(session_for(&server), vec![Message::user("analyze this")]);
    let events = collect(rx).await;
    let message = handle.join().await.expect("turn should complete");
    assert_eq!(message.content(), "The code looks fine.");

    let call = events.iter().find_map(|e| match e {
        SessionEvent::ToolCallRequested(c) => Some(c),
        _ => None,
    });
    let call = call.expect("tool call event");
    assert_eq!(call.name, "analyzeCode");
    assert_eq!(call.arguments["language"], "rust");

    let result = events.iter().find_map(|e| match e {
        SessionEvent::ToolResult(r) => Some(r),
        _ => None,
    });
    let result = result.expect("tool result event");
    assert_eq!(result.call_id, "call_1");
    assert!(result.data["analysis"].as_str().unwrap_or_default().contains("rust"));
    Ok(())
}

#[tokio::test]
async fn invalid_tool_arguments_fail_the_turn() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_x", "function": {"name": "analyzeCode", "arguments": "{\"code\": 42}"}}]}, "finish_reason": null}]}),
            finish("tool_calls"),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let (handle, rx) = spawn_turn(session_for(&server), vec![Message::user("analyze")]);
    let events = collect(rx).await;
    assert!(handle.join().await.is_none());
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::ToolResult(_))));
    assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::Tool(_)))));
    Ok(())
}

#[tokio::test]
async fn error_status_fails_without_a_message() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let (handle, rx) = spawn_turn(session_for(&server), vec![Message::user("hi")]);
    let events = collect(rx).await;
    assert!(handle.join().await.is_none());
    assert_eq!(events.len(), 1);
    match &events[0] {
        SessionEvent::Failed(SessionError::Status { status, body, .. }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("unexpected event {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn garbage_payload_is_a_protocol_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("data: {\"choices\": [{\"delta\": {\"content\": \"ok\"}}]}\n\ndata: not-json\n\n"),
        )
        .mount(&server)
        .await;

    let (handle, rx) = spawn_turn(session_for(&server), vec![Message::user("hi")]);
    let events = collect(rx).await;
    assert!(handle.join().await.is_none());
    assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::Protocol { .. }))));
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() -> Result<()> {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let client = OpenAIClient::new(None, &uri, "gpt-test");
    let session = StreamingSession::new(
        Arc::new(client),
        Arc::new(ToolRegistry::with_builtin_tools(Duration::from_secs(5))),
        "",
        3,
    );
    let (handle, rx) = spawn_turn(session, vec![Message::user("hi")]);
    let events = collect(rx).await;
    assert!(handle.join().await.is_none());
    assert!(matches!(events.last(), Some(SessionEvent::Failed(SessionError::Transport { .. }))));
    Ok(())
}
