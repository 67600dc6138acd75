use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    response::sse::{Event, Sse},
    routing::post,
};
use chatrelay_agents::{
    ChatEvent, ChatMessage, ChatRole, ChatRuntime, ChatSettings, LlmProvider, LlmRequest,
    OpenAiProvider, StreamEvent,
};
use chatrelay_common::{ConversationId, Error, Turn, TurnRole};
use chatrelay_db::{InMemoryTurnStore, TurnStore};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chunk(content: Option<&str>, finish_reason: Option<&str>) -> String {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion.chunk",
        "model": "gpt-4.1-mini",
        "choices": [{
            "index": 0,
            "delta": content.map(|c| json!({"content": c})).unwrap_or_else(|| json!({})),
            "finish_reason": finish_reason,
        }]
    })
    .to_string()
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&format!("data: {}\n\n", chunk(Some(delta), None)));
    }
    body.push_str(&format!("data: {}\n\n", chunk(None, Some("stop"))));
    body.push_str("data: [DONE]\n\n");
    body
}

fn hello_request() -> LlmRequest {
    LlmRequest {
        model: "gpt-test".to_string(),
        messages: vec![ChatMessage {
            role: ChatRole::User,
            content: "Hello".to_string(),
        }],
        system: None,
        max_tokens: Some(100),
        temperature: None,
    }
}

#[tokio::test]
async fn streams_text_from_sse_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let app = Router::new().route("/v1/chat/completions", post(mock_stream_handler));
        axum::serve(listener, app).await.unwrap();
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    let provider = OpenAiProvider::new(
        "test-key",
        None,
        Some(format!("http://127.0.0.1:{}", port)),
    );

    let events: Vec<StreamEvent> = provider
        .stream_complete(&hello_request())
        .await
        .expect("stream should start")
        .map(|e| e.expect("event should parse"))
        .collect()
        .await;

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Hello from mock");
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::MessageDelta { stop_reason: Some(r), .. } if r == "end_turn"
    )));
    assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
}

async fn mock_stream_handler(
    Json(payload): Json<Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Basic validation
    assert_eq!(payload["model"], "gpt-test");
    assert_eq!(payload["stream"], true);
    assert_eq!(payload["messages"][0]["role"], "user");
    assert_eq!(payload["messages"][0]["content"], "Hello");

    let mut frames: Vec<String> = ["Hello", " from", " mock"]
        .iter()
        .map(|d| chunk(Some(d), None))
        .collect();
    frames.push(chunk(None, Some("stop")));
    frames.push("[DONE]".to_string());

    Sse::new(stream::iter(
        frames
            .into_iter()
            .map(|data| Ok(Event::default().data(data))),
    ))
}

#[tokio::test]
async fn error_status_fails_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", None, Some(server.uri()));
    let err = provider.stream_complete(&hello_request()).await.err();

    match err {
        Some(Error::Agent(msg)) => {
            assert!(msg.contains("429"), "unexpected message: {msg}");
            assert!(msg.contains("rate limited"));
        }
        other => panic!("expected agent error, got {other:?}"),
    }
}

#[tokio::test]
async fn runtime_persists_reply_streamed_by_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hi", " there"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTurnStore::new());
    let mut runtime = ChatRuntime::new(store.clone(), ChatSettings::default());
    runtime.register_provider(Box::new(OpenAiProvider::new(
        "test-key",
        None,
        Some(server.uri()),
    )));
    assert_eq!(runtime.effective_model(), Some("gpt-4.1-mini"));

    let conversation = ConversationId::from_str("c1");
    let stream = runtime
        .handle_turn(
            conversation.clone(),
            Turn::text(TurnRole::User, "hi").with_id("u1"),
        )
        .await
        .expect("exchange should start");
    let message_id = stream.message_id().to_string();
    let events: Vec<ChatEvent> = stream.collect().await;

    assert!(matches!(events.last(), Some(ChatEvent::Finish { .. })));

    let turns = store.load(&conversation).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].id, message_id);
    assert_eq!(turns[1].text_content(), "Hi there");

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4.1-mini");
    assert_eq!(body["messages"][0]["content"], "hi");
}
