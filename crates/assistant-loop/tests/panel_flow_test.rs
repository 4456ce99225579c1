//! Panel commands driven end to end against a mocked completions endpoint.

use std::sync::Arc;

use assistant_core::{AssistantError, BridgeEvent, ConversationId, Role, TokenAccountant};
use assistant_llm::{OpenAIProvider, ProviderDefaults};
use assistant_loop::bridge::drain;
use assistant_loop::{
    Bridge, ChannelBridge, Dispatcher, NoopEditor, Orchestrator, OrchestratorConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(provider: OpenAIProvider) -> (Dispatcher, UnboundedReceiver<BridgeEvent>) {
    let (bridge, mut rx) = ChannelBridge::new();
    let bridge: Arc<dyn Bridge> = Arc::new(bridge);
    let config = OrchestratorConfig {
        system_context: "You are a careful reviewer.".to_string(),
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(Arc::new(provider), bridge.clone(), config);
    let dispatcher = Dispatcher::new(
        orchestrator,
        Arc::new(NoopEditor),
        TokenAccountant::default(),
        bridge,
    );
    drain(&mut rx);
    (dispatcher, rx)
}

fn send(message: &str) -> String {
    serde_json::json!({
        "type": "sendMessage",
        "conversation_id": 1,
        "chat_id": "new",
        "message": message,
    })
    .to_string()
}

#[tokio::test]
async fn test_streamed_answer_reaches_panel() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, mut rx) =
        dispatcher(OpenAIProvider::new("sk-test").with_base_url(server.uri()));
    dispatcher.handle_raw(&send("Say hello")).await.unwrap();

    let events = drain(&mut rx);
    let last_answer = events
        .iter()
        .rev()
        .find_map(|e| match e {
            BridgeEvent::AddChatMessage {
                role: Role::Assistant,
                content,
                ..
            } => Some(content.clone()),
            _ => None,
        })
        .expect("assistant message");
    assert_eq!(last_answer, "Hello world");
    assert_eq!(
        events.last(),
        Some(&BridgeEvent::ShowInProgress {
            conversation_id: ConversationId::new(1),
            in_progress: false,
        })
    );

    let conversation = dispatcher
        .orchestrator()
        .snapshot(ConversationId::new(1))
        .unwrap();
    assert_eq!(conversation.messages.len(), 3);
    assert!(conversation.messages[2].done);
}

#[tokio::test]
async fn test_backend_error_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, mut rx) =
        dispatcher(OpenAIProvider::new("sk-test").with_base_url(server.uri()));
    dispatcher.handle_raw(&send("Hi")).await.unwrap();

    let errors: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::AddError { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("429 Too Many Requests"));

    let conversation = dispatcher
        .orchestrator()
        .snapshot(ConversationId::new(1))
        .unwrap();
    assert!(conversation
        .messages
        .iter()
        .all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn test_over_budget_request_never_leaves_the_process() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new("sk-test")
        .with_base_url(server.uri())
        .with_defaults(ProviderDefaults {
            max_tokens: 5,
            ..Default::default()
        });
    let (dispatcher, mut rx) = dispatcher(provider);
    dispatcher
        .handle_raw(&send("Explain the borrow checker in great detail"))
        .await
        .unwrap();

    let errors: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::AddError { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("max_tokens"));
}

#[tokio::test]
async fn test_unknown_conversation_export_fails() {
    let (dispatcher, _rx) = dispatcher(OpenAIProvider::new("sk-test"));
    let err = dispatcher
        .handle_raw(r#"{"type":"exportToMarkdown","conversationId":7}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, AssistantError::ConversationNotFound(_)));
}
