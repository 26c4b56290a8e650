use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;
use tokio::net::TcpListener;

use semantic_bridge::{
    BackendError, GenerationBackend, GenerationClient,
    model::{ChatMessage, ChatRole, GenerationRequest, SamplingParams},
};

fn request(id: &str, prompt: &str) -> GenerationRequest {
    GenerationRequest::new(Some(id.into()), prompt, None, SamplingParams::default())
}

#[tokio::test]
async fn generate_applies_defaults_and_maps_token_counts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "mistral",
            "prompt": "2+2?",
            "temperature": 0.7,
            "top_k": 40,
            "top_p": 0.9,
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"response":"4","prompt_eval_count":3,"eval_count":1,"done":true}"#)
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    let response = client.generate(&request("msg-1", "2+2?")).await.unwrap();
    mock.assert_async().await;

    assert_eq!(response.id, "msg-1");
    assert_eq!(response.prompt, "2+2?");
    assert_eq!(response.model, "mistral");
    assert_eq!(response.response, "4");
    assert_eq!(response.tokens.prompt(), 3);
    assert_eq!(response.tokens.completion(), 1);
    assert_eq!(response.tokens.total(), 4);
}

#[tokio::test]
async fn generate_forwards_request_model_and_sampling_verbatim() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({
            "model": "llama3",
            "temperature": 1.3,
            "top_k": 7,
            "top_p": 0.25
        })))
        .with_status(200)
        .with_body(r#"{"response":"ok"}"#)
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    let request = GenerationRequest::new(
        Some("hot".into()),
        "anything",
        Some("llama3".into()),
        SamplingParams {
            temperature: Some(1.3),
            top_k: Some(7),
            top_p: Some(0.25),
        },
    );
    let response = client.generate(&request).await.unwrap();
    mock.assert_async().await;

    assert_eq!(response.model, "llama3");
    // Missing counts default to zero.
    assert_eq!(response.tokens.total(), 0);
}

#[tokio::test]
async fn error_status_is_a_backend_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(500)
        .with_body("model not loaded")
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    let err = client.generate(&request("e", "x")).await.unwrap_err();
    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "model not loaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .with_status(200)
        .with_body("<html>proxy error</html>")
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    let err = client.generate(&request("d", "x")).await.unwrap_err();
    assert!(matches!(err, BackendError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn silent_backend_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeout = Duration::from_millis(200);
    let client = GenerationClient::new(format!("http://{addr}"), "mistral", timeout);
    let err = client.generate(&request("msg-2", "slow")).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout(d) if d == timeout), "{err:?}");
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn closed_port_is_unreachable_and_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GenerationClient::new(format!("http://{addr}"), "mistral", Duration::from_secs(2));
    assert!(!client.is_available().await);
    assert!(client.list_models().await.is_empty());
    let err = client.generate(&request("u", "x")).await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)), "{err:?}");
}

#[tokio::test]
async fn list_models_reads_tags() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(r#"{"models":[{"name":"mistral:latest","size":1},{"name":"llama3:8b"}]}"#)
        .expect(2)
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    assert!(client.is_available().await);
    assert_eq!(client.list_models().await, vec!["mistral:latest", "llama3:8b"]);
}

#[tokio::test]
async fn failing_tags_endpoint_degrades_quietly() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/tags")
        .with_status(503)
        .create_async()
        .await;

    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    assert!(!client.is_available().await);
    assert!(client.list_models().await.is_empty());
}

#[tokio::test]
async fn chat_sends_history_and_reads_message_content() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/chat")
        .match_body(Matcher::PartialJson(json!({
            "model": "mistral",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "capital of France?"}
            ],
            "temperature": 0.7,
            "stream": false
        })))
        .with_status(200)
        .with_body(
            r#"{"message":{"role":"assistant","content":"Paris"},"prompt_eval_count":9,"eval_count":2}"#,
        )
        .create_async()
        .await;

    let history = vec![
        ChatMessage {
            role: ChatRole::System,
            content: "be terse".into(),
        },
        ChatMessage {
            role: ChatRole::User,
            content: "capital of France?".into(),
        },
    ];
    let client = GenerationClient::new(server.url(), "mistral", Duration::from_secs(5));
    let response = client
        .chat(&history, &request("c-1", "capital of France?"))
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(response.id, "c-1");
    assert_eq!(response.response, "Paris");
    assert_eq!(response.tokens.total(), 11);
}
