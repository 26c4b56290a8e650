//! Drives the whole pipeline: a WebSocket relay on one side, a mocked
//! Ollama-compatible backend on the other.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use semantic_bridge::{
    GenerationBackend, GenerationClient, ReconnectPolicy, RelayLink, RelayState, RequestQueue,
    RequestRouter, ResponseCache, StatsReporter, WebSocketConnector, build_router,
};

type RelaySocket = WebSocketStream<TcpStream>;

async fn start_relay() -> (String, mpsc::UnboundedReceiver<RelaySocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(socket) = accept_async(stream).await {
                let _ = tx.send(socket);
            }
        }
    });
    (format!("ws://{addr}"), rx)
}

async fn next_json(socket: &mut RelaySocket) -> Value {
    let read = async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(&text).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("relay socket ended: {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("no reply from bridge")
}

async fn send_json(socket: &mut RelaySocket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

async fn mock_backend() -> ServerGuard {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"prompt": "2+2?"})))
        .with_status(200)
        .with_body(r#"{"response":"4","prompt_eval_count":3,"eval_count":1}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/api/generate")
        .match_body(Matcher::PartialJson(json!({"prompt": "explode"})))
        .with_status(500)
        .with_body("out of memory")
        .create_async()
        .await;
    server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body(r#"{"models":[{"name":"mistral"}]}"#)
        .create_async()
        .await;
    server
}

struct Bridge {
    link: RelayLink,
    cache: Arc<ResponseCache>,
    queue: RequestQueue,
    backend: Arc<dyn GenerationBackend>,
}

async fn start_bridge(relay_url: &str, backend_url: &str) -> Bridge {
    let backend: Arc<dyn GenerationBackend> = Arc::new(GenerationClient::new(
        backend_url,
        "mistral",
        Duration::from_secs(5),
    ));
    let cache = Arc::new(ResponseCache::unbounded());
    let queue = RequestQueue::new();

    let (link, inbox) = RelayLink::new(ReconnectPolicy::Fixed(Duration::from_millis(50)));
    link.connect(WebSocketConnector::new(relay_url))
        .await
        .unwrap();

    let router = Arc::new(RequestRouter::new(
        backend.clone(),
        cache.clone(),
        queue.clone(),
        Arc::new(link.clone()),
    ));
    tokio::spawn(router.run(inbox));

    Bridge {
        link,
        cache,
        queue,
        backend,
    }
}

#[tokio::test]
async fn relay_requests_are_answered_and_cached() {
    let backend = mock_backend().await;
    let (relay_url, mut sockets) = start_relay().await;
    let bridge = start_bridge(&relay_url, &backend.url()).await;
    let mut relay = sockets.recv().await.unwrap();

    send_json(
        &mut relay,
        json!({"type": "semantic_request", "id": "msg-1", "prompt": "2+2?"}),
    )
    .await;
    let reply = next_json(&mut relay).await;
    assert_eq!(reply["type"], "semantic_response");
    assert_eq!(reply["id"], "msg-1");
    assert_eq!(reply["prompt"], "2+2?");
    assert_eq!(reply["model"], "mistral");
    assert_eq!(reply["response"], "4");
    assert_eq!(reply["tokens"], json!({"prompt": 3, "completion": 1, "total": 4}));
    assert!(reply["processingTime"].is_u64());
    assert!(reply["timestamp"].is_string());

    // No reply is produced for a payload without a type, so the next frame
    // the relay sees belongs to the failing request.
    send_json(&mut relay, json!({"id": "ghost", "prompt": "2+2?"})).await;
    send_json(
        &mut relay,
        json!({"type": "semantic_request", "id": "msg-2", "prompt": "explode"}),
    )
    .await;
    let reply = next_json(&mut relay).await;
    assert_eq!(reply["type"], "semantic_error");
    assert_eq!(reply["id"], "msg-2");
    assert!(reply["error"].as_str().unwrap().contains("500"));

    assert!(bridge.cache.get("msg-1").is_some());
    assert!(bridge.cache.get("msg-2").is_none());
    assert!(bridge.cache.get("ghost").is_none());
    assert_eq!(bridge.queue.received(), 2);
}

#[tokio::test]
async fn link_reconnects_after_relay_drops() {
    let backend = mock_backend().await;
    let (relay_url, mut sockets) = start_relay().await;
    let bridge = start_bridge(&relay_url, &backend.url()).await;

    let first = sockets.recv().await.unwrap();
    let mut state = bridge.link.subscribe();
    drop(first);

    let mut second = tokio::time::timeout(Duration::from_secs(5), sockets.recv())
        .await
        .expect("bridge did not reconnect")
        .unwrap();
    state
        .wait_for(|s| *s == RelayState::Connected)
        .await
        .unwrap();
    assert_eq!(bridge.link.attempts(), 2);

    send_json(
        &mut second,
        json!({"type": "semantic_request", "id": "after", "prompt": "2+2?"}),
    )
    .await;
    let reply = next_json(&mut second).await;
    assert_eq!(reply["id"], "after");
}

#[tokio::test]
async fn health_surface_exposes_cache_and_stats() {
    let backend = mock_backend().await;
    let (relay_url, mut sockets) = start_relay().await;
    let bridge = start_bridge(&relay_url, &backend.url()).await;
    let mut relay = sockets.recv().await.unwrap();

    send_json(
        &mut relay,
        json!({"type": "semantic_request", "id": "msg-1", "prompt": "2+2?"}),
    )
    .await;
    next_json(&mut relay).await;

    let stats = StatsReporter::new(
        bridge.cache.clone(),
        bridge.queue.clone(),
        Duration::from_secs(30),
    )
    .with_relay(bridge.link.clone());
    let app = build_router(bridge.cache.clone(), stats, bridge.backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let http = reqwest::Client::new();
    let base = format!("http://{addr}");

    let health = http.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "ok");

    let stats: Value = http
        .get(format!("{base}/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["cacheSize"], 1);
    assert_eq!(stats["queueLength"], 0);
    assert_eq!(stats["relayState"], "connected");

    let cached: Value = http
        .get(format!("{base}/responses/msg-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cached["response"], "4");

    let missing = http.get(format!("{base}/responses/nope")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    let models: Value = http
        .get(format!("{base}/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models, json!({"available": true, "models": ["mistral"]}));
}
