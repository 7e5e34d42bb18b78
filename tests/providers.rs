//! Provider clients against locally bound stub servers.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use docs_expert::config::{EmbeddingConfig, GenerationConfig};
use docs_expert::embedding::{EmbeddingClient, OpenAIEmbedder};
use docs_expert::error::{EmbeddingError, GenerationError};
use docs_expert::generation::{Generator, OllamaGenerator, OpenAIGenerator, Prompt};

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn prompt() -> Prompt {
    Prompt {
        system: "be brief".to_string(),
        user: "Question: hi".to_string(),
    }
}

fn generation_config(provider: &str, url: String) -> GenerationConfig {
    GenerationConfig {
        provider: provider.to_string(),
        model: Some("test-model".to_string()),
        url: Some(url),
        ..Default::default()
    }
}

async fn collect(generator: &dyn Generator) -> Vec<Result<String, GenerationError>> {
    generator.stream(&prompt()).await.unwrap().collect().await
}

fn sse_chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "delta": { "content": text } }] })
    )
}

#[tokio::test]
async fn test_openai_stream_until_done() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert_eq!(body["stream"], true);
            assert_eq!(body["messages"][0]["role"], "system");
            let payload = format!(
                ": keep-alive\n\n{}{}data: [DONE]\n\n{}",
                sse_chunk("Hello"),
                sse_chunk(", world"),
                sse_chunk("ignored")
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], payload)
        }),
    );
    let base = spawn(app).await;
    let generator = OpenAIGenerator::new(&generation_config("openai", base)).unwrap();

    let items = collect(&generator).await;
    let deltas: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(deltas, vec!["Hello", ", world"]);
}

/// Signals when the server drops the response body it was streaming.
struct BodyDropped(Option<oneshot::Sender<()>>);

impl Drop for BodyDropped {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

type DropSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

async fn endless_completion(State(slot): State<DropSlot>) -> impl IntoResponse {
    let guard = BodyDropped(slot.lock().unwrap().take());
    let ticks = futures::stream::unfold(guard, |guard| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, Infallible>(sse_chunk("tick")), guard))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ticks),
    )
}

#[tokio::test]
async fn test_dropping_stream_closes_upstream_response() {
    let (tx, rx) = oneshot::channel();
    let slot: DropSlot = Arc::new(Mutex::new(Some(tx)));
    let app = Router::new()
        .route("/v1/chat/completions", post(endless_completion))
        .with_state(slot);
    let base = spawn(app).await;
    let generator = OpenAIGenerator::new(&generation_config("openai", base)).unwrap();

    let mut deltas = generator.stream(&prompt()).await.unwrap();
    assert_eq!(deltas.next().await.unwrap().unwrap(), "tick");
    drop(deltas);

    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("server kept streaming after the client dropped the answer")
        .unwrap();
}

#[tokio::test]
async fn test_openai_truncated_stream_is_an_error() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                sse_chunk("Half an answ"),
            )
        }),
    );
    let base = spawn(app).await;
    let generator = OpenAIGenerator::new(&generation_config("openai", base)).unwrap();

    let items = collect(&generator).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Half an answ");
    assert!(matches!(items[1], Err(GenerationError::Stream(_))));
}

#[tokio::test]
async fn test_openai_error_status_fails_before_streaming() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
    );
    let base = spawn(app).await;
    let generator = OpenAIGenerator::new(&generation_config("openai", base)).unwrap();

    let err = match generator.stream(&prompt()).await {
        Ok(_) => panic!("expected request error"),
        Err(e) => e,
    };
    assert!(matches!(err, GenerationError::Request(_)));
}

#[tokio::test]
async fn test_ollama_ndjson_stream() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            concat!(
                r#"{"message":{"role":"assistant","content":"Local "},"done":false}"#,
                "\n",
                r#"{"message":{"role":"assistant","content":"answer"},"done":false}"#,
                "\n",
                r#"{"message":{"role":"assistant","content":""},"done":true}"#,
                "\n"
            )
        }),
    );
    let base = spawn(app).await;
    let generator = OllamaGenerator::new(&generation_config("ollama", base)).unwrap();

    let deltas: Vec<String> = collect(&generator)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(deltas.concat(), "Local answer");
}

#[derive(Clone, Default)]
struct EmbedStub {
    calls: Arc<AtomicUsize>,
    failures: usize,
    status: u16,
}

async fn embed_handler(
    State(stub): State<EmbedStub>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let n = stub.calls.fetch_add(1, Ordering::SeqCst);
    if n < stub.failures {
        let status = StatusCode::from_u16(stub.status).unwrap();
        return (status, Json(serde_json::json!({ "error": "try later" })));
    }
    let inputs = body["input"].as_array().unwrap();
    // Reverse order to check that results are re-sorted by index.
    let data: Vec<serde_json::Value> = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(i, _)| serde_json::json!({ "index": i, "embedding": [i as f32, 1.0, 0.0] }))
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "data": data })))
}

async fn embedding_client(stub: EmbedStub) -> EmbeddingClient {
    let app = Router::new()
        .route("/v1/embeddings", post(embed_handler))
        .with_state(stub);
    let base = spawn(app).await;
    let config = EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("test-embed".to_string()),
        dims: Some(3),
        url: Some(base),
        backoff_base_ms: 1,
        max_retries: 3,
        ..Default::default()
    };
    let embedder = Arc::new(OpenAIEmbedder::new(&config).unwrap());
    EmbeddingClient::new(embedder, &config)
}

#[tokio::test]
async fn test_embeddings_retry_rate_limits() {
    let stub = EmbedStub {
        failures: 2,
        status: 429,
        ..Default::default()
    };
    let calls = stub.calls.clone();
    let client = embedding_client(stub).await;

    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = client.embed_batch(&texts).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(vectors, vec![vec![0.0, 1.0, 0.0], vec![1.0, 1.0, 0.0]]);
}

#[tokio::test]
async fn test_embeddings_client_errors_are_not_retried() {
    let stub = EmbedStub {
        failures: 10,
        status: 400,
        ..Default::default()
    };
    let calls = stub.calls.clone();
    let client = embedding_client(stub).await;

    let err = client.embed_query("text").await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Permanent(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
