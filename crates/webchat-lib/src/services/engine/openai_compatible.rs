// OpenAI-Compatible Engine
// Feature: Browser Chat (001-chat-session)
//
// Runs the chat against a local OpenAI-compatible server (LM Studio, llama.cpp
// server, MLC serve). No API key required by default.
// Default endpoint: http://127.0.0.1:1234/v1

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;

use super::{DeltaStream, Engine, EngineError, EngineLoader, EngineResult, ProgressSink};
use crate::models::{Capability, CompletionChunk, CompletionRequest, ModelInfo, Progress};

/// Sentinel data line ending an OpenAI stream
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct OpenAIModelsResponse {
    data: Vec<OpenAIModel>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModel {
    id: String,
}

fn api_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

fn with_auth(builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) if !key.is_empty() => builder.bearer_auth(key),
        _ => builder,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Loader talking to an OpenAI-compatible server
pub struct OpenAICompatibleLoader {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAICompatibleLoader {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EngineLoader for OpenAICompatibleLoader {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn probe(&self) -> Capability {
        match reqwest::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                Capability::Supported { gpu_vendor: None }
            }
            Ok(url) => Capability::Unsupported {
                reason: format!("Unsupported endpoint scheme: {}", url.scheme()),
            },
            Err(e) => Capability::Unsupported {
                reason: format!("Invalid engine endpoint {}: {}", self.endpoint, e),
            },
        }
    }

    async fn load_model(&self, model: &str, progress: ProgressSink) -> EngineResult<Arc<dyn Engine>> {
        let start = Instant::now();
        progress(Progress::new(
            0.0,
            format!("Connecting to {}", self.endpoint),
            elapsed_ms(start),
        ));

        let models = self.list_models().await?;
        if !models.iter().any(|m| m.id == model) {
            return Err(EngineError::ModelNotFound(model.to_string()));
        }
        progress(Progress::new(
            0.5,
            format!("Found model {}", model),
            elapsed_ms(start),
        ));

        let engine = OpenAICompatibleEngine {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
        };
        progress(Progress::new(1.0, "Model ready", elapsed_ms(start)));

        Ok(Arc::new(engine))
    }

    async fn list_models(&self) -> EngineResult<Vec<ModelInfo>> {
        let url = api_url(&self.endpoint, "/models");

        let response = with_auth(self.client.get(&url), self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| {
                EngineError::ConnectionFailed(format!(
                    "Cannot connect to engine ({}): {}",
                    self.endpoint, e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ApiError(format!(
                "Engine API error ({}): {}",
                status, body
            )));
        }

        let models_response: OpenAIModelsResponse = response.json().await?;

        Ok(models_response
            .data
            .into_iter()
            .map(|m| ModelInfo {
                label: m.id.clone(),
                id: m.id,
            })
            .collect())
    }
}

/// Engine bound to an OpenAI-compatible server
pub struct OpenAICompatibleEngine {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

fn map_stream_error(err: reqwest_eventsource::Error) -> EngineError {
    match err {
        reqwest_eventsource::Error::Transport(e) => EngineError::from(e),
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => {
            EngineError::ApiError(format!("Engine API error ({})", status))
        }
        other => EngineError::ApiError(other.to_string()),
    }
}

#[async_trait]
impl Engine for OpenAICompatibleEngine {
    async fn stream_chat(&self, request: CompletionRequest) -> EngineResult<DeltaStream> {
        let url = api_url(&self.endpoint, "/chat/completions");
        log::debug!(
            "Engine request: model={} messages={}",
            request.model,
            request.messages.len()
        );

        let builder = with_auth(self.client.post(&url).json(&request), self.api_key.as_deref());
        let mut source =
            EventSource::new(builder).map_err(|e| EngineError::ApiError(e.to_string()))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == DONE_MARKER {
                            break;
                        }
                        match serde_json::from_str::<CompletionChunk>(&message.data) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(e) => {
                                yield Err(EngineError::from(e));
                                break;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(err) => {
                        yield Err(map_stream_error(err));
                        break;
                    }
                }
            }
            source.close();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationParameters, Message, Usage};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn sse_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
            body
        )
    }

    fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Read one request (head and body) and return its request line
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Serve `responses` to consecutive connections. Returns the endpoint and
    /// the request lines in arrival order.
    async fn serve(responses: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let _ = tx.send(read_request(&mut socket).await);
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/v1", addr), rx)
    }

    fn engine_at(endpoint: String) -> OpenAICompatibleEngine {
        OpenAICompatibleEngine {
            endpoint,
            api_key: None,
            client: Client::new(),
        }
    }

    fn request() -> CompletionRequest {
        let params = GenerationParameters {
            model: "tiny".to_string(),
            ..Default::default()
        };
        CompletionRequest::streaming(&[Message::user("hi")], &params)
    }

    #[tokio::test]
    async fn test_load_and_stream_until_done_marker() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        );
        let (endpoint, mut requests) = serve(vec![
            json_response("200 OK", r#"{"data":[{"id":"tiny"},{"id":"small"}]}"#),
            sse_response(body),
        ])
        .await;

        let fractions = Arc::new(Mutex::new(Vec::new()));
        let recorded = fractions.clone();
        let loader = OpenAICompatibleLoader::new(endpoint, None);
        let engine = loader
            .load_model(
                "tiny",
                Arc::new(move |progress: Progress| recorded.lock().unwrap().push(progress.fraction)),
            )
            .await
            .unwrap();
        assert_eq!(*fractions.lock().unwrap(), vec![0.0, 0.5, 1.0]);

        let chunks: Vec<_> = engine.stream_chat(request()).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 3);
        let chunks: Vec<CompletionChunk> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks[0].content(), Some("Hel"));
        assert_eq!(chunks[1].content(), Some("lo"));
        assert_eq!(chunks[2].content(), None);
        assert_eq!(
            chunks[2].usage,
            Some(Usage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            })
        );

        assert_eq!(requests.recv().await.unwrap(), "GET /v1/models HTTP/1.1");
        assert_eq!(
            requests.recv().await.unwrap(),
            "POST /v1/chat/completions HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_malformed_data_line_ends_stream() {
        let body = "data: {not json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n";
        let (endpoint, _requests) = serve(vec![sse_response(body)]).await;

        let items: Vec<_> = engine_at(endpoint)
            .stream_chat(request())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(EngineError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_error_status_becomes_api_error() {
        let response = "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\ncontent-length: 4\r\nconnection: close\r\n\r\nboom";
        let (endpoint, _requests) = serve(vec![response.to_string()]).await;

        let items: Vec<_> = engine_at(endpoint)
            .stream_chat(request())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(EngineError::ApiError(message)) => assert!(message.contains("500")),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_models() {
        let (endpoint, _requests) = serve(vec![json_response(
            "200 OK",
            r#"{"object":"list","data":[{"id":"tiny","object":"model"},{"id":"small","object":"model"}]}"#,
        )])
        .await;

        let models = OpenAICompatibleLoader::new(endpoint, None)
            .list_models()
            .await
            .unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["tiny", "small"]);
        assert_eq!(models[0].label, "tiny");
    }

    #[tokio::test]
    async fn test_load_rejects_unlisted_model() {
        let (endpoint, _requests) =
            serve(vec![json_response("200 OK", r#"{"data":[{"id":"small"}]}"#)]).await;

        let result = OpenAICompatibleLoader::new(endpoint, None)
            .load_model("tiny", Arc::new(|_: Progress| {}))
            .await;
        assert!(matches!(result, Err(EngineError::ModelNotFound(model)) if model == "tiny"));
    }

    #[tokio::test]
    async fn test_list_models_error_status() {
        let (endpoint, _requests) =
            serve(vec![json_response("503 Service Unavailable", r#"{"error":"warming up"}"#)]).await;

        let result = OpenAICompatibleLoader::new(endpoint, None).list_models().await;
        match result {
            Err(EngineError::ApiError(message)) => {
                assert!(message.contains("503"));
                assert!(message.contains("warming up"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        assert_eq!(
            api_url("http://127.0.0.1:1234/v1/", "/models"),
            "http://127.0.0.1:1234/v1/models"
        );
        assert_eq!(
            api_url("http://127.0.0.1:1234/v1", "/chat/completions"),
            "http://127.0.0.1:1234/v1/chat/completions"
        );
    }

    #[test]
    fn test_probe_accepts_http_endpoint() {
        let loader = OpenAICompatibleLoader::new("http://127.0.0.1:1234/v1", None);
        assert!(loader.probe().is_supported());
        assert_eq!(loader.name(), "openai-compatible");
    }

    #[test]
    fn test_probe_rejects_invalid_endpoint() {
        let loader = OpenAICompatibleLoader::new("not a url", None);
        assert!(matches!(loader.probe(), Capability::Unsupported { .. }));

        let loader = OpenAICompatibleLoader::new("ftp://models.local", None);
        match loader.probe() {
            Capability::Unsupported { reason } => assert!(reason.contains("ftp")),
            other => panic!("unexpected capability: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_fails_when_server_unreachable() {
        // Port 9 (discard) is never an OpenAI server
        let loader = OpenAICompatibleLoader::new("http://127.0.0.1:9/v1", None);
        let result = loader.load_model("tiny", Arc::new(|_: Progress| {})).await;
        assert!(matches!(
            result,
            Err(EngineError::ConnectionFailed(_)) | Err(EngineError::ApiError(_))
        ));
    }
}
