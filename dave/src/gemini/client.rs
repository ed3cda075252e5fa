//! Gemini REST client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::circuit_breaker::CircuitBreaker;
use super::{ChatTurn, CircuitStatus, EmbeddingTask, LanguageModel, LlmError, Role, TextStream};
use crate::config::GeminiConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<Role>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<Role>, text: &str) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.to_string() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    fn new(prompt: &str, system_instruction: Option<&str>, history: &[ChatTurn]) -> Self {
        let mut contents: Vec<Content> = history.iter().map(|turn| Content::text(Some(turn.role), &turn.text)).collect();
        contents.push(Content::text(Some(Role::User), prompt));

        Self {
            contents,
            system_instruction: system_instruction.filter(|s| !s.is_empty()).map(|s| Content::text(None, s)),
            generation_config: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    model: String,
    content: Content,
    task_type: EmbeddingTask,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Embedding,
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Extract the text carried by one SSE line, if it is a `data:` line with content.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.trim().strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(response) => Some(response.text()).filter(|text| !text.is_empty()),
        Err(e) => {
            warn!("Skipping unparseable stream event: {}", e);
            None
        }
    }
}

pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    request_timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl GeminiClient {
    /// Streams are only bounded by the read timeout, so a long answer is not cut off while
    /// chunks keep arriving. One-shot calls also carry `request_timeout` as a total limit.
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout))
            .read_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&config.base_url),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            request_timeout: config.request_timeout,
            breaker: Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> Result<Url, LlmError> {
        self.base_url
            .join(&format!("v1beta/models/{model}:{method}"))
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to construct Gemini URL: {e}")))
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key.as_deref().ok_or(LlmError::NotConfigured)
    }

    /// Send a request and turn non-2xx answers into [`LlmError::Api`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }
        Ok(response)
    }

    async fn generate_inner(&self, body: &GenerateContentRequest) -> Result<String, LlmError> {
        let url = self.endpoint(&self.model, "generateContent")?;
        let response = self
            .send(
                self.client
                    .post(url)
                    .timeout(self.request_timeout)
                    .header(API_KEY_HEADER, self.api_key()?)
                    .json(body),
            )
            .await?;
        let parsed: GenerateContentResponse = response.json().await?;
        Ok(parsed.text())
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str, system_instruction: Option<&str>, history: &[ChatTurn]) -> Result<String, LlmError> {
        self.api_key()?;
        if !self.breaker.allow_request() {
            return Err(LlmError::CircuitOpen);
        }

        let body = GenerateContentRequest::new(prompt, system_instruction, history);
        match self.generate_inner(&body).await {
            Ok(text) => {
                self.breaker.record_success();
                Ok(text)
            }
            Err(e) => {
                self.breaker.record_failure();
                error!("Gemini generation error: {}", e);
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate_stream(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
        history: &[ChatTurn],
    ) -> Result<TextStream, LlmError> {
        let api_key = self.api_key()?;
        if !self.breaker.allow_request() {
            return Err(LlmError::CircuitOpen);
        }

        let mut url = self.endpoint(&self.model, "streamGenerateContent")?;
        url.set_query(Some("alt=sse"));
        let body = GenerateContentRequest::new(prompt, system_instruction, history);

        let response = match self.send(self.client.post(url).header(API_KEY_HEADER, api_key).json(&body)).await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure();
                error!("Gemini streaming error: {}", e);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let breaker = self.breaker.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut received = false;

            loop {
                let chunk = match bytes.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        breaker.record_failure();
                        error!("Gemini streaming error: {}", e);
                        let _ = tx.send(Err(LlmError::Request(e))).await;
                        return;
                    }
                    None => break,
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(text) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                        received = true;
                        if tx.send(Ok(text)).await.is_err() {
                            debug!("Stream consumer went away");
                            breaker.record_success();
                            return;
                        }
                    }
                }
            }

            if let Some(text) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                received = true;
                let _ = tx.send(Ok(text)).await;
            }

            if received {
                breaker.record_success();
            } else {
                breaker.release_trial();
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    #[instrument(skip_all, fields(model = %self.embedding_model))]
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>, LlmError> {
        let api_key = self.api_key()?;
        let url = self.endpoint(&self.embedding_model, "embedContent")?;
        let body = EmbedContentRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content::text(None, text),
            task_type: task,
        };

        let response = self
            .send(
                self.client
                    .post(url)
                    .timeout(self.request_timeout)
                    .header(API_KEY_HEADER, api_key)
                    .json(&body),
            )
            .await
            .inspect_err(|e| error!("Gemini embedding error: {}", e))?;
        let parsed: EmbedContentResponse = response.json().await?;
        Ok(parsed.embedding.values)
    }

    fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GeminiConfig {
        GeminiConfig {
            api_key: Some("test-key".to_string()),
            base_url: Url::parse(&server.uri()).unwrap(),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(60),
            },
            ..GeminiConfig::default()
        }
    }

    fn gemini_client(config: &GeminiConfig) -> GeminiClient {
        crate::test_utils::install_crypto_provider();
        GeminiClient::new(config).unwrap()
    }

    fn text_response(text: &str) -> serde_json::Value {
        json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn test_ensure_slash() {
        let url = Url::parse("http://localhost:8080/proxy").unwrap();
        assert_eq!(ensure_slash(&url).as_str(), "http://localhost:8080/proxy/");
        let url = Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(ensure_slash(&url).as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_request_shape() {
        let body = GenerateContentRequest::new("hello", Some("be nice"), &[ChatTurn::user("hi"), ChatTurn::model("hey")]);
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["contents"].as_array().unwrap().len(), 3);
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"][2]["parts"][0]["text"], "hello");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be nice");
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_parse_sse_line() {
        let line = format!("data: {}", text_response("chunk"));
        assert_eq!(parse_sse_line(&line).as_deref(), Some("chunk"));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: not json"), None);
        assert_eq!(parse_sse_line(&format!("data:{}", text_response(""))), None);
    }

    #[tokio::test]
    async fn test_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({ "systemInstruction": { "parts": [{ "text": "system" }] } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("Hello there")))
            .expect(1)
            .mount(&server)
            .await;

        let client = gemini_client(&config(&server));
        let text = client.generate("hi", Some("system"), &[]).await.unwrap();
        assert_eq!(text, "Hello there");
        assert!(!client.circuit_status().open);
    }

    #[tokio::test]
    async fn test_failures_open_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(2)
            .mount(&server)
            .await;

        let client = gemini_client(&config(&server));
        for _ in 0..2 {
            assert!(matches!(client.generate("hi", None, &[]).await, Err(LlmError::Api { status: 500, .. })));
        }

        // Third call never reaches the server
        assert!(matches!(client.generate("hi", None, &[]).await, Err(LlmError::CircuitOpen)));
        let status = client.circuit_status();
        assert!(status.open);
        assert_eq!(status.failures, 2);
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let server = MockServer::start().await;
        let sse = format!(
            "data: {}\r\n\r\ndata: {}\r\n\r\n",
            text_response("Hello"),
            text_response(" world")
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let client = gemini_client(&config(&server));
        let stream = client.generate_stream("hi", None, &[]).await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn test_one_shot_calls_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = gemini_client(&GeminiConfig {
            request_timeout: Duration::from_millis(200),
            ..config(&server)
        });
        match client.generate("hi", None, &[]).await {
            Err(LlmError::Request(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    /// Serves one SSE response whose chunks are spaced `gap` apart over a plain socket.
    async fn slow_sse_server(chunks: Vec<String>, gap: Duration) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the request so closing the socket does not reset the connection
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for chunk in chunks {
                socket.write_all(format!("data: {chunk}\r\n\r\n").as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(gap).await;
            }
        });

        Url::parse(&format!("http://{addr}")).unwrap()
    }

    #[tokio::test]
    async fn test_stream_outlives_request_timeout() {
        let chunks = ["Keep", " going", " strong"].map(|t| text_response(t).to_string()).to_vec();
        let base_url = slow_sse_server(chunks, Duration::from_millis(400)).await;

        // Three gaps of 400ms exceed the timeout in total, but no single gap does
        let client = gemini_client(&GeminiConfig {
            api_key: Some("test-key".to_string()),
            base_url,
            request_timeout: Duration::from_millis(800),
            ..GeminiConfig::default()
        });

        let stream = client.generate_stream("hi", None, &[]).await.unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), "Keep going strong");
    }

    #[tokio::test]
    async fn test_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-embedding-004:embedContent"))
            .and(body_partial_json(json!({ "taskType": "RETRIEVAL_QUERY" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": { "values": [0.1, 0.2, 0.3] } })))
            .mount(&server)
            .await;

        let client = gemini_client(&config(&server));
        let values = client.embed("query", EmbeddingTask::RetrievalQuery).await.unwrap();
        assert_eq!(values, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let client = gemini_client(&GeminiConfig::default());
        assert!(!client.is_configured());
        assert!(matches!(client.generate("hi", None, &[]).await, Err(LlmError::NotConfigured)));
    }
}
