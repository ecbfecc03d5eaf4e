//! Anthropic Messages API client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::config::ProviderConfig;
use super::sse::{SseBuffer, SseEvent};
use super::{GenerationClient, GenerationRequest, TextStream};
use crate::error::{GenerationError, Result};

/// [`GenerationClient`] over `POST /v1/messages`.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl AnthropicClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": stream,
        })
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(body)
    }
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.request_body(request, false);
        debug!(
            model = %self.config.model,
            prompt_len = request.prompt.len(),
            "sending generation request"
        );

        let response = self.post(&body).send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_status(status, &text);
            warn!(status = status.as_u16(), error = %err, "generation request rejected");
            return Err(err);
        }

        let text = response.text().await.map_err(classify_transport)?;
        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            GenerationError::malformed(format!("unexpected response body from provider: {e}"))
        })?;
        parsed.into_text()
    }

    fn stream_text(&self, request: &GenerationRequest) -> TextStream {
        let builder = self.post(&self.request_body(request, true));

        Box::pin(async_stream::stream! {
            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(classify_transport(e));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                yield Err(classify_status(status, &text));
                return;
            }

            let mut body = response.bytes_stream();
            let mut sse = SseBuffer::new();
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(classify_transport(e));
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);
                sse.push(&take_utf8(&mut pending));

                while let Some(event) = sse.next_event() {
                    match interpret_event(&event) {
                        Ok(StreamStep::Text(text)) => yield Ok(text),
                        Ok(StreamStep::Stop) => return,
                        Ok(StreamStep::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(event) = sse.finish() {
                match interpret_event(&event) {
                    Ok(StreamStep::Text(text)) => yield Ok(text),
                    Ok(StreamStep::Stop) => return,
                    Ok(StreamStep::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            // A body that closes before `message_stop` carries partial text.
            yield Err(GenerationError::TransientProvider(
                "stream ended before message_stop".into(),
            ));
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    fn into_text(self) -> Result<String> {
        let text: String = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(GenerationError::malformed("provider response contained no text"));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Text(String),
    Stop,
    Skip,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn interpret_event(event: &SseEvent) -> Result<StreamStep> {
    if event.data.is_empty() {
        return Ok(StreamStep::Skip);
    }
    let payload: StreamPayload = serde_json::from_str(&event.data).map_err(|e| {
        GenerationError::malformed(format!("unparseable stream event: {e}"))
    })?;
    match payload {
        StreamPayload::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } => Ok(StreamStep::Text(text)),
        StreamPayload::MessageStop => Ok(StreamStep::Stop),
        StreamPayload::Error { error } => Err(classify_error_type(&error.error_type, error.message)),
        _ => Ok(StreamStep::Skip),
    }
}

fn classify_transport(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        GenerationError::TransientProvider(err.to_string())
    } else {
        GenerationError::Provider(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let (error_type, message) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => (Some(parsed.error.error_type), parsed.error.message),
        Err(_) => (None, body.trim().to_owned()),
    };
    let message = if message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {message}", status.as_u16())
    };

    match status.as_u16() {
        401 | 403 => GenerationError::Authentication(message),
        408 | 429 | 500..=599 => GenerationError::TransientProvider(message),
        _ => match error_type {
            Some(t) => classify_error_type(&t, message),
            None => GenerationError::Provider(message),
        },
    }
}

fn classify_error_type(error_type: &str, message: String) -> GenerationError {
    match error_type {
        "authentication_error" | "permission_error" => GenerationError::Authentication(message),
        "rate_limit_error" | "overloaded_error" | "api_error" | "timeout_error" => {
            GenerationError::TransientProvider(message)
        }
        _ => GenerationError::Provider(message),
    }
}

/// Decode the longest valid UTF-8 prefix, leaving a split code point for
/// the next chunk.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        // A genuinely invalid byte: decode lossily rather than stall.
        Err(e) if e.error_len().is_some() => pending.len(),
        Err(e) => e.valid_up_to(),
    };
    let decoded = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client_for(base_url: &str) -> AnthropicClient {
        AnthropicClient::new(ProviderConfig::new("sk-test").with_base_url(base_url)).unwrap()
    }

    /// Serve exactly one canned HTTP response and return the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        content_type: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn request_body_carries_prompt_and_sampling() {
        let client = client_for("http://localhost");
        let request = GenerationRequest::new("Write.", "You are a professional writer.")
            .temperature(0.8);
        let body = client.request_body(&request, false);
        assert_eq!(body["model"], "claude-3-sonnet-20240229");
        assert_eq!(body["system"], "You are a professional writer.");
        assert_eq!(body["messages"][0]["content"], "Write.");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["stream"], false);
        assert!((body["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn status_classification() {
        let auth = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        match classify_status(StatusCode::UNAUTHORIZED, auth) {
            GenerationError::Authentication(msg) => assert_eq!(msg, "HTTP 401: invalid x-api-key"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::from_u16(529).unwrap(), "overloaded").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad model"),
            GenerationError::Provider(_)
        ));
    }

    #[test]
    fn response_text_blocks_are_joined() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello, "},{"type":"tool_use","id":"x"},{"type":"text","text":"world"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.into_text().unwrap(), "Hello, world");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(matches!(
            empty.into_text(),
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn stream_events_are_interpreted() {
        let delta = SseEvent {
            event: Some("content_block_delta".into()),
            data: r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#.into(),
        };
        assert_eq!(interpret_event(&delta).unwrap(), StreamStep::Text("Hel".into()));

        let ping = SseEvent {
            event: Some("ping".into()),
            data: r#"{"type":"ping"}"#.into(),
        };
        assert_eq!(interpret_event(&ping).unwrap(), StreamStep::Skip);

        let stop = SseEvent {
            event: Some("message_stop".into()),
            data: r#"{"type":"message_stop"}"#.into(),
        };
        assert_eq!(interpret_event(&stop).unwrap(), StreamStep::Stop);

        let overloaded = SseEvent {
            event: Some("error".into()),
            data: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#.into(),
        };
        assert!(interpret_event(&overloaded).unwrap_err().is_retryable());
    }

    #[test]
    fn split_code_points_wait_for_next_chunk() {
        let bytes = "é".as_bytes();
        let mut pending = vec![b'a', bytes[0]];
        assert_eq!(take_utf8(&mut pending), "a");
        pending.push(bytes[1]);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn generate_text_against_local_server() {
        let body = r#"{"id":"msg_1","type":"message","content":[{"type":"text","text":"{\"title\":\"T\"}"}]}"#;
        let (url, server) = one_shot_server("200 OK", "application/json", body.to_owned()).await;

        let client = client_for(&url);
        let request = GenerationRequest::new("Outline please", "You are a professional content creator.");
        let value = client.generate_json(&request).await.unwrap();
        assert_eq!(value["title"], "T");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/messages"));
        assert!(raw.to_ascii_lowercase().contains("x-api-key: sk-test"));
        assert!(raw.contains("anthropic-version: 2023-06-01"));
    }

    #[tokio::test]
    async fn unauthorized_is_authentication_error() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let (url, _server) =
            one_shot_server("401 Unauthorized", "application/json", body.to_owned()).await;

        let err = client_for(&url)
            .generate_text(&GenerationRequest::new("p", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn stream_text_yields_deltas_until_stop() {
        let body = [
            r#"event: message_start"#,
            r#"data: {"type":"message_start","message":{"id":"msg_1"}}"#,
            "",
            r#"event: content_block_delta"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"The fog "}}"#,
            "",
            r#"event: ping"#,
            r#"data: {"type":"ping"}"#,
            "",
            r#"event: content_block_delta"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"rolled in."}}"#,
            "",
            r#"event: message_stop"#,
            r#"data: {"type":"message_stop"}"#,
            "",
            "",
        ]
        .join("\n");
        let (url, _server) = one_shot_server("200 OK", "text/event-stream", body).await;

        let chunks: Vec<Result<String>> = client_for(&url)
            .stream_text(&GenerationRequest::new("p", "s"))
            .collect()
            .await;
        let chunks: Vec<String> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec!["The fog ".to_owned(), "rolled in.".to_owned()]);
    }

    #[tokio::test]
    async fn stream_text_cut_off_before_stop_is_transient() {
        let body = [
            r#"event: content_block_delta"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"The fog "}}"#,
            "",
            "",
        ]
        .join("\n");
        let (url, _server) = one_shot_server("200 OK", "text/event-stream", body).await;

        let mut chunks: Vec<Result<String>> = client_for(&url)
            .stream_text(&GenerationRequest::new("p", "s"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);
        let err = chunks.pop().unwrap().unwrap_err();
        assert!(matches!(err, GenerationError::TransientProvider(_)));
        assert!(err.to_string().contains("message_stop"));
        assert_eq!(chunks.pop().unwrap().unwrap(), "The fog ");
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(&format!("http://{addr}"))
            .generate_text(&GenerationRequest::new("p", "s"))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected transient, got {err:?}");
    }
}
