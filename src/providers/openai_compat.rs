//! Shared plumbing for OpenAI-compatible chat-completion backends.
//!
//! [`OpenAiCompatBackend`] owns the HTTP client, endpoint and
//! [`CredentialPool`] for one provider. Concrete adapters build the request
//! body and hand it here to be sent and decoded.

use futures::StreamExt;
use std::time::Duration;

use super::pool::CredentialPool;
use super::ChunkStream;
use crate::config::ApiKey;
use crate::error::{Error, Result};
use crate::proxy::frame::StreamChunk;
use crate::proxy::sse::{SseDecoder, SseEvent};
use crate::proxy::types::{ChatCompletionChunk, ChatCompletionRequest};

/// Why one upstream attempt failed.
#[derive(Debug)]
enum AttemptError {
    /// Rate-limit or quota rejection; counted against the credential and retried
    /// with the next one.
    RateLimited(String),
    /// Anything else; fails the call immediately.
    Failed(String),
}

/// HTTP transport, endpoint and credential pool for one provider.
pub struct OpenAiCompatBackend {
    provider: String,
    base_url: String,
    client: reqwest::Client,
    pool: CredentialPool,
    header_timeout: Duration,
}

impl OpenAiCompatBackend {
    /// `header_timeout` bounds how long to wait for the response headers.
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        client: reqwest::Client,
        pool: CredentialPool,
        header_timeout: Duration,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            pool,
            header_timeout,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Send `request` and return the decoded chunk stream.
    ///
    /// Rate-limited attempts rotate to the next credential, up to one
    /// attempt per credential. Any other setup failure is returned at once.
    pub async fn open_stream(&self, request: &ChatCompletionRequest) -> Result<ChunkStream> {
        let attempts = self.pool.len();
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            let key = self.pool.select();
            let credential = self.pool.index_of(&key);

            match self.attempt(&key, request).await {
                Ok(response) => {
                    self.pool.report_success(&key);
                    tracing::debug!(
                        provider = %self.provider,
                        model = %request.model,
                        credential = ?credential,
                        attempt,
                        "Upstream stream opened"
                    );
                    return Ok(chunk_stream(self.provider.clone(), response));
                }
                Err(AttemptError::RateLimited(message)) => {
                    tracing::warn!(
                        provider = %self.provider,
                        credential = ?credential,
                        attempt,
                        max_attempts = attempts,
                        error = %message,
                        "Provider rate limited, rotating credential"
                    );
                    last_message = message;
                }
                Err(AttemptError::Failed(message)) => {
                    tracing::error!(
                        provider = %self.provider,
                        credential = ?credential,
                        error = %message,
                        "Provider request failed"
                    );
                    return Err(Error::ProviderUnavailable {
                        provider: self.provider.clone(),
                        message,
                    });
                }
            }
        }

        Err(Error::ProviderUnavailable {
            provider: self.provider.clone(),
            message: last_message,
        })
    }

    /// One upstream call with one credential. Reports failures to the pool.
    async fn attempt(
        &self,
        key: &ApiKey,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<reqwest::Response, AttemptError> {
        let message = match self.send(key, request).await {
            Ok(response) => return Ok(response),
            Err(message) => message,
        };

        if self.pool.report_failure(key, &message) {
            Err(AttemptError::RateLimited(message))
        } else {
            Err(AttemptError::Failed(message))
        }
    }

    async fn send(
        &self,
        key: &ApiKey,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<reqwest::Response, String> {
        let url = format!("{}/chat/completions", self.base_url);
        let pending = self
            .client
            .post(&url)
            .bearer_auth(key.expose_secret())
            .json(request)
            .send();

        let response = match tokio::time::timeout(self.header_timeout, pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(format!("Failed to reach provider: {}", e)),
            Err(_) => {
                return Err(format!(
                    "No response from provider within {}s",
                    self.header_timeout.as_secs()
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            // A stalled error body falls back to the status line alone.
            return match tokio::time::timeout(self.header_timeout, response.text()).await {
                Ok(Ok(body)) if !body.trim().is_empty() => {
                    Err(format!("{}: {}", status, body.trim()))
                }
                _ => Err(status.to_string()),
            };
        }

        Ok(response)
    }
}

/// Translate one SSE item into a gateway chunk, if it carries one.
fn translate(provider: &str, event: SseEvent) -> Option<StreamChunk> {
    let data = match event {
        SseEvent::Done => return Some(StreamChunk::Finished),
        SseEvent::Data(data) => data,
    };

    let value: serde_json::Value = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(provider = %provider, error = %e, "Skipping malformed SSE payload");
            return None;
        }
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(StreamChunk::Error(format!(
            "Provider '{}' error: {}",
            provider, message
        )));
    }

    let chunk: ChatCompletionChunk = serde_json::from_value(value).ok()?;
    let text: String = chunk
        .choices
        .iter()
        .filter_map(|choice| choice.delta.content.as_deref())
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(StreamChunk::Text(text))
    }
}

/// Decode an open upstream response into gateway chunks.
///
/// Ends with exactly one terminal chunk: `Finished` on `[DONE]` or a clean
/// end of body, `Error` on an in-band error object or a transport failure.
fn chunk_stream(provider: String, response: reqwest::Response) -> ChunkStream {
    let mut body = response.bytes_stream();

    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(provider = %provider, error = %e, "Upstream stream failed mid-response");
                    yield StreamChunk::Error(format!(
                        "Connection to provider '{}' lost: {}",
                        provider, e
                    ));
                    return;
                }
            };

            for event in decoder.push(&bytes) {
                if let Some(chunk) = translate(&provider, event) {
                    let terminal = chunk.is_terminal();
                    yield chunk;
                    if terminal {
                        return;
                    }
                }
            }
        }

        if let Some(chunk) = decoder.finish().and_then(|event| translate(&provider, event)) {
            let terminal = chunk.is_terminal();
            yield chunk;
            if terminal {
                return;
            }
        }

        yield StreamChunk::Finished;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn data(json: &str) -> SseEvent {
        SseEvent::Data(json.to_string())
    }

    /// Read one HTTP request, headers and `content-length` body.
    async fn read_request(socket: &mut TcpStream) {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&received).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Upstream on a raw socket: answer one request with `response`, then
    /// either stall with the connection open or close it.
    async fn raw_upstream(response: String, stall: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            if stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        format!("http://{}", addr)
    }

    fn backend(base_url: String, header_timeout: Duration) -> OpenAiCompatBackend {
        let pool = CredentialPool::new("openai", vec![ApiKey::from("sk-1")]).unwrap();
        OpenAiCompatBackend::new("openai", base_url, reqwest::Client::new(), pool, header_timeout)
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![crate::proxy::types::ChatMessage::user("hi")],
            stream: true,
            temperature: 0.7,
            max_tokens: None,
            reasoning_effort: None,
        }
    }

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
        )
    }

    #[tokio::test]
    async fn stalled_error_body_is_bounded_by_header_timeout() {
        let response =
            "HTTP/1.1 429 Too Many Requests\r\ncontent-length: 100\r\n\r\npartial".to_string();
        let base_url = raw_upstream(response, true).await;
        let backend = backend(base_url, Duration::from_millis(300));

        let result = tokio::time::timeout(Duration::from_secs(5), backend.open_stream(&request()))
            .await
            .expect("setup must not hang on a stalled error body");

        match result {
            Err(Error::ProviderUnavailable { message, .. }) => assert!(message.contains("429")),
            Err(other) => panic!("expected provider unavailable, got {:?}", other),
            Ok(_) => panic!("expected setup failure"),
        }
        assert_eq!(backend.pool().snapshot()[0].failure_count, 1);
    }

    #[tokio::test]
    async fn connection_drop_mid_stream_ends_with_one_error() {
        let body = format!("{}{}", delta("Hel"), delta("lo"));
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 10000\r\n\r\n{}",
            body
        );
        let base_url = raw_upstream(response, false).await;
        let backend = backend(base_url, Duration::from_secs(5));

        let stream = backend.open_stream(&request()).await.expect("stream opens");
        let chunks: Vec<StreamChunk> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .expect("stream ends once the connection closes");

        assert_eq!(chunks.len(), 3, "{:?}", chunks);
        assert_eq!(chunks[0], StreamChunk::Text("Hel".to_string()));
        assert_eq!(chunks[1], StreamChunk::Text("lo".to_string()));
        match &chunks[2] {
            StreamChunk::Error(message) => assert!(message.contains("openai"), "{}", message),
            other => panic!("expected error chunk, got {:?}", other),
        }
    }

    #[test]
    fn translate_text_delta() {
        let chunk = translate(
            "openai",
            data(r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#),
        );
        assert_eq!(chunk, Some(StreamChunk::Text("Hel".to_string())));
    }

    #[test]
    fn translate_skips_role_only_and_empty_deltas() {
        assert_eq!(
            translate(
                "openai",
                data(r#"{"choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#)
            ),
            None
        );
        assert_eq!(
            translate(
                "openai",
                data(r#"{"choices":[{"index":0,"delta":{"content":""},"finish_reason":"stop"}]}"#)
            ),
            None
        );
        assert_eq!(translate("openai", data(r#"{"choices":[],"usage":{"prompt_tokens":1}}"#)), None);
    }

    #[test]
    fn translate_in_band_error() {
        let chunk = translate(
            "gemini",
            data(r#"{"error":{"code":500,"message":"internal upstream failure"}}"#),
        );
        match chunk {
            Some(StreamChunk::Error(message)) => {
                assert!(message.contains("gemini"));
                assert!(message.contains("internal upstream failure"));
            }
            other => panic!("expected error chunk, got {:?}", other),
        }
    }

    #[test]
    fn translate_done_and_malformed() {
        assert_eq!(translate("openai", SseEvent::Done), Some(StreamChunk::Finished));
        assert_eq!(translate("openai", data("{not json")), None);
    }
}
