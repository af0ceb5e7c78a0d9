//! Anthropic Messages API client
//!
//! Each call is a single stateless user message. Rate limits (429) and
//! server errors (5xx) are retried with exponential backoff; anything else
//! fails immediately and counts against the circuit breaker.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use unstuck_core::ModelConfig;

use crate::auth::resolve_api_key;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{Message, MessagesRequest, MessagesResponse, ANTHROPIC_VERSION};
use crate::{CompletionModel, ModelError};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Completion model backed by the Anthropic Messages API
#[derive(Clone)]
pub struct AnthropicModel {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl AnthropicModel {
    /// Create a client for `model` authenticated with `api_key`
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            breaker: Arc::new(CircuitBreaker::default()),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }

    /// Build a client for `model` using the key, endpoint and timeout from config
    pub fn from_config(config: &ModelConfig, model: &str) -> Result<Self, ModelError> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            ..Self::new(model, api_key).with_base_url(&config.base_url)
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Retry budget for 429/5xx responses and the first backoff delay
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Share a breaker between clients that hit the same endpoint
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn send_once(&self, request: &MessagesRequest<'_>) -> Result<reqwest::Response, ModelError> {
        self.http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("Failed to send request: {}", e)))
    }

    fn fail(&self, err: ModelError) -> ModelError {
        self.breaker.record_failure();
        tracing::warn!(
            model = %self.model,
            failures = self.breaker.failure_count(),
            "Model call failed: {}",
            err
        );
        err
    }
}

impl std::fmt::Debug for AnthropicModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicModel")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionModel for AnthropicModel {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ModelError> {
        if !self.breaker.can_execute() {
            return Err(ModelError::CircuitOpen {
                retry_in_ms: self.breaker.time_until_retry().as_millis() as u64,
            });
        }

        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            tracing::debug!(model = %self.model, attempt = retries + 1, "Sending completion request");

            let response = match self.send_once(&request).await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                if retries >= self.max_retries {
                    let message = response.text().await.unwrap_or_default();
                    let err = if status.as_u16() == 429 {
                        ModelError::RateLimited { retries, message }
                    } else {
                        ModelError::Api {
                            status: status.as_u16(),
                            message,
                        }
                    };
                    return Err(self.fail(err));
                }
                retries += 1;

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "Retryable status {} from {}. Waiting {:?} before retry {}/{}",
                    status,
                    self.model,
                    wait,
                    retries,
                    self.max_retries
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(self.fail(ModelError::Api {
                    status: status.as_u16(),
                    message,
                }));
            }

            let body: MessagesResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    return Err(self.fail(ModelError::InvalidResponse(format!(
                        "Failed to parse response: {}",
                        e
                    ))))
                }
            };

            self.breaker.record_success();

            let text = body.text();
            match &body.usage {
                Some(usage) => tracing::info!(
                    model = %self.model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Completion received ({} chars)",
                    text.len()
                ),
                None => tracing::info!(model = %self.model, "Completion received ({} chars)", text.len()),
            }

            return Ok(text);
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve each canned `(status line, body)` to one connection in turn
    async fn serve(responses: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        format!("http://{}", addr)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    const OK_BODY: &str = r#"{"id":"msg_1","content":[{"type":"text","text":"pruned context"}],"usage":{"input_tokens":10,"output_tokens":3}}"#;

    #[tokio::test]
    async fn test_complete_returns_text() {
        let url = serve(vec![("200 OK", OK_BODY)]).await;
        let model = AnthropicModel::new("claude-haiku", "test-key").with_base_url(url);

        let text = model.complete("prune this", 100).await.unwrap();
        assert_eq!(text, "pruned context");
        assert_eq!(model.circuit_breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let url = serve(vec![
            ("503 Service Unavailable", r#"{"error":"overloaded"}"#),
            ("200 OK", OK_BODY),
        ])
        .await;
        let model = AnthropicModel::new("claude-haiku", "test-key")
            .with_base_url(url)
            .with_retries(1, Duration::from_millis(10));

        assert_eq!(model.complete("prune this", 100).await.unwrap(), "pruned context");
    }

    #[tokio::test]
    async fn test_client_error_not_retried_and_counted() {
        let url = serve(vec![("400 Bad Request", r#"{"error":"bad"}"#)]).await;
        let model = AnthropicModel::new("claude-haiku", "test-key")
            .with_base_url(url)
            .with_retries(3, Duration::from_millis(10));

        let err = model.complete("prune this", 100).await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 400, .. }));
        assert_eq!(model.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        breaker.record_failure();
        let model = AnthropicModel::new("claude-haiku", "test-key")
            .with_base_url("http://127.0.0.1:9")
            .with_circuit_breaker(breaker);

        let err = model.complete("prune this", 100).await.unwrap_err();
        assert!(matches!(err, ModelError::CircuitOpen { .. }));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ModelConfig {
            api_key_env: "UNSTUCK_TEST_KEY_UNSET_FOR_CLIENT".to_string(),
            ..ModelConfig::default()
        };
        std::env::remove_var(&config.api_key_env);
        assert!(matches!(
            AnthropicModel::from_config(&config, "claude-haiku"),
            Err(ModelError::Auth(_))
        ));
    }
}
