//! OpenRouter provider implementation.
//!
//! OpenRouter exposes an OpenAI-compatible chat completions endpoint. The
//! same provider also works against LiteLLM proxies via a custom base URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};

/// Default OpenRouter API endpoint.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Per-call HTTP timeout. Reasoning models can take minutes per call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt number `attempt` (1-based) failed.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Chat-completions client for OpenRouter and compatible endpoints.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    completions_url: String,
    /// Used when a request leaves `model` empty.
    model: String,
    retry: RetryPolicy,
}

impl OpenRouterProvider {
    /// Create a provider for the public OpenRouter endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL, model)
    }

    /// Create a provider against an OpenAI-compatible base URL such as a
    /// LiteLLM proxy.
    pub fn with_custom_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into();
        Ok(Self {
            client,
            api_key: api_key.into(),
            completions_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<GenerationResponse, LlmError> {
        let mut attempt = 1;
        loop {
            let err = match self.round_trip(body).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) => err,
            };
            if attempt >= self.retry.attempts {
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                attempt,
                attempts = self.retry.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Chat completion failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn round_trip(&self, body: &ChatRequest<'_>) -> Attempt {
        let response = match self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "batch-eval")
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = LlmError::RequestFailed(e.to_string());
                return if e.is_timeout() || e.is_connect() {
                    Attempt::Retry(err)
                } else {
                    Attempt::Fatal(err)
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return classify_status(status, &text);
        }

        match response.json::<ChatResponse>().await {
            Ok(parsed) => {
                debug!(model = %parsed.model, "Chat completion received");
                Attempt::Done(parsed.into())
            }
            Err(e) => Attempt::Fatal(LlmError::ParseError(format!(
                "Failed to parse API response: {}",
                e
            ))),
        }
    }
}

/// Result of one HTTP round trip, already sorted by whether to try again.
#[derive(Debug)]
enum Attempt {
    Done(GenerationResponse),
    Retry(LlmError),
    Fatal(LlmError),
}

/// Maps a non-2xx reply to an error. 429 and 5xx are worth retrying.
fn classify_status(status: StatusCode, body: &str) -> Attempt {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::Retry(LlmError::RateLimited(message));
    }
    let err = LlmError::ApiError {
        code: status.as_u16(),
        message,
    };
    if status.is_server_error() {
        Attempt::Retry(err)
    } else {
        Attempt::Fatal(err)
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };
        let body = ChatRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        self.send(&body).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    index: u32,
    message: ChatMessage,
    finish_reason: Option<String>,
}

/// Reasoning models may reply with `content: null`.
#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

impl From<ChatResponse> for GenerationResponse {
    fn from(raw: ChatResponse) -> Self {
        let choices = raw
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            })
            .collect();

        GenerationResponse {
            id: raw.id,
            model: raw.model,
            choices,
            usage: raw.usage.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url() {
        let provider = OpenRouterProvider::new("key", "o1").expect("provider");
        assert_eq!(
            provider.completions_url,
            "https://openrouter.ai/api/v1/chat/completions"
        );

        let proxy = OpenRouterProvider::with_custom_url("key", "http://localhost:4000/v1/", "gpt-4o")
            .expect("provider");
        assert_eq!(proxy.completions_url, "http://localhost:4000/v1/chat/completions");
        assert_eq!(proxy.model, "gpt-4o");
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(2), Duration::from_secs(2));
        assert_eq!(retry.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_classify_status() {
        let body = r#"{"error": {"message": "slow down"}}"#;
        match classify_status(StatusCode::TOO_MANY_REQUESTS, body) {
            Attempt::Retry(LlmError::RateLimited(msg)) => assert_eq!(msg, "slow down"),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream down"),
            Attempt::Retry(LlmError::ApiError { code: 502, .. })
        ));

        match classify_status(StatusCode::UNAUTHORIZED, "not json") {
            Attempt::Fatal(LlmError::ApiError { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "not json");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_null_content_becomes_empty() {
        let raw = r#"{
            "id": "gen-1",
            "model": "o1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": null}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 0, "total_tokens": 12}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).expect("parse");
        let response = GenerationResponse::from(parsed);

        assert_eq!(response.choices[0].message.content, "");
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert!(response.first_content().is_none());
    }

    #[test]
    fn test_missing_usage_defaults_to_zero() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "4"}}], "usage": {"prompt_tokens": 3}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).expect("parse");
        let response = GenerationResponse::from(parsed);
        assert_eq!(response.usage.prompt_tokens, 3);
        assert_eq!(response.usage.completion_tokens, 0);
        assert_eq!(response.first_content(), Some("4"));
    }

    #[test]
    fn test_request_body_serialization() {
        let messages = vec![Message::user("Hello")];
        let body = ChatRequest {
            model: "test-model",
            messages: &messages,
            temperature: None,
            max_tokens: Some(1000),
        };

        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["max_tokens"], 1000);
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_connection_refused_gives_up_after_retries() {
        let provider =
            OpenRouterProvider::with_custom_url("test-key", "http://127.0.0.1:9", "test-model")
                .expect("provider")
                .with_retry(RetryPolicy {
                    attempts: 2,
                    base_delay: Duration::from_millis(1),
                });

        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let result = provider.generate(request).await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
