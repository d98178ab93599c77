//! LLM client for OpenAI-compatible chat-completion endpoints.
//!
//! One HTTP request per `generate` call. Failures are classified into
//! `GenerationError` variants so the retry policy can tell transient from
//! permanent; this client never retries on its own.

use crate::client::{
    clean_generated_html, parse_retry_after, DescriptionGenerator, GenerationRequest,
    PromptBuilder, RateLimiter,
};
use crate::models::{ApiConfig, GenerationError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for one OpenAI-compatible endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
    prompts: PromptBuilder,
    rate_limiter: Option<RateLimiter>,
    // Usage tracking
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LlmClient {
    /// Create a client from API settings, a resolved key and prompts.
    pub fn new(
        config: &ApiConfig,
        api_key: String,
        prompts: PromptBuilder,
    ) -> Result<Self, GenerationError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Network(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            prompts,
            rate_limiter: config.respect_rate_limit_headers.then(RateLimiter::new),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Build headers for a request.
    fn headers(&self) -> Result<HeaderMap, GenerationError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            GenerationError::Authentication("API key is not a valid header value".to_string())
        })?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send one chat completion request and return the message content.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String, GenerationError> {
        let start = Instant::now();

        if let Some(limiter) = &self.rate_limiter {
            limiter.wait_if_needed().await;
        }

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        if let Some(limiter) = &self.rate_limiter {
            limiter.update_from_headers(&headers);
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let retry_after = headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(GenerationError::from_status(
                status,
                api_error_message(&body),
                retry_after,
            ));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::Network(format!("reading response body: {e}"))
            }
        })?;
        let parsed = parse_completion(&body)?;
        if let Some(usage) = &parsed.usage {
            self.track_usage(usage);
        }
        let content = first_choice(parsed)?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "Completion received"
        );
        Ok(content)
    }

    /// Tokens used so far: (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    fn track_usage(&self, usage: &ChatUsage) {
        self.total_input_tokens
            .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
    }
}

#[async_trait]
impl DescriptionGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if request.targets.is_empty() {
            return Err(GenerationError::InvalidInput(
                "no target fields requested".to_string(),
            ));
        }
        if request.title.is_none() && request.existing_description.is_none() {
            return Err(GenerationError::InvalidInput(format!(
                "product '{}' has neither title nor description",
                request.handle
            )));
        }

        let messages = vec![
            Message::system(self.prompts.system()),
            Message::user(self.prompts.user(request)),
        ];
        let raw = self.complete(messages).await?;

        let cleaned = if request.is_description_only() {
            clean_generated_html(&raw)
        } else {
            raw.trim().to_string()
        };
        if cleaned.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "model returned empty content".to_string(),
            ));
        }
        Ok(cleaned)
    }
}

fn parse_completion(body: &str) -> Result<ChatCompletionResponse, GenerationError> {
    serde_json::from_str(body)
        .map_err(|e| GenerationError::InvalidResponse(format!("Failed to parse response: {e}")))
}

/// Extract the message content of the first choice.
fn first_choice(response: ChatCompletionResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| GenerationError::InvalidResponse("No choices in response".to_string()))
}

/// Pull the human-readable message out of an error body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect())
}
