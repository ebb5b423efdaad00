//! Completion service: prompt in, text out.

use crate::otel::completion_span;
use crate::types::{AskError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Text-generation provider used for query generation and explanations.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send one prompt and return the generated text.
    ///
    /// # Errors
    ///
    /// Returns `AskError::CompletionError` if the provider cannot be reached
    /// or rejects the request
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model name, for logging.
    fn model(&self) -> &str;
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    /// Pick the provider from the model name.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.starts_with("gemini") || model.starts_with("models/gemini") {
            Self::Gemini
        } else if model.starts_with("claude") || model.starts_with("anthropic") {
            Self::Anthropic
        } else {
            Self::OpenAI
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }
}

/// Gemini `generateContent` response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible chat completion response.
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Anthropic messages response.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

/// HTTP client for the hosted completion APIs.
pub struct HttpCompletionClient {
    api_key: String,
    model: String,
    provider: LlmProvider,
    base_url: Option<String>,
    client: Client,
}

impl HttpCompletionClient {
    /// Create new completion client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Key for the provider the model belongs to
    /// * `model` - Model name (e.g. "gemini-1.5-flash", "gpt-4o-mini", "claude-3-5-haiku-latest")
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `AskError::HttpError` if the HTTP client cannot be built
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let model = model.into();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.into(),
            provider: LlmProvider::for_model(&model),
            model,
            base_url: None,
            client,
        })
    }

    /// Send requests to another host (OpenAI-compatible gateways, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn url(&self, default_base: &str, path: &str) -> String {
        format!("{}{}", self.base_url.as_deref().unwrap_or(default_base), path)
    }

    async fn call_gemini(&self, prompt: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url(
                "https://generativelanguage.googleapis.com",
                &format!("/v1beta/models/{}:generateContent", self.model),
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"temperature": 0.1}
            }));
        let body = self.send(request).await?;
        parse_gemini(&body)
    }

    async fn call_openai(&self, prompt: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url("https://api.openai.com", "/v1/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.1
            }));
        let body = self.send(request).await?;
        parse_openai(&body)
    }

    async fn call_anthropic(&self, prompt: &str) -> Result<String> {
        let request = self
            .client
            .post(self.url("https://api.anthropic.com", "/v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.1
            }));
        let body = self.send(request).await?;
        parse_anthropic(&body)
    }

    /// Send the request and return the body of a successful response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let provider = self.provider.name();
        let response = request
            .send()
            .await
            .map_err(|e| AskError::transient(format!("{} API error: {}", provider, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AskError::transient(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = format!("{} API error {}: {}", provider, status, body);
            return Err(if is_transient_status(status) {
                AskError::transient(message)
            } else {
                AskError::completion(message)
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let span = completion_span(&self.model, "generate");
        let started = Instant::now();

        let result = async {
            match self.provider {
                LlmProvider::Gemini => self.call_gemini(prompt).await,
                LlmProvider::OpenAI => self.call_openai(prompt).await,
                LlmProvider::Anthropic => self.call_anthropic(prompt).await,
            }
        }
        .instrument(span.clone())
        .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        span.record("completion.latency_ms", latency_ms);
        match &result {
            Ok(text) => {
                tracing::info!(model = %self.model, latency_ms, chars = text.len(), "completion received")
            }
            Err(e) => tracing::warn!(model = %self.model, latency_ms, error = %e, "completion failed"),
        }
        result
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Rate limiting and server-side failures are worth another attempt.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn parse_gemini(body: &str) -> Result<String> {
    let parsed: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| AskError::completion(format!("Failed to parse Gemini response: {}", e)))?;
    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AskError::completion("No response from Gemini"))?;
    Ok(candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .concat())
}

fn parse_openai(body: &str) -> Result<String> {
    let parsed: OpenAIResponse = serde_json::from_str(body)
        .map_err(|e| AskError::completion(format!("Failed to parse OpenAI response: {}", e)))?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AskError::completion("No response from OpenAI"))?
        .message
        .content
        .unwrap_or_default())
}

fn parse_anthropic(body: &str) -> Result<String> {
    let parsed: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| AskError::completion(format!("Failed to parse Anthropic response: {}", e)))?;
    Ok(parsed
        .content
        .into_iter()
        .map(|c| c.text)
        .collect::<Vec<_>>()
        .concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_model() {
        assert_eq!(LlmProvider::for_model("gemini-1.5-flash"), LlmProvider::Gemini);
        assert_eq!(LlmProvider::for_model("claude-3-5-haiku-latest"), LlmProvider::Anthropic);
        assert_eq!(LlmProvider::for_model("gpt-4o-mini"), LlmProvider::OpenAI);
        assert_eq!(LlmProvider::Gemini.api_key_var(), "GEMINI_API_KEY");
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_parse_gemini() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"SELECT "},{"text":"1"}],"role":"model"}}]}"#;
        assert_eq!(parse_gemini(body).unwrap(), "SELECT 1");

        let err = parse_gemini(r#"{"candidates":[]}"#).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_parse_openai() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"SELECT 2"}}]}"#;
        assert_eq!(parse_openai(body).unwrap(), "SELECT 2");
    }

    #[test]
    fn test_parse_anthropic() {
        let body = r#"{"content":[{"type":"text","text":"cannot be answered"}]}"#;
        assert_eq!(parse_anthropic(body).unwrap(), "cannot be answered");
    }

    #[test]
    fn test_base_url_override() {
        let client = HttpCompletionClient::new("k", "gpt-4o-mini", Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/");
        assert_eq!(
            client.url("https://api.openai.com", "/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
