use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::TextProvider;
use super::error::ProviderError;
use super::types::{Completion, Message, MessagesRequest, MessagesResponse};

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    ///
    /// The overall per-call deadline is enforced by the generator, so the
    /// HTTP client only bounds connection setup.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> Result<MessagesResponse, ProviderError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }
}

#[async_trait]
impl TextProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, ProviderError> {
        let req = MessagesRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            system: None,
            messages: vec![Message {
                role: "user".into(),
                content: prompt.to_string(),
            }],
        };
        let response = self.send_message(&req).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion(model.to_string()));
        }
        Ok(Completion {
            text,
            usage: response.usage.into(),
        })
    }
}
