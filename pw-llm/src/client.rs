use crate::error::{LlmError, Result};
use crate::ollama::{CHAT_PATH, OllamaChatRequest, OllamaChatResponse};
use crate::types::{ChatMessage, ChatResponse};
use reqwest::Url;
use std::time::Duration;

pub const DEFAULT_KEEP_ALIVE: &str = "30s";

#[derive(Clone)]
pub struct LlmClient {
    chat_url: Url,
    model: String,
    keep_alive: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all, fields(host = %host, model = %model))]
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self> {
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model id is required".to_string()));
        }
        let host = host.trim().trim_end_matches('/');
        let chat_url = Url::parse(&format!("{host}{CHAT_PATH}"))
            .map_err(|e| LlmError::InvalidInput(format!("invalid model host {host:?}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Ok(Self {
            chat_url,
            model: model.to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            timeout,
            client,
        })
    }

    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        let keep_alive = keep_alive.into();
        if !keep_alive.trim().is_empty() {
            self.keep_alive = keep_alive.trim().to_string();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    pub fn keep_alive(&self) -> &str {
        &self.keep_alive
    }

    /// One non-streaming chat call.
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model, messages = messages.len()))]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "chat requires at least one message".to_string(),
            ));
        }
        let req = OllamaChatRequest::new(&self.model, messages, &self.keep_alive);

        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&req)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body)?;
        let resp = parsed.into_chat_response(&self.model);
        tracing::debug!(
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            done_reason = ?resp.done_reason,
            "model call completed"
        );
        Ok(resp)
    }

    fn classify(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout.as_millis() as u64)
        } else {
            LlmError::Http(e.to_string())
        }
    }
}
