//! Model dispatch stage.

use crate::ledger::{EntryDraft, EntryPayload, LedgerEntry, SharedLedger};
use async_trait::async_trait;
use pw_llm::{ChatMessage, ChatResponse, LlmClient};
use std::sync::Arc;
use std::time::Duration;

pub const NO_CONTENT_PLACEHOLDER: &str = "(no content)";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage]) -> pw_llm::Result<ChatResponse>;
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model_id(&self) -> &str {
        self.model()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> pw_llm::Result<ChatResponse> {
        LlmClient::chat(self, messages).await
    }
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// No turns qualified; the model was not called.
    Skipped,
    /// The assistant entry appended for this dispatch.
    Replied(Arc<LedgerEntry>),
    Failed(String),
}

impl DispatchOutcome {
    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Replied(entry) => match &entry.payload {
                EntryPayload::Text(text) => Some(text.as_str()),
                EntryPayload::Event(_) => None,
            },
            Self::Skipped | Self::Failed(_) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Replied(_) => "replied",
            Self::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(error) => Some(error.as_str()),
            Self::Skipped | Self::Replied(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ModelDispatcher {
    model: Arc<dyn ChatModel>,
    ledger: SharedLedger,
    system_prompt: Option<String>,
    timeout: Duration,
}

impl ModelDispatcher {
    pub fn new(model: Arc<dyn ChatModel>, ledger: SharedLedger, timeout: Duration) -> Self {
        Self {
            model,
            ledger,
            system_prompt: None,
            timeout,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<&str>) -> Self {
        self.system_prompt = system_prompt.map(ToOwned::to_owned);
        self
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Call the model once. Errors stop here: they are logged and nothing is appended.
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model.model_id(), turns = turns.len()))]
    pub async fn dispatch(&self, turns: Vec<ChatMessage>) -> DispatchOutcome {
        if turns.is_empty() {
            tracing::debug!("no qualifying turns; model not called");
            return DispatchOutcome::Skipped;
        }

        let mut messages = Vec::with_capacity(turns.len() + 1);
        if let Some(prompt) = self.system_prompt.as_deref() {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(turns);

        let response = match tokio::time::timeout(self.timeout, self.model.chat(&messages)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                tracing::warn!(%error, "model dispatch failed");
                return DispatchOutcome::Failed(error.to_string());
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(timeout_ms, "model dispatch timed out");
                return DispatchOutcome::Failed(format!("model call timed out after {timeout_ms}ms"));
            }
        };

        let text = match response.text() {
            Some(text) => text.to_string(),
            None => {
                tracing::info!("model returned no text; using placeholder");
                NO_CONTENT_PLACEHOLDER.to_string()
            }
        };
        let entry = self
            .ledger
            .append(EntryDraft::reply(text, self.model.model_id()))
            .await;
        tracing::info!(
            arrival_order = entry.arrival_order,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "assistant reply recorded"
        );
        DispatchOutcome::Replied(entry)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use pw_llm::{LlmError, Usage};
    use std::sync::Mutex;

    pub(crate) enum FakeReply {
        Text(String),
        Error,
        Hang,
    }

    /// In-memory model that records every call.
    pub(crate) struct FakeModel {
        reply: FakeReply,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeModel {
        pub(crate) fn new(reply: FakeReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn text(text: &str) -> Arc<Self> {
            Self::new(FakeReply::Text(text.to_string()))
        }

        pub(crate) fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        fn model_id(&self) -> &str {
            "fake-model"
        }

        async fn chat(&self, messages: &[ChatMessage]) -> pw_llm::Result<ChatResponse> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(messages.to_vec());
            match &self.reply {
                FakeReply::Text(text) => Ok(ChatResponse {
                    message: ChatMessage::assistant(text.clone()),
                    model: "fake-model".to_string(),
                    usage: Usage::default(),
                    done_reason: Some("stop".to_string()),
                }),
                FakeReply::Error => Err(LlmError::Http("connection refused".to_string())),
                FakeReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(LlmError::Http("unreachable".to_string()))
                }
            }
        }
    }
}
