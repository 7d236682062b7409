use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use serde::{Deserialize, Serialize};

pub(crate) const CHAT_PATH: &str = "/api/chat";

/// Request body for `/api/chat`. Every dispatch uses JSON output, no streaming
/// and no reasoning trace.
#[derive(Debug, Serialize)]
pub(crate) struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    format: &'static str,
    keep_alive: &'a str,
    think: bool,
}

impl<'a> OllamaChatRequest<'a> {
    pub(crate) fn new(model: &'a str, messages: &'a [ChatMessage], keep_alive: &'a str) -> Self {
        Self {
            model,
            messages,
            stream: false,
            format: "json",
            keep_alive,
            think: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OllamaChatResponse {
    pub(crate) fn into_chat_response(self, requested_model: &str) -> ChatResponse {
        let content = self
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content,
            },
            model: self
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| requested_model.to_string()),
            usage: Usage {
                prompt_tokens: self.prompt_eval_count.unwrap_or(0),
                completion_tokens: self.eval_count.unwrap_or(0),
            },
            done_reason: self.done_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_fixed_dispatch_parameters() {
        let messages = vec![ChatMessage::user("[2026-01-01T00:00:00Z] hello")];
        let req = OllamaChatRequest::new("llama3.2", &messages, "30s");
        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(
            value,
            json!({
                "model": "llama3.2",
                "messages": [{ "role": "user", "content": "[2026-01-01T00:00:00Z] hello" }],
                "stream": false,
                "format": "json",
                "keep_alive": "30s",
                "think": false,
            })
        );
    }

    #[test]
    fn response_without_message_yields_empty_content() {
        let parsed: OllamaChatResponse =
            serde_json::from_value(json!({ "done": true })).expect("parse");
        let resp = parsed.into_chat_response("llama3.2");
        assert_eq!(resp.message.content, "");
        assert_eq!(resp.model, "llama3.2");
        assert!(resp.text().is_none());
    }

    #[test]
    fn response_maps_usage_counters() {
        let parsed: OllamaChatResponse = serde_json::from_value(json!({
            "model": "qwen3",
            "message": { "role": "assistant", "content": "{\"reply\":\"hi\"}" },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 12,
            "eval_count": 5,
        }))
        .expect("parse");
        let resp = parsed.into_chat_response("llama3.2");
        assert_eq!(resp.model, "qwen3");
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.usage.completion_tokens, 5);
        assert_eq!(resp.done_reason.as_deref(), Some("stop"));
    }
}
