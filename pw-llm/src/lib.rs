//! Chat-model client for pagewire.
//!
//! Pure HTTP client against an Ollama-compatible `/api/chat` endpoint.

mod client;
mod error;
mod ollama;
mod types;

pub use client::{DEFAULT_KEEP_ALIVE, LlmClient};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, Usage};
