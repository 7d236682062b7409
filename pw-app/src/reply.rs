//! Reply delivery stage.

use pw_channels::{ChannelAdapter, MessageId, OutboundMessage, SendReceipt, SenderId};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Sent(SendReceipt),
    /// No request was attempted.
    Skipped(&'static str),
    Failed(String),
}

impl ReplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent(_) => "sent",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Sent(receipt) => receipt.message_id.as_ref(),
            Self::Skipped(_) | Self::Failed(_) => None,
        }
    }

    /// Why nothing was delivered.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Sent(_) => None,
            Self::Skipped(reason) => Some(*reason),
            Self::Failed(error) => Some(error.as_str()),
        }
    }
}

/// Sends model output back to the conversation it came from. Outcomes are for
/// logging only; nothing is retried.
#[derive(Clone)]
pub struct ReplyRouter {
    adapter: Option<Arc<dyn ChannelAdapter>>,
    timeout: Duration,
}

impl ReplyRouter {
    /// `adapter` is `None` when no access credential is configured.
    pub fn new(adapter: Option<Arc<dyn ChannelAdapter>>, timeout: Duration) -> Self {
        Self { adapter, timeout }
    }

    pub fn is_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    #[tracing::instrument(level = "info", skip_all, fields(recipient = ?recipient.map(SenderId::as_str)))]
    pub async fn route(
        &self,
        recipient: Option<&SenderId>,
        reply_to: Option<&MessageId>,
        text: &str,
    ) -> ReplyOutcome {
        let Some(recipient) = recipient else {
            tracing::info!("no recipient id on the inbound event; reply not sent");
            return ReplyOutcome::Skipped("missing recipient id");
        };
        let Some(adapter) = self.adapter.as_ref() else {
            tracing::info!("page access token not configured; reply not sent");
            return ReplyOutcome::Skipped("access token not configured");
        };

        let message = OutboundMessage::text(text).replying_to(reply_to.cloned());
        match tokio::time::timeout(self.timeout, adapter.send(recipient.as_str(), message)).await
        {
            Ok(Ok(receipt)) => {
                tracing::info!(
                    channel = adapter.channel_id(),
                    message_id = ?receipt.message_id,
                    "reply delivered"
                );
                ReplyOutcome::Sent(receipt)
            }
            Ok(Err(error)) => {
                tracing::warn!(channel = adapter.channel_id(), error = %error, "reply send failed");
                ReplyOutcome::Failed(error.to_string())
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(channel = adapter.channel_id(), timeout_ms, "reply send timed out");
                ReplyOutcome::Failed(format!("reply send timed out after {timeout_ms}ms"))
            }
        }
    }
}
