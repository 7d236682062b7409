use crate::types::{OutboundMessage, SendReceipt};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier, e.g. "messenger".
    fn channel_id(&self) -> &str;

    /// Send one message to a platform-scoped recipient.
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<SendReceipt>;
}
