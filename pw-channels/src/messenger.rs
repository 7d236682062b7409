use crate::traits::ChannelAdapter;
use crate::types::{OutboundMessage, PageId, SendReceipt};
use anyhow::{Result, anyhow};
use reqwest::Url;
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v20.0";

/// Messenger Send API client for a single page.
#[derive(Clone)]
pub struct MessengerAdapter {
    http: reqwest::Client,
    access_token: String,
    page_id: Option<PageId>,
    graph_base_url: Url,
    api_version: String,
}

impl MessengerAdapter {
    pub fn new(access_token: &str, page_id: Option<&str>, timeout: Duration) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("messenger page access token is required"));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            page_id: PageId::non_blank(page_id),
            graph_base_url: Url::parse(DEFAULT_GRAPH_BASE_URL)?,
            api_version: DEFAULT_GRAPH_API_VERSION.to_string(),
        })
    }

    pub fn with_graph_base_url(mut self, base_url: &str) -> Result<Self> {
        self.graph_base_url = Url::parse(base_url.trim())
            .map_err(|e| anyhow!("invalid graph base url {base_url:?}: {e}"))?;
        Ok(self)
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        let api_version = api_version.trim().trim_matches('/');
        if !api_version.is_empty() {
            self.api_version = api_version.to_string();
        }
        self
    }

    /// `{base}/{version}/{page_id}/messages`; `me` stands in for the page
    /// owning the token when no page id is configured.
    pub fn messages_url(&self) -> Result<Url> {
        let page = self.page_id.as_ref().map(PageId::as_str).unwrap_or("me");
        let base = self.graph_base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}/{page}/messages", self.api_version))
            .map_err(|e| anyhow!("invalid messenger send API URL: {e}"))
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn channel_id(&self) -> &str {
        "messenger"
    }

    #[tracing::instrument(level = "info", skip_all, fields(recipient_id = %recipient_id))]
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<SendReceipt> {
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient_id (page-scoped id) is required"));
        }
        let text = message.content.trim();
        if text.is_empty() {
            return Err(anyhow!("message content is empty"));
        }

        let url = self.messages_url()?;
        let mut payload = serde_json::json!({
            "recipient": { "id": to },
            "messaging_type": "RESPONSE",
            "message": { "text": text },
        });
        if let Some(mid) = message.reply_to_message_id.as_ref() {
            payload["reply_to"] = serde_json::json!({ "mid": mid.as_str() });
        }

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "messenger send failed: status={} body={}",
                status,
                body
            ));
        }

        let receipt: SendReceipt = serde_json::from_str(&body)
            .map_err(|e| anyhow!("messenger send returned unparseable body: {e}"))?;
        tracing::debug!(message_id = ?receipt.message_id, "messenger send accepted");
        Ok(receipt)
    }
}
