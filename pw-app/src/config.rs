//! pagewire configuration loader.
//!
//! Optional TOML file, then environment overrides, then validation.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Outer bound on any request, including the full webhook pipeline.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5000
}

fn default_http_timeout_seconds() -> u64 {
    120
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret echoed back by the subscription handshake.
    #[serde(default)]
    pub verify_token: Option<String>,
    /// App secret used to check `X-Hub-Signature-256`. Unset disables the check.
    #[serde(default)]
    pub app_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_host")]
    pub host: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    #[serde(default = "default_model_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model_host() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_keep_alive() -> String {
    pw_llm::DEFAULT_KEEP_ALIVE.to_string()
}

fn default_model_timeout_seconds() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: default_model_host(),
            model: String::new(),
            keep_alive: default_keep_alive(),
            timeout_seconds: default_model_timeout_seconds(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessengerConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_reply_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_graph_base_url() -> String {
    pw_channels::DEFAULT_GRAPH_BASE_URL.to_string()
}

fn default_api_version() -> String {
    pw_channels::DEFAULT_GRAPH_API_VERSION.to_string()
}

fn default_reply_timeout_seconds() -> u64 {
    15
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            page_id: None,
            graph_base_url: default_graph_base_url(),
            api_version: default_api_version(),
            timeout_seconds: default_reply_timeout_seconds(),
        }
    }
}

/// How much of the ledger the model sees per dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextWindow {
    /// Only the most recent qualifying turn.
    Latest,
    /// Every qualifying turn, oldest first.
    #[default]
    All,
}

impl ContextWindow {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "latest" | "1" => Ok(Self::Latest),
            "all" => Ok(Self::All),
            other => Err(anyhow::anyhow!(
                "unsupported context window {other:?}; expected one of: latest, 1, all"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub context_window: ContextWindow,
}

fn default_ledger_capacity() -> usize {
    100
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: default_ledger_capacity(),
            context_window: ContextWindow::default(),
        }
    }
}

impl RelayConfig {
    /// Load from `path` (or the default location), tolerating a missing file.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<RelayConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(config_path = %path.display(), "no config file; using defaults");
                RelayConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("VERIFY_TOKEN") {
            self.webhook.verify_token = Some(v);
        }
        if let Some(v) = var("APP_SECRET") {
            self.webhook.app_secret = Some(v);
        }
        if let Some(v) = var("OLLAMA_HOST") {
            self.model.host = v;
        }
        if let Some(v) = var("MODEL") {
            self.model.model = v;
        }
        if let Some(v) = var("PAGEWIRE_SYSTEM_PROMPT") {
            self.model.system_prompt = Some(v);
        }
        if let Some(v) = var("PAGE_ACCESS_TOKEN") {
            self.messenger.access_token = Some(v);
        }
        if let Some(v) = var("PAGE_ID") {
            self.messenger.page_id = Some(v);
        }
        if let Some(v) = var("PORT") {
            self.server.port = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT={v:?}: {e}"))?;
        }
        if let Some(v) = var("PAGEWIRE_BIND_IP") {
            self.server.bind_ip = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PAGEWIRE_BIND_IP={v:?}: {e}"))?;
        }
        if let Some(v) = var("PAGEWIRE_LEDGER_CAPACITY") {
            self.ledger.capacity = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PAGEWIRE_LEDGER_CAPACITY={v:?}: {e}"))?;
        }
        if let Some(v) = var("PAGEWIRE_CONTEXT_WINDOW") {
            self.ledger.context_window = ContextWindow::parse(&v)?;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.model.model.trim().is_empty() {
            return Err(anyhow::anyhow!("model.model (or MODEL) is required"));
        }
        if self.model.host.trim().is_empty() {
            return Err(anyhow::anyhow!("model.host (or OLLAMA_HOST) is required"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.ledger.capacity == 0 {
            return Err(anyhow::anyhow!("ledger.capacity must be > 0"));
        }
        if self.model.timeout_seconds == 0 || self.messenger.timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "model.timeout_seconds and messenger.timeout_seconds must be > 0"
            ));
        }
        let stage_budget = self
            .model
            .timeout_seconds
            .checked_add(self.messenger.timeout_seconds)
            .ok_or_else(|| {
                anyhow::anyhow!("model.timeout_seconds + messenger.timeout_seconds overflows")
            })?;
        if self.server.http_timeout_seconds <= stage_budget {
            return Err(anyhow::anyhow!(
                "server.http_timeout_seconds ({}) must exceed model + messenger timeouts ({stage_budget})",
                self.server.http_timeout_seconds
            ));
        }
        Ok(())
    }

    pub fn verify_token(&self) -> Option<&str> {
        non_blank(self.webhook.verify_token.as_deref())
    }

    pub fn app_secret(&self) -> Option<&str> {
        non_blank(self.webhook.app_secret.as_deref())
    }

    pub fn access_token(&self) -> Option<&str> {
        non_blank(self.messenger.access_token.as_deref())
    }

    pub fn system_prompt(&self) -> Option<&str> {
        non_blank(self.model.system_prompt.as_deref())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_seconds)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.messenger.timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.server.http_timeout_seconds)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("PAGEWIRE_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path.trim());
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".pagewire").join("config.toml")
}
