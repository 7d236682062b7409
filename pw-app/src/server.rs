//! pagewire server.
//!
//! Wires the ledger, model client and Messenger adapter into one `AppState` and
//! mounts the webhook routes behind the shared HTTP layers.

use crate::config::RelayConfig;
use crate::dispatcher::ModelDispatcher;
use crate::ledger::SharedLedger;
use crate::pipeline::Pipeline;
use crate::reply::ReplyRouter;
use crate::routes;
use crate::signature::{SignatureVerifier, verifier_for};
use crate::usage_headers::{self, UsageClock};
use crate::verifier::SubscriptionVerifier;
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use pw_channels::{ChannelAdapter, MessengerAdapter, OutboundMessage};
use pw_llm::LlmClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub pipeline: Pipeline,
    pub handshake: SubscriptionVerifier,
    pub signatures: Box<dyn SignatureVerifier>,
}

impl AppState {
    pub fn from_config(cfg: &RelayConfig) -> Result<Self> {
        let ledger = SharedLedger::new(cfg.ledger.capacity);
        let model = LlmClient::new(&cfg.model.host, &cfg.model.model, cfg.model_timeout())?
            .with_keep_alive(cfg.model.keep_alive.clone());
        let dispatcher = ModelDispatcher::new(Arc::new(model), ledger.clone(), cfg.model_timeout())
            .with_system_prompt(cfg.system_prompt());
        let replies = ReplyRouter::new(build_messenger(cfg)?, cfg.reply_timeout());

        Ok(Self {
            pipeline: Pipeline::new(ledger, cfg.ledger.context_window, dispatcher, replies),
            handshake: SubscriptionVerifier::new(cfg.verify_token()),
            signatures: verifier_for(cfg.app_secret()),
        })
    }
}

/// `None` when no page access token is configured.
fn build_messenger(cfg: &RelayConfig) -> Result<Option<Arc<dyn ChannelAdapter>>> {
    let Some(token) = cfg.access_token() else {
        return Ok(None);
    };
    let adapter = MessengerAdapter::new(token, cfg.messenger.page_id.as_deref(), cfg.reply_timeout())?
        .with_graph_base_url(&cfg.messenger.graph_base_url)?
        .with_api_version(&cfg.messenger.api_version);
    Ok(Some(Arc::new(adapter)))
}

/// Routes plus the per-request headers. Transport layers are added by `serve`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let clock = UsageClock::new(state.pipeline.ledger().clone());
    routes::router()
        .layer(axum::middleware::from_fn(usage_headers::usage_headers))
        .layer(Extension(clock))
        .layer(Extension(state))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let state = AppState::from_config(&cfg)?;
    tracing::info!(
        bind_addr = %cfg.server.bind_addr(),
        model = %cfg.model.model,
        model_host = %cfg.model.host,
        keep_alive = %cfg.model.keep_alive,
        ledger_capacity = cfg.ledger.capacity,
        context_window = ?cfg.ledger.context_window,
        handshake_configured = state.handshake.is_configured(),
        signature_verifier = state.signatures.describe(),
        replies_enabled = state.pipeline.replies_enabled(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(config_path: Option<PathBuf>, recipient: &str, message: &str) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let Some(adapter) = build_messenger(&cfg)? else {
        return Err(anyhow::anyhow!(
            "messenger.access_token (or PAGE_ACCESS_TOKEN) is required to send"
        ));
    };
    let receipt = adapter.send(recipient, OutboundMessage::text(message)).await?;
    tracing::info!(
        recipient,
        message_id = ?receipt.message_id,
        "one-shot message sent"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let addr = cfg.server.bind_addr();
    let state = Arc::new(AppState::from_config(&cfg)?);
    tracing::info!(
        bind_addr = %addr,
        model = %state.pipeline.model_id(),
        model_host = %cfg.model.host,
        model_timeout_seconds = cfg.model.timeout_seconds,
        reply_timeout_seconds = cfg.messenger.timeout_seconds,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        ledger_capacity = cfg.ledger.capacity,
        context_window = ?cfg.ledger.context_window,
        signature_verifier = state.signatures.describe(),
        replies_enabled = state.pipeline.replies_enabled(),
        "server configuration loaded"
    );
    if !state.handshake.is_configured() {
        tracing::warn!("VERIFY_TOKEN not set; every subscription handshake will be rejected");
    }
    if cfg.app_secret().is_none() {
        tracing::warn!("APP_SECRET not set; webhook deliveries are accepted unsigned");
    }
    if !state.pipeline.replies_enabled() {
        tracing::warn!("PAGE_ACCESS_TOKEN not set; replies will be generated but not sent");
    }

    let listener = preflight_bind_listener(addr).await?;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = build_router(state)
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            cfg.http_timeout(),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let shutdown = CancellationToken::new();
    tracing::info!(%addr, "pagewire serving");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::ContextWindow;
    use crate::dispatcher::ChatModel;
    use crate::pipeline;

    pub(crate) struct TestApp {
        pub(crate) verify_token: Option<&'static str>,
        pub(crate) app_secret: Option<&'static str>,
        pub(crate) capacity: usize,
    }

    impl Default for TestApp {
        fn default() -> Self {
            Self {
                verify_token: Some("s3cret"),
                app_secret: None,
                capacity: 100,
            }
        }
    }

    impl TestApp {
        pub(crate) fn build(
            self,
            model: Arc<dyn ChatModel>,
            channel: Option<Arc<dyn ChannelAdapter>>,
        ) -> (Router, Arc<AppState>) {
            let state = Arc::new(AppState {
                pipeline: pipeline::testing::pipeline(
                    self.capacity,
                    ContextWindow::All,
                    model,
                    channel,
                ),
                handshake: SubscriptionVerifier::new(self.verify_token),
                signatures: verifier_for(self.app_secret),
            });
            (build_router(state.clone()), state)
        }
    }
}
