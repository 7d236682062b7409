use crate::server::AppState;
use crate::signature::{SIGNATURE_HEADER, SignatureCheck};
use crate::verifier::{HandshakeOutcome, HandshakeQuery, VERIFICATION_FAILED_MESSAGE};
use axum::Extension;
use axum::extract::{ConnectInfo, Query, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use pw_channels::PlatformEvent;
use std::net::SocketAddr;
use std::sync::Arc;

pub const RECEIVED_BODY: &str = "Received";

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn router() -> axum::Router {
    axum::Router::new().route("/webhooks", get(verify_subscription).post(receive_event))
}

#[tracing::instrument(level = "info", skip_all)]
async fn verify_subscription(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    match state.handshake.verify(&query) {
        HandshakeOutcome::Accepted { challenge } => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        HandshakeOutcome::Rejected => {
            tracing::warn!(mode = ?query.mode, "webhook subscription rejected");
            (StatusCode::FORBIDDEN, VERIFICATION_FAILED_MESSAGE).into_response()
        }
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn receive_event(Extension(state): Extension<Arc<AppState>>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();
    let headers = parts.headers;
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "webhook body unreadable");
            return (StatusCode::BAD_REQUEST, "Unreadable body").into_response();
        }
    };
    tracing::debug!(body_bytes = body.len(), "webhook delivery received");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let SignatureCheck::Rejected(reason) = state.signatures.verify(&body, signature) {
        tracing::warn!(
            verifier = state.signatures.describe(),
            reason,
            "webhook delivery failed signature check"
        );
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let event = PlatformEvent::from_slice(&body);
    let source = source_address(&headers, peer);
    state.pipeline.ingest_to_completion(source, event).await;
    (StatusCode::OK, RECEIVED_BODY).into_response()
}

/// First `x-forwarded-for` hop when behind a proxy, else the socket peer.
fn source_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}
