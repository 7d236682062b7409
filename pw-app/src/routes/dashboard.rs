use crate::ledger::LedgerEntry;
use crate::server::AppState;
use axum::Extension;
use axum::response::Html;
use axum::routing::get;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/", get(get_dashboard))
}

/// Read-only view of the ledger.
#[tracing::instrument(level = "debug", skip_all)]
async fn get_dashboard(Extension(state): Extension<Arc<AppState>>) -> Html<String> {
    let (entries, usage) = state.pipeline.ledger().snapshot_with_usage().await;
    let entries: Vec<&LedgerEntry> = entries.iter().map(AsRef::as_ref).collect();
    let body = match serde_json::to_string_pretty(&entries) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "ledger serialization failed");
            "[]".to_string()
        }
    };
    Html(format!(
        "<h3>Total Updates: {}&nbsp;<small>Caching only {} updates</small></h3><pre>{}</pre>",
        usage.used,
        usage.capacity,
        escape_html(&body)
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
