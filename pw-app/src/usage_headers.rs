//! Timing and ledger-usage response headers, set on every request.

use crate::ledger::SharedLedger;
use axum::Extension;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

pub const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time");
pub const CACHED_USAGE_HEADER: HeaderName = HeaderName::from_static("x-cached-usage");
pub const PREVIOUS_UPDATE_HEADER: HeaderName =
    HeaderName::from_static("x-previous-update-timestamp");

/// Shared by every request in the process.
#[derive(Debug, Clone)]
pub struct UsageClock {
    ledger: SharedLedger,
    /// Epoch millis of the last completed request; starts at process start.
    previous_completion_ms: Arc<AtomicI64>,
}

impl UsageClock {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            previous_completion_ms: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    /// Stamp a completion and return the one before it.
    fn swap_completion(&self) -> i64 {
        self.previous_completion_ms
            .swap(Utc::now().timestamp_millis(), Ordering::AcqRel)
    }
}

pub async fn usage_headers(
    Extension(clock): Extension<UsageClock>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis();
    let usage = clock.ledger.usage().await;
    let previous = clock.swap_completion();

    let headers = response.headers_mut();
    insert(headers, RESPONSE_TIME_HEADER, format!("{elapsed_ms}ms"));
    insert(
        headers,
        CACHED_USAGE_HEADER,
        format!("{}/{}", usage.used, usage.capacity),
    );
    insert(headers, PREVIOUS_UPDATE_HEADER, previous.to_string());
    response
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::warn!(header = %name, error = %e, "skipping invalid header value"),
    }
}
