pub mod dashboard;
pub mod webhooks;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(dashboard::router())
        .merge(webhooks::router())
}
