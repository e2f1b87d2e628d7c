use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use tracing::warn;

use crate::app::errors::json_error;
use crate::app::services::AppServices;

pub async fn greeting() -> &'static str {
    "Hello from jex-events.\n"
}

/// 200 while the store answers, 503 otherwise.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            warn!(error = %err, "health check failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", err.to_string())
        }
    }
}
