use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use jex_events_core::Submission;

use crate::app::dto::JobResponse;
use crate::app::errors::{json_error, store_error_to_response};
use crate::app::services::AppServices;

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(condor_id): Path<String>,
) -> axum::response::Response {
    match services.store.job_by_condor_id(&condor_id).await {
        Ok(Some(job)) => Json(JobResponse::from(job)).into_response(),
        Ok(None) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no job with cluster id {condor_id}"),
        ),
        Err(e) => store_error_to_response(e),
    }
}

/// Register who submitted the job with this cluster id.
pub async fn put_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(condor_id): Path<String>,
    Json(submission): Json<Submission>,
) -> axum::response::Response {
    match services.store.record_submission(&condor_id, &submission).await {
        Ok(job) => {
            info!(
                condor_id = %job.condor_id,
                invocation_id = %job.invocation_id,
                submitter = %job.submitter,
                "submission recorded"
            );
            Json(JobResponse::from(job)).into_response()
        }
        Err(e) => store_error_to_response(e),
    }
}
