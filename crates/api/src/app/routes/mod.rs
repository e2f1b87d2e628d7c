use axum::{Router, routing::get};

pub mod jobs;
pub mod system;

/// Router for every admin endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/", get(system::greeting))
        .route("/healthz", get(system::health))
        .route("/jobs/:condor_id", get(jobs::get_job).put(jobs::put_job))
}
