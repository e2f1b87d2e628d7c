use chrono::{DateTime, Utc};
use serde::Serialize;

use jex_events_core::Job;

/// JSON shape of a job on the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub condor_id: String,
    pub invocation_id: String,
    pub app_id: String,
    pub submitter: String,
    pub exit_code: i32,
    pub failure_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            condor_id: job.condor_id,
            invocation_id: job.invocation_id,
            app_id: job.app_id,
            submitter: job.submitter,
            exit_code: job.exit_code,
            failure_count: job.failure_count,
            updated_at: job.updated_at,
        }
    }
}
