//! Persisted job run correlated with scheduler events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::event::Event;
use crate::id::JobId;

/// One external job run, keyed by its scheduler cluster id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub condor_id: String,
    pub invocation_id: String,
    pub app_id: String,
    pub submitter: String,
    pub exit_code: i32,
    pub failure_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Submission details registered by the upstream service for a cluster id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Submission {
    pub invocation_id: String,
    pub app_id: String,
    pub submitter: String,
}

impl Job {
    /// A job seen for the first time, with nothing known beyond its cluster id.
    pub fn new(condor_id: impl Into<String>) -> DomainResult<Self> {
        let condor_id = condor_id.into();
        if condor_id.is_empty() {
            return Err(DomainError::validation("cluster id must not be empty"));
        }
        Ok(Self {
            id: JobId::new(),
            condor_id,
            invocation_id: String::new(),
            app_id: String::new(),
            submitter: String::new(),
            exit_code: 0,
            failure_count: 0,
            updated_at: Utc::now(),
        })
    }

    /// Store an event's exit code on the job.
    ///
    /// Any non-zero code bumps the failure count, so the "not set" sentinel
    /// counts as a failure rather than passing for success. Returns whether
    /// the count changed.
    pub fn record_exit_code(&mut self, exit_code: i32) -> bool {
        self.exit_code = exit_code;
        self.updated_at = Utc::now();
        if exit_code != 0 {
            self.failure_count += 1;
            true
        } else {
            false
        }
    }

    /// Overwrite who submitted the job and under which invocation.
    pub fn apply_submission(&mut self, submission: &Submission) {
        self.invocation_id = submission.invocation_id.clone();
        self.app_id = submission.app_id.clone();
        self.submitter = submission.submitter.clone();
        self.updated_at = Utc::now();
    }

    /// Copy the submission details onto an event.
    pub fn enrich(&self, event: &mut Event) {
        event.condor_id = self.condor_id.clone();
        event.invocation_id = self.invocation_id.clone();
        event.app_id = self.app_id.clone();
        event.user = self.submitter.clone();
    }
}
