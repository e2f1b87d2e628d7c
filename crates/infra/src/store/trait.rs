use async_trait::async_trait;
use thiserror::Error;

use jex_events_core::{
    CatalogEntry, CatalogId, DomainError, Job, JobEventId, JobId, RawEventId, Submission,
};

/// Job/event store operation error.
///
/// These are **infrastructure errors** (storage, missing rows, constraint
/// violations) as opposed to domain errors. The dispatch loop treats every one
/// of them as message-scoped: it logs and skips the rest of that message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    Invalid(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence collaborator of the dispatch loop.
///
/// ## Records
///
/// - **Job**: one scheduler job run, keyed by cluster id (never deleted here)
/// - **Raw event**: the verbatim scheduler text, linked to its job
/// - **Catalog entry**: meaning of an event number (read-only reference data)
/// - **Job event**: raw event + catalog entry + job + content hash; the hash is
///   unique and is what duplicate detection looks at
/// - **Last job event**: per-job pointer to the most recent job event
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - be safe to share between tasks (the admin listener and a dispatch loop
///   may call concurrently)
/// - make `fetch_or_create_job` idempotent per cluster id
/// - report every failure; nothing is silently swallowed
#[async_trait]
pub trait JobEventStore: Send + Sync {
    /// Fetch the job for a cluster id, creating it on first sight.
    async fn fetch_or_create_job(&self, condor_id: &str) -> Result<Job, StoreError>;

    /// Persist exit code and failure count of a job and return the stored row.
    ///
    /// Submission details are owned by `record_submission` and left as stored,
    /// so a submission recorded after `job` was fetched is kept.
    async fn update_job(&self, job: &Job) -> Result<Job, StoreError>;

    /// Whether a job event with this content hash was already stored.
    async fn event_exists_by_hash(&self, hash: &str) -> Result<bool, StoreError>;

    /// Store the verbatim event text for a job.
    async fn insert_raw_event(&self, text: &str, job_id: JobId) -> Result<RawEventId, StoreError>;

    /// Look up the catalog entry of an event number.
    async fn lookup_catalog_entry(&self, event_number: &str) -> Result<CatalogEntry, StoreError>;

    /// Link raw event, catalog entry and job under a content hash.
    async fn insert_job_event(
        &self,
        job_id: JobId,
        catalog_id: CatalogId,
        raw_event_id: RawEventId,
        hash: &str,
    ) -> Result<JobEventId, StoreError>;

    /// Point the job's "last event" at `job_event_id`.
    async fn upsert_last_job_event(
        &self,
        job_event_id: JobEventId,
        job_id: JobId,
    ) -> Result<(), StoreError>;

    /// Job for a cluster id, if it has been seen.
    async fn job_by_condor_id(&self, condor_id: &str) -> Result<Option<Job>, StoreError>;

    /// Register who submitted a job, creating the job if needed.
    async fn record_submission(
        &self,
        condor_id: &str,
        submission: &Submission,
    ) -> Result<Job, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
