use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use jex_events_core::{
    CATALOG, CatalogEntry, CatalogId, Job, JobEventId, JobId, RawEventId, Submission,
};

use super::r#trait::{JobEventStore, StoreError};

/// Stored job event (raw event + catalog entry + job, keyed by hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEventRecord {
    pub id: JobEventId,
    pub job_id: JobId,
    pub catalog_id: CatalogId,
    pub raw_event_id: RawEventId,
    pub hash: String,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, Job>,
    raw_events: HashMap<RawEventId, (JobId, String)>,
    catalog: HashMap<String, CatalogEntry>,
    job_events: Vec<JobEventRecord>,
    hashes: HashSet<String>,
    last_events: HashMap<JobId, JobEventId>,
    failing: HashSet<&'static str>,
}

/// In-memory job/event store.
///
/// Intended for tests/dev. Seeded with the full event catalog.
#[derive(Debug)]
pub struct InMemoryJobEventStore {
    state: RwLock<State>,
}

impl Default for InMemoryJobEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobEventStore {
    pub fn new() -> Self {
        let catalog = CATALOG
            .iter()
            .map(|def| (def.event_number.to_string(), CatalogEntry::from(def)))
            .collect();
        Self {
            state: RwLock::new(State {
                catalog,
                ..State::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.read()?.failing.contains(operation) {
            return Err(StoreError::Storage(format!("{operation} unavailable")));
        }
        Ok(())
    }

    /// Make every call to `operation` (trait method name) fail until cleared.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut state) = self.state.write() {
            state.failing.insert(operation);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.write() {
            state.failing.clear();
        }
    }

    pub fn raw_event_count(&self) -> usize {
        self.read().map(|s| s.raw_events.len()).unwrap_or_default()
    }

    pub fn job_events(&self) -> Vec<JobEventRecord> {
        self.read().map(|s| s.job_events.clone()).unwrap_or_default()
    }

    pub fn last_event_of(&self, job_id: JobId) -> Option<JobEventId> {
        self.read().ok()?.last_events.get(&job_id).copied()
    }

    pub fn job_count(&self) -> usize {
        self.read().map(|s| s.jobs.len()).unwrap_or_default()
    }
}

#[async_trait]
impl JobEventStore for InMemoryJobEventStore {
    async fn fetch_or_create_job(&self, condor_id: &str) -> Result<Job, StoreError> {
        self.check("fetch_or_create_job")?;
        let mut state = self.write()?;
        if let Some(job) = state.jobs.get(condor_id) {
            return Ok(job.clone());
        }
        let job = Job::new(condor_id)?;
        state.jobs.insert(condor_id.to_string(), job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &Job) -> Result<Job, StoreError> {
        self.check("update_job")?;
        let mut state = self.write()?;
        match state.jobs.get_mut(&job.condor_id) {
            Some(stored) if stored.id == job.id => {
                stored.exit_code = job.exit_code;
                stored.failure_count = job.failure_count;
                stored.updated_at = job.updated_at;
                Ok(stored.clone())
            }
            _ => Err(StoreError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn event_exists_by_hash(&self, hash: &str) -> Result<bool, StoreError> {
        self.check("event_exists_by_hash")?;
        Ok(self.read()?.hashes.contains(hash))
    }

    async fn insert_raw_event(&self, text: &str, job_id: JobId) -> Result<RawEventId, StoreError> {
        self.check("insert_raw_event")?;
        let mut state = self.write()?;
        if !state.jobs.values().any(|j| j.id == job_id) {
            return Err(StoreError::NotFound(format!("job {job_id}")));
        }
        let id = RawEventId::new();
        state.raw_events.insert(id, (job_id, text.to_string()));
        Ok(id)
    }

    async fn lookup_catalog_entry(&self, event_number: &str) -> Result<CatalogEntry, StoreError> {
        self.check("lookup_catalog_entry")?;
        self.read()?
            .catalog
            .get(event_number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("catalog entry {event_number:?}")))
    }

    async fn insert_job_event(
        &self,
        job_id: JobId,
        catalog_id: CatalogId,
        raw_event_id: RawEventId,
        hash: &str,
    ) -> Result<JobEventId, StoreError> {
        self.check("insert_job_event")?;
        let mut state = self.write()?;
        if !state.hashes.insert(hash.to_string()) {
            return Err(StoreError::Conflict(format!("job event hash {hash} exists")));
        }
        let id = JobEventId::new();
        state.job_events.push(JobEventRecord {
            id,
            job_id,
            catalog_id,
            raw_event_id,
            hash: hash.to_string(),
        });
        Ok(id)
    }

    async fn upsert_last_job_event(
        &self,
        job_event_id: JobEventId,
        job_id: JobId,
    ) -> Result<(), StoreError> {
        self.check("upsert_last_job_event")?;
        self.write()?.last_events.insert(job_id, job_event_id);
        Ok(())
    }

    async fn job_by_condor_id(&self, condor_id: &str) -> Result<Option<Job>, StoreError> {
        self.check("job_by_condor_id")?;
        Ok(self.read()?.jobs.get(condor_id).cloned())
    }

    async fn record_submission(
        &self,
        condor_id: &str,
        submission: &Submission,
    ) -> Result<Job, StoreError> {
        self.check("record_submission")?;
        let mut state = self.write()?;
        if !state.jobs.contains_key(condor_id) {
            let job = Job::new(condor_id)?;
            state.jobs.insert(condor_id.to_string(), job);
        }
        let job = state
            .jobs
            .get_mut(condor_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {condor_id}")))?;
        job.apply_submission(submission);
        Ok(job.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check("ping")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_or_create_is_idempotent() {
        let store = InMemoryJobEventStore::new();
        let first = store.fetch_or_create_job("12").await.unwrap();
        let second = store.fetch_or_create_job("12").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn empty_cluster_id_is_rejected() {
        let store = InMemoryJobEventStore::new();
        let err = store.fetch_or_create_job("").await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_persists_failure_count() {
        let store = InMemoryJobEventStore::new();
        let mut job = store.fetch_or_create_job("3").await.unwrap();
        job.record_exit_code(1);
        store.update_job(&job).await.unwrap();

        let stored = store.job_by_condor_id("3").await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.exit_code, 1);
    }

    #[tokio::test]
    async fn update_keeps_submission_recorded_meanwhile() {
        let store = InMemoryJobEventStore::new();
        let mut stale = store.fetch_or_create_job("42").await.unwrap();
        let submission = Submission {
            invocation_id: "inv-1".to_string(),
            app_id: "app-1".to_string(),
            submitter: "ipcdev".to_string(),
        };
        store.record_submission("42", &submission).await.unwrap();

        stale.record_exit_code(2);
        let updated = store.update_job(&stale).await.unwrap();

        assert_eq!(updated.invocation_id, "inv-1");
        assert_eq!(updated.failure_count, 1);
        let stored = store.job_by_condor_id("42").await.unwrap().unwrap();
        assert_eq!(stored.submitter, "ipcdev");
        assert_eq!(stored.exit_code, 2);
    }

    #[tokio::test]
    async fn update_of_unknown_job_fails() {
        let store = InMemoryJobEventStore::new();
        let job = Job::new("77").unwrap();
        assert!(matches!(store.update_job(&job).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn job_event_hash_is_unique() {
        let store = InMemoryJobEventStore::new();
        let job = store.fetch_or_create_job("1").await.unwrap();
        let raw = store.insert_raw_event("text", job.id).await.unwrap();
        let entry = store.lookup_catalog_entry("001").await.unwrap();

        assert!(!store.event_exists_by_hash("h1").await.unwrap());
        store.insert_job_event(job.id, entry.id, raw, "h1").await.unwrap();
        assert!(store.event_exists_by_hash("h1").await.unwrap());

        let err = store
            .insert_job_event(job.id, entry.id, raw, "h1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn catalog_is_seeded() {
        let store = InMemoryJobEventStore::new();
        assert_eq!(store.lookup_catalog_entry("012").await.unwrap().name, "JOB_HELD");
        assert!(matches!(
            store.lookup_catalog_entry("999").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn submission_creates_or_updates_job() {
        let store = InMemoryJobEventStore::new();
        let submission = Submission {
            invocation_id: "inv".to_string(),
            app_id: "app".to_string(),
            submitter: "ipcdev".to_string(),
        };
        let created = store.record_submission("5", &submission).await.unwrap();
        assert_eq!(created.invocation_id, "inv");

        let fetched = store.fetch_or_create_job("5").await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.submitter, "ipcdev");
    }

    #[tokio::test]
    async fn injected_failures_apply_per_operation() {
        let store = InMemoryJobEventStore::new();
        store.fail_operation("ping");
        assert!(store.ping().await.is_err());
        assert!(store.fetch_or_create_job("1").await.is_ok());

        store.clear_failures();
        assert!(store.ping().await.is_ok());
    }
}
