//! Postgres-backed job/event store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | RowNotFound | N/A | `NotFound` |
//! | PoolClosed / Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use jex_events_core::{
    CATALOG, CatalogEntry, CatalogId, Job, JobEventId, JobId, RawEventId, Submission,
};

use super::r#trait::{JobEventStore, StoreError};

/// Schema applied by [`PostgresJobEventStore::prepare`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_jobs.sql");

const JOB_COLUMNS: &str =
    "id, condor_id, invocation_id, app_id, submitter, exit_code, failure_count, updated_at";

/// Postgres-backed job/event store.
///
/// Uses the SQLx connection pool, so it is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresJobEventStore {
    pool: Arc<PgPool>,
}

impl PostgresJobEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create missing tables and seed the event catalog.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("prepare", e))?;
        self.ensure_catalog().await
    }

    /// Upsert every catalog definition, keeping existing row ids.
    #[instrument(skip(self), err)]
    pub async fn ensure_catalog(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("ensure_catalog", e))?;

        for def in CATALOG {
            sqlx::query(
                r#"
                INSERT INTO condor_events (id, event_number, event_name, event_desc)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (event_number)
                DO UPDATE SET event_name = EXCLUDED.event_name, event_desc = EXCLUDED.event_desc
                "#,
            )
            .bind(*CatalogId::new().as_uuid())
            .bind(def.event_number)
            .bind(def.name)
            .bind(def.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("ensure_catalog", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("ensure_catalog", e))?;
        info!(entries = CATALOG.len(), "event catalog ensured");
        Ok(())
    }
}

#[async_trait]
impl JobEventStore for PostgresJobEventStore {
    #[instrument(skip(self), err)]
    async fn fetch_or_create_job(&self, condor_id: &str) -> Result<Job, StoreError> {
        let candidate = Job::new(condor_id)?;
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (id, condor_id, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (condor_id) DO UPDATE SET condor_id = EXCLUDED.condor_id
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(candidate.id.as_uuid())
        .bind(&candidate.condor_id)
        .bind(candidate.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_or_create_job", e))?;

        job_from_row(&row)
    }

    #[instrument(skip(self, job), fields(condor_id = %job.condor_id), err)]
    async fn update_job(&self, job: &Job) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET exit_code = $2, failure_count = $3, updated_at = $4
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id.as_uuid())
        .bind(job.exit_code)
        .bind(job.failure_count)
        .bind(job.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?
        .ok_or_else(|| StoreError::NotFound(format!("job {}", job.id)))?;

        job_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn event_exists_by_hash(&self, hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM condor_job_events WHERE hash = $1)")
            .bind(hash)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("event_exists_by_hash", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| map_sqlx_error("event_exists_by_hash", e))
    }

    #[instrument(skip(self, text), fields(job_id = %job_id), err)]
    async fn insert_raw_event(&self, text: &str, job_id: JobId) -> Result<RawEventId, StoreError> {
        let id = RawEventId::new();
        sqlx::query("INSERT INTO condor_raw_events (id, job_id, event_text) VALUES ($1, $2, $3)")
            .bind(id.as_uuid())
            .bind(job_id.as_uuid())
            .bind(text)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_raw_event", e))?;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    async fn lookup_catalog_entry(&self, event_number: &str) -> Result<CatalogEntry, StoreError> {
        let row = sqlx::query(
            "SELECT id, event_number, event_name, event_desc FROM condor_events WHERE event_number = $1",
        )
        .bind(event_number)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lookup_catalog_entry", e))?
        .ok_or_else(|| StoreError::NotFound(format!("catalog entry {event_number:?}")))?;

        let entry = CatalogRow::from_row(&row)
            .map_err(|e| map_sqlx_error("lookup_catalog_entry", e))?;
        Ok(entry.into())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn insert_job_event(
        &self,
        job_id: JobId,
        catalog_id: CatalogId,
        raw_event_id: RawEventId,
        hash: &str,
    ) -> Result<JobEventId, StoreError> {
        let id = JobEventId::new();
        sqlx::query(
            r#"
            INSERT INTO condor_job_events (id, job_id, condor_event_id, condor_raw_event_id, hash)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .bind(catalog_id.as_uuid())
        .bind(raw_event_id.as_uuid())
        .bind(hash)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job_event", e))?;
        Ok(id)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn upsert_last_job_event(
        &self,
        job_event_id: JobEventId,
        job_id: JobId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO last_condor_job_events (job_id, condor_job_event_id)
            VALUES ($1, $2)
            ON CONFLICT (job_id) DO UPDATE SET condor_job_event_id = EXCLUDED.condor_job_event_id
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(job_event_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_last_job_event", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn job_by_condor_id(&self, condor_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE condor_id = $1"))
            .bind(condor_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_by_condor_id", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, submission), err)]
    async fn record_submission(
        &self,
        condor_id: &str,
        submission: &Submission,
    ) -> Result<Job, StoreError> {
        let mut candidate = Job::new(condor_id)?;
        candidate.apply_submission(submission);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (id, condor_id, invocation_id, app_id, submitter, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (condor_id) DO UPDATE
            SET invocation_id = EXCLUDED.invocation_id,
                app_id = EXCLUDED.app_id,
                submitter = EXCLUDED.submitter,
                updated_at = EXCLUDED.updated_at
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(candidate.id.as_uuid())
        .bind(&candidate.condor_id)
        .bind(&candidate.invocation_id)
        .bind(&candidate.app_id)
        .bind(&candidate.submitter)
        .bind(candidate.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_submission", e))?;

        job_from_row(&row)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    JobRow::from_row(row)
        .map(Job::from)
        .map_err(|e| StoreError::Storage(format!("failed to deserialize job row: {e}")))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

struct JobRow {
    id: Uuid,
    condor_id: String,
    invocation_id: String,
    app_id: String,
    submitter: String,
    exit_code: i32,
    failure_count: i32,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            condor_id: row.try_get("condor_id")?,
            invocation_id: row.try_get("invocation_id")?,
            app_id: row.try_get("app_id")?,
            submitter: row.try_get("submitter")?,
            exit_code: row.try_get("exit_code")?,
            failure_count: row.try_get("failure_count")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::from_uuid(row.id),
            condor_id: row.condor_id,
            invocation_id: row.invocation_id,
            app_id: row.app_id,
            submitter: row.submitter,
            exit_code: row.exit_code,
            failure_count: row.failure_count,
            updated_at: row.updated_at,
        }
    }
}

struct CatalogRow {
    id: Uuid,
    event_number: String,
    event_name: String,
    event_desc: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for CatalogRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(CatalogRow {
            id: row.try_get("id")?,
            event_number: row.try_get("event_number")?,
            event_name: row.try_get("event_name")?,
            event_desc: row.try_get("event_desc")?,
        })
    }
}

impl From<CatalogRow> for CatalogEntry {
    fn from(row: CatalogRow) -> Self {
        CatalogEntry {
            id: CatalogId::from_uuid(row.id),
            event_number: row.event_number,
            name: row.event_name,
            description: row.event_desc,
        }
    }
}
