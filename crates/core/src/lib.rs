//! `jex-events-core` — scheduler event domain.
//!
//! Typed events parsed from scheduler log lines, the job runs they belong to,
//! and the event-number catalog. No I/O lives here.

pub mod catalog;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod parser;

pub use catalog::{CATALOG, CatalogDefinition, CatalogEntry};
pub use error::{DomainError, DomainResult};
pub use event::{EXIT_CODE_NOT_SET, Event, JOB_ABORTED, JOB_TERMINATED};
pub use id::{CatalogId, JobEventId, JobId, RawEventId};
pub use job::{Job, Submission};
