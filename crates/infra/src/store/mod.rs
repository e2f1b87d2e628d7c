//! Job/event persistence.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryJobEventStore, JobEventRecord};
pub use postgres::PostgresJobEventStore;
pub use r#trait::{JobEventStore, StoreError};
