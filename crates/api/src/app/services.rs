use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use jex_events_infra::{
    config::Configuration,
    notify::{EventNotifier, HttpNotifier},
    store::{JobEventStore, PostgresJobEventStore},
    workers::DispatchContext,
};

const MAX_DB_CONNECTIONS: u32 = 5;

/// Collaborators shared by the admin listener and the dispatch loop.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn JobEventStore>,
    pub notifier: Arc<dyn EventNotifier>,
}

impl AppServices {
    pub fn new(store: Arc<dyn JobEventStore>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self { store, notifier }
    }

    pub fn dispatch_context(&self) -> DispatchContext {
        DispatchContext::new(self.store.clone(), self.notifier.clone())
    }
}

/// Connect to Postgres, prepare the schema and build the HTTP notifier.
pub async fn build_services(config: &Configuration) -> anyhow::Result<AppServices> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect(&config.db_uri)
        .await
        .context("failed to connect to the database")?;

    let store = PostgresJobEventStore::new(pool);
    store
        .prepare()
        .await
        .context("failed to prepare the database schema")?;
    info!("database ready");

    let notifier = HttpNotifier::new(config.event_url.clone(), config.jex_url())
        .context("failed to build the event notifier")?;

    Ok(AppServices::new(Arc::new(store), Arc::new(notifier)))
}
