//! Per-connection dispatch loop.
//!
//! Drains one [`DeliveryStream`] in receipt order. Each delivery is acked
//! first, then decoded, parsed, correlated with its job, deduplicated by
//! content hash, routed downstream and persisted. A failing step only affects
//! the message at hand.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use jex_events_core::{DomainError, Event, JobEventId};

use crate::broker::{DeliveryStream, InboundDelivery};
use crate::notify::EventNotifier;
use crate::store::{JobEventStore, StoreError};

/// Collaborators shared by every dispatch loop instance.
#[derive(Clone)]
pub struct DispatchContext {
    pub store: Arc<dyn JobEventStore>,
    pub notifier: Arc<dyn EventNotifier>,
}

impl DispatchContext {
    pub fn new(store: Arc<dyn JobEventStore>, notifier: Arc<dyn EventNotifier>) -> Self {
        Self { store, notifier }
    }
}

/// Why one message was not (fully) processed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed message body {body:?}: {source}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("event text not understood: {0}")]
    Parse(#[source] DomainError),

    #[error("event carries no content hash")]
    MissingHash,

    #[error("job correlation failed: {0}")]
    Correlate(#[source] StoreError),

    #[error("duplicate check failed: {0}")]
    DuplicateCheck(#[source] StoreError),

    #[error("storing raw event failed: {0}")]
    RawEvent(#[source] StoreError),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[source] StoreError),

    #[error("storing job event failed: {0}")]
    JobEvent(#[source] StoreError),

    #[error("updating last job event failed: {0}")]
    LastEvent(#[source] StoreError),
}

impl PipelineError {
    /// Whether the message itself was unusable, as opposed to a collaborator
    /// failing while handling it.
    pub fn is_bad_message(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode { .. } | PipelineError::Parse(_) | PipelineError::MissingHash
        )
    }
}

/// Outcome of a message that went through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Stored { job_event_id: JobEventId, routed: bool },
    Duplicate,
}

/// How a dispatch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchExit {
    /// A stop was requested.
    Stopped,
    /// The delivery stream ran dry.
    StreamEnded,
    /// The delivery stream reported a transport error.
    StreamFailed(String),
    Panicked(String),
    /// The loop outlived its stop grace period and was cancelled.
    Aborted,
}

/// Handle to one running dispatch loop.
#[derive(Debug)]
pub struct DispatchHandle {
    generation: u64,
    stop: CancellationToken,
    join: Option<JoinHandle<DispatchExit>>,
    exit: Option<DispatchExit>,
}

impl DispatchHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolve once the loop has exited on its own.
    ///
    /// Cancel safe; after it resolved once it never resolves again.
    pub async fn finished(&mut self) -> DispatchExit {
        let Some(join) = self.join.as_mut() else {
            return std::future::pending().await;
        };
        let exit = exit_of(join.await);
        self.join = None;
        self.exit = Some(exit.clone());
        exit
    }

    /// Request a stop and wait for the loop to exit.
    ///
    /// A delivery already taken from the stream finishes its pipeline first.
    /// If the loop is still running after `grace`, its task is aborted.
    pub async fn stop(mut self, grace: Duration) -> DispatchExit {
        self.stop.cancel();
        let Some(mut join) = self.join.take() else {
            return self.exit.take().unwrap_or(DispatchExit::Stopped);
        };
        match tokio::time::timeout(grace, &mut join).await {
            Ok(result) => exit_of(result),
            Err(_) => {
                warn!(generation = self.generation, "dispatch loop ignored stop; aborting");
                join.abort();
                let _ = join.await;
                DispatchExit::Aborted
            }
        }
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn exit_of(result: Result<DispatchExit, JoinError>) -> DispatchExit {
    match result {
        Ok(exit) => exit,
        Err(err) if err.is_panic() => DispatchExit::Panicked(err.to_string()),
        Err(_) => DispatchExit::Aborted,
    }
}

/// Spawns dispatch loops.
#[derive(Debug)]
pub struct DispatchWorker;

impl DispatchWorker {
    /// Start draining `stream` on a new task.
    ///
    /// `generation` tells loops of successive connections apart in logs.
    pub fn spawn(
        generation: u64,
        consumer_tag: &str,
        stream: DeliveryStream,
        ctx: DispatchContext,
    ) -> DispatchHandle {
        let stop = CancellationToken::new();
        let span = info_span!("dispatch", generation, consumer_tag = %consumer_tag);
        let join = tokio::spawn(dispatch_loop(stream, ctx, stop.clone()).instrument(span));
        DispatchHandle {
            generation,
            stop,
            join: Some(join),
            exit: None,
        }
    }
}

async fn dispatch_loop(
    mut stream: DeliveryStream,
    ctx: DispatchContext,
    stop: CancellationToken,
) -> DispatchExit {
    info!("dispatch loop started");
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!("stop requested");
                return DispatchExit::Stopped;
            }
            next = stream.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(err)) => {
                warn!(error = %err, "delivery stream failed");
                return DispatchExit::StreamFailed(err.to_string());
            }
            None => {
                info!("delivery stream ended");
                return DispatchExit::StreamEnded;
            }
        };

        let delivery_tag = delivery.delivery_tag();
        match handle_delivery(&ctx, delivery).await {
            Ok(Processed::Stored { job_event_id, routed }) => {
                debug!(delivery_tag, %job_event_id, routed, "delivery processed");
            }
            Ok(Processed::Duplicate) => {}
            Err(err) if err.is_bad_message() => {
                warn!(delivery_tag, error = %err, "skipping delivery");
            }
            Err(err) => {
                error!(delivery_tag, error = %err, "delivery processing aborted");
            }
        }
    }
}

/// Run the full pipeline for one delivery.
pub async fn handle_delivery(
    ctx: &DispatchContext,
    delivery: InboundDelivery,
) -> Result<Processed, PipelineError> {
    if let Err(err) = delivery.ack().await {
        warn!(delivery_tag = delivery.delivery_tag(), error = %err, "ack failed");
    }

    let mut event = Event::from_json(delivery.body()).map_err(|source| PipelineError::Decode {
        body: String::from_utf8_lossy(delivery.body()).into_owned(),
        source,
    })?;
    event.parse().map_err(PipelineError::Parse)?;
    info!(event = %event, "event parsed");
    if event.hash.is_empty() {
        return Err(PipelineError::MissingHash);
    }

    let mut job = ctx
        .store
        .fetch_or_create_job(&event.condor_id)
        .await
        .map_err(PipelineError::Correlate)?;
    job.enrich(&mut event);

    // Checked before the job is touched so a redelivery cannot count twice.
    let seen = ctx
        .store
        .event_exists_by_hash(&event.hash)
        .await
        .map_err(PipelineError::DuplicateCheck)?;
    if seen {
        info!(hash = %event.hash, condor_id = %event.condor_id, "duplicate event ignored");
        return Ok(Processed::Duplicate);
    }

    if job.record_exit_code(event.exit_code) {
        info!(
            condor_id = %job.condor_id,
            exit_code = job.exit_code,
            exit_code_reported = event.has_exit_code(),
            failure_count = job.failure_count,
            "job failure recorded"
        );
    }
    let job = ctx
        .store
        .update_job(&job)
        .await
        .map_err(PipelineError::Correlate)?;
    // The stored row carries any submission recorded since the fetch.
    job.enrich(&mut event);

    let routed = match ctx.notifier.route(&event).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, hash = %event.hash, "routing failed; persisting anyway");
            false
        }
    };

    let raw_event_id = ctx
        .store
        .insert_raw_event(&event.event, job.id)
        .await
        .map_err(PipelineError::RawEvent)?;
    let entry = ctx
        .store
        .lookup_catalog_entry(&event.event_number)
        .await
        .map_err(PipelineError::Catalog)?;
    event.event_name = entry.name;
    event.description = entry.description;

    let job_event_id = ctx
        .store
        .insert_job_event(job.id, entry.id, raw_event_id, &event.hash)
        .await
        .map_err(PipelineError::JobEvent)?;
    ctx.store
        .upsert_last_job_event(job_event_id, job.id)
        .await
        .map_err(PipelineError::LastEvent)?;

    info!(
        condor_id = %job.condor_id,
        event_name = %event.event_name,
        %job_event_id,
        "event stored"
    );
    Ok(Processed::Stored {
        job_event_id,
        routed,
    })
}
