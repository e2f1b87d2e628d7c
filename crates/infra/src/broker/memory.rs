//! In-memory broker implementing [`Connector`].
//!
//! Intended for tests/dev. Every `connect` opens a new "session" with its own
//! delivery channel and close signal; the test drives it by publishing bodies
//! and by killing the current session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::priming::{CloseNotifier, close_signal};
use super::{
    Acknowledge, BrokerError, BrokerTopology, Connector, DeliveryStream, InboundDelivery,
    PrimingSender,
};

struct Session {
    // `None` once the delivery stream was ended.
    tx: Option<mpsc::UnboundedSender<InboundDelivery>>,
    notifier: Option<CloseNotifier>,
}

#[derive(Default)]
struct BrokerState {
    attempts: usize,
    fail_next: usize,
    sessions_opened: usize,
    active_streams: usize,
    max_active_streams: usize,
    next_tag: u64,
    acked: Vec<u64>,
    current: Option<Session>,
    // Killed sessions whose streams are left open until the consumer drops them.
    retired: Vec<mpsc::UnboundedSender<InboundDelivery>>,
    topologies: Vec<BrokerTopology>,
}

/// Shared handle to the in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl core::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("attempts", &state.attempts)
            .field("sessions_opened", &state.sessions_opened)
            .field("active_streams", &state.active_streams)
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Deliver a message body on the current session.
    ///
    /// Returns the delivery tag, or `None` when no session is open.
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> Option<u64> {
        let mut state = self.lock();
        state.next_tag += 1;
        let tag = state.next_tag;
        let session = state.current.as_ref()?;
        let acker = MemoryAcker {
            delivery_tag: tag,
            state: Arc::clone(&self.state),
        };
        session
            .tx
            .as_ref()?
            .send(InboundDelivery::new(tag, body.into(), acker))
            .ok()
            .map(|_| tag)
    }

    /// Kill the current session.
    ///
    /// With `Some(reason)` the close signal delivers an error, with `None` the
    /// notifier is simply dropped. The session's delivery stream stays open, so
    /// only the consumer stopping its loop releases it.
    pub fn kill_connection(&self, reason: Option<&str>) {
        let mut state = self.lock();
        if let Some(mut session) = state.current.take() {
            if let (Some(notifier), Some(reason)) = (session.notifier.take(), reason) {
                notifier.fire(reason);
            }
            state.retired.extend(session.tx);
        }
    }

    /// End the current session's delivery stream.
    ///
    /// The close notifier stays alive, so the consumer only learns about it by
    /// its stream running dry.
    pub fn end_stream(&self) {
        if let Some(session) = self.lock().current.as_mut() {
            session.tx = None;
        }
    }

    /// Total connect attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Connect attempts that produced a delivery stream.
    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Delivery streams currently held by a consumer.
    pub fn active_streams(&self) -> usize {
        self.lock().active_streams
    }

    /// Highest number of delivery streams ever held at the same time.
    pub fn max_active_streams(&self) -> usize {
        self.lock().max_active_streams
    }

    /// Delivery tags acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<u64> {
        self.lock().acked.clone()
    }

    /// Topologies passed to each connect attempt.
    pub fn topologies(&self) -> Vec<BrokerTopology> {
        self.lock().topologies.clone()
    }
}

struct MemoryAcker {
    delivery_tag: u64,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().map_err(|e| BrokerError::Ack {
            delivery_tag: self.delivery_tag,
            reason: e.to_string(),
        })?;
        state.acked.push(self.delivery_tag);
        Ok(())
    }
}

/// Decrements the active stream count when a stream is dropped.
struct ActiveStream {
    state: Arc<Mutex<BrokerState>>,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.active_streams -= 1;
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        topology: &BrokerTopology,
        primer: &PrimingSender,
    ) -> Result<DeliveryStream, BrokerError> {
        let (rx, guard) = {
            let mut state = self.lock();
            state.attempts += 1;
            state.topologies.push(topology.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(BrokerError::Connection("connection refused".to_string()));
            }

            let (notifier, signal) = close_signal();
            primer.prime(signal)?;

            let (tx, rx) = mpsc::unbounded_channel();
            state.current = Some(Session {
                tx: Some(tx),
                notifier: Some(notifier),
            });
            state.sessions_opened += 1;
            state.active_streams += 1;
            state.max_active_streams = state.max_active_streams.max(state.active_streams);
            let guard = ActiveStream {
                state: Arc::clone(&self.state),
            };
            (rx, guard)
        };

        Ok(futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), (rx, guard)))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::{CloseReason, priming_channel};
    use crate::test_support::topology;

    #[tokio::test]
    async fn connect_primes_and_streams_published_bodies() {
        let broker = MemoryBroker::new();
        let (primer, mut primings) = priming_channel();

        let mut stream = broker.connect(&topology(), &primer).await.unwrap();
        assert!(primings.recv().await.is_some());

        let tag = broker.publish("hello").unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.delivery_tag(), tag);
        assert_eq!(delivery.body(), b"hello");

        delivery.ack().await.unwrap();
        assert_eq!(broker.acked(), vec![tag]);
    }

    #[tokio::test]
    async fn failed_connect_does_not_prime() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(1);
        let (primer, _primings) = priming_channel();

        assert!(broker.connect(&topology(), &primer).await.is_err());
        // The slot is still free, so a later success can prime.
        assert!(broker.connect(&topology(), &primer).await.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn kill_fires_close_signal_but_keeps_stream_open() {
        let broker = MemoryBroker::new();
        let (primer, mut primings) = priming_channel();
        let stream = broker.connect(&topology(), &primer).await.unwrap();
        let signal = primings.recv().await.unwrap().into_signal();

        broker.kill_connection(Some("CONNECTION_FORCED"));
        assert_eq!(
            signal.closed().await,
            CloseReason::Error("CONNECTION_FORCED".to_string())
        );
        assert_eq!(broker.active_streams(), 1);
        assert!(broker.publish("lost").is_none());

        drop(stream);
        assert_eq!(broker.active_streams(), 0);
    }

    #[tokio::test]
    async fn end_stream_leaves_close_signal_pending() {
        let broker = MemoryBroker::new();
        let (primer, mut primings) = priming_channel();
        let mut stream = broker.connect(&topology(), &primer).await.unwrap();
        let signal = primings.recv().await.unwrap().into_signal();

        broker.end_stream();
        assert!(stream.next().await.is_none());
        assert_eq!(broker.active_streams(), 0);
        assert!(broker.publish("lost").is_none());

        let pending = tokio::time::timeout(Duration::from_millis(20), signal.closed()).await;
        assert!(pending.is_err());
    }
}
