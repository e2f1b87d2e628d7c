//! Broker connection boundary.
//!
//! The dispatch loop only sees a [`DeliveryStream`] of [`InboundDelivery`]
//! values; the [`Connector`] trait hides whether they come from an AMQP broker
//! or from the in-memory broker used in tests.
//!
//! ## Connection lifecycle
//!
//! Every successful [`Connector::connect`] hands a fresh [`CloseSignal`] to the
//! supervisor through the priming channel (see [`priming`]) before returning.
//! The signal fires (or is dropped) once that physical connection is no longer
//! usable.

pub mod amqp;
pub mod memory;
pub mod priming;

use core::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;
pub use priming::{
    CloseNotifier, CloseReason, CloseSignal, Priming, PrimingReceiver, PrimingSender, close_signal,
    priming_channel,
};

/// Transport-level failure. Always recoverable by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("exchange {exchange} declare failed: {reason}")]
    ExchangeDeclare { exchange: String, reason: String },

    #[error("queue {queue} declare failed: {reason}")]
    QueueDeclare { queue: String, reason: String },

    #[error("binding queue {queue} to exchange {exchange} failed: {reason}")]
    QueueBind {
        queue: String,
        exchange: String,
        reason: String,
    },

    #[error("consume on queue {queue} failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("ack of delivery {delivery_tag} failed: {reason}")]
    Ack { delivery_tag: u64, reason: String },

    #[error("delivery stream error: {0}")]
    Delivery(String),

    #[error("priming handoff failed: {0}")]
    Priming(String),
}

/// Exchange declaration flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    /// `direct`, `fanout`, `topic`, `headers` or a plugin-provided type.
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
}

/// Queue declaration flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

/// Immutable snapshot of everything needed to (re)connect and consume.
///
/// Taken once at startup and cloned into every reconnect attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerTopology {
    pub uri: String,
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    pub binding_key: String,
    pub consumer_tag: String,
}

impl BrokerTopology {
    /// The broker URI with any password masked, for logs.
    pub fn redacted_uri(&self) -> String {
        redact_uri(&self.uri)
    }
}

impl fmt::Debug for BrokerTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerTopology")
            .field("uri", &self.redacted_uri())
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .field("binding_key", &self.binding_key)
            .field("consumer_tag", &self.consumer_tag)
            .finish()
    }
}

fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return uri.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => uri.to_string(),
    }
}

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// One inbound message awaiting acknowledgment.
pub struct InboundDelivery {
    delivery_tag: u64,
    body: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl InboundDelivery {
    pub fn new(delivery_tag: u64, body: Vec<u8>, acker: impl Acknowledge + 'static) -> Self {
        Self {
            delivery_tag,
            body,
            acker: Box::new(acker),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Acknowledge this single delivery (never batched).
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Read-only stream of deliveries from one physical connection.
///
/// Ends (or yields an error) when the connection goes away.
pub type DeliveryStream = BoxStream<'static, Result<InboundDelivery, BrokerError>>;

/// Opens a connection, declares the topology and starts consuming.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and start a manual-ack consumer.
    ///
    /// On success a [`Priming`] carrying the new connection's close signal has
    /// already been handed to `primer`. Any failing step aborts the attempt;
    /// partially opened state is abandoned.
    async fn connect(
        &self,
        topology: &BrokerTopology,
        primer: &PrimingSender,
    ) -> Result<DeliveryStream, BrokerError>;
}
