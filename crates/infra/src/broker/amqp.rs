//! AMQP 0-9-1 connection manager backed by `lapin`.
//!
//! Each [`AmqpConnector::connect`] opens a brand new transport connection and
//! one channel, declares the exchange and queue, binds them and starts a
//! manual-ack consumer. Nothing is reused across attempts, so a failure half
//! way through simply abandons what was opened.

use std::pin::Pin;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{info, instrument};

use super::priming::close_signal;
use super::{Acknowledge, BrokerError, BrokerTopology, DeliveryStream, InboundDelivery, PrimingSender};

/// Connection manager for a real AMQP broker.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Keeps the connection and channel alive for as long as the stream is.
struct Session {
    _connection: Connection,
    _channel: Channel,
}

struct AmqpAcker {
    delivery_tag: u64,
    acker: Acker,
}

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BrokerError::Ack {
                delivery_tag: self.delivery_tag,
                reason: e.to_string(),
            })
    }
}

/// Map a configured exchange type onto lapin's enum.
fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

#[async_trait]
impl super::Connector for AmqpConnector {
    #[instrument(
        skip(self, topology, primer),
        fields(
            uri = %topology.redacted_uri(),
            exchange = %topology.exchange.name,
            queue = %topology.queue.name
        ),
        err
    )]
    async fn connect(
        &self,
        topology: &BrokerTopology,
        primer: &PrimingSender,
    ) -> Result<DeliveryStream, BrokerError> {
        info!("connecting to broker");
        let connection = Connection::connect(&topology.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!("connected; opening channel");
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))?;

        let exchange = &topology.exchange;
        info!(kind = %exchange.kind, "declaring exchange");
        channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(&exchange.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    internal: exchange.internal,
                    nowait: exchange.no_wait,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ExchangeDeclare {
                exchange: exchange.name.clone(),
                reason: e.to_string(),
            })?;

        let spec = &topology.queue;
        info!("declaring queue");
        let queue = channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: spec.durable,
                    exclusive: spec.exclusive,
                    auto_delete: spec.auto_delete,
                    nowait: spec.no_wait,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::QueueDeclare {
                queue: spec.name.clone(),
                reason: e.to_string(),
            })?;
        let queue_name = queue.name().as_str().to_string();

        info!(binding_key = %topology.binding_key, "binding queue to exchange");
        channel
            .queue_bind(
                &queue_name,
                &exchange.name,
                &topology.binding_key,
                QueueBindOptions {
                    nowait: spec.no_wait,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::QueueBind {
                queue: queue_name.clone(),
                exchange: exchange.name.clone(),
                reason: e.to_string(),
            })?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                &topology.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue_name.clone(),
                reason: e.to_string(),
            })?;

        let (notifier, signal) = close_signal();
        let mut notifier = Some(notifier);
        connection.on_error(move |err| {
            if let Some(notifier) = notifier.take() {
                notifier.fire(err.to_string());
            }
        });
        primer.prime(signal)?;

        info!(consumer_tag = %topology.consumer_tag, "consuming");
        let session = Session {
            _connection: connection,
            _channel: channel,
        };
        Ok(delivery_stream(Box::pin(consumer), session))
    }
}

/// Adapt lapin's consumer into a [`DeliveryStream`].
///
/// The first transport error is yielded and then the stream ends.
fn delivery_stream(consumer: Pin<Box<Consumer>>, session: Session) -> DeliveryStream {
    futures::stream::unfold(Some((consumer, session)), |state| async move {
        let (mut consumer, session) = state?;
        match consumer.next().await {
            Some(Ok(delivery)) => {
                let delivery_tag = delivery.delivery_tag;
                let inbound = InboundDelivery::new(
                    delivery_tag,
                    delivery.data,
                    AmqpAcker {
                        delivery_tag,
                        acker: delivery.acker,
                    },
                );
                Some((Ok(inbound), Some((consumer, session))))
            }
            Some(Err(err)) => Some((Err(BrokerError::Delivery(err.to_string())), None)),
            None => None,
        }
    })
    .boxed()
}
