//! AMQP (RabbitMQ) transport implementation.
//!
//! Thin adapter from the bus transport traits onto `lapin` connections and
//! channels. Nothing here is pooled or reused; callers own what they open.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation as LapinConfirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{
    Acknowledger, BrokerChannel, BrokerConnection, BusError, Confirmation, Connector, Delivery,
    DeliveryStream, ExchangeSpec, PendingConfirm, QueueInfo, Result,
};

/// Content type for published order events.
const CONTENT_TYPE: &str = "text/plain";
/// AMQP delivery mode 1: non-persistent.
const TRANSIENT: u8 = 1;
/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Map a configured exchange type onto a lapin exchange kind.
///
/// Unknown types are passed through for the broker to accept or refuse.
pub fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

/// Opens RabbitMQ connections with `lapin`.
#[derive(Clone, Debug, Default)]
pub struct LapinConnector;

type CloseWatchers = Arc<Mutex<Vec<oneshot::Sender<String>>>>;

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Dial(e.to_string()))?;

        let watchers: CloseWatchers = Arc::default();
        let on_error = Arc::clone(&watchers);
        connection.on_error(move |err| {
            let mut watchers = on_error.lock().unwrap_or_else(|e| e.into_inner());
            for tx in watchers.drain(..) {
                let _ = tx.send(err.to_string());
            }
        });

        Ok(Box::new(LapinConnection {
            connection,
            watchers,
        }))
    }
}

struct LapinConnection {
    connection: Connection,
    watchers: CloseWatchers,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BusError::Channel(e.to_string()))?;

        Ok(Box::new(LapinChannel {
            channel,
            confirming: AtomicBool::new(false),
            publish_seq: AtomicU64::new(0),
        }))
    }

    fn notify_close(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    async fn close(&self) -> Result<()> {
        // Orderly close: drop the watchers so they never fire.
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| BusError::Close(e.to_string()))
    }
}

struct LapinChannel {
    channel: Channel,
    confirming: AtomicBool,
    /// Publish sequence number; the broker confirms by this tag.
    publish_seq: AtomicU64,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn exchange_declare(&self, spec: &ExchangeSpec) -> Result<()> {
        self.channel
            .exchange_declare(
                &spec.name,
                exchange_kind(&spec.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::ExchangeDeclare(e.to_string()))
    }

    async fn confirm_select(&self) -> Result<()> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::ConfirmSelect(e.to_string()))?;
        self.confirming.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<PendingConfirm> {
        let properties = BasicProperties::default()
            .with_headers(FieldTable::default())
            .with_content_type(CONTENT_TYPE.into())
            .with_delivery_mode(TRANSIENT)
            .with_priority(0);

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        let delivery_tag = if self.confirming.load(Ordering::SeqCst) {
            self.publish_seq.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            0
        };

        Ok(PendingConfirm::new(Box::pin(async move {
            match confirm.await {
                Ok(LapinConfirmation::Ack(_)) => Ok(Confirmation {
                    delivery_tag,
                    ack: true,
                }),
                Ok(LapinConfirmation::Nack(_)) => Ok(Confirmation {
                    delivery_tag,
                    ack: false,
                }),
                Ok(LapinConfirmation::NotRequested) => Err(BusError::Confirm(
                    "channel is not in confirm mode".to_string(),
                )),
                Err(e) => Err(BusError::Confirm(e.to_string())),
            }
        })))
    }

    async fn queue_declare(&self, name: &str) -> Result<QueueInfo> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::QueueDeclare(e.to_string()))?;

        Ok(QueueInfo {
            name: queue.name().as_str().to_string(),
            messages: queue.message_count(),
            consumers: queue.consumer_count(),
        })
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::QueueBind(e.to_string()))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;

        Ok(consumer
            .map(|item| {
                item.map(into_delivery)
                    .map_err(|e| BusError::Consume(e.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| BusError::Cancel(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        debug!(channel_id = self.channel.id(), "closing channel");
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| BusError::Close(e.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let routing_key = delivery.routing_key.as_str().to_string();
    Delivery::new(
        routing_key,
        delivery.data,
        delivery.delivery_tag,
        Arc::new(LapinAcker {
            acker: delivery.acker,
        }),
    )
}

struct LapinAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!(delivery_tag, error = %e, "ack rejected");
                BusError::Ack(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_kind_known_types() {
        assert!(matches!(exchange_kind("direct"), ExchangeKind::Direct));
        assert!(matches!(exchange_kind("fanout"), ExchangeKind::Fanout));
        assert!(matches!(exchange_kind("topic"), ExchangeKind::Topic));
        assert!(matches!(exchange_kind("headers"), ExchangeKind::Headers));
    }

    #[test]
    fn test_exchange_kind_passes_unknown_through() {
        assert!(matches!(
            exchange_kind("x-consistent-hash"),
            ExchangeKind::Custom(ref kind) if kind == "x-consistent-hash"
        ));
    }
}
