//! Mock broker implementation for testing.
//!
//! An in-memory direct-exchange broker that implements the transport traits.
//! Besides routing, it counts open handles, records acks and confirmations,
//! and can be told to fail at any stage, hold publisher confirms, nack
//! publishings, or drop every connection as if the broker went away.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::oneshot;

use super::{
    Acknowledger, BrokerChannel, BrokerConnection, BusError, Confirmation, Connector, Delivery,
    DeliveryStream, ExchangeSpec, PendingConfirm, QueueInfo, Result, Stage,
};

/// Mock broker for testing. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, String>,
    queues: HashMap<String, MockQueue>,
    connections: HashMap<u64, ConnectionEntry>,
    channels: HashMap<u64, ChannelEntry>,
    next_id: u64,
    failures: HashSet<Stage>,
    hold_confirms: bool,
    nack_publishes: bool,
    held_confirms: Vec<(oneshot::Sender<Confirmation>, Confirmation)>,
    confirms_sent: usize,
    published: usize,
    acks: Vec<(String, u64)>,
}

#[derive(Default)]
struct ConnectionEntry {
    close_watchers: Vec<oneshot::Sender<String>>,
}

struct ChannelEntry {
    connection: u64,
    confirm: bool,
    next_publish_tag: u64,
    next_delivery_tag: u64,
}

#[derive(Default)]
struct MockQueue {
    bindings: Vec<(String, String)>,
    backlog: VecDeque<(String, Vec<u8>)>,
    consumers: Vec<MockConsumer>,
    next_consumer: usize,
}

struct MockConsumer {
    tag: String,
    channel: u64,
    tx: mpsc::UnboundedSender<Result<Delivery>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.state().failures.contains(&stage) {
            return Err(stage.error("mock failure"));
        }
        Ok(())
    }

    /// Make every subsequent operation at `stage` fail.
    pub fn fail_on(&self, stage: Stage) {
        self.state().failures.insert(stage);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Keep publisher confirms until `release_confirms` is called.
    pub fn hold_confirms(&self, hold: bool) {
        self.state().hold_confirms = hold;
    }

    /// Send every held confirm. Returns how many were released.
    pub fn release_confirms(&self) -> usize {
        let mut state = self.state();
        let held = std::mem::take(&mut state.held_confirms);
        let count = held.len();
        for (tx, confirmation) in held {
            let _ = tx.send(confirmation);
        }
        state.confirms_sent += count;
        count
    }

    /// Answer publishings with a negative confirm.
    pub fn nack_publishes(&self, nack: bool) {
        self.state().nack_publishes = nack;
    }

    /// Close every connection from the broker side.
    pub fn drop_connections(&self, reason: &str) {
        let mut state = self.state();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            if let Some(entry) = state.connections.get_mut(&id) {
                for tx in entry.close_watchers.drain(..) {
                    let _ = tx.send(reason.to_string());
                }
            }
            state.close_connection(id);
        }
    }

    /// Push a transport error into every consumer stream on `queue`.
    pub fn fail_deliveries(&self, queue: &str, reason: &str) {
        if let Some(q) = self.state().queues.get(queue) {
            for consumer in &q.consumers {
                let _ = consumer
                    .tx
                    .unbounded_send(Err(BusError::Consume(reason.to_string())));
            }
        }
    }

    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }

    pub fn open_channels(&self) -> usize {
        self.state().channels.len()
    }

    pub fn confirms_sent(&self) -> usize {
        self.state().confirms_sent
    }

    pub fn published_count(&self) -> usize {
        self.state().published
    }

    /// Delivery tags acked on `queue`, in ack order.
    pub fn acks(&self, queue: &str) -> Vec<u64> {
        self.state()
            .acks
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, tag)| *tag)
            .collect()
    }

    pub fn exchange_kind(&self, name: &str) -> Option<String> {
        self.state().exchanges.get(name).cloned()
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    /// Routing keys `queue` is bound with on `exchange`.
    pub fn bindings(&self, queue: &str, exchange: &str) -> Vec<String> {
        self.state()
            .queues
            .get(queue)
            .map(|q| {
                q.bindings
                    .iter()
                    .filter(|(e, _)| e == exchange)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn close_channel(&mut self, id: u64) {
        if self.channels.remove(&id).is_some() {
            for queue in self.queues.values_mut() {
                queue.consumers.retain(|c| c.channel != id);
            }
        }
    }

    fn close_connection(&mut self, id: u64) {
        self.connections.remove(&id);
        let channels: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, c)| c.connection == id)
            .map(|(id, _)| *id)
            .collect();
        for channel in channels {
            self.close_channel(channel);
        }
    }

    /// Hand the next message of `queue` to a consumer, round robin.
    fn dispatch(&mut self, broker: &MockBroker, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.consumers.is_empty() {
                return;
            }
            let Some((routing_key, payload)) = queue.backlog.pop_front() else {
                return;
            };
            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = queue.next_consumer.wrapping_add(1);
            let channel_id = queue.consumers[index].channel;

            let Some(channel) = self.channels.get_mut(&channel_id) else {
                return;
            };
            channel.next_delivery_tag += 1;
            let tag = channel.next_delivery_tag;

            let acker = Arc::new(MockAcker {
                broker: broker.clone(),
                queue: queue_name.to_string(),
            });
            let delivery = Delivery::new(routing_key, payload, tag, acker);

            if let Some(queue) = self.queues.get(queue_name) {
                let _ = queue.consumers[index].tx.unbounded_send(Ok(delivery));
            }
        }
    }
}

struct MockAcker {
    broker: MockBroker,
    queue: String,
}

#[async_trait]
impl Acknowledger for MockAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.broker.check(Stage::Ack)?;
        self.broker
            .state()
            .acks
            .push((self.queue.clone(), delivery_tag));
        Ok(())
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn connect(&self, _uri: &str) -> Result<Box<dyn BrokerConnection>> {
        self.check(Stage::Dial)?;
        let mut state = self.state();
        let id = state.next_id();
        state.connections.insert(id, ConnectionEntry::default());
        Ok(Box::new(MockConnection {
            broker: self.clone(),
            id,
        }))
    }
}

struct MockConnection {
    broker: MockBroker,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        self.broker.check(Stage::Channel)?;
        let mut state = self.broker.state();
        if !state.connections.contains_key(&self.id) {
            return Err(BusError::Channel("connection closed".to_string()));
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelEntry {
                connection: self.id,
                confirm: false,
                next_publish_tag: 0,
                next_delivery_tag: 0,
            },
        );
        Ok(Box::new(MockChannel {
            broker: self.broker.clone(),
            id,
        }))
    }

    fn notify_close(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if let Some(entry) = self.broker.state().connections.get_mut(&self.id) {
            entry.close_watchers.push(tx);
        }
        rx
    }

    async fn close(&self) -> Result<()> {
        self.broker.check(Stage::Close)?;
        self.broker.state().close_connection(self.id);
        Ok(())
    }
}

struct MockChannel {
    broker: MockBroker,
    id: u64,
}

impl MockChannel {
    fn ensure_open(&self, state: &BrokerState, stage: Stage) -> Result<()> {
        if state.channels.contains_key(&self.id) {
            Ok(())
        } else {
            Err(stage.error("channel closed"))
        }
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn exchange_declare(&self, spec: &ExchangeSpec) -> Result<()> {
        self.broker.check(Stage::ExchangeDeclare)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::ExchangeDeclare)?;
        match state.exchanges.get(&spec.name) {
            Some(kind) if kind != &spec.kind => Err(BusError::ExchangeDeclare(format!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}': received '{}' but current is '{}'",
                spec.name, spec.kind, kind
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.kind.clone());
                Ok(())
            }
        }
    }

    async fn confirm_select(&self) -> Result<()> {
        self.broker.check(Stage::ConfirmSelect)?;
        let mut state = self.broker.state();
        match state.channels.get_mut(&self.id) {
            Some(channel) => {
                channel.confirm = true;
                Ok(())
            }
            None => Err(BusError::ConfirmSelect("channel closed".to_string())),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<PendingConfirm> {
        self.broker.check(Stage::Publish)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::Publish)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::Publish(format!(
                "NOT_FOUND - no exchange '{}'",
                exchange
            )));
        }
        state.published += 1;

        let targets: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| {
                q.bindings
                    .iter()
                    .any(|(e, k)| e == exchange && k == routing_key)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &targets {
            if let Some(queue) = state.queues.get_mut(name) {
                queue
                    .backlog
                    .push_back((routing_key.to_string(), payload.to_vec()));
            }
            state.dispatch(&self.broker, name);
        }

        let nack = state.nack_publishes;
        let hold = state.hold_confirms;
        let confirmation = match state.channels.get_mut(&self.id) {
            Some(channel) if channel.confirm => {
                channel.next_publish_tag += 1;
                Some(Confirmation {
                    delivery_tag: channel.next_publish_tag,
                    ack: !nack,
                })
            }
            _ => None,
        };

        let Some(confirmation) = confirmation else {
            return Ok(PendingConfirm::new(Box::pin(async {
                Err(BusError::Confirm("channel is not in confirm mode".to_string()))
            })));
        };

        let (tx, rx) = oneshot::channel();
        if hold {
            state.held_confirms.push((tx, confirmation));
        } else {
            let _ = tx.send(confirmation);
            state.confirms_sent += 1;
        }

        Ok(PendingConfirm::new(Box::pin(async move {
            rx.await.map_err(|_| {
                BusError::Confirm("channel closed before confirmation".to_string())
            })
        })))
    }

    async fn queue_declare(&self, name: &str) -> Result<QueueInfo> {
        self.broker.check(Stage::QueueDeclare)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::QueueDeclare)?;
        let queue = state.queues.entry(name.to_string()).or_default();
        Ok(QueueInfo {
            name: name.to_string(),
            messages: queue.backlog.len() as u32,
            consumers: queue.consumers.len() as u32,
        })
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.broker.check(Stage::QueueBind)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::QueueBind)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::QueueBind(format!(
                "NOT_FOUND - no exchange '{}'",
                exchange
            )));
        }
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(BusError::QueueBind(format!("NOT_FOUND - no queue '{}'", queue)));
        };
        let binding = (exchange.to_string(), routing_key.to_string());
        if !q.bindings.contains(&binding) {
            q.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.broker.check(Stage::Consume)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::Consume)?;
        let (tx, rx) = mpsc::unbounded();
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(BusError::Consume(format!("NOT_FOUND - no queue '{}'", queue)));
        };
        q.consumers.push(MockConsumer {
            tag: consumer_tag.to_string(),
            channel: self.id,
            tx,
        });
        state.dispatch(&self.broker, queue);
        Ok(rx.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.broker.check(Stage::Cancel)?;
        let mut state = self.broker.state();
        self.ensure_open(&state, Stage::Cancel)?;
        let mut found = false;
        for queue in state.queues.values_mut() {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.channel == self.id && c.tag == consumer_tag));
            found |= queue.consumers.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(BusError::Cancel(format!(
                "unknown consumer tag '{}'",
                consumer_tag
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        self.broker.state().close_channel(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(broker: &MockBroker) -> (Box<dyn BrokerConnection>, Box<dyn BrokerChannel>) {
        let conn = broker.connect("amqp://mock").await.unwrap();
        let channel = conn.create_channel().await.unwrap();
        (conn, channel)
    }

    #[tokio::test]
    async fn test_direct_routing_matches_exact_key() {
        let broker = MockBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .exchange_declare(&ExchangeSpec::new("ex", "direct"))
            .await
            .unwrap();
        channel.queue_declare("q").await.unwrap();
        channel.queue_bind("q", "ex", "order.create").await.unwrap();
        let mut stream = channel.consume("q", "tag").await.unwrap();

        channel.publish("ex", "order.update", b"skip").await.unwrap();
        channel.publish("ex", "order.create", b"keep").await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.routing_key, "order.create");
        assert_eq!(delivery.payload, b"keep");
        assert_eq!(delivery.delivery_tag, 1);
        assert_eq!(broker.published_count(), 2);
    }

    #[tokio::test]
    async fn test_backlog_delivered_on_consume() {
        let broker = MockBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .exchange_declare(&ExchangeSpec::new("ex", "direct"))
            .await
            .unwrap();
        channel.queue_declare("q").await.unwrap();
        channel.queue_bind("q", "ex", "k").await.unwrap();
        channel.publish("ex", "k", b"early").await.unwrap();

        assert_eq!(channel.queue_declare("q").await.unwrap().messages, 1);

        let mut stream = channel.consume("q", "tag").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"early");
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let broker = MockBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel.queue_declare("q").await.unwrap();
        let mut stream = channel.consume("q", "tag").await.unwrap();

        channel.cancel("tag").await.unwrap();

        assert!(stream.next().await.is_none());
        assert!(matches!(
            channel.cancel("tag").await,
            Err(BusError::Cancel(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_close_closes_channels() {
        let broker = MockBroker::new();
        let (conn, _channel) = open(&broker).await;
        assert_eq!(broker.open_connections(), 1);
        assert_eq!(broker.open_channels(), 1);

        conn.close().await.unwrap();

        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_drop_connections_notifies_watchers() {
        let broker = MockBroker::new();
        let (conn, _channel) = open(&broker).await;
        let closed = conn.notify_close();

        broker.drop_connections("CONNECTION_FORCED");

        assert_eq!(closed.await.unwrap(), "CONNECTION_FORCED");
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_orderly_close_does_not_notify() {
        let broker = MockBroker::new();
        let (conn, _channel) = open(&broker).await;
        let closed = conn.notify_close();

        conn.close().await.unwrap();

        assert!(closed.await.is_err());
    }

    #[tokio::test]
    async fn test_failed_ack_is_not_recorded() {
        let broker = MockBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel
            .exchange_declare(&ExchangeSpec::new("ex", "direct"))
            .await
            .unwrap();
        channel.queue_declare("q").await.unwrap();
        channel.queue_bind("q", "ex", "k").await.unwrap();
        let mut stream = channel.consume("q", "tag").await.unwrap();
        channel.publish("ex", "k", b"m").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        broker.fail_on(Stage::Ack);

        assert!(matches!(delivery.ack().await, Err(BusError::Ack(_))));
        assert!(broker.acks("q").is_empty());
    }

    #[tokio::test]
    async fn test_fail_deliveries_yields_error_item() {
        let broker = MockBroker::new();
        let (_conn, channel) = open(&broker).await;
        channel.queue_declare("q").await.unwrap();
        let mut stream = channel.consume("q", "tag").await.unwrap();

        broker.fail_deliveries("q", "connection reset");

        assert_eq!(
            stream.next().await.unwrap().err(),
            Some(BusError::Consume("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fail_on_stage() {
        let broker = MockBroker::new();
        broker.fail_on(Stage::Dial);
        assert!(matches!(
            broker.connect("amqp://mock").await,
            Err(BusError::Dial(_))
        ));

        broker.clear_failures();
        assert!(broker.connect("amqp://mock").await.is_ok());
    }
}
