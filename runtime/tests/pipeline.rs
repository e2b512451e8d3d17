//! End-to-end pipeline tests against the in-memory broker.
//!
//! Producer → broker queue → Worker → KitchenOrderStore, with failures injected at the
//! broker.

#![allow(clippy::unwrap_used)]

use order_relay_core::{OrderItem, OrderPublisher, OrderStore, QueueSpec, codec};
use order_relay_projections::KitchenOrderStore;
use order_relay_runtime::{
    ConnectionManager, Producer, RetryPolicy, Worker, WorkerConfig, WorkerHandle, WorkerState,
};
use order_relay_testing::{InMemoryBroker, fixtures};
use std::sync::Arc;
use std::time::Duration;

const QUEUE: &str = "orders";
const DEAD_LETTER: &str = "orders.dead-letter";

struct Pipeline {
    broker: InMemoryBroker,
    manager: Arc<ConnectionManager<InMemoryBroker>>,
    producer: Producer<InMemoryBroker>,
    store: Arc<KitchenOrderStore>,
    worker: WorkerHandle,
}

impl Pipeline {
    fn start() -> Self {
        Self::start_with(InMemoryBroker::new())
    }

    fn start_with(broker: InMemoryBroker) -> Self {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();

        let queue = QueueSpec::durable(QUEUE).with_dead_letter(DEAD_LETTER);
        let manager = Arc::new(ConnectionManager::new(broker.clone()));
        let store = Arc::new(KitchenOrderStore::new());

        let producer = Producer::new(Arc::clone(&manager), queue.clone());
        let config = WorkerConfig::new(queue).with_backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(50))
                .build(),
        );
        let worker = Worker::new(Arc::clone(&manager), store.clone(), config).spawn();

        Self {
            broker,
            manager,
            producer,
            store,
            worker,
        }
    }

    async fn ready(&self) {
        tokio::time::timeout(
            Duration::from_secs(2),
            self.worker.state_receiver().wait_for(|s| s.is_ready()),
        )
        .await
        .unwrap()
        .unwrap();
    }

    /// Wait until the store holds `count` orders and nothing is in flight.
    async fn settled(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if self.store.len().unwrap() == count
                    && self.broker.unacked() == 0
                    && self.broker.queue_depth(QUEUE) == 0
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn shutdown(self) {
        self.worker.stop(Duration::from_secs(2)).await;
        self.manager.close().await;
        assert_eq!(self.broker.open_channels(), 0);
    }
}

#[tokio::test]
async fn test_published_order_reaches_kitchen() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    let order = fixtures::sample_order();
    pipeline.producer.publish(&order).await.unwrap();
    pipeline.settled(1).await;

    let orders = pipeline.store.list_all().await.unwrap();
    assert_eq!(orders, vec![order]);
    assert_eq!(
        serde_json::to_value(&orders).unwrap(),
        serde_json::json!([{
            "id": "o1",
            "customerName": "Ana",
            "table": "T3",
            "items": [{ "productName": "Hamburguesa", "quantity": 2, "unitPrice": 5.5 }],
            "createdAt": "2024-01-01T10:00:00Z"
        }])
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_producer_first_then_worker() {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(ConnectionManager::new(broker.clone()));
    let producer = Producer::new(
        Arc::clone(&manager),
        QueueSpec::durable(QUEUE).with_dead_letter(DEAD_LETTER),
    );

    // Published before any consumer exists; the producer declared the queue itself
    producer.publish(&fixtures::sample_order()).await.unwrap();
    assert_eq!(broker.queue_depth(QUEUE), 1);
    manager.close().await;

    let pipeline = Pipeline::start_with(broker);
    pipeline.ready().await;
    pipeline.settled(1).await;

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    let order = fixtures::sample_order();
    pipeline.producer.publish(&order).await.unwrap();
    pipeline.settled(1).await;
    let before = pipeline.store.list_all().await.unwrap();

    pipeline.producer.publish(&order).await.unwrap();
    pipeline.settled(1).await;

    assert_eq!(pipeline.store.list_all().await.unwrap(), before);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_same_id_last_write_wins() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    let first = fixtures::order_with_items("o1", vec![OrderItem::new("Hamburguesa", 2, 5.5)]);
    let second = fixtures::order_with_items("o1", vec![OrderItem::new("Papas", 1, 2.0)]);
    pipeline.producer.publish(&first).await.unwrap();
    pipeline.producer.publish(&second).await.unwrap();
    pipeline.settled(1).await;

    let orders = pipeline.store.list_all().await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].items(), second.items());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_worker() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    pipeline.broker.inject(QUEUE, b"definitely not an order".to_vec());
    pipeline.broker.inject(
        QUEUE,
        br#"{"version":1,"order":{"id":"bad","items":[],"createdAt":"2024-01-01T10:00:00Z"}}"#.to_vec(),
    );
    pipeline.producer.publish(&fixtures::sample_order()).await.unwrap();
    pipeline.settled(1).await;

    assert_eq!(pipeline.broker.queue_depth(DEAD_LETTER), 2);
    assert!(pipeline.worker.state().is_ready());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_bare_order_body_is_accepted() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    pipeline.broker.inject(
        QUEUE,
        br#"{"id":"legacy","customerName":"Luis","table":"T1","items":[{"productName":"Taco","quantity":3,"unitPrice":1.5}],"createdAt":"2024-01-01T09:00:00Z"}"#.to_vec(),
    );
    pipeline.settled(1).await;

    let orders = pipeline.store.list_all().await.unwrap();
    assert_eq!(orders[0].id().as_str(), "legacy");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_orders_listed_by_created_at() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    for (id, ts) in [
        ("late", "2024-01-01T12:00:00Z"),
        ("early", "2024-01-01T08:00:00Z"),
        ("mid", "2024-01-01T10:00:00Z"),
    ] {
        pipeline.producer.publish(&fixtures::order_at(id, ts)).await.unwrap();
    }
    pipeline.settled(3).await;

    let ids: Vec<String> = pipeline
        .store
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|o| o.id().to_string())
        .collect();
    assert_eq!(ids, vec!["early", "mid", "late"]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_worker_resubscribes_after_channel_loss() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    pipeline.producer.publish(&fixtures::order_at("o1", "2024-01-01T10:00:00Z")).await.unwrap();
    pipeline.settled(1).await;

    let mut states = pipeline.worker.state_receiver();
    pipeline.broker.fail_next_connects(2);
    pipeline.broker.drop_all_channels();

    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == WorkerState::Reconnecting),
    )
    .await
    .unwrap()
    .unwrap();
    pipeline.ready().await;

    // Producer picks up the same fresh channel
    pipeline.producer.publish(&fixtures::order_at("o2", "2024-01-01T10:05:00Z")).await.unwrap();
    pipeline.settled(2).await;

    assert!(pipeline.broker.connections_opened() >= 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unacked_message_redelivered_after_channel_loss() {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(ConnectionManager::new(broker.clone()));
    let producer = Producer::new(
        Arc::clone(&manager),
        QueueSpec::durable(QUEUE).with_dead_letter(DEAD_LETTER),
    );
    producer.publish(&fixtures::sample_order()).await.unwrap();
    manager.close().await;

    // A consumer that dies before acking
    {
        use futures::StreamExt;
        use order_relay_core::{BrokerChannel, Connector};
        let channel = broker.connect().await.unwrap();
        let mut stream = channel.consume(QUEUE, "crashy", 1).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(codec::decode(&delivery.body).is_ok());
        channel.close().await.unwrap();
    }
    assert_eq!(broker.queue_depth(QUEUE), 1);

    let pipeline = Pipeline::start_with(broker);
    pipeline.ready().await;
    pipeline.settled(1).await;
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_publishers_share_one_connection() {
    let broker = InMemoryBroker::new().with_connect_delay(Duration::from_millis(20));
    let manager = Arc::new(ConnectionManager::new(broker.clone()));
    let producer = Arc::new(Producer::new(
        manager,
        QueueSpec::durable(QUEUE).with_dead_letter(DEAD_LETTER),
    ));

    let mut handles = Vec::new();
    for i in 0..20 {
        let producer = Arc::clone(&producer);
        handles.push(tokio::spawn(async move {
            let order = fixtures::order_at(&format!("o{i}"), "2024-01-01T10:00:00Z");
            producer.publish(&order).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(broker.connections_opened(), 1);
    assert_eq!(broker.queue_depth(QUEUE), 20);
}

#[tokio::test]
async fn test_shutdown_stops_worker_and_closes_channel() {
    let pipeline = Pipeline::start();
    pipeline.ready().await;

    let mut states = pipeline.worker.state_receiver();
    pipeline.shutdown().await;
    assert_eq!(*states.borrow_and_update(), WorkerState::Stopped);
}
