use std::sync::Arc;
use std::time::Duration;

use broker_memory::MemoryBroker;
use playback_api::{FilterMap, TimedMessage};
use playback_engine::{PlaybackConfig, PlaybackError, PlaybackOrder, PlaybackRegistry, PlaybackRequest};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep_until};

fn orders_broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 1);
    for (ts, v) in [(1000, "A"), (1500, "B"), (2600, "C")] {
        broker.append("orders", 0, ts, None, json!(v)).unwrap();
    }
    broker
}

fn registry(broker: &MemoryBroker) -> PlaybackRegistry {
    PlaybackRegistry::new(broker.context(), PlaybackConfig::default())
}

fn delivered(broker: &MemoryBroker, topic: &str) -> Vec<Value> {
    broker.records(topic).into_iter().filter_map(|r| r.value.ok()).collect()
}

async fn at(start: Instant, ms: u64) {
    sleep_until(start + Duration::from_millis(ms)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replays_window_at_scaled_speed() {
    let broker = orders_broker();
    let reg = registry(&broker);

    let id = reg
        .start(PlaybackRequest::new("orders", "replay", 2.0, 1000, 2600))
        .await
        .unwrap();
    let start = Instant::now();

    let listed = reg.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].source_topic, "orders");
    assert_eq!(listed[0].target_topic, "replay");

    // A ≈ 0 ms, B ≈ 250 ms, C ≈ 800 ms, completion ≈ 900 ms
    at(start, 120).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A")]);

    at(start, 520).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A"), json!("B")]);
    assert_eq!(reg.list().len(), 1);

    at(start, 1300).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A"), json!("B"), json!("C")]);
    assert!(reg.list().is_empty());

    // destination освобождён: можно запускать снова
    reg.start(PlaybackRequest::new("orders", "replay", 100.0, 1000, 2600))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_window_is_rejected_and_registers_nothing() {
    let broker = orders_broker();
    let reg = registry(&broker);

    let err = reg
        .start(PlaybackRequest::new("orders", "replay", 1.0, 5000, 9000))
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybackError::EmptySourceWindow(ref t) if t == "orders"));
    assert!(reg.list().is_empty());

    // claim снят
    reg.start(PlaybackRequest::new("orders", "replay", 1.0, 1000, 2600))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_on_one_destination() {
    let broker = orders_broker();
    let reg = registry(&broker);
    let request = PlaybackRequest::new("orders", "replay", 1.0, 1000, 2600);

    let (a, b) = tokio::join!(reg.start(request.clone()), reg.start(request.clone()));

    let (ok, err): (Vec<_>, Vec<_>) = [a, b].into_iter().partition(Result::is_ok);
    assert_eq!(ok.len(), 1);
    assert!(matches!(err[0], Err(PlaybackError::DestinationInUse(ref t)) if t == "replay"));
    assert_eq!(reg.list().len(), 1);
    // проигравший start не создавал consumer'а
    assert_eq!(broker.consumers_created(), 1);

    let err = reg.start(request).await.unwrap_err();
    assert!(matches!(err, PlaybackError::DestinationInUse(_)));
    assert_eq!(broker.consumers_created(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_prevents_pending_deliveries() {
    let broker = orders_broker();
    let reg = registry(&broker);

    let id = reg
        .start(PlaybackRequest::new("orders", "replay", 1.0, 1000, 2600))
        .await
        .unwrap();
    let start = Instant::now();

    at(start, 100).await;
    reg.stop(&id);
    assert!(reg.list().is_empty());
    let after_stop = delivered(&broker, "replay");
    assert_eq!(after_stop, vec![json!("A")]);

    at(start, 2000).await;
    assert_eq!(delivered(&broker, "replay"), after_stop);

    // повторный и неизвестный stop: no-op
    reg.stop(&id);
    reg.stop("no-such-playback");
    assert!(reg.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn playbacks_to_different_destinations_run_side_by_side() {
    let broker = orders_broker();
    let reg = registry(&broker);

    let first = reg
        .start(PlaybackRequest::new("orders", "replay-1", 4.0, 1000, 2600))
        .await
        .unwrap();
    let second = reg
        .start(PlaybackRequest::new("orders", "replay-2", 4.0, 1000, 2600))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(reg.list().len(), 2);

    reg.stop(&first);
    let start = Instant::now();
    at(start, 800).await;

    assert_eq!(delivered(&broker, "replay-2").len(), 3);
    assert!(reg.list().is_empty());
}

/// Partition 0 отдаётся poll'ом первой, но её запись самая поздняя.
fn two_partition_broker() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.create_topic("quotes", 2);
    broker.append("quotes", 0, 3000, None, json!("C")).unwrap();
    broker.append("quotes", 1, 1000, None, json!("A")).unwrap();
    broker.append("quotes", 1, 2000, None, json!("B")).unwrap();
    broker
}

fn ordered_registry(broker: &MemoryBroker, order: PlaybackOrder) -> PlaybackRegistry {
    let config = PlaybackConfig {
        order,
        ..PlaybackConfig::default()
    };
    PlaybackRegistry::new(broker.context(), config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timestamp_order_merges_partitions() {
    let broker = two_partition_broker();
    let reg = ordered_registry(&broker, PlaybackOrder::Timestamp);

    reg.start(PlaybackRequest::new("quotes", "replay", 5.0, 0, 5000))
        .await
        .unwrap();
    let start = Instant::now();

    // A ≈ 0 ms, B ≈ 200 ms, C ≈ 400 ms, completion ≈ 500 ms
    at(start, 100).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A")]);

    at(start, 300).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A"), json!("B")]);

    at(start, 700).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("A"), json!("B"), json!("C")]);
    assert!(reg.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_order_replays_in_poll_order() {
    let broker = two_partition_broker();
    let reg = ordered_registry(&broker, PlaybackOrder::Fetch);

    reg.start(PlaybackRequest::new("quotes", "replay", 5.0, 0, 5000))
        .await
        .unwrap();
    let start = Instant::now();

    // t0 = C (3000): более ранние A и B получают нулевую задержку
    at(start, 100).await;
    assert_eq!(delivered(&broker, "replay"), vec![json!("C"), json!("A"), json!("B")]);

    at(start, 300).await;
    assert!(reg.list().is_empty());
}

#[derive(serde::Deserialize)]
struct Order {
    sku: String,
    qty: u32,
}

#[derive(serde::Serialize)]
struct Line {
    sku: String,
    total: u32,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transform_filters_and_reshapes_messages() {
    let broker = MemoryBroker::new();
    broker.create_topic("orders", 1);
    broker.append("orders", 0, 1000, None, json!({ "sku": "x", "qty": 1 })).unwrap();
    broker.append("orders", 0, 1010, None, json!({ "sku": "y", "qty": 0 })).unwrap();
    broker.append("orders", 0, 1020, None, json!({ "sku": "z", "qty": 3 })).unwrap();
    let reg = registry(&broker);

    let transform = Arc::new(FilterMap::new(|m: TimedMessage<Order>| {
        (m.payload.qty > 0).then(|| {
            m.map(|o| Line {
                sku: o.sku,
                total: o.qty * 10,
            })
        })
    }));
    reg.start_with_transform(PlaybackRequest::new("orders", "lines", 1.0, 0, 5000), transform)
        .await
        .unwrap();

    let start = Instant::now();
    at(start, 400).await;

    assert_eq!(
        delivered(&broker, "lines"),
        vec![json!({ "sku": "x", "total": 10 }), json!({ "sku": "z", "total": 30 })]
    );
    assert!(reg.list().is_empty());
}

#[tokio::test]
async fn undecodable_record_fails_the_start() {
    let broker = orders_broker();
    let reg = registry(&broker);

    let transform = Arc::new(FilterMap::new(|m: TimedMessage<Order>| Some(m.map(|o| o.qty))));
    let err = reg
        .start_with_transform(PlaybackRequest::new("orders", "replay", 1.0, 1000, 2600), transform)
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybackError::DecodeFailure { offset: 0, .. }));
    assert!(reg.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_failures_do_not_abort_the_playback() {
    let broker = orders_broker();
    broker.reject_writes("replay", true);
    let reg = registry(&broker);

    reg.start(PlaybackRequest::new("orders", "replay", 4.0, 1000, 2600))
        .await
        .unwrap();

    let start = Instant::now();
    at(start, 800).await;

    assert!(delivered(&broker, "replay").is_empty());
    assert!(reg.list().is_empty());
}

#[tokio::test]
async fn unknown_source_topic_is_unavailable() {
    let broker = MemoryBroker::new();
    let reg = registry(&broker);

    let err = reg
        .start(PlaybackRequest::new("missing", "replay", 1.0, 0, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybackError::TopicUnavailable { ref topic, .. } if topic == "missing"));
    assert!(reg.list().is_empty());
}
