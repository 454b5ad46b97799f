// tests/integration/events_test.rs

use super::test_helpers::*;
use async_trait::async_trait;
use futures::StreamExt;
use lavalink_cluster::core::events::{ClientEvent, EventBus, EventHandler};
use lavalink_cluster::core::node::NodeHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (EventBus, Arc<NodeHandle>) {
    init_tracing();
    let bus = EventBus::new();
    let node = NodeHandle::new(node_config("alpha"), MockTransport::new(), bus.clone());
    (bus, node)
}

fn stats_event(node: &Arc<NodeHandle>, seq: u32) -> ClientEvent {
    ClientEvent::Stats {
        node: node.clone(),
        stats: stats(seq),
    }
}

fn seq_of(event: &ClientEvent) -> u32 {
    match event {
        ClientEvent::Stats { stats, .. } => stats.playing_players,
        other => panic!("unexpected event {other:?}"),
    }
}

/// Records the sequence numbers it sees and fails on one of them.
struct Recorder {
    seen: Arc<Mutex<Vec<u32>>>,
    fail_on: Option<u32>,
    panic_on: Option<u32>,
}

impl Recorder {
    fn new(fail_on: Option<u32>, panic_on: Option<u32>) -> (Arc<Self>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(Self {
            seen: seen.clone(),
            fail_on,
            panic_on,
        });
        (recorder, seen)
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: Arc<ClientEvent>) -> anyhow::Result<()> {
        let seq = seq_of(&event);
        self.seen.lock().push(seq);
        if self.fail_on == Some(seq) {
            anyhow::bail!("refusing event {seq}");
        }
        if self.panic_on == Some(seq) {
            panic!("handler exploded on {seq}");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_every_subscriber_sees_every_event_in_order() {
    let (bus, node) = setup();
    let recorders: Vec<_> = (0..3).map(|_| Recorder::new(None, None)).collect();
    let _subs: Vec<_> = recorders
        .iter()
        .map(|(recorder, _)| bus.subscribe(recorder.clone()))
        .collect();

    for seq in 0..50 {
        assert_eq!(bus.emit(stats_event(&node, seq)), 3);
    }

    let expected: Vec<u32> = (0..50).collect();
    for (_, seen) in &recorders {
        assert!(wait_for(|| seen.lock().len() == 50, WAIT).await);
        assert_eq!(*seen.lock(), expected);
    }
}

#[tokio::test]
async fn test_failing_subscriber_is_dropped_others_continue() {
    let (bus, node) = setup();
    let (failing, failing_seen) = Recorder::new(Some(2), None);
    let (healthy, healthy_seen) = Recorder::new(None, None);
    let failing_sub = bus.subscribe(failing);
    let _healthy_sub = bus.subscribe(healthy);

    for seq in 0..3 {
        bus.emit(stats_event(&node, seq));
    }
    assert!(wait_for(|| !failing_sub.is_active(), WAIT).await);
    for seq in 3..6 {
        bus.emit(stats_event(&node, seq));
    }

    assert!(wait_for(|| healthy_seen.lock().len() == 6, WAIT).await);
    assert_eq!(*failing_seen.lock(), vec![0, 1, 2]);
    assert_eq!(*healthy_seen.lock(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(bus.subscriber_count(), 1);
}

#[tokio::test]
async fn test_panicking_subscriber_is_isolated() {
    let (bus, node) = setup();
    let (panicking, panicking_seen) = Recorder::new(None, Some(0));
    let (healthy, healthy_seen) = Recorder::new(None, None);
    let panicking_sub = bus.subscribe(panicking);
    let _healthy_sub = bus.subscribe(healthy);

    bus.emit(stats_event(&node, 0));
    assert!(wait_for(|| !panicking_sub.is_active(), WAIT).await);
    bus.emit(stats_event(&node, 1));

    assert!(wait_for(|| healthy_seen.lock().len() == 2, WAIT).await);
    assert_eq!(*panicking_seen.lock(), vec![0]);
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_emit() {
    let (bus, node) = setup();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let received = Arc::new(Mutex::new(0u32));

    struct Slow {
        gate: Arc<tokio::sync::Semaphore>,
        received: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl EventHandler for Slow {
        async fn handle(&self, _event: Arc<ClientEvent>) -> anyhow::Result<()> {
            self.gate.acquire().await?.forget();
            *self.received.lock() += 1;
            Ok(())
        }
    }

    let _sub = bus.subscribe(Arc::new(Slow {
        gate: gate.clone(),
        received: received.clone(),
    }));
    for seq in 0..100 {
        bus.emit(stats_event(&node, seq));
    }
    assert_eq!(*received.lock(), 0);

    gate.add_permits(100);
    assert!(wait_for(|| *received.lock() == 100, WAIT).await);
}

#[tokio::test]
async fn test_filtered_subscription_only_sees_matching_events() {
    let (bus, node) = setup();
    let (recorder, seen) = Recorder::new(None, None);
    let _sub = bus.subscribe_filtered(|event| seq_of(event) % 2 == 0, recorder);

    for seq in 0..6 {
        bus.emit(stats_event(&node, seq));
    }
    assert!(wait_for(|| seen.lock().len() == 3, WAIT).await);
    assert_eq!(*seen.lock(), vec![0, 2, 4]);
}

#[tokio::test]
async fn test_filter_may_call_back_into_the_bus() {
    let (bus, node) = setup();
    let (recorder, seen) = Recorder::new(None, None);
    let (inner_bus, inner_node) = (bus.clone(), node.clone());
    let _sub = bus.subscribe_filtered(
        move |event| {
            let seq = seq_of(event);
            assert!(inner_bus.subscriber_count() >= 1);
            if seq < 3 {
                inner_bus.emit(stats_event(&inner_node, seq + 10));
            }
            seq % 2 == 0
        },
        recorder,
    );

    for seq in 0..3 {
        bus.emit(stats_event(&node, seq));
    }
    assert!(wait_for(|| seen.lock().len() == 4, WAIT).await);
    assert_eq!(*seen.lock(), vec![0, 2, 10, 12]);
}

#[tokio::test]
async fn test_cancelled_subscription_stops_receiving() {
    let (bus, node) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sub = {
        let seen = seen.clone();
        bus.subscribe_fn(move |event| {
            seen.lock().push(seq_of(&event));
            Ok(())
        })
    };

    bus.emit(stats_event(&node, 0));
    assert!(wait_for(|| seen.lock().len() == 1, WAIT).await);

    sub.cancel().await;
    assert_eq!(bus.emit(stats_event(&node, 1)), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*seen.lock(), vec![0]);
}

#[tokio::test]
async fn test_stream_receives_node_events_with_node_reference() {
    let (bus, node) = setup();
    let mut stream = bus.stream();

    make_ready(&node);
    send_stats(&node, 4);

    let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(first.kind(), "ready");
    assert_eq!(second.kind(), "stats");
    assert!(Arc::ptr_eq(first.node(), &node));
    assert!(Arc::ptr_eq(second.node(), &node));
}

#[tokio::test]
async fn test_dropped_stream_is_pruned() {
    let (bus, node) = setup();
    let stream = bus.stream();
    assert_eq!(bus.subscriber_count(), 1);
    drop(stream);
    assert_eq!(bus.emit(stats_event(&node, 0)), 0);
    assert_eq!(bus.subscriber_count(), 0);
}
