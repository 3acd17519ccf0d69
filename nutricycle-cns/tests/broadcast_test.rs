//! Broadcaster and command channel against an in-memory broker

use async_trait::async_trait;
use bytes::Bytes;
use nutricycle_cns::{Broker, CnsError, CommandChannel, CommandError, EventBroadcaster, TopicConfig};
use nutricycle_core::{BoundingBox, ClassTable, Detection, DetectionEvent, EventQueue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RecordingBroker {
    published: Mutex<Vec<(String, serde_json::Value)>>,
    down: AtomicBool,
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), CnsError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CnsError::NotConnected);
        }
        let value = serde_json::from_slice(&payload)
            .map_err(|e| CnsError::Serialization(e.to_string()))?;
        self.published.lock().push((topic.to_string(), value));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), CnsError> {
        self.down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn event(frame_id: u64) -> DetectionEvent {
    let classes = ClassTable::default();
    DetectionEvent::from_pass(
        frame_id,
        320,
        320,
        vec![
            Detection::new(0, 0.9, BoundingBox::new(50.0, 50.0, 20.0, 20.0), &classes),
            Detection::new(0, 0.6, BoundingBox::new(150.0, 80.0, 10.0, 30.0), &classes),
        ],
        Some("A".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_events_reach_both_topics_in_order() {
    let broker = Arc::new(RecordingBroker::default());
    let queue = Arc::new(EventQueue::new(8));
    for i in 1..=3 {
        queue.enqueue(event(i));
    }

    let broadcaster = EventBroadcaster::new(queue.clone(), Some(broker.clone()), TopicConfig::default());
    let stats = broadcaster.stats();
    let handle = tokio::spawn(broadcaster.run());
    while stats.snapshot().processed < 3 {
        tokio::task::yield_now().await;
    }
    queue.shutdown();
    let snapshot = handle.await.unwrap();
    assert_eq!(snapshot.published, 6);

    let published = broker.published.lock().clone();
    let topics: Vec<&str> = published.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "nutricycle/detections",
            "nutricycle/esp32",
            "nutricycle/detections",
            "nutricycle/esp32",
            "nutricycle/detections",
            "nutricycle/esp32",
        ]
    );
    assert_eq!(published[0].1["frame_id"], 1);
    assert_eq!(published[0].1["detections"].as_array().unwrap().len(), 2);
    assert_eq!(published[0].1["detections"][0]["name"], "foreign_object");
    assert_eq!(published[4].1["frame_id"], 3);
    assert_eq!(published[1].1, serde_json::json!({"machine_id": "A", "alert": true}));
}

#[tokio::test]
async fn test_command_forwarded_over_shared_broker() {
    let broker = Arc::new(RecordingBroker::default());
    let channel = CommandChannel::new(
        Some("A".to_string()),
        Some("secret".to_string()),
        Some(broker.clone()),
        "nutricycle/esp32",
    );

    let command = channel
        .handle(br#"{"machine_id":"A","command":"start"}"#, Some("Bearer secret"))
        .await
        .unwrap();
    assert_eq!(command.machine_id, "A");

    let published = broker.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "nutricycle/esp32");
    assert_eq!(published[0].1["command"], "start");
    assert!(published[0].1["timestamp"].as_f64().is_some());

    broker.disconnect().await.unwrap();
    let err = channel
        .handle(br#"{"machine_id":"A","command":"stop"}"#, Some("Bearer secret"))
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::BrokerUnavailable);
}
