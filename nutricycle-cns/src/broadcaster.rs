//! Drains the event queue onto the broker

use crate::broker::Broker;
use crate::config::TopicConfig;
use bytes::Bytes;
use nutricycle_core::{DetectionEvent, EventQueue};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct BroadcastStats {
    processed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastSnapshot {
    /// Events taken off the queue
    pub processed: u64,
    /// Successful publishes (two per event when a broker is present)
    pub published: u64,
    pub failed: u64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastSnapshot {
        BroadcastSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Single consumer of the event queue. Each event goes to the detections
/// topic in full, then as a compact alert to the actuator topic.
pub struct EventBroadcaster {
    queue: Arc<EventQueue<DetectionEvent>>,
    broker: Option<Arc<dyn Broker>>,
    topics: TopicConfig,
    stats: Arc<BroadcastStats>,
}

impl EventBroadcaster {
    pub fn new(
        queue: Arc<EventQueue<DetectionEvent>>,
        broker: Option<Arc<dyn Broker>>,
        topics: TopicConfig,
    ) -> Self {
        Self {
            queue,
            broker,
            topics,
            stats: Arc::new(BroadcastStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BroadcastStats> {
        self.stats.clone()
    }

    /// Run until the queue shuts down.
    pub async fn run(self) -> BroadcastSnapshot {
        if self.broker.is_none() {
            info!("No broker configured, detection events will be drained without publishing");
        }

        while let Some(event) = self.queue.dequeue().await {
            self.broadcast(&event).await;
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Event broadcaster stopped: {} processed, {} published, {} failed",
            snapshot.processed, snapshot.published, snapshot.failed
        );
        snapshot
    }

    pub async fn broadcast(&self, event: &DetectionEvent) {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        info!(
            "Detection event: frame {} with {} objects (machine {})",
            event.frame_id,
            event.detections.len(),
            event.machine_id.as_deref().unwrap_or("-")
        );

        let Some(broker) = &self.broker else {
            return;
        };

        match event.to_json() {
            Ok(payload) => self.publish(broker.as_ref(), &self.topics.detections, payload).await,
            Err(e) => {
                error!("Failed to serialize event for frame {}: {}", event.frame_id, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        match event.alert_json() {
            Ok(payload) => self.publish(broker.as_ref(), &self.topics.alert, payload).await,
            Err(e) => {
                error!("Failed to serialize alert for frame {}: {}", event.frame_id, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn publish(&self, broker: &dyn Broker, topic: &str, payload: Vec<u8>) {
        match broker.publish(topic, Bytes::from(payload)).await {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::error::CnsError;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use nutricycle_core::{BoundingBox, ClassTable, Detection};

    fn event(frame_id: u64) -> DetectionEvent {
        DetectionEvent::from_pass(
            frame_id,
            640,
            480,
            vec![Detection::new(
                0,
                0.8,
                BoundingBox::new(10.0, 10.0, 4.0, 4.0),
                &ClassTable::default(),
            )],
            Some("A".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_event_then_alert_per_event() {
        let mut broker = MockBroker::new();
        let mut seq = Sequence::new();
        broker
            .expect_publish()
            .with(eq("nutricycle/detections"), mockall::predicate::always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, payload| {
                let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                assert_eq!(json["frame_id"], 7);
                Ok(())
            });
        broker
            .expect_publish()
            .with(eq("nutricycle/esp32"), mockall::predicate::always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, payload| {
                let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                assert_eq!(json, serde_json::json!({"machine_id": "A", "alert": true}));
                Ok(())
            });

        let queue = Arc::new(EventQueue::new(4));
        let broadcaster = EventBroadcaster::new(queue, Some(Arc::new(broker)), TopicConfig::default());
        broadcaster.broadcast(&event(7)).await;

        assert_eq!(
            broadcaster.stats().snapshot(),
            BroadcastSnapshot {
                processed: 1,
                published: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_loop() {
        let mut broker = MockBroker::new();
        broker
            .expect_publish()
            .returning(|_, _| Err(CnsError::NotConnected));

        let queue = Arc::new(EventQueue::new(4));
        queue.enqueue(event(1));
        queue.enqueue(event(2));
        queue.enqueue(event(3));

        let broadcaster = EventBroadcaster::new(queue.clone(), Some(Arc::new(broker)), TopicConfig::default());
        let stats = broadcaster.stats();
        let handle = tokio::spawn(broadcaster.run());

        while stats.snapshot().processed < 3 {
            tokio::task::yield_now().await;
        }
        queue.shutdown();

        let snapshot = handle.await.unwrap();
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.failed, 6);
        assert_eq!(snapshot.published, 0);
    }

    #[tokio::test]
    async fn test_drains_without_broker() {
        let queue = Arc::new(EventQueue::new(4));
        for i in 0..4 {
            queue.enqueue(event(i));
        }

        let broadcaster = EventBroadcaster::new(queue.clone(), None, TopicConfig::default());
        let stats = broadcaster.stats();
        let handle = tokio::spawn(broadcaster.run());

        while stats.snapshot().processed < 4 {
            tokio::task::yield_now().await;
        }
        assert!(queue.is_empty());
        queue.shutdown();

        let snapshot = handle.await.unwrap();
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.published, 0);
    }
}
