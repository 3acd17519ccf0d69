//! Application context shared by HTTP handlers and background tasks

use crate::config::NodeConfig;
use crate::transport::{ConnectionRegistry, FrameHub};
use nutricycle_cns::{BroadcastStats, Broker, CommandChannel};
use nutricycle_core::{DetectionEvent, EventQueue};
use nutricycle_eye::ProducerStats;
use std::sync::Arc;
use std::time::Instant;

/// Built once at startup; everything shared lives here.
pub struct AppContext {
    pub config: NodeConfig,
    pub queue: Arc<EventQueue<DetectionEvent>>,
    pub broker: Option<Arc<dyn Broker>>,
    pub commands: CommandChannel,
    pub hub: Arc<FrameHub>,
    pub connections: Arc<ConnectionRegistry>,
    pub producer_stats: Arc<ProducerStats>,
    pub broadcast_stats: Arc<BroadcastStats>,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(config: NodeConfig, broker: Option<Arc<dyn Broker>>) -> Self {
        let commands = CommandChannel::new(
            config.machine_id.clone(),
            config.control.token.clone(),
            broker.clone(),
            config.broker.topics.command_topic(),
        );
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        Self {
            config,
            queue,
            broker,
            commands,
            hub: Arc::new(FrameHub::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            producer_stats: Arc::new(ProducerStats::default()),
            broadcast_stats: Arc::new(BroadcastStats::default()),
            started_at: Instant::now(),
        }
    }

    /// Swap in the stats of the tasks actually spawned.
    pub fn with_stats(
        mut self,
        producer_stats: Arc<ProducerStats>,
        broadcast_stats: Arc<BroadcastStats>,
    ) -> Self {
        self.producer_stats = producer_stats;
        self.broadcast_stats = broadcast_stats;
        self
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.config.machine_id.as_deref()
    }

    pub fn broker_connected(&self) -> bool {
        self.broker.as_ref().map(|b| b.is_connected()).unwrap_or(false)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
