//! Startup and teardown of a detection node

use crate::config::NodeConfig;
use crate::context::AppContext;
use crate::http::create_router;
use anyhow::Context as _;
use nutricycle_cns::{AnnounceLoop, BroadcastSnapshot, Broker, EventBroadcaster, MqttBroker};
use nutricycle_core::ClassTable;
use nutricycle_eye::{
    create_backend, DetectorBackend, FrameSource, ProducerConfig, ProducerReport, StopReason,
    StreamProducer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Connect to the configured broker. Failure leaves the node broker-less.
pub async fn connect_broker(config: &NodeConfig) -> Option<Arc<dyn Broker>> {
    config.broker.host.as_ref()?;
    match MqttBroker::connect(&config.broker, config.machine_id.as_deref()).await {
        Ok(broker) => Some(Arc::new(broker)),
        Err(e) => {
            warn!("MQTT unavailable, continuing without broker: {}", e);
            None
        }
    }
}

/// Everything spawned for one node.
pub struct RunningNode {
    context: Arc<AppContext>,
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    producer: JoinHandle<ProducerReport>,
    broadcaster: JoinHandle<BroadcastSnapshot>,
    announce: Option<JoinHandle<()>>,
    http: JoinHandle<()>,
    http_stop: oneshot::Sender<()>,
}

/// Build backend and source from config, then start.
pub async fn start(config: NodeConfig) -> anyhow::Result<RunningNode> {
    let broker = connect_broker(&config).await;

    let classes = ClassTable::from_names(config.vision.class_names.iter().cloned());
    let backend = create_backend(&config.vision, classes).context("Failed to load detector")?;
    info!("Detector backend ready: {}", backend.name());

    let vision = config.vision.clone();
    let source = tokio::task::spawn_blocking(move || FrameSource::open(&vision))
        .await
        .context("Source open task failed")?
        .context("Failed to open frame source")?;

    start_with(config, source, backend, broker).await
}

/// Start with already constructed collaborators.
pub async fn start_with(
    config: NodeConfig,
    source: FrameSource,
    backend: Arc<dyn DetectorBackend>,
    broker: Option<Arc<dyn Broker>>,
) -> anyhow::Result<RunningNode> {
    let bind = config.http.bind_address();
    let context = AppContext::new(config, broker);

    let producer_config = ProducerConfig::for_source(
        &source,
        context.config.vision.confidence_threshold,
        context.config.machine_id.clone(),
    );
    let source_name = source.describe();
    let producer = StreamProducer::new(
        source,
        backend,
        context.hub.clone(),
        context.queue.clone(),
        producer_config,
    );
    let broadcaster = EventBroadcaster::new(
        context.queue.clone(),
        context.broker.clone(),
        context.config.broker.topics.clone(),
    );
    let context = Arc::new(context.with_stats(producer.stats(), broadcaster.stats()));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", bind))?;
    let local_addr = listener.local_addr()?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let producer = tokio::spawn(producer.run(stop_rx));
    let broadcaster = tokio::spawn(broadcaster.run());

    let announce = if context.config.announce.server.is_some() {
        let announce = AnnounceLoop::new(
            context.config.announce.clone(),
            context.config.machine_id.clone(),
        )?;
        Some(tokio::spawn(announce.run()))
    } else {
        info!("No announce server configured, announce loop disabled");
        None
    };

    let (http_stop, http_stop_rx) = oneshot::channel::<()>();
    let app = create_router(context.clone());
    let http = tokio::spawn(async move {
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = http_stop_rx.await;
        });
        if let Err(e) = server.await {
            error!("HTTP server failed: {}", e);
        }
    });

    info!(
        "Node {} streaming from {} (broker: {}, http: {})",
        context.machine_id().unwrap_or("-"),
        source_name,
        if context.broker_connected() { "connected" } else { "none" },
        local_addr
    );

    Ok(RunningNode {
        context,
        local_addr,
        stop_tx,
        producer,
        broadcaster,
        announce,
        http,
        http_stop,
    })
}

impl RunningNode {
    pub fn context(&self) -> Arc<AppContext> {
        self.context.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn producer_finished(&self) -> bool {
        self.producer.is_finished()
    }

    /// Stop producer, broadcaster, announce, viewers, HTTP, then the broker.
    pub async fn shutdown(self) -> anyhow::Result<ProducerReport> {
        info!("Shutting down node");
        let _ = self.stop_tx.send(true);

        let report = self.producer.await.context("Producer task panicked")?;
        match &report.reason {
            StopReason::SourceFailed(msg) => warn!("Producer stopped: source failed: {}", msg),
            reason => info!("Producer stopped: {:?}", reason),
        }

        // The producer shuts the queue down on exit, releasing the broadcaster.
        match self.broadcaster.await {
            Ok(snapshot) => info!("Broadcaster finished after {} events", snapshot.processed),
            Err(e) => warn!("Broadcaster task failed: {}", e),
        }

        if let Some(announce) = self.announce {
            announce.abort();
        }

        self.context.connections.close_all();
        let _ = self.http_stop.send(());
        if let Err(e) = self.http.await {
            warn!("HTTP task failed: {}", e);
        }

        if let Some(broker) = &self.context.broker {
            if let Err(e) = broker.disconnect().await {
                warn!("Broker disconnect failed: {}", e);
            }
        }

        info!("Node stopped");
        Ok(report)
    }
}
