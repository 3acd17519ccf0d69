//! Preview transport: latest-frame hub and viewer connection state

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use nutricycle_eye::{AnnotatedFrame, FrameSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

pub const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Unknown connection: {0}")]
    UnknownConnection(Uuid),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Viewer connection lifecycle: new -> connecting -> connected -> failed/closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (New, Connecting) => true,
            (Connecting, Connected) => true,
            (New | Connecting | Connected, Failed | Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Entry {
    peer: String,
    state: ConnectionState,
    opened_at: Instant,
    close_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: String,
    pub state: ConnectionState,
    pub age_secs: u64,
}

/// All live viewer connections. Terminal connections are removed.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in state `new`.
    pub fn open(self: &Arc<Self>, peer: impl Into<String>) -> Connection {
        let id = Uuid::new_v4();
        let peer = peer.into();
        let (close_tx, close_rx) = watch::channel(false);
        debug!("Connection {} opened for {}", id, peer);
        self.entries.lock().insert(
            id,
            Entry {
                peer,
                state: ConnectionState::New,
                opened_at: Instant::now(),
                close_tx,
            },
        );
        Connection {
            id,
            registry: self.clone(),
            close_rx,
        }
    }

    /// The single transition handler. Returns the previous state.
    pub fn transition(
        &self,
        id: Uuid,
        next: ConnectionState,
    ) -> Result<ConnectionState, TransportError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&id)
            .ok_or(TransportError::UnknownConnection(id))?;
        let previous = entry.state;
        if !previous.can_transition_to(next) {
            return Err(TransportError::InvalidTransition {
                id,
                from: previous,
                to: next,
            });
        }
        entry.state = next;
        info!("Connection {} ({}) state: {} -> {}", id, entry.peer, previous, next);

        if next.is_terminal() {
            if let Some(entry) = entries.remove(&id) {
                entry.close_tx.send_replace(true);
            }
        }
        Ok(previous)
    }

    pub fn state(&self, id: Uuid) -> Option<ConnectionState> {
        self.entries.lock().get(&id).map(|e| e.state)
    }

    pub fn active(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.entries
            .lock()
            .iter()
            .map(|(id, e)| ConnectionInfo {
                id: *id,
                peer: e.peer.clone(),
                state: e.state,
                age_secs: e.opened_at.elapsed().as_secs(),
            })
            .collect()
    }

    /// Close every connection. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.entries.lock().keys().copied().collect();
        let count = ids.len();
        for id in ids {
            let _ = self.transition(id, ConnectionState::Closed);
        }
        if count > 0 {
            info!("Closed {} viewer connection(s)", count);
        }
        count
    }
}

/// Handle held by whoever serves the viewer. Dropping it closes the connection.
pub struct Connection {
    id: Uuid,
    registry: Arc<ConnectionRegistry>,
    close_rx: watch::Receiver<bool>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.registry.state(self.id)
    }

    pub fn set_state(&self, next: ConnectionState) -> Result<ConnectionState, TransportError> {
        self.registry.transition(self.id, next)
    }

    /// Resolves once the connection reaches a terminal state.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.close_rx.clone();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.registry.state(self.id).is_some() {
            let _ = self.registry.transition(self.id, ConnectionState::Closed);
        }
    }
}

pub fn encode_jpeg(frame: &AnnotatedFrame, quality: u8) -> Result<Bytes, TransportError> {
    let mut buf = Vec::with_capacity((frame.image.width() * frame.image.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(frame.image.as_ref())
        .map_err(|e| TransportError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Keeps the latest annotated frame for preview viewers.
pub struct FrameHub {
    tx: watch::Sender<Option<AnnotatedFrame>>,
    encoded: Mutex<Option<(u64, Bytes)>>,
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHub {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            encoded: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AnnotatedFrame>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<AnnotatedFrame> {
        self.tx.borrow().clone()
    }

    /// Latest frame as JPEG; encoded once per frame.
    pub fn latest_jpeg(&self) -> Result<Option<(u64, Bytes)>, TransportError> {
        let Some(frame) = self.latest() else {
            return Ok(None);
        };
        let mut cache = self.encoded.lock();
        if let Some((sequence, bytes)) = cache.as_ref() {
            if *sequence == frame.sequence {
                return Ok(Some((*sequence, bytes.clone())));
            }
        }
        let bytes = encode_jpeg(&frame, JPEG_QUALITY)?;
        *cache = Some((frame.sequence, bytes.clone()));
        Ok(Some((frame.sequence, bytes)))
    }
}

impl FrameSink for FrameHub {
    fn publish(&self, frame: AnnotatedFrame) {
        if self.tx.borrow().is_none() {
            info!("First annotated frame available for preview");
        }
        self.tx.send_replace(Some(frame));
    }
}
