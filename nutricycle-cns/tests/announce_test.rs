//! Announce loop against a local discovery server

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use nutricycle_cns::{AnnounceConfig, AnnounceLoop, AnnounceOutcome};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct Fake {
    announced: Arc<Mutex<Vec<Value>>>,
    tunnel_hits: Arc<AtomicUsize>,
    reject: bool,
}

async fn tunnels(State(fake): State<Fake>) -> Json<Value> {
    fake.tunnel_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "tunnels": [
            {"public_url": "http://plain.example", "proto": "http"},
            {"public_url": "https://secure.example", "proto": "https"}
        ]
    }))
}

async fn announce(State(fake): State<Fake>, Json(body): Json<Value>) -> StatusCode {
    if fake.reject {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    fake.announced.lock().push(body);
    StatusCode::OK
}

async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/api/tunnels", get(tunnels))
        .route("/announce", post(announce))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_discovers_https_tunnel_and_announces() {
    let fake = Fake::default();
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        tunnel_api: format!("{}/api/tunnels", base),
        ..AnnounceConfig::default()
    };

    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    let outcome = announce.announce_once().await;
    assert_eq!(outcome, AnnounceOutcome::Announced("https://secure.example".to_string()));

    let posted = fake.announced.lock().clone();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0]["machine_id"], "A");
    assert_eq!(posted[0]["video_url"], "https://secure.example");
    assert!(posted[0]["timestamp"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_discovered_url_is_cached() {
    let fake = Fake::default();
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        tunnel_api: format!("{}/api/tunnels", base),
        ..AnnounceConfig::default()
    };

    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    announce.announce_once().await;
    announce.announce_once().await;

    assert_eq!(fake.tunnel_hits.load(Ordering::SeqCst), 1);
    assert_eq!(fake.announced.lock().len(), 2);
    assert_eq!(announce.public_url(), Some("https://secure.example"));
}

#[tokio::test]
async fn test_configured_url_skips_discovery() {
    let fake = Fake::default();
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        tunnel_api: format!("{}/api/tunnels", base),
        public_url: Some("https://fixed.example/stream".to_string()),
        ..AnnounceConfig::default()
    };

    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    announce.announce_once().await;

    assert_eq!(fake.tunnel_hits.load(Ordering::SeqCst), 0);
    assert_eq!(fake.announced.lock()[0]["video_url"], "https://fixed.example/stream");
}

#[tokio::test]
async fn test_unreachable_tunnel_api_skips() {
    let fake = Fake::default();
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        tunnel_api: format!("http://127.0.0.1:{}/api/tunnels", unused_port()),
        ..AnnounceConfig::default()
    };

    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    assert!(matches!(announce.announce_once().await, AnnounceOutcome::Skipped(_)));
    assert!(fake.announced.lock().is_empty());
}

#[tokio::test]
async fn test_server_errors_are_reported_not_raised() {
    let fake = Fake {
        reject: true,
        ..Fake::default()
    };
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        public_url: Some("https://fixed.example".to_string()),
        ..AnnounceConfig::default()
    };
    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    assert!(matches!(announce.announce_once().await, AnnounceOutcome::Failed(_)));

    let config = AnnounceConfig {
        server: Some(format!("http://127.0.0.1:{}/announce", unused_port())),
        public_url: Some("https://fixed.example".to_string()),
        ..AnnounceConfig::default()
    };
    let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    assert!(matches!(announce.announce_once().await, AnnounceOutcome::Failed(_)));
}

#[tokio::test]
async fn test_run_keeps_announcing() {
    let fake = Fake::default();
    let base = serve(fake.clone()).await;
    let config = AnnounceConfig {
        server: Some(format!("{}/announce", base)),
        public_url: Some("https://fixed.example".to_string()),
        interval_secs: 1,
        ..AnnounceConfig::default()
    };

    let announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
    let handle = tokio::spawn(announce.run());

    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while fake.announced.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    handle.abort();

    assert!(waited.is_ok(), "expected at least two announcements");
}
