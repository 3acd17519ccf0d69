//! Periodic self-registration with the discovery service

use crate::config::AnnounceConfig;
use crate::error::CnsError;
use nutricycle_core::AnnouncePayload;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<Tunnel>,
}

#[derive(Debug, Deserialize)]
struct Tunnel {
    #[serde(default)]
    public_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// Payload accepted; carries the announced URL
    Announced(String),
    /// Nothing to do this cycle
    Skipped(&'static str),
    Failed(String),
}

pub struct AnnounceLoop {
    config: AnnounceConfig,
    machine_id: Option<String>,
    client: reqwest::Client,
    /// Configured or previously discovered address
    public_url: Option<String>,
}

impl AnnounceLoop {
    pub fn new(config: AnnounceConfig, machine_id: Option<String>) -> Result<Self, CnsError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nutricycle/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let public_url = config.public_url.clone();
        Ok(Self {
            config,
            machine_id,
            client,
            public_url,
        })
    }

    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    /// First https tunnel advertised by the local tunnel agent.
    pub async fn discover_public_url(&self) -> Option<String> {
        let response = self
            .client
            .get(&self.config.tunnel_api)
            .timeout(Duration::from_millis(self.config.discovery_timeout_ms))
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Tunnel API answered {}", r.status());
                return None;
            }
            Err(e) => {
                debug!("Tunnel API unreachable: {}", e);
                return None;
            }
        };

        match response.json::<TunnelList>().await {
            Ok(list) => list
                .tunnels
                .into_iter()
                .map(|t| t.public_url)
                .find(|url| url.starts_with("https")),
            Err(e) => {
                debug!("Unparsable tunnel list: {}", e);
                None
            }
        }
    }

    /// One announce cycle. Never fails the caller.
    pub async fn announce_once(&mut self) -> AnnounceOutcome {
        if self.public_url.is_none() {
            if let Some(url) = self.discover_public_url().await {
                info!("Discovered public URL {}", url);
                self.public_url = Some(url);
            }
        }

        let Some(server) = self.config.server.as_deref() else {
            return AnnounceOutcome::Skipped("no announce server configured");
        };
        let Some(machine_id) = self.machine_id.as_deref() else {
            return AnnounceOutcome::Skipped("no machine id configured");
        };
        let Some(url) = self.public_url.as_deref() else {
            return AnnounceOutcome::Skipped("no public URL known");
        };

        let payload = AnnouncePayload::now(machine_id, url);
        let result = self
            .client
            .post(server)
            .timeout(Duration::from_millis(self.config.post_timeout_ms))
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Announced to server: {}", server);
                AnnounceOutcome::Announced(url.to_string())
            }
            Ok(response) => {
                let msg = format!("{} answered {}", server, response.status());
                warn!("Failed to announce: {}", msg);
                AnnounceOutcome::Failed(msg)
            }
            Err(e) => {
                warn!("Failed to announce: {}", e);
                AnnounceOutcome::Failed(e.to_string())
            }
        }
    }

    /// Announce every interval until the task is cancelled.
    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!("Announce loop started (every {}s)", self.config.interval_secs);
        loop {
            if let AnnounceOutcome::Skipped(reason) = self.announce_once().await {
                debug!("Announce skipped: {}", reason);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_list_parsing() {
        let list: TunnelList = serde_json::from_str(
            r#"{"tunnels":[{"public_url":"http://a.ngrok.io"},{"public_url":"https://a.ngrok.io","proto":"https"}]}"#,
        )
        .unwrap();
        assert_eq!(list.tunnels.len(), 2);

        let empty: TunnelList = serde_json::from_str("{}").unwrap();
        assert!(empty.tunnels.is_empty());
    }

    #[tokio::test]
    async fn test_skips_without_server() {
        let config = AnnounceConfig {
            public_url: Some("https://node.example".to_string()),
            ..AnnounceConfig::default()
        };
        let mut announce = AnnounceLoop::new(config, Some("A".to_string())).unwrap();
        assert_eq!(
            announce.announce_once().await,
            AnnounceOutcome::Skipped("no announce server configured")
        );
    }

    #[tokio::test]
    async fn test_skips_without_machine_id() {
        let config = AnnounceConfig {
            server: Some("http://127.0.0.1:9/announce".to_string()),
            public_url: Some("https://node.example".to_string()),
            ..AnnounceConfig::default()
        };
        let mut announce = AnnounceLoop::new(config, None).unwrap();
        assert!(matches!(announce.announce_once().await, AnnounceOutcome::Skipped(_)));
    }
}
