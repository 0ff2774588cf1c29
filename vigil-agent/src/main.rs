//! Vigil Agent - heartbeat sender for a watched device
//!
//! Runs on the machine being monitored and POSTs a heartbeat to the kernel
//! on a fixed interval. If this process stops, the kernel will alarm once
//! the timeout elapses.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::interval;

/// Agent configuration, resolved from environment variables.
#[derive(Debug, Clone)]
struct AgentConfig {
    backend_url: String,
    device_id: String,
    interval_secs: u64,
    max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            device_id: default_device_id(),
            interval_secs: 30,
            max_retries: 3,
        }
    }
}

impl AgentConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend_url: std::env::var("VIGIL_BACKEND_URL").unwrap_or(defaults.backend_url),
            device_id: std::env::var("VIGIL_DEVICE_ID").unwrap_or(defaults.device_id),
            interval_secs: std::env::var("VIGIL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.interval_secs),
            max_retries: defaults.max_retries,
        }
    }

    fn heartbeat_url(&self) -> String {
        format!("{}/heartbeat", self.backend_url.trim_end_matches('/'))
    }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn default_device_id() -> String {
    format!("device-{}", hostname())
}

#[derive(Debug, Serialize)]
struct HeartbeatBody {
    #[serde(rename = "deviceId")]
    device_id: String,
    timestamp: f64,
    hostname: String,
    platform: String,
}

struct Agent {
    config: AgentConfig,
    http: reqwest::Client,
}

impl Agent {
    fn new(config: AgentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    /// One heartbeat with bounded retries. Failures never kill the loop;
    /// a missed heartbeat is exactly what the kernel is there to notice.
    async fn send_heartbeat(&self) {
        for attempt in 0..=self.config.max_retries {
            match self.try_send().await {
                Ok(()) => {
                    println!("[agent] heartbeat sent - {}", self.config.device_id);
                    return;
                }
                Err(e) => {
                    eprintln!("[agent] heartbeat failed: {e}");
                    if attempt < self.config.max_retries {
                        println!(
                            "[agent] retrying... ({}/{})",
                            attempt + 1,
                            self.config.max_retries
                        );
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
    }

    async fn try_send(&self) -> Result<()> {
        let body = HeartbeatBody {
            device_id: self.config.device_id.clone(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            hostname: hostname(),
            platform: std::env::consts::OS.to_string(),
        };

        let resp = self
            .http
            .post(self.config.heartbeat_url())
            .json(&body)
            .send()
            .await
            .context("Connection error")?;

        if !resp.status().is_success() {
            anyhow::bail!("backend returned HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn run(&self) {
        println!("[agent] device id: {}", self.config.device_id);
        println!("[agent] backend:   {}", self.config.backend_url);
        println!("[agent] interval:  {}s", self.config.interval_secs);

        // First tick fires immediately: announce liveness on startup.
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        loop {
            ticker.tick().await;
            self.send_heartbeat().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env();
    let agent = Agent::new(config).context("Failed to create agent")?;
    agent.run().await;
    Ok(())
}
