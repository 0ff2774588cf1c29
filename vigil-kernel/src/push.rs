/**
 * PUSH TRANSPORT - Outbound client for the Expo push gateway
 *
 * ROLE: Takes a batch of prepared messages and submits it to the external
 * gateway, returning one delivery ticket per message. The dispatcher owns
 * chunking and error isolation; this layer is one HTTP call per batch,
 * bounded by the request timeout.
 */

use crate::config::PushConf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub priority: String,
    /// Dedicated alarm channel so the receiving device does not suppress it.
    #[serde(rename = "channelId")]
    pub channel_id: String,
}

/// Per-message delivery ticket returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicket {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("push gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("push gateway rejected batch: HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Submit one batch. The batch already respects the gateway chunk limit.
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, TransportError>;

    /// Largest batch the gateway accepts in one call.
    fn chunk_size(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    data: Vec<PushTicket>,
}

pub struct ExpoPushClient {
    http: reqwest::Client,
    url: String,
    chunk_size: usize,
}

impl ExpoPushClient {
    /// Fails if the HTTP client cannot be built; the request timeout is the
    /// only bound on an outbound batch and must not be silently dropped.
    pub fn new(conf: &PushConf) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(conf.request_timeout_seconds))
            .build()?;
        Ok(Self { http, url: conf.url.clone(), chunk_size: conf.chunk_size })
    }
}

#[async_trait]
impl PushTransport for ExpoPushClient {
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, TransportError> {
        let resp = self.http.post(&self.url).json(messages).send().await?;
        if !resp.status().is_success() {
            return Err(TransportError::Status(resp.status().as_u16()));
        }
        let parsed: GatewayResponse = resp.json().await?;
        Ok(parsed.data)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
