/**
 * ALARM DISPATCHER - Notification fan-out to registered phones
 *
 * ROLE: Single entry point (notify_all) used by the liveness sweeper, the
 * heartbeat recovery path and the manual trigger endpoint. Partitions
 * recipients by capability, builds one gateway message per remote token,
 * chunks to the gateway limit and submits each batch independently.
 *
 * Dispatch is fire-and-forget: failed batches are logged and collected,
 * never retried, and never fail sibling batches.
 */

use crate::push::{PushMessage, PushTicket, PushTransport};
use crate::recipients::RecipientRegistry;
use serde::Serialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// A single liveness transition or manual trigger, consumed once.
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    pub event_id: Uuid,
    pub device_id: Option<String>,
    pub reason: String,
    pub timestamp: OffsetDateTime,
}

impl AlarmEvent {
    pub fn device_down(device_id: &str, elapsed_seconds: i64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            device_id: Some(device_id.to_string()),
            reason: format!("no heartbeat for {elapsed_seconds} seconds"),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn manual(reason: &str, device_id: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            device_id,
            reason: reason.to_string(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    NoRecipients,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchWarning {
    /// Only LocalOnly tokens registered: a supported degraded mode, the app
    /// must be foregrounded to self-simulate the alarm.
    NoRemoteRecipients,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DispatchReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<DispatchWarning>,
    pub expo_tokens: usize,
    pub local_tokens: usize,
    pub tickets: Vec<PushTicket>,
    pub failed_batches: Vec<String>,
}

impl DispatchResult {
    fn no_recipients() -> Self {
        Self {
            success: false,
            reason: Some(DispatchReason::NoRecipients),
            warning: None,
            expo_tokens: 0,
            local_tokens: 0,
            tickets: Vec::new(),
            failed_batches: Vec::new(),
        }
    }

    fn local_only(local_tokens: usize) -> Self {
        Self {
            success: true,
            reason: None,
            warning: Some(DispatchWarning::NoRemoteRecipients),
            expo_tokens: 0,
            local_tokens,
            tickets: Vec::new(),
            failed_batches: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AlarmDispatcher {
    recipients: RecipientRegistry,
    transport: Arc<dyn PushTransport>,
}

impl AlarmDispatcher {
    pub fn new(recipients: RecipientRegistry, transport: Arc<dyn PushTransport>) -> Self {
        Self { recipients, transport }
    }

    /// Standard "device down" alarm built from a liveness event.
    pub async fn notify_device_down(&self, event: &AlarmEvent) -> DispatchResult {
        let title = "🚨 DEVICE DOWN 🚨".to_string();
        let body = match &event.device_id {
            Some(id) => format!("{id} is not responding: {}", event.reason),
            None => format!("Alarm: {}", event.reason),
        };
        println!("[dispatch] sending alarm: {body}");
        let data = serde_json::json!({
            "alarmType": "device_down",
            "deviceId": event.device_id,
            "eventId": event.event_id,
            "triggeredAt": event.timestamp.format(&Rfc3339).unwrap_or_default(),
        });
        self.notify_all(&title, &body, data).await
    }

    /// Recovery notice when an offline device starts reporting again.
    pub async fn notify_recovered(&self, device_id: &str) -> DispatchResult {
        let title = format!("✅ {device_id} RECOVERED");
        let body = "The device is sending heartbeats again".to_string();
        let data = serde_json::json!({
            "alarmType": "device_recovered",
            "deviceId": device_id,
        });
        self.notify_all(&title, &body, data).await
    }

    /// Fan a notification out to every registered phone. Messages are built
    /// from an owned token list; no registry lock is held across the
    /// transport calls.
    pub async fn notify_all(
        &self,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> DispatchResult {
        if self.recipients.count() == 0 {
            println!("[dispatch] no phones registered, nothing to notify");
            return DispatchResult::no_recipients();
        }

        let expo_tokens = self.recipients.list_remote_push();
        let local_tokens = self.recipients.local_count();
        println!(
            "[dispatch] recipients: {} expo, {} local",
            expo_tokens.len(),
            local_tokens
        );

        if expo_tokens.is_empty() {
            println!("[dispatch] only local tokens registered, no push will be sent");
            return DispatchResult::local_only(local_tokens);
        }

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let messages: Vec<PushMessage> = expo_tokens
            .iter()
            .map(|token| {
                let mut payload = serde_json::json!({
                    "type": "alarm",
                    "timestamp": timestamp,
                });
                if let (Some(obj), Some(extra)) = (payload.as_object_mut(), data.as_object()) {
                    for (k, v) in extra {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                PushMessage {
                    to: token.clone(),
                    sound: "default".into(),
                    title: title.to_string(),
                    body: body.to_string(),
                    data: payload,
                    priority: "high".into(),
                    channel_id: "alarm-channel".into(),
                }
            })
            .collect();

        let mut tickets = Vec::new();
        let mut failed_batches = Vec::new();
        for chunk in messages.chunks(self.transport.chunk_size().max(1)) {
            match self.transport.send_batch(chunk).await {
                Ok(batch_tickets) => {
                    println!("[dispatch] batch of {} messages accepted", chunk.len());
                    tickets.extend(batch_tickets);
                }
                Err(e) => {
                    eprintln!("[dispatch] batch of {} messages failed: {e}", chunk.len());
                    failed_batches.push(e.to_string());
                }
            }
        }

        DispatchResult {
            success: true,
            reason: None,
            warning: None,
            expo_tokens: expo_tokens.len(),
            local_tokens,
            tickets,
            failed_batches,
        }
    }
}
