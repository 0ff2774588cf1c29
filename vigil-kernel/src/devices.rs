/**
 * DEVICE REGISTRY - In-memory table of watched devices
 *
 * ROLE: Single owner of all heartbeat state. Heartbeat intake upserts entries,
 * the liveness sweeper flips them offline, the HTTP layer reads projections.
 *
 * ARCHITECTURE: One parking_lot mutex around the device map, shared via Arc.
 * Status is authoritatively mutated only by record_heartbeat (-> online) and
 * mark_offline (sweep only); views recompute healthiness without mutating.
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct WatchedDevice {
    pub device_id: String,
    pub hostname: String,
    pub platform: String,
    pub status: DeviceStatus,
    pub last_seen: OffsetDateTime,
    pub first_seen: OffsetDateTime,
}

/// Non-authoritative metadata carried by a heartbeat.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMeta {
    pub hostname: Option<String>,
    pub platform: Option<String>,
}

/// Outcome of a heartbeat as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatTransition {
    /// First heartbeat ever for this id. Never reported as a recovery.
    New,
    /// Device was offline and came back.
    Recovered,
    NoTransition,
}

/// Outcome of a sweep-side offline flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepTransition {
    WentOffline { elapsed_seconds: i64 },
    /// Already offline: re-scans must not produce duplicate alarms.
    AlreadyOffline,
    /// A heartbeat arrived after the sweep collected this id; the device is
    /// fresh again and must not be flipped on stale data.
    StillOnline,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown device: {0}")]
    Unknown(String),
}

/// Read-only projection for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device_id: String,
    pub hostname: String,
    pub platform: String,
    pub status: DeviceStatus,
    pub last_seen: String,
    pub first_seen: String,
    pub seconds_since_last_ping: i64,
    pub is_healthy: bool,
    pub will_trigger_alarm_in: i64,
}

#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<HashMap<String, WatchedDevice>>>,
    timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            devices: Arc::new(Mutex::new(HashMap::new())),
            timeout: Duration::seconds(timeout_seconds as i64),
        }
    }

    pub fn timeout_seconds(&self) -> i64 {
        self.timeout.whole_seconds()
    }

    /// Upsert a device from an inbound heartbeat. Always advances last_seen.
    pub fn record_heartbeat(&self, device_id: &str, meta: HeartbeatMeta) -> HeartbeatTransition {
        self.record_heartbeat_at(device_id, meta, OffsetDateTime::now_utc())
    }

    pub fn record_heartbeat_at(
        &self,
        device_id: &str,
        meta: HeartbeatMeta,
        now: OffsetDateTime,
    ) -> HeartbeatTransition {
        let mut map = self.devices.lock();
        match map.get_mut(device_id) {
            Some(device) => {
                let was_offline = device.status == DeviceStatus::Offline;
                device.status = DeviceStatus::Online;
                device.last_seen = now;
                if let Some(hostname) = meta.hostname {
                    device.hostname = hostname;
                }
                if let Some(platform) = meta.platform {
                    device.platform = platform;
                }
                if was_offline {
                    HeartbeatTransition::Recovered
                } else {
                    HeartbeatTransition::NoTransition
                }
            }
            None => {
                map.insert(
                    device_id.to_string(),
                    WatchedDevice {
                        device_id: device_id.to_string(),
                        hostname: meta.hostname.unwrap_or_else(|| "unknown".into()),
                        platform: meta.platform.unwrap_or_else(|| "unknown".into()),
                        status: DeviceStatus::Online,
                        last_seen: now,
                        first_seen: now,
                    },
                );
                HeartbeatTransition::New
            }
        }
    }

    /// Sweep-only: flip an online device to offline. Re-checks stored status
    /// under the lock so a heartbeat racing the sweep is never overwritten
    /// with stale data.
    pub fn mark_offline_at(
        &self,
        device_id: &str,
        now: OffsetDateTime,
    ) -> Result<SweepTransition, DeviceError> {
        let mut map = self.devices.lock();
        let device = map
            .get_mut(device_id)
            .ok_or_else(|| DeviceError::Unknown(device_id.to_string()))?;
        if device.status == DeviceStatus::Offline {
            return Ok(SweepTransition::AlreadyOffline);
        }
        // Re-check recency under the lock: a heartbeat may have landed
        // between the sweep's collection pass and this flip.
        if now - device.last_seen < self.timeout {
            return Ok(SweepTransition::StillOnline);
        }
        device.status = DeviceStatus::Offline;
        let elapsed_seconds = (now - device.last_seen).whole_seconds().max(0);
        Ok(SweepTransition::WentOffline { elapsed_seconds })
    }

    /// Ids of online devices whose last heartbeat is older than the timeout.
    /// Offline devices are skipped entirely, one alarm burst per outage.
    pub fn timed_out_ids_at(&self, now: OffsetDateTime) -> Vec<String> {
        let map = self.devices.lock();
        let mut ids: Vec<String> = map
            .values()
            .filter(|d| d.status == DeviceStatus::Online && now - d.last_seen >= self.timeout)
            .map(|d| d.device_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, device_id: &str) -> Result<DeviceView, DeviceError> {
        self.get_at(device_id, OffsetDateTime::now_utc())
    }

    pub fn get_at(&self, device_id: &str, now: OffsetDateTime) -> Result<DeviceView, DeviceError> {
        let map = self.devices.lock();
        map.get(device_id)
            .map(|d| self.to_view(d, now))
            .ok_or_else(|| DeviceError::Unknown(device_id.to_string()))
    }

    /// Ordered, read-only projection of every tracked device.
    pub fn snapshot(&self) -> Vec<DeviceView> {
        self.snapshot_at(OffsetDateTime::now_utc())
    }

    pub fn snapshot_at(&self, now: OffsetDateTime) -> Vec<DeviceView> {
        let map = self.devices.lock();
        let mut views: Vec<DeviceView> = map.values().map(|d| self.to_view(d, now)).collect();
        views.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        views
    }

    /// (online, offline) counts by elapsed time, like the device views.
    pub fn counts_at(&self, now: OffsetDateTime) -> (usize, usize) {
        let map = self.devices.lock();
        let online = map.values().filter(|d| now - d.last_seen < self.timeout).count();
        (online, map.len() - online)
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    fn to_view(&self, device: &WatchedDevice, now: OffsetDateTime) -> DeviceView {
        let elapsed = (now - device.last_seen).whole_seconds().max(0);
        DeviceView {
            device_id: device.device_id.clone(),
            hostname: device.hostname.clone(),
            platform: device.platform.clone(),
            status: device.status,
            last_seen: device.last_seen.format(&Rfc3339).unwrap_or_default(),
            first_seen: device.first_seen.format(&Rfc3339).unwrap_or_default(),
            seconds_since_last_ping: elapsed,
            is_healthy: elapsed < self.timeout.whole_seconds(),
            will_trigger_alarm_in: (self.timeout.whole_seconds() - elapsed).max(0),
        }
    }
}
