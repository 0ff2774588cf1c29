/**
 * LIVENESS SWEEPER - Periodic timeout detection
 *
 * ROLE: On a fixed cadence, scans the device registry for online devices
 * whose last heartbeat is older than the timeout, flips them offline and
 * hands one alarm per transition to the dispatcher.
 *
 * Already-offline devices are skipped entirely, so an uninterrupted outage
 * produces exactly one notification burst no matter how many ticks pass.
 * Offline -> Online is driven by the heartbeat path, never by the sweep.
 */

use crate::devices::{DeviceRegistry, SweepTransition};
use crate::dispatch::{AlarmDispatcher, AlarmEvent};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// One sweep pass. Returns the number of alarms dispatched. Per-device
/// failures are logged and do not abort the rest of the scan; the push
/// calls happen after the registry lock is released.
pub async fn sweep_once(
    devices: &DeviceRegistry,
    dispatcher: &AlarmDispatcher,
    now: OffsetDateTime,
) -> usize {
    let mut alarms = 0;
    for device_id in devices.timed_out_ids_at(now) {
        match devices.mark_offline_at(&device_id, now) {
            Ok(SweepTransition::WentOffline { elapsed_seconds }) => {
                println!(
                    "[sweeper] {device_id} went OFFLINE (last ping {elapsed_seconds}s ago)"
                );
                let event = AlarmEvent::device_down(&device_id, elapsed_seconds);
                dispatcher.notify_device_down(&event).await;
                alarms += 1;
            }
            // Another pass got there first, or a heartbeat landed while
            // earlier dispatches were in flight.
            Ok(SweepTransition::AlreadyOffline) | Ok(SweepTransition::StillOnline) => {}
            Err(e) => {
                eprintln!("[sweeper] failed to mark {device_id} offline: {e}");
            }
        }
    }
    alarms
}

/// Spawn the recurring sweep. The returned handle is the shutdown hook:
/// aborting it stops the loop cleanly.
pub fn spawn_liveness_sweeper(
    devices: DeviceRegistry,
    dispatcher: AlarmDispatcher,
    interval: Duration,
) -> JoinHandle<()> {
    println!(
        "[sweeper] monitoring started (timeout: {}s, check every {}s)",
        devices.timeout_seconds(),
        interval.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; a device cannot have timed out
        // before the process started, so that pass is a cheap no-op.
        loop {
            ticker.tick().await;
            let checked = devices.len();
            let alarms = sweep_once(&devices, &dispatcher, OffsetDateTime::now_utc()).await;
            if alarms > 0 {
                println!("[sweeper] checked {checked} devices, {alarms} went offline");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{HeartbeatMeta, HeartbeatTransition};
    use crate::push::{PushMessage, PushTicket, PushTransport, TransportError};
    use crate::recipients::RecipientRegistry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use time::Duration as TimeDuration;

    struct CountingTransport {
        batches: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl PushTransport for CountingTransport {
        async fn send_batch(
            &self,
            messages: &[PushMessage],
        ) -> Result<Vec<PushTicket>, TransportError> {
            *self.batches.lock() += 1;
            if self.fail {
                return Err(TransportError::Status(500));
            }
            Ok(messages
                .iter()
                .map(|_| PushTicket { status: "ok".into(), id: None, message: None })
                .collect())
        }

        fn chunk_size(&self) -> usize {
            100
        }
    }

    fn setup(fail_transport: bool) -> (DeviceRegistry, AlarmDispatcher, Arc<CountingTransport>) {
        let devices = DeviceRegistry::new(120);
        let recipients = RecipientRegistry::new();
        recipients.register("ExponentPushToken[phone]", None, None).unwrap();
        let transport = Arc::new(CountingTransport {
            batches: Mutex::new(0),
            fail: fail_transport,
        });
        let dispatcher = AlarmDispatcher::new(recipients, transport.clone());
        (devices, dispatcher, transport)
    }

    fn t0() -> OffsetDateTime {
        time::macros::datetime!(2026-01-01 00:00:00 UTC)
    }

    #[tokio::test]
    async fn one_alarm_per_outage_regardless_of_tick_count() {
        let (devices, dispatcher, transport) = setup(false);
        devices.record_heartbeat_at("dev1", HeartbeatMeta::default(), t0());

        // Sweeps before the 120s timeout: nothing happens.
        for secs in [30, 60, 90, 120 - 1] {
            let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(secs)).await;
            assert_eq!(n, 0, "no alarm expected at t+{secs}s");
        }

        // t=121s: first sweep past the timeout fires exactly one alarm.
        let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(121)).await;
        assert_eq!(n, 1);
        assert_eq!(*transport.batches.lock(), 1);

        // Subsequent ticks while still offline stay silent.
        for secs in [151, 181, 211] {
            let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(secs)).await;
            assert_eq!(n, 0, "duplicate alarm at t+{secs}s");
        }
        assert_eq!(*transport.batches.lock(), 1);

        // t=200s equivalent: the device comes back, recovered exactly once.
        let transition = devices.record_heartbeat_at(
            "dev1",
            HeartbeatMeta::default(),
            t0() + TimeDuration::seconds(220),
        );
        assert_eq!(transition, HeartbeatTransition::Recovered);

        // A fresh outage after recovery alarms again.
        let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(341)).await;
        assert_eq!(n, 1);
        assert_eq!(*transport.batches.lock(), 2);
    }

    /// Delivers a heartbeat into the registry while a batch is in flight,
    /// the window between the sweep's collection pass and later flips.
    struct HeartbeatingTransport {
        devices: DeviceRegistry,
        beat_device: String,
        beat_at: OffsetDateTime,
        batches: Mutex<usize>,
    }

    #[async_trait]
    impl PushTransport for HeartbeatingTransport {
        async fn send_batch(
            &self,
            messages: &[PushMessage],
        ) -> Result<Vec<PushTicket>, TransportError> {
            *self.batches.lock() += 1;
            self.devices
                .record_heartbeat_at(&self.beat_device, HeartbeatMeta::default(), self.beat_at);
            Ok(messages
                .iter()
                .map(|_| PushTicket { status: "ok".into(), id: None, message: None })
                .collect())
        }

        fn chunk_size(&self) -> usize {
            100
        }
    }

    #[tokio::test]
    async fn mid_sweep_heartbeat_suppresses_that_devices_alarm() {
        let devices = DeviceRegistry::new(120);
        devices.record_heartbeat_at("a", HeartbeatMeta::default(), t0());
        devices.record_heartbeat_at("b", HeartbeatMeta::default(), t0());

        let now = t0() + TimeDuration::seconds(130);
        // Dispatching a's alarm delivers a fresh heartbeat for b.
        let transport = Arc::new(HeartbeatingTransport {
            devices: devices.clone(),
            beat_device: "b".into(),
            beat_at: now,
            batches: Mutex::new(0),
        });
        let recipients = RecipientRegistry::new();
        recipients.register("ExponentPushToken[phone]", None, None).unwrap();
        let dispatcher = AlarmDispatcher::new(recipients, transport.clone());

        let n = sweep_once(&devices, &dispatcher, now).await;
        assert_eq!(n, 1, "only the genuinely dead device alarms");
        assert_eq!(*transport.batches.lock(), 1);

        // b stayed online: its next heartbeat is not a spurious recovery.
        let transition = devices.record_heartbeat_at(
            "b",
            HeartbeatMeta::default(),
            now + TimeDuration::seconds(30),
        );
        assert_eq!(transition, HeartbeatTransition::NoTransition);
    }

    #[tokio::test]
    async fn multiple_devices_each_get_their_own_alarm() {
        let (devices, dispatcher, transport) = setup(false);
        devices.record_heartbeat_at("a", HeartbeatMeta::default(), t0());
        devices.record_heartbeat_at("b", HeartbeatMeta::default(), t0());
        devices.record_heartbeat_at("fresh", HeartbeatMeta::default(), t0() + TimeDuration::seconds(100));

        let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(130)).await;
        assert_eq!(n, 2);
        assert_eq!(*transport.batches.lock(), 2);
    }

    #[tokio::test]
    async fn transport_failure_does_not_abort_the_scan() {
        let (devices, dispatcher, transport) = setup(true);
        devices.record_heartbeat_at("a", HeartbeatMeta::default(), t0());
        devices.record_heartbeat_at("b", HeartbeatMeta::default(), t0());

        // Both devices are still flipped offline and both dispatches are
        // attempted even though every batch fails.
        let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(130)).await;
        assert_eq!(n, 2);
        assert_eq!(*transport.batches.lock(), 2);

        let n = sweep_once(&devices, &dispatcher, t0() + TimeDuration::seconds(160)).await;
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn sweeper_handle_aborts_cleanly() {
        let (devices, dispatcher, _transport) = setup(false);
        let handle =
            spawn_liveness_sweeper(devices, dispatcher, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
