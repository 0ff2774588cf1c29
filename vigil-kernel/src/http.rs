/**
 * VIGIL REST API - HTTP surface of the kernel
 *
 * ROLE: Heartbeat intake from watched devices, token registration from
 * phones, manual alarm trigger and status reporting.
 *
 * Routes:
 * - POST /heartbeat         heartbeat from a watched device
 * - GET  /devices           all tracked devices with liveness projection
 * - GET  /devices/{id}      one device + alarm countdown
 * - POST /register-token    phone registers for alarms
 * - POST /unregister-token  phone opts out
 * - POST /trigger-alarm     manual alarm, bypasses the sweep
 * - GET  /status            aggregate counters
 *
 * Every failure path returns structured JSON with a proper status code;
 * handlers never panic and never leak raw errors to the wire.
 */

use crate::config::VigilConfig;
use crate::devices::{DeviceRegistry, HeartbeatMeta, HeartbeatTransition};
use crate::dispatch::{AlarmDispatcher, AlarmEvent};
use crate::recipients::RecipientRegistry;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct AppState {
    pub devices: DeviceRegistry,
    pub recipients: RecipientRegistry,
    pub dispatcher: AlarmDispatcher,
    pub cfg: VigilConfig,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/heartbeat", post(post_heartbeat))
        .route("/devices", get(get_devices))
        .route("/devices/{id}", get(get_device))
        .route("/register-token", post(register_token))
        .route("/unregister-token", post(unregister_token))
        .route("/trigger-alarm", post(trigger_alarm))
        .route("/status", get(get_status))
        .with_state(app_state)
}

fn server_time() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
    // Sender-side clock, accepted but not trusted for liveness math.
    #[allow(dead_code)]
    timestamp: Option<f64>,
    hostname: Option<String>,
    platform: Option<String>,
}

// POST /heartbeat
async fn post_heartbeat(
    State(app): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> (StatusCode, Json<Value>) {
    let Some(device_id) = body.device_id.filter(|id| !id.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "deviceId required" })));
    };

    let meta = HeartbeatMeta { hostname: body.hostname, platform: body.platform };
    match app.devices.record_heartbeat(&device_id, meta) {
        HeartbeatTransition::Recovered => {
            println!("[kernel] {device_id} is back ONLINE");
            // Recovery notice must not block the heartbeat response on the
            // push gateway.
            let dispatcher = app.dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.notify_recovered(&device_id).await;
            });
        }
        HeartbeatTransition::New | HeartbeatTransition::NoTransition => {
            println!("[kernel] heartbeat received: {device_id}");
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Heartbeat registered",
            "serverTime": server_time(),
        })),
    )
}

// GET /devices
async fn get_devices(State(app): State<AppState>) -> Json<Value> {
    let devices = app.devices.snapshot();
    Json(json!({
        "count": devices.len(),
        "timeoutConfigured": format!("{} seconds", app.cfg.timeout_seconds),
        "checkInterval": format!("{} seconds", app.cfg.check_interval_seconds),
        "devices": devices,
    }))
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match app.devices.get(&id) {
        Ok(view) => (StatusCode::OK, Json(json!(view))),
        Err(_) => (StatusCode::NOT_FOUND, Json(json!({ "error": "Device not found" }))),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterTokenBody {
    token: Option<String>,
    platform: Option<String>,
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

// POST /register-token
async fn register_token(
    State(app): State<AppState>,
    Json(body): Json<RegisterTokenBody>,
) -> (StatusCode, Json<Value>) {
    let Some(token) = body.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "token required" })));
    };

    match app.recipients.register(&token, body.platform, body.device_id) {
        Ok(registration) => {
            println!("[kernel] phone registered ({:?} token)", registration.capability);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Phone registered for alarms",
                    "tokenType": registration.capability,
                    "totalPhones": registration.total,
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid token", "details": e.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct UnregisterTokenBody {
    token: Option<String>,
}

// POST /unregister-token
async fn unregister_token(
    State(app): State<AppState>,
    Json(body): Json<UnregisterTokenBody>,
) -> (StatusCode, Json<Value>) {
    let Some(token) = body.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "token required" })));
    };
    let total = app.recipients.unregister(&token);
    (StatusCode::OK, Json(json!({ "success": true, "totalPhones": total })))
}

#[derive(Debug, Deserialize)]
struct TriggerAlarmBody {
    message: Option<String>,
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

// POST /trigger-alarm - manual trigger, bypasses the sweep entirely.
async fn trigger_alarm(
    State(app): State<AppState>,
    Json(body): Json<TriggerAlarmBody>,
) -> (StatusCode, Json<Value>) {
    let reason = body.message.unwrap_or_else(|| "Alarm triggered".into());
    let event = AlarmEvent::manual(&reason, body.device_id);
    let result = app.dispatcher.notify_device_down(&event).await;

    // Dispatch outcomes (including NoRecipients) are surfaced in the body,
    // not as HTTP errors.
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Alarm dispatched",
            "notifiedPhones": app.recipients.count(),
            "result": result,
        })),
    )
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<Value> {
    let (online, offline) = app.devices.counts_at(OffsetDateTime::now_utc());
    Json(json!({
        "server": "online",
        "timestamp": server_time(),
        "devices": {
            "total": app.devices.len(),
            "online": online,
            "offline": offline,
            "maxTimeout": format!("{} seconds", app.cfg.timeout_seconds),
        },
        "phones": {
            "registered": app.recipients.count(),
            "local": app.recipients.local_count(),
        },
    }))
}
