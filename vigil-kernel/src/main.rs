/**
 * VIGIL KERNEL - Entry point of the heartbeat monitoring server
 *
 * ROLE: Wires config, registries, push transport, liveness sweeper and the
 * HTTP surface together. Watched devices POST heartbeats, phones register
 * push tokens, the sweeper turns missing heartbeats into alarms.
 */

mod config;
mod devices;
mod dispatch;
mod http;
mod push;
mod recipients;
mod sweeper;

use crate::config::load_config;
use crate::devices::DeviceRegistry;
use crate::dispatch::AlarmDispatcher;
use crate::http::AppState;
use crate::push::ExpoPushClient;
use crate::recipients::RecipientRegistry;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let cfg = load_config().await;

    let devices = DeviceRegistry::new(cfg.timeout_seconds);
    let recipients = RecipientRegistry::new();
    let transport = match ExpoPushClient::new(&cfg.push_conf()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("[kernel] failed to create push client: {e}");
            std::process::exit(1);
        }
    };
    let dispatcher = AlarmDispatcher::new(recipients.clone(), transport);

    // Recurring liveness sweep; the handle is kept implicitly for process
    // lifetime, heartbeats and HTTP traffic run concurrently with it.
    let _sweeper = sweeper::spawn_liveness_sweeper(
        devices.clone(),
        dispatcher.clone(),
        cfg.check_interval(),
    );

    let app_state = AppState {
        devices,
        recipients,
        dispatcher,
        cfg: cfg.clone(),
    };

    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    println!("[kernel] vigil heartbeat monitor");
    println!("[kernel] timeout: {}s without heartbeat = alarm", cfg.timeout_seconds);
    println!("[kernel] sweep every {}s", cfg.check_interval_seconds);
    println!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
