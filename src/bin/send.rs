//! Capture-side application.
//!
//! Captures the default microphone and streams it to a render peer.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use micbridge::audio::device::CpalProvider;
use micbridge::config::AppConfig;
use micbridge::engine::{AudioEngine, ConnectionMode, Role, StartParams};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        AppConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| config.endpoint.clone());
    let port = match args.next() {
        Some(p) => p.parse()?,
        None => config.port,
    };
    // "usb" as the endpoint dials 127.0.0.1 through a forwarded port.
    let mode = if endpoint == "usb" {
        ConnectionMode::UsbLoopback
    } else {
        ConnectionMode::WifiTcp
    };

    tracing::info!(%endpoint, port, "starting capture");

    let engine = AudioEngine::new(Arc::new(CpalProvider));
    engine.update_config(config.processing);
    engine.start(StartParams {
        endpoint,
        port,
        mode,
        role: Role::Capture,
        sample_rate: config.sample_rate,
        channels: config.channels,
        format: config.format,
    })
    .await;

    let mut state = engine.state();
    let mut error = engine.last_error();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            r = state.changed() => {
                if r.is_err() {
                    break;
                }
                tracing::info!("state: {:?}", *state.borrow());
            }
            r = error.changed() => {
                if r.is_err() {
                    break;
                }
                if let Some(msg) = error.borrow().as_deref() {
                    tracing::error!("{msg}");
                }
            }
        }
    }

    tracing::info!("shutting down");
    engine.stop().await;
    Ok(())
}
