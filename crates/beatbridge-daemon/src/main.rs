//! BeatBridge daemon - bridges the JACK transport to a shared peer timeline
//!
//! Connects a JACK client, joins the peer session and runs the
//! reconciliation engine until `quit` is entered or the JACK server goes
//! away. Tempo, quantum grid and play state flow both ways: changes made in
//! any JACK transport client are published to the peers, and peer changes
//! drive the JACK transport.

mod config;
mod shell;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use beatbridge_core::host::jack_backend::JackHost;
use beatbridge_core::host::TransportHost;
use beatbridge_core::{Bridge, LoopbackTimeline, PeerTimeline, SharedState};

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("beatbridge starting up");

    let config_path = config::default_config_path();
    let config = config::load_config(&config_path);
    if !config_path.exists() {
        // First run: leave an editable config behind
        if let Err(err) = config::save_config(&config, &config_path) {
            log::warn!("Could not write default config: {}", err);
        }
    }

    let shared = Arc::new(SharedState::new(
        config.session.tempo,
        config.session.quantum,
    ));

    let timeline_impl = LoopbackTimeline::new(config.session.tempo);
    let loopback = timeline_impl.handle();
    let timeline: Arc<Mutex<Box<dyn PeerTimeline>>> =
        Arc::new(Mutex::new(Box::new(timeline_impl)));

    // No session is possible without a host connection: fail hard
    let host: Arc<dyn TransportHost> =
        JackHost::connect(&config.client_name, shared.clone(), timeline.clone())
            .context("Could not connect to the JACK server (is it running?)")?;

    let mut bridge = Bridge::new(
        shared,
        host,
        timeline,
        Duration::from_millis(config.session.poll_interval_ms),
    );
    bridge.start();

    shell::run(&bridge, Some(&loopback))?;

    bridge.stop();
    log::info!("beatbridge shut down cleanly");
    Ok(())
}
