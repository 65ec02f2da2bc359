//! Umbra server: authoritative fog-of-war session over WebSocket.
//!
//! Usage: `umbra-server [config.toml]`
//!
//! `RUST_LOG` controls log level (default `info`); `UMBRA_BIND` overrides
//! the bind address.

mod config;
mod persist;

use std::path::PathBuf;

use log::{error, info, warn};
use umbra_collab::SyncServer;
use umbra_render::clear_generated;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    let saved_path = config.saved_session.clone();

    match clear_generated(&config.generated_dir) {
        Ok(0) => {}
        Ok(n) => info!("Removed {n} stale generated maps from {}", config.generated_dir.display()),
        Err(e) => warn!("Could not clear {}: {e}", config.generated_dir.display()),
    }

    info!(
        "Umbra server: maps={} configs={} effects={} gm_key={}",
        config.maps_dir.display(),
        config.configs_dir.display(),
        config.effects.len(),
        config.gm_key.is_some()
    );
    let server = SyncServer::from_config(config);
    let hub = server.hub().clone();

    if let Some(path) = &saved_path {
        if path.exists() {
            match persist::load_saved_session(path) {
                Ok(saved) => match hub.adopt(saved) {
                    Ok(_) => info!("Adopted saved session {}", path.display()),
                    Err(e) => warn!("Saved session {} not adopted: {e}", path.display()),
                },
                Err(e) => warn!("{e}"),
            }
        }
    }

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    if let (Some(path), Some(session)) = (&saved_path, hub.saved_session()) {
        persist::store_saved_session(path, &session)?;
        info!("Saved session to {}", path.display());
    }
    Ok(())
}
