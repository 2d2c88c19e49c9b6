//! padstream daemon
//!
//! ## Threads
//!
//! - **net**: event loop (TCP control on `control_port`, UDP telemetry from the same port)
//! - **status-sampler**: battery, charger and Wi-Fi once per `[status] interval_ms`
//! - **link-watcher**: route probe, wakes the net thread on link changes
//! - **main**: renders status events to the log until Ctrl-C

use padstream::config::AppConfig;
use padstream::devices::{create_input, create_status};
use padstream::error::{Error, Result};
use padstream::net::link::{self, LinkState, LinkWatcher, RouteProbe};
use padstream::net::EventLoop;
use padstream::status::events::describe;
use padstream::status::{SharedStatus, StatusSampler};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/padstream.toml";

/// How long the UI waits for events before re-checking the run flag
const UI_WAIT: Duration = Duration::from_millis(500);

/// Parse config path from command line arguments.
///
/// Supports:
/// - `padstream <path>` (positional)
/// - `padstream --config <path>` (flag-based)
/// - `padstream -c <path>` (short flag)
///
/// `None` means no path was given.
fn parse_config_path(args: &[String]) -> Option<String> {
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

/// Explicit paths must load; the default path may be absent
fn load_config(args: &[String]) -> Result<(AppConfig, String)> {
    match parse_config_path(args) {
        Some(path) => Ok((AppConfig::from_file(&path)?, path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
            AppConfig::from_file(DEFAULT_CONFIG_PATH)?,
            DEFAULT_CONFIG_PATH.to_string(),
        )),
        None => Ok((AppConfig::default(), "built-in defaults".to_string())),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let (config, source) = load_config(&args)?;

    let env = env_logger::Env::default().default_filter_or(&config.logging.level);
    env_logger::Builder::from_env(env).init();

    log::info!("padstream v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", source);
    log::info!(
        "Input: {}, status: {}",
        config.input.source,
        config.status.source
    );

    let input = create_input(&config)?;
    let mut status_provider = create_status(&config)?;

    let shared = Arc::new(SharedStatus::with_initial(
        status_provider.battery_percent(),
        status_provider.charger_connected(),
    ));

    let running = Arc::new(AtomicBool::new(true));
    let (link_tx, link_rx) = crossbeam_channel::unbounded();

    let mut event_loop = EventLoop::new(
        &config.network,
        input,
        Arc::clone(&shared),
        Arc::clone(&running),
        link_rx,
    )?;
    let waker = event_loop.waker();

    // Ctrl-C: clear the run flag and wake the net thread and the UI
    {
        let r = Arc::clone(&running);
        let w = Arc::clone(&waker);
        let s = Arc::clone(&shared);
        ctrlc::set_handler(move || {
            log::info!("Received shutdown signal");
            r.store(false, Ordering::Relaxed);
            let _ = w.wake();
            s.events().wake_all();
        })
        .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;
    }

    // Status sampler
    let mut sampler = StatusSampler::new(
        status_provider,
        Arc::clone(&shared),
        Arc::clone(&running),
        config.status.interval(),
    );
    let sampler_handle = thread::Builder::new()
        .name("status-sampler".to_string())
        .spawn(move || sampler.run())
        .map_err(|source| Error::Spawn {
            name: "status-sampler",
            source,
        })?;

    // Link watcher
    let link_handle = if config.link.probe_enabled {
        Some(
            LinkWatcher::new(
                RouteProbe::new(config.link.probe_address),
                config.link.probe_interval(),
                link_tx,
                Arc::clone(&waker),
                Arc::clone(&running),
            )
            .spawn()?,
        )
    } else {
        log::info!("Link probing disabled, assuming link up");
        link::notify(&link_tx, &waker, LinkState::Up);
        None
    };

    // Net thread
    let net_running = Arc::clone(&running);
    let net_shared = Arc::clone(&shared);
    let net_handle = thread::Builder::new()
        .name("net".to_string())
        .spawn(move || {
            let result = event_loop.run();
            // A dead net thread takes the daemon down with it
            net_running.store(false, Ordering::Relaxed);
            net_shared.events().wake_all();
            result
        })
        .map_err(|source| Error::Spawn { name: "net", source })?;

    log::info!("padstream running. Press Ctrl-C to stop.");

    // Console renderer
    while running.load(Ordering::Relaxed) {
        let bits = shared.events().wait(UI_WAIT);
        if bits == 0 {
            continue;
        }
        let snap = shared.snapshot();
        log::info!(
            "[{}] link {} | client {} | battery {}%{} | wifi {}%",
            describe(bits).join(","),
            if snap.link_up { "up" } else { "down" },
            snap.client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "none".to_string()),
            snap.battery_percent,
            if snap.charger_connected { " (charging)" } else { "" },
            snap.wifi_signal_percent
        );
    }

    log::info!("Shutting down...");
    let net_result = match net_handle.join() {
        Ok(result) => result,
        Err(_) => Err(Error::Other("net thread panicked".to_string())),
    };
    if sampler_handle.join().is_err() {
        log::error!("Status sampler panicked");
    }
    if let Some(handle) = link_handle
        && handle.join().is_err()
    {
        log::error!("Link watcher panicked");
    }

    log::info!("padstream stopped");
    net_result
}
