//! Parley command-line host: runs one voice conversation session.
//!
//! ```text
//! parley --session <id> [--endpoint ws://...] [--api-base http://...]
//! parley --list-devices
//! ```
//!
//! Ctrl-C ends the session and notifies the backend. The process also exits
//! when the backend closes the channel or the agent's final turn plays out.

mod console;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_core::{
    audio::device::list_devices, cpal_host_factory, EngineStatus, EngineStatusEvent,
    ParleyEngine,
};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Upper bound on waiting for the session-finish beacon before exiting.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Half-duplex voice conversation client")]
struct Args {
    /// Session id issued by the backend.
    #[arg(long, required_unless_present = "list_devices")]
    session: Option<String>,

    /// WebSocket endpoint (overrides settings and PARLEY_ENDPOINT).
    #[arg(long)]
    endpoint: Option<String>,

    /// HTTP base for the session-finish notification.
    #[arg(long)]
    api_base: Option<String>,

    /// Input device name as shown by --list-devices.
    #[arg(long)]
    input_device: Option<String>,

    /// Print audio devices as JSON and exit.
    #[arg(long)]
    list_devices: bool,

    /// Settings file (default: platform data dir).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(endpoint) = &self.endpoint {
            settings.endpoint.clone_from(endpoint);
        }
        if let Some(api_base) = &self.api_base {
            settings.api_base.clone_from(api_base);
        }
        if let Some(device) = &self.input_device {
            settings.preferred_input_device = Some(device.clone());
        }
    }
}

async fn wait_for_end(mut status: broadcast::Receiver<EngineStatusEvent>) -> EngineStatusEvent {
    loop {
        match status.recv().await {
            Ok(event) if event.reason.is_some() => return event,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => {
                return EngineStatusEvent {
                    status: EngineStatus::Stopped,
                    reason: None,
                    detail: None,
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info,parley_core=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        let devices = list_devices();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    // ── Settings: file → env → flags ──────────────────────────────────────
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    args.apply_to(&mut settings);
    settings.normalize();
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    let session_id = args
        .session
        .clone()
        .context("--session is required")?;

    info!(endpoint = settings.endpoint.as_str(), "Parley starting");
    let engine = Arc::new(ParleyEngine::new(
        settings.engine_config(),
        cpal_host_factory(),
    ));
    let printers = console::spawn(&engine);
    let status = engine.subscribe_status();

    engine
        .start(&session_id)
        .await
        .with_context(|| format!("starting session {session_id}"))?;
    println!("Connected. The interviewer will speak first; press Ctrl-C to end.");

    let outcome = tokio::select! {
        ended = wait_for_end(status) => ended,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("ending session at user request");
            engine.end_by_user().await?;
            if tokio::time::timeout(NOTIFY_FLUSH_TIMEOUT, engine.flush_notifications())
                .await
                .is_err()
            {
                warn!("session finish notification still pending at exit");
            }
            EngineStatusEvent {
                status: engine.status(),
                reason: None,
                detail: None,
            }
        }
    };

    engine.stop().await?;
    for printer in printers {
        printer.abort();
    }

    match outcome.status {
        EngineStatus::Error => {
            anyhow::bail!(
                "session ended with an error: {}",
                outcome.detail.unwrap_or_else(|| "unknown".into())
            )
        }
        EngineStatus::Completed => println!("Interview complete."),
        _ => println!("Session ended."),
    }
    Ok(())
}
