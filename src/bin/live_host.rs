//! Live Host Application
//!
//! Runs the voice session engine behind a local control API.
//!
//! Usage: `live-host [--list-devices] [--config PATH] [PROFILE_ID]`
//! With a profile id a session starts immediately.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_host_audio::{
    audio::{device::list_devices, MicrophoneCapture, SpeakerOutput},
    config::AppConfig,
    search::{HttpSearchService, SearchFlow},
    session::{LiveHost, SessionController, WebSocketChannel},
    ui::WebServer,
};

#[derive(Debug, Default)]
struct Args {
    list_devices: bool,
    config: Option<PathBuf>,
    profile: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list-devices" => args.list_devices = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            other if other.starts_with("--") => anyhow::bail!("unknown option {other}"),
            other => args.profile = Some(other.to_string()),
        }
    }
    Ok(args)
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    tracing::info!("Starting live host");

    let config = match args.config.or_else(AppConfig::default_path) {
        Some(path) => AppConfig::load(&path)?,
        None => AppConfig::default(),
    };
    config.validate()?;

    // Opening the device waits on its thread; keep that off the runtime
    let (rate, tap_size) = (config.audio.playback_sample_rate, config.audio.fft_size);
    let speakers = tokio::task::spawn_blocking(move || SpeakerOutput::open(rate, tap_size))
        .await?
        .context("failed to open the output device")?;
    let microphone = MicrophoneCapture::new(config.audio.capture());
    let channel = WebSocketChannel::new(config.remote.url.clone());
    tracing::info!(url = %config.remote.url, "speech service");

    let controller = SessionController::new(microphone, channel, speakers, &config.audio);
    let mut host = LiveHost::spawn(controller, config.catalog(), config.audio.analyser());
    if let Some(search_url) = &config.remote.search_url {
        let service = Arc::new(HttpSearchService::new(search_url.clone()));
        host = host.with_search(SearchFlow::new(service.clone(), service));
        tracing::info!(url = %search_url, "search service");
    }
    let host = Arc::new(host);

    // Surface session failures
    let mut errors = host.errors();
    tokio::spawn(async move {
        while let Ok(message) = errors.recv().await {
            tracing::error!("Session error: {}", message);
        }
    });

    let web_server = WebServer::new(config.ui.clone(), host.clone());
    let _web_handle = web_server.start_background();
    tracing::info!(
        "Control API available at http://{}:{}",
        config.ui.bind_address,
        config.ui.http_port
    );

    if let Some(profile) = &args.profile {
        match host.start_live_session(profile).await {
            Ok(session_id) => tracing::info!(%session_id, profile = %profile, "session started"),
            Err(e) => tracing::warn!("Could not start session: {}", e),
        }
    }

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    host.stop_live_session().await?;
    Ok(())
}
