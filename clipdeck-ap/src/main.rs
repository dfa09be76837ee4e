//! Audio Player (clipdeck-ap) - Main entry point
//!
//! Scans the clip folder, opens the output devices and reads control
//! commands from stdin until `quit` or Ctrl+C.

use std::fs::OpenOptions;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use clipdeck_ap::audio::{AudioBackend, CpalBackend};
use clipdeck_ap::config::PlayerSettings;
use clipdeck_ap::console::{self, Command};
use clipdeck_ap::playback::{PlaybackEngine, TrackCatalog};
use clipdeck_common::EventBus;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "clipdeck_ap=info,clipdeck_common=info";

/// Command-line arguments for clipdeck-ap
#[derive(Parser, Debug)]
#[command(name = "clipdeck-ap")]
#[command(about = "On-demand clip player with a single output stream")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CLIPDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Folder scanned for clips (overrides `audio_folder`)
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(short, long)]
    sample_rate: Option<u32>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Print the output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print player events to stdout as JSON lines
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = clipdeck_common::config::resolve_config_path(
        args.config.as_deref(),
        "CLIPDECK_CONFIG",
    )?;
    let mut settings = PlayerSettings::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    apply_overrides(&mut settings, &args);

    init_tracing(&settings)?;
    info!("Starting clipdeck-ap");
    info!("Configuration: {}", config_path.display());

    let backend: Arc<dyn AudioBackend> = Arc::new(CpalBackend::new());
    if args.list_devices {
        backend.initialize_context()?;
        for (i, device) in backend.list_devices()?.iter().enumerate() {
            let default = if device.is_default { " (default)" } else { "" };
            println!("{:>2}  {}{}", i, device.name, default);
        }
        return Ok(());
    }

    let events = EventBus::default();
    let engine = PlaybackEngine::new(
        backend,
        &settings,
        events.clone(),
        tokio::runtime::Handle::current(),
    )
    .context("Failed to initialize playback engine")?;

    match &settings.audio_folder {
        Some(folder) => match TrackCatalog::scan(folder, &settings.tracks) {
            Ok(catalog) => engine.load_catalog(catalog),
            Err(e) => warn!("No clips loaded: {}", e),
        },
        None => warn!("No audio folder configured; use --folder"),
    }

    if args.events {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.to_json() {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Event serialization failed: {}", e),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event printer lagged, {} events dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    println!("{}", console::HELP);
    tokio::select! {
        result = run_console(Arc::clone(&engine)) => {
            if let Err(e) = result {
                error!("Console stopped: {}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    let shutdown_engine = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || shutdown_engine.shutdown())
        .await
        .context("Shutdown task failed")?;
    info!("Shutdown complete");
    Ok(())
}

fn apply_overrides(settings: &mut PlayerSettings, args: &Args) {
    if let Some(folder) = &args.folder {
        settings.audio_folder = Some(folder.clone());
    }
    if let Some(rate) = args.sample_rate {
        settings.sample_rate = rate;
    }
    if let Some(device) = &args.device {
        settings.device = device.clone();
    }
    settings.normalize();
}

fn init_tracing(settings: &PlayerSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match &settings.logging.level {
            Some(level) => EnvFilter::try_new(level),
            None => EnvFilter::try_new(DEFAULT_LOG_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, stderr_layer) = match &settings.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

/// Stdin is read on its own thread so a pending read never holds up shutdown
async fn run_console(engine: Arc<PlaybackEngine>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Reading stdin failed: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to start console thread")?;

    while let Some(line) = rx.recv().await {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        let engine = Arc::clone(&engine);
        let reply = tokio::task::spawn_blocking(move || console::execute(&engine, command))
            .await
            .context("Console command panicked")?;
        match reply {
            Ok(text) => println!("{}", text),
            Err(e) => println!("Error: {}", e),
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
