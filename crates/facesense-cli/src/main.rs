use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facesense_client::{GeoClueSource, HttpGateway};
use facesense_core::{
    EnrollmentSession, FixedLocation, KioskState, LocationProvider, RecognitionSession,
    SampleOutcome, SessionError, SessionScope, SubjectId,
};
use facesense_hw::{Camera, CaptureDevice};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Notify};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, LocationMode};

#[derive(Parser)]
#[command(name = "facesense", about = "Face-recognition attendance kiosk")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facesense/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive attendance kiosk
    Kiosk,
    /// Collect face samples for a registered user
    Enroll {
        /// Backend user id
        #[arg(short, long)]
        user_id: String,
        /// Retrain the recognition model once enrollment completes
        #[arg(long)]
        train: bool,
        /// Pause between samples, in milliseconds
        #[arg(long, default_value_t = 300)]
        interval_ms: u64,
    },
    /// List V4L2 capture devices
    Devices,
    /// Retrain the backend recognition model
    Train,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            list_devices();
            Ok(())
        }
        Commands::Kiosk => {
            let config = Config::load(cli.config.as_deref())?;
            run_kiosk(&config).await
        }
        Commands::Enroll {
            user_id,
            train,
            interval_ms,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            run_enroll(&config, user_id.as_str().into(), train, Duration::from_millis(interval_ms))
                .await
        }
        Commands::Train => {
            let config = Config::load(cli.config.as_deref())?;
            let message = gateway(&config)
                .train()
                .await
                .context("model training failed")?;
            println!("{message}");
            Ok(())
        }
    }
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for device in devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
}

fn gateway(config: &Config) -> HttpGateway {
    HttpGateway::new(&config.gateway_url, config.request_timeout())
}

/// Acquire camera and location for one session. Neither failure is fatal.
fn open_scope(config: &Config) -> Result<SessionScope> {
    let camera = CaptureDevice::open_v4l2(
        &config.camera_device,
        config.jpeg_quality,
        config.camera_warmup_frames,
    );
    let location = match config.location {
        LocationMode::Geoclue => LocationProvider::start(
            GeoClueSource::new(&config.geoclue_desktop_id, config.location_timeout()),
            config.location_config(),
        ),
        LocationMode::Fixed => LocationProvider::start(
            FixedLocation(config.fixed_coordinate()?),
            config.location_config(),
        ),
        LocationMode::None => LocationProvider::unavailable("location disabled"),
    };
    Ok(SessionScope::open(camera, location))
}

/// Print every status line change to stdout until the channel closes.
fn print_status(mut rx: watch::Receiver<String>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            {
                let status = rx.borrow_and_update();
                if !status.is_empty() {
                    println!("» {}", *status);
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Close the session from the signal handler, even mid-request.
fn close_on_ctrl_c(closer: facesense_core::SessionCloser, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; closing session");
            closer.close();
            shutdown.notify_one();
        }
    });
}

async fn run_kiosk(config: &Config) -> Result<()> {
    let scope = open_scope(config)?;
    let mut kiosk = RecognitionSession::new(scope, Arc::new(gateway(config)));
    let printer = print_status(kiosk.watch_status());

    let shutdown = Arc::new(Notify::new());
    let closer = kiosk.closer();
    close_on_ctrl_c(closer.clone(), shutdown.clone());

    println!("Commands: r = recognize, in / out = mark attendance, reset, q = quit");
    if let Some(message) = kiosk.location().status_message() {
        println!("» {message}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            _ = shutdown.notified() => break,
        };
        let Some(line) = line else { break };

        let result = match line.trim() {
            "" => continue,
            "r" | "recognize" => kiosk.recognize().await.map(|_| ()),
            "in" => kiosk.mark_in().await.map(|_| ()),
            "out" => kiosk.mark_out().await.map(|_| ()),
            "reset" => {
                kiosk.reset();
                Ok(())
            }
            "q" | "quit" => break,
            other => {
                println!("Unknown command: {other}");
                continue;
            }
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Closed) => break,
            Err(SessionError::NotVerified) => {
                println!("Recognize a face first (state: {})", kiosk.state().name());
            }
            // Already on the status line.
            Err(e) => tracing::debug!(error = %e, "kiosk action failed"),
        }
        if !closer.is_live() {
            break;
        }
        if let KioskState::Marked(receipt) = kiosk.state() {
            tracing::debug!(subject = %receipt.subject.id, kind = %receipt.kind, at = %receipt.marked_at, "receipt");
        }
    }

    kiosk.close();
    drop(kiosk);
    let _ = printer.await;
    Ok(())
}

async fn run_enroll(
    config: &Config,
    subject: SubjectId,
    train: bool,
    interval: Duration,
) -> Result<()> {
    let scope = open_scope(config)?;
    let backend = Arc::new(gateway(config));
    let mut session = EnrollmentSession::start(scope, backend.clone(), subject.clone()).await;
    let printer = print_status(session.watch_status());

    let shutdown = Arc::new(Notify::new());
    let closer = session.closer();
    close_on_ctrl_c(closer.clone(), shutdown);

    if !session.can_capture() && !session.is_complete() {
        session.close();
        drop(session);
        let _ = printer.await;
        anyhow::bail!("cannot capture samples: camera unavailable");
    }

    println!("Enrolling user {subject}; look at the camera. Ctrl-C stops and keeps progress.");
    while !session.is_complete() && closer.is_live() {
        match session.capture_one().await {
            Ok(SampleOutcome::Accepted { .. }) | Ok(SampleOutcome::Rejected { .. }) => {}
            Ok(SampleOutcome::AlreadyComplete) => break,
            Err(SessionError::Closed) => break,
            Err(SessionError::CameraNotReady) => {}
            Err(e) => {
                tracing::warn!(error = %e, "capture failed; stopping enrollment");
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }

    let progress = session.progress();
    let complete = session.is_complete();
    session.close();
    drop(session);
    let _ = printer.await;

    if !complete {
        println!("Stopped at {progress}; run again to resume.");
        return Ok(());
    }
    if train {
        let message = backend.train().await.context("model training failed")?;
        println!("{message}");
    }
    Ok(())
}
