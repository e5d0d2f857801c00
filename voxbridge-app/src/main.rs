//! `voxbridge`: headless host: microphone in, transcripts out.

mod settings;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use voxbridge_core::audio::device::list_input_devices;
use tokio::sync::broadcast;
use voxbridge_core::{
    spawn_worker, CaptureStateEvent, CpalSource, DirModelStore, RecognitionResult, Recognizer,
    SegmentKind,
};

use crate::settings::{default_settings_path, load_settings, save_settings};

#[derive(Debug, Default)]
struct Args {
    settings: Option<PathBuf>,
    model: Option<String>,
    list_devices: bool,
}

const USAGE: &str = "usage: voxbridge [--settings PATH] [--model REF] [--list-devices]";

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let value = it.next().context("--settings requires a path")?;
                args.settings = Some(PathBuf::from(value));
            }
            "--model" => {
                args.model = Some(it.next().context("--model requires a model reference")?);
            }
            "--list-devices" => args.list_devices = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(args)
}

#[cfg(not(feature = "vosk"))]
fn engine() -> voxbridge_core::StubEngine {
    warn!("built without the vosk feature, using the stub engine");
    voxbridge_core::StubEngine::new()
}

#[cfg(feature = "vosk")]
fn engine() -> voxbridge_core::VoskEngine {
    voxbridge_core::VoskEngine::new()
}

fn print_result(result: RecognitionResult) {
    let mut stdout = std::io::stdout().lock();
    let _ = match result.kind {
        SegmentKind::Partial => write!(stdout, "\r\x1b[2K{}", result.text),
        SegmentKind::Final => writeln!(stdout, "\r\x1b[2K{}", result.text),
    };
    let _ = stdout.flush();
}

/// Log capture state changes until the recognizer goes away.
///
/// Returns how many events were logged.
async fn log_capture_states(mut states: broadcast::Receiver<CaptureStateEvent>) -> usize {
    let mut logged = 0;
    loop {
        match states.recv().await {
            Ok(event) => {
                info!(state = ?event.state, detail = ?event.detail, "capture state");
                logged += 1;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("capture state receiver lagged by {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    logged
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxbridge=info,voxbridge_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    if args.list_devices {
        let devices = list_input_devices();
        if devices.is_empty() {
            println!("no input devices found");
        }
        for device in devices {
            println!("{device}");
        }
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args.settings.unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    if !settings_path.exists() {
        if let Err(e) = save_settings(&settings_path, &app_settings) {
            warn!(settings_path = %settings_path.display(), "could not write default settings: {e}");
        }
    }
    app_settings.apply_env_overrides();
    if let Some(model) = args.model {
        app_settings.model_ref = model;
    }
    app_settings.normalize();
    info!(
        settings_path = %settings_path.display(),
        model_ref = %app_settings.model_ref,
        buffer_size = app_settings.buffer_size,
        "settings loaded"
    );

    // ── Worker thread ─────────────────────────────────────────────────────
    let worker_config = app_settings.worker_config(&settings_path);
    let (transport, worker_thread) = spawn_worker(engine(), DirModelStore::new(), worker_config)
        .context("failed to spawn recognizer worker")?;

    // ── Recognizer ────────────────────────────────────────────────────────
    let recognizer = Recognizer::new(
        transport,
        Arc::new(CpalSource::new()),
        app_settings.recognizer_options(),
        print_result,
    );
    let states = recognizer.subscribe_state();
    tokio::spawn(log_capture_states(states));

    recognizer
        .set_active(true)
        .await
        .context("failed to start recognition")?;
    info!("listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("stopping");
    if let Err(e) = recognizer.set_active(false).await {
        warn!("stop did not complete cleanly: {e}");
    }

    // Dropping the last client handle lets the worker thread exit.
    drop(recognizer);
    let joined = tokio::task::spawn_blocking(move || worker_thread.join()).await?;
    if joined.is_err() {
        warn!("recognizer worker panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use voxbridge_core::CaptureState;

    use super::*;

    #[tokio::test]
    async fn state_logging_survives_a_lagged_receiver() {
        let (tx, rx) = broadcast::channel(2);
        let states = [
            CaptureState::Starting,
            CaptureState::Active,
            CaptureState::Stopping,
            CaptureState::Inactive,
        ];
        for (seq, state) in states.into_iter().enumerate() {
            tx.send(CaptureStateEvent {
                seq: seq as u64,
                state,
                detail: None,
            })
            .unwrap();
        }
        drop(tx);

        // The two oldest events are overwritten; the rest are still logged.
        assert_eq!(log_capture_states(rx).await, 2);
    }
}
