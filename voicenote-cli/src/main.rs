#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

mod args;

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use voicenote_core::{
    AudioLevels, CaptureBackend, RecordingResult, SessionController, SessionDelegate, SessionError, SessionState,
};

use args::{Cli, Command, RecordArgs};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Record(args) => platform::record(args),
        Command::Devices => platform::list_devices(),
    }
}

/// Forwards session notifications to the log.
struct LogDelegate;

impl SessionDelegate for LogDelegate {
    fn on_state_changed(&self, state: &SessionState) {
        log::debug!("session is {}", state.name());
    }

    fn on_error(&self, error: &SessionError) {
        log::error!("recording failed: {}", error);
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        log::info!("saved {} ({:.1}s)", result.file_path.display(), result.duration_secs);
    }
}

/// Record one note and print its `RecordingResult` as JSON.
fn record<B: CaptureBackend>(backend: B, args: RecordArgs) -> Result<()> {
    let config = args.session_config()?;
    let seconds = args.seconds;

    let mut controller = SessionController::new(backend);
    controller.set_delegate(std::sync::Arc::new(LogDelegate));
    let handle = controller.start(config.clone()).context("failed to start recording")?;

    match seconds {
        Some(secs) => eprintln!("Recording to {} for {}s...", config.output_path.display(), secs),
        None => eprintln!("Recording to {}. Press Enter to stop.", config.output_path.display()),
    }

    let enter = spawn_enter_listener();
    let started = Instant::now();
    loop {
        thread::sleep(POLL_INTERVAL);
        let state = controller.poll_state();
        if state.is_terminal() {
            break;
        }
        print_meter(controller.elapsed_secs(), &controller.current_levels());

        let timed_out = seconds.is_some_and(|secs| started.elapsed().as_secs_f64() >= secs);
        if timed_out || enter.try_recv().is_ok() {
            break;
        }
    }
    eprintln!();

    match controller.stop(&handle) {
        SessionState::Closed(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        SessionState::Failed(e) => Err(e).context("recording failed"),
        SessionState::Detached => bail!("capture worker did not stop in time; the file may still be finishing"),
        other => bail!("unexpected session state: {}", other.name()),
    }
}

fn spawn_enter_listener() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_ok() {
            let _ = tx.send(());
        }
    });
    rx
}

fn print_meter(elapsed_secs: f64, levels: &AudioLevels) {
    let width = 30;
    let filled = ((levels.rms * width as f32 * 2.0).round() as usize).min(width);
    eprint!(
        "\r{:>6.1}s [{}{}] peak {:>3.0}%",
        elapsed_secs,
        "#".repeat(filled),
        " ".repeat(width - filled),
        levels.peak * 100.0
    );
    let _ = io::stderr().flush();
}

#[cfg(target_os = "windows")]
mod platform {
    use anyhow::{bail, Result};

    use voicenote_windows::{permissions, DeviceEnumerator, WindowsBackend};

    use crate::args::RecordArgs;

    pub fn record(args: RecordArgs) -> Result<()> {
        if !permissions::check_microphone_permission()? {
            bail!("microphone unavailable: check Settings > Privacy > Microphone");
        }
        let backend = match args.device.clone() {
            Some(id) => WindowsBackend::with_device(id),
            None => WindowsBackend::new(),
        };
        super::record(backend, args)
    }

    pub fn list_devices() -> Result<()> {
        let devices = DeviceEnumerator::new()?.list_input_devices()?;
        if devices.is_empty() {
            println!("No capture devices found.");
        }
        for device in devices {
            let mut tags = Vec::new();
            if device.is_default {
                tags.push("default");
            }
            if device.is_default_communications {
                tags.push("communications");
            }
            if device.is_bluetooth_hfp() {
                tags.push("bluetooth hands-free");
            }
            println!("{}  {:?}  [{}]\n    {}", device.name, device.transport, tags.join(", "), device.id);
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use anyhow::{bail, Result};

    use crate::args::RecordArgs;

    pub fn record(args: RecordArgs) -> Result<()> {
        // Reject bad flags before reporting the missing backend.
        args.session_config()?;
        bail!("no capture backend for this platform; voicenote records on Windows")
    }

    pub fn list_devices() -> Result<()> {
        bail!("no capture backend for this platform; voicenote records on Windows")
    }
}
