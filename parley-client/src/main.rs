//! Parley voice session client

mod args;

use std::io::Write;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use args::Args;
use parley_client::config::Settings;
use parley_client::constants::{API_KEY_ENV, LEVEL_BAR_WIDTH, LEVEL_DISPLAY_INTERVAL_MS};
use parley_client::voice::audio::{CpalBackend, list_input_devices, list_output_devices};
use parley_client::voice::manager::SessionHandle;
use parley_client::voice::session::{SessionEvent, SessionState};
use parley_client::voice::websocket::WebSocketEndpoint;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if args.list_devices {
        print_devices();
        return;
    }

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if args.save {
        let saved = match &args.config {
            Some(path) => settings.save_to(path),
            None => settings.save(),
        };
        if let Err(e) = saved {
            eprintln!("Failed to save settings: {e}");
        }
    }

    let api_key = std::env::var(API_KEY_ENV).ok();
    let url = authorized_url(&settings.endpoint_url, api_key.as_deref());
    let backend = CpalBackend {
        input_device: settings.input_device.clone(),
        output_device: settings.output_device.clone(),
    };

    let (handle, mut events) = SessionHandle::start(
        settings.session_config(),
        Box::new(backend),
        Box::new(WebSocketEndpoint::new(url)),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    let outcome = present(&mut events, || handle.activity_level(), shutdown).await;
    if outcome == Outcome::Interrupted {
        println!("Ending session...");
    }

    let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    if matches!(outcome, Outcome::Finished(SessionState::Error(_))) {
        std::process::exit(1);
    }
}

/// How the presentation loop ended
#[derive(Debug, PartialEq)]
enum Outcome {
    /// The user asked to end the conversation
    Interrupted,
    /// The session reached a terminal state on its own
    Finished(SessionState),
}

/// Print session progress until it ends or `shutdown` resolves
///
/// `shutdown` is polled by reference across iterations, so a request that
/// arrives while an event is being handled is still seen.
async fn present<F>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    activity: impl Fn() -> f32,
    shutdown: F,
) -> Outcome
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut display = tokio::time::interval(Duration::from_millis(LEVEL_DISPLAY_INTERVAL_MS));
    let mut open = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Outcome::Finished(SessionState::Closed);
                };
                match event {
                    SessionEvent::StateChanged(state) => {
                        clear_level_line(open);
                        open = state == SessionState::Open;
                        println!("Session {state}");
                        if state == SessionState::Open {
                            println!("Speak now; press Ctrl+C to end the conversation");
                        }
                        if state.is_terminal() {
                            return Outcome::Finished(state);
                        }
                    }
                    SessionEvent::Interrupted { cancelled } => {
                        tracing::debug!(cancelled, "agent interrupted");
                    }
                    SessionEvent::TurnComplete => {}
                }
            }

            _ = &mut shutdown => {
                clear_level_line(open);
                return Outcome::Interrupted;
            }

            _ = display.tick(), if open => {
                print_level(activity());
            }
        }
    }
}

/// Initialize tracing, letting RUST_LOG override the default level
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load settings from file, then apply command-line overrides
fn load_settings(args: &Args) -> Result<Settings, String> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| format!("Failed to load settings from {}: {e}", path.display()))?,
        None => Settings::load(),
    };

    if let Some(url) = &args.url {
        settings.endpoint_url = url.clone();
    }
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(voice) = &args.voice {
        settings.voice_name = voice.clone();
    }
    if let Some(instruction) = &args.instruction {
        settings.system_instruction = instruction.clone();
    }
    if let Some(input) = &args.input {
        settings.input_device = input.clone();
    }
    if let Some(output) = &args.output {
        settings.output_device = output.clone();
    }

    Ok(settings)
}

/// Append the API key as a query parameter unless the URL already carries one
fn authorized_url(url: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) if !key.is_empty() && !url.contains("key=") => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}key={key}")
        }
        _ => url.to_string(),
    }
}

fn print_devices() {
    println!("Input devices:");
    for device in list_input_devices() {
        println!("  {device}");
    }
    println!("Output devices:");
    for device in list_output_devices() {
        println!("  {device}");
    }
}

/// Render the activity level as a bar on the current line
fn print_level(level: f32) {
    let filled = (level.clamp(0.0, 1.0) * LEVEL_BAR_WIDTH as f32).round() as usize;
    let bar = format!(
        "{}{}",
        "#".repeat(filled),
        " ".repeat(LEVEL_BAR_WIDTH - filled)
    );
    print!("\r[{bar}]");
    let _ = std::io::stdout().flush();
}

fn clear_level_line(open: bool) {
    if open {
        print!("\r{}\r", " ".repeat(LEVEL_BAR_WIDTH + 2));
        let _ = std::io::stdout().flush();
    }
}
