//! Voice session manager
//!
//! Runs a [`Session`] on a dedicated thread with its own single-threaded
//! tokio runtime and multiplexes its inputs: channel events, captured
//! samples, meter ticks and control commands.

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use parley_common::ChannelEvent;

use super::channel::{ChannelEvents, Endpoint};
use super::device::{AudioBackend, SampleReceiver};
use super::meter::{ActivityLevel, METER_INTERVAL_MS};

/// Upper bound on waiting for the channel transport after the session closes
const TRANSPORT_DRAIN_TIMEOUT_MS: u64 = 2000;
use super::session::{Session, SessionConfig, SessionEvent, SessionState};

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the session thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Stop,
}

// =============================================================================
// Session Loop
// =============================================================================

/// Wait for the next captured chunk, or forever if capture has not started
async fn next_samples(stream: &mut Option<SampleReceiver>) -> Option<Vec<f32>> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for the next channel event, treating a vanished transport as closed
///
/// Once the transport is gone the stream is dropped and this waits forever.
async fn next_channel_event(events: &mut Option<ChannelEvents>) -> ChannelEvent {
    match events {
        Some(rx) => match rx.recv().await {
            Some(event) => event,
            None => {
                *events = None;
                ChannelEvent::Closed
            }
        },
        None => std::future::pending().await,
    }
}

/// Let the transport finish its close handshake before the runtime goes away
async fn drain_transport(session: &mut Session) {
    let Some(task) = session.take_transport_task() else {
        return;
    };
    match tokio::time::timeout(Duration::from_millis(TRANSPORT_DRAIN_TIMEOUT_MS), task).await {
        Ok(Ok(())) => tracing::debug!("channel transport finished"),
        Ok(Err(e)) => tracing::warn!(error = %e, "channel transport task failed"),
        Err(_) => tracing::warn!("channel transport did not finish closing in time"),
    }
}

/// Drive a session until it is `Closed`
///
/// A session that fails waits in `Error` for a stop request (or for the
/// command sender to go away) and then settles into `Closed`.
pub async fn run_session(
    mut session: Session,
    backend: Box<dyn AudioBackend>,
    endpoint: Box<dyn Endpoint>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
) -> SessionState {
    let mut channel_events = match session.start(backend.as_ref(), endpoint.as_ref()) {
        Ok(events) => Some(events),
        Err(e) => {
            tracing::error!(error = %e, "session failed to start");
            None
        }
    };

    let mut capture_stream: Option<SampleReceiver> = None;
    let mut tick = tokio::time::interval(Duration::from_millis(METER_INTERVAL_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while *session.state() != SessionState::Closed {
        tokio::select! {
            event = next_channel_event(&mut channel_events) => {
                session.handle_channel_event(event);
                if capture_stream.is_none() {
                    capture_stream = session.take_capture_stream();
                }
            }

            samples = next_samples(&mut capture_stream) => {
                match samples {
                    Some(samples) => session.handle_samples(&samples),
                    None => {
                        capture_stream = None;
                        session.capture_ended();
                    }
                }
            }

            _ = tick.tick(), if !session.state().is_terminal() => {
                session.check_devices();
                session.measure_activity();
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Stop) | None => session.stop(),
                }
            }
        }
    }

    drain_transport(&mut session).await;
    session.state().clone()
}

// =============================================================================
// Session Handle
// =============================================================================

/// Handle to a running session
///
/// Dropping the handle stops the session.
pub struct SessionHandle {
    /// Command sender
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Join handle for the session thread
    /// Using std::thread instead of tokio::spawn because cpal's Stream is not Send
    handle: Option<JoinHandle<()>>,
    /// Activity level written by the session, read by the presentation layer
    level: ActivityLevel,
}

impl SessionHandle {
    /// Start a new session
    ///
    /// Returns a handle for controlling the session and a receiver for events.
    /// Devices are opened on the session thread through `backend`.
    pub fn start(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        endpoint: Box<dyn Endpoint>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let level = ActivityLevel::new();
        let session_level = level.clone();

        // Devices are not Send, so the session is built on its own thread
        let handle = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let reason = format!("failed to create session runtime: {e}");
                    tracing::error!(%reason, "session thread could not start");
                    let _ = event_tx.send(SessionEvent::StateChanged(SessionState::Error(reason)));
                    return;
                }
            };

            let session = Session::new(config, session_level).with_events(event_tx);
            let state = rt.block_on(run_session(session, backend, endpoint, command_rx));
            tracing::debug!(%state, "session thread exiting");
        });

        (
            Self {
                command_tx,
                handle: Some(handle),
                level,
            },
            event_rx,
        )
    }

    /// Current activity level (0.0 - 1.0)
    pub fn activity_level(&self) -> f32 {
        self.level.get()
    }

    /// Ask the session to stop; safe to call repeatedly
    pub fn stop(&mut self) {
        let _ = self.command_tx.send(SessionCommand::Stop);
        // Detach; the session thread exits on its own once torn down
        self.handle.take();
    }

    /// Stop the session and wait for the session thread to finish
    pub fn join(mut self) {
        let _ = self.command_tx.send(SessionCommand::Stop);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("session thread panicked");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}
