//! Session state machine
//!
//! A [`Session`] owns every resource of one conversation and applies inbound
//! events to them one at a time. It never blocks and never spawns; the async
//! loop in [`super::manager`] feeds it channel events, captured samples and
//! meter ticks from a single thread, so all transitions are serialized.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_common::audio::{CAPTURE_FRAME_SAMPLES, MONO_CHANNELS, PLAYBACK_SAMPLE_RATE};
use parley_common::protocol::ChannelConfig;
use parley_common::{ChannelEvent, DecodeError, WireFrame, codec};

use super::capture::CapturePipeline;
use super::channel::{ChannelEvents, Endpoint};
use super::device::{AudioBackend, SampleReceiver};
use super::guard::ResourceGuard;
use super::meter::{ActivityLevel, ActivityMeter};
use super::playback::{PlaybackHandle, PlaybackScheduler};
use crate::error::SessionError;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle of a session
///
/// `Closed` and `Error` are terminal; a new session is needed to reconnect.
/// A stop request settles `Error` into `Closed`, which is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error(_))
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Error(_))
                | (Open, Closing)
                | (Open, Error(_))
                | (Closing, Closed)
                | (Error(_), Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

// =============================================================================
// Configuration and Events
// =============================================================================

/// Configuration for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Parameters sent to the endpoint when the channel opens
    pub channel: ChannelConfig,
    /// Samples per outbound frame at 16kHz
    pub capture_frame_samples: usize,
    /// Sample rate of inbound audio chunks
    pub playback_sample_rate: u32,
    /// Channel count of inbound audio chunks
    pub playback_channels: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            capture_frame_samples: CAPTURE_FRAME_SAMPLES,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            playback_channels: MONO_CHANNELS,
        }
    }
}

/// Notifications for whoever is presenting the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Pending playback was discarded because the user barged in
    Interrupted { cancelled: usize },
    /// The agent finished speaking
    TurnComplete,
}

// =============================================================================
// Session
// =============================================================================

pub struct Session {
    config: SessionConfig,
    state: SessionState,
    resources: ResourceGuard,
    pipeline: Option<CapturePipeline>,
    capture_stream: Option<SampleReceiver>,
    transport_task: Option<JoinHandle<()>>,
    meter: ActivityMeter,
    last_error: Option<String>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Session {
    pub fn new(config: SessionConfig, level: ActivityLevel) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            resources: ResourceGuard::empty(),
            pipeline: None,
            capture_stream: None,
            transport_task: None,
            meter: ActivityMeter::new(level),
            last_error: None,
            events: None,
        }
    }

    /// Report state changes and playback notifications on `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Reason for the failure, kept after the session settles into `Closed`
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn resources(&self) -> &ResourceGuard {
        &self.resources
    }

    pub fn scheduler(&self) -> Option<&PlaybackScheduler> {
        self.resources.scheduler()
    }

    /// Acquire devices and open the channel (`Idle -> Connecting`)
    ///
    /// Returns the channel's event stream, which must be fed back through
    /// [`Session::handle_channel_event`]. On failure the session is left in
    /// `Error` with nothing held.
    pub fn start(
        &mut self,
        backend: &dyn AudioBackend,
        endpoint: &dyn Endpoint,
    ) -> Result<ChannelEvents, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::NotIdle(self.state.to_string()));
        }
        self.transition(SessionState::Connecting);

        self.resources = match ResourceGuard::acquire(backend) {
            Ok(resources) => resources,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e.into());
            }
        };

        match endpoint.open(&self.config.channel) {
            Ok(handle) => {
                self.resources.attach_channel(handle.sender);
                self.transport_task = handle.task;
                Ok(handle.events)
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Apply one inbound channel event
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match (self.state.clone(), event) {
            (SessionState::Connecting, ChannelEvent::Ready) => self.open(),
            (SessionState::Open, ChannelEvent::AudioChunk(wire)) => {
                if let Err(e) = self.receive_audio(&wire) {
                    tracing::warn!(error = %e, "dropping malformed audio chunk");
                }
            }
            (SessionState::Open, ChannelEvent::Interrupted) => self.interrupt(),
            (SessionState::Open, ChannelEvent::TurnComplete) => {
                tracing::debug!("agent turn complete");
                self.emit(SessionEvent::TurnComplete);
            }
            (SessionState::Connecting | SessionState::Open, ChannelEvent::Closed) => {
                tracing::info!("remote closed the channel");
                self.close();
            }
            (SessionState::Connecting | SessionState::Open, ChannelEvent::Error(reason)) => {
                self.fail(reason);
            }
            (state, event) => {
                tracing::debug!(%state, ?event, "ignoring channel event");
            }
        }
    }

    /// Decode an inbound chunk and queue it for playback
    ///
    /// A malformed chunk is rejected without touching the scheduler. Chunks
    /// arriving outside `Open` are dropped.
    pub fn receive_audio(
        &mut self,
        wire: &WireFrame,
    ) -> Result<Option<PlaybackHandle>, DecodeError> {
        if self.state != SessionState::Open {
            return Ok(None);
        }
        let frame = codec::decode(
            wire,
            self.config.playback_sample_rate,
            self.config.playback_channels,
        )?;

        let Some(scheduler) = self.resources.scheduler() else {
            return Ok(None);
        };
        match scheduler.schedule_playback(&frame) {
            Ok(handle) => {
                if let Some(handle) = &handle {
                    tracing::trace!(
                        id = %handle.id,
                        start = handle.start_time,
                        duration = handle.duration,
                        "scheduled playback"
                    );
                }
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping audio chunk");
                Ok(None)
            }
        }
    }

    /// Feed captured samples through the pipeline and send complete frames
    ///
    /// Samples arriving while not `Open` are dropped silently.
    pub fn handle_samples(&mut self, samples: &[f32]) {
        if self.state != SessionState::Open {
            return;
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        self.meter.push(samples);
        let frames = pipeline.process(samples);

        if let Some(channel) = self.resources.channel() {
            for frame in frames {
                if channel.send(frame).is_err() {
                    tracing::debug!("channel gone, dropping capture frame");
                    break;
                }
            }
        }
    }

    /// Take the transport task so it can finish closing before shutdown
    pub fn take_transport_task(&mut self) -> Option<JoinHandle<()>> {
        self.transport_task.take()
    }

    /// Take the capture stream started when the session opened
    pub fn take_capture_stream(&mut self) -> Option<SampleReceiver> {
        self.capture_stream.take()
    }

    /// Recompute the activity level; zero outside `Open`
    pub fn measure_activity(&mut self) -> f32 {
        if self.state == SessionState::Open {
            self.meter.measure()
        } else {
            0.0
        }
    }

    /// Fail the session if either device has reported an error
    pub fn check_devices(&mut self) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Open) {
            return;
        }
        let error = self
            .resources
            .capture()
            .and_then(|capture| capture.check_error())
            .or_else(|| {
                self.resources
                    .scheduler()
                    .and_then(|scheduler| scheduler.check_error())
            });
        if let Some(e) = error {
            self.fail(format!("audio device error: {e}"));
        }
    }

    /// The capture stream ended without being asked to
    pub fn capture_ended(&mut self) {
        if self.state == SessionState::Open {
            self.fail("capture stream ended".to_string());
        }
    }

    /// Stop the session from any state
    ///
    /// Idempotent; every state ends in `Closed`. A failed session has already
    /// released its resources and keeps its reason in [`Session::last_error`].
    pub fn stop(&mut self) {
        match self.state {
            SessionState::Idle => self.transition(SessionState::Closed),
            SessionState::Connecting | SessionState::Open => self.close(),
            SessionState::Closing | SessionState::Error(_) => {
                self.teardown();
                self.transition(SessionState::Closed);
            }
            SessionState::Closed => {}
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn open(&mut self) {
        let frame_size = self.config.capture_frame_samples;
        let Some(capture) = self.resources.capture_mut() else {
            self.fail("capture device missing".to_string());
            return;
        };

        let pipeline = match CapturePipeline::new(capture.sample_rate(), frame_size) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        let stream = match capture.start() {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        if let Some(scheduler) = self.resources.scheduler() {
            scheduler.reset_cursor();
        }
        self.pipeline = Some(pipeline);
        self.capture_stream = Some(stream);
        self.meter.reset();
        self.transition(SessionState::Open);
    }

    fn interrupt(&mut self) {
        let cancelled = self
            .resources
            .scheduler()
            .map_or(0, PlaybackScheduler::cancel_all);
        tracing::info!(cancelled, "playback interrupted");
        self.emit(SessionEvent::Interrupted { cancelled });
    }

    fn close(&mut self) {
        self.transition(SessionState::Closing);
        self.teardown();
        self.transition(SessionState::Closed);
    }

    fn fail(&mut self, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        tracing::error!(%reason, "session failed");
        self.last_error = Some(reason.clone());
        self.teardown();
        self.transition(SessionState::Error(reason));
    }

    fn teardown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.finish();
        }
        self.capture_stream = None;
        self.meter.reset();
        self.resources.release();
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(&next) {
            tracing::warn!(from = %self.state, to = %next, "rejected session transition");
            return;
        }
        tracing::info!(from = %self.state, to = %next, "session state changed");
        self.state = next.clone();
        self.emit(SessionEvent::StateChanged(next));
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
