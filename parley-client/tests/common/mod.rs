//! Shared fakes for session integration tests
//!
//! `FakeBackend` hands out devices that record everything done to them and
//! expose a manually advanced output clock. `FakeEndpoint` keeps the
//! transport side of every channel it opens so a test can play the remote
//! agent.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use parley_client::error::{AcquisitionError, ChannelError, SchedulingError};
use parley_client::voice::channel::{
    ChannelCommand, ChannelHandle, ChannelTransport, Endpoint, channel_pair,
};
use parley_client::voice::device::{
    AudioBackend, CaptureDevice, CompletionCallback, OutputBuffer, PlaybackDevice, PlaybackId,
    SampleReceiver, SampleSender,
};
use parley_common::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use parley_common::protocol::ChannelConfig;
use parley_common::{AudioFrame, WireFrame, codec};

// =============================================================================
// Audio
// =============================================================================

/// Everything the fake devices have seen
pub struct AudioLog {
    pub capture_rate: u32,
    pub mic: Option<SampleSender>,
    pub capture_starts: u32,
    pub capture_stops: u32,
    pub capture_error: Option<String>,
    pub now: f64,
    pub next_id: u64,
    pub scheduled: Vec<(PlaybackId, f64, usize)>,
    pub cancelled: Vec<PlaybackId>,
    pub playback_closes: u32,
    pub callback: Option<CompletionCallback>,
    pub fail_capture: bool,
    pub fail_playback: bool,
}

impl Default for AudioLog {
    fn default() -> Self {
        Self {
            capture_rate: CAPTURE_SAMPLE_RATE,
            mic: None,
            capture_starts: 0,
            capture_stops: 0,
            capture_error: None,
            now: 0.0,
            next_id: 0,
            scheduled: Vec::new(),
            cancelled: Vec::new(),
            playback_closes: 0,
            callback: None,
            fail_capture: false,
            fail_playback: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    log: Arc<Mutex<AudioLog>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MutexGuard<'_, AudioLog> {
        self.log.lock().unwrap()
    }

    pub fn set_time(&self, now: f64) {
        self.log().now = now;
    }

    /// Push samples from the microphone, as the capture callback would
    pub fn speak(&self, samples: Vec<f32>) -> bool {
        match &self.log().mic {
            Some(mic) => mic.send(samples).is_ok(),
            None => false,
        }
    }

    /// Report a buffer as played out, from outside any session call
    pub fn finish(&self, id: PlaybackId) {
        let callback = self.log().callback.clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }
}

struct FakeCapture {
    log: Arc<Mutex<AudioLog>>,
}

impl CaptureDevice for FakeCapture {
    fn sample_rate(&self) -> u32 {
        self.log.lock().unwrap().capture_rate
    }

    fn start(&mut self) -> Result<SampleReceiver, AcquisitionError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut log = self.log.lock().unwrap();
        log.capture_starts += 1;
        log.mic = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.capture_stops += 1;
        log.mic = None;
    }

    fn check_error(&self) -> Option<String> {
        self.log.lock().unwrap().capture_error.take()
    }
}

struct FakePlayback {
    log: Arc<Mutex<AudioLog>>,
}

impl PlaybackDevice for FakePlayback {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn schedule_at(
        &self,
        buffer: &OutputBuffer,
        start_time: f64,
    ) -> Result<PlaybackId, SchedulingError> {
        let mut log = self.log.lock().unwrap();
        if start_time < log.now {
            return Err(SchedulingError::InPast {
                start: start_time,
                now: log.now,
            });
        }
        log.next_id += 1;
        let id = PlaybackId(log.next_id);
        log.scheduled.push((id, start_time, buffer.samples.len()));
        Ok(id)
    }

    fn cancel(&self, id: PlaybackId) {
        self.log.lock().unwrap().cancelled.push(id);
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.log.lock().unwrap().callback = Some(callback);
    }

    fn close(&mut self) {
        self.log.lock().unwrap().playback_closes += 1;
    }

    fn check_error(&self) -> Option<String> {
        None
    }
}

impl AudioBackend for FakeBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, AcquisitionError> {
        if self.log().fail_capture {
            return Err(AcquisitionError::InputNotFound);
        }
        Ok(Box::new(FakeCapture {
            log: self.log.clone(),
        }))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, AcquisitionError> {
        if self.log().fail_playback {
            return Err(AcquisitionError::OutputNotFound);
        }
        Ok(Box::new(FakePlayback {
            log: self.log.clone(),
        }))
    }
}

// =============================================================================
// Endpoint
// =============================================================================

#[derive(Clone, Default)]
pub struct FakeEndpoint {
    transports: Arc<Mutex<Vec<ChannelTransport>>>,
    configs: Arc<Mutex<Vec<ChannelConfig>>>,
    fail: bool,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// An endpoint whose `open` always fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.configs.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<ChannelConfig> {
        self.configs.lock().unwrap().last().cloned()
    }

    /// Take the transport of the most recently opened channel
    pub fn take_transport(&self) -> Option<ChannelTransport> {
        self.transports.lock().unwrap().pop()
    }

    /// Wait until a channel has been opened from another thread
    pub async fn wait_for_transport(&self) -> ChannelTransport {
        for _ in 0..500 {
            if let Some(transport) = self.take_transport() {
                return transport;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no channel was opened");
    }
}

impl Endpoint for FakeEndpoint {
    fn open(&self, config: &ChannelConfig) -> Result<ChannelHandle, ChannelError> {
        if self.fail {
            return Err(ChannelError::Connect("refused".to_string()));
        }
        let (handle, transport) = channel_pair();
        self.configs.lock().unwrap().push(config.clone());
        self.transports.lock().unwrap().push(transport);
        Ok(handle)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// An encoded inbound chunk of `ms` milliseconds at the playback rate
pub fn agent_chunk(ms: usize) -> WireFrame {
    let samples = PLAYBACK_SAMPLE_RATE as usize * ms / 1000;
    codec::encode(&AudioFrame::mono(PLAYBACK_SAMPLE_RATE, vec![0.25; samples]))
}

/// Drain every command the session has sent so far
pub fn drain_commands(transport: &mut ChannelTransport) -> Vec<ChannelCommand> {
    let mut commands = Vec::new();
    while let Ok(command) = transport.commands.try_recv() {
        commands.push(command);
    }
    commands
}
