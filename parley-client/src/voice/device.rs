//! Audio device boundary
//!
//! The session talks to hardware only through these traits. The cpal-backed
//! implementations live in [`super::audio`]; tests substitute scripted fakes.

use std::sync::Arc;

use tokio::sync::mpsc;

use parley_common::AudioFrame;

use crate::error::{AcquisitionError, SchedulingError};

/// Mono sample chunks pushed from a capture callback
pub type SampleReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

/// Sending half of a capture stream
pub type SampleSender = mpsc::UnboundedSender<Vec<f32>>;

/// Invoked from the audio engine when a scheduled buffer finishes playing
pub type CompletionCallback = Arc<dyn Fn(PlaybackId) + Send + Sync>;

/// Identifies one scheduled output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

impl std::fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mono samples ready to hand to an output device
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl OutputBuffer {
    /// Convert a decoded frame, downmixing to mono
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            samples: frame.downmix(),
            sample_rate: frame.sample_rate(),
        }
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A microphone that delivers mono samples once started
pub trait CaptureDevice {
    /// Rate of the samples delivered by `start`
    fn sample_rate(&self) -> u32;

    /// Begin streaming; chunks arrive on the returned receiver until `stop`
    fn start(&mut self) -> Result<SampleReceiver, AcquisitionError>;

    /// Stop streaming and release the hardware stream
    fn stop(&mut self);

    /// First asynchronous device error, if one occurred
    fn check_error(&self) -> Option<String>;
}

/// A speaker with a monotonic clock that accepts buffers at absolute times
///
/// The completion callback must never be invoked synchronously from
/// `schedule_at` or `cancel`; it is called from the audio engine after the
/// buffer has played out.
pub trait PlaybackDevice {
    /// Seconds elapsed on the output clock
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start at `start_time` on the output clock
    fn schedule_at(
        &self,
        buffer: &OutputBuffer,
        start_time: f64,
    ) -> Result<PlaybackId, SchedulingError>;

    /// Stop a scheduled buffer; unknown ids are ignored
    fn cancel(&self, id: PlaybackId);

    fn set_completion_callback(&mut self, callback: CompletionCallback);

    /// Release the output device
    fn close(&mut self);

    fn check_error(&self) -> Option<String>;
}

/// Opens devices on the thread that will own them
pub trait AudioBackend: Send {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, AcquisitionError>;

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, AcquisitionError>;
}
