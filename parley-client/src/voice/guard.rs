//! Session resource guard
//!
//! Owns the microphone, the playback scheduler (and through it the output
//! device) and the channel sender. `release` tears all three down in a fixed
//! order and can be called any number of times; each resource is released
//! exactly once, and dropping the guard releases whatever is still held.

use super::channel::ChannelSender;
use super::device::{AudioBackend, CaptureDevice};
use super::playback::PlaybackScheduler;
use crate::error::AcquisitionError;

#[derive(Default)]
pub struct ResourceGuard {
    capture: Option<Box<dyn CaptureDevice>>,
    scheduler: Option<PlaybackScheduler>,
    channel: Option<ChannelSender>,
}

impl ResourceGuard {
    /// A guard holding nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Open the microphone and the output device
    ///
    /// If the output device fails to open, the already-opened microphone is
    /// released before the error is returned.
    pub fn acquire(backend: &dyn AudioBackend) -> Result<Self, AcquisitionError> {
        let mut guard = Self::empty();
        guard.capture = Some(backend.open_capture()?);
        match backend.open_playback() {
            Ok(device) => {
                guard.scheduler = Some(PlaybackScheduler::new(device));
                Ok(guard)
            }
            Err(e) => {
                guard.release();
                Err(e)
            }
        }
    }

    pub fn attach_channel(&mut self, channel: ChannelSender) {
        self.channel = Some(channel);
    }

    pub fn capture_mut(&mut self) -> Option<&mut (dyn CaptureDevice + 'static)> {
        self.capture.as_deref_mut()
    }

    pub fn capture(&self) -> Option<&(dyn CaptureDevice + 'static)> {
        self.capture.as_deref()
    }

    pub fn scheduler(&self) -> Option<&PlaybackScheduler> {
        self.scheduler.as_ref()
    }

    pub fn channel(&self) -> Option<&ChannelSender> {
        self.channel.as_ref()
    }

    /// True once nothing is held
    pub fn is_released(&self) -> bool {
        self.capture.is_none() && self.scheduler.is_none() && self.channel.is_none()
    }

    /// Stop capture, silence and close output, then close the channel
    pub fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            tracing::debug!("capture device released");
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.close();
            tracing::debug!("output device released");
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
            tracing::debug!("channel close requested");
        }
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}
