//! Audio frame type and stream constants
//!
//! Outbound audio is 16kHz mono, inbound audio is 24kHz mono. Frames are
//! stored planar (one sample vector per channel) with samples normalized
//! to [-1.0, 1.0].

/// Sample rate for captured audio sent to the remote endpoint
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized audio received from the remote endpoint
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Number of channels for mono audio
pub const MONO_CHANNELS: u16 = 1;

/// Number of channels for stereo audio
pub const STEREO_CHANNELS: u16 = 2;

/// Samples per outbound capture frame
///
/// 1024 samples at 16kHz is 64ms of audio per frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 1024;

/// Duration of one capture frame in milliseconds
pub const CAPTURE_FRAME_DURATION_MS: u32 =
    CAPTURE_FRAME_SAMPLES as u32 * 1000 / CAPTURE_SAMPLE_RATE;

/// A block of audio samples at a known sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioFrame {
    /// Create a single-channel frame
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    /// Create a frame from planar channel data
    ///
    /// Returns `None` if there are no channels or the channels differ in length.
    pub fn from_channels(sample_rate: u32, channels: Vec<Vec<f32>>) -> Option<Self> {
        let first = channels.first()?.len();
        if channels.iter().any(|c| c.len() != first) {
            return None;
        }
        Some(Self {
            sample_rate,
            channels,
        })
    }

    /// Create a frame from interleaved samples
    ///
    /// Trailing samples that do not fill a whole multi-channel frame are ignored.
    pub fn from_interleaved(sample_rate: u32, channel_count: u16, samples: &[f32]) -> Option<Self> {
        let count = channel_count as usize;
        if count == 0 {
            return None;
        }
        let mut channels = vec![Vec::with_capacity(samples.len() / count); count];
        for chunk in samples.chunks_exact(count) {
            for (channel, &sample) in channels.iter_mut().zip(chunk) {
                channel.push(sample);
            }
        }
        Some(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Samples interleaved channel by channel (L R L R ...)
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len() * self.channels.len());
        for i in 0..self.len() {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Average all channels down to a single channel
    pub fn downmix(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            channels => {
                let scale = 1.0 / channels.len() as f32;
                (0..self.len())
                    .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}
