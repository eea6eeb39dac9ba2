//! Sample codec
//!
//! Converts normalized float samples to signed 16-bit little-endian PCM and
//! wraps the bytes in a base64 text envelope for the wire. Rounding is
//! symmetric with no dithering, so values of the form `k / 32767` survive a
//! round trip exactly.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

use crate::audio::AudioFrame;

/// Scale between normalized floats and 16-bit PCM
pub const PCM_SCALE: f32 = 32767.0;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Errors produced when decoding an inbound payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid base64 envelope: {0}")]
    Envelope(#[from] base64::DecodeError),
    #[error("payload of {len} bytes is not a multiple of {channels} channel(s) of 16-bit samples")]
    Misaligned { len: usize, channels: u16 },
    #[error("channel count must be at least 1")]
    NoChannels,
}

/// An encoded audio frame in its text envelope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireFrame(String);

impl WireFrame {
    /// Wrap an already-encoded envelope received from the wire
    pub fn from_base64(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Convert one normalized sample to 16-bit PCM
pub fn sample_to_pcm16(sample: f32) -> i16 {
    (sample * PCM_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert one 16-bit PCM sample to a normalized float
pub fn pcm16_to_sample(value: i16) -> f32 {
    (value as f32 / PCM_SCALE).max(-1.0)
}

/// Pack a frame as interleaved 16-bit little-endian PCM
pub fn encode_pcm16(frame: &AudioFrame) -> Vec<u8> {
    let sample_count = frame.len() * frame.channel_count() as usize;
    let mut bytes = Vec::with_capacity(sample_count * BYTES_PER_SAMPLE);
    for sample in frame.interleaved() {
        bytes.extend_from_slice(&sample_to_pcm16(sample).to_le_bytes());
    }
    bytes
}

/// Unpack interleaved 16-bit little-endian PCM into a planar frame
pub fn decode_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioFrame, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }
    if bytes.len() % (BYTES_PER_SAMPLE * channels as usize) != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            channels,
        });
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| pcm16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    AudioFrame::from_interleaved(sample_rate, channels, &samples).ok_or(DecodeError::NoChannels)
}

/// Encode a frame for transmission
pub fn encode(frame: &AudioFrame) -> WireFrame {
    WireFrame(STANDARD.encode(encode_pcm16(frame)))
}

/// Decode a received frame
pub fn decode(
    wire: &WireFrame,
    sample_rate: u32,
    channels: u16,
) -> Result<AudioFrame, DecodeError> {
    let bytes = STANDARD.decode(wire.as_str())?;
    decode_pcm16(&bytes, sample_rate, channels)
}
