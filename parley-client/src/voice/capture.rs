//! Capture pipeline
//!
//! Turns the microphone's irregular callback chunks into fixed-size 16kHz
//! frames and encodes each one for the wire as soon as it is complete.

use parley_common::audio::CAPTURE_SAMPLE_RATE;
use parley_common::{AudioFrame, WireFrame, codec};

use super::resample::{StreamResampler, needs_resampling};
use crate::error::AcquisitionError;

/// Splits a sample stream into frames of exactly `frame_size` samples
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples held back waiting for a full frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append samples and return every frame completed, oldest first
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }
        frames
    }

    /// Drop any partial frame, returning how many samples were discarded
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// Resamples, frames and encodes captured audio
pub struct CapturePipeline {
    framer: Framer,
    resampler: Option<StreamResampler>,
    frames_encoded: u64,
}

impl CapturePipeline {
    /// Create a pipeline for a device delivering mono samples at `device_rate`
    pub fn new(device_rate: u32, frame_size: usize) -> Result<Self, AcquisitionError> {
        let resampler = if needs_resampling(device_rate, CAPTURE_SAMPLE_RATE) {
            tracing::debug!(device_rate, "resampling capture to {}Hz", CAPTURE_SAMPLE_RATE);
            Some(
                StreamResampler::new(device_rate, CAPTURE_SAMPLE_RATE)
                    .map_err(AcquisitionError::UnsupportedFormat)?,
            )
        } else {
            None
        };

        Ok(Self {
            framer: Framer::new(frame_size),
            resampler,
            frames_encoded: 0,
        })
    }

    /// Number of frames encoded since the pipeline was created
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Convert a device chunk into zero or more encoded frames, in capture order
    pub fn process(&mut self, samples: &[f32]) -> Vec<WireFrame> {
        let resampled;
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(samples) {
                Ok(out) => {
                    resampled = out;
                    resampled.as_slice()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping capture chunk");
                    return Vec::new();
                }
            },
            None => samples,
        };

        let frames: Vec<WireFrame> = self
            .framer
            .push(samples)
            .into_iter()
            .map(|frame| codec::encode(&AudioFrame::mono(CAPTURE_SAMPLE_RATE, frame)))
            .collect();
        self.frames_encoded += frames.len() as u64;
        frames
    }

    /// Stop framing; a partial final frame is discarded rather than padded
    pub fn finish(&mut self) {
        let dropped = self.framer.discard_partial();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded partial capture frame");
        }
    }
}
