//! Audio resampling between device rates and the session's stream rates
//!
//! Microphones are resampled to 16kHz before framing and synthesized speech
//! is resampled from 24kHz to whatever the output device runs at. Uses the
//! rubato crate for synchronous FFT-based resampling.

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler};

use parley_common::audio::MONO_CHANNELS;

// =============================================================================
// Constants
// =============================================================================

/// Number of channels for mono audio
const MONO: usize = MONO_CHANNELS as usize;

/// Resampler input chunk length in milliseconds
const CHUNK_DURATION_MS: usize = 20;

/// Number of sub-chunks for FFT resampler (1 = lowest latency)
const RESAMPLER_SUB_CHUNKS: usize = 1;

/// Upper bound on silent chunks pushed through when flushing a finite buffer
const MAX_FLUSH_CHUNKS: usize = 64;

// =============================================================================
// Helpers
// =============================================================================

/// Check if a device rate differs from the stream rate
pub fn needs_resampling(device_rate: u32, stream_rate: u32) -> bool {
    device_rate != stream_rate
}

// =============================================================================
// Stream Resampler
// =============================================================================

/// Resamples a continuous mono stream between two fixed rates
///
/// Input is accumulated until a whole chunk is available, so output lags
/// input by up to one chunk.
pub struct StreamResampler {
    /// The rubato resampler instance
    resampler: Fft<f32>,
    /// Input buffer for accumulating samples
    input_buffer: Vec<f32>,
    /// Output buffer for accumulating resampled samples
    output_buffer: Vec<f32>,
    /// Working buffer for resampler input (single channel)
    work_in: Vec<Vec<f32>>,
    /// Working buffer for resampler output (single channel)
    work_out: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// Create a mono resampler from `from_rate` to `to_rate`
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, String> {
        let chunk_size = (from_rate as usize * CHUNK_DURATION_MS / 1000).max(1);
        let resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            RESAMPLER_SUB_CHUNKS,
            MONO,
            FixedSync::Input,
        )
        .map_err(|e| format!("Failed to create resampler {from_rate}Hz -> {to_rate}Hz: {e}"))?;

        let input_frames_max = resampler.input_frames_max();
        let output_frames_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            input_buffer: Vec::new(),
            output_buffer: Vec::new(),
            work_in: vec![vec![0.0; input_frames_max]],
            work_out: vec![vec![0.0; output_frames_max]],
        })
    }

    /// Number of input samples consumed by the next resampler pass
    pub fn input_frames_next(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Output samples emitted before the first sample of real input
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Feed mono samples and take whatever output is ready
    ///
    /// May return an empty vec if more input is needed.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, String> {
        self.input_buffer.extend_from_slice(samples);

        while self.input_buffer.len() >= self.resampler.input_frames_next() {
            let frames_needed = self.resampler.input_frames_next();

            self.work_in[0][..frames_needed].copy_from_slice(&self.input_buffer[..frames_needed]);
            self.input_buffer.drain(..frames_needed);

            let input_adapter = SequentialSliceOfVecs::new(&self.work_in[..], MONO, frames_needed)
                .map_err(|e| format!("Input adapter error: {}", e))?;

            let output_frames = self.resampler.output_frames_next();
            let mut output_adapter =
                SequentialSliceOfVecs::new_mut(&mut self.work_out[..], MONO, output_frames)
                    .map_err(|e| format!("Output adapter error: {}", e))?;

            let (_, frames_written) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, None)
                .map_err(|e| format!("Resampler error: {}", e))?;

            self.output_buffer
                .extend_from_slice(&self.work_out[0][..frames_written]);
        }

        Ok(std::mem::take(&mut self.output_buffer))
    }
}

/// Resample a finite mono buffer, returning exactly the rate-scaled length
pub fn resample_buffer(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    resample_to_len(samples, from_rate, to_rate, expected)
}

/// Resample a finite mono buffer to exactly `len` output samples
///
/// The resampler's output delay is skipped and the tail is flushed with
/// silence, so output sample 0 lines up with input sample 0.
pub fn resample_to_len(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
    len: usize,
) -> Result<Vec<f32>, String> {
    if !needs_resampling(from_rate, to_rate) || samples.is_empty() {
        let mut output = samples.to_vec();
        output.resize(len, 0.0);
        return Ok(output);
    }

    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let delay = resampler.output_delay();
    let wanted = delay + len;
    let mut output = resampler.process(samples)?;

    let mut flushes = 0;
    while output.len() < wanted && flushes < MAX_FLUSH_CHUNKS {
        let silence = vec![0.0; resampler.input_frames_next()];
        output.extend(resampler.process(&silence)?);
        flushes += 1;
    }

    output.resize(wanted.max(output.len()), 0.0);
    Ok(output[delay..wanted].to_vec())
}

// =============================================================================
// Tests
// =============================================================================
