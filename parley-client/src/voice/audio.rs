//! Audio device management and streaming
//!
//! Provides audio device enumeration, microphone capture, and clock-scheduled
//! speaker playback using the cpal crate for cross-platform audio I/O. Uses
//! f32 samples throughout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Host, Sample, SampleFormat, Stream, StreamConfig, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use tokio::sync::mpsc;

use parley_common::audio::{
    CAPTURE_SAMPLE_RATE, MONO_CHANNELS, PLAYBACK_SAMPLE_RATE, STEREO_CHANNELS,
};

use super::device::{
    AudioBackend, CaptureDevice, CompletionCallback, OutputBuffer, PlaybackDevice, PlaybackId,
    SampleReceiver, SampleSender,
};
use super::resample::resample_to_len;
use crate::error::{AcquisitionError, SchedulingError};

// =============================================================================
// Constants
// =============================================================================

/// System default device display name
pub const SYSTEM_DEFAULT_DEVICE_NAME: &str = "System Default";

/// Sample formats the stream builders can convert
const SUPPORTED_FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

// =============================================================================
// Audio Device
// =============================================================================

/// Represents an audio device (input or output)
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device name for display
    pub name: String,
    /// Whether this represents the system default device
    pub is_default: bool,
}

impl AudioDevice {
    pub fn new(name: String, is_default: bool) -> Self {
        Self { name, is_default }
    }

    /// Create the system default device entry
    pub fn system_default() -> Self {
        Self {
            name: SYSTEM_DEFAULT_DEVICE_NAME.to_string(),
            is_default: true,
        }
    }
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for AudioDevice {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AudioDevice {}

// =============================================================================
// Device Enumeration
// =============================================================================

/// Get the default audio host for the platform
fn get_host() -> Host {
    cpal::default_host()
}

/// Collect device names, with "System Default" as the first entry
fn collect_devices(devices: impl Iterator<Item = Device>) -> Vec<AudioDevice> {
    let mut list = vec![AudioDevice::system_default()];
    for device in devices {
        if let Ok(desc) = device.description() {
            let name = desc.name().to_string();
            if !list.iter().any(|d| d.name == name) {
                list.push(AudioDevice::new(name, false));
            }
        }
    }
    list
}

/// List available audio output devices
pub fn list_output_devices() -> Vec<AudioDevice> {
    match get_host().output_devices() {
        Ok(devices) => collect_devices(devices),
        Err(_) => vec![AudioDevice::system_default()],
    }
}

/// List available audio input devices
pub fn list_input_devices() -> Vec<AudioDevice> {
    match get_host().input_devices() {
        Ok(devices) => collect_devices(devices),
        Err(_) => vec![AudioDevice::system_default()],
    }
}

/// Find an output device by name, or return the default
fn find_output_device(name: &str) -> Option<Device> {
    let host = get_host();

    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_output_device();
    }

    host.output_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_output_device())
}

/// Find an input device by name, or return the default
fn find_input_device(name: &str) -> Option<Device> {
    let host = get_host();

    if name.is_empty() || name == SYSTEM_DEFAULT_DEVICE_NAME {
        return host.default_input_device();
    }

    host.input_devices()
        .ok()?
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .or_else(|| host.default_input_device())
}

// =============================================================================
// Format Negotiation
// =============================================================================

/// Negotiated stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamFormat {
    channels: u16,
    sample_rate: u32,
    sample_format: SampleFormat,
}

impl StreamFormat {
    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

/// Pick a stream format, preferring mono then stereo at `preferred_rate`
///
/// Falls back to the device's default configuration at its own rate; the
/// caller resamples.
fn choose_format(
    configs: &[SupportedStreamConfigRange],
    preferred_rate: u32,
    fallback: Option<SupportedStreamConfig>,
) -> Option<StreamFormat> {
    for channels in [MONO_CHANNELS, STEREO_CHANNELS] {
        let found = configs.iter().find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= preferred_rate
                && c.max_sample_rate() >= preferred_rate
                && SUPPORTED_FORMATS.contains(&c.sample_format())
        });
        if let Some(config) = found {
            return Some(StreamFormat {
                channels,
                sample_rate: preferred_rate,
                sample_format: config.sample_format(),
            });
        }
    }

    fallback
        .filter(|c| c.channels() > 0 && SUPPORTED_FORMATS.contains(&c.sample_format()))
        .map(|c| StreamFormat {
            channels: c.channels(),
            sample_rate: c.sample_rate(),
            sample_format: c.sample_format(),
        })
}

// =============================================================================
// Capture
// =============================================================================

/// Microphone capture delivering mono f32 chunks
pub struct CpalCapture {
    device: Device,
    format: StreamFormat,
    /// Live input stream while started
    stream: Option<Stream>,
    error_tx: std_mpsc::Sender<String>,
    /// Receiver for audio stream errors
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalCapture {
    /// Open an input device by name (empty string for system default)
    pub fn new(device_name: &str) -> Result<Self, AcquisitionError> {
        let device = find_input_device(device_name).ok_or(AcquisitionError::InputNotFound)?;

        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| AcquisitionError::UnsupportedFormat(e.to_string()))?
            .collect();
        let format = choose_format(&configs, CAPTURE_SAMPLE_RATE, device.default_input_config().ok())
            .ok_or_else(|| {
                AcquisitionError::UnsupportedFormat("input device has no usable format".to_string())
            })?;
        tracing::debug!(?format, "negotiated capture format");

        let (error_tx, error_rx) = std_mpsc::channel();

        Ok(Self {
            device,
            format,
            stream: None,
            error_tx,
            error_rx,
        })
    }
}

impl CaptureDevice for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn start(&mut self) -> Result<SampleReceiver, AcquisitionError> {
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let config = self.format.stream_config();
        let error_tx = self.error_tx.clone();

        let stream = match self.format.sample_format {
            SampleFormat::F32 => build_capture_stream::<f32>(&self.device, &config, sample_tx, error_tx),
            SampleFormat::I16 => build_capture_stream::<i16>(&self.device, &config, sample_tx, error_tx),
            SampleFormat::U16 => build_capture_stream::<u16>(&self.device, &config, sample_tx, error_tx),
            other => Err(AcquisitionError::UnsupportedFormat(format!("{other:?}"))),
        }?;

        stream
            .play()
            .map_err(|e| AcquisitionError::Stream(format!("Failed to start capture: {e}")))?;
        self.stream = Some(stream);
        Ok(sample_rx)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }

    fn check_error(&self) -> Option<String> {
        self.error_rx.try_recv().ok()
    }
}

/// Build an input stream that downmixes every callback to mono
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    samples: SampleSender,
    error_tx: std_mpsc::Sender<String>,
) -> Result<Stream, AcquisitionError>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = if channels == 1 {
                    data.iter().map(|&s| f32::from_sample(s)).collect()
                } else {
                    data.chunks_exact(channels)
                        .map(|frame| {
                            frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>()
                                / channels as f32
                        })
                        .collect()
                };
                // Receiver dropped means the session is tearing down
                let _ = samples.send(mono);
            },
            move |err| {
                let _ = error_tx.send(format!("Audio capture error: {}", err));
            },
            None,
        )
        .map_err(|e| AcquisitionError::Stream(format!("Failed to build input stream: {e}")))
}

// =============================================================================
// Playback
// =============================================================================

/// A buffer placed on the output timeline
struct QueuedBuffer {
    id: PlaybackId,
    /// First output frame (at device rate) this buffer plays on
    start_frame: u64,
    samples: Vec<f32>,
}

impl QueuedBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame {
            return None;
        }
        self.samples.get((frame - self.start_frame) as usize).copied()
    }
}

/// A run of back-to-back buffers on the device timeline
///
/// Positions are derived from the total source samples in the run, so
/// per-buffer rounding never opens gaps or overlaps between neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Run {
    start_time: f64,
    start_frame: u64,
    source_rate: u32,
    source_frames: u64,
}

impl Run {
    fn end_time(&self) -> f64 {
        self.start_time + self.source_frames as f64 / self.source_rate as f64
    }

    /// Device frames spanned by the first `source_frames` samples of the run
    fn device_frames(&self, source_frames: u64, device_rate: u32) -> u64 {
        let rate = self.source_rate as u64;
        (source_frames * device_rate as u64 + rate / 2) / rate
    }
}

/// Where a buffer lands on the device timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    start_frame: u64,
    frames: usize,
}

/// Place `source_len` samples starting at `start_time`
///
/// A buffer that starts where `run` ends (within half a device frame)
/// continues it; anything else starts a new run.
fn place(
    run: Option<Run>,
    start_time: f64,
    source_len: usize,
    source_rate: u32,
    device_rate: u32,
) -> (Placement, Run) {
    let source_len = source_len as u64;

    if let Some(run) = run
        && run.source_rate == source_rate
        && ((start_time - run.end_time()) * device_rate as f64).abs() < 0.5
    {
        let start = run.start_frame + run.device_frames(run.source_frames, device_rate);
        let next = Run {
            source_frames: run.source_frames + source_len,
            ..run
        };
        let end = next.start_frame + next.device_frames(next.source_frames, device_rate);
        return (
            Placement {
                start_frame: start,
                frames: (end - start) as usize,
            },
            next,
        );
    }

    let start_frame = (start_time.max(0.0) * device_rate as f64).round() as u64;
    let next = Run {
        start_time,
        start_frame,
        source_rate: source_rate.max(1),
        source_frames: source_len,
    };
    (
        Placement {
            start_frame,
            frames: next.device_frames(source_len, device_rate) as usize,
        },
        next,
    )
}

#[derive(Default)]
struct OutputState {
    queued: Vec<QueuedBuffer>,
    /// Run the most recently scheduled buffer belongs to
    run: Option<Run>,
    next_id: u64,
}

/// Speaker output with a sample-accurate clock
///
/// The clock counts frames rendered by the output callback, so it only
/// advances while the device is actually playing.
pub struct CpalPlayback {
    stream: Option<Stream>,
    sample_rate: u32,
    state: Arc<Mutex<OutputState>>,
    frames_played: Arc<AtomicU64>,
    completion: Arc<Mutex<Option<CompletionCallback>>>,
    /// Receiver for audio stream errors
    error_rx: std_mpsc::Receiver<String>,
}

impl CpalPlayback {
    /// Open an output device by name (empty string for system default)
    ///
    /// The stream starts immediately and renders silence until buffers are
    /// scheduled.
    pub fn new(device_name: &str) -> Result<Self, AcquisitionError> {
        let device = find_output_device(device_name).ok_or(AcquisitionError::OutputNotFound)?;

        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| AcquisitionError::UnsupportedFormat(e.to_string()))?
            .collect();
        let format =
            choose_format(&configs, PLAYBACK_SAMPLE_RATE, device.default_output_config().ok())
                .ok_or_else(|| {
                    AcquisitionError::UnsupportedFormat(
                        "output device has no usable format".to_string(),
                    )
                })?;
        tracing::debug!(?format, "negotiated playback format");

        let state = Arc::new(Mutex::new(OutputState::default()));
        let frames_played = Arc::new(AtomicU64::new(0));
        let completion: Arc<Mutex<Option<CompletionCallback>>> = Arc::new(Mutex::new(None));
        let (error_tx, error_rx) = std_mpsc::channel();

        let config = format.stream_config();
        let shared = PlaybackShared {
            state: state.clone(),
            frames_played: frames_played.clone(),
            completion: completion.clone(),
        };
        let stream = match format.sample_format {
            SampleFormat::F32 => build_playback_stream::<f32>(&device, &config, shared, error_tx),
            SampleFormat::I16 => build_playback_stream::<i16>(&device, &config, shared, error_tx),
            SampleFormat::U16 => build_playback_stream::<u16>(&device, &config, shared, error_tx),
            other => Err(AcquisitionError::UnsupportedFormat(format!("{other:?}"))),
        }?;
        stream
            .play()
            .map_err(|e| AcquisitionError::Stream(format!("Failed to start playback: {e}")))?;

        Ok(Self {
            stream: Some(stream),
            sample_rate: format.sample_rate,
            state,
            frames_played,
            completion,
            error_rx,
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule_at(
        &self,
        buffer: &OutputBuffer,
        start_time: f64,
    ) -> Result<PlaybackId, SchedulingError> {
        if self.stream.is_none() {
            return Err(SchedulingError::DeviceClosed);
        }

        let poisoned = || SchedulingError::Rejected("output state poisoned".to_string());

        let run = self.state.lock().map_err(|_| poisoned())?.run;
        let (placement, next_run) = place(
            run,
            start_time,
            buffer.samples.len(),
            buffer.sample_rate,
            self.sample_rate,
        );

        // Resampled outside the lock so the output callback is never held up
        let samples = resample_to_len(
            &buffer.samples,
            buffer.sample_rate,
            self.sample_rate,
            placement.frames,
        )
        .map_err(SchedulingError::Rejected)?;

        let mut state = self.state.lock().map_err(|_| poisoned())?;

        // Checked under the lock so the callback cannot advance past it meanwhile
        if placement.start_frame < self.frames_played.load(Ordering::Acquire) {
            return Err(SchedulingError::InPast {
                start: start_time,
                now: self.current_time(),
            });
        }

        state.run = Some(next_run);
        state.next_id += 1;
        let id = PlaybackId(state.next_id);
        state.queued.push(QueuedBuffer {
            id,
            start_frame: placement.start_frame,
            samples,
        });
        Ok(id)
    }

    fn cancel(&self, id: PlaybackId) {
        if let Ok(mut state) = self.state.lock() {
            state.queued.retain(|buffer| buffer.id != id);
        }
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        if let Ok(mut completion) = self.completion.lock() {
            *completion = Some(callback);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
        if let Ok(mut state) = self.state.lock() {
            state.queued.clear();
        }
    }

    fn check_error(&self) -> Option<String> {
        self.error_rx.try_recv().ok()
    }
}

/// State shared between a playback device and its output callback
struct PlaybackShared {
    state: Arc<Mutex<OutputState>>,
    frames_played: Arc<AtomicU64>,
    completion: Arc<Mutex<Option<CompletionCallback>>>,
}

impl PlaybackShared {
    /// Render `frames` frames of mono output starting at the current clock
    ///
    /// Returns the ids of buffers that finished within this block.
    fn render(&self, out: &mut [f32]) -> Vec<PlaybackId> {
        let start = self.frames_played.load(Ordering::Acquire);
        let end = start + out.len() as u64;
        let mut finished = Vec::new();

        match self.state.lock() {
            Ok(mut state) => {
                for (i, dst) in out.iter_mut().enumerate() {
                    let position = start + i as u64;
                    let mixed: f32 = state
                        .queued
                        .iter()
                        .filter_map(|buffer| buffer.sample_at(position))
                        .sum();
                    *dst = mixed.clamp(-1.0, 1.0);
                }
                state.queued.retain(|buffer| {
                    if buffer.end_frame() <= end {
                        finished.push(buffer.id);
                        false
                    } else {
                        true
                    }
                });
                self.frames_played.store(end, Ordering::Release);
            }
            Err(_) => {
                // Couldn't lock state - output silence
                out.fill(0.0);
                self.frames_played.store(end, Ordering::Release);
            }
        }

        finished
    }

    /// Report finished buffers after every lock has been released
    fn notify(&self, finished: Vec<PlaybackId>) {
        if finished.is_empty() {
            return;
        }
        let callback = self
            .completion
            .lock()
            .ok()
            .and_then(|completion| completion.clone());
        if let Some(callback) = callback {
            for id in finished {
                callback(id);
            }
        }
    }
}

/// Build an output stream that renders the mono timeline to every channel
fn build_playback_stream<T>(
    device: &Device,
    config: &StreamConfig,
    shared: PlaybackShared,
    error_tx: std_mpsc::Sender<String>,
) -> Result<Stream, AcquisitionError>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                let finished = shared.render(&mut mono);
                for (frame, &sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(sample));
                }
                shared.notify(finished);
            },
            move |err| {
                let _ = error_tx.send(format!("Playback error: {}", err));
            },
            None,
        )
        .map_err(|e| AcquisitionError::Stream(format!("Failed to build output stream: {e}")))
}

// =============================================================================
// Backend
// =============================================================================

/// Opens cpal devices by name
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Input device name (empty for default)
    pub input_device: String,
    /// Output device name (empty for default)
    pub output_device: String,
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureDevice>, AcquisitionError> {
        Ok(Box::new(CpalCapture::new(&self.input_device)?))
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice>, AcquisitionError> {
        Ok(Box::new(CpalPlayback::new(&self.output_device)?))
    }
}

// =============================================================================
// Tests
// =============================================================================
