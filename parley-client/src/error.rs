//! Error types for the voice session
//!
//! Each boundary the session crosses has its own error enum so callers can
//! tell a missing microphone apart from a dropped connection.

use std::path::PathBuf;

use thiserror::Error;

/// A device could not be acquired
///
/// Fatal to session start. Anything acquired before the failure is released
/// before this error reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("input device not found")]
    InputNotFound,
    #[error("output device not found")]
    OutputNotFound,
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to open audio stream: {0}")]
    Stream(String),
}

/// The remote channel failed to open or broke while open
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("channel closed")]
    Closed,
}

/// The output device refused a scheduled buffer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    #[error("start time {start:.3}s is behind the output clock at {now:.3}s")]
    InPast { start: f64, now: f64 },
    #[error("output device rejected buffer: {0}")]
    Rejected(String),
    #[error("output device is closed")]
    DeviceClosed,
}

/// Errors surfaced by session control operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session can only be started from idle (currently {0})")]
    NotIdle(String),
}

/// Errors reading or writing the settings file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
}
