//! Full-duplex voice sessions
//!
//! This module provides the client side of a live voice conversation:
//! - Audio device enumeration, microphone capture and scheduled playback
//! - Capture framing, resampling and PCM encoding
//! - Gap-free playback scheduling with barge-in cancellation
//! - The session state machine and its resource guard
//! - Input activity metering
//! - The WebSocket channel to the remote agent

pub mod audio;
pub mod capture;
pub mod channel;
pub mod device;
pub mod guard;
pub mod manager;
pub mod meter;
pub mod playback;
pub mod resample;
pub mod session;
pub mod websocket;
