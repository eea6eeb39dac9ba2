//! Parley Common Library
//!
//! Shared audio types, the PCM sample codec, and the wire protocol spoken
//! between a Parley client and a remote conversational endpoint.

pub mod audio;
pub mod codec;
pub mod protocol;

pub use audio::AudioFrame;
pub use codec::{DecodeError, WireFrame};
pub use protocol::ChannelEvent;
