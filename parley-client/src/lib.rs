//! Parley voice session client

pub mod config;
pub mod constants;
pub mod error;
pub mod voice;
