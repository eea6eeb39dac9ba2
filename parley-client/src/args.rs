//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

/// Get default config path help text for current platform
fn default_config_help() -> String {
    #[cfg(target_os = "linux")]
    return "Settings file path (default: ~/.config/parley/config.json)".to_string();

    #[cfg(target_os = "macos")]
    return "Settings file path (default: ~/Library/Application Support/parley/config.json)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Settings file path (default: %APPDATA%\\parley\\config.json)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Settings file path (overrides platform default)".to_string();
}

/// Parley live voice session
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file path (overrides platform default)
    #[arg(short, long, help = default_config_help())]
    pub config: Option<PathBuf>,

    /// WebSocket URL of the conversational endpoint
    #[arg(short, long)]
    pub url: Option<String>,

    /// Model name requested during setup
    #[arg(short, long)]
    pub model: Option<String>,

    /// Prebuilt voice for the agent's speech
    #[arg(long)]
    pub voice: Option<String>,

    /// System instruction describing the agent's persona
    #[arg(long)]
    pub instruction: Option<String>,

    /// Input device name
    #[arg(short, long)]
    pub input: Option<String>,

    /// Output device name
    #[arg(short, long)]
    pub output: Option<String>,

    /// Print available audio devices and exit
    #[arg(long, default_value = "false")]
    pub list_devices: bool,

    /// Write the effective settings to the settings file before starting
    #[arg(long, default_value = "false")]
    pub save: bool,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["parley"]);
        assert!(args.url.is_none());
        assert!(!args.list_devices);
        assert!(!args.debug);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "parley",
            "--url",
            "ws://127.0.0.1:9000",
            "--voice",
            "Puck",
            "-i",
            "USB Mic",
            "--debug",
        ]);
        assert_eq!(args.url.as_deref(), Some("ws://127.0.0.1:9000"));
        assert_eq!(args.voice.as_deref(), Some("Puck"));
        assert_eq!(args.input.as_deref(), Some("USB Mic"));
        assert!(args.debug);
    }
}
