//! Application-wide constants
//!
//! Shared constants used across multiple modules.

/// Application directory name (used in config directory path)
pub const APP_DIR_NAME: &str = "parley";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default endpoint for live audio conversations
pub const DEFAULT_ENDPOINT_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// System default device identifier
pub const SYSTEM_DEFAULT_DEVICE: &str = "";

/// Environment variable holding the endpoint API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// How often the activity level is printed, in milliseconds
pub const LEVEL_DISPLAY_INTERVAL_MS: u64 = 250;

/// Width of the activity bar in characters
pub const LEVEL_BAR_WIDTH: usize = 30;
