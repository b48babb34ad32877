//! TOML configuration file loading
//!
//! Supports `~/.config/hearth/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HearthConfigFile {
    /// Live conversational endpoint configuration
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Audio capture/playback configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Command dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Text chat endpoint configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// System instruction override (replaces the embedded persona)
    pub system_instruction: Option<String>,
}

/// Live endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint URL (e.g. `wss://host/v1/live`)
    pub endpoint: Option<String>,

    /// API key appended to the connection URL
    pub api_key: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Input device name (default: system default)
    pub input_device: Option<String>,

    /// Output device name (default: system default)
    pub output_device: Option<String>,

    /// Device-level echo cancellation toggle
    pub echo_cancellation: Option<bool>,

    /// Device-level noise suppression toggle
    pub noise_suppression: Option<bool>,

    /// Device-level automatic gain control toggle
    pub auto_gain_control: Option<bool>,
}

/// Command dispatch configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    /// Country code prepended to numbers without a leading `+` (e.g. "55")
    pub default_country_code: Option<String>,

    /// Delay before opening a messaging deep link, in milliseconds
    pub whatsapp_delay_ms: Option<u64>,

    /// Delay before a simulated call reports connected, in milliseconds
    pub call_connect_delay_ms: Option<u64>,

    /// Delay before a simulated call ends with the upsell, in milliseconds
    pub call_upsell_delay_ms: Option<u64>,

    /// Telephony endpoint accepting `{to, message}` (omit for simulation only)
    pub telephony_endpoint: Option<String>,
}

/// Text chat endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// HTTP endpoint accepting `{message}` and returning `{text}`
    pub endpoint: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HearthConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HearthConfigFile {
    let Some(path) = config_file_path() else {
        return HearthConfigFile::default();
    };

    if !path.exists() {
        return HearthConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HearthConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HearthConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hearth/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hearth").join("config.toml"))
}
