//! Configuration management for the Hearth gateway

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::audio::capture::CaptureOptions;
use crate::{Error, Result};

/// Sample rate for microphone capture (the live endpoint expects 16kHz PCM)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate for response playback (the live endpoint streams 24kHz PCM)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured audio frame
pub const FRAME_SAMPLES: usize = 4096;

/// Hearth gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Live conversational endpoint
    pub live: LiveConfig,

    /// Audio capture/playback settings
    pub audio: AudioConfig,

    /// Command dispatch policy
    pub dispatch: DispatchConfig,

    /// Text chat endpoint (optional surface)
    pub chat: ChatConfig,

    /// System instruction override; `None` uses the embedded persona
    pub system_instruction: Option<String>,

    /// Path to data directory (collection store)
    pub data_dir: PathBuf,
}

/// Live conversational endpoint configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,

    /// API key appended to the connection URL as `?key=...`
    pub api_key: Option<String>,
}

/// Audio capture/playback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name (default: system default)
    pub input_device: Option<String>,

    /// Output device name (default: system default)
    pub output_device: Option<String>,

    /// Device-level echo cancellation
    pub echo_cancellation: bool,

    /// Device-level noise suppression
    pub noise_suppression: bool,

    /// Device-level automatic gain control
    pub auto_gain_control: bool,
}

impl AudioConfig {
    /// Build the capture options for this configuration
    #[must_use]
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            device: self.input_device.clone(),
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
        }
    }
}

/// Command dispatch policy
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Country code prepended to numbers without a leading `+`
    pub default_country_code: String,

    /// Delay before opening a messaging deep link, so the spoken
    /// confirmation is not cut off by the app switch
    pub whatsapp_delay: Duration,

    /// Delay before a simulated call reports connected
    pub call_connect_delay: Duration,

    /// Delay before a simulated call ends with the premium upsell
    pub call_upsell_delay: Duration,

    /// Telephony endpoint accepting `{to, message}`; `None` means simulation
    pub telephony_endpoint: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_country_code: "55".to_string(),
            whatsapp_delay: Duration::from_millis(2000),
            call_connect_delay: Duration::from_millis(2500),
            call_upsell_delay: Duration::from_millis(3000),
            telephony_endpoint: None,
        }
    }
}

/// Text chat endpoint configuration
#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    /// HTTP endpoint accepting `{message}` and returning `{text}`
    pub endpoint: Option<String>,
}

impl Config {
    /// Load configuration (env > config file > default)
    ///
    /// # Errors
    ///
    /// Returns error if no live endpoint is configured
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();

        let endpoint = std::env::var("HEARTH_LIVE_ENDPOINT")
            .ok()
            .or(fc.live.endpoint)
            .ok_or_else(|| {
                Error::Config(
                    "no live endpoint configured (set HEARTH_LIVE_ENDPOINT or [live] endpoint)"
                        .to_string(),
                )
            })?;

        let live = LiveConfig {
            endpoint,
            api_key: std::env::var("HEARTH_API_KEY").ok().or(fc.live.api_key),
        };

        let audio = AudioConfig {
            input_device: std::env::var("HEARTH_INPUT_DEVICE")
                .ok()
                .or(fc.audio.input_device),
            output_device: std::env::var("HEARTH_OUTPUT_DEVICE")
                .ok()
                .or(fc.audio.output_device),
            echo_cancellation: fc.audio.echo_cancellation.unwrap_or(true),
            noise_suppression: fc.audio.noise_suppression.unwrap_or(true),
            auto_gain_control: fc.audio.auto_gain_control.unwrap_or(true),
        };

        let dispatch_default = DispatchConfig::default();
        let dispatch = DispatchConfig {
            default_country_code: std::env::var("HEARTH_COUNTRY_CODE")
                .ok()
                .or(fc.dispatch.default_country_code)
                .unwrap_or(dispatch_default.default_country_code),
            whatsapp_delay: fc
                .dispatch
                .whatsapp_delay_ms
                .map_or(dispatch_default.whatsapp_delay, Duration::from_millis),
            call_connect_delay: fc
                .dispatch
                .call_connect_delay_ms
                .map_or(dispatch_default.call_connect_delay, Duration::from_millis),
            call_upsell_delay: fc
                .dispatch
                .call_upsell_delay_ms
                .map_or(dispatch_default.call_upsell_delay, Duration::from_millis),
            telephony_endpoint: std::env::var("HEARTH_TELEPHONY_ENDPOINT")
                .ok()
                .or(fc.dispatch.telephony_endpoint),
        };

        let chat = ChatConfig {
            endpoint: std::env::var("HEARTH_CHAT_ENDPOINT")
                .ok()
                .or(fc.chat.endpoint),
        };

        let system_instruction = std::env::var("HEARTH_SYSTEM_INSTRUCTION")
            .ok()
            .or(fc.system_instruction);

        let data_dir = std::env::var("HEARTH_DATA_DIR").map_or_else(
            |_| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("hearth"))
            },
            PathBuf::from,
        );

        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(
                path = %data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        Ok(Self {
            live,
            audio,
            dispatch,
            chat,
            system_instruction,
            data_dir,
        })
    }
}
