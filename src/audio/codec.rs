//! Audio codec utilities
//!
//! Pure conversions between floating-point samples, 16-bit little-endian PCM,
//! and the base64 wire encoding. No resampling happens here — capture and
//! playback contexts are opened at the rates the endpoint expects (16kHz in,
//! 24kHz out).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// A decoded audio buffer ready for playback
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Interleaved f32 samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

impl AudioClip {
    /// Duration of the clip in seconds
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / usize::from(self.channels);
        frames as f64 / f64::from(self.sample_rate)
    }
}

/// Encode floating-point samples as base64-wrapped 16-bit LE PCM
///
/// Samples are clamped to [-1.0, 1.0] before scaling. Deterministic: the same
/// input always produces the same output string.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(&bytes)
}

/// Decode a base64 payload into raw bytes
///
/// # Errors
///
/// Returns `Error::Decode` on malformed base64
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload)
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))
}

/// Reinterpret raw 16-bit LE PCM bytes as a playable clip
///
/// The caller is responsible for requesting playback at the matching rate;
/// this function never resamples.
///
/// # Errors
///
/// Returns `Error::Decode` if the byte count is odd or the channel count is zero
pub fn decode_audio_clip(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioClip> {
    if channels == 0 {
        return Err(Error::Decode("channel count must be non-zero".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(AudioClip {
        samples,
        sample_rate,
        channels,
    })
}
