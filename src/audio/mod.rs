//! Audio processing: codec utilities, microphone capture, playback scheduling

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{AudioCapture, AudioFrame, CaptureOptions};
pub use codec::{decode_audio_clip, decode_base64, encode_frame, AudioClip};
pub use playback::{AudioPlayback, ChunkScheduler, PlaybackEvent};

/// MIME descriptor tagged onto every captured audio frame
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";
