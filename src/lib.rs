//! Hearth Gateway - Realtime voice-session gateway for a home assistant
//!
//! This library provides the core functionality for the Hearth gateway:
//! - Microphone capture and PCM frame encoding
//! - Gapless playback scheduling of streamed response audio
//! - A bidirectional live transport to the conversational endpoint
//! - Turn/transcript aggregation and action-command dispatch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Session Orchestrator                │
//! │   AppState  │  VoiceState  │  ordered teardown      │
//! └────────┬──────────────┬──────────────┬──────────────┘
//!          │              │              │
//! ┌────────▼───────┐ ┌────▼─────────┐ ┌──▼──────────────┐
//! │ Capture        │ │ Live         │ │ Playback        │
//! │ 16kHz frames   │ │ Transport    │ │ 24kHz scheduler │
//! └────────────────┘ └────┬─────────┘ └─────────────────┘
//!                         │
//!              ┌──────────▼──────────┐
//!              │ Transcript turns →  │
//!              │ Command dispatch    │
//!              └─────────────────────┘
//! ```

pub mod audio;
pub mod chat;
pub mod command;
pub mod config;
pub mod contacts;
pub mod error;
pub mod persona;
pub mod session;
pub mod store;

pub use audio::capture::{AudioCapture, CaptureOptions};
pub use audio::codec::{decode_audio_clip, decode_base64, encode_frame, AudioClip};
pub use audio::playback::{AudioPlayback, ChunkScheduler};
pub use chat::ChatClient;
pub use command::dispatch::{CallState, CommandDispatcher, Effect, LinkOpener};
pub use command::{extract_command, strip_command_fence, ActionCommand};
pub use config::Config;
pub use contacts::{Contact, ContactDirectory};
pub use error::{Error, Result};
pub use session::{AppState, AssistantEvent, VoiceAssistant, VoiceState};
pub use store::{JsonFileStore, KeyValueStore};
