//! # Live Host Audio
//!
//! Real-time audio engine behind a live voice conversation with an AI host.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────┐   ┌──────────────────┐
//! │  Microphone  │──▶│ Capture Pipeline │──▶│ PCM Codec │──▶│                  │
//! │  (16 kHz)    │   │ (audio::capture) │   │ (encode)  │   │                  │
//! └──────────────┘   └────────┬─────────┘   └───────────┘   │     Session      │  send(bytes)
//!                             │ input tap                   │    Controller    │─────────────▶
//!                             ▼                             │ (session::       │
//!                    ┌──────────────────┐                   │   controller)    │  onChunk /
//!                    │ Visualization    │                   │                  │  onInterrupted
//!                    │ Feed (analysers) │                   │                  │◀─────────────
//!                    └──────────────────┘                   └────────┬─────────┘
//!                             ▲ output tap                           │
//!                             │                                      ▼
//! ┌──────────────┐   ┌────────┴─────────┐   ┌───────────┐   ┌──────────────────┐
//! │   Speakers   │◀──│  Output Graph    │◀──│ Playback  │◀──│ Decode Adapter + │
//! │  (24 kHz)    │   │ (audio::output)  │   │ Scheduler │   │ PCM Codec decode │
//! └──────────────┘   └──────────────────┘   └───────────┘   └──────────────────┘
//! ```
//!
//! The controller, the playback scheduler and its timeline cursor live on a
//! single tokio task. Device callbacks only post events to that task or write
//! into the analyser taps.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod profile;
pub mod search;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate of captured (outbound) audio
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of synthesized (inbound) audio
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Channel count of inbound audio chunks
    pub const PLAYBACK_CHANNELS: u16 = 1;

    /// Samples handed to the transmit side per captured frame
    pub const CAPTURE_FRAME_SIZE: usize = 4096;

    /// Delay before `speaking` drops after the last source finishes
    pub const SPEAKING_DEBOUNCE_MS: u64 = 200;

    /// Analyser FFT size; yields `FFT_SIZE / 2` magnitude bins
    pub const FFT_SIZE: usize = 256;

    /// Analyser smoothing between consecutive snapshots
    pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;

    /// Decibel floor mapped to magnitude 0
    pub const MIN_DECIBELS: f32 = -100.0;

    /// Decibel ceiling mapped to magnitude 255
    pub const MAX_DECIBELS: f32 = -30.0;

    /// MIME tag attached to outbound audio
    pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

    /// Default port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}
