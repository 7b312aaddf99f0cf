//! Error types for the live host audio engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Microphone or speaker missing, or access was refused
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The output graph refused to start a source
    #[error("Failed to schedule playback: {0}")]
    SchedulingFailed(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// PCM and text transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed audio: {len} bytes is not a whole number of {channels}-channel 16-bit frames")]
    MalformedAudio { len: usize, channels: u16 },

    #[error("Invalid transport text: {0}")]
    InvalidTransportText(String),
}

/// Live session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("A live session is already active")]
    AlreadyActive,

    /// Remote channel failure; fatal to the current session
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session controller is not running")]
    NotRunning,

    /// Stopped before the microphone was acquired
    #[error("Session start was cancelled")]
    Cancelled,

    #[error("Search is not configured")]
    SearchDisabled,
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable(err.to_string())
            }
            other => AudioError::StreamError(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                AudioError::DeviceUnavailable(err.to_string())
            }
            other => AudioError::StreamError(other.to_string()),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
