//! Error types for the voicechat pipeline

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the voicechat pipeline
///
/// Stale work (epoch mismatch) is intentionally not represented here:
/// abandoned work is dropped silently, it is never an error.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Network/backend failure during synthesis or image generation.
    /// Logged and isolated per task; never aborts the turn.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Malformed audio payload. The unit is skipped, playback continues.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The text stream itself failed. Surfaced to the UI as a fallback
    /// message; the only failure class that ends a turn early.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Audio device error
    #[error("Audio error: {0}")]
    Audio(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}
