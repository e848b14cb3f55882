//! Configuration for the voicechat turn pipeline
//!
//! Layered settings: `config/default.yaml`, an optional environment-specific
//! file, then `VOICECHAT__`-prefixed environment variables.

mod settings;

pub use settings::{
    load_settings, ObservabilitySettings, PlaybackSettings, SegmenterSettings, Settings,
    SynthesisSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
