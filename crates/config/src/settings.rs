//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Sentence segmenter configuration
    #[serde(default)]
    pub segmenter: SegmenterSettings,

    /// Synthesis (TTS fetch/decode) configuration
    #[serde(default)]
    pub synthesis: SynthesisSettings,

    /// Playback scheduling configuration
    #[serde(default)]
    pub playback: PlaybackSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segmenter.delimiters.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "segmenter.delimiters".to_string(),
                message: "Delimiter set must not be empty".to_string(),
            });
        }

        if self.synthesis.sample_rate_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.sample_rate_hz".to_string(),
                message: "Sample rate must be positive".to_string(),
            });
        }

        if self.synthesis.chunk_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.chunk_channel_capacity".to_string(),
                message: "Chunk channel capacity must be at least 1".to_string(),
            });
        }

        if self.playback.speaking_end_slack_ms > 5_000 {
            return Err(ConfigError::InvalidValue {
                field: "playback.speaking_end_slack_ms".to_string(),
                message: "Speaking-end slack above 5s would visibly lag the UI".to_string(),
            });
        }

        Ok(())
    }
}

/// Sentence segmenter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Sentence-terminating delimiters (CJK and Latin)
    #[serde(default = "default_delimiters")]
    pub delimiters: Vec<char>,

    /// Emit one segment per sentence boundary instead of one segment per
    /// feed ending at the last boundary. Kept off by default: combining
    /// sentences halves the synthesis request count per round trip.
    #[serde(default)]
    pub split_all_boundaries: bool,
}

fn default_delimiters() -> Vec<char> {
    vec!['。', '！', '？', '；', '…', '.', '!', '?', ';', '\n']
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            delimiters: default_delimiters(),
            split_all_boundaries: false,
        }
    }
}

/// Synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    /// Sample rate of the decoded TTS audio (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,

    /// Capacity of the decoded-chunk channel between a synthesis task and
    /// the scheduling lane
    #[serde(default = "default_chunk_capacity")]
    pub chunk_channel_capacity: usize,
}

fn default_sample_rate() -> u32 {
    22_050
}
fn default_chunk_capacity() -> usize {
    32
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            chunk_channel_capacity: default_chunk_capacity(),
        }
    }
}

/// Playback scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Grace period added after the playback cursor's end before the
    /// speaking flag clears (ms)
    #[serde(default = "default_speaking_slack")]
    pub speaking_end_slack_ms: u64,

    /// Capacity of the playback event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_speaking_slack() -> u64 {
    200
}
fn default_event_capacity() -> usize {
    64
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speaking_end_slack_ms: default_speaking_slack(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICECHAT__ prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICECHAT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        slack_ms = settings.playback.speaking_end_slack_ms,
        split_all = settings.segmenter.split_all_boundaries,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.playback.speaking_end_slack_ms, 200);
        assert!(!settings.segmenter.split_all_boundaries);
        assert!(settings.segmenter.delimiters.contains(&'。'));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.synthesis.sample_rate_hz = 0;
        assert!(settings.validate().is_err());

        settings.synthesis.sample_rate_hz = 22_050;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_delimiters_rejected() {
        let mut settings = Settings::default();
        settings.segmenter.delimiters.clear();
        assert!(settings.validate().is_err());
    }
}
