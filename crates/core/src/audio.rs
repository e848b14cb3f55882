//! PCM audio buffer types

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Supported output sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    Hz16000,
    Hz22050,
    Hz24000,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    /// Sample rate in Hz
    pub fn as_hz(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz22050 => 22_050,
            SampleRate::Hz24000 => 24_000,
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
        }
    }

    /// Map a raw Hz value to a supported rate
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            16_000 => Some(SampleRate::Hz16000),
            22_050 => Some(SampleRate::Hz22050),
            24_000 => Some(SampleRate::Hz24000),
            44_100 => Some(SampleRate::Hz44100),
            48_000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        SampleRate::Hz22050
    }
}

/// A decoded, normalized mono PCM buffer
///
/// Samples are f32 in [-1.0, 1.0]. Cheap to clone; the sample storage is
/// shared.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    sample_rate: SampleRate,
}

impl PcmBuffer {
    /// Create a buffer from normalized samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Sample data
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the buffer holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample rate of this buffer
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Playback duration of this buffer
    pub fn duration(&self) -> Duration {
        let secs = self.samples.len() as f64 / self.sample_rate.as_hz() as f64;
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let buf = PcmBuffer::new(vec![0.0; 22_050], SampleRate::Hz22050);
        assert_eq!(buf.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_half_second() {
        let buf = PcmBuffer::new(vec![0.0; 8_000], SampleRate::Hz16000);
        assert_eq!(buf.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_sample_rate_mapping() {
        assert_eq!(SampleRate::from_hz(22_050), Some(SampleRate::Hz22050));
        assert_eq!(SampleRate::from_hz(11_025), None);
        assert_eq!(SampleRate::Hz48000.as_hz(), 48_000);
    }
}
