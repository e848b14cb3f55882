//! Wire-format audio decoding
//!
//! The synthesis backend delivers 16-bit little-endian mono PCM chunks;
//! this module normalizes them into f32 sample buffers.

use voicechat_core::{PcmBuffer, SampleRate};

use crate::PipelineError;

/// Decoder for wire-format audio payloads
#[derive(Debug, Clone, Copy)]
pub struct PcmDecoder {
    sample_rate: SampleRate,
}

impl PcmDecoder {
    /// Create a decoder for the backend's sample rate
    pub fn new(sample_rate: SampleRate) -> Self {
        Self { sample_rate }
    }

    /// Decode one wire chunk into a normalized PCM buffer
    ///
    /// Payloads must contain a whole number of 16-bit LE samples and at
    /// least one of them.
    pub fn decode(&self, payload: &[u8]) -> Result<PcmBuffer, PipelineError> {
        if payload.is_empty() {
            return Err(PipelineError::Decode("empty audio payload".to_string()));
        }
        if payload.len() % 2 != 0 {
            return Err(PipelineError::Decode(format!(
                "truncated audio payload: {} bytes",
                payload.len()
            )));
        }

        let samples: Vec<f32> = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();

        Ok(PcmBuffer::new(samples, self.sample_rate))
    }

    /// Sample rate decoded buffers are tagged with
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_normalizes() {
        let decoder = PcmDecoder::new(SampleRate::Hz22050);
        // 0, i16::MAX, i16::MIN
        let payload = [0u8, 0, 0xFF, 0x7F, 0x00, 0x80];

        let pcm = decoder.decode(&payload).unwrap();
        assert_eq!(pcm.len(), 3);
        assert_eq!(pcm.samples()[0], 0.0);
        assert!((pcm.samples()[1] - 0.99997).abs() < 1e-4);
        assert_eq!(pcm.samples()[2], -1.0);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let decoder = PcmDecoder::new(SampleRate::Hz22050);
        assert!(matches!(
            decoder.decode(&[1, 2, 3]),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let decoder = PcmDecoder::new(SampleRate::Hz22050);
        assert!(matches!(decoder.decode(&[]), Err(PipelineError::Decode(_))));
    }
}
