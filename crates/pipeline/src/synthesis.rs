//! Synthesis tasks
//!
//! One task per sentence. The network fetch starts immediately and
//! independently of any other in-flight task; only the consumption of the
//! decoded audio is serialized, by the playback scheduler's lane. Each task
//! carries the epoch that created it and aborts silently the moment that
//! epoch goes stale.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use voicechat_core::{Epoch, EpochCoordinator, PcmBuffer, SampleRate};
use voicechat_config::SynthesisSettings;

use crate::decoder::PcmDecoder;
use crate::PipelineError;

/// Lazy sequence of encoded audio chunks from the TTS backend
pub type EncodedChunkStream =
    Pin<Box<dyn Stream<Item = Result<Vec<u8>, PipelineError>> + Send>>;

/// TTS fetch backend
///
/// Given sentence text, returns a lazy sequence of encoded audio chunks.
/// May fail outright or return no audio; both are non-fatal to the turn.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn fetch(&self, text: &str) -> Result<EncodedChunkStream, PipelineError>;
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Sample rate of the decoded backend audio
    pub sample_rate: SampleRate,

    /// Capacity of the decoded-chunk channel toward the scheduling lane
    pub chunk_channel_capacity: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz22050,
            chunk_channel_capacity: 32,
        }
    }
}

impl From<&SynthesisSettings> for SynthesisConfig {
    fn from(settings: &SynthesisSettings) -> Self {
        Self {
            sample_rate: SampleRate::from_hz(settings.sample_rate_hz).unwrap_or_default(),
            chunk_channel_capacity: settings.chunk_channel_capacity,
        }
    }
}

/// One sentence's synthesis request
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Sequence index within the turn
    pub index: usize,

    /// Epoch that created the request
    pub epoch: Epoch,

    /// Cleaned sentence text (markers stripped, whitespace trimmed)
    pub text: String,

    /// First request of a turn may preempt audio committed by a previous
    /// turn; later requests of the same turn must not
    pub may_interrupt: bool,
}

/// Launch the fetch+decode task for one request
///
/// Decoded chunks flow into `tx` as they arrive. Fetch failures abandon the
/// task, decode failures skip the chunk; both are logged and isolated from
/// the turn's control flow. Closing `tx` (by returning) marks the request's
/// audio as complete for the scheduling lane.
pub fn spawn_synthesis(
    tts: Arc<dyn TtsBackend>,
    decoder: PcmDecoder,
    epochs: Arc<EpochCoordinator>,
    request: SynthesisRequest,
    tx: mpsc::Sender<PcmBuffer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !epochs.is_current(request.epoch) {
            return;
        }

        let mut chunks = match tts.fetch(&request.text).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    sentence = request.index,
                    epoch = %request.epoch,
                    error = %e,
                    "TTS fetch failed, abandoning request"
                );
                return;
            }
        };

        while let Some(item) = chunks.next().await {
            if !epochs.is_current(request.epoch) {
                return;
            }

            let payload = match item {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(
                        sentence = request.index,
                        error = %e,
                        "TTS stream failed mid-fetch, abandoning remainder"
                    );
                    return;
                }
            };

            let pcm = match decoder.decode(&payload) {
                Ok(pcm) => pcm,
                Err(e) => {
                    tracing::warn!(
                        sentence = request.index,
                        error = %e,
                        "Skipping undecodable audio chunk"
                    );
                    continue;
                }
            };

            if !epochs.is_current(request.epoch) {
                return;
            }
            if tx.send(pcm).await.is_err() {
                // Lane gone; nothing left to feed
                return;
            }
        }
    })
}
