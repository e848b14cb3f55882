//! Incremental turn processor
//!
//! This crate turns a live token stream of generated text into ordered,
//! gapless, cancellable speech:
//! - Sentence segmentation with no lookahead
//! - Directive extraction ([CORRECT], [IMAGE: …]) with at-most-once firing
//! - Concurrent synthesis fetches, serialized scheduling
//! - Epoch-based cooperative cancellation
//! - A UI-facing speaking/loading state machine

pub mod decoder;
pub mod directive;
pub mod scheduler;
pub mod segmenter;
pub mod sink;
pub mod synthesis;
pub mod turn;

// Segmenter exports
pub use segmenter::{SegmenterConfig, SentenceSegmenter};

// Directive exports
pub use directive::{strip_markers, DirectiveScan, DirectiveScanner};

// Decoder exports
pub use decoder::PcmDecoder;

// Sink exports
pub use sink::{DeviceClock, MockClock, MockSink, OutputSink, SinkUnit, SystemClock};

// Synthesis exports
pub use synthesis::{spawn_synthesis, EncodedChunkStream, SynthesisConfig, SynthesisRequest, TtsBackend};

// Scheduler exports
pub use scheduler::{PlaybackConfig, PlaybackEvent, PlaybackScheduler};

// Turn processor exports
pub use turn::{ImageBackend, TokenStream, TurnConfig, TurnEvent, TurnProcessor, TurnState};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Audio sink error: {0}")]
    Sink(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voicechat_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Fetch(e) => voicechat_core::Error::Fetch(e),
            PipelineError::Decode(e) => voicechat_core::Error::Decode(e),
            PipelineError::Stream(e) => voicechat_core::Error::Stream(e),
            PipelineError::Sink(e) => voicechat_core::Error::Audio(e),
            PipelineError::ChannelClosed => voicechat_core::Error::ChannelClosed,
        }
    }
}
