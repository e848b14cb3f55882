//! Turn processing
//!
//! The top-level orchestrator for one conversation turn: reads the token
//! stream, feeds the segmenter, launches synthesis tasks, derives the
//! loading/speaking UI state, and reports whether the correctness directive
//! was observed. Cancellation is cooperative: the epoch is checked once per
//! increment and after every suspension point before any visible effect.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::{Stream, StreamExt};
use voicechat_core::{Epoch, EpochCoordinator, ImageRef};
use voicechat_config::Settings;

use crate::decoder::PcmDecoder;
use crate::directive::{strip_markers, DirectiveScanner};
use crate::scheduler::{PlaybackEvent, PlaybackScheduler};
use crate::segmenter::{SegmenterConfig, SentenceSegmenter};
use crate::sink::DeviceClock;
use crate::synthesis::{spawn_synthesis, SynthesisConfig, SynthesisRequest, TtsBackend};
use crate::PipelineError;

/// Lazy, finite, forward-only token stream for one turn
///
/// An `Err` item terminates the sequence with a stream failure.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// Image generation backend
///
/// Failures are non-fatal; `Ok(None)` means the backend produced nothing.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, subject: &str) -> Result<Option<ImageRef>, PipelineError>;
}

/// Turn processor configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Sentence segmenter configuration
    pub segmenter: SegmenterConfig,

    /// Synthesis configuration
    pub synthesis: SynthesisConfig,

    /// Grace period after the playback cursor's end before the speaking
    /// flag clears, so the UI never ends before the audio does
    pub speaking_end_slack: Duration,

    /// Capacity of the turn event broadcast channel
    pub event_channel_capacity: usize,

    /// User-visible message shown when the text stream itself fails
    pub fallback_message: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            synthesis: SynthesisConfig::default(),
            speaking_end_slack: Duration::from_millis(200),
            event_channel_capacity: 64,
            fallback_message: "Sorry, I ran into a problem answering that. Please try again."
                .to_string(),
        }
    }
}

impl From<&Settings> for TurnConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            segmenter: SegmenterConfig::from(&settings.segmenter),
            synthesis: SynthesisConfig::from(&settings.synthesis),
            speaking_end_slack: Duration::from_millis(settings.playback.speaking_end_slack_ms),
            ..Default::default()
        }
    }
}

/// Per-turn lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in progress
    Idle,
    /// Consuming the token stream
    Streaming,
    /// Stream exhausted, waiting for scheduling to finish
    Draining,
    /// Turn complete
    Done,
}

/// Turn events
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// The loading flag changed (true while the reply is still empty)
    LoadingChanged(bool),
    /// The speaking flag changed
    SpeakingChanged(bool),
    /// Display text was re-derived from the accumulated text
    DisplayTextChanged(String),
    /// The image directive's fire-and-forget request resolved
    ImageResolved(ImageRef),
    /// The correctness directive was observed (fires once per turn)
    CorrectObserved,
    /// The token stream failed; the fallback message was shown
    StreamFailed(String),
    /// The turn reached Done
    TurnFinished { correct: bool },
}

/// Current message-facing output of the turn
#[derive(Debug, Default, Clone)]
struct TurnDisplay {
    text: String,
    image: Option<ImageRef>,
}

/// Top-level turn orchestrator
pub struct TurnProcessor {
    config: TurnConfig,
    epochs: Arc<EpochCoordinator>,
    scheduler: Arc<PlaybackScheduler>,
    clock: Arc<dyn DeviceClock>,
    tts: Arc<dyn TtsBackend>,
    image: Arc<dyn ImageBackend>,
    decoder: PcmDecoder,
    state: Mutex<TurnState>,
    loading: AtomicBool,
    speaking: Arc<AtomicBool>,
    display: Arc<Mutex<TurnDisplay>>,
    event_tx: broadcast::Sender<TurnEvent>,
}

impl TurnProcessor {
    /// Create a turn processor wired to its collaborators
    pub fn new(
        config: TurnConfig,
        epochs: Arc<EpochCoordinator>,
        scheduler: Arc<PlaybackScheduler>,
        clock: Arc<dyn DeviceClock>,
        tts: Arc<dyn TtsBackend>,
        image: Arc<dyn ImageBackend>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let decoder = PcmDecoder::new(config.synthesis.sample_rate);

        let processor = Arc::new(Self {
            config,
            epochs: epochs.clone(),
            scheduler: scheduler.clone(),
            clock,
            tts,
            image,
            decoder,
            state: Mutex::new(TurnState::Idle),
            loading: AtomicBool::new(false),
            speaking: Arc::new(AtomicBool::new(false)),
            display: Arc::new(Mutex::new(TurnDisplay::default())),
            event_tx: event_tx.clone(),
        });

        // The speaking flag flips on the first chunk that actually reaches
        // the device, not on request completion
        let speaking = processor.speaking.clone();
        let mut playback_rx = scheduler.subscribe();
        tokio::spawn(async move {
            loop {
                match playback_rx.recv().await {
                    Ok(PlaybackEvent::SpeakingStarted { epoch, .. }) => {
                        if epochs.is_current(epoch)
                            && !speaking.swap(true, Ordering::SeqCst)
                        {
                            let _ = event_tx.send(TurnEvent::SpeakingChanged(true));
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        processor
    }

    /// Subscribe to turn events
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.event_tx.subscribe()
    }

    /// Run one turn to completion
    ///
    /// Bumps the epoch (abandoning any previous turn's in-flight work),
    /// consumes the stream, and resolves with whether the correctness
    /// directive was observed. A stream failure shows the fallback message
    /// and resolves `false`.
    pub async fn start_turn(&self, mut stream: TokenStream) -> bool {
        let my_epoch = self.epochs.bump();
        tracing::info!(epoch = %my_epoch, "Turn started");

        *self.state.lock() = TurnState::Streaming;
        self.set_loading(true);
        *self.display.lock() = TurnDisplay::default();

        let mut segmenter = SentenceSegmenter::new(self.config.segmenter.clone());
        let mut scanner = DirectiveScanner::new();
        let mut accumulated = String::new();
        let mut next_index = 0usize;
        let mut scheduled: Vec<oneshot::Receiver<()>> = Vec::new();
        let mut first_increment = true;

        while let Some(item) = stream.next().await {
            // The once-per-increment cancellation check point
            if !self.epochs.is_current(my_epoch) {
                tracing::debug!(epoch = %my_epoch, "Turn abandoned mid-stream");
                return scanner.correct_seen();
            }

            let increment = match item {
                Ok(increment) => increment,
                Err(e) => {
                    return self.fail_turn(e, my_epoch, scheduled).await;
                }
            };

            accumulated.push_str(&increment);

            // Directives are re-derived from the full accumulated text
            // because markers may span increment boundaries
            let scan = scanner.scan(&accumulated);
            self.set_display_text(scan.display_text);
            if scan.new_correct {
                tracing::debug!(epoch = %my_epoch, "Correctness directive observed");
                let _ = self.event_tx.send(TurnEvent::CorrectObserved);
            }
            if let Some(subject) = scan.new_image {
                self.spawn_image_task(subject, my_epoch);
            }

            for segment in segmenter.feed(&increment) {
                if let Some(done) = self.submit_segment(&segment, my_epoch, &mut next_index) {
                    scheduled.push(done);
                }
            }

            if first_increment {
                first_increment = false;
                self.set_loading(false);
            }
        }

        if !self.epochs.is_current(my_epoch) {
            tracing::debug!(epoch = %my_epoch, "Turn abandoned before drain");
            return scanner.correct_seen();
        }

        *self.state.lock() = TurnState::Draining;
        self.set_loading(false);

        if let Some(rest) = segmenter.flush() {
            if let Some(done) = self.submit_segment(&rest, my_epoch, &mut next_index) {
                scheduled.push(done);
            }
        }

        // Wait for scheduling (not playback) of every request to finish
        for done in scheduled {
            let _ = done.await;
        }

        let correct = scanner.correct_seen();

        // A stale turn must not touch state the next turn now owns
        if !self.epochs.is_current(my_epoch) {
            return correct;
        }

        self.schedule_speaking_end(my_epoch);

        *self.state.lock() = TurnState::Done;
        tracing::info!(epoch = %my_epoch, correct, sentences = next_index, "Turn finished");
        let _ = self.event_tx.send(TurnEvent::TurnFinished { correct });
        correct
    }

    /// Interrupt the current turn and silence playback immediately
    ///
    /// The epoch bump invalidates every in-flight task; `stop_all` clears
    /// the live unit set and resets the scheduling lane.
    pub fn interrupt(&self) {
        let epoch = self.epochs.bump();
        self.scheduler.stop_all();
        self.set_loading(false);
        self.set_speaking(false);
        *self.state.lock() = TurnState::Idle;
        tracing::info!(epoch = %epoch, "Turn interrupted");
    }

    /// Current turn state
    pub fn state(&self) -> TurnState {
        *self.state.lock()
    }

    /// True while the current reply has not produced its first increment
    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// True while the speaker is (about to be) audibly producing sound
    pub fn speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Display text of the current reply, directives stripped
    pub fn display_text(&self) -> String {
        self.display.lock().text.clone()
    }

    /// Image attached to the current reply, if resolved
    pub fn image(&self) -> Option<ImageRef> {
        self.display.lock().image.clone()
    }

    /// End the turn on a stream failure
    ///
    /// Audio already committed to the device keeps playing; the speaking
    /// flag must still follow it off, so scheduling is drained and the
    /// speaking-end timer armed the same way a normal drain does it.
    async fn fail_turn(
        &self,
        error: PipelineError,
        epoch: Epoch,
        scheduled: Vec<oneshot::Receiver<()>>,
    ) -> bool {
        tracing::error!(error = %error, "Text stream failed");
        self.set_display_text(self.config.fallback_message.clone());
        let _ = self.event_tx.send(TurnEvent::StreamFailed(error.to_string()));
        self.set_loading(false);

        for done in scheduled {
            let _ = done.await;
        }

        if self.epochs.is_current(epoch) {
            self.schedule_speaking_end(epoch);
            *self.state.lock() = TurnState::Done;
            let _ = self.event_tx.send(TurnEvent::TurnFinished { correct: false });
        }
        false
    }

    /// Clean a raw segment and submit its synthesis request
    ///
    /// The fetch starts immediately; ordering is enforced later by the
    /// scheduling lane. The first request of a turn may preempt audio left
    /// over from a previous turn.
    fn submit_segment(
        &self,
        raw: &str,
        epoch: Epoch,
        next_index: &mut usize,
    ) -> Option<oneshot::Receiver<()>> {
        let text = strip_markers(raw).trim().to_string();
        if text.is_empty() {
            return None;
        }

        let index = *next_index;
        *next_index += 1;

        let request = SynthesisRequest {
            index,
            epoch,
            text,
            may_interrupt: index == 0,
        };
        tracing::debug!(
            sentence = index,
            epoch = %epoch,
            text = %request.text,
            "Synthesis request submitted"
        );

        let (tx, rx) = mpsc::channel(self.config.synthesis.chunk_channel_capacity);
        spawn_synthesis(
            self.tts.clone(),
            self.decoder,
            self.epochs.clone(),
            request.clone(),
            tx,
        );
        Some(self.scheduler.submit(request, rx))
    }

    /// Fire-and-forget image generation; the result is applied only if the
    /// creating epoch is still current when it resolves
    fn spawn_image_task(&self, subject: String, epoch: Epoch) {
        let image = self.image.clone();
        let epochs = self.epochs.clone();
        let display = self.display.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            match image.generate(&subject).await {
                Ok(Some(image_ref)) => {
                    if epochs.is_current(epoch) {
                        display.lock().image = Some(image_ref.clone());
                        let _ = event_tx.send(TurnEvent::ImageResolved(image_ref));
                    }
                }
                Ok(None) => {
                    tracing::debug!(subject = %subject, "Image backend returned no result");
                }
                Err(e) => {
                    tracing::warn!(subject = %subject, error = %e, "Image generation failed");
                }
            }
        });
    }

    /// Flip speaking off once the scheduled audio has had time to finish
    fn schedule_speaking_end(&self, epoch: Epoch) {
        let remaining = self
            .scheduler
            .cursor_end()
            .map(|end| end.saturating_sub(self.clock.now()))
            .unwrap_or_default();
        let delay = remaining + self.config.speaking_end_slack;

        let epochs = self.epochs.clone();
        let speaking = self.speaking.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if epochs.is_current(epoch) && speaking.swap(false, Ordering::SeqCst) {
                let _ = event_tx.send(TurnEvent::SpeakingChanged(false));
            }
        });
    }

    fn set_loading(&self, value: bool) {
        if self.loading.swap(value, Ordering::SeqCst) != value {
            let _ = self.event_tx.send(TurnEvent::LoadingChanged(value));
        }
    }

    fn set_speaking(&self, value: bool) {
        if self.speaking.swap(value, Ordering::SeqCst) != value {
            let _ = self.event_tx.send(TurnEvent::SpeakingChanged(value));
        }
    }

    fn set_display_text(&self, text: String) {
        let mut display = self.display.lock();
        if display.text != text {
            display.text = text.clone();
            drop(display);
            let _ = self.event_tx.send(TurnEvent::DisplayTextChanged(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_config_default() {
        let config = TurnConfig::default();
        assert_eq!(config.speaking_end_slack, Duration::from_millis(200));
        assert!(!config.fallback_message.is_empty());
    }

    #[test]
    fn test_turn_config_from_settings() {
        let mut settings = Settings::default();
        settings.playback.speaking_end_slack_ms = 350;
        settings.segmenter.split_all_boundaries = true;

        let config = TurnConfig::from(&settings);
        assert_eq!(config.speaking_end_slack, Duration::from_millis(350));
        assert!(config.segmenter.split_all_boundaries);
    }
}
