//! End-to-end turn pipeline tests
//!
//! Drives a full `TurnProcessor` over mock TTS/image backends and a mock
//! audio sink, with virtual time so synthesis latency and playback timing
//! are deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use voicechat_core::{EpochCoordinator, ImageRef};
use voicechat_pipeline::{
    EncodedChunkStream, ImageBackend, MockClock, MockSink, PipelineError, PlaybackConfig,
    PlaybackScheduler, TokenStream, TtsBackend, TurnConfig, TurnEvent, TurnProcessor, TurnState,
};

/// TTS backend that records every fetched sentence and answers each with a
/// single 100ms chunk of silence, optionally after a per-sentence delay
#[derive(Default)]
struct ScriptedTts {
    calls: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedTts {
    fn delay(&self, text: &str, delay: Duration) {
        self.delays.lock().insert(text.to_string(), delay);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn fetch(&self, text: &str) -> Result<EncodedChunkStream, PipelineError> {
        self.calls.lock().push(text.to_string());

        let delay = self.delays.lock().get(text).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // 2205 samples of 16-bit LE silence: 100ms at 22.05kHz
        Ok(Box::pin(tokio_stream::iter(vec![Ok(vec![0u8; 4_410])])))
    }
}

#[derive(Default)]
struct RecordingImage {
    calls: Mutex<Vec<String>>,
}

impl RecordingImage {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageBackend for RecordingImage {
    async fn generate(&self, subject: &str) -> Result<Option<ImageRef>, PipelineError> {
        self.calls.lock().push(subject.to_string());
        Ok(Some(ImageRef::new(format!("img://{subject}"), subject)))
    }
}

struct World {
    processor: Arc<TurnProcessor>,
    sink: Arc<MockSink>,
    clock: Arc<MockClock>,
    tts: Arc<ScriptedTts>,
    image: Arc<RecordingImage>,
}

fn world() -> World {
    let sink = Arc::new(MockSink::new());
    let clock = Arc::new(MockClock::new());
    let epochs = Arc::new(EpochCoordinator::new());
    let scheduler = PlaybackScheduler::new(
        sink.clone(),
        clock.clone(),
        epochs.clone(),
        PlaybackConfig::default(),
    );
    let tts = Arc::new(ScriptedTts::default());
    let image = Arc::new(RecordingImage::default());
    let processor = TurnProcessor::new(
        TurnConfig::default(),
        epochs,
        scheduler,
        clock.clone(),
        tts.clone(),
        image.clone(),
    );

    World {
        processor,
        sink,
        clock,
        tts,
        image,
    }
}

fn tokens(parts: &[&str]) -> TokenStream {
    let items: Vec<Result<String, PipelineError>> =
        parts.iter().map(|s| Ok(s.to_string())).collect();
    Box::pin(tokio_stream::iter(items))
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<TurnEvent>, mut pred: F) -> TurnEvent
where
    F: FnMut(&TurnEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

fn drain(rx: &mut broadcast::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_turn_segments_sentences_and_schedules_gapless() {
    let w = world();

    let correct = w
        .processor
        .start_turn(tokens(&["今天", "天气", "真好。", "你觉得", "呢？"]))
        .await;

    assert!(!correct);
    assert_eq!(w.tts.calls(), vec!["今天天气真好。", "你觉得呢？"]);
    assert_eq!(w.processor.display_text(), "今天天气真好。你觉得呢？");

    let units = w.sink.units();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].start_at(), Duration::ZERO);
    // Second sentence starts exactly where the first ends
    assert_eq!(units[1].start_at(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_directives_drive_display_image_and_result() {
    let w = world();
    let mut events = w.processor.subscribe();

    let correct = w
        .processor
        .start_turn(tokens(&["[IMAGE: 苹", "果]在哪里", "？[CORRECT]"]))
        .await;

    assert!(correct);
    assert_eq!(w.processor.display_text(), "在哪里？");
    // Only the cleaned sentence reaches synthesis
    assert_eq!(w.tts.calls(), vec!["在哪里？"]);
    assert_eq!(w.image.calls(), vec!["苹果"]);

    wait_for(&mut events, |e| matches!(e, TurnEvent::ImageResolved(_))).await;
    let image = w.processor.image().expect("image should be attached");
    assert_eq!(image.url, "img://苹果");
    assert_eq!(image.subject, "苹果");
}

#[tokio::test(start_paused = true)]
async fn test_correct_marker_fires_once() {
    let w = world();
    let mut events = w.processor.subscribe();

    let correct = w
        .processor
        .start_turn(tokens(&["[CORRECT] Well done.", " Try [CORRECT] again."]))
        .await;

    assert!(correct);
    let observed = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, TurnEvent::CorrectObserved))
        .count();
    assert_eq!(observed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_silences_turn_and_next_starts_at_now() {
    let w = world();
    // The second sentence's fetch never returns in useful time
    w.tts.delay("Two.", Duration::from_secs(3_600));

    let processor = w.processor.clone();
    let first_turn = tokio::spawn(async move {
        processor
            .start_turn(tokens(&["One. ", "Two. ", "Three."]))
            .await
    });

    // First sentence plays; the lane head is then stuck on sentence two
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(w.sink.scheduled_count(), 1);

    w.clock.set(Duration::from_millis(40));
    w.processor.interrupt();
    assert!(w.sink.units()[0].is_stopped());
    assert_eq!(w.processor.state(), TurnState::Idle);

    // The stalled fetch must not delay the interrupted turn's resolution
    let correct = tokio::time::timeout(Duration::from_millis(500), first_turn)
        .await
        .expect("interrupted turn did not resolve")
        .unwrap();
    assert!(!correct);

    // A fresh turn schedules immediately at device-now, not after the
    // abandoned sentences
    w.processor.start_turn(tokens(&["Hi."])).await;
    let units = w.sink.units();
    assert_eq!(units.len(), 2);
    assert_eq!(units[1].start_at(), Duration::from_millis(40));
    assert!(!units[1].is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_fetch_produces_no_audio() {
    let w = world();
    w.tts.delay("Hello.", Duration::from_secs(3_600));
    let mut events = w.processor.subscribe();

    let processor = w.processor.clone();
    let turn = tokio::spawn(async move { processor.start_turn(tokens(&["Hello."])).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    w.processor.interrupt();

    let correct = tokio::time::timeout(Duration::from_millis(500), turn)
        .await
        .expect("interrupted turn did not resolve")
        .unwrap();
    assert!(!correct);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(w.sink.scheduled_count(), 0);
    assert!(!w.processor.speaking());
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, TurnEvent::SpeakingChanged(true))));
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_shows_fallback_message() {
    let w = world();
    let mut events = w.processor.subscribe();

    let stream: TokenStream = Box::pin(tokio_stream::iter(vec![
        Ok("Hel".to_string()),
        Err(PipelineError::Stream("connection reset".to_string())),
    ]));
    let correct = w.processor.start_turn(stream).await;

    assert!(!correct);
    assert_eq!(w.processor.state(), TurnState::Done);
    assert!(!w.processor.loading());
    assert_eq!(
        w.processor.display_text(),
        TurnConfig::default().fallback_message
    );
    // The partial increment never reached a sentence boundary
    assert!(w.tts.calls().is_empty());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TurnEvent::StreamFailed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_after_audio_still_clears_speaking() {
    let w = world();
    let mut events = w.processor.subscribe();

    // One full sentence schedules before the stream dies
    let stream: TokenStream = Box::pin(tokio_stream::iter(vec![
        Ok("One. ".to_string()),
        Err(PipelineError::Stream("connection reset".to_string())),
    ]));
    let correct = w.processor.start_turn(stream).await;

    assert!(!correct);
    assert_eq!(w.sink.scheduled_count(), 1);
    assert_eq!(
        w.processor.display_text(),
        TurnConfig::default().fallback_message
    );

    // The committed audio keeps playing; speaking still follows it off
    wait_for(&mut events, |e| {
        matches!(e, TurnEvent::SpeakingChanged(true))
    })
    .await;
    wait_for(&mut events, |e| {
        matches!(e, TurnEvent::SpeakingChanged(false))
    })
    .await;
    assert!(!w.processor.speaking());
    assert_eq!(w.processor.state(), TurnState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_speaking_flag_follows_playback() {
    let w = world();
    let mut events = w.processor.subscribe();

    w.processor.start_turn(tokens(&["Hi there."])).await;

    wait_for(&mut events, |e| {
        matches!(e, TurnEvent::SpeakingChanged(true))
    })
    .await;
    // Clears only after the scheduled audio has had time to finish
    wait_for(&mut events, |e| {
        matches!(e, TurnEvent::SpeakingChanged(false))
    })
    .await;
    assert!(!w.processor.speaking());
    assert_eq!(w.processor.state(), TurnState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_empty_stream_turn_completes_cleanly() {
    let w = world();
    let mut events = w.processor.subscribe();

    let correct = w.processor.start_turn(tokens(&[])).await;

    assert!(!correct);
    assert_eq!(w.processor.state(), TurnState::Done);
    assert!(!w.processor.loading());
    assert!(w.processor.display_text().is_empty());
    assert!(w.tts.calls().is_empty());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, TurnEvent::TurnFinished { correct: false })));
}
