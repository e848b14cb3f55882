//! Playback scheduling
//!
//! Synthesis fetches race and finish out of order; audio must reach the
//! device in request order with no audible gap. The scheduler owns a single
//! "scheduling lane": a spawned worker draining lane entries in submission
//! order. Each entry waits for its own request's decoded chunks (already
//! finished or still in flight) before performing the device-scheduling
//! step, so entry i+1 never touches the device before entry i is done with
//! it. The lane also owns the gapless playback cursor and the live unit set
//! used for bulk cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use voicechat_core::{Epoch, EpochCoordinator, PcmBuffer};
use voicechat_config::PlaybackSettings;

use crate::sink::{DeviceClock, OutputSink, SinkUnit};
use crate::synthesis::SynthesisRequest;
use crate::PipelineError;

/// Playback scheduler configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Capacity of the playback event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 64,
        }
    }
}

impl From<&PlaybackSettings> for PlaybackConfig {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            event_channel_capacity: settings.event_channel_capacity,
        }
    }
}

/// Playback events
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// First chunk of a request reached the device while its epoch was
    /// still current
    SpeakingStarted { epoch: Epoch, index: usize },

    /// An audio unit was bound to a device start time
    UnitScheduled {
        index: usize,
        start_at: Duration,
        duration: Duration,
    },

    /// A unit finished playing naturally
    UnitCompleted { index: usize },

    /// `stop_all` force-stopped playback
    Stopped,
}

/// One queued scheduling task
struct LaneEntry {
    request: SynthesisRequest,
    chunks: mpsc::Receiver<PcmBuffer>,
    done: oneshot::Sender<()>,
    generation: u64,
}

/// Cursor and live set, mutated only under the lane's turn
struct LaneState {
    /// Device-clock time the next unit may start at; `None` means "now"
    cursor: Option<Duration>,
    /// Units between "scheduled" and "completed or force-stopped"
    live: HashMap<u64, Arc<dyn SinkUnit>>,
    next_unit_id: u64,
}

/// Order-preserving, cancellable playback scheduler
pub struct PlaybackScheduler {
    sink: Arc<dyn OutputSink>,
    clock: Arc<dyn DeviceClock>,
    epochs: Arc<EpochCoordinator>,
    state: Arc<Mutex<LaneState>>,
    /// Bumped by `stop_all`; queued entries from older generations are
    /// skipped without touching the device
    generation: AtomicU64,
    /// Wakes the lane worker out of a chunk wait when `stop_all` runs, so
    /// a stalled fetch from an abandoned turn cannot delay the next one
    stop_notify: Notify,
    lane_tx: mpsc::UnboundedSender<LaneEntry>,
    event_tx: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackScheduler {
    /// Create a scheduler and spawn its lane worker
    pub fn new(
        sink: Arc<dyn OutputSink>,
        clock: Arc<dyn DeviceClock>,
        epochs: Arc<EpochCoordinator>,
        config: PlaybackConfig,
    ) -> Arc<Self> {
        let (lane_tx, lane_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let scheduler = Arc::new(Self {
            sink,
            clock,
            epochs,
            state: Arc::new(Mutex::new(LaneState {
                cursor: None,
                live: HashMap::new(),
                next_unit_id: 0,
            })),
            generation: AtomicU64::new(0),
            stop_notify: Notify::new(),
            lane_tx,
            event_tx,
        });

        tokio::spawn(Self::run_lane(scheduler.clone(), lane_rx));
        scheduler
    }

    /// Subscribe to playback events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }

    /// Queue the scheduling task for one synthesis request
    ///
    /// The request's decoded chunks arrive over `chunks`; the fetch feeding
    /// that channel runs concurrently with everything else. The returned
    /// receiver resolves once the lane has finished device-scheduling this
    /// request (or dropped it as stale).
    pub fn submit(
        &self,
        request: SynthesisRequest,
        chunks: mpsc::Receiver<PcmBuffer>,
    ) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();

        let entry = LaneEntry {
            request,
            chunks,
            done: done_tx,
            generation: self.generation.load(Ordering::SeqCst),
        };

        // A send failure means the lane worker is gone (runtime shutdown);
        // the dropped sender resolves the receiver either way.
        let _ = self.lane_tx.send(entry);
        done_rx
    }

    /// Force-stop everything and reset the lane
    ///
    /// Callable at any time, including mid-scheduling, and idempotent.
    /// Does not bump the epoch; callers do that separately.
    pub fn stop_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        for unit in state.live.values() {
            unit.stop();
        }
        state.live.clear();
        state.cursor = None;
        drop(state);

        self.stop_notify.notify_waiters();
        tracing::debug!("Playback stopped, scheduling lane reset");
        let _ = self.event_tx.send(PlaybackEvent::Stopped);
    }

    /// Device-clock time at which the last scheduled unit ends, if any
    pub fn cursor_end(&self) -> Option<Duration> {
        self.state.lock().cursor
    }

    /// Number of units currently between "scheduled" and "completed"
    pub fn live_units(&self) -> usize {
        self.state.lock().live.len()
    }

    async fn run_lane(self: Arc<Self>, mut lane_rx: mpsc::UnboundedReceiver<LaneEntry>) {
        while let Some(entry) = lane_rx.recv().await {
            let LaneEntry {
                request,
                mut chunks,
                done,
                generation,
            } = entry;

            self.process_entry(&request, &mut chunks, generation).await;

            // Scheduling for this request is finished, whether it produced
            // audio, was skipped as stale, or its fetch yielded nothing.
            let _ = done.send(());
        }
    }

    async fn process_entry(
        &self,
        request: &SynthesisRequest,
        chunks: &mut mpsc::Receiver<PcmBuffer>,
        generation: u64,
    ) {
        let mut first_chunk = true;

        loop {
            // Created before the validity check: a Notified future receives
            // notify_waiters wakeups from creation, so a stop landing
            // between the check and the select cannot be lost
            let stopped = self.stop_notify.notified();
            tokio::pin!(stopped);

            if !self.entry_valid(request, generation) {
                return;
            }

            let pcm = tokio::select! {
                maybe = chunks.recv() => match maybe {
                    Some(pcm) => pcm,
                    None => return,
                },
                _ = &mut stopped => continue,
            };

            // Re-check after the suspension point, before any device effect
            if !self.entry_valid(request, generation) {
                return;
            }

            match self.schedule_chunk(request, pcm, first_chunk) {
                Ok(()) => first_chunk = false,
                Err(e) => {
                    tracing::warn!(
                        sentence = request.index,
                        error = %e,
                        "Skipping unschedulable audio unit"
                    );
                }
            }
        }
    }

    fn entry_valid(&self, request: &SynthesisRequest, generation: u64) -> bool {
        generation == self.generation.load(Ordering::SeqCst)
            && self.epochs.is_current(request.epoch)
    }

    /// The device-scheduling step for one decoded chunk
    fn schedule_chunk(
        &self,
        request: &SynthesisRequest,
        pcm: PcmBuffer,
        first_chunk: bool,
    ) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        // Preemption happens once per request, at its first chunk
        if request.may_interrupt && first_chunk {
            for unit in state.live.values() {
                unit.stop();
            }
            state.live.clear();
            state.cursor = None;
        }

        // Never schedule in the past: a cursor behind the device clock
        // means a silence gap already happened, so restart the timeline
        let start_at = match state.cursor {
            Some(cursor) if cursor > now => cursor,
            _ => now,
        };

        let unit = self.sink.schedule(pcm, start_at)?;
        let duration = unit.duration();

        let unit_id = state.next_unit_id;
        state.next_unit_id += 1;
        state.live.insert(unit_id, unit.clone());
        state.cursor = Some(start_at + duration);
        drop(state);

        tracing::debug!(
            sentence = request.index,
            epoch = %request.epoch,
            start_ms = start_at.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            "Audio unit scheduled"
        );
        let _ = self.event_tx.send(PlaybackEvent::UnitScheduled {
            index: request.index,
            start_at,
            duration,
        });

        if first_chunk && self.epochs.is_current(request.epoch) {
            let _ = self.event_tx.send(PlaybackEvent::SpeakingStarted {
                epoch: request.epoch,
                index: request.index,
            });
        }

        // Natural completion removes the unit from the live set; a
        // force-stopped unit was already cleared in bulk
        let completed = unit.completed();
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let index = request.index;
        tokio::spawn(async move {
            completed.await;
            if state.lock().live.remove(&unit_id).is_some() {
                let _ = event_tx.send(PlaybackEvent::UnitCompleted { index });
            }
        });

        Ok(())
    }
}
