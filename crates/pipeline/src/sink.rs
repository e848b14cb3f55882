//! Output sink and device clock abstractions
//!
//! The platform audio device sits behind these traits: create a playable
//! unit from PCM, schedule it at an absolute device-clock time, stop it,
//! observe completion. The clock is explicit so tests can simulate gaps
//! and overruns deterministically. Mock implementations live here too,
//! mirroring the in-tree test constructors used elsewhere in the workspace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use voicechat_core::PcmBuffer;

use crate::PipelineError;

/// Monotonic device clock
///
/// Reports time since the sink was opened. All scheduling is expressed on
/// this clock, never on synthesis latency.
pub trait DeviceClock: Send + Sync {
    /// Current device time
    fn now(&self) -> Duration;
}

/// Real clock anchored at creation
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Default)]
pub struct MockClock {
    now: Mutex<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        *self.now.lock() += delta;
    }

    /// Set the clock to an absolute time
    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl DeviceClock for MockClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// One playable unit scheduled on the device
pub trait SinkUnit: Send + Sync {
    /// Playback duration of the unit
    fn duration(&self) -> Duration;

    /// Force-stop the unit; also resolves `completed()`
    fn stop(&self);

    /// Resolves when the unit finishes playing or is stopped
    fn completed(&self) -> BoxFuture<'static, ()>;
}

/// Platform audio output
pub trait OutputSink: Send + Sync {
    /// Create a playable unit from PCM and schedule it to start at
    /// `start_at` on the device clock
    fn schedule(
        &self,
        pcm: PcmBuffer,
        start_at: Duration,
    ) -> Result<Arc<dyn SinkUnit>, PipelineError>;
}

/// Recorded state of one mock-scheduled unit
pub struct MockUnit {
    start_at: Duration,
    duration: Duration,
    sample_count: usize,
    stopped: AtomicBool,
    done: Arc<Notify>,
}

impl MockUnit {
    /// Scheduled start time on the device clock
    pub fn start_at(&self) -> Duration {
        self.start_at
    }

    /// Number of PCM samples in the unit
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Was the unit force-stopped?
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Simulate natural playback completion
    pub fn finish(&self) {
        self.done.notify_one();
    }
}

impl SinkUnit for MockUnit {
    fn duration(&self) -> Duration {
        self.duration
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.done.notify_one();
    }

    fn completed(&self) -> BoxFuture<'static, ()> {
        let done = self.done.clone();
        Box::pin(async move { done.notified().await })
    }
}

/// In-memory sink for tests
///
/// Records every scheduled unit; completion is driven manually via
/// [`MockUnit::finish`].
#[derive(Default)]
pub struct MockSink {
    units: Mutex<Vec<Arc<MockUnit>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All units scheduled so far, in scheduling order
    pub fn units(&self) -> Vec<Arc<MockUnit>> {
        self.units.lock().clone()
    }

    /// Number of units scheduled so far
    pub fn scheduled_count(&self) -> usize {
        self.units.lock().len()
    }

    /// Finish every unit that has not been stopped
    pub fn finish_all(&self) {
        for unit in self.units.lock().iter() {
            unit.finish();
        }
    }
}

impl OutputSink for MockSink {
    fn schedule(
        &self,
        pcm: PcmBuffer,
        start_at: Duration,
    ) -> Result<Arc<dyn SinkUnit>, PipelineError> {
        let unit = Arc::new(MockUnit {
            start_at,
            duration: pcm.duration(),
            sample_count: pcm.len(),
            stopped: AtomicBool::new(false),
            done: Arc::new(Notify::new()),
        });

        self.units.lock().push(unit.clone());
        Ok(unit)
    }
}
