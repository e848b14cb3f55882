//! Epoch-based cooperative cancellation
//!
//! A single monotonic counter identifies the live turn/utterance. Every
//! cancellable unit of work captures the epoch active at its creation and
//! re-checks it after each suspension point, before committing any externally
//! visible effect. Bumping the counter is the sole cancellation primitive:
//! no enumeration of in-flight work, relevance is one integer comparison.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one turn/utterance. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// Raw counter value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide epoch counter
///
/// Created at 0, incremented on turn start, user interruption, and explicit
/// stop. Mutated only by those actions; read by every in-flight task.
#[derive(Debug, Default)]
pub struct EpochCoordinator {
    current: AtomicU64,
}

impl EpochCoordinator {
    /// Create a coordinator starting at epoch 0
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// The currently live epoch
    pub fn current(&self) -> Epoch {
        Epoch(self.current.load(Ordering::SeqCst))
    }

    /// Invalidate all outstanding work and return the new live epoch
    pub fn bump(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Is work created under `epoch` still relevant?
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current.load(Ordering::SeqCst) == epoch.0
    }
}
