//! Outage detection from consecutive-failure counts.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Consecutive failures on one stream before it is considered disconnected.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Derived connection state of one failure stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Connected,
    Degraded,
    Disconnected,
}

/// The shared outage signal. Raised by whichever of the poller/sender
/// crosses its failure threshold, cleared by either on the first success.
/// A coarse, eventually-consistent signal, not a lock.
#[derive(Debug, Clone, Default)]
pub struct OutageFlag(Arc<AtomicBool>);

impl OutageFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-component failure stream feeding the shared [`OutageFlag`].
///
/// Owned and mutated by exactly one loop; only the flag is shared.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    threshold: u32,
    flag: OutageFlag,
}

impl FailureTracker {
    pub fn new(flag: OutageFlag) -> Self {
        Self::with_threshold(flag, FAILURE_THRESHOLD)
    }

    pub fn with_threshold(flag: OutageFlag, threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
            flag,
        }
    }

    /// Record one failure; raises the shared flag when the threshold is
    /// crossed. Returns the state after the failure.
    pub fn record_failure(&mut self) -> HealthState {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold {
            self.flag.raise();
        }
        self.state()
    }

    /// Record one success; resets the streak and clears the shared flag.
    pub fn record_success(&mut self) -> HealthState {
        self.consecutive = 0;
        self.flag.clear();
        self.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn state(&self) -> HealthState {
        match self.consecutive {
            0 => HealthState::Connected,
            n if n < self.threshold => HealthState::Degraded,
            _ => HealthState::Disconnected,
        }
    }
}
