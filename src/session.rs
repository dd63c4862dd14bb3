//! Per-acquisition bookkeeping.
//!
//! One [`AcquisitionSession`] exists per device activation. It is owned by
//! the [`Acquisition`](crate::Acquisition) engine and only ever mutated from
//! the task that drives it, so none of its fields need atomics or locks.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::probe::LinkPlan;

/// Lifecycle of the streaming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    /// No acquisition active
    #[default]
    Idle,
    /// Probing and arming the pool
    Starting,
    /// Requests in flight, ticks and completions being processed
    Streaming,
    /// Cancelling and draining outstanding requests
    Aborting,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Aborting => "aborting",
        };
        write!(f, "{}", label)
    }
}

/// Counters and sizing for one acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    pub(crate) bytes_needed: u64,
    pub(crate) bytes_received: u64,
    /// Raw bytes reported by completions, before clamping to the need
    pub(crate) bytes_reached: u64,
    pub(crate) bytes_reached_latest: u64,
    pub(crate) payload_bytes: usize,
    pub(crate) duration_ms: u64,
    pub(crate) outstanding: usize,
    pub(crate) completed: u64,
    pub(crate) aborted: bool,
    pub(crate) started_at: Instant,
    pub(crate) last_completion_at: Instant,
}

impl AcquisitionSession {
    /// Fresh session for `bytes_needed` bytes with the probed plan.
    pub fn new(bytes_needed: u64, plan: LinkPlan) -> Self {
        let now = Instant::now();
        Self {
            bytes_needed,
            bytes_received: 0,
            bytes_reached: 0,
            bytes_reached_latest: 0,
            payload_bytes: plan.payload_bytes,
            duration_ms: plan.duration_ms,
            outstanding: 0,
            completed: 0,
            aborted: false,
            started_at: now,
            last_completion_at: now,
        }
    }

    /// Placeholder used while the engine is idle.
    pub(crate) fn idle() -> Self {
        Self::new(
            0,
            LinkPlan {
                payload_bytes: 0,
                duration_ms: 1,
            },
        )
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> u64 {
        self.bytes_needed - self.bytes_received
    }

    /// Whether submitting one more request would still be useful.
    ///
    /// True while what has arrived plus what is in flight falls short of the
    /// need.
    pub fn wants_more(&self) -> bool {
        let in_flight = (self.outstanding as u64) * (self.payload_bytes as u64);
        self.bytes_received + in_flight < self.bytes_needed
    }

    /// Count `actual` freshly received bytes, truncated to the remaining need.
    ///
    /// Returns the number of bytes that were counted.
    pub(crate) fn record_bytes(&mut self, actual: usize) -> usize {
        self.bytes_reached_latest = actual as u64;
        self.bytes_reached += actual as u64;
        let counted = (actual as u64).min(self.remaining());
        self.bytes_received += counted;
        counted as usize
    }

    /// Latch the abort flag. It never clears for the lifetime of the session.
    pub(crate) fn abort(&mut self) {
        self.aborted = true;
    }

    /// Drop one request from the outstanding count.
    pub(crate) fn retire(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Request timeout for a submission made at the current pool depth.
    ///
    /// The budget grows with depth: a request queued behind `outstanding`
    /// others will not see data until those have been filled.
    pub fn request_timeout(&self, tolerance: f64) -> Duration {
        let ms = (1.0 + tolerance) * self.duration_ms as f64 * (self.outstanding + 2) as f64;
        Duration::from_micros((ms * 1000.0) as u64)
    }

    /// Largest gap between completions tolerated before the link counts as stalled.
    pub fn stall_threshold(&self, tolerance: f64) -> Duration {
        let ms = (1.0 + tolerance) * self.duration_ms as f64;
        Duration::from_micros((ms * 1000.0) as u64)
    }

    /// Interval between controller ticks: half a request duration, at least 1 ms.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis((self.duration_ms / 2).max(1))
    }

    /// Snapshot of the counters.
    pub fn stats(&self, now: Instant) -> SessionStats {
        let elapsed = now.saturating_duration_since(self.started_at);
        SessionStats {
            bytes_needed: self.bytes_needed,
            bytes_received: self.bytes_received,
            payload_bytes: self.payload_bytes,
            duration_ms: self.duration_ms,
            outstanding: self.outstanding,
            completed: self.completed,
            aborted: self.aborted,
            elapsed,
            average_mbps: mbps(self.bytes_reached, elapsed),
        }
    }
}

/// Bytes over a duration, in MB/s (10^6 bytes per second).
pub(crate) fn mbps(bytes: u64, over: Duration) -> f64 {
    let micros = over.as_micros();
    if micros == 0 {
        return 0.0;
    }
    bytes as f64 / micros as f64
}

/// Point-in-time view of an acquisition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Total payload requested
    pub bytes_needed: u64,
    /// Payload received so far
    pub bytes_received: u64,
    /// Per-request payload chosen by the probe
    pub payload_bytes: usize,
    /// Per-request duration chosen by the probe
    pub duration_ms: u64,
    /// Requests currently in flight
    pub outstanding: usize,
    /// Completions processed
    pub completed: u64,
    /// Whether the abort latch is set
    pub aborted: bool,
    /// Time since the pool was armed
    pub elapsed: Duration,
    /// Cumulative average link throughput in MB/s
    pub average_mbps: f64,
}

impl SessionStats {
    /// Fraction of the need received, 0.0 – 1.0.
    pub fn progress(&self) -> f64 {
        if self.bytes_needed == 0 {
            return 1.0;
        }
        self.bytes_received as f64 / self.bytes_needed as f64
    }
}

/// Final totals reported when an acquisition has been torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Payload received
    pub bytes_received: u64,
    /// Payload requested
    pub bytes_needed: u64,
    /// Completions processed
    pub requests_completed: u64,
    /// Time from arming to teardown
    pub elapsed: Duration,
    /// Cumulative average link throughput in MB/s
    pub average_mbps: f64,
}

impl SessionSummary {
    /// Whether every requested byte arrived.
    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.bytes_needed
    }
}
