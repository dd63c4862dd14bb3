//! Simulated SLogic bulk endpoint.
//!
//! Requests are queued in submission order and filled from a continuous
//! byte stream once the device has been started. Cancelled requests resolve
//! on the next poll, so draining never has to wait. The device is cheap to
//! inspect from a test through a cloned [`SimulatorHandle`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::faults::{CompletionFault, FaultScenario};
use super::mode::MockMode;
use super::pattern::Pattern;
use super::rng::MockRng;
use crate::error::{Result, SlogicError, SubmitError};
use crate::transfer::{AsyncBulkReader, Completion, RemoteControl, RequestHandle, TransferStatus};

/// Simulated device configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Delivery mode
    pub mode: MockMode,
    /// Link rate used by [`MockMode::Realistic`]
    pub bytes_per_ms: u64,
    /// Payload written into delivered buffers
    pub pattern: Pattern,
    /// Scripted faults
    pub faults: Vec<FaultScenario>,
    /// Probability of a short read per transfer in [`MockMode::Chaos`]
    pub chaos_rate: f64,
    /// RNG seed for chaos mode
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Instant,
            bytes_per_ms: 4000,
            pattern: Pattern::Ramp,
            faults: Vec::new(),
            chaos_rate: 0.1,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Fill every request on the next poll.
    pub fn instant() -> Self {
        Self::default()
    }

    /// Fill requests in order at `bytes_per_ms`.
    pub fn realistic(bytes_per_ms: u64) -> Self {
        Self {
            mode: MockMode::Realistic,
            bytes_per_ms,
            ..Default::default()
        }
    }

    /// Instant delivery with random short reads.
    pub fn chaos(rate: f64, seed: Option<u64>) -> Self {
        Self {
            mode: MockMode::Chaos,
            chaos_rate: rate,
            seed,
            ..Default::default()
        }
    }

    /// Add a scripted fault.
    pub fn with_fault(mut self, fault: FaultScenario) -> Self {
        self.faults.push(fault);
        self
    }

    /// Set the payload pattern.
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }
}

/// Counters exposed for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Accepted submissions
    pub submitted: u64,
    /// Refused submissions
    pub rejected: u64,
    /// Cancellation requests
    pub cancelled: u64,
    /// Data-carrying completions delivered
    pub delivered: u64,
    /// Payload bytes delivered
    pub bytes_delivered: u64,
    /// Remote start commands received
    pub remote_starts: u64,
    /// Remote stop commands received
    pub remote_stops: u64,
    /// Highest number of requests in flight at once
    pub peak_in_flight: usize,
    /// Size of every accepted submission, in order
    pub submit_sizes: Vec<usize>,
}

#[derive(Debug)]
struct PendingRequest {
    handle: RequestHandle,
    buffer: Vec<u8>,
    deadline: Option<Instant>,
    cancelled: bool,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    rng: MockRng,
    queue: VecDeque<PendingRequest>,
    next_handle: u64,
    running: bool,
    held: bool,
    disconnected: bool,
    /// When the previous transfer finished filling
    cursor: Instant,
    stream_offset: u64,
    transfers: u64,
    stats: SimulatorStats,
}

impl SimState {
    fn submit_fault(&self, len: usize) -> Option<SubmitError> {
        if self.disconnected {
            return Some(SubmitError::NoDevice);
        }
        self.config.faults.iter().find_map(|f| match *f {
            FaultScenario::SubmitNoMemoryAbove(max) if len > max => Some(SubmitError::NoMemory),
            FaultScenario::MaxInFlight(max) if self.queue.len() >= max => {
                Some(SubmitError::NoMemory)
            }
            FaultScenario::SubmitFails => Some(SubmitError::Other(
                "simulated submission failure".to_string(),
            )),
            _ => None,
        })
    }

    fn has_fault(&self, fault: &FaultScenario) -> bool {
        self.config.faults.contains(fault)
    }

    fn link_delay(&self) -> Duration {
        self.config
            .faults
            .iter()
            .filter_map(|f| f.delay_at(self.transfers))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn fill_time(&self, len: usize) -> Duration {
        match self.config.mode {
            MockMode::Realistic if self.config.bytes_per_ms > 0 => {
                Duration::from_micros(len as u64 * 1000 / self.config.bytes_per_ms)
            }
            _ => Duration::ZERO,
        }
    }

    /// Resolve the head request with data.
    fn deliver(&mut self, mut req: PendingRequest, resolved_at: Instant) -> Completion {
        let len = req.buffer.len();
        let fault = self
            .config
            .faults
            .iter()
            .find_map(|f| f.completion_fault(self.transfers));

        let (status, actual) = match fault {
            Some(CompletionFault::Status(status)) => (status, 0),
            Some(CompletionFault::Truncate(n)) => (TransferStatus::Completed, n.min(len)),
            None if self.config.mode == MockMode::Chaos
                && self.rng.should_fail(self.config.chaos_rate) =>
            {
                (TransferStatus::TimedOut, self.rng.short_len(len))
            }
            None => (TransferStatus::Completed, len),
        };

        if status == TransferStatus::NoDevice {
            debug!("Simulated device unplugged");
            self.disconnected = true;
            self.running = false;
        }

        self.produce(&mut req.buffer[..actual]);
        self.transfers += 1;
        if status.carries_data() {
            self.stats.delivered += 1;
            self.stats.bytes_delivered += actual as u64;
        }
        trace!(handle = %req.handle, %status, actual, "Simulated transfer");

        Completion {
            handle: req.handle,
            status,
            buffer: req.buffer,
            actual_length: actual,
            resolved_at,
        }
    }

    fn produce(&mut self, buf: &mut [u8]) {
        self.config.pattern.fill(buf, self.stream_offset);
        self.stream_offset += buf.len() as u64;
    }

    fn resolve(req: PendingRequest, status: TransferStatus, now: Instant) -> Completion {
        Completion {
            handle: req.handle,
            status,
            buffer: req.buffer,
            actual_length: 0,
            resolved_at: now,
        }
    }

    fn poll(&mut self, now: Instant) -> Vec<Completion> {
        let (cancelled, queue): (VecDeque<_>, VecDeque<_>) =
            self.queue.drain(..).partition(|r| r.cancelled);
        self.queue = queue;

        let mut out: Vec<Completion> = cancelled
            .into_iter()
            .map(|r| Self::resolve(r, TransferStatus::Cancelled, now))
            .collect();

        if self.disconnected {
            out.extend(
                self.queue
                    .drain(..)
                    .map(|r| Self::resolve(r, TransferStatus::NoDevice, now)),
            );
            return out;
        }

        if self.running && !self.held {
            while let Some(len) = self.queue.front().map(|r| r.buffer.len()) {
                let done_at = self.cursor + self.fill_time(len) + self.link_delay();
                if done_at > now {
                    break;
                }
                let Some(req) = self.queue.pop_front() else {
                    break;
                };
                // Instant links fill on demand; only a timed link knows when
                let resolved_at = if self.config.mode == MockMode::Realistic {
                    done_at
                } else {
                    now
                };
                out.push(self.deliver(req, resolved_at));
                self.cursor = done_at;
                if self.disconnected {
                    out.extend(
                        self.queue
                            .drain(..)
                            .map(|r| Self::resolve(r, TransferStatus::NoDevice, now)),
                    );
                    return out;
                }
            }
        }

        // Expired requests; only the head can have seen part of its data
        let mut kept = VecDeque::with_capacity(self.queue.len());
        let mut is_head = true;
        while let Some(mut req) = self.queue.pop_front() {
            let deadline = match req.deadline {
                Some(d) if d <= now => d,
                _ => {
                    kept.push_back(req);
                    is_head = false;
                    continue;
                }
            };
            let mut actual = 0;
            if is_head && self.running && !self.held {
                let len = req.buffer.len();
                let fill = self.fill_time(len).as_micros().max(1);
                let elapsed = deadline.saturating_duration_since(self.cursor).as_micros();
                actual = ((len as u128 * elapsed / fill) as usize).min(len.saturating_sub(1));
                self.produce(&mut req.buffer[..actual]);
                self.cursor = self.cursor.max(deadline);
            }
            self.transfers += 1;
            self.stats.delivered += 1;
            self.stats.bytes_delivered += actual as u64;
            out.push(Completion {
                handle: req.handle,
                status: TransferStatus::TimedOut,
                buffer: req.buffer,
                actual_length: actual,
                resolved_at: deadline,
            });
        }
        self.queue = kept;

        out
    }
}

/// Simulated SLogic analyzer.
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

/// Cloneable view into a [`SimulatedDevice`].
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// Create a stopped device.
    pub fn new(config: SimConfig) -> Self {
        let rng = MockRng::new(config.seed);
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                rng,
                queue: VecDeque::new(),
                next_handle: 1,
                running: false,
                held: false,
                disconnected: false,
                cursor: Instant::now(),
                stream_offset: 0,
                transfers: 0,
                stats: SimulatorStats::default(),
            })),
        }
    }

    /// Handle for inspecting and steering the device from elsewhere.
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl SimulatorHandle {
    /// Counter snapshot.
    pub fn stats(&self) -> SimulatorStats {
        self.state.lock().stats.clone()
    }

    /// Requests currently queued.
    pub fn in_flight(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether the sampler is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Stop (or resume) filling requests without reporting an error.
    pub fn set_held(&self, held: bool) {
        let mut st = self.state.lock();
        st.held = held;
        if !held {
            st.cursor = Instant::now();
        }
    }

    /// Unplug the device: queued requests resolve as `NoDevice`.
    pub fn unplug(&self) {
        let mut st = self.state.lock();
        st.disconnected = true;
        st.running = false;
    }
}

impl AsyncBulkReader for SimulatedDevice {
    fn submit(
        &mut self,
        buffer: Vec<u8>,
        timeout: Duration,
    ) -> std::result::Result<RequestHandle, SubmitError> {
        let mut st = self.state.lock();
        let len = buffer.len();
        if let Some(e) = st.submit_fault(len) {
            st.stats.rejected += 1;
            return Err(e);
        }

        let now = Instant::now();
        if st.queue.is_empty() && st.cursor < now {
            // Nothing was waiting, so nothing was filled in the meantime
            st.cursor = now;
        }

        let handle = RequestHandle(st.next_handle);
        st.next_handle += 1;
        st.queue.push_back(PendingRequest {
            handle,
            buffer,
            deadline: (!timeout.is_zero()).then(|| now + timeout),
            cancelled: false,
        });
        st.stats.submitted += 1;
        st.stats.submit_sizes.push(len);
        st.stats.peak_in_flight = st.stats.peak_in_flight.max(st.queue.len());
        Ok(handle)
    }

    fn cancel(&mut self, handle: RequestHandle) -> std::result::Result<(), SubmitError> {
        let mut st = self.state.lock();
        let req = st
            .queue
            .iter_mut()
            .find(|r| r.handle == handle)
            .ok_or(SubmitError::NotFound)?;
        req.cancelled = true;
        st.stats.cancelled += 1;
        Ok(())
    }

    fn poll_completions(&mut self, _timeout: Duration) -> Vec<Completion> {
        self.state.lock().poll(Instant::now())
    }

    fn in_flight(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl RemoteControl for SimulatedDevice {
    fn remote_start(&mut self) -> Result<()> {
        let mut st = self.state.lock();
        if st.disconnected {
            return Err(SlogicError::Disconnected);
        }
        if st.has_fault(&FaultScenario::RemoteStartFails) {
            return Err(SlogicError::remote("start", "simulated command failure"));
        }
        st.stats.remote_starts += 1;
        st.running = true;
        st.cursor = Instant::now();
        debug!("Simulated sampler running");
        Ok(())
    }

    fn remote_stop(&mut self) -> Result<()> {
        let mut st = self.state.lock();
        if st.disconnected {
            return Err(SlogicError::Disconnected);
        }
        if st.has_fault(&FaultScenario::RemoteStopFails) {
            return Err(SlogicError::remote("stop", "simulated command failure"));
        }
        st.stats.remote_stops += 1;
        st.running = false;
        Ok(())
    }
}
