//! The streaming engine.
//!
//! [`Acquisition`] owns the device, the consumer sink, the slot arena and the
//! per-run [`AcquisitionSession`]. Everything is mutated from the single task
//! that calls [`start`](Acquisition::start) and then
//! [`tick`](Acquisition::tick) every [`tick_period`](Acquisition::tick_period).
//! The only state shared with other tasks is the [`StopHandle`] flag.
//!
//! # Lifecycle
//!
//! ```text
//! idle → starting (probe + initial fill) → streaming → aborting → idle
//! ```
//!
//! Both external stop requests and link faults latch the session's abort
//! flag while streaming; the next tick cancels every outstanding request.
//! Cancellations are collected with non-blocking polls on that tick and the
//! following ones, after which the single end-of-stream notification is
//! emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AcquisitionConfig;
use crate::error::{Result, SlogicError};
use crate::model::{AcquisitionParams, DeviceSettings};
use crate::pool::TransferPool;
use crate::probe::LinkProbe;
use crate::session::{AcquisitionSession, AcquisitionState, SessionStats};
use crate::sink::AcquisitionSink;
use crate::transfer::{AsyncBulkReader, BufferAllocator, HeapAllocator, RemoteControl};

/// Cloneable handle requesting an acquisition to stop.
///
/// Stopping is asynchronous: the engine observes the request on its next
/// tick or completion and tears down from there. A request made before or
/// during start applies to that start; the flag clears when the session's
/// teardown finishes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the acquisition to stop.
    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop is pending for the current or next session.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Bulk-streaming acquisition engine for one device.
pub struct Acquisition<D, S> {
    pub(crate) device: D,
    pub(crate) sink: S,
    pub(crate) allocator: Box<dyn BufferAllocator + Send>,
    pub(crate) config: AcquisitionConfig,
    pub(crate) settings: DeviceSettings,
    pub(crate) params: Option<AcquisitionParams>,
    pub(crate) state: AcquisitionState,
    pub(crate) session: AcquisitionSession,
    pub(crate) pool: TransferPool,
    pub(crate) stop: StopHandle,
    pub(crate) stream_end_sent: bool,
    pub(crate) drain_rounds: usize,
}

impl<D, S> std::fmt::Debug for Acquisition<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("session", &self.session)
            .field("occupied", &self.pool.occupied())
            .finish_non_exhaustive()
    }
}

impl<D, S> Acquisition<D, S>
where
    D: AsyncBulkReader + RemoteControl,
    S: AcquisitionSink,
{
    /// Create an idle engine using heap-allocated transfer buffers.
    pub fn new(device: D, sink: S, settings: DeviceSettings, config: AcquisitionConfig) -> Self {
        Self::with_allocator(device, sink, settings, config, Box::new(HeapAllocator))
    }

    /// Create an idle engine with a custom buffer allocator.
    pub fn with_allocator(
        device: D,
        sink: S,
        settings: DeviceSettings,
        config: AcquisitionConfig,
        allocator: Box<dyn BufferAllocator + Send>,
    ) -> Self {
        let pool = TransferPool::with_capacity(config.pool_capacity);
        Self {
            device,
            sink,
            allocator,
            config,
            settings,
            params: None,
            state: AcquisitionState::Idle,
            session: AcquisitionSession::idle(),
            pool,
            stop: StopHandle::default(),
            stream_end_sent: false,
            drain_rounds: 0,
        }
    }

    /// Arm the device and the transfer pool.
    ///
    /// Returns once the initial requests are submitted and the device has
    /// been told to run; data then flows through [`tick`](Self::tick).
    /// Fails with [`SlogicError::Busy`] if an acquisition is already active.
    pub fn start(&mut self) -> Result<()> {
        if self.state != AcquisitionState::Idle {
            return Err(SlogicError::Busy {
                state: self.state.to_string(),
            });
        }
        self.config.validate()?;

        self.state = AcquisitionState::Starting;
        match self.arm() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stop.reset();
                self.state = AcquisitionState::Idle;
                Err(e)
            }
        }
    }

    fn arm(&mut self) -> Result<()> {
        self.device.remote_stop()?;

        let params = self.settings.snapshot();
        let bytes_needed = params.bytes_needed();
        info!(
            limit_samples = params.limit_samples,
            channels = params.channels,
            samplerate_mhz = params.samplerate / 1_000_000,
            duration_ms = 1000 * params.limit_samples / params.samplerate.max(1),
            bytes_needed,
            "Starting acquisition"
        );

        self.stream_end_sent = false;
        self.pool = TransferPool::with_capacity(self.config.pool_capacity);

        let plan =
            LinkProbe::new(&self.config).run(&mut self.device, self.allocator.as_ref(), &params)?;

        self.params = Some(params);
        self.session = AcquisitionSession::new(bytes_needed, plan);
        self.state = AcquisitionState::Streaming;

        let submitted = self.fill_pool();
        debug!(submitted, "Initial fill done");

        self.sink.stream_start(&params);
        self.sink.frame_start();

        let now = Instant::now();
        self.session.started_at = now;
        self.session.last_completion_at = now;

        if self.session.outstanding == 0 {
            info!("Nothing submitted, ending acquisition on next tick");
            self.session.abort();
            return Ok(());
        }

        if self.stop.is_requested() {
            info!("Stop requested while arming, device not started");
            self.session.abort();
            return Ok(());
        }

        if let Err(e) = self.device.remote_start() {
            warn!(error = %e, "Device did not start, releasing transfers");
            self.session.abort();
            self.teardown();
            return Err(e);
        }

        info!(
            outstanding = self.session.outstanding,
            payload = self.session.payload_bytes,
            "Acquisition armed"
        );
        Ok(())
    }

    /// Request the running acquisition to stop.
    ///
    /// Teardown happens on a later [`tick`](Self::tick).
    pub fn stop(&mut self) {
        if self.state == AcquisitionState::Streaming {
            debug!("Stop requested");
            self.session.abort();
        }
    }

    /// Handle for stopping the acquisition from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Parameters of the current (or last) acquisition.
    pub fn params(&self) -> Option<&AcquisitionParams> {
        self.params.as_ref()
    }

    /// Device settings applied at the next start.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Mutable device settings; changes apply at the next start.
    pub fn settings_mut(&mut self) -> &mut DeviceSettings {
        &mut self.settings
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        self.session.stats(Instant::now())
    }

    /// Number of non-empty transfer slots.
    pub fn occupied_slots(&self) -> usize {
        self.pool.occupied()
    }

    /// Interval at which [`tick`](Self::tick) should be called.
    pub fn tick_period(&self) -> Duration {
        self.session.tick_period()
    }

    /// Engine tuning in effect.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Borrow the device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Take the device and sink back.
    pub fn into_parts(self) -> (D, S) {
        (self.device, self.sink)
    }
}
