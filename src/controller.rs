//! Periodic tick and teardown.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::acquisition::Acquisition;
use crate::pool::SlotStatus;
use crate::session::{mbps, AcquisitionState, SessionSummary};
use crate::sink::AcquisitionSink;
use crate::transfer::{AsyncBulkReader, RemoteControl};

/// Result of one [`Acquisition::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No acquisition is active
    Idle,
    /// Still streaming or draining; tick again after the tick period
    Continue,
    /// The acquisition has been torn down; stop ticking
    Finished(SessionSummary),
}

impl<D, S> Acquisition<D, S>
where
    D: AsyncBulkReader + RemoteControl,
    S: AcquisitionSink,
{
    /// Drive the acquisition one step.
    ///
    /// Collects resolved requests without blocking and tops the pool up.
    /// Once the abort latch is set it cancels everything still in flight and
    /// drains the cancellations over the following ticks, one non-blocking
    /// poll per tick, for at most as many ticks as the pool has slots.
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            AcquisitionState::Streaming => {}
            AcquisitionState::Aborting => return self.drain_tick(),
            AcquisitionState::Idle | AcquisitionState::Starting => return TickOutcome::Idle,
        }

        if !self.session.aborted && self.stop.is_requested() {
            info!("Stop requested");
            self.session.abort();
        }

        if !self.session.aborted {
            for completion in self.device.poll_completions(Duration::ZERO) {
                self.on_completion(completion);
            }
        }

        if !self.session.aborted && self.config.refill_on_tick {
            self.fill_pool();
        }

        if self.session.aborted {
            self.begin_teardown();
            return self.drain_tick();
        }
        TickOutcome::Continue
    }

    fn drain_tick(&mut self) -> TickOutcome {
        if self.drain_step(Duration::ZERO) {
            TickOutcome::Finished(self.finish_teardown())
        } else {
            TickOutcome::Continue
        }
    }

    /// Cancel, drain and close the stream in one blocking call.
    ///
    /// Only used off the async workers, where waiting on the reader is fine.
    pub(crate) fn teardown(&mut self) -> SessionSummary {
        self.begin_teardown();
        let poll = self.config.teardown_poll();
        while !self.drain_step(poll) {}
        self.finish_teardown()
    }

    fn begin_teardown(&mut self) {
        self.state = AcquisitionState::Aborting;
        self.drain_rounds = 0;

        if let Err(e) = self.device.remote_stop() {
            warn!(error = %e, "Failed to halt device during teardown");
        }

        for (id, handle) in self.pool.pending() {
            if let Err(e) = self.device.cancel(handle) {
                debug!(%id, %handle, error = %e, "Failed to cancel transfer");
            }
            if let Some(slot) = self.pool.get_mut(id) {
                slot.status = SlotStatus::Cancelling;
            }
        }
    }

    /// One drain round. Returns true once the pool is empty or the round
    /// budget (pool capacity) is spent.
    fn drain_step(&mut self, timeout: Duration) -> bool {
        if !self.pool.is_empty() && self.drain_rounds < self.pool.capacity() {
            self.drain_rounds += 1;
            for completion in self.device.poll_completions(timeout) {
                if let Some(id) = self.pool.find(completion.handle) {
                    self.pool.release(id);
                }
            }
        }
        self.pool.is_empty() || self.drain_rounds >= self.pool.capacity()
    }

    fn finish_teardown(&mut self) -> SessionSummary {
        let stranded = self.pool.occupied();
        if stranded > 0 {
            // The reader keeps ownership of these buffers until they resolve
            warn!(stranded, "Transfers still pending after drain");
        }
        self.pool.clear();
        debug!("Freed all transfers");

        self.session.outstanding = 0;
        self.finish_stream();

        let elapsed = Instant::now().saturating_duration_since(self.session.started_at);
        let summary = SessionSummary {
            bytes_received: self.session.bytes_received,
            bytes_needed: self.session.bytes_needed,
            requests_completed: self.session.completed,
            elapsed,
            average_mbps: mbps(self.session.bytes_reached, elapsed),
        };
        info!(
            received = summary.bytes_received,
            needed = summary.bytes_needed,
            transfers = summary.requests_completed,
            average_mbps = summary.average_mbps,
            "Bulk in finished"
        );

        // A stop issued while this session ran has been served
        self.stop.reset();
        self.state = AcquisitionState::Idle;
        summary
    }

    fn finish_stream(&mut self) {
        if !self.stream_end_sent {
            self.stream_end_sent = true;
            self.sink.stream_end();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::config::AcquisitionConfig;
    use crate::error::{Result, SubmitError};
    use crate::model::{mhz, DeviceSettings, SLOGIC_LITE_8};
    use crate::simulator::{FaultScenario, SimConfig, SimulatedDevice};
    use crate::sink::NullSink;
    use crate::transfer::{Completion, RequestHandle, TransferStatus};

    fn settings() -> DeviceSettings {
        let mut settings = DeviceSettings::new(&SLOGIC_LITE_8);
        settings.set_channels(2);
        settings.set_samplerate(mhz(1));
        // 250 000 bytes at 250 bytes/ms
        settings.set_limit_samples(1_000_000);
        settings
    }

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            pool_capacity: 2,
            ..Default::default()
        }
    }

    fn engine(sim: SimConfig) -> Acquisition<SimulatedDevice, NullSink> {
        Acquisition::new(SimulatedDevice::new(sim), NullSink, settings(), config())
    }

    /// Reader whose cancellations take one extra poll to come back.
    /// Records every poll timeout it is asked to wait.
    struct LateCancel {
        inner: SimulatedDevice,
        deferred: Vec<Completion>,
        timeouts: Vec<Duration>,
    }

    impl AsyncBulkReader for LateCancel {
        fn submit(
            &mut self,
            buffer: Vec<u8>,
            timeout: Duration,
        ) -> std::result::Result<RequestHandle, SubmitError> {
            self.inner.submit(buffer, timeout)
        }

        fn cancel(&mut self, handle: RequestHandle) -> std::result::Result<(), SubmitError> {
            self.inner.cancel(handle)
        }

        fn poll_completions(&mut self, timeout: Duration) -> Vec<Completion> {
            self.timeouts.push(timeout);
            let mut out = std::mem::take(&mut self.deferred);
            for completion in self.inner.poll_completions(timeout) {
                if completion.status == TransferStatus::Cancelled {
                    self.deferred.push(completion);
                } else {
                    out.push(completion);
                }
            }
            out
        }

        fn in_flight(&self) -> usize {
            self.inner.in_flight() + self.deferred.len()
        }
    }

    impl RemoteControl for LateCancel {
        fn remote_start(&mut self) -> Result<()> {
            self.inner.remote_start()
        }

        fn remote_stop(&mut self) -> Result<()> {
            self.inner.remote_stop()
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_gap_is_logged() {
        let mut acq = engine(SimConfig::instant());
        acq.start().unwrap();
        // Floor payload: 32 KiB takes 131.072 ms
        assert_eq!(acq.stats().duration_ms, 132);

        assert_eq!(acq.tick(), TickOutcome::Continue);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(acq.tick(), TickOutcome::Finished(_)));
        assert!(logs_contain("Completion gap exceeds duration limit"));
        assert!(logs_contain("Bulk in finished"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_link_fault_is_logged() {
        let mut acq = engine(SimConfig::instant().with_fault(FaultScenario::OverflowAfter(0)));
        acq.start().unwrap();
        assert!(matches!(acq.tick(), TickOutcome::Finished(_)));
        assert!(logs_contain("Link fault, stopping acquisition"));
    }

    #[test]
    fn test_tick_when_idle() {
        let mut acq = engine(SimConfig::instant());
        assert_eq!(acq.state(), AcquisitionState::Idle);
        assert_eq!(acq.tick(), TickOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_device_held() {
        let mut acq = engine(SimConfig::instant());
        acq.start().unwrap();
        let sim = acq.device().handle();
        sim.set_held(true);

        // Cancellation resolves requests even though no data moves
        acq.stop();
        let summary = match acq.tick() {
            TickOutcome::Finished(summary) => summary,
            other => panic!("expected teardown, got {:?}", other),
        };
        assert_eq!(summary.bytes_received, 0);
        assert_eq!(acq.occupied_slots(), 0);
        assert_eq!(acq.stats().outstanding, 0);
        assert_eq!(sim.in_flight(), 0);
        assert_eq!(sim.stats().cancelled, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_drains_across_ticks_without_blocking() {
        let reader = LateCancel {
            inner: SimulatedDevice::new(SimConfig::instant()),
            deferred: Vec::new(),
            timeouts: Vec::new(),
        };
        let mut acq = Acquisition::new(reader, NullSink, settings(), config());
        acq.start().unwrap();
        let polls_before = acq.device().timeouts.len();

        acq.stop();
        // Cancellations are still out after the first round
        assert_eq!(acq.tick(), TickOutcome::Continue);
        assert_eq!(acq.state(), AcquisitionState::Aborting);
        assert_eq!(acq.occupied_slots(), 2);
        assert!(matches!(acq.tick(), TickOutcome::Finished(_)));
        assert_eq!(acq.state(), AcquisitionState::Idle);
        assert_eq!(acq.occupied_slots(), 0);
        assert_eq!(acq.device().in_flight(), 0);

        // Tick-driven teardown never waits on the reader
        let polls = &acq.device().timeouts[polls_before..];
        assert_eq!(polls.len(), 2);
        assert!(polls.iter().all(|t| t.is_zero()));
    }
}
