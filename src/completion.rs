//! Completion handling.
//!
//! Every resolved request is classified by status. Data-carrying completions
//! are counted (clamped to what is still needed), forwarded, and resubmitted
//! with the same buffer while more bytes are wanted. Link-fatal statuses and
//! gaps between completions longer than the tolerated request duration drop
//! the outstanding count to zero, which latches the abort.
//!
//! Gaps are measured between the times requests resolved on the link, as
//! stamped by the reader, so the tick cadence does not widen them.

use tracing::{debug, error, trace, warn};

use crate::acquisition::Acquisition;
use crate::model::PatternMode;
use crate::pool::{SlotId, SlotStatus, TransferSlot};
use crate::session::mbps;
use crate::sink::AcquisitionSink;
use crate::transfer::{AsyncBulkReader, Completion, RemoteControl, TransferStatus};

impl<D, S> Acquisition<D, S>
where
    D: AsyncBulkReader + RemoteControl,
    S: AcquisitionSink,
{
    /// Process one resolved request.
    pub(crate) fn on_completion(&mut self, completion: Completion) {
        if !self.session.aborted && self.stop.is_requested() {
            debug!("Stop requested");
            self.session.abort();
        }

        let Some(id) = self.pool.find(completion.handle) else {
            debug!(handle = %completion.handle, "Completion for untracked request");
            return;
        };

        if self.session.aborted {
            // The reader has handed the buffer back; nothing is in flight any more
            self.pool.release(id);
            return;
        }

        let resolved_at = completion.resolved_at;
        let gap = resolved_at.saturating_duration_since(self.session.last_completion_at);
        let status = completion.status;
        trace!(%id, handle = %completion.handle, %status, "Transfer resolved");

        match status {
            TransferStatus::Completed | TransferStatus::TimedOut => {
                self.on_data(id, completion);
            }
            TransferStatus::Overflow | TransferStatus::Stall | TransferStatus::NoDevice => {
                warn!(%id, %status, "Link fault, stopping acquisition");
                self.pool.release(id);
                self.session.outstanding = 0;
            }
            TransferStatus::Cancelled | TransferStatus::Error => {
                debug!(%id, %status, "Transfer retired");
                self.pool.release(id);
                self.session.retire();
            }
        }

        let threshold = self.session.stall_threshold(self.config.tolerance);
        if self.session.completed > 0 && gap > threshold {
            error!(
                gap_ms = gap.as_secs_f64() * 1000.0,
                limit_ms = threshold.as_secs_f64() * 1000.0,
                duration_ms = self.session.duration_ms,
                tolerance = self.config.tolerance,
                "Completion gap exceeds duration limit"
            );
            self.session.outstanding = 0;
        }

        if self.session.outstanding == 0 {
            debug!("No transfers outstanding");
            self.session.abort();
        }

        self.session.completed += 1;
    }

    fn on_data(&mut self, id: SlotId, completion: Completion) {
        let actual = completion.data().len();
        let now = completion.resolved_at;
        let gap = now.saturating_duration_since(self.session.last_completion_at);
        let counted = self.session.record_bytes(actual);
        self.session.last_completion_at = self.session.last_completion_at.max(now);

        debug!(
            completed = self.session.completed,
            progress = 100.0 * self.session.bytes_received as f64
                / self.session.bytes_needed.max(1) as f64,
            received = self.session.bytes_received,
            needed = self.session.bytes_needed,
            mbps = mbps(self.session.bytes_reached_latest, gap),
            average_mbps = mbps(
                self.session.bytes_reached,
                now.saturating_duration_since(self.session.started_at)
            ),
            gap_ms = gap.as_secs_f64() * 1000.0,
            "Received transfer"
        );

        if let Some(slot) = self.pool.get_mut(id) {
            slot.actual_length = actual;
            slot.status = SlotStatus::from(completion.status);
        }
        self.pool.release(id);
        self.session.retire();

        if actual == 0 {
            return;
        }

        let params_mode = self.params.map(|p| p.pattern_mode).unwrap_or_default();
        if counted > 0 && params_mode != PatternMode::TestMaxSpeed {
            self.sink.submit_raw_data(&completion.data()[..counted]);
        }

        if !self.session.wants_more() {
            return;
        }

        let mut buffer = completion.buffer;
        buffer.resize(self.session.payload_bytes, 0);
        let len = buffer.len();
        let timeout = self.session.request_timeout(self.config.tolerance);
        match self.device.submit(buffer, timeout) {
            Ok(handle) => {
                trace!(%id, %handle, ?timeout, "Resubmitted transfer");
                self.pool
                    .occupy(id, TransferSlot::pending(handle, len, timeout));
                self.session.outstanding += 1;
            }
            Err(e) => {
                debug!(%id, error = %e, "Failed to resubmit transfer");
            }
        }
    }
}
