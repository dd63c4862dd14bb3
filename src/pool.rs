//! Fixed-capacity arena of transfer slots.
//!
//! Each slot is either empty or tracks exactly one request that the reader
//! has accepted. The buffer itself travels with the request: it lives inside
//! the reader while the request is pending and comes back in the
//! [`Completion`](crate::transfer::Completion), so releasing a slot never
//! frees memory the host controller could still write to.

use std::fmt;
use std::time::Duration;

use tracing::{debug, trace};

use crate::acquisition::Acquisition;
use crate::sink::AcquisitionSink;
use crate::transfer::{AsyncBulkReader, RemoteControl, RequestHandle, TransferStatus};

/// Index of a slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot[{}]", self.0)
    }
}

/// Lifecycle status of a slot's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Submitted, waiting for the reader
    Pending,
    /// Cancellation requested, waiting for the terminal completion
    Cancelling,
    /// Filled (possibly short)
    Completed,
    /// Expired with possibly partial data
    TimedOut,
    /// Device sent more than requested
    Overflow,
    /// Endpoint halted or device gone
    Stalled,
    /// Cancellation observed
    Cancelled,
    /// Any other terminal error
    Failed,
}

impl From<TransferStatus> for SlotStatus {
    fn from(status: TransferStatus) -> Self {
        match status {
            TransferStatus::Completed => Self::Completed,
            TransferStatus::TimedOut => Self::TimedOut,
            TransferStatus::Overflow => Self::Overflow,
            TransferStatus::Stall | TransferStatus::NoDevice => Self::Stalled,
            TransferStatus::Cancelled => Self::Cancelled,
            TransferStatus::Error => Self::Failed,
        }
    }
}

impl SlotStatus {
    /// Whether the reader still holds the request.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::Cancelling)
    }
}

/// One in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSlot {
    /// Reader-issued identity of the request
    pub handle: RequestHandle,
    /// Size of the submitted buffer
    pub requested_length: usize,
    /// Bytes received, once terminal
    pub actual_length: usize,
    /// Timeout the request was submitted with
    pub timeout: Duration,
    /// Current status
    pub status: SlotStatus,
}

impl TransferSlot {
    /// A freshly submitted request.
    pub fn pending(handle: RequestHandle, requested_length: usize, timeout: Duration) -> Self {
        Self {
            handle,
            requested_length,
            actual_length: 0,
            timeout,
            status: SlotStatus::Pending,
        }
    }
}

/// Arena of at most `capacity` slots.
#[derive(Debug, Clone)]
pub struct TransferPool {
    slots: Vec<Option<TransferSlot>>,
}

impl TransferPool {
    /// Empty pool with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of non-empty slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether every slot is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Lowest empty slot, if any.
    pub fn free_slot(&self) -> Option<SlotId> {
        self.slots.iter().position(Option::is_none).map(SlotId)
    }

    /// Put a request into an empty slot.
    ///
    /// Returns `false` (and leaves the pool unchanged) if the slot is taken
    /// or out of range.
    pub fn occupy(&mut self, id: SlotId, slot: TransferSlot) -> bool {
        match self.slots.get_mut(id.0) {
            Some(entry @ None) => {
                *entry = Some(slot);
                true
            }
            _ => false,
        }
    }

    /// Slot tracking `handle`.
    pub fn find(&self, handle: RequestHandle) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.handle == handle))
            .map(SlotId)
    }

    /// Borrow a slot.
    pub fn get(&self, id: SlotId) -> Option<&TransferSlot> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutably borrow a slot.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut TransferSlot> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Empty a slot, returning what it tracked.
    pub fn release(&mut self, id: SlotId) -> Option<TransferSlot> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    /// Requests the reader still holds.
    pub fn pending(&self) -> Vec<(SlotId, RequestHandle)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.as_ref()
                    .filter(|s| s.status.is_pending())
                    .map(|s| (SlotId(i), s.handle))
            })
            .collect()
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

impl<D, S> Acquisition<D, S>
where
    D: AsyncBulkReader + RemoteControl,
    S: AcquisitionSink,
{
    /// Submit requests until the pool is full or enough bytes are in flight.
    ///
    /// Stops at the first allocation or submission failure; the next tick
    /// tries again. Returns the number of requests submitted.
    pub(crate) fn fill_pool(&mut self) -> usize {
        let mut submitted = 0;

        while !self.session.aborted
            && self.session.outstanding < self.pool.capacity()
            && self.session.wants_more()
        {
            let Some(id) = self.pool.free_slot() else {
                break;
            };

            let len = self.session.payload_bytes;
            let Some(buffer) = self.allocator.allocate(len) else {
                debug!(%id, len, "Failed to allocate transfer buffer");
                break;
            };

            let timeout = self.session.request_timeout(self.config.tolerance);
            match self.device.submit(buffer, timeout) {
                Ok(handle) => {
                    trace!(%id, %handle, ?timeout, "Submitted transfer");
                    self.pool
                        .occupy(id, TransferSlot::pending(handle, len, timeout));
                    self.session.outstanding += 1;
                    submitted += 1;
                }
                Err(e) => {
                    debug!(%id, error = %e, "Failed to submit transfer");
                    break;
                }
            }
        }

        if submitted > 0 {
            debug!(
                submitted,
                outstanding = self.session.outstanding,
                "Filled transfer pool"
            );
        }
        submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u64) -> TransferSlot {
        TransferSlot::pending(RequestHandle(n), 4096, Duration::from_millis(10))
    }

    #[test]
    fn test_occupy_and_release() {
        let mut pool = TransferPool::with_capacity(2);
        assert!(pool.is_empty());

        let a = pool.free_slot().unwrap();
        assert!(pool.occupy(a, slot(1)));
        let b = pool.free_slot().unwrap();
        assert_ne!(a, b);
        assert!(pool.occupy(b, slot(2)));

        assert_eq!(pool.free_slot(), None);
        assert_eq!(pool.occupied(), 2);
        // A taken slot is never overwritten
        assert!(!pool.occupy(a, slot(3)));
        assert!(!pool.occupy(SlotId(7), slot(3)));

        assert_eq!(pool.find(RequestHandle(2)), Some(b));
        assert_eq!(pool.release(b).map(|s| s.handle), Some(RequestHandle(2)));
        assert_eq!(pool.find(RequestHandle(2)), None);
        assert_eq!(pool.free_slot(), Some(b));
    }

    #[test]
    fn test_pending_excludes_terminal() {
        let mut pool = TransferPool::with_capacity(3);
        pool.occupy(SlotId(0), slot(1));
        pool.occupy(SlotId(2), slot(2));
        if let Some(s) = pool.get_mut(SlotId(2)) {
            s.status = SlotStatus::Completed;
        }
        assert_eq!(pool.pending(), vec![(SlotId(0), RequestHandle(1))]);

        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(SlotStatus::from(TransferStatus::NoDevice), SlotStatus::Stalled);
        assert_eq!(SlotStatus::from(TransferStatus::Error), SlotStatus::Failed);
        assert!(SlotStatus::Cancelling.is_pending());
        assert!(!SlotStatus::Cancelled.is_pending());
    }
}
