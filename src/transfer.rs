//! Bulk transfer abstractions.
//!
//! The engine never talks to libusb (or any other host stack) directly. It
//! drives an [`AsyncBulkReader`]: buffers are moved into the reader on
//! [`submit`](AsyncBulkReader::submit) and handed back inside a
//! [`Completion`] when the request resolves, whether it succeeded, timed
//! out, failed or was cancelled. A buffer therefore cannot be touched by the
//! engine while the host controller may still be writing into it.
//!
//! Completions are collected by polling, which keeps every state change on
//! the thread that drives the acquisition.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SubmitError};

/// Opaque identity of one submitted request, minted by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub u64);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Final status of a bulk request, mirroring the host stack's transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Request filled (possibly short)
    Completed,
    /// Timeout expired; some bytes may still have arrived
    TimedOut,
    /// Device sent more data than requested
    Overflow,
    /// Endpoint halted
    Stall,
    /// Device was disconnected
    NoDevice,
    /// Request was cancelled
    Cancelled,
    /// Any other transfer error
    Error,
}

impl TransferStatus {
    /// Completed and timed-out requests may carry payload.
    pub fn carries_data(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }

    /// Statuses after which the link cannot be trusted for any slot.
    pub fn is_link_fatal(self) -> bool {
        matches!(self, Self::Overflow | Self::Stall | Self::NoDevice)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Overflow => "overflow",
            Self::Stall => "stall",
            Self::NoDevice => "no_device",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// A resolved request together with the buffer it was submitted with.
#[derive(Debug)]
pub struct Completion {
    /// Which request resolved
    pub handle: RequestHandle,
    /// How it resolved
    pub status: TransferStatus,
    /// The submitted buffer, returned to the caller
    pub buffer: Vec<u8>,
    /// Bytes actually written into `buffer`
    pub actual_length: usize,
    /// When the request resolved on the link, not when it was collected
    pub resolved_at: Instant,
}

impl Completion {
    /// The received bytes (never longer than the buffer).
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(self.buffer.len())]
    }
}

/// Asynchronous bulk-IN endpoint.
///
/// Implementations must return every accepted buffer exactly once through
/// [`poll_completions`](Self::poll_completions), including cancelled ones.
pub trait AsyncBulkReader {
    /// Queue a read of `buffer.len()` bytes with the given timeout.
    ///
    /// A rejected buffer is dropped by the reader.
    fn submit(
        &mut self,
        buffer: Vec<u8>,
        timeout: Duration,
    ) -> std::result::Result<RequestHandle, SubmitError>;

    /// Ask for a pending request to be cancelled.
    ///
    /// Cancellation is cooperative: the request still resolves later through
    /// [`poll_completions`](Self::poll_completions), normally as
    /// [`TransferStatus::Cancelled`].
    fn cancel(&mut self, handle: RequestHandle) -> std::result::Result<(), SubmitError>;

    /// Collect resolved requests, waiting at most `timeout` for the first one.
    ///
    /// A zero timeout never blocks. Each completion carries the time it
    /// resolved, which may be earlier than the call.
    fn poll_completions(&mut self, timeout: Duration) -> Vec<Completion>;

    /// Number of requests accepted but not yet returned.
    fn in_flight(&self) -> usize;
}

/// Synchronous device-side commands.
pub trait RemoteControl {
    /// Arm the sampler; data starts flowing on the bulk endpoint.
    fn remote_start(&mut self) -> Result<()>;

    /// Halt the sampler and reset its state.
    fn remote_stop(&mut self) -> Result<()>;
}

/// Fallible buffer allocation.
///
/// Large transfer buffers may legitimately fail to allocate under memory
/// pressure; the engine treats `None` as "try smaller".
pub trait BufferAllocator {
    /// Allocate a zeroed buffer of exactly `len` bytes.
    fn allocate(&self, len: usize) -> Option<Vec<u8>>;
}

/// Heap allocator that reports allocation failure instead of aborting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).ok()?;
        buffer.resize(len, 0);
        Some(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(TransferStatus::Completed.carries_data());
        assert!(TransferStatus::TimedOut.carries_data());
        assert!(!TransferStatus::Cancelled.carries_data());

        assert!(TransferStatus::Stall.is_link_fatal());
        assert!(TransferStatus::Overflow.is_link_fatal());
        assert!(TransferStatus::NoDevice.is_link_fatal());
        assert!(!TransferStatus::Error.is_link_fatal());
        assert!(!TransferStatus::TimedOut.is_link_fatal());
    }

    #[test]
    fn test_completion_data_clamped_to_buffer() {
        let completion = Completion {
            handle: RequestHandle(1),
            status: TransferStatus::Completed,
            buffer: vec![7u8; 4],
            actual_length: 10,
            resolved_at: Instant::now(),
        };
        assert_eq!(completion.data(), &[7, 7, 7, 7]);
    }

    #[test]
    fn test_heap_allocator() {
        let buffer = HeapAllocator.allocate(4096).unwrap();
        assert_eq!(buffer.len(), 4096);
        assert!(buffer.iter().all(|&b| b == 0));
    }
}
