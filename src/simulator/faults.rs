//! Scripted faults for the simulated device.
//!
//! Completion faults are keyed on the number of data completions the device
//! has already delivered: `StallAfter(2)` lets two transfers through and
//! reports the third as stalled. Each completion fault fires once.

use std::time::Duration;

use crate::transfer::TransferStatus;

/// One injected fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// Report an endpoint stall after `n` good transfers
    StallAfter(u64),
    /// Report an overflow after `n` good transfers
    OverflowAfter(u64),
    /// Unplug the device after `n` good transfers
    DisconnectAfter(u64),
    /// Fail one transfer with a generic error after `n` good transfers
    ErrorAfter(u64),
    /// Complete one transfer with no data after `n` good transfers
    ZeroLengthAfter(u64),
    /// Complete one transfer with only `len` bytes after `after` good transfers
    ShortReadAfter {
        /// Good transfers before the short one
        after: u64,
        /// Bytes delivered by the short transfer
        len: usize,
    },
    /// Hold every completion back for `delay` after `after` good transfers
    DelayAfter {
        /// Good transfers before the delay
        after: u64,
        /// Extra latency added to the link
        delay: Duration,
    },
    /// Reject submissions larger than this many bytes as out of memory
    SubmitNoMemoryAbove(usize),
    /// Reject submissions as out of memory once this many are in flight
    MaxInFlight(usize),
    /// Reject every submission with a non-recoverable error
    SubmitFails,
    /// Fail the remote start command
    RemoteStartFails,
    /// Fail the remote stop command
    RemoteStopFails,
}

/// How a scripted fault rewrites one data completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionFault {
    Status(TransferStatus),
    Truncate(usize),
}

impl FaultScenario {
    /// The completion rewrite this scenario applies at `delivered`, if any.
    pub(crate) fn completion_fault(&self, delivered: u64) -> Option<CompletionFault> {
        let (after, fault) = match *self {
            Self::StallAfter(n) => (n, CompletionFault::Status(TransferStatus::Stall)),
            Self::OverflowAfter(n) => (n, CompletionFault::Status(TransferStatus::Overflow)),
            Self::DisconnectAfter(n) => (n, CompletionFault::Status(TransferStatus::NoDevice)),
            Self::ErrorAfter(n) => (n, CompletionFault::Status(TransferStatus::Error)),
            Self::ZeroLengthAfter(n) => (n, CompletionFault::Truncate(0)),
            Self::ShortReadAfter { after, len } => (after, CompletionFault::Truncate(len)),
            _ => return None,
        };
        (after == delivered).then_some(fault)
    }

    /// Extra link latency once `delivered` transfers have gone through.
    pub(crate) fn delay_at(&self, delivered: u64) -> Option<Duration> {
        match *self {
            Self::DelayAfter { after, delay } if delivered >= after => Some(delay),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_fault_fires_once() {
        let stall = FaultScenario::StallAfter(2);
        assert_eq!(stall.completion_fault(1), None);
        assert_eq!(
            stall.completion_fault(2),
            Some(CompletionFault::Status(TransferStatus::Stall))
        );
        assert_eq!(stall.completion_fault(3), None);
    }

    #[test]
    fn test_submit_faults_do_not_rewrite_completions() {
        assert_eq!(FaultScenario::SubmitNoMemoryAbove(1).completion_fault(0), None);
        assert_eq!(FaultScenario::RemoteStartFails.delay_at(10), None);
    }

    #[test]
    fn test_delay_applies_from_threshold() {
        let delay = FaultScenario::DelayAfter {
            after: 3,
            delay: Duration::from_millis(50),
        };
        assert_eq!(delay.delay_at(2), None);
        assert_eq!(delay.delay_at(3), Some(Duration::from_millis(50)));
        assert_eq!(delay.delay_at(9), Some(Duration::from_millis(50)));
    }
}
