//! Link probe: find a bulk transfer size the host can actually sustain.
//!
//! Host controller drivers reject over-large bulk requests (or too many
//! pending bytes) without advertising a limit, so the size is discovered
//! empirically. Starting from the payload that covers the planning duration
//! at the configured sample rate, the probe tries to allocate a buffer and
//! submit a single request with it. Allocation failure or an out-of-memory
//! submission halves the size and tries again. The first size that is
//! accepted is cancelled, drained, and halved once more as a safety margin.
//!
//! Every size the probe tries or accepts is a multiple of the block size and
//! at least the configured floor.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AcquisitionConfig;
use crate::error::{Result, SlogicError};
use crate::model::AcquisitionParams;
use crate::transfer::{AsyncBulkReader, BufferAllocator};

/// Accepted per-request sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPlan {
    /// Bytes requested by every bulk transfer
    pub payload_bytes: usize,
    /// Time the device needs to produce one payload, in milliseconds
    pub duration_ms: u64,
}

/// Round `n` up to a multiple of `block` (a power of two).
pub fn round_up(n: usize, block: usize) -> usize {
    (n + (block - 1)) & !(block - 1)
}

/// Round `n` down to a multiple of `block` (a power of two).
pub fn round_down(n: usize, block: usize) -> usize {
    n & !(block - 1)
}

/// Milliseconds the device needs to fill `payload` bytes, rounded up, at least 1.
pub fn duration_for(payload: usize, params: &AcquisitionParams) -> u64 {
    let bits_per_ms = params.samplerate * u64::from(params.channels) / 1000;
    if bits_per_ms == 0 {
        return 1;
    }
    (payload as u64 * 8).div_ceil(bits_per_ms).max(1)
}

enum Attempt {
    Accepted,
    Shrink,
}

/// One-shot transfer size discovery.
#[derive(Debug, Clone)]
pub struct LinkProbe {
    planning_duration_ms: u64,
    block_size: usize,
    floor: usize,
    drain_timeout: Duration,
}

impl LinkProbe {
    /// Create a probe from the engine configuration.
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            planning_duration_ms: config.planning_duration_ms,
            block_size: config.block_size,
            floor: config.min_payload_bytes,
            drain_timeout: config.probe_drain_timeout(),
        }
    }

    /// Payload covering the planning duration, rounded up to the block size.
    pub fn initial_payload(&self, params: &AcquisitionParams) -> usize {
        let bytes = self.planning_duration_ms * params.samplerate * u64::from(params.channels)
            / 8
            / 1000;
        let bytes = usize::try_from(bytes).unwrap_or(usize::MAX / 2);
        round_up(bytes, self.block_size).max(self.floor)
    }

    /// Probe starting from the planning payload.
    pub fn run<R>(
        &self,
        reader: &mut R,
        allocator: &dyn BufferAllocator,
        params: &AcquisitionParams,
    ) -> Result<LinkPlan>
    where
        R: AsyncBulkReader + ?Sized,
    {
        self.run_from(reader, allocator, params, self.initial_payload(params))
    }

    /// Probe starting from an explicit payload size.
    pub fn run_from<R>(
        &self,
        reader: &mut R,
        allocator: &dyn BufferAllocator,
        params: &AcquisitionParams,
        initial: usize,
    ) -> Result<LinkPlan>
    where
        R: AsyncBulkReader + ?Sized,
    {
        let mut payload = round_up(initial, self.block_size).max(self.floor);

        loop {
            debug!(
                payload,
                duration_ms = duration_for(payload, params),
                "Plan to receive"
            );

            match self.attempt(reader, allocator, payload)? {
                Attempt::Accepted => {
                    let accepted = round_down(payload / 2, self.block_size).max(self.floor);
                    let plan = LinkPlan {
                        payload_bytes: accepted,
                        duration_ms: duration_for(accepted, params),
                    };
                    info!(
                        payload = plan.payload_bytes,
                        duration_ms = plan.duration_ms,
                        "Accepted link plan"
                    );
                    return Ok(plan);
                }
                Attempt::Shrink => {
                    if payload <= self.floor {
                        warn!(floor = self.floor, "Link probe exhausted");
                        return Err(SlogicError::ProbeExhausted { floor: self.floor });
                    }
                    payload = round_up(payload / 2, self.block_size).max(self.floor);
                }
            }
        }
    }

    fn attempt<R>(
        &self,
        reader: &mut R,
        allocator: &dyn BufferAllocator,
        payload: usize,
    ) -> Result<Attempt>
    where
        R: AsyncBulkReader + ?Sized,
    {
        let Some(buffer) = allocator.allocate(payload) else {
            debug!(payload, "Failed to allocate probe buffer, halving");
            return Ok(Attempt::Shrink);
        };

        // Zero timeout: the probe request never expires on its own
        let handle = match reader.submit(buffer, Duration::ZERO) {
            Ok(handle) => handle,
            Err(e) if e.is_out_of_resources() => {
                debug!(payload, error = %e, "Probe submission out of resources, halving");
                return Ok(Attempt::Shrink);
            }
            Err(e) => {
                warn!(payload, error = %e, "Probe submission failed");
                return Err(SlogicError::Submit(e));
            }
        };

        if let Err(e) = reader.cancel(handle) {
            debug!(%handle, error = %e, "Failed to cancel probe request");
        }

        let deadline = Instant::now() + self.drain_timeout;
        let mut returned = false;
        while !returned {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            returned = reader
                .poll_completions(deadline - now)
                .into_iter()
                .any(|c| c.handle == handle);
        }
        if !returned {
            warn!(%handle, "Probe request still pending after drain timeout");
        }

        Ok(Attempt::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PatternMode;

    fn params(samplerate: u64, channels: u32) -> AcquisitionParams {
        AcquisitionParams {
            limit_samples: 0,
            channels,
            samplerate,
            pattern_mode: PatternMode::Normal,
        }
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_up(1, 32768), 32768);
        assert_eq!(round_up(32768, 32768), 32768);
        assert_eq!(round_up(500_000, 32768), 524_288);
        assert_eq!(round_down(65535, 32768), 32768);
        assert_eq!(round_down(16384, 32768), 0);
    }

    #[test]
    fn test_initial_payload() {
        let probe = LinkProbe::new(&AcquisitionConfig::default());
        // 125 ms × 4 MHz × 8 ch / 8 = 500 000 bytes → 16 blocks
        assert_eq!(probe.initial_payload(&params(4_000_000, 8)), 524_288);
        // 125 ms × 1 MHz × 2 ch / 8 = 31 250 bytes → one block
        assert_eq!(probe.initial_payload(&params(1_000_000, 2)), 32_768);
    }

    #[test]
    fn test_duration_for() {
        // 4 MHz × 8 ch = 4000 bytes/ms; 32.768 ms rounds up
        assert_eq!(duration_for(131_072, &params(4_000_000, 8)), 33);
        assert_eq!(duration_for(262_144, &params(4_000_000, 8)), 66);
        // Exact multiples stay exact
        assert_eq!(duration_for(128_000, &params(4_000_000, 8)), 32);
        // Never zero, even on a fast link
        assert_eq!(duration_for(32_768, &params(1_600_000_000, 2)), 1);
    }
}
