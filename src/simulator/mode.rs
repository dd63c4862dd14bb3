//! Delivery modes for the simulated device.
//!
//! - **Instant**: every pending request is filled on the next poll
//! - **Realistic**: requests are filled in order at the configured link rate
//! - **Chaos**: instant delivery with randomly truncated transfers

/// How the simulated device fills submitted requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Link-rate timing - for integration tests and the capture tool
    Realistic,
    /// Random short reads - for resilience testing
    Chaos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }
}
