//! Error types for SLogic acquisition.
//!
//! [`SlogicError`] covers the failures a caller of
//! [`Acquisition::start`](crate::Acquisition::start) can observe. Faults that
//! happen once streaming is armed never surface here; they end the stream
//! early and are reported through logging only.
//!
//! [`SubmitError`] is the narrower error a bulk reader returns when it
//! refuses a transfer. The probe and the pool recover from some of these
//! locally, so they are kept separate from the crate error.

use thiserror::Error;

/// Result type alias for SLogic operations.
pub type Result<T> = std::result::Result<T, SlogicError>;

/// Errors that can occur when driving an SLogic acquisition.
#[derive(Error, Debug)]
pub enum SlogicError {
    /// A device-side command round-trip failed
    #[error("Remote command `{command}` failed: {message}")]
    RemoteCommand {
        /// Command that was sent (`start`, `stop`)
        command: &'static str,
        /// Failure reported by the transport
        message: String,
    },

    /// The link probe shrank below the minimum payload without success
    #[error("No feasible transfer size at or above {floor} bytes")]
    ProbeExhausted {
        /// Smallest payload the probe was allowed to try
        floor: usize,
    },

    /// Transfer submission failed in a way that cannot be recovered
    #[error("Transfer submission failed: {0}")]
    Submit(#[from] SubmitError),

    /// An acquisition is already active on this engine
    #[error("Acquisition already running (state: {state})")]
    Busy {
        /// State the engine was in when start was requested
        state: String,
    },

    /// The USB device went away
    #[error("Device disconnected")]
    Disconnected,

    /// I/O error with message
    #[error("I/O error: {message}")]
    IoError {
        /// Error description
        message: String,
    },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// Configuration file or environment could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl SlogicError {
    /// Shorthand for a remote command failure.
    pub fn remote(command: &'static str, message: impl Into<String>) -> Self {
        Self::RemoteCommand {
            command,
            message: message.into(),
        }
    }

    /// Shorthand for an invalid configuration.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check if this is a device-side command failure.
    pub fn is_remote_command(&self) -> bool {
        matches!(self, Self::RemoteCommand { .. })
    }

    /// Check if the engine refused to start because it is already running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Check if the error is an I/O class failure (probe, submission, OS).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::ProbeExhausted { .. }
                | Self::Submit(_)
                | Self::Disconnected
                | Self::IoError { .. }
                | Self::StdIoError(_)
        )
    }
}

/// Reasons a bulk reader may refuse to submit a transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Host controller or kernel ran out of memory for the request
    #[error("insufficient memory for transfer")]
    NoMemory,

    /// The device is gone
    #[error("no such device (it may have been disconnected)")]
    NoDevice,

    /// Endpoint is halted or busy
    #[error("endpoint busy")]
    Busy,

    /// The request handle is unknown to the reader
    #[error("request not found")]
    NotFound,

    /// Any other backend failure
    #[error("{0}")]
    Other(String),
}

impl SubmitError {
    /// Resource exhaustion is recoverable by shrinking the request.
    pub fn is_out_of_resources(&self) -> bool {
        matches!(self, Self::NoMemory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SlogicError::remote("start", "pipe error");
        assert!(err.to_string().contains("start"));
        assert!(err.to_string().contains("pipe error"));
        assert!(err.is_remote_command());
        assert!(!err.is_io());
    }

    #[test]
    fn test_probe_exhausted_is_io() {
        let err = SlogicError::ProbeExhausted { floor: 32 * 1024 };
        assert!(err.is_io());
        assert!(err.to_string().contains("32768"));
    }

    #[test]
    fn test_submit_error_classification() {
        assert!(SubmitError::NoMemory.is_out_of_resources());
        assert!(!SubmitError::NoDevice.is_out_of_resources());
        assert!(!SubmitError::Other("pipe".into()).is_out_of_resources());

        let err: SlogicError = SubmitError::NoDevice.into();
        assert!(err.is_io());
    }
}
