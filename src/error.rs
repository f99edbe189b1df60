//! Structural failures that abort a scan.
//!
//! Per-target connection failures are never reported here; they are folded
//! into the [`Outcome`](crate::scanner::Outcome) of the probe and the `open`
//! flag of the corresponding [`Device`](crate::device::Device).
use std::io;

use thiserror::Error;

/// Errors surfaced to the caller of a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The address expression could not be expanded into targets.
    #[error("invalid address range '{input}': {reason}")]
    InvalidRangeFormat {
        /// The expression as supplied by the caller.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A CIDR block holds more addresses than a single scan will enumerate.
    #[error("block '{input}' holds more than {limit} addresses")]
    BlockTooLarge {
        /// The block as supplied by the caller.
        input: String,
        /// The enumeration ceiling that was hit.
        limit: usize,
    },

    /// The open file descriptor ceiling could not be read.
    #[error("could not query the open file limit: {0}")]
    EnvironmentQueryFailed(#[source] io::Error),

    /// The concurrency limiter refused to hand out a permit.
    #[error("could not acquire a scan permit, the limiter was closed or cancelled")]
    PermitAcquisitionFailed,

    /// The scan was cancelled while probes were in flight.
    #[error("scan cancelled")]
    Cancelled,

    /// The scan configuration violates one of its invariants.
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    pub(crate) fn range(input: &str, reason: impl Into<String>) -> Self {
        ScanError::InvalidRangeFormat {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScanError;
    use std::error::Error;
    use std::io;

    #[test]
    fn range_error_names_the_input() {
        let err = ScanError::range("10.0.0.a-10.0.0.3", "bad octet");
        assert_eq!(
            err.to_string(),
            "invalid address range '10.0.0.a-10.0.0.3': bad octet"
        );
    }

    #[test]
    fn environment_error_keeps_source() {
        let err = ScanError::EnvironmentQueryFailed(io::Error::other("no rlimit"));
        assert!(err.source().is_some());
    }
}
