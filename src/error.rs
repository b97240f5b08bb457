//! Error types for the synchronization engine.
//!
//! The taxonomy follows the failure surface of the pipeline:
//!
//! - **Decode errors**: one malformed wire message — skip it, log, continue
//! - **Version mismatch**: the only fatal condition; no safe interpretation
//!   of the payload exists, so the connection must be torn down
//! - **Query outcomes**: `NotSynchronized` and `ChannelMissing` are normal
//!   results of read-side calls, modeled as error variants the caller
//!   matches on ("try again" outcomes, not failures)
//! - **Transport errors**: timeouts and I/O failures from the socket loop
//!
//! Use [`SyncError::is_fatal`] to decide whether a connection survives an
//! error:
//!
//! ```rust
//! use simsync::SyncError;
//!
//! let err = SyncError::decode("unexpected end of input");
//! assert!(!err.is_fatal());
//!
//! let err = SyncError::VersionMismatch { expected: "2.1".into(), found: "1.0".into() };
//! assert!(err.is_fatal());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for synchronization operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Main error type for the synchronization engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("Failed to decode wire message: {details}")]
    Decode { details: String },

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Channels not synchronized: spread {spread} exceeds max skew {max_skew}")]
    NotSynchronized { spread: i64, max_skew: i64 },

    #[error("Channel '{channel}' has no stored state")]
    ChannelMissing { channel: String },

    #[error("Read timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Transport I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,
}

impl SyncError {
    /// Whether this error must terminate the connection.
    ///
    /// Everything except a protocol version mismatch degrades gracefully:
    /// decode errors discard one message, query outcomes are retried by the
    /// caller, transport errors are the transport layer's problem.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::VersionMismatch { .. })
    }

    /// Whether this error is a normal read-side query outcome rather than
    /// a pipeline failure.
    pub fn is_query_outcome(&self) -> bool {
        matches!(self, SyncError::NotSynchronized { .. } | SyncError::ChannelMissing { .. })
    }

    /// Helper constructor for decode errors.
    pub fn decode(details: impl Into<String>) -> Self {
        SyncError::Decode { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        SyncError::Config { details: details.into() }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode { details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_mismatch_is_fatal() {
        assert!(
            SyncError::VersionMismatch { expected: "2.1".into(), found: "1.9".into() }.is_fatal()
        );
        assert!(!SyncError::decode("bad json").is_fatal());
        assert!(!SyncError::NotSynchronized { spread: 30, max_skew: 10 }.is_fatal());
        assert!(!SyncError::ConnectionClosed.is_fatal());
        assert!(!SyncError::Timeout { duration: Duration::from_secs(2) }.is_fatal());
    }

    #[test]
    fn query_outcomes_are_classified() {
        assert!(SyncError::NotSynchronized { spread: 5, max_skew: 1 }.is_query_outcome());
        assert!(SyncError::ChannelMissing { channel: "STATS".into() }.is_query_outcome());
        assert!(!SyncError::decode("x").is_query_outcome());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<SyncError>();

        let error = SyncError::decode("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn json_errors_convert_to_decode() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: SyncError = err.into();
        assert!(matches!(converted, SyncError::Decode { .. }));
    }
}
