//! Error types for GPSD sessions and report decoding
//!
//! Every failure the crate reports is a [`GpsdError`]. Callers that only care
//! about the category of a failure can branch on [`GpsdError::kind`].
//!
//! ```
//! use gpsd_stream::error::{ErrorKind, GpsdError};
//!
//! let err = GpsdError::SessionClosed;
//! assert_eq!(err.kind(), ErrorKind::SessionClosed);
//! assert!(err.is_terminal());
//! ```

use thiserror::Error;

/// Main error type for GPSD session operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GpsdError {
    /// The transport could not be established, or was lost while in use
    #[error("connection error ({context})")]
    Connection {
        /// What the session was doing when the transport failed
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A connect or read exceeded its configured deadline
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// GPSD replied in a way the protocol does not allow at this point
    #[error("protocol error: {0}")]
    Protocol(String),

    /// GPSD speaks a protocol major version this client does not understand
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedProtocolVersion { major: i32, minor: i32 },

    /// A single record could not be decoded
    ///
    /// This is the only non-terminal error: the stream carries on with the
    /// next record.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The session is closed (or failed to connect) and cannot be used
    #[error("session is closed")]
    SessionClosed,
}

/// Coarse category of a [`GpsdError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// [`GpsdError::Connection`]
    Connection,
    /// [`GpsdError::Timeout`]
    Timeout,
    /// [`GpsdError::Protocol`] or [`GpsdError::UnsupportedProtocolVersion`]
    Protocol,
    /// [`GpsdError::Decode`]
    Decode,
    /// [`GpsdError::SessionClosed`]
    SessionClosed,
}

impl GpsdError {
    /// Classifies an I/O failure that happened during `context`.
    ///
    /// Timed-out reads surface as `WouldBlock` on some platforms, so both
    /// kinds map to [`GpsdError::Timeout`].
    pub(crate) fn from_io(context: impl Into<String>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => GpsdError::Timeout {
                operation: context.into(),
            },
            _ => GpsdError::Connection {
                context: context.into(),
                source: err,
            },
        }
    }

    /// Returns the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpsdError::Connection { .. } => ErrorKind::Connection,
            GpsdError::Timeout { .. } => ErrorKind::Timeout,
            GpsdError::Protocol(_) | GpsdError::UnsupportedProtocolVersion { .. } => {
                ErrorKind::Protocol
            }
            GpsdError::Decode(_) => ErrorKind::Decode,
            GpsdError::SessionClosed => ErrorKind::SessionClosed,
        }
    }

    /// Returns whether this error ends the stream it was raised on
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GpsdError::Decode(_))
    }
}

/// Failure to turn one raw record into a report
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The frame is not UTF-8 text
    #[error("record is not valid UTF-8")]
    Utf8(#[source] std::string::FromUtf8Error),

    /// The frame is not well-formed JSON
    #[error("record is not well-formed JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// The frame is JSON, but not an object
    #[error("record is not a JSON object")]
    NotAnObject,

    /// The object has no usable `class` discriminator
    #[error("record has no non-empty `class` field")]
    MissingClass,

    /// A timestamp field failed to convert under the strict policy
    #[error("field `{field}` is not an ISO-8601 timestamp: {value}")]
    Timestamp {
        field: String,
        value: serde_json::Value,
    },

    /// The report does not fit the typed schema of its class
    #[error("{class} report does not match its schema: {source}")]
    Schema {
        class: String,
        #[source]
        source: serde_json::Error,
    },
}
