//! Flat, serialisable client configuration
//!
//! [`ClientConfig`] gathers every option a session and its report stream
//! recognise into one record, so callers can load it from a file or build it
//! from command-line arguments and project it onto the builder types.
//!
//! ```
//! use gpsd_stream::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::from_json(r#"{"port":2948,"filter":["TPV"],"read_timeout":1.5}"#)?;
//! assert_eq!(config.endpoint().host(), "127.0.0.1");
//! assert_eq!(config.endpoint().port(), 2948);
//! assert_eq!(config.session_options().read_timeout_value(), Some(Duration::from_millis(1500)));
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as, skip_serializing_none};

use crate::client::{
    DEFAULT_HOST, DEFAULT_PORT, Endpoint, MalformedPolicy, ReportOptions, SessionOptions,
    blocking,
};
use crate::report::TimestampPolicy;

/// Every recognised option; missing keys take their defaults
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Defaults to [`DEFAULT_HOST`]
    pub host: String,
    /// Defaults to [`DEFAULT_PORT`]
    pub port: u16,
    /// Watch only this device
    pub device: Option<String>,
    /// Report classes to keep; empty keeps everything
    pub filter: Vec<String>,
    /// Convert `time`/`activated` fields to `DateTime<Utc>`
    pub convert_timestamps: bool,
    /// Reject reports whose timestamps do not parse
    pub strict_timestamps: bool,
    /// Log and drop malformed records instead of surfacing them
    pub skip_malformed: bool,
    /// Seconds, fractional allowed
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub connect_timeout: Option<Duration>,
    /// Seconds, fractional allowed
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            device: None,
            filter: Vec::new(),
            convert_timestamps: false,
            strict_timestamps: false,
            skip_malformed: false,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON object; unknown keys are ignored
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Where to connect, scoped to `device` when set
    pub fn endpoint(&self) -> Endpoint {
        let endpoint = Endpoint::new(self.host.clone(), self.port);
        match &self.device {
            Some(device) => endpoint.device(device.clone()),
            None => endpoint,
        }
    }

    /// Connect and read deadlines
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
    }

    /// Filter, timestamp and malformed-record handling for report streams
    pub fn report_options(&self) -> ReportOptions {
        let policy = if self.strict_timestamps {
            TimestampPolicy::Strict
        } else {
            TimestampPolicy::Lenient
        };
        let malformed = if self.skip_malformed {
            MalformedPolicy::Skip
        } else {
            MalformedPolicy::Surface
        };

        ReportOptions::new()
            .filter(self.filter.iter().cloned())
            .convert_timestamps(self.convert_timestamps)
            .timestamp_policy(policy)
            .malformed(malformed)
    }

    /// An idle blocking session for this configuration
    pub fn session(&self) -> blocking::Session<TcpStream> {
        blocking::Session::with_options(self.endpoint(), self.session_options())
    }
}
