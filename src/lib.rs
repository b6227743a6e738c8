//! # gpsd-stream
//!
//! A streaming client for GPSD (the GPS Service Daemon) over its JSON
//! protocol.
//!
//! GPSD serves newline-delimited JSON reports on TCP port 2947 once a client
//! enables watch mode. This crate manages that session (connect, handshake,
//! teardown) and exposes the reports as an ordered stream, either as raw
//! text lines or decoded into [`report::Report`]s with optional class
//! filtering and timestamp conversion.
//!
//! ## Example
//!
//! ```no_run
//! use gpsd_stream::client::{Endpoint, ReportOptions, blocking::Session};
//!
//! let mut session = Session::new(Endpoint::default());
//! let options = ReportOptions::new().filter(["TPV"]).convert_timestamps(true);
//!
//! for report in session.report_stream(options) {
//!     let report = report?;
//!     println!("{:?}: {:?}, {:?}", report.time("time"), report.get_f64("lat"), report.get_f64("lon"));
//! }
//! # Ok::<(), gpsd_stream::GpsdError>(())
//! ```
//!
//! An async session over `futures-io` lives in [`client`]; with the default
//! `tokio` feature it can dial TCP itself and enforce timeouts.

/// Session lifecycle and report streams, async and blocking
pub mod client;

/// Serialisable client configuration
pub mod config;

/// Error types used throughout the library
pub mod error;

/// Line framing and protocol v3 messages
pub mod protocol;

/// Report decoding and class filtering
pub mod report;

pub use error::GpsdError;

/// Convenience type alias for Results with GpsdError
pub type Result<T, E = GpsdError> = core::result::Result<T, E>;
