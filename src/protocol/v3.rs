//! GPSD JSON Protocol Version 3
//!
//! Wire constants, the `?WATCH` command, and typed views over the report
//! classes this client knows about. Reports themselves travel through the
//! crate as schema-light [`crate::report::Report`] values; these types are
//! the optional refinement reached through [`crate::report::Report::into_message`].
//!
//! # Protocol Overview
//!
//! - Commands start with '?' and end with ';'
//! - Responses are JSON objects with a "class" field indicating message type
//! - Data is streamed continuously once watch mode is enabled
//!
//! # References
//!
//! - [GPSD Protocol Documentation](https://gpsd.io/gpsd_json.html)

use crate::protocol::GpsdJsonRequest;

/// Typed response messages
pub mod response;
/// Data types shared by requests and responses
pub mod types;

/// Protocol major version this client speaks
///
/// Reference: [release-3.25](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/SConscript?ref_type=tags#L226)
pub const API_VERSION_MAJOR: i32 = 3;

/// Well-known TCP port GPSD listens on
pub const DEFAULT_PORT: u16 = 2947;

/// Type alias for version 3 response messages
pub type ResponseMessage = response::Message;

impl GpsdJsonRequest for types::Watch {
    /// `?WATCH={...};`, with unset fields omitted
    fn to_command(&self) -> serde_json::Result<String> {
        Ok(format!("?WATCH={};", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_commands() {
        let enable = types::Watch::json(None);
        assert_eq!(
            enable.to_command().unwrap(),
            r#"?WATCH={"enable":true,"json":true};"#
        );

        let scoped = types::Watch::json(Some("/dev/ttyUSB0"));
        assert_eq!(
            scoped.to_command().unwrap(),
            r#"?WATCH={"device":"/dev/ttyUSB0","enable":true,"json":true};"#
        );
    }
}
