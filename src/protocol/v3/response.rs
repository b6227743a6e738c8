//! Typed views over GPSD v3 reports
//!
//! Only the classes a typical client branches on get a typed shape here;
//! everything else decodes to [`Message::Other`]. Unknown fields are
//! ignored, so newer GPSD releases keep decoding.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::*;

/// Time-Position-Velocity (TPV) report
///
/// Reference: [json_tpv_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c?ref_type=heads#L34)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tpv {
    pub device: Option<String>,
    #[serde(default)]
    pub mode: FixMode,
    pub status: Option<FixStatus>,
    /// Time of fix
    pub time: Option<DateTime<Utc>>,
    /// Degrees, positive north
    pub lat: Option<f64>,
    /// Degrees, positive east
    pub lon: Option<f64>,
    /// Height above ellipsoid, meters
    #[serde(rename = "altHAE")]
    pub alt_hae: Option<f64>,
    /// Height above mean sea level, meters
    #[serde(rename = "altMSL")]
    pub alt_msl: Option<f64>,
    /// Meters per second over ground
    pub speed: Option<f64>,
    /// Course over ground, degrees from true north
    pub track: Option<f64>,
    /// Meters per second, positive up
    pub climb: Option<f64>,
    /// Estimated errors: time (s), horizontal (m), vertical (m), speed (m/s)
    pub ept: Option<f64>,
    pub eph: Option<f64>,
    pub epv: Option<f64>,
    pub eps: Option<f64>,
    pub leapseconds: Option<i32>,
}

/// Satellite sky view (SKY) report
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sky {
    pub device: Option<String>,
    pub time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub dop: Dop,
    #[serde(rename = "nSat")]
    pub n_sat: Option<u32>,
    #[serde(rename = "uSat")]
    pub u_sat: Option<u32>,
    #[serde(default)]
    pub satellites: Vec<Satellite>,
}

impl Sky {
    /// Satellites that contribute to the current solution
    pub fn used(&self) -> impl Iterator<Item = &Satellite> {
        self.satellites.iter().filter(|sat| sat.used)
    }
}

/// Pseudorange noise statistics (GST), all one-sigma
///
/// Reference: [json_noise_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c?ref_type=heads#L175)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gst {
    pub device: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub rms: Option<f64>,
    pub major: Option<f64>,
    pub minor: Option<f64>,
    pub orient: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
}

/// Daemon version, sent unprompted on connect
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Version {
    pub release: String,
    #[serde(default)]
    pub rev: String,
    pub proto_major: i32,
    pub proto_minor: i32,
    pub remote: Option<String>,
}

/// Receivers known to the daemon, sent in reply to `?WATCH`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<ListedDevice>,
}

/// DEVICES entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListedDevice {
    pub path: Option<String>,
    /// See [`Device::activated`]
    #[serde(default, deserialize_with = "flexible_time")]
    pub activated: Option<DateTime<Utc>>,
    pub flags: Option<SeenFlags>,
    pub driver: Option<String>,
}

/// Error notice from the daemon, e.g. for a malformed command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Error {
    pub message: String,
}

/// GPSD report, discriminated by its "class" field
/// - [libgps_json_unpack](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/libgps_json.c#L792)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "class", rename_all = "UPPERCASE")]
pub enum Message {
    Tpv(Tpv),
    Sky(Sky),
    Gst(Gst),
    Version(Version),
    Devices(DeviceList),
    Device(Device),
    Watch(Watch),
    Error(Error),
    /// Any class without a typed view
    #[serde(other)]
    Other,
}
