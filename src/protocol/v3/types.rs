use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_repr::Deserialize_repr;
use serde_with::skip_serializing_none;

/// Fix dimension reported in TPV `mode`
/// * [gps_fix_t.mode](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/include/gps.h?ref_type=tags#L181)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize_repr)]
#[repr(i32)]
pub enum FixMode {
    #[default]
    NotSeen = 0,
    NoFix = 1,
    Fix2D = 2,
    Fix3D = 3,
}

impl FixMode {
    /// True for 2D and 3D fixes
    pub fn has_fix(self) -> bool {
        matches!(self, FixMode::Fix2D | FixMode::Fix3D)
    }
}

/// Augmentation behind a fix, TPV `status`
/// * [gps_fix_t.status](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/include/gps.h?ref_type=tags#L192)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize_repr)]
#[repr(i32)]
pub enum FixStatus {
    Unknown = 0,
    Gps = 1,
    DGps = 2,
    RtkFixed = 3,
    RtkFloat = 4,
    DeadReckoning = 5,
    GnssDeadReckoning = 6,
    /// surveyed in, time only
    Time = 7,
    Simulated = 8,
    PpsFix = 9,
}

bitflags::bitflags! {
    /// What kind of data a device has produced, DEVICE `flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeenFlags: u32 {
        const GPS = 0x01;
        const RTCM2 = 0x02;
        const RTCM3 = 0x04;
        const AIS = 0x08;
    }
}

impl<'de> Deserialize<'de> for SeenFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(SeenFlags::from_bits_truncate(bits))
    }
}

/// Dilution of precision, flattened into SKY
/// * [dop_t](https://gitlab.com/gpsd/gpsd/-/blob/release-3.25/include/gps.h?ref_type=tags#L2557)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Dop {
    #[serde(rename = "xdop")]
    pub x: Option<f64>,
    #[serde(rename = "ydop")]
    pub y: Option<f64>,
    #[serde(rename = "pdop")]
    pub p: Option<f64>,
    #[serde(rename = "hdop")]
    pub h: Option<f64>,
    #[serde(rename = "vdop")]
    pub v: Option<f64>,
    #[serde(rename = "tdop")]
    pub t: Option<f64>,
    #[serde(rename = "gdop")]
    pub g: Option<f64>,
}

/// One entry of SKY `satellites`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Satellite {
    #[serde(rename = "PRN")]
    pub prn: i16,
    #[serde(rename = "az")]
    pub azimuth: Option<f64>,
    #[serde(rename = "el")]
    pub elevation: Option<f64>,
    /// Signal strength, dB-Hz
    pub ss: Option<f64>,
    pub gnssid: Option<u8>,
    pub svid: Option<u16>,
    #[serde(default)]
    pub used: bool,
}

/// A receiver known to GPSD
/// - [json_device_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/shared_json.c#L28)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub path: Option<String>,
    /// Older daemons send fractional Unix seconds rather than an ISO-8601
    /// string; both are accepted
    #[serde(default, deserialize_with = "flexible_time")]
    pub activated: Option<DateTime<Utc>>,
    pub flags: Option<SeenFlags>,
    pub driver: Option<String>,
    pub subtype: Option<String>,
    pub bps: Option<u32>,
    pub cycle: Option<f64>,
}

/// Watch policy, sent with `?WATCH` and echoed back as a WATCH report
/// - [json_watch_read](https://gitlab.com/gpsd/gpsd/-/blob/master/libgps/shared_json.c#L95)
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub device: Option<String>,
    pub enable: Option<bool>,
    pub json: Option<bool>,
    pub nmea: Option<bool>,
    pub raw: Option<i32>,
    pub scaled: Option<bool>,
    pub split24: Option<bool>,
    pub pps: Option<bool>,
    pub timing: Option<bool>,
}

impl Watch {
    /// Policy that starts JSON streaming, optionally for one device only
    pub fn json(device: Option<&str>) -> Self {
        Watch {
            device: device.map(str::to_owned),
            enable: Some(true),
            json: Some(true),
            ..Default::default()
        }
    }

    /// Policy that stops streaming
    pub fn disable() -> Self {
        Watch {
            enable: Some(false),
            ..Default::default()
        }
    }

    /// True when GPSD confirms it is streaming
    pub fn is_enabled(&self) -> bool {
        self.enable == Some(true)
    }
}

/// Accepts an RFC 3339 string or fractional Unix seconds
pub(crate) fn flexible_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(iso)) => DateTime::parse_from_rfc3339(&iso)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Number(secs)) => {
            let secs = secs
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom("activated is out of range"))?;
            Ok(DateTime::<Utc>::from_timestamp(
                secs.trunc() as i64,
                (secs.fract() * 1e9) as u32,
            ))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid type for activated: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_flags_ignore_unknown_bits() {
        let flags: SeenFlags = serde_json::from_str("25").unwrap();
        assert_eq!(flags, SeenFlags::GPS | SeenFlags::AIS);
    }

    #[test]
    fn test_watch_ack_round_trip() {
        let ack: Watch =
            serde_json::from_str(r#"{"enable":true,"json":true,"nmea":false,"raw":0}"#).unwrap();
        assert!(ack.is_enabled());
        assert_eq!(ack.raw, Some(0));
        assert!(!Watch::disable().is_enabled());
        assert!(!Watch::default().is_enabled());
    }
}
