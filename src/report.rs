//! Schema-light decoding of GPSD reports
//!
//! A [`Report`] is the JSON object of one frame plus its `class`
//! discriminator. Fields stay untyped, except for the recognised timestamp
//! fields, which can be converted to `DateTime<Utc>` on request. Typed
//! per-class views are available through [`Report::into_message`].
//!
//! # Example
//! ```
//! use gpsd_stream::report::{DecodeOptions, Report};
//!
//! let record = r#"{"class":"TPV","time":"2024-01-01T00:00:00.000Z","lat":1.0}"#;
//! let report = Report::decode_with(record, &DecodeOptions::new().convert_timestamps(true))?;
//!
//! assert_eq!(report.class(), "TPV");
//! assert_eq!(report.get_f64("lat"), Some(1.0));
//! assert!(report.time("time").is_some());
//! # Ok::<(), gpsd_stream::error::DecodeError>(())
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::trace;

use crate::{error::DecodeError, protocol::v3};

pub mod filter;

pub use filter::FilterSet;

/// Field names holding ISO-8601 timestamps in GPSD reports
///
/// `time` appears in TPV, SKY, GST, ATT and friends; `activated` in DEVICE.
pub const TIMESTAMP_FIELDS: &[&str] = &["time", "activated"];

/// What to do when a timestamp field does not parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimestampPolicy {
    /// Keep the field in its original form and return the report anyway
    #[default]
    Lenient,
    /// Reject the whole report with [`DecodeError::Timestamp`]
    Strict,
}

/// Decoding options for [`Report::decode_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DecodeOptions {
    convert_timestamps: bool,
    timestamp_policy: TimestampPolicy,
}

impl DecodeOptions {
    /// Timestamps left as text, lenient policy when converting
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts recognised timestamp fields to `DateTime<Utc>`
    pub fn convert_timestamps(mut self, enable: bool) -> Self {
        self.convert_timestamps = enable;
        self
    }

    /// What to do with a timestamp that does not parse
    pub fn timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = policy;
        self
    }

    /// Whether timestamp fields get converted
    pub fn converts_timestamps(&self) -> bool {
        self.convert_timestamps
    }

    /// The timestamp failure policy
    pub fn policy(&self) -> TimestampPolicy {
        self.timestamp_policy
    }
}

/// One decoded GPSD report
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    class: String,
    fields: Map<String, Value>,
    timestamps: BTreeMap<String, DateTime<Utc>>,
}

impl Report {
    /// Parses one raw record, leaving every field untyped
    pub fn decode(record: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(record).map_err(DecodeError::Json)?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let class = match fields.get("class") {
            Some(Value::String(class)) if !class.is_empty() => class.clone(),
            _ => return Err(DecodeError::MissingClass),
        };

        Ok(Report {
            class,
            fields,
            timestamps: BTreeMap::new(),
        })
    }

    /// Parses one raw record and applies `options`
    pub fn decode_with(record: &str, options: &DecodeOptions) -> Result<Self, DecodeError> {
        let mut report = Self::decode(record)?;
        if options.converts_timestamps() {
            report.convert_timestamps(options.policy())?;
        }
        Ok(report)
    }

    /// Moves every parseable timestamp field out of the JSON object and into
    /// the timestamp map
    ///
    /// Under [`TimestampPolicy::Strict`] the first field that fails to parse
    /// is returned as an error; fields converted before it stay converted.
    pub fn convert_timestamps(&mut self, policy: TimestampPolicy) -> Result<(), DecodeError> {
        for &name in TIMESTAMP_FIELDS {
            let parsed = match self.fields.get(name) {
                None => continue,
                Some(value) => parse_timestamp(value).ok_or_else(|| value.clone()),
            };

            match parsed {
                Ok(time) => {
                    self.fields.remove(name);
                    self.timestamps.insert(name.to_owned(), time);
                }
                Err(value) if policy == TimestampPolicy::Strict => {
                    return Err(DecodeError::Timestamp {
                        field: name.to_owned(),
                        value,
                    });
                }
                Err(value) => {
                    trace!(class = %self.class, field = name, %value, "keeping unparseable timestamp");
                }
            }
        }
        Ok(())
    }

    /// The report class, e.g. `"TPV"`
    pub fn class(&self) -> &str {
        &self.class
    }

    /// An untyped field; converted timestamps are not here, see [`Report::time`]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// A numeric field as `f64`
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// A string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// A converted timestamp field
    pub fn time(&self, field: &str) -> Option<DateTime<Utc>> {
        self.timestamps.get(field).copied()
    }

    /// The untyped fields, `class` included
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The converted timestamp fields
    pub fn timestamps(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.timestamps
    }

    /// The report as one JSON object, timestamps rendered back to RFC 3339
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        for (name, time) in &self.timestamps {
            fields.insert(
                name.clone(),
                Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            );
        }
        Value::Object(fields)
    }

    /// Refines the report into its typed per-class view
    pub fn into_message(self) -> Result<v3::ResponseMessage, DecodeError> {
        let class = self.class.clone();
        serde_json::from_value(self.to_value())
            .map_err(|source| DecodeError::Schema { class, source })
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
