//! Timetable records produced by provider scripts.
//!
//! A script pushes one record per departure, journey or stop suggestion.
//! Records are ordered maps from a fixed set of information keys to typed
//! values; the engine publishes them in batches while the job is still
//! running.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use super::request::RequestKind;

/// Error returned when a script uses an information key the engine does not
/// know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown information key: {0}")]
pub struct UnknownInfoKey(pub String);

/// The fixed set of information keys a record may carry.
///
/// The `Ord` derive fixes the order keys appear in when a record is
/// iterated, independent of the order the script inserted them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InfoKey {
    // Timetable items
    DepartureDateTime,
    ArrivalDateTime,
    TypeOfVehicle,
    TransportLine,
    Target,
    Delay,
    DelayReason,
    Platform,
    Operator,
    JourneyNews,
    Status,
    RouteStops,
    RouteTimes,
    IsNightLine,
    // Journeys
    StartStopName,
    TargetStopName,
    Duration,
    Changes,
    Pricing,
    // Stop suggestions
    StopName,
    StopId,
    StopCity,
    StopLongitude,
    StopLatitude,
    StopWeight,
}

impl InfoKey {
    /// The script-facing name of this key.
    pub fn name(self) -> &'static str {
        match self {
            InfoKey::DepartureDateTime => "DepartureDateTime",
            InfoKey::ArrivalDateTime => "ArrivalDateTime",
            InfoKey::TypeOfVehicle => "TypeOfVehicle",
            InfoKey::TransportLine => "TransportLine",
            InfoKey::Target => "Target",
            InfoKey::Delay => "Delay",
            InfoKey::DelayReason => "DelayReason",
            InfoKey::Platform => "Platform",
            InfoKey::Operator => "Operator",
            InfoKey::JourneyNews => "JourneyNews",
            InfoKey::Status => "Status",
            InfoKey::RouteStops => "RouteStops",
            InfoKey::RouteTimes => "RouteTimes",
            InfoKey::IsNightLine => "IsNightLine",
            InfoKey::StartStopName => "StartStopName",
            InfoKey::TargetStopName => "TargetStopName",
            InfoKey::Duration => "Duration",
            InfoKey::Changes => "Changes",
            InfoKey::Pricing => "Pricing",
            InfoKey::StopName => "StopName",
            InfoKey::StopId => "StopID",
            InfoKey::StopCity => "StopCity",
            InfoKey::StopLongitude => "StopLongitude",
            InfoKey::StopLatitude => "StopLatitude",
            InfoKey::StopWeight => "StopWeight",
        }
    }

    /// All keys, in record order.
    pub fn all() -> &'static [InfoKey] {
        use InfoKey::*;
        &[
            DepartureDateTime,
            ArrivalDateTime,
            TypeOfVehicle,
            TransportLine,
            Target,
            Delay,
            DelayReason,
            Platform,
            Operator,
            JourneyNews,
            Status,
            RouteStops,
            RouteTimes,
            IsNightLine,
            StartStopName,
            TargetStopName,
            Duration,
            Changes,
            Pricing,
            StopName,
            StopId,
            StopCity,
            StopLongitude,
            StopLatitude,
            StopWeight,
        ]
    }
}

impl FromStr for InfoKey {
    type Err = UnknownInfoKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InfoKey::all()
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| UnknownInfoKey(s.to_string()))
    }
}

impl fmt::Display for InfoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed value attached to an information key.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
    TextList(Vec<String>),
}

impl RecordValue {
    /// The value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RecordValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a date-time, if it is one.
    pub fn as_date_time(&self) -> Option<NaiveDateTime> {
        match self {
            RecordValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<String> for RecordValue {
    fn from(s: String) -> Self {
        RecordValue::Text(s)
    }
}

impl From<&str> for RecordValue {
    fn from(s: &str) -> Self {
        RecordValue::Text(s.to_string())
    }
}

impl From<i64> for RecordValue {
    fn from(i: i64) -> Self {
        RecordValue::Integer(i)
    }
}

impl From<f64> for RecordValue {
    fn from(f: f64) -> Self {
        RecordValue::Float(f)
    }
}

impl From<bool> for RecordValue {
    fn from(b: bool) -> Self {
        RecordValue::Boolean(b)
    }
}

impl From<NaiveDateTime> for RecordValue {
    fn from(dt: NaiveDateTime) -> Self {
        RecordValue::DateTime(dt)
    }
}

/// One parsed timetable item.
///
/// Built by the script, handed to the collector by value and never mutated
/// afterwards; the script must build a fresh record per item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimetableRecord {
    values: BTreeMap<InfoKey, RecordValue>,
}

impl TimetableRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous value for the key.
    pub fn set(&mut self, key: InfoKey, value: impl Into<RecordValue>) {
        self.values.insert(key, value.into());
    }

    /// Get the value for a key.
    pub fn get(&self, key: InfoKey) -> Option<&RecordValue> {
        self.values.get(&key)
    }

    /// Whether the record carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values in the record.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Iterate the record's values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (InfoKey, &RecordValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Request-window metadata attached once per batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalTimetableInfo {
    /// Whether the provider limits results to the requested date.
    pub date_limited: bool,

    /// The time the request asked for, echoed back for the consumer.
    pub requested_time: Option<NaiveDateTime>,
}

/// A group of records published together before job completion.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// The kind of request that produced these records.
    pub kind: RequestKind,

    /// The records, in the order the script produced them.
    pub records: Vec<TimetableRecord>,

    /// Window metadata for the whole batch.
    pub info: GlobalTimetableInfo,
}

impl ResultBatch {
    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
