//! # Position Module
//!
//! Canonical position record shared by both ingestion paths.
//!
//! Inbound data arrives either as NMEA fixes from a serial receiver or as JSON
//! measurements from the message bus. Both are modeled as a [`PositionReport`]
//! and normalized into one [`Position`] for storage. The broadcast JSON keeps
//! the two historical shapes apart, keyed by [`Source`].

pub mod normalizer;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;
use crate::geodesy::round_to;

pub use normalizer::PositionNormalizer;

/// Sentinel for fields the source does not report
pub const UNKNOWN: f64 = -1.0;

/// Decimals kept for coordinates received over the bus
pub const BUS_COORDINATE_DECIMALS: i32 = 5;

/// Timestamp format of the serial payload `datetime` field
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ingestion path a position came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Serial,
    Bus,
}

/// One position sample of a vehicle
///
/// A sample without a valid fix is the zeroed record built by
/// [`Position::no_fix`] and carries `has_fix == false`; fix validity is
/// all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Decimal degrees [-90, 90]
    pub latitude: f64,
    /// Decimal degrees [-180, 180]
    pub longitude: f64,
    pub speed_kmh: f64,
    /// Degrees [0, 360), or [`UNKNOWN`]
    pub course_deg: f64,
    /// Meters, or [`UNKNOWN`]
    pub altitude_m: f64,
    /// Meters from the previous fix, `None` when unknown
    pub distance_m: Option<f64>,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub source: Source,
    /// Raw NMEA sentence (serial path only)
    pub sentence: Option<String>,
    /// Particulate reading, [`UNKNOWN`] when not reported
    pub pm100: f64,
    /// Whether the receiver reported a valid fix
    pub has_fix: bool,
}

impl Position {
    /// Zeroed record signalling "fix lost"
    pub fn no_fix(source: Source, timestamp: i64, sentence: Option<String>) -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            speed_kmh: 0.0,
            course_deg: 0.0,
            altitude_m: UNKNOWN,
            distance_m: Some(0.0),
            timestamp,
            source,
            sentence,
            pm100: UNKNOWN,
            has_fix: false,
        }
    }

    pub fn is_no_fix(&self) -> bool {
        !self.has_fix
    }

    /// `datetime` string of the serial payload shape
    pub fn datetime(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Broadcast shape for positions received over the bus
#[derive(serde::Serialize)]
struct BusRecord {
    longitude: f64,
    latitude: f64,
    speed_kmh: f64,
    altitude_m: f64,
    course: f64,
    pm100: f64,
}

/// Broadcast shape for positions read from a serial receiver
#[derive(serde::Serialize)]
struct SerialRecord<'a> {
    latitude: f64,
    longitude: f64,
    speed: f64,
    distance: Option<f64>,
    nmea: Option<&'a str>,
    datetime: String,
    angle: f64,
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.source {
            Source::Bus => BusRecord {
                longitude: self.longitude,
                latitude: self.latitude,
                speed_kmh: self.speed_kmh,
                altitude_m: self.altitude_m,
                course: self.course_deg,
                pm100: self.pm100,
            }
            .serialize(serializer),
            Source::Serial => SerialRecord {
                latitude: self.latitude,
                longitude: self.longitude,
                speed: round_to(self.speed_kmh, 1),
                distance: self.distance_m.map(|d| round_to(d, 1)),
                nmea: self.sentence.as_deref(),
                datetime: self.datetime(),
                angle: round_to(self.course_deg, 1),
            }
            .serialize(serializer),
        }
    }
}

/// Vehicle identifier of the form `<TYPE>-<NUMBER>`, e.g. `CAEX-320`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `TYPE` prefix used as rendering category
    pub fn kind(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// True if the id has a non-empty `TYPE` and `NUMBER` around a `-`
    pub fn is_well_formed(&self) -> bool {
        matches!(self.0.split_once('-'), Some((kind, number)) if !kind.is_empty() && !number.is_empty())
    }
}

impl FromStr for VehicleId {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.contains('/') {
            return Err(TrackerError::MalformedPayload(format!("invalid vehicle id '{}'", s)));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound position in one of the two source schemas
#[derive(Debug, Clone, PartialEq)]
pub enum PositionReport {
    Serial(SerialReport),
    Bus(BusReport),
}

/// Normalized serial fix
#[derive(Debug, Clone, PartialEq)]
pub struct SerialReport {
    /// `None` when the sentence carried no usable fix
    pub fix: Option<SerialFix>,
    pub sentence: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerialFix {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub distance_m: Option<f64>,
}

/// Bus measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusReport {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub timestamp: i64,
}

impl From<PositionReport> for Position {
    fn from(report: PositionReport) -> Self {
        match report {
            PositionReport::Serial(SerialReport { fix: None, sentence, timestamp }) => {
                Position::no_fix(Source::Serial, timestamp, Some(sentence))
            }
            PositionReport::Serial(SerialReport { fix: Some(fix), sentence, timestamp }) => Position {
                latitude: fix.latitude,
                longitude: fix.longitude,
                speed_kmh: fix.speed_kmh,
                course_deg: fix.course_deg,
                altitude_m: UNKNOWN,
                distance_m: fix.distance_m,
                timestamp,
                source: Source::Serial,
                sentence: Some(sentence),
                pm100: UNKNOWN,
                has_fix: true,
            },
            PositionReport::Bus(bus) => Position {
                latitude: round_to(bus.latitude, BUS_COORDINATE_DECIMALS),
                longitude: round_to(bus.longitude, BUS_COORDINATE_DECIMALS),
                speed_kmh: bus.speed_kmh,
                course_deg: UNKNOWN,
                altitude_m: UNKNOWN,
                distance_m: None,
                timestamp: bus.timestamp,
                source: Source::Bus,
                sentence: None,
                pm100: UNKNOWN,
                has_fix: true,
            },
        }
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format epoch milliseconds as `YYYY-mm-dd HH:MM:SS` (UTC)
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}
