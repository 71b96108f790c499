//! # Live Snapshot
//!
//! Single-slot JSON document holding the latest serial fix, plus the optional
//! NMEA journal. The snapshot is overwritten on every accepted fix; consumers
//! poll or watch the file for the current value.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::geodesy::{round_to, GeoPoint};
use crate::position::Position;

/// Device class reported in the snapshot
pub const DEVICE_CLASS: &str = "GpsSerial";

/// Identity of the receiver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub class: String,
    pub usb_port: String,
    pub tty: String,
    pub hardware_version: String,
}

impl From<&DeviceConfig> for DeviceInfo {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            class: DEVICE_CLASS.to_string(),
            usb_port: config.usb_port.clone(),
            tty: config.port.clone(),
            hardware_version: config.hardware_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub gps: GpsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsSnapshot {
    pub device: DeviceInfo,
    pub data: SnapshotData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotData {
    pub latitude: f64,
    pub longitude: f64,
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub speed: f64,
    pub distance: Option<f64>,
    pub nmea: Option<String>,
    pub datetime: String,
    pub angle: f64,
}

impl LiveSnapshot {
    /// Snapshot of `position`, with `previous` as the fix it was measured against
    pub fn new(device: &DeviceInfo, position: &Position, previous: Option<GeoPoint>) -> Self {
        let previous = previous.unwrap_or_default();
        Self {
            gps: GpsSnapshot {
                device: device.clone(),
                data: SnapshotData {
                    latitude: position.latitude,
                    longitude: position.longitude,
                    last_latitude: previous.latitude,
                    last_longitude: previous.longitude,
                    speed: round_to(position.speed_kmh, 1),
                    distance: position.distance_m.map(|d| round_to(d, 1)),
                    nmea: position.sentence.clone(),
                    datetime: position.datetime(),
                    angle: round_to(position.course_deg, 1),
                },
            },
        }
    }
}

/// Destination of live snapshots and raw sentences
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSink: Send {
    /// Replace the current snapshot
    fn write_snapshot(&mut self, snapshot: &LiveSnapshot) -> Result<()>;

    /// Record a raw sentence received at `received`
    fn record_sentence(&mut self, received: &str, sentence: &str) -> Result<()>;
}

/// File-backed sink
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    path: PathBuf,
    journal: Option<PathBuf>,
}

impl FileSnapshotSink {
    pub fn new(path: impl Into<PathBuf>, journal: Option<PathBuf>) -> Self {
        Self { path: path.into(), journal }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for FileSnapshotSink {
    /// Write to a sibling temp file and rename, so readers never see a torn document
    fn write_snapshot(&mut self, snapshot: &LiveSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn record_sentence(&mut self, received: &str, sentence: &str) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(journal)?;
        writeln!(file, "{} | {}", received, sentence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{PositionReport, SerialFix, SerialReport, Source};
    use tempfile::tempdir;

    fn device() -> DeviceInfo {
        DeviceInfo {
            class: DEVICE_CLASS.to_string(),
            usb_port: "1-1.2".to_string(),
            tty: "/dev/ttyUSB0".to_string(),
            hardware_version: "u-blox 7".to_string(),
        }
    }

    fn position() -> Position {
        PositionReport::Serial(SerialReport {
            fix: Some(SerialFix {
                latitude: -22.91552,
                longitude: -69.60735,
                speed_kmh: 36.04,
                course_deg: 12.34,
                distance_m: Some(10.06),
            }),
            sentence: "$GPRMC,141530.00,A,2254.9312,S,06936.4410,W,19.46,,190124,,,A".to_string(),
            timestamp: 1_705_673_730_000,
        })
        .into()
    }

    #[test]
    fn test_snapshot_shape() {
        let snapshot = LiveSnapshot::new(&device(), &position(), Some(GeoPoint::new(-22.9154, -69.6072)));
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["gps"]["device"]["class"], "GpsSerial");
        assert_eq!(value["gps"]["device"]["tty"], "/dev/ttyUSB0");
        assert_eq!(value["gps"]["data"]["latitude"], -22.91552);
        assert_eq!(value["gps"]["data"]["last_latitude"], -22.9154);
        assert_eq!(value["gps"]["data"]["speed"], 36.0);
        assert_eq!(value["gps"]["data"]["distance"], 10.1);
        assert_eq!(value["gps"]["data"]["angle"], 12.3);
        assert_eq!(value["gps"]["data"]["datetime"], "2024-01-19 14:15:30");
    }

    #[test]
    fn test_snapshot_without_previous_fix() {
        let snapshot = LiveSnapshot::new(&device(), &Position::no_fix(Source::Serial, 0, None), None);
        assert_eq!(snapshot.gps.data.last_latitude, 0.0);
        assert_eq!(snapshot.gps.data.distance, Some(0.0));
    }

    #[test]
    fn test_file_sink_overwrites_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run").join("gps.json");
        let mut sink = FileSnapshotSink::new(&path, None);

        let first = LiveSnapshot::new(&device(), &position(), None);
        let second = LiveSnapshot::new(&device(), &Position::no_fix(Source::Serial, 0, None), None);
        sink.write_snapshot(&first).unwrap();
        sink.write_snapshot(&second).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, serde_json::to_value(&second).unwrap());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_journal_appends_lines() {
        let dir = tempdir().unwrap();
        let journal = dir.path().join("NMEA.txt");
        let mut sink = FileSnapshotSink::new(dir.path().join("gps.json"), Some(journal.clone()));

        sink.record_sentence("2024-01-19 14:15:30", "$GPRMC,a").unwrap();
        sink.record_sentence("2024-01-19 14:15:31", "$GPGGA,b").unwrap();

        let contents = fs::read_to_string(&journal).unwrap();
        assert_eq!(
            contents,
            "2024-01-19 14:15:30 | $GPRMC,a\n2024-01-19 14:15:31 | $GPGGA,b\n"
        );
    }

    #[test]
    fn test_journal_disabled() {
        let dir = tempdir().unwrap();
        let mut sink = FileSnapshotSink::new(dir.path().join("gps.json"), None);
        assert!(sink.record_sentence("now", "$GPRMC").is_ok());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
