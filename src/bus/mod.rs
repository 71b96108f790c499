//! # Telemetry Ingest Listener
//!
//! Turns JSON measurements published on the message bus into positions.
//!
//! Topics look like `<site>/dataloggers/mapa/<VEHICLE>/<leaf>`; the vehicle id
//! is always the second-to-last segment. Payloads must carry a `measurement`
//! object and an `equipo` field:
//!
//! ```json
//! {"measurement": {"latitude": -22.91, "longitude": -69.60, "speed_kmh": 31.5}, "equipo": "CAEX-320", "time": 1700000000000}
//! ```
//!
//! Every message is handled in isolation: a bad payload is logged and dropped,
//! never stopping delivery of the next one.

pub mod client;

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, TrackerError};
use crate::position::{now_millis, BusReport, PositionReport, VehicleId};
use crate::store::{TrajectoryStore, TrajectoryWindow};

#[derive(Debug, Deserialize)]
struct BusMessage {
    #[serde(default)]
    measurement: Option<Measurement>,
    #[serde(default)]
    equipo: Option<serde_json::Value>,
    #[serde(default)]
    time: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Measurement {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
    #[serde(default)]
    speed_kmh: f64,
}

/// Vehicle id at the second-to-last segment of `topic`
pub fn vehicle_from_topic(topic: &str) -> Result<VehicleId> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < 2 {
        return Err(TrackerError::MalformedPayload(format!("topic '{}' has no vehicle segment", topic)));
    }
    segments[segments.len() - 2].parse()
}

/// Parse a bus payload into a report
///
/// # Errors
///
/// * `TrackerError::Json` - Payload is not valid JSON or has mistyped fields
/// * `TrackerError::MalformedPayload` - `measurement` or `equipo` missing, or
///   coordinates out of range
pub fn parse_payload(payload: &[u8], received: i64) -> Result<BusReport> {
    let message: BusMessage = serde_json::from_slice(payload)?;

    let (Some(measurement), Some(_)) = (message.measurement, message.equipo) else {
        return Err(TrackerError::MalformedPayload("missing 'measurement' or 'equipo'".to_string()));
    };

    if !(-90.0..=90.0).contains(&measurement.latitude) || !(-180.0..=180.0).contains(&measurement.longitude) {
        return Err(TrackerError::MalformedPayload(format!(
            "coordinates out of range ({}, {})",
            measurement.latitude, measurement.longitude
        )));
    }

    let timestamp = match message.time {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(received),
        _ => received,
    };

    Ok(BusReport {
        latitude: measurement.latitude,
        longitude: measurement.longitude,
        speed_kmh: measurement.speed_kmh,
        timestamp,
    })
}

/// Message callback of the bus client
#[derive(Debug, Clone)]
pub struct IngestListener {
    store: Arc<TrajectoryStore>,
}

impl IngestListener {
    pub fn new(store: Arc<TrajectoryStore>) -> Self {
        Self { store }
    }

    /// Handle one delivered message, logging anything that goes wrong
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        match self.ingest(topic, payload) {
            Ok(window) => debug!("Accepted message on {} ({} positions)", topic, window.len()),
            Err(e) => warn!("Dropped message on {}: {} [{}]", topic, e, String::from_utf8_lossy(payload)),
        }
    }

    /// Validate one message and append it to the store
    ///
    /// # Returns
    ///
    /// * `Result<TrajectoryWindow>` - The vehicle's window after the append
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> Result<TrajectoryWindow> {
        let vehicle = vehicle_from_topic(topic)?;
        let report = parse_payload(payload, now_millis())?;
        Ok(self.store.append(&vehicle, PositionReport::Bus(report).into()))
    }
}
