//! # Position Normalizer
//!
//! Builds canonical [`Position`] records from decoded RMC fixes, computing the
//! course and the distance travelled since the last valid fix.

use tracing::{debug, warn};

use super::{Position, PositionReport, SerialFix, SerialReport};
use crate::geodesy::{GeoPoint, Geodesic, Vincenty};
use crate::nmea::sentence::PositionFix;

/// Per-link dead reckoning state
#[derive(Debug, Default)]
pub struct PositionNormalizer<G: Geodesic = Vincenty> {
    geodesic: G,
    last_fix: Option<GeoPoint>,
}

impl<G: Geodesic> PositionNormalizer<G> {
    pub fn new(geodesic: G) -> Self {
        Self { geodesic, last_fix: None }
    }

    /// Last valid fix used as reference for course and distance
    pub fn last_fix(&self) -> Option<GeoPoint> {
        self.last_fix
    }

    /// Normalize a decoded RMC frame
    ///
    /// No-fix frames produce the zeroed [`Position`] and leave the reference
    /// fix untouched. For valid fixes the reference is always advanced, even
    /// when the distance could not be computed.
    ///
    /// # Arguments
    ///
    /// * `fix` - Decoded RMC frame
    /// * `timestamp` - Epoch milliseconds to stamp the record with
    pub fn normalize(&mut self, fix: &PositionFix, timestamp: i64) -> Position {
        let Some(reading) = fix.reading else {
            warn!("GPS no fix: unable to find lat/lon in NMEA frame [{}]", fix.sentence);
            return PositionReport::Serial(SerialReport {
                fix: None,
                sentence: fix.sentence.clone(),
                timestamp,
            })
            .into();
        };

        let current = GeoPoint::new(reading.latitude, reading.longitude);

        let (course_deg, distance_m) = match self.last_fix {
            Some(previous) => {
                let distance = match self.geodesic.distance(previous, current) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("Distance unknown between {:?} and {:?}: {}", previous, current, e);
                        None
                    }
                };
                (bearing(previous, current), distance)
            }
            None => (reading.course_deg.map(normalize_degrees).unwrap_or(0.0), None),
        };

        self.last_fix = Some(current);
        debug!("Fix at {:?}, course {:.1}, distance {:?}", current, course_deg, distance_m);

        PositionReport::Serial(SerialReport {
            fix: Some(SerialFix {
                latitude: reading.latitude,
                longitude: reading.longitude,
                speed_kmh: reading.speed_kmh,
                course_deg,
                distance_m,
            }),
            sentence: fix.sentence.clone(),
            timestamp,
        })
        .into()
    }
}

/// Bearing from `from` to `to` as `atan2(dlon, dlat)` in degrees [0, 360)
pub fn bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    let d_lat = to.latitude - from.latitude;
    let d_lon = to.longitude - from.longitude;
    normalize_degrees(d_lon.atan2(d_lat).to_degrees())
}

/// Wrap an angle into [0, 360)
fn normalize_degrees(angle: f64) -> f64 {
    let mut angle = angle % 360.0;
    if angle < 0.0 {
        angle += 360.0;
    }
    if angle >= 360.0 {
        angle -= 360.0;
    }
    // -0.0 + 0.0 == +0.0
    angle + 0.0
}
