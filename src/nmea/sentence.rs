//! # NMEA Sentence Types
//!
//! Frame definitions for the NMEA 0183 sentences emitted by serial GPS receivers.

/// Knots to km/h
pub const KNOTS_TO_KMH: f64 = 1.852;

/// Sentence start delimiter
pub const SENTENCE_START: char = '$';

/// Checksum delimiter (checksums are stripped, never validated)
pub const CHECKSUM_DELIMITER: char = '*';

/// Recommended minimum data: position, velocity, time
pub const SENTENCE_RMC: &str = "RMC";

/// Fix data: time, position, quality, altitude
pub const SENTENCE_GGA: &str = "GGA";

/// DOP and active satellites
pub const SENTENCE_GSA: &str = "GSA";

/// Satellites in view
pub const SENTENCE_GSV: &str = "GSV";

/// Course over ground and ground speed
pub const SENTENCE_VTG: &str = "VTG";

/// Decoded sentence
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaFrame {
    /// `$GPRMC`
    PositionFix(PositionFix),
    /// `$GPGSA`
    SatelliteFix(SatelliteFix),
    /// `$GPGSV`
    SatellitesInView(SatellitesInView),
    /// `$GPVTG`
    CourseSpeed(CourseSpeed),
    /// `$GPGGA`
    GroundAltitudeFix(GroundAltitudeFix),
}

impl NmeaFrame {
    /// Three letter sentence type of this frame
    pub fn sentence_type(&self) -> &'static str {
        match self {
            NmeaFrame::PositionFix(_) => SENTENCE_RMC,
            NmeaFrame::SatelliteFix(_) => SENTENCE_GSA,
            NmeaFrame::SatellitesInView(_) => SENTENCE_GSV,
            NmeaFrame::CourseSpeed(_) => SENTENCE_VTG,
            NmeaFrame::GroundAltitudeFix(_) => SENTENCE_GGA,
        }
    }
}

/// Position/velocity fix from an RMC sentence
///
/// `reading` is `None` when any of latitude, longitude or speed failed to
/// parse. Fix validity is all-or-nothing: there is no partially populated
/// reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    /// The sentence as received, starting at `$`
    pub sentence: String,
    /// UTC time field (`hhmmss.sss`)
    pub utc_time: Option<String>,
    /// Receiver status (`A` active, `V` void)
    pub status: Option<char>,
    /// UTC date field (`ddmmyy`)
    pub date: Option<String>,
    /// Parsed position, or `None` for a no-fix frame
    pub reading: Option<FixReading>,
}

/// Validated RMC position data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixReading {
    /// Decimal degrees, negative south
    pub latitude: f64,
    /// Decimal degrees, negative west
    pub longitude: f64,
    /// Speed over ground in km/h
    pub speed_kmh: f64,
    /// Track made good as reported by the receiver, if any
    pub course_deg: Option<f64>,
}

/// GSA sentence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SatelliteFix {
    /// `M` manual, `A` automatic
    pub selection_mode: Option<char>,
    /// 1 = no fix, 2 = 2D, 3 = 3D
    pub fix_type: Option<u8>,
    /// PRNs of satellites used in the solution
    pub satellites: Vec<u16>,
    pub pdop: Option<f64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
}

/// GSV sentence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SatellitesInView {
    pub total_messages: Option<u8>,
    pub message_number: Option<u8>,
    pub satellites_in_view: Option<u8>,
    pub satellites: Vec<SatelliteInfo>,
}

/// One satellite block of a GSV sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteInfo {
    pub prn: u16,
    pub elevation_deg: Option<f64>,
    pub azimuth_deg: Option<f64>,
    pub snr_db: Option<f64>,
}

/// VTG sentence
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CourseSpeed {
    pub true_course_deg: Option<f64>,
    pub magnetic_course_deg: Option<f64>,
    pub speed_knots: Option<f64>,
    pub speed_kmh: Option<f64>,
}

/// GGA sentence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundAltitudeFix {
    /// The sentence as received, starting at `$`
    pub sentence: String,
    pub utc_time: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 0 = invalid, 1 = GPS, 2 = DGPS, ...
    pub quality: Option<u8>,
    pub satellites_used: Option<u8>,
    pub hdop: Option<f64>,
    /// Altitude above mean sea level in meters
    pub altitude_m: Option<f64>,
}

/// Convert knots to km/h
pub fn knots_to_kmh(knots: f64) -> f64 {
    knots * KNOTS_TO_KMH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knots_to_kmh() {
        assert_eq!(knots_to_kmh(0.0), 0.0);
        assert!((knots_to_kmh(10.0) - 18.52).abs() < 1e-9);
    }

    #[test]
    fn test_sentence_type_names() {
        let frame = NmeaFrame::CourseSpeed(CourseSpeed::default());
        assert_eq!(frame.sentence_type(), "VTG");

        let frame = NmeaFrame::GroundAltitudeFix(GroundAltitudeFix::default());
        assert_eq!(frame.sentence_type(), "GGA");
    }
}
