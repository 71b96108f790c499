//! # NMEA Decoder
//!
//! Turns a single line of serial text into a typed [`NmeaFrame`].
//!
//! The decoder never fails its caller: unknown sentence types and lines
//! without a `$` marker yield `None`, and RMC sentences whose numeric fields
//! do not parse become no-fix frames instead of being dropped.

use super::sentence::*;
use crate::geodesy::round_to;

/// Degree digits in an NMEA latitude (`DDMM.mmmm`)
const LATITUDE_DEGREE_DIGITS: usize = 2;

/// Degree digits in an NMEA longitude (`DDDMM.mmmm`)
const LONGITUDE_DEGREE_DIGITS: usize = 3;

/// Decimals kept for decoded serial coordinates
const COORDINATE_DECIMALS: i32 = 6;

/// Satellites per GSV sentence
const GSV_BLOCKS: usize = 4;

/// Stateless sentence decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct NmeaDecoder;

impl NmeaDecoder {
    pub fn decode(&self, line: &str) -> Option<NmeaFrame> {
        decode(line)
    }
}

/// Decode one NMEA sentence
///
/// # Arguments
///
/// * `line` - Text containing a sentence; anything before the `$` is ignored
///
/// # Returns
///
/// * `Option<NmeaFrame>` - Decoded frame, or `None` for unrecognized input
///
/// # Examples
///
/// ```
/// use fleet_track::nmea::{decode, NmeaFrame};
///
/// let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
/// match decode(line) {
///     Some(NmeaFrame::PositionFix(fix)) => assert!(fix.reading.is_some()),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub fn decode(line: &str) -> Option<NmeaFrame> {
    let start = line.find(SENTENCE_START)?;
    let sentence = line[start..].trim();

    let body = match sentence.find(CHECKSUM_DELIMITER) {
        Some(idx) => &sentence[1..idx],
        None => &sentence[1..],
    };

    let mut fields = body.split(',');
    let address = fields.next()?;
    if address.len() < 3 || !address.is_ascii() {
        return None;
    }
    let fields: Vec<&str> = fields.collect();

    match &address[address.len() - 3..] {
        SENTENCE_RMC => Some(NmeaFrame::PositionFix(decode_rmc(sentence, &fields))),
        SENTENCE_GGA => Some(NmeaFrame::GroundAltitudeFix(decode_gga(sentence, &fields))),
        SENTENCE_GSA => Some(NmeaFrame::SatelliteFix(decode_gsa(&fields))),
        SENTENCE_GSV => Some(NmeaFrame::SatellitesInView(decode_gsv(&fields))),
        SENTENCE_VTG => Some(NmeaFrame::CourseSpeed(decode_vtg(&fields))),
        _ => None,
    }
}

/// RMC: time, status, lat, N/S, lon, E/W, speed (knots), course, date, variation, E/W
fn decode_rmc(sentence: &str, fields: &[&str]) -> PositionFix {
    PositionFix {
        sentence: sentence.to_string(),
        utc_time: text(fields, 0),
        status: field(fields, 1).and_then(|s| s.chars().next()),
        date: text(fields, 8),
        reading: rmc_reading(fields),
    }
}

fn rmc_reading(fields: &[&str]) -> Option<FixReading> {
    let latitude = parse_coordinate(field(fields, 2)?, field(fields, 3)?, LATITUDE_DEGREE_DIGITS)?;
    let longitude = parse_coordinate(field(fields, 4)?, field(fields, 5)?, LONGITUDE_DEGREE_DIGITS)?;
    let speed_knots = number(fields, 6)?;

    if !(-90.0..=90.0).contains(&latitude)
        || !(-180.0..=180.0).contains(&longitude)
        || speed_knots < 0.0
    {
        return None;
    }

    Some(FixReading {
        latitude,
        longitude,
        speed_kmh: knots_to_kmh(speed_knots),
        course_deg: number(fields, 7),
    })
}

/// GGA: time, lat, N/S, lon, E/W, quality, satellites, hdop, altitude, M, ...
fn decode_gga(sentence: &str, fields: &[&str]) -> GroundAltitudeFix {
    GroundAltitudeFix {
        sentence: sentence.to_string(),
        utc_time: text(fields, 0),
        latitude: field(fields, 1)
            .zip(field(fields, 2))
            .and_then(|(v, h)| parse_coordinate(v, h, LATITUDE_DEGREE_DIGITS)),
        longitude: field(fields, 3)
            .zip(field(fields, 4))
            .and_then(|(v, h)| parse_coordinate(v, h, LONGITUDE_DEGREE_DIGITS)),
        quality: number(fields, 5),
        satellites_used: number(fields, 6),
        hdop: number(fields, 7),
        altitude_m: number(fields, 8),
    }
}

/// GSA: mode, fix type, 12 PRN slots, pdop, hdop, vdop
fn decode_gsa(fields: &[&str]) -> SatelliteFix {
    SatelliteFix {
        selection_mode: field(fields, 0).and_then(|s| s.chars().next()),
        fix_type: number(fields, 1),
        satellites: (2..14).filter_map(|i| number(fields, i)).collect(),
        pdop: number(fields, 14),
        hdop: number(fields, 15),
        vdop: number(fields, 16),
    }
}

/// GSV: total, number, in view, then up to four (prn, elevation, azimuth, snr) blocks
fn decode_gsv(fields: &[&str]) -> SatellitesInView {
    let satellites = (0..GSV_BLOCKS)
        .filter_map(|block| {
            let base = 3 + block * 4;
            Some(SatelliteInfo {
                prn: number(fields, base)?,
                elevation_deg: number(fields, base + 1),
                azimuth_deg: number(fields, base + 2),
                snr_db: number(fields, base + 3),
            })
        })
        .collect();

    SatellitesInView {
        total_messages: number(fields, 0),
        message_number: number(fields, 1),
        satellites_in_view: number(fields, 2),
        satellites,
    }
}

/// VTG: true course, T, magnetic course, M, knots, N, km/h, K
fn decode_vtg(fields: &[&str]) -> CourseSpeed {
    CourseSpeed {
        true_course_deg: number(fields, 0),
        magnetic_course_deg: number(fields, 2),
        speed_knots: number(fields, 4),
        speed_kmh: number(fields, 6),
    }
}

/// Convert `DDMM.mmmm` / `DDDMM.mmmm` plus hemisphere into decimal degrees
///
/// The fixed-width degree prefix is split off, the minutes are divided by 60
/// and added, and south/west hemispheres negate the result.
pub fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits || !value.is_ascii() {
        return None;
    }

    let (degrees, minutes) = value.split_at(degree_digits);
    let degrees: u32 = degrees.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }

    let decimal = round_to(degrees as f64 + minutes / 60.0, COORDINATE_DECIMALS);

    match hemisphere {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

fn field<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields.get(idx).map(|f| f.trim()).filter(|f| !f.is_empty())
}

fn text(fields: &[&str], idx: usize) -> Option<String> {
    field(fields, idx).map(str::to_string)
}

fn number<T: std::str::FromStr>(fields: &[&str], idx: usize) -> Option<T> {
    field(fields, idx)?.parse().ok()
}
