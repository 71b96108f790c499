//! # NMEA Module
//!
//! Decoding of NMEA 0183 text sentences from serial GPS receivers.
//!
//! This module handles:
//! - Sentence type detection (`$GPRMC`, `$GPGGA`, `$GPGSA`, `$GPGSV`, `$GPVTG`)
//! - Coordinate conversion from `DDMM.mmmm` to decimal degrees
//! - No-fix classification of RMC sentences with unusable fields
//!
//! Checksums are not validated.

pub mod sentence;
pub mod decoder;

pub use decoder::{decode, NmeaDecoder};
pub use sentence::NmeaFrame;
