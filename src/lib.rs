//! # Fleet Track Library
//!
//! Track vehicles from serial NMEA receivers and MQTT telemetry.
//!
//! Positions from both sources are normalized into one record, kept in a
//! bounded per-vehicle trajectory and pushed to every connected viewer.

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod geodesy;
pub mod nmea;
pub mod position;
pub mod serial;
pub mod store;
