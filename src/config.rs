//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TrackerError};
use crate::position::VehicleId;

/// Baud rates accepted for GPS receivers
pub const SUPPORTED_BAUD_RATES: &[u32] = &[4800, 9600, 19200, 38400, 57600, 115200];

/// Lower bound of the serial reconnect pause
pub const MIN_RECONNECT_INTERVAL_MS: u64 = 1000;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link configuration shared by all devices
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One GPS receiver attached to a vehicle
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub vehicle_id: String,

    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub usb_port: String,

    #[serde(default)]
    pub hardware_version: String,

    #[serde(default = "default_live_snapshot_path")]
    pub live_snapshot_path: String,

    #[serde(default)]
    pub nmea_log_path: Option<String>,
}

/// Message bus configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_bus_enabled")]
    pub enabled: bool,

    #[serde(default = "default_bus_host")]
    pub host: String,

    #[serde(default = "default_bus_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_site")]
    pub site: String,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,
}

/// Trajectory store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_max_trajectory_len")]
    pub max_trajectory_len: usize,
}

/// Viewer fan-out configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_event_queue_capacity() -> usize { 64 }

fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_live_snapshot_path() -> String { "/run/dio/gps.json".to_string() }

fn default_bus_enabled() -> bool { true }
fn default_bus_host() -> String { "localhost".to_string() }
fn default_bus_port() -> u16 { 1883 }
fn default_client_id() -> String { "fleet-track".to_string() }
fn default_site() -> String { "Antucoya".to_string() }
fn default_keep_alive_s() -> u64 { 60 }

fn default_max_trajectory_len() -> usize { 20 }
fn default_channel_capacity() -> usize { 256 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            event_queue_capacity: default_event_queue_capacity(),
            devices: Vec::new(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: default_bus_enabled(),
            host: default_bus_host(),
            port: default_bus_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            site: default_site(),
            keep_alive_s: default_keep_alive_s(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_trajectory_len: default_max_trajectory_len() }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), log_dir: None }
    }
}

impl BusConfig {
    /// Subscription pattern `<site>/dataloggers/mapa/#`
    pub fn topic(&self) -> String {
        format!("{}/dataloggers/mapa/#", self.site)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fleet_track::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.reconnect_interval_ms < MIN_RECONNECT_INTERVAL_MS
            || self.serial.reconnect_interval_ms > 60000
        {
            return Err(invalid("reconnect_interval_ms must be between 1000 and 60000"));
        }

        if self.serial.event_queue_capacity == 0 {
            return Err(invalid("event_queue_capacity must be greater than 0"));
        }

        for device in &self.serial.devices {
            let id: VehicleId = device
                .vehicle_id
                .parse()
                .map_err(|_| invalid(format!("invalid vehicle_id '{}'", device.vehicle_id)))?;
            if !id.is_well_formed() {
                return Err(invalid(format!(
                    "vehicle_id '{}' must have the form <TYPE>-<NUMBER>",
                    device.vehicle_id
                )));
            }

            if device.port.is_empty() {
                return Err(invalid(format!("serial port of {} cannot be empty", device.vehicle_id)));
            }

            if !SUPPORTED_BAUD_RATES.contains(&device.baud_rate) {
                return Err(invalid(format!(
                    "baud_rate of {} must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
                    device.vehicle_id
                )));
            }

            if device.live_snapshot_path.is_empty() {
                return Err(invalid(format!(
                    "live_snapshot_path of {} cannot be empty",
                    device.vehicle_id
                )));
            }
        }

        if self.bus.enabled {
            if self.bus.host.is_empty() {
                return Err(invalid("bus host cannot be empty when enabled"));
            }

            if self.bus.site.is_empty() || self.bus.site.contains(['/', '#', '+']) {
                return Err(invalid("bus site must be a non-empty topic level"));
            }

            if self.bus.client_id.is_empty() {
                return Err(invalid("bus client_id cannot be empty when enabled"));
            }

            if self.bus.keep_alive_s == 0 {
                return Err(invalid("keep_alive_s must be greater than 0"));
            }
        }

        if self.store.max_trajectory_len == 0 || self.store.max_trajectory_len > 10000 {
            return Err(invalid("max_trajectory_len must be between 1 and 10000"));
        }

        if self.broadcast.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be greater than 0"));
        }

        if self.logging.level.is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
}
