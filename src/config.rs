//! Host settings using Figment
//!
//! Settings for running the firmware core on a host: serial link, tick timing, the
//! directory standing in for the SD card, the flash page image, the simulated analog
//! front-end and the factory configuration. Loaded from:
//! 1. a TOML file (base settings)
//! 2. environment variables prefixed with `BATTERY_DAQ_`, sections separated by `__`
//!
//! # Example
//! ```no_run
//! use battery_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/battery-daq.toml")?;
//! println!("Link: {:?}", settings.link.port);
//! # Ok::<(), battery_daq::error::DaqError>(())
//! ```
//!
//! `BATTERY_DAQ_LINK__BAUD_RATE=115200` overrides `[link] baud_rate`.

use crate::comms::{RX_CAPACITY, TX_CAPACITY};
use crate::configuration::Configuration;
use crate::error::{AppResult, DaqError};
use crate::hardware::board::BAUD_RATE;
use crate::logging::OutputFormat;
use crate::measurement::NUM_CHANNEL;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BATTERY_DAQ_";

/// Smallest transmit ring that fits any single record (a full `fG` line).
pub const MIN_TX_BUFFER: usize = 96;

/// Default settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "config/battery-daq.toml";

/// Top-level host settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application name and logging.
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Serial link and ring sizes.
    #[serde(default)]
    pub link: LinkSettings,
    /// Loop, conversion and transmit timing.
    #[serde(default)]
    pub timing: TimingSettings,
    /// Host directories backing the SD card and flash page.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Simulated analog inputs.
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Factory configuration, used when the flash page holds no valid block.
    #[serde(default)]
    pub defaults: Configuration,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Name reported in the startup log.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Log span open/close events.
    #[serde(default)]
    pub log_spans: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "battery-daq".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
            log_spans: false,
        }
    }
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    #[serde(default)]
    pub port: Option<String>,
    /// Serial baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Speak the protocol on stdin/stdout instead of a serial device.
    #[serde(default)]
    pub stdio: bool,
    /// Receive ring capacity in bytes.
    #[serde(default = "default_rx_capacity")]
    pub rx_buffer: usize,
    /// Transmit ring capacity in bytes; at least one complete measurement cycle.
    #[serde(default = "default_tx_capacity")]
    pub tx_buffer: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            stdio: false,
            rx_buffer: default_rx_capacity(),
            tx_buffer: default_tx_capacity(),
        }
    }
}

/// Tick and hardware wait timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Systick period in milliseconds.
    #[serde(default = "default_systick_ms")]
    pub systick_ms: u64,
    /// Longest wait for one end-of-conversion.
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_ms: u64,
    /// Longest wait for ADC calibration at boot.
    #[serde(default = "default_calibration_timeout")]
    pub calibration_timeout_ms: u64,
    /// Main loop idle sleep when there is nothing to do.
    #[serde(default = "default_idle_us")]
    pub idle_us: u64,
    /// Longest wait for room in the transmit ring before a record is dropped.
    #[serde(default = "default_tx_wait")]
    pub tx_wait_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            systick_ms: default_systick_ms(),
            conversion_timeout_ms: default_conversion_timeout(),
            calibration_timeout_ms: default_calibration_timeout(),
            idle_us: default_idle_us(),
            tx_wait_ms: default_tx_wait(),
        }
    }
}

impl TimingSettings {
    /// Systick period.
    pub fn systick(&self) -> Duration {
        Duration::from_millis(self.systick_ms)
    }

    /// Longest wait for one conversion burst.
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_millis(self.conversion_timeout_ms)
    }

    /// Longest wait for the calibration burst.
    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }

    /// Main loop sleep when there is nothing to do.
    pub fn idle(&self) -> Duration {
        Duration::from_micros(self.idle_us)
    }

    /// Longest wait for transmit ring space before a record is dropped.
    pub fn tx_wait(&self) -> Duration {
        Duration::from_millis(self.tx_wait_ms)
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory standing in for the SD card volume.
    #[serde(default = "default_volume_dir")]
    pub volume_dir: PathBuf,
    /// Reported volume size in bytes.
    #[serde(default = "default_capacity")]
    pub capacity_bytes: u64,
    /// Sectors per allocation cluster on the simulated card.
    #[serde(default = "default_sectors_per_cluster")]
    pub sectors_per_cluster: u32,
    /// Create the volume directory at startup if it is missing.
    #[serde(default = "default_true")]
    pub format_if_missing: bool,
    /// File holding the configuration flash page.
    #[serde(default = "default_flash_page")]
    pub flash_page: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            volume_dir: default_volume_dir(),
            capacity_bytes: default_capacity(),
            sectors_per_cluster: default_sectors_per_cluster(),
            format_if_missing: true,
            flash_page: default_flash_page(),
        }
    }
}

/// Simulated analog front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Raw 12-bit count of every channel.
    #[serde(default = "default_channels")]
    pub channels: Vec<u32>,
    /// Uniform noise amplitude in counts.
    #[serde(default)]
    pub noise: u32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            noise: 0,
        }
    }
}

impl SimulationSettings {
    /// Channel counts as a fixed array (missing entries read 0).
    pub fn channel_array(&self) -> [u32; NUM_CHANNEL] {
        std::array::from_fn(|i| self.channels.get(i).copied().unwrap_or(0))
    }
}

// Default value functions
fn default_baud_rate() -> u32 {
    BAUD_RATE
}

fn default_rx_capacity() -> usize {
    RX_CAPACITY
}

fn default_tx_capacity() -> usize {
    TX_CAPACITY
}

fn default_systick_ms() -> u64 {
    1
}

fn default_conversion_timeout() -> u64 {
    50
}

fn default_calibration_timeout() -> u64 {
    100
}

fn default_idle_us() -> u64 {
    500
}

fn default_tx_wait() -> u64 {
    100
}

fn default_volume_dir() -> PathBuf {
    PathBuf::from("data/sd")
}

fn default_capacity() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_sectors_per_cluster() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

fn default_flash_page() -> PathBuf {
    PathBuf::from("data/config.page")
}

/// Zero current, about 12.8 V on every interface, about 25 °C.
fn default_channels() -> Vec<u32> {
    let mut channels = Vec::with_capacity(NUM_CHANNEL);
    for _ in 0..(NUM_CHANNEL - 1) / 2 {
        channels.push(2028);
        channels.push(2015);
    }
    channels.push(3724);
    channels
}

impl Settings {
    /// Load settings from the default path and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from `path` (optional) and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate().map_err(DaqError::Configuration)?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.link.baud_rate == 0 {
            return Err("baud_rate must be positive".to_string());
        }
        if self.link.rx_buffer == 0 {
            return Err("rx_buffer must be positive".to_string());
        }
        if self.link.tx_buffer < MIN_TX_BUFFER {
            return Err(format!(
                "tx_buffer must hold the longest record ({MIN_TX_BUFFER} bytes)"
            ));
        }

        if self.timing.systick_ms == 0 {
            return Err("systick_ms must be at least 1".to_string());
        }
        if self.timing.conversion_timeout_ms == 0 || self.timing.calibration_timeout_ms == 0 {
            return Err("ADC timeouts must be positive".to_string());
        }

        let spc = self.storage.sectors_per_cluster;
        if !spc.is_power_of_two() || spc > 128 {
            return Err(format!(
                "Invalid sectors_per_cluster {spc}. Must be a power of two up to 128"
            ));
        }
        if self.storage.capacity_bytes == 0 {
            return Err("capacity_bytes must be positive".to_string());
        }

        if self.simulation.channels.len() != NUM_CHANNEL {
            return Err(format!(
                "simulation.channels needs {NUM_CHANNEL} entries, found {}",
                self.simulation.channels.len()
            ));
        }
        if let Some(raw) = self.simulation.channels.iter().find(|v| **v > 0x0FFF) {
            return Err(format!("simulated count {raw} exceeds 12 bits"));
        }

        if self.defaults.number_samples == 0 {
            return Err("defaults.number_samples must be at least 1".to_string());
        }
        if self.defaults.number_conversions == 0
            || usize::from(self.defaults.number_conversions) > NUM_CHANNEL
        {
            return Err(format!(
                "defaults.number_conversions must be 1-{NUM_CHANNEL}"
            ));
        }
        if self.defaults.measurement_interval == 0 {
            return Err("defaults.measurement_interval must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.link.baud_rate, 38_400);
        assert_eq!(settings.simulation.channels.len(), NUM_CHANNEL);
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "bench"
log_level = "debug"

[link]
port = "/dev/ttyUSB1"

[defaults]
measurement_interval = 500
number_samples = 4
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.name, "bench");
        assert_eq!(settings.link.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(settings.link.baud_rate, 38_400);
        assert_eq!(settings.defaults.measurement_interval, 500);
        assert_eq!(settings.defaults.number_samples, 4);
        assert_eq!(settings.defaults.number_conversions, 7);
        assert!(settings.defaults.enable_send);
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn bad_cluster_size_rejected() {
        let mut settings = Settings::default();
        settings.storage.sectors_per_cluster = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn default_tx_buffer_holds_a_full_cycle() {
        let settings = Settings::default();
        assert_eq!(settings.link.tx_buffer, TX_CAPACITY);
        assert_eq!(settings.link.rx_buffer, RX_CAPACITY);
        // pH + dT + six dB + ds + dR + dr + dX at their widest.
        let widest_cycle = 24 + 10 + 6 * 16 + 6 + 2 * 16 + 6;
        assert!(settings.link.tx_buffer >= widest_cycle);
    }

    #[test]
    fn tiny_tx_buffer_rejected() {
        let mut settings = Settings::default();
        settings.link.tx_buffer = 64;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn short_channel_table_rejected() {
        let mut settings = Settings::default();
        settings.simulation.channels.truncate(4);
        assert!(settings.validate().is_err());
    }
}
