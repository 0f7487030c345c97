//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the firmware core and its
//! host runtime. Using the `thiserror` crate, it provides a centralized and consistent way
//! to handle the failures that can stop the acquisition loop or the runtime around it.
//!
//! ## Error Hierarchy
//!
//! - **`Settings`** / **`Configuration`**: host settings could not be loaded, or loaded but
//!   failed validation.
//! - **`Io`**: wraps `std::io::Error` (flash page image, volume directory, stdio link).
//! - **`Serial`**: the serial link could not be opened.
//! - **`HardwareFault`**: a bounded hardware wait expired or the peripheral reported a
//!   fault. This is fatal: the runtime disconnects every load and source and stops.
//! - **`ConfigBlock`**: the persisted configuration page is not a valid block.
//! - **`FlashWrite`**: programming the configuration page failed.
//! - **`Runtime`**: a host task ended abnormally.
//!
//! File operations do not use `DaqError`; they report a [`crate::files::FileStatus`]
//! that is surfaced verbatim on the wire.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Top-level error for the firmware core.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Host I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened.
    #[error("Serial link error: {0}")]
    Serial(String),

    /// A peripheral did not respond in time.
    #[error("Hardware fault: {0}")]
    HardwareFault(#[from] HardwareFault),

    /// Persisted configuration page rejected.
    #[error("Invalid configuration block: {0}")]
    ConfigBlock(#[from] ConfigBlockError),

    /// Flash programming returned a non-zero status.
    #[error("Flash write failed with status {0:#04x}")]
    FlashWrite(u32),

    /// A runtime task failed.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Settings(Box::new(value))
    }
}

/// Failures of bounded hardware waits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareFault {
    /// A conversion burst did not complete.
    #[error("ADC end-of-conversion not seen within {waited_ms} ms")]
    ConversionTimeout {
        /// Time waited before giving up.
        waited_ms: u64,
    },

    /// Calibration did not complete.
    #[error("ADC calibration did not finish within {waited_ms} ms")]
    CalibrationTimeout {
        /// Time waited before giving up.
        waited_ms: u64,
    },

    /// The converter reported an error.
    #[error("ADC reported a fault: {0}")]
    Adc(String),
}

/// Reasons a persisted configuration page is rejected at boot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigBlockError {
    /// First byte is not the validity marker.
    #[error("validity marker {found:#04x} does not match {expected:#04x}")]
    InvalidMarker {
        /// Byte read from the page.
        found: u8,
        /// Marker written by this firmware.
        expected: u8,
    },

    /// Page shorter than the block layout.
    #[error("page is {0} bytes, expected a full page")]
    ShortPage(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_fault_converts_into_app_error() {
        let err: DaqError = HardwareFault::ConversionTimeout { waited_ms: 50 }.into();
        assert!(matches!(err, DaqError::HardwareFault(_)));
        assert!(err.to_string().contains("50 ms"));
    }

    #[test]
    fn config_block_error_message_names_marker() {
        let err = ConfigBlockError::InvalidMarker {
            found: 0xFF,
            expected: 0xBE,
        };
        assert_eq!(
            err.to_string(),
            "validity marker 0xff does not match 0xbe"
        );
    }
}
