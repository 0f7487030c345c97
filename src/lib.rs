//! # Battery DAQ Core Library
//!
//! Firmware core of a lead-acid battery test bench. The board samples up to six
//! battery interfaces (current and voltage) plus a temperature sensor, reports the
//! scaled values over a serial link, routes batteries to loads through a switch
//! matrix, stops timed or voltage-limited discharge runs, and records data to an SD
//! card. This crate holds that logic behind hardware capability traits so it runs
//! unchanged on a host, against simulated peripherals, under tokio.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: `Adc` and `Gpio` capability traits, board pin constants and the
//!   simulated peripherals used on a host.
//! - **`measurement`**: sample bursts and the fixed-point conversions to amperes, volts
//!   and degrees Celsius, each scaled by 256.
//! - **`comms`**: byte rings, line assembly and the `tag,fields` record framing.
//! - **`switch`**: the connection-point switch matrix and interface reset pulses.
//! - **`test_run`**: manual, timed and voltage-limited discharge runs.
//! - **`files`**: the SD-card file service (two handles, directory listing, status codes).
//! - **`configuration`**: the persisted configuration block and its flash page.
//! - **`clock`**: the real-time clock.
//! - **`firmware`** and **`dispatcher`**: the main loop, the systick and the command set.
//! - **`config`** and **`logging`**: host settings (Figment) and tracing setup.
//! - **`runtime`**: runs the firmware on tokio over a serial port or stdio.
//! - **`error`**: the crate error types.

pub mod clock;
pub mod comms;
pub mod config;
pub mod configuration;
pub mod dispatcher;
pub mod error;
pub mod files;
pub mod firmware;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod runtime;
pub mod switch;
pub mod test_run;

pub use config::Settings;
pub use configuration::Configuration;
pub use error::{AppResult, DaqError};
pub use firmware::{BootOptions, Firmware, Peripherals, Shared};
