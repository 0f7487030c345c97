//! Hardware abstraction for the acquisition board.
//!
//! - [`capabilities`]: the `Adc` and `Gpio` traits and the bounded polling helper
//! - [`board`]: port and bit assignments
//! - [`mock`]: simulated peripherals for tests and host runs

pub mod board;
pub mod capabilities;
pub mod mock;

pub use capabilities::{poll_with_timeout, Adc, Gpio, PollOutcome, Port};
