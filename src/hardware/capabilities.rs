//! Hardware Capabilities
//!
//! Small capability traits the firmware core is written against. Each one covers a single
//! peripheral concern:
//!
//! - [`Adc`] - scan conversion of the analog channels with an end-of-conversion flag
//! - [`Gpio`] - whole-port read/write plus bit set/clear on the digital outputs
//!
//! # Design Philosophy
//!
//! The core runs from two contexts (the main loop and the systick handler), so these
//! traits are synchronous and `Send`. Waiting on a hardware flag never spins forever:
//! it goes through [`poll_with_timeout`], which turns "flag never set" into
//! [`PollOutcome::Timeout`] instead of a hang.

use crate::error::HardwareFault;
use std::time::{Duration, Instant};

/// Capability: Analog Scan Conversion
///
/// # Contract
/// - `start_conversion` starts one scan of all channels in the configured sequence
/// - `take_end_of_conversion` reports (and clears) the end-of-scan flag
/// - `read_channel` returns the last DMA-captured raw value for a channel
pub trait Adc: Send {
    /// Reset and start the converter self-calibration.
    fn begin_calibration(&mut self) -> Result<(), HardwareFault>;

    /// Whether calibration is still in progress.
    fn is_calibrating(&mut self) -> Result<bool, HardwareFault>;

    /// Start a scan conversion of the regular sequence.
    fn start_conversion(&mut self) -> Result<(), HardwareFault>;

    /// Return and clear the end-of-conversion flag.
    fn take_end_of_conversion(&mut self) -> Result<bool, HardwareFault>;

    /// Raw value captured for `channel` by the last scan.
    fn read_channel(&self, channel: usize) -> u32;
}

/// GPIO ports used by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
    C,
}

impl Port {
    pub(crate) fn index(self) -> usize {
        match self {
            Port::A => 0,
            Port::B => 1,
            Port::C => 2,
        }
    }
}

/// Capability: Digital Output Ports
pub trait Gpio: Send {
    /// Read the output data register of `port`.
    fn read_port(&self, port: Port) -> u16;

    /// Write the whole output data register of `port`.
    fn write_port(&mut self, port: Port, value: u16);

    /// Drive the given bits high.
    fn set_bits(&mut self, port: Port, bits: u16) {
        let value = self.read_port(port) | bits;
        self.write_port(port, value);
    }

    /// Drive the given bits low.
    fn clear_bits(&mut self, port: Port, bits: u16) {
        let value = self.read_port(port) & !bits;
        self.write_port(port, value);
    }
}

/// Result of waiting on a hardware flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The flag was seen; carries the value read.
    Ready(T),
    /// The deadline passed first.
    Timeout,
    /// The peripheral reported an error while being polled.
    Fault(HardwareFault),
}

/// Call `check` until it yields a value or fails, giving up after `timeout`.
///
/// `check` returns `Ok(None)` while the hardware is still busy. The wait still
/// blocks the caller but is bounded.
pub fn poll_with_timeout<T>(
    timeout: Duration,
    mut check: impl FnMut() -> Result<Option<T>, HardwareFault>,
) -> PollOutcome<T> {
    let deadline = Instant::now() + timeout;
    let mut spins: u32 = 0;
    loop {
        match check() {
            Ok(Some(value)) => return PollOutcome::Ready(value),
            Ok(None) => {}
            Err(fault) => return PollOutcome::Fault(fault),
        }
        if Instant::now() >= deadline {
            return PollOutcome::Timeout;
        }
        spins = spins.wrapping_add(1);
        if spins % 64 == 0 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_returns_ready_value() {
        let mut calls = 0;
        let outcome = poll_with_timeout(Duration::from_millis(100), || {
            calls += 1;
            Ok((calls == 3).then_some(calls))
        });
        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[test]
    fn poll_times_out_when_flag_never_sets() {
        let outcome: PollOutcome<()> =
            poll_with_timeout(Duration::from_millis(5), || Ok(None));
        assert_eq!(outcome, PollOutcome::Timeout);
    }

    #[test]
    fn poll_surfaces_fault() {
        let outcome: PollOutcome<()> = poll_with_timeout(Duration::from_millis(5), || {
            Err(HardwareFault::Adc("overrun".into()))
        });
        assert!(matches!(outcome, PollOutcome::Fault(HardwareFault::Adc(_))));
    }
}
