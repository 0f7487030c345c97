//! Sample bursts and calibrated measurements.
//!
//! A measurement cycle runs one burst of back-to-back scan conversions, accumulating
//! every channel into a running sum, then turns the sums into fixed-point physical values
//! (all scaled by 256).
//!
//! # Channel map
//!
//! | Channel | Quantity |
//! |---|---|
//! | `2i` | current of interface `i` |
//! | `2i + 1` | voltage of interface `i` |
//! | 12 | temperature |
//!
//! Interfaces are numbered 0-5: devices 1-3, loads 1-2, source.
//!
//! # Arithmetic
//!
//! The divide by the sample count happens before the offset and scale are applied, and
//! the divide by 4096 comes last. Both divisions truncate toward zero. Calibration
//! tables were produced with exactly this ordering.

use crate::error::HardwareFault;
use crate::hardware::capabilities::{poll_with_timeout, Adc, PollOutcome};
use std::time::Duration;
use tracing::{error, trace};

/// Number of measured interfaces.
pub const NUM_INTERFACES: usize = 6;

/// Total scanned channels: a current/voltage pair per interface plus temperature.
pub const NUM_CHANNEL: usize = 1 + 2 * NUM_INTERFACES;

/// Channel carrying the temperature sensor.
pub const TEMPERATURE_CHANNEL: usize = 12;

/// Raw reading of the current amplifier at zero current.
pub const CURRENT_OFFSET: i64 = 2028;
/// Current gain applied before the shared divisor.
pub const CURRENT_SCALE: i64 = 8373;
/// Voltage offset added before the shared divisor.
pub const VOLTAGE_OFFSET: i64 = 10_565_197;
/// Voltage gain applied before the shared divisor.
pub const VOLTAGE_SCALE: i64 = 1418;
/// Raw reading of the temperature sensor at 0 °C.
pub const TEMPERATURE_OFFSET: i64 = 3412;
/// Temperature gain applied before the shared divisor.
pub const TEMPERATURE_SCALE: i64 = 328 * 256;

/// Final divisor shared by all three conversions.
pub const DENOMINATOR: i64 = 4096;

/// Accumulated raw sums of one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleBurst {
    sums: [u32; NUM_CHANNEL],
    samples: u32,
}

impl SampleBurst {
    /// Build a burst from precomputed sums. `samples` is clamped to at least 1.
    pub fn from_sums(sums: [u32; NUM_CHANNEL], samples: u32) -> Self {
        Self {
            sums,
            samples: samples.max(1),
        }
    }

    /// Number of bursts accumulated.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Summed raw counts of `channel`.
    pub fn sum(&self, channel: usize) -> u32 {
        self.sums.get(channel).copied().unwrap_or(0)
    }

    /// Truncated mean of one channel.
    pub fn average(&self, channel: usize) -> i64 {
        i64::from(self.sum(channel) / self.samples)
    }

    /// Convert the sums into calibrated values for the first `interfaces` interfaces.
    pub fn derive_measurements(&self, interfaces: usize) -> Measurements {
        let count = interfaces.min(NUM_INTERFACES);
        let mut readings = [InterfaceReading::default(); NUM_INTERFACES];
        for (i, reading) in readings.iter_mut().enumerate().take(count) {
            *reading = InterfaceReading {
                current: current_from_average(self.average(2 * i)),
                voltage: voltage_from_average(self.average(2 * i + 1)),
            };
        }
        Measurements {
            temperature: temperature_from_average(self.average(TEMPERATURE_CHANNEL)),
            readings,
            count,
        }
    }
}

/// Signed current ×256 A.
pub fn current_from_average(avg: i64) -> i32 {
    (((avg - CURRENT_OFFSET) * CURRENT_SCALE) / DENOMINATOR) as i32
}

/// Voltage ×256 V.
pub fn voltage_from_average(avg: i64) -> u32 {
    ((avg * VOLTAGE_SCALE + VOLTAGE_OFFSET) / DENOMINATOR).max(0) as u32
}

/// Temperature ×256 °C.
pub fn temperature_from_average(avg: i64) -> i32 {
    (((avg - TEMPERATURE_OFFSET) * TEMPERATURE_SCALE) / DENOMINATOR) as i32
}

/// Number of interfaces reported for a given conversion count.
pub fn interfaces_for(number_conversions: u8) -> usize {
    usize::from(number_conversions.saturating_sub(1)).min(NUM_INTERFACES)
}

/// One interface's calibrated pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceReading {
    /// Current in amperes, times 256.
    pub current: i32,
    /// Voltage in volts, times 256.
    pub voltage: u32,
}

/// Calibrated values of one measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurements {
    /// Temperature in degrees Celsius, times 256.
    pub temperature: i32,
    readings: [InterfaceReading; NUM_INTERFACES],
    count: usize,
}

impl Measurements {
    /// Readings of the interfaces that were converted this cycle.
    pub fn interfaces(&self) -> &[InterfaceReading] {
        &self.readings[..self.count]
    }
}

/// Run `samples` conversions and accumulate every channel.
///
/// Each conversion waits at most `timeout` for end-of-conversion; a missed deadline is a
/// hardware fault and the partial burst is discarded.
pub fn run_burst(
    adc: &mut dyn Adc,
    samples: u32,
    timeout: Duration,
) -> Result<SampleBurst, HardwareFault> {
    let samples = samples.max(1);
    let mut sums = [0u32; NUM_CHANNEL];
    for _ in 0..samples {
        adc.start_conversion()?;
        match poll_with_timeout(timeout, || {
            adc.take_end_of_conversion().map(|eoc| eoc.then_some(()))
        }) {
            PollOutcome::Ready(()) => {}
            PollOutcome::Timeout => {
                let waited_ms = timeout.as_millis() as u64;
                error!(waited_ms, "end of conversion never signalled");
                return Err(HardwareFault::ConversionTimeout { waited_ms });
            }
            PollOutcome::Fault(fault) => return Err(fault),
        }
        for (ch, sum) in sums.iter_mut().enumerate() {
            *sum = sum.wrapping_add(adc.read_channel(ch));
        }
    }
    trace!(samples, "burst complete");
    Ok(SampleBurst::from_sums(sums, samples))
}

/// Self-calibrate the converter, waiting at most `timeout`.
pub fn calibrate(adc: &mut dyn Adc, timeout: Duration) -> Result<(), HardwareFault> {
    adc.begin_calibration()?;
    match poll_with_timeout(timeout, || adc.is_calibrating().map(|busy| (!busy).then_some(()))) {
        PollOutcome::Ready(()) => Ok(()),
        PollOutcome::Timeout => Err(HardwareFault::CalibrationTimeout {
            waited_ms: timeout.as_millis() as u64,
        }),
        PollOutcome::Fault(fault) => Err(fault),
    }
}
