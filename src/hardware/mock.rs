//! Mock Hardware Implementations
//!
//! Provides simulated peripherals for testing without the board.
//!
//! # Available Mocks
//!
//! - `MockAdc` - scan converter returning programmable raw counts, optional noise, and a
//!   stall switch that keeps end-of-conversion from ever being raised
//! - `MockGpio` - three 16-bit output ports
//!
//! Both hand out cloneable handles sharing the same state, so a test can keep one handle
//! and move the other into the firmware.

use crate::error::HardwareFault;
use crate::hardware::capabilities::{Adc, Gpio, Port};
use crate::measurement::NUM_CHANNEL;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

// =============================================================================
// MockAdc - Simulated Scan Converter
// =============================================================================

struct AdcState {
    channels: [u32; NUM_CHANNEL],
    captured: [u32; NUM_CHANNEL],
    noise: u32,
    stalled: bool,
    calibration_polls: u32,
    end_of_conversion: bool,
    conversions: u64,
}

/// Simulated ADC with DMA capture buffer.
///
/// # Example
///
/// ```rust,ignore
/// let adc = MockAdc::new([2048; NUM_CHANNEL]);
/// adc.set_channel(1, 3000);
/// ```
#[derive(Clone)]
pub struct MockAdc {
    state: Arc<Mutex<AdcState>>,
}

impl MockAdc {
    /// Create a converter whose channels read `channels` exactly.
    pub fn new(channels: [u32; NUM_CHANNEL]) -> Self {
        Self {
            state: Arc::new(Mutex::new(AdcState {
                channels,
                captured: [0; NUM_CHANNEL],
                noise: 0,
                stalled: false,
                calibration_polls: 2,
                end_of_conversion: false,
                conversions: 0,
            })),
        }
    }

    /// Add up to `amplitude` counts of uniform noise to every conversion.
    pub fn with_noise(self, amplitude: u32) -> Self {
        self.state.lock().noise = amplitude;
        self
    }

    /// Set the raw value a channel converts to (12-bit range).
    pub fn set_channel(&self, channel: usize, raw: u32) {
        if let Some(slot) = self.state.lock().channels.get_mut(channel) {
            *slot = raw.min(0x0FFF);
        }
    }

    /// Stop raising end-of-conversion (and keep calibration running).
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Number of completed scans.
    pub fn conversions(&self) -> u64 {
        self.state.lock().conversions
    }
}

impl Adc for MockAdc {
    fn begin_calibration(&mut self) -> Result<(), HardwareFault> {
        self.state.lock().calibration_polls = 2;
        Ok(())
    }

    fn is_calibrating(&mut self) -> Result<bool, HardwareFault> {
        let mut state = self.state.lock();
        if state.stalled {
            return Ok(true);
        }
        if state.calibration_polls > 0 {
            state.calibration_polls -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn start_conversion(&mut self) -> Result<(), HardwareFault> {
        let mut state = self.state.lock();
        if state.stalled {
            return Ok(());
        }
        let noise = state.noise;
        let mut rng = rand::thread_rng();
        for ch in 0..NUM_CHANNEL {
            let base = state.channels[ch];
            state.captured[ch] = if noise == 0 {
                base
            } else {
                let delta = rng.gen_range(0..=2 * noise) as i64 - noise as i64;
                (base as i64 + delta).clamp(0, 0x0FFF) as u32
            };
        }
        state.conversions += 1;
        state.end_of_conversion = true;
        Ok(())
    }

    fn take_end_of_conversion(&mut self) -> Result<bool, HardwareFault> {
        let mut state = self.state.lock();
        Ok(std::mem::take(&mut state.end_of_conversion))
    }

    fn read_channel(&self, channel: usize) -> u32 {
        self.state.lock().captured.get(channel).copied().unwrap_or(0)
    }
}

// =============================================================================
// MockGpio - Simulated Output Ports
// =============================================================================

/// Simulated GPIO output data registers for ports A, B and C.
#[derive(Clone, Default)]
pub struct MockGpio {
    ports: Arc<Mutex<[u16; 3]>>,
}

impl MockGpio {
    /// All outputs low.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a port (for assertions).
    pub fn port(&self, port: Port) -> u16 {
        self.ports.lock()[port.index()]
    }
}

impl Gpio for MockGpio {
    fn read_port(&self, port: Port) -> u16 {
        self.ports.lock()[port.index()]
    }

    fn write_port(&mut self, port: Port, value: u16) {
        self.ports.lock()[port.index()] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_captures_channels_and_raises_eoc_once() {
        let mut adc = MockAdc::new([100; NUM_CHANNEL]);
        adc.set_channel(3, 4000);
        adc.start_conversion().unwrap();
        assert!(adc.take_end_of_conversion().unwrap());
        assert!(!adc.take_end_of_conversion().unwrap());
        assert_eq!(adc.read_channel(3), 4000);
        assert_eq!(adc.read_channel(0), 100);
        assert_eq!(adc.conversions(), 1);
    }

    #[test]
    fn stalled_adc_never_completes() {
        let mut adc = MockAdc::new([0; NUM_CHANNEL]);
        adc.set_stalled(true);
        adc.start_conversion().unwrap();
        assert!(!adc.take_end_of_conversion().unwrap());
    }

    #[test]
    fn noise_stays_within_amplitude() {
        let mut adc = MockAdc::new([2000; NUM_CHANNEL]).with_noise(3);
        for _ in 0..50 {
            adc.start_conversion().unwrap();
            let v = adc.read_channel(0);
            assert!((1997..=2003).contains(&v));
        }
    }

    #[test]
    fn gpio_bit_helpers_preserve_other_bits() {
        let mut gpio = MockGpio::new();
        gpio.write_port(Port::C, 0x8001);
        gpio.set_bits(Port::C, 0x0100);
        gpio.clear_bits(Port::C, 0x0001);
        assert_eq!(gpio.port(Port::C), 0x8100);
    }
}
