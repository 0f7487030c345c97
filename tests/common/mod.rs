//! Shared harness: a booted firmware over simulated peripherals.

#![allow(dead_code)]

use battery_daq::clock::Rtc;
use battery_daq::comms::{channel, LinkEnds, RX_CAPACITY};
use battery_daq::configuration::MemoryFlash;
use battery_daq::files::{HostVolume, Volume};
use battery_daq::firmware::{BootOptions, Firmware, Peripherals};
use battery_daq::hardware::mock::{MockAdc, MockGpio};
use battery_daq::measurement::NUM_CHANNEL;
use chrono::NaiveDate;

pub struct Bench {
    pub firmware: Firmware,
    pub ends: LinkEnds,
    pub adc: MockAdc,
    pub gpio: MockGpio,
    pub flash: MemoryFlash,
    pub dir: tempfile::TempDir,
}

impl Bench {
    pub fn new() -> Self {
        Self::with_flash(MemoryFlash::new())
    }

    pub fn with_flash(flash: MemoryFlash) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut volume = HostVolume::new(dir.path().join("sd"), 64 << 20, 8);
        volume.format().expect("format volume");

        let adc = MockAdc::new([2028; NUM_CHANNEL]);
        let gpio = MockGpio::new();
        let (comms, ends) = channel(RX_CAPACITY, 4096);
        let start = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date");
        let firmware = Firmware::boot(
            Peripherals {
                adc: Box::new(adc.clone()),
                gpio: Box::new(gpio.clone()),
                volume: Box::new(volume),
                flash: Box::new(flash.clone()),
            },
            comms,
            Rtc::new(start),
            BootOptions::default(),
        )
        .expect("boot");

        Self {
            firmware,
            ends,
            adc,
            gpio,
            flash,
            dir,
        }
    }

    /// Deliver one command line and run the main loop until it is consumed.
    pub fn command(&mut self, line: &str) -> String {
        self.ends.receive(format!("{line}\r\n").as_bytes());
        self.firmware.drain_commands();
        self.output()
    }

    pub fn output(&mut self) -> String {
        String::from_utf8(self.ends.take_output()).expect("ascii output")
    }
}
