//! Automatic test runs.
//!
//! A run is armed by `aG`, becomes active at the next once-per-second evaluation and
//! ends on `aX`, on time expiry (timed runs) or when the target device's voltage drops
//! below the voltage limit. Ending a run disconnects its connection point.
//!
//! ```text
//!   Idle --aG--> Armed --1 Hz--> Running --limit / aX--> Idle
//!                  |                                      ^
//!                  +------------------aX------------------+
//! ```
//!
//! The checks run once per second only, so a trip is seen up to a second late.

use crate::switch::{ConnectionPoint, Device};
use tracing::{debug, info, warn};

/// Kind of test run, selected with `pR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    /// Ends on `aX` or the voltage floor.
    Manual = 1,
    /// Also ends once the time limit has passed.
    Timed = 2,
    /// Ends when the voltage falls below the limit.
    Voltage = 3,
}

impl TestType {
    /// Parse the code sent with `pR`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TestType::Manual),
            2 => Some(TestType::Timed),
            3 => Some(TestType::Voltage),
            _ => None,
        }
    }
}

/// Where the controller is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No run configured or started.
    #[default]
    Idle,
    /// `aG` accepted, waiting for the next systick.
    Armed,
    /// Limits are being evaluated every systick.
    Running,
}

/// Test-run parameters and state.
#[derive(Debug, Clone, Default)]
pub struct TestRunController {
    test_type: u8,
    voltage_limit: u32,
    time_limit: u32,
    elapsed: u32,
    seconds: u32,
    phase: Phase,
    target: Option<(Device, ConnectionPoint)>,
}

impl TestRunController {
    /// Idle controller with no limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw type code as last set (0 until set).
    pub fn set_test_type(&mut self, code: u8) {
        self.test_type = code;
    }

    /// Voltage limit, volts times 256.
    pub fn set_voltage_limit(&mut self, limit: u32) {
        self.voltage_limit = limit;
    }

    /// Time limit in seconds.
    pub fn set_time_limit(&mut self, seconds: u32) {
        self.time_limit = seconds;
    }

    /// Remember the connection the run supervises.
    pub fn set_target(&mut self, device: Device, point: ConnectionPoint) {
        self.target = Some((device, point));
    }

    /// `(type, time limit, voltage limit)` as reported by `aP`.
    pub fn preset(&self) -> (u8, u32, u32) {
        (self.test_type, self.time_limit, self.voltage_limit)
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Seconds in the Running phase.
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    /// Seconds since the run was started.
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Arm a run. Ignored unless the type is 1-3 and the voltage limit is positive.
    pub fn start(&mut self) -> bool {
        if TestType::from_code(self.test_type).is_none() || self.voltage_limit == 0 {
            debug!(
                test_type = self.test_type,
                voltage_limit = self.voltage_limit,
                "test start ignored"
            );
            return false;
        }
        if self.target.is_none() {
            warn!(
                test_type = self.test_type,
                "test run armed without a target; voltage limit will not be checked"
            );
        }
        self.phase = Phase::Armed;
        self.seconds = 0;
        self.elapsed = 0;
        info!(
            test_type = self.test_type,
            time_limit = self.time_limit,
            voltage_limit = self.voltage_limit,
            "test run armed"
        );
        true
    }

    /// Manual stop.
    pub fn stop(&mut self) {
        if self.phase != Phase::Idle {
            info!(elapsed = self.elapsed, "test run stopped");
        }
        self.phase = Phase::Idle;
        self.elapsed = 0;
    }

    /// Once-per-second evaluation against the latest per-interface voltages.
    ///
    /// Returns the connection point to disconnect when the run ends here.
    pub fn evaluate(&mut self, voltages: &[u32]) -> Option<ConnectionPoint> {
        match self.phase {
            Phase::Idle => return None,
            Phase::Armed => self.phase = Phase::Running,
            Phase::Running => {}
        }
        self.seconds = self.seconds.saturating_add(1);
        self.elapsed = self.elapsed.saturating_add(1);

        let timed_out =
            self.test_type == TestType::Timed as u8 && self.elapsed > self.time_limit;
        let under_voltage = self.target.is_some_and(|(device, _)| {
            voltages
                .get(device.interface())
                .is_some_and(|v| *v < self.voltage_limit)
        });
        if !(timed_out || under_voltage) {
            return None;
        }

        info!(
            elapsed = self.elapsed,
            timed_out, under_voltage, "test run limit reached"
        );
        self.phase = Phase::Idle;
        self.elapsed = 0;
        self.target.map(|(_, point)| point)
    }
}
