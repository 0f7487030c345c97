//! Main acquisition loop and the state it shares with the systick.
//!
//! Two contexts touch the firmware state: the main loop ([`Firmware::step`]) and the
//! periodic tick ([`Shared::systick`]). Everything both of them reach lives in
//! [`Shared`], behind a mutex or in an atomic. State only the main loop uses (ADC,
//! communication channel, file service, flash page) is owned by [`Firmware`].
//!
//! # Tick structure
//!
//! - every 1 ms: measurement countdown, real-time clock
//! - every 10 ms: timer procedure (reset pulse release)
//! - every 1 s (100 timer procedures): test-run evaluation

use crate::clock::Rtc;
use crate::comms::{CommsChannel, Record};
use crate::configuration::{load_configuration, ConfigStore, Configuration};
use crate::error::{AppResult, HardwareFault};
use crate::files::{FileService, Volume};
use crate::hardware::capabilities::{Adc, Gpio};
use crate::measurement::{calibrate, interfaces_for, run_burst, Measurements, NUM_INTERFACES};
use crate::switch::SwitchController;
use crate::test_run::{Phase, TestRunController};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Countdown values above this are treated as wrapped and reloaded.
pub const COUNTDOWN_GUARD: u32 = 0x00FF_FFFF;

/// Systick milliseconds per timer procedure.
pub const TIMER_PROC_PERIOD_MS: u32 = 10;

/// Timer procedures per test-run evaluation.
pub const TIMER_PROCS_PER_SECOND: u32 = 100;

/// Firmware version reported by `aE`.
pub const FIRMWARE_VERSION: &str = "1.00";

/// Identification text of the `dE` record.
pub const IDENTIFICATION: &str = "Data Acquisition System";

// =============================================================================
// Shared state
// =============================================================================

/// State reached from both the main loop and the systick.
pub struct Shared {
    /// Persisted configuration block.
    pub config: Mutex<Configuration>,
    /// Switch matrix.
    pub switches: Mutex<SwitchController>,
    /// Discharge run controller.
    pub test_run: Mutex<TestRunController>,
    /// Real-time clock.
    pub rtc: Rtc,
    countdown: AtomicU32,
    voltages: [AtomicU32; NUM_INTERFACES],
    millis: AtomicU32,
    timer_procs: AtomicU32,
    shutdown: AtomicBool,
}

impl Shared {
    /// Shared state with measurement disabled and no pending work.
    pub fn new(config: Configuration, switches: SwitchController, rtc: Rtc) -> Self {
        let interval = config.measurement_interval.max(1);
        Self {
            config: Mutex::new(config),
            switches: Mutex::new(switches),
            test_run: Mutex::new(TestRunController::new()),
            rtc,
            countdown: AtomicU32::new(interval),
            voltages: Default::default(),
            millis: AtomicU32::new(0),
            timer_procs: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// 1 ms periodic tick.
    pub fn systick(&self) {
        // Saturating: the host loop may be late, so never let the count wrap.
        let _ = self
            .countdown
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(1))
            });
        self.rtc.tick_ms();
        let ms = self.millis.fetch_add(1, Ordering::AcqRel) + 1;
        if ms >= TIMER_PROC_PERIOD_MS {
            self.millis.store(0, Ordering::Release);
            self.timer_proc();
        }
    }

    /// 10 ms timer procedure.
    pub fn timer_proc(&self) {
        self.switches.lock().tick();
        let procs = self.timer_procs.fetch_add(1, Ordering::AcqRel) + 1;
        if procs >= TIMER_PROCS_PER_SECOND {
            self.timer_procs.store(0, Ordering::Release);
            self.evaluate_test_run();
        }
    }

    /// Once-per-second test-run evaluation.
    pub fn evaluate_test_run(&self) {
        let voltages = self.voltages();
        let disconnect = self.test_run.lock().evaluate(&voltages);
        if let Some(point) = disconnect {
            self.switches.lock().set_connection(None, point);
        }
    }

    /// Remaining systick ticks until the next measurement.
    pub fn countdown(&self) -> u32 {
        self.countdown.load(Ordering::Acquire)
    }

    /// Reload the measurement countdown.
    pub fn set_countdown(&self, value: u32) {
        self.countdown.store(value, Ordering::Release);
    }

    /// Latest measured voltage of every interface.
    pub fn voltages(&self) -> [u32; NUM_INTERFACES] {
        std::array::from_fn(|i| self.voltages[i].load(Ordering::Acquire))
    }

    /// Record the latest voltage of `interface` for the run controller.
    pub fn set_voltage(&self, interface: usize, value: u32) {
        if let Some(slot) = self.voltages.get(interface) {
            slot.store(value, Ordering::Release);
        }
    }

    /// Ask the main loop to exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// =============================================================================
// Firmware
// =============================================================================

/// Hardware and storage the firmware is built on.
pub struct Peripherals {
    /// Analog converter.
    pub adc: Box<dyn Adc>,
    /// Switch and reset outputs.
    pub gpio: Box<dyn Gpio>,
    /// SD card.
    pub volume: Box<dyn Volume>,
    /// Flash page holding the configuration block.
    pub flash: Box<dyn ConfigStore>,
}

/// Boot options.
#[derive(Debug, Clone)]
pub struct BootOptions {
    /// Factory configuration used when the flash page is not valid.
    pub defaults: Configuration,
    /// Longest wait for one end-of-conversion.
    pub conversion_timeout: Duration,
    /// Longest wait for ADC self-calibration.
    pub calibration_timeout: Duration,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            defaults: Configuration::default(),
            conversion_timeout: Duration::from_millis(50),
            calibration_timeout: Duration::from_millis(100),
        }
    }
}

/// Counters kept for diagnosis only; nothing is reported for them on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    /// Command lines that failed to parse.
    pub rejected_commands: u64,
    /// Bytes discarded because the receive ring was full.
    pub rx_dropped: u64,
    /// Bytes discarded because the transmit ring was full.
    pub tx_dropped: u64,
}

/// The main-loop side of the firmware.
pub struct Firmware {
    pub(crate) shared: Arc<Shared>,
    pub(crate) comms: CommsChannel,
    pub(crate) adc: Box<dyn Adc>,
    pub(crate) files: FileService,
    pub(crate) flash: Box<dyn ConfigStore>,
    pub(crate) diagnostics: Diagnostics,
    conversion_timeout: Duration,
}

impl Firmware {
    /// Calibrate the ADC, restore the configuration and mount the volume.
    pub fn boot(
        peripherals: Peripherals,
        comms: CommsChannel,
        rtc: Rtc,
        options: BootOptions,
    ) -> AppResult<Self> {
        let Peripherals {
            mut adc,
            gpio,
            volume,
            mut flash,
        } = peripherals;

        calibrate(adc.as_mut(), options.calibration_timeout).map_err(|fault| {
            error!(%fault, "ADC calibration failed");
            fault
        })?;

        let config = load_configuration(flash.as_mut(), options.defaults);
        let shared = Arc::new(Shared::new(config, SwitchController::new(gpio), rtc));
        let files = FileService::new(volume);

        info!(
            interval = config.measurement_interval,
            samples = config.number_samples,
            conversions = config.number_conversions,
            mounted = files.is_usable(),
            "firmware booted"
        );

        Ok(Self {
            shared,
            comms,
            adc,
            files,
            flash,
            diagnostics: Diagnostics::default(),
            conversion_timeout: options.conversion_timeout,
        })
    }

    /// State shared with the systick task.
    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// SD-card file service.
    pub fn files(&self) -> &FileService {
        &self.files
    }

    /// Snapshot of the link and parser counters.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    fn interval(&self) -> u32 {
        self.shared.config.lock().measurement_interval.max(1)
    }

    /// One main-loop iteration.
    ///
    /// Returns `Ok(true)` when a measurement cycle ran. A hardware fault is fatal.
    pub fn step(&mut self) -> AppResult<bool> {
        if let Some(line) = self.comms.poll_line() {
            self.dispatch_line(&line);
        }
        if self.shared.countdown() > COUNTDOWN_GUARD {
            self.shared.set_countdown(self.interval());
        }
        if self.shared.countdown() != 0 {
            return Ok(false);
        }
        self.measurement_cycle()?;
        self.shared.set_countdown(self.interval());
        Ok(true)
    }

    /// Execute every command line already received.
    pub fn drain_commands(&mut self) {
        while let Some(line) = self.comms.poll_line() {
            self.dispatch_line(&line);
        }
    }

    /// Sample, derive and report one set of measurements.
    pub fn measurement_cycle(&mut self) -> Result<Measurements, HardwareFault> {
        let config = *self.shared.config.lock();
        let burst = run_burst(self.adc.as_mut(), config.samples(), self.conversion_timeout)?;
        let measurements = burst.derive_measurements(interfaces_for(config.number_conversions));
        for (i, reading) in measurements.interfaces().iter().enumerate() {
            self.shared.set_voltage(i, reading.voltage);
        }

        self.send_measurement(Record::text("pH", self.shared.rtc.to_iso()));
        self.send_measurement(Record::single("dT", measurements.temperature));
        for (i, reading) in measurements.interfaces().iter().enumerate() {
            self.send_measurement(Record::dual(
                format!("dB{}", i + 1),
                reading.current,
                reading.voltage,
            ));
        }
        let bits = self.shared.switches.lock().connection_bits();
        self.send_measurement(Record::single("ds", bits));

        let (phase, elapsed, seconds) = {
            let run = self.shared.test_run.lock();
            (run.phase(), run.elapsed(), run.seconds())
        };
        if phase == Phase::Running {
            self.send_measurement(Record::single("dR", elapsed));
        }
        if phase != Phase::Idle {
            self.send_measurement(Record::single("dr", seconds));
        }
        self.send_measurement(Record::single("dX", u8::from(phase == Phase::Running)));

        self.report_drops();
        debug!(temperature = measurements.temperature, "measurement cycle done");
        Ok(measurements)
    }

    fn report_drops(&mut self) {
        let rx = self.comms.rx_dropped();
        let tx = self.comms.tx_dropped();
        if rx == self.diagnostics.rx_dropped && tx == self.diagnostics.tx_dropped {
            return;
        }
        self.diagnostics.rx_dropped = rx;
        self.diagnostics.tx_dropped = tx;
        self.send_debug(format!("Dropped bytes,{rx},{tx}"));
    }

    /// Send a measurement-cycle record and mirror it to the write file when recording.
    pub(crate) fn send_measurement(&mut self, record: Record) {
        let config = *self.shared.config.lock();
        if config.enable_send && config.measurement_send {
            self.comms.send(&record);
        }
        if config.recording {
            self.record(&record);
        }
    }

    /// Send a command response.
    pub(crate) fn send_response(&mut self, record: Record) {
        self.comms.send(&record);
    }

    /// Send a `D` record when debug messages are enabled.
    pub(crate) fn send_debug(&mut self, text: impl Into<String>) {
        if self.shared.config.lock().debug_send {
            self.comms.send(&Record::text("D", text));
        }
    }

    fn record(&mut self, record: &Record) {
        if self.files.write_designation().is_none() {
            return;
        }
        if let Err(status) = self.files.record_line(&record.to_wire()) {
            warn!(%status, tag = %record.tag, "recording write failed");
        }
    }

    /// Disconnect every connection point before stopping.
    pub fn shutdown(&mut self) {
        self.shared.switches.lock().disconnect_all();
        self.shared.test_run.lock().stop();
        info!("all connection points disconnected");
    }
}
