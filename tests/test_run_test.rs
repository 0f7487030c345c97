//! Discharge runs driven through the command set and the 1 Hz evaluation.

mod common;

use battery_daq::firmware::{TIMER_PROCS_PER_SECOND, TIMER_PROC_PERIOD_MS};
use battery_daq::measurement::NUM_INTERFACES;
use battery_daq::test_run::Phase;
use common::Bench;

/// Voltages are in 1/256 V.
fn hold_voltage(bench: &Bench, level: u32) {
    let shared = bench.firmware.shared();
    for interface in 0..NUM_INTERFACES {
        shared.set_voltage(interface, level);
    }
}

#[test]
fn test_timed_run_disconnects_after_limit() {
    let mut bench = Bench::new();
    bench.command("pR2");
    bench.command("pT10");
    bench.command("pV512");
    bench.command("aS12");
    bench.command("aG");
    hold_voltage(&bench, 3_280);

    let shared = bench.firmware.shared();
    for _ in 0..10 {
        shared.evaluate_test_run();
    }
    assert_eq!(shared.test_run.lock().phase(), Phase::Running);
    assert_eq!(shared.switches.lock().connection_bits(), 0x04);

    shared.evaluate_test_run();
    assert_eq!(shared.test_run.lock().phase(), Phase::Idle);
    assert_eq!(shared.switches.lock().connection_bits(), 0);
}

#[test]
fn test_voltage_run_stops_below_floor() {
    let mut bench = Bench::new();
    bench.command("pR3");
    bench.command("pV3021");
    bench.command("aS21");
    bench.command("aS13");
    bench.command("aG");
    hold_voltage(&bench, 3_230);

    let shared = bench.firmware.shared();
    shared.evaluate_test_run();
    assert!(shared.test_run.lock().is_running());

    // Target is the last switch command: device 1 on the source.
    shared.set_voltage(0, 3_020);
    shared.evaluate_test_run();
    assert_eq!(shared.test_run.lock().phase(), Phase::Idle);
    let state = shared.switches.lock().state();
    assert_eq!(state.pack() & 0b11_00_00, 0);
    assert_ne!(state.pack() & 0b00_00_11, 0);
}

#[test]
fn test_manual_run_only_ends_on_stop() {
    let mut bench = Bench::new();
    bench.command("pR1");
    bench.command("pV100");
    bench.command("aS22");
    bench.command("aG");
    hold_voltage(&bench, 3_100);

    let shared = bench.firmware.shared();
    for _ in 0..120 {
        shared.evaluate_test_run();
    }
    assert!(shared.test_run.lock().is_running());

    bench.command("aX");
    assert_eq!(shared.test_run.lock().phase(), Phase::Idle);
    assert_eq!(shared.switches.lock().connection_bits(), 0);
}

#[test]
fn test_start_without_voltage_limit_is_ignored() {
    let mut bench = Bench::new();
    bench.command("pR2");
    bench.command("pT5");
    bench.command("aG");
    assert_eq!(
        bench.firmware.shared().test_run.lock().phase(),
        Phase::Idle
    );
}

#[test]
fn test_cycle_reports_run_progress() {
    let mut bench = Bench::new();
    bench.command("pR1");
    bench.command("pV1");
    bench.command("aS11");
    bench.command("aG");
    hold_voltage(&bench, 3_100);

    bench.firmware.measurement_cycle().expect("cycle");
    let armed = bench.output();
    assert!(armed.contains("dr,0\r\n"));
    assert!(!armed.contains("dR,"));
    assert!(armed.ends_with("dX,0\r\n"));

    let shared = bench.firmware.shared();
    shared.evaluate_test_run();
    shared.evaluate_test_run();
    bench.firmware.measurement_cycle().expect("cycle");
    let running = bench.output();
    assert!(running.contains("dR,2\r\ndr,2\r\n"));
    assert!(running.ends_with("dX,1\r\n"));
}

#[test]
fn test_systick_evaluates_once_per_second() {
    let mut bench = Bench::new();
    bench.command("pR2");
    bench.command("pT1");
    bench.command("pV1");
    bench.command("aS11");
    bench.command("aG");
    hold_voltage(&bench, 3_100);

    let shared = bench.firmware.shared();
    let one_second = TIMER_PROC_PERIOD_MS * TIMER_PROCS_PER_SECOND;
    for _ in 0..one_second {
        shared.systick();
    }
    assert!(shared.test_run.lock().is_running());
    assert_eq!(shared.test_run.lock().elapsed(), 1);

    for _ in 0..one_second {
        shared.systick();
    }
    assert_eq!(shared.test_run.lock().phase(), Phase::Idle);
    assert_eq!(shared.switches.lock().connection_bits(), 0);
}

#[test]
fn test_voltage_run_trips_within_one_evaluation() {
    let mut bench = Bench::new();
    bench.command("pR3");
    bench.command("pV512");
    bench.command("aS11");
    bench.command("aG");
    let shared = bench.firmware.shared();
    shared.set_voltage(0, 0x01F0);

    shared.evaluate_test_run();
    assert_eq!(shared.test_run.lock().phase(), Phase::Idle);
    assert_eq!(shared.switches.lock().connection_bits(), 0);
}

#[test]
fn test_voltage_run_without_switch_command_keeps_running() {
    let mut bench = Bench::new();
    bench.command("pR3");
    bench.command("pV512");
    bench.command("aG");
    hold_voltage(&bench, 0);

    let shared = bench.firmware.shared();
    for _ in 0..5 {
        shared.evaluate_test_run();
    }
    let run = shared.test_run.lock();
    assert!(run.is_running());
    assert_eq!(run.elapsed(), 5);
    drop(run);
    assert_eq!(shared.switches.lock().connection_bits(), 0);
}
