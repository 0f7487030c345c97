//! SD-card file commands end to end over a directory-backed volume.

mod common;

use common::Bench;
use std::fs;

fn seed(bench: &Bench, name: &str, contents: &str) {
    fs::write(bench.dir.path().join("sd").join(name), contents).expect("seed file");
}

#[test]
fn test_free_space_on_empty_volume() {
    let mut bench = Bench::new();
    // 64 MiB at 8 sectors (4 KiB) per cluster.
    assert_eq!(bench.command("fF"), "fF,16384,8\r\nfE,0\r\n");
}

#[test]
fn test_read_file_line_by_line() {
    let mut bench = Bench::new();
    seed(&bench, "run1.csv", "dT,6400\r\ndB1,120,3281\r\n");

    assert_eq!(bench.command("fRrun1.csv"), "fR,0\r\nfE,0\r\n");
    assert_eq!(bench.command("fG0"), "fG,dT,6400\r\nfE,0\r\n");
    assert_eq!(bench.command("fG0"), "fG,dB1,120,3281\r\nfE,0\r\n");
    assert_eq!(bench.command("fG0"), "fG,\r\nfE,0\r\n");
    assert_eq!(bench.command("fC0"), "fE,0\r\n");
}

#[test]
fn test_read_line_on_unknown_handle_is_silent() {
    let mut bench = Bench::new();
    assert_eq!(bench.command("fG1"), "");
    assert_eq!(bench.command("fG255"), "");
}

#[test]
fn test_open_missing_file_for_read() {
    let mut bench = Bench::new();
    assert_eq!(bench.command("fRnone.txt"), "fE,4\r\n");
    assert_eq!(bench.command("fs"), "fs,6,255,255\r\n");
}

#[test]
fn test_write_and_read_files_share_the_pool() {
    let mut bench = Bench::new();
    seed(&bench, "old.csv", "x\r\n");
    assert_eq!(bench.command("fWnew.csv"), "fW,0\r\nfE,0\r\n");
    assert_eq!(bench.command("fRold.csv"), "fR,1\r\nfE,0\r\n");
    assert_eq!(bench.command("fs"), "fs,6,0,new.csv,1,old.csv\r\n");

    bench.command("fC1");
    assert_eq!(bench.command("fs"), "fs,6,0,new.csv,255\r\n");
}

#[test]
fn test_stale_handle_after_close() {
    let mut bench = Bench::new();
    bench.command("fWa.csv");
    bench.command("fC0");
    // Closing again reports an invalid object.
    assert_eq!(bench.command("fC0"), "fE,9\r\n");
}

#[test]
fn test_directory_listing() {
    let mut bench = Bench::new();
    seed(&bench, "a.csv", "12345");
    seed(&bench, "b.csv", "");
    fs::create_dir(bench.dir.path().join("sd/logs")).expect("subdir");

    assert_eq!(bench.command("fd/"), "fd,f00000005a.csv\r\nfE,0\r\n");
    assert_eq!(bench.command("fd"), "fd,f00000000b.csv\r\nfE,0\r\n");
    let dir = bench.command("fd");
    assert!(dir.starts_with("fd,d"));
    assert!(dir.contains("logs\r\n"));
    assert_eq!(bench.command("fd"), "fd,e\r\nfE,0\r\n");
}

#[test]
fn test_directory_listing_without_open_directory() {
    let mut bench = Bench::new();
    assert_eq!(bench.command("fd"), "fd,n00000000\r\nfE,9\r\n");
}

#[test]
fn test_directory_listing_of_missing_directory() {
    let mut bench = Bench::new();
    assert_eq!(bench.command("fdnosuchdir"), "fd,n00000000\r\nfE,5\r\n");
    // The failed open leaves no listing to continue.
    assert_eq!(bench.command("fd"), "fd,n00000000\r\nfE,9\r\n");
}

#[test]
fn test_delete() {
    let mut bench = Bench::new();
    seed(&bench, "gone.csv", "x");
    assert_eq!(bench.command("fXgone.csv"), "fE,0\r\n");
    assert!(!bench.dir.path().join("sd/gone.csv").exists());
    assert_eq!(bench.command("fXgone.csv"), "fE,4\r\n");
}

#[test]
fn test_long_file_name_is_rejected() {
    let mut bench = Bench::new();
    assert_eq!(bench.command("fWmeasurements.csv"), "");
    assert_eq!(bench.command("fs"), "fs,6,255,255\r\n");
}

#[test]
fn test_remount_closes_files() {
    let mut bench = Bench::new();
    bench.command("fWa.csv");
    bench.command("pr+");
    assert_eq!(bench.command("fM"), "fE,0\r\n");
    assert!(!bench.firmware.shared().config.lock().recording);
    assert_eq!(bench.command("fs"), "fs,6,255,255\r\n");
}

#[test]
fn test_file_commands_ignored_without_volume() {
    let mut bench = Bench::new();
    fs::remove_dir_all(bench.dir.path().join("sd")).expect("remove volume");
    assert_eq!(bench.command("fM"), "fE,13\r\n");
    assert_eq!(bench.command("fWa.csv"), "");
    assert_eq!(bench.command("fd/"), "");

    // Formatting brings the volume back.
    assert_eq!(bench.command("fZ"), "D,Creating Filesystem\r\nfE,0\r\n");
    assert_eq!(bench.command("fWa.csv"), "fW,0\r\nfE,0\r\n");
}
