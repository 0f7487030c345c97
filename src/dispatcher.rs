//! Command line parsing and dispatch.
//!
//! A command line is `<category><verb>[parameters]`:
//!
//! | Category | Meaning |
//! |---|---|
//! | `a` | action |
//! | `d` | data request |
//! | `p` | parameter |
//! | `f` | file |
//!
//! Lines that do not parse into a [`Command`] (unknown category or verb, out-of-range
//! digits, overlong file names) are dropped without a response. They are counted and
//! logged at debug level only.
//!
//! File commands other than `fF`, `fs`, `fM` and `fZ` are ignored while the volume is
//! not mounted.

use crate::comms::Record;
use crate::files::{status_code, DirStep, EntryKind};
use crate::firmware::{Firmware, FIRMWARE_VERSION, IDENTIFICATION};
use crate::switch::{ConnectionPoint, Device};
use tracing::{debug, info, warn};

/// Longest accepted file name is one less than this.
pub const FILE_NAME_LIMIT: usize = 12;

/// Text of the `D` record sent before formatting the volume.
const CREATING_FILESYSTEM: &str = "Creating Filesystem";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Actions
    SetSwitch { device: Device, point: ConnectionPoint },
    ReportPreset,
    StartTest,
    StopTest,
    ResetInterface(usize),
    WriteConfig,
    Identify,
    // Data requests
    ReportTime,
    // Parameters
    EnableSend(bool),
    DebugSend(bool),
    SetTime(String),
    MeasurementSend(bool),
    Recording(bool),
    TimeLimit(u32),
    VoltageLimit(u32),
    TestType(u8),
    // Files
    FreeSpace,
    DirEntry(String),
    OpenWrite(String),
    OpenRead(String),
    ReadLine(u8),
    FileStatus,
    Close(u8),
    Delete(String),
    Mount,
    MakeFilesystem,
}

impl Command {
    /// Whether this command needs a mounted volume.
    fn needs_volume(&self) -> bool {
        matches!(
            self,
            Command::DirEntry(_)
                | Command::OpenWrite(_)
                | Command::OpenRead(_)
                | Command::ReadLine(_)
                | Command::Close(_)
                | Command::Delete(_)
        )
    }
}

/// Leading decimal digits as an integer; no digits gives 0.
pub fn ascii_to_int(text: &str) -> u32 {
    text.trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(u32::from(d - b'0'))
        })
}

fn digit(byte: Option<&u8>) -> u8 {
    byte.map_or(0, |b| b.wrapping_sub(b'0'))
}

fn switch_flag(byte: Option<&u8>) -> Option<bool> {
    match byte {
        Some(b'+') => Some(true),
        Some(b'-') => Some(false),
        _ => None,
    }
}

fn file_name(rest: &str) -> Option<String> {
    let name = rest.trim();
    (name.len() < FILE_NAME_LIMIT).then(|| name.to_string())
}

fn handle(rest: &str) -> u8 {
    u8::try_from(ascii_to_int(rest)).unwrap_or(u8::MAX)
}

/// Parse one command line.
pub fn parse(line: &str) -> Option<Command> {
    let bytes = line.as_bytes();
    let category = *bytes.first()?;
    let verb = *bytes.get(1)?;
    let params = &bytes[2..];
    let rest = line.get(2..).unwrap_or_default();

    let command = match (category, verb) {
        (b'a', b'S') => {
            let device = Device::from_number(digit(params.first()))?;
            let point = ConnectionPoint::from_index(digit(params.get(1)).wrapping_sub(1))?;
            Command::SetSwitch { device, point }
        }
        (b'a', b'P') => Command::ReportPreset,
        (b'a', b'G') => Command::StartTest,
        (b'a', b'X') => Command::StopTest,
        (b'a', b'R') => {
            let interface = usize::from(digit(params.first()));
            if params.first().map_or(true, |b| !b.is_ascii_digit()) || interface > 5 {
                return None;
            }
            Command::ResetInterface(interface)
        }
        (b'a', b'W') => Command::WriteConfig,
        (b'a', b'E') => Command::Identify,

        (b'd', b'H') => Command::ReportTime,

        (b'p', b'c') => Command::EnableSend(switch_flag(params.first())?),
        (b'p', b'd') => Command::DebugSend(switch_flag(params.first())?),
        (b'p', b'H') => Command::SetTime(rest.trim().to_string()),
        (b'p', b'M') => Command::MeasurementSend(switch_flag(params.first())?),
        (b'p', b'r') => Command::Recording(switch_flag(params.first())?),
        (b'p', b'T') => Command::TimeLimit(ascii_to_int(rest)),
        (b'p', b'V') => Command::VoltageLimit(ascii_to_int(rest)),
        (b'p', b'R') => Command::TestType(digit(params.first())),

        (b'f', b'F') => Command::FreeSpace,
        (b'f', b'd') => Command::DirEntry(rest.trim().to_string()),
        (b'f', b'W') => Command::OpenWrite(file_name(rest)?),
        (b'f', b'R') => Command::OpenRead(file_name(rest)?),
        (b'f', b'G') => Command::ReadLine(handle(rest)),
        (b'f', b's') => Command::FileStatus,
        (b'f', b'C') => Command::Close(handle(rest)),
        (b'f', b'X') => Command::Delete(rest.trim().to_string()),
        (b'f', b'M') => Command::Mount,
        (b'f', b'Z') => Command::MakeFilesystem,
        _ => return None,
    };
    Some(command)
}

impl Firmware {
    /// Parse and execute one received line.
    pub fn dispatch_line(&mut self, line: &str) {
        match parse(line) {
            Some(command) => {
                debug!(?command, "command");
                self.execute(command);
            }
            None => {
                self.diagnostics.rejected_commands += 1;
                debug!(
                    line,
                    rejected = self.diagnostics.rejected_commands,
                    "command ignored"
                );
            }
        }
    }

    /// Execute a parsed command.
    pub fn execute(&mut self, command: Command) {
        if command.needs_volume() && !self.files.is_usable() {
            debug!(?command, "file system not usable, command ignored");
            return;
        }
        match command {
            Command::SetSwitch { device, point } => {
                self.shared
                    .switches
                    .lock()
                    .set_connection(Some(device), point);
                self.shared.test_run.lock().set_target(device, point);
            }
            Command::ReportPreset => {
                let (test_type, time_limit, voltage_limit) = self.shared.test_run.lock().preset();
                self.send_response(Record::dual("dP", test_type, time_limit));
                self.send_response(Record::single("dV", voltage_limit));
            }
            Command::StartTest => {
                self.shared.test_run.lock().start();
            }
            Command::StopTest => {
                self.shared.switches.lock().disconnect_all();
                self.shared.test_run.lock().stop();
            }
            Command::ResetInterface(interface) => {
                self.shared.switches.lock().reset_interface(interface);
            }
            Command::WriteConfig => self.write_config(),
            Command::Identify => {
                self.send_response(Record::text(
                    "dE",
                    format!("{IDENTIFICATION},{FIRMWARE_VERSION}"),
                ));
            }
            Command::ReportTime => {
                let now = self.shared.rtc.to_iso();
                self.send_response(Record::text("pH", now));
            }
            Command::EnableSend(on) => self.shared.config.lock().enable_send = on,
            Command::DebugSend(on) => self.shared.config.lock().debug_send = on,
            Command::SetTime(text) => {
                self.shared.rtc.set_from_iso(&text);
            }
            Command::MeasurementSend(on) => self.shared.config.lock().measurement_send = on,
            Command::Recording(on) => {
                if on && self.files.write_designation().is_none() {
                    debug!("recording needs an open write file");
                    return;
                }
                self.shared.config.lock().recording = on;
            }
            Command::TimeLimit(seconds) => self.shared.test_run.lock().set_time_limit(seconds),
            Command::VoltageLimit(limit) => self.shared.test_run.lock().set_voltage_limit(limit),
            Command::TestType(code) => self.shared.test_run.lock().set_test_type(code),
            Command::FreeSpace => {
                let result = self.files.free_clusters();
                let (free, sectors) = result.unwrap_or((0, 0));
                self.send_response(Record::dual("fF", free, sectors));
                self.send_status(status_code(&result));
            }
            Command::DirEntry(name) => self.directory_entry(&name),
            Command::OpenWrite(name) => {
                let result = self.files.open_write(&name);
                if let Ok(handle) = result {
                    self.send_response(Record::single("fW", handle.wire()));
                }
                self.send_status(status_code(&result));
            }
            Command::OpenRead(name) => {
                let result = self.files.open_read(&name);
                if let Ok(handle) = result {
                    self.send_response(Record::single("fR", handle.wire()));
                }
                self.send_status(status_code(&result));
            }
            Command::ReadLine(handle) => {
                if !self.files.is_valid_handle(handle) {
                    return;
                }
                let result = self.files.read_line(handle);
                let text = result.as_deref().unwrap_or_default().to_string();
                self.send_response(Record::text("fG", text));
                self.send_status(status_code(&result));
            }
            Command::FileStatus => self.file_status(),
            Command::Close(handle) => {
                let result = self.files.close(handle);
                if let Ok(true) = result {
                    self.stop_recording();
                }
                self.send_status(status_code(&result));
            }
            Command::Delete(name) => {
                let result = self.files.delete(&name);
                self.send_status(status_code(&result));
            }
            Command::Mount => {
                self.stop_recording();
                let result = self.files.mount();
                self.send_status(status_code(&result));
            }
            Command::MakeFilesystem => {
                self.stop_recording();
                self.send_response(Record::text("D", CREATING_FILESYSTEM));
                let result = self.files.make_filesystem();
                self.send_status(status_code(&result));
            }
        }
    }

    fn send_status(&mut self, code: u8) {
        self.send_response(Record::single("fE", code));
    }

    fn stop_recording(&mut self) {
        self.shared.config.lock().recording = false;
    }

    fn write_config(&mut self) {
        let page = self.shared.config.lock().encode();
        match self.flash.write_page(&page) {
            Ok(()) => info!("configuration written to flash"),
            Err(e) => {
                warn!(error = %e, "configuration write failed");
                self.send_debug(format!("Config write failed,{e}"));
            }
        }
    }

    fn directory_entry(&mut self, name: &str) {
        let result = self.files.read_dir_entry(name);
        let info = match &result {
            Ok(DirStep::Entry(entry)) => {
                let kind = match entry.kind {
                    EntryKind::File => 'f',
                    EntryKind::Directory => 'd',
                };
                format!("{kind}{:08X}{}", entry.size, entry.name)
            }
            Ok(DirStep::End) => "e".to_string(),
            Err(_) => format!("n{:08X}", 0u32),
        };
        self.send_response(Record::text("fd", info));
        self.send_status(status_code(&result));
    }

    fn file_status(&mut self) {
        let controls = self.shared.config.lock().controls();
        let mut text = format!("{controls},{}", self.files.write_handle_wire());
        if let Some(write) = self.files.write_designation() {
            text.push(',');
            text.push_str(&write.name);
        }
        text.push_str(&format!(",{}", self.files.read_handle_wire()));
        if let Some(read) = self.files.read_designation() {
            text.push(',');
            text.push_str(&read.name);
        }
        self.send_response(Record::text("fs", text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_command_uses_one_based_point_digit() {
        assert_eq!(
            parse("aS12"),
            Some(Command::SetSwitch {
                device: Device::One,
                point: ConnectionPoint::Load2
            })
        );
        assert_eq!(
            parse("aS33"),
            Some(Command::SetSwitch {
                device: Device::Three,
                point: ConnectionPoint::Source
            })
        );
    }

    #[test]
    fn switch_command_out_of_range_is_dropped() {
        assert_eq!(parse("aS02"), None);
        assert_eq!(parse("aS42"), None);
        assert_eq!(parse("aS10"), None);
        assert_eq!(parse("aS14"), None);
        assert_eq!(parse("aS1"), None);
    }

    #[test]
    fn reset_takes_interface_digit() {
        assert_eq!(parse("aR0"), Some(Command::ResetInterface(0)));
        assert_eq!(parse("aR5"), Some(Command::ResetInterface(5)));
        assert_eq!(parse("aR6"), None);
        assert_eq!(parse("aR"), None);
    }

    #[test]
    fn flag_parameters_need_plus_or_minus() {
        assert_eq!(parse("pc-"), Some(Command::EnableSend(false)));
        assert_eq!(parse("pd+"), Some(Command::DebugSend(true)));
        assert_eq!(parse("pM"), None);
        assert_eq!(parse("pr?"), None);
    }

    #[test]
    fn integer_parameters_take_leading_digits() {
        assert_eq!(parse("pT120s"), Some(Command::TimeLimit(120)));
        assert_eq!(parse("pV512"), Some(Command::VoltageLimit(512)));
        assert_eq!(parse("pV"), Some(Command::VoltageLimit(0)));
        assert_eq!(parse("pR2"), Some(Command::TestType(2)));
    }

    #[test]
    fn file_names_are_trimmed_and_limited() {
        assert_eq!(
            parse("fW test.txt"),
            Some(Command::OpenWrite("test.txt".into()))
        );
        assert_eq!(parse("fRverylongname.txt"), None);
        assert_eq!(parse("fC1"), Some(Command::Close(1)));
        assert_eq!(parse("fG999"), Some(Command::ReadLine(u8::MAX)));
    }

    #[test]
    fn unknown_commands_parse_to_nothing() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("a"), None);
        assert_eq!(parse("aQ"), None);
        assert_eq!(parse("zz"), None);
    }

    #[test]
    fn ascii_to_int_stops_at_non_digit() {
        assert_eq!(ascii_to_int(" 42abc"), 42);
        assert_eq!(ascii_to_int("x1"), 0);
    }
}
