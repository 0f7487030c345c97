//! Persisted acquisition configuration.
//!
//! The `Configuration` block is the firmware's object dictionary: communication switches,
//! the recording flag and the measurement parameters. It lives for the whole process, is
//! mutated by parameter commands and is written as one full flash page on request.
//!
//! # Page layout
//!
//! The page is [`CONFIG_BLOCK_SIZE`] bytes, little-endian, fixed offsets:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 1 | validity marker ([`VALID_BLOCK_MARKER`]) |
//! | 1 | 1 | enable-send |
//! | 2 | 1 | measurement-send |
//! | 3 | 1 | debug-send |
//! | 4 | 1 | recording |
//! | 5..8 | 3 | reserved |
//! | 8 | 4 | measurement interval (systick ticks) |
//! | 12 | 1 | number of conversions |
//! | 13 | 1 | number of samples per burst |
//!
//! The remainder of the page is left in the erased state (`0xFF`).

use crate::error::{AppResult, ConfigBlockError, DaqError};
use crate::measurement::NUM_CHANNEL;
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Size of the flash page holding the configuration block.
pub const CONFIG_BLOCK_SIZE: usize = 2048;

/// Marker stored in the first byte of a valid block.
pub const VALID_BLOCK_MARKER: u8 = 0xBE;

const ERASED: u8 = 0xFF;
const OFF_INTERVAL: usize = 8;

/// Flash "compare failed" status, reported when the read-back differs.
const FLASH_COMPARE_FAIL: u32 = 0x80;

/// One flash page worth of bytes.
pub type ConfigPage = [u8; CONFIG_BLOCK_SIZE];

/// Acquisition configuration (single instance, process lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Validity marker, [`VALID_BLOCK_MARKER`] for a usable block.
    #[serde(skip, default = "default_marker")]
    pub valid_block: u8,
    /// Any transmission at all.
    #[serde(default = "default_true")]
    pub enable_send: bool,
    /// Measurement records are transmitted.
    #[serde(default = "default_true")]
    pub measurement_send: bool,
    /// Debug records are transmitted.
    #[serde(default)]
    pub debug_send: bool,
    /// Measurement records are mirrored to the open write file.
    #[serde(default)]
    pub recording: bool,
    /// Systick ticks between measurement cycles.
    #[serde(default = "default_interval")]
    pub measurement_interval: u32,
    /// Channels converted per cycle: the temperature channel plus one per interface.
    #[serde(default = "default_conversions")]
    pub number_conversions: u8,
    /// Conversions averaged per burst.
    #[serde(default = "default_samples")]
    pub number_samples: u8,
}

fn default_marker() -> u8 {
    VALID_BLOCK_MARKER
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    1000
}

fn default_conversions() -> u8 {
    7
}

fn default_samples() -> u8 {
    16
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            valid_block: VALID_BLOCK_MARKER,
            enable_send: true,
            measurement_send: true,
            debug_send: false,
            recording: false,
            measurement_interval: default_interval(),
            number_conversions: default_conversions(),
            number_samples: default_samples(),
        }
    }
}

impl Configuration {
    /// Clamp the measurement parameters into their legal ranges.
    pub fn sanitized(mut self) -> Self {
        self.number_samples = self.number_samples.max(1);
        self.number_conversions = self.number_conversions.clamp(1, NUM_CHANNEL as u8);
        self
    }

    /// Samples per burst, never zero.
    pub fn samples(&self) -> u32 {
        u32::from(self.number_samples.max(1))
    }

    /// Pack the communication and recording switches into the status controls word.
    ///
    /// bit 0 recording, bit 1 enable-send, bit 2 measurement-send, bit 3 debug-send.
    pub fn controls(&self) -> u16 {
        u16::from(self.recording)
            | u16::from(self.enable_send) << 1
            | u16::from(self.measurement_send) << 2
            | u16::from(self.debug_send) << 3
    }

    /// Encode into a full flash page.
    pub fn encode(&self) -> ConfigPage {
        let mut buf = BytesMut::with_capacity(CONFIG_BLOCK_SIZE);
        buf.put_u8(self.valid_block);
        buf.put_u8(u8::from(self.enable_send));
        buf.put_u8(u8::from(self.measurement_send));
        buf.put_u8(u8::from(self.debug_send));
        buf.put_u8(u8::from(self.recording));
        buf.put_bytes(0, OFF_INTERVAL - buf.len());
        buf.put_u32_le(self.measurement_interval);
        buf.put_u8(self.number_conversions);
        buf.put_u8(self.number_samples);
        buf.resize(CONFIG_BLOCK_SIZE, ERASED);

        let mut page = [ERASED; CONFIG_BLOCK_SIZE];
        page.copy_from_slice(&buf);
        page
    }

    /// Decode a flash page, rejecting it unless the validity marker is present.
    pub fn decode(page: &[u8]) -> Result<Self, ConfigBlockError> {
        if page.len() < CONFIG_BLOCK_SIZE {
            return Err(ConfigBlockError::ShortPage(page.len()));
        }
        let mut cur = page;
        let valid_block = cur.get_u8();
        if valid_block != VALID_BLOCK_MARKER {
            return Err(ConfigBlockError::InvalidMarker {
                found: valid_block,
                expected: VALID_BLOCK_MARKER,
            });
        }
        let enable_send = cur.get_u8() != 0;
        let measurement_send = cur.get_u8() != 0;
        let debug_send = cur.get_u8() != 0;
        let recording = cur.get_u8() != 0;
        cur.advance(OFF_INTERVAL - 5);
        let measurement_interval = cur.get_u32_le();
        let number_conversions = cur.get_u8();
        let number_samples = cur.get_u8();

        Ok(Self {
            valid_block,
            enable_send,
            measurement_send,
            debug_send,
            recording,
            measurement_interval,
            number_conversions,
            number_samples,
        })
    }
}

/// Non-volatile storage for the configuration page.
///
/// Writes replace the whole page at once; a torn page is never observable.
pub trait ConfigStore: Send {
    /// Read the stored page, `None` if nothing was ever written.
    fn read_page(&mut self) -> AppResult<Option<Vec<u8>>>;

    /// Replace the stored page.
    fn write_page(&mut self, page: &ConfigPage) -> AppResult<()>;
}

/// Flash page emulated by a file on the host.
pub struct FlashFile {
    path: PathBuf,
}

impl FlashFile {
    /// Flash page stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FlashFile {
    fn read_page(&mut self) -> AppResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_page(&mut self, page: &ConfigPage) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staging = self.path.with_extension("page.tmp");
        {
            let mut file = fs::File::create(&staging)?;
            file.write_all(page)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        // Verify like the flash programmer does.
        let written = fs::read(&self.path)?;
        if written.as_slice() != page.as_slice() {
            return Err(DaqError::FlashWrite(FLASH_COMPARE_FAIL));
        }
        debug!(path = %self.path.display(), "configuration page written");
        Ok(())
    }
}

/// In-memory page, cloneable so a test can inspect what the firmware wrote.
#[derive(Clone, Default)]
pub struct MemoryFlash {
    page: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryFlash {
    /// Empty flash page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current page contents.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.page.lock().clone()
    }
}

impl ConfigStore for MemoryFlash {
    fn read_page(&mut self) -> AppResult<Option<Vec<u8>>> {
        Ok(self.page.lock().clone())
    }

    fn write_page(&mut self, page: &ConfigPage) -> AppResult<()> {
        *self.page.lock() = Some(page.to_vec());
        Ok(())
    }
}

/// Boot-time reload: a valid stored block wins, anything else falls back to `defaults`.
pub fn load_configuration(store: &mut dyn ConfigStore, defaults: Configuration) -> Configuration {
    match store.read_page() {
        Ok(Some(page)) => match Configuration::decode(&page) {
            Ok(cfg) => {
                info!("configuration restored from flash");
                cfg.sanitized()
            }
            Err(e) => {
                warn!(error = %e, "stored configuration rejected, using defaults");
                defaults.sanitized()
            }
        },
        Ok(None) => {
            info!("no stored configuration, using defaults");
            defaults.sanitized()
        }
        Err(e) => {
            warn!(error = %e, "configuration page unreadable, using defaults");
            defaults.sanitized()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        Configuration {
            valid_block: VALID_BLOCK_MARKER,
            enable_send: false,
            measurement_send: true,
            debug_send: true,
            recording: true,
            measurement_interval: 0x0102_0304,
            number_conversions: 5,
            number_samples: 200,
        }
    }

    #[test]
    fn page_reload_reproduces_every_field() {
        let cfg = sample();
        let page = cfg.encode();
        assert_eq!(page[0], VALID_BLOCK_MARKER);
        assert_eq!(&page[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(page[CONFIG_BLOCK_SIZE - 1], ERASED);
        assert_eq!(Configuration::decode(&page), Ok(cfg));
    }

    #[test]
    fn erased_page_is_rejected() {
        let page = [ERASED; CONFIG_BLOCK_SIZE];
        assert!(matches!(
            Configuration::decode(&page),
            Err(ConfigBlockError::InvalidMarker { found: 0xFF, .. })
        ));
    }

    #[test]
    fn short_page_is_rejected() {
        assert_eq!(
            Configuration::decode(&[VALID_BLOCK_MARKER; 16]),
            Err(ConfigBlockError::ShortPage(16))
        );
    }

    #[test]
    fn sanitized_clamps_samples_and_conversions() {
        let cfg = Configuration {
            number_samples: 0,
            number_conversions: 40,
            ..Configuration::default()
        }
        .sanitized();
        assert_eq!(cfg.number_samples, 1);
        assert_eq!(cfg.number_conversions, NUM_CHANNEL as u8);
    }

    #[test]
    fn controls_word_bits() {
        let cfg = Configuration {
            recording: true,
            enable_send: false,
            measurement_send: true,
            debug_send: true,
            ..Configuration::default()
        };
        assert_eq!(cfg.controls(), 0b1101);
    }

    #[test]
    fn load_falls_back_to_defaults_when_empty() {
        let mut flash = MemoryFlash::new();
        let cfg = load_configuration(&mut flash, Configuration::default());
        assert_eq!(cfg, Configuration::default());
    }

    #[test]
    fn flash_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FlashFile::new(dir.path().join("config.page"));
        assert!(flash.read_page().unwrap().is_none());

        let cfg = sample();
        flash.write_page(&cfg.encode()).unwrap();
        let restored = load_configuration(&mut flash, Configuration::default());
        assert_eq!(restored, cfg);
    }
}
