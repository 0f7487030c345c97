//! Real-time clock.
//!
//! A seconds counter advanced by the systick, set and reported as ISO 8601 local time
//! without zone (`YYYY-MM-DDTHH:MM:SS`).

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::debug;

/// Wire format of `pH` time strings.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const MILLIS_PER_SECOND: u32 = 1000;

/// Seconds-resolution clock shared by the systick and the main loop.
#[derive(Debug)]
pub struct Rtc {
    seconds: AtomicI64,
    millis: AtomicU32,
}

impl Rtc {
    /// Clock set to `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            seconds: AtomicI64::new(start.and_utc().timestamp()),
            millis: AtomicU32::new(0),
        }
    }

    /// Start from the host's current time.
    pub fn from_host() -> Self {
        Self::new(Utc::now().naive_utc())
    }

    /// Advance by one millisecond.
    pub fn tick_ms(&self) {
        let ms = self.millis.fetch_add(1, Ordering::AcqRel) + 1;
        if ms >= MILLIS_PER_SECOND {
            self.millis.store(0, Ordering::Release);
            self.seconds.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Current date and time.
    pub fn now(&self) -> NaiveDateTime {
        let secs = self.seconds.load(Ordering::Acquire);
        DateTime::from_timestamp(secs, 0)
            .unwrap_or_default()
            .naive_utc()
    }

    /// Set from an ISO 8601 string. Unparseable input leaves the clock unchanged.
    pub fn set_from_iso(&self, text: &str) -> bool {
        match NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT) {
            Ok(time) => {
                self.seconds
                    .store(time.and_utc().timestamp(), Ordering::Release);
                self.millis.store(0, Ordering::Release);
                debug!(%time, "clock set");
                true
            }
            Err(e) => {
                debug!(input = text, error = %e, "time string ignored");
                false
            }
        }
    }

    /// Current time as `YYYY-MM-DDTHH:MM:SS`.
    pub fn to_iso(&self) -> String {
        self.now().format(TIME_FORMAT).to_string()
    }
}
