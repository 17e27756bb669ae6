//! Timestamp primitives.
//!
//! All record times use the fixed format `YYYY-MM-DD HH:MM:SS` in UTC.
//! Lexicographic order over the string equals chronological order, which is
//! what the per-tag index relies on.

use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::{self, BorrowedFormatItem};

/// A timestamp string `raw` could not be parsed.
#[derive(Debug, Error, Clone)]
#[error("time `{raw}` is invalid: {reason}")]
pub struct TimeError {
    pub raw: String,
    pub reason: &'static str,
}

/// UTC timestamp in `YYYY-MM-DD HH:MM:SS`, exactly 19 bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStr(String);

/// Byte length of the canonical timestamp rendering.
pub const TIME_STR_LEN: usize = 19;

impl TimeStr {
    pub fn parse(raw: &str) -> Result<Self, TimeError> {
        let err = |reason| TimeError {
            raw: raw.to_string(),
            reason,
        };
        let b = raw.as_bytes();
        if b.len() != TIME_STR_LEN {
            return Err(err("must be exactly 19 bytes"));
        }
        for (i, &c) in b.iter().enumerate() {
            let ok = match i {
                4 | 7 => c == b'-',
                10 => c == b' ',
                13 | 16 => c == b':',
                _ => c.is_ascii_digit(),
            };
            if !ok {
                return Err(err("expected YYYY-MM-DD HH:MM:SS"));
            }
        }
        let field = |from: usize, to: usize| -> u32 {
            raw[from..to].parse().unwrap_or(0)
        };
        let (month, day) = (field(5, 7), field(8, 10));
        let (hour, minute, second) = (field(11, 13), field(14, 16), field(17, 19));
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(err("date out of range"));
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(err("time of day out of range"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TimeStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeStr({})", self.0)
    }
}

impl fmt::Display for TimeStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time source for record finalization.
///
/// Injectable so tests get deterministic timestamps.
pub trait Clock {
    fn now(&self) -> TimeStr;
}

/// Render format for the canonical timestamp.
const TIME_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

fn time_format() -> &'static [BorrowedFormatItem<'static>] {
    static FORMAT: OnceLock<Vec<BorrowedFormatItem<'static>>> = OnceLock::new();
    FORMAT.get_or_init(|| {
        format_description::parse(TIME_FORMAT).expect("canonical time format must parse")
    })
}

/// Wall-clock UTC time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStr {
        let now = OffsetDateTime::now_utc();
        let raw = now
            .format(time_format())
            .expect("utc date-time renders the canonical format");
        TimeStr(raw)
    }
}

/// Clock pinned to one instant.
#[derive(Clone, Debug)]
pub struct FixedClock(pub TimeStr);

impl Clock for FixedClock {
    fn now(&self) -> TimeStr {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_canonical_form() {
        let t = TimeStr::parse("2026-08-02 10:30:00").unwrap();
        assert_eq!(t.as_str(), "2026-08-02 10:30:00");
    }

    #[test]
    fn parse_rejects_malformed_forms() {
        for raw in [
            "2026-08-02",
            "2026-08-02T10:30:00",
            "2026-13-02 10:30:00",
            "2026-08-32 10:30:00",
            "2026-08-02 24:30:00",
            "2026-08-02 10:60:00",
            "2026-8-2 10:30:00",
            "2026-08-02 10:30:000",
        ] {
            assert!(TimeStr::parse(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn ordering_is_chronological() {
        let a = TimeStr::parse("2026-08-02 10:30:00").unwrap();
        let b = TimeStr::parse("2026-08-02 10:30:01").unwrap();
        let c = TimeStr::parse("2027-01-01 00:00:00").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn system_clock_renders_canonical_width() {
        let t = SystemClock.now();
        assert!(TimeStr::parse(t.as_str()).is_ok());
    }

    #[test]
    fn canonical_format_renders_known_instants() {
        let epoch = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(epoch.format(time_format()).unwrap(), "1970-01-01 00:00:00");
        let at = OffsetDateTime::from_unix_timestamp(1_234_567_890).unwrap();
        assert_eq!(at.format(time_format()).unwrap(), "2009-02-13 23:31:30");
    }
}
