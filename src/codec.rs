//! # Origin-Time Codec
//!
//! Date-times are persisted as two 64-bit integers plus a small zone tag:
//!
//! ```text
//! ┌───────────┬────────────────────────────────────────────────────────┐
//! │ column    │ meaning                                                │
//! ├───────────┼────────────────────────────────────────────────────────┤
//! │ date      │ seconds since 1970-01-01T00:00:00Z (0 for clock times) │
//! │ dateLocal │ wall-clock reading, encoded as if the local components │
//! │           │ were UTC, zone independent                             │
//! │ zone      │ IANA id, "FloatingDate" for all-day dates, or empty    │
//! │           │ for clock times                                        │
//! └───────────┴────────────────────────────────────────────────────────┘
//! ```
//!
//! The encoding policy:
//!
//! - absent          → `(0, 0, "")`
//! - all-day date    → `(local, local, "FloatingDate")`
//! - clock time      → `(local, local, "")`
//! - zoned instant   → `(utc, local, zone-id)`
//!
//! Decoding branches on the zone tag. Some legacy rows stored all-day
//! dates as clock-time midnights instead of floating dates, so clock-time
//! decoding also reports whether the value *looks like* a pure date
//! (midnight heuristic); the row decoder uses that to restore the all-day
//! flag.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Zone tag marking an all-day pure date. Part of the on-disk format.
pub const FLOATING_DATE: &str = "FloatingDate";

/// Sentinel stored in the geo columns when an incidence has no location.
/// Part of the on-disk format.
pub const INVALID_LATLON: f64 = -1000.0;

/// True when a stored latitude/longitude column holds a real coordinate
/// rather than the sentinel.
pub fn latlon_is_set(value: f64) -> bool {
    value > INVALID_LATLON + 1e-6
}

// =============================================================================
// Date-time value
// =============================================================================

/// A calendar date-time in one of the four shapes the engine persists.
///
/// `Clock` is a wall-clock reading with no zone: it renders as the same
/// time wherever it is displayed. `Date` is a floating all-day date.
#[derive(Debug, Clone, PartialEq)]
pub enum CalDateTime {
    /// A fixed instant in UTC.
    Utc(DateTime<Utc>),
    /// A fixed instant carrying an IANA zone.
    Zoned(DateTime<Tz>),
    /// A zone-less wall-clock time.
    Clock(NaiveDateTime),
    /// A floating all-day date.
    Date(NaiveDate),
}

impl CalDateTime {
    /// The wall-clock reading of this value, zone stripped.
    pub fn local_naive(&self) -> NaiveDateTime {
        match self {
            CalDateTime::Utc(dt) => dt.naive_utc(),
            CalDateTime::Zoned(dt) => dt.naive_local(),
            CalDateTime::Clock(ndt) => *ndt,
            CalDateTime::Date(d) => d.and_hms_opt(0, 0, 0).expect("midnight is valid"),
        }
    }

    /// The calendar date of the wall-clock reading.
    pub fn date(&self) -> NaiveDate {
        self.local_naive().date()
    }

    /// True for the floating all-day shape.
    pub fn is_date(&self) -> bool {
        matches!(self, CalDateTime::Date(_))
    }

    /// The value as a UTC instant. Clock times and floating dates have no
    /// instant of their own; their wall clock is read as UTC, which is
    /// exactly how the anchor columns treat them.
    pub fn as_utc(&self) -> DateTime<Utc> {
        match self {
            CalDateTime::Utc(dt) => *dt,
            CalDateTime::Zoned(dt) => dt.with_timezone(&Utc),
            CalDateTime::Clock(ndt) => ndt.and_utc(),
            CalDateTime::Date(d) => d.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc(),
        }
    }

    /// Seconds used when this value identifies a recurrence instance.
    ///
    /// Zone-less values use their local-origin reading, fixed instants
    /// their UTC-origin reading. The stored integer is what makes
    /// `(uid, recurrence id)` a natural key, so this must stay stable.
    pub fn instance_seconds(&self) -> i64 {
        match self {
            CalDateTime::Utc(_) | CalDateTime::Zoned(_) => to_origin(&self.as_utc()),
            CalDateTime::Clock(_) | CalDateTime::Date(_) => to_local_origin(&self.local_naive()),
        }
    }
}

impl From<DateTime<Utc>> for CalDateTime {
    fn from(dt: DateTime<Utc>) -> Self {
        CalDateTime::Utc(dt)
    }
}

impl From<DateTime<Tz>> for CalDateTime {
    fn from(dt: DateTime<Tz>) -> Self {
        CalDateTime::Zoned(dt)
    }
}

impl From<NaiveDateTime> for CalDateTime {
    fn from(ndt: NaiveDateTime) -> Self {
        CalDateTime::Clock(ndt)
    }
}

impl From<NaiveDate> for CalDateTime {
    fn from(d: NaiveDate) -> Self {
        CalDateTime::Date(d)
    }
}

// =============================================================================
// Origin-second conversions
// =============================================================================

/// Seconds between the origin and a UTC instant.
pub fn to_origin(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Seconds between the origin and a wall-clock reading interpreted as UTC.
pub fn to_local_origin(ndt: &NaiveDateTime) -> i64 {
    ndt.and_utc().timestamp()
}

/// The UTC instant at `seconds` past the origin.
pub fn from_origin(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}

/// The wall-clock reading encoded as `seconds` past the origin.
pub fn from_local_origin(seconds: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|dt| dt.naive_utc())
}

// =============================================================================
// Column codec
// =============================================================================

/// The three columns a date-time occupies on disk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedDateTime {
    /// UTC-origin seconds, or local-origin for zone-less values.
    pub utc: i64,
    /// Local-origin seconds, always carrying the wall-clock reading.
    pub local: i64,
    /// Zone tag: IANA id, [`FLOATING_DATE`], or empty.
    pub zone: String,
}

/// Encodes a date-time for storage. `all_day` forces the floating-date
/// shape regardless of the value's own variant, matching how all-day
/// events carry their start and end.
pub fn encode(value: Option<&CalDateTime>, all_day: bool) -> EncodedDateTime {
    let Some(value) = value else {
        return EncodedDateTime::default();
    };
    let local = to_local_origin(&value.local_naive());
    match value {
        _ if all_day || value.is_date() => EncodedDateTime {
            utc: local,
            local,
            zone: FLOATING_DATE.to_string(),
        },
        CalDateTime::Clock(_) => EncodedDateTime {
            utc: local,
            local,
            zone: String::new(),
        },
        CalDateTime::Utc(dt) => EncodedDateTime {
            utc: to_origin(dt),
            local,
            zone: "UTC".to_string(),
        },
        CalDateTime::Zoned(dt) => EncodedDateTime {
            utc: to_origin(&dt.with_timezone(&Utc)),
            local,
            zone: dt.timezone().name().to_string(),
        },
        CalDateTime::Date(_) => unreachable!("date values take the all-day arm"),
    }
}

/// Decodes the three columns back into a date-time.
///
/// The second tuple field reports whether the value should be read as a
/// pure date: always for floating dates, and for clock times whose
/// time-of-day is exactly midnight (legacy all-day rows).
pub fn decode(utc: i64, local: i64, zone: &str) -> (Option<CalDateTime>, bool) {
    if zone.is_empty() {
        if utc == 0 && local == 0 {
            return (None, false);
        }
        match from_local_origin(local) {
            Some(ndt) => {
                let midnight = ndt.time().hour() == 0
                    && ndt.time().minute() == 0
                    && ndt.time().second() == 0;
                (Some(CalDateTime::Clock(ndt)), midnight)
            }
            None => (None, false),
        }
    } else if zone == FLOATING_DATE {
        match from_local_origin(local) {
            Some(ndt) => (Some(CalDateTime::Date(ndt.date())), true),
            None => (None, false),
        }
    } else if zone == "UTC" {
        (from_origin(utc).map(CalDateTime::Utc), false)
    } else {
        match zone.parse::<Tz>() {
            Ok(tz) => match from_origin(utc) {
                Some(dt) => (Some(CalDateTime::Zoned(tz.from_utc_datetime(&dt.naive_utc()))), false),
                None => (None, false),
            },
            // Zone id cannot be resolved: fall back to the preserved
            // wall-clock reading.
            Err(_) => (from_local_origin(local).map(CalDateTime::Clock), false),
        }
    }
}
