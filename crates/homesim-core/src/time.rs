//! Minute-resolution day clock with midnight wrap-around.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minutes in one simulated day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Failure to parse an `HH:MM` time string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid time of day `{0}` (expected HH:MM)")]
pub struct TimeParseError(pub String);

/// Day-relative time in `0..1440`, rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: Self = Self(0);

    /// `None` when `minute` is not below [`MINUTES_PER_DAY`].
    #[must_use]
    pub const fn new(minute: u32) -> Option<Self> {
        if minute < MINUTES_PER_DAY {
            Some(Self(minute as u16))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Self::new(hour * 60 + minute)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn minutes(self) -> u32 {
        self.0 as u32
    }

    /// Forward distance from `self` to `end`, wrapping at midnight.
    #[must_use]
    pub const fn span_to(self, end: MinuteOfDay) -> u32 {
        (end.minutes() + MINUTES_PER_DAY - self.minutes()) % MINUTES_PER_DAY
    }

    /// Shorter way round the clock face between two times.
    #[must_use]
    pub const fn circular_distance(self, other: MinuteOfDay) -> u32 {
        let forward = self.span_to(other);
        let backward = other.span_to(self);
        if forward < backward { forward } else { backward }
    }

    /// Add `minutes`, returning the new time and how many midnights were crossed.
    #[must_use]
    pub const fn wrapping_add(self, minutes: u32) -> (Self, u32) {
        let total = self.minutes() + minutes;
        (Self((total % MINUTES_PER_DAY) as u16), total / MINUTES_PER_DAY)
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for MinuteOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || TimeParseError(s.to_string());
        let (hour, minute) = trimmed.split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 || !digits(hour) || !digits(minute) {
            return Err(invalid());
        }
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        Self::hm(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for MinuteOfDay {
    type Error = TimeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MinuteOfDay> for String {
    fn from(value: MinuteOfDay) -> Self {
        value.to_string()
    }
}

/// Day of the week, `0 = Monday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// Weekday of an absolute day counter.
    #[must_use]
    pub const fn from_day(day: u64) -> Self {
        Self::ALL[(day % 7) as usize]
    }

    #[must_use]
    pub const fn is_weekend(self) -> bool {
        matches!(self, Weekday::Saturday | Weekday::Sunday)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Simulated wall clock: time of day plus an absolute day counter.
///
/// The time stays unset until the first activity of a run pins it to that activity's
/// planned start. Until then it reads as midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    now: Option<MinuteOfDay>,
    day: u64,
}

impl SimClock {
    #[must_use]
    pub const fn new(start_day: u64) -> Self {
        Self {
            now: None,
            day: start_day,
        }
    }

    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.now.is_some()
    }

    #[must_use]
    pub fn now(&self) -> MinuteOfDay {
        self.now.unwrap_or(MinuteOfDay::MIDNIGHT)
    }

    pub fn set(&mut self, time: MinuteOfDay) {
        self.now = Some(time);
    }

    #[must_use]
    pub const fn day(&self) -> u64 {
        self.day
    }

    #[must_use]
    pub const fn weekday(&self) -> Weekday {
        Weekday::from_day(self.day)
    }

    /// Minutes since midnight of day zero; monotonic across wraps.
    #[must_use]
    pub fn absolute_minutes(&self) -> u64 {
        self.day * u64::from(MINUTES_PER_DAY) + u64::from(self.now().minutes())
    }

    /// Move the clock forward, bumping the day counter once per midnight crossed.
    /// Returns the number of midnights crossed.
    pub fn advance(&mut self, minutes: u32) -> u32 {
        let (next, wraps) = self.now().wrapping_add(minutes);
        self.now = Some(next);
        self.day += u64::from(wraps);
        wraps
    }
}
