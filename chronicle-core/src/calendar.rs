//! In-world calendar math.
//!
//! Campaigns use the Harptos reckoning: twelve 30-day months with single
//! festival days between some of them, plus Shieldmeet every fourth year.
//! A date is stored as day-of-year, year and hour. Month, festival and
//! season are always derived from those three values.
//!
//! The engine is pure and ratio-agnostic; converting real time into game
//! hours happens in [`crate::clock`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Days in every regular month.
pub const DAYS_PER_MONTH: u16 = 30;

/// Hours in a day.
pub const HOURS_PER_DAY: i64 = 24;

/// Errors from calendar construction and lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("day {day} is outside year {year} (1..={max})")]
    DayOutOfRange { day: u16, year: i32, max: u16 },

    #[error("hour {0} is outside 0..=23")]
    HourOutOfRange(u8),

    #[error("unknown day name: {0}")]
    UnknownDayName(String),

    #[error("{0} does not occur in year {1}")]
    NotInYear(String, i32),
}

/// The twelve regular months, in calendar order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Month {
    Hammer,
    Alturiak,
    Ches,
    Tarsakh,
    Mirtul,
    Kythorn,
    Flamerule,
    Eleasis,
    Eleint,
    Marpenoth,
    Uktar,
    Nightal,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Hammer,
        Month::Alturiak,
        Month::Ches,
        Month::Tarsakh,
        Month::Mirtul,
        Month::Kythorn,
        Month::Flamerule,
        Month::Eleasis,
        Month::Eleint,
        Month::Marpenoth,
        Month::Uktar,
        Month::Nightal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Month::Hammer => "Hammer",
            Month::Alturiak => "Alturiak",
            Month::Ches => "Ches",
            Month::Tarsakh => "Tarsakh",
            Month::Mirtul => "Mirtul",
            Month::Kythorn => "Kythorn",
            Month::Flamerule => "Flamerule",
            Month::Eleasis => "Eleasis",
            Month::Eleint => "Eleint",
            Month::Marpenoth => "Marpenoth",
            Month::Uktar => "Uktar",
            Month::Nightal => "Nightal",
        }
    }

    /// 1-based month number.
    pub fn number(&self) -> u8 {
        Month::ALL
            .iter()
            .position(|m| m == self)
            .map(|i| i as u8 + 1)
            .unwrap_or(1)
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Month> {
        let wanted = name.trim().to_lowercase();
        Month::ALL
            .iter()
            .copied()
            .find(|m| m.name().to_lowercase() == wanted)
    }
}

/// Festival days that sit outside the month structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Festival {
    Midwinter,
    Greengrass,
    Midsummer,
    /// Only present in leap years, directly after Midsummer.
    Shieldmeet,
    Highharvestide,
    FeastOfTheMoon,
}

impl Festival {
    pub const ALL: [Festival; 6] = [
        Festival::Midwinter,
        Festival::Greengrass,
        Festival::Midsummer,
        Festival::Shieldmeet,
        Festival::Highharvestide,
        Festival::FeastOfTheMoon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Festival::Midwinter => "Midwinter",
            Festival::Greengrass => "Greengrass",
            Festival::Midsummer => "Midsummer",
            Festival::Shieldmeet => "Shieldmeet",
            Festival::Highharvestide => "Highharvestide",
            Festival::FeastOfTheMoon => "Feast of the Moon",
        }
    }

    pub fn is_leap_only(&self) -> bool {
        matches!(self, Festival::Shieldmeet)
    }

    /// Case-insensitive lookup; internal whitespace is collapsed.
    pub fn from_name(name: &str) -> Option<Festival> {
        let wanted = collapse(name);
        Festival::ALL
            .iter()
            .copied()
            .find(|f| f.name().to_lowercase() == wanted)
    }
}

/// One contiguous block of the year layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Month(Month),
    Festival(Festival),
}

impl Segment {
    fn len(&self) -> u16 {
        match self {
            Segment::Month(_) => DAYS_PER_MONTH,
            Segment::Festival(_) => 1,
        }
    }
}

const LAYOUT: [Segment; 18] = [
    Segment::Month(Month::Hammer),
    Segment::Festival(Festival::Midwinter),
    Segment::Month(Month::Alturiak),
    Segment::Month(Month::Ches),
    Segment::Month(Month::Tarsakh),
    Segment::Festival(Festival::Greengrass),
    Segment::Month(Month::Mirtul),
    Segment::Month(Month::Kythorn),
    Segment::Month(Month::Flamerule),
    Segment::Festival(Festival::Midsummer),
    Segment::Festival(Festival::Shieldmeet),
    Segment::Month(Month::Eleasis),
    Segment::Month(Month::Eleint),
    Segment::Festival(Festival::Highharvestide),
    Segment::Month(Month::Marpenoth),
    Segment::Month(Month::Uktar),
    Segment::Festival(Festival::FeastOfTheMoon),
    Segment::Month(Month::Nightal),
];

fn segments(year: i32) -> impl Iterator<Item = Segment> {
    let leap = is_leap_year(year);
    LAYOUT
        .iter()
        .copied()
        .filter(move |s| leap || *s != Segment::Festival(Festival::Shieldmeet))
}

fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Every fourth year (Euclidean, so negative years behave) is a leap year.
pub fn is_leap_year(year: i32) -> bool {
    year.rem_euclid(4) == 0
}

pub fn days_in_year(year: i32) -> u16 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// A day of the year by name: either a month day or a festival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayName {
    Month { month: Month, day: u8 },
    Festival(Festival),
}

impl DayName {
    /// Parse "Midsummer", "15 Flamerule" or "Flamerule 15".
    pub fn parse(input: &str) -> Result<DayName, CalendarError> {
        let unknown = || CalendarError::UnknownDayName(input.trim().to_string());

        if let Some(festival) = Festival::from_name(input) {
            return Ok(DayName::Festival(festival));
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let (day, month) = match parts.as_slice() {
            [a, b] => match (a.parse::<u8>(), b.parse::<u8>()) {
                (Ok(day), _) => (day, Month::from_name(b)),
                (_, Ok(day)) => (day, Month::from_name(a)),
                _ => return Err(unknown()),
            },
            _ => return Err(unknown()),
        };

        match month {
            Some(month) if (1..=DAYS_PER_MONTH as u8).contains(&day) => {
                Ok(DayName::Month { month, day })
            }
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for DayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayName::Month { month, day } => write!(f, "{day} {}", month.name()),
            DayName::Festival(festival) => write!(f, "{}", festival.name()),
        }
    }
}

/// Resolve a day-of-year to its name. `None` if the day is not in the year.
pub fn day_name(day_of_year: u16, year: i32) -> Option<DayName> {
    if day_of_year == 0 || day_of_year > days_in_year(year) {
        return None;
    }

    let mut remaining = day_of_year;
    for segment in segments(year) {
        let len = segment.len();
        if remaining <= len {
            return Some(match segment {
                Segment::Month(month) => DayName::Month {
                    month,
                    day: remaining as u8,
                },
                Segment::Festival(festival) => DayName::Festival(festival),
            });
        }
        remaining -= len;
    }
    None
}

/// Inverse of [`day_name`]. `None` for Shieldmeet outside leap years or an
/// out-of-range month day.
pub fn day_of_year_for(name: DayName, year: i32) -> Option<u16> {
    let mut offset = 0u16;
    for segment in segments(year) {
        match (segment, name) {
            (Segment::Month(m), DayName::Month { month, day }) if m == month => {
                return (1..=DAYS_PER_MONTH as u8)
                    .contains(&day)
                    .then_some(offset + day as u16);
            }
            (Segment::Festival(f), DayName::Festival(wanted)) if f == wanted => {
                return Some(offset + 1);
            }
            _ => {}
        }
        offset += segment.len();
    }
    None
}

/// Meteorological season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    /// Fixed thresholds on day-of-year. In leap years the summer/autumn
    /// boundary lands one day early (on 30 Eleasis).
    pub fn from_day_of_year(day_of_year: u16) -> Season {
        match day_of_year {
            62..=152 => Season::Spring,
            153..=243 => Season::Summer,
            244..=335 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

/// Days from 1 Hammer of year 0 to 1 Hammer of `year`.
fn days_before_year(year: i64) -> i64 {
    365 * year + (year + 3).div_euclid(4)
}

/// An immutable point on the calendar with hour resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StoredDate")]
pub struct CalendarDate {
    day_of_year: u16,
    year: i32,
    hour: u8,
}

/// Unchecked on-disk form; loading goes through [`CalendarDate::new`].
#[derive(Deserialize)]
struct StoredDate {
    day_of_year: u16,
    year: i32,
    hour: u8,
}

impl TryFrom<StoredDate> for CalendarDate {
    type Error = CalendarError;

    fn try_from(stored: StoredDate) -> Result<Self, Self::Error> {
        CalendarDate::new(stored.day_of_year, stored.year, stored.hour)
    }
}

impl CalendarDate {
    pub fn new(day_of_year: u16, year: i32, hour: u8) -> Result<Self, CalendarError> {
        let max = days_in_year(year);
        if day_of_year == 0 || day_of_year > max {
            return Err(CalendarError::DayOutOfRange {
                day: day_of_year,
                year,
                max,
            });
        }
        if hour > 23 {
            return Err(CalendarError::HourOutOfRange(hour));
        }
        Ok(Self {
            day_of_year,
            year,
            hour,
        })
    }

    /// Midnight of the given day.
    pub fn from_day_of_year(day_of_year: u16, year: i32) -> Result<Self, CalendarError> {
        Self::new(day_of_year, year, 0)
    }

    /// Build a date from a day name, e.g. `DayName::parse("Midsummer")`.
    pub fn from_name(name: DayName, year: i32, hour: u8) -> Result<Self, CalendarError> {
        let day = day_of_year_for(name, year)
            .ok_or_else(|| CalendarError::NotInYear(name.to_string(), year))?;
        Self::new(day, year, hour)
    }

    pub fn day_of_year(&self) -> u16 {
        self.day_of_year
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn day_name(&self) -> DayName {
        // Construction guarantees the day is in range.
        day_name(self.day_of_year, self.year).unwrap_or(DayName::Month {
            month: Month::Nightal,
            day: DAYS_PER_MONTH as u8,
        })
    }

    pub fn month(&self) -> Option<Month> {
        match self.day_name() {
            DayName::Month { month, .. } => Some(month),
            DayName::Festival(_) => None,
        }
    }

    pub fn day_of_month(&self) -> Option<u8> {
        match self.day_name() {
            DayName::Month { day, .. } => Some(day),
            DayName::Festival(_) => None,
        }
    }

    pub fn festival(&self) -> Option<Festival> {
        match self.day_name() {
            DayName::Festival(festival) => Some(festival),
            DayName::Month { .. } => None,
        }
    }

    pub fn season(&self) -> Season {
        Season::from_day_of_year(self.day_of_year)
    }

    pub fn is_daytime(&self) -> bool {
        self.hour >= 6 && self.hour < 18
    }

    pub fn time_of_day(&self) -> &'static str {
        match self.hour {
            5..=7 => "dawn",
            8..=11 => "morning",
            12..=13 => "midday",
            14..=17 => "afternoon",
            18..=20 => "evening",
            _ => "night",
        }
    }

    /// Absolute day count since 1 Hammer of year 0 (negative before it).
    pub fn day_number(&self) -> i64 {
        days_before_year(self.year as i64) + self.day_of_year as i64 - 1
    }

    /// Absolute hour count since midnight, 1 Hammer of year 0.
    pub fn hour_number(&self) -> i64 {
        self.day_number() * HOURS_PER_DAY + self.hour as i64
    }

    fn from_hour_number(hours: i64) -> Self {
        let day_number = hours.div_euclid(HOURS_PER_DAY);
        let hour = hours.rem_euclid(HOURS_PER_DAY) as u8;

        let mut year = (4 * day_number).div_euclid(1461);
        while days_before_year(year) > day_number {
            year -= 1;
        }
        while days_before_year(year + 1) <= day_number {
            year += 1;
        }

        let day_of_year = (day_number - days_before_year(year) + 1) as u16;
        let year = year.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        Self {
            day_of_year,
            year,
            hour,
        }
    }

    /// Move by any number of hours; days and years roll over both ways.
    pub fn advance(&self, delta_hours: i64) -> Self {
        Self::from_hour_number(self.hour_number().saturating_add(delta_hours))
    }

    pub fn advance_days(&self, delta_days: i64) -> Self {
        self.advance(delta_days.saturating_mul(HOURS_PER_DAY))
    }

    /// Signed hours from `self` to `other`.
    pub fn hours_until(&self, other: &CalendarDate) -> i64 {
        other.hour_number() - self.hour_number()
    }
}

impl Default for CalendarDate {
    /// 1 Ches 1492 DR, mid-morning.
    fn default() -> Self {
        Self {
            day_of_year: 62,
            year: 1492,
            hour: 10,
        }
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} DR, {:02}:00", self.day_name(), self.year, self.hour)
    }
}

/// Move `date` by `delta_hours`.
pub fn advance(date: CalendarDate, delta_hours: i64) -> CalendarDate {
    date.advance(delta_hours)
}

/// Whole calendar days from `from` to `to` (hours ignored).
pub fn days_between(from: &CalendarDate, to: &CalendarDate) -> i64 {
    to.day_number() - from.day_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_day() {
        for year in [-5, -4, 0, 1, 1491, 1492, 1493, 1496] {
            for day in 1..=days_in_year(year) {
                let date = CalendarDate::from_day_of_year(day, year).unwrap();
                let name = date.day_name();
                assert_eq!(
                    day_of_year_for(name, year),
                    Some(day),
                    "round trip failed for {name} in {year}"
                );
            }
        }
    }

    #[test]
    fn test_festival_layout() {
        let midsummer = DayName::Festival(Festival::Midsummer);
        let shieldmeet = DayName::Festival(Festival::Shieldmeet);
        assert_eq!(day_of_year_for(midsummer, 1491), Some(213));
        assert_eq!(day_of_year_for(shieldmeet, 1491), None);
        assert_eq!(day_of_year_for(shieldmeet, 1492), Some(214));
        assert_eq!(
            day_of_year_for(DayName::Month { month: Month::Eleasis, day: 1 }, 1492),
            Some(215)
        );
        assert_eq!(
            day_of_year_for(DayName::Month { month: Month::Nightal, day: 30 }, 1491),
            Some(365)
        );
        assert_eq!(
            day_of_year_for(DayName::Month { month: Month::Nightal, day: 30 }, 1492),
            Some(366)
        );
        assert_eq!(
            day_name(31, 1491),
            Some(DayName::Festival(Festival::Midwinter))
        );
    }

    #[test]
    fn test_out_of_range() {
        assert!(CalendarDate::from_day_of_year(0, 1491).is_err());
        assert!(CalendarDate::from_day_of_year(366, 1491).is_err());
        assert!(CalendarDate::from_day_of_year(366, 1492).is_ok());
        assert_eq!(
            CalendarDate::new(10, 1491, 24),
            Err(CalendarError::HourOutOfRange(24))
        );
        assert_eq!(day_name(367, 1492), None);
    }

    #[test]
    fn test_advance_rolls_over() {
        let start = CalendarDate::new(365, 1491, 23).unwrap();
        let next = start.advance(1);
        assert_eq!((next.day_of_year(), next.year(), next.hour()), (1, 1492, 0));

        let back = next.advance(-1);
        assert_eq!(back, start);

        let far = start.advance(-(HOURS_PER_DAY * 366 * 3));
        assert_eq!(far.advance(HOURS_PER_DAY * 366 * 3), start);
    }

    #[test]
    fn test_advance_matches_days_between() {
        let deltas: [i64; 12] = [
            0,
            1,
            -1,
            23,
            24,
            -24,
            25,
            -25,
            24 * 365 * 5 + 7,
            -(24 * 366 * 7 + 13),
            123_456,
            -987_654,
        ];
        for start_hour in [0u8, 11, 23] {
            for start_day in [1u16, 213, 214, 365] {
                let start = CalendarDate::new(start_day, 1492, start_hour).unwrap();
                for delta in deltas {
                    let end = advance(start, delta);
                    let expected = (start_hour as i64 + delta).div_euclid(24);
                    assert_eq!(days_between(&start, &end), expected, "delta {delta}");
                    assert!(end.hour() <= 23);
                    assert_eq!(start.hours_until(&end), delta);
                }
            }
        }
    }

    #[test]
    fn test_seasons() {
        assert_eq!(Season::from_day_of_year(1), Season::Winter);
        assert_eq!(Season::from_day_of_year(62), Season::Spring);
        assert_eq!(Season::from_day_of_year(213), Season::Summer);
        assert_eq!(Season::from_day_of_year(300), Season::Autumn);
        assert_eq!(Season::from_day_of_year(366), Season::Winter);
    }

    #[test]
    fn test_parse_day_names() {
        assert_eq!(
            DayName::parse("feast  of the moon").unwrap(),
            DayName::Festival(Festival::FeastOfTheMoon)
        );
        assert_eq!(
            DayName::parse("15 Flamerule").unwrap(),
            DayName::Month { month: Month::Flamerule, day: 15 }
        );
        assert_eq!(
            DayName::parse("flamerule 15").unwrap(),
            DayName::Month { month: Month::Flamerule, day: 15 }
        );
        assert!(DayName::parse("31 Flamerule").is_err());
        assert!(DayName::parse("Tuesday").is_err());
    }

    #[test]
    fn test_display() {
        let date = CalendarDate::from_name(
            DayName::Month { month: Month::Flamerule, day: 15 },
            1492,
            14,
        )
        .unwrap();
        assert_eq!(date.to_string(), "15 Flamerule 1492 DR, 14:00");
        assert_eq!(date.season(), Season::Summer);
        assert_eq!(date.time_of_day(), "afternoon");
        assert_eq!(CalendarDate::default().month(), Some(Month::Ches));
    }

    #[test]
    fn test_stored_dates_are_validated() {
        let date = CalendarDate::new(366, 1492, 9).unwrap();
        let json = serde_json::to_string(&date).unwrap();
        assert_eq!(serde_json::from_str::<CalendarDate>(&json).unwrap(), date);

        assert!(serde_json::from_str::<CalendarDate>(r#"{"day_of_year":366,"year":1491,"hour":9}"#).is_err());
        assert!(serde_json::from_str::<CalendarDate>(r#"{"day_of_year":0,"year":1492,"hour":9}"#).is_err());
        assert!(serde_json::from_str::<CalendarDate>(r#"{"day_of_year":12,"year":1492,"hour":24}"#).is_err());
    }
}
