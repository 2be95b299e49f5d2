//! Real-time boundary: wall clock, time ratio presets, and randomness.
//!
//! Everything non-deterministic the orchestrator touches comes through the
//! traits in this module so tests can pin it down.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source of "now" for real-time bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock - uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of uniform randomness for outcome and consequence rolls.
pub trait RandomSource: Send {
    /// Uniform draw in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform integer in `[low, high]`.
    fn range_inclusive(&mut self, low: i64, high: i64) -> i64;

    /// Bernoulli trial with probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Reproducible RNG for replays and simulations.
#[derive(Debug, Clone)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.0.gen::<f64>()
    }

    fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.0.gen_range(low..=high)
    }
}

/// How many game hours pass per real hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeRatio {
    #[default]
    OneToOne,
    OneToTwo,
    OneToFour,
    OneToSix,
    OneToTwelve,
    OneToTwentyFour,
}

impl TimeRatio {
    pub const ALL: [TimeRatio; 6] = [
        TimeRatio::OneToOne,
        TimeRatio::OneToTwo,
        TimeRatio::OneToFour,
        TimeRatio::OneToSix,
        TimeRatio::OneToTwelve,
        TimeRatio::OneToTwentyFour,
    ];

    pub fn multiplier(&self) -> i64 {
        match self {
            TimeRatio::OneToOne => 1,
            TimeRatio::OneToTwo => 2,
            TimeRatio::OneToFour => 4,
            TimeRatio::OneToSix => 6,
            TimeRatio::OneToTwelve => 12,
            TimeRatio::OneToTwentyFour => 24,
        }
    }

    /// Game minutes that elapse during `real`. Negative spans count as zero.
    pub fn game_minutes(&self, real: Duration) -> i64 {
        self.game_seconds(real) / 60
    }

    /// Game seconds that elapse during `real`. Negative spans count as zero.
    pub fn game_seconds(&self, real: Duration) -> i64 {
        real.num_seconds().max(0) * self.multiplier()
    }

    /// Real time needed for `game_hours` to pass.
    pub fn real_duration_for(&self, game_hours: i64) -> Duration {
        Duration::seconds(game_hours.max(0) * 3600 / self.multiplier())
    }
}

impl fmt::Display for TimeRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1:{}", self.multiplier())
    }
}

impl FromStr for TimeRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        TimeRatio::ALL
            .iter()
            .copied()
            .find(|r| r.to_string() == wanted)
            .ok_or_else(|| format!("unknown time ratio '{wanted}' (expected one of 1:1, 1:2, 1:4, 1:6, 1:12, 1:24)"))
    }
}

/// Convert elapsed real time into whole game hours, carrying leftover
/// game seconds. Returns `(hours, new_carry_seconds)`.
pub fn game_hours_elapsed(ratio: TimeRatio, real: Duration, carry_seconds: i64) -> (i64, i64) {
    let total = ratio.game_seconds(real) + carry_seconds.max(0);
    (total / 3600, total % 3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_parse_and_display() {
        for ratio in TimeRatio::ALL {
            assert_eq!(ratio.to_string().parse::<TimeRatio>(), Ok(ratio));
        }
        assert!("1:3".parse::<TimeRatio>().is_err());
    }

    #[test]
    fn test_game_minutes() {
        let half_hour = Duration::minutes(30);
        assert_eq!(TimeRatio::OneToOne.game_minutes(half_hour), 30);
        assert_eq!(TimeRatio::OneToTwentyFour.game_minutes(half_hour), 720);
        assert_eq!(TimeRatio::OneToFour.game_minutes(Duration::seconds(-10)), 0);
    }

    #[test]
    fn test_game_hours_carry() {
        let (hours, carry) = game_hours_elapsed(TimeRatio::OneToTwo, Duration::minutes(20), 30 * 60);
        assert_eq!((hours, carry), (1, 10 * 60));
        let (hours, carry) = game_hours_elapsed(TimeRatio::OneToOne, Duration::minutes(5), 0);
        assert_eq!((hours, carry), (0, 5 * 60));
    }

    #[test]
    fn test_sub_minute_spans_accumulate() {
        let mut carry = 0;
        let mut hours = 0;
        for _ in 0..62 {
            let (h, c) = game_hours_elapsed(TimeRatio::OneToOne, Duration::seconds(59), carry);
            hours += h;
            carry = c;
        }
        // 62 * 59s = 3658s
        assert_eq!((hours, carry), (1, 58));
    }

    #[test]
    fn test_real_duration_for() {
        assert_eq!(
            TimeRatio::OneToFour.real_duration_for(8),
            Duration::hours(2)
        );
        assert_eq!(TimeRatio::OneToOne.real_duration_for(-3), Duration::zero());
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(7);
        let mut b = SeededRandom::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_f64(), b.next_f64());
            assert_eq!(a.range_inclusive(1, 6), b.range_inclusive(1, 6));
        }
        assert_eq!(ThreadRandom.range_inclusive(4, 4), 4);
    }
}
