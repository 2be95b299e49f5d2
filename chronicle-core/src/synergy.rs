//! Party synergy and outcome resolution.
//!
//! Each class or occupation contributes a fixed set of roles. Each activity
//! declares the roles it requires and the roles that merely help. The
//! synergy bonus rewards covering them; outcome resolution turns the bonus
//! and the activity's risk tier into a success chance and rolls once.

use crate::clock::RandomSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lowest possible synergy bonus.
pub const MIN_SYNERGY: i32 = -10;

/// Highest possible synergy bonus.
pub const MAX_SYNERGY: i32 = 25;

/// Success chance floor.
pub const MIN_SUCCESS_CHANCE: f64 = 0.05;

/// Success chance ceiling.
pub const MAX_SUCCESS_CHANCE: f64 = 0.95;

/// What a party member brings to an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Frontline,
    Healing,
    Stealth,
    Social,
    Arcane,
    Ranged,
    Scouting,
    Knowledge,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Frontline => "frontline",
            Role::Healing => "healing",
            Role::Stealth => "stealth",
            Role::Social => "social",
            Role::Arcane => "arcane",
            Role::Ranged => "ranged",
            Role::Scouting => "scouting",
            Role::Knowledge => "knowledge",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Roles contributed by a class or occupation label. Unknown labels
/// contribute nothing.
pub fn roles_for_class(class: &str) -> &'static [Role] {
    use Role::*;
    match class.trim().to_lowercase().as_str() {
        "fighter" | "guard" | "soldier" | "mercenary" => &[Frontline],
        "barbarian" => &[Frontline, Scouting],
        "paladin" => &[Frontline, Healing, Social],
        "cleric" | "priest" => &[Healing, Frontline, Knowledge],
        "druid" => &[Healing, Scouting, Arcane],
        "ranger" | "hunter" => &[Ranged, Scouting],
        "rogue" | "thief" => &[Stealth, Scouting],
        "monk" => &[Frontline, Stealth],
        "bard" | "entertainer" => &[Social, Healing],
        "wizard" => &[Arcane, Knowledge],
        "sorcerer" => &[Arcane, Social],
        "warlock" => &[Arcane, Social],
        "artificer" => &[Arcane, Knowledge],
        "merchant" | "noble" => &[Social],
        "scholar" | "sage" => &[Knowledge],
        "healer" | "herbalist" => &[Healing, Knowledge],
        "scout" => &[Scouting, Stealth],
        "archer" => &[Ranged],
        _ => &[],
    }
}

/// The kind of activity a session or adventure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Combat,
    #[default]
    Exploration,
    Infiltration,
    Diplomacy,
    Investigation,
    Gathering,
}

impl ActivityType {
    pub const ALL: [ActivityType; 6] = [
        ActivityType::Combat,
        ActivityType::Exploration,
        ActivityType::Infiltration,
        ActivityType::Diplomacy,
        ActivityType::Investigation,
        ActivityType::Gathering,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActivityType::Combat => "combat",
            ActivityType::Exploration => "exploration",
            ActivityType::Infiltration => "infiltration",
            ActivityType::Diplomacy => "diplomacy",
            ActivityType::Investigation => "investigation",
            ActivityType::Gathering => "gathering",
        }
    }

    pub fn required_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            ActivityType::Combat => &[Frontline, Healing],
            ActivityType::Exploration => &[Scouting],
            ActivityType::Infiltration => &[Stealth],
            ActivityType::Diplomacy => &[Social],
            ActivityType::Investigation => &[Knowledge],
            ActivityType::Gathering => &[Scouting],
        }
    }

    pub fn beneficial_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            ActivityType::Combat => &[Ranged, Arcane],
            ActivityType::Exploration => &[Frontline, Knowledge, Healing],
            ActivityType::Infiltration => &[Scouting, Arcane, Social],
            ActivityType::Diplomacy => &[Knowledge, Stealth],
            ActivityType::Investigation => &[Social, Stealth, Arcane],
            ActivityType::Gathering => &[Knowledge, Frontline],
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ActivityType::ALL
            .iter()
            .copied()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| format!("unknown activity '{wanted}'"))
    }
}

/// Three-tier risk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTier {
    pub fn name(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    pub fn failure_chance(&self) -> f64 {
        match self {
            RiskTier::Low => 0.10,
            RiskTier::Medium => 0.25,
            RiskTier::High => 0.40,
        }
    }

    /// Success-chance points lost for every required role nobody covers.
    pub fn shortfall_points(&self) -> i32 {
        match self {
            RiskTier::Low => 5,
            RiskTier::Medium => 15,
            RiskTier::High => 30,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            other => Err(format!("unknown risk tier '{other}'")),
        }
    }
}

/// One participant, assembled per calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMember {
    pub name: String,
    pub class: String,
    pub level: u8,
}

impl PartyMember {
    pub fn new(name: impl Into<String>, class: impl Into<String>, level: u8) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            level,
        }
    }

    pub fn roles(&self) -> &'static [Role] {
        roles_for_class(&self.class)
    }
}

/// Every component of a synergy calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynergyBreakdown {
    pub covered_required: Vec<Role>,
    pub missing_required: Vec<Role>,
    pub covered_beneficial: Vec<Role>,
    /// Required coverage fraction × 15.
    pub required_points: f64,
    /// −5 per uncovered required role.
    pub missing_penalty: i32,
    /// Beneficial coverage fraction × 10.
    pub beneficial_points: f64,
    pub party_size_bonus: i32,
    pub diversity_bonus: i32,
    /// Sum before clamping, rounded.
    pub unclamped: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synergy {
    /// Clamped to [`MIN_SYNERGY`, `MAX_SYNERGY`].
    pub bonus: i32,
    pub breakdown: SynergyBreakdown,
}

fn coverage(wanted: &[Role], present: &BTreeSet<Role>) -> (Vec<Role>, Vec<Role>) {
    wanted.iter().copied().partition(|r| present.contains(r))
}

/// Synergy of `party` for `activity`.
pub fn synergy(party: &[PartyMember], activity: ActivityType) -> Synergy {
    let present: BTreeSet<Role> = party.iter().flat_map(|m| m.roles().iter().copied()).collect();

    let required = activity.required_roles();
    let beneficial = activity.beneficial_roles();
    let (covered_required, missing_required) = coverage(required, &present);
    let (covered_beneficial, _) = coverage(beneficial, &present);

    let required_fraction = if required.is_empty() {
        1.0
    } else {
        covered_required.len() as f64 / required.len() as f64
    };
    let beneficial_fraction = if beneficial.is_empty() {
        0.0
    } else {
        covered_beneficial.len() as f64 / beneficial.len() as f64
    };

    let required_points = required_fraction * 15.0;
    let missing_penalty = -5 * missing_required.len() as i32;
    let beneficial_points = beneficial_fraction * 10.0;

    let party_size_bonus = match party.len() {
        0 | 1 => 0,
        2 | 3 => 2,
        _ => 5,
    };

    let distinct_classes: BTreeSet<String> = party
        .iter()
        .map(|m| m.class.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    let diversity_bonus = if distinct_classes.len() >= 3 { 3 } else { 0 };

    let unclamped = (required_points
        + missing_penalty as f64
        + beneficial_points
        + party_size_bonus as f64
        + diversity_bonus as f64)
        .round() as i32;

    Synergy {
        bonus: unclamped.clamp(MIN_SYNERGY, MAX_SYNERGY),
        breakdown: SynergyBreakdown {
            covered_required,
            missing_required,
            covered_beneficial,
            required_points,
            missing_penalty,
            beneficial_points,
            party_size_bonus,
            diversity_bonus,
            unclamped,
        },
    }
}

/// How the final success chance was reached. All values are fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeOdds {
    /// `1 − failure_chance(risk)`.
    pub base: f64,
    /// Synergy bonus as a fraction.
    pub synergy: f64,
    /// Negative role-shortfall adjustment.
    pub shortfall: f64,
    /// Clamped chance the roll is compared against.
    pub final_chance: f64,
}

/// Result of one outcome roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// The uniform draw in `[0, 1)`.
    pub roll: f64,
    pub odds: OutcomeOdds,
    pub risk: RiskTier,
    pub activity: ActivityType,
    pub synergy: Synergy,
}

/// Odds for a party attempting `activity` at `risk`, without rolling.
pub fn outcome_odds(risk: RiskTier, party: &[PartyMember], activity: ActivityType) -> (OutcomeOdds, Synergy) {
    let synergy = synergy(party, activity);
    let base = 1.0 - risk.failure_chance();
    let synergy_delta = synergy.bonus as f64 / 100.0;
    let shortfall =
        -(synergy.breakdown.missing_required.len() as f64 * risk.shortfall_points() as f64) / 100.0;
    let final_chance =
        (base + synergy_delta + shortfall).clamp(MIN_SUCCESS_CHANCE, MAX_SUCCESS_CHANCE);

    (
        OutcomeOdds {
            base,
            synergy: synergy_delta,
            shortfall,
            final_chance,
        },
        synergy,
    )
}

/// Roll once against the party's odds.
pub fn resolve_outcome(
    risk: RiskTier,
    party: &[PartyMember],
    activity: ActivityType,
    rng: &mut dyn RandomSource,
) -> Outcome {
    let (odds, synergy) = outcome_odds(risk, party, activity);
    let roll = rng.next_f64();
    Outcome {
        success: roll < odds.final_chance,
        roll,
        odds,
        risk,
        activity,
        synergy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedRandom;

    fn member(class: &str) -> PartyMember {
        PartyMember::new(class, class, 3)
    }

    #[test]
    fn test_full_combat_party() {
        let party = vec![member("fighter"), member("cleric"), member("ranger"), member("wizard")];
        let s = synergy(&party, ActivityType::Combat);
        // 15 + 0 + 10 + 5 + 3
        assert_eq!(s.breakdown.unclamped, 33);
        assert_eq!(s.bonus, MAX_SYNERGY);
        assert!(s.breakdown.missing_required.is_empty());
    }

    #[test]
    fn test_empty_coverage_floor() {
        let s = synergy(&[member("merchant")], ActivityType::Combat);
        assert_eq!(s.breakdown.missing_required, vec![Role::Frontline, Role::Healing]);
        assert_eq!(s.bonus, MIN_SYNERGY);
        assert_eq!(synergy(&[], ActivityType::Combat).bonus, MIN_SYNERGY);
    }

    #[test]
    fn test_monotonic_in_required_coverage() {
        // Same size, same beneficial coverage (none), more required roles.
        let none = synergy(&[member("merchant"), member("scholar")], ActivityType::Combat);
        let one = synergy(&[member("fighter"), member("merchant")], ActivityType::Combat);
        let both = synergy(&[member("fighter"), member("priest")], ActivityType::Combat);
        assert!(none.bonus <= one.bonus);
        assert!(one.bonus <= both.bonus);
    }

    #[test]
    fn test_bounds_hold_for_every_combination() {
        let classes = ["fighter", "cleric", "rogue", "bard", "wizard", "ranger", "merchant", "nobody"];
        for activity in ActivityType::ALL {
            for a in classes {
                for b in classes {
                    for size in 1..=6 {
                        let mut party = vec![member(a); size];
                        party.push(member(b));
                        let s = synergy(&party, activity);
                        assert!((MIN_SYNERGY..=MAX_SYNERGY).contains(&s.bonus));
                    }
                }
            }
        }
    }

    #[test]
    fn test_outcome_clamps_to_floor() {
        let party = vec![member("merchant"), member("scholar")];
        let mut rng = FixedRandom(0.10);
        let outcome = resolve_outcome(RiskTier::High, &party, ActivityType::Combat, &mut rng);

        assert!((outcome.odds.base - 0.60).abs() < 1e-9);
        assert!(outcome.odds.synergy + outcome.odds.shortfall <= -0.55);
        assert_eq!(outcome.odds.final_chance, MIN_SUCCESS_CHANCE);
        assert!(!outcome.success);
    }

    #[test]
    fn test_outcome_ceiling() {
        let party = vec![member("fighter"), member("cleric"), member("ranger"), member("wizard")];
        let (odds, _) = outcome_odds(RiskTier::Low, &party, ActivityType::Combat);
        assert_eq!(odds.final_chance, MAX_SUCCESS_CHANCE);

        let mut rng = FixedRandom(0.94);
        assert!(resolve_outcome(RiskTier::Low, &party, ActivityType::Combat, &mut rng).success);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Combat".parse::<ActivityType>(), Ok(ActivityType::Combat));
        assert_eq!(" HIGH ".parse::<RiskTier>(), Ok(RiskTier::High));
        assert!("reckless".parse::<RiskTier>().is_err());
    }
}
