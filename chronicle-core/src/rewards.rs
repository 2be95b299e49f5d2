//! Reward magnitudes and failure consequences.
//!
//! Rewards are computed when a session ends or an adventure completes and
//! stored on the record. They are applied to the character only on claim.

use crate::clock::RandomSource;
use crate::markers::normalize;
use crate::synergy::{Outcome, RiskTier};
use serde::{Deserialize, Serialize};

/// Fraction of the XP award given to companions who sat the activity out.
pub const INACTIVE_COMPANION_XP_SHARE: f64 = 0.5;

struct LevelBracket {
    max_level: u8,
    experience: u32,
    gold: u32,
    loot: &'static [&'static str],
}

static BRACKETS: [LevelBracket; 4] = [
    LevelBracket {
        max_level: 4,
        experience: 100,
        gold: 25,
        loot: &[
            "potion of healing",
            "silvered dagger",
            "bag of caltrops",
            "traveler's cloak",
        ],
    },
    LevelBracket {
        max_level: 10,
        experience: 300,
        gold: 75,
        loot: &[
            "potion of greater healing",
            "+1 shortsword",
            "cloak of protection",
            "wand of magic missiles",
        ],
    },
    LevelBracket {
        max_level: 16,
        experience: 800,
        gold: 200,
        loot: &[
            "potion of superior healing",
            "+2 longsword",
            "ring of protection",
            "boots of speed",
        ],
    },
    LevelBracket {
        max_level: 20,
        experience: 2000,
        gold: 500,
        loot: &[
            "potion of supreme healing",
            "+3 greatsword",
            "ring of spell storing",
            "cloak of invisibility",
        ],
    },
];

fn bracket(level: u8) -> &'static LevelBracket {
    BRACKETS
        .iter()
        .find(|b| level <= b.max_level)
        .unwrap_or(&BRACKETS[BRACKETS.len() - 1])
}

/// Base `(experience, gold)` for a character level.
pub fn base_rewards(level: u8) -> (u32, u32) {
    let b = bracket(level);
    (b.experience, b.gold)
}

pub fn risk_multiplier(risk: RiskTier) -> f64 {
    match risk {
        RiskTier::Low => 1.0,
        RiskTier::Medium => 1.5,
        RiskTier::High => 2.0,
    }
}

/// Scale by activity length in game hours.
pub fn duration_multiplier(hours: u32) -> f64 {
    match hours {
        0..=2 => 0.3,
        3..=4 => 0.7,
        5..=8 => 1.0,
        9..=10 => 1.3,
        11..=23 => 1.6,
        _ => 2.0,
    }
}

fn loot_chance(risk: RiskTier) -> f64 {
    match risk {
        RiskTier::Low => 0.05,
        RiskTier::Medium => 0.10,
        RiskTier::High => 0.20,
    }
}

/// `(min %, max %)` of maximum HP lost on failure.
fn hp_loss_percent(risk: RiskTier) -> (i64, i64) {
    match risk {
        RiskTier::Low => (5, 15),
        RiskTier::Medium => (10, 25),
        RiskTier::High => (20, 40),
    }
}

fn equipment_damage_chance(risk: RiskTier) -> f64 {
    match risk {
        RiskTier::Low => 0.10,
        RiskTier::Medium => 0.20,
        RiskTier::High => 0.35,
    }
}

fn debuff_chance(risk: RiskTier) -> f64 {
    match risk {
        RiskTier::Low => 0.20,
        RiskTier::Medium => 0.35,
        RiskTier::High => 0.50,
    }
}

const GOLD_LOSS_CHANCE: f64 = 0.5;
const GOLD_LOSS_PERCENT: (i64, i64) = (10, 25);
const DEBUFFS: [&str; 3] = ["exhausted", "wounded", "shaken"];
const DEBUFF_HOURS: (i64, i64) = (4, 24);

/// Bounds of failure HP loss for a given maximum, inclusive.
pub fn hp_loss_bounds(risk: RiskTier, max_hp: i32) -> (i32, i32) {
    let (lo, hi) = hp_loss_percent(risk);
    let max_hp = max_hp.max(1) as i64;
    let low = (max_hp * lo / 100).max(1);
    let high = (max_hp * hi / 100).max(low);
    (low as i32, high as i32)
}

/// A stack of items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootItem {
    /// Normalized item identifier.
    pub item: String,
    pub quantity: u32,
}

impl LootItem {
    pub fn new(item: &str, quantity: u32) -> Self {
        Self {
            item: normalize(item),
            quantity: quantity.max(1),
        }
    }
}

/// A condition that wears off after some game hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debuff {
    pub condition: String,
    pub hours: u32,
}

/// What an activity produced, computed up front and applied on claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewards {
    pub outcome: Outcome,
    pub duration_hours: u32,
    pub experience: u32,
    pub gold: u32,
    pub loot: Vec<LootItem>,
    pub hp_loss: i32,
    pub gold_loss: u32,
    pub equipment_damaged: bool,
    pub debuff: Option<Debuff>,
}

/// Inputs that size the rewards.
#[derive(Debug, Clone, Copy)]
pub struct RewardContext {
    pub level: u8,
    pub max_hp: i32,
    pub carried_gold: u32,
    pub duration_hours: u32,
}

/// Turn a rolled outcome into concrete rewards or losses.
pub fn compute_rewards(outcome: Outcome, ctx: RewardContext, rng: &mut dyn RandomSource) -> Rewards {
    let risk = outcome.risk;
    let mut rewards = Rewards {
        outcome,
        duration_hours: ctx.duration_hours,
        experience: 0,
        gold: 0,
        loot: Vec::new(),
        hp_loss: 0,
        gold_loss: 0,
        equipment_damaged: false,
        debuff: None,
    };

    if rewards.outcome.success {
        let (xp, gold) = base_rewards(ctx.level);
        let scale = risk_multiplier(risk) * duration_multiplier(ctx.duration_hours);
        rewards.experience = (xp as f64 * scale).round() as u32;
        rewards.gold = (gold as f64 * scale).round() as u32;

        if rng.chance(loot_chance(risk)) {
            let table = bracket(ctx.level).loot;
            let pick = rng.range_inclusive(0, table.len() as i64 - 1) as usize;
            if let Some(item) = table.get(pick) {
                rewards.loot.push(LootItem::new(item, 1));
            }
        }
        return rewards;
    }

    let (low, high) = hp_loss_bounds(risk, ctx.max_hp);
    rewards.hp_loss = rng.range_inclusive(low as i64, high as i64) as i32;

    if ctx.carried_gold > 0 && rng.chance(GOLD_LOSS_CHANCE) {
        let percent = rng.range_inclusive(GOLD_LOSS_PERCENT.0, GOLD_LOSS_PERCENT.1);
        rewards.gold_loss = (ctx.carried_gold as i64 * percent / 100) as u32;
    }

    rewards.equipment_damaged = rng.chance(equipment_damage_chance(risk));

    if rng.chance(debuff_chance(risk)) {
        let pick = rng.range_inclusive(0, DEBUFFS.len() as i64 - 1) as usize;
        let hours = rng.range_inclusive(DEBUFF_HOURS.0, DEBUFF_HOURS.1) as u32;
        rewards.debuff = Some(Debuff {
            condition: DEBUFFS.get(pick).unwrap_or(&DEBUFFS[0]).to_string(),
            hours,
        });
    }

    rewards
}

/// XP a companion receives from an award.
pub fn companion_share(experience: u32, participated: bool) -> u32 {
    if participated {
        experience
    } else {
        (experience as f64 * INACTIVE_COMPANION_XP_SHARE).floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synergy::{resolve_outcome, ActivityType, PartyMember};
    use crate::testing::{FixedRandom, ScriptedRandom};

    fn ctx(level: u8, hours: u32) -> RewardContext {
        RewardContext {
            level,
            max_hp: 20,
            carried_gold: 100,
            duration_hours: hours,
        }
    }

    fn outcome(risk: RiskTier, roll: f64) -> Outcome {
        let party = vec![PartyMember::new("Brann", "fighter", 3), PartyMember::new("Ilse", "cleric", 3)];
        resolve_outcome(risk, &party, ActivityType::Combat, &mut FixedRandom(roll))
    }

    #[test]
    fn test_duration_buckets() {
        assert_eq!(duration_multiplier(1), 0.3);
        assert_eq!(duration_multiplier(2), 0.3);
        assert_eq!(duration_multiplier(4), 0.7);
        assert_eq!(duration_multiplier(8), 1.0);
        assert_eq!(duration_multiplier(10), 1.3);
        assert_eq!(duration_multiplier(14), 1.6);
        assert_eq!(duration_multiplier(24), 2.0);
        assert_eq!(duration_multiplier(72), 2.0);
    }

    #[test]
    fn test_success_rewards_scale() {
        // Loot roll of 0.99 never hits.
        let mut rng = FixedRandom(0.99);
        let rewards = compute_rewards(outcome(RiskTier::Medium, 0.0), ctx(6, 8), &mut rng);
        assert_eq!(rewards.experience, 450);
        assert_eq!(rewards.gold, 113);
        assert!(rewards.loot.is_empty());
        assert_eq!(rewards.hp_loss, 0);
    }

    #[test]
    fn test_success_loot_roll() {
        let mut rng = ScriptedRandom::new(vec![0.01, 0.0]);
        let rewards = compute_rewards(outcome(RiskTier::High, 0.0), ctx(2, 4), &mut rng);
        assert_eq!(rewards.loot, vec![LootItem::new("potion of healing", 1)]);
    }

    #[test]
    fn test_failure_consequences_within_bounds() {
        for seed in 0..50u64 {
            let mut rng = crate::clock::SeededRandom::new(seed);
            let rewards = compute_rewards(outcome(RiskTier::High, 0.999), ctx(3, 8), &mut rng);
            assert!(!rewards.outcome.success);
            assert_eq!(rewards.experience, 0);
            assert!((4..=8).contains(&rewards.hp_loss), "hp loss {}", rewards.hp_loss);
            assert!(rewards.gold_loss <= 25);
            if let Some(debuff) = &rewards.debuff {
                assert!((4..=24).contains(&debuff.hours));
                assert!(DEBUFFS.contains(&debuff.condition.as_str()));
            }
        }
    }

    #[test]
    fn test_hp_loss_bounds_minimum() {
        assert_eq!(hp_loss_bounds(RiskTier::Low, 3), (1, 1));
        assert_eq!(hp_loss_bounds(RiskTier::High, 20), (4, 8));
    }

    #[test]
    fn test_companion_share() {
        assert_eq!(companion_share(301, true), 301);
        assert_eq!(companion_share(301, false), 150);
    }
}
