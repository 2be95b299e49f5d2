//! Persisted character and companion records.
//!
//! These are the durable shapes the orchestrator reads and mutates: hit
//! points, currency, experience, the character's calendar, conditions and
//! inventory. Reward application lives here so session and adventure
//! claims share it.

use crate::calendar::CalendarDate;
use crate::clock::TimeRatio;
use crate::ids::{CharacterId, CompanionId, SessionId};
use crate::markers::normalize;
use crate::rewards::{companion_share, LootItem, Rewards};
use crate::synergy::PartyMember;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// XP thresholds for levels 1-20.
const XP_THRESHOLDS: [u32; 20] = [
    0, 300, 900, 2700, 6500, 14000, 23000, 34000, 48000, 64000, 85000, 100000, 120000, 140000,
    165000, 195000, 225000, 265000, 305000, 355000,
];

/// Level reached with `experience` points.
pub fn level_for_experience(experience: u32) -> u8 {
    XP_THRESHOLDS
        .iter()
        .rposition(|&threshold| experience >= threshold)
        .map(|idx| (idx + 1) as u8)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        Self {
            current: maximum,
            maximum,
        }
    }

    /// Lose HP, never dropping below 1.
    pub fn wound(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current - amount.max(0)).max(1).min(before);
        before - self.current
    }

    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - before
    }
}

/// Coin purse by denomination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purse {
    pub platinum: u32,
    pub gold: u32,
    pub silver: u32,
    pub copper: u32,
}

impl Purse {
    pub fn gold(amount: u32) -> Self {
        Self {
            gold: amount,
            ..Self::default()
        }
    }

    /// Whole gold pieces the purse is worth.
    pub fn gold_value(&self) -> u32 {
        self.platinum * 10 + self.gold + self.silver / 10 + self.copper / 100
    }

    /// Remove up to `amount` gold, breaking platinum when gold runs out.
    /// Returns the gold actually removed.
    pub fn deduct_gold(&mut self, amount: u32) -> u32 {
        let mut remaining = amount;
        let from_gold = remaining.min(self.gold);
        self.gold -= from_gold;
        remaining -= from_gold;

        while remaining > 0 && self.platinum > 0 {
            self.platinum -= 1;
            self.gold += 10;
            let take = remaining.min(self.gold);
            self.gold -= take;
            remaining -= take;
        }
        amount - remaining
    }
}

/// A condition on a character, optionally timed against the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    /// Normalized condition name.
    pub name: String,
    pub source: String,
    pub expires: Option<CalendarDate>,
}

/// A stack of carried items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item: String,
    pub quantity: u32,
}

/// The durable player character record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: CharacterId,
    pub name: String,
    /// Class or occupation label.
    pub class: String,
    pub level: u8,
    pub hit_points: HitPoints,
    pub purse: Purse,
    pub experience: u32,
    pub calendar: CalendarDate,
    #[serde(default)]
    pub conditions: Vec<ActiveCondition>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub equipment_damaged: bool,
    /// Preferred pace; the orchestrator default applies when unset.
    #[serde(default)]
    pub time_ratio: Option<TimeRatio>,
    /// NPC names already used in this campaign, fed to the narrator.
    #[serde(default)]
    pub used_npc_names: Vec<String>,
    /// Rewards already applied, keyed by source label.
    #[serde(default)]
    pub claims: BTreeMap<String, AppliedRewards>,
}

impl CharacterRecord {
    pub fn new(name: impl Into<String>, class: impl Into<String>, level: u8, max_hp: i32) -> Self {
        let level = level.clamp(1, 20);
        Self {
            id: CharacterId::new(),
            name: name.into(),
            class: class.into(),
            level,
            hit_points: HitPoints::new(max_hp),
            purse: Purse::default(),
            experience: XP_THRESHOLDS[level as usize - 1],
            calendar: CalendarDate::default(),
            conditions: Vec::new(),
            inventory: Vec::new(),
            equipment_damaged: false,
            time_ratio: None,
            used_npc_names: Vec::new(),
            claims: BTreeMap::new(),
        }
    }

    pub fn with_purse(mut self, purse: Purse) -> Self {
        self.purse = purse;
        self
    }

    pub fn with_calendar(mut self, calendar: CalendarDate) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_time_ratio(mut self, ratio: TimeRatio) -> Self {
        self.time_ratio = Some(ratio);
        self
    }

    pub fn party_member(&self) -> PartyMember {
        PartyMember::new(&self.name, &self.class, self.level)
    }

    pub fn has_condition(&self, name: &str) -> bool {
        let name = normalize(name);
        self.conditions.iter().any(|c| c.name == name)
    }

    /// Add a condition unless already present. Returns whether it was added.
    pub fn add_condition(
        &mut self,
        name: &str,
        source: impl Into<String>,
        expires: Option<CalendarDate>,
    ) -> bool {
        let name = normalize(name);
        if name.is_empty() || self.conditions.iter().any(|c| c.name == name) {
            return false;
        }
        self.conditions.push(ActiveCondition {
            name,
            source: source.into(),
            expires,
        });
        true
    }

    pub fn remove_condition(&mut self, name: &str) -> bool {
        let name = normalize(name);
        let before = self.conditions.len();
        self.conditions.retain(|c| c.name != name);
        before != self.conditions.len()
    }

    /// Drop timed conditions whose expiry is at or before `now`.
    pub fn expire_conditions(&mut self, now: &CalendarDate) -> Vec<String> {
        let mut expired = Vec::new();
        self.conditions.retain(|c| match c.expires {
            Some(at) if at.hour_number() <= now.hour_number() => {
                expired.push(c.name.clone());
                false
            }
            _ => true,
        });
        expired
    }

    pub fn condition_names(&self) -> Vec<String> {
        self.conditions.iter().map(|c| c.name.clone()).collect()
    }

    pub fn add_item(&mut self, item: &str, quantity: u32) {
        let item = normalize(item);
        let quantity = quantity.max(1);
        match self.inventory.iter_mut().find(|i| i.item == item) {
            Some(stack) => stack.quantity += quantity,
            None => self.inventory.push(InventoryItem { item, quantity }),
        }
    }

    pub fn item_count(&self, item: &str) -> u32 {
        let item = normalize(item);
        self.inventory
            .iter()
            .find(|i| i.item == item)
            .map(|i| i.quantity)
            .unwrap_or(0)
    }

    /// Add XP and level up as thresholds are crossed. Returns the new level
    /// when it changed.
    pub fn grant_experience(&mut self, amount: u32) -> Option<u8> {
        self.experience = self.experience.saturating_add(amount);
        let level = level_for_experience(self.experience).max(self.level);
        if level > self.level {
            self.level = level;
            Some(level)
        } else {
            None
        }
    }

    pub fn remember_npc(&mut self, name: &str) {
        if !self
            .used_npc_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
        {
            self.used_npc_names.push(name.to_string());
        }
    }

    /// Apply claimed rewards. `source` labels any debuff condition and is
    /// recorded, so applying the same source again changes nothing and
    /// returns the first result.
    pub fn apply_rewards(&mut self, rewards: &Rewards, source: &str) -> AppliedRewards {
        if let Some(applied) = self.claims.get(source) {
            return applied.clone();
        }
        let level_up = self.grant_experience(rewards.experience);
        self.purse.gold = self.purse.gold.saturating_add(rewards.gold);
        for LootItem { item, quantity } in &rewards.loot {
            self.add_item(item, *quantity);
        }

        let gold_lost = self.purse.deduct_gold(rewards.gold_loss);
        let hp_lost = self.hit_points.wound(rewards.hp_loss);
        if rewards.equipment_damaged {
            self.equipment_damaged = true;
        }
        if let Some(debuff) = &rewards.debuff {
            let expires = self.calendar.advance(debuff.hours as i64);
            self.add_condition(&debuff.condition, source, Some(expires));
        }

        let applied = AppliedRewards {
            experience: rewards.experience,
            gold_gained: rewards.gold,
            gold_lost,
            hp_lost,
            level_up,
        };
        self.claims.insert(source.to_string(), applied.clone());
        applied
    }

    /// Grant XP once per `source`.
    pub fn claim_experience(&mut self, amount: u32, source: &str) -> Option<u8> {
        if let Some(applied) = self.claims.get(source) {
            return applied.level_up;
        }
        let level_up = self.grant_experience(amount);
        self.claims.insert(
            source.to_string(),
            AppliedRewards {
                experience: amount,
                gold_gained: 0,
                gold_lost: 0,
                hp_lost: 0,
                level_up,
            },
        );
        level_up
    }
}

/// What a claim actually changed on the character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRewards {
    pub experience: u32,
    pub gold_gained: u32,
    pub gold_lost: u32,
    pub hp_lost: i32,
    pub level_up: Option<u8>,
}

/// A recruited NPC travelling with a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub id: CompanionId,
    pub owner: CharacterId,
    pub name: String,
    pub class: String,
    pub level: u8,
    pub hit_points: HitPoints,
    pub experience: u32,
    /// Active companions join sessions and adventures.
    pub active: bool,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub recruited_in: Option<SessionId>,
    /// Source labels whose XP share has been granted.
    #[serde(default)]
    pub claims: Vec<String>,
}

impl Companion {
    pub fn new(owner: CharacterId, name: impl Into<String>, class: impl Into<String>, level: u8) -> Self {
        let level = level.clamp(1, 20);
        Self {
            id: CompanionId::new(),
            owner,
            name: name.into(),
            class: class.into(),
            level,
            hit_points: HitPoints::new(8 + 5 * (level as i32 - 1)),
            experience: XP_THRESHOLDS[level as usize - 1],
            active: true,
            conditions: Vec::new(),
            recruited_in: None,
            claims: Vec::new(),
        }
    }

    pub fn party_member(&self) -> PartyMember {
        PartyMember::new(&self.name, &self.class, self.level)
    }

    pub fn add_condition(&mut self, name: &str) -> bool {
        let name = normalize(name);
        if name.is_empty() || self.conditions.contains(&name) {
            return false;
        }
        self.conditions.push(name);
        true
    }

    pub fn remove_condition(&mut self, name: &str) -> bool {
        let name = normalize(name);
        let before = self.conditions.len();
        self.conditions.retain(|c| *c != name);
        before != self.conditions.len()
    }

    /// Grant this companion's share of an award, once per `source`.
    pub fn grant_share(&mut self, experience: u32, participated: bool, source: &str) -> u32 {
        let share = companion_share(experience, participated);
        if self.claims.iter().any(|c| c == source) {
            return share;
        }
        self.experience = self.experience.saturating_add(share);
        self.level = level_for_experience(self.experience).max(self.level);
        self.claims.push(source.to_string());
        share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for_experience(0), 1);
        assert_eq!(level_for_experience(299), 1);
        assert_eq!(level_for_experience(300), 2);
        assert_eq!(level_for_experience(400_000), 20);
    }

    #[test]
    fn test_conditions_dedupe_and_expire() {
        let mut pc = CharacterRecord::new("Aria", "rogue", 3, 20);
        assert!(pc.add_condition("Poisoned", "dart trap", None));
        assert!(!pc.add_condition("  poisoned ", "dart trap", None));
        assert_eq!(pc.condition_names(), vec!["poisoned".to_string()]);

        let later = pc.calendar.advance(6);
        pc.add_condition("shaken", "ambush", Some(pc.calendar.advance(4)));
        assert_eq!(pc.expire_conditions(&later), vec!["shaken".to_string()]);
        assert!(pc.has_condition("POISONED"));
        assert!(pc.remove_condition("poisoned"));
        assert!(pc.conditions.is_empty());
    }

    #[test]
    fn test_purse_deduct_breaks_platinum() {
        let mut purse = Purse {
            platinum: 2,
            gold: 3,
            ..Purse::default()
        };
        assert_eq!(purse.deduct_gold(8), 8);
        assert_eq!((purse.platinum, purse.gold), (1, 5));
        assert_eq!(purse.deduct_gold(100), 15);
        assert_eq!(purse.gold_value(), 0);
    }

    #[test]
    fn test_wound_keeps_one_hp() {
        let mut hp = HitPoints { current: 8, maximum: 20 };
        assert_eq!(hp.wound(5), 5);
        assert_eq!(hp.wound(50), 2);
        assert_eq!(hp.current, 1);
        assert_eq!(hp.heal(100), 19);
    }

    #[test]
    fn test_inventory_stacks() {
        let mut pc = CharacterRecord::new("Aria", "rogue", 1, 10);
        pc.add_item("Torch", 2);
        pc.add_item("torch", 1);
        assert_eq!(pc.item_count("TORCH"), 3);
        assert_eq!(pc.inventory.len(), 1);
    }

    #[test]
    fn test_remember_npc_case_insensitive() {
        let mut pc = CharacterRecord::new("Aria", "rogue", 1, 10);
        pc.remember_npc("Mira");
        pc.remember_npc("mira");
        assert_eq!(pc.used_npc_names, vec!["Mira".to_string()]);
    }

    #[test]
    fn test_rewards_apply_once_per_source() {
        use crate::rewards::{compute_rewards, RewardContext};
        use crate::synergy::{resolve_outcome, ActivityType, RiskTier};
        use crate::testing::FixedRandom;

        let mut pc = CharacterRecord::new("Aria", "ranger", 2, 16);
        let mut rng = FixedRandom(0.0);
        let outcome = resolve_outcome(RiskTier::Low, &[pc.party_member()], ActivityType::Gathering, &mut rng);
        let ctx = RewardContext {
            level: pc.level,
            max_hp: pc.hit_points.maximum,
            carried_gold: 0,
            duration_hours: 8,
        };
        let rewards = compute_rewards(outcome, ctx, &mut rng);
        assert!(rewards.experience > 0);

        let xp = pc.experience;
        let first = pc.apply_rewards(&rewards, "session a");
        let again = pc.apply_rewards(&rewards, "session a");
        assert_eq!(first, again);
        assert_eq!(pc.experience, xp + rewards.experience);
        assert_eq!(pc.purse.gold, rewards.gold);

        pc.apply_rewards(&rewards, "session b");
        assert_eq!(pc.experience, xp + 2 * rewards.experience);

        let mut ally = Companion::new(pc.id, "Ilse", "cleric", 1);
        let start = ally.experience;
        let share = ally.grant_share(100, true, "session a");
        assert_eq!(ally.grant_share(100, true, "session a"), share);
        assert_eq!(ally.experience, start + share);
    }
}
