//! Timed background adventures.
//!
//! An adventure runs for a fixed number of game hours without narration.
//! Nothing advances it in the background: callers poll, and the poll that
//! finds enough real time has passed resolves it.

use crate::calendar::CalendarDate;
use crate::clock::TimeRatio;
use crate::error::{Error, Result};
use crate::ids::{AdventureId, CharacterId, CompanionId, ThreadId};
use crate::orchestrator::{Claimed, HistoryEntry, HistoryKind, Orchestrator};
use crate::rewards::{compute_rewards, RewardContext, Rewards};
use crate::synergy::{resolve_outcome, ActivityType, RiskTier};
use crate::threads::{generate_consequences, ConsequenceContext, StoryThread, ThreadSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdventureStatus {
    InProgress,
    Completed,
    Claimed,
}

impl AdventureStatus {
    pub fn name(&self) -> &'static str {
        match self {
            AdventureStatus::InProgress => "in progress",
            AdventureStatus::Completed => "completed",
            AdventureStatus::Claimed => "claimed",
        }
    }
}

impl fmt::Display for AdventureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the character sets out to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdventurePlan {
    pub activity: ActivityType,
    pub risk: RiskTier,
    pub duration_hours: u32,
    #[serde(default)]
    pub companions: Vec<CompanionId>,
    #[serde(default)]
    pub quest_advancing: bool,
    pub location: Option<String>,
}

impl AdventurePlan {
    pub fn new(activity: ActivityType, risk: RiskTier, duration_hours: u32) -> Self {
        Self {
            activity,
            risk,
            duration_hours,
            companions: Vec::new(),
            quest_advancing: false,
            location: None,
        }
    }

    pub fn with_companion(mut self, companion: CompanionId) -> Self {
        if !self.companions.contains(&companion) {
            self.companions.push(companion);
        }
        self
    }

    pub fn quest_advancing(mut self, quest_advancing: bool) -> Self {
        self.quest_advancing = quest_advancing;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adventure {
    pub id: AdventureId,
    pub character_id: CharacterId,
    pub plan: AdventurePlan,
    pub status: AdventureStatus,
    pub time_ratio: TimeRatio,
    pub started_at: DateTime<Utc>,
    pub started_on: CalendarDate,
    /// Real time at which the adventure may be resolved.
    pub due_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ended_on: Option<CalendarDate>,
    pub rewards: Option<Rewards>,
    #[serde(default)]
    pub threads: Vec<ThreadId>,
}

impl Adventure {
    /// Real time left before the adventure can resolve.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.due_at - now).max(Duration::zero())
    }

    pub fn history_entry(&self) -> Option<HistoryEntry> {
        if self.status == AdventureStatus::InProgress {
            return None;
        }
        let rewards = self.rewards.as_ref()?;
        Some(HistoryEntry {
            kind: HistoryKind::Adventure,
            id: self.id.to_string(),
            activity: self.plan.activity,
            risk: self.plan.risk,
            success: rewards.outcome.success,
            experience: rewards.experience,
            gold: rewards.gold,
            claimed: self.status == AdventureStatus::Claimed,
            started_on: self.started_on,
            ended_on: self.ended_on.unwrap_or(self.started_on),
            finished_at: self.completed_at.unwrap_or(self.due_at),
        })
    }
}

/// Result of [`Orchestrator::poll_adventure`].
#[derive(Debug, Clone)]
pub struct AdventurePoll {
    pub adventure: Adventure,
    pub remaining: Duration,
    /// Threads created by this poll. Empty unless this poll completed it.
    pub threads: Vec<StoryThread>,
}

impl Orchestrator {
    pub async fn start_adventure(&self, character_id: CharacterId, plan: AdventurePlan) -> Result<Adventure> {
        if plan.duration_hours == 0 {
            return Err(Error::validation("adventure duration must be at least one hour"));
        }

        let _guard = self.lock_character(character_id).await;
        let character = self.load_character(character_id).await?;

        for id in &plan.companions {
            let companion = self
                .records
                .companion(*id)
                .await?
                .ok_or_else(|| Error::not_found("companion", id))?;
            if companion.owner != character_id {
                return Err(Error::validation(format!(
                    "{} does not travel with {}",
                    companion.name, character.name
                )));
            }
            if !companion.active {
                return Err(Error::validation(format!("{} is not active", companion.name)));
            }
        }

        if let Some(open) = self.records.open_adventure_for(character_id).await? {
            return Err(Error::Conflict(format!(
                "character {character_id} is already on adventure {}",
                open.id
            )));
        }

        let now = self.clock.now();
        let time_ratio = character.time_ratio.unwrap_or(self.config.default_time_ratio);
        let adventure = Adventure {
            id: AdventureId::new(),
            character_id,
            due_at: now + time_ratio.real_duration_for(i64::from(plan.duration_hours)),
            plan,
            status: AdventureStatus::InProgress,
            time_ratio,
            started_at: now,
            started_on: character.calendar,
            completed_at: None,
            ended_on: None,
            rewards: None,
            threads: Vec::new(),
        };
        self.records.save(&adventure).await?;
        info!(
            adventure_id = %adventure.id,
            character_id = %character_id,
            activity = %adventure.plan.activity,
            hours = adventure.plan.duration_hours,
            "adventure started"
        );
        Ok(adventure)
    }

    /// Check an adventure and resolve it if its time is up.
    pub async fn poll_adventure(&self, id: AdventureId) -> Result<AdventurePoll> {
        let owner = self.load_adventure(id).await?.character_id;
        let _guard = self.lock_character(owner).await;
        let mut adventure = self.load_adventure(id).await?;

        let now = self.clock.now();
        let remaining = adventure.remaining(now);
        if adventure.status != AdventureStatus::InProgress || remaining > Duration::zero() {
            debug!(adventure_id = %id, status = %adventure.status, remaining_secs = remaining.num_seconds(), "adventure polled");
            return Ok(AdventurePoll {
                adventure,
                remaining,
                threads: Vec::new(),
            });
        }

        let mut character = self.load_character(owner).await?;
        let mut members = vec![character.party_member()];
        for companion_id in &adventure.plan.companions {
            if let Some(companion) = self.records.companion(*companion_id).await? {
                members.push(companion.party_member());
            }
        }

        let reward_ctx = RewardContext {
            level: character.level,
            max_hp: character.hit_points.maximum,
            carried_gold: character.purse.gold_value(),
            duration_hours: adventure.plan.duration_hours,
        };
        let plan = &adventure.plan;
        let (rewards, new_threads) = self.roll(|rng| {
            let outcome = resolve_outcome(plan.risk, &members, plan.activity, rng);
            let rewards = compute_rewards(outcome, reward_ctx, rng);
            let consequences = ConsequenceContext {
                success: rewards.outcome.success,
                quest_advancing: plan.quest_advancing,
                activity: plan.activity,
                location: plan.location.as_deref(),
                npcs: &[],
            };
            let threads = generate_consequences(&consequences, rng);
            (rewards, threads)
        });

        let ended_on = adventure
            .started_on
            .advance(i64::from(adventure.plan.duration_hours));
        if ended_on.hour_number() > character.calendar.hour_number() {
            character.calendar = ended_on;
        }
        let today = character.calendar;
        let expired = character.expire_conditions(&today);
        if !expired.is_empty() {
            debug!(character_id = %owner, conditions = ?expired, "conditions expired");
        }

        let threads = self
            .create_threads(owner, ThreadSource::Adventure(id), ended_on, new_threads)
            .await?;

        adventure.status = AdventureStatus::Completed;
        adventure.completed_at = Some(now);
        adventure.ended_on = Some(ended_on);
        adventure.threads = threads.iter().map(|t| t.id).collect();
        adventure.rewards = Some(rewards);

        self.records.save(&character).await?;
        self.records.save(&adventure).await?;
        info!(
            adventure_id = %id,
            success = adventure.rewards.as_ref().is_some_and(|r| r.outcome.success),
            threads = threads.len(),
            "adventure completed"
        );

        Ok(AdventurePoll {
            adventure,
            remaining: Duration::zero(),
            threads,
        })
    }

    pub async fn claim_adventure(&self, id: AdventureId) -> Result<Claimed> {
        let owner = self.load_adventure(id).await?.character_id;
        let _guard = self.lock_character(owner).await;
        let mut adventure = self.load_adventure(id).await?;

        match adventure.status {
            AdventureStatus::InProgress => {
                return Err(Error::validation("adventure is still in progress"));
            }
            AdventureStatus::Claimed => {
                return Err(Error::validation("adventure rewards have already been claimed"));
            }
            AdventureStatus::Completed => {}
        }
        let rewards = adventure
            .rewards
            .clone()
            .ok_or_else(|| Error::validation("adventure has no computed rewards"))?;

        let claimed = self
            .grant(owner, &rewards, &adventure.plan.companions, &format!("adventure {id}"))
            .await?;

        adventure.status = AdventureStatus::Claimed;
        self.records.save(&adventure).await?;
        info!(adventure_id = %id, experience = rewards.experience, gold = rewards.gold, "adventure rewards claimed");
        Ok(claimed)
    }

    async fn load_adventure(&self, id: AdventureId) -> Result<Adventure> {
        self.records
            .adventure(id)
            .await?
            .ok_or_else(|| Error::not_found("adventure", id))
    }
}
