//! Session records and the lifecycle state machine.
//!
//! ```text
//! setup -> active <-> paused
//!            |
//!            v
//!        completed -> claimed
//!
//! setup | active | paused -> aborted
//! ```
//!
//! Every lifecycle operation asks [`SessionStatus::apply`] for the next
//! state before touching anything else.

use crate::calendar::CalendarDate;
use crate::clock::TimeRatio;
use crate::error::{Error, Result};
use crate::ids::{CharacterId, CompanionId, SessionId, ThreadId};
use crate::rewards::{LootItem, Rewards};
use crate::synergy::{ActivityType, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Setup,
    Active,
    Paused,
    Completed,
    Claimed,
    Aborted,
}

/// Operations that may move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    Start,
    Act,
    Pause,
    Resume,
    End,
    Abort,
    Claim,
    AdjustDate,
    Recruit,
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            SessionAction::Start => "start",
            SessionAction::Act => "act in",
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::End => "end",
            SessionAction::Abort => "abort",
            SessionAction::Claim => "claim",
            SessionAction::AdjustDate => "adjust the date of",
            SessionAction::Recruit => "recruit in",
        }
    }
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Setup => "setup",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Claimed => "claimed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// Setup, active and paused sessions block a new start.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SessionStatus::Setup | SessionStatus::Active | SessionStatus::Paused
        )
    }

    /// The state `action` leads to from here.
    pub fn apply(self, action: SessionAction) -> Result<SessionStatus> {
        use SessionAction as A;
        use SessionStatus as S;

        match (self, action) {
            (S::Setup, A::Start) => Ok(S::Active),
            (S::Active, A::Act | A::Recruit) => Ok(S::Active),
            (S::Active, A::Pause) => Ok(S::Paused),
            (S::Paused, A::Resume) => Ok(S::Active),
            (S::Active, A::End) => Ok(S::Completed),
            (S::Setup | S::Active | S::Paused, A::Abort) => Ok(S::Aborted),
            (S::Setup | S::Active | S::Paused, A::AdjustDate) => Ok(self),
            (S::Completed, A::Claim) => Ok(S::Claimed),
            (S::Claimed, A::Claim) => Err(Error::validation("rewards for this session were already claimed")),
            (status, action) => Err(Error::InvalidTransition {
                action: action.name().to_string(),
                status: status.name().to_string(),
            }),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Player,
    Narrator,
}

/// One entry in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    /// Player input, or narration with directives stripped.
    pub text: String,
    /// Directives extracted from this turn, verbatim.
    #[serde(default)]
    pub directives: Vec<String>,
    pub game_time: CalendarDate,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub name: String,
    pub initiative: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatTracker {
    pub active: bool,
    /// Initiative order, highest first.
    pub combatants: Vec<Combatant>,
    pub encounters: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantState {
    pub open: Option<String>,
    pub referrals: Vec<String>,
}

/// An NPC who offered to join the party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruitOffer {
    pub name: String,
    pub class: Option<String>,
    pub level: Option<u8>,
    pub description: Option<String>,
}

/// Side-channel signals for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiHint {
    CombatStarted { combatants: Vec<String> },
    CombatEnded,
    ConditionAdded { target: String, condition: String },
    ConditionRemoved { target: String, condition: String },
    LootFound { item: String, quantity: u32 },
    ItemReceived { item: String, quantity: u32 },
    MerchantOpened { merchant: String },
    MerchantReferred { merchant: String },
    RecruitmentOffered { name: String },
    ConditionsExpired { conditions: Vec<String> },
}

/// Caller-chosen parameters for a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub activity: ActivityType,
    pub risk: RiskTier,
    pub quest_advancing: bool,
    pub location: Option<String>,
    pub second_character: Option<CharacterId>,
    /// Overrides the character's own preference.
    pub time_ratio: Option<TimeRatio>,
    /// Names the narrator should not reuse for new NPCs.
    #[serde(default)]
    pub used_npc_names: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            activity: ActivityType::default(),
            risk: RiskTier::default(),
            quest_advancing: false,
            location: None,
            second_character: None,
            time_ratio: None,
            used_npc_names: Vec::new(),
        }
    }

    pub fn with_activity(mut self, activity: ActivityType) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_risk(mut self, risk: RiskTier) -> Self {
        self.risk = risk;
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

    pub fn with_second_character(mut self, id: CharacterId) -> Self {
        self.second_character = Some(id);
        self
    }

    pub fn with_time_ratio(mut self, ratio: TimeRatio) -> Self {
        self.time_ratio = Some(ratio);
        self
    }

    pub fn with_used_npc_names(mut self, names: Vec<String>) -> Self {
        self.used_npc_names = names;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub character_id: CharacterId,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub time_ratio: TimeRatio,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    pub started_on: CalendarDate,
    pub calendar: CalendarDate,
    /// Game hours ticked while active.
    #[serde(default)]
    pub game_hours: i64,
    /// Sub-hour game seconds not yet applied to the calendar.
    #[serde(default)]
    pub second_carry: i64,
    /// Conditions per participant display name.
    #[serde(default)]
    pub conditions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub combat: CombatTracker,
    #[serde(default)]
    pub merchant: MerchantState,
    #[serde(default)]
    pub recruit_offers: Vec<RecruitOffer>,
    /// Loot dropped during play, granted on claim.
    #[serde(default)]
    pub pending_loot: Vec<LootItem>,
    #[serde(default)]
    pub npcs_met: Vec<String>,
    pub rewards: Option<Rewards>,
    /// Companions who took part, fixed when the session ends.
    #[serde(default)]
    pub party_companions: Vec<CompanionId>,
    #[serde(default)]
    pub threads: Vec<ThreadId>,
    pub started_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        character_id: CharacterId,
        config: SessionConfig,
        time_ratio: TimeRatio,
        calendar: CalendarDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            character_id,
            status: SessionStatus::Setup,
            config,
            time_ratio,
            transcript: Vec::new(),
            started_on: calendar,
            calendar,
            game_hours: 0,
            second_carry: 0,
            conditions: BTreeMap::new(),
            combat: CombatTracker::default(),
            merchant: MerchantState::default(),
            recruit_offers: Vec::new(),
            pending_loot: Vec::new(),
            npcs_met: Vec::new(),
            rewards: None,
            party_companions: Vec::new(),
            threads: Vec::new(),
            started_at: now,
            last_tick_at: now,
            ended_at: None,
        }
    }

    pub fn push_turn(&mut self, speaker: Speaker, text: impl Into<String>, directives: Vec<String>, at: DateTime<Utc>) {
        self.transcript.push(Turn {
            speaker,
            text: text.into(),
            directives,
            game_time: self.calendar,
            at,
        });
    }

    /// The last `n` turns, oldest first.
    pub fn tail(&self, n: usize) -> &[Turn] {
        let start = self.transcript.len().saturating_sub(n);
        &self.transcript[start..]
    }

    /// Record a condition against a participant. Returns whether it was new.
    pub fn note_condition(&mut self, target: &str, condition: &str) -> bool {
        let list = self.conditions.entry(target.to_string()).or_default();
        if list.iter().any(|c| c == condition) {
            return false;
        }
        list.push(condition.to_string());
        true
    }

    pub fn clear_condition(&mut self, target: &str, condition: &str) -> bool {
        let Some(list) = self.conditions.get_mut(target) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| c != condition);
        let removed = before != list.len();
        if list.is_empty() {
            self.conditions.remove(target);
        }
        removed
    }

    pub fn add_pending_loot(&mut self, item: LootItem) {
        match self.pending_loot.iter_mut().find(|l| l.item == item.item) {
            Some(stack) => stack.quantity += item.quantity,
            None => self.pending_loot.push(item),
        }
    }

    pub fn remember_npc(&mut self, name: &str) {
        if !self.npcs_met.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            self.npcs_met.push(name.to_string());
        }
        if !self
            .config
            .used_npc_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
        {
            self.config.used_npc_names.push(name.to_string());
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            character_id: self.character_id,
            status: self.status,
            activity: self.config.activity,
            risk: self.config.risk,
            calendar: self.calendar,
            game_hours: self.game_hours,
            turns: self.transcript.len(),
            conditions: self.conditions.clone(),
            combat: self.combat.clone(),
            merchant: self.merchant.clone(),
            recruit_offers: self.recruit_offers.clone(),
            pending_loot: self.pending_loot.clone(),
            rewards: self.rewards.clone(),
            threads: self.threads.clone(),
        }
    }
}

/// Read-only snapshot returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub character_id: CharacterId,
    pub status: SessionStatus,
    pub activity: ActivityType,
    pub risk: RiskTier,
    pub calendar: CalendarDate,
    pub game_hours: i64,
    pub turns: usize,
    pub conditions: BTreeMap<String, Vec<String>>,
    pub combat: CombatTracker,
    pub merchant: MerchantState,
    pub recruit_offers: Vec<RecruitOffer>,
    pub pending_loot: Vec<LootItem>,
    pub rewards: Option<Rewards>,
    pub threads: Vec<ThreadId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let status = SessionStatus::Setup.apply(SessionAction::Start).unwrap();
        assert_eq!(status, SessionStatus::Active);
        let status = status.apply(SessionAction::Pause).unwrap();
        let status = status.apply(SessionAction::Resume).unwrap();
        let status = status.apply(SessionAction::End).unwrap();
        assert_eq!(status, SessionStatus::Completed);
        assert_eq!(status.apply(SessionAction::Claim).unwrap(), SessionStatus::Claimed);
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(matches!(
            SessionStatus::Paused.apply(SessionAction::Act),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            SessionStatus::Paused.apply(SessionAction::End),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            SessionStatus::Completed.apply(SessionAction::Abort),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            SessionStatus::Claimed.apply(SessionAction::Claim),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            SessionStatus::Aborted.apply(SessionAction::Resume),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_abort_from_every_open_state() {
        for status in [SessionStatus::Setup, SessionStatus::Active, SessionStatus::Paused] {
            assert!(status.is_open());
            assert_eq!(status.apply(SessionAction::Abort).unwrap(), SessionStatus::Aborted);
        }
        assert!(!SessionStatus::Completed.is_open());
    }

    #[test]
    fn test_transition_error_message() {
        let err = SessionStatus::Paused.apply(SessionAction::Act).unwrap_err();
        assert_eq!(err.to_string(), "Cannot act in a session that is paused");
    }

    #[test]
    fn test_session_condition_bookkeeping() {
        let now = Utc::now();
        let mut session = Session::new(
            CharacterId::new(),
            SessionConfig::new(),
            TimeRatio::OneToOne,
            CalendarDate::default(),
            now,
        );
        assert!(session.note_condition("Aria", "poisoned"));
        assert!(!session.note_condition("Aria", "poisoned"));
        assert!(session.clear_condition("Aria", "poisoned"));
        assert!(session.conditions.is_empty());

        session.add_pending_loot(LootItem::new("Gold Ring", 1));
        session.add_pending_loot(LootItem::new("gold ring", 2));
        assert_eq!(session.pending_loot, vec![LootItem::new("gold ring", 3)]);
    }

    #[test]
    fn test_tail_is_bounded() {
        let now = Utc::now();
        let mut session = Session::new(
            CharacterId::new(),
            SessionConfig::new(),
            TimeRatio::OneToOne,
            CalendarDate::default(),
            now,
        );
        for i in 0..5 {
            session.push_turn(Speaker::Player, format!("turn {i}"), Vec::new(), now);
        }
        let tail: Vec<_> = session.tail(2).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(tail, vec!["turn 3", "turn 4"]);
        assert_eq!(session.tail(50).len(), 5);
    }
}
