//! The session orchestrator.
//!
//! Each lifecycle call loads the session and its party, asks the state
//! machine whether the call is allowed, optionally calls the narrator, turns
//! the reply into events, applies them and writes everything back. Calls for
//! the same character are serialized by a per-character lock, so each call is
//! one read-modify-write.
//!
//! A failed narrator call returns before anything is written: the player's
//! turn is not consumed and the caller may simply retry.

use crate::calendar::CalendarDate;
use crate::character::{AppliedRewards, CharacterRecord, Companion};
use crate::clock::{game_hours_elapsed, Clock, RandomSource, SystemClock, ThreadRandom};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::ids::{CharacterId, CompanionId, SessionId};
use crate::markers::{self, normalize, MarkerEvent, MarkerKind};
use crate::narrator::prompt::{self, PromptContext};
use crate::narrator::{Narrator, Prompt};
use crate::persist::{RecordStore, Records};
use crate::rewards::{compute_rewards, LootItem, RewardContext, Rewards};
use crate::session::{
    Combatant, RecruitOffer, Session, SessionAction, SessionConfig, SessionStatus, SessionView,
    Speaker, Turn, UiHint,
};
use crate::synergy::{resolve_outcome, ActivityType, PartyMember, RiskTier};
use crate::threads::{
    generate_consequences, render_for_prompt, ConsequenceContext, NewThread, StoryThread,
    ThreadFilter, ThreadLedger, ThreadSource,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Result of [`Orchestrator::start`].
#[derive(Debug, Clone)]
pub struct Started {
    pub session: SessionView,
    pub narration: String,
    pub hints: Vec<UiHint>,
}

/// Result of [`Orchestrator::act`].
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session: SessionView,
    pub narration: String,
    pub events: Vec<MarkerEvent>,
    pub hints: Vec<UiHint>,
}

/// Result of [`Orchestrator::resume`].
#[derive(Debug, Clone)]
pub struct Resumed {
    pub session: SessionView,
    pub recap: String,
}

/// Result of [`Orchestrator::end`].
#[derive(Debug, Clone)]
pub struct Ended {
    pub session: SessionView,
    pub rewards: Rewards,
    pub threads: Vec<StoryThread>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionXp {
    pub companion_id: CompanionId,
    pub name: String,
    pub experience: u32,
    pub participated: bool,
}

/// Result of claiming a session or adventure.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub character: CharacterRecord,
    pub applied: AppliedRewards,
    pub companions: Vec<CompanionXp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Session,
    Adventure,
}

/// One finished session or adventure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub id: String,
    pub activity: ActivityType,
    pub risk: RiskTier,
    pub success: bool,
    pub experience: u32,
    pub gold: u32,
    pub claimed: bool,
    pub started_on: CalendarDate,
    pub ended_on: CalendarDate,
    pub finished_at: DateTime<Utc>,
}

/// The character, an optional second character and active companions.
pub(crate) struct Party {
    pub character: CharacterRecord,
    pub second: Option<CharacterRecord>,
    pub companions: Vec<Companion>,
}

enum Target {
    Character,
    Second,
    Companion(usize),
    Other(String),
}

fn name_matches(target: &str, name: &str) -> bool {
    let name = normalize(name);
    target == name || name.split(' ').next() == Some(target)
}

impl Party {
    pub fn members(&self) -> Vec<PartyMember> {
        let mut members = vec![self.character.party_member()];
        members.extend(self.second.iter().map(CharacterRecord::party_member));
        members.extend(self.companions.iter().map(Companion::party_member));
        members
    }

    fn resolve(&self, target: &str) -> Target {
        if matches!(target, "player" | "pc" | "you" | "hero") || name_matches(target, &self.character.name) {
            return Target::Character;
        }
        if self.second.as_ref().is_some_and(|s| name_matches(target, &s.name)) {
            return Target::Second;
        }
        match self.companions.iter().position(|c| name_matches(target, &c.name)) {
            Some(idx) => Target::Companion(idx),
            None => Target::Other(target.to_string()),
        }
    }

    fn display_name(&self, target: &Target) -> String {
        match target {
            Target::Character => self.character.name.clone(),
            Target::Second => self
                .second
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            Target::Companion(idx) => self.companions[*idx].name.clone(),
            Target::Other(name) => name.clone(),
        }
    }
}

/// Runs sessions and adventures against a record store and a narrator.
pub struct Orchestrator {
    pub(crate) records: Records,
    narrator: Arc<dyn Narrator>,
    pub(crate) clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn RandomSource>>,
    pub(crate) threads: ThreadLedger,
    pub(crate) config: OrchestratorConfig,
    locks: Mutex<HashMap<CharacterId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, narrator: Arc<dyn Narrator>) -> Self {
        let records = Records::new(store);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            threads: ThreadLedger::new(records.clone(), clock.clone()),
            records,
            narrator,
            clock,
            rng: Mutex::new(Box::new(ThreadRandom)),
            config: OrchestratorConfig::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.threads = ThreadLedger::new(self.records.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn threads(&self) -> &ThreadLedger {
        &self.threads
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `f` with exclusive access to the random source.
    pub(crate) fn roll<T>(&self, f: impl FnOnce(&mut dyn RandomSource) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **rng)
    }

    pub(crate) async fn lock_character(&self, id: CharacterId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only the map still references are idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Lock a primary and an optional second character, always in id order.
    async fn lock_party(&self, character_id: CharacterId, second: Option<CharacterId>) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<CharacterId> = std::iter::once(character_id).chain(second).collect();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_character(id).await);
        }
        guards
    }

    async fn lock_session(&self, id: SessionId) -> Result<(Vec<OwnedMutexGuard<()>>, Session)> {
        let session = self.load_session(id).await?;
        let guards = self
            .lock_party(session.character_id, session.config.second_character)
            .await;
        // Reload: another call may have finished while we waited.
        let session = self.load_session(id).await?;
        Ok((guards, session))
    }

    async fn load_session(&self, id: SessionId) -> Result<Session> {
        self.records
            .session(id)
            .await?
            .ok_or_else(|| Error::not_found("session", id))
    }

    pub(crate) async fn load_character(&self, id: CharacterId) -> Result<CharacterRecord> {
        self.records
            .character(id)
            .await?
            .ok_or_else(|| Error::not_found("character", id))
    }

    async fn load_party(&self, character_id: CharacterId, second: Option<CharacterId>) -> Result<Party> {
        let character = self.load_character(character_id).await?;
        let second = match second {
            Some(id) => Some(self.load_character(id).await?),
            None => None,
        };
        let companions = self
            .records
            .companions_of(character_id)
            .await?
            .into_iter()
            .filter(|c| c.active)
            .collect();
        Ok(Party {
            character,
            second,
            companions,
        })
    }

    async fn save_party(&self, party: &Party) -> Result<()> {
        self.records.save(&party.character).await?;
        if let Some(second) = &party.second {
            self.records.save(second).await?;
        }
        for companion in &party.companions {
            self.records.save(companion).await?;
        }
        Ok(())
    }

    async fn thread_lines(&self, character_id: CharacterId, as_of: CalendarDate) -> Result<String> {
        let threads = self
            .threads
            .list_active(character_id, &ThreadFilter::new().as_of(as_of))
            .await?;
        Ok(render_for_prompt(&threads, self.config.thread_cap))
    }

    async fn narrate(&self, prompt: &Prompt, session_id: SessionId) -> Result<String> {
        self.narrator.narrate(prompt).await.map_err(|e| {
            warn!(session_id = %session_id, error = %e, "narrator call failed");
            Error::Upstream(e)
        })
    }

    fn context<'a>(&self, party: &'a Party, session: &'a Session, threads: &'a str) -> PromptContext<'a> {
        PromptContext {
            character: &party.character,
            second: party.second.as_ref(),
            companions: &party.companions,
            session,
            threads,
            transcript_tail: self.config.transcript_tail,
        }
    }

    /// Convert real time since the last tick into game hours.
    fn tick(&self, session: &mut Session, party: &mut Party, now: DateTime<Utc>) -> Option<UiHint> {
        let (hours, carry) = game_hours_elapsed(session.time_ratio, now - session.last_tick_at, session.second_carry);
        session.second_carry = carry;
        session.last_tick_at = now;
        if hours > 0 {
            session.calendar = session.calendar.advance(hours);
            session.game_hours += hours;
            debug!(session_id = %session.id, hours, date = %session.calendar, "calendar advanced");
        }
        sync_calendars(session, party)
    }

    /// Start a session for `character_id`.
    pub async fn start(&self, character_id: CharacterId, config: SessionConfig) -> Result<Started> {
        if config.second_character == Some(character_id) {
            return Err(Error::validation("second character must differ from the primary character"));
        }

        let _guards = self.lock_party(character_id, config.second_character).await;
        let mut party = self.load_party(character_id, config.second_character).await?;

        if let Some(open) = self.records.open_session_for(character_id).await? {
            return Err(Error::Conflict(format!(
                "character {character_id} already has a {} session ({})",
                open.status, open.id
            )));
        }
        if let Some(second) = config.second_character {
            if let Some(open) = self.records.open_session_for(second).await? {
                return Err(Error::Conflict(format!(
                    "second character {second} already has a {} session ({})",
                    open.status, open.id
                )));
            }
        }

        let now = self.clock.now();
        let ratio = config
            .time_ratio
            .or(party.character.time_ratio)
            .unwrap_or(self.config.default_time_ratio);
        let mut config = config;
        for name in &party.character.used_npc_names {
            if !config.used_npc_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                config.used_npc_names.push(name.clone());
            }
        }
        let mut session = Session::new(character_id, config, ratio, party.character.calendar, now);

        let threads = self.thread_lines(character_id, session.calendar).await?;
        let opening = prompt::opening(&self.context(&party, &session, &threads));
        let reply = self.narrate(&opening, session.id).await?;

        session.status = session.status.apply(SessionAction::Start)?;
        let (narration, _, hints) = self.absorb(&mut session, &mut party, &reply, now);

        self.save_party(&party).await?;
        self.records.save(&session).await?;
        info!(session_id = %session.id, character_id = %character_id, activity = %session.config.activity, "session started");

        Ok(Started {
            session: session.view(),
            narration,
            hints,
        })
    }

    /// Submit a player action.
    pub async fn act(&self, session_id: SessionId, action: &str) -> Result<TurnResult> {
        let action = action.trim();
        if action.is_empty() {
            return Err(Error::validation("action must not be blank"));
        }

        let (_guard, mut session) = self.lock_session(session_id).await?;
        session.status.apply(SessionAction::Act)?;
        let mut party = self
            .load_party(session.character_id, session.config.second_character)
            .await?;

        let now = self.clock.now();
        let mut hints: Vec<UiHint> = self.tick(&mut session, &mut party, now).into_iter().collect();

        let threads = self.thread_lines(session.character_id, session.calendar).await?;
        let request = prompt::action(&self.context(&party, &session, &threads), action);
        let reply = self.narrate(&request, session_id).await?;

        session.push_turn(Speaker::Player, action, Vec::new(), now);
        let (narration, events, applied) = self.absorb(&mut session, &mut party, &reply, now);
        hints.extend(applied);

        self.save_party(&party).await?;
        self.records.save(&session).await?;
        debug!(session_id = %session_id, events = events.len(), "turn applied");

        Ok(TurnResult {
            session: session.view(),
            narration,
            events,
            hints,
        })
    }

    /// Parse a narrator reply, apply its events and append the narrator turn.
    fn absorb(
        &self,
        session: &mut Session,
        party: &mut Party,
        reply: &str,
        now: DateTime<Utc>,
    ) -> (String, Vec<MarkerEvent>, Vec<UiHint>) {
        let parsed = markers::parse(reply);
        if parsed.dropped > 0 {
            debug!(session_id = %session.id, dropped = parsed.dropped, "malformed directives skipped");
        }
        let hints = parsed
            .events
            .iter()
            .filter_map(|event| apply_event(session, party, event))
            .collect();
        let directives = parsed.events.iter().map(|e| e.raw.clone()).collect();
        session.push_turn(Speaker::Narrator, parsed.display_text.clone(), directives, now);
        (parsed.display_text, parsed.events, hints)
    }

    pub async fn pause(&self, session_id: SessionId) -> Result<SessionView> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let next = session.status.apply(SessionAction::Pause)?;
        let mut party = self
            .load_party(session.character_id, session.config.second_character)
            .await?;

        self.tick(&mut session, &mut party, self.clock.now());
        session.status = next;

        self.save_party(&party).await?;
        self.records.save(&session).await?;
        info!(session_id = %session_id, "session paused");
        Ok(session.view())
    }

    /// Resume a paused session with a short recap. If the recap cannot be
    /// narrated the session stays paused.
    pub async fn resume(&self, session_id: SessionId) -> Result<Resumed> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let next = session.status.apply(SessionAction::Resume)?;
        let party = self
            .load_party(session.character_id, session.config.second_character)
            .await?;

        let threads = self.thread_lines(session.character_id, session.calendar).await?;
        let request = prompt::recap(&self.context(&party, &session, &threads), self.config.recap_turns);
        let reply = self.narrate(&request, session_id).await?;

        // Recaps carry no mechanics.
        let recap = markers::parse(&reply).display_text;
        let now = self.clock.now();
        session.status = next;
        session.last_tick_at = now;
        session.push_turn(Speaker::Narrator, recap.clone(), Vec::new(), now);

        self.records.save(&session).await?;
        info!(session_id = %session_id, "session resumed");
        Ok(Resumed {
            session: session.view(),
            recap,
        })
    }

    /// Finish an active session: roll the outcome, compute rewards and
    /// create story threads. Rewards are applied later by [`Self::claim`].
    pub async fn end(&self, session_id: SessionId) -> Result<Ended> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let next = session.status.apply(SessionAction::End)?;
        let mut party = self
            .load_party(session.character_id, session.config.second_character)
            .await?;

        let now = self.clock.now();
        self.tick(&mut session, &mut party, now);

        let members = party.members();
        let reward_ctx = RewardContext {
            level: party.character.level,
            max_hp: party.character.hit_points.maximum,
            carried_gold: party.character.purse.gold_value(),
            duration_hours: session.game_hours.max(0) as u32,
        };
        let (mut rewards, new_threads) = {
            let config = &session.config;
            let npcs = &session.npcs_met;
            self.roll(|rng| {
                let outcome = resolve_outcome(config.risk, &members, config.activity, rng);
                let rewards = compute_rewards(outcome, reward_ctx, rng);
                let consequences = ConsequenceContext {
                    success: rewards.outcome.success,
                    quest_advancing: config.quest_advancing,
                    activity: config.activity,
                    location: config.location.as_deref(),
                    npcs,
                };
                let threads = generate_consequences(&consequences, rng);
                (rewards, threads)
            })
        };
        for loot in session.pending_loot.drain(..) {
            merge_loot(&mut rewards.loot, loot);
        }

        let threads = self
            .create_threads(party.character.id, ThreadSource::Session(session.id), session.calendar, new_threads)
            .await?;

        session.status = next;
        session.ended_at = Some(now);
        session.rewards = Some(rewards.clone());
        session.party_companions = party.companions.iter().map(|c| c.id).collect();
        session.threads = threads.iter().map(|t| t.id).collect();

        self.save_party(&party).await?;
        self.records.save(&session).await?;
        info!(
            session_id = %session_id,
            success = rewards.outcome.success,
            chance = rewards.outcome.odds.final_chance,
            threads = threads.len(),
            "session completed"
        );

        Ok(Ended {
            session: session.view(),
            rewards,
            threads,
        })
    }

    pub(crate) async fn create_threads(
        &self,
        character_id: CharacterId,
        source: ThreadSource,
        created_on: CalendarDate,
        new_threads: Vec<NewThread>,
    ) -> Result<Vec<StoryThread>> {
        // A retry after a failed save keeps the threads already written.
        let mut existing: Vec<StoryThread> = self
            .records
            .threads_of(character_id)
            .await?
            .into_iter()
            .filter(|t| t.source == source)
            .collect();
        if !existing.is_empty() {
            existing.sort_by_key(|t| t.created_at);
            debug!(?source, count = existing.len(), "reusing story threads");
            return Ok(existing);
        }

        let mut threads = Vec::with_capacity(new_threads.len());
        for data in new_threads {
            threads.push(self.threads.create(character_id, source, created_on, data).await?);
        }
        Ok(threads)
    }

    /// Abandon a session. No rewards, threads or history entry are produced.
    /// Effects already applied turn by turn (conditions, items) are kept.
    pub async fn abort(&self, session_id: SessionId) -> Result<SessionView> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        session.status = session.status.apply(SessionAction::Abort)?;
        session.ended_at = Some(self.clock.now());
        self.records.save(&session).await?;
        info!(session_id = %session_id, "session aborted");
        Ok(session.view())
    }

    /// Apply a completed session's rewards. A second claim is rejected and
    /// applies nothing.
    pub async fn claim(&self, session_id: SessionId) -> Result<Claimed> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let next = session.status.apply(SessionAction::Claim)?;
        let rewards = session
            .rewards
            .clone()
            .ok_or_else(|| Error::validation("session has no computed rewards"))?;

        let label = format!("session {session_id}");
        let claimed = self
            .grant(session.character_id, &rewards, &session.party_companions, &label)
            .await?;
        if let Some(second_id) = session.config.second_character {
            let mut second = self.load_character(second_id).await?;
            second.claim_experience(rewards.experience, &label);
            self.records.save(&second).await?;
        }

        session.status = next;
        self.records.save(&session).await?;
        info!(session_id = %session_id, experience = rewards.experience, gold = rewards.gold, "session rewards claimed");
        Ok(claimed)
    }

    /// Apply rewards to a character and its companions. Each record
    /// remembers `label`, so a retry after a failed save grants nothing twice.
    pub(crate) async fn grant(
        &self,
        character_id: CharacterId,
        rewards: &Rewards,
        participants: &[CompanionId],
        label: &str,
    ) -> Result<Claimed> {
        let mut character = self.load_character(character_id).await?;
        let applied = character.apply_rewards(rewards, label);

        let mut companions = Vec::new();
        for mut companion in self.records.companions_of(character_id).await? {
            let participated = participants.contains(&companion.id);
            let experience = companion.grant_share(rewards.experience, participated, label);
            self.records.save(&companion).await?;
            companions.push(CompanionXp {
                companion_id: companion.id,
                name: companion.name,
                experience,
                participated,
            });
        }

        self.records.save(&character).await?;
        Ok(Claimed {
            character,
            applied,
            companions,
        })
    }

    /// Turn a pending recruitment offer into a companion.
    pub async fn accept_recruit(&self, session_id: SessionId, name: &str) -> Result<Companion> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        session.status.apply(SessionAction::Recruit)?;

        let idx = session
            .recruit_offers
            .iter()
            .position(|o| o.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::not_found("recruitment offer", name.trim()))?;
        let offer = session.recruit_offers.remove(idx);

        let mut companion = Companion::new(
            session.character_id,
            &offer.name,
            offer.class.as_deref().unwrap_or("commoner"),
            offer.level.unwrap_or(1),
        );
        companion.recruited_in = Some(session.id);

        self.records.save(&companion).await?;
        self.records.save(&session).await?;
        info!(session_id = %session_id, companion = %companion.name, "companion recruited");
        Ok(companion)
    }

    pub async fn status(&self, session_id: SessionId) -> Result<SessionView> {
        Ok(self.load_session(session_id).await?.view())
    }

    pub async fn transcript(&self, session_id: SessionId) -> Result<Vec<Turn>> {
        Ok(self.load_session(session_id).await?.transcript)
    }

    /// Completed and claimed sessions and adventures, oldest first.
    pub async fn history(&self, character_id: CharacterId) -> Result<Vec<HistoryEntry>> {
        self.load_character(character_id).await?;

        let mut entries: Vec<HistoryEntry> = self
            .records
            .sessions_of(character_id)
            .await?
            .into_iter()
            .filter(|s| matches!(s.status, SessionStatus::Completed | SessionStatus::Claimed))
            .filter_map(|s| {
                let rewards = s.rewards.as_ref()?;
                Some(HistoryEntry {
                    kind: HistoryKind::Session,
                    id: s.id.to_string(),
                    activity: s.config.activity,
                    risk: s.config.risk,
                    success: rewards.outcome.success,
                    experience: rewards.experience,
                    gold: rewards.gold,
                    claimed: s.status == SessionStatus::Claimed,
                    started_on: s.started_on,
                    ended_on: s.calendar,
                    finished_at: s.ended_at.unwrap_or(s.last_tick_at),
                })
            })
            .collect();

        entries.extend(
            self.records
                .adventures_of(character_id)
                .await?
                .iter()
                .filter_map(|a| a.history_entry()),
        );
        entries.sort_by_key(|e| e.finished_at);
        Ok(entries)
    }

    /// Shift the in-world date of an open session and its characters.
    pub async fn adjust_date(&self, session_id: SessionId, delta_days: i64) -> Result<CalendarDate> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        session.status.apply(SessionAction::AdjustDate)?;
        let mut party = self
            .load_party(session.character_id, session.config.second_character)
            .await?;

        session.calendar = session.calendar.advance_days(delta_days);
        sync_calendars(&mut session, &mut party);

        self.save_party(&party).await?;
        self.records.save(&session).await?;
        info!(session_id = %session_id, delta_days, date = %session.calendar, "session date adjusted");
        Ok(session.calendar)
    }
}

/// Copy the session date onto its characters and expire timed conditions.
fn sync_calendars(session: &mut Session, party: &mut Party) -> Option<UiHint> {
    let mut expired = Vec::new();
    let characters = std::iter::once(&mut party.character).chain(party.second.as_mut());
    for character in characters {
        character.calendar = session.calendar;
        for condition in character.expire_conditions(&session.calendar) {
            session.clear_condition(&character.name, &condition);
            expired.push(condition);
        }
    }
    (!expired.is_empty()).then_some(UiHint::ConditionsExpired { conditions: expired })
}

fn merge_loot(loot: &mut Vec<LootItem>, item: LootItem) {
    match loot.iter_mut().find(|l| l.item == item.item) {
        Some(stack) => stack.quantity += item.quantity,
        None => loot.push(item),
    }
}

/// Apply one directive to session and party state.
fn apply_event(session: &mut Session, party: &mut Party, event: &MarkerEvent) -> Option<UiHint> {
    match event.kind {
        MarkerKind::CombatStart => {
            let combatants: Vec<Combatant> = event
                .participants()
                .into_iter()
                .map(|c| Combatant {
                    name: c.name,
                    initiative: c.initiative,
                })
                .collect();
            let names = combatants.iter().map(|c| c.name.clone()).collect();
            session.combat.active = true;
            session.combat.combatants = combatants;
            session.combat.encounters += 1;
            Some(UiHint::CombatStarted { combatants: names })
        }
        MarkerKind::CombatEnd => {
            if !session.combat.active {
                return None;
            }
            session.combat.active = false;
            session.combat.combatants.clear();
            Some(UiHint::CombatEnded)
        }
        MarkerKind::ConditionAdd => {
            let condition = event.get("condition")?;
            let target = party.resolve(event.get("target")?);
            let source = format!("session {}", session.id);
            let added = match &target {
                Target::Character => party.character.add_condition(condition, source, None),
                Target::Second => party
                    .second
                    .as_mut()
                    .is_some_and(|s| s.add_condition(condition, source, None)),
                Target::Companion(idx) => party.companions[*idx].add_condition(condition),
                Target::Other(_) => true,
            };
            let name = party.display_name(&target);
            let noted = session.note_condition(&name, condition);
            (added && noted).then(|| UiHint::ConditionAdded {
                target: name,
                condition: condition.to_string(),
            })
        }
        MarkerKind::ConditionRemove => {
            let condition = event.get("condition")?;
            let target = party.resolve(event.get("target")?);
            let removed = match &target {
                Target::Character => party.character.remove_condition(condition),
                Target::Second => party
                    .second
                    .as_mut()
                    .is_some_and(|s| s.remove_condition(condition)),
                Target::Companion(idx) => party.companions[*idx].remove_condition(condition),
                Target::Other(_) => false,
            };
            let name = party.display_name(&target);
            let cleared = session.clear_condition(&name, condition);
            (removed || cleared).then(|| UiHint::ConditionRemoved {
                target: name,
                condition: condition.to_string(),
            })
        }
        MarkerKind::LootDrop => {
            let item = LootItem::new(event.get("item")?, event.quantity());
            let hint = UiHint::LootFound {
                item: item.item.clone(),
                quantity: item.quantity,
            };
            session.add_pending_loot(item);
            Some(hint)
        }
        MarkerKind::ItemAdd => {
            let item = event.get("item")?;
            let quantity = event.quantity();
            party.character.add_item(item, quantity);
            Some(UiHint::ItemReceived {
                item: item.to_string(),
                quantity,
            })
        }
        MarkerKind::MerchantOpen => {
            let merchant = event.get("merchant")?.to_string();
            session.merchant.open = Some(merchant.clone());
            Some(UiHint::MerchantOpened { merchant })
        }
        MarkerKind::MerchantRefer => {
            let merchant = event.get("merchant")?.to_string();
            if !session.merchant.referrals.contains(&merchant) {
                session.merchant.referrals.push(merchant.clone());
            }
            Some(UiHint::MerchantReferred { merchant })
        }
        MarkerKind::NpcJoin => {
            let name = event.get("name")?.to_string();
            session.remember_npc(&name);
            party.character.remember_npc(&name);

            let known = party.companions.iter().any(|c| c.name.eq_ignore_ascii_case(&name))
                || session
                    .recruit_offers
                    .iter()
                    .any(|o| o.name.eq_ignore_ascii_case(&name));
            if known {
                return None;
            }
            session.recruit_offers.push(RecruitOffer {
                name: name.clone(),
                class: event.get("class").map(str::to_string),
                level: event
                    .get("level")
                    .and_then(|l| l.parse::<u8>().ok())
                    .map(|l| l.clamp(1, 20)),
                description: event.get("description").map(str::to_string),
            });
            Some(UiHint::RecruitmentOffered { name })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::parse;

    fn party() -> Party {
        let character = CharacterRecord::new("Aria Vale", "rogue", 3, 20);
        let companion = Companion::new(character.id, "Brann", "fighter", 3);
        Party {
            character,
            second: None,
            companions: vec![companion],
        }
    }

    fn session_for(party: &Party) -> Session {
        Session::new(
            party.character.id,
            SessionConfig::new(),
            crate::clock::TimeRatio::OneToOne,
            party.character.calendar,
            Utc::now(),
        )
    }

    fn apply_all(session: &mut Session, party: &mut Party, text: &str) -> Vec<UiHint> {
        parse(text)
            .events
            .iter()
            .filter_map(|e| apply_event(session, party, e))
            .collect()
    }

    #[test]
    fn test_condition_targets_resolve() {
        let mut party = party();
        let mut session = session_for(&party);
        let hints = apply_all(
            &mut session,
            &mut party,
            r#"[CONDITION_ADD: Target="Player" Condition="Poisoned"]
               [CONDITION_ADD: Target="aria" Condition="Prone"]
               [CONDITION_ADD: Target="Brann" Condition="Frightened"]
               [CONDITION_ADD: Target="Goblin Boss" Condition="Grappled"]"#,
        );

        assert_eq!(hints.len(), 4);
        assert!(party.character.has_condition("poisoned"));
        assert!(party.character.has_condition("prone"));
        assert_eq!(party.companions[0].conditions, vec!["frightened".to_string()]);
        assert_eq!(session.conditions["goblin boss"], vec!["grappled".to_string()]);
        assert_eq!(session.conditions["Aria Vale"].len(), 2);
    }

    #[test]
    fn test_repeated_condition_is_silent() {
        let mut party = party();
        let mut session = session_for(&party);
        let text = r#"[CONDITION_ADD: Target="Player" Condition="Poisoned"]"#;
        assert_eq!(apply_all(&mut session, &mut party, text).len(), 1);
        assert!(apply_all(&mut session, &mut party, text).is_empty());
        assert_eq!(party.character.conditions.len(), 1);
    }

    #[test]
    fn test_loot_is_pending_items_are_immediate() {
        let mut party = party();
        let mut session = session_for(&party);
        apply_all(
            &mut session,
            &mut party,
            r#"[LOOT_DROP: Item="Silver Dagger"] [ITEM_ADD: Quantity="2" Item="Rope"]"#,
        );
        assert_eq!(session.pending_loot, vec![LootItem::new("silver dagger", 1)]);
        assert_eq!(party.character.item_count("rope"), 2);
        assert_eq!(party.character.item_count("silver dagger"), 0);
    }

    #[test]
    fn test_combat_and_merchant_state() {
        let mut party = party();
        let mut session = session_for(&party);
        let hints = apply_all(
            &mut session,
            &mut party,
            r#"[COMBAT_START: Participants="Aria Vale:12, Goblin:17"]"#,
        );
        assert_eq!(
            hints,
            vec![UiHint::CombatStarted {
                combatants: vec!["Goblin".into(), "Aria Vale".into()]
            }]
        );
        assert!(session.combat.active);

        apply_all(
            &mut session,
            &mut party,
            r#"[COMBAT_END] [MERCHANT_OPEN: Merchant="Barthen's Provisions"] [MERCHANT_REFER: Merchant="Lionshield Coster"]"#,
        );
        assert!(!session.combat.active);
        assert_eq!(session.merchant.open.as_deref(), Some("barthen's provisions"));
        assert_eq!(session.merchant.referrals, vec!["lionshield coster".to_string()]);
    }

    #[test]
    fn test_npc_join_offers_once() {
        let mut party = party();
        let mut session = session_for(&party);
        let text = r#"[NPC_JOIN: Name="Mira Thorne" Class="Cleric" Level="3"]"#;
        let hints = apply_all(&mut session, &mut party, text);
        assert_eq!(hints, vec![UiHint::RecruitmentOffered { name: "Mira Thorne".into() }]);
        assert!(apply_all(&mut session, &mut party, text).is_empty());

        assert_eq!(session.recruit_offers.len(), 1);
        assert_eq!(session.recruit_offers[0].class.as_deref(), Some("cleric"));
        assert_eq!(session.recruit_offers[0].level, Some(3));
        assert_eq!(party.character.used_npc_names, vec!["Mira Thorne".to_string()]);
        assert!(session.config.used_npc_names.contains(&"Mira Thorne".to_string()));
    }

    #[test]
    fn test_party_members_include_companions() {
        let party = party();
        let classes: Vec<_> = party.members().into_iter().map(|m| m.class).collect();
        assert_eq!(classes, vec!["rogue", "fighter"]);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let orch = Orchestrator::new(Arc::new(crate::MemoryStore::new()), Arc::new(crate::MockNarrator::default()));
        let (a, b) = (CharacterId::new(), CharacterId::new());

        let held = orch.lock_party(b, Some(a)).await;
        assert_eq!(held.len(), 2);
        drop(held);

        let _guard = orch.lock_character(a).await;
        let locks = orch.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&a));
    }
}
