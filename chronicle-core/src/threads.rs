//! Story threads: narrative consequences carried between sessions.
//!
//! When a session or adventure completes, a handful of probability gates
//! decide which consequences it leaves behind (a new enemy, a useful
//! rumour, a shift in reputation...). Active threads are rendered into
//! later narrator prompts so the world remembers.

use crate::calendar::CalendarDate;
use crate::clock::{Clock, RandomSource};
use crate::error::{Error, Result};
use crate::ids::{AdventureId, CharacterId, SessionId, ThreadId};
use crate::persist::Records;
use crate::synergy::ActivityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Days before resource and opportunity threads lapse.
pub const OPPORTUNITY_LIFETIME_DAYS: i64 = 30;

/// Quest-advancing activities scale every gate by this much.
const QUEST_ODDS_MULTIPLIER: f64 = 1.5;
const MAX_GATE_ODDS: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    NewEnemy,
    NewAlly,
    Intel,
    Reputation,
    Resource,
    Mystery,
    Opportunity,
    Threat,
    Relationship,
}

impl ThreadType {
    pub fn name(&self) -> &'static str {
        match self {
            ThreadType::NewEnemy => "new enemy",
            ThreadType::NewAlly => "new ally",
            ThreadType::Intel => "intel",
            ThreadType::Reputation => "reputation",
            ThreadType::Resource => "resource",
            ThreadType::Mystery => "mystery",
            ThreadType::Opportunity => "opportunity",
            ThreadType::Threat => "threat",
            ThreadType::Relationship => "relationship",
        }
    }

    /// In-world days until the thread lapses, for time-limited kinds.
    pub fn lifetime_days(&self) -> Option<i64> {
        match self {
            ThreadType::Resource | ThreadType::Opportunity => Some(OPPORTUNITY_LIFETIME_DAYS),
            _ => None,
        }
    }
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestRelevance {
    Low,
    #[default]
    Medium,
    High,
}

impl QuestRelevance {
    pub fn name(&self) -> &'static str {
        match self {
            QuestRelevance::Low => "low",
            QuestRelevance::Medium => "medium",
            QuestRelevance::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Resolved,
}

/// What produced a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ThreadSource {
    Session(SessionId),
    Adventure(AdventureId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryThread {
    pub id: ThreadId,
    pub character_id: CharacterId,
    pub source: ThreadSource,
    pub thread_type: ThreadType,
    pub title: String,
    pub description: String,
    pub relevance: QuestRelevance,
    #[serde(default)]
    pub related_npcs: Vec<String>,
    #[serde(default)]
    pub related_locations: Vec<String>,
    #[serde(default)]
    pub outcome_hints: Vec<String>,
    pub status: ThreadStatus,
    pub resolution: Option<String>,
    /// In-world date the thread was created on.
    pub created_on: CalendarDate,
    pub created_at: DateTime<Utc>,
    pub expires_on: Option<CalendarDate>,
}

impl StoryThread {
    pub fn is_expired(&self, as_of: &CalendarDate) -> bool {
        self.expires_on
            .map(|at| at.hour_number() <= as_of.hour_number())
            .unwrap_or(false)
    }

    fn render_line(&self) -> String {
        let mut line = format!(
            "- [{} | {}] {}: {}",
            self.thread_type,
            self.relevance.name(),
            self.title,
            self.description
        );
        let mut related = Vec::new();
        if !self.related_npcs.is_empty() {
            related.push(format!("NPCs: {}", self.related_npcs.join(", ")));
        }
        if !self.related_locations.is_empty() {
            related.push(format!("Locations: {}", self.related_locations.join(", ")));
        }
        if !related.is_empty() {
            line.push_str(&format!(" ({})", related.join("; ")));
        }
        line
    }
}

/// Fields for a thread about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewThread {
    pub thread_type: ThreadType,
    pub title: String,
    pub description: String,
    pub relevance: QuestRelevance,
    pub related_npcs: Vec<String>,
    pub related_locations: Vec<String>,
    pub outcome_hints: Vec<String>,
    /// Overrides the type's default lifetime.
    pub expires_on: Option<CalendarDate>,
}

impl NewThread {
    pub fn new(thread_type: ThreadType, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            thread_type,
            title: title.into(),
            description: description.into(),
            relevance: QuestRelevance::default(),
            related_npcs: Vec::new(),
            related_locations: Vec::new(),
            outcome_hints: Vec::new(),
            expires_on: None,
        }
    }

    pub fn with_relevance(mut self, relevance: QuestRelevance) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.related_npcs.push(npc.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.related_locations.push(location.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.outcome_hints.push(hint.into());
        self
    }

    pub fn with_expiry(mut self, expires_on: CalendarDate) -> Self {
        self.expires_on = Some(expires_on);
        self
    }
}

/// Narrows [`ThreadLedger::list_active`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadFilter {
    /// Empty means every type.
    pub types: Vec<ThreadType>,
    pub min_relevance: Option<QuestRelevance>,
    /// Exclude threads that have expired by this date.
    pub as_of: Option<CalendarDate>,
}

impl ThreadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, thread_type: ThreadType) -> Self {
        self.types.push(thread_type);
        self
    }

    pub fn with_min_relevance(mut self, relevance: QuestRelevance) -> Self {
        self.min_relevance = Some(relevance);
        self
    }

    pub fn as_of(mut self, date: CalendarDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn matches(&self, thread: &StoryThread) -> bool {
        thread.status == ThreadStatus::Active
            && (self.types.is_empty() || self.types.contains(&thread.thread_type))
            && self.min_relevance.map_or(true, |min| thread.relevance >= min)
            && self.as_of.map_or(true, |date| !thread.is_expired(&date))
    }
}

/// Highest relevance first, newest first within a tier.
pub fn sort_by_priority(threads: &mut [StoryThread]) {
    threads.sort_by_key(|t| {
        (
            Reverse(t.relevance),
            Reverse(t.created_at),
            Reverse(t.created_on.hour_number()),
            t.title.clone(),
        )
    });
}

/// Render at most `cap` threads as prompt lines, most important first.
pub fn render_for_prompt(threads: &[StoryThread], cap: usize) -> String {
    let mut ordered: Vec<StoryThread> = threads
        .iter()
        .filter(|t| t.status == ThreadStatus::Active)
        .cloned()
        .collect();
    sort_by_priority(&mut ordered);
    ordered
        .iter()
        .take(cap)
        .map(StoryThread::render_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a finished activity looked like, for consequence generation.
#[derive(Debug, Clone, Copy)]
pub struct ConsequenceContext<'a> {
    pub success: bool,
    pub quest_advancing: bool,
    pub activity: ActivityType,
    pub location: Option<&'a str>,
    /// NPCs met along the way, most recent last.
    pub npcs: &'a [String],
}

/// `(success odds, failure odds)` per generated category.
const GATES: [(ThreadType, f64, f64); 5] = [
    (ThreadType::NewEnemy, 0.10, 0.35),
    (ThreadType::NewAlly, 0.25, 0.05),
    (ThreadType::Intel, 0.30, 0.15),
    (ThreadType::Reputation, 0.20, 0.20),
    (ThreadType::Resource, 0.15, 0.05),
];

/// Roll each consequence gate and describe the threads that result.
pub fn generate_consequences(ctx: &ConsequenceContext<'_>, rng: &mut dyn RandomSource) -> Vec<NewThread> {
    let mut rolled: Vec<ThreadType> = GATES
        .iter()
        .filter_map(|&(thread_type, on_success, on_failure)| {
            let mut odds = if ctx.success { on_success } else { on_failure };
            if ctx.quest_advancing {
                odds = (odds * QUEST_ODDS_MULTIPLIER).min(MAX_GATE_ODDS);
            }
            rng.chance(odds).then_some(thread_type)
        })
        .collect();

    if rolled.is_empty() && ctx.quest_advancing {
        rolled.push(if ctx.success {
            ThreadType::Intel
        } else {
            ThreadType::NewEnemy
        });
    }

    rolled.into_iter().map(|t| describe(t, ctx)).collect()
}

fn describe(thread_type: ThreadType, ctx: &ConsequenceContext<'_>) -> NewThread {
    let place = ctx.location.unwrap_or("the area");
    let activity = ctx.activity.name();
    let npc = ctx.npcs.last().map(String::as_str);

    let mut thread = match (thread_type, ctx.success) {
        (ThreadType::NewEnemy, true) => NewThread::new(
            thread_type,
            format!("A grudge in {place}"),
            format!("Someone who lost out when your {activity} succeeded is asking questions about you."),
        )
        .with_hint("An ambush on the road")
        .with_hint("A bounty quietly posted"),
        (ThreadType::NewEnemy, false) => NewThread::new(
            thread_type,
            format!("Smelling weakness in {place}"),
            format!("Word of your failed {activity} has drawn a rival eager to finish the job."),
        )
        .with_hint("A rival makes a move while you recover")
        .with_hint("Old allies grow wary of you"),
        (ThreadType::NewAlly, _) => NewThread::new(
            thread_type,
            format!("A friend in {place}"),
            match npc {
                Some(name) => format!("{name} was impressed by your {activity} and may offer help later."),
                None => format!("A local who watched your {activity} would welcome a chance to help."),
            },
        )
        .with_hint("Shelter when you need it")
        .with_hint("A favour called in"),
        (ThreadType::Intel, true) => NewThread::new(
            thread_type,
            format!("Rumours from {place}"),
            format!("During the {activity} you overheard something worth following up."),
        )
        .with_hint("A hidden route")
        .with_hint("A name behind the trouble"),
        (ThreadType::Intel, false) => NewThread::new(
            thread_type,
            format!("Loose ends in {place}"),
            format!("The failed {activity} left a clue about who was waiting for you."),
        )
        .with_hint("Tracing the informant"),
        (ThreadType::Reputation, true) => NewThread::new(
            thread_type,
            format!("Talk of the town in {place}"),
            format!("Your {activity} is being retold in taverns, growing with each telling."),
        )
        .with_hint("Better prices from impressed merchants"),
        (ThreadType::Reputation, false) => NewThread::new(
            thread_type,
            format!("Whispers in {place}"),
            format!("People in {place} are talking about the botched {activity}."),
        )
        .with_hint("Doors close where they once opened"),
        (ThreadType::Resource, _) => NewThread::new(
            thread_type,
            format!("Something left behind in {place}"),
            format!("A cache or supply line noticed during the {activity} could be worth returning for."),
        )
        .with_hint("Supplies for the next expedition"),
        (other, _) => NewThread::new(
            other,
            format!("An unfinished matter in {place}"),
            format!("The {activity} stirred up something that is not done yet."),
        ),
    };

    thread.relevance = if ctx.quest_advancing {
        QuestRelevance::High
    } else {
        match thread_type {
            ThreadType::NewEnemy | ThreadType::Intel => QuestRelevance::Medium,
            _ => QuestRelevance::Low,
        }
    };
    if let Some(location) = ctx.location {
        thread.related_locations.push(location.to_string());
    }
    if let Some(name) = npc {
        thread.related_npcs.push(name.to_string());
    }
    thread
}

/// Persistence-backed thread operations.
#[derive(Clone)]
pub struct ThreadLedger {
    records: Records,
    clock: Arc<dyn Clock>,
}

impl ThreadLedger {
    pub fn new(records: Records, clock: Arc<dyn Clock>) -> Self {
        Self { records, clock }
    }

    pub async fn create(
        &self,
        character_id: CharacterId,
        source: ThreadSource,
        created_on: CalendarDate,
        data: NewThread,
    ) -> Result<StoryThread> {
        let expires_on = data.expires_on.or_else(|| {
            data.thread_type
                .lifetime_days()
                .map(|days| created_on.advance_days(days))
        });
        let thread = StoryThread {
            id: ThreadId::new(),
            character_id,
            source,
            thread_type: data.thread_type,
            title: data.title,
            description: data.description,
            relevance: data.relevance,
            related_npcs: data.related_npcs,
            related_locations: data.related_locations,
            outcome_hints: data.outcome_hints,
            status: ThreadStatus::Active,
            resolution: None,
            created_on,
            created_at: self.clock.now(),
            expires_on,
        };
        self.records.save(&thread).await?;
        info!(thread_id = %thread.id, character_id = %character_id, kind = %thread.thread_type, "story thread created");
        Ok(thread)
    }

    /// Active threads for a character, highest priority first.
    pub async fn list_active(&self, character_id: CharacterId, filter: &ThreadFilter) -> Result<Vec<StoryThread>> {
        let mut threads: Vec<StoryThread> = self
            .records
            .threads_of(character_id)
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        sort_by_priority(&mut threads);
        Ok(threads)
    }

    pub async fn resolve(&self, thread_id: ThreadId, resolution: &str) -> Result<StoryThread> {
        let mut thread = self
            .records
            .thread(thread_id)
            .await?
            .ok_or_else(|| Error::not_found("story thread", thread_id))?;
        if thread.status == ThreadStatus::Resolved {
            return Err(Error::validation(format!("story thread {thread_id} is already resolved")));
        }
        thread.status = ThreadStatus::Resolved;
        thread.resolution = Some(resolution.trim().to_string());
        self.records.save(&thread).await?;
        info!(thread_id = %thread_id, "story thread resolved");
        Ok(thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use crate::testing::{FixedRandom, ManualClock, ScriptedRandom};

    fn ctx(success: bool, quest_advancing: bool) -> ConsequenceContext<'static> {
        ConsequenceContext {
            success,
            quest_advancing,
            activity: ActivityType::Combat,
            location: Some("Phandalin"),
            npcs: &[],
        }
    }

    fn ledger() -> (ThreadLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let records = Records::new(Arc::new(MemoryStore::new()));
        (ThreadLedger::new(records, clock.clone()), clock)
    }

    #[test]
    fn test_no_threads_when_gates_miss() {
        assert!(generate_consequences(&ctx(true, false), &mut FixedRandom(0.99)).is_empty());
    }

    #[test]
    fn test_quest_guarantee() {
        let success = generate_consequences(&ctx(true, true), &mut FixedRandom(0.99));
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].thread_type, ThreadType::Intel);
        assert_eq!(success[0].relevance, QuestRelevance::High);

        let failure = generate_consequences(&ctx(false, true), &mut FixedRandom(0.99));
        assert_eq!(failure[0].thread_type, ThreadType::NewEnemy);
    }

    #[test]
    fn test_failure_odds_gate_enemy() {
        // Enemy gate on failure is 0.35, ally 0.05.
        let mut rng = ScriptedRandom::new(vec![0.30, 0.30, 0.99, 0.99, 0.99]);
        let threads = generate_consequences(&ctx(false, false), &mut rng);
        let kinds: Vec<_> = threads.iter().map(|t| t.thread_type).collect();
        assert_eq!(kinds, vec![ThreadType::NewEnemy]);
        assert_eq!(threads[0].related_locations, vec!["Phandalin".to_string()]);
    }

    #[test]
    fn test_quest_multiplier_caps() {
        // 0.30 * 1.5 = 0.45 for intel on success.
        let mut rng = ScriptedRandom::new(vec![0.99, 0.99, 0.44, 0.99, 0.99]);
        let threads = generate_consequences(&ctx(true, true), &mut rng);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].thread_type, ThreadType::Intel);
    }

    #[test]
    fn test_ally_names_met_npc() {
        let npcs = vec!["Mira Thorne".to_string()];
        let context = ConsequenceContext {
            success: true,
            quest_advancing: false,
            activity: ActivityType::Combat,
            location: Some("Phandalin"),
            npcs: &npcs,
        };
        let mut rng = ScriptedRandom::new(vec![0.99, 0.0, 0.99, 0.99, 0.99]);
        let threads = generate_consequences(&context, &mut rng);
        assert_eq!(threads[0].thread_type, ThreadType::NewAlly);
        assert!(threads[0].description.starts_with("Mira Thorne"));
        assert_eq!(threads[0].related_npcs, npcs);
    }

    #[tokio::test]
    async fn test_resource_threads_expire() {
        let (ledger, _) = ledger();
        let pc = CharacterId::new();
        let today = CalendarDate::default();
        let thread = ledger
            .create(
                pc,
                ThreadSource::Session(SessionId::new()),
                today,
                NewThread::new(ThreadType::Resource, "Cache", "Buried supplies"),
            )
            .await
            .unwrap();
        assert_eq!(thread.expires_on, Some(today.advance_days(30)));

        let soon = ThreadFilter::new().as_of(today.advance_days(29));
        let later = ThreadFilter::new().as_of(today.advance_days(30));
        assert_eq!(ledger.list_active(pc, &soon).await.unwrap().len(), 1);
        assert!(ledger.list_active(pc, &later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_twice_is_rejected() {
        let (ledger, _) = ledger();
        let pc = CharacterId::new();
        let thread = ledger
            .create(
                pc,
                ThreadSource::Adventure(AdventureId::new()),
                CalendarDate::default(),
                NewThread::new(ThreadType::Mystery, "The bell", "It rang at midnight"),
            )
            .await
            .unwrap();

        let resolved = ledger.resolve(thread.id, " the ghost was laid to rest ").await.unwrap();
        assert_eq!(resolved.resolution.as_deref(), Some("the ghost was laid to rest"));
        assert!(matches!(ledger.resolve(thread.id, "again").await, Err(Error::Validation(_))));
        assert!(matches!(ledger.resolve(ThreadId::new(), "x").await, Err(Error::NotFound { .. })));
        assert!(ledger.list_active(pc, &ThreadFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_orders_and_caps() {
        let (ledger, clock) = ledger();
        let pc = CharacterId::new();
        let source = ThreadSource::Session(SessionId::new());
        let today = CalendarDate::default();

        for (title, relevance) in [
            ("old high", QuestRelevance::High),
            ("low", QuestRelevance::Low),
            ("medium", QuestRelevance::Medium),
            ("new high", QuestRelevance::High),
        ] {
            clock.advance(chrono::Duration::minutes(1));
            ledger
                .create(
                    pc,
                    source,
                    today,
                    NewThread::new(ThreadType::Threat, title, "details")
                        .with_relevance(relevance)
                        .with_npc("Glasstaff"),
                )
                .await
                .unwrap();
        }

        let threads = ledger.list_active(pc, &ThreadFilter::new()).await.unwrap();
        let rendered = render_for_prompt(&threads, 3);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("new high"));
        assert!(lines[1].contains("old high"));
        assert!(lines[2].contains("[threat | medium] medium"));
        assert!(lines[0].ends_with("(NPCs: Glasstaff)"));

        let high_only = ThreadFilter::new().with_min_relevance(QuestRelevance::High);
        assert_eq!(ledger.list_active(pc, &high_only).await.unwrap().len(), 2);
    }
}
