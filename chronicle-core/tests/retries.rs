//! Retrying after a failed write never applies anything twice.

use async_trait::async_trait;
use chronicle_core::persist::{PersistError, RecordKind};
use chronicle_core::testing::{FixedRandom, ManualClock, MockNarrator};
use chronicle_core::{
    ActivityType, AdventurePlan, CharacterRecord, Companion, Error, MemoryStore, Orchestrator, RecordStore, RiskTier,
    SessionConfig, SessionStatus,
};
use chrono::Duration;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fails the next `put` of one record kind once armed.
struct FlakyStore {
    inner: MemoryStore,
    kind: RecordKind,
    armed: AtomicBool,
}

impl FlakyStore {
    fn new(kind: RecordKind) -> Self {
        Self {
            inner: MemoryStore::new(),
            kind,
            armed: AtomicBool::new(false),
        }
    }

    fn fail_next_put(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Value>, PersistError> {
        self.inner.get(kind, key).await
    }

    async fn put(&self, kind: RecordKind, key: &str, value: Value) -> Result<(), PersistError> {
        if kind == self.kind && self.armed.swap(false, Ordering::SeqCst) {
            return Err(PersistError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(kind, key, value).await
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<bool, PersistError> {
        self.inner.delete(kind, key).await
    }

    async fn list(&self, kind: RecordKind) -> Result<Vec<(String, Value)>, PersistError> {
        self.inner.list(kind).await
    }
}

fn orchestrator(store: Arc<FlakyStore>, clock: Arc<ManualClock>, roll: f64) -> Orchestrator {
    Orchestrator::new(store, Arc::new(MockNarrator::default()))
        .with_clock(clock)
        .with_random(Box::new(FixedRandom(roll)))
}

#[tokio::test]
async fn test_claim_retry_after_failed_save_grants_once() {
    let store = Arc::new(FlakyStore::new(RecordKind::Session));
    let clock = Arc::new(ManualClock::default());
    let orch = orchestrator(store.clone(), clock.clone(), 0.0);

    let aria = CharacterRecord::new("Aria", "fighter", 3, 24);
    let brann = CharacterRecord::new("Brann", "paladin", 3, 28);
    let ilse = Companion::new(aria.id, "Ilse", "cleric", 3);
    orch.records().save(&aria).await.unwrap();
    orch.records().save(&brann).await.unwrap();
    orch.records().save(&ilse).await.unwrap();

    let config = SessionConfig::new()
        .with_activity(ActivityType::Exploration)
        .with_risk(RiskTier::Low)
        .with_second_character(brann.id);
    let id = orch.start(aria.id, config).await.unwrap().session.id;
    clock.advance(Duration::hours(2));
    let ended = orch.end(id).await.unwrap();
    let award = ended.rewards.experience;
    assert!(ended.rewards.outcome.success);
    assert!(award > 0);

    store.fail_next_put();
    assert!(matches!(orch.claim(id).await, Err(Error::Persistence(_))));
    assert_eq!(orch.status(id).await.unwrap().status, SessionStatus::Completed);

    let claimed = orch.claim(id).await.unwrap();
    assert_eq!(claimed.applied.experience, award);
    assert_eq!(orch.status(id).await.unwrap().status, SessionStatus::Claimed);

    let aria_after = orch.records().character(aria.id).await.unwrap().unwrap();
    assert_eq!(aria_after.experience, aria.experience + award);
    assert_eq!(aria_after.purse.gold, ended.rewards.gold);
    let brann_after = orch.records().character(brann.id).await.unwrap().unwrap();
    assert_eq!(brann_after.experience, brann.experience + award);
    let ilse_after = orch.records().companion(ilse.id).await.unwrap().unwrap();
    assert_eq!(ilse_after.experience, ilse.experience + claimed.companions[0].experience);
}

#[tokio::test]
async fn test_end_retry_reuses_story_threads() {
    let store = Arc::new(FlakyStore::new(RecordKind::Session));
    let clock = Arc::new(ManualClock::default());
    // 0.0 succeeds and passes every consequence gate.
    let orch = orchestrator(store.clone(), clock, 0.0);
    let aria = CharacterRecord::new("Aria", "fighter", 3, 24);
    orch.records().save(&aria).await.unwrap();

    let id = orch
        .start(aria.id, SessionConfig::new().with_location("Triboar"))
        .await
        .unwrap()
        .session
        .id;

    store.fail_next_put();
    assert!(matches!(orch.end(id).await, Err(Error::Persistence(_))));
    let written = orch.records().threads_of(aria.id).await.unwrap().len();
    assert!(written > 0);

    let ended = orch.end(id).await.unwrap();
    assert_eq!(ended.threads.len(), written);
    assert_eq!(orch.records().threads_of(aria.id).await.unwrap().len(), written);
}

#[tokio::test]
async fn test_adventure_retries_apply_once() {
    let store = Arc::new(FlakyStore::new(RecordKind::Adventure));
    let clock = Arc::new(ManualClock::default());
    let orch = orchestrator(store.clone(), clock.clone(), 0.0);
    let aria = CharacterRecord::new("Aria", "ranger", 2, 16);
    orch.records().save(&aria).await.unwrap();

    let adventure = orch
        .start_adventure(aria.id, AdventurePlan::new(ActivityType::Gathering, RiskTier::Low, 4))
        .await
        .unwrap();
    clock.advance(Duration::hours(4));

    store.fail_next_put();
    assert!(matches!(orch.poll_adventure(adventure.id).await, Err(Error::Persistence(_))));
    let written = orch.records().threads_of(aria.id).await.unwrap().len();
    let done = orch.poll_adventure(adventure.id).await.unwrap();
    assert_eq!(done.threads.len(), written);
    assert_eq!(orch.records().threads_of(aria.id).await.unwrap().len(), written);

    let award = done.adventure.rewards.clone().unwrap().experience;
    store.fail_next_put();
    assert!(orch.claim_adventure(adventure.id).await.is_err());
    orch.claim_adventure(adventure.id).await.unwrap();

    let aria_after = orch.records().character(aria.id).await.unwrap().unwrap();
    assert_eq!(aria_after.experience, aria.experience + award);
}
