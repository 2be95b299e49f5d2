//! Testing utilities for Chronicle.
//!
//! This module provides tools for deterministic tests:
//! - `MockNarrator` for scripted narration without API calls
//! - `FixedRandom` / `ScriptedRandom` for pinned dice
//! - `ManualClock` for controlling real elapsed time
//! - `TestHarness` bundling an orchestrator over an in-memory store

use crate::character::{CharacterRecord, Companion};
use crate::clock::{Clock, RandomSource};
use crate::ids::CharacterId;
use crate::narrator::{Narrator, NarratorError, Prompt};
use crate::orchestrator::Orchestrator;
use crate::persist::MemoryStore;
use crate::session::{SessionStatus, SessionView};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

fn scaled(value: f64, low: i64, high: i64) -> i64 {
    if high <= low {
        return low;
    }
    let span = (high - low + 1) as f64;
    (low + (value.clamp(0.0, 1.0) * span).floor() as i64).min(high)
}

/// Every draw returns the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&mut self) -> f64 {
        self.0
    }

    fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        scaled(self.0, low, high)
    }
}

/// Returns scripted draws in order, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    values: VecDeque<f64>,
    last: f64,
}

impl ScriptedRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into(),
            last: 0.99,
        }
    }

    fn draw(&mut self) -> f64 {
        if let Some(value) = self.values.pop_front() {
            self.last = value;
        }
        self.last
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.draw()
    }

    fn range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        let value = self.draw();
        scaled(value, low, high)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A narrator that returns scripted replies.
///
/// Every prompt it receives is captured for inspection.
#[derive(Debug, Default)]
pub struct MockNarrator {
    replies: Mutex<VecDeque<Result<String, NarratorError>>>,
    /// Returned for every call once set, ahead of the queue.
    always_fail: Option<NarratorError>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockNarrator {
    /// Create a mock narrator with scripted replies.
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// A narrator that fails every call with `error`.
    pub fn failing(error: NarratorError) -> Self {
        Self {
            always_fail: Some(error),
            ..Self::default()
        }
    }

    /// Queue another reply.
    pub fn queue(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    /// Queue a failure for the next call not already scripted.
    pub fn fail_next(&self, error: NarratorError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts().pop()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, NarratorError>>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn narrate(&self, prompt: &Prompt) -> Result<String, NarratorError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Ok("The story continues.".to_string()))
    }
}

/// An orchestrator wired to mocks, for scripted scenarios.
pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub narrator: Arc<MockNarrator>,
    pub clock: Arc<ManualClock>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness whose dice always land on 0.5.
    pub fn new() -> Self {
        Self::with_random(FixedRandom(0.5))
    }

    pub fn with_random(rng: impl RandomSource + 'static) -> Self {
        let narrator = Arc::new(MockNarrator::default());
        let clock = Arc::new(ManualClock::default());
        let orchestrator = Orchestrator::new(Arc::new(MemoryStore::new()), narrator.clone())
            .with_clock(clock.clone())
            .with_random(Box::new(rng));
        Self {
            orchestrator,
            narrator,
            clock,
        }
    }

    /// Queue a narrator reply.
    pub fn expect_narration(&self, text: impl Into<String>) -> &Self {
        self.narrator.queue(text);
        self
    }

    /// Move real time forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn add_character(&self, character: CharacterRecord) -> CharacterRecord {
        self.orchestrator
            .records()
            .save(&character)
            .await
            .expect("save character");
        character
    }

    pub async fn add_companion(&self, companion: Companion) -> Companion {
        self.orchestrator
            .records()
            .save(&companion)
            .await
            .expect("save companion");
        companion
    }

    /// Reload a character from the store.
    pub async fn character(&self, id: CharacterId) -> CharacterRecord {
        self.orchestrator
            .records()
            .character(id)
            .await
            .expect("load character")
            .expect("character exists")
    }

    pub async fn companions(&self, owner: CharacterId) -> Vec<Companion> {
        self.orchestrator
            .records()
            .companions_of(owner)
            .await
            .expect("load companions")
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a character's hit points.
#[track_caller]
pub fn assert_hp(character: &CharacterRecord, current: i32, max: i32) {
    assert_eq!(
        (character.hit_points.current, character.hit_points.maximum),
        (current, max),
        "HP mismatch for {}",
        character.name
    );
}

#[track_caller]
pub fn assert_has_condition(character: &CharacterRecord, condition: &str) {
    assert!(
        character.has_condition(condition),
        "expected {} to have condition '{}', has {:?}",
        character.name,
        condition,
        character.condition_names()
    );
}

#[track_caller]
pub fn assert_status(view: &SessionView, status: SessionStatus) {
    assert_eq!(view.status, status, "session {} status", view.id);
}
