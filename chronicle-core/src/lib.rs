//! Session orchestration for AI-narrated role-playing.
//!
//! This crate provides:
//! - A session lifecycle (start, act, pause, resume, end, claim, abort)
//!   around a pluggable narrator
//! - A directive parser that turns bracketed narrator markers into state
//! - The Harptos calendar, advanced from real elapsed time
//! - Party synergy, outcome rolls, rewards and failure consequences
//! - Persistent story threads fed back into later prompts
//! - Timed background adventures
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle_core::{CharacterRecord, JsonFileStore, NarratorConfig, Orchestrator, SessionConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(JsonFileStore::new("saves"));
//!     let narrator = Arc::new(NarratorConfig::from_env().build_chain()?);
//!     let orchestrator = Orchestrator::new(store, narrator);
//!
//!     let aria = CharacterRecord::new("Aria", "rogue", 3, 18);
//!     orchestrator.records().save(&aria).await?;
//!
//!     let started = orchestrator.start(aria.id, SessionConfig::new()).await?;
//!     println!("{}", started.narration);
//!
//!     let turn = orchestrator.act(started.session.id, "I look around the tavern").await?;
//!     println!("{}", turn.narration);
//!     Ok(())
//! }
//! ```

pub mod adventure;
pub mod calendar;
pub mod character;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod markers;
pub mod narrator;
pub mod orchestrator;
pub mod persist;
pub mod rewards;
pub mod session;
pub mod synergy;
pub mod testing;
pub mod threads;

// Primary public API
pub use adventure::{Adventure, AdventurePlan, AdventurePoll, AdventureStatus};
pub use calendar::{CalendarDate, Season};
pub use character::{CharacterRecord, Companion, HitPoints, Purse};
pub use clock::{Clock, RandomSource, SeededRandom, SystemClock, ThreadRandom, TimeRatio};
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use ids::{AdventureId, CharacterId, CompanionId, SessionId, ThreadId};
pub use markers::{MarkerEvent, MarkerKind, ParsedNarration};
pub use narrator::{Narrator, NarratorChain, NarratorConfig, NarratorError, Prompt};
pub use orchestrator::{Claimed, Ended, HistoryEntry, Orchestrator, Resumed, Started, TurnResult};
pub use persist::{JsonFileStore, MemoryStore, RecordStore, Records};
pub use rewards::Rewards;
pub use session::{SessionConfig, SessionStatus, SessionView, UiHint};
pub use synergy::{ActivityType, Outcome, RiskTier};
pub use testing::{MockNarrator, TestHarness};
pub use threads::{NewThread, QuestRelevance, StoryThread, ThreadFilter, ThreadType};
