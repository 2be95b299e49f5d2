//! Orchestrator-wide settings.

use crate::clock::TimeRatio;
use serde::{Deserialize, Serialize};

/// Configuration for the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Transcript turns included in each narrator prompt.
    pub transcript_tail: usize,
    /// Story threads included in each narrator prompt.
    pub thread_cap: usize,
    /// Turns summarized when a paused session resumes.
    pub recap_turns: usize,
    /// Ratio used when neither the session nor the character sets one.
    pub default_time_ratio: TimeRatio,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transcript_tail: 12,
            thread_cap: 5,
            recap_turns: 6,
            default_time_ratio: TimeRatio::OneToOne,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcript_tail(mut self, turns: usize) -> Self {
        self.transcript_tail = turns;
        self
    }

    pub fn with_thread_cap(mut self, cap: usize) -> Self {
        self.thread_cap = cap;
        self
    }

    pub fn with_recap_turns(mut self, turns: usize) -> Self {
        self.recap_turns = turns;
        self
    }

    pub fn with_default_time_ratio(mut self, ratio: TimeRatio) -> Self {
        self.default_time_ratio = ratio;
        self
    }
}
