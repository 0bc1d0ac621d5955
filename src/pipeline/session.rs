//! Session: one prompt's journey through the stages.
//!
//! Per-stage outputs are keyed by agent name, never by arrival order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CoordinationMode;
use crate::llm::types::UsageStats;

/// Where a session is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    Discussing,
    Verifying,
    Critiquing,
    Refining,
    Blending,
    Done,
    AwaitingFeedback,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::Discussing => "DISCUSSING",
            Stage::Verifying => "VERIFYING",
            Stage::Critiquing => "CRITIQUING",
            Stage::Refining => "REFINING",
            Stage::Blending => "BLENDING",
            Stage::Done => "DONE",
            Stage::AwaitingFeedback => "AWAITING_FEEDBACK",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub failed_stage: Stage,
    /// Last stage that finished with usable output.
    pub last_completed: Option<Stage>,
    /// Agents that produced output for `last_completed`.
    pub partial_agents: Vec<String>,
    pub reason: String,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session failed during {}: {}", self.failed_stage, self.reason)?;
        if let Some(stage) = self.last_completed {
            write!(f, " (last completed: {stage}")?;
            if !self.partial_agents.is_empty() {
                write!(f, "; partial output from {}", self.partial_agents.join(", "))?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Wall-clock time spent in one stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub total_ms: u64,
    /// Per-agent call time, retries included. Empty for the blend.
    pub agents: BTreeMap<String, u64>,
}

/// An agent dropped from the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub agent: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub prompt: String,
    pub mode: CoordinationMode,
    pub created_at: DateTime<Utc>,
    pub stage: Stage,
    pub last_completed: Option<Stage>,
    /// Memory context injected into the discussion prompt (may be empty).
    pub memory_context: String,

    pub initial: BTreeMap<String, String>,
    pub verified: BTreeMap<String, String>,
    pub critique_received: BTreeMap<String, String>,
    /// Who critiqued whom: target → critic.
    pub critic_of: BTreeMap<String, String>,
    pub refined: BTreeMap<String, String>,
    pub blended: Option<String>,

    /// Agents still taking part, in roster order.
    pub active: Vec<String>,
    pub excluded: Vec<Exclusion>,
    pub feedback_rounds: u32,
    pub usage: UsageStats,
    /// Latest run of each stage; a feedback round replaces Refining and Blending.
    pub timings: BTreeMap<Stage, StageTiming>,
    pub failure: Option<SessionFailure>,
}

impl Session {
    pub fn new(prompt: &str, mode: CoordinationMode, roster: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            mode,
            created_at: Utc::now(),
            stage: Stage::Init,
            last_completed: None,
            memory_context: String::new(),
            initial: BTreeMap::new(),
            verified: BTreeMap::new(),
            critique_received: BTreeMap::new(),
            critic_of: BTreeMap::new(),
            refined: BTreeMap::new(),
            blended: None,
            active: roster,
            excluded: Vec::new(),
            feedback_rounds: 0,
            usage: UsageStats::default(),
            timings: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }

    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn complete(&mut self, stage: Stage) {
        self.last_completed = Some(stage);
    }

    /// Output map for a per-agent stage.
    pub fn outputs(&self, stage: Stage) -> Option<&BTreeMap<String, String>> {
        match stage {
            Stage::Discussing => Some(&self.initial),
            Stage::Verifying => Some(&self.verified),
            Stage::Critiquing => Some(&self.critique_received),
            Stage::Refining => Some(&self.refined),
            _ => None,
        }
    }

    pub(crate) fn outputs_mut(&mut self, stage: Stage) -> Option<&mut BTreeMap<String, String>> {
        match stage {
            Stage::Discussing => Some(&mut self.initial),
            Stage::Verifying => Some(&mut self.verified),
            Stage::Critiquing => Some(&mut self.critique_received),
            Stage::Refining => Some(&mut self.refined),
            _ => None,
        }
    }

    /// Drop an agent for the remainder of the session.
    pub fn exclude(&mut self, agent: &str, reason: String) {
        self.active.retain(|a| a != agent);
        self.excluded.push(Exclusion {
            agent: agent.to_string(),
            stage: self.stage,
            reason,
        });
    }

    /// Move to `Failed`, recording what was salvaged.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let partial_agents = self
            .last_completed
            .and_then(|stage| self.outputs(stage))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        self.failure = Some(SessionFailure {
            failed_stage: self.stage,
            last_completed: self.last_completed,
            partial_agents,
            reason: reason.into(),
        });
        self.stage = Stage::Failed;
    }

    /// Refined answers in roster order, paired with their authors.
    pub fn refined_in_order(&self) -> Vec<(String, String)> {
        self.active
            .iter()
            .filter_map(|name| self.refined.get(name).map(|t| (name.clone(), t.clone())))
            .collect()
    }
}
