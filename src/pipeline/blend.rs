//! Blender: one synthesis call over every refined answer.
//!
//! Best-effort merge: whatever the service produces is the blended answer.
//! No deduplication is attempted here.

use tracing::info;

use crate::agent::prompts::{BLENDER_PERSONA, BLEND_INSTRUCTION};
use crate::budget::{ConversationState, TokenBudget};
use crate::config::CoordinationMode;
use crate::gateway::{CompletionGateway, GatewayError};
use crate::llm::types::Role;
use crate::llm::Completion;

#[derive(Debug, thiserror::Error)]
pub enum BlendError {
    #[error("nothing to blend: no refined answers")]
    EmptyInput,

    #[error("blend call failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// One contributor's refined answer.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub agent: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Blender {
    mode: CoordinationMode,
}

impl Blender {
    pub fn new(mode: CoordinationMode) -> Self {
        Self { mode }
    }

    /// The blender's persona turn. Coordinated mode lists the contributors.
    pub fn persona(&self, contributions: &[Contribution]) -> String {
        if !self.mode.names_partners() || contributions.is_empty() {
            return BLENDER_PERSONA.to_string();
        }
        let names: Vec<&str> = contributions.iter().map(|c| c.agent.as_str()).collect();
        format!(
            "{BLENDER_PERSONA} You are aware of the following agents: {}.",
            names.join(", ")
        )
    }

    /// The single user turn sent for synthesis.
    pub fn prompt(&self, question: &str, contributions: &[Contribution]) -> String {
        let responses: Vec<String> = contributions
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if self.mode.names_partners() {
                    format!("Response from {}:\n{}", c.agent, c.text)
                } else {
                    format!("Response {}:\n{}", i + 1, c.text)
                }
            })
            .collect();
        format!(
            "Question: {question}\n\n{}\n\n{BLEND_INSTRUCTION}",
            responses.join("\n\n")
        )
    }

    /// Merge refined answers into one. An empty slice is a caller bug.
    pub async fn blend(
        &self,
        budget: &TokenBudget,
        gateway: &CompletionGateway,
        question: &str,
        contributions: &[Contribution],
    ) -> Result<Completion, BlendError> {
        if contributions.is_empty() {
            return Err(BlendError::EmptyInput);
        }

        let mut state = ConversationState::new(self.persona(contributions));
        budget.append(&mut state, Role::User, self.prompt(question, contributions));

        info!(contributors = contributions.len(), "blending refined answers");
        Ok(gateway.complete(state.turns()).await?)
    }
}
