//! Agent: one reasoning participant.
//!
//! A single type parameterized by an immutable `AgentProfile`; behavior
//! differences between agents are data (persona text), not code. Each
//! agent exclusively owns its `ConversationState`.

pub mod prompts;

use std::sync::Arc;

use tracing::debug;

use crate::budget::{ConversationState, TokenBudget};
use crate::gateway::{CompletionGateway, GatewayError};
use crate::llm::types::{Role, UsageStats};
use crate::llm::Completion;
use crate::profile::AgentProfile;

/// A participant: profile plus private conversation.
#[derive(Debug)]
pub struct Agent {
    profile: Arc<AgentProfile>,
    state: ConversationState,
    usage: UsageStats,
}

impl Agent {
    pub fn new(profile: Arc<AgentProfile>) -> Self {
        let state = ConversationState::new(profile.system_text());
        Self {
            profile,
            state,
            usage: UsageStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.profile.name()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Usage summed over every successful call this agent made.
    pub fn usage(&self) -> UsageStats {
        self.usage
    }

    /// Forget everything but the persona turn.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// One exchange: append `prompt` under the budget, call the gateway,
    /// append the reply. On failure the prompt stays in the conversation
    /// and no reply is recorded.
    pub async fn turn(
        &mut self,
        budget: &TokenBudget,
        gateway: &CompletionGateway,
        prompt: String,
    ) -> Result<Completion, GatewayError> {
        budget.append(&mut self.state, Role::User, prompt);
        let completion = gateway.complete(self.state.turns()).await?;
        budget.append(&mut self.state, Role::Assistant, completion.text.clone());
        if let Some(usage) = completion.usage {
            self.usage += usage;
        }
        debug!(
            agent = %self.name(),
            turns = self.state.len(),
            tokens = self.state.total_tokens(),
            "agent turn complete"
        );
        Ok(completion)
    }
}
