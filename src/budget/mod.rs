//! Token budget: keeps each agent's conversation under a ceiling.
//!
//! Token counts are a char/4 estimate: no tokenizer dependency, and the
//! same text always yields the same count. The persona (system) turn is
//! pinned; everything after it is trimmed oldest-first.

use tracing::{debug, warn};

use crate::llm::types::{Message, Role};

/// Chars-per-token ratio used for estimation.
pub const TOKEN_CHAR_RATIO: usize = 4;

/// Estimate the token count of a string (rounded up).
pub fn estimate(text: &str) -> usize {
    text.chars().count().div_ceil(TOKEN_CHAR_RATIO)
}

/// One agent's running conversation. Always starts with its persona turn.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: Vec<Message>,
}

impl ConversationState {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            turns: vec![Message::system(persona)],
        }
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn persona(&self) -> &str {
        &self.turns[0].content
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Only the persona turn is present.
    pub fn is_empty(&self) -> bool {
        self.turns.len() <= 1
    }

    /// Estimated tokens across every turn.
    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| estimate(&t.content)).sum()
    }

    /// Drop everything but the persona turn.
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }
}

/// What happened during an `append`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Turns removed to get back under the ceiling.
    pub trimmed: usize,
    /// The new turn alone (with the persona) exceeds the ceiling and was kept anyway.
    pub overflowed: bool,
}

/// Ceiling and cache-eligibility threshold, both in estimated tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    ceiling: usize,
    cache_threshold: usize,
}

impl TokenBudget {
    pub fn new(ceiling: usize, cache_threshold: usize) -> Self {
        Self {
            ceiling,
            cache_threshold,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Long enough to be worth placing in the reusable prompt prefix.
    pub fn is_cache_eligible(&self, text: &str) -> bool {
        estimate(text) >= self.cache_threshold
    }

    /// Join prompt segments, cache-eligible ones first.
    ///
    /// Relative order inside each group is preserved. Empty segments are dropped.
    pub fn arrange(&self, segments: &[&str]) -> String {
        let (eligible, rest): (Vec<&str>, Vec<&str>) = segments
            .iter()
            .copied()
            .filter(|s| !s.trim().is_empty())
            .partition(|s| self.is_cache_eligible(s));
        eligible
            .into_iter()
            .chain(rest)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Append a turn, then trim the oldest non-persona turns until the state
    /// fits. Never fails: a turn too large to fit is kept alone with the persona.
    pub fn append(
        &self,
        state: &mut ConversationState,
        role: Role,
        content: impl Into<String>,
    ) -> AppendOutcome {
        state.turns.push(Message::new(role, content));

        let mut total = state.total_tokens();
        let mut outcome = AppendOutcome::default();
        while total > self.ceiling && state.turns.len() > 2 {
            let removed = state.turns.remove(1);
            total -= estimate(&removed.content);
            outcome.trimmed += 1;
        }

        if outcome.trimmed > 0 {
            debug!(trimmed = outcome.trimmed, total, "trimmed conversation");
        }
        if total > self.ceiling {
            outcome.overflowed = true;
            warn!(
                total,
                ceiling = self.ceiling,
                "single turn exceeds token ceiling; keeping it anyway"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        // "abc " is exactly one token per word
        "abc ".repeat(n)
    }

    #[test]
    fn estimate_is_deterministic() {
        let text = "What are the benefits of renewable energy?";
        assert_eq!(estimate(text), estimate(text));
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn estimate_counts_chars_not_bytes() {
        assert_eq!(estimate("ééé"), 1);
    }

    #[test]
    fn append_under_budget_keeps_everything() {
        let budget = TokenBudget::new(100, 50);
        let mut state = ConversationState::new("persona");
        let outcome = budget.append(&mut state, Role::User, "hello");
        assert_eq!(outcome, AppendOutcome::default());
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn append_trims_oldest_non_persona_first() {
        let budget = TokenBudget::new(30, 1000);
        let mut state = ConversationState::new("sys!"); // 1 token
        budget.append(&mut state, Role::User, format!("first {}", words(9)));
        budget.append(&mut state, Role::Assistant, format!("second {}", words(9)));
        let outcome = budget.append(&mut state, Role::User, format!("third {}", words(9)));

        assert_eq!(outcome.trimmed, 1);
        assert!(!outcome.overflowed);
        assert_eq!(state.turns()[0].role, Role::System);
        assert!(state.turns()[1].content.starts_with("second"));
        assert!(state.turns()[2].content.starts_with("third"));
        assert!(state.total_tokens() <= 30);
    }

    #[test]
    fn oversized_turn_is_kept_alone() {
        let budget = TokenBudget::new(20, 1000);
        let mut state = ConversationState::new("persona");
        budget.append(&mut state, Role::User, "short");
        let outcome = budget.append(&mut state, Role::User, words(50));

        assert!(outcome.overflowed);
        assert_eq!(outcome.trimmed, 1);
        assert_eq!(state.len(), 2);
        assert_eq!(state.persona(), "persona");
    }

    #[test]
    fn persona_is_never_trimmed_even_when_huge() {
        let budget = TokenBudget::new(5, 1000);
        let mut state = ConversationState::new(words(40));
        budget.append(&mut state, Role::User, "a");
        budget.append(&mut state, Role::User, "b");
        assert_eq!(state.len(), 2);
        assert_eq!(state.turns()[0].role, Role::System);
        assert_eq!(state.turns()[1].content, "b");
    }

    #[test]
    fn ceiling_holds_after_every_append() {
        let budget = TokenBudget::new(64, 1000);
        let mut state = ConversationState::new("You are a careful assistant.");
        for i in 0..200 {
            let size = (i * 7) % 40;
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            budget.append(&mut state, role, words(size));
            let fits = state.total_tokens() <= budget.ceiling();
            let lone_overflow = state.len() == 2;
            assert!(fits || lone_overflow, "iteration {i}: budget violated");
            assert_eq!(state.turns()[0].role, Role::System);
        }
    }

    #[test]
    fn reset_keeps_persona() {
        let budget = TokenBudget::new(100, 50);
        let mut state = ConversationState::new("persona");
        budget.append(&mut state, Role::User, "q");
        budget.append(&mut state, Role::Assistant, "a");
        state.reset();
        assert!(state.is_empty());
        assert_eq!(state.persona(), "persona");
    }

    #[test]
    fn arrange_puts_cache_eligible_first() {
        let budget = TokenBudget::new(10_000, 10);
        let long = words(20);
        let arranged = budget.arrange(&["Short instruction.", &long, "", "tail"]);
        assert!(arranged.starts_with("abc"));
        assert!(arranged.ends_with("Short instruction.\n\ntail"));
    }

    #[test]
    fn arrange_preserves_order_when_nothing_is_eligible() {
        let budget = TokenBudget::new(10_000, 1_000);
        assert_eq!(budget.arrange(&["one", "two"]), "one\n\ntwo");
    }
}
