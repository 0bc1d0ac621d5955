//! Instruction templates for each pipeline stage.
//!
//! Every builder returns segments ordered through `TokenBudget::arrange`,
//! so long (cache-eligible) material lands at the front of the turn and
//! short instructions follow.

use crate::budget::TokenBudget;

/// Verification instruction (stage 2).
pub const VERIFY_INSTRUCTION: &str = "\
Verify the accuracy of your previous response above. Check each claim, correct anything \
that is wrong or unsupported, and restate the verified answer in full.";

/// Critique instruction (stage 3).
pub const CRITIQUE_INSTRUCTION: &str = "\
Critique the response above for accuracy, depth and completeness. Point out errors, \
omissions and weak reasoning. Be specific; do not rewrite the answer.";

/// Refinement instruction (stage 4).
pub const REFINE_INSTRUCTION: &str = "\
Refine your response using the critique above. Keep what is correct, fix what the critique \
shows is wrong, and improve accuracy and completeness. Reply with the refined answer only.";

/// Used when nobody critiqued this agent (its critic dropped out).
pub const SELF_REFINE_INSTRUCTION: &str = "\
Refine your response above to improve its accuracy and completeness. \
Reply with the refined answer only.";

/// Feedback instruction (refinement after the user rejected the blended answer).
pub const FEEDBACK_INSTRUCTION: &str = "\
The user was not satisfied with the combined answer. Refine your response taking their \
feedback into account. Reply with the refined answer only.";

/// Appended when the user asks the agents to take more time.
pub const MORE_TIME_INSTRUCTION: &str =
    "Take additional time to improve the response thoroughly before answering.";

/// Blend instruction (stage 5).
pub const BLEND_INSTRUCTION: &str = "\
Combine the responses above into a single, optimal answer to the question. Preserve the \
distinct strengths of each response, resolve contradictions, and provide a concise and \
accurate combined response.";

/// Persona of the synthesis step.
pub const BLENDER_PERSONA: &str =
    "You are a collaborative AI assistant composed of multiple expert agents.";

/// Stage 1: retrieved memory context, then the user's prompt.
pub fn discussion(budget: &TokenBudget, memory_context: &str, prompt: &str) -> String {
    budget.arrange(&[memory_context, prompt])
}

/// Stage 2: the agent's own initial answer, then the verification instruction.
pub fn verification(budget: &TokenBudget, initial: &str) -> String {
    let answer = format!("Your previous response:\n{initial}");
    budget.arrange(&[&answer, VERIFY_INSTRUCTION])
}

/// Stage 3: the target's verified answer, then the critique instruction.
///
/// `target` names the agent being critiqued when the mode calls for it.
pub fn critique(budget: &TokenBudget, target: Option<&str>, verified: &str) -> String {
    let header = match target {
        Some(name) => format!("Response from {name}:\n{verified}"),
        None => format!("Response to critique:\n{verified}"),
    };
    budget.arrange(&[&header, CRITIQUE_INSTRUCTION])
}

/// Stage 4: own verified answer, the critique received (if any), then the instruction.
pub fn refinement(
    budget: &TokenBudget,
    verified: &str,
    critique: Option<&str>,
    critic: Option<&str>,
) -> String {
    let answer = format!("Your verified response:\n{verified}");
    match critique {
        Some(text) => {
            let label = match critic {
                Some(name) => format!("Critique from {name}:\n{text}"),
                None => format!("Critique:\n{text}"),
            };
            budget.arrange(&[&answer, &label, REFINE_INSTRUCTION])
        }
        None => budget.arrange(&[&answer, SELF_REFINE_INSTRUCTION]),
    }
}

/// Feedback loop: previous refined answer, the user's feedback, then the instruction.
pub fn feedback(budget: &TokenBudget, refined: &str, feedback: &str, more_time: bool) -> String {
    let answer = format!("Your previous response:\n{refined}");
    let note = format!("User feedback:\n{feedback}");
    let mut instruction = FEEDBACK_INSTRUCTION.to_string();
    if more_time {
        instruction.push(' ');
        instruction.push_str(MORE_TIME_INSTRUCTION);
    }
    budget.arrange(&[&answer, &note, &instruction])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> TokenBudget {
        TokenBudget::new(10_000, 50)
    }

    #[test]
    fn instructions_are_not_empty() {
        for text in [
            VERIFY_INSTRUCTION,
            CRITIQUE_INSTRUCTION,
            REFINE_INSTRUCTION,
            FEEDBACK_INSTRUCTION,
            BLEND_INSTRUCTION,
            BLENDER_PERSONA,
        ] {
            assert!(!text.is_empty());
        }
    }

    #[test]
    fn discussion_without_memory_is_just_the_prompt() {
        assert_eq!(discussion(&budget(), "", "Why is the sky blue?"), "Why is the sky blue?");
    }

    #[test]
    fn discussion_puts_long_memory_first() {
        let memory = "Relevant context from previous sessions: ".repeat(10);
        let text = discussion(&budget(), &memory, "Why is the sky blue?");
        assert!(text.starts_with("Relevant context"));
        assert!(text.ends_with("Why is the sky blue?"));
    }

    #[test]
    fn critique_names_target_when_given() {
        let text = critique(&budget(), Some("Beta"), "the answer");
        assert!(text.contains("Response from Beta:\nthe answer"));
        assert!(text.contains(CRITIQUE_INSTRUCTION));

        let anonymous = critique(&budget(), None, "the answer");
        assert!(!anonymous.contains("Beta"));
    }

    #[test]
    fn refinement_without_critique_self_refines() {
        let text = refinement(&budget(), "v", None, None);
        assert!(text.contains(SELF_REFINE_INSTRUCTION));
        assert!(!text.contains(REFINE_INSTRUCTION));
    }

    #[test]
    fn refinement_includes_critic() {
        let text = refinement(&budget(), "v", Some("too short"), Some("Alpha"));
        assert!(text.contains("Critique from Alpha:\ntoo short"));
        assert!(text.contains(REFINE_INSTRUCTION));
    }

    #[test]
    fn feedback_more_time() {
        let text = feedback(&budget(), "old", "add sources", true);
        assert!(text.contains("User feedback:\nadd sources"));
        assert!(text.contains(MORE_TIME_INSTRUCTION));
        assert!(!feedback(&budget(), "old", "x", false).contains(MORE_TIME_INSTRUCTION));
    }
}
