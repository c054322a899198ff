/// Prompt text for the reasoning and hint requests

pub const REASONER_SYSTEM_PROMPT: &str = "\
You are an agent that solves mathematical problems through step-by-step reasoning. \
When the user sends a math problem statement, develop and present a structured line of \
reasoning that shows every logical step needed to reach the solution.
Make sure to:
- Analyze the problem statement carefully and pick out the relevant information.
- Break the problem down into clear, sequential steps.
- Explain each step in detail, with examples or formulas where they help.
- Hold back the final solution unless it is explicitly requested.";

const HINT_PROMPT_INTRO: &str = "\
You are an agent that gives targeted hints to help the user finish their own reasoning \
on a math problem. The details are:
- **Problem statement:** ";

const HINT_PROMPT_REASONING: &str = "\n- **Step-by-step reasoning:** ";

const HINT_PROMPT_TASK: &str = "

The user message says what kind of hint is wanted, how far the user has got, and carries \
a numerical label (1 to 5) describing their psychophysical state.

Your task:
1) Pick the level of support from the label:
   - 1: a minimal hint that encourages independence.
   - 2: a slightly more explicit hint that guides without revealing too much.
   - 3: clear instructions with some explicit steps, leaving room for independent reasoning.
   - 4: a detailed walk-through of the step, giving the key elements needed to get past it.
   - 5: full step-by-step support that substantially lowers the difficulty of the step.
2) Guide the user step by step, focused on the reasoning step where they need help.
3) Keep a clear, encouraging, learning-oriented tone and do not reveal the complete solution.";

/// Hint system prompt with the session's problem and reasoning embedded verbatim
pub fn hint_system_prompt(problem: &str, reasoning: &str) -> String {
    format!("{}{}{}{}{}", HINT_PROMPT_INTRO, problem, HINT_PROMPT_REASONING, reasoning, HINT_PROMPT_TASK)
}

/// User message for the hint step. `state` is the psychophysical state descriptor.
pub fn hint_user_message(request: &str, state: &str) -> String {
    format!("Request: {}\nPsychophysical state: {}", request, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_prompt_embeds_session() {
        let prompt = hint_system_prompt("Solve 2x+1=5", "Subtract 1, then divide by 2");
        assert!(prompt.contains("**Problem statement:** Solve 2x+1=5"));
        assert!(prompt.contains("**Step-by-step reasoning:** Subtract 1, then divide by 2"));
        assert!(prompt.ends_with("do not reveal the complete solution."));
    }

    #[test]
    fn test_placeholders_in_user_text_are_left_alone() {
        let prompt = hint_system_prompt("what is {reasoning}?", "r");
        assert!(prompt.contains("**Problem statement:** what is {reasoning}?\n"));
        assert!(prompt.contains("**Step-by-step reasoning:** r\n"));
    }
}
