//! Prompt builders for the remediation models
//!
//! Every prompt carries the task and the detector's diagnosis so the model
//! works toward the cause of the stall rather than in general.

use unstuck_core::{Frame, StuckSignal, Task};

fn push_task(prompt: &mut String, task: &Task) {
    prompt.push_str("## TASK\n\n");
    prompt.push_str(&format!("**{}**: {}\n\n", task.id, task.title));
    if !task.description.is_empty() {
        prompt.push_str(&task.description);
        prompt.push_str("\n\n");
    }
    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("**Acceptance Criteria:**\n");
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("- {}\n", criterion));
        }
        prompt.push('\n');
    }
}

fn push_diagnosis(prompt: &mut String, signal: &StuckSignal) {
    prompt.push_str("## DIAGNOSIS\n\n");
    prompt.push_str(&format!(
        "The executor is stuck: {} (confidence {}).\n{}\n\n",
        signal.pattern, signal.confidence, signal.diagnosis
    ));
}

/// Ask the compression model to shrink `context` to what the task needs
pub fn build_prune_prompt(context: &str, signal: &StuckSignal, task: &Task, max_tokens: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str("# CONTEXT PRUNING\n\n");
    prompt.push_str(
        "An autonomous coding agent keeps failing to make progress on the task below. \
         Rewrite its working context so the next attempt starts clean.\n\n",
    );

    push_task(&mut prompt, task);
    push_diagnosis(&mut prompt, signal);

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str("Keep only what is essential to finishing this task:\n");
    prompt.push_str("- Content of files currently being edited\n");
    prompt.push_str("- Error messages, verbatim\n");
    prompt.push_str("- The acceptance criteria\n\n");
    prompt.push_str("Discard conversational history, completed steps and tangential exploration. ");
    prompt.push_str("Drop anything that feeds the loop described in the diagnosis.\n");
    prompt.push_str(&format!(
        "Respond with the pruned context only, at most {} tokens, with no preamble.\n\n",
        max_tokens
    ));

    prompt.push_str("## CONTEXT\n\n");
    prompt.push_str(context);
    prompt.push('\n');

    prompt
}

/// Ask the planning model to split `task` into ordered subtasks
pub fn build_decompose_prompt(task: &Task, signal: &StuckSignal, max_subtasks: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str("# TASK DECOMPOSITION\n\n");
    prompt.push_str(
        "An autonomous coding agent is overwhelmed by the task below. \
         Split it into smaller, independently verifiable subtasks that are executed in order.\n\n",
    );

    push_task(&mut prompt, task);
    push_diagnosis(&mut prompt, signal);

    prompt.push_str("## OUTPUT FORMAT\n\n");
    prompt.push_str(&format!(
        "Return between 2 and {} subtasks as JSON and nothing else:\n\n",
        max_subtasks
    ));
    prompt.push_str("```json\n");
    prompt.push_str("{\n");
    prompt.push_str("  \"subtasks\": [\n");
    prompt.push_str("    {\n");
    prompt.push_str("      \"title\": \"Short imperative title\",\n");
    prompt.push_str("      \"description\": \"What to do and where\",\n");
    prompt.push_str("      \"acceptance_criteria\": [\"Verifiable condition\"]\n");
    prompt.push_str("    }\n");
    prompt.push_str("  ]\n");
    prompt.push_str("}\n");
    prompt.push_str("```\n\n");
    prompt.push_str("Every subtask needs a title, a description and at least one acceptance criterion. ");
    prompt.push_str("Together the subtasks must cover the original acceptance criteria.\n");

    prompt
}

/// Ask the compression model to compact memory frames into one digest
pub fn build_summary_prompt(frames: &[Frame], max_tokens: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str("# MEMORY COMPACTION\n\n");
    prompt.push_str("Compact the memory frames below into a single digest.\n\n");

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str("- Preserve every error and decision, including identifiers and file paths\n");
    prompt.push_str("- Keep observations only when they explain an error or decision\n");
    prompt.push_str("- Discard routine narration\n");
    prompt.push_str("- An existing digest is already compact: do not expand it\n");
    prompt.push_str(&format!(
        "\nRespond with the digest only, at most {} tokens.\n\n",
        max_tokens
    ));

    prompt.push_str("## FRAMES\n\n");
    for frame in frames {
        prompt.push_str(&format!("[{}] {}\n", frame.kind, frame.content));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use unstuck_core::FrameKind;

    fn task() -> Task {
        Task::new("T-9", "Add retry to fetcher")
            .with_description("The fetcher gives up after one failure.")
            .with_acceptance_criteria(["retries 3 times", "tests pass"])
    }

    #[test]
    fn test_prune_prompt_carries_diagnosis_and_budget() {
        let signal = StuckSignal::repetitive_output("last 3 outputs identical");
        let prompt = build_prune_prompt("lots of context", &signal, &task(), 4000);

        assert!(prompt.contains("REPETITIVE_OUTPUT"));
        assert!(prompt.contains("last 3 outputs identical"));
        assert!(prompt.contains("retries 3 times"));
        assert!(prompt.contains("at most 4000 tokens"));
        assert!(prompt.ends_with("lots of context\n"));
    }

    #[test]
    fn test_decompose_prompt_states_range() {
        let signal = StuckSignal::no_progress("3 idle iterations");
        let prompt = build_decompose_prompt(&task(), &signal, 4);

        assert!(prompt.contains("between 2 and 4 subtasks"));
        assert!(prompt.contains("\"acceptance_criteria\""));
        assert!(prompt.contains("Add retry to fetcher"));
    }

    #[test]
    fn test_summary_prompt_lists_frames() {
        let frames = vec![
            Frame::new(FrameKind::Error, "E0502 in fetch.rs"),
            Frame::new(FrameKind::Narration, "looked around"),
        ];
        let prompt = build_summary_prompt(&frames, 500);

        assert!(prompt.contains("[error] E0502 in fetch.rs"));
        assert!(prompt.contains("[narration] looked around"));
    }
}
