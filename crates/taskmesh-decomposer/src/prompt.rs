//! The decomposition prompt.
//!
//! The oracle gets fixed system instructions plus a user message listing the agent
//! channels available in this deployment and a few placeholder examples showing the
//! expected JSON shape.

/// System instructions sent with every decomposition request.
pub const SYSTEM_INSTRUCTIONS: &str = "You are a task decomposition assistant. Your job is to \
identify ALL tasks in the user's prompt and assign each one to the appropriate agent.\n\n\
CRITICAL: If the user mentions MULTIPLE different tasks (like \"do X and Y\"), you MUST create \
separate subtasks for each one.";

const EXAMPLES: &str = r#"Input: "Define TOPIC_X and write PROGRAMMING_TASK_Y"
Output: {"subtasks": [
{"id": 1, "channel": "tasks/text", "sub-task": "Define TOPIC_X", "depends_on": []},
{"id": 2, "channel": "tasks/code", "sub-task": "Write PROGRAMMING_TASK_Y", "depends_on": []}
]}

Input: "Calculate MATH_OPERATION then explain CONCEPT"
Output: {"subtasks": [
{"id": 1, "channel": "tasks/math", "sub-task": "Calculate MATH_OPERATION", "depends_on": []},
{"id": 2, "channel": "tasks/text", "sub-task": "Explain CONCEPT", "depends_on": [1]}
]}

Input: "Write code for TASK_X"
Output: {"subtasks": [
{"id": 1, "channel": "tasks/code", "sub-task": "Write code for TASK_X", "depends_on": []}
]}"#;

/// One-line capability description for an agent type.
pub fn describe_channel(agent_type: &str) -> &'static str {
    match agent_type {
        "text" => "summaries, definitions, explanations, descriptions",
        "code" => "code generation (Python, JavaScript, SQL, any programming)",
        "math" => "calculations, formulas, equations",
        "translate" => "English-Arabic translation",
        _ => "general tasks",
    }
}

/// Builds the user message for `prompt`, advertising `channels`.
pub fn user_message(prompt: &str, channels: &[String]) -> String {
    let catalog: String = channels
        .iter()
        .map(|c| format!("- tasks/{c}: {}\n", describe_channel(c)))
        .collect();

    format!(
        "Task: {prompt}\n\n\
Available agents:\n{catalog}\n\
RULES:\n\
1. Carefully read the ENTIRE prompt - look for words like \"and\", \"also\", \"then\"\n\
2. Each distinct task mentioned gets its own subtask\n\
3. Match each subtask to the correct agent type\n\
4. Copy the user's EXACT wording for each task - DO NOT add examples or values\n\
5. If one task needs the output of another, use depends_on with the prerequisite's id\n\n\
Examples (using placeholders):\n\n{EXAMPLES}\n\n\
Now decompose this task (use the EXACT words from the user's prompt, do NOT substitute with examples):\n\
{prompt}\n\n\
Output ONLY valid JSON:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_lists_channels() {
        let channels = vec!["code".to_string(), "math".to_string()];
        let msg = user_message("Calculate 2+2 then explain", &channels);
        assert!(msg.starts_with("Task: Calculate 2+2 then explain"));
        assert!(msg.contains("- tasks/code: code generation"));
        assert!(msg.contains("- tasks/math: calculations"));
        assert!(!msg.contains("- tasks/translate"));
        assert!(msg.trim_end().ends_with("Output ONLY valid JSON:"));
    }

    #[test]
    fn test_unknown_channel_description() {
        assert_eq!(describe_channel("image"), "general tasks");
    }
}
