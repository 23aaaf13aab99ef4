//! Zero-shot ReAct prompt

use crate::tools::ToolDefinition;

const PREFIX: &str =
    "Answer the following questions as best you can. You have access to the following tools:";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

const SUFFIX: &str = "Begin!

Question: {input}
Thought:{agent_scratchpad}";

/// Render the full prompt for one model call
///
/// Tools are offered purely by name and description; the model picks one
/// from the description alone.
pub fn render_prompt(tools: &[ToolDefinition], question: &str, scratchpad: &str) -> String {
    let tool_strings = tools
        .iter()
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    let tool_names = tools
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let format_instructions = FORMAT_INSTRUCTIONS.replace("{tool_names}", &tool_names);
    // The question goes in last so braces inside it are never treated as placeholders
    let suffix = SUFFIX
        .replace("{agent_scratchpad}", scratchpad)
        .replacen("{input}", question, 1);

    [PREFIX, &tool_strings, &format_instructions, &suffix].join("\n\n")
}
