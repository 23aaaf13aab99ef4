//! Parser for the ReAct text protocol
//!
//! A model turn either names a tool:
//!
//! ```text
//! Thought: I should look this up
//! Action: wikipedia
//! Action Input: capital of France
//! ```
//!
//! or ends the run with `Final Answer: ...`.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const FINAL_ANSWER: &str = "Final Answer:";

static ACTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
        .expect("valid regex")
});
static ACTION_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Action\s*\d*\s*:").expect("valid regex"));
static ACTION_INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Action\s*\d*\s*Input\s*\d*\s*:").expect("valid regex"));

/// What the model asked for in one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    Finish(String),
    Action { tool: String, input: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Parsing LLM output produced both a final answer and a parse-able action: {0}")]
    ActionAndFinalAnswer(String),
    #[error("Could not parse LLM output: `{0}`")]
    MissingAction(String),
    #[error("Could not parse LLM output: `{0}`")]
    MissingActionInput(String),
    #[error("Could not parse LLM output: `{0}`")]
    Unrecognized(String),
}

impl ParseError {
    /// Text fed back to the model as the observation when recovery is on
    pub fn observation(&self) -> &'static str {
        match self {
            ParseError::MissingAction(_) => "Invalid Format: Missing 'Action:' after 'Thought:'",
            ParseError::MissingActionInput(_) => {
                "Invalid Format: Missing 'Action Input:' after 'Action:'"
            }
            ParseError::ActionAndFinalAnswer(_) | ParseError::Unrecognized(_) => {
                "Invalid Format: Invalid or incomplete response"
            }
        }
    }

    /// The model output that failed to parse
    pub fn llm_output(&self) -> &str {
        match self {
            ParseError::ActionAndFinalAnswer(text)
            | ParseError::MissingAction(text)
            | ParseError::MissingActionInput(text)
            | ParseError::Unrecognized(text) => text,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReactOutputParser;

impl ReactOutputParser {
    pub fn parse(&self, text: &str) -> Result<AgentStep, ParseError> {
        let answer_at = text.find(FINAL_ANSWER);

        if let Some(caps) = ACTION_RE.captures(text) {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
            if let Some(answer_at) = answer_at {
                // An answer followed by a hallucinated action still counts as the answer
                if answer_at < whole {
                    let start = answer_at + FINAL_ANSWER.len();
                    let end = text[start..]
                        .find("\n\n")
                        .map(|i| start + i)
                        .unwrap_or(text.len());
                    return Ok(AgentStep::Finish(text[start..end].trim().to_string()));
                }
                return Err(ParseError::ActionAndFinalAnswer(text.to_string()));
            }

            let tool = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let input = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            return Ok(AgentStep::Action {
                tool: tool.to_string(),
                input: clean_input(input),
            });
        }

        if answer_at.is_some() {
            let answer = text
                .rsplit(FINAL_ANSWER)
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            return Ok(AgentStep::Finish(answer));
        }

        if !ACTION_ONLY_RE.is_match(text) {
            Err(ParseError::MissingAction(text.to_string()))
        } else if !ACTION_INPUT_RE.is_match(text) {
            Err(ParseError::MissingActionInput(text.to_string()))
        } else {
            Err(ParseError::Unrecognized(text.to_string()))
        }
    }
}

/// Reasoning text before the action or answer, without the `Thought:` tag
pub fn thought_of(text: &str) -> String {
    let cut = [
        ACTION_ONLY_RE.find(text).map(|m| m.start()),
        text.find(FINAL_ANSWER),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(text.len());

    let thought = text[..cut].trim();
    thought
        .strip_prefix("Thought:")
        .unwrap_or(thought)
        .trim()
        .to_string()
}

fn clean_input(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
