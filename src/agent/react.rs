//! ReAct reasoning loop

use super::parser::{thought_of, AgentStep, ReactOutputParser};
use super::prompt::render_prompt;
use super::trace::{AgentEvent, TraceSink};
use crate::llm::{LlmProvider, Message, StreamCallback, StreamEvent, TokenUsage};
use crate::tools::ToolRegistry;
use anyhow::Result;
use std::sync::Arc;

/// Generation stops here so the model never writes its own observations
pub const STOP_SEQUENCE: &str = "\nObservation:";

pub const FORCED_STOP_OUTPUT: &str = "Agent stopped due to iteration limit or time limit.";

pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// What a completed step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Tool { name: String, input: String },
    /// Model output could not be parsed and the error was fed back
    InvalidFormat,
}

/// One action/observation pair, kept for the scratchpad
#[derive(Debug, Clone)]
pub struct IntermediateStep {
    /// Raw model output that produced this step
    pub log: String,
    pub action: StepAction,
    pub observation: String,
}

/// Result of a full agent run
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub output: String,
    pub steps: Vec<IntermediateStep>,
    pub usage: TokenUsage,
    /// True when the iteration bound ended the run
    pub stopped_early: bool,
}

/// Zero-shot ReAct agent over a model client and a tool registry
pub struct ReactAgent {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    parser: ReactOutputParser,
    max_iterations: usize,
    handle_parsing_errors: bool,
}

impl ReactAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            parser: ReactOutputParser,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            handle_parsing_errors: true,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Feed malformed output back to the model instead of failing the run
    pub fn with_parse_error_recovery(mut self, enabled: bool) -> Self {
        self.handle_parsing_errors = enabled;
        self
    }

    fn scratchpad(steps: &[IntermediateStep]) -> String {
        steps
            .iter()
            .map(|s| format!("{}\nObservation: {}\nThought: ", s.log, s.observation))
            .collect()
    }

    /// Answer `question`, emitting trace events to `sink` as the run progresses
    pub async fn run(&self, question: &str, sink: Arc<dyn TraceSink>) -> Result<AgentRun> {
        let definitions = self.tools.definitions();
        let stop = vec![STOP_SEQUENCE.to_string()];
        let mut steps: Vec<IntermediateStep> = Vec::new();
        let mut usage = TokenUsage::default();

        tracing::info!(
            provider = self.llm.name(),
            model = self.llm.model(),
            max_iterations = self.max_iterations,
            "Agent run started"
        );

        for iteration in 0..self.max_iterations {
            let prompt = render_prompt(&definitions, question, &Self::scratchpad(&steps));
            let messages = vec![Message::user(prompt)];

            tracing::debug!(
                provider = self.llm.name(),
                model = self.llm.model(),
                messages = messages.len(),
                iteration,
                "Calling model"
            );

            let token_sink = Arc::clone(&sink);
            let callback: StreamCallback = Box::new(move |event| match event {
                StreamEvent::TextDelta(text) => token_sink.on_event(AgentEvent::Token { text }),
                StreamEvent::Error(e) => tracing::warn!("Stream error: {}", e),
                StreamEvent::Done => {}
            });
            let response = self.llm.chat_streaming(&messages, &stop, callback).await?;
            if let Some(u) = &response.usage {
                usage.add(u);
            }

            // Providers that ignore stop sequences still get cut at the first observation
            let text = match response.text.find(STOP_SEQUENCE) {
                Some(idx) => response.text[..idx].to_string(),
                None => response.text,
            };

            let thought = thought_of(&text);
            if !thought.is_empty() {
                sink.on_event(AgentEvent::Thought { text: thought });
            }

            match self.parser.parse(&text) {
                Ok(AgentStep::Finish(output)) => {
                    tracing::info!(iterations = iteration + 1, "Agent finished");
                    sink.on_event(AgentEvent::Finish {
                        output: output.clone(),
                    });
                    return Ok(AgentRun {
                        output,
                        steps,
                        usage,
                        stopped_early: false,
                    });
                }
                Ok(AgentStep::Action { tool, input }) => {
                    sink.on_event(AgentEvent::ToolStart {
                        tool: tool.clone(),
                        input: input.clone(),
                    });
                    let result = self.tools.execute(&tool, &input).await;
                    sink.on_event(AgentEvent::ToolEnd {
                        tool: tool.clone(),
                        output: result.output.clone(),
                        success: result.success,
                    });
                    steps.push(IntermediateStep {
                        log: text,
                        action: StepAction::Tool { name: tool, input },
                        observation: result.output,
                    });
                }
                Err(e) if self.handle_parsing_errors => {
                    let observation = e.observation().to_string();
                    tracing::debug!(iteration, "Recovering from malformed output: {}", e);
                    sink.on_event(AgentEvent::ParseError {
                        message: e.to_string(),
                        observation: observation.clone(),
                    });
                    steps.push(IntermediateStep {
                        log: text,
                        action: StepAction::InvalidFormat,
                        observation,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            max_iterations = self.max_iterations,
            "Agent reached iteration limit"
        );
        sink.on_event(AgentEvent::Finish {
            output: FORCED_STOP_OUTPUT.to_string(),
        });
        Ok(AgentRun {
            output: FORCED_STOP_OUTPUT.to_string(),
            steps,
            usage,
            stopped_early: true,
        })
    }
}
