//! Zero-shot ReAct agent with tool lookups

mod parser;
mod prompt;
mod react;
mod trace;

pub use parser::{AgentStep, ParseError, ReactOutputParser, FINAL_ANSWER};
pub use prompt::render_prompt;
pub use react::{
    AgentRun, IntermediateStep, ReactAgent, StepAction, DEFAULT_MAX_ITERATIONS,
    FORCED_STOP_OUTPUT, STOP_SEQUENCE,
};
pub use trace::{AgentEvent, CollectingSink, NullSink, TraceSink};
