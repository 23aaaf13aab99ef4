//! Chat orchestration: one user submission to one reply
//!
//! The orchestrator owns no state of its own. Each call to
//! [`ChatOrchestrator::submit`] works on the caller's [`Session`] and reports
//! back through a [`ChatView`], which is how the browser widget and the
//! terminal front-end plug in.

use crate::agent::{ReactAgent, TraceSink};
use crate::config::{AgentConfig, Config};
use crate::llm::{GroqFactory, ProviderFactory};
use crate::session::{ChatRole, Session};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

pub const MISSING_CREDENTIAL_WARNING: &str = "⚠️ Please enter your Groq API Key in the sidebar.";

/// Output surface for a chat cycle
pub trait ChatView: Send + Sync {
    /// Show a transcript message
    fn render(&self, role: ChatRole, text: &str);

    /// Show a non-fatal notice that is not part of the transcript
    fn warn(&self, text: &str);

    /// Where the agent's intermediate events go while it runs
    fn trace_sink(&self) -> Arc<dyn TraceSink>;
}

/// How a submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Blank input, nothing happened
    Ignored,
    /// Input recorded, no credential to answer with
    MissingCredential,
    Replied(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    AwaitingCredential,
    Invoking,
    Rendered,
}

fn transition(session: Uuid, from: CycleState, to: CycleState) {
    tracing::debug!(session = %session, ?from, ?to, "Cycle state changed");
}

pub struct ChatOrchestrator {
    providers: Arc<dyn ProviderFactory>,
    tools: Arc<ToolRegistry>,
    agent_config: AgentConfig,
}

impl ChatOrchestrator {
    pub fn new(
        providers: Arc<dyn ProviderFactory>,
        tools: Arc<ToolRegistry>,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            providers,
            tools,
            agent_config,
        }
    }

    /// Groq-backed orchestrator with the arXiv and Wikipedia tools
    pub fn from_config(config: &Config) -> Result<Self> {
        let tools = ToolRegistry::with_defaults(&config.tools)
            .context("Failed to build the tool registry")?;
        Ok(Self::new(
            Arc::new(GroqFactory::new(config.llm.clone())),
            Arc::new(tools),
            config.agent.clone(),
        ))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Render every transcript message in order
    pub fn render_history(&self, session: &Session, view: &dyn ChatView) {
        for message in session.transcript.iter() {
            view.render(message.role, &message.content);
        }
    }

    /// Run one cycle for `text`
    ///
    /// On error the user message stays in the transcript and no assistant
    /// message is added, so the session can simply be retried.
    pub async fn submit(
        &self,
        session: &mut Session,
        text: &str,
        view: &dyn ChatView,
    ) -> Result<CycleOutcome> {
        if text.trim().is_empty() {
            return Ok(CycleOutcome::Ignored);
        }

        session.transcript.push_user(text);
        view.render(ChatRole::User, text);
        transition(session.id, CycleState::Idle, CycleState::AwaitingCredential);

        let Some(key) = session.credential.expose() else {
            tracing::info!(session = %session.id, "No API key set, reply skipped");
            view.warn(MISSING_CREDENTIAL_WARNING);
            transition(session.id, CycleState::AwaitingCredential, CycleState::Idle);
            return Ok(CycleOutcome::MissingCredential);
        };

        let llm = self.providers.create(key)?;
        let agent = ReactAgent::new(llm, Arc::clone(&self.tools))
            .with_max_iterations(self.agent_config.max_iterations)
            .with_parse_error_recovery(self.agent_config.handle_parsing_errors);
        transition(session.id, CycleState::AwaitingCredential, CycleState::Invoking);

        let run = match agent.run(text, view.trace_sink()).await {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(session = %session.id, "Agent run failed: {:#}", e);
                transition(session.id, CycleState::Invoking, CycleState::Idle);
                return Err(e);
            }
        };

        tracing::info!(
            session = %session.id,
            steps = run.steps.len(),
            total_tokens = run.usage.total_tokens,
            stopped_early = run.stopped_early,
            "Reply ready"
        );
        session.transcript.push_assistant(run.output.clone());
        view.render(ChatRole::Assistant, &run.output);
        transition(session.id, CycleState::Invoking, CycleState::Rendered);
        transition(session.id, CycleState::Rendered, CycleState::Idle);

        Ok(CycleOutcome::Replied(run.output))
    }
}
