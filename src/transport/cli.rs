//! Terminal front-end

use crate::agent::{AgentEvent, TraceSink};
use crate::config::{Config, API_KEY_ENV};
use crate::orchestrator::{ChatOrchestrator, ChatView, CycleOutcome};
use crate::session::{ChatRole, Session};
use anyhow::Result;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const PREVIEW_CHARS: usize = 120;

/// Prints agent progress as dimmed lines
struct TerminalSink;

impl TraceSink for TerminalSink {
    fn on_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::Thought { text } => println!("  {} {}", "thought:".dimmed(), text.dimmed()),
            AgentEvent::ToolStart { tool, input } => {
                println!("  {} {}({})", "→".cyan(), tool.cyan(), input)
            }
            AgentEvent::ToolEnd {
                output, success, ..
            } => {
                let preview = crate::tools::truncate_chars(&output.replace('\n', " "), PREVIEW_CHARS);
                if success {
                    println!("  {} {}", "←".green(), preview.dimmed());
                } else {
                    println!("  {} {}", "←".yellow(), preview.yellow());
                }
            }
            AgentEvent::ParseError { observation, .. } => {
                println!("  {} {}", "!".yellow(), observation.yellow())
            }
            AgentEvent::Token { .. } | AgentEvent::Finish { .. } => {}
        }
    }
}

struct TerminalView {
    sink: Arc<TerminalSink>,
    /// The user's own input is already on screen
    echo_user: bool,
}

impl ChatView for TerminalView {
    fn render(&self, role: ChatRole, text: &str) {
        match role {
            ChatRole::Assistant => println!("\n{} {}\n", "assistant:".bold().green(), text),
            ChatRole::User if self.echo_user => println!("{} {}", "you:".bold().cyan(), text),
            ChatRole::User => {}
        }
    }

    fn warn(&self, text: &str) {
        eprintln!("{}", text.yellow());
    }

    fn trace_sink(&self) -> Arc<dyn TraceSink> {
        self.sink.clone()
    }
}

/// Credential from `--api-key`, else from the environment
fn resolve_api_key(api_key: Option<String>) -> Option<String> {
    pick_api_key(api_key, std::env::var(API_KEY_ENV).ok())
}

/// The flag when non-blank, otherwise the environment value when non-blank
fn pick_api_key(flag: Option<String>, env: Option<String>) -> Option<String> {
    let present = |k: &String| !k.trim().is_empty();
    flag.filter(present).or(env.filter(present))
}

fn new_session(api_key: Option<String>) -> Session {
    let mut session = Session::new();
    if let Some(key) = resolve_api_key(api_key) {
        session.set_credential(key);
    }
    session
}

/// Interactive chat loop on stdin
pub async fn run_chat(config: Config, api_key: Option<String>) -> Result<()> {
    let orchestrator = ChatOrchestrator::from_config(&config)?;
    let mut session = new_session(api_key);
    let view = TerminalView {
        sink: Arc::new(TerminalSink),
        echo_user: false,
    };

    println!("{}", "scout: chat with arXiv & Wikipedia".bold());
    println!("Type 'exit' or 'quit' to exit\n");
    if !session.credential.is_present() {
        println!(
            "{}\n",
            format!("No API key: pass --api-key or set {}", API_KEY_ENV).yellow()
        );
    }
    orchestrator.render_history(&session, &view);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!();
            break;
        }
        let input = input.trim();

        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        match orchestrator.submit(&mut session, input, &view).await {
            Ok(_) => {}
            Err(e) => eprintln!("{} {:#}\n", "Error:".red(), e),
        }
    }

    Ok(())
}

/// Answer a single question and exit
pub async fn run_ask(config: Config, message: &str, api_key: Option<String>) -> Result<()> {
    let orchestrator = ChatOrchestrator::from_config(&config)?;
    let mut session = new_session(api_key);
    let view = TerminalView {
        sink: Arc::new(TerminalSink),
        echo_user: true,
    };

    match orchestrator.submit(&mut session, message, &view).await? {
        CycleOutcome::Replied(_) => Ok(()),
        CycleOutcome::Ignored => anyhow::bail!("Nothing to ask: the message is empty"),
        CycleOutcome::MissingCredential => {
            anyhow::bail!("No Groq API key: pass --api-key or set {}", API_KEY_ENV)
        }
    }
}
