//! scout: chat with arXiv and Wikipedia through a ReAct agent
//!
//! This library provides:
//! - An OpenAI-compatible streaming chat client (Groq by default)
//! - arXiv and Wikipedia lookup tools with bounded output
//! - A zero-shot ReAct agent with live trace events
//! - Per-session chat orchestration
//! - A browser chat widget over HTTP and a terminal front-end

pub mod agent;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use orchestrator::{ChatOrchestrator, ChatView, CycleOutcome};
