//! Per-user conversation state
//!
//! A [`Session`] owns the transcript shown in the chat widget and the API key
//! the user typed into it. Sessions live in memory for the process lifetime.

mod store;

pub use store::{SessionError, SessionSnapshot, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const GREETING: &str = "Hi, I'm a chatbot who can search Arxiv and Wikipedia. How can I help you?";

/// Who wrote a transcript message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Assistant,
    User,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Assistant => "assistant",
            ChatRole::User => "user",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Ordered, append-only message history
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    /// A transcript holding only the assistant greeting
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::new(ChatRole::Assistant, GREETING)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::new(ChatRole::User, content))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::new(ChatRole::Assistant, content))
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Model provider API key. Blank counts as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_present(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// The key, or `None` when unset or blank
    pub fn expose(&self) -> Option<&str> {
        let key = self.0.trim();
        (!key.is_empty()).then_some(key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub transcript: Transcript,
    pub credential: Credential,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transcript: Transcript::new(),
            credential: Credential::default(),
        }
    }

    pub fn with_credential(mut self, key: impl Into<String>) -> Self {
        self.credential = Credential::new(key);
        self
    }

    pub fn set_credential(&mut self, key: impl Into<String>) {
        self.credential = Credential::new(key);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
