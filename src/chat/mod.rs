//! Chat with the remote model backend
//!
//! `ChatGateway` owns one `ConversationSession` and turns user messages
//! into whole or streamed replies.

mod gateway;
pub mod stream;

use serde::{Deserialize, Serialize};

pub use gateway::{ChatGateway, ChatReply, ChatStream, Workspace};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered message history of one conversation
///
/// Messages are only ever appended; callers get copies.
#[derive(Debug, Default)]
pub struct ConversationSession {
    messages: Vec<Message>,
}

impl ConversationSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what the user sent
    pub fn append_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Record a complete assistant reply
    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// Copy of the history in conversational order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
