//! Messages and the append-only per-conversation message log.

use chrono::{DateTime, Utc};
use kokoro_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::character::CharacterId;
use crate::emotion::Emotion;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Sender {
    User,
    Character(CharacterId),
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Character(id) => id.as_str(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        sender.as_str().to_string()
    }
}

impl TryFrom<String> for Sender {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value == "user" {
            return Ok(Self::User);
        }
        value.parse().map(Self::Character)
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single utterance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub emotion: Emotion,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            sender: Sender::User,
            timestamp: Utc::now(),
            emotion: Emotion::Neutral,
        }
    }

    pub fn character(id: CharacterId, text: impl Into<String>, emotion: Emotion) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            sender: Sender::Character(id),
            timestamp: Utc::now(),
            emotion,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Ordered, append-only sequence of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Rejects blank text and ids already present in this log.
    pub fn append(&mut self, message: Message) -> Result<&Message> {
        if message.text.trim().is_empty() {
            return Err(Error::Validation("message text must not be empty".into()));
        }
        if message.id.is_empty() {
            return Err(Error::Validation("message id must not be empty".into()));
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(Error::Validation(format!(
                "message id '{}' already exists in this conversation",
                message.id
            )));
        }
        self.messages.push(message);
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn first_from_user(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.sender.is_user())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}

impl IntoIterator for MessageLog {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
