//! Conversations and the conversation collection (the message store).

use chrono::{DateTime, Utc};
use kokoro_common::util::{squash_whitespace, truncate_with_ellipsis};
use kokoro_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::character::CharacterId;
use crate::emotion::Emotion;
use crate::message::{Message, MessageLog, Sender};

/// Summaries are the first user message cut to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 80;

pub const RATING_MIN: u8 = 1;
pub const RATING_MAX: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
    /// Emotions of character replies, in order.
    #[serde(default)]
    pub emotional_arc: Vec<Emotion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub character_id: CharacterId,
    pub scenario_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub messages: MessageLog,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub rating: Option<u8>,
    pub metadata: ConversationMetadata,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        character_id: CharacterId,
        scenario_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            character_id,
            scenario_id: scenario_id.into(),
            title: title.into(),
            summary: None,
            messages: MessageLog::new(),
            start_time: now,
            end_time: None,
            is_favorite: false,
            rating: None,
            metadata: ConversationMetadata {
                message_count: 0,
                last_activity: now,
                emotional_arc: Vec::new(),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Append a message and refresh metadata.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::InvalidState(format!(
                "conversation '{}' is closed",
                self.id
            )));
        }
        if let Sender::Character(id) = message.sender {
            if id != self.character_id {
                return Err(Error::Validation(format!(
                    "conversation '{}' is with {}, not {}",
                    self.id, self.character_id, id
                )));
            }
        }

        let appended = self.messages.append(message)?;
        let (sender, emotion, timestamp) = (appended.sender, appended.emotion, appended.timestamp);

        if sender.is_user() && self.summary.is_none() {
            self.summary = Some(summarize(&appended.text));
        }
        if !sender.is_user() {
            self.metadata.emotional_arc.push(emotion);
        }
        self.metadata.message_count = self.messages.len();
        if timestamp > self.metadata.last_activity {
            self.metadata.last_activity = timestamp;
        }
        Ok(())
    }

    /// Replay a decoded message log through the append rules and recompute
    /// metadata. Returns the number of messages that had to be dropped.
    fn rebuilt(mut self) -> (Self, usize) {
        let decoded = std::mem::take(&mut self.messages);
        let mut dropped = 0;
        for message in decoded {
            let foreign = matches!(message.sender, Sender::Character(id) if id != self.character_id);
            if foreign || self.messages.append(message).is_err() {
                dropped += 1;
            }
        }

        self.metadata.message_count = self.messages.len();
        self.metadata.emotional_arc = self
            .messages
            .iter()
            .filter(|m| !m.sender.is_user())
            .map(|m| m.emotion)
            .collect();
        self.metadata.last_activity = self
            .messages
            .iter()
            .map(|m| m.timestamp)
            .fold(self.start_time, |latest, t| latest.max(t));
        if self.summary.is_none() {
            self.summary = self.messages.first_from_user().map(|m| summarize(&m.text));
        }
        (self, dropped)
    }

    /// Close the session. Closing twice keeps the first end time.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.end_time.is_none() {
            self.end_time = Some(at);
        }
    }

    /// The message a reply would answer, if the conversation ends on one.
    pub fn trailing_user_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.sender.is_user())
    }
}

fn summarize(text: &str) -> String {
    truncate_with_ellipsis(&squash_whitespace(text), SUMMARY_MAX_CHARS)
}

/// Collection of conversations in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conversation: Conversation) -> Result<()> {
        if conversation.id.trim().is_empty() {
            return Err(Error::Validation("conversation id must not be empty".into()));
        }
        if self.get(&conversation.id).is_some() {
            return Err(Error::Validation(format!(
                "conversation '{}' already exists",
                conversation.id
            )));
        }
        self.conversations.push(conversation);
        Ok(())
    }

    /// Re-validate a decoded collection. Conversations with a blank or repeated
    /// id are skipped, message logs are replayed and metadata is recomputed.
    /// Returns one line per repair.
    pub fn normalized(self) -> (Self, Vec<String>) {
        let mut store = Self::new();
        let mut repairs = Vec::new();
        for conversation in self.conversations {
            let (conversation, dropped) = conversation.rebuilt();
            let id = conversation.id.clone();
            match store.insert(conversation) {
                Ok(()) if dropped > 0 => repairs.push(format!(
                    "conversation '{id}': dropped {dropped} invalid message(s)"
                )),
                Ok(()) => {}
                Err(e) => repairs.push(format!("skipped conversation: {e}")),
            }
        }
        (store, repairs)
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Conversation> {
        self.get(id).ok_or_else(|| not_found(id))
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))
    }

    pub fn append(&mut self, conversation_id: &str, message: Message) -> Result<()> {
        self.require_mut(conversation_id)?.append(message)
    }

    /// Flip the favorite flag and return the new value.
    pub fn toggle_favorite(&mut self, id: &str) -> Result<bool> {
        let conversation = self.require_mut(id)?;
        conversation.is_favorite = !conversation.is_favorite;
        Ok(conversation.is_favorite)
    }

    pub fn rate(&mut self, id: &str, rating: u8) -> Result<()> {
        if !(RATING_MIN..=RATING_MAX).contains(&rating) {
            return Err(Error::Validation(format!(
                "rating must be between {RATING_MIN} and {RATING_MAX}, got {rating}"
            )));
        }
        self.require_mut(id)?.rating = Some(rating);
        Ok(())
    }

    pub fn close(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.require_mut(id)?.close(at);
        Ok(())
    }

    /// Remove a conversation and all of its messages.
    pub fn delete(&mut self, id: &str) -> Result<Conversation> {
        let index = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        Ok(self.conversations.remove(index))
    }

    pub fn as_slice(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Conversation> {
        self.conversations.iter()
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("conversation '{id}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conversation(id: &str) -> Conversation {
        Conversation::new(id, CharacterId::Aoi, "cafe", "Afternoon at the café", Utc::now())
    }

    #[test]
    fn test_append_updates_metadata() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        let later = Utc::now() + Duration::seconds(5);
        store
            .append("c1", Message::user("Hello there").with_timestamp(later))
            .unwrap();
        store
            .append(
                "c1",
                Message::character(CharacterId::Aoi, "Hi!", Emotion::Happy)
                    .with_timestamp(later + Duration::seconds(1)),
            )
            .unwrap();

        let c = store.get("c1").unwrap();
        assert_eq!(c.metadata.message_count, 2);
        assert_eq!(c.metadata.emotional_arc, vec![Emotion::Happy]);
        assert_eq!(c.metadata.last_activity, later + Duration::seconds(1));
        assert_eq!(c.summary.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_summary_truncated() {
        let mut c = conversation("c1");
        c.append(Message::user("あ".repeat(100))).unwrap();
        let summary = c.summary.unwrap();
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_append_unknown_conversation() {
        let mut store = ConversationStore::new();
        let err = store.append("nope", Message::user("hi")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_append_wrong_character_rejected() {
        let mut c = conversation("c1");
        let err = c
            .append(Message::character(CharacterId::Shun, "hey", Emotion::Neutral))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(c.messages.is_empty());
    }

    #[test]
    fn test_closed_conversation_rejects_append() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        store.close("c1", Utc::now()).unwrap();
        let err = store.append("c1", Message::user("hi")).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_close_keeps_first_end_time() {
        let mut c = conversation("c1");
        let first = Utc::now();
        c.close(first);
        c.close(first + Duration::hours(1));
        assert_eq!(c.end_time, Some(first));
    }

    #[test]
    fn test_toggle_favorite_and_unknown() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        assert!(store.toggle_favorite("c1").unwrap());
        assert!(!store.toggle_favorite("c1").unwrap());

        let before = store.clone();
        assert!(store.toggle_favorite("ghost").unwrap_err().is_not_found());
        assert_eq!(store, before);
    }

    #[test]
    fn test_rating_bounds() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        assert!(store.rate("c1", 0).unwrap_err().is_validation());
        assert!(store.rate("c1", 6).unwrap_err().is_validation());
        store.rate("c1", 4).unwrap();
        assert_eq!(store.get("c1").unwrap().rating, Some(4));
    }

    #[test]
    fn test_duplicate_conversation_id() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        assert!(store.insert(conversation("c1")).unwrap_err().is_validation());
    }

    #[test]
    fn test_delete_cascades() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        store.append("c1", Message::user("hi")).unwrap();
        let removed = store.delete("c1").unwrap();
        assert_eq!(removed.messages.len(), 1);
        assert!(store.is_empty());
        assert!(store.delete("c1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_trailing_user_message() {
        let mut c = conversation("c1");
        assert!(c.trailing_user_message().is_none());
        c.append(Message::user("question?")).unwrap();
        assert_eq!(c.trailing_user_message().unwrap().text, "question?");
        c.append(Message::character(CharacterId::Aoi, "answer", Emotion::Thinking))
            .unwrap();
        assert!(c.trailing_user_message().is_none());
    }

    #[test]
    fn test_normalized_repairs_decoded_store() {
        let start = Utc::now();
        let hello = Message::user("  Hello\n  there ")
            .with_id("m1")
            .with_timestamp(start + Duration::seconds(3));
        let reply = Message::character(CharacterId::Aoi, "Hi!", Emotion::Happy)
            .with_id("m2")
            .with_timestamp(start + Duration::seconds(4));
        let stray = Message::character(CharacterId::Shun, "Yo.", Emotion::Neutral).with_id("m3");

        let mut c1 = conversation("c1");
        c1.start_time = start;
        c1.messages =
            serde_json::from_value(serde_json::json!([hello, hello, reply, stray])).unwrap();
        c1.metadata.message_count = 0;
        let store = ConversationStore {
            conversations: vec![c1, conversation("c1"), conversation(" ")],
        };

        let (store, repairs) = store.normalized();
        assert_eq!(store.len(), 1);
        assert_eq!(repairs.len(), 3);
        assert!(repairs[0].contains("dropped 2"));

        let c = store.get("c1").unwrap();
        let ids: Vec<_> = c.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(c.metadata.message_count, 2);
        assert_eq!(c.metadata.emotional_arc, vec![Emotion::Happy]);
        assert_eq!(c.metadata.last_activity, start + Duration::seconds(4));
        assert_eq!(c.summary.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_normalized_keeps_valid_store() {
        let mut store = ConversationStore::new();
        store.insert(conversation("c1")).unwrap();
        store.append("c1", Message::user("hi")).unwrap();
        store.close("c1", Utc::now()).unwrap();
        store.insert(conversation("c2")).unwrap();

        let (normalized, repairs) = store.clone().normalized();
        assert!(repairs.is_empty());
        assert_eq!(normalized, store);
    }
}
