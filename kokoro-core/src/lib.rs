//! Kokoro Core - conversation state layer for the Kokoro companion.
//!
//! # Architecture
//!
//! ```text
//!                 SessionController
//!                /    |      |     \
//!               v     v      v      v
//!        Dialogue  Speech  Content  Persistence ── KeyValueStorage
//!        Generator Synth   Filter                  (SQLite / memory)
//!               \     |      |     /
//!                v    v      v    v
//!                   AppStore (RwLock)
//!          conversations · characters · preferences · profile
//!                        |
//!                        v
//!                  HistoryIndex (read-only)
//! ```
//!
//! All mutations are [`store::Action`]s applied by the controller; history
//! queries and statistics borrow the store under its read lock.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod character;
pub mod conversation;
pub mod dialogue;
pub mod emotion;
pub mod history;
pub mod message;
pub mod moderation;
pub mod persistence;
pub mod preferences;
pub mod scenario;
pub mod session;
pub mod speech;
pub mod storage;
pub mod store;

pub use character::{Character, CharacterId, CharacterPatch, CharacterRoster};
pub use conversation::{Conversation, ConversationMetadata, ConversationStore};
pub use dialogue::{DialogueError, DialogueGenerator, DialogueRequest, GeneratedReply};
pub use emotion::Emotion;
pub use history::{HistoryFilter, HistoryIndex, HistoryStats, SortBy};
pub use message::{Message, MessageLog, Sender};
pub use moderation::{ContentFilter, Verdict};
pub use persistence::{LoadReport, Persistence, StateKey};
pub use preferences::{
    ContentFilterLevel, Preferences, Relationship, RelationshipType, SectionPatch, UserProfile,
};
pub use scenario::Scenario;
pub use session::{ControllerOptions, Exchange, SessionController, SessionState, SessionStatus};
pub use speech::{SpeechClip, SpeechRequest, SpeechSynthesizer};
pub use storage::KeyValueStorage;
pub use store::{Action, AppStore, SharedStore};
