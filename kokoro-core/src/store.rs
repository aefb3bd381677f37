//! The application store and its closed set of actions.
//!
//! `AppStore` is an explicit value owned by whoever builds it; there is no
//! global instance. Every mutation is an [`Action`] applied through
//! [`AppStore::apply`]. A failed action leaves the store unchanged.

use chrono::{DateTime, Utc};
use kokoro_common::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::character::{CharacterId, CharacterPatch, CharacterRoster};
use crate::conversation::{Conversation, ConversationStore};
use crate::message::Message;
use crate::persistence::StateKey;
use crate::preferences::{Preferences, RelationshipType, SectionPatch, UserProfile};
use crate::scenario;

/// Store shared between the session controller and read-only views.
pub type SharedStore = Arc<RwLock<AppStore>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStore {
    pub conversations: ConversationStore,
    pub characters: CharacterRoster,
    pub preferences: Preferences,
    pub profile: UserProfile,
    pub active_character: Option<CharacterId>,
}

/// Every mutation the store supports.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StartConversation {
        conversation_id: String,
        character: CharacterId,
        scenario_id: String,
        at: DateTime<Utc>,
    },
    AppendMessage {
        conversation_id: String,
        message: Message,
    },
    ToggleFavorite {
        conversation_id: String,
    },
    RateConversation {
        conversation_id: String,
        rating: u8,
    },
    CloseConversation {
        conversation_id: String,
        at: DateTime<Utc>,
    },
    DeleteConversation {
        conversation_id: String,
    },
    SetActiveCharacter(Option<CharacterId>),
    CustomizeCharacter {
        character: CharacterId,
        patch: CharacterPatch,
    },
    ResetCharacter(CharacterId),
    UpdatePreferences(SectionPatch),
    SetRelationshipType {
        character: CharacterId,
        kind: RelationshipType,
    },
    AdjustRelationship {
        character: CharacterId,
        intimacy_delta: i32,
        trust_delta: i32,
    },
    SetProfileName(String),
}

impl Action {
    /// Start a conversation with a freshly generated id.
    pub fn start(character: CharacterId, scenario_id: impl Into<String>) -> Self {
        Self::StartConversation {
            conversation_id: Uuid::new_v4().to_string(),
            character,
            scenario_id: scenario_id.into(),
            at: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartConversation { .. } => "start_conversation",
            Self::AppendMessage { .. } => "append_message",
            Self::ToggleFavorite { .. } => "toggle_favorite",
            Self::RateConversation { .. } => "rate_conversation",
            Self::CloseConversation { .. } => "close_conversation",
            Self::DeleteConversation { .. } => "delete_conversation",
            Self::SetActiveCharacter(_) => "set_active_character",
            Self::CustomizeCharacter { .. } => "customize_character",
            Self::ResetCharacter(_) => "reset_character",
            Self::UpdatePreferences(_) => "update_preferences",
            Self::SetRelationshipType { .. } => "set_relationship_type",
            Self::AdjustRelationship { .. } => "adjust_relationship",
            Self::SetProfileName(_) => "set_profile_name",
        }
    }

    /// Persisted keys this action can change.
    pub fn touches(&self) -> &'static [StateKey] {
        match self {
            Self::StartConversation { .. } => &[StateKey::Conversations, StateKey::Profile],
            Self::AppendMessage { .. }
            | Self::ToggleFavorite { .. }
            | Self::RateConversation { .. }
            | Self::CloseConversation { .. }
            | Self::DeleteConversation { .. } => &[StateKey::Conversations],
            Self::SetActiveCharacter(_) | Self::SetProfileName(_) => &[StateKey::Profile],
            Self::CustomizeCharacter { .. } | Self::ResetCharacter(_) => &[StateKey::Characters],
            Self::UpdatePreferences(SectionPatch::Privacy(_)) => {
                &[StateKey::Preferences, StateKey::Conversations]
            }
            Self::UpdatePreferences(_)
            | Self::SetRelationshipType { .. }
            | Self::AdjustRelationship { .. } => &[StateKey::Preferences],
        }
    }

    /// Conversation whose in-flight generation must be abandoned before this applies.
    pub fn ends_conversation(&self) -> Option<&str> {
        match self {
            Self::CloseConversation { conversation_id, .. }
            | Self::DeleteConversation { conversation_id } => Some(conversation_id),
            _ => None,
        }
    }
}

impl AppStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, action: Action) -> Result<()> {
        match action {
            Action::StartConversation {
                conversation_id,
                character,
                scenario_id,
                at,
            } => {
                let scenario = scenario::require(&scenario_id)?;
                let conversation =
                    Conversation::new(conversation_id, character, scenario.id, scenario.title, at);
                self.conversations.insert(conversation)?;
                self.active_character = Some(character);
            }
            Action::AppendMessage {
                conversation_id,
                message,
            } => self.conversations.append(&conversation_id, message)?,
            Action::ToggleFavorite { conversation_id } => {
                self.conversations.toggle_favorite(&conversation_id)?;
            }
            Action::RateConversation {
                conversation_id,
                rating,
            } => self.conversations.rate(&conversation_id, rating)?,
            Action::CloseConversation {
                conversation_id,
                at,
            } => self.conversations.close(&conversation_id, at)?,
            Action::DeleteConversation { conversation_id } => {
                self.conversations.delete(&conversation_id)?;
            }
            Action::SetActiveCharacter(character) => self.active_character = character,
            Action::CustomizeCharacter { character, patch } => {
                self.characters.customize(character, &patch)?;
            }
            Action::ResetCharacter(character) => self.characters.reset(character),
            Action::UpdatePreferences(patch) => self.preferences.update_section(&patch)?,
            Action::SetRelationshipType { character, kind } => {
                self.preferences.set_relationship_type(character, kind);
            }
            Action::AdjustRelationship {
                character,
                intimacy_delta,
                trust_delta,
            } => self
                .preferences
                .adjust_relationship(character, intimacy_delta, trust_delta),
            Action::SetProfileName(name) => self.profile.rename(&name)?,
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::Emotion;
    use crate::preferences::AudioPatch;

    fn start(store: &mut AppStore, id: &str) {
        store
            .apply(Action::StartConversation {
                conversation_id: id.into(),
                character: CharacterId::Aoi,
                scenario_id: "cafe".into(),
                at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn test_start_sets_active_character_and_title() {
        let mut store = AppStore::new();
        assert_eq!(store.active_character, None);
        start(&mut store, "c1");
        assert_eq!(store.active_character, Some(CharacterId::Aoi));
        let c = store.conversations.get("c1").unwrap();
        assert_eq!(c.title, "Afternoon at the café");
        assert_eq!(c.scenario_id, "cafe");
    }

    #[test]
    fn test_start_unknown_scenario() {
        let mut store = AppStore::new();
        let err = store.apply(Action::start(CharacterId::Shun, "moon")).unwrap_err();
        assert!(err.is_validation());
        assert!(store.conversations.is_empty());
        assert_eq!(store.active_character, None);
    }

    #[test]
    fn test_toggle_favorite_unknown_leaves_store_unchanged() {
        let mut store = AppStore::new();
        start(&mut store, "c1");
        let before = store.clone();
        let err = store
            .apply(Action::ToggleFavorite {
                conversation_id: "ghost".into(),
            })
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store, before);
    }

    #[test]
    fn test_append_and_delete() {
        let mut store = AppStore::new();
        start(&mut store, "c1");
        store
            .apply(Action::AppendMessage {
                conversation_id: "c1".into(),
                message: Message::character(CharacterId::Aoi, "やあ", Emotion::Happy),
            })
            .unwrap();
        assert_eq!(store.conversations.get("c1").unwrap().messages.len(), 1);
        store
            .apply(Action::DeleteConversation {
                conversation_id: "c1".into(),
            })
            .unwrap();
        assert!(store.conversations.get("c1").is_none());
    }

    #[test]
    fn test_preference_and_relationship_actions() {
        let mut store = AppStore::new();
        store
            .apply(Action::UpdatePreferences(SectionPatch::Audio(AudioPatch {
                voice_enabled: Some(false),
                ..Default::default()
            })))
            .unwrap();
        assert!(!store.preferences.audio.voice_enabled);

        store
            .apply(Action::SetRelationshipType {
                character: CharacterId::Shun,
                kind: RelationshipType::Partner,
            })
            .unwrap();
        store
            .apply(Action::AdjustRelationship {
                character: CharacterId::Shun,
                intimacy_delta: 50,
                trust_delta: -5,
            })
            .unwrap();
        let r = store.preferences.relationship(CharacterId::Shun);
        assert_eq!(r.intimacy_level, 100);
        assert_eq!(r.trust_level, 80);
    }

    #[test]
    fn test_touches_and_ends_conversation() {
        let close = Action::CloseConversation {
            conversation_id: "c1".into(),
            at: Utc::now(),
        };
        assert_eq!(close.ends_conversation(), Some("c1"));
        assert_eq!(close.touches(), &[StateKey::Conversations]);
        assert_eq!(Action::ResetCharacter(CharacterId::Aoi).ends_conversation(), None);
        assert_eq!(close.name(), "close_conversation");
    }

    #[test]
    fn test_set_profile_name() {
        let mut store = AppStore::new();
        store.apply(Action::SetProfileName("Mika".into())).unwrap();
        assert_eq!(store.profile.display_name, "Mika");
        assert!(store.apply(Action::SetProfileName(" ".into())).is_err());
        assert_eq!(store.profile.display_name, "Mika");
    }
}
