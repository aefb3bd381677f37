//! User preferences, per-character relationships, and the user profile.
//!
//! Updates are typed patches merged one level deep into a single section;
//! sibling sections are never touched. Numeric fields are clamped on write.
//! The JSON surface (`update_section_json`) rejects unknown sections, unknown
//! fields and invalid enum values with `Error::Validation`, leaving the store
//! unchanged.

use chrono::{DateTime, Utc};
use kokoro_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::character::{clamp_float, clamp_trait, CharacterId};

// ============================================================================
// Audio
// ============================================================================

pub const SPEECH_RATE_RANGE: (f32, f32) = (0.5, 2.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// 0..=100
    pub master_volume: u8,
    pub voice_enabled: bool,
    pub auto_play: bool,
    pub speech_rate: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            master_volume: 80,
            voice_enabled: true,
            auto_play: true,
            speech_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioPatch {
    pub master_volume: Option<i32>,
    pub voice_enabled: Option<bool>,
    pub auto_play: Option<bool>,
    pub speech_rate: Option<f32>,
}

impl AudioSettings {
    fn merged(&self, patch: &AudioPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = patch.master_volume {
            next.master_volume = clamp_trait(v);
        }
        if let Some(v) = patch.voice_enabled {
            next.voice_enabled = v;
        }
        if let Some(v) = patch.auto_play {
            next.auto_play = v;
        }
        if let Some(v) = patch.speech_rate {
            next.speech_rate = clamp_float("audio.speech_rate", v, SPEECH_RATE_RANGE)?;
        }
        Ok(next)
    }
}

// ============================================================================
// Privacy
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilterLevel {
    Off,
    #[default]
    Moderate,
    Strict,
}

impl ContentFilterLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Moderate => "moderate",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub save_history: bool,
    pub content_filter: ContentFilterLevel,
    pub share_analytics: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            save_history: true,
            content_filter: ContentFilterLevel::Moderate,
            share_analytics: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyPatch {
    pub save_history: Option<bool>,
    pub content_filter: Option<ContentFilterLevel>,
    pub share_analytics: Option<bool>,
}

impl PrivacySettings {
    fn merged(&self, patch: &PrivacyPatch) -> Self {
        Self {
            save_history: patch.save_history.unwrap_or(self.save_history),
            content_filter: patch.content_filter.unwrap_or(self.content_filter),
            share_analytics: patch.share_analytics.unwrap_or(self.share_analytics),
        }
    }
}

// ============================================================================
// Relationship
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    #[default]
    Acquaintance,
    Friend,
    CloseFriend,
    Partner,
}

impl RelationshipType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquaintance => "acquaintance",
            Self::Friend => "friend",
            Self::CloseFriend => "close_friend",
            Self::Partner => "partner",
        }
    }

    /// (intimacy, trust) a fresh relationship of this type starts at.
    pub fn default_levels(self) -> (u8, u8) {
        match self {
            Self::Acquaintance => (10, 20),
            Self::Friend => (35, 45),
            Self::CloseFriend => (60, 70),
            Self::Partner => (80, 85),
        }
    }
}

impl FromStr for RelationshipType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "acquaintance" => Ok(Self::Acquaintance),
            "friend" => Ok(Self::Friend),
            "close_friend" => Ok(Self::CloseFriend),
            "partner" => Ok(Self::Partner),
            other => Err(Error::Validation(format!("unknown relationship type '{other}'"))),
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub intimacy_level: u8,
    pub trust_level: u8,
}

impl Relationship {
    pub fn new(kind: RelationshipType) -> Self {
        let (intimacy_level, trust_level) = kind.default_levels();
        Self {
            kind,
            intimacy_level,
            trust_level,
        }
    }

    pub fn adjust(&mut self, intimacy_delta: i32, trust_delta: i32) {
        self.intimacy_level = clamp_trait(i32::from(self.intimacy_level) + intimacy_delta);
        self.trust_level = clamp_trait(i32::from(self.trust_level) + trust_delta);
    }
}

impl Default for Relationship {
    fn default() -> Self {
        Self::new(RelationshipType::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipPatch {
    /// Changing the type replaces the relationship with that type's defaults
    /// before any explicit levels in the same patch are applied.
    #[serde(rename = "type", default)]
    pub kind: Option<RelationshipType>,
    pub intimacy_level: Option<i32>,
    pub trust_level: Option<i32>,
}

impl Relationship {
    fn merged(&self, patch: &RelationshipPatch) -> Self {
        let mut next = match patch.kind {
            Some(kind) if kind != self.kind => Relationship::new(kind),
            _ => *self,
        };
        if let Some(v) = patch.intimacy_level {
            next.intimacy_level = clamp_trait(v);
        }
        if let Some(v) = patch.trust_level {
            next.trust_level = clamp_trait(v);
        }
        next
    }
}

/// One relationship per character, always both present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub aoi: Relationship,
    #[serde(default)]
    pub shun: Relationship,
}

impl Relationships {
    pub fn get(&self, id: CharacterId) -> &Relationship {
        match id {
            CharacterId::Aoi => &self.aoi,
            CharacterId::Shun => &self.shun,
        }
    }

    fn get_mut(&mut self, id: CharacterId) -> &mut Relationship {
        match id {
            CharacterId::Aoi => &mut self.aoi,
            CharacterId::Shun => &mut self.shun,
        }
    }
}

// ============================================================================
// Sections and patches
// ============================================================================

/// Addressable preference sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceSection {
    Audio,
    Privacy,
    Relationship(CharacterId),
}

impl FromStr for PreferenceSection {
    type Err = Error;

    /// Accepts `audio`, `privacy`, `relationship.<character>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "audio" => Ok(Self::Audio),
            "privacy" => Ok(Self::Privacy),
            _ => match s.split_once(|c| c == '.' || c == ':') {
                Some(("relationship", who)) => who.parse().map(Self::Relationship),
                _ => Err(Error::Validation(format!("unknown preference section '{s}'"))),
            },
        }
    }
}

impl fmt::Display for PreferenceSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Privacy => f.write_str("privacy"),
            Self::Relationship(id) => write!(f, "relationship.{id}"),
        }
    }
}

/// A partial update addressed to exactly one section.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionPatch {
    Audio(AudioPatch),
    Privacy(PrivacyPatch),
    Relationship(CharacterId, RelationshipPatch),
}

impl SectionPatch {
    /// Decode an untyped JSON patch for `section`.
    pub fn from_json(section: &str, patch: serde_json::Value) -> Result<Self> {
        let section: PreferenceSection = section.parse()?;
        let invalid = |e: serde_json::Error| Error::Validation(format!("{section}: {e}"));
        Ok(match section {
            PreferenceSection::Audio => Self::Audio(serde_json::from_value(patch).map_err(invalid)?),
            PreferenceSection::Privacy => {
                Self::Privacy(serde_json::from_value(patch).map_err(invalid)?)
            }
            PreferenceSection::Relationship(id) => {
                Self::Relationship(id, serde_json::from_value(patch).map_err(invalid)?)
            }
        })
    }

    pub fn section(&self) -> PreferenceSection {
        match self {
            Self::Audio(_) => PreferenceSection::Audio,
            Self::Privacy(_) => PreferenceSection::Privacy,
            Self::Relationship(id, _) => PreferenceSection::Relationship(*id),
        }
    }
}

// ============================================================================
// Preference store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub privacy: PrivacySettings,
    #[serde(default)]
    pub relationships: Relationships,
}

impl Preferences {
    /// Merge a patch into its section. Computes the new section first, so a
    /// failing patch leaves everything unchanged.
    pub fn update_section(&mut self, patch: &SectionPatch) -> Result<()> {
        match patch {
            SectionPatch::Audio(p) => self.audio = self.audio.merged(p)?,
            SectionPatch::Privacy(p) => self.privacy = self.privacy.merged(p),
            SectionPatch::Relationship(id, p) => {
                let next = self.relationships.get(*id).merged(p);
                *self.relationships.get_mut(*id) = next;
            }
        }
        Ok(())
    }

    pub fn update_section_json(&mut self, section: &str, patch: serde_json::Value) -> Result<()> {
        let patch = SectionPatch::from_json(section, patch)?;
        self.update_section(&patch)
    }

    pub fn relationship(&self, id: CharacterId) -> &Relationship {
        self.relationships.get(id)
    }

    /// Replace the relationship wholesale with the type's defaults.
    pub fn set_relationship_type(&mut self, id: CharacterId, kind: RelationshipType) {
        *self.relationships.get_mut(id) = Relationship::new(kind);
    }

    pub fn adjust_relationship(&mut self, id: CharacterId, intimacy_delta: i32, trust_delta: i32) {
        self.relationships
            .get_mut(id)
            .adjust(intimacy_delta, trust_delta);
    }

    /// Clamp values decoded from storage back into range.
    pub fn normalized(mut self) -> Self {
        self.audio.master_volume = clamp_trait(i32::from(self.audio.master_volume));
        self.audio.speech_rate =
            clamp_float("", self.audio.speech_rate, SPEECH_RATE_RANGE).unwrap_or(1.0);
        for id in CharacterId::ALL {
            let r = self.relationships.get_mut(id);
            r.adjust(0, 0);
        }
        self
    }
}

// ============================================================================
// Profile
// ============================================================================

pub const DISPLAY_NAME_MAX_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            display_name: "You".into(),
            created_at: Utc::now(),
        }
    }
}

impl UserProfile {
    pub fn rename(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("display name must not be empty".into()));
        }
        if name.chars().count() > DISPLAY_NAME_MAX_CHARS {
            return Err(Error::Validation(format!(
                "display name must be at most {DISPLAY_NAME_MAX_CHARS} characters"
            )));
        }
        self.display_name = name.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_keeps_sibling_fields_and_sections() {
        let mut prefs = Preferences::default();
        prefs
            .update_section(&SectionPatch::Audio(AudioPatch {
                master_volume: Some(30),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(prefs.audio.master_volume, 30);
        assert!(prefs.audio.voice_enabled);
        assert_eq!(prefs.audio.speech_rate, 1.0);
        assert_eq!(prefs.privacy, PrivacySettings::default());
    }

    #[test]
    fn test_numeric_clamped_on_write() {
        let mut prefs = Preferences::default();
        prefs
            .update_section_json("audio", json!({"master_volume": 150, "speech_rate": 0.1}))
            .unwrap();
        assert_eq!(prefs.audio.master_volume, 100);
        assert_eq!(prefs.audio.speech_rate, 0.5);
    }

    #[test]
    fn test_invalid_enum_rejected_store_unchanged() {
        let mut prefs = Preferences::default();
        let before = prefs.clone();
        let err = prefs
            .update_section_json(
                "privacy",
                json!({"save_history": false, "content_filter": "extreme"}),
            )
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(prefs, before);
    }

    #[test]
    fn test_unknown_section_and_field() {
        let mut prefs = Preferences::default();
        assert!(prefs
            .update_section_json("graphics", json!({}))
            .unwrap_err()
            .is_validation());
        assert!(prefs
            .update_section_json("audio", json!({"bass_boost": true}))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_section_names() {
        assert_eq!("Audio".parse::<PreferenceSection>().unwrap(), PreferenceSection::Audio);
        assert_eq!(
            "relationship.shun".parse::<PreferenceSection>().unwrap(),
            PreferenceSection::Relationship(CharacterId::Shun)
        );
        assert!("relationship.ren".parse::<PreferenceSection>().is_err());
        assert_eq!(
            PreferenceSection::Relationship(CharacterId::Aoi).to_string(),
            "relationship.aoi"
        );
    }

    #[test]
    fn test_relationship_type_change_replaces_wholesale() {
        let mut prefs = Preferences::default();
        prefs.adjust_relationship(CharacterId::Aoi, 50, 50);
        prefs.set_relationship_type(CharacterId::Aoi, RelationshipType::Friend);
        assert_eq!(
            prefs.relationship(CharacterId::Aoi),
            &Relationship::new(RelationshipType::Friend)
        );
        assert_eq!(prefs.relationship(CharacterId::Shun), &Relationship::default());
    }

    #[test]
    fn test_relationship_patch_via_json() {
        let mut prefs = Preferences::default();
        prefs
            .update_section_json(
                "relationship.shun",
                json!({"type": "close_friend", "trust_level": 99}),
            )
            .unwrap();
        let r = prefs.relationship(CharacterId::Shun);
        assert_eq!(r.kind, RelationshipType::CloseFriend);
        assert_eq!(r.intimacy_level, 60);
        assert_eq!(r.trust_level, 99);
    }

    #[test]
    fn test_adjust_clamps() {
        let mut r = Relationship::new(RelationshipType::Partner);
        r.adjust(100, -200);
        assert_eq!(r.intimacy_level, 100);
        assert_eq!(r.trust_level, 0);
    }

    #[test]
    fn test_profile_rename() {
        let mut profile = UserProfile::default();
        profile.rename("  Hana ").unwrap();
        assert_eq!(profile.display_name, "Hana");
        assert!(profile.rename("").is_err());
        assert!(profile.rename(&"x".repeat(41)).is_err());
    }

    #[test]
    fn test_partial_json_decodes_with_defaults() {
        let prefs: Preferences = serde_json::from_value(json!({"audio": {
            "master_volume": 10, "voice_enabled": false, "auto_play": false, "speech_rate": 1.5
        }}))
        .unwrap();
        assert_eq!(prefs.audio.master_volume, 10);
        assert_eq!(prefs.privacy, PrivacySettings::default());
    }
}
