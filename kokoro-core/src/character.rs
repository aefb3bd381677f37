//! The two predefined companion characters and their customization.
//!
//! Characters are reference data: they are never created or destroyed at
//! runtime, only customized or reset. Every numeric field clamps to its
//! documented range after any update.

use kokoro_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identity
// ============================================================================

/// Closed set of character identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterId {
    Aoi,
    Shun,
}

impl CharacterId {
    pub const ALL: [CharacterId; 2] = [Self::Aoi, Self::Shun];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aoi => "aoi",
            Self::Shun => "shun",
        }
    }
}

impl FromStr for CharacterId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "aoi" => Ok(Self::Aoi),
            "shun" => Ok(Self::Shun),
            other => Err(Error::Validation(format!("unknown character '{other}'"))),
        }
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Personality
// ============================================================================

pub const TRAIT_MIN: i32 = 0;
pub const TRAIT_MAX: i32 = 100;

/// Clamp a raw trait value into 0..=100.
pub fn clamp_trait(value: i32) -> u8 {
    value.clamp(TRAIT_MIN, TRAIT_MAX) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityTraits {
    pub kindness: u8,
    pub humor: u8,
    pub curiosity: u8,
    pub energy: u8,
    pub shyness: u8,
}

/// Partial personality update. Values outside 0..=100 are clamped, not rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonalityPatch {
    pub kindness: Option<i32>,
    pub humor: Option<i32>,
    pub curiosity: Option<i32>,
    pub energy: Option<i32>,
    pub shyness: Option<i32>,
}

impl PersonalityPatch {
    /// Set a single trait by name, as the CLI's `trait=value` pairs do.
    pub fn set(&mut self, name: &str, value: i32) -> Result<()> {
        let slot = match name.trim().to_lowercase().as_str() {
            "kindness" => &mut self.kindness,
            "humor" => &mut self.humor,
            "curiosity" => &mut self.curiosity,
            "energy" => &mut self.energy,
            "shyness" => &mut self.shyness,
            other => return Err(Error::Validation(format!("unknown personality trait '{other}'"))),
        };
        *slot = Some(value);
        Ok(())
    }
}

impl PersonalityTraits {
    pub fn apply(&mut self, patch: &PersonalityPatch) {
        let fields = [
            (&mut self.kindness, patch.kindness),
            (&mut self.humor, patch.humor),
            (&mut self.curiosity, patch.curiosity),
            (&mut self.energy, patch.energy),
            (&mut self.shyness, patch.shyness),
        ];
        for (field, value) in fields {
            if let Some(v) = value {
                *field = clamp_trait(v);
            }
        }
    }

    /// Named view used by prompt building and display.
    pub fn named(&self) -> [(&'static str, u8); 5] {
        [
            ("kindness", self.kindness),
            ("humor", self.humor),
            ("curiosity", self.curiosity),
            ("energy", self.energy),
            ("shyness", self.shyness),
        ]
    }
}

// ============================================================================
// Appearance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub hair_color: String,
    pub outfit: String,
    pub accessory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppearancePatch {
    pub hair_color: Option<String>,
    pub outfit: Option<String>,
    pub accessory: Option<String>,
}

impl Appearance {
    fn apply(&mut self, patch: &AppearancePatch) -> Result<()> {
        let fields = [
            ("hair_color", &mut self.hair_color, &patch.hair_color),
            ("outfit", &mut self.outfit, &patch.outfit),
            ("accessory", &mut self.accessory, &patch.accessory),
        ];
        for (name, field, value) in fields {
            if let Some(v) = value {
                let v = v.trim();
                if v.is_empty() {
                    return Err(Error::Validation(format!("appearance.{name} must not be empty")));
                }
                *field = v.to_string();
            }
        }
        Ok(())
    }
}

// ============================================================================
// Voice
// ============================================================================

pub const PITCH_RANGE: (f32, f32) = (0.5, 2.0);
pub const SPEED_RANGE: (f32, f32) = (0.5, 2.0);
pub const VOLUME_RANGE: (f32, f32) = (0.0, 1.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub pitch: f32,
    pub speed: f32,
    pub volume: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoicePatch {
    pub voice_id: Option<String>,
    pub pitch: Option<f32>,
    pub speed: Option<f32>,
    pub volume: Option<f32>,
}

/// Clamp a float into `range`, rejecting NaN and infinities.
pub(crate) fn clamp_float(field: &str, value: f32, range: (f32, f32)) -> Result<f32> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{field} must be a finite number")));
    }
    Ok(value.clamp(range.0, range.1))
}

impl VoiceSettings {
    fn apply(&mut self, patch: &VoicePatch) -> Result<()> {
        if let Some(id) = &patch.voice_id {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::Validation("voice.voice_id must not be empty".into()));
            }
            self.voice_id = id.to_string();
        }
        if let Some(v) = patch.pitch {
            self.pitch = clamp_float("voice.pitch", v, PITCH_RANGE)?;
        }
        if let Some(v) = patch.speed {
            self.speed = clamp_float("voice.speed", v, SPEED_RANGE)?;
        }
        if let Some(v) = patch.volume {
            self.volume = clamp_float("voice.volume", v, VOLUME_RANGE)?;
        }
        Ok(())
    }
}

// ============================================================================
// Character
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub description: String,
    pub personality: PersonalityTraits,
    pub appearance: Appearance,
    pub voice: VoiceSettings,
}

/// Customization request; absent sections are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CharacterPatch {
    #[serde(default)]
    pub personality: Option<PersonalityPatch>,
    #[serde(default)]
    pub appearance: Option<AppearancePatch>,
    #[serde(default)]
    pub voice: Option<VoicePatch>,
}

impl Character {
    /// Factory defaults for a character.
    pub fn default_for(id: CharacterId) -> Self {
        match id {
            CharacterId::Aoi => Self {
                id,
                name: "Aoi".into(),
                description: "A cheerful art student who sketches in cafés and notices small details."
                    .into(),
                personality: PersonalityTraits {
                    kindness: 80,
                    humor: 65,
                    curiosity: 85,
                    energy: 75,
                    shyness: 35,
                },
                appearance: Appearance {
                    hair_color: "navy".into(),
                    outfit: "school uniform".into(),
                    accessory: "hair clip".into(),
                },
                voice: VoiceSettings {
                    voice_id: "nova".into(),
                    pitch: 1.1,
                    speed: 1.0,
                    volume: 0.8,
                },
            },
            CharacterId::Shun => Self {
                id,
                name: "Shun".into(),
                description: "A calm, bookish barista who listens more than he talks.".into(),
                personality: PersonalityTraits {
                    kindness: 75,
                    humor: 40,
                    curiosity: 60,
                    energy: 40,
                    shyness: 60,
                },
                appearance: Appearance {
                    hair_color: "black".into(),
                    outfit: "apron over a white shirt".into(),
                    accessory: "glasses".into(),
                },
                voice: VoiceSettings {
                    voice_id: "echo".into(),
                    pitch: 0.9,
                    speed: 0.95,
                    volume: 0.8,
                },
            },
        }
    }

    /// Apply a patch atomically: on error the character is left unchanged.
    pub fn customize(&mut self, patch: &CharacterPatch) -> Result<()> {
        let mut updated = self.clone();
        if let Some(p) = &patch.personality {
            updated.personality.apply(p);
        }
        if let Some(p) = &patch.appearance {
            updated.appearance.apply(p)?;
        }
        if let Some(p) = &patch.voice {
            updated.voice.apply(p)?;
        }
        *self = updated;
        Ok(())
    }
}

// ============================================================================
// Roster
// ============================================================================

/// Always exactly the two predefined characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRoster {
    aoi: Character,
    shun: Character,
}

impl Default for CharacterRoster {
    fn default() -> Self {
        Self {
            aoi: Character::default_for(CharacterId::Aoi),
            shun: Character::default_for(CharacterId::Shun),
        }
    }
}

impl CharacterRoster {
    pub fn get(&self, id: CharacterId) -> &Character {
        match id {
            CharacterId::Aoi => &self.aoi,
            CharacterId::Shun => &self.shun,
        }
    }

    fn get_mut(&mut self, id: CharacterId) -> &mut Character {
        match id {
            CharacterId::Aoi => &mut self.aoi,
            CharacterId::Shun => &mut self.shun,
        }
    }

    pub fn customize(&mut self, id: CharacterId, patch: &CharacterPatch) -> Result<&Character> {
        let character = self.get_mut(id);
        character.customize(patch)?;
        Ok(character)
    }

    pub fn reset(&mut self, id: CharacterId) {
        *self.get_mut(id) = Character::default_for(id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        [&self.aoi, &self.shun].into_iter()
    }

    /// Repair a roster decoded from storage: ids must match their slots and
    /// numeric fields must sit inside their ranges.
    pub fn normalized(mut self) -> Self {
        for id in CharacterId::ALL {
            let c = self.get_mut(id);
            c.id = id;
            c.voice.pitch = clamp_float("", c.voice.pitch, PITCH_RANGE).unwrap_or(1.0);
            c.voice.speed = clamp_float("", c.voice.speed, SPEED_RANGE).unwrap_or(1.0);
            c.voice.volume = clamp_float("", c.voice.volume, VOLUME_RANGE).unwrap_or(0.8);
            let p = &mut c.personality;
            for v in [
                &mut p.kindness,
                &mut p.humor,
                &mut p.curiosity,
                &mut p.energy,
                &mut p.shyness,
            ] {
                *v = clamp_trait(i32::from(*v));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_id_parse() {
        assert_eq!("AOI".parse::<CharacterId>().unwrap(), CharacterId::Aoi);
        assert_eq!("shun".parse::<CharacterId>().unwrap(), CharacterId::Shun);
        assert!("ren".parse::<CharacterId>().unwrap_err().is_validation());
    }

    #[test]
    fn test_trait_clamping() {
        let mut roster = CharacterRoster::default();
        let patch = CharacterPatch {
            personality: Some(PersonalityPatch {
                kindness: Some(150),
                shyness: Some(-20),
                ..Default::default()
            }),
            ..Default::default()
        };
        let aoi = roster.customize(CharacterId::Aoi, &patch).unwrap();
        assert_eq!(aoi.personality.kindness, 100);
        assert_eq!(aoi.personality.shyness, 0);
        // untouched fields keep their defaults
        assert_eq!(aoi.personality.humor, 65);
    }

    #[test]
    fn test_voice_clamping_and_nan_rejected() {
        let mut roster = CharacterRoster::default();
        let patch = CharacterPatch {
            voice: Some(VoicePatch {
                pitch: Some(3.0),
                volume: Some(-1.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let shun = roster.customize(CharacterId::Shun, &patch).unwrap();
        assert_eq!(shun.voice.pitch, 2.0);
        assert_eq!(shun.voice.volume, 0.0);

        let bad = CharacterPatch {
            voice: Some(VoicePatch {
                speed: Some(f32::NAN),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(roster.customize(CharacterId::Shun, &bad).is_err());
        assert_eq!(roster.get(CharacterId::Shun).voice.pitch, 2.0);
    }

    #[test]
    fn test_customize_is_atomic() {
        let mut roster = CharacterRoster::default();
        let before = roster.get(CharacterId::Aoi).clone();
        let patch = CharacterPatch {
            personality: Some(PersonalityPatch {
                energy: Some(10),
                ..Default::default()
            }),
            appearance: Some(AppearancePatch {
                outfit: Some("   ".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(roster.customize(CharacterId::Aoi, &patch).unwrap_err().is_validation());
        assert_eq!(roster.get(CharacterId::Aoi), &before);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut roster = CharacterRoster::default();
        let mut patch = CharacterPatch::default();
        let mut personality = PersonalityPatch::default();
        personality.set("humor", 5).unwrap();
        patch.personality = Some(personality);
        roster.customize(CharacterId::Aoi, &patch).unwrap();
        assert_eq!(roster.get(CharacterId::Aoi).personality.humor, 5);

        roster.reset(CharacterId::Aoi);
        assert_eq!(roster.get(CharacterId::Aoi), &Character::default_for(CharacterId::Aoi));
    }

    #[test]
    fn test_unknown_trait_name() {
        let mut patch = PersonalityPatch::default();
        assert!(patch.set("charisma", 50).is_err());
    }

    #[test]
    fn test_normalized_repairs_decoded_roster() {
        let mut roster = CharacterRoster::default();
        roster.aoi.id = CharacterId::Shun;
        roster.aoi.personality.energy = 250;
        roster.shun.voice.speed = 9.0;
        let roster = roster.normalized();
        assert_eq!(roster.get(CharacterId::Aoi).id, CharacterId::Aoi);
        assert_eq!(roster.get(CharacterId::Aoi).personality.energy, 100);
        assert_eq!(roster.get(CharacterId::Shun).voice.speed, 2.0);
    }

    #[test]
    fn test_roster_iterates_both() {
        let roster = CharacterRoster::default();
        let ids: Vec<_> = roster.iter().map(|c| c.id).collect();
        assert_eq!(ids, CharacterId::ALL.to_vec());
    }
}
