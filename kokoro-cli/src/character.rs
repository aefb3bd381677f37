//! `kokoro character` subcommands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use kokoro_core::character::{AppearancePatch, PersonalityPatch, VoicePatch};
use kokoro_core::{Action, Character, CharacterId, CharacterPatch, RelationshipType};

use crate::app::App;

#[derive(Subcommand, Debug)]
pub enum CharacterCommands {
    /// Show character settings (both characters when omitted)
    Show {
        character: Option<CharacterId>,
    },

    /// Change personality, appearance or voice
    Customize {
        character: CharacterId,

        #[command(flatten)]
        changes: CustomizeArgs,
    },

    /// Restore factory settings
    Reset {
        character: CharacterId,
    },

    /// Set the relationship type (acquaintance, friend, close_friend, partner)
    Relationship {
        character: CharacterId,
        kind: RelationshipType,
    },
}

#[derive(Args, Debug, Default)]
pub struct CustomizeArgs {
    /// Personality trait as name=value, e.g. humor=80 (repeatable)
    #[arg(short = 't', long = "trait", value_parser = parse_trait)]
    pub traits: Vec<(String, i32)>,

    #[arg(long)]
    pub hair: Option<String>,

    #[arg(long)]
    pub outfit: Option<String>,

    #[arg(long)]
    pub accessory: Option<String>,

    /// Voice ID used for speech synthesis
    #[arg(long)]
    pub voice: Option<String>,

    #[arg(long)]
    pub pitch: Option<f32>,

    #[arg(long)]
    pub speed: Option<f32>,

    #[arg(long)]
    pub volume: Option<f32>,
}

fn parse_trait(s: &str) -> Result<(String, i32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a whole number"))?;
    Ok((name.trim().to_string(), value))
}

impl CustomizeArgs {
    pub fn into_patch(self) -> Result<CharacterPatch> {
        let personality = if self.traits.is_empty() {
            None
        } else {
            let mut patch = PersonalityPatch::default();
            for (name, value) in &self.traits {
                patch.set(name, *value)?;
            }
            Some(patch)
        };

        let appearance = (self.hair.is_some() || self.outfit.is_some() || self.accessory.is_some())
            .then(|| AppearancePatch {
                hair_color: self.hair,
                outfit: self.outfit,
                accessory: self.accessory,
            });

        let voice = (self.voice.is_some()
            || self.pitch.is_some()
            || self.speed.is_some()
            || self.volume.is_some())
        .then(|| VoicePatch {
            voice_id: self.voice,
            pitch: self.pitch,
            speed: self.speed,
            volume: self.volume,
        });

        if personality.is_none() && appearance.is_none() && voice.is_none() {
            bail!("nothing to change; pass --trait, --hair, --voice or another option");
        }
        Ok(CharacterPatch {
            personality,
            appearance,
            voice,
        })
    }
}

pub async fn handle_command(command: CharacterCommands, app: &App) -> Result<()> {
    let controller = &app.controller;
    match command {
        CharacterCommands::Show { character } => {
            let store = controller.store();
            let store = store.read().await;
            let ids = character.map_or_else(|| CharacterId::ALL.to_vec(), |id| vec![id]);
            for id in ids {
                print_character(store.characters.get(id));
                let relationship = store.preferences.relationship(id);
                println!(
                    "  relationship: {} (intimacy {}, trust {})",
                    relationship.kind.as_str(),
                    relationship.intimacy_level,
                    relationship.trust_level
                );
                println!();
            }
            Ok(())
        }

        CharacterCommands::Customize { character, changes } => {
            let patch = changes.into_patch()?;
            controller
                .dispatch(Action::CustomizeCharacter { character, patch })
                .await?;
            let store = controller.store();
            print_character(store.read().await.characters.get(character));
            Ok(())
        }

        CharacterCommands::Reset { character } => {
            controller.dispatch(Action::ResetCharacter(character)).await?;
            println!("{character} restored to factory settings");
            Ok(())
        }

        CharacterCommands::Relationship { character, kind } => {
            controller
                .dispatch(Action::SetRelationshipType { character, kind })
                .await?;
            println!("{character} is now your {}", kind.as_str());
            Ok(())
        }
    }
}

fn print_character(character: &Character) {
    println!("{} ({})", character.name, character.id);
    println!("  {}", character.description);
    let traits: Vec<String> = character
        .personality
        .named()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    println!("  personality: {}", traits.join(" "));
    let look = &character.appearance;
    println!(
        "  appearance: {} hair, {}, {}",
        look.hair_color, look.outfit, look.accessory
    );
    let voice = &character.voice;
    println!(
        "  voice: {} (pitch {:.2}, speed {:.2}, volume {:.2})",
        voice.voice_id, voice.pitch, voice.speed, voice.volume
    );
}
