//! `kokoro settings` and `kokoro backup` subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use kokoro_core::{Action, SectionPatch};
use serde_json::json;

use crate::app::App;

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print preferences and profile
    Show,

    /// Update one section with a JSON patch, e.g. `set audio '{"master_volume": 60}'`
    Set {
        /// audio, privacy, or relationship.<aoi|shun>
        section: String,
        /// JSON object with the fields to change
        patch: String,
    },

    /// Change the name characters call you
    Name {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Snapshot all state under a new backup key
    Create,
    /// List backups, oldest first
    List,
    /// Replace all state with a backup
    Restore {
        /// Backup key as printed by `backup list`
        key: String,
    },
}

/// Decode the CLI's section and JSON text into a typed patch.
fn parse_patch(section: &str, patch: &str) -> Result<SectionPatch> {
    let value: serde_json::Value =
        serde_json::from_str(patch).with_context(|| format!("Patch is not valid JSON: {patch}"))?;
    Ok(SectionPatch::from_json(section, value)?)
}

pub async fn handle_settings(command: SettingsCommands, app: &App) -> Result<()> {
    let controller = &app.controller;
    match command {
        SettingsCommands::Show => {
            let store = controller.store();
            let store = store.read().await;
            let view = json!({
                "profile": store.profile,
                "preferences": store.preferences,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }

        SettingsCommands::Set { section, patch } => {
            let patch = parse_patch(&section, &patch)?;
            let section = patch.section();
            controller.dispatch(Action::UpdatePreferences(patch)).await?;
            println!("{section} updated");
            Ok(())
        }

        SettingsCommands::Name { name } => {
            controller.dispatch(Action::SetProfileName(name)).await?;
            let store = controller.store();
            println!("Hello, {}!", store.read().await.profile.display_name);
            Ok(())
        }
    }
}

pub async fn handle_backup(command: BackupCommands, app: &App) -> Result<()> {
    let controller = &app.controller;
    match command {
        BackupCommands::Create => {
            let key = controller.create_backup().await?;
            println!("Backup created: {key}");
            Ok(())
        }

        BackupCommands::List => {
            let keys = controller.list_backups().await?;
            if keys.is_empty() {
                println!("No backups yet.");
            }
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }

        BackupCommands::Restore { key } => {
            controller.restore_backup(&key).await?;
            println!("Restored {key}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patch() {
        let patch = parse_patch("audio", r#"{"voice_enabled": false}"#).unwrap();
        assert_eq!(patch.section().to_string(), "audio");

        let patch = parse_patch("relationship.shun", r#"{"type": "friend"}"#).unwrap();
        assert_eq!(patch.section().to_string(), "relationship.shun");
    }

    #[test]
    fn test_parse_patch_errors() {
        assert!(parse_patch("audio", "{not json").is_err());
        assert!(parse_patch("graphics", "{}").is_err());
        assert!(parse_patch("privacy", r#"{"content_filter": "extreme"}"#).is_err());
    }
}
