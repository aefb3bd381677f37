#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kokoro_common::logging::init_logging;
use kokoro_common::Config;
use kokoro_core::{scenario, CharacterId, HistoryIndex};

mod app;
mod character;
mod chat;
mod history;
mod settings;

use app::App;
use character::CharacterCommands;
use history::HistoryCommands;
use settings::{BackupCommands, SettingsCommands};

/// Kokoro - chat with Aoi and Shun from your terminal.
#[derive(Parser, Debug)]
#[command(name = "kokoro")]
#[command(version)]
#[command(about = "Chat with Aoi and Shun from your terminal.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.kokoro/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start or resume a conversation
    Chat {
        /// Who to talk to (aoi, shun)
        #[arg(short, long, default_value = "aoi")]
        character: CharacterId,

        /// Scenario ID (see `kokoro scenarios`)
        #[arg(short, long, default_value = "free_talk")]
        scenario: String,

        /// Continue an open conversation instead of starting a new one
        #[arg(long, conflicts_with = "scenario")]
        resume: Option<String>,
    },

    /// Browse and manage past conversations
    History {
        #[command(subcommand)]
        history_command: HistoryCommands,
    },

    /// View and customize characters
    Character {
        #[command(subcommand)]
        character_command: CharacterCommands,
    },

    /// View and change preferences
    Settings {
        #[command(subcommand)]
        settings_command: SettingsCommands,
    },

    /// Create, list and restore backups
    Backup {
        #[command(subcommand)]
        backup_command: BackupCommands,
    },

    /// List available scenarios
    Scenarios,

    /// Show configuration and storage status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Scenarios = cli.command {
        for s in scenario::CATALOG {
            println!("{:10} {:24} {}", s.id, s.title, s.setting);
        }
        return Ok(());
    }

    let config = Config::load_and_validate(cli.config.as_deref())?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    let app = App::bootstrap(config).await?;
    for warning in &app.load_warnings {
        eprintln!("warning: {warning}");
    }

    match cli.command {
        Commands::Scenarios => Ok(()),

        Commands::Chat {
            character,
            scenario,
            resume,
        } => chat::run(&app, character, &scenario, resume).await,

        Commands::History { history_command } => {
            history::handle_command(history_command, &app).await
        }

        Commands::Character { character_command } => {
            character::handle_command(character_command, &app).await
        }

        Commands::Settings { settings_command } => {
            settings::handle_settings(settings_command, &app).await
        }

        Commands::Backup { backup_command } => settings::handle_backup(backup_command, &app).await,

        Commands::Status => {
            let config = &app.config;
            let store = app.controller.store();
            let store = store.read().await;
            let stats = HistoryIndex::new(store.conversations.as_slice()).statistics();

            println!("Kokoro {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!(
                "Config:        {}",
                cli.config
                    .unwrap_or_else(kokoro_common::config::config_path)
                    .display()
            );
            println!(
                "Storage:       {} ({})",
                config.storage.backend,
                config.storage.data_dir().display()
            );
            println!("Model:         {} @ {}", config.llm.model, config.llm.base_url);
            println!(
                "Speech:        {}",
                if config.tts.enabled {
                    format!("{} @ {}", config.tts.model, config.tts.base_url)
                } else {
                    "disabled".into()
                }
            );
            println!("Timeout:       {}s", config.session.generation_timeout_secs);
            println!();
            println!("User:          {}", store.profile.display_name);
            println!(
                "Last chatted:  {}",
                store.active_character.map_or("-", CharacterId::as_str)
            );
            println!(
                "Conversations: {} ({} messages, {} favorites)",
                stats.total_conversations, stats.total_messages, stats.favorite_count
            );
            if app.controller.persistence_degraded() {
                println!("Persistence:   unavailable, running in memory");
            }
            Ok(())
        }
    }
}
