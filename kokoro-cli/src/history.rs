//! `kokoro history` subcommands.

use anyhow::Result;
use clap::Subcommand;
use kokoro_core::{Action, CharacterId, Conversation, HistoryFilter, HistoryIndex, SortBy};

use crate::app::App;

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List past conversations
    List {
        /// Only conversations with this character (aoi, shun)
        #[arg(short, long)]
        character: Option<CharacterId>,

        /// Only favorites
        #[arg(short, long)]
        favorites: bool,

        /// Case-insensitive text search over titles and messages
        #[arg(short, long)]
        search: Option<String>,

        /// Sort order (date, length, rating)
        #[arg(long, default_value = "date")]
        sort: SortBy,

        /// Maximum number of conversations shown
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print a conversation transcript
    Show {
        /// Conversation ID
        id: String,
    },

    /// Aggregate statistics
    Stats,

    /// Toggle the favorite flag
    Favorite {
        /// Conversation ID
        id: String,
    },

    /// Rate a conversation from 1 to 5
    Rate {
        /// Conversation ID
        id: String,
        /// Rating (1-5)
        rating: u8,
    },

    /// End a conversation without deleting it
    Close {
        /// Conversation ID
        id: String,
    },

    /// Delete a conversation permanently
    Delete {
        /// Conversation ID
        id: String,
    },
}

pub async fn handle_command(command: HistoryCommands, app: &App) -> Result<()> {
    let controller = &app.controller;
    match command {
        HistoryCommands::List {
            character,
            favorites,
            search,
            sort,
            limit,
        } => {
            let filter = HistoryFilter {
                character,
                favorites_only: favorites,
                search_text: search,
            };
            let store = controller.store();
            let store = store.read().await;
            let results = HistoryIndex::new(store.conversations.as_slice()).query(&filter, sort);
            if results.is_empty() {
                println!("No conversations found.");
                return Ok(());
            }
            for conversation in results.iter().take(limit) {
                println!("{}", summary_line(conversation));
            }
            if results.len() > limit {
                println!("… and {} more", results.len() - limit);
            }
            Ok(())
        }

        HistoryCommands::Show { id } => {
            let store = controller.store();
            let store = store.read().await;
            let conversation = store.conversations.require(&id)?;
            let name = &store.characters.get(conversation.character_id).name;
            println!("{}", conversation.title);
            println!(
                "started {}{}",
                conversation.start_time.format("%Y-%m-%d %H:%M"),
                conversation
                    .end_time
                    .map(|t| format!(", ended {}", t.format("%H:%M")))
                    .unwrap_or_default()
            );
            println!();
            for message in conversation.messages.iter() {
                let time = message.timestamp.format("%H:%M");
                if message.sender.is_user() {
                    println!("[{time}] {}: {}", store.profile.display_name, message.text);
                } else {
                    println!("[{time}] {name} ({}): {}", message.emotion, message.text);
                }
            }
            Ok(())
        }

        HistoryCommands::Stats => {
            let store = controller.store();
            let store = store.read().await;
            let stats = HistoryIndex::new(store.conversations.as_slice()).statistics();
            println!("Conversations:   {}", stats.total_conversations);
            println!("Messages:        {}", stats.total_messages);
            println!("Average length:  {:.1}", stats.average_length);
            println!("Favorites:       {}", stats.favorite_count);
            for (character, count) in &stats.conversations_per_character {
                println!("  with {character:5} {count}");
            }
            if !stats.emotion_distribution.is_empty() {
                println!("Emotions:");
                for (emotion, count) in &stats.emotion_distribution {
                    println!("  {:12} {count}", emotion.as_str());
                }
            }
            Ok(())
        }

        HistoryCommands::Favorite { id } => {
            let favorite = controller.toggle_favorite(&id).await?;
            println!("{id}: {}", if favorite { "★ favorite" } else { "☆ not a favorite" });
            Ok(())
        }

        HistoryCommands::Rate { id, rating } => {
            controller
                .dispatch(Action::RateConversation {
                    conversation_id: id.clone(),
                    rating,
                })
                .await?;
            println!("{id}: rated {rating}/5");
            Ok(())
        }

        HistoryCommands::Close { id } => {
            controller.close_conversation(&id).await?;
            println!("{id}: closed");
            Ok(())
        }

        HistoryCommands::Delete { id } => {
            controller.delete_conversation(&id).await?;
            println!("{id}: deleted");
            Ok(())
        }
    }
}

fn summary_line(conversation: &Conversation) -> String {
    let mut flags = String::new();
    if conversation.is_favorite {
        flags.push('★');
    }
    if let Some(rating) = conversation.rating {
        flags.push_str(&format!(" {rating}/5"));
    }
    if !conversation.is_closed() {
        flags.push_str(" (open)");
    }
    format!(
        "{}  {}  {:5}  {:3} msgs  {}  {}{}",
        conversation.id,
        conversation.metadata.last_activity.format("%Y-%m-%d %H:%M"),
        conversation.character_id.as_str(),
        conversation.messages.len(),
        conversation.title,
        conversation.summary.as_deref().unwrap_or("-"),
        flags
    )
}
