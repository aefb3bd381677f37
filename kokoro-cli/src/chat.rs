//! Interactive chat loop.

use anyhow::{bail, Result};
use kokoro_core::{scenario, Action, CharacterId, Exchange, SessionController};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::app::App;

const HELP: &str = "\
Commands:
  /fav        toggle favorite
  /rate N     rate this conversation (1-5)
  /retry      ask again after a failed reply
  /ok         dismiss the last error
  /status     show the session state
  /help       show this help
  /quit       end the conversation";

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Say(&'a str),
    Favorite,
    Rate(u8),
    Retry,
    Acknowledge,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line);
    };
    let mut parts = command.split_whitespace();
    match (parts.next().unwrap_or_default(), parts.next()) {
        ("fav" | "favorite", None) => Input::Favorite,
        ("rate", Some(n)) => n.parse().map_or(Input::Unknown(line), Input::Rate),
        ("retry", None) => Input::Retry,
        ("ok", None) => Input::Acknowledge,
        ("status", None) => Input::Status,
        ("help", None) => Input::Help,
        ("quit" | "exit", None) => Input::Quit,
        _ => Input::Unknown(line),
    }
}

/// Chat with `character`, either in a new conversation or resuming `resume`.
pub async fn run(
    app: &App,
    character: CharacterId,
    scenario_id: &str,
    resume: Option<String>,
) -> Result<()> {
    let controller = &app.controller;
    let (conversation_id, name) = match resume {
        Some(id) => {
            let store = controller.store();
            let store = store.read().await;
            let conversation = store.conversations.require(&id)?;
            if conversation.is_closed() {
                bail!("conversation '{id}' is closed");
            }
            let name = store.characters.get(conversation.character_id).name.clone();
            for message in conversation.messages.iter() {
                let who = if message.sender.is_user() {
                    store.profile.display_name.as_str()
                } else {
                    name.as_str()
                };
                println!("{who}: {}", message.text);
            }
            (id, name)
        }
        None => {
            let scenario = scenario::require(scenario_id)?;
            let id = controller.start_conversation(character, scenario_id).await?;
            let name = controller.store().read().await.characters.get(character).name.clone();
            println!("── {} ── {}", scenario.title, scenario.setting);
            (id, name)
        }
    };
    println!("Chatting with {name}. Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Say(text) => {
                let outcome = tokio::select! {
                    outcome = controller.send_user_message(&conversation_id, text) => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        // the dropped send leaves the conversation in Error
                        println!("(stopped waiting for {name}; /retry to ask again)");
                        continue;
                    }
                };
                show_outcome(&name, outcome);
            }
            Input::Retry => {
                let outcome = controller.retry(&conversation_id).await;
                show_outcome(&name, outcome);
            }
            Input::Favorite => match controller.toggle_favorite(&conversation_id).await {
                Ok(true) => println!("★ added to favorites"),
                Ok(false) => println!("☆ removed from favorites"),
                Err(e) => println!("! {}", e.user_message()),
            },
            Input::Rate(rating) => {
                let action = Action::RateConversation {
                    conversation_id: conversation_id.clone(),
                    rating,
                };
                match controller.dispatch(action).await {
                    Ok(()) => println!("rated {rating}/5"),
                    Err(e) => println!("! {}", e.user_message()),
                }
            }
            Input::Acknowledge => {
                if let Err(e) = controller.acknowledge_error(&conversation_id).await {
                    println!("! {}", e.user_message());
                }
            }
            Input::Status => print_status(controller, &conversation_id).await,
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(command) => println!("unknown command '{command}', try /help"),
        }
    }

    controller.close_conversation(&conversation_id).await?;
    debug!(conversation_id = %conversation_id, "Chat ended");
    println!("Conversation saved as {conversation_id}");
    Ok(())
}

fn show_outcome(name: &str, outcome: kokoro_common::Result<Exchange>) {
    match outcome {
        Ok(Exchange::Replied { reply, speech }) => {
            println!("{name} ({}): {}", reply.emotion, reply.text);
            if let Some(clip) = speech {
                println!("  ♪ {} ({:.1}s)", clip.audio_url, clip.duration_ms as f64 / 1000.0);
            }
        }
        Ok(Exchange::Abandoned) => println!("(reply discarded)"),
        Err(e) => {
            println!("! {}", e.user_message());
            if e.is_retryable() || e.is_content_filtered() {
                println!("  /retry to ask again, /ok to move on");
            }
        }
    }
}

async fn print_status(controller: &SessionController, conversation_id: &str) {
    let status = controller.status(conversation_id).await;
    println!("state: {}", status.state.as_str());
    if let Some(error) = status.last_error {
        println!("last error: {error}");
    }
    if controller.persistence_degraded() {
        println!("storage: unavailable, changes are kept in memory only");
    }
}
