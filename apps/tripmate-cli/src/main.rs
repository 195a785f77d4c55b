//! TripMate CLI
//!
//! Drives the TripMate chat and exchange-rate stores from the terminal.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tripmate_store::{Backend, ImageAttachment, MessageDraft, TargetUser, BASE_CURRENCY};

mod config;

/// TripMate - direct messages between travel companions
#[derive(Parser, Debug)]
#[command(name = "tripmate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Directory uploaded images are stored in
    #[arg(long, value_name = "DIR")]
    media_dir: Option<PathBuf>,

    /// Never contact the exchange-rate service
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open (or create) the conversation with another user
    Open {
        /// Current user ID
        #[arg(short, long)]
        user: String,

        /// User ID to talk to
        target: String,

        /// Display name of the target
        #[arg(long)]
        name: Option<String>,

        /// Photo URL of the target
        #[arg(long)]
        photo: Option<String>,
    },

    /// Send a message
    Send {
        /// Conversation ID
        conversation: String,

        /// Sender user ID
        #[arg(short, long)]
        from: String,

        /// Message text
        #[arg(short, long)]
        text: Option<String>,

        /// Image file to attach
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Extra fields as a JSON object, e.g. '{"type":"location","lat":25.03}'
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// List a user's conversations
    Inbox {
        /// User ID
        user: String,
    },

    /// Show the recent messages of a conversation
    History {
        /// Conversation ID
        conversation: String,
    },

    /// Mark a conversation as read
    Read {
        /// Conversation ID
        conversation: String,

        /// Reader user ID
        #[arg(short, long)]
        user: String,
    },

    /// Print a user's conversation list whenever it changes
    WatchInbox {
        /// User ID
        user: String,
    },

    /// Print a conversation's history whenever a message arrives
    WatchChat {
        /// Conversation ID
        conversation: String,
    },

    /// Show the exchange-rate table for a base currency
    Rates {
        /// Base currency
        #[arg(default_value = BASE_CURRENCY)]
        base: String,
    },

    /// Convert an amount between currencies
    Convert {
        amount: f64,
        from: String,
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    let config = config::load(
        cli.config.as_deref(),
        config::Overrides {
            db_path: cli.db,
            media_root: cli.media_dir,
            offline: cli.offline,
        },
    )?;
    let backend = Backend::new(config);

    match cli.command {
        Commands::Open {
            user,
            target,
            name,
            photo,
        } => {
            let mut target = TargetUser::new(target);
            target.display_name = name;
            target.photo_url = photo;
            let id = backend
                .conversations()
                .await?
                .get_or_create_conversation(&user, &target)
                .await
                .context("Failed to open conversation")?;
            println!("{}", id);
        }

        Commands::Send {
            conversation,
            from,
            text,
            image,
            metadata,
        } => {
            let mut draft = MessageDraft {
                text,
                ..Default::default()
            };
            if let Some(path) = image {
                let attachment = ImageAttachment::from_path(&path)
                    .await
                    .with_context(|| format!("Failed to read image {}", path.display()))?;
                draft = draft.with_image(attachment);
            }
            if let Some(raw) = metadata {
                let fields: Map<String, Value> =
                    serde_json::from_str(&raw).context("Metadata must be a JSON object")?;
                draft = draft.with_metadata(fields);
            }

            let sent = backend
                .messages()
                .await?
                .send_message(&conversation, &from, draft)
                .await
                .context("Failed to send message")?;
            match sent {
                Some(message) => print_json(&message)?,
                None => println!("Nothing to send"),
            }
        }

        Commands::Inbox { user } => {
            let conversations = backend.conversations().await?.list_conversations(&user).await?;
            print_json(&conversations)?;
        }

        Commands::History { conversation } => {
            let messages = backend.messages().await?.recent_messages(&conversation).await?;
            print_json(&messages)?;
        }

        Commands::Read { conversation, user } => {
            backend
                .conversations()
                .await?
                .mark_conversation_as_read(&conversation, &user)
                .await
                .context("Failed to mark conversation as read")?;
            println!("Marked {} as read for {}", conversation, user);
        }

        Commands::WatchInbox { user } => {
            let subscription = backend
                .conversations()
                .await?
                .listen_to_conversations(&user, |conversations| {
                    if let Err(e) = print_json(&conversations) {
                        eprintln!("Failed to print update: {}", e);
                    }
                })
                .await?;
            info!("Watching inbox of {}, press Ctrl+C to stop", user);
            tokio::signal::ctrl_c().await?;
            subscription.unsubscribe();
        }

        Commands::WatchChat { conversation } => {
            let subscription = backend
                .messages()
                .await?
                .listen_to_messages(&conversation, |messages| {
                    if let Err(e) = print_json(&messages) {
                        eprintln!("Failed to print update: {}", e);
                    }
                })
                .await?;
            info!("Watching {}, press Ctrl+C to stop", conversation);
            tokio::signal::ctrl_c().await?;
            subscription.unsubscribe();
        }

        Commands::Rates { base } => {
            let table = backend.exchange_rates().await?.rates(&base).await?;
            print_json(&table)?;
        }

        Commands::Convert { amount, from, to } => {
            let converted = backend
                .exchange_rates()
                .await?
                .convert(amount, &from, &to)
                .await?;
            println!(
                "{:.2} {} = {:.2} {}",
                amount,
                from.to_uppercase(),
                converted,
                to.to_uppercase()
            );
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
