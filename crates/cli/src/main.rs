//! Deckhand CLI, the main entry point.
//!
//! Commands:
//! - `onboard` writes the default config
//! - `serve`   runs the Telegram bot
//! - `chat`    talks to the assistant from the terminal
//! - `status`  shows collection statistics
//! - `log`     prints recent collection changes
//! - `auth`    stores or removes the sync credentials

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deckhand",
    about = "Deckhand: a chat-driven flashcard assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Onboard,

    /// Run the Telegram bot
    Serve,

    /// Chat with the assistant in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show collection statistics
    Status {
        /// Also check that the reasoning service accepts the API key
        #[arg(long)]
        check: bool,
    },

    /// Show recent collection changes
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },

    /// Manage the sync credentials
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Store the sync key
    Set {
        /// Host key issued by the sync service
        #[arg(long, env = "DECKHAND_SYNC_HKEY")]
        hkey: String,

        /// Sync endpoint, if not the default
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Remove the stored sync key
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Serve => commands::serve::run().await?,
        Commands::Chat { message } => commands::chat::run(message).await?,
        Commands::Status { check } => commands::status::run(check).await?,
        Commands::Log { count } => commands::log::run(count).await?,
        Commands::Auth { action } => match action {
            AuthAction::Set { hkey, endpoint } => commands::auth::set(hkey, endpoint).await?,
            AuthAction::Clear => commands::auth::clear().await?,
        },
    }

    Ok(())
}
