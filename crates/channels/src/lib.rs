//! Chat channel implementations for Deckhand.
//!
//! Each channel connects to a chat platform and relays messages to and
//! from the assistant.
//!
//! Available channels:
//! - **CLI**: interactive terminal chat (stdin/stdout)
//! - **Telegram**: Bot API long polling

pub mod cli;
pub mod telegram;

pub use cli::{CLI_CHAT_ID, CliChannel};
pub use telegram::TelegramChannel;
