pub mod channel;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod message;

pub use channel::{MessageHandler, OutputChannel};
pub use conversation::{conversation_id, ConversationGranularity};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use message::{BotResponse, Button, MessageMetadata, UserMessage};
