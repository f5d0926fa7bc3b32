//! Slack connector for parley
//!
//! This crate holds everything Slack-specific:
//! - **Signing** (`signature`) - `X-Slack-Signature` HMAC verification with a replay window
//! - **Retries** (`retry`) - acknowledging and dropping Slack redeliveries
//! - **Inbound** (`inbound`, `events`, `interactive`) - Events API and interactive payload parsing
//! - **Outbound** (`output`, `api`, `blocks`) - replies via `chat.postMessage` and Block Kit
//!
//! # Architecture
//!
//! ```text
//! Slack → POST /webhooks/slack/webhook → SignatureVerifier → RetryFilter
//!                                             ↓
//!                               SlackInput::classify → UserMessage → bot
//!                                                                     ↓
//!                    chat.postMessage ← SlackApi ← SlackBot ← BotResponse
//! ```

pub mod api;
pub mod blocks;
pub mod events;
pub mod inbound;
pub mod interactive;
pub mod output;
pub mod retry;
pub mod signature;

pub use api::{HttpSlackApi, SlackApi, SlackApiError};
pub use inbound::{InboundError, InboundOutcome, SlackInput};
pub use output::SlackBot;
pub use retry::{RetryFilter, NO_RETRY_HEADER};
pub use signature::{SignatureError, SignatureVerifier};
