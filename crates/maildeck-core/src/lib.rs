//! # maildeck-core
//!
//! Client-side mail engine for `MailDeck`.
//!
//! This crate provides:
//! - Mailbox state store with optimistic writes and stale-response discard
//! - Deferred sending: immediate, scheduled and send-with-undo
//! - Conversation threading by normalized subject
//! - Keyboard shortcuts with two-key leader sequences
//! - Compose session and user settings
//! - Gateway boundary with HTTP and in-memory implementations

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod compose;
mod error;
pub mod gateway;
pub mod outbox;
pub mod search;
pub mod settings;
pub mod shortcuts;
pub mod store;
pub mod thread;

pub use client::{Effect, MailClient, View};
pub use compose::ComposeSession;
pub use error::{Error, Result};
pub use gateway::{
    GatewayConfig, GatewayError, GatewayResult, HttpGateway, MailGateway, MemoryGateway, Message,
    MessageId, OutgoingMessage,
};
pub use outbox::{CancelOutcome, OutboxScheduler, SendError, SendMode, SubmitOutcome};
pub use search::{QueryKind, SearchFilters, classify_query};
pub use settings::{AutoAdvance, ReplyBehavior, Settings};
pub use shortcuts::{Command, KeyEvent, KeyTarget, Keymap, Modifiers, SequenceRecognizer};
pub use store::{FetchOutcome, MailboxStore, RemovalOutcome, SearchOutcome, StoreSnapshot};
pub use thread::{Thread, ThreadResolver, group_into_threads, normalize_subject};
