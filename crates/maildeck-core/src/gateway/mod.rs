//! Remote mail gateway boundary.
//!
//! The engine never talks IMAP or SMTP itself. Everything it knows about
//! the mailbox comes through [`MailGateway`], an HTTP-shaped request/response
//! service that fronts the message store, the relay and the server-side
//! outbox queue.

mod http;
mod memory;
mod types;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use http::{GatewayConfig, HttpGateway};
pub use memory::{GatewayCall, MemoryGateway};
pub use types::{
    AdvancedSearchPage, Attachment, BulkAction, CancelResponse, Folder, FolderType, Message,
    MessageId, MessagePage, MessageQuery, OutboxId, OutgoingMessage, Pagination, QueueKind,
    QueueReceipt, QueueStatus, QueuedMessage, DEFAULT_PAGE_SIZE,
};

/// Errors reported by the mail gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never got a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The gateway answered with a non-success status.
    #[error("Gateway returned {status}: {message}")]
    Status {
        /// HTTP-style status code.
        status: u16,
        /// Error message from the gateway.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

/// Result type for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Operations the engine consumes from the remote mail service.
///
/// Implementations may write these as `async fn`; the returned futures must
/// be `Send` so store operations can run on a multi-threaded runtime.
pub trait MailGateway: Send + Sync {
    /// Lists folders with their unread and total counts.
    fn list_folders(&self) -> impl Future<Output = GatewayResult<Vec<Folder>>> + Send;

    /// Lists one page of message summaries.
    fn list_messages(
        &self,
        query: &MessageQuery,
    ) -> impl Future<Output = GatewayResult<MessagePage>> + Send;

    /// Fetches a single message including its body.
    fn fetch_message(&self, id: MessageId) -> impl Future<Output = GatewayResult<Message>> + Send;

    /// Fetches all messages whose normalized subject equals `subject`, oldest first.
    fn fetch_thread(
        &self,
        subject: &str,
    ) -> impl Future<Output = GatewayResult<Vec<Message>>> + Send;

    /// Sets or clears the read flag.
    fn mark_read(
        &self,
        id: MessageId,
        read: bool,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Sets or clears the starred flag.
    fn set_starred(
        &self,
        id: MessageId,
        starred: bool,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Adds or removes a label.
    fn set_label(
        &self,
        id: MessageId,
        label: &str,
        add: bool,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Deletes a message (moves it to trash on the server).
    fn delete_message(&self, id: MessageId) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Moves a message to another folder.
    fn move_message(
        &self,
        id: MessageId,
        folder: &str,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Applies one action to many messages in a single call.
    fn bulk_action(
        &self,
        ids: &[MessageId],
        action: &BulkAction,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Plain free-text search in a folder. Results are capped by the gateway.
    fn search(
        &self,
        query: &str,
        folder: &str,
    ) -> impl Future<Output = GatewayResult<Vec<Message>>> + Send;

    /// Operator search with pagination and parsed-filter metadata.
    fn advanced_search(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = GatewayResult<AdvancedSearchPage>> + Send;

    /// Sends a message immediately.
    fn send(&self, message: &OutgoingMessage) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Queues a message for delivery after `delay_secs`.
    fn queue(
        &self,
        message: &OutgoingMessage,
        delay_secs: u64,
        kind: QueueKind,
    ) -> impl Future<Output = GatewayResult<QueueReceipt>> + Send;

    /// Cancels a queued message. Losing the race against delivery is not an
    /// error: the gateway answers [`CancelResponse::AlreadySent`].
    fn cancel_queued(
        &self,
        id: &OutboxId,
    ) -> impl Future<Output = GatewayResult<CancelResponse>> + Send;

    /// Lists the short-delay (undo) outbox.
    fn list_outbox(&self) -> impl Future<Output = GatewayResult<Vec<QueuedMessage>>> + Send;

    /// Lists scheduled (send-later) messages.
    fn list_scheduled(&self) -> impl Future<Output = GatewayResult<Vec<QueuedMessage>>> + Send;

    /// Moves a scheduled message to a new send time.
    fn update_scheduled(
        &self,
        id: &OutboxId,
        send_at: DateTime<Utc>,
    ) -> impl Future<Output = GatewayResult<QueueReceipt>> + Send;

    /// Cancels a scheduled message.
    fn cancel_scheduled(
        &self,
        id: &OutboxId,
    ) -> impl Future<Output = GatewayResult<CancelResponse>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Network("reset".into()).is_transient());
        assert!(
            GatewayError::Status {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            GatewayError::Status {
                status: 429,
                message: "slow down".into()
            }
            .is_transient()
        );
        assert!(
            !GatewayError::Status {
                status: 422,
                message: "bad recipient".into()
            }
            .is_transient()
        );
        assert!(!GatewayError::NotFound("message 4".into()).is_transient());
    }
}
