//! Outbox types.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::gateway::{GatewayError, OutboxId, OutgoingMessage};

/// How a message should leave the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Hand to the relay now.
    Immediate,
    /// Deliver at a future time. Managed through the scheduled list.
    Scheduled(DateTime<Utc>),
    /// Deliver after the undo window, cancelable until then.
    Undoable,
}

/// A send rejected before any gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No To, Cc or Bcc address.
    NoRecipients,
    /// A recipient is not a plausible address.
    InvalidAddress(String),
    /// The scheduled time is not in the future.
    ScheduleInPast,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::NoRecipients => "Please enter at least one recipient",
            Self::InvalidAddress(_) => "Invalid email address",
            Self::ScheduleInPast => "Scheduled time must be in the future",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAddress(address) => write!(f, "{}: {address}", self.message()),
            _ => f.write_str(self.message()),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from submitting or canceling a send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Rejected locally.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The gateway call failed.
    #[error("{0}")]
    Gateway(#[from] GatewayError),

    /// A cancel failed in a way retrying cannot fix; the message is treated as sent.
    #[error("{0} (message treated as sent)")]
    Final(GatewayError),
}

impl SendError {
    /// Returns true if repeating the request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_transient(),
            Self::Validation(_) | Self::Final(_) => false,
        }
    }
}

/// Lifecycle of an undoable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxState {
    /// Inside the undo window.
    Pending,
    /// The window closed or the server reported delivery.
    Completed,
    /// The server confirmed cancellation.
    Canceled,
}

/// An undoable send tracked by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Server-side id.
    pub id: OutboxId,
    /// Server-authoritative delivery time.
    pub send_at: DateTime<Utc>,
    /// Client-side mirror of `send_at`.
    pub deadline: Instant,
    /// Current state.
    pub state: OutboxState,
    /// The message as submitted.
    pub payload: OutgoingMessage,
}

/// Live countdown shown while an undo window is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    /// Entry being counted down.
    pub outbox_id: OutboxId,
    /// Subject, for the "Sending ..." banner.
    pub subject: String,
    /// Whole seconds left.
    pub remaining_secs: u64,
}

/// Terminal transition of a tracked entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// The message went out.
    Completed(OutboxId),
    /// The message will not be sent.
    Canceled(OutboxId),
    /// A newer undoable send took over the countdown. The message still goes out.
    Superseded(OutboxId),
}

/// What `submit` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Sent immediately.
    Sent {
        /// True if an undoable or scheduled send was downgraded because of
        /// attachments.
        forced_immediate: bool,
    },
    /// Placed on the scheduled list.
    Scheduled {
        /// Server-side id.
        outbox_id: OutboxId,
        /// Delivery time.
        send_at: DateTime<Utc>,
    },
    /// Queued with an undo window; the countdown is running.
    Queued {
        /// Server-side id.
        outbox_id: OutboxId,
        /// Delivery time.
        send_at: DateTime<Utc>,
    },
}

/// Result of canceling a queued send. Losing the race is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The message will not be sent.
    Canceled,
    /// The message already went out.
    AlreadySent,
}

/// Checks that a message has at least one recipient and that every
/// recipient looks like an address.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_outgoing(message: &OutgoingMessage) -> Result<(), ValidationError> {
    let mut recipients = message.all_recipients().peekable();
    if recipients.peek().is_none() {
        return Err(ValidationError::NoRecipients);
    }
    match recipients.find(|r| !is_valid_address(r)) {
        Some(invalid) => Err(ValidationError::InvalidAddress(invalid.to_string())),
        None => Ok(()),
    }
}

/// Basic address check: one `@`, non-empty local part, dotted domain.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    let Some((local, domain)) = address.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
        && !address.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        assert!(is_valid_address("user@example.com"));
        assert!(is_valid_address("user.name@sub.example.com"));
    }

    #[test]
    fn test_invalid_address() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("@example.com"));
        assert!(!is_valid_address("user@"));
        assert!(!is_valid_address("user@example"));
        assert!(!is_valid_address("user@@example.com"));
        assert!(!is_valid_address("user@example..com"));
        assert!(!is_valid_address("first last@example.com"));
    }

    #[test]
    fn test_validate_outgoing() {
        let empty = OutgoingMessage::new("me@example.com", "Hi", "");
        assert_eq!(validate_outgoing(&empty), Err(ValidationError::NoRecipients));

        let bcc_only = OutgoingMessage::new("me@example.com", "Hi", "").bcc("a@example.com");
        assert_eq!(validate_outgoing(&bcc_only), Ok(()));

        let bad = OutgoingMessage::new("me@example.com", "Hi", "")
            .to("a@example.com")
            .cc("bob");
        assert_eq!(
            validate_outgoing(&bad),
            Err(ValidationError::InvalidAddress("bob".into()))
        );
        assert_eq!(
            validate_outgoing(&bad).unwrap_err().to_string(),
            "Invalid email address: bob"
        );
    }
}
