//! Request and response types shared by every gateway implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::SearchFilters;
use crate::thread::normalize_subject;

/// Default number of messages per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u32);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A folder in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder name (also its path on the server).
    pub name: String,
    /// Number of unread messages.
    #[serde(default)]
    pub unread_count: u32,
    /// Total number of messages.
    #[serde(default)]
    pub total_count: u32,
}

impl Folder {
    /// Creates an empty folder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unread_count: 0,
            total_count: 0,
        }
    }

    /// Detected role of this folder.
    #[must_use]
    pub fn folder_type(&self) -> FolderType {
        FolderType::from_name(&self.name)
    }
}

/// Role of a folder, detected from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderType {
    /// Inbox folder.
    Inbox,
    /// Starred/flagged virtual folder.
    Starred,
    /// Sent mail folder.
    Sent,
    /// Drafts folder.
    Drafts,
    /// Trash folder.
    Trash,
    /// Spam/junk folder.
    Spam,
    /// Archive folder.
    Archive,
    /// Regular folder.
    Regular,
}

impl FolderType {
    /// Detect folder type from its name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower == "inbox" {
            Self::Inbox
        } else if lower.contains("starred") || lower.contains("flagged") {
            Self::Starred
        } else if lower.contains("sent") {
            Self::Sent
        } else if lower.contains("draft") {
            Self::Drafts
        } else if lower.contains("trash") || lower.contains("deleted") {
            Self::Trash
        } else if lower.contains("spam") || lower.contains("junk") {
            Self::Spam
        } else if lower.contains("archive") || lower.contains("all mail") {
            Self::Archive
        } else {
            Self::Regular
        }
    }

    /// Conventional folder name used when the server list has no match.
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Starred => "Starred",
            Self::Sent => "Sent",
            Self::Drafts => "Drafts",
            Self::Trash => "Trash",
            Self::Spam => "Spam",
            Self::Archive => "Archive",
            Self::Regular => "INBOX",
        }
    }
}

/// A message as cached by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Folder containing the message.
    pub folder: String,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Sender address.
    #[serde(default)]
    pub from: String,
    /// Recipient addresses.
    #[serde(default)]
    pub to: Vec<String>,
    /// CC addresses.
    #[serde(default)]
    pub cc: Vec<String>,
    /// Full body, present once the message has been opened.
    #[serde(default)]
    pub body: Option<String>,
    /// Short preview of the body.
    #[serde(default)]
    pub snippet: String,
    /// When the message was received.
    pub date: DateTime<Utc>,
    /// Whether the message has been read.
    #[serde(default)]
    pub is_read: bool,
    /// Whether the message is starred.
    #[serde(default)]
    pub is_starred: bool,
    /// Whether the message has attachments.
    #[serde(default)]
    pub has_attachments: bool,
    /// User labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Message {
    /// Conversation key: the subject with reply/forward prefixes stripped.
    #[must_use]
    pub fn thread_key(&self) -> String {
        normalize_subject(&self.subject)
    }
}

/// Pagination metadata returned with a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Total number of matching messages.
    pub total: u32,
    /// Total number of pages.
    pub pages: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            total: 0,
            pages: 0,
        }
    }
}

impl Pagination {
    /// Returns true if a later page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.pages
    }

    /// Returns true if an earlier page exists.
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// Parameters for listing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    /// Folder to list.
    pub folder: String,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Optional free-text filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// One page of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Message summaries.
    pub messages: Vec<Message>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

/// Result of an operator search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedSearchPage {
    /// Matching messages.
    pub messages: Vec<Message>,
    /// Pagination metadata.
    pub pagination: Pagination,
    /// Filters as the gateway understood them.
    #[serde(default)]
    pub filters: Option<SearchFilters>,
}

/// An action applied to many messages at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    /// Mark all as read.
    MarkRead,
    /// Mark all as unread.
    MarkUnread,
    /// Star all.
    Star,
    /// Unstar all.
    Unstar,
    /// Move all to the archive.
    Archive,
    /// Delete all.
    Delete,
    /// Move all to a folder.
    Move {
        /// Destination folder.
        folder: String,
    },
}

impl BulkAction {
    /// Returns true if the action takes the messages out of the current folder.
    #[must_use]
    pub const fn removes_from_folder(&self) -> bool {
        matches!(self, Self::Archive | Self::Delete | Self::Move { .. })
    }
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Raw content.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Attachment {
    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }
}

/// An email message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    #[serde(default)]
    pub cc: Vec<String>,
    /// BCC addresses.
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
}

impl OutgoingMessage {
    /// Creates a new outgoing message.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
            in_reply_to: None,
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: impl Into<String>) -> Self {
        self.cc.push(recipient.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: impl Into<String>) -> Self {
        self.bcc.push(recipient.into());
        self
    }

    /// Adds an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Returns all recipients (to, cc, bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    /// Returns true if any file is attached.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Identifier of a server-side queued send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(pub String);

impl OutboxId {
    /// Creates an outbox id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which server-side list a queued send belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Short cancellation window (send with undo).
    Undo,
    /// Send-later, listed and managed separately.
    Scheduled,
}

/// Acknowledgement of a queued send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueReceipt {
    /// Server-side outbox id.
    pub outbox_id: OutboxId,
    /// When the server will deliver the message.
    pub send_at: DateTime<Utc>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelResponse {
    /// The message will not be sent.
    Canceled,
    /// The message was delivered before the cancellation arrived.
    AlreadySent,
}

/// Server-side state of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for its send time.
    Pending,
    /// Delivered.
    Sent,
    /// Canceled before delivery.
    Canceled,
}

/// A message waiting in the outbox or the scheduled list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Server-side outbox id.
    pub outbox_id: OutboxId,
    /// Delivery time.
    pub send_at: DateTime<Utc>,
    /// Subject line.
    pub subject: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Current state.
    pub status: QueueStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_type_detection() {
        assert_eq!(FolderType::from_name("INBOX"), FolderType::Inbox);
        assert_eq!(FolderType::from_name("Sent Items"), FolderType::Sent);
        assert_eq!(FolderType::from_name("[Gmail]/Trash"), FolderType::Trash);
        assert_eq!(FolderType::from_name("Junk"), FolderType::Spam);
        assert_eq!(FolderType::from_name("[Gmail]/All Mail"), FolderType::Archive);
        assert_eq!(FolderType::from_name("Projects"), FolderType::Regular);
    }

    #[test]
    fn test_bulk_action_wire_format() {
        let json = serde_json::to_string(&BulkAction::Move {
            folder: "Archive".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"move","folder":"Archive"}"#);

        let parsed: BulkAction = serde_json::from_str(r#"{"action":"mark_read"}"#).unwrap();
        assert_eq!(parsed, BulkAction::MarkRead);
    }

    #[test]
    fn test_cancel_response_wire_format() {
        let parsed: CancelResponse =
            serde_json::from_str(r#"{"status":"already_sent"}"#).unwrap();
        assert_eq!(parsed, CancelResponse::AlreadySent);
    }

    #[test]
    fn test_outgoing_builder() {
        let msg = OutgoingMessage::new("me@example.com", "Hi", "Body")
            .to("a@example.com")
            .cc("b@example.com")
            .bcc("c@example.com");
        let all: Vec<&str> = msg.all_recipients().collect();
        assert_eq!(all, vec!["a@example.com", "b@example.com", "c@example.com"]);
        assert!(!msg.has_attachments());
    }

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination {
            page: 2,
            limit: 10,
            total: 25,
            pages: 3,
        };
        assert!(p.has_next());
        assert!(p.has_previous());
        assert!(!Pagination::default().has_previous());
    }
}
