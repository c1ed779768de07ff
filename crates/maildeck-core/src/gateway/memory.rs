//! In-memory gateway.
//!
//! Used by the test suite and by the binary's demo mode. It behaves like the
//! real service closely enough to exercise every coordination path: folder
//! counts are derived from message membership, the outbox delivers once
//! its delay has elapsed on the tokio clock (so paused-time tests move the
//! server deadline too), and latency or one-shot failures can be injected
//! per operation to reproduce races.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::Instant;

use super::types::{
    AdvancedSearchPage, BulkAction, CancelResponse, Folder, FolderType, Message, MessageId,
    MessagePage, MessageQuery, OutboxId, OutgoingMessage, Pagination, QueueKind, QueueReceipt,
    QueueStatus, QueuedMessage,
};
use super::{GatewayError, GatewayResult, MailGateway};
use crate::search::{SearchFilters, parse_filters};
use crate::thread::normalize_subject;

/// Maximum number of results returned by a free-text search.
const SEARCH_RESULT_CAP: usize = 100;

/// A request received by the in-memory gateway, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `list_folders`.
    ListFolders,
    /// `list_messages`.
    ListMessages {
        /// Folder listed.
        folder: String,
        /// Page requested.
        page: u32,
    },
    /// `fetch_message`.
    FetchMessage(MessageId),
    /// `fetch_thread`.
    FetchThread(String),
    /// `mark_read`.
    MarkRead(MessageId, bool),
    /// `set_starred`.
    SetStarred(MessageId, bool),
    /// `set_label`.
    SetLabel(MessageId, String, bool),
    /// `delete_message`.
    Delete(MessageId),
    /// `move_message`.
    Move(MessageId, String),
    /// `bulk_action`.
    Bulk(Vec<MessageId>, BulkAction),
    /// `search`.
    Search(String),
    /// `advanced_search`.
    AdvancedSearch(String),
    /// `send`.
    Send(String),
    /// `queue`.
    Queue(u64, QueueKind),
    /// `cancel_queued`.
    CancelQueued(OutboxId),
    /// `list_outbox`.
    ListOutbox,
    /// `list_scheduled`.
    ListScheduled,
    /// `update_scheduled`.
    UpdateScheduled(OutboxId),
    /// `cancel_scheduled`.
    CancelScheduled(OutboxId),
}

impl GatewayCall {
    /// Trait method name of this call, used as the key for injected faults.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ListFolders => "list_folders",
            Self::ListMessages { .. } => "list_messages",
            Self::FetchMessage(_) => "fetch_message",
            Self::FetchThread(_) => "fetch_thread",
            Self::MarkRead(..) => "mark_read",
            Self::SetStarred(..) => "set_starred",
            Self::SetLabel(..) => "set_label",
            Self::Delete(_) => "delete_message",
            Self::Move(..) => "move_message",
            Self::Bulk(..) => "bulk_action",
            Self::Search(_) => "search",
            Self::AdvancedSearch(_) => "advanced_search",
            Self::Send(_) => "send",
            Self::Queue(..) => "queue",
            Self::CancelQueued(_) => "cancel_queued",
            Self::ListOutbox => "list_outbox",
            Self::ListScheduled => "list_scheduled",
            Self::UpdateScheduled(_) => "update_scheduled",
            Self::CancelScheduled(_) => "cancel_scheduled",
        }
    }
}

#[derive(Debug)]
struct QueuedEntry {
    summary: QueuedMessage,
    due: Instant,
    kind: QueueKind,
    payload: OutgoingMessage,
}

#[derive(Debug, Default)]
struct Inner {
    folders: Vec<String>,
    messages: Vec<Message>,
    next_message_id: u32,
    next_outbox_id: u64,
    queued: Vec<QueuedEntry>,
    sent: Vec<OutgoingMessage>,
    calls: Vec<GatewayCall>,
    failures: HashMap<&'static str, VecDeque<GatewayError>>,
    latency: HashMap<&'static str, Duration>,
    folder_latency: HashMap<String, Duration>,
}

/// Thread-safe in-memory [`MailGateway`].
#[derive(Debug, Default)]
pub struct MemoryGateway {
    inner: Mutex<Inner>,
}

impl MemoryGateway {
    /// Creates a gateway with the standard folders and no messages.
    #[must_use]
    pub fn new() -> Self {
        let gateway = Self::default();
        {
            let mut inner = gateway.lock();
            inner.folders = ["INBOX", "Starred", "Sent", "Drafts", "Archive", "Trash"]
                .into_iter()
                .map(String::from)
                .collect();
            inner.next_message_id = 1;
        }
        gateway
    }

    /// Creates a gateway seeded with a small sample mailbox.
    #[must_use]
    pub fn demo() -> Self {
        let gateway = Self::new();
        let now = Utc::now();
        let samples = [
            ("INBOX", "alice@example.com", "Quarterly report", 1),
            ("INBOX", "bob@example.com", "Re: Quarterly report", 2),
            ("INBOX", "carol@example.com", "Lunch on Friday?", 3),
            ("INBOX", "dave@example.com", "Fwd: Conference schedule", 4),
            ("INBOX", "erin@example.com", "Invoice #2041", 5),
            ("Archive", "alice@example.com", "Kickoff notes", 30),
            ("Sent", "me@example.com", "Re: Lunch on Friday?", 2),
        ];
        for (folder, from, subject, hours_ago) in samples {
            gateway.insert_message(Message {
                id: MessageId(0),
                folder: folder.to_string(),
                subject: subject.to_string(),
                from: from.to_string(),
                to: vec!["me@example.com".to_string()],
                cc: Vec::new(),
                body: Some(format!("Hello,\n\nThis is about \"{subject}\".\n\n-- {from}")),
                snippet: format!("This is about \"{subject}\""),
                date: now - ChronoDuration::hours(hours_ago),
                is_read: hours_ago > 3,
                is_starred: subject.starts_with("Invoice"),
                has_attachments: false,
                labels: Vec::new(),
            });
        }
        gateway
    }

    /// Inserts a message. An id of `0` is replaced with the next free id.
    /// Returns the id the message was stored under.
    pub fn insert_message(&self, mut message: Message) -> MessageId {
        let mut inner = self.lock();
        if message.id.0 == 0 {
            message.id = MessageId(inner.next_message_id);
        }
        inner.next_message_id = inner.next_message_id.max(message.id.0 + 1);
        if !inner.folders.contains(&message.folder) {
            inner.folders.push(message.folder.clone());
        }
        let id = message.id;
        inner.messages.push(message);
        id
    }

    /// Returns the stored copy of a message.
    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded requests.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Returns every message delivered so far (immediate sends and due queue entries).
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.lock().sent.clone()
    }

    /// Makes the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: GatewayError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Delays every call to `operation`.
    pub fn set_latency(&self, operation: &'static str, latency: Duration) {
        self.lock().latency.insert(operation, latency);
    }

    /// Delays `list_messages` for one folder only.
    pub fn set_folder_latency(&self, folder: impl Into<String>, latency: Duration) {
        self.lock().folder_latency.insert(folder.into(), latency);
    }

    /// Simulates the server delivering a queued message right now,
    /// regardless of its `send_at`. Returns false if it was not pending.
    pub fn deliver(&self, id: &OutboxId) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner
            .queued
            .iter()
            .position(|e| &e.summary.outbox_id == id && e.summary.status == QueueStatus::Pending)
        else {
            return false;
        };
        inner.queued[index].summary.status = QueueStatus::Sent;
        let payload = inner.queued[index].payload.clone();
        inner.deliver_payload(payload);
        true
    }

    /// Server-side status of a queued message.
    #[must_use]
    pub fn queue_status(&self, id: &OutboxId) -> Option<QueueStatus> {
        let mut inner = self.lock();
        inner.deliver_due(Instant::now());
        inner
            .queued
            .iter()
            .find(|e| &e.summary.outbox_id == id)
            .map(|e| e.summary.status)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and returns how long it should take.
    fn begin(&self, call: GatewayCall) -> Duration {
        let mut inner = self.lock();
        let latency = match &call {
            GatewayCall::ListMessages { folder, .. } => inner.folder_latency.get(folder).copied(),
            _ => None,
        }
        .or_else(|| inner.latency.get(call.operation()).copied())
        .unwrap_or_default();
        tracing::debug!(?call, ?latency, "Memory gateway call");
        inner.calls.push(call);
        latency
    }

    /// Waits out the latency, then runs `f` unless a failure was injected.
    async fn respond<T>(
        &self,
        call: GatewayCall,
        f: impl FnOnce(&mut Inner) -> GatewayResult<T> + Send,
    ) -> GatewayResult<T> {
        let operation = call.operation();
        let latency = self.begin(call);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        if let Some(error) = inner
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        f(&mut inner)
    }
}

impl Inner {
    fn folder_list(&self) -> Vec<Folder> {
        self.folders
            .iter()
            .map(|name| {
                let members = self.messages.iter().filter(|m| {
                    if FolderType::from_name(name) == FolderType::Starred {
                        m.is_starred && FolderType::from_name(&m.folder) != FolderType::Trash
                    } else {
                        &m.folder == name
                    }
                });
                let (total, unread) = members.fold((0, 0), |(total, unread), m| {
                    (total + 1, unread + u32::from(!m.is_read))
                });
                Folder {
                    name: name.clone(),
                    unread_count: unread,
                    total_count: total,
                }
            })
            .collect()
    }

    fn in_folder(&self, folder: &str) -> Vec<Message> {
        let starred = FolderType::from_name(folder) == FolderType::Starred;
        let mut list: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                if starred {
                    m.is_starred && FolderType::from_name(&m.folder) != FolderType::Trash
                } else {
                    m.folder == folder
                }
            })
            .map(summary)
            .collect();
        list.sort_by(|a, b| b.date.cmp(&a.date));
        list
    }

    fn message_mut(&mut self, id: MessageId) -> GatewayResult<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("message {id}")))
    }

    fn trash_name(&self) -> String {
        self.folders
            .iter()
            .find(|f| FolderType::from_name(f) == FolderType::Trash)
            .cloned()
            .unwrap_or_else(|| FolderType::Trash.default_name().to_string())
    }

    fn archive_name(&self) -> String {
        self.folders
            .iter()
            .find(|f| FolderType::from_name(f) == FolderType::Archive)
            .cloned()
            .unwrap_or_else(|| FolderType::Archive.default_name().to_string())
    }

    fn delete(&mut self, id: MessageId) -> GatewayResult<()> {
        let trash = self.trash_name();
        let message = self.message_mut(id)?;
        if message.folder == trash {
            self.messages.retain(|m| m.id != id);
        } else {
            message.folder = trash;
        }
        Ok(())
    }

    fn move_to(&mut self, id: MessageId, folder: &str) -> GatewayResult<()> {
        if !self.folders.iter().any(|f| f == folder) {
            return Err(GatewayError::NotFound(format!("folder {folder}")));
        }
        self.message_mut(id)?.folder = folder.to_string();
        Ok(())
    }

    fn deliver_payload(&mut self, payload: OutgoingMessage) {
        let sent_folder = self
            .folders
            .iter()
            .find(|f| FolderType::from_name(f) == FolderType::Sent)
            .cloned()
            .unwrap_or_else(|| FolderType::Sent.default_name().to_string());
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        self.messages.push(Message {
            id,
            folder: sent_folder,
            subject: payload.subject.clone(),
            from: payload.from.clone(),
            to: payload.to.clone(),
            cc: payload.cc.clone(),
            snippet: payload.body.chars().take(100).collect(),
            body: Some(payload.body.clone()),
            date: Utc::now(),
            is_read: true,
            is_starred: false,
            has_attachments: payload.has_attachments(),
            labels: Vec::new(),
        });
        self.sent.push(payload);
    }

    /// Delivers every pending entry whose send time has passed.
    fn deliver_due(&mut self, now: Instant) {
        let due: Vec<OutgoingMessage> = self
            .queued
            .iter_mut()
            .filter(|e| e.summary.status == QueueStatus::Pending && e.due <= now)
            .map(|e| {
                e.summary.status = QueueStatus::Sent;
                e.payload.clone()
            })
            .collect();
        for payload in due {
            self.deliver_payload(payload);
        }
    }

    fn cancel(&mut self, id: &OutboxId, kind: QueueKind) -> GatewayResult<CancelResponse> {
        self.deliver_due(Instant::now());
        let entry = self
            .queued
            .iter_mut()
            .find(|e| &e.summary.outbox_id == id && e.kind == kind)
            .ok_or_else(|| GatewayError::NotFound(format!("outbox entry {id}")))?;
        match entry.summary.status {
            QueueStatus::Sent => Ok(CancelResponse::AlreadySent),
            QueueStatus::Canceled | QueueStatus::Pending => {
                entry.summary.status = QueueStatus::Canceled;
                Ok(CancelResponse::Canceled)
            }
        }
    }

    fn pending(&mut self, kind: QueueKind) -> Vec<QueuedMessage> {
        self.deliver_due(Instant::now());
        self.queued
            .iter()
            .filter(|e| e.kind == kind && e.summary.status == QueueStatus::Pending)
            .map(|e| e.summary.clone())
            .collect()
    }
}

/// List entries carry no body, like the real listing endpoint.
fn summary(message: &Message) -> Message {
    Message {
        body: None,
        ..message.clone()
    }
}

fn paginate(messages: Vec<Message>, page: u32, limit: u32) -> (Vec<Message>, Pagination) {
    let limit = limit.max(1);
    let total = u32::try_from(messages.len()).unwrap_or(u32::MAX);
    let pages = total.div_ceil(limit);
    let page = page.max(1);
    let start = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
    let items = messages
        .into_iter()
        .skip(start)
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect();
    (
        items,
        Pagination {
            page,
            limit,
            total,
            pages,
        },
    )
}

fn matches_text(message: &Message, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    message.subject.to_lowercase().contains(&needle)
        || message.from.to_lowercase().contains(&needle)
        || message.snippet.to_lowercase().contains(&needle)
        || message
            .body
            .as_deref()
            .is_some_and(|b| b.to_lowercase().contains(&needle))
}

fn matches_filters(message: &Message, filters: &SearchFilters) -> bool {
    let contains = |haystack: &str, needle: &String| {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    };
    filters.terms.iter().all(|t| matches_text(message, t))
        && filters.from.iter().all(|f| contains(&message.from, f))
        && filters
            .to
            .iter()
            .all(|t| message.to.iter().any(|addr| contains(addr, t)))
        && filters.subject.iter().all(|s| contains(&message.subject, s))
        && filters
            .folder
            .as_ref()
            .is_none_or(|f| message.folder.eq_ignore_ascii_case(f))
        && filters
            .labels
            .iter()
            .all(|l| message.labels.iter().any(|ml| ml.eq_ignore_ascii_case(l)))
        && filters.is_unread.is_none_or(|u| message.is_read != u)
        && filters.is_starred.is_none_or(|s| message.is_starred == s)
        && filters
            .has_attachment
            .is_none_or(|a| message.has_attachments == a)
        && filters.before.is_none_or(|d| message.date < d)
        && filters.after.is_none_or(|d| message.date >= d)
}

impl MailGateway for MemoryGateway {
    async fn list_folders(&self) -> GatewayResult<Vec<Folder>> {
        self.respond(GatewayCall::ListFolders, |inner| Ok(inner.folder_list()))
            .await
    }

    async fn list_messages(&self, query: &MessageQuery) -> GatewayResult<MessagePage> {
        let call = GatewayCall::ListMessages {
            folder: query.folder.clone(),
            page: query.page,
        };
        self.respond(call, |inner| {
            let mut list = inner.in_folder(&query.folder);
            if let Some(q) = query.query.as_deref() {
                list.retain(|m| matches_text(m, q));
            }
            let (messages, pagination) = paginate(list, query.page, query.limit);
            Ok(MessagePage {
                messages,
                pagination,
            })
        })
        .await
    }

    async fn fetch_message(&self, id: MessageId) -> GatewayResult<Message> {
        self.respond(GatewayCall::FetchMessage(id), |inner| {
            inner.message_mut(id).map(|m| m.clone())
        })
        .await
    }

    async fn fetch_thread(&self, subject: &str) -> GatewayResult<Vec<Message>> {
        self.respond(GatewayCall::FetchThread(subject.to_string()), |inner| {
            let mut thread: Vec<Message> = inner
                .messages
                .iter()
                .filter(|m| normalize_subject(&m.subject) == subject)
                .cloned()
                .collect();
            thread.sort_by(|a, b| a.date.cmp(&b.date));
            Ok(thread)
        })
        .await
    }

    async fn mark_read(&self, id: MessageId, read: bool) -> GatewayResult<()> {
        self.respond(GatewayCall::MarkRead(id, read), |inner| {
            inner.message_mut(id)?.is_read = read;
            Ok(())
        })
        .await
    }

    async fn set_starred(&self, id: MessageId, starred: bool) -> GatewayResult<()> {
        self.respond(GatewayCall::SetStarred(id, starred), |inner| {
            inner.message_mut(id)?.is_starred = starred;
            Ok(())
        })
        .await
    }

    async fn set_label(&self, id: MessageId, label: &str, add: bool) -> GatewayResult<()> {
        self.respond(GatewayCall::SetLabel(id, label.to_string(), add), |inner| {
            let message = inner.message_mut(id)?;
            message.labels.retain(|l| l != label);
            if add {
                message.labels.push(label.to_string());
            }
            Ok(())
        })
        .await
    }

    async fn delete_message(&self, id: MessageId) -> GatewayResult<()> {
        self.respond(GatewayCall::Delete(id), |inner| inner.delete(id))
            .await
    }

    async fn move_message(&self, id: MessageId, folder: &str) -> GatewayResult<()> {
        self.respond(GatewayCall::Move(id, folder.to_string()), |inner| {
            inner.move_to(id, folder)
        })
        .await
    }

    async fn bulk_action(&self, ids: &[MessageId], action: &BulkAction) -> GatewayResult<()> {
        self.respond(GatewayCall::Bulk(ids.to_vec(), action.clone()), |inner| {
            for &id in ids {
                match action {
                    BulkAction::MarkRead => inner.message_mut(id)?.is_read = true,
                    BulkAction::MarkUnread => inner.message_mut(id)?.is_read = false,
                    BulkAction::Star => inner.message_mut(id)?.is_starred = true,
                    BulkAction::Unstar => inner.message_mut(id)?.is_starred = false,
                    BulkAction::Delete => inner.delete(id)?,
                    BulkAction::Archive => {
                        let archive = inner.archive_name();
                        inner.move_to(id, &archive)?;
                    }
                    BulkAction::Move { folder } => inner.move_to(id, folder)?,
                }
            }
            Ok(())
        })
        .await
    }

    async fn search(&self, query: &str, folder: &str) -> GatewayResult<Vec<Message>> {
        self.respond(GatewayCall::Search(query.to_string()), |inner| {
            let mut results = inner.in_folder(folder);
            results.retain(|m| {
                query
                    .split_whitespace()
                    .all(|term| matches_text(m, term))
            });
            results.truncate(SEARCH_RESULT_CAP);
            Ok(results)
        })
        .await
    }

    async fn advanced_search(
        &self,
        query: &str,
        page: u32,
        limit: u32,
    ) -> GatewayResult<AdvancedSearchPage> {
        self.respond(GatewayCall::AdvancedSearch(query.to_string()), |inner| {
            let filters = parse_filters(query);
            let mut results: Vec<Message> = inner
                .messages
                .iter()
                .filter(|m| matches_filters(m, &filters))
                .map(summary)
                .collect();
            results.sort_by(|a, b| b.date.cmp(&a.date));
            let (messages, pagination) = paginate(results, page, limit);
            Ok(AdvancedSearchPage {
                messages,
                pagination,
                filters: Some(filters),
            })
        })
        .await
    }

    async fn send(&self, message: &OutgoingMessage) -> GatewayResult<()> {
        self.respond(GatewayCall::Send(message.subject.clone()), |inner| {
            inner.deliver_payload(message.clone());
            Ok(())
        })
        .await
    }

    async fn queue(
        &self,
        message: &OutgoingMessage,
        delay_secs: u64,
        kind: QueueKind,
    ) -> GatewayResult<QueueReceipt> {
        self.respond(GatewayCall::Queue(delay_secs, kind), |inner| {
            if kind == QueueKind::Undo && message.has_attachments() {
                return Err(GatewayError::Status {
                    status: 422,
                    message: "attachments cannot be queued".to_string(),
                });
            }
            inner.next_outbox_id += 1;
            let outbox_id = OutboxId(format!("ob-{}", inner.next_outbox_id));
            let delay = i64::try_from(delay_secs).unwrap_or(i64::MAX);
            let send_at = Utc::now() + ChronoDuration::seconds(delay);
            inner.queued.push(QueuedEntry {
                due: Instant::now() + Duration::from_secs(delay_secs),
                summary: QueuedMessage {
                    outbox_id: outbox_id.clone(),
                    send_at,
                    subject: message.subject.clone(),
                    to: message.to.clone(),
                    status: QueueStatus::Pending,
                },
                kind,
                payload: message.clone(),
            });
            Ok(QueueReceipt { outbox_id, send_at })
        })
        .await
    }

    async fn cancel_queued(&self, id: &OutboxId) -> GatewayResult<CancelResponse> {
        self.respond(GatewayCall::CancelQueued(id.clone()), |inner| {
            inner.cancel(id, QueueKind::Undo)
        })
        .await
    }

    async fn list_outbox(&self) -> GatewayResult<Vec<QueuedMessage>> {
        self.respond(GatewayCall::ListOutbox, |inner| {
            Ok(inner.pending(QueueKind::Undo))
        })
        .await
    }

    async fn list_scheduled(&self) -> GatewayResult<Vec<QueuedMessage>> {
        self.respond(GatewayCall::ListScheduled, |inner| {
            Ok(inner.pending(QueueKind::Scheduled))
        })
        .await
    }

    async fn update_scheduled(
        &self,
        id: &OutboxId,
        send_at: DateTime<Utc>,
    ) -> GatewayResult<QueueReceipt> {
        self.respond(GatewayCall::UpdateScheduled(id.clone()), |inner| {
            inner.deliver_due(Instant::now());
            let entry = inner
                .queued
                .iter_mut()
                .find(|e| &e.summary.outbox_id == id && e.kind == QueueKind::Scheduled)
                .ok_or_else(|| GatewayError::NotFound(format!("scheduled entry {id}")))?;
            if entry.summary.status != QueueStatus::Pending {
                return Err(GatewayError::Status {
                    status: 409,
                    message: format!("scheduled entry {id} is no longer pending"),
                });
            }
            entry.summary.send_at = send_at;
            entry.due = Instant::now() + (send_at - Utc::now()).to_std().unwrap_or_default();
            Ok(QueueReceipt {
                outbox_id: id.clone(),
                send_at,
            })
        })
        .await
    }

    async fn cancel_scheduled(&self, id: &OutboxId) -> GatewayResult<CancelResponse> {
        self.respond(GatewayCall::CancelScheduled(id.clone()), |inner| {
            inner.cancel(id, QueueKind::Scheduled)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(folder: &str, subject: &str, hours_ago: i64) -> Message {
        Message {
            id: MessageId(0),
            folder: folder.to_string(),
            subject: subject.to_string(),
            from: "alice@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            cc: Vec::new(),
            body: Some("body".to_string()),
            snippet: String::new(),
            date: Utc::now() - ChronoDuration::hours(hours_ago),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_folder_counts_follow_membership() {
        let gateway = MemoryGateway::new();
        let id = gateway.insert_message(message("INBOX", "Hello", 1));
        gateway.insert_message(message("INBOX", "Second", 2));

        gateway.delete_message(id).await.unwrap();

        let folders = gateway.list_folders().await.unwrap();
        let inbox = folders.iter().find(|f| f.name == "INBOX").unwrap();
        let trash = folders.iter().find(|f| f.name == "Trash").unwrap();
        assert_eq!(inbox.total_count, 1);
        assert_eq!(trash.total_count, 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paginated() {
        let gateway = MemoryGateway::new();
        for hours in 1..=5 {
            gateway.insert_message(message("INBOX", &format!("m{hours}"), hours));
        }

        let page = gateway
            .list_messages(&MessageQuery {
                folder: "INBOX".into(),
                page: 2,
                limit: 2,
                query: None,
            })
            .await
            .unwrap();

        let subjects: Vec<&str> = page.messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["m3", "m4"]);
        assert_eq!(page.pagination.pages, 3);
        assert!(page.messages.iter().all(|m| m.body.is_none()));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let gateway = MemoryGateway::new();
        gateway.fail_next("list_folders", GatewayError::Network("offline".into()));

        assert!(gateway.list_folders().await.is_err());
        assert!(gateway.list_folders().await.is_ok());
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_after_delivery_reports_already_sent() {
        let gateway = MemoryGateway::new();
        let payload = OutgoingMessage::new("me@example.com", "Hi", "Body").to("a@example.com");
        let receipt = gateway.queue(&payload, 30, QueueKind::Undo).await.unwrap();

        assert!(gateway.deliver(&receipt.outbox_id));
        let response = gateway.cancel_queued(&receipt.outbox_id).await.unwrap();

        assert_eq!(response, CancelResponse::AlreadySent);
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_delivers_on_tokio_clock() {
        let gateway = MemoryGateway::new();
        let payload = OutgoingMessage::new("me@example.com", "Hi", "Body").to("a@example.com");
        let receipt = gateway.queue(&payload, 2, QueueKind::Undo).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(gateway.queue_status(&receipt.outbox_id), Some(QueueStatus::Pending));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let response = gateway.cancel_queued(&receipt.outbox_id).await.unwrap();
        assert_eq!(response, CancelResponse::AlreadySent);
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_response() {
        use tokio_test::{assert_pending, assert_ready};

        let gateway = MemoryGateway::new();
        gateway.set_latency("list_folders", Duration::from_secs(1));

        let mut call = tokio_test::task::spawn(gateway.list_folders());
        assert_pending!(call.poll());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(assert_ready!(call.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let gateway = MemoryGateway::new();
        let payload = OutgoingMessage::new("me@example.com", "Hi", "Body").to("a@example.com");
        let receipt = gateway.queue(&payload, 30, QueueKind::Undo).await.unwrap();

        let first = gateway.cancel_queued(&receipt.outbox_id).await.unwrap();
        let second = gateway.cancel_queued(&receipt.outbox_id).await.unwrap();

        assert_eq!(first, CancelResponse::Canceled);
        assert_eq!(second, CancelResponse::Canceled);
        assert!(!gateway.deliver(&receipt.outbox_id));
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_thread_lookup_matches_normalized_subject() {
        let gateway = MemoryGateway::new();
        gateway.insert_message(message("INBOX", "Re: Budget", 1));
        gateway.insert_message(message("Sent", "Budget", 3));
        gateway.insert_message(message("INBOX", "Other", 2));

        let thread = gateway.fetch_thread("Budget").await.unwrap();

        let subjects: Vec<&str> = thread.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Budget", "Re: Budget"]);
    }

    #[tokio::test]
    async fn test_advanced_search_applies_filters() {
        let gateway = MemoryGateway::new();
        let mut with_file = message("INBOX", "Report", 1);
        with_file.has_attachments = true;
        gateway.insert_message(with_file);
        gateway.insert_message(message("INBOX", "Report draft", 2));

        let page = gateway
            .advanced_search("from:alice has:attachment", 1, 50)
            .await
            .unwrap();

        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].subject, "Report");
        assert_eq!(
            page.filters.map(|f| f.has_attachment),
            Some(Some(true))
        );
    }
}
