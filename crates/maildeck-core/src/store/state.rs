//! Store state and the read-only view handed to renderers.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::gateway::{
    DEFAULT_PAGE_SIZE, Folder, FolderType, Message, MessageId, MessageQuery, Pagination,
};
use crate::search::SearchFilters;
use crate::settings::AutoAdvance;

/// Active search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    /// Query as typed.
    pub query: String,
    /// Parsed operators, `None` for a free-text search.
    pub filters: Option<SearchFilters>,
    /// True while the request is in flight.
    pub is_searching: bool,
}

impl SearchState {
    /// Returns true if this is an operator search.
    #[must_use]
    pub const fn is_operator(&self) -> bool {
        self.filters.is_some()
    }
}

/// Everything the UI may read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Folder list with counts.
    pub folders: Vec<Folder>,
    /// Folder currently shown.
    pub current_folder: String,
    /// Messages in the current page or search result.
    pub messages: Vec<Message>,
    /// Pagination of `messages`.
    pub pagination: Pagination,
    /// Message under the cursor.
    pub selected: Option<MessageId>,
    /// Messages ticked for a bulk action.
    pub selection: BTreeSet<MessageId>,
    /// Active search, if any.
    pub search: Option<SearchState>,
    /// Recent queries, newest first.
    pub search_history: Vec<String>,
    /// Message open in the reading view, with its body.
    pub open_message: Option<Message>,
    /// Conversation of the open message, oldest first.
    pub thread: Option<Vec<Message>>,
    /// True while a list fetch is in flight.
    pub is_loading: bool,
    /// Last error reported by a fetch or mutation.
    pub last_error: Option<String>,
    /// List generation. Advances whenever the list context changes.
    pub generation: u64,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            current_folder: FolderType::Inbox.default_name().to_string(),
            messages: Vec::new(),
            pagination: Pagination::default(),
            selected: None,
            selection: BTreeSet::new(),
            search: None,
            search_history: Vec::new(),
            open_message: None,
            thread: None,
            is_loading: false,
            last_error: None,
            generation: 0,
        }
    }
}

impl StoreSnapshot {
    /// Position of the cursor in `messages`.
    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        let id = self.selected?;
        self.messages.iter().position(|m| m.id == id)
    }

    /// Message under the cursor.
    #[must_use]
    pub fn selected_message(&self) -> Option<&Message> {
        let id = self.selected?;
        self.messages.iter().find(|m| m.id == id)
    }

    /// Finds a message in the list or the reading view.
    #[must_use]
    pub fn find_message(&self, id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .or_else(|| self.open_message.as_ref().filter(|m| m.id == id))
    }

    /// Folder entry by name.
    #[must_use]
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }
}

/// A flag subject to optimistic writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FlagKind {
    Read,
    Starred,
    Label(String),
}

impl FlagKind {
    pub(crate) fn get(&self, message: &Message) -> bool {
        match self {
            Self::Read => message.is_read,
            Self::Starred => message.is_starred,
            Self::Label(label) => message.labels.iter().any(|l| l == label),
        }
    }

    pub(crate) fn set(&self, message: &mut Message, value: bool) {
        match self {
            Self::Read => message.is_read = value,
            Self::Starred => message.is_starred = value,
            Self::Label(label) => {
                message.labels.retain(|l| l != label);
                if value {
                    message.labels.push(label.clone());
                }
            }
        }
    }
}

/// A flag write the gateway has not yet reflected in every list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlagWrite {
    pub(crate) seq: u64,
    pub(crate) value: bool,
    /// List generation current when the gateway confirmed the write.
    pub(crate) settled: Option<u64>,
}

impl FlagWrite {
    pub(crate) const fn in_flight(seq: u64, value: bool) -> Self {
        Self {
            seq,
            value,
            settled: None,
        }
    }
}

/// What a list fetch asks the gateway for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchRequest {
    Folder(MessageQuery),
    FreeText { query: String, folder: String },
    Operator { query: String, page: u32, limit: u32 },
}

/// A fetch bound to the generation it was issued in.
#[derive(Debug, Clone)]
pub(crate) struct FetchPlan {
    pub(crate) generation: u64,
    pub(crate) request: FetchRequest,
}

/// Mutable store state. Guarded by a `std::sync::Mutex` in the store and
/// never held across an await.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) view: StoreSnapshot,
    pub(crate) auto_advance: AutoAdvance,
    pub(crate) page_size: u32,
    /// Latest write per (message, flag). Kept after confirmation until a
    /// list fetch planned later has landed. Older writes never roll back.
    pub(crate) flag_writes: HashMap<(MessageId, FlagKind), FlagWrite>,
    pub(crate) write_seq: u64,
    /// Messages whose delete or move is in flight.
    pub(crate) pending_removals: HashSet<MessageId>,
    pub(crate) folder_generation: u64,
    pub(crate) open_token: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            view: StoreSnapshot::default(),
            auto_advance: AutoAdvance::default(),
            page_size: DEFAULT_PAGE_SIZE,
            flag_writes: HashMap::new(),
            write_seq: 0,
            pending_removals: HashSet::new(),
            folder_generation: 0,
            open_token: 0,
        }
    }
}

impl StoreState {
    /// Starts a new list generation for the current folder, page and search.
    pub(crate) fn plan_fetch(&mut self) -> FetchPlan {
        self.view.generation += 1;
        self.view.is_loading = true;

        let request = match &self.view.search {
            Some(SearchState {
                query,
                filters: Some(_),
                ..
            }) => FetchRequest::Operator {
                query: query.clone(),
                page: self.view.pagination.page,
                limit: self.page_size,
            },
            Some(SearchState { query, .. }) => FetchRequest::FreeText {
                query: query.clone(),
                folder: self.view.current_folder.clone(),
            },
            None => FetchRequest::Folder(MessageQuery {
                folder: self.view.current_folder.clone(),
                page: self.view.pagination.page,
                limit: self.page_size,
                query: None,
            }),
        };

        FetchPlan {
            generation: self.view.generation,
            request,
        }
    }

    /// Replaces the list in one step, dropping messages whose removal is
    /// still in flight and a cursor that no longer points into the list.
    pub(crate) fn apply_list(&mut self, mut messages: Vec<Message>, pagination: Pagination) {
        messages.retain(|m| !self.pending_removals.contains(&m.id));
        // Writes confirmed before this fetch was planned are in the response.
        let generation = self.view.generation;
        self.flag_writes
            .retain(|_, write| write.settled.is_none_or(|settled| settled >= generation));
        for message in &mut messages {
            self.overlay_pending_flags(message);
        }
        self.view.messages = messages;
        self.view.pagination = pagination;
        self.view.is_loading = false;
        self.view.last_error = None;

        let ids: HashSet<MessageId> = self.view.messages.iter().map(|m| m.id).collect();
        if self.view.selected.is_some_and(|id| !ids.contains(&id)) {
            self.view.selected = None;
        }
        self.view.selection.retain(|id| ids.contains(id));
        if let Some(search) = &mut self.view.search {
            search.is_searching = false;
        }
    }

    /// Re-applies recent flag writes to a copy fresh from the gateway,
    /// which may predate them.
    pub(crate) fn overlay_pending_flags(&self, message: &mut Message) {
        for ((id, kind), write) in &self.flag_writes {
            if *id == message.id {
                kind.set(message, write.value);
            }
        }
    }

    /// Applies `f` to every cached copy of a message. Returns false if none exist.
    pub(crate) fn update_message(&mut self, id: MessageId, mut f: impl FnMut(&mut Message)) -> bool {
        let mut found = false;
        let copies = self
            .view
            .messages
            .iter_mut()
            .chain(self.view.open_message.iter_mut())
            .chain(self.view.thread.iter_mut().flatten());
        for message in copies.filter(|m| m.id == id) {
            f(message);
            found = true;
        }
        found
    }

    /// Resets everything tied to the current list context.
    pub(crate) fn clear_context(&mut self) {
        self.view.messages.clear();
        self.view.selected = None;
        self.view.selection.clear();
        self.view.search = None;
        self.view.pagination = Pagination {
            limit: self.page_size,
            ..Pagination::default()
        };
        self.view.open_message = None;
        self.view.thread = None;
    }

    /// Records a successful query at the front of the history.
    pub(crate) fn remember_query(&mut self, query: &str) {
        let history = &mut self.view.search_history;
        history.retain(|q| q != query);
        history.insert(0, query.to_string());
        history.truncate(super::SEARCH_HISTORY_LIMIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::parse_filters;

    #[test]
    fn test_plan_fetch_routes_by_search() {
        let mut state = StoreState::default();
        let plan = state.plan_fetch();
        assert_eq!(plan.generation, 1);
        assert!(matches!(plan.request, FetchRequest::Folder(ref q) if q.folder == "INBOX"));

        state.view.search = Some(SearchState {
            query: "budget".into(),
            filters: None,
            is_searching: true,
        });
        assert!(matches!(
            state.plan_fetch().request,
            FetchRequest::FreeText { ref query, .. } if query == "budget"
        ));

        state.view.search = Some(SearchState {
            query: "is:unread".into(),
            filters: Some(parse_filters("is:unread")),
            is_searching: true,
        });
        let plan = state.plan_fetch();
        assert_eq!(plan.generation, 3);
        assert!(matches!(plan.request, FetchRequest::Operator { page: 1, .. }));
    }

    #[test]
    fn test_history_is_bounded_and_deduplicated() {
        let mut state = StoreState::default();
        for i in 0..12 {
            state.remember_query(&format!("q{i}"));
        }
        state.remember_query("q5");

        let history = &state.view.search_history;
        assert_eq!(history.len(), 10);
        assert_eq!(history[0], "q5");
        assert_eq!(history[1], "q11");
        assert_eq!(history.iter().filter(|q| *q == "q5").count(), 1);
    }

    #[test]
    fn test_apply_list_keeps_in_flight_flags() {
        let mut state = StoreState::default();
        let mut stale = sample(MessageId(7));
        stale.labels.push("old".into());
        let plan = state.plan_fetch();
        state
            .flag_writes
            .insert((MessageId(7), FlagKind::Starred), FlagWrite::in_flight(1, true));
        state.flag_writes.insert(
            (MessageId(7), FlagKind::Label("old".into())),
            FlagWrite::in_flight(2, false),
        );
        // Confirmed after the fetch was planned, so the response may predate it.
        state.flag_writes.insert(
            (MessageId(8), FlagKind::Read),
            FlagWrite {
                settled: Some(plan.generation),
                ..FlagWrite::in_flight(3, true)
            },
        );

        state.apply_list(
            vec![stale, sample(MessageId(8)), sample(MessageId(9))],
            Pagination::default(),
        );

        let messages = &state.view.messages;
        assert!(messages[0].is_starred);
        assert!(messages[0].labels.is_empty());
        assert!(messages[1].is_read);
        assert!(!messages[2].is_read && !messages[2].is_starred);
        assert_eq!(state.flag_writes.len(), 3);

        // A fetch planned after the confirmation sees the server's truth.
        state.plan_fetch();
        state.apply_list(vec![sample(MessageId(8))], Pagination::default());
        assert!(!state.view.messages[0].is_read);
        assert_eq!(state.flag_writes.len(), 2);
    }

    fn sample(id: MessageId) -> Message {
        Message {
            id,
            folder: "INBOX".into(),
            subject: String::new(),
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            body: None,
            snippet: String::new(),
            date: chrono::Utc::now(),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_label_flag() {
        let mut message = Message {
            id: MessageId(1),
            folder: "INBOX".into(),
            subject: String::new(),
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            body: None,
            snippet: String::new(),
            date: chrono::Utc::now(),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: vec!["work".into()],
        };
        let kind = FlagKind::Label("urgent".into());
        assert!(!kind.get(&message));
        kind.set(&mut message, true);
        kind.set(&mut message, true);
        assert_eq!(message.labels, vec!["work", "urgent"]);
        kind.set(&mut message, false);
        assert_eq!(message.labels, vec!["work"]);
    }
}
