//! Mailbox state store.
//!
//! Single source of truth for what the client believes about the mailbox.
//! Local edits are applied optimistically and reconciled when the gateway
//! answers:
//!
//! - Every list fetch is tagged with a generation. A response that arrives
//!   after the folder, page or search changed is dropped.
//! - Flag writes (read, starred, labels) are ordered per message and rolled
//!   back on failure, unless a newer write to the same flag superseded them.
//! - Delete and move take the message out of the list at once, move the
//!   cursor by the auto-advance rule, and put the message back if the
//!   gateway refuses.

mod advance;
mod state;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::gateway::{
    BulkAction, GatewayError, GatewayResult, MailGateway, Message, MessageId, Pagination,
};
use crate::search::{QueryKind, SearchFilters, classify_query};
use crate::settings::AutoAdvance;
use crate::thread::ThreadResolver;

pub use advance::successor;
pub use state::{SearchState, StoreSnapshot};
use state::{FetchPlan, FetchRequest, FlagKind, FlagWrite, StoreState};

/// Number of recent queries kept in the search history.
pub const SEARCH_HISTORY_LIMIT: usize = 10;

/// How a list fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The response replaced the list.
    Applied,
    /// The context changed while the request was in flight; the response was dropped.
    Stale,
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The query was blank; the folder listing was restored.
    Cleared(FetchOutcome),
    /// Free-text results, unpaginated.
    FreeText {
        /// Number of results.
        results: usize,
    },
    /// Operator results with the filters the gateway applied.
    Operator {
        /// Parsed filters.
        filters: SearchFilters,
        /// Result pagination.
        pagination: Pagination,
    },
    /// A newer request superseded this one.
    Stale,
}

/// How a delete or move ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The gateway confirmed the removal.
    Removed,
    /// A removal of the same message was already in flight; nothing was sent.
    AlreadyPending,
}

/// What an optimistic removal changed, so a failed call can put it back.
struct RemovalUndo {
    generation: u64,
    open_token: u64,
    removed: Option<(usize, Message)>,
    /// Where the cursor auto-advanced to, if it was on the removed message.
    advanced_to: Option<Option<MessageId>>,
    was_ticked: bool,
    opened: Option<(Message, Option<Vec<Message>>)>,
}

impl RemovalUndo {
    /// Restores the message, leaving alone anything the user changed since.
    fn restore(self, state: &mut StoreState, id: MessageId) {
        if state.open_token == self.open_token
            && state.view.open_message.is_none()
            && let Some((message, thread)) = self.opened
        {
            state.view.open_message = Some(message);
            state.view.thread = thread;
        }
        if state.view.generation != self.generation {
            return;
        }
        if let Some((index, message)) = self.removed
            && !state.view.messages.iter().any(|m| m.id == id)
        {
            let index = index.min(state.view.messages.len());
            state.view.messages.insert(index, message);
        }
        if self
            .advanced_to
            .is_some_and(|advanced| state.view.selected == advanced)
        {
            state.view.selected = Some(id);
        }
        if self.was_ticked {
            state.view.selection.insert(id);
        }
    }
}

/// Mailbox state store over a [`MailGateway`].
#[derive(Debug)]
pub struct MailboxStore<G> {
    gateway: Arc<G>,
    resolver: ThreadResolver<G>,
    state: Mutex<StoreState>,
    message_locks: Mutex<HashMap<MessageId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<G: MailGateway> MailboxStore<G> {
    /// Creates an empty store showing the inbox.
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            resolver: ThreadResolver::new(Arc::clone(&gateway)),
            gateway,
            state: Mutex::new(StoreState::default()),
            message_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets where the cursor goes after the selected message is removed.
    pub fn set_auto_advance(&self, rule: AutoAdvance) {
        self.state().auto_advance = rule;
    }

    /// Returns a copy of the current state for rendering.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state().view.clone()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- Listing ---------------------------------------------------------

    /// Switches folders: clears selection, search and pagination, then fetches.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the fetch fails; the list stays empty.
    pub async fn select_folder(&self, name: &str) -> GatewayResult<FetchOutcome> {
        let plan = {
            let mut state = self.state();
            state.view.current_folder = name.to_string();
            state.clear_context();
            state.plan_fetch()
        };
        tracing::info!(folder = name, generation = plan.generation, "Selecting folder");
        self.run_fetch(plan).await
    }

    /// Refetches the current folder, page and search.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the fetch fails; the previous list is kept.
    pub async fn fetch_messages(&self) -> GatewayResult<FetchOutcome> {
        let plan = self.state().plan_fetch();
        self.run_fetch(plan).await
    }

    /// Moves to the next page. Returns `None` on the last page.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the fetch fails.
    pub async fn next_page(&self) -> GatewayResult<Option<FetchOutcome>> {
        let plan = {
            let mut state = self.state();
            if !state.view.pagination.has_next() {
                return Ok(None);
            }
            state.view.pagination.page += 1;
            state.view.selected = None;
            state.plan_fetch()
        };
        self.run_fetch(plan).await.map(Some)
    }

    /// Moves to the previous page. Returns `None` on the first page.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the fetch fails.
    pub async fn previous_page(&self) -> GatewayResult<Option<FetchOutcome>> {
        let plan = {
            let mut state = self.state();
            if !state.view.pagination.has_previous() {
                return Ok(None);
            }
            state.view.pagination.page -= 1;
            state.view.selected = None;
            state.plan_fetch()
        };
        self.run_fetch(plan).await.map(Some)
    }

    async fn run_fetch(&self, plan: FetchPlan) -> GatewayResult<FetchOutcome> {
        let result = match &plan.request {
            FetchRequest::Folder(query) => self
                .gateway
                .list_messages(query)
                .await
                .map(|page| (page.messages, page.pagination, None)),
            FetchRequest::FreeText { query, folder } => {
                self.gateway.search(query, folder).await.map(|messages| {
                    let total = u32::try_from(messages.len()).unwrap_or(u32::MAX);
                    let pagination = Pagination {
                        page: 1,
                        limit: total,
                        total,
                        pages: 1,
                    };
                    (messages, pagination, None)
                })
            }
            FetchRequest::Operator { query, page, limit } => self
                .gateway
                .advanced_search(query, *page, *limit)
                .await
                .map(|page| (page.messages, page.pagination, page.filters)),
        };

        let mut state = self.state();
        if state.view.generation != plan.generation {
            tracing::debug!(
                issued = plan.generation,
                current = state.view.generation,
                "Discarding stale list response"
            );
            return Ok(FetchOutcome::Stale);
        }

        match result {
            Ok((messages, pagination, filters)) => {
                tracing::debug!(
                    generation = plan.generation,
                    count = messages.len(),
                    "Applying list response"
                );
                state.apply_list(messages, pagination);
                if let (Some(search), Some(filters)) = (&mut state.view.search, filters) {
                    search.filters = Some(filters);
                }
                Ok(FetchOutcome::Applied)
            }
            Err(e) => {
                tracing::warn!(?e, generation = plan.generation, "List fetch failed");
                state.view.is_loading = false;
                state.view.last_error = Some(e.to_string());
                if let Some(search) = &mut state.view.search {
                    search.is_searching = false;
                }
                Err(e)
            }
        }
    }

    /// Reloads folder counts.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the listing fails.
    pub async fn refresh_folders(&self) -> GatewayResult<()> {
        let issued = {
            let mut state = self.state();
            state.folder_generation += 1;
            state.folder_generation
        };
        let folders = self.gateway.list_folders().await?;

        let mut state = self.state();
        if state.folder_generation == issued {
            state.view.folders = folders;
        }
        Ok(())
    }

    async fn refresh_folders_logged(&self) {
        if let Err(e) = self.refresh_folders().await {
            tracing::warn!(?e, "Failed to refresh folder counts");
        }
    }

    // ---- Search ----------------------------------------------------------

    /// Runs a search in the current folder.
    ///
    /// A blank query clears the search. A query with field operators goes to
    /// the paginated advanced search; anything else is a free-text search.
    /// Successful queries are added to the front of the history.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the search fails; the list is unchanged.
    pub async fn search(&self, query: &str) -> GatewayResult<SearchOutcome> {
        let (raw, filters) = match classify_query(query) {
            QueryKind::Empty => return self.clear_search().await.map(SearchOutcome::Cleared),
            QueryKind::FreeText(raw) => (raw, None),
            QueryKind::Operator(filters) => (query.trim().to_string(), Some(filters)),
        };

        let plan = {
            let mut state = self.state();
            state.view.search = Some(SearchState {
                query: raw.clone(),
                filters,
                is_searching: true,
            });
            state.view.pagination = Pagination {
                limit: state.page_size,
                ..Pagination::default()
            };
            state.view.selected = None;
            state.view.selection.clear();
            state.plan_fetch()
        };
        tracing::info!(query = %raw, generation = plan.generation, "Searching");

        if self.run_fetch(plan).await? == FetchOutcome::Stale {
            return Ok(SearchOutcome::Stale);
        }

        let mut state = self.state();
        state.remember_query(&raw);
        let outcome = match &state.view.search {
            Some(SearchState {
                filters: Some(filters),
                ..
            }) => SearchOutcome::Operator {
                filters: filters.clone(),
                pagination: state.view.pagination,
            },
            _ => SearchOutcome::FreeText {
                results: state.view.messages.len(),
            },
        };
        Ok(outcome)
    }

    /// Clears the search and refetches the current folder.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the fetch fails.
    pub async fn clear_search(&self) -> GatewayResult<FetchOutcome> {
        let plan = {
            let mut state = self.state();
            state.view.search = None;
            state.view.pagination = Pagination {
                limit: state.page_size,
                ..Pagination::default()
            };
            state.view.selected = None;
            state.view.selection.clear();
            state.plan_fetch()
        };
        self.run_fetch(plan).await
    }

    // ---- Cursor and selection --------------------------------------------

    /// Puts the cursor on a message. Returns false if it is not in the list.
    pub fn select_message(&self, id: MessageId) -> bool {
        let mut state = self.state();
        let present = state.view.messages.iter().any(|m| m.id == id);
        if present {
            state.view.selected = Some(id);
        }
        present
    }

    /// Moves the cursor down, stopping at the last message.
    pub fn select_next(&self) -> Option<MessageId> {
        self.move_cursor(|index, len| index.map_or(0, |i| (i + 1).min(len - 1)))
    }

    /// Moves the cursor up, stopping at the first message.
    pub fn select_previous(&self) -> Option<MessageId> {
        self.move_cursor(|index, _| index.map_or(0, |i| i.saturating_sub(1)))
    }

    fn move_cursor(&self, step: impl FnOnce(Option<usize>, usize) -> usize) -> Option<MessageId> {
        let mut state = self.state();
        let len = state.view.messages.len();
        if len == 0 {
            return None;
        }
        let index = step(state.view.selected_index(), len);
        let id = state.view.messages[index].id;
        state.view.selected = Some(id);
        Some(id)
    }

    /// Ticks or unticks a message for bulk actions. Returns the new state.
    pub fn toggle_selected(&self, id: MessageId) -> bool {
        let mut state = self.state();
        if state.view.selection.remove(&id) {
            false
        } else {
            state.view.selection.insert(id)
        }
    }

    /// Leaves selection mode.
    pub fn clear_selection(&self) {
        self.state().view.selection.clear();
    }

    // ---- Flags -----------------------------------------------------------

    /// Sets the read flag.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the local flag has then been rolled back.
    pub async fn mark_read(&self, id: MessageId, read: bool) -> GatewayResult<()> {
        self.write_flag(id, FlagKind::Read, read).await
    }

    /// Sets the starred flag.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the local flag has then been rolled back.
    pub async fn star_message(&self, id: MessageId, starred: bool) -> GatewayResult<()> {
        self.write_flag(id, FlagKind::Starred, starred).await
    }

    /// Adds or removes a label.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the local label has then been rolled back.
    pub async fn set_label(&self, id: MessageId, label: &str, add: bool) -> GatewayResult<()> {
        self.write_flag(id, FlagKind::Label(label.to_string()), add)
            .await
    }

    async fn write_flag(&self, id: MessageId, kind: FlagKind, value: bool) -> GatewayResult<()> {
        let (seq, prior) = {
            let mut state = self.state();
            state.write_seq += 1;
            let seq = state.write_seq;
            let prior = state.view.find_message(id).map(|m| kind.get(m));
            state
                .flag_writes
                .insert((id, kind.clone()), FlagWrite::in_flight(seq, value));
            state.update_message(id, |m| kind.set(m, value));
            (seq, prior)
        };

        let lock = self.message_lock(id);
        let result = {
            let _ordered = lock.lock().await;
            match &kind {
                FlagKind::Read => self.gateway.mark_read(id, value).await,
                FlagKind::Starred => self.gateway.set_starred(id, value).await,
                FlagKind::Label(label) => self.gateway.set_label(id, label, value).await,
            }
        };
        drop(lock);
        self.release_message_lock(id);

        let mut state = self.state();
        let key = (id, kind.clone());
        let latest = state
            .flag_writes
            .get(&key)
            .is_some_and(|write| write.seq == seq);
        if latest {
            if result.is_ok() {
                let generation = state.view.generation;
                if let Some(write) = state.flag_writes.get_mut(&key) {
                    write.settled = Some(generation);
                }
            } else {
                state.flag_writes.remove(&key);
            }
        }
        if let Err(e) = &result {
            state.view.last_error = Some(e.to_string());
            match prior {
                Some(prior) if latest => {
                    tracing::warn!(?e, %id, ?kind, "Flag write failed, rolling back");
                    state.update_message(id, |m| kind.set(m, prior));
                }
                _ => tracing::warn!(?e, %id, ?kind, "Flag write failed"),
            }
        }
        result
    }

    fn message_lock(&self, id: MessageId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .message_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn release_message_lock(&self, id: MessageId) {
        let mut locks = self
            .message_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }
    }

    // ---- Removal ---------------------------------------------------------

    /// Deletes a message.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the message is then back in the list.
    pub async fn delete_message(&self, id: MessageId) -> GatewayResult<RemovalOutcome> {
        self.remove_message(id, None).await
    }

    /// Moves a message to another folder.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the message is then back in the list.
    pub async fn move_message(&self, id: MessageId, folder: &str) -> GatewayResult<RemovalOutcome> {
        self.remove_message(id, Some(folder)).await
    }

    async fn remove_message(
        &self,
        id: MessageId,
        destination: Option<&str>,
    ) -> GatewayResult<RemovalOutcome> {
        let undo = {
            let mut state = self.state();
            if !state.pending_removals.insert(id) {
                tracing::debug!(%id, "Removal already in flight");
                return Ok(RemovalOutcome::AlreadyPending);
            }

            let removed = state
                .view
                .messages
                .iter()
                .position(|m| m.id == id)
                .map(|index| (index, state.view.messages.remove(index)));

            let mut advanced_to = None;
            if let Some((index, _)) = removed
                && state.view.selected == Some(id)
            {
                let next = successor(state.auto_advance, index, state.view.messages.len());
                state.view.selected = next.map(|i| state.view.messages[i].id);
                advanced_to = Some(state.view.selected);
            }
            let was_ticked = state.view.selection.remove(&id);
            let opened = state.view.open_message.take_if(|m| m.id == id);
            let opened = opened.map(|message| (message, state.view.thread.take()));
            RemovalUndo {
                generation: state.view.generation,
                open_token: state.open_token,
                removed,
                advanced_to,
                was_ticked,
                opened,
            }
        };

        tracing::info!(%id, destination, "Removing message");
        let lock = self.message_lock(id);
        let result = {
            let _ordered = lock.lock().await;
            match destination {
                Some(folder) => self.gateway.move_message(id, folder).await,
                None => self.gateway.delete_message(id).await,
            }
        };
        drop(lock);
        self.release_message_lock(id);

        {
            let mut state = self.state();
            state.pending_removals.remove(&id);
            if let Err(e) = &result {
                tracing::warn!(?e, %id, "Removal failed");
                state.view.last_error = Some(e.to_string());
                undo.restore(&mut state, id);
            }
        }

        result?;
        self.refresh_folders_logged().await;
        Ok(RemovalOutcome::Removed)
    }

    /// Applies one action to many messages with a single gateway call.
    ///
    /// An empty id set is a no-op. On success, membership-changing actions
    /// drop the messages from the list and move the cursor by the
    /// auto-advance rule if it was on one of them; flag actions update them
    /// in place. Either way selection mode ends.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; local state is then unchanged.
    pub async fn bulk_action(&self, ids: &[MessageId], action: &BulkAction) -> GatewayResult<()> {
        if ids.is_empty() {
            tracing::debug!(?action, "Bulk action with no messages, skipping");
            return Ok(());
        }

        tracing::info!(count = ids.len(), ?action, "Bulk action");
        if let Err(e) = self.gateway.bulk_action(ids, action).await {
            tracing::warn!(?e, "Bulk action failed");
            self.state().view.last_error = Some(e.to_string());
            return Err(e);
        }

        {
            let mut state = self.state();
            if action.removes_from_folder() {
                // Survivors above the cursor fix where it lands in the shortened list.
                let cursor = state
                    .view
                    .selected
                    .filter(|id| ids.contains(id))
                    .and_then(|id| state.view.messages.iter().position(|m| m.id == id))
                    .map(|index| {
                        state.view.messages[..index]
                            .iter()
                            .filter(|m| !ids.contains(&m.id))
                            .count()
                    });
                state.view.messages.retain(|m| !ids.contains(&m.id));
                if let Some(base) = cursor {
                    let next = successor(state.auto_advance, base, state.view.messages.len());
                    state.view.selected = next.map(|i| state.view.messages[i].id);
                } else if state.view.selected.is_some_and(|id| ids.contains(&id)) {
                    state.view.selected = None;
                }
            } else {
                for &id in ids {
                    state.update_message(id, |m| match action {
                        BulkAction::MarkRead => m.is_read = true,
                        BulkAction::MarkUnread => m.is_read = false,
                        BulkAction::Star => m.is_starred = true,
                        BulkAction::Unstar => m.is_starred = false,
                        BulkAction::Archive | BulkAction::Delete | BulkAction::Move { .. } => {}
                    });
                }
            }
            state.view.selection.clear();
        }

        self.refresh_folders_logged().await;
        Ok(())
    }

    // ---- Reading ---------------------------------------------------------

    /// Opens a message: selects it, loads the full body and marks it read.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the message cannot be fetched.
    pub async fn open_message(&self, id: MessageId) -> GatewayResult<FetchOutcome> {
        let token = {
            let mut state = self.state();
            if state.view.messages.iter().any(|m| m.id == id) {
                state.view.selected = Some(id);
            }
            state.open_token += 1;
            state.open_token
        };

        let mut message = self.gateway.fetch_message(id).await?;
        let unread = !message.is_read;
        {
            let mut state = self.state();
            if state.open_token != token {
                return Ok(FetchOutcome::Stale);
            }
            state.overlay_pending_flags(&mut message);
            state.view.thread = None;
            state.view.open_message = Some(message);
        }

        if unread {
            // Failure already rolled the flag back and recorded the error.
            let _ = self.mark_read(id, true).await;
        }
        Ok(FetchOutcome::Applied)
    }

    /// Closes the reading view.
    pub fn close_message(&self) {
        let mut state = self.state();
        state.open_token += 1;
        state.view.open_message = None;
        state.view.thread = None;
    }

    /// Loads the conversation of a message and keeps it as the thread view.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the lookup fails.
    pub async fn fetch_thread(&self, message: &Message) -> GatewayResult<Vec<Message>> {
        let mut thread = self.resolver.resolve(message).await?;
        let mut state = self.state();
        for entry in &mut thread {
            state.overlay_pending_flags(entry);
        }
        if state.view.open_message.as_ref().is_some_and(|m| m.id == message.id) {
            state.view.thread = Some(thread.clone());
        }
        Ok(thread)
    }

    /// Reports a gateway error through the store's error channel.
    pub(crate) fn record_error(&self, error: &GatewayError) {
        self.state().view.last_error = Some(error.to_string());
    }
}
