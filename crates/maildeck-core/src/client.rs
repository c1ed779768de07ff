//! Command dispatcher.
//!
//! [`MailClient`] owns one store, one outbox scheduler, the compose window
//! and the shortcut recognizer, and turns key presses into calls on them.
//! It is the application root: everything the UI needs goes through it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::compose::ComposeSession;
use crate::error::Result;
use crate::gateway::{BulkAction, FolderType, MailGateway, Message, MessageId};
use crate::outbox::{CancelOutcome, OutboxScheduler, SendMode, SubmitOutcome};
use crate::settings::{ReplyBehavior, Settings};
use crate::shortcuts::{
    Clock, Command, KeyEvent, KeyResolution, Keymap, SequenceRecognizer, ShortcutCategory,
    TokioClock,
};
use crate::store::{MailboxStore, SearchOutcome, StoreSnapshot};

/// Which surface has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    /// The message list.
    #[default]
    List,
    /// The reading view.
    Reading(MessageId),
    /// The compose window.
    Compose,
    /// The search box.
    Search,
    /// The shortcut listing.
    Help,
}

/// UI-level consequence of a key press or command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Nothing happened.
    None,
    /// A leader key is waiting for its second key.
    Pending,
    /// The cursor moved.
    Cursor(Option<MessageId>),
    /// Focus moved to another surface.
    View(View),
    /// Messages were changed or removed.
    Updated,
    /// The bulk selection changed; holds its new size.
    Selection(usize),
    /// The shortcut listing should be shown.
    Help(Vec<ShortcutCategory>),
    /// The compose window was submitted.
    Submitted(SubmitOutcome),
    /// An undo request finished.
    Undo(CancelOutcome),
}

/// Mail client over a gateway.
#[derive(Debug)]
pub struct MailClient<G, C = TokioClock> {
    store: MailboxStore<G>,
    scheduler: OutboxScheduler<G>,
    own_address: String,
    settings: Mutex<Settings>,
    compose: Mutex<Option<ComposeSession>>,
    recognizer: Mutex<SequenceRecognizer<C>>,
    view: Mutex<View>,
}

impl<G: MailGateway> MailClient<G, TokioClock> {
    /// Creates a client with the default keymap.
    pub fn new(gateway: Arc<G>, settings: Settings, own_address: impl Into<String>) -> Self {
        Self::with_clock(gateway, settings, own_address, TokioClock)
    }
}

impl<G: MailGateway, C: Clock> MailClient<G, C> {
    /// Creates a client whose shortcut timeouts run on `clock`.
    pub fn with_clock(
        gateway: Arc<G>,
        settings: Settings,
        own_address: impl Into<String>,
        clock: C,
    ) -> Self {
        let store = MailboxStore::new(Arc::clone(&gateway));
        let scheduler = OutboxScheduler::new(gateway);
        store.set_auto_advance(settings.auto_advance);
        scheduler.set_undo_delay(settings.undo_send_delay_secs);

        Self {
            store,
            scheduler,
            own_address: own_address.into(),
            settings: Mutex::new(settings),
            compose: Mutex::new(None),
            recognizer: Mutex::new(SequenceRecognizer::with_clock(
                Keymap::default_bindings(),
                clock,
            )),
            view: Mutex::new(View::List),
        }
    }

    /// Loads folder counts and the inbox.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if either request fails.
    pub async fn start(&self) -> Result<()> {
        self.store.refresh_folders().await?;
        let inbox = self.folder_name(FolderType::Inbox);
        self.store.select_folder(&inbox).await?;
        Ok(())
    }

    /// The mailbox store.
    #[must_use]
    pub const fn store(&self) -> &MailboxStore<G> {
        &self.store
    }

    /// The outbox scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &OutboxScheduler<G> {
        &self.scheduler
    }

    /// Address used as the sender of outgoing mail.
    #[must_use]
    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    /// Copy of the store state.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    /// Surface with focus.
    #[must_use]
    pub fn view(&self) -> View {
        *lock(&self.view)
    }

    /// Copy of the compose window, if open.
    #[must_use]
    pub fn compose(&self) -> Option<ComposeSession> {
        lock(&self.compose).clone()
    }

    /// Edits the open compose window. Returns false if none is open.
    pub fn edit_compose(&self, edit: impl FnOnce(&mut ComposeSession)) -> bool {
        lock(&self.compose).as_mut().map(edit).is_some()
    }

    /// Current preferences.
    #[must_use]
    pub fn settings(&self) -> Settings {
        lock(&self.settings).clone()
    }

    /// Applies new preferences to the running client.
    pub fn update_settings(&self, settings: Settings) {
        self.store.set_auto_advance(settings.auto_advance);
        self.scheduler.set_undo_delay(settings.undo_send_delay_secs);
        if !settings.keyboard_shortcuts {
            lock(&self.recognizer).reset();
        }
        tracing::info!(?settings, "Settings updated");
        *lock(&self.settings) = settings;
    }

    /// Shortcut listing for the current keymap.
    #[must_use]
    pub fn shortcuts_help(&self) -> Vec<ShortcutCategory> {
        lock(&self.recognizer).keymap().help()
    }

    // ---- Keyboard --------------------------------------------------------

    /// Resolves a key press and runs the bound command.
    ///
    /// # Errors
    ///
    /// Returns the error of the command that ran.
    pub async fn handle_key(&self, event: &KeyEvent) -> Result<Effect> {
        if !lock(&self.settings).keyboard_shortcuts {
            return Ok(Effect::None);
        }
        let resolution = lock(&self.recognizer).handle(event);
        match resolution {
            KeyResolution::Command(command) => self.execute(command).await,
            KeyResolution::Pending => Ok(Effect::Pending),
            KeyResolution::Unbound | KeyResolution::Ignored => Ok(Effect::None),
        }
    }

    /// Runs a command.
    ///
    /// # Errors
    ///
    /// Returns the gateway or send error. The store has already recorded
    /// gateway errors in `last_error`; send errors are also on the compose
    /// window.
    pub async fn execute(&self, command: Command) -> Result<Effect> {
        tracing::debug!(?command, "Executing command");
        match command {
            Command::NextMessage => self.step(MailboxStore::select_next).await,
            Command::PreviousMessage => self.step(MailboxStore::select_previous).await,
            Command::OpenMessage => match self.store.snapshot().selected {
                Some(id) => self.open(id).await,
                None => Ok(Effect::None),
            },
            Command::Back => self.back().await,
            Command::Archive => {
                let archive = self.folder_name(FolderType::Archive);
                self.remove(BulkAction::Archive, Some(&archive)).await
            }
            Command::Delete => self.remove(BulkAction::Delete, None).await,
            Command::ToggleStar => self.toggle_star().await,
            Command::MarkRead => self.mark_read(true).await,
            Command::MarkUnread => self.mark_read(false).await,
            Command::Reply => {
                let behavior = lock(&self.settings).reply_behavior;
                self.open_compose(|m| match behavior {
                    ReplyBehavior::Reply => ComposeSession::reply(m),
                    ReplyBehavior::ReplyAll => ComposeSession::reply_all(m, &self.own_address),
                })
            }
            Command::ReplyAll => {
                self.open_compose(|m| ComposeSession::reply_all(m, &self.own_address))
            }
            Command::Forward => self.open_compose(ComposeSession::forward),
            Command::Compose => {
                *lock(&self.compose) = Some(ComposeSession::new());
                Ok(self.set_view(View::Compose))
            }
            Command::ToggleSelect => {
                let Some(id) = self.store.snapshot().selected else {
                    return Ok(Effect::None);
                };
                self.store.toggle_selected(id);
                Ok(Effect::Selection(self.store.snapshot().selection.len()))
            }
            Command::UndoSend => self.undo_send().await,
            Command::FocusSearch => Ok(self.set_view(View::Search)),
            Command::ShowHelp => {
                self.set_view(View::Help);
                Ok(Effect::Help(self.shortcuts_help()))
            }
            Command::Send => self.send(SendMode::Undoable).await,
            Command::GoTo(folder) => {
                let name = self.folder_name(folder);
                self.store.select_folder(&name).await?;
                Ok(self.set_view(View::List))
            }
        }
    }

    // ---- Search ----------------------------------------------------------

    /// Runs a search from the search box and returns focus to the list.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let outcome = self.store.search(query).await?;
        self.set_view(View::List);
        Ok(outcome)
    }

    // ---- Sending ---------------------------------------------------------

    /// Submits the compose window.
    ///
    /// On success the window closes and folder counts are refreshed. On
    /// failure it stays open with `send_error` set.
    ///
    /// # Errors
    ///
    /// Returns the validation or gateway error.
    pub async fn send(&self, mode: SendMode) -> Result<Effect> {
        let draft = {
            let mut compose = lock(&self.compose);
            match compose.as_mut() {
                Some(draft) if !draft.is_sending => {
                    draft.is_sending = true;
                    draft.send_error = None;
                    draft.clone()
                }
                _ => return Ok(Effect::None),
            }
        };

        let message = draft.to_outgoing(&self.own_address);
        match self.scheduler.submit(&message, mode).await {
            Ok(outcome) => {
                *lock(&self.compose) = None;
                self.set_view(self.base_view());
                if let Err(e) = self.store.refresh_folders().await {
                    tracing::warn!(?e, "Failed to refresh folder counts after send");
                }
                Ok(Effect::Submitted(outcome))
            }
            Err(e) => {
                tracing::warn!(%e, "Send failed");
                if let Some(draft) = lock(&self.compose).as_mut() {
                    draft.is_sending = false;
                    draft.send_error = Some(e.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Cancels the send that is counting down. If the cancel succeeds the
    /// message is reopened for editing.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the cancel request failed.
    pub async fn undo_send(&self) -> Result<Effect> {
        let Some(entry) = self.scheduler.live() else {
            return Ok(Effect::None);
        };
        let outcome = self.scheduler.cancel(&entry.id).await?;
        if outcome == CancelOutcome::Canceled {
            *lock(&self.compose) = Some(ComposeSession::from_outgoing(&entry.payload));
            self.set_view(View::Compose);
        }
        Ok(Effect::Undo(outcome))
    }

    // ---- Helpers ---------------------------------------------------------

    async fn step(
        &self,
        step: impl FnOnce(&MailboxStore<G>) -> Option<MessageId>,
    ) -> Result<Effect> {
        let reading = matches!(self.view(), View::Reading(_));
        match step(&self.store) {
            Some(id) if reading => self.open(id).await,
            selected => Ok(Effect::Cursor(selected)),
        }
    }

    async fn open(&self, id: MessageId) -> Result<Effect> {
        self.store.open_message(id).await?;
        self.set_view(View::Reading(id));

        let conversation = lock(&self.settings).conversation_view;
        let opened = self.store.snapshot().open_message;
        if conversation && let Some(message) = opened.filter(|m| m.id == id) {
            // A missing thread still leaves the message readable.
            if let Err(e) = self.store.fetch_thread(&message).await {
                tracing::warn!(?e, %id, "Failed to load conversation");
                self.store.record_error(&e);
            }
        }
        Ok(Effect::View(View::Reading(id)))
    }

    async fn back(&self) -> Result<Effect> {
        let view = match self.view() {
            View::Compose => {
                *lock(&self.compose) = None;
                self.base_view()
            }
            View::List if self.store.snapshot().search.is_some() => {
                self.store.clear_search().await?;
                View::List
            }
            View::Help | View::Search => self.base_view(),
            View::Reading(_) => {
                self.store.close_message();
                View::List
            }
            View::List => {
                self.store.clear_selection();
                View::List
            }
        };
        Ok(self.set_view(view))
    }

    /// Messages a list action applies to: the bulk selection if there is
    /// one, otherwise the open message, otherwise the one under the cursor.
    fn targets(&self) -> Vec<Message> {
        let snapshot = self.store.snapshot();
        if !snapshot.selection.is_empty() {
            return snapshot
                .messages
                .iter()
                .filter(|m| snapshot.selection.contains(&m.id))
                .cloned()
                .collect();
        }
        self.current_message(&snapshot).into_iter().collect()
    }

    fn current_message(&self, snapshot: &StoreSnapshot) -> Option<Message> {
        if let View::Reading(id) = self.view()
            && let Some(open) = snapshot.open_message.as_ref().filter(|m| m.id == id)
        {
            return Some(open.clone());
        }
        snapshot.selected_message().cloned()
    }

    async fn remove(&self, action: BulkAction, destination: Option<&str>) -> Result<Effect> {
        let bulk = !self.store.snapshot().selection.is_empty();
        let result = match self.targets().as_slice() {
            [] => return Ok(Effect::None),
            [message] if !bulk => match destination {
                Some(folder) => self.store.move_message(message.id, folder).await.map(drop),
                None => self.store.delete_message(message.id).await.map(drop),
            },
            many => {
                let ids: Vec<MessageId> = many.iter().map(|m| m.id).collect();
                self.store.bulk_action(&ids, &action).await
            }
        };

        // A failed removal restores the open message, so the view follows the store.
        if matches!(self.view(), View::Reading(_)) && self.store.snapshot().open_message.is_none()
        {
            self.set_view(View::List);
        }
        result?;
        Ok(Effect::Updated)
    }

    async fn toggle_star(&self) -> Result<Effect> {
        let targets = self.targets();
        let star = targets.iter().any(|m| !m.is_starred);
        self.set_flag(&targets, Flag::Starred, star).await
    }

    async fn mark_read(&self, read: bool) -> Result<Effect> {
        let targets = self.targets();
        self.set_flag(&targets, Flag::Read, read).await
    }

    async fn set_flag(&self, targets: &[Message], flag: Flag, value: bool) -> Result<Effect> {
        let bulk = !self.store.snapshot().selection.is_empty();
        match targets {
            [] => return Ok(Effect::None),
            [message] if !bulk => match flag {
                Flag::Read => self.store.mark_read(message.id, value).await?,
                Flag::Starred => self.store.star_message(message.id, value).await?,
            },
            many => {
                let ids: Vec<MessageId> = many.iter().map(|m| m.id).collect();
                let action = match (flag, value) {
                    (Flag::Read, true) => BulkAction::MarkRead,
                    (Flag::Read, false) => BulkAction::MarkUnread,
                    (Flag::Starred, true) => BulkAction::Star,
                    (Flag::Starred, false) => BulkAction::Unstar,
                };
                self.store.bulk_action(&ids, &action).await?;
            }
        }
        Ok(Effect::Updated)
    }

    fn open_compose(&self, build: impl FnOnce(&Message) -> ComposeSession) -> Result<Effect> {
        let snapshot = self.store.snapshot();
        let Some(original) = self.current_message(&snapshot) else {
            return Ok(Effect::None);
        };
        *lock(&self.compose) = Some(build(&original));
        Ok(self.set_view(View::Compose))
    }

    /// Name of a well-known folder as the server calls it.
    fn folder_name(&self, folder: FolderType) -> String {
        self.store
            .snapshot()
            .folders
            .iter()
            .find(|f| f.folder_type() == folder)
            .map_or_else(|| folder.default_name().to_string(), |f| f.name.clone())
    }

    fn base_view(&self) -> View {
        self.store
            .snapshot()
            .open_message
            .map_or(View::List, |m| View::Reading(m.id))
    }

    fn set_view(&self, view: View) -> Effect {
        *lock(&self.view) = view;
        Effect::View(view)
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Read,
    Starred,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gateway::{GatewayCall, GatewayError, MemoryGateway};
    use crate::outbox::{SendError, ValidationError};
    use crate::settings::AutoAdvance;
    use crate::shortcuts::Modifiers;
    use chrono::Utc;

    async fn client(settings: Settings) -> (Arc<MemoryGateway>, MailClient<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::demo());
        let client = MailClient::new(Arc::clone(&gateway), settings, "me@example.com");
        client.start().await.unwrap();
        (gateway, client)
    }

    async fn press(client: &MailClient<MemoryGateway>, keys: &str) -> Effect {
        let mut effect = Effect::None;
        for key in keys.split_whitespace() {
            effect = client.handle_key(&KeyEvent::new(key)).await.unwrap();
        }
        effect
    }

    fn ids(client: &MailClient<MemoryGateway>) -> Vec<u32> {
        client.snapshot().messages.iter().map(|m| m.id.0).collect()
    }

    #[tokio::test]
    async fn test_start_loads_inbox() {
        let (_, client) = client(Settings::default()).await;
        let snapshot = client.snapshot();
        assert_eq!(snapshot.current_folder, "INBOX");
        assert_eq!(ids(&client), [1, 2, 3, 4, 5]);
        assert!(snapshot.folder("Archive").is_some());
    }

    #[tokio::test]
    async fn test_leader_sequences_switch_folders() {
        let (_, client) = client(Settings::default()).await;

        assert_eq!(press(&client, "g").await, Effect::Pending);
        assert_eq!(press(&client, "a").await, Effect::View(View::List));
        assert_eq!(client.snapshot().current_folder, "Archive");

        press(&client, "g i").await;
        assert_eq!(client.snapshot().current_folder, "INBOX");
    }

    #[tokio::test]
    async fn test_disabled_shortcuts_do_nothing() {
        let settings = Settings {
            keyboard_shortcuts: false,
            ..Settings::default()
        };
        let (gateway, client) = client(settings).await;
        gateway.clear_calls();

        assert_eq!(press(&client, "j").await, Effect::None);
        assert_eq!(press(&client, "g i").await, Effect::None);
        assert!(client.snapshot().selected.is_none());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_selected_advances() {
        let (_, client) = client(Settings::default()).await;

        assert_eq!(press(&client, "j").await, Effect::Cursor(Some(MessageId(1))));
        assert_eq!(press(&client, "j").await, Effect::Cursor(Some(MessageId(2))));
        assert_eq!(press(&client, "#").await, Effect::Updated);

        assert_eq!(ids(&client), [1, 3, 4, 5]);
        assert_eq!(client.snapshot().selected, Some(MessageId(3)));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_reading_view() {
        let (gateway, client) = client(Settings::default()).await;
        press(&client, "j o").await;
        assert_eq!(client.view(), View::Reading(MessageId(1)));
        gateway.fail_next("delete_message", GatewayError::Network("offline".into()));

        let err = client.handle_key(&KeyEvent::new("#")).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(client.view(), View::Reading(MessageId(1)));
        let snapshot = client.snapshot();
        assert_eq!(snapshot.open_message.map(|m| m.id), Some(MessageId(1)));
        assert_eq!(snapshot.selected, Some(MessageId(1)));
        assert_eq!(ids(&client), [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_auto_advance_follows_settings_update() {
        let (_, client) = client(Settings::default()).await;
        client.update_settings(Settings {
            auto_advance: AutoAdvance::None,
            ..Settings::default()
        });

        press(&client, "j j").await;
        let hash = KeyEvent::new("3").with_modifiers(Modifiers::SHIFT);
        client.handle_key(&hash).await.unwrap();

        assert_eq!(ids(&client), [1, 3, 4, 5]);
        assert!(client.snapshot().selected.is_none());
    }

    #[tokio::test]
    async fn test_open_loads_conversation() {
        let (_, client) = client(Settings::default()).await;

        press(&client, "j").await;
        assert_eq!(
            press(&client, "enter").await,
            Effect::View(View::Reading(MessageId(1)))
        );

        let snapshot = client.snapshot();
        let open = snapshot.open_message.as_ref().unwrap();
        assert!(open.is_read);
        assert!(open.body.is_some());
        let thread: Vec<u32> = snapshot.thread.unwrap().iter().map(|m| m.id.0).collect();
        assert_eq!(thread, [2, 1]);

        assert_eq!(press(&client, "escape").await, Effect::View(View::List));
        assert!(client.snapshot().open_message.is_none());
    }

    #[tokio::test]
    async fn test_open_without_conversation_view() {
        let settings = Settings {
            conversation_view: false,
            ..Settings::default()
        };
        let (gateway, client) = client(settings).await;
        gateway.clear_calls();

        press(&client, "j o").await;

        assert!(client.snapshot().thread.is_none());
        assert!(
            !gateway
                .calls()
                .iter()
                .any(|c| matches!(c, GatewayCall::FetchThread(_)))
        );
    }

    #[tokio::test]
    async fn test_next_in_reading_view_opens_next() {
        let (_, client) = client(Settings::default()).await;
        press(&client, "j o").await;
        assert_eq!(press(&client, "j").await, Effect::View(View::Reading(MessageId(2))));
        assert_eq!(client.snapshot().open_message.unwrap().id, MessageId(2));
    }

    #[tokio::test]
    async fn test_reply_honours_reply_behavior() {
        let settings = Settings {
            reply_behavior: ReplyBehavior::ReplyAll,
            ..Settings::default()
        };
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert_message(Message {
            id: MessageId(0),
            folder: "INBOX".into(),
            subject: "Planning".into(),
            from: "alice@example.com".into(),
            to: vec!["me@example.com".into(), "bob@example.com".into()],
            cc: Vec::new(),
            body: Some("Agenda".into()),
            snippet: "Agenda".into(),
            date: Utc::now(),
            is_read: true,
            is_starred: false,
            has_attachments: false,
            labels: Vec::new(),
        });
        let client = MailClient::new(Arc::clone(&gateway), settings, "me@example.com");
        client.start().await.unwrap();

        press(&client, "j").await;
        assert_eq!(press(&client, "r").await, Effect::View(View::Compose));

        let draft = client.compose().unwrap();
        assert_eq!(draft.to, "alice@example.com");
        assert_eq!(draft.cc, "bob@example.com");
        assert_eq!(draft.subject, "Re: Planning");
    }

    #[tokio::test]
    async fn test_reply_without_target_is_noop() {
        let (_, client) = client(Settings::default()).await;
        assert_eq!(press(&client, "r").await, Effect::None);
        assert!(client.compose().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_then_undo_reopens_draft() {
        let (gateway, client) = client(Settings::default()).await;

        press(&client, "c").await;
        assert!(client.edit_compose(|draft| {
            draft.to = "alice@example.com".into();
            draft.subject = "Status".into();
        }));

        let send = KeyEvent::new("Enter")
            .with_modifiers(Modifiers::CTRL)
            .in_editable();
        let effect = client.handle_key(&send).await.unwrap();
        assert!(matches!(effect, Effect::Submitted(SubmitOutcome::Queued { .. })));
        assert!(client.compose().is_none());
        assert!(client.scheduler().live().is_some());

        assert_eq!(press(&client, "z").await, Effect::Undo(CancelOutcome::Canceled));
        assert_eq!(client.view(), View::Compose);
        let reopened = client.compose().unwrap();
        assert_eq!(reopened.to, "alice@example.com");
        assert_eq!(reopened.subject, "Status");
        assert!(gateway.sent().is_empty());

        assert_eq!(press(&client, "z").await, Effect::None);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_compose_open() {
        let (gateway, client) = client(Settings::default()).await;
        gateway.clear_calls();

        press(&client, "c").await;
        let err = client.execute(Command::Send).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Send(SendError::Validation(ValidationError::NoRecipients))
        ));

        let draft = client.compose().unwrap();
        assert!(!draft.is_sending);
        assert_eq!(
            draft.send_error.as_deref(),
            Some("Please enter at least one recipient")
        );
        assert_eq!(client.view(), View::Compose);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_escape_in_compose_discards_draft() {
        let (_, client) = client(Settings::default()).await;
        press(&client, "c").await;
        let escape = KeyEvent::new("Escape").in_editable();
        assert_eq!(client.handle_key(&escape).await.unwrap(), Effect::View(View::List));
        assert!(client.compose().is_none());
    }

    #[tokio::test]
    async fn test_typing_in_compose_is_ignored() {
        let (_, client) = client(Settings::default()).await;
        press(&client, "c").await;
        let typed = KeyEvent::new("j").in_editable();
        assert_eq!(client.handle_key(&typed).await.unwrap(), Effect::None);
        assert!(client.snapshot().selected.is_none());
    }

    #[tokio::test]
    async fn test_bulk_archive_from_selection() {
        let (gateway, client) = client(Settings::default()).await;

        press(&client, "j").await;
        assert_eq!(press(&client, "x").await, Effect::Selection(1));
        press(&client, "j").await;
        assert_eq!(press(&client, "x").await, Effect::Selection(2));
        assert_eq!(press(&client, "e").await, Effect::Updated);

        assert!(gateway.calls().iter().any(|c| {
            *c == GatewayCall::Bulk(vec![MessageId(1), MessageId(2)], BulkAction::Archive)
        }));
        assert_eq!(ids(&client), [3, 4, 5]);
        assert!(client.snapshot().selection.is_empty());
    }

    #[tokio::test]
    async fn test_star_and_read_flags() {
        let (gateway, client) = client(Settings::default()).await;

        press(&client, "j s").await;
        assert!(client.snapshot().messages[0].is_starred);
        assert!(gateway.message(MessageId(1)).unwrap().is_starred);

        press(&client, "s").await;
        assert!(!gateway.message(MessageId(1)).unwrap().is_starred);

        client
            .handle_key(&KeyEvent::new("I"))
            .await
            .unwrap();
        assert!(gateway.message(MessageId(1)).unwrap().is_read);
        client
            .handle_key(&KeyEvent::new("u").with_modifiers(Modifiers::SHIFT))
            .await
            .unwrap();
        assert!(!gateway.message(MessageId(1)).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_help_and_search_focus() {
        let (_, client) = client(Settings::default()).await;

        let Effect::Help(categories) = press(&client, "?").await else {
            panic!("expected help listing");
        };
        assert!(!categories.is_empty());
        assert_eq!(client.view(), View::Help);

        assert_eq!(press(&client, "/").await, Effect::View(View::Search));
        client.search("from:alice@example.com").await.unwrap();
        assert_eq!(client.view(), View::List);
        assert!(client.snapshot().search.is_some());

        press(&client, "escape").await;
        assert!(client.snapshot().search.is_none());
    }
}
