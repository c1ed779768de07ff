//! Line-oriented front end.
//!
//! Each input line is either a sequence of keys (`j j #`, `g i`,
//! `ctrl+enter`) fed to the shortcut recognizer, or a `:command` for the
//! things a keyboard alone cannot express (typing a search, filling in the
//! compose fields, scheduling).

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use maildeck_core::gateway::{FolderType, OutboxId, QueuedMessage};
use maildeck_core::outbox::{SendError, SendMode};
use maildeck_core::shortcuts::{KeyEvent, KeyTarget, Modifiers, normalize_combination};
use maildeck_core::store::StoreSnapshot;
use maildeck_core::{
    CancelOutcome, ComposeSession, Effect, GatewayError, MailClient, MailGateway, MessageId,
    SearchOutcome, Settings, SubmitOutcome, View, group_into_threads,
};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Blank line; just redraw.
    Empty,
    /// Key presses, in order.
    Keys(Vec<KeyEvent>),
    /// A `:command`.
    Action(Action),
}

/// Commands typed after `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a search; empty clears it.
    Search(String),
    /// Set the To field.
    To(String),
    /// Set the Cc field.
    Cc(String),
    /// Set the Bcc field.
    Bcc(String),
    /// Set the subject.
    Subject(String),
    /// Append a line to the body.
    Body(String),
    /// Submit the compose window.
    Send(SendMode),
    /// List the undo outbox.
    Outbox,
    /// List scheduled sends.
    Scheduled,
    /// Cancel a scheduled send.
    Cancel(OutboxId),
    /// Move a scheduled send.
    Reschedule(OutboxId, DateTime<Utc>),
    /// Show folder counts.
    Folders,
    /// Next page of the list.
    NextPage,
    /// Previous page of the list.
    PreviousPage,
    /// Move the message under the cursor.
    Move(String),
    /// Add (`true`) or remove a label on the message under the cursor.
    Label(String, bool),
    /// Show the list grouped into conversations.
    Threads,
    /// Change a setting and save it.
    Set(String, String),
    /// Show the shortcut listing.
    Help,
    /// Leave.
    Quit,
}

/// Parses one input line.
pub fn parse_line(line: &str) -> anyhow::Result<Input> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix(':') else {
        return Ok(Input::Keys(line.split_whitespace().map(parse_key).collect()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, r)| (n, r.trim()));
    let action = match name {
        "search" | "s" => Action::Search(rest.to_string()),
        "to" => Action::To(rest.to_string()),
        "cc" => Action::Cc(rest.to_string()),
        "bcc" => Action::Bcc(rest.to_string()),
        "subject" => Action::Subject(rest.to_string()),
        "body" => Action::Body(rest.to_string()),
        "send" => Action::Send(parse_send_mode(rest)?),
        "outbox" => Action::Outbox,
        "scheduled" => Action::Scheduled,
        "cancel" if !rest.is_empty() => Action::Cancel(OutboxId::new(rest)),
        "reschedule" => {
            let (id, at) = rest
                .split_once(char::is_whitespace)
                .context("usage: :reschedule <id> <rfc3339 time>")?;
            Action::Reschedule(OutboxId::new(id), parse_time(at.trim())?)
        }
        "folders" => Action::Folders,
        "next" => Action::NextPage,
        "prev" => Action::PreviousPage,
        "move" if !rest.is_empty() => Action::Move(rest.to_string()),
        "label" if !rest.is_empty() => Action::Label(rest.to_string(), true),
        "unlabel" if !rest.is_empty() => Action::Label(rest.to_string(), false),
        "threads" => Action::Threads,
        "set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .context("usage: :set <name> <value>")?;
            Action::Set(key.to_string(), value.trim().to_string())
        }
        "help" | "h" => Action::Help,
        "quit" | "q" => Action::Quit,
        _ => bail!("unknown command :{name} (try :help)"),
    };
    Ok(Input::Action(action))
}

fn parse_send_mode(rest: &str) -> anyhow::Result<SendMode> {
    match rest.split_once(char::is_whitespace) {
        None if rest.is_empty() => Ok(SendMode::Undoable),
        None if rest == "now" => Ok(SendMode::Immediate),
        Some(("at", at)) => Ok(SendMode::Scheduled(parse_time(at.trim())?)),
        _ => bail!("usage: :send [now | at <rfc3339 time>]"),
    }
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid time {raw:?}"))?
        .with_timezone(&Utc))
}

/// Builds a key event from a token such as `j`, `Enter` or `ctrl+enter`.
pub fn parse_key(token: &str) -> KeyEvent {
    let canonical = normalize_combination(token);
    let (mods, key) = match canonical.strip_suffix("++") {
        _ if canonical == "+" => ("", "+"),
        Some(mods) => (mods, "+"),
        None => canonical.rsplit_once('+').unwrap_or(("", canonical.as_str())),
    };

    let mut modifiers = Modifiers::NONE;
    for name in mods.split('+') {
        match name {
            "ctrl" => modifiers.ctrl = true,
            "alt" => modifiers.alt = true,
            "meta" => modifiers.meta = true,
            "shift" => modifiers.shift = true,
            _ => {}
        }
    }
    KeyEvent::new(key).with_modifiers(modifiers)
}

/// Drives a client from parsed input.
pub struct Session<'a, G> {
    client: &'a MailClient<G>,
    settings_path: PathBuf,
}

impl<'a, G: MailGateway> Session<'a, G> {
    /// Creates a session. Settings changes are saved to `settings_path`.
    pub const fn new(client: &'a MailClient<G>, settings_path: PathBuf) -> Self {
        Self {
            client,
            settings_path,
        }
    }

    /// Runs one input and returns the text to show.
    pub async fn run(&self, input: Input) -> anyhow::Result<String> {
        match input {
            Input::Empty => Ok(render_screen(self.client)),
            Input::Keys(keys) => {
                let mut out = String::new();
                for mut key in keys {
                    if self.client.view() == View::Compose {
                        key.target = KeyTarget::Editable;
                    }
                    let effect = self.client.handle_key(&key).await?;
                    if let Some(line) = describe(&effect) {
                        let _ = writeln!(out, "{line}");
                    }
                }
                out.push_str(&render_screen(self.client));
                Ok(out)
            }
            Input::Action(action) => self.act(action).await,
        }
    }

    async fn act(&self, action: Action) -> anyhow::Result<String> {
        let client = self.client;
        let edit = |apply: &dyn Fn(&mut ComposeSession)| {
            if client.edit_compose(|draft| apply(draft)) {
                Ok(render_screen(client))
            } else {
                bail!("no message is being composed (press c)")
            }
        };

        match action {
            Action::Search(query) => {
                let outcome = client.search(&query).await?;
                let summary = match outcome {
                    SearchOutcome::Cleared(_) => "Search cleared".to_string(),
                    SearchOutcome::FreeText { results } => format!("{results} results"),
                    SearchOutcome::Operator { pagination, .. } => {
                        format!("{} results (operator search)", pagination.total)
                    }
                    SearchOutcome::Stale => "Search superseded".to_string(),
                };
                Ok(format!("{summary}\n{}", render_screen(client)))
            }
            Action::To(value) => edit(&|d| d.to.clone_from(&value)),
            Action::Cc(value) => edit(&|d| d.cc.clone_from(&value)),
            Action::Bcc(value) => edit(&|d| d.bcc.clone_from(&value)),
            Action::Subject(value) => edit(&|d| d.subject.clone_from(&value)),
            Action::Body(line) => edit(&|d| {
                if !d.body.is_empty() {
                    d.body.push('\n');
                }
                d.body.push_str(&line);
            }),
            Action::Send(mode) => {
                let effect = client.send(mode).await?;
                Ok(describe(&effect).unwrap_or_else(|| "Nothing to send".to_string()))
            }
            Action::Outbox => Ok(render_queue(&client.scheduler().list_outbox().await?)),
            Action::Scheduled => Ok(render_queue(&client.scheduler().list_scheduled().await?)),
            Action::Cancel(id) => {
                let outcome = client.scheduler().cancel_scheduled(&id).await?;
                Ok(format!("{id}: {outcome:?}"))
            }
            Action::Reschedule(id, at) => {
                let send_at = client.scheduler().reschedule(&id, at).await?;
                Ok(format!("{id} now sends at {}", send_at.format("%Y-%m-%d %H:%M:%S")))
            }
            Action::Folders => {
                client.store().refresh_folders().await?;
                Ok(render_folders(&client.snapshot()))
            }
            Action::NextPage => {
                client.store().next_page().await?;
                Ok(render_screen(client))
            }
            Action::PreviousPage => {
                client.store().previous_page().await?;
                Ok(render_screen(client))
            }
            Action::Move(folder) => {
                let id = self.current()?;
                client.store().move_message(id, &folder).await?;
                Ok(render_screen(client))
            }
            Action::Label(label, add) => {
                let id = self.current()?;
                client.store().set_label(id, &label, add).await?;
                Ok(render_screen(client))
            }
            Action::Threads => Ok(render_threads(&client.snapshot())),
            Action::Set(key, value) => {
                let settings = apply_setting(&client.settings(), &key, &value)?;
                settings.save(&self.settings_path).await?;
                client.update_settings(settings.clone());
                Ok(format!("{settings:#?}"))
            }
            Action::Help => Ok(render_help(client)),
            Action::Quit => Ok(String::new()),
        }
    }

    fn current(&self) -> anyhow::Result<MessageId> {
        let snapshot = self.client.snapshot();
        match self.client.view() {
            View::Reading(id) => Ok(id),
            _ => snapshot.selected.context("no message selected (press j)"),
        }
    }
}

/// Returns a copy of `settings` with one field changed. Values are decoded
/// with the same lenient rules as the settings file.
pub fn apply_setting(settings: &Settings, key: &str, raw: &str) -> anyhow::Result<Settings> {
    let field = match key {
        "undo_delay" | "undo_send_delay_secs" => "undo_send_delay_secs",
        "auto_advance" => "auto_advance",
        "conversation_view" | "threads" => "conversation_view",
        "shortcuts" | "keyboard_shortcuts" => "keyboard_shortcuts",
        "reply" | "reply_behavior" => "reply_behavior",
        "density" => "density",
        "reading_pane" => "reading_pane",
        _ => bail!("unknown setting {key:?}"),
    };
    let value = match raw {
        "on" | "true" | "yes" => serde_json::Value::Bool(true),
        "off" | "false" | "no" => serde_json::Value::Bool(false),
        _ => raw
            .parse::<u64>()
            .map_or_else(|_| serde_json::Value::String(raw.to_string()), Into::into),
    };

    let mut json = serde_json::to_value(settings)?;
    json[field] = value;
    Ok(serde_json::from_value(json)?)
}

/// True if the failed input is worth repeating as is.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(e) = error.downcast_ref::<maildeck_core::Error>() {
        return e.is_retryable();
    }
    if let Some(e) = error.downcast_ref::<SendError>() {
        return e.is_retryable();
    }
    error
        .downcast_ref::<GatewayError>()
        .is_some_and(GatewayError::is_transient)
}

fn describe(effect: &Effect) -> Option<String> {
    match effect {
        Effect::None | Effect::Cursor(_) | Effect::Updated | Effect::View(_) => None,
        Effect::Pending => Some("...".to_string()),
        Effect::Selection(count) => Some(format!("{count} selected")),
        Effect::Help(categories) => {
            let mut out = String::new();
            for category in categories {
                let _ = writeln!(out, "{}", category.name);
                for shortcut in &category.shortcuts {
                    let _ = writeln!(out, "  {:<24} {}", shortcut.keys, shortcut.description);
                }
            }
            Some(out)
        }
        Effect::Submitted(outcome) => Some(match outcome {
            SubmitOutcome::Sent { forced_immediate: true } => {
                "Sent immediately (attachments cannot be delayed)".to_string()
            }
            SubmitOutcome::Sent { .. } => "Sent".to_string(),
            SubmitOutcome::Scheduled { outbox_id, send_at } => {
                format!("Scheduled {outbox_id} for {}", send_at.format("%Y-%m-%d %H:%M"))
            }
            SubmitOutcome::Queued { outbox_id, .. } => {
                format!("Sending {outbox_id}... press z to undo")
            }
        }),
        Effect::Undo(outcome) => Some(match outcome {
            CancelOutcome::Canceled => "Send canceled, draft reopened".to_string(),
            CancelOutcome::AlreadySent => "Too late, already sent".to_string(),
        }),
    }
}

fn render_queue(entries: &[QueuedMessage]) -> String {
    if entries.is_empty() {
        return "Nothing queued".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{}  {}  {:?}  {} -> {}",
            entry.outbox_id,
            entry.send_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status,
            entry.subject,
            entry.to.join(", ")
        );
    }
    out
}

fn render_help<G: MailGateway>(client: &MailClient<G>) -> String {
    let mut out = describe(&Effect::Help(client.shortcuts_help())).unwrap_or_default();
    out.push_str(
        "\nCommands: :search <q>  :to :cc :bcc :subject :body  :send [now | at <time>]\n\
         :outbox  :scheduled  :cancel <id>  :reschedule <id> <time>  :folders  :next  :prev\n\
         :move <folder>  :label <l>  :unlabel <l>  :threads  :set <name> <value>  :quit\n",
    );
    out
}

/// Renders whatever has focus.
pub fn render_screen<G: MailGateway>(client: &MailClient<G>) -> String {
    let snapshot = client.snapshot();
    let mut out = match (client.view(), client.compose()) {
        (View::Compose, Some(draft)) => {
            let mut out = String::from("-- Compose --\n");
            let _ = writeln!(out, "To:      {}", draft.to);
            let _ = writeln!(out, "Cc:      {}", draft.cc);
            let _ = writeln!(out, "Bcc:     {}", draft.bcc);
            let _ = writeln!(out, "Subject: {}", draft.subject);
            let _ = writeln!(out, "\n{}", draft.body);
            if let Some(error) = &draft.send_error {
                let _ = writeln!(out, "! {error}");
            }
            out
        }
        (View::Reading(_), _) => render_message(&snapshot),
        _ => render_list(&snapshot),
    };
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "! {error}");
    }
    out
}

/// Renders the message list with its header.
pub fn render_list(snapshot: &StoreSnapshot) -> String {
    let mut out = String::new();
    let folder = snapshot.folder(&snapshot.current_folder);
    let _ = write!(out, "{}", snapshot.current_folder);
    if let Some(folder) = folder {
        let _ = write!(out, "  {} unread / {}", folder.unread_count, folder.total_count);
    }
    if let Some(search) = &snapshot.search {
        let _ = write!(out, "  search: {}", search.query);
    }
    let _ = writeln!(
        out,
        "  page {} of {}",
        snapshot.pagination.page,
        snapshot.pagination.pages.max(1)
    );

    if snapshot.messages.is_empty() {
        out.push_str("  (no messages)\n");
    }
    for message in &snapshot.messages {
        let cursor = if snapshot.selected == Some(message.id) { '>' } else { ' ' };
        let ticked = if snapshot.selection.contains(&message.id) { 'x' } else { ' ' };
        let star = if message.is_starred { '*' } else { ' ' };
        let unread = if message.is_read { ' ' } else { 'N' };
        let _ = writeln!(
            out,
            "{cursor}{ticked}{star}{unread} {:>4}  {:<24} {}",
            message.id.0,
            truncate(&message.from, 24),
            message.subject
        );
    }
    out
}

fn render_message(snapshot: &StoreSnapshot) -> String {
    let Some(message) = &snapshot.open_message else {
        return render_list(snapshot);
    };
    let mut out = String::new();
    let _ = writeln!(out, "From:    {}", message.from);
    let _ = writeln!(out, "To:      {}", message.to.join(", "));
    let _ = writeln!(out, "Date:    {}", message.date.format("%a, %d %b %Y %H:%M"));
    let _ = writeln!(out, "Subject: {}", message.subject);
    if !message.labels.is_empty() {
        let _ = writeln!(out, "Labels:  {}", message.labels.join(", "));
    }
    let _ = writeln!(out, "\n{}", message.body.as_deref().unwrap_or(&message.snippet));
    if let Some(thread) = snapshot.thread.as_ref().filter(|t| t.len() > 1) {
        let _ = writeln!(out, "-- Conversation ({} messages) --", thread.len());
        for entry in thread {
            let marker = if entry.id == message.id { '>' } else { ' ' };
            let _ = writeln!(
                out,
                "{marker} {}  {:<24} {}",
                entry.date.format("%d %b %H:%M"),
                truncate(&entry.from, 24),
                entry.subject
            );
        }
    }
    out
}

fn render_folders(snapshot: &StoreSnapshot) -> String {
    let mut out = String::new();
    for folder in &snapshot.folders {
        let marker = if folder.name == snapshot.current_folder { '>' } else { ' ' };
        let kind = match folder.folder_type() {
            FolderType::Regular => String::new(),
            other => format!(" ({other:?})"),
        };
        let _ = writeln!(
            out,
            "{marker} {:<16} {:>4} unread {:>5} total{kind}",
            folder.name, folder.unread_count, folder.total_count
        );
    }
    out
}

fn render_threads(snapshot: &StoreSnapshot) -> String {
    let mut out = String::new();
    for thread in group_into_threads(&snapshot.messages) {
        let _ = writeln!(
            out,
            "{:>2} msgs {:>2} unread  {:<30} {}",
            thread.message_count(),
            thread.unread_count,
            truncate(&thread.participants_display(), 30),
            thread.subject
        );
    }
    if out.is_empty() {
        out.push_str("(no conversations)\n");
    }
    out
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use maildeck_core::AutoAdvance;

    #[test]
    fn test_parse_keys() {
        let Input::Keys(keys) = parse_line("g i  shift+3 ctrl+Enter").unwrap() else {
            panic!("expected keys");
        };
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[0].combination(), "g");
        assert_eq!(keys[2].combination(), "#");
        assert_eq!(keys[3].combination(), "ctrl+enter");
        assert!(keys[3].modifiers.ctrl);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line("").unwrap(), Input::Empty);
        assert_eq!(
            parse_line(":search from:alice has:attachment").unwrap(),
            Input::Action(Action::Search("from:alice has:attachment".into()))
        );
        assert_eq!(parse_line(":send").unwrap(), Input::Action(Action::Send(SendMode::Undoable)));
        assert_eq!(
            parse_line(":send now").unwrap(),
            Input::Action(Action::Send(SendMode::Immediate))
        );
        assert!(matches!(
            parse_line(":send at 2030-01-02T09:00:00Z").unwrap(),
            Input::Action(Action::Send(SendMode::Scheduled(_)))
        ));
        assert!(parse_line(":send later").is_err());
        assert!(parse_line(":bogus").is_err());
        assert!(parse_line(":move").is_err());
        assert_eq!(parse_line(":q").unwrap(), Input::Action(Action::Quit));
    }

    #[test]
    fn test_apply_setting() {
        let base = Settings::default();

        let changed = apply_setting(&base, "auto_advance", "previous").unwrap();
        assert_eq!(changed.auto_advance, AutoAdvance::Previous);

        let changed = apply_setting(&base, "undo_delay", "30").unwrap();
        assert_eq!(changed.undo_send_delay_secs, 30);

        let changed = apply_setting(&base, "undo_delay", "0").unwrap();
        assert_eq!(changed.undo_send_delay_secs, 10);

        let changed = apply_setting(&base, "shortcuts", "off").unwrap();
        assert!(!changed.keyboard_shortcuts);
        assert_eq!(changed.auto_advance, base.auto_advance);

        assert!(apply_setting(&base, "colour", "blue").is_err());
    }

    #[test]
    fn test_retryable_errors() {
        let offline = GatewayError::Network("offline".into());
        assert!(is_retryable(&anyhow::Error::from(offline.clone())));
        assert!(is_retryable(&anyhow::Error::from(maildeck_core::Error::from(offline.clone()))));
        assert!(!is_retryable(&anyhow::Error::from(SendError::Final(offline))));
        assert!(!is_retryable(&anyhow::anyhow!("unknown command")));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-address@example.com", 8), "a-very-~");
    }
}
