//! Command names and the key bindings that trigger them.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::gateway::FolderType;

use super::key::normalize_combination;

/// An action the client can perform from the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move the cursor down.
    NextMessage,
    /// Move the cursor up.
    PreviousMessage,
    /// Open the message under the cursor.
    OpenMessage,
    /// Close the reading view, compose window or search.
    Back,
    /// Move to the archive folder.
    Archive,
    /// Move to trash.
    Delete,
    /// Toggle the star flag.
    ToggleStar,
    /// Mark as read.
    MarkRead,
    /// Mark as unread.
    MarkUnread,
    /// Reply, honouring the reply-behavior setting.
    Reply,
    /// Reply to everyone.
    ReplyAll,
    /// Forward.
    Forward,
    /// Start a new message.
    Compose,
    /// Add or remove the message under the cursor from the selection.
    ToggleSelect,
    /// Cancel the send that is counting down.
    UndoSend,
    /// Move focus to the search box.
    FocusSearch,
    /// Show the shortcut list.
    ShowHelp,
    /// Submit the open compose window.
    Send,
    /// Switch to a well-known folder.
    GoTo(FolderType),
}

impl Command {
    /// Short description for the help listing.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NextMessage => "Next message",
            Self::PreviousMessage => "Previous message",
            Self::OpenMessage => "Open message",
            Self::Back => "Back / close",
            Self::Archive => "Archive",
            Self::Delete => "Move to trash",
            Self::ToggleStar => "Star / unstar",
            Self::MarkRead => "Mark as read",
            Self::MarkUnread => "Mark as unread",
            Self::Reply => "Reply",
            Self::ReplyAll => "Reply all",
            Self::Forward => "Forward",
            Self::Compose => "Compose",
            Self::ToggleSelect => "Select message",
            Self::UndoSend => "Undo send",
            Self::FocusSearch => "Search",
            Self::ShowHelp => "Show shortcuts",
            Self::Send => "Send",
            Self::GoTo(FolderType::Inbox) => "Go to inbox",
            Self::GoTo(FolderType::Starred) => "Go to starred",
            Self::GoTo(FolderType::Sent) => "Go to sent",
            Self::GoTo(FolderType::Drafts) => "Go to drafts",
            Self::GoTo(FolderType::Archive) => "Go to archive",
            Self::GoTo(FolderType::Trash) => "Go to trash",
            Self::GoTo(FolderType::Spam) => "Go to spam",
            Self::GoTo(FolderType::Regular) => "Go to folder",
        }
    }

    /// Help category the command is listed under.
    #[must_use]
    pub const fn category(self) -> &'static str {
        match self {
            Self::NextMessage | Self::PreviousMessage | Self::OpenMessage | Self::Back => {
                "Navigation"
            }
            Self::Archive
            | Self::Delete
            | Self::ToggleStar
            | Self::MarkRead
            | Self::MarkUnread
            | Self::ToggleSelect => "Actions",
            Self::Reply
            | Self::ReplyAll
            | Self::Forward
            | Self::Compose
            | Self::Send
            | Self::UndoSend => "Compose",
            Self::GoTo(_) => "Go to",
            Self::FocusSearch | Self::ShowHelp => "General",
        }
    }
}

/// A category of shortcuts for the help listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutCategory {
    /// Category heading.
    pub name: &'static str,
    /// Shortcuts in the category.
    pub shortcuts: Vec<Shortcut>,
}

/// A single line of the help listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    /// Every combination bound to the command, joined with `/`.
    pub keys: String,
    /// What the command does.
    pub description: &'static str,
}

/// Maps combinations and two-key sequences to commands.
///
/// Sequences are written as two combinations separated by a space (`"g i"`).
/// Binding a sequence registers its first key as a leader.
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    bindings: HashMap<String, Command>,
    leaders: HashSet<String>,
    editable_allow: HashSet<String>,
}

impl Keymap {
    /// Creates an empty keymap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard mail shortcuts.
    #[must_use]
    pub fn default_bindings() -> Self {
        let mut keymap = Self::new();
        let singles = [
            ("j", Command::NextMessage),
            ("down", Command::NextMessage),
            ("k", Command::PreviousMessage),
            ("up", Command::PreviousMessage),
            ("o", Command::OpenMessage),
            ("enter", Command::OpenMessage),
            ("escape", Command::Back),
            ("e", Command::Archive),
            ("shift+3", Command::Delete),
            ("s", Command::ToggleStar),
            ("shift+i", Command::MarkRead),
            ("shift+u", Command::MarkUnread),
            ("r", Command::Reply),
            ("a", Command::ReplyAll),
            ("f", Command::Forward),
            ("c", Command::Compose),
            ("x", Command::ToggleSelect),
            ("z", Command::UndoSend),
            ("/", Command::FocusSearch),
            ("shift+/", Command::ShowHelp),
            ("ctrl+enter", Command::Send),
            ("meta+enter", Command::Send),
        ];
        let sequences = [
            ("g i", FolderType::Inbox),
            ("g s", FolderType::Starred),
            ("g t", FolderType::Sent),
            ("g d", FolderType::Drafts),
            ("g a", FolderType::Archive),
            ("g shift+3", FolderType::Trash),
        ];

        for (keys, command) in singles {
            keymap.bind(keys, command);
        }
        for (keys, folder) in sequences {
            keymap.bind(keys, Command::GoTo(folder));
        }
        keymap.allow_in_editable("ctrl+enter");
        keymap.allow_in_editable("meta+enter");
        keymap
    }

    /// Binds a combination or two-key sequence. Returns false, binding
    /// nothing, for empty input or sequences longer than two keys.
    pub fn bind(&mut self, keys: &str, command: Command) -> bool {
        let parts: Vec<String> = keys.split_whitespace().map(normalize_combination).collect();
        match parts.as_slice() {
            [single] => {
                self.bindings.insert(single.clone(), command);
            }
            [leader, second] => {
                self.leaders.insert(leader.clone());
                self.bindings.insert(format!("{leader} {second}"), command);
            }
            _ => return false,
        }
        true
    }

    /// Lets a combination through while focus is in a text field.
    pub fn allow_in_editable(&mut self, combination: &str) {
        self.editable_allow.insert(normalize_combination(combination));
    }

    /// Looks up a combination or a `"leader key"` sequence.
    #[must_use]
    pub fn lookup(&self, keys: &str) -> Option<Command> {
        self.bindings.get(keys).copied()
    }

    /// Returns true if the combination starts a sequence.
    #[must_use]
    pub fn is_leader(&self, combination: &str) -> bool {
        self.leaders.contains(combination)
    }

    /// Returns true if the combination works inside text fields.
    #[must_use]
    pub fn is_allowed_in_editable(&self, combination: &str) -> bool {
        combination == "escape" || self.editable_allow.contains(combination)
    }

    /// Builds the help listing from the current bindings.
    #[must_use]
    pub fn help(&self) -> Vec<ShortcutCategory> {
        const ORDER: [&str; 5] = ["Navigation", "Actions", "Compose", "Go to", "General"];

        let mut by_command: Vec<(Command, Vec<&str>)> = Vec::new();
        for (keys, command) in &self.bindings {
            match by_command.iter_mut().find(|(c, _)| c == command) {
                Some((_, all)) => all.push(keys),
                None => by_command.push((*command, vec![keys])),
            }
        }

        let mut categories: BTreeMap<usize, Vec<Shortcut>> = BTreeMap::new();
        for (command, mut keys) in by_command {
            keys.sort_unstable();
            let rank = ORDER
                .iter()
                .position(|name| *name == command.category())
                .unwrap_or(ORDER.len());
            categories.entry(rank).or_default().push(Shortcut {
                keys: keys.join(" / "),
                description: command.description(),
            });
        }

        categories
            .into_iter()
            .map(|(rank, mut shortcuts)| {
                shortcuts.sort_by(|a, b| a.description.cmp(b.description));
                ShortcutCategory {
                    name: ORDER.get(rank).copied().unwrap_or("Other"),
                    shortcuts,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_singles() {
        let keymap = Keymap::default_bindings();
        assert_eq!(keymap.lookup("j"), Some(Command::NextMessage));
        assert_eq!(keymap.lookup("#"), Some(Command::Delete));
        assert_eq!(keymap.lookup("?"), Some(Command::ShowHelp));
        assert_eq!(keymap.lookup("shift+i"), Some(Command::MarkRead));
        assert_eq!(keymap.lookup("meta+enter"), Some(Command::Send));
        assert_eq!(keymap.lookup("shift+3"), None);
        assert_eq!(keymap.lookup("q"), None);
    }

    #[test]
    fn test_default_sequences() {
        let keymap = Keymap::default_bindings();
        assert!(keymap.is_leader("g"));
        assert!(!keymap.is_leader("j"));
        assert_eq!(keymap.lookup("g i"), Some(Command::GoTo(FolderType::Inbox)));
        assert_eq!(keymap.lookup("g #"), Some(Command::GoTo(FolderType::Trash)));
        assert_eq!(keymap.lookup("g"), None);
    }

    #[test]
    fn test_editable_allow_list() {
        let keymap = Keymap::default_bindings();
        assert!(keymap.is_allowed_in_editable("escape"));
        assert!(keymap.is_allowed_in_editable("ctrl+enter"));
        assert!(!keymap.is_allowed_in_editable("enter"));
        assert!(!keymap.is_allowed_in_editable("j"));
    }

    #[test]
    fn test_bind_rejects_long_sequences() {
        let mut keymap = Keymap::new();
        assert!(!keymap.bind("g g g", Command::Compose));
        assert!(!keymap.bind("  ", Command::Compose));
        assert!(keymap.bind("Shift+C", Command::Compose));
        assert_eq!(keymap.lookup("shift+c"), Some(Command::Compose));
    }

    #[test]
    fn test_help_groups_keys_per_command() {
        let help = Keymap::default_bindings().help();
        let names: Vec<_> = help.iter().map(|c| c.name).collect();
        assert_eq!(names, ["Navigation", "Actions", "Compose", "Go to", "General"]);

        let navigation = &help[0];
        let next = navigation
            .shortcuts
            .iter()
            .find(|s| s.description == "Next message")
            .unwrap();
        assert_eq!(next.keys, "down / j");

        let go_to = &help[3];
        assert!(go_to.shortcuts.iter().any(|s| s.keys == "g i"));
    }
}
