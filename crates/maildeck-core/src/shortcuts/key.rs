//! Key events and their canonical combination strings.
//!
//! A combination is written as modifiers in the fixed order
//! `ctrl+alt+meta+shift` followed by a lowercase key name: `ctrl+enter`,
//! `shift+i`, `#`. Shift is folded into the character for digits and
//! symbols, so `shift+3` and `#` name the same combination.

/// Modifier keys held during a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Modifiers {
    /// Control.
    pub ctrl: bool,
    /// Alt / Option.
    pub alt: bool,
    /// Meta / Command / Super.
    pub meta: bool,
    /// Shift.
    pub shift: bool,
}

impl Modifiers {
    /// No modifiers.
    pub const NONE: Self = Self {
        ctrl: false,
        alt: false,
        meta: false,
        shift: false,
    };

    /// Control only.
    pub const CTRL: Self = Self {
        ctrl: true,
        ..Self::NONE
    };

    /// Meta only.
    pub const META: Self = Self {
        meta: true,
        ..Self::NONE
    };

    /// Shift only.
    pub const SHIFT: Self = Self {
        shift: true,
        ..Self::NONE
    };

    /// Returns true if no modifier is held.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !(self.ctrl || self.alt || self.meta || self.shift)
    }
}

/// Where a key event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyTarget {
    /// The message list, reading view or anything else that is not a text field.
    #[default]
    Document,
    /// A text input, textarea or content-editable element.
    Editable,
}

/// A key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key name or produced character (`"j"`, `"Enter"`, `"#"`).
    pub key: String,
    /// Held modifiers.
    pub modifiers: Modifiers,
    /// Origin of the event.
    pub target: KeyTarget,
}

impl KeyEvent {
    /// Creates an unmodified key press in the document.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            modifiers: Modifiers::NONE,
            target: KeyTarget::Document,
        }
    }

    /// Sets the held modifiers.
    #[must_use]
    pub const fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Marks the event as coming from a text field.
    #[must_use]
    pub const fn in_editable(mut self) -> Self {
        self.target = KeyTarget::Editable;
        self
    }

    /// Canonical combination string for lookups.
    #[must_use]
    pub fn combination(&self) -> String {
        combination(&self.key, self.modifiers)
    }

    /// Returns true for the keydown of a modifier on its own, such as the
    /// shift press that precedes `shift+3`.
    #[must_use]
    pub fn is_modifier_only(&self) -> bool {
        matches!(
            self.key.to_lowercase().as_str(),
            "shift"
                | "control"
                | "ctrl"
                | "alt"
                | "altgraph"
                | "option"
                | "meta"
                | "cmd"
                | "command"
                | "super"
                | "os"
        )
    }
}

/// Builds the canonical combination for a key and modifiers.
#[must_use]
pub fn combination(key: &str, mut modifiers: Modifiers) -> String {
    let key = normalize_key(key, &mut modifiers);
    let mut parts: Vec<&str> = Vec::with_capacity(5);
    if modifiers.ctrl {
        parts.push("ctrl");
    }
    if modifiers.alt {
        parts.push("alt");
    }
    if modifiers.meta {
        parts.push("meta");
    }
    if modifiers.shift {
        parts.push("shift");
    }
    parts.push(&key);
    parts.join("+")
}

/// Re-normalizes a hand-written combination such as `"Shift+3"` or
/// `"cmd+Enter"`. Unknown modifier names are dropped.
#[must_use]
pub fn normalize_combination(input: &str) -> String {
    let input = input.trim();
    let (mods, key) = if input == "+" {
        ("", "+")
    } else if let Some(rest) = input.strip_suffix("++") {
        (rest, "+")
    } else {
        input.rsplit_once('+').unwrap_or(("", input))
    };

    let mut modifiers = Modifiers::NONE;
    for name in mods.split('+') {
        match name.trim().to_lowercase().as_str() {
            "ctrl" | "control" => modifiers.ctrl = true,
            "alt" | "option" => modifiers.alt = true,
            "meta" | "cmd" | "command" | "super" => modifiers.meta = true,
            "shift" => modifiers.shift = true,
            _ => {}
        }
    }
    combination(key.trim(), modifiers)
}

/// Lowercases the key, maps browser-style names to short ones and folds
/// shift into digits, symbols and capital letters.
fn normalize_key(key: &str, modifiers: &mut Modifiers) -> String {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_uppercase() {
            modifiers.shift = true;
            return c.to_ascii_lowercase().to_string();
        }
        if c.is_alphabetic() {
            return c.to_lowercase().to_string();
        }
        if c == ' ' {
            return "space".to_string();
        }
        if modifiers.shift {
            modifiers.shift = false;
            return shifted(c).to_string();
        }
        return c.to_string();
    }

    match key.to_lowercase().as_str() {
        "esc" => "escape".to_string(),
        "return" => "enter".to_string(),
        "arrowdown" => "down".to_string(),
        "arrowup" => "up".to_string(),
        "arrowleft" => "left".to_string(),
        "arrowright" => "right".to_string(),
        "del" => "delete".to_string(),
        "spacebar" => "space".to_string(),
        other => other.to_string(),
    }
}

/// Character a US keyboard produces for `c` with shift held. Characters
/// that are already shifted map to themselves.
const fn shifted(c: char) -> char {
    match c {
        '1' => '!',
        '2' => '@',
        '3' => '#',
        '4' => '$',
        '5' => '%',
        '6' => '^',
        '7' => '&',
        '8' => '*',
        '9' => '(',
        '0' => ')',
        '-' => '_',
        '=' => '+',
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        ';' => ':',
        '\'' => '"',
        ',' => '<',
        '.' => '>',
        '/' => '?',
        '`' => '~',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_keys() {
        assert_eq!(KeyEvent::new("j").combination(), "j");
        assert_eq!(KeyEvent::new("Enter").combination(), "enter");
        assert_eq!(KeyEvent::new("Esc").combination(), "escape");
        assert_eq!(KeyEvent::new("ArrowDown").combination(), "down");
        assert_eq!(KeyEvent::new(" ").combination(), "space");
    }

    #[test]
    fn test_modifier_order() {
        let all = Modifiers {
            ctrl: true,
            alt: true,
            meta: true,
            shift: true,
        };
        assert_eq!(KeyEvent::new("k").with_modifiers(all).combination(), "ctrl+alt+meta+shift+k");
        assert_eq!(
            KeyEvent::new("Enter").with_modifiers(Modifiers::CTRL).combination(),
            "ctrl+enter"
        );
    }

    #[test]
    fn test_shifted_symbols_drop_shift() {
        assert_eq!(KeyEvent::new("3").with_modifiers(Modifiers::SHIFT).combination(), "#");
        assert_eq!(KeyEvent::new("#").with_modifiers(Modifiers::SHIFT).combination(), "#");
        assert_eq!(KeyEvent::new("/").with_modifiers(Modifiers::SHIFT).combination(), "?");
        assert_eq!(KeyEvent::new("3").combination(), "3");
    }

    #[test]
    fn test_capital_letter_implies_shift() {
        assert_eq!(KeyEvent::new("I").combination(), "shift+i");
        assert_eq!(KeyEvent::new("i").with_modifiers(Modifiers::SHIFT).combination(), "shift+i");
        assert_eq!(KeyEvent::new("I").with_modifiers(Modifiers::SHIFT).combination(), "shift+i");
    }

    #[test]
    fn test_modifier_only_keys() {
        assert!(KeyEvent::new("Shift").is_modifier_only());
        assert!(KeyEvent::new("Meta").is_modifier_only());
        assert!(!KeyEvent::new("s").is_modifier_only());
        assert!(!KeyEvent::new("3").with_modifiers(Modifiers::SHIFT).is_modifier_only());
    }

    #[test]
    fn test_normalize_combination() {
        assert_eq!(normalize_combination("Shift+3"), "#");
        assert_eq!(normalize_combination("cmd+Enter"), "meta+enter");
        assert_eq!(normalize_combination("shift+ctrl+R"), "ctrl+shift+r");
        assert_eq!(normalize_combination("ctrl++"), "ctrl++");
        assert_eq!(normalize_combination("+"), "+");
        assert_eq!(normalize_combination("shift+="), "+");
    }

    proptest! {
        #[test]
        fn test_normalize_combination_is_idempotent(
            mods in proptest::collection::vec(
                prop_oneof![Just("ctrl"), Just("Alt"), Just("cmd"), Just("shift")],
                0..4,
            ),
            key in prop_oneof![
                Just("3".to_string()),
                Just("#".to_string()),
                Just("+".to_string()),
                Just("Enter".to_string()),
                "[a-zA-Z0-9/;=,.]",
            ],
        ) {
            let mut input = mods.join("+");
            if !input.is_empty() {
                input.push('+');
            }
            input.push_str(&key);

            let once = normalize_combination(&input);
            prop_assert_eq!(normalize_combination(&once), once);
        }
    }
}
