//! Keyboard shortcuts.
//!
//! Key events are normalized into combination strings ([`key`]), looked up
//! in a [`Keymap`], and run through a [`SequenceRecognizer`] that handles
//! leader sequences such as `g i` with a one-second timeout.

mod clock;
mod key;
mod keymap;
mod recognizer;

pub use clock::{Clock, ManualClock, TokioClock};
pub use key::{KeyEvent, KeyTarget, Modifiers, combination, normalize_combination};
pub use keymap::{Command, Keymap, Shortcut, ShortcutCategory};
pub use recognizer::{KeyResolution, RecognizerState, SEQUENCE_TIMEOUT, SequenceRecognizer};
