//! Two-key sequence recognizer.

use std::time::Duration;

use tokio::time::Instant;

use super::clock::{Clock, TokioClock};
use super::key::{KeyEvent, KeyTarget};
use super::keymap::{Command, Keymap};

/// How long a leader key waits for its second key.
pub const SEQUENCE_TIMEOUT: Duration = Duration::from_secs(1);

/// Recognizer state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecognizerState {
    /// No key pending.
    #[default]
    Idle,
    /// A leader key was pressed and the next key completes the sequence.
    AwaitingSecondKey {
        /// Normalized leader combination.
        leader: String,
        /// When the leader expires.
        deadline: Instant,
    },
}

/// What a key press resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyResolution {
    /// A bound command.
    Command(Command),
    /// A leader key was captured. The caller should suppress the key's
    /// default action.
    Pending,
    /// Nothing is bound to the key or sequence.
    Unbound,
    /// The key came from a text field and is not on the allow-list.
    Ignored,
}

impl KeyResolution {
    /// The command, if one was resolved.
    #[must_use]
    pub const fn command(self) -> Option<Command> {
        match self {
            Self::Command(command) => Some(command),
            _ => None,
        }
    }
}

/// Turns key events into commands.
///
/// The leader deadline is checked when the next key arrives (or on
/// [`tick`](Self::tick)), so no timer task is involved.
#[derive(Debug)]
pub struct SequenceRecognizer<C = TokioClock> {
    keymap: Keymap,
    clock: C,
    state: RecognizerState,
    timeout: Duration,
}

impl SequenceRecognizer<TokioClock> {
    /// Creates a recognizer on the tokio clock.
    #[must_use]
    pub fn new(keymap: Keymap) -> Self {
        Self::with_clock(keymap, TokioClock)
    }
}

impl<C: Clock> SequenceRecognizer<C> {
    /// Creates a recognizer on the given clock.
    #[must_use]
    pub const fn with_clock(keymap: Keymap, clock: C) -> Self {
        Self {
            keymap,
            clock,
            state: RecognizerState::Idle,
            timeout: SEQUENCE_TIMEOUT,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &RecognizerState {
        &self.state
    }

    /// Returns true if a leader key is waiting for its second key.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, RecognizerState::AwaitingSecondKey { deadline, .. }
            if self.clock.now() < deadline)
    }

    /// Bindings in use.
    #[must_use]
    pub const fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    /// Replaces the bindings and drops any pending leader.
    pub fn set_keymap(&mut self, keymap: Keymap) {
        self.keymap = keymap;
        self.reset();
    }

    /// Drops any pending leader.
    pub fn reset(&mut self) {
        self.state = RecognizerState::Idle;
    }

    /// Expires a leader whose deadline has passed. Returns true if one did.
    pub fn tick(&mut self) -> bool {
        if let RecognizerState::AwaitingSecondKey { leader, deadline } = &self.state
            && self.clock.now() >= *deadline
        {
            tracing::debug!(leader = %leader, "Leader key timed out");
            self.state = RecognizerState::Idle;
            return true;
        }
        false
    }

    /// Resolves a key press.
    pub fn handle(&mut self, event: &KeyEvent) -> KeyResolution {
        self.tick();
        if event.is_modifier_only() {
            // The leader keeps waiting for the key the modifier belongs to.
            return if matches!(self.state, RecognizerState::AwaitingSecondKey { .. }) {
                KeyResolution::Pending
            } else {
                KeyResolution::Unbound
            };
        }
        let combination = event.combination();
        let pending = std::mem::take(&mut self.state);

        if event.target == KeyTarget::Editable {
            if !self.keymap.is_allowed_in_editable(&combination) {
                return KeyResolution::Ignored;
            }
            return self.single(&combination);
        }

        if let RecognizerState::AwaitingSecondKey { leader, .. } = pending {
            let sequence = format!("{leader} {combination}");
            return match self.keymap.lookup(&sequence) {
                Some(command) => {
                    tracing::debug!(%sequence, ?command, "Sequence resolved");
                    KeyResolution::Command(command)
                }
                None => KeyResolution::Unbound,
            };
        }

        if event.modifiers.is_empty() && self.keymap.is_leader(&combination) {
            self.state = RecognizerState::AwaitingSecondKey {
                deadline: self.clock.now() + self.timeout,
                leader: combination,
            };
            return KeyResolution::Pending;
        }

        self.single(&combination)
    }

    fn single(&self, combination: &str) -> KeyResolution {
        self.keymap
            .lookup(combination)
            .map_or(KeyResolution::Unbound, KeyResolution::Command)
    }
}
