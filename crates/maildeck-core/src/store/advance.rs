//! Cursor placement after the selected message leaves the list.

use crate::settings::AutoAdvance;

/// Index to select after removing the entry at `removed` from a list that
/// now holds `remaining` entries. `None` returns to the bare list.
///
/// The result is always a valid index into the shortened list.
#[must_use]
pub fn successor(rule: AutoAdvance, removed: usize, remaining: usize) -> Option<usize> {
    if remaining == 0 {
        return None;
    }
    match rule {
        AutoAdvance::Next => (removed < remaining).then_some(removed),
        AutoAdvance::Previous => removed.checked_sub(1).map(|i| i.min(remaining - 1)),
        AutoAdvance::None => None,
    }
}
