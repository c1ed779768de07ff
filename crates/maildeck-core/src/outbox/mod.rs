//! Deferred sending: immediate, scheduled and send-with-undo.

mod model;
mod scheduler;

pub use model::{
    CancelOutcome, Countdown, OutboxEntry, OutboxEvent, OutboxState, SendError, SendMode,
    SubmitOutcome, ValidationError, is_valid_address, validate_outgoing,
};
pub use scheduler::OutboxScheduler;
