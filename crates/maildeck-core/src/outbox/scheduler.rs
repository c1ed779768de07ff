//! Deferred-send scheduler.
//!
//! The countdown shown for an undoable send mirrors the deadline the server
//! returned when the message was queued. The server delivers on its own at
//! that time; the local timer only decides when the client stops offering
//! undo. Reaching zero, a server push ([`OutboxScheduler::notify_sent`]) and
//! a cancel confirmation all race to end an entry, and only the first one
//! wins.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::model::{
    CancelOutcome, Countdown, OutboxEntry, OutboxEvent, OutboxState, SendError, SendMode,
    SubmitOutcome, ValidationError, validate_outgoing,
};
use crate::gateway::{
    CancelResponse, MailGateway, OutboxId, OutgoingMessage, QueueKind, QueuedMessage,
};
use crate::settings::DEFAULT_UNDO_DELAY_SECS;

/// Terminal outcomes remembered for late cancel requests.
const FINISHED_CAPACITY: usize = 64;

const EVENT_CAPACITY: usize = 32;

/// Whole seconds from now until `at`, rounded up. Zero if `at` has passed.
fn seconds_until(at: DateTime<Utc>) -> u64 {
    let millis = (at - Utc::now()).num_milliseconds();
    u64::try_from(millis).map_or(0, |ms| ms.div_ceil(1000))
}

#[derive(Debug)]
struct LiveEntry {
    entry: OutboxEntry,
    remaining_secs: u64,
    cancel_in_flight: bool,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    undo_delay_secs: u64,
    live: Option<LiveEntry>,
    finished: HashMap<OutboxId, OutboxState>,
    finished_order: VecDeque<OutboxId>,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    countdown: watch::Sender<Option<Countdown>>,
    events: broadcast::Sender<OutboxEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves an entry to a terminal state. Returns false if it already had one.
    fn finish(&self, inner: &mut Inner, id: &OutboxId, state: OutboxState) -> bool {
        if inner.finished.contains_key(id) {
            tracing::debug!(%id, ?state, "Outbox entry already finished");
            return false;
        }
        inner.finished.insert(id.clone(), state);
        inner.finished_order.push_back(id.clone());
        if inner.finished_order.len() > FINISHED_CAPACITY
            && let Some(oldest) = inner.finished_order.pop_front()
        {
            inner.finished.remove(&oldest);
        }

        if inner.live.as_ref().is_some_and(|l| &l.entry.id == id) {
            if let Some(ticker) = inner.live.take().and_then(|l| l.ticker) {
                ticker.abort();
            }
            self.countdown.send_replace(None);
        }

        let event = match state {
            OutboxState::Canceled => OutboxEvent::Canceled(id.clone()),
            OutboxState::Completed | OutboxState::Pending => OutboxEvent::Completed(id.clone()),
        };
        tracing::info!(%id, ?state, "Outbox entry finished");
        let _ = self.events.send(event);
        true
    }

    /// One countdown step. Returns false once the ticker should stop.
    fn tick(&self, id: &OutboxId) -> bool {
        let mut inner = self.lock();
        let Some(live) = inner.live.as_mut().filter(|l| &l.entry.id == id) else {
            return false;
        };

        live.remaining_secs = live.remaining_secs.saturating_sub(1);
        if live.remaining_secs > 0 {
            self.countdown.send_replace(Some(Countdown {
                outbox_id: id.clone(),
                subject: live.entry.payload.subject.clone(),
                remaining_secs: live.remaining_secs,
            }));
            return true;
        }
        if live.cancel_in_flight {
            // The cancel response decides.
            return true;
        }
        self.finish(&mut inner, id, OutboxState::Completed);
        false
    }
}

/// Unifies immediate, scheduled and undoable sends over a [`MailGateway`].
#[derive(Debug)]
pub struct OutboxScheduler<G> {
    gateway: Arc<G>,
    shared: Arc<Shared>,
}

impl<G: MailGateway> OutboxScheduler<G> {
    /// Creates a scheduler with the default undo window.
    pub fn new(gateway: Arc<G>) -> Self {
        let (countdown, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    undo_delay_secs: DEFAULT_UNDO_DELAY_SECS,
                    live: None,
                    finished: HashMap::new(),
                    finished_order: VecDeque::new(),
                }),
                countdown,
                events,
            }),
        }
    }

    /// Sets the undo window for future sends. Zero is ignored.
    pub fn set_undo_delay(&self, secs: u64) {
        if secs > 0 {
            self.shared.lock().undo_delay_secs = secs;
        }
    }

    /// Current undo window in seconds.
    #[must_use]
    pub fn undo_delay(&self) -> u64 {
        self.shared.lock().undo_delay_secs
    }

    /// Watches the live countdown. `None` when no undo window is open.
    #[must_use]
    pub fn subscribe_countdown(&self) -> watch::Receiver<Option<Countdown>> {
        self.shared.countdown.subscribe()
    }

    /// Receives terminal transitions of tracked entries.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<OutboxEvent> {
        self.shared.events.subscribe()
    }

    /// The entry currently shown with a countdown.
    #[must_use]
    pub fn live(&self) -> Option<OutboxEntry> {
        self.shared.lock().live.as_ref().map(|l| l.entry.clone())
    }

    /// State of an entry this scheduler tracked, if it still remembers it.
    #[must_use]
    pub fn state_of(&self, id: &OutboxId) -> Option<OutboxState> {
        let inner = self.shared.lock();
        if inner.live.as_ref().is_some_and(|l| &l.entry.id == id) {
            return Some(OutboxState::Pending);
        }
        inner.finished.get(id).copied()
    }

    /// Submits a message.
    ///
    /// Messages with attachments always go out immediately because the
    /// server-side queue does not carry attachments.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] without calling the gateway if the
    /// message has no valid recipients or the scheduled time has passed, and
    /// [`SendError::Gateway`] if the send or enqueue request fails. No entry
    /// is tracked in either case.
    pub async fn submit(
        &self,
        message: &OutgoingMessage,
        mode: SendMode,
    ) -> Result<SubmitOutcome, SendError> {
        validate_outgoing(message)?;
        if let SendMode::Scheduled(at) = mode
            && at <= Utc::now()
        {
            return Err(ValidationError::ScheduleInPast.into());
        }

        let forced_immediate = mode != SendMode::Immediate && message.has_attachments();
        if forced_immediate {
            tracing::info!(?mode, "Message has attachments, sending immediately");
        }

        match mode {
            SendMode::Immediate => self.send_now(message, false).await,
            _ if forced_immediate => self.send_now(message, true).await,
            SendMode::Scheduled(at) => {
                let delay = seconds_until(at).max(1);
                let receipt = self
                    .gateway
                    .queue(message, delay, QueueKind::Scheduled)
                    .await?;
                tracing::info!(id = %receipt.outbox_id, send_at = %receipt.send_at, "Message scheduled");
                Ok(SubmitOutcome::Scheduled {
                    outbox_id: receipt.outbox_id,
                    send_at: receipt.send_at,
                })
            }
            SendMode::Undoable => {
                let delay = self.undo_delay();
                let receipt = self.gateway.queue(message, delay, QueueKind::Undo).await?;
                tracing::info!(id = %receipt.outbox_id, delay, "Message queued with undo");
                self.track(message.clone(), receipt.outbox_id.clone(), receipt.send_at);
                Ok(SubmitOutcome::Queued {
                    outbox_id: receipt.outbox_id,
                    send_at: receipt.send_at,
                })
            }
        }
    }

    async fn send_now(
        &self,
        message: &OutgoingMessage,
        forced_immediate: bool,
    ) -> Result<SubmitOutcome, SendError> {
        self.gateway.send(message).await?;
        tracing::info!(subject = %message.subject, "Message sent");
        Ok(SubmitOutcome::Sent { forced_immediate })
    }

    /// Starts the countdown for a freshly queued entry, superseding any
    /// previous one. The superseded message is still sent.
    fn track(&self, payload: OutgoingMessage, id: OutboxId, send_at: DateTime<Utc>) {
        let remaining_secs = seconds_until(send_at);
        let deadline = Instant::now() + Duration::from_secs(remaining_secs);
        let subject = payload.subject.clone();

        let mut inner = self.shared.lock();
        if let Some(previous) = inner.live.take() {
            if let Some(ticker) = previous.ticker {
                ticker.abort();
            }
            tracing::debug!(id = %previous.entry.id, "Undo countdown superseded");
            let _ = self
                .shared
                .events
                .send(OutboxEvent::Superseded(previous.entry.id));
        }

        inner.live = Some(LiveEntry {
            entry: OutboxEntry {
                id: id.clone(),
                send_at,
                deadline,
                state: OutboxState::Pending,
                payload,
            },
            remaining_secs,
            cancel_in_flight: false,
            ticker: None,
        });

        if remaining_secs == 0 {
            self.shared.finish(&mut inner, &id, OutboxState::Completed);
            return;
        }

        self.shared.countdown.send_replace(Some(Countdown {
            outbox_id: id.clone(),
            subject,
            remaining_secs,
        }));

        let shared = Arc::clone(&self.shared);
        let ticker = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if !shared.tick(&id) {
                    break;
                }
            }
        });
        if let Some(live) = inner.live.as_mut() {
            live.ticker = Some(ticker);
        }
    }

    /// Cancels an undoable send.
    ///
    /// Entries whose window already closed report
    /// [`CancelOutcome::AlreadySent`] without a gateway call. While the
    /// request is in flight the countdown cannot complete the entry.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the request fails. After a transient
    /// failure before the deadline the entry stays pending and the cancel
    /// may be retried ([`SendError::is_retryable`]). After the deadline, or
    /// when the server refused outright, the entry is treated as sent.
    pub async fn cancel(&self, id: &OutboxId) -> Result<CancelOutcome, SendError> {
        {
            let mut inner = self.shared.lock();
            match inner.finished.get(id) {
                Some(OutboxState::Canceled) => return Ok(CancelOutcome::Canceled),
                Some(_) => return Ok(CancelOutcome::AlreadySent),
                None => {}
            }
            if let Some(live) = inner.live.as_mut().filter(|l| &l.entry.id == id) {
                if !live.cancel_in_flight && Instant::now() >= live.entry.deadline {
                    tracing::debug!(%id, "Undo window closed before the countdown caught up");
                    self.shared.finish(&mut inner, id, OutboxState::Completed);
                    return Ok(CancelOutcome::AlreadySent);
                }
                live.cancel_in_flight = true;
            }
        }

        tracing::info!(%id, "Canceling queued message");
        let response = self.gateway.cancel_queued(id).await;

        let mut inner = self.shared.lock();
        match response {
            Ok(CancelResponse::Canceled) => {
                self.shared.finish(&mut inner, id, OutboxState::Canceled);
                Ok(CancelOutcome::Canceled)
            }
            Ok(CancelResponse::AlreadySent) => {
                tracing::info!(%id, "Cancel lost the race, message already sent");
                self.shared.finish(&mut inner, id, OutboxState::Completed);
                Ok(CancelOutcome::AlreadySent)
            }
            Err(e) => {
                tracing::warn!(?e, %id, "Cancel request failed");
                let give_up = match inner.live.as_mut().filter(|l| &l.entry.id == id) {
                    Some(live) => {
                        live.cancel_in_flight = false;
                        !e.is_transient() || Instant::now() >= live.entry.deadline
                    }
                    None => false,
                };
                if give_up {
                    self.shared.finish(&mut inner, id, OutboxState::Completed);
                    return Err(SendError::Final(e));
                }
                Err(e.into())
            }
        }
    }

    /// Records a delivery reported by the server. Idempotent with the
    /// countdown reaching zero.
    pub fn notify_sent(&self, id: &OutboxId) -> bool {
        let mut inner = self.shared.lock();
        self.shared.finish(&mut inner, id, OutboxState::Completed)
    }

    /// Lists pending undoable sends on the server.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn list_outbox(&self) -> Result<Vec<QueuedMessage>, SendError> {
        Ok(self.gateway.list_outbox().await?)
    }

    /// Lists scheduled sends on the server.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn list_scheduled(&self) -> Result<Vec<QueuedMessage>, SendError> {
        Ok(self.gateway.list_scheduled().await?)
    }

    /// Moves a scheduled send to a new time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ScheduleInPast`] without calling the
    /// gateway if `at` is not in the future, otherwise the gateway error.
    pub async fn reschedule(
        &self,
        id: &OutboxId,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SendError> {
        if at <= Utc::now() {
            return Err(ValidationError::ScheduleInPast.into());
        }
        let receipt = self.gateway.update_scheduled(id, at).await?;
        tracing::info!(%id, send_at = %receipt.send_at, "Scheduled message moved");
        Ok(receipt.send_at)
    }

    /// Cancels a scheduled send.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn cancel_scheduled(&self, id: &OutboxId) -> Result<CancelOutcome, SendError> {
        let outcome = match self.gateway.cancel_scheduled(id).await? {
            CancelResponse::Canceled => CancelOutcome::Canceled,
            CancelResponse::AlreadySent => CancelOutcome::AlreadySent,
        };
        tracing::info!(%id, ?outcome, "Scheduled message canceled");
        Ok(outcome)
    }
}
