//! Conversation threading by normalized subject.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::gateway::{GatewayResult, MailGateway, Message, MessageId};

/// Reply and forward prefixes, matched case-insensitively.
const SUBJECT_PREFIXES: [&str; 3] = ["re:", "fwd:", "fw:"];

/// Strips any number of leading `Re:`/`Fwd:`/`Fw:` prefixes and surrounding
/// whitespace.
///
/// Normalizing an already-normalized subject returns it unchanged.
#[must_use]
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    'strip: loop {
        for prefix in SUBJECT_PREFIXES {
            let matched = rest
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matched {
                rest = rest[prefix.len()..].trim_start();
                continue 'strip;
            }
        }
        break;
    }
    rest.trim_end().to_string()
}

/// Resolves the conversation a message belongs to.
#[derive(Debug)]
pub struct ThreadResolver<G> {
    gateway: Arc<G>,
}

impl<G> Clone for ThreadResolver<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<G: MailGateway> ThreadResolver<G> {
    /// Creates a resolver over the given gateway.
    pub const fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Returns the messages sharing `message`'s conversation, oldest first.
    ///
    /// The result is never empty: a blank subject skips the lookup, and an
    /// empty gateway answer falls back to the message itself.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the lookup fails.
    pub async fn resolve(&self, message: &Message) -> GatewayResult<Vec<Message>> {
        let key = message.thread_key();
        if key.is_empty() {
            return Ok(vec![message.clone()]);
        }

        let mut related = self.gateway.fetch_thread(&key).await?;
        if related.is_empty() {
            tracing::debug!(id = %message.id, subject = %key, "Thread lookup empty, using single message");
            return Ok(vec![message.clone()]);
        }

        related.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        related.dedup_by_key(|m| m.id);
        Ok(related)
    }
}

/// Summary of a conversation in a loaded message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// Normalized subject shared by the conversation.
    pub key: String,
    /// Messages in this thread, oldest first.
    pub messages: Vec<MessageId>,
    /// Subject of the earliest message.
    pub subject: String,
    /// Unique senders, in order of first appearance.
    pub participants: Vec<String>,
    /// Date of the most recent message.
    pub latest_date: DateTime<Utc>,
    /// Number of unread messages.
    pub unread_count: usize,
}

impl Thread {
    fn new(key: String, root: &Message) -> Self {
        Self {
            key,
            messages: vec![root.id],
            subject: root.subject.clone(),
            participants: vec![root.from.clone()],
            latest_date: root.date,
            unread_count: usize::from(!root.is_read),
        }
    }

    fn add_message(&mut self, message: &Message) {
        if self.messages.contains(&message.id) {
            return;
        }
        self.messages.push(message.id);
        if !self.participants.contains(&message.from) {
            self.participants.push(message.from.clone());
        }
        if !message.is_read {
            self.unread_count += 1;
        }
        self.latest_date = self.latest_date.max(message.date);
    }

    /// Returns the number of messages in the thread.
    #[must_use]
    pub const fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Returns a display string for participants (e.g., "Alice, Bob +2 others").
    #[must_use]
    pub fn participants_display(&self) -> String {
        match self.participants.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [first, second] => format!("{first}, {second}"),
            [first, second, rest @ ..] => format!("{first}, {second} +{} others", rest.len()),
        }
    }
}

/// Groups messages into threads by normalized subject, most recent first.
///
/// Messages with a blank subject each form their own thread.
#[must_use]
pub fn group_into_threads(messages: &[Message]) -> Vec<Thread> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date));

    let mut threads: HashMap<String, Thread> = HashMap::new();
    for message in ordered {
        let key = match message.thread_key() {
            key if key.is_empty() => format!("message-{}", message.id),
            key => key,
        };
        threads
            .entry(key.clone())
            .and_modify(|t| t.add_message(message))
            .or_insert_with(|| Thread::new(key, message));
    }

    let mut list: Vec<Thread> = threads.into_values().collect();
    list.sort_by(|a, b| b.latest_date.cmp(&a.latest_date).then(a.key.cmp(&b.key)));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use chrono::Duration;
    use proptest::prelude::*;

    fn message(id: u32, subject: &str, from: &str, minutes: i64) -> Message {
        let epoch = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        Message {
            id: MessageId(id),
            folder: "INBOX".into(),
            subject: subject.into(),
            from: from.into(),
            to: vec!["me@example.com".into()],
            cc: Vec::new(),
            body: None,
            snippet: String::new(),
            date: epoch + Duration::minutes(minutes),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_normalize_strips_prefixes() {
        assert_eq!(normalize_subject("Re: Lunch"), "Lunch");
        assert_eq!(normalize_subject("RE: re: Fwd:  Lunch  "), "Lunch");
        assert_eq!(normalize_subject("FWD:Fw: Lunch"), "Lunch");
        assert_eq!(normalize_subject("Re:"), "");
        assert_eq!(normalize_subject("Reply needed"), "Reply needed");
        assert_eq!(normalize_subject("Lunch re: Friday"), "Lunch re: Friday");
    }

    #[test]
    fn test_normalize_handles_multibyte() {
        assert_eq!(normalize_subject("Ré: café"), "Ré: café");
        assert_eq!(normalize_subject("Re: 会議"), "会議");
    }

    proptest! {
        #[test]
        fn test_normalize_is_idempotent(subject in "\\PC{0,40}") {
            let once = normalize_subject(&subject);
            prop_assert_eq!(normalize_subject(&once), once);
        }

        #[test]
        fn test_repeated_prefixes_fully_stripped(
            subject in "[a-zA-Z0-9 ]{0,20}",
            prefixes in proptest::collection::vec(
                prop_oneof![Just("Re: "), Just("RE:"), Just("Fwd: "), Just("fw:")],
                0..5,
            ),
        ) {
            let prefixed = format!("{}{subject}", prefixes.concat());
            prop_assert_eq!(normalize_subject(&prefixed), normalize_subject(&subject));
        }
    }

    #[tokio::test]
    async fn test_blank_subject_skips_lookup() {
        let gateway = Arc::new(MemoryGateway::new());
        let resolver = ThreadResolver::new(Arc::clone(&gateway));
        let original = message(1, "  Re:  ", "alice@example.com", 0);

        let thread = resolver.resolve(&original).await.unwrap();

        assert_eq!(thread, vec![original]);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_lookup_falls_back_to_message() {
        let gateway = Arc::new(MemoryGateway::new());
        let resolver = ThreadResolver::new(Arc::clone(&gateway));
        let original = message(9, "Re: Not yet indexed", "alice@example.com", 0);

        let thread = resolver.resolve(&original).await.unwrap();

        assert_eq!(thread, vec![original]);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_orders_oldest_first() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert_message(message(1, "Re: Budget", "bob@example.com", 30));
        gateway.insert_message(message(2, "Budget", "alice@example.com", 0));
        gateway.insert_message(message(3, "Other", "carol@example.com", 10));
        let resolver = ThreadResolver::new(Arc::clone(&gateway));

        let thread = resolver
            .resolve(&message(1, "Re: Budget", "bob@example.com", 30))
            .await
            .unwrap();

        let ids: Vec<MessageId> = thread.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId(2), MessageId(1)]);
    }

    #[test]
    fn test_group_into_threads() {
        let mut read = message(3, "Re: Budget", "alice@example.com", 50);
        read.is_read = true;
        let messages = vec![
            message(1, "Budget", "alice@example.com", 0),
            message(2, "Re: Budget", "bob@example.com", 20),
            read,
            message(4, "Lunch", "carol@example.com", 40),
            message(5, "", "dave@example.com", 10),
        ];

        let threads = group_into_threads(&messages);

        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0].key, "Budget");
        assert_eq!(
            threads[0].messages,
            vec![MessageId(1), MessageId(2), MessageId(3)]
        );
        assert_eq!(threads[0].unread_count, 2);
        assert_eq!(threads[0].subject, "Budget");
        assert_eq!(threads[0].participants_display(), "alice@example.com, bob@example.com");
        assert_eq!(threads[1].key, "Lunch");
        assert_eq!(threads[2].message_count(), 1);
    }

    #[test]
    fn test_participants_display() {
        let mut thread = Thread::new("k".into(), &message(1, "k", "a", 0));
        for (id, from) in [(2, "b"), (3, "c"), (4, "d")] {
            thread.add_message(&message(id, "k", from, i64::from(id)));
        }
        assert_eq!(thread.participants_display(), "a, b +2 others");
    }
}
