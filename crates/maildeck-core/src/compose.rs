//! Compose session.

use crate::gateway::{Attachment, Message, MessageId, OutgoingMessage};
use crate::outbox::{ValidationError, is_valid_address};

/// A draft being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeSession {
    /// Recipient addresses (To), comma-separated.
    pub to: String,
    /// CC addresses, comma-separated.
    pub cc: String,
    /// BCC addresses, comma-separated.
    pub bcc: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Files to attach.
    pub attachments: Vec<Attachment>,
    /// Message being replied to.
    pub in_reply_to: Option<MessageId>,
    /// Whether a submission is in flight.
    pub is_sending: bool,
    /// Error from the last submission attempt.
    pub send_error: Option<String>,
}

impl ComposeSession {
    /// Creates an empty draft.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reply to the sender of `original`.
    #[must_use]
    pub fn reply(original: &Message) -> Self {
        Self {
            to: original.from.clone(),
            subject: prefixed("Re:", &original.subject),
            body: quote(original),
            in_reply_to: Some(original.id),
            ..Self::default()
        }
    }

    /// Creates a reply to the sender and every other recipient of
    /// `original`, leaving out `own_address`.
    #[must_use]
    pub fn reply_all(original: &Message, own_address: &str) -> Self {
        let mut seen = vec![original.from.to_lowercase(), own_address.to_lowercase()];
        let mut cc = Vec::new();
        for address in original.to.iter().chain(&original.cc) {
            let lower = address.trim().to_lowercase();
            if lower.is_empty() || seen.contains(&lower) {
                continue;
            }
            seen.push(lower);
            cc.push(address.trim());
        }

        Self {
            cc: cc.join(", "),
            ..Self::reply(original)
        }
    }

    /// Creates a forward of `original` with its headers quoted.
    #[must_use]
    pub fn forward(original: &Message) -> Self {
        let body = format!(
            "\n\n---------- Forwarded message ----------\nFrom: {}\nDate: {}\nSubject: {}\nTo: {}\n\n{}",
            original.from,
            original.date.format("%a, %d %b %Y %H:%M"),
            original.subject,
            original.to.join(", "),
            original_text(original),
        );

        Self {
            subject: prefixed("Fwd:", &original.subject),
            body,
            ..Self::default()
        }
    }

    /// Reopens a message that was pulled back from the outbox.
    #[must_use]
    pub fn from_outgoing(message: &OutgoingMessage) -> Self {
        Self {
            to: message.to.join(", "),
            cc: message.cc.join(", "),
            bcc: message.bcc.join(", "),
            subject: message.subject.clone(),
            body: message.body.clone(),
            attachments: message.attachments.clone(),
            in_reply_to: message.in_reply_to,
            ..Self::default()
        }
    }

    /// Adds an attachment.
    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// Removes an attachment by position.
    pub fn remove_attachment(&mut self, index: usize) -> Option<Attachment> {
        (index < self.attachments.len()).then(|| self.attachments.remove(index))
    }

    /// Checks that the draft has at least one recipient and that all of
    /// them look like addresses.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let recipients: Vec<&str> = [&self.to, &self.cc, &self.bcc]
            .into_iter()
            .flat_map(|field| split_addresses(field))
            .collect();
        if recipients.is_empty() {
            return Err(ValidationError::NoRecipients);
        }
        match recipients.into_iter().find(|r| !is_valid_address(r)) {
            Some(invalid) => Err(ValidationError::InvalidAddress(invalid.to_string())),
            None => Ok(()),
        }
    }

    /// Builds the payload for the gateway.
    #[must_use]
    pub fn to_outgoing(&self, from: &str) -> OutgoingMessage {
        let mut message = OutgoingMessage::new(from, &self.subject, &self.body);
        message.to = split_addresses(&self.to).map(String::from).collect();
        message.cc = split_addresses(&self.cc).map(String::from).collect();
        message.bcc = split_addresses(&self.bcc).map(String::from).collect();
        message.attachments.clone_from(&self.attachments);
        message.in_reply_to = self.in_reply_to;
        message
    }
}

/// Splits an address field on commas and semicolons, dropping blanks.
fn split_addresses(field: &str) -> impl Iterator<Item = &str> {
    field
        .split([',', ';'])
        .map(str::trim)
        .filter(|a| !a.is_empty())
}

fn prefixed(prefix: &str, subject: &str) -> String {
    let subject = subject.trim();
    let already = subject
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
    if already {
        subject.to_string()
    } else {
        format!("{prefix} {subject}")
    }
}

fn original_text(original: &Message) -> &str {
    original.body.as_deref().unwrap_or(&original.snippet)
}

fn quote(original: &Message) -> String {
    let quoted = original_text(original).replace('\n', "\n> ");
    format!(
        "\n\nOn {}, {} wrote:\n> {quoted}",
        original.date.format("%a, %d %b %Y %H:%M"),
        original.from
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn original() -> Message {
        Message {
            id: MessageId(42),
            folder: "INBOX".into(),
            subject: "Quarterly report".into(),
            from: "alice@example.com".into(),
            to: vec!["me@example.com".into(), "bob@example.com".into()],
            cc: vec!["carol@example.com".into(), "Alice@example.com".into()],
            body: Some("Numbers attached.\nThanks".into()),
            snippet: "Numbers attached.".into(),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            is_read: true,
            is_starred: false,
            has_attachments: false,
            labels: Vec::new(),
        }
    }

    #[test]
    fn test_reply() {
        let draft = ComposeSession::reply(&original());
        assert_eq!(draft.to, "alice@example.com");
        assert_eq!(draft.subject, "Re: Quarterly report");
        assert_eq!(draft.in_reply_to, Some(MessageId(42)));
        assert!(draft.body.contains("alice@example.com wrote:"));
        assert!(draft.body.contains("> Numbers attached.\n> Thanks"));
    }

    #[test]
    fn test_reply_prefix_added_once() {
        let mut message = original();
        message.subject = "RE: Quarterly report".into();
        assert_eq!(ComposeSession::reply(&message).subject, "RE: Quarterly report");
    }

    #[test]
    fn test_reply_all_excludes_self_and_sender() {
        let draft = ComposeSession::reply_all(&original(), "ME@example.com");
        assert_eq!(draft.to, "alice@example.com");
        assert_eq!(draft.cc, "bob@example.com, carol@example.com");
    }

    #[test]
    fn test_forward() {
        let draft = ComposeSession::forward(&original());
        assert_eq!(draft.subject, "Fwd: Quarterly report");
        assert!(draft.to.is_empty());
        assert!(draft.in_reply_to.is_none());
        assert!(draft.body.contains("From: alice@example.com"));
        assert!(draft.body.contains("Subject: Quarterly report"));
        assert!(draft.body.ends_with("Numbers attached.\nThanks"));
    }

    #[test]
    fn test_validate() {
        let mut draft = ComposeSession::new();
        assert_eq!(draft.validate(), Err(ValidationError::NoRecipients));

        draft.to = " , ".into();
        assert_eq!(draft.validate(), Err(ValidationError::NoRecipients));

        draft.bcc = "team@example.com".into();
        assert_eq!(draft.validate(), Ok(()));

        draft.cc = "not-an-address".into();
        assert_eq!(
            draft.validate(),
            Err(ValidationError::InvalidAddress("not-an-address".into()))
        );
    }

    #[test]
    fn test_to_outgoing() {
        let mut draft = ComposeSession::reply(&original());
        draft.cc = "bob@example.com; carol@example.com".into();
        draft.attach(Attachment {
            filename: "notes.txt".into(),
            mime_type: "text/plain".into(),
            data: b"hi".to_vec(),
        });

        let message = draft.to_outgoing("me@example.com");

        assert_eq!(message.from, "me@example.com");
        assert_eq!(message.to, vec!["alice@example.com"]);
        assert_eq!(message.cc, vec!["bob@example.com", "carol@example.com"]);
        assert!(message.has_attachments());
        assert_eq!(message.in_reply_to, Some(MessageId(42)));
        assert!(draft.remove_attachment(3).is_none());
        assert!(draft.remove_attachment(0).is_some());
    }
}
