//! Identity resolution: raw records to storage-ready records.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::address_book::{canonical_handle, AddressBook};
use crate::models::{
    Conversation, ConversationKind, Direction, RawMessageRecord, RawSender, ResolvedReaction,
    ResolvedRecord,
};

const FIELD_SEPARATOR: u8 = 0x1f;

/// Timestamp rendering used inside message identifiers
///
/// Sub-second digits appear only when present, so whole-second
/// identifiers stay stable.
pub const MESSAGE_ID_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Canonical identifier for a raw sender
#[must_use]
pub fn canonical_sender(sender: &RawSender, book: &AddressBook) -> String {
    match sender {
        RawSender::Me => book.self_identity().to_string(),
        RawSender::Handle(handle) => canonical_handle(handle),
    }
}

/// Build the conversation for a set of raw participant handles.
///
/// The local user is always a member. The key depends only on the set of
/// canonical identifiers, never on their order or on the artifact.
#[must_use]
pub fn conversation_for<I, S>(participants: I, book: &AddressBook) -> Conversation
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let self_identity = book.self_identity();

    let mut members: BTreeSet<String> = participants
        .into_iter()
        .map(|raw| {
            let raw = raw.as_ref();
            if raw.trim() == crate::models::SELF_MARKER {
                self_identity.to_string()
            } else {
                canonical_handle(raw)
            }
        })
        .filter(|id| !id.is_empty())
        .collect();
    members.insert(self_identity.to_string());

    let others = members.iter().filter(|m| m.as_str() != self_identity).count();
    let kind = if others <= 1 {
        ConversationKind::Dm
    } else {
        ConversationKind::Group
    };

    let participant_numbers: Vec<String> = members.into_iter().collect();
    Conversation {
        conversation_key: format!("{}:{}", kind.as_str(), participant_numbers.join(",")),
        kind,
        participant_numbers,
    }
}

/// Content-derived identifier over conversation, sender, timestamp and body
#[must_use]
pub fn message_id(
    conversation_key: &str,
    sender_number: &str,
    timestamp: &chrono::NaiveDateTime,
    body: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(conversation_key.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(sender_number.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(timestamp.format(MESSAGE_ID_TIME_FORMAT).to_string().as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(body.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Pure mapping from raw records to resolved records
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver<'a> {
    book: &'a AddressBook,
}

impl<'a> IdentityResolver<'a> {
    /// Resolver bound to an address book
    #[must_use]
    pub const fn new(book: &'a AddressBook) -> Self {
        Self { book }
    }

    /// Address book in use
    #[must_use]
    pub const fn address_book(&self) -> &'a AddressBook {
        self.book
    }

    /// Resolve one record
    #[must_use]
    pub fn resolve(&self, record: &RawMessageRecord) -> ResolvedRecord {
        resolve(record, self.book)
    }
}

/// Resolve one record against an address book
#[must_use]
pub fn resolve(record: &RawMessageRecord, book: &AddressBook) -> ResolvedRecord {
    let conversation = conversation_for(record.participants.iter(), book);
    let sender_number = canonical_sender(&record.sender, book);

    let direction = if sender_number == book.self_identity() {
        Direction::Sent
    } else {
        Direction::Received
    };

    let sender_display = book
        .alias_of(&sender_number)
        .map_or_else(|| sender_number.clone(), ToString::to_string);

    let reactions = record
        .reactions
        .iter()
        .map(|reaction| ResolvedReaction {
            kind: reaction.kind.clone(),
            reactor: canonical_sender(&reaction.reactor, book),
        })
        .collect();

    ResolvedRecord {
        message_id: message_id(
            &conversation.conversation_key,
            &sender_number,
            &record.timestamp,
            record.body.as_deref(),
        ),
        conversation,
        sender_number,
        sender_display,
        timestamp: record.timestamp,
        body: record.body.clone(),
        has_attachment: record.has_attachment,
        direction,
        attachments: record.attachments.clone(),
        reactions,
        reply_to_message_id: None,
        meta: record.meta.clone(),
    }
}
