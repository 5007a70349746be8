//! Data models for message ingestion and storage
//!
//! This module contains the records that flow through a load run (raw,
//! resolved) and the rows held by the store (contacts, conversations,
//! messages), plus the per-artifact reports.

use std::fmt;
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Sender as written in an artifact, before identity resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawSender {
    /// The exporter's self-marker for outgoing messages
    Me,
    /// A phone number or other handle, verbatim
    Handle(String),
}

impl RawSender {
    /// Classify a sender line from an artifact
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed == SELF_MARKER {
            Self::Me
        } else {
            Self::Handle(trimmed.to_string())
        }
    }
}

/// The exporter's sender name for the local user
pub const SELF_MARKER: &str = "Me";

/// File attached to a message, as referenced by the artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Base file name
    pub filename: String,
    /// MIME type guessed from the extension
    pub mime_type: String,
    /// True if the exporter rendered it as a sticker
    pub is_sticker: bool,
}

/// A tapback left on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReaction {
    /// Reaction verb (Loved, Liked, ...)
    pub kind: String,
    /// Who reacted, verbatim
    pub reactor: RawSender,
}

/// Per-message annotations the exporter prints around a body.
///
/// None of these feed the message identifier, so a message keeps its id
/// when a later export adds a read receipt or an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Read-receipt note from the header, e.g. `Read by you after 1 minute`
    pub read_receipt: Option<String>,
    /// Send effect from the header, e.g. `Slam effect`
    pub expressive_type: Option<String>,
    /// Text of the latest edit
    pub edited_text: Option<String>,
    /// Delay of the latest edit, e.g. `1 minute`
    pub edited_after: Option<String>,
    /// The sender unsent this message
    pub is_unsent: bool,
    /// Reply-thread depth (four spaces of indentation per level)
    pub indent_level: usize,
}

/// One message block parsed from an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessageRecord {
    /// Sender line of the block
    pub sender: RawSender,
    /// Header timestamp (naive, as exported)
    pub timestamp: NaiveDateTime,
    /// Body text with attachment and annotation lines removed
    pub body: Option<String>,
    /// True if the body was replaced by, or carried, an attachment placeholder
    pub has_attachment: bool,
    /// Named attachments found in the block
    pub attachments: Vec<AttachmentRef>,
    /// Tapbacks listed under the block
    pub reactions: Vec<RawReaction>,
    /// Raw participant handles of the owning artifact
    pub participants: Arc<[String]>,
    /// 1-based line number of the header
    pub line: usize,
    /// Header line of the message this one replies to
    pub reply_to_line: Option<usize>,
    /// Exporter annotations
    pub meta: MessageMeta,
}

/// Whether a message was sent by the local user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the local user
    Sent,
    /// Received from another participant
    Received,
}

impl Direction {
    /// Column value for this direction
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    /// Parse a stored column value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(Self::Sent),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Direction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Direction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::parse(text).ok_or_else(|| FromSqlError::Other(format!("unknown direction {text:?}").into()))
    }
}

/// One-to-one vs group conversation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// At most one participant besides the local user
    Dm,
    /// Two or more other participants
    Group,
}

impl ConversationKind {
    /// Key prefix and column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
        }
    }

    /// Parse a stored column value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dm" => Some(Self::Dm),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

impl ToSql for ConversationKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConversationKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Self::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown conversation kind {text:?}").into()))
    }
}

/// A conversation identified by its participant set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Deterministic key derived from the participants
    pub conversation_key: String,
    /// One-to-one or group
    pub kind: ConversationKind,
    /// Sorted, deduplicated canonical participant identifiers
    pub participant_numbers: Vec<String>,
}

/// A contact row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Normalized number (or pass-through handle)
    pub canonical_number: String,
    /// User-chosen alias, if configured
    pub alias: Option<String>,
}

impl Contact {
    /// Alias if known, otherwise the canonical number
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.canonical_number)
    }
}

/// A reaction after identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReaction {
    /// Reaction verb
    pub kind: String,
    /// Canonical identifier of the reactor
    pub reactor: String,
}

/// A record after identity resolution, ready for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    /// Content-derived dedup key
    pub message_id: String,
    /// Owning conversation
    pub conversation: Conversation,
    /// Canonical identifier of the sender
    pub sender_number: String,
    /// Alias of the sender, or the canonical identifier when unknown
    pub sender_display: String,
    /// Header timestamp
    pub timestamp: NaiveDateTime,
    /// Body text
    pub body: Option<String>,
    /// Attachment marker
    pub has_attachment: bool,
    /// Sent or received
    pub direction: Direction,
    /// Named attachments
    pub attachments: Vec<AttachmentRef>,
    /// Resolved tapbacks
    pub reactions: Vec<ResolvedReaction>,
    /// Message this one replies to, once the parent has been stored
    pub reply_to_message_id: Option<String>,
    /// Exporter annotations
    pub meta: MessageMeta,
}

/// A stored message row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Dedup key
    pub message_id: String,
    /// Owning conversation
    pub conversation_key: String,
    /// Canonical sender identifier
    pub sender_number: String,
    /// Header timestamp
    pub timestamp: NaiveDateTime,
    /// Body text
    pub body: Option<String>,
    /// Attachment marker
    pub has_attachment: bool,
    /// Sent or received
    pub direction: Direction,
    /// Artifact that first inserted this row
    pub source_artifact: String,
    /// Parent of a threaded reply
    pub reply_to_message_id: Option<String>,
    /// Exporter annotations
    pub meta: MessageMeta,
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written
    Inserted,
    /// A row with the same message_id already existed
    SkippedDuplicate,
}

/// Per-artifact summary of a load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Artifact identity (file name)
    pub artifact: String,
    /// Conversation the artifact resolved to
    pub conversation_key: String,
    /// Records emitted plus malformed lines counted
    pub seen: usize,
    /// New message rows
    pub inserted: usize,
    /// Records that matched an existing message_id
    pub skipped_duplicate: usize,
    /// Malformed header and orphan lines skipped by the parser
    pub malformed_skipped: usize,
    /// Records dropped by the ingest policy
    pub filtered: usize,
    /// Attachment rows written
    pub attachments: usize,
    /// Reaction rows written
    pub reactions: usize,
}

/// A row of the load ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRun {
    /// Artifact name
    pub artifact: String,
    /// Conversation the artifact resolved to
    pub conversation_key: String,
    /// Commit time (UTC)
    pub loaded_at: NaiveDateTime,
    /// Records seen
    pub seen: usize,
    /// Rows inserted
    pub inserted: usize,
    /// Duplicates skipped
    pub skipped_duplicate: usize,
    /// Malformed lines skipped
    pub malformed_skipped: usize,
}

/// An artifact that failed within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFailure {
    /// Artifact path
    pub artifact: String,
    /// Rendered error
    pub error: String,
}

/// Outcome of loading a set of artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Reports of committed artifacts, in load order
    pub reports: Vec<LoadReport>,
    /// Artifacts that were skipped or rolled back
    pub failures: Vec<ArtifactFailure>,
}

impl BatchReport {
    /// Total new message rows across the batch
    #[must_use]
    pub fn total_inserted(&self) -> usize {
        self.reports.iter().map(|r| r.inserted).sum()
    }

    /// Total malformed lines across the batch
    #[must_use]
    pub fn total_malformed(&self) -> usize {
        self.reports.iter().map(|r| r.malformed_skipped).sum()
    }
}

/// Half-open range `[start, end)` for filtering messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// Start (inclusive, optional)
    pub start: Option<NaiveDateTime>,
    /// End (exclusive, optional)
    pub end: Option<NaiveDateTime>,
}

impl DateRange {
    /// Range with no bounds
    #[must_use]
    pub const fn all() -> Self {
        Self { start: None, end: None }
    }

    /// Whole calendar days from `start` through `end`, both included
    #[must_use]
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start: start.map(|d| d.and_time(NaiveTime::MIN)),
            end: end.map(|d| {
                d.checked_add_days(Days::new(1))
                    .map_or(NaiveDateTime::MAX, |next| next.and_time(NaiveTime::MIN))
            }),
        }
    }

    /// True if `timestamp` falls inside the range
    #[must_use]
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp < end)
    }
}

/// Output format for exported transcripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Comma-separated values format
    Csv,
    /// Plain text format
    Txt,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Get the file extension for this format
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Txt => "txt",
            Self::Json => "json",
        }
    }

    /// Parse a user-supplied format name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "txt" => Some(Self::Txt),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_from_dates_covers_whole_days() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let range = DateRange::from_dates(Some(day), Some(day));

        let last_instant = NaiveDateTime::parse_from_str("2024-01-15 23:59:59.999", "%Y-%m-%d %H:%M:%S%.f").unwrap();
        assert!(range.contains(day.and_time(NaiveTime::MIN)));
        assert!(range.contains(last_instant));
        assert!(!range.contains(day.succ_opt().unwrap().and_time(NaiveTime::MIN)));
        assert!(DateRange::all().contains(last_instant));
    }
}
