//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The DDL itself lives in `migrations/`.

/// Contacts table schema
pub mod contacts {
    /// Table name
    pub const TABLE: &str = "contacts";
    /// Normalized number, primary key
    pub const CANONICAL_NUMBER: &str = "canonical_number";
    /// Optional alias column
    pub const ALIAS: &str = "alias";
}

/// Conversations table schema
pub mod conversations {
    /// Table name
    pub const TABLE: &str = "conversations";
    /// Participant-derived key, primary key
    pub const CONVERSATION_KEY: &str = "conversation_key";
    /// `dm` or `group`
    pub const KIND: &str = "kind";
    /// JSON array of canonical participants
    pub const PARTICIPANTS: &str = "participants";
    /// First load that saw this participant set
    pub const FIRST_SEEN_AT: &str = "first_seen_at";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Content-derived primary key
    pub const MESSAGE_ID: &str = "message_id";
    /// Foreign key to conversations table
    pub const CONVERSATION_KEY: &str = "conversation_key";
    /// Canonical sender column
    pub const SENDER_NUMBER: &str = "sender_number";
    /// Header timestamp column
    pub const TIMESTAMP: &str = "timestamp";
    /// Message text content column
    pub const BODY: &str = "body";
    /// Flag indicating if message has attachments
    pub const HAS_ATTACHMENT: &str = "has_attachment";
    /// `sent` or `received`
    pub const DIRECTION: &str = "direction";
    /// Artifact that first inserted the row
    pub const SOURCE_ARTIFACT: &str = "source_artifact";
    /// Message import timestamp column
    pub const IMPORTED_AT: &str = "imported_at";
    /// Read-receipt note
    pub const READ_RECEIPT: &str = "read_receipt";
    /// Send effect
    pub const EXPRESSIVE_TYPE: &str = "expressive_type";
    /// Latest edited text
    pub const EDITED_TEXT: &str = "edited_text";
    /// Delay of the latest edit
    pub const EDITED_AFTER: &str = "edited_after";
    /// Unsent flag
    pub const IS_UNSENT: &str = "is_unsent";
    /// Reply-thread depth
    pub const INDENT_LEVEL: &str = "indent_level";
    /// Parent message of a threaded reply
    pub const REPLY_TO_MESSAGE_ID: &str = "reply_to_message_id";
}

/// Attachments table schema
pub mod attachments {
    /// Table name
    pub const TABLE: &str = "attachments";
    /// Foreign key to messages table
    pub const MESSAGE_ID: &str = "message_id";
    /// Attachment filename column
    pub const FILENAME: &str = "filename";
    /// MIME type column
    pub const MIME_TYPE: &str = "mime_type";
    /// Sticker flag
    pub const IS_STICKER: &str = "is_sticker";
}

/// Reactions table schema
pub mod reactions {
    /// Table name
    pub const TABLE: &str = "reactions";
    /// Foreign key to messages table
    pub const MESSAGE_ID: &str = "message_id";
    /// Canonical reactor column
    pub const REACTOR: &str = "reactor";
    /// Reaction verb column
    pub const KIND: &str = "kind";
}

/// Load ledger schema
pub mod load_runs {
    /// Table name
    pub const TABLE: &str = "load_runs";
    /// Artifact name column
    pub const ARTIFACT: &str = "artifact";
    /// Conversation the artifact resolved to
    pub const CONVERSATION_KEY: &str = "conversation_key";
    /// Commit timestamp column
    pub const LOADED_AT: &str = "loaded_at";
    /// Records seen
    pub const SEEN: &str = "seen";
    /// Rows inserted
    pub const INSERTED: &str = "inserted";
    /// Duplicates skipped
    pub const SKIPPED_DUPLICATE: &str = "skipped_duplicate";
    /// Malformed lines skipped
    pub const MALFORMED_SKIPPED: &str = "malformed_skipped";
}
