use std::fs;
use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::address_book::AddressBook;
use crate::error::{IngestError, Result};
use crate::models::{
    AttachmentRef, Contact, Conversation, DateRange, InsertOutcome, LoadReport, LoadRun,
    MessageMeta, ResolvedReaction, ResolvedRecord, StoredMessage,
};
use crate::schema::{attachments, contacts, conversations, load_runs, messages, reactions};
use crate::validation::InputValidator;

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "create_tables",
        include_str!("../migrations/2025-03-15-000000_create_tables/up.sql"),
    ),
    (
        "add_attachments_reactions",
        include_str!("../migrations/2025-03-15-000001_add_attachments_reactions/up.sql"),
    ),
    (
        "add_load_runs",
        include_str!("../migrations/2025-03-19-000000_add_load_runs/up.sql"),
    ),
    (
        "add_message_metadata",
        include_str!("../migrations/2025-03-22-000000_add_message_metadata/up.sql"),
    ),
];

/// SQLite-backed store with idempotent writes.
///
/// All writes for one artifact go through [`Database::with_transaction`];
/// reads use pooled connections directly.
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) a store file and apply migrations
    pub fn open(database_path: &str) -> Result<Self> {
        InputValidator::validate_database_path(database_path)?;
        let database_path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_path).with_init(init_connection);
        Self::from_manager(manager, 4)
    }

    /// In-memory store; a single pooled connection keeps one shared database
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        Self::from_manager(manager, 1)
    }

    fn from_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder().max_size(max_size).build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        drop(conn);

        Ok(Self { pool })
    }

    /// Run pending migrations.
    ///
    /// `PRAGMA user_version` counts the migrations already applied; each
    /// pending one runs in its own transaction together with the bump.
    fn run_migrations(conn: &Connection) -> Result<()> {
        let applied: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        let applied = usize::try_from(applied).unwrap_or_default();

        for (version, (name, sql)) in MIGRATIONS.iter().enumerate().skip(applied) {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version + 1)?;
            tx.commit()?;
            debug!(migration = name, version = version + 1, "Migration applied");
        }
        Ok(())
    }

    /// Number of migrations applied to this store
    pub fn schema_version(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(usize::try_from(version).unwrap_or_default())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Run `f` inside one transaction attributed to `artifact`.
    ///
    /// Commits when `f` succeeds; any error rolls back every write made
    /// through the transaction and is reported as `StorageWrite`.
    pub fn with_transaction<T, F>(&self, artifact: &str, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTransaction<'_>) -> rusqlite::Result<T>,
    {
        let mut conn = self.get_connection()?;
        transact(&mut conn, f).map_err(|source| IngestError::StorageWrite {
            artifact: artifact.to_string(),
            source,
        })
    }

    /// Upsert every configured contact, returning how many were written
    pub fn apply_address_book(&self, book: &AddressBook) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let written = transact(&mut conn, |tx| {
            let mut written = 0;
            for contact in book.contacts() {
                tx.upsert_contact(&contact)?;
                written += 1;
            }
            Ok(written)
        })?;

        info!(contacts = written, "Address book applied");
        Ok(written)
    }

    /// Insert a contact or update its alias
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.get_connection()?;
        StoreTransaction { conn: &conn }.upsert_contact(contact)?;
        Ok(())
    }

    /// Get a contact by canonical number
    pub fn contact(&self, canonical_number: &str) -> Result<Option<Contact>> {
        let conn = self.get_connection()?;

        let contact = conn
            .query_row(
                &format!(
                    "SELECT {}, {} FROM {} WHERE {} = ?",
                    contacts::CANONICAL_NUMBER,
                    contacts::ALIAS,
                    contacts::TABLE,
                    contacts::CANONICAL_NUMBER
                ),
                params![canonical_number],
                map_contact,
            )
            .optional()?;

        Ok(contact)
    }

    /// All contacts ordered by canonical number
    pub fn contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {} ORDER BY {}",
            contacts::CANONICAL_NUMBER,
            contacts::ALIAS,
            contacts::TABLE,
            contacts::CANONICAL_NUMBER
        ))?;

        let rows = stmt.query_map([], map_contact)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Get a conversation by key
    pub fn conversation(&self, conversation_key: &str) -> Result<Option<Conversation>> {
        let conn = self.get_connection()?;

        let conversation = conn
            .query_row(
                &format!(
                    "SELECT {}, {}, {} FROM {} WHERE {} = ?",
                    conversations::CONVERSATION_KEY,
                    conversations::KIND,
                    conversations::PARTICIPANTS,
                    conversations::TABLE,
                    conversations::CONVERSATION_KEY
                ),
                params![conversation_key],
                map_conversation,
            )
            .optional()?;

        Ok(conversation)
    }

    /// All conversations ordered by key
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {} FROM {} ORDER BY {}",
            conversations::CONVERSATION_KEY,
            conversations::KIND,
            conversations::PARTICIPANTS,
            conversations::TABLE,
            conversations::CONVERSATION_KEY
        ))?;

        let rows = stmt.query_map([], map_conversation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Messages of one conversation in timestamp order
    pub fn conversation_messages(&self, conversation_key: &str) -> Result<Vec<StoredMessage>> {
        self.messages(Some(conversation_key), DateRange::all())
    }

    /// Messages filtered by conversation and half-open date range, in timestamp order
    pub fn messages(
        &self,
        conversation_key: Option<&str>,
        range: DateRange,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.get_connection()?;

        let mut query = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM {} WHERE 1 = 1",
            messages::MESSAGE_ID,
            messages::CONVERSATION_KEY,
            messages::SENDER_NUMBER,
            messages::TIMESTAMP,
            messages::BODY,
            messages::HAS_ATTACHMENT,
            messages::DIRECTION,
            messages::SOURCE_ARTIFACT,
            messages::REPLY_TO_MESSAGE_ID,
            messages::READ_RECEIPT,
            messages::EXPRESSIVE_TYPE,
            messages::EDITED_TEXT,
            messages::EDITED_AFTER,
            messages::IS_UNSENT,
            messages::INDENT_LEVEL,
            messages::TABLE
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(key) = conversation_key {
            query.push_str(&format!(" AND {} = ?", messages::CONVERSATION_KEY));
            params.push(Box::new(key.to_string()));
        }
        push_range(&mut query, &mut params, range);

        query.push_str(&format!(
            " ORDER BY {} ASC, {} ASC",
            messages::TIMESTAMP,
            messages::MESSAGE_ID
        ));

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_message)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Message counts per sender within a date range
    pub fn counts_by_sender(&self, range: DateRange) -> Result<Vec<(Contact, usize)>> {
        let conn = self.get_connection()?;

        let mut query = format!(
            "SELECT m.{sender}, c.{alias}, COUNT(*) FROM {messages} m \
             LEFT JOIN {contacts} c ON c.{number} = m.{sender} WHERE 1 = 1",
            sender = messages::SENDER_NUMBER,
            alias = contacts::ALIAS,
            messages = messages::TABLE,
            contacts = contacts::TABLE,
            number = contacts::CANONICAL_NUMBER,
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        push_range(&mut query, &mut params, range);
        query.push_str(&format!(
            " GROUP BY m.{0} ORDER BY m.{0}",
            messages::SENDER_NUMBER
        ));

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let count: i64 = row.get(2)?;
            Ok((
                Contact {
                    canonical_number: row.get(0)?,
                    alias: row.get(1)?,
                },
                usize::try_from(count).unwrap_or_default(),
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Total stored messages
    pub fn message_count(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", messages::TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Attachments recorded for a message
    pub fn attachments(&self, message_id: &str) -> Result<Vec<AttachmentRef>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = ? ORDER BY {}",
            attachments::FILENAME,
            attachments::MIME_TYPE,
            attachments::IS_STICKER,
            attachments::TABLE,
            attachments::MESSAGE_ID,
            attachments::FILENAME
        ))?;

        let rows = stmt.query_map(params![message_id], |row| {
            Ok(AttachmentRef {
                filename: row.get(0)?,
                mime_type: row.get(1)?,
                is_sticker: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Reactions recorded for a message
    pub fn reactions(&self, message_id: &str) -> Result<Vec<ResolvedReaction>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {} WHERE {} = ? ORDER BY {}, {}",
            reactions::KIND,
            reactions::REACTOR,
            reactions::TABLE,
            reactions::MESSAGE_ID,
            reactions::REACTOR,
            reactions::KIND
        ))?;

        let rows = stmt.query_map(params![message_id], |row| {
            Ok(ResolvedReaction {
                kind: row.get(0)?,
                reactor: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ledger rows for an artifact, oldest first
    pub fn load_runs(&self, artifact: &str) -> Result<Vec<LoadRun>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {}, {}, {}, {}, {} FROM {} WHERE {} = ? ORDER BY id",
            load_runs::ARTIFACT,
            load_runs::CONVERSATION_KEY,
            load_runs::LOADED_AT,
            load_runs::SEEN,
            load_runs::INSERTED,
            load_runs::SKIPPED_DUPLICATE,
            load_runs::MALFORMED_SKIPPED,
            load_runs::TABLE,
            load_runs::ARTIFACT
        ))?;

        let rows = stmt.query_map(params![artifact], |row| {
            Ok(LoadRun {
                artifact: row.get(0)?,
                conversation_key: row.get(1)?,
                loaded_at: row.get(2)?,
                seen: row.get(3)?,
                inserted: row.get(4)?,
                skipped_duplicate: row.get(5)?,
                malformed_skipped: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete every message first inserted by `artifact`, with its
    /// attachments, reactions and ledger rows. Conversations are kept.
    pub fn purge_artifact(&self, artifact: &str) -> Result<usize> {
        let deleted = self.with_transaction(artifact, |tx| tx.purge_artifact(artifact))?;
        info!(artifact, deleted, "Artifact purged");
        Ok(deleted)
    }
}

fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn transact<T, F>(conn: &mut Connection, f: F) -> rusqlite::Result<T>
where
    F: FnOnce(&StoreTransaction<'_>) -> rusqlite::Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&StoreTransaction { conn: &tx })?;
    tx.commit()?;
    Ok(value)
}

fn push_range(query: &mut String, params: &mut Vec<Box<dyn rusqlite::ToSql>>, range: DateRange) {
    if let Some(start) = range.start {
        query.push_str(&format!(" AND {} >= ?", messages::TIMESTAMP));
        params.push(Box::new(start));
    }

    if let Some(end) = range.end {
        query.push_str(&format!(" AND {} < ?", messages::TIMESTAMP));
        params.push(Box::new(end));
    }
}

fn map_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        canonical_number: row.get(0)?,
        alias: row.get(1)?,
    })
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let participants: String = row.get(2)?;
    let participant_numbers = serde_json::from_str(&participants)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(Conversation {
        conversation_key: row.get(0)?,
        kind: row.get(1)?,
        participant_numbers,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        message_id: row.get(0)?,
        conversation_key: row.get(1)?,
        sender_number: row.get(2)?,
        timestamp: row.get(3)?,
        body: row.get(4)?,
        has_attachment: row.get(5)?,
        direction: row.get(6)?,
        source_artifact: row.get(7)?,
        reply_to_message_id: row.get(8)?,
        meta: MessageMeta {
            read_receipt: row.get(9)?,
            expressive_type: row.get(10)?,
            edited_text: row.get(11)?,
            edited_after: row.get(12)?,
            is_unsent: row.get(13)?,
            indent_level: row.get(14)?,
        },
    })
}

/// Write access scoped to one open transaction
pub struct StoreTransaction<'a> {
    conn: &'a Connection,
}

impl StoreTransaction<'_> {
    /// Insert a contact; an existing row keeps its number and only takes a non-NULL alias
    pub fn upsert_contact(&self, contact: &Contact) -> rusqlite::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {table} ({number}, {alias}) VALUES (?1, ?2) \
                 ON CONFLICT({number}) DO UPDATE SET {alias} = COALESCE(excluded.{alias}, {table}.{alias})",
                table = contacts::TABLE,
                number = contacts::CANONICAL_NUMBER,
                alias = contacts::ALIAS,
            ),
            params![contact.canonical_number, contact.alias],
        )?;
        Ok(())
    }

    /// Record a conversation on first sighting; returns true if it was new
    pub fn upsert_conversation(&self, conversation: &Conversation) -> rusqlite::Result<bool> {
        let participants = serde_json::to_string(&conversation.participant_numbers)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let changed = self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
                conversations::TABLE,
                conversations::CONVERSATION_KEY,
                conversations::KIND,
                conversations::PARTICIPANTS,
                conversations::FIRST_SEEN_AT
            ),
            params![
                conversation.conversation_key,
                conversation.kind,
                participants,
                now()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Insert a message unless its message_id is already stored.
    ///
    /// A duplicate keeps its stored row; annotations the stored row lacks
    /// are filled in from `record`, and a newer edit replaces the old one.
    pub fn insert_message_if_absent(
        &self,
        record: &ResolvedRecord,
        source_artifact: &str,
    ) -> rusqlite::Result<InsertOutcome> {
        let meta = &record.meta;
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
                 ON CONFLICT({}) DO NOTHING",
                messages::TABLE,
                messages::MESSAGE_ID,
                messages::CONVERSATION_KEY,
                messages::SENDER_NUMBER,
                messages::TIMESTAMP,
                messages::BODY,
                messages::HAS_ATTACHMENT,
                messages::DIRECTION,
                messages::SOURCE_ARTIFACT,
                messages::IMPORTED_AT,
                messages::REPLY_TO_MESSAGE_ID,
                messages::READ_RECEIPT,
                messages::EXPRESSIVE_TYPE,
                messages::EDITED_TEXT,
                messages::EDITED_AFTER,
                messages::IS_UNSENT,
                messages::INDENT_LEVEL,
                messages::MESSAGE_ID
            ),
            params![
                record.message_id,
                record.conversation.conversation_key,
                record.sender_number,
                record.timestamp,
                record.body,
                record.has_attachment,
                record.direction,
                source_artifact,
                now(),
                record.reply_to_message_id,
                meta.read_receipt,
                meta.expressive_type,
                meta.edited_text,
                meta.edited_after,
                meta.is_unsent,
                meta.indent_level
            ],
        )?;

        if changed > 0 {
            return Ok(InsertOutcome::Inserted);
        }

        self.conn.execute(
            &format!(
                "UPDATE {table} SET \
                 {receipt} = COALESCE(?2, {receipt}), \
                 {effect} = COALESCE(?3, {effect}), \
                 {edited} = COALESCE(?4, {edited}), \
                 {after} = COALESCE(?5, {after}), \
                 {unsent} = MAX({unsent}, ?6), \
                 {reply} = COALESCE({reply}, ?7) \
                 WHERE {id} = ?1",
                table = messages::TABLE,
                receipt = messages::READ_RECEIPT,
                effect = messages::EXPRESSIVE_TYPE,
                edited = messages::EDITED_TEXT,
                after = messages::EDITED_AFTER,
                unsent = messages::IS_UNSENT,
                reply = messages::REPLY_TO_MESSAGE_ID,
                id = messages::MESSAGE_ID,
            ),
            params![
                record.message_id,
                meta.read_receipt,
                meta.expressive_type,
                meta.edited_text,
                meta.edited_after,
                meta.is_unsent,
                record.reply_to_message_id
            ],
        )?;

        debug!(message_id = %record.message_id, "Duplicate message skipped");
        Ok(InsertOutcome::SkippedDuplicate)
    }

    /// Attach file metadata to a message; returns true if the row was new
    pub fn insert_attachment(
        &self,
        message_id: &str,
        attachment: &AttachmentRef,
    ) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
                attachments::TABLE,
                attachments::MESSAGE_ID,
                attachments::FILENAME,
                attachments::MIME_TYPE,
                attachments::IS_STICKER
            ),
            params![
                message_id,
                attachment.filename,
                attachment.mime_type,
                attachment.is_sticker
            ],
        )?;
        Ok(changed > 0)
    }

    /// Record a tapback; returns true if the row was new
    pub fn insert_reaction(
        &self,
        message_id: &str,
        reaction: &ResolvedReaction,
    ) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING",
                reactions::TABLE,
                reactions::MESSAGE_ID,
                reactions::REACTOR,
                reactions::KIND
            ),
            params![message_id, reaction.reactor, reaction.kind],
        )?;
        Ok(changed > 0)
    }

    /// Append the artifact's report to the load ledger
    pub fn record_load_run(&self, report: &LoadReport) -> rusqlite::Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                load_runs::TABLE,
                load_runs::ARTIFACT,
                load_runs::CONVERSATION_KEY,
                load_runs::LOADED_AT,
                load_runs::SEEN,
                load_runs::INSERTED,
                load_runs::SKIPPED_DUPLICATE,
                load_runs::MALFORMED_SKIPPED
            ),
            params![
                report.artifact,
                report.conversation_key,
                now(),
                report.seen,
                report.inserted,
                report.skipped_duplicate,
                report.malformed_skipped
            ],
        )?;
        Ok(())
    }

    fn purge_artifact(&self, artifact: &str) -> rusqlite::Result<usize> {
        let owned = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            messages::MESSAGE_ID,
            messages::TABLE,
            messages::SOURCE_ARTIFACT
        );

        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} IN ({owned})",
                attachments::TABLE,
                attachments::MESSAGE_ID
            ),
            params![artifact],
        )?;
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} IN ({owned})",
                reactions::TABLE,
                reactions::MESSAGE_ID
            ),
            params![artifact],
        )?;
        let deleted = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                messages::TABLE,
                messages::SOURCE_ARTIFACT
            ),
            params![artifact],
        )?;
        self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                load_runs::TABLE,
                load_runs::ARTIFACT
            ),
            params![artifact],
        )?;

        Ok(deleted)
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
