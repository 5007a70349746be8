//! Artifact loading: ingest, resolve and store, one transaction per artifact.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::address_book::AddressBook;
use crate::db::Database;
use crate::error::{IngestError, Result};
use crate::ingest::{Artifact, ExportIngester, IngestOptions};
use crate::logging::OperationTimer;
use crate::metrics::IngestMetrics;
use crate::models::{ArtifactFailure, BatchReport, Contact, InsertOutcome, LoadReport};
use crate::resolver::{conversation_for, IdentityResolver};
use crate::validation::InputValidator;

/// Directory name the exporter uses for copied attachment files
const ATTACHMENTS_DIR: &str = "attachments";
/// Exporter file collecting messages with no resolvable chat
const ORPHANED_ARTIFACT: &str = "orphaned.txt";

/// Drives ExportIngester, IdentityResolver and the store for each artifact
pub struct Loader<'a> {
    db: &'a Database,
    ingester: ExportIngester,
    metrics: IngestMetrics,
}

impl<'a> Loader<'a> {
    /// Create a loader writing into `db`
    pub fn new(db: &'a Database, options: IngestOptions) -> Result<Self> {
        Ok(Self {
            db,
            ingester: ExportIngester::new(options)?,
            metrics: IngestMetrics::default(),
        })
    }

    /// Tallies for everything this loader has processed
    #[must_use]
    pub const fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    /// Load one artifact from disk.
    ///
    /// A missing, unreadable or invalid path fails with `ArtifactRead`
    /// before the store is touched.
    pub fn load(&mut self, path: &Path, book: &AddressBook) -> Result<LoadReport> {
        let timer = OperationTimer::new("read_artifact");

        let artifact = InputValidator::validate_input_path(path)
            .map_err(|e| IngestError::ArtifactRead {
                artifact: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            })
            .and_then(|()| Artifact::open(path))
            .inspect_err(|e| {
                warn!(artifact = %path.display(), error = %e, "Skipping unreadable artifact");
                self.metrics.record_failure(failure_kind(e), timer.elapsed());
            })?;

        self.load_artifact(&artifact, book)
    }

    /// Load an artifact already in memory.
    ///
    /// Every write happens in one transaction; on failure nothing from this
    /// artifact remains in the store.
    pub fn load_artifact(&mut self, artifact: &Artifact, book: &AddressBook) -> Result<LoadReport> {
        let timer = OperationTimer::new("load_artifact");

        match self.apply(artifact, book) {
            Ok(report) => {
                info!(
                    artifact = %report.artifact,
                    conversation = %report.conversation_key,
                    seen = report.seen,
                    inserted = report.inserted,
                    skipped_duplicate = report.skipped_duplicate,
                    malformed_skipped = report.malformed_skipped,
                    "Artifact loaded"
                );
                self.metrics.record_load(&report, timer.finish());
                Ok(report)
            }
            Err(e) => {
                warn!(artifact = artifact.name(), error = %e, "Artifact rolled back");
                self.metrics.record_failure(failure_kind(&e), timer.elapsed());
                Err(e)
            }
        }
    }

    /// Load every path in order. Per-artifact failures are collected and the
    /// batch continues; any other error stops the batch.
    pub fn load_all<P: AsRef<Path>>(&mut self, paths: &[P], book: &AddressBook) -> Result<BatchReport> {
        let mut batch = BatchReport::default();

        for path in paths {
            let path = path.as_ref();
            match self.load(path, book) {
                Ok(report) => batch.reports.push(report),
                Err(e) if e.is_per_artifact() => batch.failures.push(ArtifactFailure {
                    artifact: path.display().to_string(),
                    error: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }

        info!(
            committed = batch.reports.len(),
            failed = batch.failures.len(),
            inserted = batch.total_inserted(),
            "Batch finished"
        );
        Ok(batch)
    }

    fn apply(&self, artifact: &Artifact, book: &AddressBook) -> Result<LoadReport> {
        let resolver = IdentityResolver::new(book);
        let mut records = self.ingester.ingest(artifact);
        let conversation = conversation_for(records.participants().iter(), book);

        let mut report = LoadReport {
            artifact: artifact.name().to_string(),
            conversation_key: conversation.conversation_key.clone(),
            ..LoadReport::default()
        };

        self.db.with_transaction(artifact.name(), |tx| {
            tx.upsert_conversation(&conversation)?;
            for number in &conversation.participant_numbers {
                tx.upsert_contact(&Contact {
                    canonical_number: number.clone(),
                    alias: book.alias_of(number).map(ToString::to_string),
                })?;
            }

            let mut ids_by_line: HashMap<usize, String> = HashMap::new();
            for raw in records.by_ref() {
                let mut record = resolver.resolve(&raw);
                record.reply_to_message_id = raw
                    .reply_to_line
                    .and_then(|line| ids_by_line.get(&line).cloned());
                ids_by_line.insert(raw.line, record.message_id.clone());

                match tx.insert_message_if_absent(&record, &report.artifact)? {
                    InsertOutcome::Inserted => report.inserted += 1,
                    InsertOutcome::SkippedDuplicate => report.skipped_duplicate += 1,
                }

                for attachment in &record.attachments {
                    if tx.insert_attachment(&record.message_id, attachment)? {
                        report.attachments += 1;
                    }
                }
                for reaction in &record.reactions {
                    if tx.insert_reaction(&record.message_id, reaction)? {
                        report.reactions += 1;
                    }
                }
            }

            report.seen = records.seen();
            report.malformed_skipped = records.malformed_skipped();
            report.filtered = records.filtered();

            tx.record_load_run(&report)?;
            Ok(report)
        })
    }
}

const fn failure_kind(error: &IngestError) -> &'static str {
    match error {
        IngestError::ArtifactRead { .. } => "read",
        IngestError::StorageWrite { .. } => "storage",
        _ => "other",
    }
}

/// Find exporter artifacts under `root`: `*.txt` files outside
/// `attachments/` directories, in path order. The exporter's
/// `orphaned.txt` is left out.
pub fn discover_artifacts(root: &Path) -> Result<Vec<PathBuf>> {
    InputValidator::validate_input_path(root)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ATTACHMENTS_DIR))
    {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        let is_txt = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        if entry.file_type().is_file() && is_txt && entry.file_name() != ORPHANED_ARTIFACT {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
