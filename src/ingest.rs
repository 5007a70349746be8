//! Tolerant parser for exporter conversation artifacts.
//!
//! An artifact is a sequence of blocks: a header line carrying the timestamp,
//! a sender line, then body lines up to the next header. Lines that look like
//! headers but do not parse are counted and skipped, never raised.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::Lines;
use std::sync::Arc;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, warn};

use crate::address_book::normalize_number;
use crate::error::{IngestError, Result};
use crate::models::{AttachmentRef, MessageMeta, RawMessageRecord, RawReaction, RawSender};
use crate::validation::InputValidator;

/// Object replacement character the exporter leaves where an attachment was
const OBJECT_REPLACEMENT: &str = "\u{FFFC}";
const TAPBACKS_MARKER: &str = "Tapbacks:";
const REPLY_ANNOTATION: &str = "This message responded to an earlier message";
const BYTE_ORDER_MARK: char = '\u{FEFF}';
/// Spaces of indentation per reply-thread level
const REPLY_INDENT: usize = 4;

/// One exporter output file, held in memory
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    path: Option<PathBuf>,
    text: String,
}

impl Artifact {
    /// Read an artifact from disk.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; only a missing or
    /// unreadable file is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| IngestError::ArtifactRead {
            artifact: path.display().to_string(),
            source,
        })?;

        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            text: without_bom(&String::from_utf8_lossy(&bytes)).to_string(),
        })
    }

    /// Build an artifact from text already in memory
    #[must_use]
    pub fn from_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            text: without_bom(text).to_string(),
        }
    }

    /// File name identifying the artifact
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source path, if the artifact was read from disk
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw artifact text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Participant handles named by the file stem.
    ///
    /// Accepts `+15551234567`, the cleaned `p15551234567` form, and
    /// comma-separated lists for group chats. Display-name stems yield nothing.
    #[must_use]
    pub fn declared_participants(&self) -> Vec<String> {
        let stem = Path::new(&self.name)
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());

        stem.split(',')
            .filter_map(|piece| {
                let piece = piece.trim();
                if let Some(digits) = piece.strip_prefix('p') {
                    if digits.len() >= 3 && digits.chars().all(|c| c.is_ascii_digit()) {
                        return Some(format!("+{digits}"));
                    }
                }
                if normalize_number(piece).is_ok() || piece.contains('@') {
                    return Some(piece.to_string());
                }
                None
            })
            .collect()
    }
}

fn without_bom(text: &str) -> &str {
    text.strip_prefix(BYTE_ORDER_MARK).unwrap_or(text)
}

/// Record filtering policy applied while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Drop records with no body, no attachment and no reactions
    pub skip_empty_records: bool,
}

/// Classification of one artifact line
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineKind {
    Header(NaiveDateTime, MessageMeta),
    MalformedHeader,
    Text,
}

/// Parser for exporter artifacts
#[derive(Debug)]
pub struct ExportIngester {
    options: IngestOptions,
    exporter_header: Regex,
    iso_header: Regex,
    header_like: Regex,
    header_note: Regex,
    reaction: Regex,
    edited: Regex,
    unsent: Regex,
    sticker: Regex,
    attachment_path: Regex,
    media_path: Regex,
}

impl ExportIngester {
    /// Create an ingester with the given policy
    pub fn new(options: IngestOptions) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| IngestError::Other(format!("Failed to compile pattern {pattern}: {e}")))
        };

        Ok(Self {
            options,
            exporter_header: compile(
                r"^(?P<ts>[A-Z][a-z]{2} \d{1,2}, \d{4}\s+\d{1,2}:\d{2}:\d{2}\s+[AP]M)(?P<notes>(?:\s+\(.*\))?)\s*$",
            )?,
            iso_header: compile(
                r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?)(?P<notes>(?:\s+\(.*\))?)\s*$",
            )?,
            header_like: compile(
                r"^(?:[A-Z][a-z]{2,} \d{1,2}, \d{4}|\d{4}-\d{2}-\d{2})[ T]+[\d:.]+(?:\s*[AaPp][Mm])?(?:Z|[+-]\d{2}:?\d{2})?(?:\s+\(.*\))?\s*$",
            )?,
            header_note: compile(r"\(([^()]*)\)")?,
            reaction: compile(
                r"^(?P<kind>Loved|Liked|Disliked|Laughed at|Emphasized|Questioned|Reacted \S+) by (?P<who>.+)$",
            )?,
            edited: compile(
                r"^Edited (?P<after>\d+ (?:second|minute|hour|day)s?) later:\s*(?P<text>.*)$",
            )?,
            unsent: compile(r"^(?P<who>.+?) unsent a message!$")?,
            sticker: compile(r"^Sticker from .+?: (?P<path>.+?)(?:\s+\(.*\))?\s*$")?,
            attachment_path: compile(
                r"(?i)^.*?\battachments[/\\]\d+[/\\](?P<file>[^/\\]+\.[a-z0-9]{2,5})\s*$",
            )?,
            media_path: compile(
                r"(?i)^[/\\~].*[/\\](?P<file>[^/\\]+\.(?:jpe?g|png|gif|bmp|tiff?|webp|heic|heif|mp4|mov|avi|mkv|webm|m4v|mp3|wav|m4a|aac|flac|caf|pdf|docx?|rtf|vcf))\s*$",
            )?,
        })
    }

    /// Ingestion policy in effect
    #[must_use]
    pub const fn options(&self) -> IngestOptions {
        self.options
    }

    /// Parse an artifact into a lazy sequence of records.
    ///
    /// Calling this again on the same artifact restarts from the first line.
    #[must_use]
    pub fn ingest<'a>(&'a self, artifact: &'a Artifact) -> Records<'a> {
        let participants = self.participants(artifact);
        Records::new(self, artifact, participants)
    }

    /// Raw participant handles: the file stem's numbers plus every
    /// non-self sender and reactor in the artifact.
    #[must_use]
    pub fn participants(&self, artifact: &Artifact) -> Arc<[String]> {
        let mut seen = HashSet::new();
        let mut participants = Vec::new();

        let mut push = |handle: &str| {
            if seen.insert(handle.to_string()) {
                participants.push(handle.to_string());
            }
        };

        for declared in artifact.declared_participants() {
            push(&declared);
        }

        let mut scan = Records::new(self, artifact, Arc::from(Vec::new()));
        scan.quiet = true;
        for record in scan {
            if let RawSender::Handle(handle) = &record.sender {
                push(handle);
            }
            for reaction in &record.reactions {
                if let RawSender::Handle(handle) = &reaction.reactor {
                    push(handle);
                }
            }
        }

        Arc::from(participants)
    }

    fn classify(&self, line: &str) -> LineKind {
        if let Some(caps) = self.exporter_header.captures(line) {
            let ts = caps["ts"].split_whitespace().collect::<Vec<_>>().join(" ");
            return NaiveDateTime::parse_from_str(&ts, "%b %d, %Y %I:%M:%S %p").map_or(
                LineKind::MalformedHeader,
                |timestamp| LineKind::Header(timestamp, self.header_meta(&caps["notes"])),
            );
        }

        if let Some(caps) = self.iso_header.captures(line) {
            let ts = caps["ts"].replacen('T', " ", 1);
            return NaiveDateTime::parse_from_str(&ts, "%Y-%m-%d %H:%M:%S%.f").map_or(
                LineKind::MalformedHeader,
                |timestamp| LineKind::Header(timestamp, self.header_meta(&caps["notes"])),
            );
        }

        if self.header_like.is_match(line) {
            return LineKind::MalformedHeader;
        }

        LineKind::Text
    }

    /// Read receipt and send effect from the header's parenthesised notes
    fn header_meta(&self, notes: &str) -> MessageMeta {
        let mut meta = MessageMeta::default();
        for caps in self.header_note.captures_iter(notes) {
            let note = caps[1].trim();
            if note.starts_with("Read by") {
                meta.read_receipt = Some(note.to_string());
            } else if let Some(effect) = note.strip_prefix("Sent with ") {
                meta.expressive_type = Some(effect.trim().to_string());
            }
        }
        meta
    }

    fn unsent_notice(&self, line: &str) -> Option<RawSender> {
        self.unsent.captures(line).map(|caps| match caps["who"].trim() {
            "You" => RawSender::Me,
            who => RawSender::from_line(who),
        })
    }

    fn attachment(&self, line: &str) -> Option<Option<AttachmentRef>> {
        if line.trim() == OBJECT_REPLACEMENT {
            return Some(None);
        }

        if let Some(caps) = self.sticker.captures(line) {
            return Some(attachment_ref(&caps["path"], true));
        }

        self.attachment_path
            .captures(line)
            .or_else(|| self.media_path.captures(line))
            .map(|caps| attachment_ref(&caps["file"], false))
    }

    fn reaction(&self, line: &str) -> Option<RawReaction> {
        self.reaction.captures(line).map(|caps| RawReaction {
            kind: caps["kind"].to_string(),
            reactor: RawSender::from_line(&caps["who"]),
        })
    }
}

fn attachment_ref(path: &str, is_sticker: bool) -> Option<AttachmentRef> {
    let filename = path
        .trim()
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if filename.is_empty() {
        return None;
    }

    Some(AttachmentRef {
        mime_type: guess_mime_type(&filename).to_string(),
        filename,
        is_sticker,
    })
}

/// Guess a MIME type from a file extension
#[must_use]
pub fn guess_mime_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "caf" => "audio/x-caf",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "vcf" => "text/vcard",
        _ => "application/octet-stream",
    }
}

/// A block whose header has been read and whose lines are accumulating
#[derive(Debug)]
struct PendingBlock {
    timestamp: NaiveDateTime,
    line: usize,
    reply_to_line: Option<usize>,
    meta: MessageMeta,
    sender: Option<RawSender>,
    body: Vec<String>,
    has_attachment: bool,
    attachments: Vec<AttachmentRef>,
    reactions: Vec<RawReaction>,
    unsent_notices: Vec<(usize, RawSender)>,
    in_tapbacks: bool,
}

impl PendingBlock {
    const fn new(
        timestamp: NaiveDateTime,
        line: usize,
        reply_to_line: Option<usize>,
        meta: MessageMeta,
    ) -> Self {
        Self {
            timestamp,
            line,
            reply_to_line,
            meta,
            sender: None,
            body: Vec::new(),
            has_attachment: false,
            attachments: Vec::new(),
            reactions: Vec::new(),
            unsent_notices: Vec::new(),
            in_tapbacks: false,
        }
    }

    fn has_content(&self) -> bool {
        self.has_attachment || self.body.iter().any(|l| !l.trim().is_empty())
    }

    fn push(&mut self, ingester: &ExportIngester, line: &str, line_number: usize) {
        if self.sender.is_none() {
            if !line.trim().is_empty() {
                self.sender = Some(RawSender::from_line(line));
            }
            return;
        }

        if self.in_tapbacks {
            if line.trim().is_empty() {
                self.in_tapbacks = false;
            } else if let Some(reaction) = ingester.reaction(line.trim()) {
                self.reactions.push(reaction);
            }
            return;
        }

        let trimmed = line.trim();
        if trimmed == TAPBACKS_MARKER {
            self.in_tapbacks = true;
            return;
        }
        if trimmed.starts_with(REPLY_ANNOTATION) {
            return;
        }

        if let Some(caps) = ingester.edited.captures(trimmed) {
            self.meta.edited_text = Some(caps["text"].trim().to_string());
            self.meta.edited_after = Some(caps["after"].to_string());
            return;
        }

        // A notice in an otherwise empty block is that block's own message;
        // after content it marks a separate, later message as unsent.
        if let Some(who) = ingester.unsent_notice(trimmed) {
            if self.has_content() {
                self.unsent_notices.push((line_number, who));
            } else {
                self.meta.is_unsent = true;
            }
            return;
        }

        if let Some(attachment) = ingester.attachment(trimmed) {
            self.has_attachment = true;
            self.attachments.extend(attachment);
            return;
        }

        self.body.push(line.trim_end().to_string());
    }

    fn body_text(&self) -> Option<String> {
        let first = self.body.iter().position(|l| !l.trim().is_empty())?;
        let last = self.body.iter().rposition(|l| !l.trim().is_empty())?;
        Some(self.body[first..=last].join("\n"))
    }
}

/// Lazy, finite sequence of records parsed from one artifact
#[derive(Debug)]
pub struct Records<'a> {
    ingester: &'a ExportIngester,
    artifact: &'a str,
    lines: std::iter::Enumerate<Lines<'a>>,
    participants: Arc<[String]>,
    pending: Option<PendingBlock>,
    queued: VecDeque<RawMessageRecord>,
    reply_stack: Vec<Option<usize>>,
    skipping: bool,
    quiet: bool,
    emitted: usize,
    malformed: usize,
    filtered: usize,
}

impl<'a> Records<'a> {
    fn new(ingester: &'a ExportIngester, artifact: &'a Artifact, participants: Arc<[String]>) -> Self {
        Self {
            ingester,
            artifact: artifact.name(),
            lines: artifact.text().lines().enumerate(),
            participants,
            pending: None,
            queued: VecDeque::new(),
            reply_stack: Vec::new(),
            skipping: false,
            quiet: false,
            emitted: 0,
            malformed: 0,
            filtered: 0,
        }
    }

    /// Raw participant handles attached to every record
    #[must_use]
    pub fn participants(&self) -> &Arc<[String]> {
        &self.participants
    }

    /// Records yielded so far
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    /// Malformed header and orphan lines skipped so far
    #[must_use]
    pub const fn malformed_skipped(&self) -> usize {
        self.malformed
    }

    /// Records dropped by the ingest policy so far
    #[must_use]
    pub const fn filtered(&self) -> usize {
        self.filtered
    }

    /// Records yielded plus records filtered plus malformed lines
    #[must_use]
    pub const fn seen(&self) -> usize {
        self.emitted + self.filtered + self.malformed
    }

    fn skip_malformed(&mut self, line: usize, reason: &str) {
        self.malformed += 1;
        if !self.quiet {
            warn!(artifact = self.artifact, line, reason, "Skipping malformed line");
        }
    }

    /// Header line of the nearest shallower message in the current reply thread
    fn reply_parent(&self, depth: usize) -> Option<usize> {
        self.reply_stack.iter().take(depth).rev().find_map(|line| *line)
    }

    fn finish(&mut self, block: PendingBlock) {
        let Some(sender) = block.sender.clone() else {
            self.skip_malformed(block.line, "header without sender");
            return;
        };

        let depth = block.meta.indent_level;
        self.reply_stack.truncate(depth + 1);
        self.reply_stack.resize(depth + 1, None);
        self.reply_stack[depth] = Some(block.line);

        let body = block.body_text();
        if self.ingester.options.skip_empty_records
            && body.is_none()
            && !block.has_attachment
            && block.reactions.is_empty()
            && !block.meta.is_unsent
        {
            self.filtered += 1;
        } else {
            self.emitted += 1;
            self.queued.push_back(RawMessageRecord {
                sender,
                timestamp: block.timestamp,
                body,
                has_attachment: block.has_attachment,
                attachments: block.attachments,
                reactions: block.reactions,
                participants: Arc::clone(&self.participants),
                line: block.line,
                reply_to_line: block.reply_to_line,
                meta: block.meta.clone(),
            });
        }

        for (line, sender) in block.unsent_notices {
            self.emitted += 1;
            self.queued.push_back(RawMessageRecord {
                sender,
                timestamp: block.timestamp,
                body: None,
                has_attachment: false,
                attachments: Vec::new(),
                reactions: Vec::new(),
                participants: Arc::clone(&self.participants),
                line,
                reply_to_line: None,
                meta: MessageMeta {
                    is_unsent: true,
                    indent_level: depth,
                    ..MessageMeta::default()
                },
            });
        }
    }
}

impl Iterator for Records<'_> {
    type Item = RawMessageRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.queued.pop_front() {
                return Some(record);
            }

            let Some((index, raw_line)) = self.lines.next() else {
                let block = self.pending.take()?;
                self.finish(block);
                continue;
            };

            let line_number = index + 1;
            let sanitized = InputValidator::sanitize_line(raw_line);
            let line = sanitized.trim_start();

            match self.ingester.classify(line) {
                LineKind::Header(timestamp, meta) => {
                    self.skipping = false;
                    if let Some(block) = self.pending.take() {
                        self.finish(block);
                    }
                    let indent = sanitized.len() - sanitized.trim_start_matches(' ').len();
                    let depth = indent / REPLY_INDENT;
                    let parent = self.reply_parent(depth);
                    let meta = MessageMeta {
                        indent_level: depth,
                        ..meta
                    };
                    self.pending = Some(PendingBlock::new(timestamp, line_number, parent, meta));
                }
                LineKind::MalformedHeader => {
                    self.skip_malformed(line_number, "unparseable header");
                    self.skipping = true;
                    if let Some(block) = self.pending.take() {
                        self.finish(block);
                    }
                }
                LineKind::Text => {
                    if self.skipping {
                        continue;
                    }
                    match self.pending.as_mut() {
                        Some(block) => block.push(self.ingester, line, line_number),
                        None if !line.trim().is_empty() => {
                            if !self.quiet {
                                debug!(artifact = self.artifact, line = line_number, "Orphan line before first header");
                            }
                            self.malformed += 1;
                        }
                        None => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingester() -> ExportIngester {
        ExportIngester::new(IngestOptions::default()).expect("patterns compile")
    }

    #[test]
    fn test_classify_exporter_header_with_receipt() {
        let ingester = ingester();
        let kind = ingester.classify("Jan 01, 2024  10:00:00 AM (Read by you after 1 minute)");
        let expected = NaiveDateTime::parse_from_str("2024-01-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let meta = MessageMeta {
            read_receipt: Some("Read by you after 1 minute".to_string()),
            ..MessageMeta::default()
        };
        assert_eq!(kind, LineKind::Header(expected, meta));
    }

    #[test]
    fn test_header_notes_split_receipt_and_effect() {
        let ingester = ingester();
        let meta = ingester.header_meta(" (Sent with Slam) (Read by them after 2 hours)");
        assert_eq!(meta.expressive_type.as_deref(), Some("Slam"));
        assert_eq!(meta.read_receipt.as_deref(), Some("Read by them after 2 hours"));
        assert!(ingester.header_meta("").read_receipt.is_none());
    }

    #[test]
    fn test_bom_is_stripped() {
        let artifact = Artifact::from_text("bom.txt", "\u{FEFF}Jan 01, 2024  10:00:00 AM\n");
        assert!(artifact.text().starts_with("Jan"));
    }

    #[test]
    fn test_classify_impossible_date_is_malformed() {
        let ingester = ingester();
        assert_eq!(ingester.classify("Feb 30, 2024  10:00:00 AM"), LineKind::MalformedHeader);
        assert_eq!(ingester.classify("2024-01-01 10:00"), LineKind::MalformedHeader);
        assert_eq!(ingester.classify("January 01, 2024  10:00:00 AM"), LineKind::MalformedHeader);
    }

    #[test]
    fn test_classify_date_in_prose_is_text() {
        let ingester = ingester();
        assert_eq!(ingester.classify("2024-05-01 is the deadline"), LineKind::Text);
        assert_eq!(ingester.classify("Jan 01, 2024 10:00:00 AM was when we met"), LineKind::Text);
    }

    #[test]
    fn test_declared_participants_from_stem() {
        let artifact = Artifact::from_text("p15551234567.txt", "");
        assert_eq!(artifact.declared_participants(), vec!["+15551234567".to_string()]);

        let group = Artifact::from_text("+15551234567, +15557654321.txt", "");
        assert_eq!(group.declared_participants().len(), 2);

        let named = Artifact::from_text("Family Chat.txt", "");
        assert!(named.declared_participants().is_empty());
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(guess_mime_type("IMG_0001.HEIC"), "image/heic");
        assert_eq!(guess_mime_type("notes"), "application/octet-stream");
    }
}
