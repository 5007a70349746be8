//! Transcript export for stored conversations.
//!
//! Writes messages as TXT, CSV or JSON with senders shown by alias when one
//! is known.

use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::models::{Contact, OutputFormat, StoredMessage};

const TRANSCRIPT_TIME_FORMAT: &str = "%b %d, %Y %r";

/// One transcript line, ready for any output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    /// Alias or canonical identifier of the sender
    pub sender: String,
    /// Formatted header timestamp
    pub timestamp: String,
    /// Body text, empty for attachment-only messages
    pub content: String,
    /// Attachment marker
    pub has_attachment: bool,
}

/// Build transcript entries, showing senders by alias when `contacts` has one
#[must_use]
pub fn transcript(messages: &[StoredMessage], contacts: &[Contact]) -> Vec<TranscriptEntry> {
    let names: HashMap<&str, &str> = contacts
        .iter()
        .map(|c| (c.canonical_number.as_str(), c.display_name()))
        .collect();

    messages
        .iter()
        .map(|m| TranscriptEntry {
            sender: names
                .get(m.sender_number.as_str())
                .map_or_else(|| m.sender_number.clone(), ToString::to_string),
            timestamp: m.timestamp.format(TRANSCRIPT_TIME_FORMAT).to_string(),
            content: m.body.clone().unwrap_or_default(),
            has_attachment: m.has_attachment,
        })
        .collect()
}

/// Write a transcript under `output_dir/<run_label>/`, split into
/// `chunk_<n>` files of at most `lines_per_chunk` entries.
///
/// Returns the paths written; nothing is created for an empty transcript.
pub fn write_transcript_to_timestamped_dir(
    entries: &[TranscriptEntry],
    format: OutputFormat,
    output_dir: &Path,
    run_label: &str,
    lines_per_chunk: Option<usize>,
) -> Result<Vec<PathBuf>> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let chunk_dir = output_dir
        .join(run_label)
        .join(format!("chunks_{}", format.extension()));
    create_dir_all(&chunk_dir)?;

    let chunk_size = lines_per_chunk.filter(|n| *n > 0).unwrap_or(entries.len());
    let mut output_files = Vec::new();

    for (i, chunk) in entries.chunks(chunk_size).enumerate() {
        let file_path = chunk_dir.join(format!("chunk_{}.{}", i + 1, format.extension()));
        write_transcript_file(chunk, format, &file_path)?;
        debug!(entries = chunk.len(), path = %file_path.display(), "Wrote transcript chunk");
        output_files.push(file_path);
    }

    Ok(output_files)
}

/// Write a transcript to a single file in the given format
pub fn write_transcript_file(
    entries: &[TranscriptEntry],
    format: OutputFormat,
    file_path: &Path,
) -> Result<()> {
    match format {
        OutputFormat::Txt => write_txt_file(entries, file_path),
        OutputFormat::Csv => write_csv_file(entries, file_path),
        OutputFormat::Json => write_json_file(entries, file_path),
    }
}

/// Format: `sender, timestamp, content` with a blank line between messages
fn write_txt_file(entries: &[TranscriptEntry], file_path: &Path) -> Result<()> {
    let file = File::create(file_path)?;
    let mut writer = BufWriter::new(file);

    for entry in entries {
        writeln!(writer, "{}, {}, {}", entry.sender, entry.timestamp, entry.content)?;
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

/// Header row: `ID, Sender, Datetime, Message, Attachment`
fn write_csv_file(entries: &[TranscriptEntry], file_path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(file_path)?;
    writer.write_record(["ID", "Sender", "Datetime", "Message", "Attachment"])?;

    for (i, entry) in entries.iter().enumerate() {
        writer.write_record([
            (i + 1).to_string().as_str(),
            entry.sender.as_str(),
            entry.timestamp.as_str(),
            entry.content.as_str(),
            if entry.has_attachment { "true" } else { "false" },
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_json_file(entries: &[TranscriptEntry], file_path: &Path) -> Result<()> {
    let file = File::create(file_path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), entries)?;
    Ok(())
}
