use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use txt_history_store::address_book::{canonical_handle, AddressBook};
use txt_history_store::analysis::{AnalysisQueries, Granularity};
use txt_history_store::config::AppConfig;
use txt_history_store::file_writer::{transcript, write_transcript_to_timestamped_dir};
use txt_history_store::loader::{discover_artifacts, Loader};
use txt_history_store::logging::{init_logging, OperationTimer};
use txt_history_store::models::{ConversationKind, DateRange, OutputFormat};
use txt_history_store::validation::InputValidator;
use txt_history_store::Database;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/default, config/local, config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store path, overriding the configuration
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load exporter artifacts into the store
    Load {
        /// Artifact files or export directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List contacts
    Contacts,
    /// List conversations
    Conversations,
    /// Message volume by contact, or by period with --granularity
    Volume {
        /// Bucket by day, week or month instead of by contact
        #[arg(short, long)]
        granularity: Option<String>,

        /// Conversation key, number or alias (period volume only)
        #[arg(long)]
        conversation: Option<String>,

        /// Start date for message range (YYYY-MM-DD)
        #[arg(short, long)]
        start_date: Option<String>,

        /// End date for message range (YYYY-MM-DD)
        #[arg(short, long)]
        end_date: Option<String>,
    },
    /// Reply gaps within a conversation
    Latency {
        /// Conversation key, number or alias
        conversation: String,
    },
    /// Most frequent words
    Words {
        /// Conversation key, number or alias (all messages if omitted)
        #[arg(long)]
        conversation: Option<String>,

        /// Number of words to report
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Body statistics
    Stats {
        /// Conversation key, number or alias (all messages if omitted)
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Write a conversation transcript to files
    Export {
        /// Conversation key, number or alias
        conversation: String,

        /// Output format (txt, csv or json)
        #[arg(short, long, default_value = "txt")]
        format: String,

        /// Number of messages per chunk file
        #[arg(short, long)]
        lines: Option<usize>,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output_dir: PathBuf,
    },
    /// Remove the messages an artifact inserted so it can be re-ingested
    Purge {
        /// Artifact file name as recorded at load time
        artifact: String,
    },
}

#[derive(Serialize)]
struct LatencySummary {
    conversation_key: String,
    replies: usize,
    mean_seconds: Option<f64>,
    median_seconds: Option<i64>,
    latencies_seconds: Vec<i64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    if let Some(database) = &cli.database {
        config.database.path.clone_from(database);
    }

    let _guard = init_logging(
        Some(&config.logging.level),
        config.log_file().as_deref(),
        config.logging.format == "json",
    )?;

    info!("Starting txt-history-store");

    // Address-book errors are fatal before anything is loaded
    let book = config.address_book()?;
    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open store {}", config.database.path))?;

    match cli.command {
        Commands::Load { paths } => load(&config, &db, &book, &paths),
        Commands::Contacts => print_json(&db.contacts()?),
        Commands::Conversations => print_json(&db.conversations()?),
        Commands::Volume {
            granularity,
            conversation,
            start_date,
            end_date,
        } => volume(
            &config,
            &db,
            &book,
            granularity.as_deref(),
            conversation.as_deref(),
            start_date.as_deref(),
            end_date.as_deref(),
        ),
        Commands::Latency { conversation } => latency(&config, &db, &book, &conversation),
        Commands::Words { conversation, limit } => {
            let queries = AnalysisQueries::new(&db, config.analysis.exclude_stop_words)?;
            let key = conversation
                .as_deref()
                .map(|c| resolve_conversation(&db, &book, c))
                .transpose()?;
            let limit = limit.unwrap_or(usize::try_from(config.analysis.top_words)?);
            print_json(&queries.top_words(key.as_deref(), limit)?)
        }
        Commands::Stats { conversation } => {
            let queries = AnalysisQueries::new(&db, config.analysis.exclude_stop_words)?;
            let key = conversation
                .as_deref()
                .map(|c| resolve_conversation(&db, &book, c))
                .transpose()?;
            print_json(&queries.text_stats(key.as_deref())?)
        }
        Commands::Export {
            conversation,
            format,
            lines,
            output_dir,
        } => export(&db, &book, &conversation, &format, lines, &output_dir),
        Commands::Purge { artifact } => {
            let deleted = db.purge_artifact(&artifact)?;
            print_json(&serde_json::json!({ "artifact": artifact, "deleted": deleted }))
        }
    }
}

/// Load artifacts, expanding directories into their `*.txt` files
fn load(config: &AppConfig, db: &Database, book: &AddressBook, paths: &[PathBuf]) -> Result<()> {
    let timer = OperationTimer::new("load");

    let mut artifacts = Vec::new();
    for path in paths {
        InputValidator::validate_input_path(path)?;
        if path.is_dir() {
            let found = discover_artifacts(path)?;
            info!(directory = %path.display(), artifacts = found.len(), "Discovered artifacts");
            artifacts.extend(found);
        } else {
            artifacts.push(path.clone());
        }
    }

    let applied = db.apply_address_book(book)?;
    info!(contacts = applied, "Contacts synchronized");

    let mut loader = Loader::new(db, config.ingest_options())?;
    let batch = loader.load_all(&artifacts, book)?;

    for failure in &batch.failures {
        warn!(artifact = %failure.artifact, error = %failure.error, "Artifact failed");
    }
    info!(
        inserted = loader.metrics().messages_inserted,
        duplicates = loader.metrics().messages_duplicate,
        malformed = loader.metrics().malformed_lines,
        failed = loader.metrics().artifacts_failed,
        "Load complete"
    );
    timer.finish();

    print_json(&batch)
}

fn volume(
    config: &AppConfig,
    db: &Database,
    book: &AddressBook,
    granularity: Option<&str>,
    conversation: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<()> {
    let queries = AnalysisQueries::new(db, config.analysis.exclude_stop_words)?;

    match granularity {
        Some(name) => {
            let granularity = Granularity::parse(name)
                .ok_or_else(|| anyhow::anyhow!("Invalid granularity: {name}. Use day, week or month"))?;
            let key = conversation
                .map(|c| resolve_conversation(db, book, c))
                .transpose()?;
            print_json(&queries.messages_by_period(granularity, key.as_deref())?)
        }
        None => {
            let range = parse_date_range(start_date, end_date)?;
            print_json(&queries.messages_by_contact(range)?)
        }
    }
}

fn latency(config: &AppConfig, db: &Database, book: &AddressBook, conversation: &str) -> Result<()> {
    let queries = AnalysisQueries::new(db, config.analysis.exclude_stop_words)?;
    let key = resolve_conversation(db, book, conversation)?;

    let mut latencies: Vec<i64> = queries
        .response_latency(&key)?
        .map(|gap| gap.num_seconds())
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let mean_seconds = (!latencies.is_empty())
        .then(|| latencies.iter().sum::<i64>() as f64 / latencies.len() as f64);

    let in_order = latencies.clone();
    latencies.sort_unstable();
    let median_seconds = latencies.get(latencies.len() / 2).copied();

    print_json(&LatencySummary {
        conversation_key: key,
        replies: in_order.len(),
        mean_seconds,
        median_seconds,
        latencies_seconds: in_order,
    })
}

fn export(
    db: &Database,
    book: &AddressBook,
    conversation: &str,
    format: &str,
    lines: Option<usize>,
    output_dir: &Path,
) -> Result<()> {
    let format = OutputFormat::parse(format).unwrap_or_else(|| {
        warn!("Invalid format: {}. Using txt as default.", format);
        OutputFormat::Txt
    });

    let key = resolve_conversation(db, book, conversation)?;
    let messages = db.conversation_messages(&key)?;
    let entries = transcript(&messages, &db.contacts()?);

    let run_label = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let files = write_transcript_to_timestamped_dir(&entries, format, output_dir, &run_label, lines)?;
    info!(conversation = %key, messages = entries.len(), files = files.len(), "Transcript exported");

    print_json(&files)
}

/// Accept a conversation key, a participant number, or an alias naming a
/// one-to-one conversation
fn resolve_conversation(db: &Database, book: &AddressBook, wanted: &str) -> Result<String> {
    if db.conversation(wanted)?.is_some() {
        return Ok(wanted.to_string());
    }

    let number = book
        .contacts()
        .find(|c| c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(wanted)))
        .map_or_else(|| canonical_handle(wanted), |c| c.canonical_number);

    db.conversations()?
        .into_iter()
        .find(|c| c.kind == ConversationKind::Dm && c.participant_numbers.contains(&number))
        .map(|c| c.conversation_key)
        .ok_or_else(|| anyhow::anyhow!("Unknown conversation: {wanted}"))
}

/// Parse date range from string options; both days are included whole
fn parse_date_range(start_date: Option<&str>, end_date: Option<&str>) -> Result<DateRange> {
    let parse = |date: &str, what: &str| -> Result<NaiveDate> {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("Invalid {what} date format, use YYYY-MM-DD"))
    };

    let start = start_date.map(|d| parse(d, "start")).transpose()?;
    let end = end_date.map(|d| parse(d, "end")).transpose()?;

    Ok(DateRange::from_dates(start, end))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    Ok(())
}
