use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::address_book::{normalize_number, AddressBook};
use crate::ingest::IngestOptions;
use crate::validation::InputValidator;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Store location
    pub database: DatabaseConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Parsing policy and local identity
    pub ingest: IngestConfig,
    /// Operator's number-to-alias mapping
    pub address_book: AddressBookConfig,
    /// Query defaults
    pub analysis: AnalysisConfig,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path; a `sqlite:` prefix is accepted
    pub path: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional rolling JSON log file
    pub file_path: Option<String>,
    /// Console format, "json" or "text"
    pub format: String,
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Local user's number; overrides the address book's `self_number`
    pub self_number: Option<String>,
    /// Drop records with no body, attachment or reactions
    pub skip_empty_records: bool,
}

/// Address-book settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressBookConfig {
    /// YAML or JSON address-book file
    pub path: Option<String>,
}

/// Analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Skip common English words in word counts
    pub exclude_stop_words: bool,
    /// Default number of words reported by `words`
    pub top_words: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/messages.db".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            ingest: IngestConfig {
                self_number: None,
                skip_empty_records: false,
            },
            address_book: AddressBookConfig { path: None },
            analysis: AnalysisConfig {
                exclude_stop_words: true,
                top_words: 25,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// defaults, then `config/default`, `config/local`, `config` files, then
    /// `TXT_HISTORY__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self> {
        let builder = Self::default_entries().into_iter().try_fold(
            Config::builder(),
            |builder, (key, value)| builder.set_default(key, value),
        )?;

        let config = builder
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("TXT_HISTORY").separator("__"))
            .build()
            .context("Failed to load configuration")?;

        let app_config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Load from a single file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = Self::default_entries().into_iter().try_fold(
            Config::builder(),
            |builder, (key, value)| builder.set_default(key, value),
        )?;

        let app_config: Self = builder
            .add_source(File::from(path))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        InputValidator::validate_database_path(&self.database.path)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if let Some(number) = &self.ingest.self_number {
            normalize_number(number).context("Invalid ingest.self_number")?;
        }

        if self.analysis.top_words == 0 {
            return Err(anyhow::anyhow!("top_words must be greater than 0"));
        }

        Ok(())
    }

    /// Ingest policy for the loader
    #[must_use]
    pub const fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            skip_empty_records: self.ingest.skip_empty_records,
        }
    }

    /// Build the address book: the configured file (if any) with
    /// `ingest.self_number` applied on top
    pub fn address_book(&self) -> Result<AddressBook> {
        let book = match &self.address_book.path {
            Some(path) => AddressBook::from_file(Path::new(path))
                .with_context(|| format!("Failed to load address book {path}"))?,
            None => AddressBook::default(),
        };

        match &self.ingest.self_number {
            Some(number) => Ok(book.with_self_number(number)?),
            None => Ok(book),
        }
    }

    /// Log file path, if file logging is enabled
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        self.logging.file_path.as_ref().map(PathBuf::from)
    }

    /// Flattened defaults for the config builder
    fn default_entries() -> Vec<(&'static str, config::Value)> {
        let defaults = Self::default();
        let mut entries = vec![
            ("database.path", config::Value::from(defaults.database.path)),
            ("logging.level", config::Value::from(defaults.logging.level)),
            ("logging.format", config::Value::from(defaults.logging.format)),
            (
                "ingest.skip_empty_records",
                config::Value::from(defaults.ingest.skip_empty_records),
            ),
            (
                "analysis.exclude_stop_words",
                config::Value::from(defaults.analysis.exclude_stop_words),
            ),
            ("analysis.top_words", config::Value::from(defaults.analysis.top_words)),
        ];

        if let Some(file_path) = defaults.logging.file_path {
            entries.push(("logging.file_path", config::Value::from(file_path)));
        }

        entries
    }
}
