//! Text History Store - conversation export ingestion and analytics
//!
//! A Rust library that loads per-conversation message exports into a
//! deduplicated SQLite store and answers read-only questions about them.
//!
//! # Features
//!
//! - Tolerant parsing of exporter artifacts (malformed lines are counted, not fatal)
//! - Phone-number normalization and alias resolution through an address book
//! - Content-derived message ids, so re-running a load is always safe
//! - One transaction per artifact with rollback on any write failure
//! - Volume, response-latency, word-frequency and text statistics queries
//! - Transcript export to TXT, CSV and JSON

/// Phone-number normalization and alias lookup
pub mod address_book;
/// Read-only aggregation queries
pub mod analysis;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Transcript export
pub mod file_writer;
/// Exporter artifact parsing
pub mod ingest;
/// Artifact loading orchestration
pub mod loader;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Identity resolution and key derivation
pub mod resolver;
/// Database schema definitions
pub mod schema;
/// Word tokenization
pub mod text;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use address_book::AddressBook;
pub use analysis::AnalysisQueries;
pub use db::Database;
pub use error::{IngestError, Result};
pub use ingest::{Artifact, ExportIngester, IngestOptions};
pub use loader::Loader;
pub use models::{Contact, Conversation, DateRange, LoadReport, OutputFormat};
pub use resolver::IdentityResolver;
