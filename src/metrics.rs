use std::time::Duration;

use metrics::{counter, histogram};

use crate::models::LoadReport;

/// Artifacts committed
pub const ARTIFACTS_LOADED_TOTAL: &str = "txt_history_artifacts_loaded_total";
/// Artifacts skipped or rolled back
pub const ARTIFACTS_FAILED_TOTAL: &str = "txt_history_artifacts_failed_total";
/// New message rows
pub const MESSAGES_INSERTED_TOTAL: &str = "txt_history_messages_inserted_total";
/// Records matching an existing message_id
pub const MESSAGES_DUPLICATE_TOTAL: &str = "txt_history_messages_duplicate_total";
/// Malformed lines skipped by the parser
pub const MALFORMED_LINES_TOTAL: &str = "txt_history_malformed_lines_total";
/// Wall time per artifact load
pub const LOAD_DURATION_SECONDS: &str = "txt_history_load_duration_seconds";

/// Load-run metrics: emitted through the `metrics` facade and tallied locally
/// so a run can summarize itself without a recorder installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetrics {
    /// Artifacts committed
    pub artifacts_loaded: u64,
    /// Artifacts that failed
    pub artifacts_failed: u64,
    /// Messages inserted
    pub messages_inserted: u64,
    /// Duplicates skipped
    pub messages_duplicate: u64,
    /// Malformed lines skipped
    pub malformed_lines: u64,
}

impl IngestMetrics {
    /// Record a committed artifact
    pub fn record_load(&mut self, report: &LoadReport, duration: Duration) {
        let inserted = report.inserted as u64;
        let duplicate = report.skipped_duplicate as u64;
        let malformed = report.malformed_skipped as u64;

        counter!(ARTIFACTS_LOADED_TOTAL).increment(1);
        counter!(MESSAGES_INSERTED_TOTAL).increment(inserted);
        counter!(MESSAGES_DUPLICATE_TOTAL).increment(duplicate);
        counter!(MALFORMED_LINES_TOTAL).increment(malformed);
        histogram!(LOAD_DURATION_SECONDS, "status" => "committed").record(duration.as_secs_f64());

        self.artifacts_loaded += 1;
        self.messages_inserted += inserted;
        self.messages_duplicate += duplicate;
        self.malformed_lines += malformed;
    }

    /// Record an artifact that was skipped or rolled back
    pub fn record_failure(&mut self, kind: &'static str, duration: Duration) {
        counter!(ARTIFACTS_FAILED_TOTAL, "kind" => kind).increment(1);
        histogram!(LOAD_DURATION_SECONDS, "status" => "failed").record(duration.as_secs_f64());
        self.artifacts_failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default_is_zero() {
        let metrics = IngestMetrics::default();
        assert_eq!(metrics.artifacts_loaded, 0);
        assert_eq!(metrics.messages_inserted, 0);
    }
}
