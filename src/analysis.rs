//! Read-only aggregations over the store.
//!
//! Every query is a deterministic function of store contents. None of them
//! write; run them between load runs, not during one.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Conversation, DateRange, Direction, StoredMessage};
use crate::text::Tokenizer;

/// Bucket size for volume over time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Calendar day
    Day,
    /// ISO week, keyed by its Monday
    Week,
    /// Calendar month, keyed by its first day
    Month,
}

impl Granularity {
    /// Parse a user-supplied granularity name
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "day" | "daily" => Some(Self::Day),
            "week" | "weekly" => Some(Self::Week),
            "month" | "monthly" => Some(Self::Month),
            _ => None,
        }
    }

    /// First day of the bucket containing `date`
    #[must_use]
    pub fn bucket(self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

/// Body statistics for a conversation or the whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextStats {
    /// Messages considered
    pub messages: usize,
    /// Messages with a non-NULL body
    pub messages_with_body: usize,
    /// Messages flagged with an attachment
    pub attachment_messages: usize,
    /// Words across all bodies
    pub words: usize,
    /// Mean words per message with a body
    pub mean_words_per_body: f64,
    /// Word count of the longest body
    pub longest_body_words: usize,
}

/// Lazy sequence of reply gaps: the time between each message and the one
/// before it, whenever the two have opposite directions.
#[derive(Debug)]
pub struct ResponseLatencies {
    messages: std::vec::IntoIter<(NaiveDateTime, Direction)>,
    previous: Option<(NaiveDateTime, Direction)>,
}

impl ResponseLatencies {
    fn new(messages: Vec<StoredMessage>) -> Self {
        let points: Vec<_> = messages
            .into_iter()
            .map(|m| (m.timestamp, m.direction))
            .collect();

        Self {
            messages: points.into_iter(),
            previous: None,
        }
    }
}

impl Iterator for ResponseLatencies {
    type Item = TimeDelta;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (timestamp, direction) = self.messages.next()?;
            match self.previous.replace((timestamp, direction)) {
                Some((previous, previous_direction)) if previous_direction != direction => {
                    return Some(timestamp - previous);
                }
                _ => {}
            }
        }
    }
}

/// Query functions consumed by the analysis layer
pub struct AnalysisQueries<'a> {
    db: &'a Database,
    tokenizer: Tokenizer,
}

impl<'a> AnalysisQueries<'a> {
    /// Queries over `db`; with `exclude_stop_words` word counts skip common English words
    pub fn new(db: &'a Database, exclude_stop_words: bool) -> Result<Self> {
        Ok(Self {
            db,
            tokenizer: Tokenizer::new(exclude_stop_words)?,
        })
    }

    /// All known conversations
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        self.db.conversations()
    }

    /// Message count per sender within `range`, keyed by alias when known
    /// and by canonical identifier otherwise
    pub fn messages_by_contact(&self, range: DateRange) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for (contact, count) in self.db.counts_by_sender(range)? {
            *counts.entry(contact.display_name().to_string()).or_insert(0) += count;
        }
        Ok(counts)
    }

    /// Message count per period, keyed by the first day of each bucket
    pub fn messages_by_period(
        &self,
        granularity: Granularity,
        conversation_key: Option<&str>,
    ) -> Result<BTreeMap<NaiveDate, usize>> {
        let mut counts = BTreeMap::new();
        for message in self.db.messages(conversation_key, DateRange::all())? {
            *counts
                .entry(granularity.bucket(message.timestamp.date()))
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Gaps between consecutive messages of opposite direction, in timestamp order
    pub fn response_latency(&self, conversation_key: &str) -> Result<ResponseLatencies> {
        Ok(ResponseLatencies::new(
            self.db.conversation_messages(conversation_key)?,
        ))
    }

    /// Word counts over one conversation, or all messages when `None`
    pub fn word_frequency(&self, conversation_key: Option<&str>) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for message in self.db.messages(conversation_key, DateRange::all())? {
            let Some(body) = message.body.as_deref() else {
                continue;
            };
            for word in self.tokenizer.tokenize(body) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// The `limit` most frequent words, ties broken alphabetically
    pub fn top_words(
        &self,
        conversation_key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, usize)>> {
        let mut words: Vec<_> = self.word_frequency(conversation_key)?.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(limit);
        Ok(words)
    }

    /// Body statistics over one conversation, or all messages when `None`
    pub fn text_stats(&self, conversation_key: Option<&str>) -> Result<TextStats> {
        let mut stats = TextStats::default();

        for message in self.db.messages(conversation_key, DateRange::all())? {
            stats.messages += 1;
            if message.has_attachment {
                stats.attachment_messages += 1;
            }
            if let Some(body) = message.body.as_deref() {
                let words = self.tokenizer.word_count(body);
                stats.messages_with_body += 1;
                stats.words += words;
                stats.longest_body_words = stats.longest_body_words.max(words);
            }
        }

        if stats.messages_with_body > 0 {
            #[allow(clippy::cast_precision_loss)]
            let mean = stats.words as f64 / stats.messages_with_body as f64;
            stats.mean_words_per_body = mean;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageMeta;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn message(timestamp: &str, direction: Direction) -> StoredMessage {
        StoredMessage {
            message_id: timestamp.to_string(),
            conversation_key: "dm:+15551234567,me".to_string(),
            sender_number: "+15551234567".to_string(),
            timestamp: at(timestamp),
            body: None,
            has_attachment: false,
            direction,
            source_artifact: "a.txt".to_string(),
            reply_to_message_id: None,
            meta: MessageMeta::default(),
        }
    }

    #[test]
    fn test_latency_only_counts_direction_changes() {
        let latencies: Vec<_> = ResponseLatencies::new(vec![
            message("2024-01-01 10:00:00", Direction::Received),
            message("2024-01-01 10:00:30", Direction::Received),
            message("2024-01-01 10:02:00", Direction::Sent),
            message("2024-01-01 10:05:00", Direction::Received),
        ])
        .collect();

        assert_eq!(latencies, vec![TimeDelta::seconds(90), TimeDelta::seconds(180)]);
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        let wednesday = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert_eq!(
            Granularity::Week.bucket(wednesday),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            Granularity::Month.bucket(wednesday),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }
}
