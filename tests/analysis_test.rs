//! Tests for read-only analysis queries

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeDelta};
use txt_history_store::analysis::Granularity;
use txt_history_store::{
    AddressBook, AnalysisQueries, Artifact, Database, DateRange, IngestOptions, Loader,
};

const ALICE_KEY: &str = "dm:+15551234567,me";

const CHAT: &str = "\
2024-01-01T10:00:00
+15551234567
hi
2024-01-01T10:01:00
Me
hello
2024-01-15T09:00:00
+15551234567
Hello, hello! The pizza's here
2024-01-15T09:05:00
Me
\u{FFFC}
";

fn loaded_store() -> Database {
    let db = Database::in_memory().expect("Failed to create in-memory store");
    let book = AddressBook::new([("+15551234567", "Alice")]).expect("Failed to build address book");
    let mut loader = Loader::new(&db, IngestOptions::default()).expect("Failed to create loader");
    loader
        .load_artifact(&Artifact::from_text("+15551234567.txt", CHAT), &book)
        .expect("Failed to load artifact");
    db
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn test_messages_by_contact_uses_alias() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let counts = queries.messages_by_contact(DateRange::all()).expect("query");
    let expected: BTreeMap<String, usize> =
        [("Alice".to_string(), 2), ("me".to_string(), 2)].into_iter().collect();
    assert_eq!(counts, expected);
}

#[test]
fn test_messages_by_contact_respects_range() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let range = DateRange {
        start: date(2024, 1, 2).and_hms_opt(0, 0, 0),
        end: date(2024, 1, 15).and_hms_opt(9, 0, 1),
    };
    let counts = queries.messages_by_contact(range).expect("query");
    assert_eq!(counts.get("Alice"), Some(&1));
    assert_eq!(counts.get("me"), None);

    let until_nine = DateRange {
        end: date(2024, 1, 15).and_hms_opt(9, 0, 0),
        ..range
    };
    let counts = queries.messages_by_contact(until_nine).expect("query");
    assert!(counts.is_empty(), "end bound is exclusive");
}

#[test]
fn test_whole_day_range_includes_last_second_fraction() {
    let db = Database::in_memory().expect("Failed to create in-memory store");
    let mut loader = Loader::new(&db, IngestOptions::default()).expect("Failed to create loader");
    let chat = "\
2024-01-15T23:59:59.500
+15551234567
just before midnight
2024-01-16T00:00:00
+15551234567
next day
";
    loader
        .load_artifact(&Artifact::from_text("+15551234567.txt", chat), &AddressBook::default())
        .expect("Failed to load artifact");

    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");
    let day = DateRange::from_dates(Some(date(2024, 1, 15)), Some(date(2024, 1, 15)));
    let counts = queries.messages_by_contact(day).expect("query");
    assert_eq!(counts.get("+15551234567"), Some(&1));
}

#[test]
fn test_messages_by_period() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let daily = queries
        .messages_by_period(Granularity::Day, Some(ALICE_KEY))
        .expect("query");
    assert_eq!(daily.get(&date(2024, 1, 1)), Some(&2));
    assert_eq!(daily.get(&date(2024, 1, 15)), Some(&2));

    let weekly = queries.messages_by_period(Granularity::Week, None).expect("query");
    assert_eq!(weekly.len(), 2);
    assert_eq!(weekly.get(&date(2024, 1, 15)), Some(&2));

    let monthly = queries.messages_by_period(Granularity::Month, None).expect("query");
    assert_eq!(monthly.into_iter().collect::<Vec<_>>(), vec![(date(2024, 1, 1), 4)]);
}

#[test]
fn test_response_latency_over_store() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let latencies: Vec<_> = queries.response_latency(ALICE_KEY).expect("query").collect();
    assert_eq!(latencies.len(), 3);
    assert_eq!(latencies[0], TimeDelta::seconds(60));
    assert_eq!(latencies[2], TimeDelta::minutes(5));
}

#[test]
fn test_word_frequency_normalizes_case_and_punctuation() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let words = queries.word_frequency(Some(ALICE_KEY)).expect("query");
    assert_eq!(words.get("hello"), Some(&3));
    assert_eq!(words.get("pizzas"), Some(&1));
    assert_eq!(words.get("Hello"), None);
}

#[test]
fn test_word_frequency_excludes_stop_words() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, true).expect("Failed to create queries");

    let words = queries.word_frequency(None).expect("query");
    assert_eq!(words.get("the"), None);
    assert_eq!(words.get("pizzas"), Some(&1));
}

#[test]
fn test_top_words_orders_by_count_then_word() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let top = queries.top_words(None, 3).expect("query");
    assert_eq!(
        top,
        vec![
            ("hello".to_string(), 3),
            ("here".to_string(), 1),
            ("hi".to_string(), 1),
        ]
    );
}

#[test]
fn test_text_stats() {
    let db = loaded_store();
    let queries = AnalysisQueries::new(&db, false).expect("Failed to create queries");

    let stats = queries.text_stats(Some(ALICE_KEY)).expect("query");
    assert_eq!(stats.messages, 4);
    assert_eq!(stats.messages_with_body, 3);
    assert_eq!(stats.attachment_messages, 1);
    assert_eq!(stats.words, 7);
    assert_eq!(stats.longest_body_words, 5);
    assert!((stats.mean_words_per_body - 7.0 / 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_queries_on_empty_store() {
    let db = Database::in_memory().expect("Failed to create in-memory store");
    let queries = AnalysisQueries::new(&db, true).expect("Failed to create queries");

    assert!(queries.conversations().expect("query").is_empty());
    assert!(queries.messages_by_contact(DateRange::all()).expect("query").is_empty());
    assert_eq!(queries.response_latency(ALICE_KEY).expect("query").count(), 0);
    assert_eq!(queries.text_stats(None).expect("query").messages, 0);
}
