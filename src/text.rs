use std::collections::HashSet;

use regex::Regex;
use stop_words::{get, LANGUAGE};
use unicode_normalization::UnicodeNormalization;

use crate::error::{IngestError, Result};

/// Case-normalizing, punctuation-stripping tokenizer for message bodies
#[derive(Debug)]
pub struct Tokenizer {
    url_regex: Regex,
    special_chars_regex: Regex,
    extra_spaces_regex: Regex,
    stopwords: Option<HashSet<String>>,
}

impl Tokenizer {
    /// Create a tokenizer; with `exclude_stop_words` common English words are dropped
    pub fn new(exclude_stop_words: bool) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| IngestError::Other(format!("Failed to compile regex {pattern}: {e}")))
        };

        let stopwords = exclude_stop_words.then(|| {
            get(LANGUAGE::English)
                .iter()
                .map(ToString::to_string)
                .collect::<HashSet<String>>()
        });

        Ok(Self {
            url_regex: compile(r"https?://\S+|www\.\S+")?,
            special_chars_regex: compile(r"[^\w\s]")?,
            extra_spaces_regex: compile(r"\s+")?,
            stopwords,
        })
    }

    /// Normalize Unicode, remove URLs and punctuation, collapse whitespace, lowercase
    #[must_use]
    pub fn clean_text(&self, text: &str) -> String {
        let normalized = text.nfc().collect::<String>();
        let no_urls = self.url_regex.replace_all(&normalized, " ");

        // Contractions stay one word: "don't" -> "dont"
        let no_apostrophes = no_urls.replace(['\'', '\u{2019}'], "");

        let no_special = self.special_chars_regex.replace_all(&no_apostrophes, " ");
        let normalized_spaces = self.extra_spaces_regex.replace_all(&no_special, " ");

        normalized_spaces.trim().to_lowercase()
    }

    /// Split text into cleaned words
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.clean_text(text)
            .split_whitespace()
            .filter(|word| !self.is_stop_word(word))
            .map(ToString::to_string)
            .collect()
    }

    /// Number of words in a text, stop words included
    #[must_use]
    pub fn word_count(&self, text: &str) -> usize {
        self.clean_text(text).split_whitespace().count()
    }

    fn is_stop_word(&self, word: &str) -> bool {
        self.stopwords
            .as_ref()
            .is_some_and(|stopwords| stopwords.contains(word))
    }
}
