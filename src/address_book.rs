//! Phone-number normalization and the operator's alias mapping.
//!
//! The address book is built once from configuration and is read-only
//! afterwards; every resolver and loader call receives it explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::models::Contact;
use crate::validation::InputValidator;

/// Identifier used for the local user when no self number is configured
pub const DEFAULT_SELF_IDENTITY: &str = "me";

/// Punctuation the exporter and operators commonly put inside numbers
const STRIPPED_PUNCTUATION: &[char] = &['-', '(', ')', '.', '/', '\\'];

/// Normalize a phone number to a single `+`-prefixed digit string.
///
/// Whitespace and common punctuation are removed and leading `+` signs collapse
/// into one. Letters, symbols, or a `+` after the first digit are rejected.
pub fn normalize_number(raw: &str) -> Result<String> {
    let mut digits = String::with_capacity(raw.len());

    for c in raw.chars() {
        if c.is_whitespace() || STRIPPED_PUNCTUATION.contains(&c) {
            continue;
        }
        if c == '+' {
            if digits.is_empty() {
                continue;
            }
            return Err(IngestError::Config(format!(
                "'+' must lead the phone number: {raw:?}"
            )));
        }
        if !c.is_ascii_digit() {
            return Err(IngestError::Config(format!(
                "Phone number contains disallowed character {c:?}: {raw:?}"
            )));
        }
        digits.push(c);
    }

    InputValidator::validate_phone_digits(raw, &digits)?;
    Ok(format!("+{digits}"))
}

/// Canonical identifier for a handle found in an artifact.
///
/// Phone numbers normalize; anything else (e-mail handles, display names)
/// passes through trimmed and lowercased.
#[must_use]
pub fn canonical_handle(raw: &str) -> String {
    normalize_number(raw).unwrap_or_else(|_| raw.trim().to_lowercase())
}

/// On-disk address-book layout
#[derive(Debug, Default, Deserialize)]
struct AddressBookFile {
    #[serde(default)]
    self_number: Option<String>,
    #[serde(default)]
    contacts: BTreeMap<String, String>,
}

/// Mapping from canonical number to alias
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook {
    aliases: BTreeMap<String, String>,
    self_number: Option<String>,
}

impl AddressBook {
    /// Build an address book from `raw_number -> alias` entries.
    ///
    /// Fails with `IngestError::Config` if a number cannot be normalized, an
    /// alias is invalid, or two entries normalize to the same number with
    /// different aliases.
    pub fn new<I, K, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut aliases = BTreeMap::new();

        for (raw, alias) in entries {
            let canonical = normalize_number(raw.as_ref())?;
            let alias = alias.as_ref().trim();
            InputValidator::validate_alias(alias)?;

            if let Some(existing) = aliases.get(&canonical) {
                if existing != alias {
                    return Err(IngestError::Config(format!(
                        "{canonical} is configured as both {existing:?} and {alias:?}"
                    )));
                }
                continue;
            }

            aliases.insert(canonical, alias.to_string());
        }

        debug!(entries = aliases.len(), "Address book built");
        Ok(Self {
            aliases,
            self_number: None,
        })
    }

    /// Set the local user's own number
    pub fn with_self_number(mut self, raw: &str) -> Result<Self> {
        self.self_number = Some(normalize_number(raw)?);
        Ok(self)
    }

    /// Load an address book from a YAML or JSON file.
    ///
    /// ```yaml
    /// self_number: "+15550000000"
    /// contacts:
    ///   "+15551234567": Alice
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Cannot read address book {}: {e}",
                path.display()
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let file: AddressBookFile = if is_json {
            serde_json::from_str(&text).map_err(|e| {
                IngestError::Config(format!("Invalid address book {}: {e}", path.display()))
            })?
        } else {
            serde_yaml::from_str(&text).map_err(|e| {
                IngestError::Config(format!("Invalid address book {}: {e}", path.display()))
            })?
        };

        let book = Self::new(file.contacts)?;
        match file.self_number {
            Some(number) => book.with_self_number(&number),
            None => Ok(book),
        }
    }

    /// Resolve a raw number to its alias, or to its canonical form if no alias is configured
    #[must_use]
    pub fn resolve(&self, raw_number: &str) -> String {
        let canonical = canonical_handle(raw_number);
        match self.aliases.get(&canonical) {
            Some(alias) => alias.clone(),
            None => canonical,
        }
    }

    /// Alias configured for an already-canonical identifier
    #[must_use]
    pub fn alias_of(&self, canonical: &str) -> Option<&str> {
        self.aliases.get(canonical).map(String::as_str)
    }

    /// Canonical identifier of the local user
    #[must_use]
    pub fn self_identity(&self) -> &str {
        self.self_number.as_deref().unwrap_or(DEFAULT_SELF_IDENTITY)
    }

    /// Configured self number, if any
    #[must_use]
    pub fn self_number(&self) -> Option<&str> {
        self.self_number.as_deref()
    }

    /// Configured entries as contacts, ordered by number
    pub fn contacts(&self) -> impl Iterator<Item = Contact> + '_ {
        self.aliases.iter().map(|(number, alias)| Contact {
            canonical_number: number.clone(),
            alias: Some(alias.clone()),
        })
    }

    /// Number of configured aliases
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// True if no aliases are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
