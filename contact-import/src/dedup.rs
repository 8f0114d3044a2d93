use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use crate::types::ValidatedContact;

// ASCII unit separator. Valid emails and phone numbers never contain it, so a
// key splits back into its three parts unambiguously from the right.
const KEY_SEPARATOR: char = '\u{1f}';

/// Normalized identity of a contact. Equal keys mean the same real-world entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn build(contact: &ValidatedContact) -> Self {
        let mut key = String::with_capacity(
            contact.company_name.len() + contact.email.len() + contact.phone_number.len() + 2,
        );
        key.push_str(&normalize(&contact.company_name));
        key.push(KEY_SEPARATOR);
        key.push_str(&normalize(&contact.email));
        key.push(KEY_SEPARATOR);
        key.push_str(&normalize(&contact.phone_number));
        DedupKey(key)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace(KEY_SEPARATOR, "|"))
    }
}

pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// First-seen row per key, scoped to a single ingestion call.
#[derive(Debug, Default)]
pub struct InBatchTracker {
    seen: HashMap<DedupKey, u64>,
}

impl InBatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &DedupKey) -> Option<u64> {
        self.seen.get(key).copied()
    }

    /// Keeps the first row recorded for a key.
    pub fn record(&mut self, key: DedupKey, row: u64) {
        if let Entry::Vacant(entry) = self.seen.entry(key) {
            entry.insert(row);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
