use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{BatchOutcome, ContactStore, StoreError, StoreResult};
use crate::dedup::DedupKey;
use crate::types::{ContactRecord, DuplicateLink, ValidatedContact};

#[derive(Debug, Clone, Default)]
struct Tables {
    companies: Vec<ContactRecord>,
    duplicates: Vec<DuplicateLink>,
    next_company_id: i64,
    next_duplicate_id: i64,
}

impl Tables {
    fn find(&self, contact: &ValidatedContact) -> Option<&ContactRecord> {
        let key = DedupKey::build(contact);
        self.companies.iter().find(|r| record_key(r) == key)
    }

    /// Checks the whole batch against the identity constraint before touching
    /// the table, so a violation leaves nothing behind.
    fn insert_canonical(&mut self, contacts: &[ValidatedContact]) -> StoreResult<u64> {
        let mut keys: HashSet<DedupKey> = self.companies.iter().map(record_key).collect();
        for contact in contacts {
            let key = DedupKey::build(contact);
            if !keys.insert(key.clone()) {
                return Err(StoreError::UniqueViolation(key.to_string()));
            }
        }

        for contact in contacts {
            self.push_company(contact);
        }
        Ok(contacts.len() as u64)
    }

    fn push_company(&mut self, contact: &ValidatedContact) -> i64 {
        self.next_company_id += 1;
        let now = Utc::now();
        self.companies.push(ContactRecord {
            id: self.next_company_id,
            company_name: contact.company_name.clone(),
            email: contact.email.clone(),
            phone_number: contact.phone_number.clone(),
            is_duplicate: false,
            created_at: now,
            updated_at: now,
        });
        self.next_company_id
    }

    fn push_link(&mut self, canonical_id: Option<i64>, contact: &ValidatedContact) -> StoreResult<()> {
        if let Some(id) = canonical_id {
            if !self.companies.iter().any(|r| r.id == id) {
                return Err(StoreError::Write(format!(
                    "company {id} does not exist for duplicate link"
                )));
            }
        }
        self.next_duplicate_id += 1;
        self.duplicates.push(DuplicateLink {
            id: self.next_duplicate_id,
            company_id: canonical_id,
            duplicate_company_name: contact.company_name.clone(),
            duplicate_email: contact.email.clone(),
            duplicate_phone_number: contact.phone_number.clone(),
        });
        Ok(())
    }
}

/// Number of calls made against a [`MemoryStore`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub exists: u64,
    pub bulk_insert: u64,
    pub find: u64,
    pub insert_link: u64,
    pub commit_batch: u64,
    pub page_canonical: u64,
    pub page_links: u64,
}

impl CallCounts {
    pub fn total(&self) -> u64 {
        self.exists
            + self.bulk_insert
            + self.find
            + self.insert_link
            + self.commit_batch
            + self.page_canonical
            + self.page_links
    }
}

#[derive(Debug, Default)]
struct Counters {
    exists: AtomicU64,
    bulk_insert: AtomicU64,
    find: AtomicU64,
    insert_link: AtomicU64,
    commit_batch: AtomicU64,
    page_canonical: AtomicU64,
    page_links: AtomicU64,
}

/// In-process store with the same contract as the Postgres one, including the
/// identity constraint on canonical records.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    counters: Counters,
    resolution_fails: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            exists: self.counters.exists.load(Ordering::Relaxed),
            bulk_insert: self.counters.bulk_insert.load(Ordering::Relaxed),
            find: self.counters.find.load(Ordering::Relaxed),
            insert_link: self.counters.insert_link.load(Ordering::Relaxed),
            commit_batch: self.counters.commit_batch.load(Ordering::Relaxed),
            page_canonical: self.counters.page_canonical.load(Ordering::Relaxed),
            page_links: self.counters.page_links.load(Ordering::Relaxed),
        }
    }

    /// While set, every canonical-record resolution fails with a query error,
    /// as if the store had become unreachable.
    pub fn set_resolution_failure(&self, fail: bool) {
        self.resolution_fails.store(fail, Ordering::Relaxed);
    }

    pub async fn canonical_count(&self) -> usize {
        self.tables.lock().await.companies.len()
    }

    pub async fn duplicate_link_count(&self) -> usize {
        self.tables.lock().await.duplicates.len()
    }

    /// Removes a canonical record. Links pointing at it keep their data but
    /// lose the reference, as with `ON DELETE SET NULL`.
    pub async fn remove_canonical(&self, id: i64) -> bool {
        let mut tables = self.tables.lock().await;
        let before = tables.companies.len();
        tables.companies.retain(|record| record.id != id);
        let removed = tables.companies.len() != before;
        if removed {
            for link in tables.duplicates.iter_mut() {
                if link.company_id == Some(id) {
                    link.company_id = None;
                }
            }
        }
        removed
    }

    /// Stores a record flagged as duplicate directly, bypassing the pipeline.
    pub async fn insert_flagged_canonical(&self, contact: &ValidatedContact) -> i64 {
        let mut tables = self.tables.lock().await;
        let id = tables.push_company(contact);
        if let Some(record) = tables.companies.last_mut() {
            record.is_duplicate = true;
        }
        id
    }

    fn check_resolution(&self) -> StoreResult<()> {
        if self.resolution_fails.load(Ordering::Relaxed) {
            return Err(StoreError::Query(
                "canonical resolution unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn record_key(record: &ContactRecord) -> DedupKey {
    DedupKey::build(&ValidatedContact {
        company_name: record.company_name.clone(),
        email: record.email.clone(),
        phone_number: record.phone_number.clone(),
    })
}

fn page<T: Clone>(rows: &[T], offset: u64, limit: u64) -> StoreResult<Vec<T>> {
    let offset = usize::try_from(offset).map_err(|e| StoreError::Query(e.to_string()))?;
    let limit = usize::try_from(limit).map_err(|e| StoreError::Query(e.to_string()))?;
    Ok(rows.iter().skip(offset).take(limit).cloned().collect())
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn exists_contact(&self, contact: &ValidatedContact) -> StoreResult<bool> {
        self.counters.exists.fetch_add(1, Ordering::Relaxed);
        Ok(self.tables.lock().await.find(contact).is_some())
    }

    async fn bulk_insert_canonical(&self, contacts: &[ValidatedContact]) -> StoreResult<u64> {
        self.counters.bulk_insert.fetch_add(1, Ordering::Relaxed);
        self.tables.lock().await.insert_canonical(contacts)
    }

    async fn find_canonical(
        &self,
        contact: &ValidatedContact,
    ) -> StoreResult<Option<ContactRecord>> {
        self.counters.find.fetch_add(1, Ordering::Relaxed);
        self.check_resolution()?;
        Ok(self.tables.lock().await.find(contact).cloned())
    }

    async fn insert_duplicate_link(
        &self,
        canonical_id: Option<i64>,
        contact: &ValidatedContact,
    ) -> StoreResult<()> {
        self.counters.insert_link.fetch_add(1, Ordering::Relaxed);
        self.tables.lock().await.push_link(canonical_id, contact)
    }

    async fn commit_batch(
        &self,
        uniques: &[ValidatedContact],
        duplicates: &[ValidatedContact],
    ) -> StoreResult<BatchOutcome> {
        self.counters.commit_batch.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.lock().await;

        // Work on a copy and swap it in only once everything succeeded.
        let mut staged = tables.clone();
        let mut outcome = BatchOutcome {
            canonical_inserted: staged.insert_canonical(uniques)?,
            ..BatchOutcome::default()
        };

        for (index, contact) in duplicates.iter().enumerate() {
            self.check_resolution()?;
            match staged.find(contact).map(|record| record.id) {
                Some(id) => {
                    staged.push_link(Some(id), contact)?;
                    outcome.links_written += 1;
                }
                None => outcome.unresolved.push(index),
            }
        }

        *tables = staged;
        Ok(outcome)
    }

    async fn page_canonical(&self, offset: u64, limit: u64) -> StoreResult<Vec<ContactRecord>> {
        self.counters.page_canonical.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.lock().await;
        page(&tables.companies, offset, limit)
    }

    async fn page_duplicate_links(
        &self,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<DuplicateLink>> {
        self.counters.page_links.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.lock().await;
        page(&tables.duplicates, offset, limit)
    }
}
