use tracing::{info, warn};

use crate::errors::ImportError;
use crate::metrics::{inc, timing_guard};
use crate::metrics_consts::{CANONICAL_INSERTED, COMMIT_DURATION, LINKS_DROPPED, LINKS_WRITTEN};
use crate::store::{ContactStore, StoreError};
use crate::types::{CommitSummary, IngestionReport, ValidatedContact};

/// Persists an ingestion report as a single unit of work.
///
/// Unique contacts go in first. Every duplicate, in file or in store, is then
/// resolved against the store again (in-file duplicates only have a canonical
/// record once the uniques have landed) and written as a link to it.
///
/// A duplicate whose canonical record cannot be resolved is dropped: it is
/// logged and counted in `links_dropped`, but does not fail the commit. Any
/// store error, including an identity-constraint violation, fails the whole
/// call and leaves the store as it was, so the same file can be retried.
pub async fn commit<S>(report: &IngestionReport, store: &S) -> Result<CommitSummary, ImportError>
where
    S: ContactStore + ?Sized,
{
    if report.unique_records.is_empty() && report.duplicates.is_empty() {
        return Ok(CommitSummary::default());
    }

    let timer = timing_guard(COMMIT_DURATION, &[]);

    let uniques: Vec<ValidatedContact> = report
        .unique_records
        .iter()
        .map(|unique| unique.contact.clone())
        .collect();
    let duplicates: Vec<ValidatedContact> = report
        .duplicates
        .iter()
        .map(|duplicate| duplicate.contact.clone())
        .collect();

    let outcome = store
        .commit_batch(&uniques, &duplicates)
        .await
        .map_err(commit_error)?;

    for &index in &outcome.unresolved {
        if let Some(duplicate) = report.duplicates.get(index) {
            warn!(
                row = duplicate.row,
                kind = ?duplicate.kind,
                "no canonical record for duplicate, dropping it"
            );
        }
    }

    let summary = CommitSummary {
        canonical_inserted: outcome.canonical_inserted,
        links_written: outcome.links_written,
        links_dropped: outcome.unresolved.len() as u64,
    };

    inc(CANONICAL_INSERTED, &[], summary.canonical_inserted);
    inc(LINKS_WRITTEN, &[], summary.links_written);
    inc(LINKS_DROPPED, &[], summary.links_dropped);
    info!(
        canonical_inserted = summary.canonical_inserted,
        links_written = summary.links_written,
        links_dropped = summary.links_dropped,
        "committed ingestion report"
    );
    timer.fin();

    Ok(summary)
}

/// Lookups that fail are the store being unavailable; anything else went
/// wrong while writing.
fn commit_error(err: StoreError) -> ImportError {
    match err {
        StoreError::Query(_) | StoreError::PoolExhausted => ImportError::StoreQuery(err),
        StoreError::Write(_) | StoreError::UniqueViolation(_) => ImportError::StoreWrite(err),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::ingest;
    use crate::store::memory::MemoryStore;
    use crate::store::{BatchOutcome, StoreResult};
    use crate::types::{Classification, ContactRecord, DuplicateLink};

    fn contact(name: &str) -> ValidatedContact {
        ValidatedContact {
            company_name: name.to_string(),
            email: format!("{}@x.com", name.to_lowercase()),
            phone_number: "1234567".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_uniques_and_links_in_file_duplicates() {
        let store = MemoryStore::new();
        let input = "company_name,email,phone_number\n\
                     Alpha,a@x.com,1234567\n\
                     Beta,b@x.com,7654321\n\
                     Alpha,a@x.com,1234567\n\
                     Bad,not-an-email,abc\n";

        let report = ingest(input.as_bytes(), &store).await.unwrap();
        let summary = commit(&report, &store).await.unwrap();

        assert_eq!(
            summary,
            CommitSummary {
                canonical_inserted: 2,
                links_written: 1,
                links_dropped: 0,
            }
        );
        assert_eq!(store.canonical_count().await, 2);

        let links = store.page_duplicate_links(0, 10).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].company_id, Some(1));
        assert_eq!(links[0].duplicate_company_name, "Alpha");
    }

    #[tokio::test]
    async fn reingesting_turns_uniques_into_store_duplicates() {
        let store = MemoryStore::new();
        let input = "company_name,email,phone_number\n\
                     Alpha,a@x.com,1234567\n\
                     Beta,b@x.com,7654321\n";

        let first = ingest(input.as_bytes(), &store).await.unwrap();
        commit(&first, &store).await.unwrap();
        assert_eq!(first.unique_count(), 2);

        let second = ingest(input.as_bytes(), &store).await.unwrap();
        assert_eq!(second.unique_count(), 0);
        assert_eq!(second.duplicate_count(), 2);

        let summary = commit(&second, &store).await.unwrap();
        assert_eq!(summary.canonical_inserted, 0);
        assert_eq!(summary.links_written, 2);
        assert_eq!(store.canonical_count().await, 2);
        assert_eq!(store.calls().commit_batch, 2);
    }

    #[tokio::test]
    async fn unresolvable_duplicates_are_dropped_silently() {
        let store = MemoryStore::new();
        store.bulk_insert_canonical(&[contact("Alpha")]).await.unwrap();

        let input = "company_name,email,phone_number\nAlpha,alpha@x.com,1234567\n";
        let report = ingest(input.as_bytes(), &store).await.unwrap();
        assert_eq!(report.duplicate_count(), 1);

        // The canonical record disappears between classification and commit.
        assert!(store.remove_canonical(1).await);

        let summary = commit(&report, &store).await.unwrap();
        assert_eq!(summary.links_written, 0);
        assert_eq!(summary.links_dropped, 1);
        assert_eq!(store.duplicate_link_count().await, 0);
        // The report handed back to the caller is untouched.
        assert_eq!(report.duplicate_count(), 1);
    }

    #[tokio::test]
    async fn identity_conflict_on_bulk_insert_is_fatal() {
        let store = MemoryStore::new();
        let mut report = IngestionReport::default();
        report.record(2, Classification::Unique(contact("Alpha")));
        report.record(3, Classification::Unique(contact("Alpha")));

        let err = commit(&report, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::StoreWrite(StoreError::UniqueViolation(_))
        ));
        assert_eq!(store.canonical_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_import_race_surfaces_as_conflict() {
        let store = MemoryStore::new();
        let input = "company_name,email,phone_number\nAlpha,alpha@x.com,1234567\n";

        // Both runs pass the existence check before either commits.
        let first = ingest(input.as_bytes(), &store).await.unwrap();
        let second = ingest(input.as_bytes(), &store).await.unwrap();

        commit(&first, &store).await.unwrap();
        let err = commit(&second, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::StoreWrite(StoreError::UniqueViolation(_))
        ));
        assert_eq!(store.canonical_count().await, 1);
    }

    #[tokio::test]
    async fn failed_resolution_rolls_back_the_whole_commit() {
        let store = MemoryStore::new();
        let input = "company_name,email,phone_number\n\
                     Alpha,a@x.com,1234567\n\
                     Alpha,a@x.com,1234567\n";
        let report = ingest(input.as_bytes(), &store).await.unwrap();
        assert_eq!(report.unique_count(), 1);
        assert_eq!(report.duplicate_count(), 1);

        store.set_resolution_failure(true);
        let err = commit(&report, &store).await.unwrap_err();
        assert!(matches!(err, ImportError::StoreQuery(StoreError::Query(_))));
        assert_eq!(store.canonical_count().await, 0);
        assert_eq!(store.duplicate_link_count().await, 0);

        // Retrying the same file classifies it exactly as the first time.
        store.set_resolution_failure(false);
        let retry = ingest(input.as_bytes(), &store).await.unwrap();
        assert_eq!(retry, report);
        let summary = commit(&retry, &store).await.unwrap();
        assert_eq!(summary.canonical_inserted, 1);
        assert_eq!(summary.links_written, 1);
    }

    #[tokio::test]
    async fn empty_report_makes_no_store_calls() {
        let store = MemoryStore::new();
        let summary = commit(&IngestionReport::default(), &store).await.unwrap();
        assert_eq!(summary, CommitSummary::default());
        assert_eq!(store.calls().total(), 0);
    }

    /// Store whose lookups always fail.
    struct UnavailableStore;

    #[async_trait]
    impl ContactStore for UnavailableStore {
        async fn exists_contact(&self, _: &ValidatedContact) -> StoreResult<bool> {
            Err(StoreError::PoolExhausted)
        }

        async fn bulk_insert_canonical(&self, contacts: &[ValidatedContact]) -> StoreResult<u64> {
            Ok(contacts.len() as u64)
        }

        async fn find_canonical(&self, _: &ValidatedContact) -> StoreResult<Option<ContactRecord>> {
            Err(StoreError::Query("connection reset".to_string()))
        }

        async fn insert_duplicate_link(
            &self,
            _: Option<i64>,
            _: &ValidatedContact,
        ) -> StoreResult<()> {
            Ok(())
        }

        async fn commit_batch(
            &self,
            _: &[ValidatedContact],
            _: &[ValidatedContact],
        ) -> StoreResult<BatchOutcome> {
            Err(StoreError::Query("connection reset".to_string()))
        }

        async fn page_canonical(&self, _: u64, _: u64) -> StoreResult<Vec<ContactRecord>> {
            Ok(Vec::new())
        }

        async fn page_duplicate_links(&self, _: u64, _: u64) -> StoreResult<Vec<DuplicateLink>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn store_failures_abort_the_call() {
        let input = "company_name,email,phone_number\nAlpha,a@x.com,1234567\n";
        let err = ingest(input.as_bytes(), &UnavailableStore)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::StoreQuery(StoreError::PoolExhausted)
        ));

        let mut report = IngestionReport::default();
        report.record(2, Classification::DuplicateInStore(contact("Alpha")));
        let err = commit(&report, &UnavailableStore).await.unwrap_err();
        assert!(matches!(err, ImportError::StoreQuery(StoreError::Query(_))));
    }
}
