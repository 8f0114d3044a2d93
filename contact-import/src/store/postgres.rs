use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions};
use sqlx::FromRow;

use super::{BatchOutcome, ContactStore, StoreError, StoreResult};
use crate::metrics::timing_guard;
use crate::metrics_consts::STORE_QUERY_DURATION;
use crate::types::{ContactRecord, DuplicateLink, ValidatedContact};

// SQLSTATE 23505
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres implementation of [`ContactStore`], backed by the `companies` and
/// `company_duplicates` tables from `migrations/`.
#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[derive(Debug, Clone, FromRow)]
struct CompanyRow {
    id: i64,
    company_name: String,
    email: String,
    phone_number: String,
    is_duplicate: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CompanyRow> for ContactRecord {
    fn from(row: CompanyRow) -> Self {
        ContactRecord {
            id: row.id,
            company_name: row.company_name,
            email: row.email,
            phone_number: row.phone_number,
            is_duplicate: row.is_duplicate,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct CompanyDuplicateRow {
    id: i64,
    company_id: Option<i64>,
    duplicate_company_name: String,
    duplicate_email: String,
    duplicate_phone_number: String,
}

impl From<CompanyDuplicateRow> for DuplicateLink {
    fn from(row: CompanyDuplicateRow) -> Self {
        DuplicateLink {
            id: row.id,
            company_id: row.company_id,
            duplicate_company_name: row.duplicate_company_name,
            duplicate_email: row.duplicate_email,
            duplicate_phone_number: row.duplicate_phone_number,
        }
    }
}

fn read_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::PoolExhausted,
        _ => StoreError::Query(err.to_string()),
    }
}

fn write_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::PoolExhausted,
        sqlx::Error::Database(db_error)
            if db_error.code().as_deref() == Some(UNIQUE_VIOLATION) =>
        {
            StoreError::UniqueViolation(db_error.message().to_string())
        }
        _ => StoreError::Write(err.to_string()),
    }
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|e| StoreError::Query(e.to_string()))
}

async fn insert_canonical<'e, E>(executor: E, contacts: &[ValidatedContact]) -> StoreResult<u64>
where
    E: PgExecutor<'e>,
{
    if contacts.is_empty() {
        return Ok(0);
    }

    let labels = [("operation".to_string(), "bulk_insert_canonical".to_string())];
    let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

    let names: Vec<&str> = contacts.iter().map(|c| c.company_name.as_str()).collect();
    let emails: Vec<&str> = contacts.iter().map(|c| c.email.as_str()).collect();
    let phones: Vec<&str> = contacts.iter().map(|c| c.phone_number.as_str()).collect();

    // A single statement, so the batch lands entirely or not at all. Ids
    // follow input order.
    let result = sqlx::query(
        r#"
        INSERT INTO companies (company_name, email, phone_number, is_duplicate, created_at, updated_at)
            SELECT t.company_name, t.email, t.phone_number, false, now(), now()
            FROM UNNEST($1::text[], $2::text[], $3::text[])
                WITH ORDINALITY AS t(company_name, email, phone_number, ord)
            ORDER BY t.ord
        "#,
    )
    .bind(&names)
    .bind(&emails)
    .bind(&phones)
    .execute(executor)
    .await
    .map_err(write_error)?;

    Ok(result.rows_affected())
}

async fn select_canonical<'e, E>(
    executor: E,
    contact: &ValidatedContact,
) -> StoreResult<Option<ContactRecord>>
where
    E: PgExecutor<'e>,
{
    let labels = [("operation".to_string(), "find_canonical".to_string())];
    let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

    let row = sqlx::query_as::<_, CompanyRow>(
        r#"
        SELECT id, company_name, email, phone_number, is_duplicate, created_at, updated_at
        FROM companies
        WHERE lower(company_name) = lower($1)
          AND lower(email) = lower($2)
          AND phone_number = $3
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(&contact.company_name)
    .bind(&contact.email)
    .bind(&contact.phone_number)
    .fetch_optional(executor)
    .await
    .map_err(read_error)?;

    Ok(row.map(ContactRecord::from))
}

async fn insert_link<'e, E>(
    executor: E,
    canonical_id: Option<i64>,
    contact: &ValidatedContact,
) -> StoreResult<()>
where
    E: PgExecutor<'e>,
{
    let labels = [("operation".to_string(), "insert_duplicate_link".to_string())];
    let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

    sqlx::query(
        r#"
        INSERT INTO company_duplicates
            (company_id, duplicate_company_name, duplicate_email, duplicate_phone_number, created_at, updated_at)
        VALUES ($1, $2, $3, $4, now(), now())
        "#,
    )
    .bind(canonical_id)
    .bind(&contact.company_name)
    .bind(&contact.email)
    .bind(&contact.phone_number)
    .execute(executor)
    .await
    .map_err(write_error)?;

    Ok(())
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn exists_contact(&self, contact: &ValidatedContact) -> StoreResult<bool> {
        let labels = [("operation".to_string(), "exists_contact".to_string())];
        let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM companies
                WHERE lower(company_name) = lower($1)
                  AND lower(email) = lower($2)
                  AND phone_number = $3
            )
            "#,
        )
        .bind(&contact.company_name)
        .bind(&contact.email)
        .bind(&contact.phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(read_error)
    }

    async fn bulk_insert_canonical(&self, contacts: &[ValidatedContact]) -> StoreResult<u64> {
        insert_canonical(&self.pool, contacts).await
    }

    async fn find_canonical(
        &self,
        contact: &ValidatedContact,
    ) -> StoreResult<Option<ContactRecord>> {
        select_canonical(&self.pool, contact).await
    }

    async fn insert_duplicate_link(
        &self,
        canonical_id: Option<i64>,
        contact: &ValidatedContact,
    ) -> StoreResult<()> {
        insert_link(&self.pool, canonical_id, contact).await
    }

    async fn commit_batch(
        &self,
        uniques: &[ValidatedContact],
        duplicates: &[ValidatedContact],
    ) -> StoreResult<BatchOutcome> {
        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await.map_err(read_error)?;

        let mut outcome = BatchOutcome {
            canonical_inserted: insert_canonical(&mut *tx, uniques).await?,
            ..BatchOutcome::default()
        };

        for (index, contact) in duplicates.iter().enumerate() {
            match select_canonical(&mut *tx, contact).await? {
                Some(canonical) => {
                    insert_link(&mut *tx, Some(canonical.id), contact).await?;
                    outcome.links_written += 1;
                }
                None => outcome.unresolved.push(index),
            }
        }

        tx.commit().await.map_err(write_error)?;
        Ok(outcome)
    }

    async fn page_canonical(&self, offset: u64, limit: u64) -> StoreResult<Vec<ContactRecord>> {
        let labels = [("operation".to_string(), "page_canonical".to_string())];
        let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

        let rows = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT id, company_name, email, phone_number, is_duplicate, created_at, updated_at
            FROM companies
            ORDER BY id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(to_i64(offset)?)
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn page_duplicate_links(
        &self,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<DuplicateLink>> {
        let labels = [("operation".to_string(), "page_duplicate_links".to_string())];
        let _timer = timing_guard(STORE_QUERY_DURATION, &labels);

        let rows = sqlx::query_as::<_, CompanyDuplicateRow>(
            r#"
            SELECT id, company_id, duplicate_company_name, duplicate_email, duplicate_phone_number
            FROM company_duplicates
            ORDER BY id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(to_i64(offset)?)
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        Ok(rows.into_iter().map(DuplicateLink::from).collect())
    }
}
