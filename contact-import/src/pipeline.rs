use std::io::Read;

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use tracing::{debug, info};

use crate::dedup::{DedupKey, InBatchTracker};
use crate::errors::ImportError;
use crate::metrics::{inc, timing_guard};
use crate::metrics_consts::{INGEST_DURATION, ROWS_CLASSIFIED};
use crate::store::ContactStore;
use crate::types::{Classification, Field, FieldError, IngestionReport, RawRow, REQUIRED_COLUMNS};
use crate::validation::validate;

/// The header occupies row 1, so the first data row is row 2. Rows count CSV
/// records: blank lines are skipped by the reader and get no number, and a
/// quoted field spanning several lines is still one row.
const FIRST_DATA_ROW: u64 = 2;

/// Parses, validates and classifies every data row of a CSV upload, in order.
///
/// Rows are checked against earlier rows of the same file before the store is
/// asked, so an in-file duplicate never costs a store round-trip and is never
/// reported as a store duplicate. A store failure aborts the whole call.
pub async fn ingest<R, S>(input: R, store: &S) -> Result<IngestionReport, ImportError>
where
    R: Read + Send,
    S: ContactStore + ?Sized,
{
    let timer = timing_guard(INGEST_DURATION, &[]);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let header = reader
        .headers()
        .map_err(|e| ImportError::MalformedInput(format!("unreadable header row: {e}")))?
        .clone();
    if header.is_empty() {
        return Err(ImportError::MalformedInput(
            "missing header row".to_string(),
        ));
    }

    let mut report = IngestionReport::default();
    let mut tracker = InBatchTracker::new();
    let mut record = ByteRecord::new();
    let mut row_number = FIRST_DATA_ROW;

    // Byte records, so that a badly encoded row is reported on its own
    // instead of failing the upload.
    while reader.read_byte_record(&mut record).map_err(|e| {
        ImportError::MalformedInput(format!("unreadable input at row {row_number}: {e}"))
    })? {
        let classification = classify(&header, &record, row_number, &mut tracker, store).await?;
        debug!(row = row_number, ?classification, "classified row");
        inc(
            ROWS_CLASSIFIED,
            &[(
                "classification".to_string(),
                classification_label(&classification).to_string(),
            )],
            1,
        );
        report.record(row_number, classification);
        row_number += 1;
    }

    info!(
        rows_processed = report.rows_processed,
        unique = report.unique_count(),
        duplicates = report.duplicate_count(),
        invalid = report.invalid_count(),
        "ingested csv"
    );
    timer.fin();

    Ok(report)
}

async fn classify<S>(
    header: &StringRecord,
    record: &ByteRecord,
    row_number: u64,
    tracker: &mut InBatchTracker,
    store: &S,
) -> Result<Classification, ImportError>
where
    S: ContactStore + ?Sized,
{
    let mut undecodable = Vec::new();
    let row: RawRow = header
        .iter()
        .zip(record.iter())
        .map(|(name, value)| {
            let value = match std::str::from_utf8(value) {
                Ok(value) => value.to_string(),
                Err(_) => {
                    undecodable.push(name);
                    String::from_utf8_lossy(value).into_owned()
                }
            };
            (name.to_string(), value)
        })
        .collect();

    if record.len() != header.len() {
        let message = format!(
            "The row has {} columns but the header has {}.",
            record.len(),
            header.len()
        );
        let errors = REQUIRED_COLUMNS
            .iter()
            .map(|field| FieldError::new(*field, message.clone()))
            .collect();
        return Ok(Classification::Invalid { row, errors });
    }

    // Undecodable bytes in an ignored column do not matter.
    let badly_encoded: Vec<Field> = REQUIRED_COLUMNS
        .into_iter()
        .filter(|field| undecodable.contains(&field.column()))
        .collect();

    let contact = match validate(&row) {
        Ok(_) if !badly_encoded.is_empty() => {
            let errors = encoding_errors(&badly_encoded, Vec::new());
            return Ok(Classification::Invalid { row, errors });
        }
        Ok(contact) => contact,
        Err(errors) => {
            let errors = encoding_errors(&badly_encoded, errors);
            return Ok(Classification::Invalid { row, errors });
        }
    };

    let key = DedupKey::build(&contact);
    if let Some(first_seen_row) = tracker.check(&key) {
        return Ok(Classification::DuplicateInFile {
            contact,
            first_seen_row,
        });
    }

    if store
        .exists_contact(&contact)
        .await
        .map_err(ImportError::StoreQuery)?
    {
        return Ok(Classification::DuplicateInStore(contact));
    }

    tracker.record(key, row_number);
    Ok(Classification::Unique(contact))
}

/// Replaces the rule errors of every badly encoded field with a single
/// encoding error, keeping the required-column order.
fn encoding_errors(badly_encoded: &[Field], rule_errors: Vec<FieldError>) -> Vec<FieldError> {
    if badly_encoded.is_empty() {
        return rule_errors;
    }

    let mut errors: Vec<FieldError> = rule_errors
        .into_iter()
        .filter(|error| !badly_encoded.contains(&error.field))
        .chain(badly_encoded.iter().map(|field| {
            FieldError::new(*field, format!("The {field} field must be valid UTF-8 text."))
        }))
        .collect();
    errors.sort_by_key(|error| REQUIRED_COLUMNS.iter().position(|f| *f == error.field));
    errors
}

fn classification_label(classification: &Classification) -> &'static str {
    match classification {
        Classification::Unique(_) => "unique",
        Classification::DuplicateInFile { .. } => "duplicate_in_file",
        Classification::DuplicateInStore(_) => "duplicate_in_store",
        Classification::Invalid { .. } => "invalid",
    }
}
