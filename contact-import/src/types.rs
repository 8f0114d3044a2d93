use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// The three columns every upload must carry, in header order.
pub const REQUIRED_COLUMNS: [Field; 3] = [Field::CompanyName, Field::Email, Field::PhoneNumber];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CompanyName,
    Email,
    PhoneNumber,
}

impl Field {
    pub fn column(&self) -> &'static str {
        match self {
            Field::CompanyName => "company_name",
            Field::Email => "email",
            Field::PhoneNumber => "phone_number",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One CSV line keyed by the header's column names, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(cells: Vec<(String, String)>) -> Self {
        Self { cells }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<(String, String)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

// Serialized as a JSON object that keeps the header's column order.
impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedContact {
    pub company_name: String,
    pub email: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Field,
    pub message: String,
}

impl FieldError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of classifying a single data row. Exactly one per input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Unique(ValidatedContact),
    DuplicateInFile {
        contact: ValidatedContact,
        first_seen_row: u64,
    },
    DuplicateInStore(ValidatedContact),
    Invalid {
        row: RawRow,
        errors: Vec<FieldError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueRow {
    pub row: u64,
    #[serde(flatten)]
    pub contact: ValidatedContact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DuplicateKind {
    InFile {
        #[serde(rename = "duplicate_of")]
        first_seen_row: u64,
    },
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRow {
    pub row: u64,
    #[serde(flatten)]
    pub kind: DuplicateKind,
    #[serde(rename = "data")]
    pub contact: ValidatedContact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRow {
    pub row: u64,
    pub errors: Vec<FieldError>,
    pub data: RawRow,
}

/// The categorized result of one ingestion call. Buckets keep file order and
/// the counts are always read off the bucket lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub rows_processed: u64,
    pub unique_records: Vec<UniqueRow>,
    pub duplicates: Vec<DuplicateRow>,
    pub invalid_rows: Vec<InvalidRow>,
}

impl IngestionReport {
    pub fn record(&mut self, row: u64, classification: Classification) {
        self.rows_processed += 1;
        match classification {
            Classification::Unique(contact) => {
                self.unique_records.push(UniqueRow { row, contact });
            }
            Classification::DuplicateInFile {
                contact,
                first_seen_row,
            } => self.duplicates.push(DuplicateRow {
                row,
                kind: DuplicateKind::InFile { first_seen_row },
                contact,
            }),
            Classification::DuplicateInStore(contact) => self.duplicates.push(DuplicateRow {
                row,
                kind: DuplicateKind::Store,
                contact,
            }),
            Classification::Invalid { row: data, errors } => {
                self.invalid_rows.push(InvalidRow { row, errors, data });
            }
        }
    }

    pub fn unique_count(&self) -> usize {
        self.unique_records.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_rows.len()
    }
}

impl Serialize for IngestionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(7))?;
        map.serialize_entry("rows_processed", &self.rows_processed)?;
        map.serialize_entry("unique_count", &self.unique_count())?;
        map.serialize_entry("duplicate_count", &self.duplicate_count())?;
        map.serialize_entry("invalid_count", &self.invalid_count())?;
        map.serialize_entry("unique_records", &self.unique_records)?;
        map.serialize_entry("duplicates", &self.duplicates)?;
        map.serialize_entry("invalid_rows", &self.invalid_rows)?;
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub canonical_inserted: u64,
    pub links_written: u64,
    /// Duplicates whose canonical record could not be resolved at commit time.
    /// They are not persisted and not treated as an error.
    pub links_dropped: u64,
}

/// A persisted canonical contact (the `companies` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRecord {
    pub id: i64,
    pub company_name: String,
    pub email: String,
    pub phone_number: String,
    /// Never set by the import pipeline.
    pub is_duplicate: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted duplicate entry (the `company_duplicates` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateLink {
    pub id: i64,
    pub company_id: Option<i64>,
    pub duplicate_company_name: String,
    pub duplicate_email: String,
    pub duplicate_phone_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCategory {
    All,
    Unique,
    Duplicates,
}

impl ExportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportCategory::All => "all",
            ExportCategory::Unique => "unique",
            ExportCategory::Duplicates => "duplicates",
        }
    }
}

/// Value of the export's `Source` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Unique,
    Duplicate,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Unique => "unique",
            Source::Duplicate => "duplicate",
        }
    }

    pub fn for_record(record: &ContactRecord) -> Self {
        if record.is_duplicate {
            Source::Duplicate
        } else {
            Source::Unique
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact(name: &str) -> ValidatedContact {
        ValidatedContact {
            company_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone_number: "1234567".to_string(),
        }
    }

    #[test]
    fn counts_follow_bucket_lengths() {
        let mut report = IngestionReport::default();
        report.record(2, Classification::Unique(contact("Alpha")));
        report.record(
            3,
            Classification::DuplicateInFile {
                contact: contact("Alpha"),
                first_seen_row: 2,
            },
        );
        report.record(4, Classification::DuplicateInStore(contact("Beta")));
        report.record(
            5,
            Classification::Invalid {
                row: RawRow::default(),
                errors: vec![FieldError::new(Field::Email, "bad")],
            },
        );

        assert_eq!(report.rows_processed, 4);
        assert_eq!(report.unique_count(), 1);
        assert_eq!(report.duplicate_count(), 2);
        assert_eq!(report.invalid_count(), 1);
        assert_eq!(
            report.rows_processed as usize,
            report.unique_count() + report.duplicate_count() + report.invalid_count()
        );
    }

    #[test]
    fn report_serializes_duplicate_kinds() {
        let mut report = IngestionReport::default();
        report.record(
            4,
            Classification::DuplicateInFile {
                contact: contact("Alpha"),
                first_seen_row: 2,
            },
        );
        report.record(5, Classification::DuplicateInStore(contact("Beta")));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["duplicate_count"], 2);
        assert_eq!(
            value["duplicates"][0],
            json!({
                "row": 4,
                "type": "in_file",
                "duplicate_of": 2,
                "data": {
                    "company_name": "Alpha",
                    "email": "alpha@example.com",
                    "phone_number": "1234567",
                }
            })
        );
        assert_eq!(value["duplicates"][1]["type"], "store");
        assert!(value["duplicates"][1].get("duplicate_of").is_none());
    }

    #[test]
    fn raw_row_keeps_header_order() {
        let row: RawRow = vec![
            ("phone_number".to_string(), "1".to_string()),
            ("company_name".to_string(), "A".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(row.get("company_name"), Some("A"));
        assert_eq!(row.get("email"), None);
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"phone_number":"1","company_name":"A"}"#
        );
    }
}
