pub const ROWS_CLASSIFIED: &str = "contact_import_rows_total";
pub const INGEST_DURATION: &str = "contact_import_ingest_duration_ms";
pub const COMMIT_DURATION: &str = "contact_import_commit_duration_ms";
pub const CANONICAL_INSERTED: &str = "contact_import_canonical_inserted_total";
pub const LINKS_WRITTEN: &str = "contact_import_links_written_total";
pub const LINKS_DROPPED: &str = "contact_import_links_dropped_total";
pub const EXPORT_ROWS: &str = "contact_import_export_rows_total";
pub const EXPORT_PAGES: &str = "contact_import_export_pages_total";
pub const STORE_QUERY_DURATION: &str = "contact_import_store_query_duration_ms";
pub const HTTP_REQUESTS: &str = "contact_import_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "contact_import_http_request_duration_seconds";
