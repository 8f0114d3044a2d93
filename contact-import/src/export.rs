use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use csv::{Terminator, WriterBuilder};
use futures::stream::{self, Stream};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::ExportError;
use crate::metrics::inc;
use crate::metrics_consts::{EXPORT_PAGES, EXPORT_ROWS};
use crate::store::ContactStore;
use crate::types::{ContactRecord, DuplicateLink, ExportCategory, Source};

pub const DEFAULT_PAGE_SIZE: u64 = 500;

pub const EXPORT_HEADER: [&str; 4] = ["Company Name", "Email", "Phone Number", "Source"];

pub fn export_file_name(category: ExportCategory, now: DateTime<Utc>) -> String {
    format!(
        "export_{}_{}.csv",
        category.as_str(),
        now.format("%Y_%m_%d_%H_%M_%S")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Canonical { offset: u64 },
    Links { offset: u64 },
    Done,
}

/// Pages through the store and yields the export one CSV chunk per page, so
/// at most one page of records is held in memory.
///
/// Canonical records and duplicate links are read in ascending id order. For
/// [`ExportCategory::All`] both tables are emitted one after the other: a
/// canonical record that also has duplicate links shows up once per table.
pub struct ExportStreamer<S: ContactStore + ?Sized> {
    store: Arc<S>,
    category: ExportCategory,
    page_size: u64,
    phase: Phase,
    rows_written: u64,
}

impl<S: ContactStore + ?Sized> ExportStreamer<S> {
    pub fn new(store: Arc<S>, category: ExportCategory, page_size: u64) -> Self {
        Self {
            store,
            category,
            page_size: page_size.max(1),
            phase: Phase::Header,
            rows_written: 0,
        }
    }

    /// Data rows emitted so far, header excluded.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// The next chunk of CSV output, or `None` once the export is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ExportError> {
        loop {
            match self.phase {
                Phase::Header => {
                    self.phase = self.first_table();
                    return encode(std::iter::once(EXPORT_HEADER)).map(Some);
                }
                Phase::Canonical { offset } => {
                    let page = self.store.page_canonical(offset, self.page_size).await?;
                    self.phase = if (page.len() as u64) < self.page_size {
                        self.after_canonical()
                    } else {
                        Phase::Canonical {
                            offset: offset + self.page_size,
                        }
                    };
                    if page.is_empty() {
                        continue;
                    }
                    return self.emit_canonical(&page).map(Some);
                }
                Phase::Links { offset } => {
                    let page = self
                        .store
                        .page_duplicate_links(offset, self.page_size)
                        .await?;
                    self.phase = if (page.len() as u64) < self.page_size {
                        Phase::Done
                    } else {
                        Phase::Links {
                            offset: offset + self.page_size,
                        }
                    };
                    if page.is_empty() {
                        continue;
                    }
                    return self.emit_links(&page).map(Some);
                }
                Phase::Done => return Ok(None),
            }
        }
    }

    fn first_table(&self) -> Phase {
        match self.category {
            ExportCategory::All | ExportCategory::Unique => Phase::Canonical { offset: 0 },
            ExportCategory::Duplicates => Phase::Links { offset: 0 },
        }
    }

    fn after_canonical(&self) -> Phase {
        match self.category {
            ExportCategory::All => Phase::Links { offset: 0 },
            ExportCategory::Unique | ExportCategory::Duplicates => Phase::Done,
        }
    }

    fn emit_canonical(&mut self, page: &[ContactRecord]) -> Result<Bytes, ExportError> {
        let category = self.category;
        let chunk = encode(page.iter().map(|record| {
            let source = match category {
                ExportCategory::Unique => Source::Unique,
                _ => Source::for_record(record),
            };
            [
                record.company_name.as_str(),
                record.email.as_str(),
                record.phone_number.as_str(),
                source.as_str(),
            ]
        }))?;
        self.count_page(page.len(), "canonical");
        Ok(chunk)
    }

    fn emit_links(&mut self, page: &[DuplicateLink]) -> Result<Bytes, ExportError> {
        let chunk = encode(page.iter().map(|link| {
            [
                link.duplicate_company_name.as_str(),
                link.duplicate_email.as_str(),
                link.duplicate_phone_number.as_str(),
                Source::Duplicate.as_str(),
            ]
        }))?;
        self.count_page(page.len(), "duplicate_links");
        Ok(chunk)
    }

    fn count_page(&mut self, rows: usize, table: &str) {
        let rows = rows as u64;
        self.rows_written += rows;
        let labels = [
            ("table".to_string(), table.to_string()),
            ("category".to_string(), self.category.as_str().to_string()),
        ];
        inc(EXPORT_ROWS, &labels, rows);
        inc(EXPORT_PAGES, &labels, 1);
    }
}

fn encode<'a, I>(rows: I) -> Result<Bytes, ExportError>
where
    I: IntoIterator<Item = [&'a str; 4]>,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(Bytes::from(buffer))
}

/// The export as a stream of CSV chunks, suitable for a streaming response body.
pub fn export_stream<S>(
    store: Arc<S>,
    category: ExportCategory,
    page_size: u64,
) -> impl Stream<Item = Result<Bytes, ExportError>> + Send
where
    S: ContactStore + ?Sized + 'static,
{
    stream::try_unfold(
        ExportStreamer::new(store, category, page_size),
        |mut streamer| async move {
            let chunk = streamer.next_chunk().await?;
            Ok(chunk.map(|chunk| (chunk, streamer)))
        },
    )
}

/// Writes the full export into `sink` and returns the number of data rows.
pub async fn export_to<S, W>(
    store: Arc<S>,
    category: ExportCategory,
    page_size: u64,
    sink: &mut W,
) -> Result<u64, ExportError>
where
    S: ContactStore + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut streamer = ExportStreamer::new(store, category, page_size);
    while let Some(chunk) = streamer.next_chunk().await? {
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    Ok(streamer.rows_written())
}
