//! CSV Tick Sink
//!
//! Append-only CSV log with a fixed positional schema:
//!
//! ```text
//! timestamp_microseconds,sequence_number,type,product_id,price,best_bid,best_ask,mid_price,price_ema,mid_price_ema
//! ```
//!
//! The timestamp is the UTC capture time with microsecond precision. Prices
//! are written with 2 decimals, EMAs with 6. Each row is written under the
//! sink mutex and flushed before `append` returns. A row that fails part way
//! is truncated away, so a failed append leaves the file byte-identical.
//!
//! Reopening an existing log continues it: the header must match, a torn
//! final row from a crash is cut off, and [`CsvTickSink::last_sequence`]
//! reports the last persisted sequence number so numbering can resume.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::application::ports::{SinkError, TickSink};
use crate::domain::tick::EnrichedTick;

/// Column header, written once per file.
pub const CSV_HEADER: &str = "timestamp_microseconds,sequence_number,type,product_id,price,best_bid,best_ask,mid_price,price_ema,mid_price_ema";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Bytes read from the end of an existing log to find its last row.
const TAIL_WINDOW: u64 = 64 * 1024;

struct CsvFile {
    file: File,
    header_written: bool,
}

/// File-backed [`TickSink`].
pub struct CsvTickSink {
    path: PathBuf,
    sync_on_append: bool,
    inner: Mutex<CsvFile>,
    last_sequence: u64,
    records_written: AtomicU64,
}

impl std::fmt::Debug for CsvTickSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvTickSink")
            .field("path", &self.path)
            .field("sync_on_append", &self.sync_on_append)
            .field("last_sequence", &self.last_sequence)
            .field("records_written", &self.records_written())
            .finish_non_exhaustive()
    }
}

impl CsvTickSink {
    /// Open (or create) `path` for appending and make sure it has a header.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::OpenFailed` if the file cannot be opened, is not
    /// a tick log, or its torn tail cannot be cut off, and
    /// `SinkError::WriteFailed` if the header cannot be written.
    pub fn open(path: impl AsRef<Path>, sync_on_append: bool) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let open_failed = |source| SinkError::OpenFailed {
            path: path.display().to_string(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(open_failed)?;
        let existing_len = file.metadata().map_err(open_failed)?.len();
        let existing = inspect_existing(&mut file, existing_len).map_err(open_failed)?;

        if existing.valid_len < existing_len {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = existing_len - existing.valid_len,
                "Cutting off torn final row"
            );
            file.set_len(existing.valid_len).map_err(open_failed)?;
        }

        let sink = Self {
            sync_on_append,
            inner: Mutex::new(CsvFile {
                file,
                header_written: existing.valid_len > 0,
            }),
            last_sequence: existing.last_sequence,
            records_written: AtomicU64::new(0),
            path,
        };
        sink.write_header()?;

        tracing::info!(
            path = %sink.path.display(),
            resumed = existing.valid_len > 0,
            last_sequence = existing.last_sequence,
            sync_on_append,
            "CSV sink opened"
        );
        Ok(sink)
    }

    /// Output file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of the last row already in the file when it was
    /// opened (0 for a new file).
    #[must_use]
    pub const fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Write the header unless it is already present.
    ///
    /// Returns whether the header was written by this call.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::WriteFailed` if the write or flush fails.
    pub fn write_header(&self) -> Result<bool, SinkError> {
        let mut inner = self.inner.lock();
        Self::ensure_header(&mut inner, self.sync_on_append)
    }

    fn ensure_header(inner: &mut CsvFile, sync: bool) -> Result<bool, SinkError> {
        if inner.header_written {
            return Ok(false);
        }

        let header = format!("{CSV_HEADER}\n");
        append_whole(&mut inner.file, header.as_bytes(), sync).map_err(|source| {
            SinkError::WriteFailed {
                sequence_number: 0,
                source,
            }
        })?;
        inner.header_written = true;
        Ok(true)
    }
}

impl TickSink for CsvTickSink {
    fn append(&self, tick: &EnrichedTick) -> Result<(), SinkError> {
        let row = format_row(tick);

        let mut inner = self.inner.lock();
        Self::ensure_header(&mut inner, self.sync_on_append)?;
        append_whole(&mut inner.file, row.as_bytes(), self.sync_on_append).map_err(|source| {
            SinkError::WriteFailed {
                sequence_number: tick.sequence_number,
                source,
            }
        })?;
        drop(inner);

        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        inner
            .file
            .flush()
            .and_then(|()| inner.file.sync_data())
            .map_err(|source| SinkError::WriteFailed {
                sequence_number: 0,
                source,
            })
    }

    fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

// =============================================================================
// All-or-nothing appends
// =============================================================================

/// Append-only storage that can be cut back to an earlier length.
trait RowTarget: Write {
    fn end_offset(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl RowTarget for File {
    fn end_offset(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `bytes` completely or not at all.
///
/// On a write, flush or sync error the target is truncated back to its
/// length before the call and the original error is returned.
fn append_whole<T: RowTarget>(target: &mut T, bytes: &[u8], sync: bool) -> io::Result<()> {
    let start = target.end_offset()?;

    let written = target
        .write_all(bytes)
        .and_then(|()| target.flush())
        .and_then(|()| if sync { target.sync() } else { Ok(()) });

    if let Err(e) = written {
        if let Err(rollback) = target.truncate_to(start) {
            tracing::error!(
                error = %rollback,
                offset = start,
                "Failed to cut off partially written row"
            );
        }
        return Err(e);
    }
    Ok(())
}

// =============================================================================
// Resuming an existing log
// =============================================================================

/// What an existing log contributes to a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExistingLog {
    /// Length up to the end of the last complete line.
    valid_len: u64,
    /// Sequence number of the last complete row (0 if none).
    last_sequence: u64,
}

impl ExistingLog {
    const EMPTY: Self = Self {
        valid_len: 0,
        last_sequence: 0,
    };
}

fn invalid_log(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

/// Validate the header of an existing log and locate its last complete row.
fn inspect_existing<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<ExistingLog> {
    if len == 0 {
        return Ok(ExistingLog::EMPTY);
    }

    let header_line = format!("{CSV_HEADER}\n");
    let header_len = header_line.len() as u64;

    let mut head = vec![0; header_line.len().min(usize::try_from(len).unwrap_or(usize::MAX))];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut head)?;

    if len < header_len {
        // Crashed while writing the header.
        return if header_line.as_bytes().starts_with(&head) {
            Ok(ExistingLog::EMPTY)
        } else {
            Err(invalid_log("file is not a tick log: header mismatch"))
        };
    }
    if head != header_line.as_bytes() {
        return Err(invalid_log("file is not a tick log: header mismatch"));
    }

    let data_len = len - header_len;
    let window = data_len.min(TAIL_WINDOW);
    let whole_body = window == data_len;
    #[allow(clippy::cast_possible_truncation)]
    let mut tail = vec![0; window as usize];
    reader.seek(SeekFrom::Start(len - window))?;
    reader.read_exact(&mut tail)?;

    let complete = match tail.iter().rposition(|&b| b == b'\n') {
        Some(i) => i + 1,
        None if whole_body => 0,
        None => return Err(invalid_log("no complete row near the end of the file")),
    };
    let valid_len = len - (tail.len() - complete) as u64;

    if complete == 0 {
        return Ok(ExistingLog {
            valid_len,
            last_sequence: 0,
        });
    }

    let rows = &tail[..complete - 1];
    let row_start = match rows.iter().rposition(|&b| b == b'\n') {
        Some(i) => i + 1,
        None if whole_body => 0,
        None => return Err(invalid_log("no complete row near the end of the file")),
    };

    let last_sequence = std::str::from_utf8(&rows[row_start..])
        .ok()
        .and_then(|row| row.split(',').nth(1))
        .and_then(|field| field.parse::<u64>().ok())
        .ok_or_else(|| invalid_log("last row has no sequence number"))?;

    Ok(ExistingLog {
        valid_len,
        last_sequence,
    })
}

/// Render one newline-terminated CSV row.
#[must_use]
pub fn format_row(tick: &EnrichedTick) -> String {
    format!(
        "{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.6},{:.6}\n",
        tick.ingest_timestamp.format(TIMESTAMP_FORMAT),
        tick.sequence_number,
        escape_field(&tick.message_type),
        escape_field(&tick.series_id),
        tick.price,
        tick.best_bid,
        tick.best_ask,
        tick.mid_price,
        tick.price_ema,
        tick.mid_price_ema,
    )
}

/// Quote a text field if it contains a delimiter, quote or line break.
fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
