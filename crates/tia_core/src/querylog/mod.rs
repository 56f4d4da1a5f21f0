//! Durable, append-only query log backed by a flat CSV file.
//!
//! Write protocol, in order:
//! 1. ensure the file exists with its header (directory creation failures are tolerated);
//! 2. atomic replace: read, append the row in memory, write a unique temp file, rename.
//!    The whole file is rewritten, so a store that is not valid UTF-8 is refused here;
//! 3. direct append to the end of the file with its own, longer retry budget;
//! 4. diagnostics only: the record is emitted through `tracing` and the store reports
//!    itself degraded.
//!
//! The read-modify-rename step is not safe with concurrent writers. Route appends through
//! [`QueryLogWriter`], which owns the single writer thread for a store target.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{error, warn};

use crate::domain::{LogRecord, NewLogRecord};
use crate::error::AppError;
use crate::retry::RetryPolicy;

pub mod csv_row;
pub mod writer;

pub use writer::{QueryLogSink, QueryLogWriter, StorageHealth, SubmitOutcome, WriterStats};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryLogConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Answers longer than this many characters are cut before storage; `0` keeps them whole.
    #[serde(default = "default_answer_char_cap")]
    pub answer_char_cap: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub replace_retry: RetryPolicy,
    #[serde(default = "RetryPolicy::direct_append_default")]
    pub append_retry: RetryPolicy,
}

fn default_path() -> PathBuf {
    PathBuf::from("data").join("user_data.csv")
}

fn default_answer_char_cap() -> usize {
    500
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            answer_char_cap: default_answer_char_cap(),
            channel_capacity: default_channel_capacity(),
            replace_retry: RetryPolicy::default(),
            append_retry: RetryPolicy::direct_append_default(),
        }
    }
}

/// Which step of the write protocol persisted the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Replaced { id: u64 },
    Appended { id: u64 },
    /// Neither path worked; the record only exists in process diagnostics.
    DiagnosticsOnly,
    Rejected(AppError),
}

impl AppendOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, AppendOutcome::Replaced { .. } | AppendOutcome::Appended { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryLogStats {
    pub total_queries: u64,
    pub unique_regions: u64,
    pub queries_last_24h: u64,
    pub queries_last_7d: u64,
}

#[derive(Debug, Clone)]
pub struct QueryLog {
    path: PathBuf,
    answer_char_cap: usize,
    replace_retry: RetryPolicy,
    append_retry: RetryPolicy,
}

impl QueryLog {
    pub fn open(config: &QueryLogConfig) -> Self {
        Self {
            path: config.path.clone(),
            answer_char_cap: config.answer_char_cap,
            replace_retry: config.replace_retry.clone(),
            append_retry: config.append_retry.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Persist one record. Never panics and never returns an error: failures are logged
    /// and reflected in the outcome.
    pub fn append(&self, record: &NewLogRecord) -> AppendOutcome {
        if let Err(e) = record.validate() {
            warn!(code = %e.code, details = ?e.details, "query log record rejected");
            return AppendOutcome::Rejected(e);
        }
        let answer = truncate_chars(&record.answer_text, self.answer_char_cap);

        match self
            .replace_retry
            .run("query_log.atomic_replace", |_| self.replace_with_row(record, &answer))
        {
            Ok(id) => return AppendOutcome::Replaced { id },
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    code = %e.code,
                    details = ?e.details,
                    "atomic replace exhausted retries; falling back to direct append"
                );
            }
        }

        match self
            .append_retry
            .run("query_log.direct_append", |_| self.append_row(record, &answer))
        {
            Ok(id) => AppendOutcome::Appended { id },
            Err(e) => {
                let payload = serde_json::to_string(record).unwrap_or_default();
                error!(
                    path = %self.path.display(),
                    code = %e.code,
                    details = ?e.details,
                    record = %payload,
                    "query log storage degraded; record kept in diagnostics only"
                );
                AppendOutcome::DiagnosticsOnly
            }
        }
    }

    fn ensure_store(&self) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                // Read-only deployments are expected; the file may still be writable.
                warn!(dir = %parent.display(), err = %e, "could not create query log directory");
            }
        }
        if self.path.exists() {
            return Ok(());
        }
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut f) => f.write_all(csv_row::header_line().as_bytes()).map_err(|e| {
                AppError::new("STORAGE_INIT_FAILED", "Failed to write query log header")
                    .with_details(format!("path={}; err={}", self.path.display(), e))
                    .with_retryable(true)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(AppError::new("STORAGE_INIT_FAILED", "Failed to create query log")
                .with_details(format!("path={}; err={}", self.path.display(), e))
                .with_retryable(true)),
        }
    }

    fn read_current(&self) -> Result<String, AppError> {
        fs::read_to_string(&self.path).map_err(|e| {
            AppError::new("STORAGE_READ_FAILED", "Failed to read query log")
                .with_details(format!("path={}; err={}", self.path.display(), e))
                .with_retryable(true)
        })
    }

    /// Undecodable bytes become U+FFFD. Only used where the file is never rewritten.
    fn read_lossy(&self) -> Result<String, AppError> {
        let bytes = fs::read(&self.path).map_err(|e| {
            AppError::new("STORAGE_READ_FAILED", "Failed to read query log")
                .with_details(format!("path={}; err={}", self.path.display(), e))
                .with_retryable(true)
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "query_log.csv".to_string());
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{nanos}.{seq}.tmp", std::process::id()))
    }

    fn replace_with_row(&self, record: &NewLogRecord, answer: &str) -> Result<u64, AppError> {
        self.ensure_store()?;
        let mut content = self.read_current()?;
        if content.is_empty() {
            content.push_str(&csv_row::header_line());
        } else if !content.ends_with('\n') {
            content.push('\n');
        }
        let id = next_id(&content);
        content.push_str(&encode_record(id, record, answer));

        let tmp = self.temp_path();
        fs::write(&tmp, content.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            AppError::new("STORAGE_WRITE_FAILED", "Failed to write query log temp file")
                .with_details(format!("path={}; err={}", tmp.display(), e))
                .with_retryable(true)
        })?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(
                AppError::new("STORAGE_RENAME_FAILED", "Failed to finalize query log write")
                    .with_details(format!(
                        "tmp={}; dest={}; err={}",
                        tmp.display(),
                        self.path.display(),
                        e
                    ))
                    .with_retryable(true),
            );
        }
        Ok(id)
    }

    fn append_row(&self, record: &NewLogRecord, answer: &str) -> Result<u64, AppError> {
        self.ensure_store()?;
        let current = self.read_lossy()?;
        let id = next_id(&current);

        let mut chunk = String::new();
        if current.is_empty() {
            chunk.push_str(&csv_row::header_line());
        } else if !current.ends_with('\n') {
            chunk.push('\n');
        }
        chunk.push_str(&encode_record(id, record, answer));

        let mut f = OpenOptions::new().append(true).open(&self.path).map_err(|e| {
            AppError::new("STORAGE_APPEND_FAILED", "Failed to open query log for append")
                .with_details(format!("path={}; err={}", self.path.display(), e))
                .with_retryable(true)
        })?;
        f.write_all(chunk.as_bytes())
            .and_then(|_| f.flush())
            .map_err(|e| {
                AppError::new("STORAGE_APPEND_FAILED", "Failed to append to query log")
                    .with_details(format!("path={}; err={}", self.path.display(), e))
                    .with_retryable(true)
            })?;
        Ok(id)
    }

    /// All stored records in file order. A missing store reads as empty.
    pub fn read_all(&self) -> Result<Vec<LogRecord>, AppError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = self.read_lossy()?;
        let rows = csv_row::parse_rows(&text)?;
        Ok(rows.into_iter().filter_map(row_to_record).collect())
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogRecord>, AppError> {
        let mut records = self.read_all()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    pub fn stats(&self, now: OffsetDateTime) -> Result<QueryLogStats, AppError> {
        let records = self.read_all()?;
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut regions = std::collections::BTreeSet::new();
        let mut last_24h = 0u64;
        let mut last_7d = 0u64;
        for r in records.iter() {
            regions.insert(r.clinic_or_region.as_str());
            if let Ok(ts) = OffsetDateTime::parse(&r.created_at, &Rfc3339) {
                if ts >= day_ago {
                    last_24h += 1;
                }
                if ts >= week_ago {
                    last_7d += 1;
                }
            }
        }
        Ok(QueryLogStats {
            total_queries: records.len() as u64,
            unique_regions: regions.len() as u64,
            queries_last_24h: last_24h,
            queries_last_7d: last_7d,
        })
    }
}

fn encode_record(id: u64, record: &NewLogRecord, answer: &str) -> String {
    let id = id.to_string();
    csv_row::encode_row(&[
        id.as_str(),
        record.user_contact.as_str(),
        record.clinic_or_region.as_str(),
        record.modality.as_str(),
        record.query_text.as_str(),
        answer,
        record.created_at.as_str(),
    ])
}

fn row_to_record(row: Vec<String>) -> Option<LogRecord> {
    if row.len() < csv_row::HEADER.len() {
        return None;
    }
    let id = row[0].trim().parse::<u64>().ok()?;
    let mut it = row.into_iter().skip(1);
    Some(LogRecord {
        id,
        user_contact: it.next()?,
        clinic_or_region: it.next()?,
        modality: it.next()?,
        query_text: it.next()?,
        answer_text: it.next()?,
        created_at: it.next()?,
    })
}

/// One past the highest id already stored. Unparseable content counts as empty.
fn next_id(content: &str) -> u64 {
    let rows = csv_row::parse_rows(content).unwrap_or_default();
    let max = rows
        .iter()
        .filter_map(|r| r.first().and_then(|id| id.trim().parse::<u64>().ok()))
        .max()
        .unwrap_or(0);
    max.max(rows.len() as u64) + 1
}

pub fn truncate_chars(text: &str, cap: usize) -> String {
    if cap == 0 || text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap).collect();
    out.push_str("...");
    out
}
