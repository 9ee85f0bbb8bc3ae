//! SQLite conversion tracker.
//!
//! Every conversion leaves a row behind: what was converted, from which
//! file, with which strategy, how well it went, and — via the companion
//! `validation_reports` and `conversion_errors` tables — what the reviewer
//! said and what broke along the way. The `pdf_hash` column (SHA-256 of the
//! file bytes) is UNIQUE and drives duplicate detection: the same document
//! under a different filename still maps to the same row.
//!
//! ## Lifecycle of a row
//!
//! [`begin`](ConversionTracker::begin) inserts (or re-activates) a row with
//! status `processing`; the pipeline then settles it with
//! [`mark_success`](ConversionTracker::mark_success) or
//! [`mark_failed`](ConversionTracker::mark_failed). Only `success` rows are
//! treated as "already done" by duplicate detection — a `failed` or
//! crashed-mid-`processing` row is retried on the next run instead of
//! blocking it.
//!
//! Timestamps are Unix epoch seconds. One writer connection, WAL mode.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{PdfmdError, StepError};
use crate::validate::ValidationReport;

/// Streaming block size for [`compute_hash`].
const HASH_BLOCK_BYTES: usize = 8192;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversions (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    pdf_filename            TEXT NOT NULL,
    pdf_path                TEXT NOT NULL,
    pdf_hash                TEXT NOT NULL UNIQUE,
    pdf_size_bytes          INTEGER NOT NULL,
    status                  TEXT NOT NULL,
    created_at              INTEGER NOT NULL,
    updated_at              INTEGER NOT NULL,
    markdown_path           TEXT,
    pdf_type                TEXT NOT NULL DEFAULT 'unknown',
    strategy                TEXT,
    profile_used            TEXT,
    pages                   INTEGER,
    has_tables              INTEGER NOT NULL DEFAULT 0,
    fidelity_score          REAL,
    conversion_time_seconds REAL,
    notes                   TEXT
);

CREATE TABLE IF NOT EXISTS validation_reports (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    conversion_id INTEGER NOT NULL REFERENCES conversions(id),
    created_at    INTEGER NOT NULL,
    structure_ok  INTEGER,
    tables_ok     INTEGER,
    quality_score REAL,
    validator     TEXT NOT NULL,
    report_json   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversion_errors (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    conversion_id INTEGER NOT NULL REFERENCES conversions(id),
    created_at    INTEGER NOT NULL,
    step          TEXT NOT NULL,
    error_type    TEXT NOT NULL,
    error_message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pdf_hash   ON conversions(pdf_hash);
CREATE INDEX IF NOT EXISTS idx_status     ON conversions(status);
CREATE INDEX IF NOT EXISTS idx_created_at ON conversions(created_at);
";

const RECORD_COLUMNS: &str = "id, pdf_filename, pdf_path, pdf_hash, pdf_size_bytes, status, \
     created_at, updated_at, markdown_path, pdf_type, strategy, profile_used, \
     pages, has_tables, fidelity_score, conversion_time_seconds, notes";

/// One row of the `conversions` table.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionRecord {
    pub id: i64,
    pub pdf_filename: String,
    pub pdf_path: PathBuf,
    pub pdf_hash: String,
    pub pdf_size_bytes: u64,
    /// `processing`, `success`, or `failed`.
    pub status: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub markdown_path: Option<PathBuf>,
    pub pdf_type: String,
    pub strategy: Option<String>,
    pub profile_used: Option<String>,
    pub pages: Option<u32>,
    pub has_tables: bool,
    pub fidelity_score: Option<f64>,
    pub conversion_time_seconds: Option<f64>,
    /// Free-form JSON blob with per-strategy metadata.
    pub notes: Option<String>,
}

impl ConversionRecord {
    /// Whether duplicate detection may reuse this row's output.
    pub fn is_reusable(&self) -> bool {
        self.status == "success"
    }
}

/// Everything recorded when a conversion finishes cleanly.
#[derive(Debug, Clone, Default)]
pub struct SuccessRecord {
    pub markdown_path: Option<PathBuf>,
    pub pdf_type: String,
    pub strategy: String,
    pub profile_used: Option<String>,
    pub pages: u32,
    pub has_tables: bool,
    pub fidelity_score: Option<f64>,
    pub conversion_time_seconds: f64,
    /// JSON blob of strategy/detection metadata.
    pub notes: Option<String>,
}

/// Aggregate view over the whole `conversions` table.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub total_conversions: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Mean fidelity over rows that have one. `None` when no row does.
    pub average_fidelity: Option<f64>,
    pub total_pages: u64,
    pub total_size_mb: f64,
    pub with_tables: u64,
    pub scanned_pdfs: u64,
}

/// Handle to one tracker database.
///
/// Not `Sync`: one conversion, one tracker. Open cost is a few
/// milliseconds, so short-lived handles are fine.
pub struct ConversionTracker {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for ConversionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionTracker")
            .field("path", &self.path)
            .finish()
    }
}

impl ConversionTracker {
    /// Open (creating if needed) the tracker database at `path`.
    pub fn open(path: &Path) -> Result<Self, PdfmdError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PdfmdError::Internal(format!(
                        "cannot create tracker directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "conversion tracker open");
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Where this tracker's database lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a conversion by content hash.
    pub fn find_by_hash(&self, hash: &str) -> Result<Option<ConversionRecord>, PdfmdError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM conversions WHERE pdf_hash = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![hash], record_from_row).optional()?)
    }

    /// Look up a conversion by row id.
    pub fn get(&self, id: i64) -> Result<Option<ConversionRecord>, PdfmdError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM conversions WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![id], record_from_row).optional()?)
    }

    /// Start tracking a conversion; returns the row id.
    ///
    /// If a row with this hash already exists (earlier failure, interrupted
    /// run, or a forced re-conversion) it is re-activated in place — path
    /// and filename refresh, status returns to `processing`, and the
    /// original `created_at` survives.
    pub fn begin(&self, pdf_path: &Path, hash: &str, size_bytes: u64) -> Result<i64, PdfmdError> {
        let now = now_epoch();
        let filename = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| pdf_path.display().to_string());
        let path_text = pdf_path.display().to_string();

        let existing: Option<i64> = self
            .conn
            .prepare_cached("SELECT id FROM conversions WHERE pdf_hash = ?1")?
            .query_row(params![hash], |row| row.get(0))
            .optional()?;

        if let Some(id) = existing {
            self.conn
                .prepare_cached(
                    "UPDATE conversions
                     SET status = 'processing', pdf_filename = ?1, pdf_path = ?2,
                         pdf_size_bytes = ?3, updated_at = ?4
                     WHERE id = ?5",
                )?
                .execute(params![filename, path_text, size_bytes, now, id])?;
            info!(id, file = %filename, "re-processing a known document");
            return Ok(id);
        }

        self.conn
            .prepare_cached(
                "INSERT INTO conversions
                     (pdf_filename, pdf_path, pdf_hash, pdf_size_bytes,
                      status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'processing', ?5, ?5)",
            )?
            .execute(params![filename, path_text, hash, size_bytes, now])?;
        let id = self.conn.last_insert_rowid();
        info!(id, file = %filename, "conversion registered");
        Ok(id)
    }

    /// Settle a row as `success` with its final metadata.
    pub fn mark_success(&self, id: i64, record: &SuccessRecord) -> Result<(), PdfmdError> {
        self.conn
            .prepare_cached(
                "UPDATE conversions
                 SET status = 'success', markdown_path = ?1, pdf_type = ?2,
                     strategy = ?3, profile_used = ?4, pages = ?5,
                     has_tables = ?6, fidelity_score = ?7,
                     conversion_time_seconds = ?8, notes = ?9, updated_at = ?10
                 WHERE id = ?11",
            )?
            .execute(params![
                record
                    .markdown_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                record.pdf_type,
                record.strategy,
                record.profile_used,
                record.pages,
                record.has_tables,
                record.fidelity_score,
                record.conversion_time_seconds,
                record.notes,
                now_epoch(),
                id,
            ])?;
        debug!(id, "conversion marked success");
        Ok(())
    }

    /// Settle a row as `failed`, keeping the error text in `notes`.
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), PdfmdError> {
        let notes = serde_json::json!({ "error": error }).to_string();
        self.conn
            .prepare_cached(
                "UPDATE conversions SET status = 'failed', notes = ?1, updated_at = ?2
                 WHERE id = ?3",
            )?
            .execute(params![notes, now_epoch(), id])?;
        debug!(id, "conversion marked failed");
        Ok(())
    }

    /// Attach a reviewer verdict to a conversion.
    pub fn add_validation_report(
        &self,
        conversion_id: i64,
        report: &ValidationReport,
        validator: &str,
    ) -> Result<(), PdfmdError> {
        let report_json = serde_json::to_string(report)
            .map_err(|e| PdfmdError::Internal(format!("report serialization: {e}")))?;
        self.conn
            .prepare_cached(
                "INSERT INTO validation_reports
                     (conversion_id, created_at, structure_ok, tables_ok,
                      quality_score, validator, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                conversion_id,
                now_epoch(),
                report.has_structure(),
                report.has_tables(),
                report.quality_score(),
                validator,
                report_json,
            ])?;
        debug!(conversion_id, validator, "validation report recorded");
        Ok(())
    }

    /// Log a non-fatal pipeline error against a conversion.
    pub fn add_error(&self, conversion_id: i64, error: &StepError) -> Result<(), PdfmdError> {
        self.conn
            .prepare_cached(
                "INSERT INTO conversion_errors
                     (conversion_id, created_at, step, error_type, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                conversion_id,
                now_epoch(),
                error.step(),
                error.error_type(),
                error.message(),
            ])?;
        Ok(())
    }

    /// Aggregate statistics over all tracked conversions.
    pub fn statistics(&self) -> Result<TrackerStats, PdfmdError> {
        let total: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM conversions", [], |row| row.get(0))?;

        let mut by_status = BTreeMap::new();
        let mut stmt = self
            .conn
            .prepare_cached("SELECT status, COUNT(*) FROM conversions GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, count);
        }

        let (avg_fidelity, total_pages, total_bytes, with_tables, scanned): (
            Option<f64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
        ) = self.conn.query_row(
            "SELECT
                 AVG(fidelity_score),
                 SUM(pages),
                 SUM(pdf_size_bytes),
                 SUM(CASE WHEN has_tables = 1 THEN 1 ELSE 0 END),
                 SUM(CASE WHEN pdf_type = 'scanned' THEN 1 ELSE 0 END)
             FROM conversions",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        Ok(TrackerStats {
            total_conversions: total,
            by_status,
            average_fidelity: avg_fidelity.map(round2),
            total_pages: total_pages.unwrap_or(0),
            total_size_mb: round2(total_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0)),
            with_tables: with_tables.unwrap_or(0),
            scanned_pdfs: scanned.unwrap_or(0),
        })
    }
}

/// SHA-256 of a file's bytes, lowercase hex, streamed in 8 KiB blocks so
/// multi-hundred-MB scans never load into memory.
pub fn compute_hash(path: &Path) -> Result<String, PdfmdError> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PdfmdError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => PdfmdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PdfmdError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_BYTES];
    loop {
        let n = file.read(&mut block).map_err(|e| PdfmdError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ConversionRecord> {
    Ok(ConversionRecord {
        id: row.get(0)?,
        pdf_filename: row.get(1)?,
        pdf_path: PathBuf::from(row.get::<_, String>(2)?),
        pdf_hash: row.get(3)?,
        pdf_size_bytes: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        markdown_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        pdf_type: row.get(9)?,
        strategy: row.get(10)?,
        profile_used: row.get(11)?,
        pages: row.get(12)?,
        has_tables: row.get(13)?,
        fidelity_score: row.get(14)?,
        conversion_time_seconds: row.get(15)?,
        notes: row.get(16)?,
    })
}
