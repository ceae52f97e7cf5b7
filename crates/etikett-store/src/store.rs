// SPDX-License-Identifier: Apache-2.0
//
// SQLite-backed print job store.
//
// Each job belongs to exactly one printer and carries a small integer id
// that is unique and monotonically increasing within that printer.  The
// document payload is stored inline as a BLOB alongside its SHA-256 hash;
// label documents are small (a raster page or two) so a separate spool
// directory would buy nothing.
//
// The store enforces the queue discipline: at most one job per printer is
// in the `Processing` state, and `dequeue` refuses to hand out another
// job until the current one reaches a terminal state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{DocumentFormat, JobAttributes, JobRecord, JobState, PrinterId};

/// SQLite schema: one row per job plus a per-printer id counter.
///
/// Job ids come from the `counters` table rather than `MAX(job_id) + 1`
/// so ids are never reused after old jobs are purged.
const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        printer_id TEXT NOT NULL,
        job_id INTEGER NOT NULL,
        user TEXT NOT NULL,
        name TEXT NOT NULL,
        format TEXT NOT NULL,
        document BLOB NOT NULL,
        document_hash TEXT NOT NULL,
        attributes TEXT NOT NULL,
        state TEXT NOT NULL,
        error_message TEXT,
        cancel_requested INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        PRIMARY KEY (printer_id, job_id)
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_printer_state ON jobs (printer_id, state);
    CREATE TABLE IF NOT EXISTS counters (
        printer_id TEXT PRIMARY KEY,
        next_job_id INTEGER NOT NULL
    );
"#;

/// How a `Processing` job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// All pages were delivered to the device.
    Completed,
    /// Processing failed; the message is surfaced as `job-state-message`.
    Aborted(String),
    /// The processor honored a cancel request at a page boundary.
    Canceled,
}

impl JobOutcome {
    fn state(&self) -> JobState {
        match self {
            Self::Completed => JobState::Completed,
            Self::Aborted(_) => JobState::Aborted,
            Self::Canceled => JobState::Canceled,
        }
    }

    fn message(&self) -> Option<&str> {
        match self {
            Self::Aborted(msg) => Some(msg.as_str()),
            _ => None,
        }
    }
}

/// Persistent job store backed by a SQLite database.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the job database at the given path.
    ///
    /// Applies WAL journal mode so readers are not blocked during writes
    /// and unclean shutdowns recover gracefully.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| EtikettError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| EtikettError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| EtikettError::Database(format!("create tables: {e}")))?;

        info!("job store opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EtikettError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| EtikettError::Database(format!("create tables: {e}")))?;

        debug!("in-memory job store opened");
        Ok(Self { conn })
    }

    /// Insert a new `Pending` job and return its full record.
    ///
    /// The job id is drawn from the printer's counter; the document hash
    /// is computed here so every stored payload is hashed exactly once.
    #[instrument(skip(self, document, attributes), fields(printer = %printer, len = document.len()))]
    pub fn enqueue(
        &mut self,
        printer: PrinterId,
        user: &str,
        name: &str,
        format: DocumentFormat,
        document: &[u8],
        attributes: JobAttributes,
    ) -> Result<JobRecord> {
        let format_json = serde_json::to_string(&format)?;
        let attrs_json = serde_json::to_string(&attributes)?;
        let state_json = serde_json::to_string(&JobState::Pending)?;
        let document_hash = hex::encode(Sha256::digest(document));
        let created_at = Utc::now();

        let tx = self
            .conn
            .transaction()
            .map_err(|e| EtikettError::Database(format!("begin enqueue: {e}")))?;

        let job_id: i32 = tx
            .query_row(
                "SELECT next_job_id FROM counters WHERE printer_id = ?1",
                params![printer.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EtikettError::Database(format!("read counter: {e}")))?
            .unwrap_or(1);

        tx.execute(
            "INSERT INTO counters (printer_id, next_job_id) VALUES (?1, ?2)
             ON CONFLICT (printer_id) DO UPDATE SET next_job_id = ?2",
            params![printer.to_string(), job_id + 1],
        )
        .map_err(|e| EtikettError::Database(format!("bump counter: {e}")))?;

        tx.execute(
            "INSERT INTO jobs (printer_id, job_id, user, name, format, document,
             document_hash, attributes, state, cancel_requested, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
            params![
                printer.to_string(),
                job_id,
                user,
                name,
                format_json,
                document,
                document_hash,
                attrs_json,
                state_json,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| EtikettError::Database(format!("insert job: {e}")))?;

        tx.commit()
            .map_err(|e| EtikettError::Database(format!("commit enqueue: {e}")))?;

        info!(job_id, "job enqueued");
        Ok(JobRecord {
            id: job_id,
            printer,
            user: user.to_string(),
            name: name.to_string(),
            format,
            document_hash,
            document_len: document.len() as u64,
            attributes,
            state: JobState::Pending,
            error_message: None,
            cancel_requested: false,
            created_at,
            started_at: None,
            completed_at: None,
        })
    }

    /// Atomically take the oldest `Pending` job for a printer and mark it
    /// `Processing`.
    ///
    /// Returns `None` when the queue is empty or a job is already being
    /// processed.  Finding more than one `Processing` row is a broken
    /// invariant and surfaces as `StoreCorruption`.
    #[instrument(skip(self), fields(printer = %printer))]
    pub fn dequeue(&mut self, printer: PrinterId) -> Result<Option<JobRecord>> {
        let processing_json = serde_json::to_string(&JobState::Processing)?;
        let pending_json = serde_json::to_string(&JobState::Pending)?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| EtikettError::Database(format!("begin dequeue: {e}")))?;

        let processing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE printer_id = ?1 AND state = ?2",
                params![printer.to_string(), processing_json],
                |row| row.get(0),
            )
            .map_err(|e| EtikettError::Database(format!("count processing: {e}")))?;

        if processing > 1 {
            return Err(EtikettError::StoreCorruption(format!(
                "printer {printer} has {processing} jobs in Processing"
            )));
        }
        if processing == 1 {
            return Ok(None);
        }

        let row = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE printer_id = ?1 AND state = ?2
                     ORDER BY job_id ASC LIMIT 1"
                ),
                params![printer.to_string(), pending_json],
                row_to_job,
            )
            .optional()
            .map_err(|e| EtikettError::Database(format!("select pending: {e}")))?;

        let Some(mut job) = row else {
            return Ok(None);
        };

        let started_at = Utc::now();
        tx.execute(
            "UPDATE jobs SET state = ?1, started_at = ?2
             WHERE printer_id = ?3 AND job_id = ?4",
            params![
                processing_json,
                started_at.to_rfc3339(),
                printer.to_string(),
                job.id,
            ],
        )
        .map_err(|e| EtikettError::Database(format!("mark processing: {e}")))?;

        tx.commit()
            .map_err(|e| EtikettError::Database(format!("commit dequeue: {e}")))?;

        job.state = JobState::Processing;
        job.started_at = Some(started_at);
        debug!(job_id = job.id, "job dequeued");
        Ok(Some(job))
    }

    /// Move a `Processing` job to its terminal state.
    #[instrument(skip(self, outcome), fields(printer = %printer, job_id))]
    pub fn complete(&self, printer: PrinterId, job_id: i32, outcome: JobOutcome) -> Result<()> {
        let processing_json = serde_json::to_string(&JobState::Processing)?;
        let state_json = serde_json::to_string(&outcome.state())?;

        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, error_message = ?2, completed_at = ?3
                 WHERE printer_id = ?4 AND job_id = ?5 AND state = ?6",
                params![
                    state_json,
                    outcome.message(),
                    Utc::now().to_rfc3339(),
                    printer.to_string(),
                    job_id,
                    processing_json,
                ],
            )
            .map_err(|e| EtikettError::Database(format!("complete job: {e}")))?;

        if rows == 0 {
            return Err(EtikettError::Conflict(format!(
                "job {job_id} is not in Processing"
            )));
        }

        info!(job_id, state = ?outcome.state(), "job completed");
        Ok(())
    }

    /// Handle a cancel request for a job.
    ///
    /// A `Pending` job is canceled immediately.  A `Processing` job only
    /// gets its `cancel_requested` flag set; the processor observes the
    /// flag at the next page boundary and finishes with
    /// [`JobOutcome::Canceled`].  Returns the job's state after the call.
    #[instrument(skip(self), fields(printer = %printer, job_id))]
    pub fn cancel(&self, printer: PrinterId, job_id: i32) -> Result<JobState> {
        let job = self
            .get_job(printer, job_id)?
            .ok_or_else(|| EtikettError::NotFound(format!("job {job_id}")))?;

        match job.state {
            JobState::Pending => {
                let canceled_json = serde_json::to_string(&JobState::Canceled)?;
                self.conn
                    .execute(
                        "UPDATE jobs SET state = ?1, completed_at = ?2
                         WHERE printer_id = ?3 AND job_id = ?4",
                        params![
                            canceled_json,
                            Utc::now().to_rfc3339(),
                            printer.to_string(),
                            job_id,
                        ],
                    )
                    .map_err(|e| EtikettError::Database(format!("cancel pending: {e}")))?;
                info!(job_id, "pending job canceled");
                Ok(JobState::Canceled)
            }
            JobState::Processing => {
                self.conn
                    .execute(
                        "UPDATE jobs SET cancel_requested = 1
                         WHERE printer_id = ?1 AND job_id = ?2",
                        params![printer.to_string(), job_id],
                    )
                    .map_err(|e| EtikettError::Database(format!("request cancel: {e}")))?;
                info!(job_id, "cancel requested for processing job");
                Ok(JobState::Processing)
            }
            state => Err(EtikettError::Conflict(format!(
                "job {job_id} already finished ({state:?})"
            ))),
        }
    }

    /// Whether a cancel has been requested for the given job.
    pub fn cancel_requested(&self, printer: PrinterId, job_id: i32) -> Result<bool> {
        let flag: i64 = self
            .conn
            .query_row(
                "SELECT cancel_requested FROM jobs WHERE printer_id = ?1 AND job_id = ?2",
                params![printer.to_string(), job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EtikettError::Database(format!("read cancel flag: {e}")))?
            .ok_or_else(|| EtikettError::NotFound(format!("job {job_id}")))?;
        Ok(flag != 0)
    }

    /// Retrieve a single job, without its document payload.
    pub fn get_job(&self, printer: PrinterId, job_id: i32) -> Result<Option<JobRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE printer_id = ?1 AND job_id = ?2"
                ),
                params![printer.to_string(), job_id],
                row_to_job,
            )
            .optional()
            .map_err(|e| EtikettError::Database(format!("get job: {e}")))
    }

    /// Retrieve all jobs for a printer, oldest first (submission order).
    pub fn jobs_for_printer(&self, printer: PrinterId) -> Result<Vec<JobRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE printer_id = ?1 ORDER BY job_id ASC"
            ))
            .map_err(|e| EtikettError::Database(format!("prepare jobs_for_printer: {e}")))?;

        let jobs = stmt
            .query_map(params![printer.to_string()], row_to_job)
            .map_err(|e| EtikettError::Database(format!("query jobs_for_printer: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EtikettError::Database(format!("collect rows: {e}")))?;

        Ok(jobs)
    }

    /// Fetch the stored document bytes for a job.
    pub fn document(&self, printer: PrinterId, job_id: i32) -> Result<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT document FROM jobs WHERE printer_id = ?1 AND job_id = ?2",
                params![printer.to_string(), job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EtikettError::Database(format!("get document: {e}")))?
            .ok_or_else(|| EtikettError::NotFound(format!("job {job_id}")))
    }

    /// Count of jobs that are not yet finished (`Pending` + `Processing`).
    pub fn active_count(&self, printer: PrinterId) -> Result<u32> {
        let pending_json = serde_json::to_string(&JobState::Pending)?;
        let processing_json = serde_json::to_string(&JobState::Processing)?;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE printer_id = ?1 AND state IN (?2, ?3)",
                params![printer.to_string(), pending_json, processing_json],
                |row| row.get(0),
            )
            .map_err(|e| EtikettError::Database(format!("count active: {e}")))?;
        Ok(count as u32)
    }

    /// Abort any `Processing` jobs left over from a previous run.
    ///
    /// A job interrupted mid-delivery may have sent a partial page, so it
    /// cannot safely be resumed or re-queued.  Called once at startup
    /// before processors are spawned.
    #[instrument(skip(self))]
    pub fn recover_interrupted(&self) -> Result<usize> {
        let processing_json = serde_json::to_string(&JobState::Processing)?;
        let aborted_json = serde_json::to_string(&JobState::Aborted)?;

        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, error_message = ?2, completed_at = ?3
                 WHERE state = ?4",
                params![
                    aborted_json,
                    "interrupted by server restart",
                    Utc::now().to_rfc3339(),
                    processing_json,
                ],
            )
            .map_err(|e| EtikettError::Database(format!("recover interrupted: {e}")))?;

        if rows > 0 {
            warn!(count = rows, "aborted jobs interrupted by previous shutdown");
        }
        Ok(rows)
    }

    /// Abort `Processing` jobs for a single printer.
    ///
    /// Used when a printer task detects a broken one-Processing invariant
    /// and needs to reset its own queue; other printers' in-flight jobs
    /// are untouched.
    #[instrument(skip(self))]
    pub fn recover_printer(&self, printer: PrinterId) -> Result<usize> {
        let processing_json = serde_json::to_string(&JobState::Processing)?;
        let aborted_json = serde_json::to_string(&JobState::Aborted)?;

        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, error_message = ?2, completed_at = ?3
                 WHERE printer_id = ?4 AND state = ?5",
                params![
                    aborted_json,
                    "aborted after queue invariant violation",
                    Utc::now().to_rfc3339(),
                    printer.to_string(),
                    processing_json,
                ],
            )
            .map_err(|e| EtikettError::Database(format!("recover printer: {e}")))?;

        if rows > 0 {
            warn!(count = rows, "aborted in-flight jobs for printer");
        }
        Ok(rows)
    }

    /// Delete finished jobs whose completion time is older than `retention`.
    ///
    /// Returns the number of rows removed.  Job ids are never reused
    /// afterwards because they come from the `counters` table.
    #[instrument(skip(self))]
    pub fn purge_terminal(&self, retention: Duration) -> Result<usize> {
        let completed_json = serde_json::to_string(&JobState::Completed)?;
        let aborted_json = serde_json::to_string(&JobState::Aborted)?;
        let canceled_json = serde_json::to_string(&JobState::Canceled)?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| EtikettError::Database(format!("retention out of range: {e}")))?;

        let rows = self
            .conn
            .execute(
                "DELETE FROM jobs WHERE state IN (?1, ?2, ?3)
                 AND completed_at IS NOT NULL AND completed_at < ?4",
                params![
                    completed_json,
                    aborted_json,
                    canceled_json,
                    cutoff.to_rfc3339(),
                ],
            )
            .map_err(|e| EtikettError::Database(format!("purge terminal: {e}")))?;

        if rows > 0 {
            debug!(count = rows, "purged finished jobs");
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Column list shared by every SELECT that maps to a `JobRecord`.
///
/// The document BLOB itself is not included; `length(document)` stands in
/// so listings stay cheap.
const JOB_COLUMNS: &str = "printer_id, job_id, user, name, format, document_hash,
     length(document), attributes, state, error_message, cancel_requested,
     created_at, started_at, completed_at";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let printer_str: String = row.get(0)?;
    let job_id: i32 = row.get(1)?;
    let user: String = row.get(2)?;
    let name: String = row.get(3)?;
    let format_json: String = row.get(4)?;
    let document_hash: String = row.get(5)?;
    let document_len: i64 = row.get(6)?;
    let attrs_json: String = row.get(7)?;
    let state_json: String = row.get(8)?;
    let error_message: Option<String> = row.get(9)?;
    let cancel_requested: i64 = row.get(10)?;
    let created_at_str: String = row.get(11)?;
    let started_at_str: Option<String> = row.get(12)?;
    let completed_at_str: Option<String> = row.get(13)?;

    let printer_uuid = uuid::Uuid::parse_str(&printer_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let format: DocumentFormat = serde_json::from_str(&format_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let attributes: JobAttributes = serde_json::from_str(&attrs_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let state: JobState = serde_json::from_str(&state_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at = parse_timestamp(&created_at_str, 11)?;
    let started_at = started_at_str
        .map(|s| parse_timestamp(&s, 12))
        .transpose()?;
    let completed_at = completed_at_str
        .map(|s| parse_timestamp(&s, 13))
        .transpose()?;

    Ok(JobRecord {
        id: job_id,
        printer: etikett_core::types::PrinterId(printer_uuid),
        user,
        name,
        format,
        document_hash,
        document_len: document_len as u64,
        attributes,
        state,
        error_message,
        cancel_requested: cancel_requested != 0,
        created_at,
        started_at,
        completed_at,
    })
}

fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
