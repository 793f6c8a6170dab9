use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Status of a bulk translation job.
///
/// Transitions are monotonic: pending → running → {completed | cancelled}.
/// Terminal states are immutable; every transition in the database is guarded
/// by the expected prior status so a late writer can never resurrect a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(value: &str) -> Option<JobStatus> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

/// A persisted bulk job row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub status: JobStatus,
    pub language: String,
    pub total: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub started_at: String,
}

/// One queued item inside a bulk job.
#[derive(Debug, Clone)]
pub struct JobItem {
    pub position: i64,
    pub content_id: i64,
}

/// A persisted review-queue row.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub content_id: i64,
    pub flagged_at: String,
    pub reason: String,
    pub confidence: f64,
    /// JSON object mapping field keys to proposed values
    pub payload: String,
    pub status: String,
    pub fast_approval: bool,
}

/// Aggregated usage for one (day, content_type) bucket.
#[derive(Debug, Clone)]
pub struct UsageRow {
    pub day: String,
    pub content_type: String,
    pub token_count: i64,
    pub request_count: i64,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database and create tables if missing.
    pub fn new(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)
            .context(format!("Failed to open database at {}", database_path))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bulk_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'pending',
                language TEXT NOT NULL,
                total INTEGER NOT NULL,
                completed_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create bulk_jobs table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bulk_job_items (
                job_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                content_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                PRIMARY KEY (job_id, position)
            )",
            [],
        )
        .context("Failed to create bulk_job_items table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS review_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id INTEGER NOT NULL,
                flagged_at TEXT NOT NULL,
                reason TEXT NOT NULL,
                confidence REAL NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                fast_approval INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("Failed to create review_queue table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_records (
                day TEXT NOT NULL,
                content_type TEXT NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                request_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (day, content_type)
            )",
            [],
        )
        .context("Failed to create usage_records table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS translation_units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id INTEGER NOT NULL,
                field_key TEXT NOT NULL,
                language TEXT NOT NULL,
                source_value TEXT NOT NULL,
                translated_value TEXT,
                origin TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                superseded INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .context("Failed to create translation_units table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ==================== Bulk jobs ====================

    /// Create a job in `pending` with its ordered item list.
    pub fn create_job(&self, language: &str, item_ids: &[i64]) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO bulk_jobs (status, language, total, started_at)
             VALUES ('pending', ?1, ?2, ?3)",
            params![language, item_ids.len() as i64, now],
        )
        .context("Failed to insert bulk job")?;
        let job_id = tx.last_insert_rowid();

        for (position, content_id) in item_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO bulk_job_items (job_id, position, content_id)
                 VALUES (?1, ?2, ?3)",
                params![job_id, position as i64, content_id],
            )
            .context("Failed to insert bulk job item")?;
        }

        tx.commit()?;
        Ok(job_id)
    }

    /// Attempt a guarded status transition. Returns `true` only if the job
    /// was in `from` and is now in `to`; terminal states can never change.
    pub fn try_transition_job(&self, job_id: i64, from: JobStatus, to: JobStatus) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE bulk_jobs SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), job_id, from.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Cancel a job. Only pending or running jobs can be cancelled.
    pub fn cancel_job(&self, job_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE bulk_jobs SET status = 'cancelled'
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![job_id],
        )?;
        Ok(rows > 0)
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, status, language, total, completed_count, failed_count, started_at
             FROM bulk_jobs WHERE id = ?1",
            params![job_id],
            |row| {
                Ok(JobRecord {
                    id: row.get(0)?,
                    status: JobStatus::from_str(&row.get::<_, String>(1)?)
                        .unwrap_or(JobStatus::Pending),
                    language: row.get(2)?,
                    total: row.get(3)?,
                    completed_count: row.get(4)?,
                    failed_count: row.get(5)?,
                    started_at: row.get(6)?,
                })
            },
        )
        .optional()
        .context("Failed to load bulk job")
    }

    /// The next unprocessed item of a job, in submission order.
    pub fn next_pending_item(&self, job_id: i64) -> Result<Option<JobItem>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT position, content_id FROM bulk_job_items
             WHERE job_id = ?1 AND status = 'pending'
             ORDER BY position ASC LIMIT 1",
            params![job_id],
            |row| {
                Ok(JobItem {
                    position: row.get(0)?,
                    content_id: row.get(1)?,
                })
            },
        )
        .optional()
        .context("Failed to load next pending item")
    }

    /// Record an item outcome and bump the matching job counter.
    ///
    /// The counter increment runs in the same transaction and only when the
    /// item row actually flipped from `pending`, so a duplicate mark for an
    /// already-processed position changes nothing and the counter sum can
    /// never drift from the item rows.
    pub fn mark_item(
        &self,
        job_id: i64,
        position: i64,
        ok: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let item_status = if ok { "done" } else { "failed" };
        let flipped = tx.execute(
            "UPDATE bulk_job_items SET status = ?1, error = ?2
             WHERE job_id = ?3 AND position = ?4 AND status = 'pending'",
            params![item_status, error, job_id, position],
        )?;

        if flipped > 0 {
            let counter = if ok { "completed_count" } else { "failed_count" };
            tx.execute(
                &format!(
                    "UPDATE bulk_jobs SET {counter} = {counter} + 1
                     WHERE id = ?1 AND completed_count + failed_count < total"
                ),
                params![job_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn count_pending_items(&self, job_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM bulk_job_items WHERE job_id = ?1 AND status = 'pending'",
            params![job_id],
            |row| row.get(0),
        )
        .context("Failed to count pending items")
    }

    /// Per-item error strings for a job (position, content_id, error).
    pub fn item_errors(&self, job_id: i64) -> Result<Vec<(i64, i64, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT position, content_id, error FROM bulk_job_items
             WHERE job_id = ?1 AND status = 'failed' ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==================== Review queue ====================

    /// Persist a flagged artifact. Always lands as `pending`.
    pub fn flag_review(
        &self,
        content_id: i64,
        reason: &str,
        confidence: f64,
        payload: &str,
        fast_approval: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO review_queue (content_id, flagged_at, reason, confidence, payload, status, fast_approval)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            params![content_id, now, reason, confidence, payload, fast_approval as i64],
        )
        .context("Failed to flag item for review")?;
        Ok(())
    }

    pub fn pending_reviews(&self) -> Result<Vec<ReviewRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT content_id, flagged_at, reason, confidence, payload, status, fast_approval
             FROM review_queue WHERE status = 'pending' ORDER BY flagged_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReviewRecord {
                    content_id: row.get(0)?,
                    flagged_at: row.get(1)?,
                    reason: row.get(2)?,
                    confidence: row.get(3)?,
                    payload: row.get(4)?,
                    status: row.get(5)?,
                    fast_approval: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mark the newest pending review for a content item as approved and
    /// return it. Returns `None` when nothing is pending.
    pub fn approve_review(&self, content_id: i64) -> Result<Option<ReviewRecord>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let record = tx
            .query_row(
                "SELECT id, content_id, flagged_at, reason, confidence, payload, fast_approval
                 FROM review_queue WHERE content_id = ?1 AND status = 'pending'
                 ORDER BY flagged_at DESC LIMIT 1",
                params![content_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        ReviewRecord {
                            content_id: row.get(1)?,
                            flagged_at: row.get(2)?,
                            reason: row.get(3)?,
                            confidence: row.get(4)?,
                            payload: row.get(5)?,
                            status: "approved".to_string(),
                            fast_approval: row.get::<_, i64>(6)? != 0,
                        },
                    ))
                },
            )
            .optional()?;

        let result = match record {
            Some((row_id, record)) => {
                tx.execute(
                    "UPDATE review_queue SET status = 'approved' WHERE id = ?1",
                    params![row_id],
                )?;
                Some(record)
            }
            None => None,
        };

        tx.commit()?;
        Ok(result)
    }

    // ==================== Usage ledger ====================

    /// Append provider-reported token usage to today's bucket for a content
    /// type. Atomic upsert; counts only ever grow within a day.
    pub fn record_usage(&self, day: &str, content_type: &str, tokens: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_records (day, content_type, token_count, request_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(day, content_type) DO UPDATE SET
                token_count = token_count + excluded.token_count,
                request_count = request_count + 1",
            params![day, content_type, tokens],
        )
        .context("Failed to record usage")?;
        Ok(())
    }

    /// All usage rows whose day starts with the given prefix
    /// (e.g. "2026-08" for a month-to-date report).
    pub fn usage_rows(&self, day_prefix: &str) -> Result<Vec<UsageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT day, content_type, token_count, request_count
             FROM usage_records WHERE day LIKE ?1 || '%'
             ORDER BY day ASC, content_type ASC",
        )?;
        let rows = stmt
            .query_map(params![day_prefix], |row| {
                Ok(UsageRow {
                    day: row.get(0)?,
                    content_type: row.get(1)?,
                    token_count: row.get(2)?,
                    request_count: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==================== Translation units ====================

    /// Record a translation unit, superseding any live prior row for the
    /// same (content_id, field_key, language). Old rows are kept, flagged.
    pub fn upsert_translation_unit(
        &self,
        content_id: i64,
        field_key: &str,
        language: &str,
        source_value: &str,
        translated_value: Option<&str>,
        origin: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "UPDATE translation_units SET superseded = 1
             WHERE content_id = ?1 AND field_key = ?2 AND language = ?3 AND superseded = 0",
            params![content_id, field_key, language],
        )?;
        tx.execute(
            "INSERT INTO translation_units
             (content_id, field_key, language, source_value, translated_value, origin, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                content_id,
                field_key,
                language,
                source_value,
                translated_value,
                origin,
                now
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// The live (non-superseded) unit for an identity, if any.
    /// Returns (translated_value, origin).
    pub fn live_translation_unit(
        &self,
        content_id: i64,
        field_key: &str,
        language: &str,
    ) -> Result<Option<(Option<String>, String)>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT translated_value, origin FROM translation_units
             WHERE content_id = ?1 AND field_key = ?2 AND language = ?3 AND superseded = 0",
            params![content_id, field_key, language],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to load translation unit")
    }
}
