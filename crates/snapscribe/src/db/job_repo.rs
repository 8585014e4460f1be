//! Queries over `extraction_jobs` and `extraction_job_items`.
//!
//! State-changing updates carry their precondition in the `WHERE` clause and
//! report how many rows they touched; zero means the precondition did not
//! hold and the caller decides what that means.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::job::{ExtractionJob, JobStatus};

const TABLE: &str = "extraction_jobs";

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub label: String,
    pub status: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            label: row.get("label")?,
            status: row.get("status")?,
            total_items: row.get("total_items")?,
            processed_items: row.get("processed_items")?,
            output: row.get("output")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    pub fn from_job(job: &ExtractionJob) -> Self {
        Self {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            label: job.label.clone(),
            status: job.status.as_str().to_string(),
            total_items: job.total_items as i64,
            processed_items: job.processed_items as i64,
            output: job.output.clone(),
            error: job.error.clone(),
            created_at: timestamp(job.created_at),
            updated_at: timestamp(job.updated_at),
            completed_at: job.completed_at.map(timestamp),
        }
    }

    pub fn into_job(self) -> Result<ExtractionJob, DatabaseError> {
        let status = self.status.parse::<JobStatus>().map_err(corrupt)?;
        Ok(ExtractionJob {
            id: self.id,
            owner_id: self.owner_id,
            label: self.label,
            status,
            total_items: count(self.total_items)?,
            processed_items: count(self.processed_items)?,
            output: self.output,
            error: self.error,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn count(value: i64) -> Result<usize, DatabaseError> {
    usize::try_from(value).map_err(|_| corrupt(format!("negative item count {}", value)))
}

fn corrupt(reason: String) -> DatabaseError {
    DatabaseError::Corrupt {
        table: TABLE,
        reason,
    }
}

/// Inserts the job and its committed references in one transaction.
pub fn insert(db: &Database, job: &JobRow, items: &[String]) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO extraction_jobs (id, owner_id, label, status, total_items,
             processed_items, output, error, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.owner_id,
                job.label,
                job.status,
                job.total_items,
                job.processed_items,
                job.output,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO extraction_job_items (job_id, arrival_index, image_ref)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (index, reference) in items.iter().enumerate() {
                stmt.execute(params![job.id, index as i64, reference])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM extraction_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    })
}

/// Committed references in arrival order.
pub fn load_items(db: &Database, job_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT image_ref FROM extraction_job_items WHERE job_id = ?1 ORDER BY arrival_index",
        )?;
        let items = stmt
            .query_map(params![job_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    })
}

/// `PENDING -> PROCESSING`.
pub fn mark_processing(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE extraction_jobs SET status = 'PROCESSING', updated_at = ?2
             WHERE id = ?1 AND status = 'PENDING'",
            params![id, now],
        )?)
    })
}

/// Raises the processed counter. Lower values and values above the total
/// leave the row untouched.
pub fn update_progress(
    db: &Database,
    id: &str,
    processed: i64,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE extraction_jobs SET processed_items = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'PROCESSING'
               AND processed_items <= ?2 AND ?2 <= total_items",
            params![id, processed, now],
        )?)
    })
}

/// `PROCESSING -> COMPLETED`, optionally with a partial-completion note.
pub fn complete(
    db: &Database,
    id: &str,
    output: &str,
    note: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE extraction_jobs
             SET status = 'COMPLETED', output = ?2, error = ?3, updated_at = ?4, completed_at = ?4
             WHERE id = ?1 AND status = 'PROCESSING'",
            params![id, output, note, now],
        )?)
    })
}

/// Any non-terminal status to `FAILED`.
pub fn fail(db: &Database, id: &str, message: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE extraction_jobs
             SET status = 'FAILED', error = ?2, updated_at = ?3, completed_at = ?3
             WHERE id = ?1 AND status IN ('PENDING', 'PROCESSING')",
            params![id, message, now],
        )?)
    })
}

/// Newest first.
pub fn list_by_owner(db: &Database, owner_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM extraction_jobs WHERE owner_id = ?1 ORDER BY created_at DESC, id",
        )?;
        let rows = stmt
            .query_map(params![owner_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn list_unfinished(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM extraction_jobs WHERE status IN ('PENDING', 'PROCESSING')
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
