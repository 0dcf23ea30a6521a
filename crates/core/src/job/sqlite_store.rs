//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    ActionStatus, CreateJobRequest, Job, JobEvent, JobFilter, JobPage, JobStatus, JobStore,
    JobStoreError, NewProcessingAction, ProcessingAction, StatusUpdate, WorkflowHandle,
};

const JOB_COLUMNS: &str = "id, name, origin_id, workflow_instance_id, workflow_run_id, \
     pipeline_name, pipeline_id, transfer_id, aip_id, status, decision_token, last_error, \
     created_at, started_at, completed_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                origin_id TEXT,
                workflow_instance_id TEXT NOT NULL,
                workflow_run_id TEXT NOT NULL,
                pipeline_name TEXT NOT NULL,
                pipeline_id TEXT,
                transfer_id TEXT,
                aip_id TEXT,
                status TEXT NOT NULL,
                decision_token TEXT,
                last_error TEXT,
                event TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_workflow ON jobs(workflow_instance_id);

            CREATE TABLE IF NOT EXISTS processing_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                UNIQUE(job_id, action_id)
            );
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection lock poisoned".to_string()))
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<Job>, JobStoreError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn fetch_existing(conn: &Connection, id: i64) -> Result<Job, JobStoreError> {
        Self::fetch(conn, id)?.ok_or(JobStoreError::NotFound(id))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status: String = row.get(9)?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?;

        Ok(Job {
            id: row.get(0)?,
            name: row.get(1)?,
            origin_id: row.get(2)?,
            workflow: WorkflowHandle {
                instance_id: row.get(3)?,
                run_id: row.get(4)?,
            },
            pipeline_name: row.get(5)?,
            pipeline_id: row.get(6)?,
            transfer_id: row.get(7)?,
            aip_id: row.get(8)?,
            status,
            decision_token: row.get(10)?,
            last_error: row.get(11)?,
            created_at: parse_timestamp(row.get(12)?).unwrap_or_else(Utc::now),
            started_at: row.get::<_, Option<String>>(13)?.and_then(parse_timestamp),
            completed_at: row.get::<_, Option<String>>(14)?.and_then(parse_timestamp),
        })
    }

    fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<ProcessingAction> {
        let status: String = row.get(3)?;
        let status = ActionStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown action status: {}", status).into(),
            )
        })?;

        Ok(ProcessingAction {
            id: row.get(0)?,
            action_id: row.get(1)?,
            name: row.get(2)?,
            status,
            started_at: parse_timestamp(row.get(4)?).unwrap_or_else(Utc::now),
            job_id: row.get(5)?,
        })
    }
}

fn db_err(e: rusqlite::Error) -> JobStoreError {
    JobStoreError::Database(e.to_string())
}

fn parse_timestamp(value: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;
        let now = Utc::now();
        let event_json = serde_json::to_string(&request.event)
            .map_err(|e| JobStoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (name, origin_id, workflow_instance_id, workflow_run_id, pipeline_name, status, event, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                request.name,
                request.origin_id,
                request.workflow.instance_id,
                request.workflow.run_id,
                request.pipeline_name,
                JobStatus::New.as_str(),
                event_json,
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(Job {
            id: conn.last_insert_rowid(),
            name: request.name,
            origin_id: request.origin_id,
            workflow: request.workflow,
            pipeline_name: request.pipeline_name,
            pipeline_id: None,
            transfer_id: None,
            aip_id: None,
            status: JobStatus::New,
            decision_token: None,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Job>, JobStoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn workflow_input(&self, id: i64) -> Result<Option<JobEvent>, JobStoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT event FROM jobs WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;

        // An unreadable event is reported as missing input.
        Ok(json.and_then(|json| serde_json::from_str(&json).ok()))
    }

    fn list(&self, filter: &JobFilter) -> Result<JobPage, JobStoreError> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(cursor) = filter.cursor {
            conditions.push("id <= ?");
            params.push(Box::new(cursor));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // One extra row tells us where the next page starts.
        let limit = filter.limit.max(1);
        params.push(Box::new(i64::from(limit) + 1));

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY id DESC LIMIT ?",
            JOB_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(db_err)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(db_err)?);
        }

        let next_cursor = if jobs.len() > limit as usize {
            jobs.pop().map(|job| job.id)
        } else {
            None
        };

        Ok(JobPage { jobs, next_cursor })
    }

    fn count(&self, status: Option<JobStatus>) -> Result<i64, JobStoreError> {
        let conn = self.conn()?;
        let count = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = ?",
                params![status.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0)),
        };
        count.map_err(db_err)
    }

    fn update_status(&self, id: i64, update: StatusUpdate) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;

        let completed_at = if update.status.is_terminal() {
            Some(update.completed_at.unwrap_or_else(Utc::now).to_rfc3339())
        } else {
            None
        };
        let (instance_id, run_id) = match update.workflow {
            Some(handle) => (Some(handle.instance_id), Some(handle.run_id)),
            None => (None, None),
        };

        let changed = conn
            .execute(
                r#"
                UPDATE jobs SET
                    status = ?1,
                    workflow_instance_id = COALESCE(?2, workflow_instance_id),
                    workflow_run_id = COALESCE(?3, workflow_run_id),
                    transfer_id = COALESCE(?4, transfer_id),
                    aip_id = COALESCE(?5, aip_id),
                    pipeline_id = COALESCE(?6, pipeline_id),
                    completed_at = ?7,
                    last_error = ?8,
                    decision_token = CASE WHEN ?1 = 'pending' THEN decision_token ELSE NULL END
                WHERE id = ?9
                "#,
                params![
                    update.status.as_str(),
                    instance_id,
                    run_id,
                    update.transfer_id,
                    update.aip_id,
                    update.pipeline_id,
                    completed_at,
                    update.last_error,
                    id,
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Self::fetch_existing(&conn, id)
    }

    fn set_status_in_progress(
        &self,
        id: i64,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE jobs SET
                    status = ?1,
                    started_at = COALESCE(?2, started_at),
                    completed_at = NULL,
                    decision_token = NULL,
                    last_error = NULL
                WHERE id = ?3
                "#,
                params![
                    JobStatus::InProgress.as_str(),
                    started_at.map(|t| t.to_rfc3339()),
                    id
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Self::fetch_existing(&conn, id)
    }

    fn set_status_pending(
        &self,
        id: i64,
        decision_token: &str,
        reason: &str,
    ) -> Result<Job, JobStoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE jobs SET status = ?1, decision_token = ?2, last_error = ?3, completed_at = NULL WHERE id = ?4",
                params![JobStatus::Pending.as_str(), decision_token, reason, id],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Self::fetch_existing(&conn, id)
    }

    fn append_action(&self, action: NewProcessingAction) -> Result<bool, JobStoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO processing_actions (action_id, name, status, started_at, job_id) VALUES (?, ?, ?, ?, ?)",
                params![
                    action.action_id,
                    action.name,
                    action.status.as_str(),
                    action.started_at.to_rfc3339(),
                    action.job_id,
                ],
            )
            .map_err(db_err)?;
        Ok(inserted > 0)
    }

    fn list_actions(&self, job_id: i64) -> Result<Vec<ProcessingAction>, JobStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, action_id, name, status, started_at, job_id FROM processing_actions WHERE job_id = ? ORDER BY started_at ASC, id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![job_id], Self::row_to_action)
            .map_err(db_err)?;

        let mut actions = Vec::new();
        for row in rows {
            actions.push(row.map_err(db_err)?);
        }
        Ok(actions)
    }
}
