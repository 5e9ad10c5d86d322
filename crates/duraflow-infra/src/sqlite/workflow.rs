//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `duraflow-core` using sqlx with split
//! read/write pools. UUIDs are stored as TEXT, timestamps as RFC 3339 TEXT,
//! JSON payloads as TEXT. The three atomic bundles (step+workflow failure,
//! sleep begin, sleep finish) each run inside a writer transaction, and
//! terminal rows are protected by guarded UPDATEs.

use chrono::{DateTime, Utc};
use duraflow_core::repository::WorkflowStore;
use duraflow_types::error::RepositoryError;
use duraflow_types::workflow::{
    SleepInstance, Step, StepInstance, StepInstanceStatus, WorkflowInstance, WorkflowStatus,
};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
#[derive(Clone)]
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    status: String,
    input: String,
    output: Option<String>,
    failed_reason: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            failed_reason: row.try_get("failed_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_workflow(self) -> Result<WorkflowInstance, RepositoryError> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            name: self.name,
            status: parse_status(&self.status)?,
            input: parse_json(&self.input)?,
            output: self.output.as_deref().map(parse_json).transpose()?,
            failed_reason: self.failed_reason,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct StepInstanceRow {
    id: String,
    step_id: String,
    status: String,
    output: Option<String>,
    retries: i64,
    failed_reason: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl StepInstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            retries: row.try_get("retries")?,
            failed_reason: row.try_get("failed_reason")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_instance(self) -> Result<StepInstance, RepositoryError> {
        Ok(StepInstance {
            id: parse_uuid(&self.id)?,
            step_id: parse_uuid(&self.step_id)?,
            status: parse_status(&self.status)?,
            output: self.output.as_deref().map(parse_json).transpose()?,
            retries: self.retries as u32,
            failed_reason: self.failed_reason,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct SleepRow {
    id: String,
    workflow_instance_id: String,
    name: String,
    duration_ms: i64,
    started_at: String,
    completed_at: Option<String>,
}

impl SleepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_instance_id: row.try_get("workflow_instance_id")?,
            name: row.try_get("name")?,
            duration_ms: row.try_get("duration_ms")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_sleep(self) -> Result<SleepInstance, RepositoryError> {
        Ok(SleepInstance {
            id: parse_uuid(&self.id)?,
            workflow_instance_id: parse_uuid(&self.workflow_instance_id)?,
            name: self.name,
            duration_ms: self.duration_ms,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

fn step_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Step, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let workflow_instance_id: String = row
        .try_get("workflow_instance_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let name: String = row
        .try_get("name")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    Ok(Step {
        id: parse_uuid(&id)?,
        workflow_instance_id: parse_uuid(&workflow_instance_id)?,
        name,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid JSON: {e}")))
}

fn json_to_string(value: &Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

/// Serialize a status enum to its snake_case string form.
fn status_str<S: serde::Serialize>(status: &S) -> Result<String, RepositoryError> {
    let value = serde_json::to_value(status).map_err(|e| RepositoryError::Query(e.to_string()))?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("status did not serialize to a string".into()))
}

/// Parse a snake_case status string back into its enum.
fn parse_status<S: serde::de::DeserializeOwned>(s: &str) -> Result<S, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid status: {s}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        return db_err.message().contains("UNIQUE");
    }
    false
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn create_workflow(&self, workflow: &WorkflowInstance) -> Result<(), RepositoryError> {
        let status = status_str(&workflow.status)?;
        let input = json_to_string(&workflow.input)?;
        let output = workflow.output.as_ref().map(json_to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, name, status, input, output, failed_reason,
                created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&status)
        .bind(&input)
        .bind(&output)
        .bind(&workflow.failed_reason)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .bind(workflow.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("workflow {} already exists", workflow.id))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        failed_reason: Option<&str>,
        output: Option<&Value>,
    ) -> Result<(), RepositoryError> {
        let status_text = status_str(&status)?;
        let now = format_datetime(&Utc::now());
        let completed_at = status.is_terminal().then(|| now.clone());
        let output_text = output.map(json_to_string).transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = ?,
                   failed_reason = COALESCE(?, failed_reason),
                   output = COALESCE(?, output),
                   updated_at = ?,
                   completed_at = COALESCE(?, completed_at)
               WHERE id = ?"#,
        )
        .bind(&status_text)
        .bind(failed_reason)
        .bind(&output_text)
        .bind(&now)
        .bind(&completed_at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn cancel_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let now = format_datetime(&Utc::now());

        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = 'canceled', updated_at = ?, completed_at = ?
               WHERE id = ? AND status IN ('pending', 'running', 'sleeping')"#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already terminal" from "no such workflow".
        match self.get_workflow(id).await? {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_recent_workflows(
        &self,
        limit: u32,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_instances ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            workflows.push(r.into_workflow()?);
        }
        Ok(workflows)
    }

    async fn list_interrupted_workflows(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_instances
               WHERE status IN ('running', 'sleeping')
               ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkflowRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            workflows.push(r.into_workflow()?);
        }
        Ok(workflows)
    }

    async fn find_step(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> Result<Option<Step>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM steps WHERE workflow_instance_id = ? AND name = ?",
        )
        .bind(workflow_instance_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(step_from_row).transpose()
    }

    async fn create_step(&self, step: &Step) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO steps (id, workflow_instance_id, name) VALUES (?, ?, ?)")
            .bind(step.id.to_string())
            .bind(step.workflow_instance_id.to_string())
            .bind(&step.name)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!(
                        "step '{}' already exists for workflow {}",
                        step.name, step.workflow_instance_id
                    ))
                } else {
                    RepositoryError::Query(e.to_string())
                }
            })?;

        Ok(())
    }

    async fn list_steps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM steps WHERE workflow_instance_id = ? ORDER BY id ASC",
        )
        .bind(workflow_instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(step_from_row).collect()
    }

    async fn create_step_instance(&self, instance: &StepInstance) -> Result<(), RepositoryError> {
        let status = status_str(&instance.status)?;
        let output = instance.output.as_ref().map(json_to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO step_instances
               (id, step_id, status, output, retries, failed_reason,
                started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(instance.step_id.to_string())
        .bind(&status)
        .bind(&output)
        .bind(instance.retries as i64)
        .bind(&instance.failed_reason)
        .bind(format_datetime(&instance.started_at))
        .bind(instance.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_step_instance(
        &self,
        id: &Uuid,
        status: StepInstanceStatus,
        retries: u32,
        output: Option<&Value>,
        failed_reason: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let status_text = status_str(&status)?;
        let completed_at = status
            .is_terminal()
            .then(|| format_datetime(&Utc::now()));
        let output_text = output.map(json_to_string).transpose()?;

        // Guarded: a terminal attempt never transitions again.
        let result = sqlx::query(
            r#"UPDATE step_instances
               SET status = ?,
                   retries = ?,
                   output = COALESCE(?, output),
                   failed_reason = COALESCE(?, failed_reason),
                   completed_at = COALESCE(?, completed_at)
               WHERE id = ? AND status NOT IN ('completed', 'failed')"#,
        )
        .bind(&status_text)
        .bind(retries as i64)
        .bind(&output_text)
        .bind(failed_reason)
        .bind(&completed_at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn find_completed_instance(
        &self,
        step_id: &Uuid,
    ) -> Result<Option<StepInstance>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM step_instances WHERE step_id = ? AND status = 'completed' LIMIT 1",
        )
        .bind(step_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepInstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn find_open_instance(
        &self,
        step_id: &Uuid,
    ) -> Result<Option<StepInstance>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM step_instances
               WHERE step_id = ? AND status NOT IN ('completed', 'failed')
               LIMIT 1"#,
        )
        .bind(step_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepInstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn list_step_instances(
        &self,
        step_id: &Uuid,
    ) -> Result<Vec<StepInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_instances WHERE step_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(step_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepInstanceRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            instances.push(r.into_instance()?);
        }
        Ok(instances)
    }

    async fn fail_step_and_workflow(
        &self,
        instance_id: &Uuid,
        retries: u32,
        step_reason: &str,
        workflow_instance_id: &Uuid,
        workflow_reason: &str,
    ) -> Result<(), RepositoryError> {
        // One transaction: a failed attempt is never visible under a
        // still-running workflow.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let now = format_datetime(&Utc::now());

        let result = sqlx::query(
            r#"UPDATE step_instances
               SET status = 'failed', retries = ?, failed_reason = ?, completed_at = ?
               WHERE id = ? AND status NOT IN ('completed', 'failed')"#,
        )
        .bind(retries as i64)
        .bind(step_reason)
        .bind(&now)
        .bind(instance_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            r#"UPDATE workflow_instances
               SET status = 'failed', failed_reason = ?, updated_at = ?,
                   completed_at = COALESCE(completed_at, ?)
               WHERE id = ?"#,
        )
        .bind(workflow_reason)
        .bind(&now)
        .bind(&now)
        .bind(workflow_instance_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn find_sleep(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> Result<Option<SleepInstance>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM sleep_instances WHERE workflow_instance_id = ? AND name = ?",
        )
        .bind(workflow_instance_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = SleepRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_sleep()?))
            }
            None => Ok(None),
        }
    }

    async fn begin_sleep(&self, sleep: &SleepInstance) -> Result<(), RepositoryError> {
        // One transaction: the sleep record and the workflow's `sleeping`
        // status land together.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO sleep_instances
               (id, workflow_instance_id, name, duration_ms, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(sleep.id.to_string())
        .bind(sleep.workflow_instance_id.to_string())
        .bind(&sleep.name)
        .bind(sleep.duration_ms)
        .bind(format_datetime(&sleep.started_at))
        .bind(sleep.completed_at.as_ref().map(format_datetime))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "sleep '{}' already exists for workflow {}",
                    sleep.name, sleep.workflow_instance_id
                ))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        sqlx::query(
            "UPDATE workflow_instances SET status = 'sleeping', updated_at = ? WHERE id = ?",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(sleep.workflow_instance_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn finish_sleep(
        &self,
        sleep_id: &Uuid,
        workflow_instance_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        // One transaction: the timer completion and the workflow's return
        // to `running` land together.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let now = format_datetime(&Utc::now());

        let result = sqlx::query(
            "UPDATE sleep_instances SET completed_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(sleep_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "UPDATE workflow_instances SET status = 'running', updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(workflow_instance_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_sleeps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> Result<Vec<SleepInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM sleep_instances WHERE workflow_instance_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(workflow_instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut sleeps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = SleepRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            sleeps.push(r.into_sleep()?);
        }
        Ok(sleeps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
