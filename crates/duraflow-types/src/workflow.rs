//! Workflow domain types for duraflow.
//!
//! Defines the four persisted entities of the engine -- `WorkflowInstance`,
//! `Step`, `StepInstance`, `SleepInstance` -- together with their status
//! enums, the per-step execution options (`StepOptions`, `RetryPolicy`),
//! the environment map injected into workflow definitions, and the eagerly
//! loaded `WorkflowState` view returned by state queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Sleeping,
    Completed,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    /// Terminal statuses are sink states: no further transitions occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Canceled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Sleeping => "sleeping",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Canceled => "canceled",
        };
        f.write_str(text)
    }
}

/// Status of a single execution attempt of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInstanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl StepInstanceStatus {
    /// Completed and failed attempts never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepInstanceStatus::Completed | StepInstanceStatus::Failed
        )
    }
}

// ---------------------------------------------------------------------------
// Persisted entities
// ---------------------------------------------------------------------------

/// A single execution of a workflow definition.
///
/// Created `Pending` by the runner, driven through
/// `Running`/`Sleeping` by the step executor, and finished in exactly one of
/// the terminal states. Owns its steps and sleeps (cascade delete).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// UUIDv7 instance ID.
    pub id: Uuid,
    /// Name of the workflow definition being executed.
    pub name: String,
    /// Current status.
    pub status: WorkflowStatus,
    /// Opaque JSON input the run was started with.
    pub input: Value,
    /// Opaque JSON output of the workflow body (set on completion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message when the workflow ends `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// When the instance row was created.
    pub created_at: DateTime<Utc>,
    /// When the instance row was last written.
    pub updated_at: DateTime<Utc>,
    /// When the instance reached a terminal state (None while live).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a fresh `Pending` instance for a definition.
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            status: WorkflowStatus::Pending,
            input,
            output: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// The durable declaration of a logical step within one workflow instance.
///
/// Unique on (`workflow_instance_id`, `name`); created on first reference
/// and never mutated. It decouples the name used in the workflow body from
/// the one-or-more execution attempts recorded against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub name: String,
}

impl Step {
    pub fn new(workflow_instance_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_instance_id,
            name: name.into(),
        }
    }
}

/// One execution attempt of a step.
///
/// There is at most one non-terminal instance per step at a time, and at
/// most one `Completed` instance per step ever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: Uuid,
    pub step_id: Uuid,
    pub status: StepInstanceStatus,
    /// Opaque JSON result of a successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure count so far; continues across process restarts.
    pub retries: u32,
    /// Error message of a failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepInstance {
    /// Create a fresh `Running` attempt with no prior failures.
    pub fn new(step_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            step_id,
            status: StepInstanceStatus::Running,
            output: None,
            retries: 0,
            failed_reason: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A durable timer bound to a workflow instance by name.
///
/// Unique on (`workflow_instance_id`, `name`). Persisting `started_at`
/// together with `duration_ms` is what makes a sleep resumable: the
/// remaining time is recomputed from the stored start on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepInstance {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub name: String,
    /// Timer length in milliseconds.
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    /// Set once the timer has fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SleepInstance {
    pub fn new(workflow_instance_id: Uuid, name: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_instance_id,
            name: name.into(),
            duration_ms,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step execution options
// ---------------------------------------------------------------------------

/// How failed step attempts are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub limit: u32,
    /// Base delay between attempts as a duration string (e.g. "5 seconds").
    pub delay: String,
    /// How the delay scales with the failure count.
    #[serde(default)]
    pub backoff: Backoff,
}

/// Scaling applied to the retry delay after failure `k`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Constant delay between attempts.
    #[default]
    Fixed,
    /// Delay doubles with each failure: `delay * 2^(k-1)`.
    Exponential,
}

/// Per-step execution options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOptions {
    /// Deadline for each attempt as a duration string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Retry policy; absent means a single attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetryPolicy>,
}

// ---------------------------------------------------------------------------
// Environment injection
// ---------------------------------------------------------------------------

/// Opaque string-keyed environment attached to a workflow definition before
/// its body runs, so user code can read secrets and configuration. The
/// engine never interprets the values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowEnv(HashMap<String, String>);

impl WorkflowEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for WorkflowEnv {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Eagerly loaded state view
// ---------------------------------------------------------------------------

/// A step together with every attempt recorded against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub instances: Vec<StepInstance>,
}

/// A workflow instance with its steps (and their attempts) and sleeps
/// eagerly loaded. Read-only query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub instance: WorkflowInstance,
    pub steps: Vec<StepRecord>,
    pub sleeps: Vec<SleepInstance>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
