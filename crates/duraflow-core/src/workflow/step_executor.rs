//! The step execution protocol.
//!
//! `StepExecutor` is the per-workflow-instance handle passed to a workflow
//! body. Its `run`/`run_with` operations turn an ordinary async function
//! into a durable, idempotent execution record:
//!
//! - a step whose completed attempt is already persisted is **memoized**:
//!   the stored output is returned and the function is not invoked;
//! - a non-terminal attempt left behind by a crashed process is **adopted**
//!   and its retries counter continues;
//! - otherwise a fresh attempt is recorded before the function runs.
//!
//! Every attempt transition (`running` -> `retrying` -> `running` ->
//! `completed`/`failed`) is persisted before the executor moves forward,
//! and step exhaustion fails the attempt and the owning workflow in one
//! atomic store commit.
//!
//! `sleep` is the durable timer: start time and duration are persisted
//! before waiting, so a restarted process recomputes the remaining time
//! from the stored record instead of starting over.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use duraflow_types::error::RepositoryError;
use duraflow_types::workflow::{
    SleepInstance, Step, StepInstance, StepInstanceStatus, StepOptions,
};
use serde_json::Value;
use uuid::Uuid;

use crate::duration::{parse_duration, DurationError};
use crate::repository::WorkflowStore;

use super::retry::backoff_delay;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by step operations.
///
/// Per-attempt failures (the user function erroring, an attempt deadline
/// elapsing, a malformed timeout string) are absorbed by the retry loop and
/// only escape as [`StepError::Exhausted`] once the retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Step and sleep names must be non-empty.
    #[error("step name must not be empty")]
    EmptyName,

    /// A duration string could not be parsed (sleep duration, retry delay).
    #[error(transparent)]
    Duration(#[from] DurationError),

    /// The final attempt failed. The message matches the failure reason
    /// recorded on the owning workflow.
    #[error("Step \"{step}\" failed: {reason}")]
    Exhausted { step: String, reason: String },

    /// The store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Per-workflow-instance step handle.
///
/// Holds two pieces of process-local state, discarded on exit:
/// a name -> step-ID cache over the (`workflow_instance_id`, `name`) unique
/// index, and a name -> output map so later steps in the same run can read
/// earlier results without a store round trip.
pub struct StepExecutor<'a, R: WorkflowStore> {
    store: &'a R,
    workflow_instance_id: Uuid,
    /// Fallback per-attempt timeout for steps that don't set their own.
    default_timeout: Option<String>,
    step_ids: HashMap<String, Uuid>,
    step_state: HashMap<String, Value>,
}

impl<'a, R: WorkflowStore> StepExecutor<'a, R> {
    /// Bind an executor to a workflow instance.
    pub fn new(store: &'a R, workflow_instance_id: Uuid) -> Self {
        Self {
            store,
            workflow_instance_id,
            default_timeout: None,
            step_ids: HashMap::new(),
            step_state: HashMap::new(),
        }
    }

    /// Apply a fallback per-attempt timeout (duration string) to every
    /// step that doesn't set `options.timeout`. Typically sourced from
    /// `EngineConfig::default_step_timeout` by the runner.
    pub fn with_default_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.default_timeout = Some(timeout.into());
        self
    }

    /// The workflow instance this executor drives.
    pub fn workflow_instance_id(&self) -> Uuid {
        self.workflow_instance_id
    }

    /// Execute a named step with default options: a single attempt,
    /// deadlined only by the executor's fallback timeout (if one is
    /// configured). See [`run_with`](Self::run_with).
    pub async fn run<F, Fut>(&mut self, name: &str, f: F) -> Result<Value, StepError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        self.run_with(name, StepOptions::default(), f).await
    }

    /// Execute a named step under the given options.
    ///
    /// `f` is invoked once per attempt (hence `FnMut`: retries re-invoke
    /// it). If a completed attempt for this step is already persisted, the
    /// stored output is returned and `f` never runs -- this is what makes a
    /// re-driven workflow skip work it already did.
    ///
    /// When `options.timeout` is set (or the executor carries a fallback
    /// timeout -- the explicit option wins), each attempt races a
    /// deadline; the losing user future is dropped, i.e. cancelled at its
    /// next await point. A deadline hit counts as an attempt failure like
    /// any other.
    pub async fn run_with<F, Fut>(
        &mut self,
        name: &str,
        options: StepOptions,
        mut f: F,
    ) -> Result<Value, StepError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        if name.trim().is_empty() {
            return Err(StepError::EmptyName);
        }

        let step_id = self.step_id(name).await?;

        // Memoization: a completed attempt short-circuits the whole run.
        if let Some(done) = self.store.find_completed_instance(&step_id).await? {
            tracing::debug!(
                workflow_id = %self.workflow_instance_id,
                step = name,
                "step already completed, returning stored output"
            );
            let output = done.output.unwrap_or(Value::Null);
            self.step_state.insert(name.to_string(), output.clone());
            return Ok(output);
        }

        // Resumption: adopt an attempt left behind by a prior process,
        // continuing its retries counter. Otherwise record a fresh one.
        let (instance_id, mut failures) =
            match self.store.find_open_instance(&step_id).await? {
                Some(open) => {
                    tracing::debug!(
                        workflow_id = %self.workflow_instance_id,
                        step = name,
                        retries = open.retries,
                        "adopting in-flight step attempt"
                    );
                    (open.id, open.retries)
                }
                None => {
                    let instance = StepInstance::new(step_id);
                    self.store.create_step_instance(&instance).await?;
                    (instance.id, 0)
                }
            };

        let limit = options.retries.as_ref().map_or(0, |r| r.limit);
        // Explicit per-step timeout wins over the engine-wide fallback.
        let timeout = options
            .timeout
            .clone()
            .or_else(|| self.default_timeout.clone());

        loop {
            match self.attempt(name, timeout.as_deref(), &mut f).await {
                Ok(output) => {
                    self.store
                        .update_step_instance(
                            &instance_id,
                            StepInstanceStatus::Completed,
                            failures,
                            Some(&output),
                            None,
                        )
                        .await?;
                    tracing::debug!(
                        workflow_id = %self.workflow_instance_id,
                        step = name,
                        retries = failures,
                        "step completed"
                    );
                    self.step_state.insert(name.to_string(), output.clone());
                    return Ok(output);
                }
                Err(reason) if failures >= limit => {
                    // Exhausted: one commit fails the attempt and the
                    // owning workflow together.
                    let workflow_reason = format!("Step \"{name}\" failed: {reason}");
                    self.store
                        .fail_step_and_workflow(
                            &instance_id,
                            failures,
                            &reason,
                            &self.workflow_instance_id,
                            &workflow_reason,
                        )
                        .await?;
                    tracing::warn!(
                        workflow_id = %self.workflow_instance_id,
                        step = name,
                        retries = failures,
                        error = reason.as_str(),
                        "step failed, retry budget exhausted"
                    );
                    return Err(StepError::Exhausted {
                        step: name.to_string(),
                        reason,
                    });
                }
                Err(reason) => {
                    failures += 1;
                    self.store
                        .update_step_instance(
                            &instance_id,
                            StepInstanceStatus::Retrying,
                            failures,
                            None,
                            Some(&reason),
                        )
                        .await?;

                    let delay = match options.retries.as_ref() {
                        Some(policy) => backoff_delay(policy, failures)?,
                        None => Duration::ZERO,
                    };
                    tracing::debug!(
                        workflow_id = %self.workflow_instance_id,
                        step = name,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = reason.as_str(),
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    self.store
                        .update_step_instance(
                            &instance_id,
                            StepInstanceStatus::Running,
                            failures,
                            None,
                            None,
                        )
                        .await?;
                }
            }
        }
    }

    /// Durable timer.
    ///
    /// The sleep record (start time + duration) is committed together with
    /// the workflow's `sleeping` status before any waiting happens, so a
    /// process restart mid-sleep resumes with exactly the remaining time.
    /// A sleep whose record is already completed returns immediately.
    pub async fn sleep(&mut self, name: &str, duration: &str) -> Result<(), StepError> {
        if name.trim().is_empty() {
            return Err(StepError::EmptyName);
        }
        let duration_ms = parse_duration(duration)?;

        let sleep = match self
            .store
            .find_sleep(&self.workflow_instance_id, name)
            .await?
        {
            Some(existing) if existing.completed_at.is_some() => {
                tracing::debug!(
                    workflow_id = %self.workflow_instance_id,
                    sleep = name,
                    "sleep already completed"
                );
                return Ok(());
            }
            Some(existing) => {
                tracing::debug!(
                    workflow_id = %self.workflow_instance_id,
                    sleep = name,
                    "resuming in-flight sleep"
                );
                existing
            }
            None => {
                let sleep = SleepInstance::new(self.workflow_instance_id, name, duration_ms);
                self.store.begin_sleep(&sleep).await?;
                sleep
            }
        };

        // Remaining time from the *persisted* start, not from this call.
        let elapsed_ms = (Utc::now() - sleep.started_at).num_milliseconds();
        let remaining_ms = sleep.duration_ms.saturating_sub(elapsed_ms);
        if remaining_ms > 0 {
            tracing::debug!(
                workflow_id = %self.workflow_instance_id,
                sleep = name,
                remaining_ms,
                "sleeping"
            );
            tokio::time::sleep(Duration::from_millis(remaining_ms as u64)).await;
        }

        self.store
            .finish_sleep(&sleep.id, &self.workflow_instance_id)
            .await?;
        Ok(())
    }

    /// The in-memory output of a step that already returned during this
    /// executor's lifetime. Not a durable read.
    pub fn state_from_step(&self, name: &str) -> Option<&Value> {
        self.step_state.get(name)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Resolve the step ID for a name, creating the declaration on first
    /// reference. Write-through cached over the unique index.
    async fn step_id(&mut self, name: &str) -> Result<Uuid, StepError> {
        if let Some(id) = self.step_ids.get(name) {
            return Ok(*id);
        }

        let step = match self
            .store
            .find_step(&self.workflow_instance_id, name)
            .await?
        {
            Some(step) => step,
            None => {
                let step = Step::new(self.workflow_instance_id, name);
                match self.store.create_step(&step).await {
                    Ok(()) => step,
                    // Lost a race on the unique index: fetch the winner.
                    Err(RepositoryError::Conflict(_)) => self
                        .store
                        .find_step(&self.workflow_instance_id, name)
                        .await?
                        .ok_or(StepError::Store(RepositoryError::NotFound))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.step_ids.insert(name.to_string(), step.id);
        Ok(step.id)
    }

    /// Run one attempt under the effective timeout, if any. Returns the
    /// failure reason on error; the caller does the retry accounting. The
    /// timeout string is parsed here, per attempt, so a malformed value
    /// counts as an attempt failure.
    async fn attempt<F, Fut>(
        &self,
        name: &str,
        timeout: Option<&str>,
        f: &mut F,
    ) -> Result<Value, String>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        match timeout {
            Some(text) => {
                let deadline_ms = parse_duration(text).map_err(|e| e.to_string())?;
                match tokio::time::timeout(
                    Duration::from_millis(deadline_ms.max(0) as u64),
                    f(),
                )
                .await
                {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_elapsed) => Err(format!("step '{name}' timed out after {text}")),
                }
            }
            None => f().await.map_err(|e| e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
