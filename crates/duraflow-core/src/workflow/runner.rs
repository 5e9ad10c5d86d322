//! Workflow lifecycle driver.
//!
//! `WorkflowRunner` owns a store and an environment, and drives workflow
//! definitions through their persistent lifecycle: it creates the instance
//! row, hands the body a `StepExecutor`, and records the terminal state on
//! the way out. `resume` re-drives a non-terminal instance after a crash --
//! step memoization and durable sleeps make the replay skip work that
//! already happened.

use std::future::Future;

use duraflow_types::error::RepositoryError;
use duraflow_types::workflow::{
    StepRecord, WorkflowEnv, WorkflowInstance, WorkflowState, WorkflowStatus,
};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::WorkflowStore;

use super::step_executor::StepExecutor;

// ---------------------------------------------------------------------------
// WorkflowHandler
// ---------------------------------------------------------------------------

/// A workflow definition: a name plus an async body that receives the
/// trigger event and the step handle.
///
/// The runner injects the engine environment via [`bind_env`] before the
/// body runs, so definitions can read secrets and configuration from a
/// field on themselves.
///
/// [`bind_env`]: WorkflowHandler::bind_env
pub trait WorkflowHandler: Send + Sync {
    /// Definition identifier, recorded on every instance row.
    fn name(&self) -> &str;

    /// Receive the engine environment before the body runs.
    fn bind_env(&mut self, env: WorkflowEnv);

    /// The workflow body. May call `step.run`/`step.run_with`/`step.sleep`
    /// arbitrarily; the return value becomes the instance output.
    fn run<R: WorkflowStore>(
        &self,
        event: Value,
        step: &mut StepExecutor<'_, R>,
    ) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from runner operations.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    /// No workflow instance with this ID exists.
    #[error("workflow instance not found: {0}")]
    NotFound(Uuid),

    /// Resume was asked to re-drive an instance that already finished.
    #[error("workflow instance {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: WorkflowStatus },

    /// The workflow body failed (including exhausted step retries). The
    /// instance row records the same reason.
    #[error(transparent)]
    Workflow(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Lifecycle driver for workflow instances, generic over the store.
pub struct WorkflowRunner<R: WorkflowStore> {
    store: R,
    env: WorkflowEnv,
    default_step_timeout: Option<String>,
}

impl<R: WorkflowStore> WorkflowRunner<R> {
    /// Create a runner with an empty environment.
    pub fn new(store: R) -> Self {
        Self {
            store,
            env: WorkflowEnv::new(),
            default_step_timeout: None,
        }
    }

    /// Create a runner that injects the given environment into every
    /// definition before its body runs.
    pub fn with_env(store: R, env: WorkflowEnv) -> Self {
        Self {
            store,
            env,
            default_step_timeout: None,
        }
    }

    /// Apply a fallback per-attempt timeout (duration string) to every
    /// step that doesn't set its own. Typically sourced from
    /// `EngineConfig::default_step_timeout`.
    pub fn with_default_step_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.default_step_timeout = Some(timeout.into());
        self
    }

    /// Access the underlying store.
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Execute a workflow definition from the beginning.
    ///
    /// Creates the instance row (`pending`), binds the environment, marks
    /// the row `running`, and invokes the body. On success the instance
    /// ends `completed` with the body's output; on failure it ends `failed`
    /// with the error message and the error is returned.
    pub async fn run<W: WorkflowHandler>(
        &self,
        mut workflow: W,
        params: Value,
    ) -> Result<Uuid, RunnerError> {
        let instance = WorkflowInstance::new(workflow.name(), params.clone());
        let id = instance.id;

        if let Err(e) = self.store.create_workflow(&instance).await {
            tracing::error!(
                workflow = workflow.name(),
                error = %e,
                "failed to create workflow instance"
            );
            return Err(e.into());
        }

        workflow.bind_env(self.env.clone());
        self.store
            .update_workflow_status(&id, WorkflowStatus::Running, None, None)
            .await?;

        tracing::info!(
            workflow_id = %id,
            workflow = workflow.name(),
            "starting workflow"
        );

        self.drive(id, &workflow, params).await
    }

    /// Re-drive an existing non-terminal instance after a crash or restart.
    ///
    /// Completed steps are memoized into no-ops and an in-flight sleep
    /// finishes with its remaining time, so the body fast-forwards to where
    /// the previous process died.
    pub async fn resume<W: WorkflowHandler>(
        &self,
        id: Uuid,
        mut workflow: W,
    ) -> Result<Uuid, RunnerError> {
        let instance = self
            .store
            .get_workflow(&id)
            .await?
            .ok_or(RunnerError::NotFound(id))?;

        if instance.status.is_terminal() {
            return Err(RunnerError::AlreadyTerminal {
                id,
                status: instance.status,
            });
        }

        workflow.bind_env(self.env.clone());
        self.store
            .update_workflow_status(&id, WorkflowStatus::Running, None, None)
            .await?;

        tracing::info!(
            workflow_id = %id,
            workflow = workflow.name(),
            "resuming workflow"
        );

        self.drive(id, &workflow, instance.input).await
    }

    /// Cooperatively cancel a workflow.
    ///
    /// Sets the status flag; the currently executing body (if any) is not
    /// interrupted and observes the cancel only through state queries.
    /// Returns `false` when the instance was already terminal (the terminal
    /// state is never overwritten).
    pub async fn cancel(&self, id: Uuid) -> Result<bool, RunnerError> {
        let canceled = self.store.cancel_workflow(&id).await?;
        if canceled {
            tracing::info!(workflow_id = %id, "workflow canceled");
        } else {
            tracing::debug!(
                workflow_id = %id,
                "cancel ignored, workflow already terminal"
            );
        }
        Ok(canceled)
    }

    /// The instance with its steps (and their attempts) and sleeps eagerly
    /// loaded. Read-only.
    pub async fn state(&self, id: Uuid) -> Result<WorkflowState, RunnerError> {
        let instance = self
            .store
            .get_workflow(&id)
            .await?
            .ok_or(RunnerError::NotFound(id))?;

        let mut steps = Vec::new();
        for step in self.store.list_steps(&id).await? {
            let instances = self.store.list_step_instances(&step.id).await?;
            steps.push(StepRecord { step, instances });
        }
        let sleeps = self.store.list_sleeps(&id).await?;

        Ok(WorkflowState {
            instance,
            steps,
            sleeps,
        })
    }

    /// Most recently created instances, newest first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<WorkflowInstance>, RunnerError> {
        Ok(self.store.list_recent_workflows(limit).await?)
    }

    /// Instances left `running` or `sleeping` by a dead process --
    /// candidates for [`resume`](Self::resume).
    pub async fn list_interrupted(&self) -> Result<Vec<WorkflowInstance>, RunnerError> {
        Ok(self.store.list_interrupted_workflows().await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn drive<W: WorkflowHandler>(
        &self,
        id: Uuid,
        workflow: &W,
        params: Value,
    ) -> Result<Uuid, RunnerError> {
        let mut step = StepExecutor::new(&self.store, id);
        if let Some(timeout) = &self.default_step_timeout {
            step = step.with_default_timeout(timeout.clone());
        }

        match workflow.run(params, &mut step).await {
            Ok(output) => {
                self.store
                    .update_workflow_status(
                        &id,
                        WorkflowStatus::Completed,
                        None,
                        Some(&output),
                    )
                    .await?;
                tracing::info!(workflow_id = %id, "workflow completed");
                Ok(id)
            }
            Err(e) => {
                let reason = e.to_string();
                // Step exhaustion already failed the instance in the same
                // commit as the attempt; this write repeats the identical
                // reason, keeping the catch path idempotent. The body error
                // stays the primary error even if this write fails.
                let _ = self
                    .store
                    .update_workflow_status(
                        &id,
                        WorkflowStatus::Failed,
                        Some(&reason),
                        None,
                    )
                    .await;
                tracing::warn!(
                    workflow_id = %id,
                    error = reason.as_str(),
                    "workflow failed"
                );
                Err(RunnerError::Workflow(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowStore;
    use crate::workflow::step_executor::StepError;
    use duraflow_types::workflow::{Backoff, RetryPolicy, StepOptions};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Two-step workflow counting how often each step function actually runs.
    #[derive(Default)]
    struct TwoStep {
        calls_a: Arc<AtomicU32>,
        calls_b: Arc<AtomicU32>,
    }

    impl WorkflowHandler for TwoStep {
        fn name(&self) -> &str {
            "two-step"
        }

        fn bind_env(&mut self, _env: WorkflowEnv) {}

        async fn run<R: WorkflowStore>(
            &self,
            _event: Value,
            step: &mut StepExecutor<'_, R>,
        ) -> anyhow::Result<Value> {
            let calls_a = Arc::clone(&self.calls_a);
            let a = step
                .run("a", move || {
                    let calls_a = Arc::clone(&calls_a);
                    async move {
                        calls_a.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"x": 1}))
                    }
                })
                .await?;

            let calls_b = Arc::clone(&self.calls_b);
            let b = step
                .run("b", move || {
                    let calls_b = Arc::clone(&calls_b);
                    async move {
                        calls_b.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"y": 2}))
                    }
                })
                .await?;

            Ok(json!({ "a": a, "b": b }))
        }
    }

    /// A workflow whose single step always throws under an exponential
    /// retry policy.
    struct AlwaysFails;

    impl WorkflowHandler for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn bind_env(&mut self, _env: WorkflowEnv) {}

        async fn run<R: WorkflowStore>(
            &self,
            _event: Value,
            step: &mut StepExecutor<'_, R>,
        ) -> anyhow::Result<Value> {
            let out = step
                .run_with(
                    "flaky",
                    StepOptions {
                        timeout: None,
                        retries: Some(RetryPolicy {
                            limit: 3,
                            delay: "100 milliseconds".to_string(),
                            backoff: Backoff::Exponential,
                        }),
                    },
                    || async { anyhow::bail!("boom") },
                )
                .await?;
            Ok(out)
        }
    }

    /// Sleeps with a bad duration unit; the workflow must fail.
    struct BadSleep;

    impl WorkflowHandler for BadSleep {
        fn name(&self) -> &str {
            "bad-sleep"
        }

        fn bind_env(&mut self, _env: WorkflowEnv) {}

        async fn run<R: WorkflowStore>(
            &self,
            _event: Value,
            step: &mut StepExecutor<'_, R>,
        ) -> anyhow::Result<Value> {
            step.sleep("x", "3 fortnights").await?;
            Ok(json!(null))
        }
    }

    /// Echoes an environment binding into its output.
    #[derive(Default)]
    struct EnvReader {
        env: WorkflowEnv,
    }

    impl WorkflowHandler for EnvReader {
        fn name(&self) -> &str {
            "env-reader"
        }

        fn bind_env(&mut self, env: WorkflowEnv) {
            self.env = env;
        }

        async fn run<R: WorkflowStore>(
            &self,
            _event: Value,
            _step: &mut StepExecutor<'_, R>,
        ) -> anyhow::Result<Value> {
            Ok(json!({ "api_key": self.env.get("API_KEY") }))
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_successful_run_records_output() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let id = runner
            .run(TwoStep::default(), json!({"user": "ada"}))
            .await
            .unwrap();

        let wf = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.input, json!({"user": "ada"}));
        assert_eq!(wf.output, Some(json!({"a": {"x": 1}, "b": {"y": 2}})));
        assert!(wf.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_replay_against_same_row_is_memoized() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let workflow = TwoStep::default();
        let calls_a = Arc::clone(&workflow.calls_a);
        let calls_b = Arc::clone(&workflow.calls_b);
        let id = runner.run(workflow, json!({})).await.unwrap();
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        let first = store.get_workflow(&id).await.unwrap().unwrap();

        // Re-drive the body against the same row with a fresh executor:
        // both step functions must be skipped and the output must match.
        let replay = TwoStep {
            calls_a: Arc::clone(&calls_a),
            calls_b: Arc::clone(&calls_b),
        };
        let mut step = StepExecutor::new(&store, id);
        let output = replay.run(json!({}), &mut step).await.unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert_eq!(Some(output), first.output);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_step_fails_workflow_with_step_reason() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let err = runner.run(AlwaysFails, json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Step \"flaky\" failed: boom");

        let recent = store.list_recent_workflows(1).await.unwrap();
        let wf = &recent[0];
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert_eq!(
            wf.failed_reason.as_deref(),
            Some("Step \"flaky\" failed: boom")
        );
    }

    #[tokio::test]
    async fn test_bad_sleep_unit_fails_workflow() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let err = runner.run(BadSleep, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown duration unit"));

        let recent = store.list_recent_workflows(1).await.unwrap();
        assert_eq!(recent[0].status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_env_is_injected_before_run() {
        let store = InMemoryWorkflowStore::new();
        let mut env = WorkflowEnv::new();
        env.insert("API_KEY", "hunter2");
        let runner = WorkflowRunner::with_env(store.clone(), env);

        let id = runner.run(EnvReader::default(), json!({})).await.unwrap();
        let wf = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(wf.output, Some(json!({"api_key": "hunter2"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_step_timeout_reaches_steps() {
        let store = InMemoryWorkflowStore::new();
        let runner =
            WorkflowRunner::new(store.clone()).with_default_step_timeout("50 milliseconds");

        struct SlowStep;
        impl WorkflowHandler for SlowStep {
            fn name(&self) -> &str {
                "slow-step"
            }
            fn bind_env(&mut self, _env: WorkflowEnv) {}
            async fn run<R: WorkflowStore>(
                &self,
                _event: Value,
                step: &mut StepExecutor<'_, R>,
            ) -> anyhow::Result<Value> {
                // No per-step timeout: the runner's fallback applies.
                let out = step
                    .run("dawdle", || async {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        Ok(json!("late"))
                    })
                    .await?;
                Ok(out)
            }
        }

        let err = runner.run(SlowStep, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("timed out after 50 milliseconds"));

        let recent = store.list_recent_workflows(1).await.unwrap();
        assert_eq!(recent[0].status, WorkflowStatus::Failed);
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        // First pass: step "a" completes, step "b" dies.
        struct DiesAtB {
            calls_a: Arc<AtomicU32>,
            calls_b: Arc<AtomicU32>,
            die: bool,
        }

        impl WorkflowHandler for DiesAtB {
            fn name(&self) -> &str {
                "dies-at-b"
            }
            fn bind_env(&mut self, _env: WorkflowEnv) {}
            async fn run<R: WorkflowStore>(
                &self,
                _event: Value,
                step: &mut StepExecutor<'_, R>,
            ) -> anyhow::Result<Value> {
                let calls_a = Arc::clone(&self.calls_a);
                step.run("a", move || {
                    let calls_a = Arc::clone(&calls_a);
                    async move {
                        calls_a.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(1))
                    }
                })
                .await?;

                let calls_b = Arc::clone(&self.calls_b);
                let die = self.die;
                let b = step
                    .run("b", move || {
                        let calls_b = Arc::clone(&calls_b);
                        async move {
                            calls_b.fetch_add(1, Ordering::SeqCst);
                            if die {
                                anyhow::bail!("host died")
                            }
                            Ok(json!(2))
                        }
                    })
                    .await?;
                Ok(b)
            }
        }

        let calls_a = Arc::new(AtomicU32::new(0));
        let calls_b = Arc::new(AtomicU32::new(0));
        let first = DiesAtB {
            calls_a: Arc::clone(&calls_a),
            calls_b: Arc::clone(&calls_b),
            die: true,
        };
        let err = runner.run(first, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("host died"));
        let id = store.list_recent_workflows(1).await.unwrap()[0].id;

        // The step-level exhaustion left the instance failed (terminal), so
        // this simulates the operator re-driving after fixing the cause: we
        // flip it back to running first, as a crashed-not-failed row would be.
        store
            .update_workflow_status(&id, WorkflowStatus::Running, None, None)
            .await
            .unwrap();

        let second = DiesAtB {
            calls_a: Arc::clone(&calls_a),
            calls_b: Arc::clone(&calls_b),
            die: false,
        };
        let resumed = runner.resume(id, second).await.unwrap();
        assert_eq!(resumed, id);

        // "a" was memoized; only "b" ran again.
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 2);
        let wf = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_rejects_terminal_and_unknown() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let id = runner.run(TwoStep::default(), json!({})).await.unwrap();
        let err = runner.resume(id, TwoStep::default()).await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyTerminal { .. }));

        let err = runner
            .resume(uuid::Uuid::now_v7(), TwoStep::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_live_and_terminal() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        // A live (pending) instance cancels.
        let wf = WorkflowInstance::new("manual", json!({}));
        store.create_workflow(&wf).await.unwrap();
        assert!(runner.cancel(wf.id).await.unwrap());
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Canceled);

        // A completed instance is left alone.
        let id = runner.run(TwoStep::default(), json!({})).await.unwrap();
        assert!(!runner.cancel(id).await.unwrap());
        let loaded = store.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
    }

    // -----------------------------------------------------------------------
    // State query
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_state_is_eagerly_loaded() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        let id = runner.run(TwoStep::default(), json!({})).await.unwrap();
        let state = runner.state(id).await.unwrap();

        assert_eq!(state.instance.status, WorkflowStatus::Completed);
        assert_eq!(state.steps.len(), 2);
        for record in &state.steps {
            assert_eq!(record.instances.len(), 1);
            assert_eq!(
                record.instances[0].status,
                duraflow_types::workflow::StepInstanceStatus::Completed
            );
        }
        assert!(state.sleeps.is_empty());

        let err = runner.state(uuid::Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_ten_concurrent_workflows_complete_without_duplicates() {
        let store = InMemoryWorkflowStore::new();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let runner = WorkflowRunner::new(store.clone());
            handles.push(tokio::spawn(async move {
                runner.run(ThreeShortSteps, json!({})).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }

        for id in ids {
            let wf = store.get_workflow(&id).await.unwrap().unwrap();
            assert_eq!(wf.status, WorkflowStatus::Completed);

            let steps = store.list_steps(&id).await.unwrap();
            assert_eq!(steps.len(), 3);
            let mut names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), 3, "duplicate (workflow, name) step rows");
        }
    }

    struct ThreeShortSteps;

    impl WorkflowHandler for ThreeShortSteps {
        fn name(&self) -> &str {
            "three-short-steps"
        }
        fn bind_env(&mut self, _env: WorkflowEnv) {}
        async fn run<R: WorkflowStore>(
            &self,
            _event: Value,
            step: &mut StepExecutor<'_, R>,
        ) -> anyhow::Result<Value> {
            for name in ["one", "two", "three"] {
                step.run(name, move || async move { Ok(json!(name)) }).await?;
            }
            Ok(json!("done"))
        }
    }

    // -----------------------------------------------------------------------
    // Error surface
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_step_error_propagates_through_body_unchanged() {
        let store = InMemoryWorkflowStore::new();
        let runner = WorkflowRunner::new(store.clone());

        struct OneFailingStep;
        impl WorkflowHandler for OneFailingStep {
            fn name(&self) -> &str {
                "one-failing"
            }
            fn bind_env(&mut self, _env: WorkflowEnv) {}
            async fn run<R: WorkflowStore>(
                &self,
                _event: Value,
                step: &mut StepExecutor<'_, R>,
            ) -> anyhow::Result<Value> {
                let out = step.run("doomed", || async { anyhow::bail!("nope") }).await?;
                Ok(out)
            }
        }

        let err = runner.run(OneFailingStep, json!({})).await.unwrap_err();
        let RunnerError::Workflow(inner) = err else {
            panic!("expected workflow error");
        };
        let step_err = inner.downcast_ref::<StepError>().unwrap();
        assert!(matches!(step_err, StepError::Exhausted { .. }));
    }
}
