//! Workflow store trait definition.
//!
//! Defines the storage interface for workflow instances, steps, step
//! attempts, and durable sleeps. The infrastructure layer (duraflow-infra)
//! implements this trait with SQLite persistence; an in-memory
//! implementation lives next door for tests.
//!
//! Three operations are *atomic bundles* -- multi-row writes whose
//! intermediate states must never be observable:
//!
//! - [`fail_step_and_workflow`](WorkflowStore::fail_step_and_workflow):
//!   a step attempt and its owning workflow fail together, so an observer
//!   never sees a failed attempt under a still-running workflow.
//! - [`begin_sleep`](WorkflowStore::begin_sleep): the sleep row is created
//!   and the workflow marked sleeping in one commit.
//! - [`finish_sleep`](WorkflowStore::finish_sleep): the sleep completes and
//!   the workflow returns to running in one commit.
//!
//! Uses native async fn in traits (no async_trait macro).

use duraflow_types::error::RepositoryError;
use duraflow_types::workflow::{
    SleepInstance, Step, StepInstance, StepInstanceStatus, WorkflowInstance, WorkflowStatus,
};
use serde_json::Value;
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers the four entity families of the data model:
/// - **Workflow instances:** create, status updates, guarded cancel, queries.
/// - **Steps:** find/create under the (`workflow_instance_id`, `name`)
///   unique index (violations surface as [`RepositoryError::Conflict`]).
/// - **Step instances:** create, guarded status updates, attempt queries.
/// - **Sleep instances:** find/list plus the two sleep bundles.
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflow instances
    // -----------------------------------------------------------------------

    /// Insert a new workflow instance row.
    fn create_workflow(
        &self,
        workflow: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow instance by ID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Update a workflow's status, and optionally its failure reason and
    /// output. Terminal statuses also set `completed_at`; every update
    /// touches `updated_at`.
    fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        failed_reason: Option<&str>,
        output: Option<&Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Cancel a workflow if (and only if) it is still pending, running, or
    /// sleeping. Returns `true` when the transition happened, `false` when
    /// the workflow was already terminal. Never overwrites a terminal state.
    fn cancel_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List the most recently created workflow instances.
    fn list_recent_workflows(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// List instances left `running` or `sleeping` -- candidates for resume
    /// after a host crash.
    fn list_interrupted_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Find a step by workflow and name.
    fn find_step(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Step>, RepositoryError>> + Send;

    /// Insert a step declaration. Fails with [`RepositoryError::Conflict`]
    /// when a step with the same (workflow, name) already exists.
    fn create_step(
        &self,
        step: &Step,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all steps of a workflow instance.
    fn list_steps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step instances
    // -----------------------------------------------------------------------

    /// Insert a new step attempt.
    fn create_step_instance(
        &self,
        instance: &StepInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an attempt's status, retries counter, and optionally its
    /// output / failure reason. Terminal statuses also set `completed_at`.
    /// The update is guarded: an attempt already in a terminal status is
    /// left untouched and the call fails with [`RepositoryError::NotFound`].
    fn update_step_instance(
        &self,
        id: &Uuid,
        status: StepInstanceStatus,
        retries: u32,
        output: Option<&Value>,
        failed_reason: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Find the completed attempt of a step, if any (there is at most one).
    fn find_completed_instance(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepInstance>, RepositoryError>> + Send;

    /// Find the non-terminal attempt of a step, if any (there is at most
    /// one at a time).
    fn find_open_instance(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepInstance>, RepositoryError>> + Send;

    /// List every attempt recorded against a step, oldest first.
    fn list_step_instances(
        &self,
        step_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepInstance>, RepositoryError>> + Send;

    /// Atomic bundle: mark a step attempt `failed` (with its final retries
    /// count and reason) AND mark the owning workflow `failed` in the same
    /// commit.
    fn fail_step_and_workflow(
        &self,
        instance_id: &Uuid,
        retries: u32,
        step_reason: &str,
        workflow_instance_id: &Uuid,
        workflow_reason: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Sleep instances
    // -----------------------------------------------------------------------

    /// Find a sleep by workflow and name.
    fn find_sleep(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<SleepInstance>, RepositoryError>> + Send;

    /// Atomic bundle: insert the sleep row AND mark the owning workflow
    /// `sleeping` in the same commit. Fails with
    /// [`RepositoryError::Conflict`] on a duplicate (workflow, name).
    fn begin_sleep(
        &self,
        sleep: &SleepInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomic bundle: set the sleep's `completed_at` AND mark the owning
    /// workflow `running` in the same commit.
    fn finish_sleep(
        &self,
        sleep_id: &Uuid,
        workflow_instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List every sleep of a workflow instance.
    fn list_sleeps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<SleepInstance>, RepositoryError>> + Send;
}
