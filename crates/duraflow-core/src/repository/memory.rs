//! In-memory implementation of `WorkflowStore`.
//!
//! Stores every entity in mutex-guarded vectors/maps. Each atomic bundle
//! runs inside a single lock section, which gives the same all-or-nothing
//! visibility the SQLite implementation gets from transactions. Useful for
//! tests and as a reference implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use duraflow_types::error::RepositoryError;
use duraflow_types::workflow::{
    SleepInstance, Step, StepInstance, StepInstanceStatus, WorkflowInstance, WorkflowStatus,
};
use serde_json::Value;
use uuid::Uuid;

use super::workflow::WorkflowStore;

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, WorkflowInstance>,
    steps: Vec<Step>,
    instances: Vec<StepInstance>,
    sleeps: Vec<SleepInstance>,
}

/// In-memory store backed by a single `Mutex`.
///
/// Cloning is cheap and all clones share the same data, so a store can be
/// handed to several concurrently running workflows in tests.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, RepositoryError> {
        self.inner
            .lock()
            .map_err(|e| RepositoryError::Query(format!("lock poisoned: {e}")))
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(&self, workflow: &WorkflowInstance) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        if inner.workflows.contains_key(&workflow.id) {
            return Err(RepositoryError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner.workflows.get(id).cloned())
    }

    async fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
        failed_reason: Option<&str>,
        output: Option<&Value>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        let workflow = inner
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;

        workflow.status = status;
        workflow.updated_at = Utc::now();
        if let Some(reason) = failed_reason {
            workflow.failed_reason = Some(reason.to_string());
        }
        if let Some(output) = output {
            workflow.output = Some(output.clone());
        }
        if status.is_terminal() && workflow.completed_at.is_none() {
            workflow.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn cancel_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut inner = self.lock()?;
        let workflow = inner
            .workflows
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;

        if workflow.status.is_terminal() {
            return Ok(false);
        }
        workflow.status = WorkflowStatus::Canceled;
        workflow.updated_at = Utc::now();
        workflow.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_recent_workflows(
        &self,
        limit: u32,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let inner = self.lock()?;
        let mut workflows: Vec<WorkflowInstance> = inner.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        workflows.truncate(limit as usize);
        Ok(workflows)
    }

    async fn list_interrupted_workflows(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let inner = self.lock()?;
        let mut workflows: Vec<WorkflowInstance> = inner
            .workflows
            .values()
            .filter(|w| {
                matches!(
                    w.status,
                    WorkflowStatus::Running | WorkflowStatus::Sleeping
                )
            })
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    async fn find_step(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> Result<Option<Step>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .steps
            .iter()
            .find(|s| &s.workflow_instance_id == workflow_instance_id && s.name == name)
            .cloned())
    }

    async fn create_step(&self, step: &Step) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        let duplicate = inner.steps.iter().any(|s| {
            s.workflow_instance_id == step.workflow_instance_id && s.name == step.name
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "step '{}' already exists for workflow {}",
                step.name, step.workflow_instance_id
            )));
        }
        inner.steps.push(step.clone());
        Ok(())
    }

    async fn list_steps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> Result<Vec<Step>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .steps
            .iter()
            .filter(|s| &s.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect())
    }

    async fn create_step_instance(&self, instance: &StepInstance) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        inner.instances.push(instance.clone());
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
        let mut inner = self.lock()?;
        let instance = inner
            .instances
            .iter_mut()
            .find(|i| &i.id == id && !i.status.is_terminal())
            .ok_or(RepositoryError::NotFound)?;

        instance.status = status;
        instance.retries = retries;
        if let Some(output) = output {
            instance.output = Some(output.clone());
        }
        if let Some(reason) = failed_reason {
            instance.failed_reason = Some(reason.to_string());
        }
        if status.is_terminal() {
            instance.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_completed_instance(
        &self,
        step_id: &Uuid,
    ) -> Result<Option<StepInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .instances
            .iter()
            .find(|i| &i.step_id == step_id && i.status == StepInstanceStatus::Completed)
            .cloned())
    }

    async fn find_open_instance(
        &self,
        step_id: &Uuid,
    ) -> Result<Option<StepInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .instances
            .iter()
            .find(|i| &i.step_id == step_id && !i.status.is_terminal())
            .cloned())
    }

    async fn list_step_instances(
        &self,
        step_id: &Uuid,
    ) -> Result<Vec<StepInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .instances
            .iter()
            .filter(|i| &i.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn fail_step_and_workflow(
        &self,
        instance_id: &Uuid,
        retries: u32,
        step_reason: &str,
        workflow_instance_id: &Uuid,
        workflow_reason: &str,
    ) -> Result<(), RepositoryError> {
        // Single lock section: both writes land together or not at all.
        let mut inner = self.lock()?;

        if !inner.workflows.contains_key(workflow_instance_id) {
            return Err(RepositoryError::NotFound);
        }

        let instance = inner
            .instances
            .iter_mut()
            .find(|i| &i.id == instance_id && !i.status.is_terminal())
            .ok_or(RepositoryError::NotFound)?;
        instance.status = StepInstanceStatus::Failed;
        instance.retries = retries;
        instance.failed_reason = Some(step_reason.to_string());
        instance.completed_at = Some(Utc::now());

        let workflow = inner
            .workflows
            .get_mut(workflow_instance_id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.status = WorkflowStatus::Failed;
        workflow.failed_reason = Some(workflow_reason.to_string());
        workflow.updated_at = Utc::now();
        workflow.completed_at = Some(Utc::now());

        Ok(())
    }

    async fn find_sleep(
        &self,
        workflow_instance_id: &Uuid,
        name: &str,
    ) -> Result<Option<SleepInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .sleeps
            .iter()
            .find(|s| &s.workflow_instance_id == workflow_instance_id && s.name == name)
            .cloned())
    }

    async fn begin_sleep(&self, sleep: &SleepInstance) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;
        if !inner.workflows.contains_key(&sleep.workflow_instance_id) {
            return Err(RepositoryError::NotFound);
        }
        let duplicate = inner.sleeps.iter().any(|s| {
            s.workflow_instance_id == sleep.workflow_instance_id && s.name == sleep.name
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "sleep '{}' already exists for workflow {}",
                sleep.name, sleep.workflow_instance_id
            )));
        }
        inner.sleeps.push(sleep.clone());

        let workflow = inner
            .workflows
            .get_mut(&sleep.workflow_instance_id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.status = WorkflowStatus::Sleeping;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_sleep(
        &self,
        sleep_id: &Uuid,
        workflow_instance_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.lock()?;

        if !inner.workflows.contains_key(workflow_instance_id) {
            return Err(RepositoryError::NotFound);
        }

        let sleep = inner
            .sleeps
            .iter_mut()
            .find(|s| &s.id == sleep_id)
            .ok_or(RepositoryError::NotFound)?;
        sleep.completed_at = Some(Utc::now());

        let workflow = inner
            .workflows
            .get_mut(workflow_instance_id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.status = WorkflowStatus::Running;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn list_sleeps(
        &self,
        workflow_instance_id: &Uuid,
    ) -> Result<Vec<SleepInstance>, RepositoryError> {
        let inner = self.lock()?;
        Ok(inner
            .sleeps
            .iter()
            .filter(|s| &s.workflow_instance_id == workflow_instance_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_workflow(store: &InMemoryWorkflowStore) -> WorkflowInstance {
        let wf = WorkflowInstance::new("test-flow", json!({}));
        store.create_workflow(&wf).await.unwrap();
        wf
    }

    #[tokio::test]
    async fn test_create_and_get_workflow() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;

        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "test-flow");
        assert_eq!(loaded.status, WorkflowStatus::Pending);

        assert!(store.get_workflow(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_workflow_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        assert!(matches!(
            store.create_workflow(&wf).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_update_sets_completed_at() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;

        store
            .update_workflow_status(&wf.id, WorkflowStatus::Completed, None, Some(&json!(42)))
            .await
            .unwrap();

        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
        assert_eq!(loaded.output, Some(json!(42)));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_is_guarded() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;

        assert!(store.cancel_workflow(&wf.id).await.unwrap());
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Canceled);

        // A second cancel (now terminal) is a no-op.
        assert!(!store.cancel_workflow(&wf.id).await.unwrap());
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_does_not_overwrite_completed() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        store
            .update_workflow_status(&wf.id, WorkflowStatus::Completed, None, None)
            .await
            .unwrap();

        assert!(!store.cancel_workflow(&wf.id).await.unwrap());
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_step_unique_index() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;

        let step = Step::new(wf.id, "gather");
        store.create_step(&step).await.unwrap();

        let duplicate = Step::new(wf.id, "gather");
        assert!(matches!(
            store.create_step(&duplicate).await,
            Err(RepositoryError::Conflict(_))
        ));

        // Same name under a different workflow is fine.
        let other = seeded_workflow(&store).await;
        store.create_step(&Step::new(other.id, "gather")).await.unwrap();
    }

    #[tokio::test]
    async fn test_step_instance_queries() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        let step = Step::new(wf.id, "gather");
        store.create_step(&step).await.unwrap();

        let attempt = StepInstance::new(step.id);
        store.create_step_instance(&attempt).await.unwrap();

        let open = store.find_open_instance(&step.id).await.unwrap().unwrap();
        assert_eq!(open.id, attempt.id);
        assert!(store
            .find_completed_instance(&step.id)
            .await
            .unwrap()
            .is_none());

        store
            .update_step_instance(
                &attempt.id,
                StepInstanceStatus::Completed,
                0,
                Some(&json!({"x": 1})),
                None,
            )
            .await
            .unwrap();

        assert!(store.find_open_instance(&step.id).await.unwrap().is_none());
        let done = store
            .find_completed_instance(&step.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.output, Some(json!({"x": 1})));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_step_instance_never_transitions() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        let step = Step::new(wf.id, "gather");
        store.create_step(&step).await.unwrap();

        let attempt = StepInstance::new(step.id);
        store.create_step_instance(&attempt).await.unwrap();
        store
            .update_step_instance(&attempt.id, StepInstanceStatus::Completed, 0, None, None)
            .await
            .unwrap();

        // Any further transition is rejected.
        assert!(matches!(
            store
                .update_step_instance(&attempt.id, StepInstanceStatus::Running, 1, None, None)
                .await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_fail_bundle_is_atomic() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        let step = Step::new(wf.id, "flaky");
        store.create_step(&step).await.unwrap();
        let attempt = StepInstance::new(step.id);
        store.create_step_instance(&attempt).await.unwrap();

        store
            .fail_step_and_workflow(&attempt.id, 3, "boom", &wf.id, "Step \"flaky\" failed: boom")
            .await
            .unwrap();

        let instances = store.list_step_instances(&step.id).await.unwrap();
        assert_eq!(instances[0].status, StepInstanceStatus::Failed);
        assert_eq!(instances[0].retries, 3);
        assert_eq!(instances[0].failed_reason.as_deref(), Some("boom"));

        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Failed);
        assert_eq!(
            loaded.failed_reason.as_deref(),
            Some("Step \"flaky\" failed: boom")
        );
    }

    #[tokio::test]
    async fn test_sleep_bundles_flip_workflow_status() {
        let store = InMemoryWorkflowStore::new();
        let wf = seeded_workflow(&store).await;
        store
            .update_workflow_status(&wf.id, WorkflowStatus::Running, None, None)
            .await
            .unwrap();

        let sleep = SleepInstance::new(wf.id, "nap", 2_000);
        store.begin_sleep(&sleep).await.unwrap();
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Sleeping);

        // Duplicate (workflow, name) is rejected.
        assert!(matches!(
            store.begin_sleep(&SleepInstance::new(wf.id, "nap", 1)).await,
            Err(RepositoryError::Conflict(_))
        ));

        store.finish_sleep(&sleep.id, &wf.id).await.unwrap();
        let loaded = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Running);

        let sleeps = store.list_sleeps(&wf.id).await.unwrap();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_interrupted_workflows() {
        let store = InMemoryWorkflowStore::new();
        let running = seeded_workflow(&store).await;
        store
            .update_workflow_status(&running.id, WorkflowStatus::Running, None, None)
            .await
            .unwrap();

        let done = seeded_workflow(&store).await;
        store
            .update_workflow_status(&done.id, WorkflowStatus::Completed, None, None)
            .await
            .unwrap();

        let interrupted = store.list_interrupted_workflows().await.unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, running.id);
    }
}
