//! Bundled demo workflow.
//!
//! A small three-phase report pipeline: compose a report from the trigger
//! input, wait out a durable pause, then publish. Each phase exercises a
//! different engine feature (retries, durable sleep, in-process state).

use duraflow_core::repository::WorkflowStore;
use duraflow_core::workflow::{StepExecutor, WorkflowHandler};
use duraflow_types::workflow::{Backoff, RetryPolicy, StepOptions, WorkflowEnv};
use serde_json::{json, Value};

/// Name of the bundled demo workflow.
pub const DAILY_REPORT: &str = "daily-report";

/// The demo definition. Reads `SIGNATURE` from the injected environment.
#[derive(Default)]
pub struct DailyReport {
    env: WorkflowEnv,
}

impl WorkflowHandler for DailyReport {
    fn name(&self) -> &str {
        DAILY_REPORT
    }

    fn bind_env(&mut self, env: WorkflowEnv) {
        self.env = env;
    }

    async fn run<R: WorkflowStore>(
        &self,
        event: Value,
        step: &mut StepExecutor<'_, R>,
    ) -> anyhow::Result<Value> {
        let subject = event
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("daily report")
            .to_string();

        step.run_with(
            "compose",
            StepOptions {
                // No explicit deadline: the configured engine-wide
                // default_step_timeout covers this attempt.
                timeout: None,
                retries: Some(RetryPolicy {
                    limit: 2,
                    delay: "500 milliseconds".to_string(),
                    backoff: Backoff::Exponential,
                }),
            },
            move || {
                let subject = subject.clone();
                async move { Ok(json!({ "body": format!("Report: {subject}") })) }
            },
        )
        .await?;

        step.sleep("pause-before-publish", "1 second").await?;

        let body = step
            .state_from_step("compose")
            .and_then(|v| v.get("body"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let signature = self.env.get("SIGNATURE").unwrap_or("unsigned").to_string();

        let published = step
            .run("publish", move || {
                let body = body.clone();
                let signature = signature.clone();
                async move { Ok(json!({ "published": body, "signed_by": signature })) }
            })
            .await?;

        Ok(published)
    }
}
