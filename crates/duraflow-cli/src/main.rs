//! duraflow CLI entry point.
//!
//! Binary name: `dflow`
//!
//! Runs, resumes, inspects, and cancels workflow instances against the
//! SQLite store. Workflow definitions are code; this binary bundles a demo
//! definition (`daily-report`) so the engine can be driven end to end.

mod demo;

use clap::{Parser, Subcommand};
use duraflow_core::workflow::WorkflowRunner;
use duraflow_infra::config::load_engine_config;
use duraflow_infra::sqlite::{DatabasePool, PoolSettings, SqliteWorkflowStore};
use duraflow_types::workflow::{WorkflowEnv, WorkflowInstance};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dflow", about = "Durable workflow engine CLI", version)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit JSON instead of styled text
    #[arg(long, global = true)]
    json: bool,

    /// Data directory (defaults to $DURAFLOW_DATA_DIR, then ~/.duraflow)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow definition to completion
    Run {
        /// Definition name (bundled: "daily-report")
        workflow: String,
        /// JSON input payload
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Resume an interrupted workflow instance
    Resume {
        /// Workflow instance ID
        id: Uuid,
    },
    /// Show an instance with its steps, attempts, and sleeps
    State {
        /// Workflow instance ID
        id: Uuid,
    },
    /// Cooperatively cancel a workflow instance
    Cancel {
        /// Workflow instance ID
        id: Uuid,
    },
    /// List recent instances
    List {
        /// Only instances left running/sleeping by a dead process
        #[arg(long)]
        interrupted: bool,
        /// Maximum number of rows
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,duraflow=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| {
        std::env::var("DURAFLOW_DATA_DIR").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{home}/.duraflow")
        })
    });
    std::fs::create_dir_all(&data_dir)?;

    let config = load_engine_config(std::path::Path::new(&data_dir)).await;
    let pool_settings = PoolSettings::from(&config);
    let database_url = config
        .database_url
        .clone()
        .unwrap_or_else(|| format!("sqlite://{data_dir}/duraflow.db?mode=rwc"));

    let pool = DatabasePool::with_settings(&database_url, pool_settings).await?;
    let store = SqliteWorkflowStore::new(pool);
    let runner = WorkflowRunner::with_env(store, env_from_process())
        .with_default_step_timeout(config.default_step_timeout);

    match cli.command {
        Commands::Run { workflow, input } => {
            let params: serde_json::Value = serde_json::from_str(&input)?;
            match workflow.as_str() {
                demo::DAILY_REPORT => {
                    let id = runner.run(demo::DailyReport::default(), params).await?;
                    print_finished(&runner, id, cli.json).await?;
                }
                other => anyhow::bail!("unknown workflow definition: '{other}'"),
            }
        }

        Commands::Resume { id } => {
            let state = runner.state(id).await?;
            match state.instance.name.as_str() {
                demo::DAILY_REPORT => {
                    let id = runner.resume(id, demo::DailyReport::default()).await?;
                    print_finished(&runner, id, cli.json).await?;
                }
                other => anyhow::bail!("unknown workflow definition: '{other}'"),
            }
        }

        Commands::State { id } => {
            let state = runner.state(id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_instance(&state.instance);
                for record in &state.steps {
                    println!(
                        "  step {} ({} attempt{})",
                        console::style(&record.step.name).cyan(),
                        record.instances.len(),
                        if record.instances.len() == 1 { "" } else { "s" },
                    );
                    for attempt in &record.instances {
                        println!(
                            "    {:?} retries={} {}",
                            attempt.status,
                            attempt.retries,
                            attempt.failed_reason.as_deref().unwrap_or(""),
                        );
                    }
                }
                for sleep in &state.sleeps {
                    println!(
                        "  sleep {} {}ms {}",
                        console::style(&sleep.name).cyan(),
                        sleep.duration_ms,
                        if sleep.completed_at.is_some() {
                            "(done)"
                        } else {
                            "(pending)"
                        },
                    );
                }
            }
        }

        Commands::Cancel { id } => {
            let canceled = runner.cancel(id).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "id": id, "canceled": canceled }));
            } else if canceled {
                println!("  {} canceled {id}", console::style("✓").green());
            } else {
                println!(
                    "  {} {id} already finished; left untouched",
                    console::style("-").dim()
                );
            }
        }

        Commands::List { interrupted, limit } => {
            let instances = if interrupted {
                runner.list_interrupted().await?
            } else {
                runner.list_recent(limit).await?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else if instances.is_empty() {
                println!("  no workflow instances");
            } else {
                for instance in &instances {
                    print_instance(instance);
                }
            }
        }
    }

    Ok(())
}

/// Collect `DURAFLOW_ENV_*` process variables into the injected environment,
/// with the prefix stripped.
fn env_from_process() -> WorkflowEnv {
    std::env::vars()
        .filter_map(|(k, v)| {
            k.strip_prefix("DURAFLOW_ENV_")
                .map(|name| (name.to_string(), v))
        })
        .collect()
}

fn print_instance(instance: &WorkflowInstance) {
    println!(
        "  {} {} [{}] {}",
        console::style(instance.id).dim(),
        console::style(&instance.name).cyan(),
        instance.status,
        instance.failed_reason.as_deref().unwrap_or(""),
    );
}

async fn print_finished(
    runner: &WorkflowRunner<SqliteWorkflowStore>,
    id: Uuid,
    json: bool,
) -> anyhow::Result<()> {
    let state = runner.state(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state.instance)?);
    } else {
        println!(
            "  {} workflow {} finished: {}",
            console::style("✓").green(),
            console::style(id).dim(),
            state.instance.status,
        );
        if let Some(output) = &state.instance.output {
            println!("  output: {output}");
        }
    }
    Ok(())
}
