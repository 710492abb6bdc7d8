use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use loom_engine::{RuntimeConfig, TransitionEvent, WorkflowRuntime};
use loom_store::{SnapshotStore, SqliteSnapshotStore};
use loom_workflow::{JsonSchema, Step, StepContext, Workflow};

const DEFAULT_NAMESPACE: &str = "workflows";

/// Loom - a workflow engine for agent pipelines
#[derive(Parser)]
#[command(name = "loom")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.loom)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect or clear persisted run snapshots
  Snapshots {
    #[command(subcommand)]
    action: SnapshotsAction,
  },

  /// Run the research/write demo workflow against the snapshot database
  Demo {
    /// Topic passed as trigger data
    #[arg(long, default_value = "rust")]
    topic: String,
  },
}

#[derive(Subcommand)]
enum SnapshotsAction {
  /// List run ids stored for a workflow, most recent first
  List {
    #[arg(long)]
    workflow: String,

    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,
  },

  /// Print the stored state of one run
  Show {
    #[arg(long)]
    workflow: String,

    #[arg(long)]
    run_id: String,

    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,
  },

  /// Delete every snapshot in a namespace
  Clear {
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".loom"),
  };

  match cli.command {
    Some(Commands::Snapshots { action }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { snapshots(action, data_dir).await })?;
    }
    Some(Commands::Demo { topic }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { demo(topic, data_dir).await })?;
    }
    None => {
      println!("loom - use --help to see available commands");
    }
  }

  Ok(())
}

async fn open_store(data_dir: &Path) -> Result<SqliteSnapshotStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let path = data_dir.join("snapshots.db");
  SqliteSnapshotStore::open(&path)
    .await
    .with_context(|| format!("failed to open snapshot database: {}", path.display()))
}

async fn snapshots(action: SnapshotsAction, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;

  match action {
    SnapshotsAction::List {
      workflow,
      namespace,
    } => {
      let runs = store
        .list_runs(&namespace, &workflow)
        .await
        .context("failed to list runs")?;
      if runs.is_empty() {
        eprintln!("No runs stored for workflow '{}'", workflow);
      }
      for run_id in runs {
        println!("{}", run_id);
      }
    }
    SnapshotsAction::Show {
      workflow,
      run_id,
      namespace,
    } => {
      let state = store
        .load(&namespace, &workflow, &run_id)
        .await
        .context("failed to load snapshot")?
        .with_context(|| format!("run '{}' not found for workflow '{}'", run_id, workflow))?;
      println!("{}", serde_json::to_string_pretty(&state)?);
    }
    SnapshotsAction::Clear { namespace } => {
      store
        .clear(&namespace)
        .await
        .context("failed to clear snapshots")?;
      eprintln!("Cleared namespace '{}'", namespace);
    }
  }

  Ok(())
}

/// `start -> research -> write`, with canned step bodies.
fn demo_workflow() -> Result<Arc<Workflow>> {
  let workflow = Workflow::builder("content-pipeline")
    .trigger_schema(JsonSchema::new(serde_json::json!({
      "type": "object",
      "properties": { "topic": { "type": "string" } },
      "required": ["topic"]
    })))
    .step(Step::new("start", |ctx: StepContext| async move {
      Ok(ctx.trigger_data().clone())
    }))
    .then(
      Step::new("research", |ctx: StepContext| async move {
        let topic = ctx.input()["topic"].as_str().unwrap_or_default().to_string();
        Ok(serde_json::json!({
          "facts": [
            format!("{} is widely used", topic),
            format!("{} has an active community", topic),
          ]
        }))
      })
      .with_input("topic", "{{ steps.start.topic }}"),
    )
    .then(
      Step::new("write", |ctx: StepContext| async move {
        let facts = ctx
          .output("research")
          .and_then(|o| o["facts"].as_array())
          .map(|facts| {
            facts
              .iter()
              .filter_map(|f| f.as_str())
              .collect::<Vec<_>>()
              .join(". ")
          })
          .unwrap_or_default();
        Ok(serde_json::json!({ "draft": format!("{}.", facts) }))
      })
      .with_output_schema(JsonSchema::new(serde_json::json!({
        "type": "object",
        "properties": { "draft": { "type": "string" } },
        "required": ["draft"]
      }))),
    )
    .commit()?;
  Ok(workflow)
}

async fn demo(topic: String, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let workflow = demo_workflow()?;
  eprintln!("Loaded workflow: {}", workflow.name());

  let runtime = WorkflowRuntime::new(workflow, Arc::new(store))
    .with_config(RuntimeConfig::with_namespace(DEFAULT_NAMESPACE));
  let run = runtime.create_run();

  run.watch(|event: &TransitionEvent<'_>| {
    match serde_json::to_string(&event.to_transition()) {
      Ok(line) => println!("{}", line),
      Err(e) => eprintln!("failed to encode transition: {}", e),
    }
  });

  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      on_signal.cancel();
    }
  });

  let state = run
    .start_with_cancel(serde_json::json!({ "topic": topic }), cancel)
    .await
    .context("workflow run failed")?;

  eprintln!("Run completed: {}", state.run_id);
  println!("{}", serde_json::to_string_pretty(&state)?);

  Ok(())
}
