//! Command line front end for schema_compare

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use schema_compare::task::TaskEventKind;
use schema_compare::utils::init_logging;
use schema_compare::{config, CompareResult, SchemaCompareClient, ScriptDirection};

#[derive(Debug, Parser)]
#[command(
    name = "schema_compare",
    version,
    about = "Compare two database schemas and script the differences"
)]
struct Args {
    /// Project file naming the source and target databases
    #[arg(short, long, default_value = "schema_compare.toml")]
    config: PathBuf,

    /// Which database the full script is meant to run on
    #[arg(short, long, value_enum)]
    direction: Option<Direction>,

    /// Write the full script here instead of the configured output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a JSON summary of every compared object
    #[arg(short, long)]
    summary: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    SourceToTarget,
    TargetToSource,
}

impl From<Direction> for ScriptDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::SourceToTarget => ScriptDirection::SourceToTarget,
            Direction::TargetToSource => ScriptDirection::TargetToSource,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.to_string_lossy().to_string();
    let config = config::load_from_file(&config_path)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&config.logging)?;

    let direction = args
        .direction
        .map(ScriptDirection::from)
        .or_else(|| config.output.as_ref().map(|o| o.direction))
        .unwrap_or(ScriptDirection::SourceToTarget);
    let write_summary = args.summary || config.output.as_ref().is_some_and(|o| o.summary_json);
    let script_path = match (&args.output, &config.output) {
        (Some(path), _) => path.clone(),
        (None, Some(output)) => output.directory.join(script_file_name(direction)),
        (None, None) => PathBuf::from(script_file_name(direction)),
    };

    let client = SchemaCompareClient::new(config);
    let progress = tokio::spawn(log_progress(client.subscribe()));

    let root = client.task().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            root.cancel();
        }
    });

    let result = client.run().await;
    interrupt.abort();
    progress.abort();

    let result = match result {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => bail!("comparison cancelled"),
        Err(e) => return Err(e).context("comparison failed"),
    };

    write_outputs(&result, direction, &script_path, write_summary)?;
    Ok(())
}

fn script_file_name(direction: ScriptDirection) -> &'static str {
    match direction {
        ScriptDirection::SourceToTarget => "source_to_target.sql",
        ScriptDirection::TargetToSource => "target_to_source.sql",
    }
}

fn write_outputs(
    result: &CompareResult,
    direction: ScriptDirection,
    script_path: &Path,
    summary: bool,
) -> anyhow::Result<()> {
    if let Some(parent) = script_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let script = result.full_script(direction).unwrap_or_default();
    std::fs::write(script_path, script)
        .with_context(|| format!("writing {}", script_path.display()))?;

    for (category, counts) in result.counts() {
        tracing::info!(
            category = %category,
            added = counts.added,
            deleted = counts.deleted,
            modified = counts.modified,
            unchanged = counts.unchanged,
            "Compared"
        );
    }
    tracing::info!(path = %script_path.display(), direction = ?direction, "Script written");

    if summary {
        let summary_path = script_path.with_extension("json");
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&summary_path, json)
            .with_context(|| format!("writing {}", summary_path.display()))?;
        tracing::info!(path = %summary_path.display(), "Summary written");
    }
    Ok(())
}

/// Forward task tree events to the log
async fn log_progress(mut events: tokio::sync::broadcast::Receiver<schema_compare::TaskEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.kind {
                TaskEventKind::Status(status) => {
                    tracing::info!(task = %event.name, status = %status, "Task")
                }
                TaskEventKind::Progress(percentage) => {
                    tracing::debug!(task = %event.name, percentage, "Progress")
                }
                TaskEventKind::Message(message) => {
                    tracing::info!(task = %event.name, message = %message, "Task message")
                }
                TaskEventKind::ChildAdded(_) => {}
            },
            Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Progress events dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}
