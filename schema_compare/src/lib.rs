//! schema_compare: crawl two relational databases and script their differences
//!
//! A [`SchemaCompareClient`] runs one comparison: it connects to the source
//! and target databases, crawls both catalogs concurrently into
//! [`SchemaModel`]s, classifies every object with the [`SchemaComparator`]
//! and renders per-object and consolidated DDL with the [`ScriptGenerator`].
//! Progress of the whole run is reported through one [`TaskInfo`] tree.

pub mod config;
pub mod db;
pub mod error;
pub mod schema;
pub mod task;
pub mod utils;

// Re-export main types for easier access
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use error::{Error, Result};
pub use schema::analyzer::{crawl_with, Crawler, SchemaCrawler};
pub use schema::diff::{
    CompareResult, DiffState, ItemScripts, SchemaComparator, ScriptDirection,
};
pub use schema::generator::ScriptGenerator;
pub use schema::types::{Dialect, SchemaModel, ScriptingOptions};
pub use task::{settle, TaskEvent, TaskInfo, TaskSnapshot, TaskStatus};

/// Load the configuration file and create a client for it
pub fn init(config_path: &str) -> Result<SchemaCompareClient> {
    let config = config::load_from_file(config_path)?;
    Ok(SchemaCompareClient::new(config))
}

/// One comparison run between the configured source and target
///
/// The client owns the root of the run's task tree. A client runs once; its
/// task tree is final after [`SchemaCompareClient::run`] returns.
pub struct SchemaCompareClient {
    config: Config,
    task: TaskInfo,
}

impl SchemaCompareClient {
    /// Create a client from configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            task: TaskInfo::new("schema compare"),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root of the run's task tree
    pub fn task(&self) -> &TaskInfo {
        &self.task
    }

    /// Request cancellation of the run
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Receive progress events of the whole run
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.task.subscribe()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.task.snapshot()
    }

    /// Connect, crawl, compare and script
    ///
    /// The returned result has every item's scripts and both full scripts
    /// filled in.
    pub async fn run(&self) -> Result<CompareResult> {
        self.task.start()?;
        let outcome = self.connect_and_compare().await;
        settle(&self.task, outcome)
    }

    /// Compare what two crawlers read, without opening any connection
    pub async fn run_with(
        &self,
        source: &dyn Crawler,
        target: &dyn Crawler,
    ) -> Result<CompareResult> {
        self.task.start()?;
        let outcome = self.crawl_and_compare(source, target).await;
        settle(&self.task, outcome)
    }

    async fn connect_and_compare(&self) -> Result<CompareResult> {
        let cancel = self.task.cancellation_token();
        let connect_task = self.task.add_child("connect")?;

        connect_task.start()?;
        let connected = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            connections = futures::future::try_join(
                DatabaseConnection::connect(&self.config.source),
                DatabaseConnection::connect(&self.config.target),
            ) => connections,
        };
        let (source, target) = settle(&connect_task, connected)?;

        let outcome = self
            .crawl_and_compare(
                SchemaCrawler::new(&source).crawler().as_ref(),
                SchemaCrawler::new(&target).crawler().as_ref(),
            )
            .await;

        futures::join!(source.close(), target.close());
        outcome
    }

    async fn crawl_and_compare(
        &self,
        source: &dyn Crawler,
        target: &dyn Crawler,
    ) -> Result<CompareResult> {
        let cancel = self.task.cancellation_token();
        let source_task = self.task.add_weighted_child("source", 4.0)?;
        let target_task = self.task.add_weighted_child("target", 4.0)?;
        let compare_task = self.task.add_child("compare")?;
        let script_task = self.task.add_weighted_child("script", 2.0)?;

        let outcome = async {
            let (source_model, target_model) = futures::future::try_join(
                crawl_with(source, &source_task, &cancel),
                crawl_with(target, &target_task, &cancel),
            )
            .await?;

            let options = self.config.options;
            let mut result = SchemaComparator::new(options).compare(
                &source_model,
                &target_model,
                &compare_task,
                &cancel,
            )?;
            ScriptGenerator::new(result.dialect, options).script_result(
                &mut result,
                &script_task,
                &cancel,
            )?;
            Ok::<_, Error>(result)
        }
        .await;

        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Schema compare failed");
            abandon(&self.task);
        }
        outcome
    }
}

/// Mark every unfinished node below `task` as cancelled
///
/// When one side fails the other side's crawl is dropped mid-flight and never
/// settles its own nodes.
fn abandon(task: &TaskInfo) {
    for child in task.children() {
        abandon(&child);
        if !child.status().is_terminal() {
            let _ = child.mark_cancelled();
        }
    }
}
