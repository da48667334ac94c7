//! Database schema crawler
//!
//! This module reads an existing database's catalog into a [`SchemaModel`].
//! Each engine implements [`Crawler`]; [`crawl_with`] drives any of them,
//! giving every object category its own task node and stopping at category
//! boundaries when cancellation is requested.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::db::connection::DatabaseConnection;
use crate::error::{Error, Result};
use crate::schema::types::{
    Dialect, ObjectCategory, Routine, RoutineKind, SchemaModel, Sequence, Table, View,
};
use crate::task::{settle, TaskInfo};

mod mssql;
mod mysql;
mod postgres;

pub use mssql::MsSqlCrawler;
pub use mysql::MySqlCrawler;
pub use postgres::PostgresCrawler;

/// Catalog reader for one engine
///
/// Every method reports its own progress on `task` (objects processed over
/// objects discovered) and may return [`Error::Cancelled`] between objects.
#[async_trait]
pub trait Crawler: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Name of the database being crawled
    fn database(&self) -> &str;

    /// Tables with their columns, indexes and foreign keys
    async fn crawl_tables(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<Table>>;

    async fn crawl_views(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<View>>;

    async fn crawl_routines(
        &self,
        kind: RoutineKind,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Routine>>;

    async fn crawl_sequences(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sequence>>;
}

/// Crawls the database behind a connection
pub struct SchemaCrawler<'a> {
    connection: &'a DatabaseConnection,
}

impl<'a> SchemaCrawler<'a> {
    pub fn new(connection: &'a DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Engine-specific crawler reading through the connection
    pub fn crawler(&self) -> Box<dyn Crawler + 'a> {
        match self.connection {
            DatabaseConnection::MySql { pool, database } => {
                Box::new(MySqlCrawler::new(pool, database))
            }
            DatabaseConnection::Postgres { pool, database } => {
                Box::new(PostgresCrawler::new(pool, database))
            }
            DatabaseConnection::MicrosoftSql { client, database } => {
                Box::new(MsSqlCrawler::new(client, database))
            }
        }
    }

    /// Crawl every category into a new snapshot
    pub async fn crawl(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<SchemaModel> {
        crawl_with(self.crawler().as_ref(), task, cancel).await
    }
}

/// Drive `crawler` through every category, reporting under `task`
///
/// A failing category is faulted while the others still run; the crawl then
/// fails with [`Error::CrawlError`]. On cancellation the remaining categories
/// are marked cancelled and no model is returned.
pub async fn crawl_with(
    crawler: &dyn Crawler,
    task: &TaskInfo,
    cancel: &CancellationToken,
) -> Result<SchemaModel> {
    task.start()?;
    let outcome = crawl_categories(crawler, task, cancel).await;
    settle(task, outcome)
}

async fn crawl_categories(
    crawler: &dyn Crawler,
    task: &TaskInfo,
    cancel: &CancellationToken,
) -> Result<SchemaModel> {
    let mut tasks = Vec::with_capacity(ObjectCategory::ALL.len());
    for category in ObjectCategory::ALL {
        tasks.push((category, task.add_child(category.label())?));
    }

    let mut model = SchemaModel::new(crawler.dialect(), crawler.database());
    let mut failures = Vec::new();

    for (category, category_task) in &tasks {
        if cancel.is_cancelled() {
            cancel_pending(&tasks);
            return Err(Error::Cancelled);
        }

        category_task.start()?;
        let outcome = crawl_category(crawler, *category, category_task, cancel, &mut model).await;
        match settle(category_task, outcome) {
            Ok(count) => {
                tracing::debug!(
                    database = crawler.database(),
                    category = %category,
                    objects = count,
                    "Category crawled"
                );
            }
            Err(Error::Cancelled) => {
                cancel_pending(&tasks);
                return Err(Error::Cancelled);
            }
            Err(e) => {
                tracing::error!(
                    database = crawler.database(),
                    category = %category,
                    error = %e,
                    "Category crawl failed"
                );
                failures.push(format!("{}: {}", category, e));
            }
        }
    }

    if !failures.is_empty() {
        return Err(Error::CrawlError(failures.join("; ")));
    }

    tracing::info!(
        database = crawler.database(),
        objects = model.object_count(),
        "Schema crawled"
    );
    Ok(model)
}

async fn crawl_category(
    crawler: &dyn Crawler,
    category: ObjectCategory,
    task: &TaskInfo,
    cancel: &CancellationToken,
    model: &mut SchemaModel,
) -> Result<usize> {
    let count = match category {
        ObjectCategory::Sequence => {
            let sequences = crawler.crawl_sequences(task, cancel).await?;
            let count = sequences.len();
            sequences.into_iter().for_each(|s| model.add_sequence(s));
            count
        }
        ObjectCategory::Table => {
            let tables = crawler.crawl_tables(task, cancel).await?;
            let count = tables.len();
            tables.into_iter().for_each(|t| model.add_table(t));
            count
        }
        ObjectCategory::View => {
            let views = crawler.crawl_views(task, cancel).await?;
            let count = views.len();
            views.into_iter().for_each(|v| model.add_view(v));
            count
        }
        ObjectCategory::Function | ObjectCategory::Procedure => {
            let kind = if category == ObjectCategory::Function {
                RoutineKind::Function
            } else {
                RoutineKind::Procedure
            };
            let routines = crawler.crawl_routines(kind, task, cancel).await?;
            let count = routines.len();
            routines.into_iter().for_each(|r| model.add_routine(r));
            count
        }
    };
    Ok(count)
}

fn cancel_pending(tasks: &[(ObjectCategory, TaskInfo)]) {
    for (_, task) in tasks.iter().filter(|(_, t)| !t.status().is_terminal()) {
        let _ = task.mark_cancelled();
    }
}

/// Fail with [`Error::Cancelled`] once cancellation was requested
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Driver failure while reading metadata
pub(crate) fn crawl_error(error: impl std::fmt::Display) -> Error {
    Error::CrawlError(error.to_string())
}

/// Find the group named `name` in `groups`, appending a new one if missing
///
/// Catalog queries return one row per index or key column; rows are folded
/// into one object per name while keeping first-seen order.
pub(crate) fn group_by_name<'g, T>(
    groups: &'g mut Vec<T>,
    name: &str,
    key: impl Fn(&T) -> &str,
    create: impl FnOnce() -> T,
) -> &'g mut T {
    let position = match groups.iter().position(|g| key(g) == name) {
        Some(position) => position,
        None => {
            groups.push(create());
            groups.len() - 1
        }
    };
    &mut groups[position]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{ForeignKey, Index, IndexKind};

    #[test]
    fn test_group_by_name_keeps_first_seen_order() {
        let mut indexes: Vec<Index> = Vec::new();
        for (name, column) in [("ix_b", "x"), ("ix_a", "y"), ("ix_b", "z")] {
            let index = group_by_name(&mut indexes, name, |i| &i.name, || {
                Index::new(name, IndexKind::Index)
            });
            *index = index.clone().column(column);
        }
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "ix_b");
        assert_eq!(indexes[0].columns.len(), 2);
        assert_eq!(indexes[1].columns[0].name, "y");
    }

    #[test]
    fn test_group_by_name_creates_once() {
        let mut fks: Vec<ForeignKey> = Vec::new();
        group_by_name(&mut fks, "fk", |f| &f.name, || ForeignKey::new("fk", "dbo", "p"));
        group_by_name(&mut fks, "fk", |f| &f.name, || panic!("created twice"));
        assert_eq!(fks.len(), 1);
    }
}
