//! Microsoft SQL Server catalog crawler
//!
//! Reads the `sys.*` catalog views over tiberius. Objects shipped with the
//! server (`is_ms_shipped`) are skipped.

use async_trait::async_trait;
use tiberius::{Row, ToSql};
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, crawl_error, group_by_name, Crawler};
use crate::db::connection::MsSqlClient;
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, ForeignKeyColumn, Identity, Index, IndexColumn, IndexExtension,
    IndexKind, ReferentialAction, Routine, RoutineKind, Sequence, Table, View,
};
use crate::task::TaskInfo;
use crate::utils::naming::qualify;

/// SQL Server crawler
pub struct MsSqlCrawler<'a> {
    client: &'a MsSqlClient,
    database: &'a str,
}

impl<'a> MsSqlCrawler<'a> {
    pub fn new(client: &'a MsSqlClient, database: &'a str) -> Self {
        Self { client, database }
    }

    async fn fetch(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>> {
        let mut client = self.client.lock().await;
        let stream = client.query(sql, params).await.map_err(crawl_error)?;
        stream.into_first_result().await.map_err(crawl_error)
    }

    async fn crawl_columns(&self, table: &mut Table, object: &str) -> Result<()> {
        let sql = r#"
            SELECT c.name AS column_name,
                   ty.name AS type_name,
                   CAST(c.max_length AS BIGINT) AS max_length,
                   CAST(c.precision AS BIGINT) AS precision,
                   CAST(c.scale AS BIGINT) AS scale,
                   c.is_nullable,
                   c.is_identity,
                   CAST(ic.seed_value AS BIGINT) AS seed,
                   CAST(ic.increment_value AS BIGINT) AS increment,
                   c.collation_name,
                   dc.name AS default_name,
                   dc.definition AS default_definition
            FROM sys.columns c
            JOIN sys.types ty ON ty.user_type_id = c.user_type_id
            LEFT JOIN sys.identity_columns ic ON ic.object_id = c.object_id AND ic.column_id = c.column_id
            LEFT JOIN sys.default_constraints dc ON dc.parent_object_id = c.object_id AND dc.parent_column_id = c.column_id
            WHERE c.object_id = OBJECT_ID(@P1)
            ORDER BY c.column_id
        "#;

        for row in self.fetch(sql, &[&object]).await? {
            let type_name = text(&row, "type_name")?;
            let data_type = format_type(
                &type_name,
                int(&row, "max_length")?,
                int(&row, "precision")?,
                int(&row, "scale")?,
            );

            let mut column = Column::new(&text(&row, "column_name")?, &data_type);
            column.nullable = flag(&row, "is_nullable")?;
            column.collation = opt_text(&row, "collation_name")?;
            column.default = opt_text(&row, "default_definition")?;
            column.default_constraint = opt_text(&row, "default_name")?;
            if flag(&row, "is_identity")? {
                column.identity = Some(Identity {
                    seed: opt_int(&row, "seed")?.unwrap_or(1),
                    increment: opt_int(&row, "increment")?.unwrap_or(1),
                });
            }
            table.add_column(column);
        }
        Ok(())
    }

    async fn crawl_indexes(&self, table: &mut Table, object: &str) -> Result<()> {
        let sql = r#"
            SELECT i.name AS index_name,
                   i.type_desc,
                   i.is_unique,
                   i.is_primary_key,
                   i.is_unique_constraint,
                   i.filter_definition,
                   CAST(ic.key_ordinal AS BIGINT) AS ordinal,
                   c.name AS column_name,
                   ic.is_descending_key
            FROM sys.indexes i
            JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.type > 0 AND ic.key_ordinal > 0
            ORDER BY i.name, ic.key_ordinal
        "#;

        let mut indexes: Vec<Index> = Vec::new();
        for row in self.fetch(sql, &[&object]).await? {
            let name = text(&row, "index_name")?;
            let type_desc = text(&row, "type_desc")?;
            let kind = if flag(&row, "is_primary_key")? {
                IndexKind::PrimaryKey
            } else if flag(&row, "is_unique_constraint")? {
                IndexKind::UniqueConstraint
            } else if type_desc == "SPATIAL" {
                IndexKind::Spatial
            } else if type_desc == "XML" {
                return Err(Error::CrawlError(format!(
                    "XML index {} on {} is not supported",
                    name, object
                )));
            } else if flag(&row, "is_unique")? {
                IndexKind::Unique
            } else {
                IndexKind::Index
            };
            let filter = opt_text(&row, "filter_definition")?;

            let index = group_by_name(&mut indexes, &name, |i| &i.name, || {
                let mut index = Index::new(&name, kind);
                index.extension = IndexExtension::MicrosoftSql {
                    clustered: type_desc == "CLUSTERED",
                    filter,
                };
                index
            });
            index.columns.push(IndexColumn {
                name: text(&row, "column_name")?,
                ordinal: u32::try_from(int(&row, "ordinal")?).map_err(crawl_error)?,
                descending: flag(&row, "is_descending_key")?,
                prefix_length: None,
            });
        }

        indexes.into_iter().for_each(|i| table.add_index(i));
        Ok(())
    }

    async fn crawl_foreign_keys(&self, table: &mut Table, object: &str) -> Result<()> {
        let sql = r#"
            SELECT fk.name AS constraint_name,
                   CAST(fkc.constraint_column_id AS BIGINT) AS ordinal,
                   pc.name AS column_name,
                   rs.name AS ref_schema,
                   rt.name AS ref_table,
                   rc.name AS ref_column,
                   fk.update_referential_action_desc AS update_rule,
                   fk.delete_referential_action_desc AS delete_rule
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id
            JOIN sys.schemas rs ON rs.schema_id = rt.schema_id
            JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
            WHERE fk.parent_object_id = OBJECT_ID(@P1)
            ORDER BY fk.name, fkc.constraint_column_id
        "#;

        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for row in self.fetch(sql, &[&object]).await? {
            let name = text(&row, "constraint_name")?;
            let on_update = referential_action(&text(&row, "update_rule")?)?;
            let on_delete = referential_action(&text(&row, "delete_rule")?)?;
            let ref_schema = text(&row, "ref_schema")?;
            let ref_table = text(&row, "ref_table")?;

            let fk = group_by_name(&mut foreign_keys, &name, |f| &f.name, || {
                let mut fk = ForeignKey::new(&name, &ref_schema, &ref_table);
                fk.on_update = on_update;
                fk.on_delete = on_delete;
                fk
            });
            fk.columns.push(ForeignKeyColumn {
                ordinal: u32::try_from(int(&row, "ordinal")?).map_err(crawl_error)?,
                column: text(&row, "column_name")?,
                referenced_column: text(&row, "ref_column")?,
            });
        }

        foreign_keys.into_iter().for_each(|fk| table.add_foreign_key(fk));
        Ok(())
    }

    /// Modules (views and routines) of the given `sys.objects` types
    async fn crawl_modules(&self, types: &str) -> Result<Vec<(String, String, String)>> {
        let sql = format!(
            r#"
            SELECT s.name AS schema_name, o.name AS object_name, m.definition
            FROM sys.objects o
            JOIN sys.schemas s ON s.schema_id = o.schema_id
            LEFT JOIN sys.sql_modules m ON m.object_id = o.object_id
            WHERE o.type IN ({}) AND o.is_ms_shipped = 0
            ORDER BY s.name, o.name
            "#,
            types
        );

        self.fetch(&sql, &[])
            .await?
            .iter()
            .map(|row| {
                Ok((
                    text(row, "schema_name")?,
                    text(row, "object_name")?,
                    opt_text(row, "definition")?.unwrap_or_default(),
                ))
            })
            .collect()
    }
}

#[async_trait]
impl<'a> Crawler for MsSqlCrawler<'a> {
    fn dialect(&self) -> Dialect {
        Dialect::MicrosoftSql
    }

    fn database(&self) -> &str {
        self.database
    }

    async fn crawl_tables(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Table>> {
        let sql = r#"
            SELECT s.name AS schema_name, t.name AS table_name
            FROM sys.tables t
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE t.is_ms_shipped = 0
            ORDER BY s.name, t.name
        "#;

        let names = self
            .fetch(sql, &[])
            .await?
            .iter()
            .map(|row| Ok((text(row, "schema_name")?, text(row, "table_name")?)))
            .collect::<Result<Vec<_>>>()?;

        let total = names.len();
        let mut tables = Vec::with_capacity(total);
        for (processed, (schema, name)) in names.into_iter().enumerate() {
            check_cancelled(cancel)?;
            task.set_message(format!("{}.{}", schema, name))?;

            let object = qualify(Dialect::MicrosoftSql, &schema, &name, true);
            let mut table = Table::new(&schema, &name);
            self.crawl_columns(&mut table, &object).await?;
            self.crawl_indexes(&mut table, &object).await?;
            self.crawl_foreign_keys(&mut table, &object).await?;
            tables.push(table);
            task.set_progress(processed + 1, total)?;
        }

        Ok(tables)
    }

    async fn crawl_views(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<View>> {
        let modules = self.crawl_modules("'V'").await?;

        let total = modules.len();
        let mut views = Vec::with_capacity(total);
        for (processed, (schema, name, definition)) in modules.into_iter().enumerate() {
            check_cancelled(cancel)?;
            views.push(View::new(&schema, &name, &definition));
            task.set_progress(processed + 1, total)?;
        }
        task.set_progress(total, total)?;
        Ok(views)
    }

    async fn crawl_routines(
        &self,
        kind: RoutineKind,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Routine>> {
        let types = match kind {
            RoutineKind::Function => "'FN', 'IF', 'TF'",
            RoutineKind::Procedure => "'P'",
        };
        let modules = self.crawl_modules(types).await?;

        let total = modules.len();
        let mut routines = Vec::with_capacity(total);
        for (processed, (schema, name, definition)) in modules.into_iter().enumerate() {
            check_cancelled(cancel)?;
            routines.push(Routine::new(&schema, &name, kind, &definition));
            task.set_progress(processed + 1, total)?;
        }
        task.set_progress(total, total)?;
        Ok(routines)
    }

    async fn crawl_sequences(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sequence>> {
        let sql = r#"
            SELECT s.name AS schema_name,
                   sq.name AS sequence_name,
                   ty.name AS type_name,
                   CAST(sq.start_value AS BIGINT) AS start_value,
                   CAST(sq.increment AS BIGINT) AS increment,
                   CAST(sq.minimum_value AS BIGINT) AS min_value,
                   CAST(sq.maximum_value AS BIGINT) AS max_value,
                   sq.is_cycling
            FROM sys.sequences sq
            JOIN sys.schemas s ON s.schema_id = sq.schema_id
            JOIN sys.types ty ON ty.user_type_id = sq.user_type_id
            ORDER BY s.name, sq.name
        "#;

        let rows = self.fetch(sql, &[]).await?;

        let total = rows.len();
        let mut sequences = Vec::with_capacity(total);
        for (processed, row) in rows.iter().enumerate() {
            check_cancelled(cancel)?;
            sequences.push(Sequence {
                schema: text(row, "schema_name")?,
                name: text(row, "sequence_name")?,
                data_type: text(row, "type_name")?,
                start_value: int(row, "start_value")?,
                increment: int(row, "increment")?,
                min_value: int(row, "min_value")?,
                max_value: int(row, "max_value")?,
                cycle: flag(row, "is_cycling")?,
            });
            task.set_progress(processed + 1, total)?;
        }
        task.set_progress(total, total)?;
        Ok(sequences)
    }
}

fn opt_text(row: &Row, column: &str) -> Result<Option<String>> {
    row.try_get::<&str, _>(column)
        .map(|v| v.map(str::to_string))
        .map_err(crawl_error)
}

fn text(row: &Row, column: &str) -> Result<String> {
    opt_text(row, column)?
        .ok_or_else(|| Error::CrawlError(format!("Unexpected NULL in column {}", column)))
}

fn opt_int(row: &Row, column: &str) -> Result<Option<i64>> {
    row.try_get::<i64, _>(column).map_err(crawl_error)
}

fn int(row: &Row, column: &str) -> Result<i64> {
    opt_int(row, column)?
        .ok_or_else(|| Error::CrawlError(format!("Unexpected NULL in column {}", column)))
}

fn flag(row: &Row, column: &str) -> Result<bool> {
    Ok(row.try_get::<bool, _>(column).map_err(crawl_error)?.unwrap_or(false))
}

/// Spell a column type the way `CREATE TABLE` expects it
fn format_type(type_name: &str, max_length: i64, precision: i64, scale: i64) -> String {
    match type_name {
        "varchar" | "char" | "varbinary" | "binary" => match max_length {
            -1 => format!("{}(max)", type_name),
            n => format!("{}({})", type_name, n),
        },
        "nvarchar" | "nchar" => match max_length {
            -1 => format!("{}(max)", type_name),
            n => format!("{}({})", type_name, n / 2),
        },
        "decimal" | "numeric" => format!("{}({},{})", type_name, precision, scale),
        "datetime2" | "datetimeoffset" | "time" => format!("{}({})", type_name, scale),
        _ => type_name.to_string(),
    }
}

fn referential_action(desc: &str) -> Result<ReferentialAction> {
    ReferentialAction::parse(desc)
        .ok_or_else(|| Error::CrawlError(format!("Unknown referential action: {}", desc)))
}
