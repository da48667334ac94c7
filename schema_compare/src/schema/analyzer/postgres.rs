//! PostgreSQL catalog crawler
//!
//! Reads `pg_catalog` directly so that overloads, identity columns and
//! index predicates come back exactly. System schemas and objects owned by
//! extensions are skipped.

use async_trait::async_trait;
use sqlx::{FromRow, Pool, Postgres};
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, crawl_error, group_by_name, Crawler};
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, ForeignKeyColumn, Identity, Index, IndexColumn, IndexExtension,
    IndexKind, ReferentialAction, Routine, RoutineKind, Sequence, Table, View,
};
use crate::task::TaskInfo;

const USER_SCHEMAS: &str = "NOT IN ('pg_catalog', 'information_schema') \
    AND {ns} NOT LIKE 'pg_toast%' AND {ns} NOT LIKE 'pg_temp%'";

fn user_schema_filter(column: &str) -> String {
    format!("{} {}", column, USER_SCHEMAS.replace("{ns}", column))
}

#[derive(FromRow)]
struct TableRow {
    schema_name: String,
    table_name: String,
}

#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    nullable: bool,
    column_default: Option<String>,
    collation: Option<String>,
    identity: String,
    identity_start: Option<i64>,
    identity_increment: Option<i64>,
    comment: Option<String>,
}

#[derive(FromRow)]
struct IndexRow {
    index_name: String,
    is_primary: bool,
    is_unique: bool,
    is_constraint: bool,
    method: String,
    predicate: Option<String>,
    ordinal: i32,
    column_name: Option<String>,
    descending: bool,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    ordinal: i32,
    column_name: String,
    ref_schema: String,
    ref_table: String,
    ref_column: String,
    update_rule: String,
    delete_rule: String,
}

#[derive(FromRow)]
struct ViewRow {
    schema_name: String,
    view_name: String,
    definition: Option<String>,
}

#[derive(FromRow)]
struct RoutineRow {
    schema_name: String,
    routine_name: String,
    arguments: String,
    return_type: Option<String>,
    definition: Option<String>,
}

#[derive(FromRow)]
struct SequenceRow {
    schema_name: String,
    sequence_name: String,
    data_type: String,
    start_value: i64,
    increment: i64,
    min_value: i64,
    max_value: i64,
    cycle: bool,
}

/// PostgreSQL crawler
pub struct PostgresCrawler<'a> {
    pool: &'a Pool<Postgres>,
    database: &'a str,
}

impl<'a> PostgresCrawler<'a> {
    pub fn new(pool: &'a Pool<Postgres>, database: &'a str) -> Self {
        Self { pool, database }
    }

    async fn crawl_columns(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT a.attname::text AS column_name,
                   format_type(a.atttypid, a.atttypmod) AS data_type,
                   NOT a.attnotnull AS nullable,
                   pg_get_expr(d.adbin, d.adrelid) AS column_default,
                   CASE WHEN a.attcollation <> ty.typcollation THEN co.collname::text END AS collation,
                   a.attidentity::text AS identity,
                   s.seqstart AS identity_start,
                   s.seqincrement AS identity_increment,
                   col_description(a.attrelid, a.attnum) AS comment
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_type ty ON ty.oid = a.atttypid
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            LEFT JOIN pg_collation co ON co.oid = a.attcollation
            LEFT JOIN pg_sequence s ON a.attidentity <> ''
                AND s.seqrelid = pg_get_serial_sequence(format('%I.%I', n.nspname, c.relname), a.attname)::regclass
            WHERE n.nspname = $1 AND c.relname = $2
              AND a.attnum > 0 AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        for row in rows {
            let mut column = Column::new(&row.column_name, &row.data_type);
            column.nullable = row.nullable;
            column.default = row.column_default;
            column.collation = row.collation;
            column.comment = row.comment;
            if !row.identity.is_empty() {
                column.identity = Some(Identity {
                    seed: row.identity_start.unwrap_or(1),
                    increment: row.identity_increment.unwrap_or(1),
                });
            }
            table.add_column(column);
        }
        Ok(())
    }

    async fn crawl_indexes(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT i.relname::text AS index_name,
                   ix.indisprimary AS is_primary,
                   ix.indisunique AS is_unique,
                   (con.oid IS NOT NULL) AS is_constraint,
                   am.amname::text AS method,
                   pg_get_expr(ix.indpred, ix.indrelid) AS predicate,
                   k.ord::int AS ordinal,
                   a.attname::text AS column_name,
                   (ix.indoption[(k.ord - 1)::int] & 1) = 1 AS descending
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_am am ON am.oid = i.relam
            LEFT JOIN pg_constraint con ON con.conindid = ix.indexrelid AND con.contype IN ('p', 'u')
            CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
            LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND t.relname = $2 AND k.ord <= ix.indnkeyatts
            ORDER BY i.relname, k.ord
        "#;

        let rows = sqlx::query_as::<_, IndexRow>(sql)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let mut indexes: Vec<Index> = Vec::new();
        for row in rows {
            let column_name = row.column_name.ok_or_else(|| {
                Error::CrawlError(format!(
                    "Expression index {} on {}.{} is not supported",
                    row.index_name, table.schema, table.name
                ))
            })?;

            let index = group_by_name(&mut indexes, &row.index_name, |i| &i.name, || {
                let kind = if row.is_primary {
                    IndexKind::PrimaryKey
                } else if row.is_unique && row.is_constraint {
                    IndexKind::UniqueConstraint
                } else if row.is_unique {
                    IndexKind::Unique
                } else {
                    IndexKind::Index
                };
                let mut index = Index::new(&row.index_name, kind);
                index.extension = IndexExtension::PostgreSql {
                    method: row.method.clone(),
                    predicate: row.predicate.clone(),
                };
                index
            });
            index.columns.push(IndexColumn {
                name: column_name,
                ordinal: u32::try_from(row.ordinal).map_err(crawl_error)?,
                descending: row.descending,
                prefix_length: None,
            });
        }

        indexes.into_iter().for_each(|i| table.add_index(i));
        Ok(())
    }

    async fn crawl_foreign_keys(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT con.conname::text AS constraint_name,
                   k.ord::int AS ordinal,
                   a.attname::text AS column_name,
                   rn.nspname::text AS ref_schema,
                   rt.relname::text AS ref_table,
                   ra.attname::text AS ref_column,
                   con.confupdtype::text AS update_rule,
                   con.confdeltype::text AS delete_rule
            FROM pg_constraint con
            JOIN pg_class t ON t.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_class rt ON rt.oid = con.confrelid
            JOIN pg_namespace rn ON rn.oid = rt.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refattnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refattnum
            WHERE con.contype = 'f' AND n.nspname = $1 AND t.relname = $2
            ORDER BY con.conname, k.ord
        "#;

        let rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for row in rows {
            let on_update = referential_action(&row.update_rule)?;
            let on_delete = referential_action(&row.delete_rule)?;
            let fk = group_by_name(&mut foreign_keys, &row.constraint_name, |f| &f.name, || {
                let mut fk = ForeignKey::new(&row.constraint_name, &row.ref_schema, &row.ref_table);
                fk.on_update = on_update;
                fk.on_delete = on_delete;
                fk
            });
            fk.columns.push(ForeignKeyColumn {
                ordinal: u32::try_from(row.ordinal).map_err(crawl_error)?,
                column: row.column_name,
                referenced_column: row.ref_column,
            });
        }

        foreign_keys.into_iter().for_each(|fk| table.add_foreign_key(fk));
        Ok(())
    }
}

#[async_trait]
impl<'a> Crawler for PostgresCrawler<'a> {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    fn database(&self) -> &str {
        self.database
    }

    async fn crawl_tables(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Table>> {
        let sql = format!(
            r#"
            SELECT n.nspname::text AS schema_name, c.relname::text AS table_name
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p') AND NOT c.relispartition AND {}
            ORDER BY 1, 2
            "#,
            user_schema_filter("n.nspname")
        );

        let rows = sqlx::query_as::<_, TableRow>(&sql)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut tables = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            task.set_message(format!("{}.{}", row.schema_name, row.table_name))?;

            let mut table = Table::new(&row.schema_name, &row.table_name);
            self.crawl_columns(&mut table).await?;
            self.crawl_indexes(&mut table).await?;
            self.crawl_foreign_keys(&mut table).await?;
            tables.push(table);
            task.set_progress(processed + 1, total)?;
        }

        Ok(tables)
    }

    async fn crawl_views(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<View>> {
        let sql = format!(
            r#"
            SELECT schemaname::text AS schema_name, viewname::text AS view_name, definition
            FROM pg_views
            WHERE {}
            ORDER BY 1, 2
            "#,
            user_schema_filter("schemaname")
        );

        let rows = sqlx::query_as::<_, ViewRow>(&sql)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut views = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            views.push(View::new(
                &row.schema_name,
                &row.view_name,
                row.definition.as_deref().unwrap_or_default(),
            ));
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
        let sql = format!(
            r#"
            SELECT n.nspname::text AS schema_name,
                   p.proname::text AS routine_name,
                   pg_get_function_identity_arguments(p.oid) AS arguments,
                   CASE WHEN p.prokind = 'f' THEN pg_get_function_result(p.oid) END AS return_type,
                   pg_get_functiondef(p.oid) AS definition
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            WHERE p.prokind::text = $1 AND {}
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend d
                  WHERE d.classid = 'pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e'
              )
            ORDER BY 1, 2, 3
            "#,
            user_schema_filter("n.nspname")
        );
        let prokind = match kind {
            RoutineKind::Function => "f",
            RoutineKind::Procedure => "p",
        };

        let rows = sqlx::query_as::<_, RoutineRow>(&sql)
            .bind(prokind)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut routines = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            let mut routine = Routine::new(
                &row.schema_name,
                &row.routine_name,
                kind,
                row.definition.as_deref().unwrap_or_default(),
            );
            routine.arguments = Some(row.arguments);
            routine.return_type = row.return_type;
            routines.push(routine);
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
        // Sequences backing identity columns belong to their column
        let sql = format!(
            r#"
            SELECT n.nspname::text AS schema_name,
                   c.relname::text AS sequence_name,
                   format_type(s.seqtypid, NULL) AS data_type,
                   s.seqstart AS start_value,
                   s.seqincrement AS increment,
                   s.seqmin AS min_value,
                   s.seqmax AS max_value,
                   s.seqcycle AS cycle
            FROM pg_sequence s
            JOIN pg_class c ON c.oid = s.seqrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE {}
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend d
                  WHERE d.classid = 'pg_class'::regclass AND d.objid = c.oid AND d.deptype IN ('i', 'e')
              )
            ORDER BY 1, 2
            "#,
            user_schema_filter("n.nspname")
        );

        let rows = sqlx::query_as::<_, SequenceRow>(&sql)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut sequences = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            sequences.push(Sequence {
                schema: row.schema_name,
                name: row.sequence_name,
                data_type: row.data_type,
                start_value: row.start_value,
                increment: row.increment,
                min_value: row.min_value,
                max_value: row.max_value,
                cycle: row.cycle,
            });
            task.set_progress(processed + 1, total)?;
        }
        task.set_progress(total, total)?;
        Ok(sequences)
    }
}

fn referential_action(code: &str) -> Result<ReferentialAction> {
    ReferentialAction::parse(code)
        .ok_or_else(|| Error::CrawlError(format!("Unknown referential action code: {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_schema_filter() {
        assert_eq!(
            user_schema_filter("n.nspname"),
            "n.nspname NOT IN ('pg_catalog', 'information_schema') \
             AND n.nspname NOT LIKE 'pg_toast%' AND n.nspname NOT LIKE 'pg_temp%'"
        );
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(referential_action("a").unwrap(), ReferentialAction::NoAction);
        assert_eq!(referential_action("d").unwrap(), ReferentialAction::SetDefault);
        assert!(matches!(referential_action("x"), Err(Error::CrawlError(_))));
    }
}
