//! MySQL catalog crawler
//!
//! Reads `information_schema`. Text columns are cast to `CHAR` and numbers to
//! `SIGNED` because MySQL 8 reports several of them as binary or unsigned.

use async_trait::async_trait;
use sqlx::{FromRow, MySql, Pool, Row};
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, crawl_error, group_by_name, Crawler};
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, ForeignKeyColumn, Identity, Index, IndexColumn, IndexExtension,
    IndexKind, ReferentialAction, Routine, RoutineKind, Sequence, Table, TableExtension, View,
};
use crate::task::TaskInfo;
use crate::utils::naming::{quote_identifier, quote_literal, strip_mysql_definer};

#[derive(FromRow)]
struct TableRow {
    table_name: String,
    engine: String,
    version: i64,
    character_set: String,
    collation: String,
}

#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    column_type: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
    character_set: Option<String>,
    collation: Option<String>,
    extra: String,
    comment: String,
}

#[derive(FromRow)]
struct IndexRow {
    index_name: String,
    column_name: Option<String>,
    seq_in_index: i64,
    non_unique: i64,
    index_type: String,
    collation: Option<String>,
    sub_part: Option<i64>,
}

#[derive(FromRow)]
struct ForeignKeyRow {
    constraint_name: String,
    column_name: String,
    ordinal: i64,
    ref_schema: String,
    ref_table: String,
    ref_column: String,
    update_rule: String,
    delete_rule: String,
}

#[derive(FromRow)]
struct ViewRow {
    view_name: String,
    definition: Option<String>,
}

#[derive(FromRow)]
struct RoutineRow {
    routine_name: String,
    return_type: Option<String>,
}

/// MySQL crawler
///
/// A MySQL database is its own schema, so objects are crawled with an empty
/// schema. Two databases with different names then still pair up by object
/// name, and references into other databases keep their database name.
pub struct MySqlCrawler<'a> {
    pool: &'a Pool<MySql>,
    database: &'a str,
}

impl<'a> MySqlCrawler<'a> {
    pub fn new(pool: &'a Pool<MySql>, database: &'a str) -> Self {
        Self { pool, database }
    }

    /// Schema recorded for an object living in `schema`
    fn local_schema(&self, schema: &str) -> String {
        local_schema(self.database, schema)
    }

    async fn crawl_columns(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
                   CAST(COLUMN_TYPE AS CHAR) AS column_type,
                   CAST(DATA_TYPE AS CHAR) AS data_type,
                   CAST(IS_NULLABLE AS CHAR) AS is_nullable,
                   CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
                   CAST(CHARACTER_SET_NAME AS CHAR) AS character_set,
                   CAST(COLLATION_NAME AS CHAR) AS collation,
                   CAST(EXTRA AS CHAR) AS extra,
                   CAST(COLUMN_COMMENT AS CHAR) AS comment
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query_as::<_, ColumnRow>(sql)
            .bind(self.database)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        for row in rows {
            let extra = row.extra.to_lowercase();
            let mut column = Column::new(&row.column_name, &row.column_type);
            column.nullable = row.is_nullable == "YES";
            column.default = column_default(row.column_default, &row.data_type, &extra);
            column.character_set = row.character_set;
            column.collation = row.collation;
            if extra.contains("auto_increment") {
                column.identity = Some(Identity { seed: 1, increment: 1 });
            }
            if !row.comment.is_empty() {
                column.comment = Some(row.comment);
            }
            table.add_column(column);
        }
        Ok(())
    }

    async fn crawl_indexes(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT CAST(INDEX_NAME AS CHAR) AS index_name,
                   CAST(COLUMN_NAME AS CHAR) AS column_name,
                   CAST(SEQ_IN_INDEX AS SIGNED) AS seq_in_index,
                   CAST(NON_UNIQUE AS SIGNED) AS non_unique,
                   CAST(INDEX_TYPE AS CHAR) AS index_type,
                   CAST(COLLATION AS CHAR) AS collation,
                   CAST(SUB_PART AS SIGNED) AS sub_part
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows = sqlx::query_as::<_, IndexRow>(sql)
            .bind(self.database)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let mut indexes: Vec<Index> = Vec::new();
        for row in rows {
            let column_name = row.column_name.ok_or_else(|| {
                Error::CrawlError(format!(
                    "Functional index {} on {} is not supported",
                    row.index_name, table.name
                ))
            })?;

            let ordinal = u32::try_from(row.seq_in_index).map_err(crawl_error)?;
            let prefix_length = row
                .sub_part
                .map(u32::try_from)
                .transpose()
                .map_err(crawl_error)?;
            let kind = index_kind(&row.index_name, row.non_unique, &row.index_type);
            let index = group_by_name(&mut indexes, &row.index_name, |i| &i.name, || {
                let mut index = Index::new(&row.index_name, kind);
                index.extension = IndexExtension::MySql {
                    index_type: row.index_type.clone(),
                };
                index
            });
            index.columns.push(IndexColumn {
                name: column_name,
                ordinal,
                descending: row.collation.as_deref() == Some("D"),
                prefix_length,
            });
        }

        indexes.into_iter().for_each(|i| table.add_index(i));
        Ok(())
    }

    async fn crawl_foreign_keys(&self, table: &mut Table) -> Result<()> {
        let sql = r#"
            SELECT CAST(k.CONSTRAINT_NAME AS CHAR) AS constraint_name,
                   CAST(k.COLUMN_NAME AS CHAR) AS column_name,
                   CAST(k.ORDINAL_POSITION AS SIGNED) AS ordinal,
                   CAST(k.REFERENCED_TABLE_SCHEMA AS CHAR) AS ref_schema,
                   CAST(k.REFERENCED_TABLE_NAME AS CHAR) AS ref_table,
                   CAST(k.REFERENCED_COLUMN_NAME AS CHAR) AS ref_column,
                   CAST(r.UPDATE_RULE AS CHAR) AS update_rule,
                   CAST(r.DELETE_RULE AS CHAR) AS delete_rule
            FROM information_schema.KEY_COLUMN_USAGE k
            JOIN information_schema.REFERENTIAL_CONSTRAINTS r
              ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
             AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
             AND r.TABLE_NAME = k.TABLE_NAME
            WHERE k.TABLE_SCHEMA = ? AND k.TABLE_NAME = ?
              AND k.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION
        "#;

        let rows = sqlx::query_as::<_, ForeignKeyRow>(sql)
            .bind(self.database)
            .bind(&table.name)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for row in rows {
            let on_update = referential_action(&row.update_rule)?;
            let on_delete = referential_action(&row.delete_rule)?;
            let ordinal = u32::try_from(row.ordinal).map_err(crawl_error)?;
            let ref_schema = self.local_schema(&row.ref_schema);
            let fk = group_by_name(&mut foreign_keys, &row.constraint_name, |f| &f.name, || {
                let mut fk = ForeignKey::new(&row.constraint_name, &ref_schema, &row.ref_table);
                fk.on_update = on_update;
                fk.on_delete = on_delete;
                fk
            });
            fk.columns.push(ForeignKeyColumn {
                ordinal,
                column: row.column_name,
                referenced_column: row.ref_column,
            });
        }

        foreign_keys.into_iter().for_each(|fk| table.add_foreign_key(fk));
        Ok(())
    }

    async fn show_create(&self, kind: RoutineKind, name: &str) -> Result<Option<String>> {
        let keyword = match kind {
            RoutineKind::Function => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        };
        let sql = format!(
            "SHOW CREATE {} {}.{}",
            keyword,
            quote_identifier(Dialect::MySql, self.database),
            quote_identifier(Dialect::MySql, name)
        );

        let row = sqlx::query(&sql)
            .fetch_one(self.pool)
            .await
            .map_err(crawl_error)?;
        // Column 2 is `Create Function` / `Create Procedure`; NULL without privileges
        let definition: Option<String> = row.try_get(2).map_err(crawl_error)?;
        Ok(definition.map(|d| strip_mysql_definer(&d)))
    }
}

#[async_trait]
impl<'a> Crawler for MySqlCrawler<'a> {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
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
            SELECT CAST(t.TABLE_NAME AS CHAR) AS table_name,
                   CAST(COALESCE(t.ENGINE, '') AS CHAR) AS engine,
                   CAST(COALESCE(t.VERSION, 0) AS SIGNED) AS version,
                   CAST(COALESCE(c.CHARACTER_SET_NAME, '') AS CHAR) AS character_set,
                   CAST(COALESCE(t.TABLE_COLLATION, '') AS CHAR) AS collation
            FROM information_schema.TABLES t
            LEFT JOIN information_schema.COLLATIONS c ON c.COLLATION_NAME = t.TABLE_COLLATION
            WHERE t.TABLE_SCHEMA = ? AND t.TABLE_TYPE = 'BASE TABLE'
            ORDER BY t.TABLE_NAME
        "#;

        let rows = sqlx::query_as::<_, TableRow>(sql)
            .bind(self.database)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut tables = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            task.set_message(&row.table_name)?;

            let mut table = Table::new("", &row.table_name);
            table.extension = TableExtension::MySql {
                engine: row.engine,
                version: row.version,
                character_set: row.character_set,
                collation: row.collation,
            };
            self.crawl_columns(&mut table).await?;
            self.crawl_indexes(&mut table).await?;
            self.crawl_foreign_keys(&mut table).await?;

            if table.columns.is_empty() {
                tracing::warn!(table = %table.name, "Table has no visible columns");
            }
            tables.push(table);
            task.set_progress(processed + 1, total)?;
        }

        Ok(tables)
    }

    async fn crawl_views(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<View>> {
        let sql = r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS view_name,
                   CAST(VIEW_DEFINITION AS CHAR) AS definition
            FROM information_schema.VIEWS
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query_as::<_, ViewRow>(sql)
            .bind(self.database)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut views = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            let stored = row.definition.as_deref().unwrap_or_default();
            let definition = unqualify(self.database, stored);
            views.push(View::new("", &row.view_name, &definition));
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
        let sql = r#"
            SELECT CAST(ROUTINE_NAME AS CHAR) AS routine_name,
                   CAST(DTD_IDENTIFIER AS CHAR) AS return_type
            FROM information_schema.ROUTINES
            WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = ?
            ORDER BY ROUTINE_NAME
        "#;
        let routine_type = match kind {
            RoutineKind::Function => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        };

        let rows = sqlx::query_as::<_, RoutineRow>(sql)
            .bind(self.database)
            .bind(routine_type)
            .fetch_all(self.pool)
            .await
            .map_err(crawl_error)?;

        let total = rows.len();
        let mut routines = Vec::with_capacity(total);
        for (processed, row) in rows.into_iter().enumerate() {
            check_cancelled(cancel)?;
            let definition = self.show_create(kind, &row.routine_name).await?;
            if definition.is_none() {
                tracing::warn!(routine = %row.routine_name, "Routine definition is not visible");
            }

            let mut routine = Routine::new(
                "",
                &row.routine_name,
                kind,
                definition.as_deref().unwrap_or_default(),
            );
            routine.return_type = row.return_type;
            routines.push(routine);
            task.set_progress(processed + 1, total)?;
        }

        Ok(routines)
    }

    async fn crawl_sequences(
        &self,
        task: &TaskInfo,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Sequence>> {
        task.set_progress(0, 0)?;
        Ok(Vec::new())
    }
}

/// Turn `COLUMN_DEFAULT` into an SQL expression
///
/// MySQL reports string defaults unquoted; expression defaults are flagged
/// `DEFAULT_GENERATED` in `EXTRA`.
fn column_default(default: Option<String>, data_type: &str, extra: &str) -> Option<String> {
    let value = default?;
    let upper = value.to_uppercase();

    if upper.starts_with("CURRENT_TIMESTAMP") || upper == "NULL" {
        return Some(value);
    }
    if extra.contains("default_generated") {
        return Some(format!("({})", value));
    }
    if is_numeric_type(data_type) {
        return Some(value);
    }
    if data_type.eq_ignore_ascii_case("bit") && value.starts_with("b'") {
        return Some(value);
    }
    Some(quote_literal(&value))
}

/// Empty for the crawled database itself, the database name for any other
fn local_schema(database: &str, schema: &str) -> String {
    if schema == database {
        String::new()
    } else {
        schema.to_string()
    }
}

/// Drop the crawled database's qualifier from a stored view definition
fn unqualify(database: &str, definition: &str) -> String {
    let qualifier = format!("{}.", quote_identifier(Dialect::MySql, database));
    definition.replace(&qualifier, "")
}

fn is_numeric_type(data_type: &str) -> bool {
    matches!(
        data_type.to_lowercase().as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "decimal" | "numeric"
            | "float" | "double" | "real" | "year"
    )
}

fn index_kind(name: &str, non_unique: i64, index_type: &str) -> IndexKind {
    if name == "PRIMARY" {
        IndexKind::PrimaryKey
    } else if index_type.eq_ignore_ascii_case("FULLTEXT") {
        IndexKind::Fulltext
    } else if index_type.eq_ignore_ascii_case("SPATIAL") {
        IndexKind::Spatial
    } else if non_unique == 0 {
        IndexKind::Unique
    } else {
        IndexKind::Index
    }
}

fn referential_action(rule: &str) -> Result<ReferentialAction> {
    ReferentialAction::parse(rule)
        .ok_or_else(|| Error::CrawlError(format!("Unknown referential action: {}", rule)))
}
