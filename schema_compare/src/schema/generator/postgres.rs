//! PostgreSQL statement spelling

use super::Scripter;
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, Identity, Index, IndexExtension, IndexKind, Routine, RoutineKind,
    ScriptingOptions, Sequence, Table, View,
};
use crate::utils::naming::quote_literal;

pub struct PostgresScripter {
    options: ScriptingOptions,
}

impl PostgresScripter {
    pub fn new(options: ScriptingOptions) -> Self {
        Self { options }
    }

    fn collate_clause(&self, column: &Column) -> String {
        match &column.collation {
            Some(collation) if !self.options.ignore_collate => {
                format!(" COLLATE {}", self.quote(collation))
            }
            _ => String::new(),
        }
    }

    fn identity_clause(identity: &Identity) -> String {
        format!(
            "GENERATED BY DEFAULT AS IDENTITY (START WITH {} INCREMENT BY {})",
            identity.seed, identity.increment
        )
    }

    fn column_comment(&self, table: &Table, column: &Column) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            self.table_name(table),
            self.quote(&column.name),
            column
                .comment
                .as_deref()
                .map(quote_literal)
                .unwrap_or_else(|| "NULL".to_string())
        )
    }

    /// pg_get_viewdef and pg_get_functiondef output may carry a final `;`
    fn body(definition: &str) -> &str {
        definition.trim().trim_end_matches(';').trim_end()
    }

    fn sequence_options(sequence: &Sequence) -> String {
        format!(
            "AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} {}",
            sequence.data_type,
            sequence.increment,
            sequence.min_value,
            sequence.max_value,
            sequence.start_value,
            if sequence.cycle { "CYCLE" } else { "NO CYCLE" }
        )
    }
}

impl Scripter for PostgresScripter {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    fn options(&self) -> &ScriptingOptions {
        &self.options
    }

    fn column_definition(&self, column: &Column) -> Result<String> {
        let mut sql = format!(
            "{} {}{}",
            self.quote(&column.name),
            column.data_type,
            self.collate_clause(column)
        );

        if let Some(identity) = &column.identity {
            sql.push(' ');
            sql.push_str(&Self::identity_clause(identity));
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        Ok(sql)
    }

    fn create_table(&self, table: &Table) -> Result<Vec<String>> {
        let columns = self.creation_order(table);
        let mut definitions = Vec::new();
        for column in &columns {
            definitions.push(format!("  {}", self.column_definition(column)?));
        }
        if let Some(pk) = table.primary_key() {
            definitions.push(format!(
                "  CONSTRAINT {} PRIMARY KEY ({})",
                self.quote(&pk.name),
                self.index_columns(pk)
            ));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table_name(table),
            definitions.join(",\n")
        )];
        statements.extend(
            columns
                .iter()
                .filter(|c| c.comment.is_some())
                .map(|c| self.column_comment(table, c)),
        );
        Ok(statements)
    }

    fn add_column(&self, table: &Table, column: &Column) -> Result<Vec<String>> {
        let mut statements = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(column)?
        )];
        if column.comment.is_some() {
            statements.push(self.column_comment(table, column));
        }
        Ok(statements)
    }

    fn alter_column(
        &self,
        table: &Table,
        desired: &Column,
        current: &Column,
    ) -> Result<Vec<String>> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.table_name(table),
            self.quote(&desired.name)
        );
        let mut statements = Vec::new();

        let collation_changed =
            !self.options.ignore_collate && desired.collation != current.collation;
        if !desired.data_type.eq_ignore_ascii_case(&current.data_type) || collation_changed {
            statements.push(format!(
                "{} TYPE {}{}",
                prefix,
                desired.data_type,
                self.collate_clause(desired)
            ));
        }

        if desired.identity != current.identity {
            match (&desired.identity, &current.identity) {
                (Some(identity), None) => {
                    statements.push(format!("{} ADD {}", prefix, Self::identity_clause(identity)));
                }
                (None, Some(_)) => statements.push(format!("{} DROP IDENTITY", prefix)),
                (Some(identity), Some(_)) => statements.push(format!(
                    "{} SET START WITH {} SET INCREMENT BY {}",
                    prefix, identity.seed, identity.increment
                )),
                (None, None) => {}
            }
        }

        if desired.nullable != current.nullable {
            let action = if desired.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            statements.push(format!("{} {}", prefix, action));
        }

        if desired.default != current.default {
            match &desired.default {
                Some(default) => statements.push(format!("{} SET DEFAULT {}", prefix, default)),
                None => statements.push(format!("{} DROP DEFAULT", prefix)),
            }
        }

        if desired.comment != current.comment {
            statements.push(self.column_comment(table, desired));
        }

        Ok(statements)
    }

    fn create_index(&self, table: &Table, index: &Index) -> Result<String> {
        let table_name = self.table_name(table);
        let columns = self.index_columns(index);
        let (method, predicate) = match &index.extension {
            IndexExtension::PostgreSql { method, predicate } => {
                (method.as_str(), predicate.as_deref())
            }
            _ => ("btree", None),
        };

        let unique = match index.kind {
            IndexKind::PrimaryKey => {
                return Ok(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                    table_name,
                    self.quote(&index.name),
                    columns
                ))
            }
            IndexKind::UniqueConstraint => {
                return Ok(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                    table_name,
                    self.quote(&index.name),
                    columns
                ))
            }
            IndexKind::Unique => "UNIQUE ",
            IndexKind::Index => "",
            IndexKind::Fulltext | IndexKind::Spatial => {
                return Err(Error::ScriptingError(format!(
                    "Index {} on {} has a kind PostgreSQL cannot express",
                    index.name, table.name
                )))
            }
        };

        let mut sql =
            format!("CREATE {}INDEX {} ON {}", unique, self.quote(&index.name), table_name);
        if !method.eq_ignore_ascii_case("btree") {
            sql.push_str(&format!(" USING {}", method));
        }
        sql.push_str(&format!(" ({})", columns));
        if let Some(predicate) = predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        Ok(sql)
    }

    fn drop_index(&self, table: &Table, index: &Index) -> String {
        if index.kind.is_constraint() {
            format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                self.table_name(table),
                self.quote(&index.name)
            )
        } else {
            format!("DROP INDEX {}", self.qualified(&table.schema, &index.name))
        }
    }

    fn create_view(&self, view: &View) -> Result<String> {
        let body = Self::body(&view.definition);
        if body.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Definition of view {}.{} is not available",
                view.schema, view.name
            )));
        }
        Ok(format!(
            "CREATE VIEW {} AS\n{}",
            self.qualified(&view.schema, &view.name),
            body
        ))
    }

    fn create_routine(&self, routine: &Routine) -> Result<String> {
        let body = Self::body(&routine.definition);
        if body.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Definition of {}.{} is not available",
                routine.schema,
                routine.signature()
            )));
        }
        Ok(body.to_string())
    }

    fn drop_routine(&self, routine: &Routine) -> String {
        let keyword = match routine.kind {
            RoutineKind::Function => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        };
        format!(
            "DROP {} {}({})",
            keyword,
            self.qualified(&routine.schema, &routine.name),
            routine.arguments.as_deref().unwrap_or_default()
        )
    }

    fn create_sequence(&self, sequence: &Sequence) -> Result<String> {
        Ok(format!(
            "CREATE SEQUENCE {} {}",
            self.qualified(&sequence.schema, &sequence.name),
            Self::sequence_options(sequence)
        ))
    }

    fn alter_sequence(&self, desired: &Sequence, _current: &Sequence) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER SEQUENCE {} {}",
            self.qualified(&desired.schema, &desired.name),
            Self::sequence_options(desired)
        )])
    }

    fn drop_sequence(&self, sequence: &Sequence) -> Result<String> {
        Ok(format!("DROP SEQUENCE {}", self.qualified(&sequence.schema, &sequence.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scripter() -> PostgresScripter {
        PostgresScripter::new(ScriptingOptions {
            use_schema_name: true,
            ..Default::default()
        })
    }

    fn orders() -> Table {
        let mut table = Table::new("public", "orders");
        table.add_column(Column::new("id", "integer").identity(1, 1));
        table.add_column(Column::new("note", "text").nullable(true).collation("C"));
        table.add_index(Index::new("orders_pkey", IndexKind::PrimaryKey).column("id"));
        table
    }

    #[test]
    fn test_create_table() {
        let statements = scripter().create_table(&orders()).unwrap();
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE \"public\".\"orders\" (\n  \
                 \"id\" integer GENERATED BY DEFAULT AS IDENTITY (START WITH 1 INCREMENT BY 1) NOT NULL,\n  \
                 \"note\" text COLLATE \"C\",\n  \
                 CONSTRAINT \"orders_pkey\" PRIMARY KEY (\"id\")\n)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_alter_column_emits_one_statement_per_attribute() {
        let table = orders();
        let current = Column::new("total", "numeric(10,2)").nullable(true);
        let desired = Column::new("total", "numeric(12,2)").default("0");
        assert_eq!(
            scripter().alter_column(&table, &desired, &current).unwrap(),
            vec![
                "ALTER TABLE \"public\".\"orders\" ALTER COLUMN \"total\" TYPE numeric(12,2)",
                "ALTER TABLE \"public\".\"orders\" ALTER COLUMN \"total\" SET NOT NULL",
                "ALTER TABLE \"public\".\"orders\" ALTER COLUMN \"total\" SET DEFAULT 0",
            ]
        );
    }

    #[test]
    fn test_collation_change_is_skipped_when_ignored() {
        let scripter = PostgresScripter::new(ScriptingOptions {
            ignore_collate: true,
            ..Default::default()
        });
        let table = orders();
        let current = Column::new("note", "text").collation("C");
        let desired = Column::new("note", "text").collation("en_US");
        assert!(scripter.alter_column(&table, &desired, &current).unwrap().is_empty());
    }

    #[test]
    fn test_partial_index() {
        let mut index = Index::new("ix_open", IndexKind::Index).column("id");
        index.extension = IndexExtension::PostgreSql {
            method: "btree".to_string(),
            predicate: Some("(note IS NULL)".to_string()),
        };
        assert_eq!(
            scripter().create_index(&orders(), &index).unwrap(),
            "CREATE INDEX \"ix_open\" ON \"public\".\"orders\" (\"id\") WHERE (note IS NULL)"
        );
        assert_eq!(
            scripter().drop_index(&orders(), &index),
            "DROP INDEX \"public\".\"ix_open\""
        );
    }

    #[test]
    fn test_drop_overloaded_function() {
        let mut routine =
            Routine::new("public", "area", RoutineKind::Function, "CREATE FUNCTION ...");
        routine.arguments = Some("w integer, h integer".to_string());
        assert_eq!(
            scripter().drop_routine(&routine),
            "DROP FUNCTION \"public\".\"area\"(w integer, h integer)"
        );
    }

    #[test]
    fn test_view_body_loses_trailing_semicolon() {
        let view = View::new("public", "v", " SELECT 1;\n");
        assert_eq!(
            scripter().create_view(&view).unwrap(),
            "CREATE VIEW \"public\".\"v\" AS\nSELECT 1"
        );
    }

    #[test]
    fn test_sequence() {
        let sequence = Sequence::new("public", "order_no", "bigint");
        assert_eq!(
            scripter().create_sequence(&sequence).unwrap(),
            format!(
                "CREATE SEQUENCE \"public\".\"order_no\" AS bigint INCREMENT BY 1 MINVALUE 1 MAXVALUE {} START WITH 1 NO CYCLE",
                i64::MAX
            )
        );
    }
}
