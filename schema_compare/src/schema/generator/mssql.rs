//! Microsoft SQL Server statement spelling
//!
//! Every statement is followed by `GO` so the script runs as separate batches
//! in SSMS and sqlcmd.

use super::Scripter;
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexExtension, IndexKind, ReferentialAction, Routine,
    RoutineKind, ScriptingOptions, Sequence, Table, View,
};

pub struct MsSqlScripter {
    options: ScriptingOptions,
}

impl MsSqlScripter {
    pub fn new(options: ScriptingOptions) -> Self {
        Self { options }
    }

    /// Type, collation and nullability; what `ALTER COLUMN` restates
    fn column_shape(&self, column: &Column) -> String {
        let mut sql = column.data_type.clone();
        let collation = column.collation.as_ref().filter(|_| !self.options.ignore_collate);
        if let Some(collation) = collation {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        sql
    }

    fn clustered(index: &Index) -> &'static str {
        match &index.extension {
            IndexExtension::MicrosoftSql { clustered: true, .. } => "CLUSTERED",
            IndexExtension::MicrosoftSql { clustered: false, .. } => "NONCLUSTERED",
            _ if index.kind == IndexKind::PrimaryKey => "CLUSTERED",
            _ => "NONCLUSTERED",
        }
    }

    fn definition<'a>(
        &self,
        kind: &str,
        schema: &str,
        name: &str,
        definition: &'a str,
    ) -> Result<&'a str> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Definition of {} {}.{} is not available (encrypted or no permission)",
                kind, schema, name
            )));
        }
        Ok(definition)
    }

    fn sequence_options(sequence: &Sequence) -> String {
        format!(
            "INCREMENT BY {} MINVALUE {} MAXVALUE {} {}",
            sequence.increment,
            sequence.min_value,
            sequence.max_value,
            if sequence.cycle { "CYCLE" } else { "NO CYCLE" }
        )
    }
}

impl Scripter for MsSqlScripter {
    fn dialect(&self) -> Dialect {
        Dialect::MicrosoftSql
    }

    fn options(&self) -> &ScriptingOptions {
        &self.options
    }

    fn terminator(&self) -> &'static str {
        "\nGO"
    }

    fn column_definition(&self, column: &Column) -> Result<String> {
        let mut sql = format!("{} {}", self.quote(&column.name), column.data_type);
        let collation = column.collation.as_ref().filter(|_| !self.options.ignore_collate);
        if let Some(collation) = collation {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        if let Some(identity) = &column.identity {
            sql.push_str(&format!(" IDENTITY({},{})", identity.seed, identity.increment));
        }
        sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = &column.default {
            match &column.default_constraint {
                Some(name) => {
                    sql.push_str(&format!(" CONSTRAINT {} DEFAULT {}", self.quote(name), default))
                }
                None => sql.push_str(&format!(" DEFAULT {}", default)),
            }
        }
        Ok(sql)
    }

    fn create_table(&self, table: &Table) -> Result<Vec<String>> {
        let mut definitions = Vec::new();
        for column in self.creation_order(table) {
            definitions.push(format!("  {}", self.column_definition(column)?));
        }
        if let Some(pk) = table.primary_key() {
            definitions.push(format!(
                "  CONSTRAINT {} PRIMARY KEY {} ({})",
                self.quote(&pk.name),
                Self::clustered(pk),
                self.index_columns(pk)
            ));
        }

        Ok(vec![format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table_name(table),
            definitions.join(",\n")
        )])
    }

    fn add_column(&self, table: &Table, column: &Column) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD {}",
            self.table_name(table),
            self.column_definition(column)?
        )])
    }

    // The default constraint has to go before the column can
    fn drop_column(&self, table: &Table, column: &Column) -> Vec<String> {
        let table_name = self.table_name(table);
        let mut statements = Vec::new();
        if let Some(constraint) = &column.default_constraint {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                table_name,
                self.quote(constraint)
            ));
        }
        statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            table_name,
            self.quote(&column.name)
        ));
        statements
    }

    fn alter_column(
        &self,
        table: &Table,
        desired: &Column,
        current: &Column,
    ) -> Result<Vec<String>> {
        if desired.identity != current.identity {
            return Err(Error::ScriptingError(format!(
                "SQL Server cannot change the identity of existing column {}.{}",
                table.name, desired.name
            )));
        }

        let table_name = self.table_name(table);
        let column_name = self.quote(&desired.name);
        let mut statements = Vec::new();
        let default_changed = desired.default != current.default;

        if default_changed && current.default.is_some() {
            let constraint = current.default_constraint.as_ref().ok_or_else(|| {
                Error::ScriptingError(format!(
                    "Default of {}.{} has no constraint name to drop",
                    table.name, current.name
                ))
            })?;
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                table_name,
                self.quote(constraint)
            ));
        }

        if self.column_shape(desired) != self.column_shape(current) {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                table_name,
                column_name,
                self.column_shape(desired)
            ));
        }

        if default_changed {
            if let Some(default) = &desired.default {
                let constraint = desired
                    .default_constraint
                    .as_ref()
                    .map(|name| format!("CONSTRAINT {} ", self.quote(name)))
                    .unwrap_or_default();
                statements.push(format!(
                    "ALTER TABLE {} ADD {}DEFAULT {} FOR {}",
                    table_name, constraint, default, column_name
                ));
            }
        }

        Ok(statements)
    }

    fn create_index(&self, table: &Table, index: &Index) -> Result<String> {
        let table_name = self.table_name(table);
        let columns = self.index_columns(index);
        let sql = match index.kind {
            IndexKind::PrimaryKey => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY {} ({})",
                table_name,
                self.quote(&index.name),
                Self::clustered(index),
                columns
            ),
            IndexKind::UniqueConstraint => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE {} ({})",
                table_name,
                self.quote(&index.name),
                Self::clustered(index),
                columns
            ),
            IndexKind::Unique | IndexKind::Index => {
                let unique = if index.kind == IndexKind::Unique { "UNIQUE " } else { "" };
                let mut sql = format!(
                    "CREATE {}{} INDEX {} ON {} ({})",
                    unique,
                    Self::clustered(index),
                    self.quote(&index.name),
                    table_name,
                    columns
                );
                if let IndexExtension::MicrosoftSql {
                    filter: Some(filter),
                    ..
                } = &index.extension
                {
                    sql.push_str(&format!(" WHERE {}", filter));
                }
                sql
            }
            IndexKind::Spatial => format!(
                "CREATE SPATIAL INDEX {} ON {} ({})",
                self.quote(&index.name),
                table_name,
                columns
            ),
            IndexKind::Fulltext => {
                return Err(Error::ScriptingError(format!(
                    "Full-text index {} on {} needs a full-text catalog and is not scripted",
                    index.name, table.name
                )))
            }
        };
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
            format!("DROP INDEX {} ON {}", self.quote(&index.name), self.table_name(table))
        }
    }

    fn referential_actions(&self, fk: &ForeignKey) -> Result<String> {
        if fk.on_delete == ReferentialAction::Restrict
            || fk.on_update == ReferentialAction::Restrict
        {
            return Err(Error::ScriptingError(format!(
                "SQL Server has no RESTRICT action (foreign key {})",
                fk.name
            )));
        }

        let mut clauses = String::new();
        for (event, action) in [("DELETE", fk.on_delete), ("UPDATE", fk.on_update)] {
            if action != ReferentialAction::NoAction {
                clauses.push_str(&format!(" ON {} {}", event, action.as_sql()));
            }
        }
        Ok(clauses)
    }

    fn create_view(&self, view: &View) -> Result<String> {
        Ok(self.definition("view", &view.schema, &view.name, &view.definition)?.to_string())
    }

    fn create_routine(&self, routine: &Routine) -> Result<String> {
        let kind = match routine.kind {
            RoutineKind::Function => "function",
            RoutineKind::Procedure => "procedure",
        };
        Ok(self
            .definition(kind, &routine.schema, &routine.name, &routine.definition)?
            .to_string())
    }

    fn drop_routine(&self, routine: &Routine) -> String {
        let keyword = match routine.kind {
            RoutineKind::Function => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        };
        format!("DROP {} {}", keyword, self.qualified(&routine.schema, &routine.name))
    }

    fn create_sequence(&self, sequence: &Sequence) -> Result<String> {
        Ok(format!(
            "CREATE SEQUENCE {} AS {} START WITH {} {}",
            self.qualified(&sequence.schema, &sequence.name),
            sequence.data_type,
            sequence.start_value,
            Self::sequence_options(sequence)
        ))
    }

    // The type of a sequence cannot be altered in place
    fn alter_sequence(&self, desired: &Sequence, current: &Sequence) -> Result<Vec<String>> {
        if !desired.data_type.eq_ignore_ascii_case(&current.data_type) {
            return Ok(vec![self.drop_sequence(current)?, self.create_sequence(desired)?]);
        }
        Ok(vec![format!(
            "ALTER SEQUENCE {} RESTART WITH {} {}",
            self.qualified(&desired.schema, &desired.name),
            desired.start_value,
            Self::sequence_options(desired)
        )])
    }

    fn drop_sequence(&self, sequence: &Sequence) -> Result<String> {
        Ok(format!("DROP SEQUENCE {}", self.qualified(&sequence.schema, &sequence.name)))
    }
}
