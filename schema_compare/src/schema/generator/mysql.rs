//! MySQL statement spelling

use super::Scripter;
use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexExtension, IndexKind, Routine, RoutineKind,
    ScriptingOptions, Sequence, Table, TableExtension, View,
};
use crate::utils::naming::quote_literal;

pub struct MySqlScripter {
    options: ScriptingOptions,
}

impl MySqlScripter {
    pub fn new(options: ScriptingOptions) -> Self {
        Self { options }
    }

    fn table_options(&self, table: &Table) -> String {
        let TableExtension::MySql {
            engine,
            character_set,
            collation,
            ..
        } = &table.extension
        else {
            return String::new();
        };

        let mut options = Vec::new();
        if !engine.is_empty() {
            options.push(format!("ENGINE={}", engine));
        }
        if !self.options.ignore_collate {
            if !character_set.is_empty() {
                options.push(format!("DEFAULT CHARSET={}", character_set));
            }
            if !collation.is_empty() {
                options.push(format!("COLLATE={}", collation));
            }
        }
        options.join(" ")
    }

    fn no_sequences(&self, sequence: &Sequence) -> Error {
        Error::ScriptingError(format!(
            "MySQL has no sequences; cannot script {}.{}",
            sequence.schema, sequence.name
        ))
    }

    fn routine_keyword(routine: &Routine) -> &'static str {
        match routine.kind {
            RoutineKind::Function => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        }
    }
}

impl Scripter for MySqlScripter {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn options(&self) -> &ScriptingOptions {
        &self.options
    }

    fn column_definition(&self, column: &Column) -> Result<String> {
        let mut sql = format!("{} {}", self.quote(&column.name), column.data_type);

        if !self.options.ignore_collate {
            if let Some(character_set) = &column.character_set {
                sql.push_str(&format!(" CHARACTER SET {}", character_set));
            }
            if let Some(collation) = &column.collation {
                sql.push_str(&format!(" COLLATE {}", collation));
            }
        }

        sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        if column.identity.is_some() {
            sql.push_str(" AUTO_INCREMENT");
        }
        if let Some(comment) = &column.comment {
            sql.push_str(&format!(" COMMENT {}", quote_literal(comment)));
        }
        Ok(sql)
    }

    fn create_table(&self, table: &Table) -> Result<Vec<String>> {
        if table.columns.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Table {} has no columns",
                table.name
            )));
        }

        let mut definitions = Vec::new();
        for column in self.creation_order(table) {
            definitions.push(format!("  {}", self.column_definition(column)?));
        }
        if let Some(pk) = table.primary_key() {
            definitions.push(format!("  PRIMARY KEY ({})", self.index_columns(pk)));
        }

        let mut sql = format!(
            "CREATE TABLE {} (\n{}\n)",
            self.table_name(table),
            definitions.join(",\n")
        );
        let options = self.table_options(table);
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(&options);
        }
        Ok(vec![sql])
    }

    fn add_column(&self, table: &Table, column: &Column) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(column)?
        )])
    }

    fn alter_column(
        &self,
        table: &Table,
        desired: &Column,
        _current: &Column,
    ) -> Result<Vec<String>> {
        Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.table_name(table),
            self.column_definition(desired)?
        )])
    }

    fn alter_table_options(&self, desired: &Table, _current: &Table) -> Result<Vec<String>> {
        let options = self.table_options(desired);
        if options.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![format!("ALTER TABLE {} {}", self.table_name(desired), options)])
    }

    fn index_columns(&self, index: &Index) -> String {
        index
            .ordered_columns()
            .iter()
            .map(|c| {
                let mut column = self.quote(&c.name);
                if let Some(length) = c.prefix_length {
                    column.push_str(&format!("({})", length));
                }
                if c.descending {
                    column.push_str(" DESC");
                }
                column
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn create_index(&self, table: &Table, index: &Index) -> Result<String> {
        let table_name = self.table_name(table);
        let columns = self.index_columns(index);
        let sql = match index.kind {
            IndexKind::PrimaryKey => {
                format!("ALTER TABLE {} ADD PRIMARY KEY ({})", table_name, columns)
            }
            IndexKind::Unique | IndexKind::UniqueConstraint => format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                self.quote(&index.name),
                table_name,
                columns
            ),
            IndexKind::Fulltext => format!(
                "CREATE FULLTEXT INDEX {} ON {} ({})",
                self.quote(&index.name),
                table_name,
                columns
            ),
            IndexKind::Spatial => format!(
                "CREATE SPATIAL INDEX {} ON {} ({})",
                self.quote(&index.name),
                table_name,
                columns
            ),
            IndexKind::Index => {
                let using = match &index.extension {
                    IndexExtension::MySql { index_type }
                        if index_type.eq_ignore_ascii_case("HASH") =>
                    {
                        " USING HASH"
                    }
                    _ => "",
                };
                format!(
                    "CREATE INDEX {} ON {} ({}){}",
                    self.quote(&index.name),
                    table_name,
                    columns,
                    using
                )
            }
        };
        Ok(sql)
    }

    fn drop_index(&self, table: &Table, index: &Index) -> String {
        match index.kind {
            IndexKind::PrimaryKey => {
                format!("ALTER TABLE {} DROP PRIMARY KEY", self.table_name(table))
            }
            _ => format!("DROP INDEX {} ON {}", self.quote(&index.name), self.table_name(table)),
        }
    }

    fn drop_foreign_key(&self, table: &Table, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.table_name(table),
            self.quote(&fk.name)
        )
    }

    fn create_view(&self, view: &View) -> Result<String> {
        let definition = view.definition.trim();
        if definition.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Definition of view {} is not available",
                view.name
            )));
        }
        Ok(format!(
            "CREATE VIEW {} AS {}",
            self.qualified(&view.schema, &view.name),
            definition
        ))
    }

    // Routine bodies contain semicolons, so the script switches delimiter;
    // the appended terminator completes the closing `DELIMITER ;`.
    fn create_routine(&self, routine: &Routine) -> Result<String> {
        let definition = routine.definition.trim();
        if definition.is_empty() {
            return Err(Error::ScriptingError(format!(
                "Definition of {} {} is not available",
                Self::routine_keyword(routine).to_lowercase(),
                routine.name
            )));
        }
        Ok(format!("DELIMITER //\n{} //\nDELIMITER ", definition))
    }

    fn drop_routine(&self, routine: &Routine) -> String {
        format!(
            "DROP {} {}",
            Self::routine_keyword(routine),
            self.qualified(&routine.schema, &routine.name)
        )
    }

    fn create_sequence(&self, sequence: &Sequence) -> Result<String> {
        Err(self.no_sequences(sequence))
    }

    fn alter_sequence(&self, desired: &Sequence, _current: &Sequence) -> Result<Vec<String>> {
        Err(self.no_sequences(desired))
    }

    fn drop_sequence(&self, sequence: &Sequence) -> Result<String> {
        Err(self.no_sequences(sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{IndexColumn, ReferentialAction};
    use pretty_assertions::assert_eq;

    fn scripter() -> MySqlScripter {
        MySqlScripter::new(ScriptingOptions::default())
    }

    fn customers() -> Table {
        let mut table = Table::new("shop", "customers");
        table.add_column(Column::new("id", "int").identity(1, 1));
        table.add_column(
            Column::new("email", "varchar(255)")
                .collation("utf8mb4_bin")
                .default("''"),
        );
        table.columns[1].character_set = Some("utf8mb4".to_string());
        table.add_index(Index::new("PRIMARY", IndexKind::PrimaryKey).column("id"));
        table.extension = TableExtension::MySql {
            engine: "InnoDB".to_string(),
            version: 10,
            character_set: "utf8mb4".to_string(),
            collation: "utf8mb4_0900_ai_ci".to_string(),
        };
        table
    }

    #[test]
    fn test_create_table() {
        let sql = scripter().create_table(&customers()).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE `customers` (\n  \
                 `id` int NOT NULL AUTO_INCREMENT,\n  \
                 `email` varchar(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL DEFAULT '',\n  \
                 PRIMARY KEY (`id`)\n\
                 ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_ignore_collate_drops_collation_clauses() {
        let scripter = MySqlScripter::new(ScriptingOptions {
            ignore_collate: true,
            use_schema_name: true,
            ..Default::default()
        });
        let sql = scripter.create_table(&customers()).unwrap().join("");
        assert!(sql.starts_with("CREATE TABLE `shop`.`customers`"));
        assert!(!sql.contains("COLLATE"));
        assert!(!sql.contains("CHARACTER SET"));
        assert!(sql.ends_with(") ENGINE=InnoDB"));
    }

    #[test]
    fn test_table_without_columns_is_rejected() {
        let table = Table::new("shop", "empty");
        assert!(matches!(
            scripter().create_table(&table),
            Err(Error::ScriptingError(_))
        ));
    }

    #[test]
    fn test_index_prefix_and_primary_key_drop() {
        let table = customers();
        let mut index = Index::new("ix_email", IndexKind::Index);
        index.columns.push(IndexColumn {
            name: "email".to_string(),
            ordinal: 1,
            descending: false,
            prefix_length: Some(10),
        });
        assert_eq!(
            scripter().create_index(&table, &index).unwrap(),
            "CREATE INDEX `ix_email` ON `customers` (`email`(10))"
        );
        assert_eq!(
            scripter().drop_index(&table, table.primary_key().unwrap()),
            "ALTER TABLE `customers` DROP PRIMARY KEY"
        );
    }

    #[test]
    fn test_foreign_key_statements() {
        let table = customers();
        let mut fk = ForeignKey::new("fk_region", "shop", "regions").column("region_id", "id");
        fk.on_delete = ReferentialAction::Cascade;
        assert_eq!(
            scripter().create_foreign_key(&table, &fk).unwrap(),
            "ALTER TABLE `customers` ADD CONSTRAINT `fk_region` FOREIGN KEY (`region_id`) \
             REFERENCES `regions` (`id`) ON DELETE CASCADE"
        );
        assert_eq!(
            scripter().drop_foreign_key(&table, &fk),
            "ALTER TABLE `customers` DROP FOREIGN KEY `fk_region`"
        );
    }

    #[test]
    fn test_routine_uses_delimiter() {
        let body = "CREATE PROCEDURE `touch`() BEGIN SELECT 1; END";
        let routine = Routine::new("shop", "touch", RoutineKind::Procedure, body);
        let created = scripter().create_routine(&routine).unwrap();
        let sql = format!("{}{}", created, scripter().terminator());
        assert_eq!(
            sql,
            "DELIMITER //\nCREATE PROCEDURE `touch`() BEGIN SELECT 1; END //\nDELIMITER ;"
        );
    }

    #[test]
    fn test_sequences_are_not_scriptable() {
        let sequence = Sequence::new("shop", "seq", "bigint");
        assert!(matches!(
            scripter().create_sequence(&sequence),
            Err(Error::ScriptingError(_))
        ));
    }
}
