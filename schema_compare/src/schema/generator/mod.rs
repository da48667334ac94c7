//! DDL script generator
//!
//! A [`Scripter`] knows how one engine spells each statement. The
//! [`ScriptGenerator`] turns compare items into [`ScriptPlan`]s built from
//! those statements and assembles the plans into per-item scripts and the
//! consolidated full script, in dependency order.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::schema::diff::{CompareResult, CompareResultItem, DiffState, ScriptDirection, TableDiff};
use crate::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexKind, ObjectKey, ReferentialAction, Routine,
    SchemaObject, ScriptingOptions, Sequence, Table, View,
};
use crate::task::{settle, TaskInfo};
use crate::utils::naming::{qualify, quote_identifier};

mod mssql;
mod mysql;
mod postgres;

pub use mssql::MsSqlScripter;
pub use mysql::MySqlScripter;
pub use postgres::PostgresScripter;

/// Statement spelling for one engine
///
/// Methods return statements without their terminator; the generator appends
/// [`Scripter::terminator`] when rendering.
pub trait Scripter: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn options(&self) -> &ScriptingOptions;

    /// Appended to every statement
    fn terminator(&self) -> &'static str {
        ";"
    }

    fn quote(&self, name: &str) -> String {
        quote_identifier(self.dialect(), name)
    }

    /// Object name, schema-qualified when `use_schema_name` is set
    fn qualified(&self, schema: &str, name: &str) -> String {
        qualify(self.dialect(), schema, name, self.options().use_schema_name)
    }

    fn table_name(&self, table: &Table) -> String {
        self.qualified(&table.schema, &table.name)
    }

    /// Column clause as used in `CREATE TABLE` and `ADD COLUMN`
    fn column_definition(&self, column: &Column) -> Result<String>;

    /// `CREATE TABLE` with the primary key inline, plus any statements the
    /// engine needs to complete the table (comments)
    fn create_table(&self, table: &Table) -> Result<Vec<String>>;

    fn drop_table(&self, table: &Table) -> String {
        format!("DROP TABLE {}", self.table_name(table))
    }

    fn add_column(&self, table: &Table, column: &Column) -> Result<Vec<String>>;

    fn drop_column(&self, table: &Table, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_name(table),
            self.quote(&column.name)
        )]
    }

    /// Turn `current` into `desired`
    fn alter_column(
        &self,
        table: &Table,
        desired: &Column,
        current: &Column,
    ) -> Result<Vec<String>>;

    /// Table-level attribute changes
    fn alter_table_options(&self, _desired: &Table, _current: &Table) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Secondary index or key constraint on an existing table
    fn create_index(&self, table: &Table, index: &Index) -> Result<String>;

    fn drop_index(&self, table: &Table, index: &Index) -> String;

    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey) -> Result<String> {
        let columns: Vec<String> =
            fk.ordered_columns().iter().map(|c| self.quote(&c.column)).collect();
        let referenced: Vec<String> = fk
            .ordered_columns()
            .iter()
            .map(|c| self.quote(&c.referenced_column))
            .collect();

        let mut sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.table_name(table),
            self.quote(&fk.name),
            columns.join(", "),
            self.qualified(&fk.referenced_schema, &fk.referenced_table),
            referenced.join(", ")
        );
        sql.push_str(&self.referential_actions(fk)?);
        Ok(sql)
    }

    /// `ON DELETE` / `ON UPDATE` clauses; `NO ACTION` is left implicit
    fn referential_actions(&self, fk: &ForeignKey) -> Result<String> {
        let mut clauses = String::new();
        for (event, action) in [("DELETE", fk.on_delete), ("UPDATE", fk.on_update)] {
            if action != ReferentialAction::NoAction {
                clauses.push_str(&format!(" ON {} {}", event, action.as_sql()));
            }
        }
        Ok(clauses)
    }

    fn drop_foreign_key(&self, table: &Table, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.table_name(table),
            self.quote(&fk.name)
        )
    }

    fn create_view(&self, view: &View) -> Result<String>;

    fn drop_view(&self, view: &View) -> String {
        format!("DROP VIEW {}", self.qualified(&view.schema, &view.name))
    }

    fn create_routine(&self, routine: &Routine) -> Result<String>;

    fn drop_routine(&self, routine: &Routine) -> String;

    fn create_sequence(&self, sequence: &Sequence) -> Result<String>;

    fn alter_sequence(&self, desired: &Sequence, current: &Sequence) -> Result<Vec<String>>;

    fn drop_sequence(&self, sequence: &Sequence) -> Result<String>;

    /// Quoted, comma separated index column list
    fn index_columns(&self, index: &Index) -> String {
        index
            .ordered_columns()
            .iter()
            .map(|c| {
                let mut column = self.quote(&c.name);
                if c.descending {
                    column.push_str(" DESC");
                }
                column
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Columns in the order `CREATE TABLE` lists them
    fn creation_order<'t>(&self, table: &'t Table) -> Vec<&'t Column> {
        let mut columns: Vec<&Column> = table.columns.iter().collect();
        if self.options().order_columns_alphabetically {
            columns.sort_by(|a, b| a.name.cmp(&b.name));
        }
        columns
    }
}

/// Build the scripter of an engine
pub fn scripter_for(dialect: Dialect, options: ScriptingOptions) -> Box<dyn Scripter> {
    match dialect {
        Dialect::MicrosoftSql => Box::new(MsSqlScripter::new(options)),
        Dialect::MySql => Box::new(MySqlScripter::new(options)),
        Dialect::PostgreSql => Box::new(PostgresScripter::new(options)),
    }
}

/// Statements of one item, grouped by the full-script phase they run in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptPlan {
    pub drop_foreign_keys: Vec<String>,
    pub drop_indexes: Vec<String>,
    /// Drop of the object itself
    pub drops: Vec<String>,
    /// Creation or in-place alteration of the object itself
    pub creates: Vec<String>,
    pub create_indexes: Vec<String>,
    pub create_foreign_keys: Vec<String>,
}

impl ScriptPlan {
    fn creating(statements: Vec<String>) -> Self {
        Self {
            creates: statements,
            ..Default::default()
        }
    }

    fn dropping(statement: String) -> Self {
        Self {
            drops: vec![statement],
            ..Default::default()
        }
    }

    /// Statements in the order one item's script runs them
    pub fn statements(&self) -> Vec<String> {
        [
            &self.drop_foreign_keys,
            &self.drop_indexes,
            &self.drops,
            &self.creates,
            &self.create_indexes,
            &self.create_foreign_keys,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.statements().is_empty()
    }
}

/// An object the generator can script
pub trait Scriptable: SchemaObject {
    fn plan_create(&self, scripter: &dyn Scripter) -> Result<ScriptPlan>;

    fn plan_drop(&self, scripter: &dyn Scripter) -> Result<ScriptPlan>;

    /// Plan turning `current` into `desired`
    fn plan_alter(desired: &Self, current: &Self, scripter: &dyn Scripter) -> Result<ScriptPlan>;
}

impl Scriptable for Table {
    fn plan_create(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        let mut plan = ScriptPlan::creating(scripter.create_table(self)?);
        for index in self.indexes.iter().filter(|i| i.kind != IndexKind::PrimaryKey) {
            plan.create_indexes.push(scripter.create_index(self, index)?);
        }
        for fk in &self.foreign_keys {
            plan.create_foreign_keys.push(scripter.create_foreign_key(self, fk)?);
        }
        Ok(plan)
    }

    fn plan_drop(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        let mut plan = ScriptPlan::dropping(scripter.drop_table(self));
        plan.drop_foreign_keys = self
            .foreign_keys
            .iter()
            .map(|fk| scripter.drop_foreign_key(self, fk))
            .collect();
        Ok(plan)
    }

    fn plan_alter(desired: &Self, current: &Self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        let diff = TableDiff::between(desired, current, scripter.options());
        let mut plan = ScriptPlan::default();

        for member in &diff.foreign_keys {
            if let (DiffState::Deleted | DiffState::Modified, Some(fk)) =
                (member.state, &member.target)
            {
                plan.drop_foreign_keys.push(scripter.drop_foreign_key(current, fk));
            }
        }
        for member in &diff.indexes {
            if let (DiffState::Deleted | DiffState::Modified, Some(index)) =
                (member.state, &member.target)
            {
                plan.drop_indexes.push(scripter.drop_index(current, index));
            }
        }

        for member in &diff.columns {
            match (member.state, &member.source, &member.target) {
                (DiffState::Deleted, _, Some(column)) => {
                    plan.creates.extend(scripter.drop_column(current, column));
                }
                (DiffState::Added, Some(column), _) => {
                    plan.creates.extend(scripter.add_column(desired, column)?);
                }
                (DiffState::Modified, Some(wanted), Some(existing)) => {
                    plan.creates.extend(scripter.alter_column(desired, wanted, existing)?);
                }
                _ => {}
            }
        }
        if diff.options_changed {
            plan.creates.extend(scripter.alter_table_options(desired, current)?);
        }

        for member in &diff.indexes {
            if let (DiffState::Added | DiffState::Modified, Some(index)) =
                (member.state, &member.source)
            {
                plan.create_indexes.push(scripter.create_index(desired, index)?);
            }
        }
        for member in &diff.foreign_keys {
            if let (DiffState::Added | DiffState::Modified, Some(fk)) =
                (member.state, &member.source)
            {
                plan.create_foreign_keys.push(scripter.create_foreign_key(desired, fk)?);
            }
        }

        Ok(plan)
    }
}

impl Scriptable for View {
    fn plan_create(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::creating(vec![scripter.create_view(self)?]))
    }

    fn plan_drop(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::dropping(scripter.drop_view(self)))
    }

    fn plan_alter(desired: &Self, current: &Self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        let mut plan = current.plan_drop(scripter)?;
        plan.creates.push(scripter.create_view(desired)?);
        Ok(plan)
    }
}

impl Scriptable for Routine {
    fn plan_create(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::creating(vec![scripter.create_routine(self)?]))
    }

    fn plan_drop(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::dropping(scripter.drop_routine(self)))
    }

    fn plan_alter(desired: &Self, current: &Self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        let mut plan = current.plan_drop(scripter)?;
        plan.creates.push(scripter.create_routine(desired)?);
        Ok(plan)
    }
}

impl Scriptable for Sequence {
    fn plan_create(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::creating(vec![scripter.create_sequence(self)?]))
    }

    fn plan_drop(&self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::dropping(scripter.drop_sequence(self)?))
    }

    fn plan_alter(desired: &Self, current: &Self, scripter: &dyn Scripter) -> Result<ScriptPlan> {
        Ok(ScriptPlan::creating(scripter.alter_sequence(desired, current)?))
    }
}

/// Statements of the consolidated script, one list per phase
#[derive(Default)]
struct Phases {
    drop_procedures: Vec<String>,
    drop_functions: Vec<String>,
    drop_views: Vec<String>,
    drop_foreign_keys: Vec<String>,
    drop_indexes: Vec<String>,
    drop_tables: Vec<String>,
    drop_sequences: Vec<String>,
    sequences: Vec<String>,
    tables: Vec<String>,
    create_indexes: Vec<String>,
    create_foreign_keys: Vec<String>,
    views: Vec<String>,
    functions: Vec<String>,
    procedures: Vec<String>,
}

impl Phases {
    fn into_statements(self) -> Vec<String> {
        let mut statements = Vec::new();
        for phase in [
            self.drop_procedures,
            self.drop_functions,
            self.drop_views,
            dedup(self.drop_foreign_keys),
            self.drop_indexes,
            self.drop_tables,
            self.drop_sequences,
            self.sequences,
            self.tables,
            self.create_indexes,
            self.create_foreign_keys,
            self.views,
            self.functions,
            self.procedures,
        ] {
            statements.extend(phase);
        }
        statements
    }
}

/// Keep the first occurrence of every statement
fn dedup(statements: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    statements
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// An item that could not be scripted in one direction
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub id: uuid::Uuid,
    pub key: ObjectKey,
    pub message: String,
}

/// Renders compare results into DDL for one engine
pub struct ScriptGenerator {
    scripter: Box<dyn Scripter>,
}

impl ScriptGenerator {
    pub fn new(dialect: Dialect, options: ScriptingOptions) -> Self {
        Self {
            scripter: scripter_for(dialect, options),
        }
    }

    pub fn with_scripter(scripter: Box<dyn Scripter>) -> Self {
        Self { scripter }
    }

    pub fn dialect(&self) -> Dialect {
        self.scripter.dialect()
    }

    /// Terminate and join statements, one blank line apart
    pub fn render(&self, statements: &[String]) -> String {
        statements
            .iter()
            .map(|s| format!("{}{}", s, self.scripter.terminator()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn script_create<T: Scriptable>(&self, object: &T) -> Result<String> {
        Ok(self.render(&object.plan_create(self.scripter.as_ref())?.statements()))
    }

    pub fn script_drop<T: Scriptable>(&self, object: &T) -> Result<String> {
        Ok(self.render(&object.plan_drop(self.scripter.as_ref())?.statements()))
    }

    /// Script bringing the current side of `item` in line with the desired side
    ///
    /// `Added` creates, `Deleted` drops, `Modified` emits the minimal change
    /// and `Unchanged` yields an empty script.
    pub fn script_alter<T: Scriptable>(
        &self,
        item: &CompareResultItem<T>,
        direction: ScriptDirection,
    ) -> Result<String> {
        Ok(self.render(&self.plan(item, direction)?.statements()))
    }

    fn plan<T: Scriptable>(
        &self,
        item: &CompareResultItem<T>,
        direction: ScriptDirection,
    ) -> Result<ScriptPlan> {
        let scripter = self.scripter.as_ref();
        let (desired, current) = item.sides(direction);
        match (item.state_for(direction), desired, current) {
            (DiffState::Added, Some(desired), _) => desired.plan_create(scripter),
            (DiffState::Deleted, _, Some(current)) => current.plan_drop(scripter),
            (DiffState::Modified, Some(desired), Some(current)) => {
                T::plan_alter(desired, current, scripter)
            }
            (DiffState::Unchanged, _, _) => Ok(ScriptPlan::default()),
            (state, _, _) => Err(Error::ScriptingError(format!(
                "{} {} is {:?} but lacks the object to script",
                item.category, item.key, state
            ))),
        }
    }

    /// Consolidated script for `direction`
    ///
    /// Items that cannot be scripted are left out and logged.
    pub fn script_full(&self, result: &CompareResult, direction: ScriptDirection) -> String {
        let (script, skipped) = self.assemble(result, direction);
        for item in &skipped {
            tracing::warn!(
                object = %item.key,
                direction = ?direction,
                error = %item.message,
                "Object left out of full script"
            );
        }
        script
    }

    fn assemble(
        &self,
        result: &CompareResult,
        direction: ScriptDirection,
    ) -> (String, Vec<SkippedItem>) {
        let mut phases = Phases::default();
        let mut skipped = Vec::new();

        for plan in self.plans(&result.sequences, direction, &mut skipped) {
            phases.drop_sequences.extend(plan.drops);
            phases.sequences.extend(plan.creates);
        }

        for plan in self.plans(&result.tables, direction, &mut skipped) {
            phases.drop_foreign_keys.extend(plan.drop_foreign_keys);
            phases.drop_indexes.extend(plan.drop_indexes);
            phases.drop_tables.extend(plan.drops);
            phases.tables.extend(plan.creates);
            phases.create_indexes.extend(plan.create_indexes);
            phases.create_foreign_keys.extend(plan.create_foreign_keys);
        }
        phases
            .drop_foreign_keys
            .extend(self.foreign_keys_to_dropped_tables(result, direction));

        for plan in self.plans(&result.views, direction, &mut skipped) {
            phases.drop_views.extend(plan.drops);
            phases.views.extend(plan.creates);
        }
        for plan in self.plans(&result.functions, direction, &mut skipped) {
            phases.drop_functions.extend(plan.drops);
            phases.functions.extend(plan.creates);
        }
        for plan in self.plans(&result.procedures, direction, &mut skipped) {
            phases.drop_procedures.extend(plan.drops);
            phases.procedures.extend(plan.creates);
        }

        (self.render(&phases.into_statements()), skipped)
    }

    fn plans<T: Scriptable>(
        &self,
        items: &[CompareResultItem<T>],
        direction: ScriptDirection,
        skipped: &mut Vec<SkippedItem>,
    ) -> Vec<ScriptPlan> {
        let mut plans = Vec::new();
        for item in items.iter().filter(|i| i.state != DiffState::Unchanged) {
            match self.plan(item, direction) {
                Ok(plan) => plans.push(plan),
                Err(e) => skipped.push(SkippedItem {
                    id: item.id,
                    key: item.key.clone(),
                    message: e.to_string(),
                }),
            }
        }
        plans
    }

    /// Drops of foreign keys on surviving tables that point at a dropped table
    fn foreign_keys_to_dropped_tables(
        &self,
        result: &CompareResult,
        direction: ScriptDirection,
    ) -> Vec<String> {
        let dropped: BTreeSet<&ObjectKey> = result
            .tables
            .iter()
            .filter(|i| i.state_for(direction) == DiffState::Deleted)
            .map(|i| &i.key)
            .collect();
        if dropped.is_empty() {
            return Vec::new();
        }

        let mut statements = Vec::new();
        for item in result.tables.iter().filter(|i| i.state_for(direction) != DiffState::Deleted) {
            if let (_, Some(current)) = item.sides(direction) {
                for fk in current
                    .foreign_keys
                    .iter()
                    .filter(|fk| dropped.contains(&fk.referenced_key()))
                {
                    statements.push(self.scripter.drop_foreign_key(current, fk));
                }
            }
        }
        statements
    }

    /// Fill in every item's scripts and both full scripts
    ///
    /// An item that cannot be scripted keeps empty scripts and records the
    /// error; it is also left out of the full scripts.
    pub fn script_result(
        &self,
        result: &mut CompareResult,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        task.start()?;
        let outcome = self.script_items_and_full(result, task, cancel);
        settle(task, outcome)
    }

    fn script_items_and_full(
        &self,
        result: &mut CompareResult,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let items_task = task.add_weighted_child("items", 3.0)?;
        let full_task = task.add_child("full scripts")?;

        items_task.start()?;
        let total = result.sequences.len()
            + result.tables.len()
            + result.views.len()
            + result.functions.len()
            + result.procedures.len();
        let mut progress = Progress { task: &items_task, processed: 0, total };

        let outcome = (|| -> Result<()> {
            self.script_items(&mut result.sequences, &mut progress, cancel)?;
            self.script_items(&mut result.tables, &mut progress, cancel)?;
            self.script_items(&mut result.views, &mut progress, cancel)?;
            self.script_items(&mut result.functions, &mut progress, cancel)?;
            self.script_items(&mut result.procedures, &mut progress, cancel)?;
            Ok(())
        })();
        if let Err(e) = settle(&items_task, outcome) {
            let _ = full_task.mark_cancelled();
            return Err(e);
        }

        full_task.start()?;
        let outcome = (|| -> Result<()> {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let (forward, skipped) = self.assemble(result, ScriptDirection::SourceToTarget);
            record_skipped(result, &skipped, &full_task)?;
            full_task.set_percentage(50.0)?;

            let (backward, skipped) = self.assemble(result, ScriptDirection::TargetToSource);
            record_skipped(result, &skipped, &full_task)?;

            result.full_script_source_to_target = Some(forward);
            result.full_script_target_to_source = Some(backward);
            Ok(())
        })();
        settle(&full_task, outcome)?;

        tracing::info!(dialect = %self.dialect(), "Scripts generated");
        Ok(())
    }

    fn script_items<T: Scriptable>(
        &self,
        items: &mut [CompareResultItem<T>],
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for item in items.iter_mut() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.item_scripts(item) {
                Ok((source_create, target_create, alter)) => {
                    item.source_create_script = source_create;
                    item.target_create_script = target_create;
                    item.alter_script = alter;
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        category = %item.category,
                        object = %item.key,
                        error = %message,
                        "Scripting failed"
                    );
                    progress
                        .task
                        .set_message(format!("{} {}: {}", item.category, item.key, message))?;
                    item.scripting_error = Some(message);
                }
            }
            progress.tick()?;
        }
        Ok(())
    }

    fn item_scripts<T: Scriptable>(
        &self,
        item: &CompareResultItem<T>,
    ) -> Result<(String, String, String)> {
        let source_create = match &item.source {
            Some(object) => self.script_create(object)?,
            None => String::new(),
        };
        let target_create = match &item.target {
            Some(object) => self.script_create(object)?,
            None => String::new(),
        };
        let alter = self.script_alter(item, ScriptDirection::SourceToTarget)?;
        Ok((source_create, target_create, alter))
    }
}

struct Progress<'a> {
    task: &'a TaskInfo,
    processed: usize,
    total: usize,
}

impl Progress<'_> {
    fn tick(&mut self) -> Result<()> {
        self.processed += 1;
        self.task.set_progress(self.processed, self.total)
    }
}

/// Note items left out of a full script on the items themselves
fn record_skipped(
    result: &mut CompareResult,
    skipped: &[SkippedItem],
    task: &TaskInfo,
) -> Result<()> {
    fn record<T: SchemaObject>(items: &mut [CompareResultItem<T>], skipped: &SkippedItem) -> bool {
        match items.iter_mut().find(|i| i.id == skipped.id) {
            Some(item) => {
                item.scripting_error.get_or_insert_with(|| skipped.message.clone());
                true
            }
            None => false,
        }
    }

    for item in skipped {
        let _ = record(&mut result.sequences, item)
            || record(&mut result.tables, item)
            || record(&mut result.views, item)
            || record(&mut result.functions, item)
            || record(&mut result.procedures, item);
        task.set_message(format!("{} left out: {}", item.key, item.message))?;
    }
    Ok(())
}
