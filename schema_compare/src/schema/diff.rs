//! Schema difference calculator
//!
//! This module compares a source and a target snapshot and classifies every
//! object. The classification reads from the point of view of the script
//! that makes the target look like the source: an object only the source has
//! is `Added`, one only the target has is `Deleted`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::types::{
    Column, Dialect, ForeignKey, Index, ObjectCategory, ObjectKey, Routine, SchemaModel,
    SchemaObject, ScriptingOptions, Sequence, Table, TableExtension, View,
};
use crate::task::{settle, TaskInfo};

/// Classification of one object or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiffState {
    Added,
    Deleted,
    Modified,
    Unchanged,
}

impl DiffState {
    /// The same difference seen from the other side
    pub fn reversed(self) -> Self {
        match self {
            DiffState::Added => DiffState::Deleted,
            DiffState::Deleted => DiffState::Added,
            other => other,
        }
    }

    fn classify<T>(
        source: Option<&T>,
        target: Option<&T>,
        equal: impl FnOnce(&T, &T) -> bool,
    ) -> Self {
        match (source, target) {
            (Some(_), None) => DiffState::Added,
            (None, Some(_)) => DiffState::Deleted,
            (Some(s), Some(t)) if equal(s, t) => DiffState::Unchanged,
            _ => DiffState::Modified,
        }
    }
}

/// Which way a consolidated script transforms the databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptDirection {
    /// Run on the target to make it match the source
    SourceToTarget,
    /// Run on the source to make it match the target
    TargetToSource,
}

/// Difference of one column, index or foreign key inside a table
#[derive(Debug, Clone, Serialize)]
pub struct MemberDiff<T> {
    pub name: String,
    pub state: DiffState,
    pub source: Option<T>,
    pub target: Option<T>,
}

/// Nested differences of a table present on both sides
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableDiff {
    pub columns: Vec<MemberDiff<Column>>,
    pub indexes: Vec<MemberDiff<Index>>,
    pub foreign_keys: Vec<MemberDiff<ForeignKey>>,
    /// Table-level attributes such as the MySQL engine differ
    pub options_changed: bool,
}

impl TableDiff {
    /// Compare two versions of the same table
    pub fn between(source: &Table, target: &Table, options: &ScriptingOptions) -> Self {
        Self {
            columns: diff_members(
                &source.columns,
                &target.columns,
                |c| &c.name,
                |a, b| columns_equal(a, b, options),
            ),
            indexes: diff_members(&source.indexes, &target.indexes, |i| &i.name, indexes_equal),
            foreign_keys: diff_members(
                &source.foreign_keys,
                &target.foreign_keys,
                |fk| &fk.name,
                |a, b| foreign_keys_equal(a, b, options),
            ),
            options_changed: !extensions_equal(&source.extension, &target.extension, options),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        !self.options_changed
            && self.columns.iter().all(|c| c.state == DiffState::Unchanged)
            && self.indexes.iter().all(|i| i.state == DiffState::Unchanged)
            && self.foreign_keys.iter().all(|f| f.state == DiffState::Unchanged)
    }
}

/// Source members first in their own order, then target-only members
fn diff_members<T: Clone>(
    source: &[T],
    target: &[T],
    name: impl Fn(&T) -> &String,
    equal: impl Fn(&T, &T) -> bool,
) -> Vec<MemberDiff<T>> {
    let source_by_name: HashMap<&String, &T> = source.iter().map(|m| (name(m), m)).collect();
    let target_by_name: HashMap<&String, &T> = target.iter().map(|m| (name(m), m)).collect();

    let mut diffs = Vec::with_capacity(source.len().max(target.len()));
    for member in source {
        let other = target_by_name.get(name(member)).copied();
        diffs.push(MemberDiff {
            name: name(member).clone(),
            state: DiffState::classify(Some(member), other, &equal),
            source: Some(member.clone()),
            target: other.cloned(),
        });
    }
    for member in target {
        if !source_by_name.contains_key(name(member)) {
            diffs.push(MemberDiff {
                name: name(member).clone(),
                state: DiffState::Deleted,
                source: None,
                target: Some(member.clone()),
            });
        }
    }
    diffs
}

/// Column equality; ordinal position never counts
pub fn columns_equal(a: &Column, b: &Column, options: &ScriptingOptions) -> bool {
    let collation_equal = options.ignore_collate
        || (a.collation == b.collation && a.character_set == b.character_set);

    a.data_type.eq_ignore_ascii_case(&b.data_type)
        && a.nullable == b.nullable
        && a.default == b.default
        && a.identity == b.identity
        && a.comment == b.comment
        && collation_equal
}

pub fn indexes_equal(a: &Index, b: &Index) -> bool {
    let columns = |i: &Index| {
        i.ordered_columns()
            .into_iter()
            .map(|c| (c.name.clone(), c.descending, c.prefix_length))
            .collect::<Vec<_>>()
    };
    a.kind == b.kind && a.extension == b.extension && columns(a) == columns(b)
}

pub fn foreign_keys_equal(a: &ForeignKey, b: &ForeignKey, options: &ScriptingOptions) -> bool {
    let pairs = |fk: &ForeignKey| {
        let mut pairs: Vec<(String, String)> = fk
            .ordered_columns()
            .into_iter()
            .map(|c| (c.column.clone(), c.referenced_column.clone()))
            .collect();
        if options.ignore_reference_table_column_order {
            pairs.sort();
        }
        pairs
    };

    a.referenced_key() == b.referenced_key()
        && a.on_update == b.on_update
        && a.on_delete == b.on_delete
        && pairs(a) == pairs(b)
}

fn extensions_equal(a: &TableExtension, b: &TableExtension, options: &ScriptingOptions) -> bool {
    match (a, b) {
        (
            TableExtension::MySql {
                engine: engine_a,
                character_set: charset_a,
                collation: collation_a,
                ..
            },
            TableExtension::MySql {
                engine: engine_b,
                character_set: charset_b,
                collation: collation_b,
                ..
            },
        ) => {
            engine_a.eq_ignore_ascii_case(engine_b)
                && (options.ignore_collate
                    || (charset_a == charset_b && collation_a == collation_b))
        }
        _ => a == b,
    }
}

fn sequences_equal(a: &Sequence, b: &Sequence) -> bool {
    a.data_type.eq_ignore_ascii_case(&b.data_type)
        && a.start_value == b.start_value
        && a.increment == b.increment
        && a.min_value == b.min_value
        && a.max_value == b.max_value
        && a.cycle == b.cycle
}

/// One object's classification and, once scripted, its scripts
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
pub struct CompareResultItem<T: SchemaObject> {
    pub id: Uuid,
    pub key: ObjectKey,
    pub category: ObjectCategory,
    pub state: DiffState,
    pub source: Option<T>,
    pub target: Option<T>,
    /// Nested member differences for tables; empty for other categories
    pub detail: T::Detail,
    pub source_create_script: String,
    pub target_create_script: String,
    pub alter_script: String,
    pub scripting_error: Option<String>,
}

impl<T: SchemaObject> CompareResultItem<T> {
    fn new(
        key: ObjectKey,
        category: ObjectCategory,
        state: DiffState,
        source: Option<&T>,
        target: Option<&T>,
        detail: T::Detail,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            category,
            state,
            source: source.cloned(),
            target: target.cloned(),
            detail,
            source_create_script: String::new(),
            target_create_script: String::new(),
            alter_script: String::new(),
            scripting_error: None,
        }
    }

    /// State as seen by a script running in `direction`
    pub fn state_for(&self, direction: ScriptDirection) -> DiffState {
        match direction {
            ScriptDirection::SourceToTarget => self.state,
            ScriptDirection::TargetToSource => self.state.reversed(),
        }
    }

    /// (desired, current) objects for a script running in `direction`
    pub fn sides(&self, direction: ScriptDirection) -> (Option<&T>, Option<&T>) {
        match direction {
            ScriptDirection::SourceToTarget => (self.source.as_ref(), self.target.as_ref()),
            ScriptDirection::TargetToSource => (self.target.as_ref(), self.source.as_ref()),
        }
    }

    pub fn scripts(&self) -> ItemScripts {
        ItemScripts {
            source_create_script: self.source_create_script.clone(),
            target_create_script: self.target_create_script.clone(),
            alter_script: self.alter_script.clone(),
        }
    }
}

/// Scripts of one item as handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemScripts {
    pub source_create_script: String,
    pub target_create_script: String,
    pub alter_script: String,
}

/// Number of items per state in one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub added: usize,
    pub deleted: usize,
    pub modified: usize,
    pub unchanged: usize,
}

impl StateCounts {
    fn of<T: SchemaObject>(items: &[CompareResultItem<T>]) -> Self {
        items.iter().fold(Self::default(), |mut counts, item| {
            match item.state {
                DiffState::Added => counts.added += 1,
                DiffState::Deleted => counts.deleted += 1,
                DiffState::Modified => counts.modified += 1,
                DiffState::Unchanged => counts.unchanged += 1,
            }
            counts
        })
    }

    pub fn changed(&self) -> usize {
        self.added + self.deleted + self.modified
    }
}

/// Root aggregate of one comparison
#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub dialect: Dialect,
    pub options: ScriptingOptions,
    pub sequences: Vec<CompareResultItem<Sequence>>,
    pub tables: Vec<CompareResultItem<Table>>,
    pub views: Vec<CompareResultItem<View>>,
    pub functions: Vec<CompareResultItem<Routine>>,
    pub procedures: Vec<CompareResultItem<Routine>>,
    pub full_script_source_to_target: Option<String>,
    pub full_script_target_to_source: Option<String>,
}

impl CompareResult {
    /// Scripts of the item with the given identifier
    pub fn item_scripts(&self, id: Uuid) -> Option<ItemScripts> {
        fn find<T: SchemaObject>(items: &[CompareResultItem<T>], id: Uuid) -> Option<ItemScripts> {
            items.iter().find(|i| i.id == id).map(CompareResultItem::scripts)
        }

        find(&self.sequences, id)
            .or_else(|| find(&self.tables, id))
            .or_else(|| find(&self.views, id))
            .or_else(|| find(&self.functions, id))
            .or_else(|| find(&self.procedures, id))
    }

    /// Consolidated script, once the result has been scripted
    pub fn full_script(&self, direction: ScriptDirection) -> Option<&str> {
        match direction {
            ScriptDirection::SourceToTarget => self.full_script_source_to_target.as_deref(),
            ScriptDirection::TargetToSource => self.full_script_target_to_source.as_deref(),
        }
    }

    pub fn counts(&self) -> BTreeMap<ObjectCategory, StateCounts> {
        BTreeMap::from([
            (ObjectCategory::Sequence, StateCounts::of(&self.sequences)),
            (ObjectCategory::Table, StateCounts::of(&self.tables)),
            (ObjectCategory::View, StateCounts::of(&self.views)),
            (ObjectCategory::Function, StateCounts::of(&self.functions)),
            (ObjectCategory::Procedure, StateCounts::of(&self.procedures)),
        ])
    }

    /// True when no object differs
    pub fn is_empty(&self) -> bool {
        self.counts().values().all(|c| c.changed() == 0)
    }

    /// Every item's (category, key, state), in emission order
    pub fn states(&self) -> Vec<(ObjectCategory, ObjectKey, DiffState)> {
        fn collect<T: SchemaObject>(
            items: &[CompareResultItem<T>],
            out: &mut Vec<(ObjectCategory, ObjectKey, DiffState)>,
        ) {
            out.extend(items.iter().map(|i| (i.category, i.key.clone(), i.state)));
        }

        let mut out = Vec::new();
        collect(&self.sequences, &mut out);
        collect(&self.tables, &mut out);
        collect(&self.views, &mut out);
        collect(&self.functions, &mut out);
        collect(&self.procedures, &mut out);
        out
    }
}

/// Classifies the differences between two snapshots
#[derive(Debug, Clone, Default)]
pub struct SchemaComparator {
    options: ScriptingOptions,
}

impl SchemaComparator {
    pub fn new(options: ScriptingOptions) -> Self {
        Self { options }
    }

    /// Compare `source` against `target`, reporting through `task`
    ///
    /// One child task is created per category and ticked once per object.
    /// Cancellation is checked before every object.
    pub fn compare(
        &self,
        source: &SchemaModel,
        target: &SchemaModel,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<CompareResult> {
        if source.dialect != target.dialect {
            let error = Error::UnsupportedDialect(format!(
                "cannot compare a {} source with a {} target",
                source.dialect, target.dialect
            ));
            let _ = task.fault(error.to_string());
            return Err(error);
        }

        task.start()?;
        let outcome = self.compare_categories(source, target, task, cancel);
        settle(task, outcome)
    }

    fn compare_categories(
        &self,
        source: &SchemaModel,
        target: &SchemaModel,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<CompareResult> {
        let mut tasks = Vec::with_capacity(ObjectCategory::ALL.len());
        for category in ObjectCategory::ALL {
            tasks.push(task.add_child(category.label())?);
        }

        let options = self.options;
        let mut result = CompareResult {
            dialect: source.dialect,
            options,
            sequences: Vec::new(),
            tables: Vec::new(),
            views: Vec::new(),
            functions: Vec::new(),
            procedures: Vec::new(),
            full_script_source_to_target: None,
            full_script_target_to_source: None,
        };

        let outcome = (|| -> Result<()> {
            result.sequences = run_category(
                &tasks[0],
                cancel,
                ObjectCategory::Sequence,
                &source.sequences,
                &target.sequences,
                |s, t| (sequences_equal(s, t), ()),
            )?;
            result.tables = run_category(
                &tasks[1],
                cancel,
                ObjectCategory::Table,
                &source.tables,
                &target.tables,
                |s, t| {
                    let diff = TableDiff::between(s, t, &options);
                    (diff.is_unchanged(), diff)
                },
            )?;
            result.views = run_category(
                &tasks[2],
                cancel,
                ObjectCategory::View,
                &source.views,
                &target.views,
                |s, t| (s.has_same_definition(t), ()),
            )?;
            result.functions = run_category(
                &tasks[3],
                cancel,
                ObjectCategory::Function,
                &source.functions,
                &target.functions,
                |s, t| (s.has_same_definition(t), ()),
            )?;
            result.procedures = run_category(
                &tasks[4],
                cancel,
                ObjectCategory::Procedure,
                &source.procedures,
                &target.procedures,
                |s, t| (s.has_same_definition(t), ()),
            )?;
            Ok(())
        })();

        if let Err(e) = outcome {
            // Categories that never ran are stopped along with the failing one
            for pending in tasks.iter().filter(|t| !t.status().is_terminal()) {
                let _ = pending.mark_cancelled();
            }
            return Err(e);
        }

        tracing::info!(
            dialect = %result.dialect,
            changed = result.counts().values().map(StateCounts::changed).sum::<usize>(),
            "Schema comparison finished"
        );
        Ok(result)
    }
}

/// Classify one category, ticking `task` once per object
fn run_category<T: SchemaObject>(
    task: &TaskInfo,
    cancel: &CancellationToken,
    category: ObjectCategory,
    source: &BTreeMap<ObjectKey, T>,
    target: &BTreeMap<ObjectKey, T>,
    classify: impl Fn(&T, &T) -> (bool, T::Detail),
) -> Result<Vec<CompareResultItem<T>>> {
    task.start()?;
    let outcome = (|| -> Result<Vec<CompareResultItem<T>>> {
        let keys: BTreeSet<&ObjectKey> = source.keys().chain(target.keys()).collect();
        let total = keys.len();
        let mut items = Vec::with_capacity(total);

        for (processed, key) in keys.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let source_object = source.get(key);
            let target_object = target.get(key);
            let (state, detail) = match (source_object, target_object) {
                (Some(s), Some(t)) => {
                    let (equal, detail) = classify(s, t);
                    let state = if equal { DiffState::Unchanged } else { DiffState::Modified };
                    (state, detail)
                }
                (Some(_), None) => (DiffState::Added, T::Detail::default()),
                _ => (DiffState::Deleted, T::Detail::default()),
            };

            items.push(CompareResultItem::new(
                key.clone(),
                category,
                state,
                source_object,
                target_object,
                detail,
            ));
            task.set_progress(processed + 1, total)?;
        }

        tracing::debug!(category = %category, objects = total, "Category compared");
        Ok(items)
    })();
    settle(task, outcome)
}
