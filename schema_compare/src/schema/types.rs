//! Type definitions for database schema objects
//!
//! A [`SchemaModel`] is one crawl's snapshot of a database. Every object in it
//! is identified by its schema and name ([`ObjectKey`]) within its category.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::utils::naming::normalize_definition;

/// Database engines understood by the crawlers and scripters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "mssql", alias = "sqlserver")]
    MicrosoftSql,
    MySql,
    #[serde(alias = "postgres")]
    PostgreSql,
}

impl Dialect {
    /// Standard TCP port of the engine
    pub fn default_port(self) -> u16 {
        match self {
            Dialect::MicrosoftSql => 1433,
            Dialect::MySql => 3306,
            Dialect::PostgreSql => 5432,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MicrosoftSql => write!(f, "Microsoft SQL Server"),
            Dialect::MySql => write!(f, "MySQL"),
            Dialect::PostgreSql => write!(f, "PostgreSQL"),
        }
    }
}

/// Identity of an object inside one category of a snapshot
///
/// Ordering is schema first, then name, which is the order every compare
/// result is emitted in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub schema: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// The closed set of top-level object categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectCategory {
    Sequence,
    Table,
    View,
    Function,
    Procedure,
}

impl ObjectCategory {
    /// Categories in dependency order: everything may depend on what precedes it
    pub const ALL: [ObjectCategory; 5] = [
        ObjectCategory::Sequence,
        ObjectCategory::Table,
        ObjectCategory::View,
        ObjectCategory::Function,
        ObjectCategory::Procedure,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ObjectCategory::Sequence => "sequences",
            ObjectCategory::Table => "tables",
            ObjectCategory::View => "views",
            ObjectCategory::Function => "functions",
            ObjectCategory::Procedure => "procedures",
        }
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Options that change how objects are compared and scripted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingOptions {
    /// Collations take no part in equality and are not scripted
    pub ignore_collate: bool,
    /// Columns are emitted alphabetically in `CREATE TABLE`
    pub order_columns_alphabetically: bool,
    /// Foreign key column pairs are compared as a set
    pub ignore_reference_table_column_order: bool,
    /// Names are qualified with their schema in scripts
    pub use_schema_name: bool,
}

/// Shared capability of every top-level object
pub trait SchemaObject: Clone + fmt::Debug + Send + Sync {
    /// Nested diff detail carried by a compare item of this object type
    type Detail: Clone + fmt::Debug + Default + Serialize + Send + Sync;

    fn category(&self) -> ObjectCategory;

    fn schema(&self) -> &str;

    fn name(&self) -> &str;

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.schema(), self.name())
    }
}

/// Represents a complete snapshot of one database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaModel {
    pub dialect: Dialect,
    pub database: String,
    pub tables: BTreeMap<ObjectKey, Table>,
    pub views: BTreeMap<ObjectKey, View>,
    pub functions: BTreeMap<ObjectKey, Routine>,
    pub procedures: BTreeMap<ObjectKey, Routine>,
    pub sequences: BTreeMap<ObjectKey, Sequence>,
}

impl SchemaModel {
    /// Create a new empty snapshot
    pub fn new(dialect: Dialect, database: &str) -> Self {
        Self {
            dialect,
            database: database.to_string(),
            tables: BTreeMap::new(),
            views: BTreeMap::new(),
            functions: BTreeMap::new(),
            procedures: BTreeMap::new(),
            sequences: BTreeMap::new(),
        }
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.key(), table);
    }

    pub fn add_view(&mut self, view: View) {
        self.views.insert(view.key(), view);
    }

    /// Add a routine to the functions or procedures map according to its kind
    pub fn add_routine(&mut self, routine: Routine) {
        match routine.kind {
            RoutineKind::Function => self.functions.insert(routine.key(), routine),
            RoutineKind::Procedure => self.procedures.insert(routine.key(), routine),
        };
    }

    pub fn add_sequence(&mut self, sequence: Sequence) {
        self.sequences.insert(sequence.key(), sequence);
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.tables.get(&ObjectKey::new(schema, name))
    }

    /// Number of objects across every category
    pub fn object_count(&self) -> usize {
        self.tables.len()
            + self.views.len()
            + self.functions.len()
            + self.procedures.len()
            + self.sequences.len()
    }
}

/// Dialect-specific table attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dialect", rename_all = "lowercase")]
pub enum TableExtension {
    #[default]
    None,
    MySql {
        engine: String,
        /// `.frm` version reported by the server; informational only
        version: i64,
        character_set: String,
        collation: String,
    },
}

/// Represents a database table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub extension: TableExtension,
}

impl Table {
    /// Create a new table with the given name
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            extension: TableExtension::None,
        }
    }

    /// Add a column, assigning the next ordinal position
    pub fn add_column(&mut self, mut column: Column) {
        column.ordinal_position = self.columns.len() as u32 + 1;
        self.columns.push(column);
    }

    pub fn add_index(&mut self, index: Index) {
        self.indexes.push(index);
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.kind == IndexKind::PrimaryKey)
    }

    /// Whether any foreign key of this table points at `key`
    pub fn references(&self, key: &ObjectKey) -> bool {
        self.foreign_keys.iter().any(|fk| &fk.referenced_key() == key)
    }
}

impl SchemaObject for Table {
    type Detail = crate::schema::diff::TableDiff;

    fn category(&self) -> ObjectCategory {
        ObjectCategory::Table
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Represents a table column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// 1-based position in crawl order
    pub ordinal_position: u32,
    /// Full type as the engine spells it, e.g. `varchar(255)` or `numeric(10,2)`
    pub data_type: String,
    pub nullable: bool,
    /// Default as an SQL expression, ready to be placed after `DEFAULT`
    pub default: Option<String>,
    pub collation: Option<String>,
    /// MySQL only
    pub character_set: Option<String>,
    pub identity: Option<Identity>,
    pub comment: Option<String>,
    /// Microsoft SQL only: name of the default constraint
    pub default_constraint: Option<String>,
}

impl Column {
    /// Create a new non-nullable column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            ordinal_position: 0,
            data_type: data_type.to_string(),
            nullable: false,
            default: None,
            collation: None,
            character_set: None,
            identity: None,
            comment: None,
            default_constraint: None,
        }
    }

    /// Set whether the column is nullable
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set a default expression for the column
    pub fn default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn collation(mut self, collation: &str) -> Self {
        self.collation = Some(collation.to_string());
        self
    }

    pub fn identity(mut self, seed: i64, increment: i64) -> Self {
        self.identity = Some(Identity { seed, increment });
        self
    }
}

/// Auto-numbering attached to a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub seed: i64,
    pub increment: i64,
}

/// Kind tag of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    PrimaryKey,
    /// Declared as a table constraint (`CONSTRAINT .. UNIQUE`)
    UniqueConstraint,
    Unique,
    Index,
    Fulltext,
    Spatial,
}

impl IndexKind {
    /// Primary keys and unique constraints are dropped as constraints
    pub fn is_constraint(self) -> bool {
        matches!(self, IndexKind::PrimaryKey | IndexKind::UniqueConstraint)
    }
}

/// Dialect-specific index attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dialect", rename_all = "lowercase")]
pub enum IndexExtension {
    #[default]
    None,
    MySql {
        /// `BTREE`, `HASH`, `FULLTEXT`, `SPATIAL`
        index_type: String,
    },
    MicrosoftSql {
        clustered: bool,
        filter: Option<String>,
    },
    PostgreSql {
        /// Access method, `btree` by default
        method: String,
        predicate: Option<String>,
    },
}

/// One column reference inside an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub ordinal: u32,
    pub descending: bool,
    /// MySQL prefix length
    pub prefix_length: Option<u32>,
}

impl IndexColumn {
    pub fn new(name: &str, ordinal: u32) -> Self {
        Self {
            name: name.to_string(),
            ordinal,
            descending: false,
            prefix_length: None,
        }
    }
}

/// Represents an index or key constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
    pub extension: IndexExtension,
}

impl Index {
    pub fn new(name: &str, kind: IndexKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            columns: Vec::new(),
            extension: IndexExtension::None,
        }
    }

    /// Append a column at the next ordinal
    pub fn column(mut self, name: &str) -> Self {
        let ordinal = self.columns.len() as u32 + 1;
        self.columns.push(IndexColumn::new(name, ordinal));
        self
    }

    /// Columns in ordinal order
    pub fn ordered_columns(&self) -> Vec<&IndexColumn> {
        let mut columns: Vec<&IndexColumn> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.ordinal);
        columns
    }
}

/// Referential action of a foreign key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse the spellings used by the various catalogs
    ///
    /// Accepts `NO ACTION`, `NO_ACTION` and the PostgreSQL one-letter codes.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_uppercase().replace('_', " ");
        match normalized.as_str() {
            "NO ACTION" | "A" => Some(ReferentialAction::NoAction),
            "RESTRICT" | "R" => Some(ReferentialAction::Restrict),
            "CASCADE" | "C" => Some(ReferentialAction::Cascade),
            "SET NULL" | "N" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "D" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// One column pair of a foreign key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyColumn {
    pub ordinal: u32,
    pub column: String,
    pub referenced_column: String,
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<ForeignKeyColumn>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

impl ForeignKey {
    pub fn new(name: &str, referenced_schema: &str, referenced_table: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            referenced_schema: referenced_schema.to_string(),
            referenced_table: referenced_table.to_string(),
            on_update: ReferentialAction::NoAction,
            on_delete: ReferentialAction::NoAction,
        }
    }

    /// Append a column pair at the next ordinal
    pub fn column(mut self, column: &str, referenced_column: &str) -> Self {
        let ordinal = self.columns.len() as u32 + 1;
        self.columns.push(ForeignKeyColumn {
            ordinal,
            column: column.to_string(),
            referenced_column: referenced_column.to_string(),
        });
        self
    }

    pub fn referenced_key(&self) -> ObjectKey {
        ObjectKey::new(&self.referenced_schema, &self.referenced_table)
    }

    /// Column pairs in ordinal order
    pub fn ordered_columns(&self) -> Vec<&ForeignKeyColumn> {
        let mut columns: Vec<&ForeignKeyColumn> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.ordinal);
        columns
    }
}

/// Represents a database view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub schema: String,
    pub name: String,
    /// Body as returned by the catalog; a bare `SELECT` for MySQL and
    /// PostgreSQL, the full `CREATE VIEW` text for Microsoft SQL
    pub definition: String,
}

impl View {
    pub fn new(schema: &str, name: &str, definition: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            definition: definition.to_string(),
        }
    }

    pub fn has_same_definition(&self, other: &View) -> bool {
        normalize_definition(&self.definition) == normalize_definition(&other.definition)
    }
}

impl SchemaObject for View {
    type Detail = ();

    fn category(&self) -> ObjectCategory {
        ObjectCategory::View
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineKind {
    Function,
    Procedure,
}

/// Represents a function or stored procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    /// Full creation text as returned by the engine
    pub definition: String,
    /// PostgreSQL identity arguments, used to tell overloads apart
    pub arguments: Option<String>,
    pub return_type: Option<String>,
}

impl Routine {
    pub fn new(schema: &str, name: &str, kind: RoutineKind, definition: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            kind,
            definition: definition.to_string(),
            arguments: None,
            return_type: None,
        }
    }

    /// Name including the argument list when the engine supports overloads
    pub fn signature(&self) -> String {
        match &self.arguments {
            Some(args) => format!("{}({})", self.name, args),
            None => self.name.clone(),
        }
    }

    pub fn has_same_definition(&self, other: &Routine) -> bool {
        self.arguments == other.arguments
            && self.return_type == other.return_type
            && normalize_definition(&self.definition) == normalize_definition(&other.definition)
    }
}

impl SchemaObject for Routine {
    type Detail = ();

    fn category(&self) -> ObjectCategory {
        match self.kind {
            RoutineKind::Function => ObjectCategory::Function,
            RoutineKind::Procedure => ObjectCategory::Procedure,
        }
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.schema, &self.signature())
    }
}

/// Represents a sequence generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub schema: String,
    pub name: String,
    pub data_type: String,
    pub start_value: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
}

impl Sequence {
    pub fn new(schema: &str, name: &str, data_type: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            data_type: data_type.to_string(),
            start_value: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        }
    }
}

impl SchemaObject for Sequence {
    type Detail = ();

    fn category(&self) -> ObjectCategory {
        ObjectCategory::Sequence
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    fn name(&self) -> &str {
        &self.name
    }
}
