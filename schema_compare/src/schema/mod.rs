//! Schema module for schema_compare
//!
//! This module handles crawling database catalogs, comparing the resulting
//! snapshots and scripting the differences.

pub mod analyzer;
pub mod diff;
pub mod generator;
pub mod types;

// Re-export key types
pub use analyzer::{crawl_with, Crawler, SchemaCrawler};
pub use diff::{
    CompareResult, CompareResultItem, DiffState, ItemScripts, SchemaComparator, ScriptDirection,
    TableDiff,
};
pub use generator::{ScriptGenerator, Scripter};
pub use types::{
    Column, Dialect, ForeignKey, Index, IndexKind, ObjectCategory, ObjectKey, Routine,
    RoutineKind, SchemaModel, ScriptingOptions, Sequence, Table, View,
};
