//! Database module for schema_compare
//!
//! This module handles connections to the databases being compared.

pub mod connection;

// Re-export key types
pub use connection::DatabaseConnection;
