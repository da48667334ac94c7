//! Utilities for schema_compare
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

// Re-export key utility functions
pub use logging::init_logging;
pub use naming::{normalize_definition, qualify, quote_identifier, quote_literal};
