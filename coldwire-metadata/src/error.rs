use std::io;
use thiserror::Error;

/// Errors related to parsing and storing component metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Malformed metadata line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error("Unknown scope name: {0}")]
    UnknownScope(String),
    #[error("Unknown visibility name: {0}")]
    UnknownVisibility(String),
    #[error("Cannot read or write metadata file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid bean export document: {0}")]
    InvalidExport(#[from] serde_json::Error),
}

/// Errors related to dependency graph analysis.
#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum GraphError {
    #[error("Unresolvable dependency - circular dependency detected: {formatted_cycle}")]
    CircularDependency {
        /// The offending walk, first and last elements equal.
        cycle: Vec<String>,
        /// Human-readable arrow-joined simple names.
        formatted_cycle: String,
    },
}
