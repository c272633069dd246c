//! Storage error types for obgraph-storage.
//!
//! [`StorageError`] covers all anticipated failure modes of the dump and
//! load engines: SQLite and serialization failures, misuse of the dumper
//! lifecycle, store-file validation, and unresolvable entities found
//! while loading.

use std::path::PathBuf;

use thiserror::Error;

use obgraph_core::CoreError;

/// Errors produced by the persistence engines.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A model-level failure (bad identifier, bad value JSON, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// SQLite returned an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A schema migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// A dumper operation was called outside its legal state.
    #[error("dumper in state {actual}, operation needs {expected}")]
    BadDumperState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A filesystem operation on a dump file failed.
    #[error("dump file error on {path}: {source}")]
    DumpFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required store file is missing from the dump directory.
    #[error("missing store file {0}")]
    MissingStoreFile(PathBuf),

    /// The text export is older than its SQLite store, so the pair is
    /// suspect and loading refuses to proceed.
    #[error("text export {sql} is older than store {db}")]
    StaleTextExport { sql: PathBuf, db: PathBuf },

    /// The store carries an unexpected format marker.
    #[error("store format {found:?}, expected {expected:?}")]
    BadFormat { found: String, expected: String },

    /// A payload row named a kind with no registered loader.
    #[error("unknown payload kind {kind:?} on object {id}")]
    UnknownPayloadKind { kind: String, id: String },
}
