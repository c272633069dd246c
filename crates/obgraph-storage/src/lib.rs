//! Durable persistence for obgraph universes.
//!
//! # Architecture
//!
//! - [`schema`]: store-file schema, migrations and format marker.
//! - [`dumper`]: the mark/emit engine writing the global and user
//!   stores plus their text exports, published by atomic rename.
//! - [`loader`]: the four-pass reconstruction engine.
//! - [`error`]: [`StorageError`].
//!
//! Most callers only need the two entry points: [`dump_into_directory`]
//! runs a complete scan-and-emit cycle, [`load_from_directory`]
//! repopulates an empty universe from a published dump.

pub mod dumper;
pub mod error;
pub mod loader;
pub mod schema;

use std::path::Path;

use obgraph_core::Universe;

pub use dumper::{DumpOutcome, Dumper, GLOBAL_STORE_BASE, SQLITE_EXT, SQL_EXT, USER_STORE_BASE};
pub use error::StorageError;
pub use loader::{LoadOutcome, Loader};
pub use schema::{FORMAT_VERSION, PARAM_FORMAT};

/// Scans the universe's persistable closure and publishes a complete
/// dump into `dir`.
pub fn dump_into_directory(universe: &Universe, dir: &Path) -> Result<DumpOutcome, StorageError> {
    let mut dumper = Dumper::new(universe, dir)?;
    dumper.start_scan()?;
    dumper.scan_loop()?;
    dumper.emit_all()
}

/// Loads a published dump from `dir` into `universe`. Payload kinds and
/// global-variable names appearing in the stores must be registered
/// beforehand.
pub fn load_from_directory(universe: &Universe, dir: &Path) -> Result<LoadOutcome, StorageError> {
    let mut loader = Loader::open(universe, dir)?;
    loader.load()
}
