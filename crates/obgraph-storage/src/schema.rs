//! SQL schema constants and migration setup for store files.
//!
//! Uses `rusqlite_migration` to manage schema migrations via SQLite's
//! `user_version` pragma. Migrations are embedded at compile time via
//! `include_str!`.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// Format marker stored in `t_params` under [`PARAM_FORMAT`].
pub const FORMAT_VERSION: &str = "ObGraph2026A";

/// `t_params` key of the format marker.
pub const PARAM_FORMAT: &str = "format_version";

/// All schema migrations, applied in order via `user_version` tracking.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(include_str!("migrations/001_initial_schema.sql")),
        // Future migrations added here as new M::up(...) entries.
    ])
}

/// Creates a fresh store file at `path`, applies the schema, and writes
/// the format marker.
pub fn create_store(path: &Path) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    configure_and_migrate(&mut conn)?;
    conn.execute(
        "INSERT OR REPLACE INTO t_params (par_name, par_value) VALUES (?1, ?2)",
        (PARAM_FORMAT, FORMAT_VERSION),
    )?;
    Ok(conn)
}

/// Opens an existing store file read-only and checks its format marker.
pub fn open_store(path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    check_format(&conn)?;
    Ok(conn)
}

/// Reads the format marker and compares it against [`FORMAT_VERSION`].
pub fn check_format(conn: &Connection) -> Result<(), StorageError> {
    let found: String = conn
        .query_row(
            "SELECT par_value FROM t_params WHERE par_name = ?1",
            (PARAM_FORMAT,),
            |row| row.get(0),
        )
        .unwrap_or_default();
    if found != FORMAT_VERSION {
        return Err(StorageError::BadFormat {
            found,
            expected: FORMAT_VERSION.to_owned(),
        });
    }
    Ok(())
}

/// Configures pragmas and applies pending migrations.
fn configure_and_migrate(conn: &mut Connection) -> Result<(), StorageError> {
    // Rollback journal, not WAL: store files are written once into temp
    // paths and published by rename, and the text export's mtime must
    // not fall behind the sqlite file's (closing a WAL connection
    // checkpoints and touches the main file).
    conn.pragma_update(None, "journal_mode", "DELETE")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_validate() {
        migrations().validate().expect("migrations should be valid");
    }

    #[test]
    fn create_store_writes_format_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        let conn = create_store(&path).unwrap();
        check_format(&conn).unwrap();
        drop(conn);

        let conn = open_store(&path).unwrap();
        let marker: String = conn
            .query_row(
                "SELECT par_value FROM t_params WHERE par_name = ?1",
                (PARAM_FORMAT,),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(marker, FORMAT_VERSION);
    }

    #[test]
    fn open_store_rejects_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.sqlite");
        {
            let mut conn = Connection::open(&path).unwrap();
            configure_and_migrate(&mut conn).unwrap();
            // schema without the format marker row
        }
        assert!(matches!(
            open_store(&path),
            Err(StorageError::BadFormat { .. })
        ));
    }
}
