//! The dump engine: mark phase, emit phase, atomic publish.
//!
//! A [`Dumper`] walks Idle -> Scanning -> Emitting, in that order only.
//! Scanning computes the persistable closure: it seeds from the
//! predefined objects and the bound global variables, then chases
//! references through attributes, components and payloads, skipping
//! transient objects. Emitting writes every marked object as a row into
//! one of two freshly created SQLite stores (global and user), writes a
//! plain-text SQL export next to each, and finally publishes all four
//! files with rename rotation: `f~` becomes `f~~`, `f` becomes `f~`, the
//! temp file becomes `f`.
//!
//! Attribute pairs whose key did not make the closure are dropped from
//! the emitted row, as are attribute values that collapse to null
//! because their referenced object was not marked.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info};

use obgraph_core::json::{value_to_json, EmitObj};
use obgraph_core::object::Space;
use obgraph_core::serial::{Ident, Serial};
use obgraph_core::value::Value;
use obgraph_core::{ObjRef, Universe};

use crate::error::StorageError;
use crate::schema;

/// Base file name of the global store, holding predefined and global
/// objects.
pub const GLOBAL_STORE_BASE: &str = "obgraph_global";

/// Base file name of the user store.
pub const USER_STORE_BASE: &str = "obgraph_user";

/// Extension of the SQLite store files.
pub const SQLITE_EXT: &str = ".sqlite";

/// Extension of the plain-text SQL exports.
pub const SQL_EXT: &str = ".sql";

/// Counters reported by a completed dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOutcome {
    /// Objects written, across both stores.
    pub objects: usize,
    /// Global-variable rows written.
    pub globals: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpState {
    Idle,
    Scanning,
    Emitting,
}

impl DumpState {
    fn name(self) -> &'static str {
        match self {
            DumpState::Idle => "idle",
            DumpState::Scanning => "scanning",
            DumpState::Emitting => "emitting",
        }
    }
}

struct DumpedEntry {
    ob: ObjRef,
    space: Space,
}

/// One dump in progress against a borrowed universe.
pub struct Dumper<'u> {
    universe: &'u Universe,
    dir: PathBuf,
    temp_suffix: String,
    state: DumpState,
    dumped: BTreeMap<Ident, DumpedEntry>,
    queue: VecDeque<ObjRef>,
}

impl EmitObj for Dumper<'_> {
    fn emit_objptr(&self, ob: &ObjRef) -> bool {
        self.dumped.contains_key(&ob.id())
    }
}

impl<'u> Dumper<'u> {
    /// Prepares a dump into `dir`, creating the directory if needed.
    /// Temp files carry a `+<serial>_p<pid>.tmp` suffix so concurrent
    /// dumps into the same directory cannot collide.
    pub fn new(universe: &'u Universe, dir: &Path) -> Result<Dumper<'u>, StorageError> {
        fs::create_dir_all(dir).map_err(|source| StorageError::DumpFile {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Dumper {
            universe,
            dir: dir.to_path_buf(),
            temp_suffix: format!("+{}_p{}.tmp", Serial::random(), std::process::id()),
            state: DumpState::Idle,
            dumped: BTreeMap::new(),
            queue: VecDeque::new(),
        })
    }

    fn expect_state(&self, expected: DumpState) -> Result<(), StorageError> {
        if self.state != expected {
            return Err(StorageError::BadDumperState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    /// Enters the scan phase and seeds the work list with every
    /// predefined object and every bound global variable.
    pub fn start_scan(&mut self) -> Result<(), StorageError> {
        self.expect_state(DumpState::Idle)?;
        self.state = DumpState::Scanning;
        for ob in self.universe.objects.predefined_objects() {
            self.add_dumped(&ob)?;
        }
        for (name, ob) in self.universe.globals.bound() {
            debug!(global = %name, target = %ob, "dump scan root");
            self.add_dumped(&ob)?;
        }
        info!(roots = self.queue.len(), "dump scan started");
        Ok(())
    }

    /// Marks one object for persistence and queues it for scanning.
    /// Transient objects are silently skipped; marking twice is a no-op.
    pub fn add_dumped(&mut self, ob: &ObjRef) -> Result<(), StorageError> {
        self.expect_state(DumpState::Scanning)?;
        // membership first: the queued object itself may come back here
        // through one of its own attributes
        if self.dumped.contains_key(&ob.id()) {
            return Ok(());
        }
        let space = ob.space();
        if !space.is_persistent() {
            return Ok(());
        }
        self.dumped.insert(
            ob.id(),
            DumpedEntry {
                ob: ob.clone(),
                space,
            },
        );
        self.queue.push_back(ob.clone());
        Ok(())
    }

    /// True once `id` is marked for persistence.
    pub fn is_dumped(&self, id: Ident) -> bool {
        self.dumped.contains_key(&id)
    }

    /// Drains the work list, chasing references in discovery order.
    /// Returns the number of objects scanned.
    pub fn scan_loop(&mut self) -> Result<usize, StorageError> {
        self.expect_state(DumpState::Scanning)?;
        let mut scanned = 0usize;
        while let Some(ob) = self.queue.pop_front() {
            self.scan_object(&ob)?;
            scanned += 1;
        }
        info!(scanned, marked = self.dumped.len(), "dump scan complete");
        Ok(scanned)
    }

    fn scan_object(&mut self, ob: &ObjRef) -> Result<(), StorageError> {
        // snapshot under the lock, record after releasing it: recording
        // touches other objects' locks and the attribute keys may
        // include this very object
        let (attrs, comps, payload_refs) = {
            let data = ob.lock();
            let attrs: Vec<(ObjRef, Value)> = data
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let comps: Vec<Value> = data.comps.clone();
            let mut payload_refs = Vec::new();
            if let Some(payload) = &data.payload {
                payload.scan(&mut |r| payload_refs.push(r.clone()));
            }
            (attrs, comps, payload_refs)
        };

        for (key, val) in attrs {
            self.add_dumped(&key)?;
            // values only persist under keys that made the closure
            if self.is_dumped(key.id()) {
                let mut refs = Vec::new();
                val.scan_refs(&mut |r| refs.push(r.clone()));
                for r in refs {
                    self.add_dumped(&r)?;
                }
            }
        }
        for val in comps {
            let mut refs = Vec::new();
            val.scan_refs(&mut |r| refs.push(r.clone()));
            for r in refs {
                self.add_dumped(&r)?;
            }
        }
        for r in payload_refs {
            self.add_dumped(&r)?;
        }
        Ok(())
    }

    /// Runs the emit phase: writes both stores and their text exports
    /// into temp files, then publishes everything with rename rotation.
    pub fn emit_all(&mut self) -> Result<DumpOutcome, StorageError> {
        self.expect_state(DumpState::Scanning)?;
        if !self.queue.is_empty() {
            return Err(StorageError::BadDumperState {
                expected: "drained scan queue",
                actual: "scanning with pending objects",
            });
        }
        self.state = DumpState::Emitting;

        let global_db_tmp = self.temp_path(GLOBAL_STORE_BASE, SQLITE_EXT);
        let user_db_tmp = self.temp_path(USER_STORE_BASE, SQLITE_EXT);
        let global_sql_tmp = self.temp_path(GLOBAL_STORE_BASE, SQL_EXT);
        let user_sql_tmp = self.temp_path(USER_STORE_BASE, SQL_EXT);

        let mut global_conn = schema::create_store(&global_db_tmp)?;
        let mut user_conn = schema::create_store(&user_db_tmp)?;

        let objects = self.emit_objects(&mut global_conn, &mut user_conn)?;
        let globals = self.emit_globals(&mut global_conn, &mut user_conn)?;

        write_text_export(&global_conn, &global_sql_tmp)?;
        write_text_export(&user_conn, &user_sql_tmp)?;

        // close before the renames; nothing may touch the store files
        // after their text exports are written
        drop(global_conn);
        drop(user_conn);

        // the .sql export must never end up older than its store, so it
        // publishes second
        self.publish(GLOBAL_STORE_BASE, SQLITE_EXT, &global_db_tmp)?;
        self.publish(GLOBAL_STORE_BASE, SQL_EXT, &global_sql_tmp)?;
        self.publish(USER_STORE_BASE, SQLITE_EXT, &user_db_tmp)?;
        self.publish(USER_STORE_BASE, SQL_EXT, &user_sql_tmp)?;

        info!(objects, globals, dir = %self.dir.display(), "dump published");
        Ok(DumpOutcome { objects, globals })
    }

    fn temp_path(&self, base: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{base}{ext}{}", self.temp_suffix))
    }

    fn emit_objects(
        &self,
        global_conn: &mut Connection,
        user_conn: &mut Connection,
    ) -> Result<usize, StorageError> {
        let global_tx = global_conn.transaction()?;
        let user_tx = user_conn.transaction()?;
        let mut written = 0usize;
        {
            let mut global_ins = global_tx.prepare_cached(
                "INSERT INTO t_objects (ob_id, ob_mtime, ob_jsoncont, ob_paylkind, ob_paylcont)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut user_ins = user_tx.prepare_cached(
                "INSERT INTO t_objects (ob_id, ob_mtime, ob_jsoncont, ob_paylkind, ob_paylcont)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in self.dumped.values() {
                let row = self.emit_object_row(entry)?;
                let stmt = if entry.space == Space::User {
                    &mut user_ins
                } else {
                    &mut global_ins
                };
                stmt.execute((row.id, row.mtime, row.content, row.paylkind, row.paylcont))?;
                written += 1;
            }
        }
        global_tx.commit()?;
        user_tx.commit()?;
        Ok(written)
    }

    fn emit_object_row(&self, entry: &DumpedEntry) -> Result<ObjectRow, StorageError> {
        let data = entry.ob.lock();
        let mut attrs = Vec::new();
        for (key, val) in &data.attrs {
            if !self.is_dumped(key.id()) {
                debug!(owner = %entry.ob, key = %key, "attribute under unmarked key dropped");
                continue;
            }
            let jv = value_to_json(self, val);
            if jv.is_null() && !val.is_nil() {
                debug!(owner = %entry.ob, key = %key, "dangling attribute value dropped");
                continue;
            }
            attrs.push(json!({ "at": key.id().to_string(), "va": jv }));
        }
        let comps: Vec<serde_json::Value> =
            data.comps.iter().map(|v| value_to_json(self, v)).collect();
        let content = json!({ "attrs": attrs, "comps": comps });
        let (paylkind, paylcont) = match &data.payload {
            Some(payload) => (
                payload.kind().to_owned(),
                serde_json::to_string(&payload.emit(self))?,
            ),
            None => (String::new(), String::new()),
        };
        Ok(ObjectRow {
            id: entry.ob.id().to_string(),
            mtime: data.mtime,
            content: serde_json::to_string(&content)?,
            paylkind,
            paylcont,
        })
    }

    fn emit_globals(
        &self,
        global_conn: &mut Connection,
        user_conn: &mut Connection,
    ) -> Result<usize, StorageError> {
        let mut written = 0usize;
        for (name, ob) in self.universe.globals.bound() {
            let Some(entry) = self.dumped.get(&ob.id()) else {
                debug!(global = %name, "global bound to unmarked object dropped");
                continue;
            };
            let conn = if entry.space == Space::User {
                &mut *user_conn
            } else {
                &mut *global_conn
            };
            conn.execute(
                "INSERT INTO t_globals (glob_name, glob_oid) VALUES (?1, ?2)",
                (&name, ob.id().to_string()),
            )?;
            written += 1;
        }
        Ok(written)
    }

    fn publish(&self, base: &str, ext: &str, tmp: &Path) -> Result<(), StorageError> {
        let target = self.dir.join(format!("{base}{ext}"));
        let backup = self.dir.join(format!("{base}{ext}~"));
        let backup2 = self.dir.join(format!("{base}{ext}~~"));
        if backup.exists() {
            rename(&backup, &backup2)?;
        }
        if target.exists() {
            rename(&target, &backup)?;
        }
        rename(tmp, &target)
    }
}

struct ObjectRow {
    id: String,
    mtime: i64,
    content: String,
    paylkind: String,
    paylcont: String,
}

fn rename(from: &Path, to: &Path) -> Result<(), StorageError> {
    fs::rename(from, to).map_err(|source| StorageError::DumpFile {
        path: from.to_path_buf(),
        source,
    })
}

/// Escapes a string for a single-quoted SQL literal.
fn sql_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Writes the human-readable SQL export of one store: plain INSERT
/// statements for all three tables, in stable order.
fn write_text_export(conn: &Connection, path: &Path) -> Result<(), StorageError> {
    let mut text = String::new();
    text.push_str("-- obgraph store export\n");

    let mut params = conn.prepare("SELECT par_name, par_value FROM t_params ORDER BY par_name")?;
    let rows = params.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (name, value) = row?;
        let _ = writeln!(
            text,
            "INSERT INTO t_params VALUES ({}, {});",
            sql_quote(&name),
            sql_quote(&value)
        );
    }

    let mut objects = conn.prepare(
        "SELECT ob_id, ob_mtime, ob_jsoncont, ob_paylkind, ob_paylcont
         FROM t_objects ORDER BY ob_id",
    )?;
    let rows = objects.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;
    for row in rows {
        let (id, mtime, content, paylkind, paylcont) = row?;
        let _ = writeln!(
            text,
            "INSERT INTO t_objects VALUES ({}, {}, {}, {}, {});",
            sql_quote(&id),
            mtime,
            sql_quote(&content),
            sql_quote(&paylkind),
            sql_quote(&paylcont)
        );
    }

    let mut globals =
        conn.prepare("SELECT glob_name, glob_oid FROM t_globals ORDER BY glob_name")?;
    let rows = globals.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (name, oid) = row?;
        let _ = writeln!(
            text,
            "INSERT INTO t_globals VALUES ({}, {});",
            sql_quote(&name),
            sql_quote(&oid)
        );
    }

    fs::write(path, text).map_err(|source| StorageError::DumpFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let universe = Universe::new();
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = Dumper::new(&universe, dir.path()).unwrap();

        // scan_loop and emit_all need the scanning state
        assert!(matches!(
            dumper.scan_loop(),
            Err(StorageError::BadDumperState { .. })
        ));
        assert!(matches!(
            dumper.emit_all(),
            Err(StorageError::BadDumperState { .. })
        ));

        dumper.start_scan().unwrap();
        assert!(matches!(
            dumper.start_scan(),
            Err(StorageError::BadDumperState { .. })
        ));
    }

    #[test]
    fn transient_objects_never_marked() {
        let universe = Universe::new();
        let transient = universe.objects.create_fresh();
        let root = universe.objects.create_fresh();
        universe.objects.set_space(&root, Space::Predefined);
        root.put_attr(transient.clone(), Value::Int(1)).unwrap();
        root.append_comp(Value::Refob(transient.clone()));

        let dir = tempfile::tempdir().unwrap();
        let mut dumper = Dumper::new(&universe, dir.path()).unwrap();
        dumper.start_scan().unwrap();
        dumper.scan_loop().unwrap();

        assert!(dumper.is_dumped(root.id()));
        assert!(!dumper.is_dumped(transient.id()));
    }

    #[test]
    fn self_referencing_attribute_scans_without_hanging() {
        let universe = Universe::new();
        let ob = universe.objects.create_fresh();
        universe.objects.set_space(&ob, Space::Global);
        universe.globals.register("self_ref").unwrap();
        universe.globals.bind("self_ref", Some(ob.clone())).unwrap();
        ob.put_attr(ob.clone(), Value::Refob(ob.clone())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut dumper = Dumper::new(&universe, dir.path()).unwrap();
        dumper.start_scan().unwrap();
        let scanned = dumper.scan_loop().unwrap();
        assert_eq!(scanned, 1);
        assert!(dumper.is_dumped(ob.id()));
    }

    #[test]
    fn sql_quote_doubles_single_quotes() {
        assert_eq!(sql_quote("plain"), "'plain'");
        assert_eq!(sql_quote("it's"), "'it''s'");
        assert_eq!(sql_quote(""), "''");
    }
}
