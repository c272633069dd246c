//! The load engine.
//!
//! Loading validates the store files first: the global store must exist
//! alongside its text export, and the export must not be older than the
//! SQLite file (a stale export means the pair was tampered with or a
//! publish went wrong). The user store is optional but validated the
//! same way when present.
//!
//! Reconstruction then runs four strict passes over both stores, global
//! before user:
//!
//! 1. create an empty shell object for every row,
//! 2. fill attributes and components from the content JSON,
//! 3. rebuild payloads through the registered loaders,
//! 4. bind the global-variable rows.
//!
//! Any identifier that does not resolve against the shells created in
//! pass 1 aborts the load.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use obgraph_core::json::{value_from_json, ResolveObj};
use obgraph_core::object::Space;
use obgraph_core::serial::Ident;
use obgraph_core::{CoreError, ObjRef, Universe};

use crate::dumper::{GLOBAL_STORE_BASE, SQLITE_EXT, SQL_EXT, USER_STORE_BASE};
use crate::error::StorageError;
use crate::schema;

/// Counters reported by a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Objects created, across both stores.
    pub objects: usize,
    /// Global variables bound.
    pub globals: usize,
}

/// One load in progress against a borrowed universe.
pub struct Loader<'u> {
    universe: &'u Universe,
    global: Connection,
    user: Option<Connection>,
    shells: HashMap<Ident, ObjRef>,
}

/// Resolves identifier text against the pass-1 shells.
struct ShellResolver<'a> {
    shells: &'a HashMap<Ident, ObjRef>,
}

impl ResolveObj for ShellResolver<'_> {
    fn resolve(&mut self, idstr: &str) -> Result<ObjRef, CoreError> {
        let id = Ident::parse(idstr)?;
        self.shells
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownObjectRef(idstr.to_owned()))
    }
}

/// Checks that the store file and its text export both exist and that
/// the export is not older than the store.
fn validate_store_pair(db: &Path, sql: &Path) -> Result<(), StorageError> {
    let meta_of = |path: &Path| {
        fs::metadata(path).map_err(|source| StorageError::DumpFile {
            path: path.to_path_buf(),
            source,
        })
    };
    let db_meta = meta_of(db)?;
    let sql_meta = meta_of(sql)?;
    let (Ok(db_time), Ok(sql_time)) = (db_meta.modified(), sql_meta.modified()) else {
        return Ok(());
    };
    if sql_time < db_time {
        return Err(StorageError::StaleTextExport {
            sql: sql.to_path_buf(),
            db: db.to_path_buf(),
        });
    }
    Ok(())
}

impl<'u> Loader<'u> {
    /// Opens the stores in `dir`. The global store is required, the
    /// user store optional.
    pub fn open(universe: &'u Universe, dir: &Path) -> Result<Loader<'u>, StorageError> {
        let global_db = dir.join(format!("{GLOBAL_STORE_BASE}{SQLITE_EXT}"));
        let global_sql = dir.join(format!("{GLOBAL_STORE_BASE}{SQL_EXT}"));
        if !global_db.exists() {
            return Err(StorageError::MissingStoreFile(global_db));
        }
        validate_store_pair(&global_db, &global_sql)?;
        let global = schema::open_store(&global_db)?;

        let user_db = dir.join(format!("{USER_STORE_BASE}{SQLITE_EXT}"));
        let user = if user_db.exists() {
            let user_sql = dir.join(format!("{USER_STORE_BASE}{SQL_EXT}"));
            validate_store_pair(&user_db, &user_sql)?;
            Some(schema::open_store(&user_db)?)
        } else {
            debug!(dir = %dir.display(), "no user store, loading global only");
            None
        };

        Ok(Loader {
            universe,
            global,
            user,
            shells: HashMap::new(),
        })
    }

    /// Runs all four passes and reports what was reconstructed.
    pub fn load(&mut self) -> Result<LoadOutcome, StorageError> {
        self.create_shells()?;
        self.fill_contents()?;
        self.fill_payloads()?;
        let globals = self.bind_globals()?;
        let outcome = LoadOutcome {
            objects: self.shells.len(),
            globals,
        };
        info!(objects = outcome.objects, globals, "load complete");
        Ok(outcome)
    }

    fn stores(&self) -> Vec<(&Connection, Space)> {
        let mut stores = vec![(&self.global, Space::Global)];
        if let Some(user) = &self.user {
            stores.push((user, Space::User));
        }
        stores
    }

    /// Pass 1: one empty shell per row, classified by its store.
    fn create_shells(&mut self) -> Result<(), StorageError> {
        let mut created: Vec<(Ident, ObjRef)> = Vec::new();
        for (conn, space) in self.stores() {
            let mut stmt = conn.prepare("SELECT ob_id FROM t_objects ORDER BY ob_id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                let idstr = row?;
                let id = Ident::parse(&idstr)?;
                let (ob, _) = self.universe.objects.find_or_create(id)?;
                self.universe.objects.set_space(&ob, space);
                created.push((id, ob));
            }
        }
        self.shells.extend(created);
        Ok(())
    }

    /// Pass 2: attributes, components and modification times.
    fn fill_contents(&mut self) -> Result<(), StorageError> {
        for (conn, _) in self.stores() {
            let mut stmt =
                conn.prepare("SELECT ob_id, ob_mtime, ob_jsoncont FROM t_objects ORDER BY ob_id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (idstr, mtime, content_text) = row?;
                let mut resolver = ShellResolver {
                    shells: &self.shells,
                };
                let ob = resolver.resolve(&idstr)?;
                let content: serde_json::Value = serde_json::from_str(&content_text)?;

                let mut attrs = Vec::new();
                if let Some(pairs) = content.get("attrs").and_then(|a| a.as_array()) {
                    for pair in pairs {
                        let keystr = pair.get("at").and_then(|k| k.as_str()).ok_or_else(|| {
                            CoreError::BadValueJson(format!("bad attribute entry {pair}"))
                        })?;
                        let key = resolver.resolve(keystr)?;
                        let val = value_from_json(
                            &mut resolver,
                            pair.get("va").unwrap_or(&serde_json::Value::Null),
                        )?;
                        if !val.is_nil() {
                            attrs.push((key, val));
                        }
                    }
                }
                let mut comps = Vec::new();
                if let Some(slots) = content.get("comps").and_then(|c| c.as_array()) {
                    for slot in slots {
                        comps.push(value_from_json(&mut resolver, slot)?);
                    }
                }

                let mut data = ob.lock();
                for (key, val) in attrs {
                    data.attrs.insert(key, val);
                }
                data.comps = comps;
                data.mtime = mtime;
            }
        }
        Ok(())
    }

    /// Pass 3: payloads through the registered loaders.
    fn fill_payloads(&mut self) -> Result<(), StorageError> {
        for (conn, _) in self.stores() {
            let mut stmt = conn.prepare(
                "SELECT ob_id, ob_paylkind, ob_paylcont FROM t_objects
                 WHERE ob_paylkind <> '' ORDER BY ob_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (idstr, kind, content_text) = row?;
                let mut resolver = ShellResolver {
                    shells: &self.shells,
                };
                let ob = resolver.resolve(&idstr)?;
                let loader = self.universe.payloads.loader_for(&kind).map_err(|_| {
                    StorageError::UnknownPayloadKind {
                        kind: kind.clone(),
                        id: idstr.clone(),
                    }
                })?;
                let content: serde_json::Value = if content_text.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_str(&content_text)?
                };
                let payload = loader(&ob, &mut resolver, &content)?;
                ob.lock().payload = Some(payload);
            }
        }
        Ok(())
    }

    /// Pass 4: global-variable bindings, which must name registered
    /// slots and loaded objects.
    fn bind_globals(&mut self) -> Result<usize, StorageError> {
        let mut bound = 0usize;
        for (conn, _) in self.stores() {
            let mut stmt =
                conn.prepare("SELECT glob_name, glob_oid FROM t_globals ORDER BY glob_name")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (name, oidstr) = row?;
                let mut resolver = ShellResolver {
                    shells: &self.shells,
                };
                let ob = resolver.resolve(&oidstr)?;
                self.universe.globals.bind(&name, Some(ob))?;
                bound += 1;
            }
        }
        Ok(bound)
    }
}
