//! Named global-variable slots.
//!
//! A slot must be registered before it can be bound; binding an
//! unregistered name is an error, not an implicit registration. Bound
//! slots are scan roots for the dump engine.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::object::ObjRef;

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn valid_global_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The registry of named global slots, each holding an optional object
/// reference.
#[derive(Default)]
pub struct GlobalRegistry {
    slots: Mutex<BTreeMap<String, Option<ObjRef>>>,
}

impl GlobalRegistry {
    pub fn new() -> GlobalRegistry {
        GlobalRegistry::default()
    }

    /// Registers an empty slot under `name`.
    pub fn register(&self, name: &str) -> Result<(), CoreError> {
        if !valid_global_name(name) {
            return Err(CoreError::BadGlobalName(name.to_owned()));
        }
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.contains_key(name) {
            return Err(CoreError::DuplicateGlobal(name.to_owned()));
        }
        slots.insert(name.to_owned(), None);
        Ok(())
    }

    /// Rebinds a registered slot; `None` clears it.
    pub fn bind(&self, name: &str, target: Option<ObjRef>) -> Result<(), CoreError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get_mut(name) {
            Some(slot) => {
                *slot = target;
                Ok(())
            }
            None => Err(CoreError::UnknownGlobal(name.to_owned())),
        }
    }

    /// Current binding of a registered slot.
    pub fn get(&self, name: &str) -> Result<Option<ObjRef>, CoreError> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(name) {
            Some(slot) => Ok(slot.clone()),
            None => Err(CoreError::UnknownGlobal(name.to_owned())),
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.keys().cloned().collect()
    }

    /// All bound slots as (name, target) pairs, sorted by name.
    pub fn bound(&self) -> Vec<(String, ObjRef)> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .filter_map(|(name, slot)| slot.clone().map(|ob| (name.clone(), ob)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::serial::Ident;

    #[test]
    fn name_validation() {
        assert!(valid_global_name("the_system"));
        assert!(valid_global_name("_x"));
        assert!(valid_global_name("Glob9"));
        assert!(!valid_global_name(""));
        assert!(!valid_global_name("9lives"));
        assert!(!valid_global_name("has-dash"));
        assert!(!valid_global_name("has space"));
        assert!(!valid_global_name("héllo"));
    }

    #[test]
    fn register_bind_get() {
        let reg = GlobalRegistry::new();
        reg.register("the_system").unwrap();
        assert!(reg.get("the_system").unwrap().is_none());

        let ob = Object::with_id(Ident::random());
        reg.bind("the_system", Some(ob.clone())).unwrap();
        assert_eq!(reg.get("the_system").unwrap().unwrap().id(), ob.id());

        reg.bind("the_system", None).unwrap();
        assert!(reg.get("the_system").unwrap().is_none());
    }

    #[test]
    fn duplicate_and_unknown_names_error() {
        let reg = GlobalRegistry::new();
        reg.register("a").unwrap();
        assert!(matches!(
            reg.register("a"),
            Err(CoreError::DuplicateGlobal(_))
        ));
        assert!(matches!(
            reg.register("bad name"),
            Err(CoreError::BadGlobalName(_))
        ));
        assert!(matches!(reg.get("b"), Err(CoreError::UnknownGlobal(_))));
        assert!(matches!(
            reg.bind("b", None),
            Err(CoreError::UnknownGlobal(_))
        ));
    }

    #[test]
    fn bound_lists_only_bound_slots_sorted() {
        let reg = GlobalRegistry::new();
        reg.register("zeta").unwrap();
        reg.register("alpha").unwrap();
        reg.register("mid").unwrap();
        let ob = Object::with_id(Ident::random());
        reg.bind("zeta", Some(ob.clone())).unwrap();
        reg.bind("alpha", Some(ob.clone())).unwrap();

        let bound = reg.bound();
        let names: Vec<&str> = bound.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(reg.names(), vec!["alpha", "mid", "zeta"]);
    }
}
