//! The owning container for one object graph.
//!
//! There are no process-wide registries: the store, the global-variable
//! slots and the payload loaders all hang off a [`Universe`], and the
//! persistence engines borrow the universe they operate on. Two
//! universes never share objects.

use crate::globals::GlobalRegistry;
use crate::payload::PayloadRegistry;
use crate::store::ObjectStore;

/// One complete object graph: its store, global slots and payload kinds.
#[derive(Default)]
pub struct Universe {
    pub objects: ObjectStore,
    pub globals: GlobalRegistry,
    pub payloads: PayloadRegistry,
}

impl Universe {
    pub fn new() -> Universe {
        Universe::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universes_are_independent() {
        let a = Universe::new();
        let b = Universe::new();
        let ob = a.objects.create_fresh();
        assert!(a.objects.find(ob.id()).unwrap().is_some());
        assert!(b.objects.find(ob.id()).unwrap().is_none());

        a.globals.register("only_in_a").unwrap();
        assert!(a.globals.is_registered("only_in_a"));
        assert!(!b.globals.is_registered("only_in_a"));
    }
}
