//! The sharded object store.
//!
//! Objects live in buckets keyed by the high serial of their identifier;
//! each bucket carries its own lock so lookups in distinct buckets never
//! contend. The store owns the strong handle to every object it holds:
//! dropping an object is an explicit [`ObjectStore::remove`], which also
//! tears the object down (payload hook, attribute and component clears)
//! so reference cycles between objects cannot keep each other alive.
//!
//! A side index tracks the objects classified [`Space::Predefined`];
//! those seed the dump scan.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::CoreError;
use crate::object::{Object, ObjRef, Space};
use crate::serial::{Ident, BUCKET_COUNT};

// Integer division of the serial range leaves the topmost few serials
// one past the nominal bucket count, so the table carries one spare slot.
const STORE_BUCKETS: usize = BUCKET_COUNT as usize + 1;

/// The identifier-sharded table of live objects.
pub struct ObjectStore {
    buckets: Vec<Mutex<HashMap<Ident, ObjRef>>>,
    predefined: Mutex<BTreeMap<Ident, ObjRef>>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        ObjectStore::new()
    }
}

impl ObjectStore {
    pub fn new() -> ObjectStore {
        ObjectStore {
            buckets: (0..STORE_BUCKETS)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            predefined: Mutex::new(BTreeMap::new()),
        }
    }

    fn bucket_for(&self, id: Ident) -> &Mutex<HashMap<Ident, ObjRef>> {
        &self.buckets[id.bucket() as usize]
    }

    /// Looks up a live object. The empty identifier is rejected, not
    /// treated as a miss.
    pub fn find(&self, id: Ident) -> Result<Option<ObjRef>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyIdent);
        }
        let bucket = self.bucket_for(id).lock().unwrap_or_else(|e| e.into_inner());
        Ok(bucket.get(&id).cloned())
    }

    /// Finds the object with `id`, creating a fresh transient one when
    /// absent. The boolean reports whether the object already existed.
    pub fn find_or_create(&self, id: Ident) -> Result<(ObjRef, bool), CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyIdent);
        }
        let mut bucket = self.bucket_for(id).lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ob) = bucket.get(&id) {
            return Ok((ob.clone(), true));
        }
        let ob = Object::with_id(id);
        bucket.insert(id, ob.clone());
        Ok((ob.clone(), false))
    }

    /// Creates a fresh transient object under a random identifier,
    /// retrying inside the chosen bucket until an unused one turns up.
    pub fn create_fresh(&self) -> ObjRef {
        use std::collections::hash_map::Entry;
        let mut id = Ident::random();
        loop {
            let mut bucket = self.bucket_for(id).lock().unwrap_or_else(|e| e.into_inner());
            if let Entry::Vacant(slot) = bucket.entry(id) {
                let ob = Object::with_id(id);
                slot.insert(ob.clone());
                return ob;
            }
            drop(bucket);
            id = Ident::random_in_bucket(id.bucket().min(BUCKET_COUNT - 1))
                .unwrap_or_else(|_| Ident::random());
        }
    }

    /// Removes and tears down the object with `id`. The payload teardown
    /// hook runs, then attributes and components are cleared so handle
    /// cycles through this object are broken. Returns whether the object
    /// was present.
    pub fn remove(&self, id: Ident) -> Result<bool, CoreError> {
        if id.is_empty() {
            return Err(CoreError::EmptyIdent);
        }
        let removed = {
            let mut bucket = self.bucket_for(id).lock().unwrap_or_else(|e| e.into_inner());
            bucket.remove(&id)
        };
        let Some(ob) = removed else {
            return Ok(false);
        };
        {
            let mut pre = self.predefined.lock().unwrap_or_else(|e| e.into_inner());
            pre.remove(&id);
        }
        let mut data = ob.lock();
        if let Some(mut payload) = data.payload.take() {
            payload.teardown();
        }
        data.attrs.clear();
        data.comps.clear();
        Ok(true)
    }

    /// Reclassifies an object, keeping the predefined index in step.
    pub fn set_space(&self, ob: &ObjRef, space: Space) {
        let old = {
            let mut data = ob.lock();
            let old = data.space;
            data.space = space;
            old
        };
        if old == space {
            return;
        }
        let mut pre = self.predefined.lock().unwrap_or_else(|e| e.into_inner());
        match space {
            Space::Predefined => {
                pre.insert(ob.id(), ob.clone());
            }
            _ if old == Space::Predefined => {
                pre.remove(&ob.id());
            }
            _ => {}
        }
    }

    /// Finds or creates the object with `id` and classifies it
    /// predefined.
    pub fn make_predefined(&self, id: Ident) -> Result<ObjRef, CoreError> {
        let (ob, _) = self.find_or_create(id)?;
        self.set_space(&ob, Space::Predefined);
        Ok(ob)
    }

    /// All predefined objects, in identifier order.
    pub fn predefined_objects(&self) -> Vec<ObjRef> {
        let pre = self.predefined.lock().unwrap_or_else(|e| e.into_inner());
        pre.values().cloned().collect()
    }

    /// Number of live objects, summed across buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live handle, in no particular order.
    pub fn all_objects(&self) -> Vec<ObjRef> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let guard = bucket.lock().unwrap_or_else(|e| e.into_inner());
            out.extend(guard.values().cloned());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::value::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn find_or_create_reports_existing() {
        let store = ObjectStore::new();
        let id = Ident::random();
        let (ob1, existed1) = store.find_or_create(id).unwrap();
        assert!(!existed1);
        let (ob2, existed2) = store.find_or_create(id).unwrap();
        assert!(existed2);
        assert!(ob1.same(&ob2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_misses_and_rejects_empty() {
        let store = ObjectStore::new();
        assert!(store.find(Ident::random()).unwrap().is_none());
        assert!(matches!(
            store.find(Ident::EMPTY),
            Err(CoreError::EmptyIdent)
        ));
        assert!(matches!(
            store.find_or_create(Ident::EMPTY),
            Err(CoreError::EmptyIdent)
        ));
    }

    #[test]
    fn create_fresh_yields_distinct_live_objects() {
        let store = ObjectStore::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            let ob = store.create_fresh();
            assert!(ids.insert(ob.id()));
            assert!(store.find(ob.id()).unwrap().is_some());
        }
        assert_eq!(store.len(), 100);
    }

    #[derive(Debug)]
    struct FlagPayload(Arc<AtomicBool>);

    impl Payload for FlagPayload {
        fn kind(&self) -> &'static str {
            "flag"
        }

        fn teardown(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }

        fn scan(&self, _visit: &mut dyn FnMut(&ObjRef)) {}

        fn emit(&self, _emitter: &dyn crate::json::EmitObj) -> serde_json::Value {
            serde_json::Value::Null
        }
    }

    #[test]
    fn remove_tears_down() {
        let store = ObjectStore::new();
        let ob = store.create_fresh();
        let other = store.create_fresh();
        let torn = Arc::new(AtomicBool::new(false));
        ob.set_payload(Box::new(FlagPayload(torn.clone())));
        ob.put_attr(other.clone(), Value::Int(1)).unwrap();
        ob.append_comp(Value::Refob(other.clone()));

        assert!(store.remove(ob.id()).unwrap());
        assert!(torn.load(Ordering::SeqCst));
        assert_eq!(ob.attr_count(), 0);
        assert_eq!(ob.comp_count(), 0);
        assert!(!ob.has_payload());
        assert!(store.find(ob.id()).unwrap().is_none());
        assert!(!store.remove(ob.id()).unwrap());
    }

    #[test]
    fn predefined_index_follows_space_changes() {
        let store = ObjectStore::new();
        let a = store.create_fresh();
        let b = store.create_fresh();
        store.set_space(&a, Space::Predefined);
        store.set_space(&b, Space::Predefined);
        assert_eq!(store.predefined_objects().len(), 2);

        // index order is identifier order
        let pre = store.predefined_objects();
        assert!(pre[0].id() < pre[1].id());

        store.set_space(&a, Space::Global);
        assert_eq!(store.predefined_objects().len(), 1);
        assert_eq!(store.predefined_objects()[0].id(), b.id());

        store.remove(b.id()).unwrap();
        assert!(store.predefined_objects().is_empty());
    }

    #[test]
    fn make_predefined_is_idempotent() {
        let store = ObjectStore::new();
        let id = Ident::random();
        let ob1 = store.make_predefined(id).unwrap();
        let ob2 = store.make_predefined(id).unwrap();
        assert!(ob1.same(&ob2));
        assert_eq!(store.predefined_objects().len(), 1);
        assert_eq!(ob1.space(), Space::Predefined);
    }
}
