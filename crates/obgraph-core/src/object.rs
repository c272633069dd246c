//! Mutable objects and shared object handles.
//!
//! An [`Object`] couples an immutable [`Ident`] with mutex-guarded state:
//! space classification, modification time, an insertion-ordered
//! attribute map, a component vector, and an optional payload. All
//! mutation goes through the object's lock; the storage engines take the
//! guard directly via [`Object::lock`] when they need a coherent view of
//! attributes, components and payload together.
//!
//! [`ObjRef`] is the shared handle. Equality, ordering and map hashing
//! all follow the identifier, so two handles to the same store entry
//! compare equal and sets of references sort deterministically.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::payload::Payload;
use crate::serial::Ident;
use crate::value::Value;

/// Space classification driving persistence routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Space {
    /// Never persisted; dropped silently by the dump scan.
    Transient,
    /// Persisted to the global store and seeded as a scan root.
    Predefined,
    /// Persisted to the global store.
    Global,
    /// Persisted to the user store.
    User,
}

impl Space {
    pub fn code(self) -> u8 {
        match self {
            Space::Transient => 0,
            Space::Predefined => 1,
            Space::Global => 2,
            Space::User => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Space, CoreError> {
        match code {
            0 => Ok(Space::Transient),
            1 => Ok(Space::Predefined),
            2 => Ok(Space::Global),
            3 => Ok(Space::User),
            other => Err(CoreError::BadSpace(other)),
        }
    }

    /// True for every space except [`Space::Transient`].
    pub fn is_persistent(self) -> bool {
        !matches!(self, Space::Transient)
    }
}

/// Seconds since the Unix epoch, used for object modification times.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The mutable half of an object, always accessed under its lock.
///
/// Invariant: `attrs` never maps a key to `Value::Nil` when mutation
/// goes through [`Object::put_attr`]. Component slots may hold nil.
#[derive(Debug)]
pub struct ObjData {
    pub space: Space,
    pub mtime: i64,
    pub attrs: IndexMap<ObjRef, Value>,
    pub comps: Vec<Value>,
    pub payload: Option<Box<dyn Payload>>,
}

/// An object: an identifier plus lock-guarded mutable state.
#[derive(Debug)]
pub struct Object {
    id: Ident,
    data: Mutex<ObjData>,
}

impl Object {
    /// Builds a fresh transient object around `id` and hands back its
    /// shared handle. The store is the only place that should mint these
    /// for non-test code.
    pub(crate) fn with_id(id: Ident) -> ObjRef {
        ObjRef(Arc::new(Object {
            id,
            data: Mutex::new(ObjData {
                space: Space::Transient,
                mtime: unix_now(),
                attrs: IndexMap::new(),
                comps: Vec::new(),
                payload: None,
            }),
        }))
    }

    pub fn id(&self) -> Ident {
        self.id
    }

    /// Takes the data lock. A poisoned lock yields the inner data; the
    /// structures stay well-formed across panics.
    pub fn lock(&self) -> MutexGuard<'_, ObjData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn space(&self) -> Space {
        self.lock().space
    }

    pub(crate) fn set_space_raw(&self, space: Space) {
        self.lock().space = space;
    }

    pub fn mtime(&self) -> i64 {
        self.lock().mtime
    }

    pub fn set_mtime(&self, mtime: i64) {
        self.lock().mtime = mtime;
    }

    /// Stamps the object with the current time.
    pub fn touch(&self) {
        self.lock().mtime = unix_now();
    }

    /// Stores an attribute. Nil values are rejected; remove the
    /// attribute instead.
    pub fn put_attr(&self, key: ObjRef, val: Value) -> Result<(), CoreError> {
        if val.is_nil() {
            return Err(CoreError::NilAttribute);
        }
        let mut data = self.lock();
        data.attrs.insert(key, val);
        data.mtime = unix_now();
        Ok(())
    }

    /// Looks up an attribute; absent keys read as nil.
    pub fn get_attr(&self, key: &ObjRef) -> Value {
        self.lock().attrs.get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Drops an attribute, reporting whether it was present.
    pub fn remove_attr(&self, key: &ObjRef) -> bool {
        let mut data = self.lock();
        let removed = data.attrs.shift_remove(key).is_some();
        if removed {
            data.mtime = unix_now();
        }
        removed
    }

    pub fn attr_count(&self) -> usize {
        self.lock().attrs.len()
    }

    /// Appends a component slot; nil is allowed here.
    pub fn append_comp(&self, val: Value) {
        let mut data = self.lock();
        data.comps.push(val);
        data.mtime = unix_now();
    }

    /// Reads a component slot; out-of-range reads as nil.
    pub fn comp(&self, ix: usize) -> Value {
        self.lock().comps.get(ix).cloned().unwrap_or(Value::Nil)
    }

    /// Overwrites a component slot, reporting whether it existed.
    pub fn put_comp(&self, ix: usize, val: Value) -> bool {
        let mut data = self.lock();
        match data.comps.get_mut(ix) {
            Some(slot) => {
                *slot = val;
                data.mtime = unix_now();
                true
            }
            None => false,
        }
    }

    pub fn comp_count(&self) -> usize {
        self.lock().comps.len()
    }

    /// Installs a payload, returning the previous one.
    pub fn set_payload(&self, payload: Box<dyn Payload>) -> Option<Box<dyn Payload>> {
        let mut data = self.lock();
        data.mtime = unix_now();
        data.payload.replace(payload)
    }

    /// Detaches the payload without running its teardown hook.
    pub fn take_payload(&self) -> Option<Box<dyn Payload>> {
        self.lock().payload.take()
    }

    pub fn has_payload(&self) -> bool {
        self.lock().payload.is_some()
    }

    pub fn payload_kind(&self) -> Option<&'static str> {
        self.lock().payload.as_ref().map(|p| p.kind())
    }
}

/// Shared handle to an object. Cheap to clone; compares, orders and
/// hashes by identifier.
#[derive(Clone)]
pub struct ObjRef(Arc<Object>);

impl ObjRef {
    pub fn id(&self) -> Ident {
        self.0.id
    }

    /// True when both handles point at the same allocation.
    pub fn same(&self, other: &ObjRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for ObjRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.0
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.id == other.0.id
    }
}

impl Eq for ObjRef {}

impl PartialOrd for ObjRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl std::hash::Hash for ObjRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({})", self.0.id)
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.id, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_is_transient_and_empty() {
        let ob = Object::with_id(Ident::random());
        assert_eq!(ob.space(), Space::Transient);
        assert_eq!(ob.attr_count(), 0);
        assert_eq!(ob.comp_count(), 0);
        assert!(!ob.has_payload());
        assert!(ob.mtime() > 0);
    }

    #[test]
    fn attrs_reject_nil_and_read_as_nil_when_absent() {
        let ob = Object::with_id(Ident::random());
        let key = Object::with_id(Ident::random());
        assert!(matches!(
            ob.put_attr(key.clone(), Value::Nil),
            Err(CoreError::NilAttribute)
        ));
        assert!(ob.get_attr(&key).is_nil());

        ob.put_attr(key.clone(), Value::Int(7)).unwrap();
        assert_eq!(ob.get_attr(&key).as_int(), Some(7));
        assert!(ob.remove_attr(&key));
        assert!(!ob.remove_attr(&key));
        assert!(ob.get_attr(&key).is_nil());
    }

    #[test]
    fn attrs_keep_insertion_order() {
        let ob = Object::with_id(Ident::random());
        let keys: Vec<ObjRef> = (0..5).map(|_| Object::with_id(Ident::random())).collect();
        for (i, k) in keys.iter().enumerate() {
            ob.put_attr(k.clone(), Value::Int(i as i64)).unwrap();
        }
        let data = ob.lock();
        let stored: Vec<Ident> = data.attrs.keys().map(|k| k.id()).collect();
        let expected: Vec<Ident> = keys.iter().map(|k| k.id()).collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn comps_allow_nil_and_out_of_range_reads() {
        let ob = Object::with_id(Ident::random());
        ob.append_comp(Value::Nil);
        ob.append_comp(Value::Int(3));
        assert!(ob.comp(0).is_nil());
        assert_eq!(ob.comp(1).as_int(), Some(3));
        assert!(ob.comp(99).is_nil());
        assert!(ob.put_comp(0, Value::str("x")));
        assert!(!ob.put_comp(5, Value::str("y")));
        assert_eq!(ob.comp(0).as_str(), Some("x"));
    }

    #[test]
    fn objref_equality_and_ordering_by_id() {
        let a = Object::with_id(Ident::from_u64s(5000, 5000).unwrap());
        let b = Object::with_id(Ident::from_u64s(5000, 5001).unwrap());
        assert_ne!(a, b);
        assert!(a < b);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn space_codes_round_trip() {
        for sp in [Space::Transient, Space::Predefined, Space::Global, Space::User] {
            assert_eq!(Space::from_code(sp.code()).unwrap(), sp);
        }
        assert!(Space::from_code(4).is_err());
        assert!(!Space::Transient.is_persistent());
        assert!(Space::User.is_persistent());
    }
}
