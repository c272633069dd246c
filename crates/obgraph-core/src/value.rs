//! The closed value union.
//!
//! Values are immutable: nil, 64-bit integers, non-NaN floats, shared
//! strings, object references, colored variants (a payload tagged with a
//! coloring object), and ordered sequences of object references (sets and
//! tuples). Sets keep their elements sorted by identifier with duplicates
//! removed; tuples preserve insertion order.
//!
//! Every non-nil value has a deterministic non-zero 32-bit structural
//! hash. The hash mixers all follow the same shape: two accumulators with
//! distinct odd multipliers, xor-combined, with a small additive fallback
//! when the combination lands on zero.

use std::sync::Arc;

use crate::error::CoreError;
use crate::object::ObjRef;
use crate::serial::Hash32;

/// Truncating float-to-u32 conversion used by the float hash mixers.
fn trunc_u32(x: f64) -> u32 {
    x as i64 as u32
}

/// Hash of a string's characters, keyed on their byte offsets.
/// The empty string hashes to 11 via the zero fallback.
pub fn string_hash(s: &str) -> Hash32 {
    let mut h1: u32 = 0;
    let mut h2: u32 = 0;
    for (ix, ch) in s.char_indices() {
        let uc = ch as u32;
        let ixm = (ix & 0xff) as u32;
        if ix % 2 == 0 {
            h1 = h1.wrapping_mul(433) ^ uc.wrapping_mul(1427).wrapping_add(ixm);
        } else {
            h2 = h2
                .wrapping_mul(647)
                .wrapping_add(uc.wrapping_mul(2657))
                .wrapping_sub(ixm);
        }
    }
    let h = h1 ^ h2;
    if h == 0 {
        Hash32(3 * (h1 & 0xfffff) + 5 * (h2 & 0xfffff) + (s.len() as u32 & 0xfffff) + 11)
    } else {
        Hash32(h)
    }
}

/// Hash of a 64-bit integer.
pub fn int_hash(i: i64) -> Hash32 {
    let h1 = i as u32;
    let h2 = (i >> 30) as u32;
    let h = h1.wrapping_mul(11) ^ h2.wrapping_mul(26347);
    if h == 0 {
        Hash32((h1 & 0xffff) + 17 * (h2 & 0xfffff) + 4)
    } else {
        Hash32(h)
    }
}

/// Hash of a non-NaN float. Infinities map to fixed sentinels (negative
/// 123, positive 567); finite values mix the integral and fractional
/// parts.
pub fn float_hash(f: f64) -> Result<Hash32, CoreError> {
    if f.is_nan() {
        return Err(CoreError::NanFloat);
    }
    if f.is_infinite() {
        return Ok(if f < 0.0 { Hash32(123) } else { Hash32(567) });
    }
    let intp = f.trunc();
    let fracp = f.fract();
    let absintp = intp.abs();
    let mut h: u32;
    if absintp < i32::MAX as f64 {
        h = trunc_u32(absintp) ^ trunc_u32(fracp * 1234567.8);
        if f < 0.0 && h < (i32::MAX as u32) / 4 {
            h = h.wrapping_mul(17) ^ 5023;
        }
    } else {
        h = trunc_u32(123.4 * absintp.ln()) ^ trunc_u32(fracp * 456789.0);
        if f < 0.0 && h < (i32::MAX as u32) / 4 {
            h = h.wrapping_mul(31) ^ 15031;
        }
    }
    if h == 0 {
        h = ((trunc_u32(absintp.ln()).wrapping_add(trunc_u32(fracp * 12345678.9))) & 0xfffff) + 17;
    }
    Ok(Hash32(h))
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

const HINIT_TUPLE: u32 = 3529;
const K1_TUPLE: u32 = 2521;
const K2_TUPLE: u32 = 6529;

const HINIT_SET: u32 = 2549;
const K1_SET: u32 = 3637;
const K2_SET: u32 = 2939;

fn sequence_hash(hinit: u32, k1: u32, k2: u32, elems: &[ObjRef]) -> Hash32 {
    let l = elems.len() as u32;
    let mut h1 = hinit;
    let mut h2 = k1.wrapping_mul(l).wrapping_add(k2);
    for (i, ob) in elems.iter().enumerate() {
        let hob = ob.id().hash32().0;
        let iu = i as u32;
        if i % 2 == 0 {
            h1 = k1.wrapping_mul(h1) ^ k2.wrapping_mul(hob).wrapping_add(iu);
        } else {
            h2 = k2
                .wrapping_mul(h2)
                .wrapping_add(k1.wrapping_mul(hob).wrapping_sub(5 * iu));
        }
    }
    let hs = h1.wrapping_mul(13) ^ h2.wrapping_mul(4093);
    if hs == 0 {
        Hash32(31 * (h1 & 0xfffff) + 5 * (h2 & 0xfffff) + 17 + (l & 0xff))
    } else {
        Hash32(hs)
    }
}

/// Shared representation of sets and tuples: a hash plus a shared slice
/// of object references.
#[derive(Debug, Clone)]
struct Sequence {
    hash: Hash32,
    elems: Arc<[ObjRef]>,
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.elems == other.elems
    }
}

impl Eq for Sequence {}

/// An identifier-sorted, duplicate-free set of object references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetValue(Sequence);

impl SetValue {
    /// Builds a set: elements are sorted by identifier and deduplicated.
    pub fn new(objs: impl IntoIterator<Item = ObjRef>) -> SetValue {
        let mut elems: Vec<ObjRef> = objs.into_iter().collect();
        elems.sort_by_key(|ob| ob.id());
        elems.dedup_by_key(|ob| ob.id());
        let hash = sequence_hash(HINIT_SET, K1_SET, K2_SET, &elems);
        SetValue(Sequence {
            hash,
            elems: elems.into(),
        })
    }

    pub fn elems(&self) -> &[ObjRef] {
        &self.0.elems
    }

    pub fn len(&self) -> usize {
        self.0.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.elems.is_empty()
    }

    /// Membership by identifier, via binary search over the sorted slice.
    pub fn contains(&self, ob: &ObjRef) -> bool {
        self.0
            .elems
            .binary_search_by_key(&ob.id(), |e| e.id())
            .is_ok()
    }

    pub fn hash32(&self) -> Hash32 {
        self.0.hash
    }
}

/// An order-preserving tuple of object references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleValue(Sequence);

impl TupleValue {
    pub fn new(objs: impl IntoIterator<Item = ObjRef>) -> TupleValue {
        let elems: Vec<ObjRef> = objs.into_iter().collect();
        let hash = sequence_hash(HINIT_TUPLE, K1_TUPLE, K2_TUPLE, &elems);
        TupleValue(Sequence {
            hash,
            elems: elems.into(),
        })
    }

    pub fn elems(&self) -> &[ObjRef] {
        &self.0.elems
    }

    pub fn len(&self) -> usize {
        self.0.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.elems.is_empty()
    }

    pub fn hash32(&self) -> Hash32 {
        self.0.hash
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// The closed value union. `Nil` is a first-class absence marker; it may
/// sit in component slots but never as an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    /// Never NaN; construct through [`Value::float`].
    Float(f64),
    Str(Arc<str>),
    Refob(ObjRef),
    ColoredInt { color: ObjRef, num: i64 },
    ColoredStr { color: ObjRef, text: Arc<str> },
    ColoredRef { color: ObjRef, target: ObjRef },
    Set(SetValue),
    Tuple(TupleValue),
}

impl Value {
    /// Wraps a float, rejecting NaN.
    pub fn float(f: f64) -> Result<Value, CoreError> {
        if f.is_nan() {
            Err(CoreError::NanFloat)
        } else {
            Ok(Value::Float(f))
        }
    }

    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn set(objs: impl IntoIterator<Item = ObjRef>) -> Value {
        Value::Set(SetValue::new(objs))
    }

    pub fn tuple(objs: impl IntoIterator<Item = ObjRef>) -> Value {
        Value::Tuple(TupleValue::new(objs))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_refob(&self) -> Option<&ObjRef> {
        match self {
            Value::Refob(ob) => Some(ob),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&TupleValue> {
        match self {
            Value::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Structural hash. Zero only for nil.
    pub fn hash32(&self) -> Hash32 {
        match self {
            Value::Nil => Hash32(0),
            Value::Int(i) => int_hash(*i),
            // NaN is rejected at construction
            Value::Float(f) => float_hash(*f).unwrap_or(Hash32(17)),
            Value::Str(s) => string_hash(s),
            Value::Refob(ob) => ob.id().hash32(),
            Value::ColoredInt { color, num } => {
                colored_hash(color.id().hash32().0, int_hash(*num).0, 2003, 541, 23)
            }
            Value::ColoredStr { color, text } => {
                colored_hash(color.id().hash32().0, string_hash(text).0, 2017, 603, 29)
            }
            Value::ColoredRef { color, target } => colored_hash(
                color.id().hash32().0,
                target.id().hash32().0,
                2039,
                677,
                37,
            ),
            Value::Set(s) => s.hash32(),
            Value::Tuple(t) => t.hash32(),
        }
    }

    /// Visits every object reference held directly by this value: the
    /// referenced object, the coloring object, sequence elements.
    pub fn scan_refs(&self, visit: &mut dyn FnMut(&ObjRef)) {
        match self {
            Value::Nil | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
            Value::Refob(ob) => visit(ob),
            Value::ColoredInt { color, .. } | Value::ColoredStr { color, .. } => visit(color),
            Value::ColoredRef { color, target } => {
                visit(target);
                visit(color);
            }
            Value::Set(s) => {
                for ob in s.elems() {
                    visit(ob);
                }
            }
            Value::Tuple(t) => {
                for ob in t.elems() {
                    visit(ob);
                }
            }
        }
    }
}

fn colored_hash(hcolor: u32, hinner: u32, kc: u32, ki: u32, fallback_add: u32) -> Hash32 {
    let h = hcolor.wrapping_mul(kc) ^ hinner.wrapping_mul(ki);
    if h == 0 {
        Hash32((hcolor & 0xfffff) + 13 * (hinner & 0xfffff) + fallback_add)
    } else {
        Hash32(h)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.into())
    }
}

impl From<ObjRef> for Value {
    fn from(ob: ObjRef) -> Value {
        Value::Refob(ob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::serial::Ident;

    fn fresh_ref() -> ObjRef {
        Object::with_id(Ident::random())
    }

    #[test]
    fn int_hash_zero_falls_back() {
        assert_eq!(int_hash(0), Hash32(4));
        assert_ne!(int_hash(1), Hash32(0));
        assert_ne!(int_hash(-1), Hash32(0));
        assert_ne!(int_hash(i64::MAX), Hash32(0));
        assert_ne!(int_hash(i64::MIN), Hash32(0));
    }

    #[test]
    fn string_hash_empty_and_stability() {
        assert_eq!(string_hash(""), Hash32(11));
        assert_eq!(string_hash("abc"), string_hash("abc"));
        assert_ne!(string_hash("abc"), string_hash("abd"));
        assert_ne!(string_hash("héllo wörld"), Hash32(0));
    }

    #[test]
    fn float_hash_sentinels() {
        assert_eq!(float_hash(f64::NEG_INFINITY).unwrap(), Hash32(123));
        assert_eq!(float_hash(f64::INFINITY).unwrap(), Hash32(567));
        assert!(matches!(float_hash(f64::NAN), Err(CoreError::NanFloat)));
        assert_ne!(float_hash(0.0).unwrap(), Hash32(0));
        assert_ne!(float_hash(-3.5e12).unwrap(), Hash32(0));
        assert_ne!(float_hash(1.0e100).unwrap(), Hash32(0));
    }

    #[test]
    fn float_value_rejects_nan() {
        assert!(Value::float(f64::NAN).is_err());
        assert!(Value::float(3.25).is_ok());
        assert!(Value::float(f64::INFINITY).is_ok());
    }

    #[test]
    fn set_sorts_and_dedups() {
        let a = fresh_ref();
        let b = fresh_ref();
        let c = fresh_ref();
        let s1 = SetValue::new([c.clone(), a.clone(), b.clone(), a.clone()]);
        let s2 = SetValue::new([a.clone(), b.clone(), c.clone()]);
        assert_eq!(s1, s2);
        assert_eq!(s1.hash32(), s2.hash32());
        assert_eq!(s1.len(), 3);
        let ids: Vec<_> = s1.elems().iter().map(|o| o.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(s1.contains(&b));
        assert!(!SetValue::new([a.clone()]).contains(&b));
    }

    #[test]
    fn tuple_preserves_order_and_duplicates() {
        let a = fresh_ref();
        let b = fresh_ref();
        let t1 = TupleValue::new([a.clone(), b.clone(), a.clone()]);
        assert_eq!(t1.len(), 3);
        let t2 = TupleValue::new([b.clone(), a.clone(), a.clone()]);
        if a.id() != b.id() {
            assert_ne!(t1, t2);
        }
        assert_eq!(t1, TupleValue::new([a.clone(), b.clone(), a.clone()]));
    }

    #[test]
    fn empty_sequences_have_nonzero_hash() {
        assert_ne!(SetValue::new([]).hash32(), Hash32(0));
        assert_ne!(TupleValue::new([]).hash32(), Hash32(0));
        assert_ne!(SetValue::new([]).hash32(), TupleValue::new([]).hash32());
    }

    #[test]
    fn colored_hashes_distinguish_variants() {
        let color = fresh_ref();
        let target = fresh_ref();
        let ci = Value::ColoredInt {
            color: color.clone(),
            num: 5,
        };
        let cs = Value::ColoredStr {
            color: color.clone(),
            text: "5".into(),
        };
        let cr = Value::ColoredRef {
            color: color.clone(),
            target: target.clone(),
        };
        assert_ne!(ci.hash32(), Hash32(0));
        assert_ne!(cs.hash32(), Hash32(0));
        assert_ne!(cr.hash32(), Hash32(0));
        assert_ne!(ci.hash32(), cs.hash32());
    }

    #[test]
    fn scan_refs_visits_everything() {
        let a = fresh_ref();
        let b = fresh_ref();
        let mut seen = Vec::new();
        Value::tuple([a.clone(), b.clone()]).scan_refs(&mut |ob| seen.push(ob.id()));
        assert_eq!(seen, vec![a.id(), b.id()]);

        seen.clear();
        Value::ColoredRef {
            color: a.clone(),
            target: b.clone(),
        }
        .scan_refs(&mut |ob| seen.push(ob.id()));
        assert_eq!(seen, vec![b.id(), a.id()]);

        seen.clear();
        Value::Int(5).scan_refs(&mut |ob| seen.push(ob.id()));
        Value::str("x").scan_refs(&mut |ob| seen.push(ob.id()));
        assert!(seen.is_empty());
    }

    #[test]
    fn nil_is_distinct() {
        assert!(Value::Nil.is_nil());
        assert_eq!(Value::Nil.hash32(), Hash32(0));
        assert!(!Value::Int(0).is_nil());
    }
}
