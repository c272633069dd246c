//! The JSON wire form for values.
//!
//! Emission goes through an [`EmitObj`] membership predicate: object
//! references whose target is not being persisted collapse to JSON null
//! (sequence elements are simply skipped). Parsing goes through a
//! [`ResolveObj`] resolver that turns identifier text back into live
//! handles; an unresolvable identifier is fatal.
//!
//! Wire shapes:
//! - nil -> `null`
//! - small integers (magnitude below 10^9) -> bare JSON numbers,
//!   larger ones -> `{"int": "<decimal>"}`
//! - strings -> bare JSON strings
//! - floats -> `{"float": "<decimal>"}`, infinities as `"+Inf"`/`"-Inf"`
//! - references -> `{"oid": "<ident>"}`
//! - colored values -> `{"colori"|"colorstr"|"coloref": ..., "colorob": "<ident>"}`
//! - sets and tuples -> `{"set"|"tup": ["<ident>", ...]}`

use serde_json::{json, Value as Json};

use crate::error::CoreError;
use crate::object::ObjRef;
use crate::value::Value;

/// Integers at or beyond this magnitude are emitted as decimal strings.
const BIG_INT_LIMIT: i64 = 1_000_000_000;

/// Membership predicate consulted while emitting object references.
pub trait EmitObj {
    /// True when `ob` is part of the emitted store.
    fn emit_objptr(&self, ob: &ObjRef) -> bool;
}

/// Turns identifier text back into live object handles while parsing.
pub trait ResolveObj {
    fn resolve(&mut self, idstr: &str) -> Result<ObjRef, CoreError>;
}

/// Formats a finite float as the shortest decimal form from a fixed
/// ladder of precisions that parses back to the same bits.
pub fn format_float(f: f64) -> String {
    if f.is_infinite() {
        return if f < 0.0 { "-Inf".to_owned() } else { "+Inf".to_owned() };
    }
    let candidates = [
        format!("{f:.4}"),
        format!("{f:.9}"),
        format!("{f:.9e}"),
        format!("{f:.15e}"),
    ];
    for c in candidates {
        if c.parse::<f64>() == Ok(f) {
            return c;
        }
    }
    format!("{f:.28e}")
}

/// Parses the float text form, accepting the infinity sentinels.
pub fn parse_float(text: &str) -> Result<f64, CoreError> {
    match text {
        "+Inf" | "Inf" => return Ok(f64::INFINITY),
        "-Inf" => return Ok(f64::NEG_INFINITY),
        _ => {}
    }
    let f: f64 = text
        .parse()
        .map_err(|_| CoreError::BadValueJson(format!("bad float text {text:?}")))?;
    if f.is_nan() {
        return Err(CoreError::NanFloat);
    }
    Ok(f)
}

/// Encodes a value. References to objects the emitter rejects become
/// JSON null, except inside sets and tuples where they are dropped.
pub fn value_to_json(emitter: &dyn EmitObj, val: &Value) -> Json {
    match val {
        Value::Nil => Json::Null,
        Value::Int(i) => {
            if i.unsigned_abs() < BIG_INT_LIMIT as u64 {
                json!(i)
            } else {
                json!({ "int": i.to_string() })
            }
        }
        Value::Float(f) => json!({ "float": format_float(*f) }),
        Value::Str(s) => json!(s.as_ref()),
        Value::Refob(ob) => {
            if emitter.emit_objptr(ob) {
                json!({ "oid": ob.id().to_string() })
            } else {
                Json::Null
            }
        }
        Value::ColoredInt { color, num } => {
            if emitter.emit_objptr(color) {
                json!({ "colori": num, "colorob": color.id().to_string() })
            } else {
                Json::Null
            }
        }
        Value::ColoredStr { color, text } => {
            if emitter.emit_objptr(color) {
                json!({ "colorstr": text.as_ref(), "colorob": color.id().to_string() })
            } else {
                Json::Null
            }
        }
        Value::ColoredRef { color, target } => {
            if emitter.emit_objptr(color) && emitter.emit_objptr(target) {
                json!({
                    "coloref": target.id().to_string(),
                    "colorob": color.id().to_string(),
                })
            } else {
                Json::Null
            }
        }
        Value::Set(s) => {
            let ids: Vec<String> = s
                .elems()
                .iter()
                .filter(|ob| emitter.emit_objptr(ob))
                .map(|ob| ob.id().to_string())
                .collect();
            json!({ "set": ids })
        }
        Value::Tuple(t) => {
            let ids: Vec<String> = t
                .elems()
                .iter()
                .filter(|ob| emitter.emit_objptr(ob))
                .map(|ob| ob.id().to_string())
                .collect();
            json!({ "tup": ids })
        }
    }
}

fn resolve_id_array(
    resolver: &mut dyn ResolveObj,
    arr: &[Json],
    what: &str,
) -> Result<Vec<ObjRef>, CoreError> {
    arr.iter()
        .map(|item| {
            let idstr = item
                .as_str()
                .ok_or_else(|| CoreError::BadValueJson(format!("non-string {what} element")))?;
            resolver.resolve(idstr)
        })
        .collect()
}

/// Decodes a value. Whole-number floats collapse back to integers;
/// every identifier must resolve.
pub fn value_from_json(resolver: &mut dyn ResolveObj, j: &Json) -> Result<Value, CoreError> {
    match j {
        Json::Null => Ok(Value::Nil),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::Int(i));
            }
            let f = n
                .as_f64()
                .ok_or_else(|| CoreError::BadValueJson(format!("unrepresentable number {n}")))?;
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Ok(Value::Int(f as i64))
            } else {
                Value::float(f)
            }
        }
        Json::String(s) => Ok(Value::str(s.as_str())),
        Json::Object(map) => {
            if let Some(oid) = map.get("oid") {
                let idstr = oid
                    .as_str()
                    .ok_or_else(|| CoreError::BadValueJson("non-string oid".to_owned()))?;
                return Ok(Value::Refob(resolver.resolve(idstr)?));
            }
            if let Some(intv) = map.get("int") {
                let text = intv
                    .as_str()
                    .ok_or_else(|| CoreError::BadValueJson("non-string int".to_owned()))?;
                let i: i64 = text
                    .parse()
                    .map_err(|_| CoreError::BadValueJson(format!("bad int text {text:?}")))?;
                return Ok(Value::Int(i));
            }
            if let Some(floatv) = map.get("float") {
                let text = floatv
                    .as_str()
                    .ok_or_else(|| CoreError::BadValueJson("non-string float".to_owned()))?;
                return Value::float(parse_float(text)?);
            }
            if let Some(setv) = map.get("set") {
                let arr = setv
                    .as_array()
                    .ok_or_else(|| CoreError::BadValueJson("non-array set".to_owned()))?;
                return Ok(Value::set(resolve_id_array(resolver, arr, "set")?));
            }
            if let Some(tupv) = map.get("tup") {
                let arr = tupv
                    .as_array()
                    .ok_or_else(|| CoreError::BadValueJson("non-array tup".to_owned()))?;
                return Ok(Value::tuple(resolve_id_array(resolver, arr, "tup")?));
            }
            if map.contains_key("colorob") {
                let colorstr = map
                    .get("colorob")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CoreError::BadValueJson("non-string colorob".to_owned()))?;
                let color = resolver.resolve(colorstr)?;
                if let Some(n) = map.get("colori") {
                    let num = n.as_i64().ok_or_else(|| {
                        CoreError::BadValueJson("non-integer colori".to_owned())
                    })?;
                    return Ok(Value::ColoredInt { color, num });
                }
                if let Some(s) = map.get("colorstr") {
                    let text = s.as_str().ok_or_else(|| {
                        CoreError::BadValueJson("non-string colorstr".to_owned())
                    })?;
                    return Ok(Value::ColoredStr {
                        color,
                        text: text.into(),
                    });
                }
                if let Some(r) = map.get("coloref") {
                    let idstr = r.as_str().ok_or_else(|| {
                        CoreError::BadValueJson("non-string coloref".to_owned())
                    })?;
                    let target = resolver.resolve(idstr)?;
                    return Ok(Value::ColoredRef { color, target });
                }
                return Err(CoreError::BadValueJson(
                    "colorob without colored payload".to_owned(),
                ));
            }
            Err(CoreError::BadValueJson(format!(
                "unrecognized value map {j}"
            )))
        }
        Json::Bool(_) | Json::Array(_) => {
            Err(CoreError::BadValueJson(format!("unexpected JSON {j}")))
        }
    }
}
