//! Object payloads.
//!
//! A payload is opaque extra state attached to at most one object. The
//! engines only ever touch payloads through the [`Payload`] trait: the
//! dump scan asks it which objects it references, the emit phase asks
//! for its JSON content, and teardown runs when the owner is removed
//! from the store.
//!
//! Loading is name-keyed: the host registers one loader function per
//! payload kind in the [`PayloadRegistry`], and the load engine fails
//! hard on a kind nobody registered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde_json::json;

use crate::error::CoreError;
use crate::json::{value_from_json, value_to_json, EmitObj, ResolveObj};
use crate::object::ObjRef;
use crate::value::Value;

/// Behavior every payload kind implements.
pub trait Payload: Send + fmt::Debug {
    /// Stable kind name, the loader-registry key.
    fn kind(&self) -> &'static str;

    /// Runs when the owning object is removed from the store.
    fn teardown(&mut self) {}

    /// Reports every object this payload references, for the dump scan.
    fn scan(&self, visit: &mut dyn FnMut(&ObjRef));

    /// Produces the persisted JSON content for this payload.
    fn emit(&self, emitter: &dyn EmitObj) -> serde_json::Value;
}

/// Rebuilds one payload from its persisted content during load.
pub type PayloadLoader = fn(
    owner: &ObjRef,
    resolver: &mut dyn ResolveObj,
    content: &serde_json::Value,
) -> Result<Box<dyn Payload>, CoreError>;

/// Kind-name-keyed registry of payload loaders.
#[derive(Default)]
pub struct PayloadRegistry {
    loaders: Mutex<BTreeMap<String, PayloadLoader>>,
}

impl PayloadRegistry {
    pub fn new() -> PayloadRegistry {
        PayloadRegistry::default()
    }

    /// Registers the loader for `kind`; each kind registers once.
    pub fn register(&self, kind: &str, loader: PayloadLoader) -> Result<(), CoreError> {
        let mut loaders = self.loaders.lock().unwrap_or_else(|e| e.into_inner());
        if loaders.contains_key(kind) {
            return Err(CoreError::DuplicatePayloadKind(kind.to_owned()));
        }
        loaders.insert(kind.to_owned(), loader);
        Ok(())
    }

    pub fn loader_for(&self, kind: &str) -> Result<PayloadLoader, CoreError> {
        let loaders = self.loaders.lock().unwrap_or_else(|e| e.into_inner());
        loaders
            .get(kind)
            .copied()
            .ok_or_else(|| CoreError::UnknownPayloadKind(kind.to_owned()))
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let loaders = self.loaders.lock().unwrap_or_else(|e| e.into_inner());
        loaders.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Symbol payload
// ---------------------------------------------------------------------------

/// Kind name of [`SymbolPayload`].
pub const SYMBOL_PAYLOAD_KIND: &str = "symbol";

/// A named symbol: a name, an optional proxy object, and an arbitrary
/// data value. Persists as `{"syname","syproxy","sydata"}`.
#[derive(Debug)]
pub struct SymbolPayload {
    name: String,
    proxy: Option<ObjRef>,
    data: Value,
}

impl SymbolPayload {
    pub fn new(name: impl Into<String>) -> SymbolPayload {
        SymbolPayload {
            name: name.into(),
            proxy: None,
            data: Value::Nil,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn proxy(&self) -> Option<&ObjRef> {
        self.proxy.as_ref()
    }

    pub fn set_proxy(&mut self, proxy: Option<ObjRef>) {
        self.proxy = proxy;
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }
}

impl Payload for SymbolPayload {
    fn kind(&self) -> &'static str {
        SYMBOL_PAYLOAD_KIND
    }

    fn teardown(&mut self) {
        self.name.clear();
        self.proxy = None;
        self.data = Value::Nil;
    }

    fn scan(&self, visit: &mut dyn FnMut(&ObjRef)) {
        if let Some(proxy) = &self.proxy {
            visit(proxy);
        }
        self.data.scan_refs(visit);
    }

    fn emit(&self, emitter: &dyn EmitObj) -> serde_json::Value {
        let proxy = match &self.proxy {
            Some(p) if emitter.emit_objptr(p) => p.id().to_string(),
            _ => String::new(),
        };
        json!({
            "syname": self.name,
            "syproxy": proxy,
            "sydata": value_to_json(emitter, &self.data),
        })
    }
}

/// Loader for [`SYMBOL_PAYLOAD_KIND`]; register it in the host's
/// [`PayloadRegistry`] before loading stores that contain symbols.
pub fn load_symbol_payload(
    _owner: &ObjRef,
    resolver: &mut dyn ResolveObj,
    content: &serde_json::Value,
) -> Result<Box<dyn Payload>, CoreError> {
    let bad = |reason: &str| CoreError::BadPayloadContent {
        kind: SYMBOL_PAYLOAD_KIND.to_owned(),
        reason: reason.to_owned(),
    };
    let obj = content.as_object().ok_or_else(|| bad("not a JSON map"))?;
    let name = obj
        .get("syname")
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad("missing syname"))?;
    let mut payload = SymbolPayload::new(name);
    if let Some(proxy_text) = obj.get("syproxy").and_then(|v| v.as_str()) {
        if !proxy_text.is_empty() {
            payload.proxy = Some(resolver.resolve(proxy_text)?);
        }
    }
    if let Some(data) = obj.get("sydata") {
        payload.data = value_from_json(resolver, data)?;
    }
    Ok(Box::new(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::tests_support::{AllowAll, MapResolver};
    use crate::object::Object;
    use crate::serial::Ident;

    fn fresh_ref() -> ObjRef {
        Object::with_id(Ident::random())
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_kinds() {
        let reg = PayloadRegistry::new();
        reg.register(SYMBOL_PAYLOAD_KIND, load_symbol_payload)
            .unwrap();
        assert!(matches!(
            reg.register(SYMBOL_PAYLOAD_KIND, load_symbol_payload),
            Err(CoreError::DuplicatePayloadKind(_))
        ));
        assert!(reg.loader_for(SYMBOL_PAYLOAD_KIND).is_ok());
        assert!(matches!(
            reg.loader_for("nope"),
            Err(CoreError::UnknownPayloadKind(_))
        ));
        assert_eq!(reg.kinds(), vec![SYMBOL_PAYLOAD_KIND.to_owned()]);
    }

    #[test]
    fn symbol_emit_then_load_round_trips() {
        let owner = fresh_ref();
        let proxy = fresh_ref();
        let mut sym = SymbolPayload::new("the_symbol");
        sym.set_proxy(Some(proxy.clone()));
        sym.set_data(Value::Int(42));

        let emitted = sym.emit(&AllowAll);
        let mut resolver = MapResolver::of([proxy.clone()]);
        let loaded = load_symbol_payload(&owner, &mut resolver, &emitted).unwrap();
        assert_eq!(loaded.kind(), SYMBOL_PAYLOAD_KIND);

        let emitted_again = loaded.emit(&AllowAll);
        assert_eq!(emitted, emitted_again);
    }

    #[test]
    fn symbol_scan_reports_proxy_and_data_refs() {
        let proxy = fresh_ref();
        let extra = fresh_ref();
        let mut sym = SymbolPayload::new("s");
        sym.set_proxy(Some(proxy.clone()));
        sym.set_data(Value::Refob(extra.clone()));

        let mut seen = Vec::new();
        sym.scan(&mut |ob| seen.push(ob.id()));
        assert_eq!(seen, vec![proxy.id(), extra.id()]);
    }

    #[test]
    fn symbol_emit_drops_undumped_proxy() {
        struct DenyAll;
        impl EmitObj for DenyAll {
            fn emit_objptr(&self, _ob: &ObjRef) -> bool {
                false
            }
        }
        let mut sym = SymbolPayload::new("s");
        sym.set_proxy(Some(fresh_ref()));
        let emitted = sym.emit(&DenyAll);
        assert_eq!(emitted["syproxy"], serde_json::json!(""));
    }

    #[test]
    fn symbol_load_rejects_malformed_content() {
        let owner = fresh_ref();
        let mut resolver = MapResolver::of([]);
        assert!(matches!(
            load_symbol_payload(&owner, &mut resolver, &serde_json::json!(3)),
            Err(CoreError::BadPayloadContent { .. })
        ));
        assert!(matches!(
            load_symbol_payload(&owner, &mut resolver, &serde_json::json!({})),
            Err(CoreError::BadPayloadContent { .. })
        ));
    }

    #[test]
    fn symbol_teardown_clears_state() {
        let mut sym = SymbolPayload::new("s");
        sym.set_proxy(Some(fresh_ref()));
        sym.set_data(Value::Int(1));
        sym.teardown();
        assert_eq!(sym.name(), "");
        assert!(sym.proxy().is_none());
        assert!(sym.data().is_nil());
    }
}
