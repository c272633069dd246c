//! In-memory object graph with identity-keyed persistence.
//!
//! # Architecture
//!
//! - [`serial`]: base-62 serial numbers, paired identifiers, bucket
//!   sharding, and the shared random source.
//! - [`value`]: the closed value union with structural 32-bit hashing.
//! - [`object`]: mutable objects behind shared [`object::ObjRef`]
//!   handles, with space classification and payloads.
//! - [`store`]: the 620-bucket object table, predefined index, and
//!   explicit teardown.
//! - [`globals`]: named global-variable slots that seed the dump scan.
//! - [`payload`]: the payload trait, the kind-keyed loader registry,
//!   and the symbol payload.
//! - [`json`]: the JSON wire form for values.
//! - [`universe`]: the owning container tying the registries together.
//!
//! The persistence engines themselves live in the `obgraph-storage`
//! crate; this crate defines everything they operate on.

pub mod error;
pub mod globals;
pub mod json;
pub mod object;
pub mod payload;
pub mod serial;
pub mod store;
pub mod universe;
pub mod value;

pub use error::CoreError;
pub use globals::GlobalRegistry;
pub use json::{value_from_json, value_to_json, EmitObj, ResolveObj};
pub use object::{ObjRef, Object, Space};
pub use payload::{Payload, PayloadLoader, PayloadRegistry, SymbolPayload};
pub use serial::{Hash32, Ident, Serial};
pub use store::ObjectStore;
pub use universe::Universe;
pub use value::{SetValue, TupleValue, Value};
