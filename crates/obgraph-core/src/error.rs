//! Error types for the object graph model.

use thiserror::Error;

/// Errors from identifier parsing, value construction, the object store,
/// and the registries.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("empty serial text")]
    EmptySerialText,

    #[error("serial text {0:?} does not start with '_'")]
    BadSerialPrefix(String),

    #[error("serial text {0:?} has wrong length")]
    BadSerialLength(String),

    #[error("invalid base-62 digit {digit:?} in serial text {text:?}")]
    BadSerialDigit { text: String, digit: char },

    #[error("serial {0:#x} out of range")]
    SerialOutOfRange(u64),

    #[error("bucket index {0} out of range")]
    BadBucket(u64),

    #[error("half-empty identifier (hi={hi:#x}, lo={lo:#x})")]
    HalfEmptyIdent { hi: u64, lo: u64 },

    #[error("invalid identifier text {0:?}")]
    BadIdentText(String),

    #[error("cannot look up the empty identifier")]
    EmptyIdent,

    #[error("space code {0} out of range")]
    BadSpace(u8),

    #[error("NaN is not a valid float value")]
    NanFloat,

    #[error("nil cannot be stored as an attribute value")]
    NilAttribute,

    #[error("invalid global variable name {0:?}")]
    BadGlobalName(String),

    #[error("global variable {0:?} already registered")]
    DuplicateGlobal(String),

    #[error("global variable {0:?} not registered")]
    UnknownGlobal(String),

    #[error("payload kind {0:?} already registered")]
    DuplicatePayloadKind(String),

    #[error("payload kind {0:?} not registered")]
    UnknownPayloadKind(String),

    #[error("malformed {kind:?} payload content: {reason}")]
    BadPayloadContent { kind: String, reason: String },

    #[error("unknown object reference {0:?}")]
    UnknownObjectRef(String),

    #[error("malformed value JSON: {0}")]
    BadValueJson(String),
}
