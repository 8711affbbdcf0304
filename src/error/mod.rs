//! Error types for the wire codec, template tree, template engine,
//! upload engine, and view lifecycle.

use thiserror::Error;

/// Errors parsing inbound frames. A parse error terminates the
/// session's read loop.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message must contain 5 elements, got {0}")]
    BadElementCount(usize),

    #[error("invalid format for element {index}: expected string or null")]
    BadElement { index: usize },

    #[error("invalid payload format: expected object")]
    BadPayload,

    #[error("malformed message: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("upload buffer too short")]
    ShortBuffer,

    #[error("expected reserved byte to be 0, got {0}")]
    BadReservedByte(u8),

    #[error("invalid header length")]
    BadHeaderLength,

    #[error("header is not valid UTF-8")]
    BadHeaderEncoding,

    #[error("header segment {0:?} exceeds 255 bytes")]
    HeaderTooLong(&'static str),

    #[error("websocket read: {0}")]
    Read(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors producing a tree's JSON form. Invalid UTF-8 is the only
/// encoder error.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid UTF-8")]
    InvalidUtf8,
}

/// Template parse and execution errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unclosed {{{{ tag in template {name:?}")]
    UnclosedTag { name: String },

    #[error("unexpected {found:?} in template {name:?}")]
    UnexpectedTag { name: String, found: String },

    #[error("missing {{{{end}}}} in template {name:?}")]
    MissingEnd { name: String },

    #[error("cannot range over {kind} in template {name:?}")]
    NotIterable { name: String, kind: &'static str },
}

impl TemplateError {
    pub fn unexpected(name: &str, found: &str) -> Self {
        Self::UnexpectedTag {
            name: name.to_string(),
            found: found.to_string(),
        }
    }
}

/// Upload engine errors. These surface as view errors; partial files
/// are retained on disk for debugging.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no upload config found for ref: {0}")]
    NoConfig(String),

    #[error("no upload config found for name: {0}")]
    NoConfigNamed(String),

    #[error("no upload entry found for ref: {0}")]
    NoEntry(String),

    #[error("cannot consume entries that are not fully uploaded")]
    EntryNotDone,

    #[error("staging upload chunk: {0}")]
    Staging(#[from] std::io::Error),
}

/// Errors returned by view lifecycle callbacks and everything the
/// session folds into its error policy.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view does not handle events")]
    UnhandledEvent,

    #[error("view does not handle info messages")]
    UnhandledInfo,

    #[error("no view found for url: {0}")]
    NoView(String),

    #[error("router failed for url {url}: {message}")]
    Router { url: String, message: String },

    #[error("no url or redirect found in payload")]
    MissingUrl,

    #[error("missing or malformed {0:?} in payload")]
    BadPayloadField(&'static str),

    #[error("could not parse url: {0}")]
    BadUrl(#[from] url::ParseError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("encoding frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// Internal consistency failure. Unlike other view errors this is
    /// fatal: the session terminates instead of replying.
    #[error("internal consistency failure: {0}")]
    Internal(String),

    #[error("{0}")]
    Message(String),
}

impl ViewError {
    /// A free-form view error, for user view code.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
