//! Wire codec for the live channel.
//!
//! Text frames in both directions are JSON arrays of exactly five
//! elements: `[join_ref, msg_ref, topic, event, payload]`. Binary frames
//! carry upload chunks with a custom length-prefixed header layout.

pub mod reply;
pub mod upload;

pub use reply::{DiffFrame, NavFrame, NavKind, Reply};
pub use upload::UploadMsg;

use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// A parsed inbound text frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Msg {
    /// Join reference; empty when the client sent null.
    pub join_ref: String,
    /// Message reference; empty when the client sent null.
    pub msg_ref: String,
    pub topic: String,
    pub event: String,
    pub payload: Map<String, Value>,
}

impl Msg {
    /// Parse a text frame. Returns either a message or an error,
    /// never both and never neither.
    pub fn parse(data: &[u8]) -> Result<Msg, ProtocolError> {
        let raw: Vec<Value> = serde_json::from_slice(data)?;
        if raw.len() != 5 {
            return Err(ProtocolError::BadElementCount(raw.len()));
        }

        let mut strings: [String; 4] = Default::default();
        for (i, v) in raw[..4].iter().enumerate() {
            match v {
                Value::Null => {}
                Value::String(s) => strings[i] = s.clone(),
                _ => return Err(ProtocolError::BadElement { index: i }),
            }
        }

        let mut raw = raw;
        let payload = match raw.remove(4) {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::BadPayload),
        };

        let [join_ref, msg_ref, topic, event] = strings;
        Ok(Msg {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    /// Payload field as a string, if present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
