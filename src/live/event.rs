//! Client/server event data.
//!
//! Events carry a name and form-style data: an ordered multimap of
//! string keys to one or more string values. On the wire an event is the
//! envelope `["name", {key: value-or-array}]` with keys sorted and
//! single-valued keys emitted as scalars.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};

/// Form-style string multimap, the counterpart of URL query values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values(BTreeMap<String, Vec<String>>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `application/x-www-form-urlencoded` data.
    pub fn from_query(query: &str) -> Self {
        let mut vals = Self::new();
        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            vals.add(&k, &v);
        }
        vals
    }

    /// Append a value for a key.
    pub fn add(&mut self, key: &str, value: &str) {
        self.0
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Replace all values for a key.
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), vec![value.to_string()]);
    }

    /// First value for a key, or `""` when absent.
    pub fn get(&self, key: &str) -> &str {
        self.0
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// All values for a key.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl Serialize for Values {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            match v.as_slice() {
                [single] => map.serialize_entry(k, single)?,
                many => map.serialize_entry(k, many)?,
            }
        }
        map.end()
    }
}

/// An event sent from the client, or pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub data: Values,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Values) -> Self {
        Event {
            name: name.into(),
            data,
        }
    }

    /// Encode the wire envelope `["name", {…}]`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.name)?;
        tup.serialize_element(&self.data)?;
        tup.end()
    }
}

/// Internal event data posted by server-side code.
pub type Info = Event;
