//! Outbound frame builders.
//!
//! Every outbound frame is the same five-element array as inbound text
//! frames. Replies carry `{"response":{…},"status":"ok"}` payloads whose
//! optional response keys (`rendered`, `diff`, `config`, `entries`,
//! `redirect`) hold raw, already-encoded JSON.

use serde::ser::{Error as _, SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use crate::phx::{Msg, UploadMsg};

/// Optional response parts of a reply payload, each raw JSON.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub rendered: Option<String>,
    pub diff: Option<String>,
    pub config: Option<String>,
    pub entries: Option<String>,
    pub redirect: Option<String>,
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let parts = [
            ("rendered", &self.rendered),
            ("diff", &self.diff),
            ("config", &self.config),
            ("entries", &self.entries),
            ("redirect", &self.redirect),
        ];
        let mut map = serializer.serialize_map(None)?;
        for (key, part) in parts {
            if let Some(raw) = part {
                let raw: &RawValue = serde_json::from_str(raw).map_err(S::Error::custom)?;
                map.serialize_entry(key, raw)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
struct Payload {
    response: Response,
    status: &'static str,
}

/// A `phx_reply` (or `phx_error`) frame echoing the refs of the message
/// it answers.
#[derive(Debug, Clone)]
pub struct Reply {
    join_ref: Option<String>,
    msg_ref: Option<String>,
    topic: String,
    event: &'static str,
    payload: Payload,
}

impl Reply {
    fn ok(msg: &Msg, response: Response) -> Self {
        Reply {
            join_ref: Some(msg.join_ref.clone()),
            msg_ref: Some(msg.msg_ref.clone()),
            topic: msg.topic.clone(),
            event: "phx_reply",
            payload: Payload {
                response,
                status: "ok",
            },
        }
    }

    /// Initial-render reply: the full tree JSON under `rendered`.
    pub fn rendered(msg: &Msg, rendered: String) -> Self {
        Self::ok(
            msg,
            Response {
                rendered: Some(rendered),
                ..Response::default()
            },
        )
    }

    /// Empty-response "ok" reply.
    pub fn empty(msg: &Msg) -> Self {
        Self::ok(msg, Response::default())
    }

    /// Empty-response "ok" reply for an upload chunk.
    pub fn empty_upload(up: &UploadMsg) -> Self {
        Reply {
            join_ref: Some(up.join_ref.clone()),
            msg_ref: Some(up.msg_ref.clone()),
            topic: up.topic.clone(),
            event: "phx_reply",
            payload: Payload {
                response: Response::default(),
                status: "ok",
            },
        }
    }

    /// Reply carrying a diff overlay.
    pub fn with_diff(msg: &Msg, diff: String) -> Self {
        Self::ok(
            msg,
            Response {
                diff: Some(diff),
                ..Response::default()
            },
        )
    }

    /// Allow-upload reply: diff plus the effective constraints and the
    /// echoed entries.
    pub fn upload_diff(msg: &Msg, diff: String, config: String, entries: String) -> Self {
        Self::ok(
            msg,
            Response {
                diff: Some(diff),
                config: Some(config),
                entries: Some(entries),
                ..Response::default()
            },
        )
    }

    /// Reply telling the client to navigate away.
    pub fn redirect(msg: &Msg, to: &str) -> Self {
        let redirect = serde_json::json!({ "to": to }).to_string();
        Self::ok(
            msg,
            Response {
                redirect: Some(redirect),
                ..Response::default()
            },
        )
    }

    /// Heartbeat echo on the `"phoenix"` topic.
    pub fn heartbeat(msg_ref: &str) -> Self {
        Reply {
            join_ref: None,
            msg_ref: Some(msg_ref.to_string()),
            topic: "phoenix".to_string(),
            event: "phx_reply",
            payload: Payload {
                response: Response::default(),
                status: "ok",
            },
        }
    }

    /// `phx_error` frame signalling the client to retry, carrying the
    /// join-time refs and topic.
    pub fn error(join_ref: &str, msg_ref: &str, topic: &str) -> Self {
        Reply {
            join_ref: Some(join_ref.to_string()),
            msg_ref: Some(msg_ref.to_string()),
            topic: topic.to_string(),
            event: "phx_error",
            payload: Payload {
                response: Response::default(),
                status: "error",
            },
        }
    }

    pub fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(5)?;
        tup.serialize_element(&self.join_ref)?;
        tup.serialize_element(&self.msg_ref)?;
        tup.serialize_element(&self.topic)?;
        tup.serialize_element(&self.event)?;
        tup.serialize_element(&self.payload)?;
        tup.end()
    }
}

/// An untagged `diff` push: server-initiated, not answering any message.
#[derive(Debug, Clone)]
pub struct DiffFrame {
    join_ref: Option<String>,
    topic: String,
    diff: String,
}

impl DiffFrame {
    pub fn new(join_ref: Option<String>, topic: &str, diff: String) -> Self {
        DiffFrame {
            join_ref,
            topic: topic.to_string(),
            diff,
        }
    }

    pub fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for DiffFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue = serde_json::from_str(&self.diff).map_err(S::Error::custom)?;
        let mut tup = serializer.serialize_tuple(5)?;
        tup.serialize_element(&self.join_ref)?;
        tup.serialize_element(&None::<String>)?;
        tup.serialize_element(&self.topic)?;
        tup.serialize_element("diff")?;
        tup.serialize_element(raw)?;
        tup.end()
    }
}

/// Navigation kind for server-pushed navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavKind {
    Push,
    Replace,
}

#[derive(Debug, Clone, Serialize)]
struct NavPayload {
    kind: NavKind,
    to: String,
}

/// A `live_patch` / `live_redirect` navigation frame.
#[derive(Debug, Clone)]
pub struct NavFrame {
    topic: String,
    event: &'static str,
    payload: NavPayload,
}

impl NavFrame {
    pub fn patch(topic: &str, kind: NavKind, to: String) -> Self {
        NavFrame {
            topic: topic.to_string(),
            event: "live_patch",
            payload: NavPayload { kind, to },
        }
    }

    pub fn redirect(topic: &str, kind: NavKind, to: String) -> Self {
        NavFrame {
            topic: topic.to_string(),
            event: "live_redirect",
            payload: NavPayload { kind, to },
        }
    }

    pub fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for NavFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(5)?;
        tup.serialize_element(&None::<String>)?;
        tup.serialize_element(&None::<String>)?;
        tup.serialize_element(&self.topic)?;
        tup.serialize_element(&self.event)?;
        tup.serialize_element(&self.payload)?;
        tup.end()
    }
}
