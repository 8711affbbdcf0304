//! Liveview: server-rendered HTML views kept live over a WebSocket.
//!
//! A view is a server-held object whose state changes in response to client
//! events. After each change the view is re-rendered into a structured
//! template tree and only the changed dynamic leaves are pushed to the
//! client, which patches its DOM. The wire format is compatible with the
//! Phoenix LiveView JavaScript client.
//!
//! The crate is organized around four subsystems:
//! - [`tmpl`]: the static/dynamic template tree, its JSON form, and diffing
//! - [`phx`]: the wire codec (text frames, binary upload chunks, replies)
//! - [`template`]: the `{{...}}` template engine that drives tree capture
//! - [`live`]: the view contract, upload engine, per-connection session,
//!   and the HTTP bridge for the initial dead render

pub mod error;
pub mod live;
pub mod phx;
pub mod template;
pub mod tmpl;

pub use error::{ProtocolError, TemplateError, TreeError, UploadError, ViewError};
pub use live::{
    Config, ConfigBuilder, Event, Info, InfoSender, Js, LayoutDot, LiveHandler, Meta,
    PageTitleConfig, Params, Rendered, Router, Session, Socket, UploadConfig, UploadConstraints,
    UploadEntry, Values, View,
};
pub use template::Template;
pub use tmpl::Tree;

/// Topic prefix identifying a live view channel.
pub const LIVE_TOPIC_PREFIX: &str = "lv:";

/// Topic prefix identifying a live view upload sidecar channel.
pub const UPLOAD_TOPIC_PREFIX: &str = "lvu:";

/// Directory name prefix for staged upload files under the system temp dir.
pub const UPLOAD_STAGING_PREFIX: &str = "live-";
