//! The view contract.
//!
//! A view is a server-held object that renders to a template and reacts
//! to lifecycle callbacks. Only `render` is required; the optional
//! capabilities default to no-ops, except the two message handlers,
//! which error when a message reaches a view that does not handle them.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Value};
use url::Url;

use crate::error::ViewError;
use crate::live::event::{Event, Info};
use crate::live::socket::Socket;
use crate::live::uploads::UploadConfig;
use crate::template::Template;

/// Page title parts consulted when rendering the title tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTitleConfig {
    pub title: String,
    pub prefix: String,
    pub suffix: String,
}

/// Metadata passed to a view's `render`, also exposed to templates
/// under the `Meta` dot key.
#[derive(Debug, Clone)]
pub struct Meta {
    pub csrf_token: String,
    pub url: Url,
    pub uploads: IndexMap<String, UploadConfig>,
    pub flash: IndexMap<String, String>,
}

impl Meta {
    /// The dot form templates see: `.Meta.CSRFToken`, `.Meta.URL`,
    /// `.Meta.Uploads.<name>`, `.Meta.Flash.<key>`.
    pub fn to_value(&self) -> Value {
        let uploads: serde_json::Map<String, Value> = self
            .uploads
            .iter()
            .map(|(name, uc)| {
                let v = serde_json::to_value(uc).unwrap_or(Value::Null);
                (name.clone(), v)
            })
            .collect();
        let flash: serde_json::Map<String, Value> = self
            .flash
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        json!({
            "CSRFToken": self.csrf_token,
            "URL": self.url.as_str(),
            "Uploads": Value::Object(uploads),
            "Flash": Value::Object(flash),
        })
    }
}

/// Data passed to a view's `mount`.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub csrf_token: String,
    /// How many times the client has mounted this view (0 on the first).
    pub mounts: i64,
    /// The raw join params.
    pub data: serde_json::Map<String, Value>,
}

/// What a view renders with: the parsed template and the dot to
/// execute it against.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub template: Arc<Template>,
    pub dot: Value,
}

impl Rendered {
    pub fn new(template: Arc<Template>, dot: Value) -> Self {
        Rendered { template, dot }
    }
}

/// A live view.
///
/// `render` is called after every state change; the session executes the
/// returned template to capture the static/dynamic tree and pushes only
/// the changed dynamics. The lifecycle methods run single-threaded
/// within one session, so implementations need not be reentrant.
pub trait View: Send {
    /// Produce the template and dot for the current state. The session
    /// adds the `Meta` key to the dot before execution.
    fn render(&self, meta: &Meta) -> Rendered;

    /// Called exactly once per session, at join and for each fresh HTTP
    /// render.
    fn mount(&mut self, socket: &mut Socket, params: &Params) -> Result<(), ViewError> {
        let _ = (socket, params);
        Ok(())
    }

    /// Called on join and on each live patch.
    fn handle_params(&mut self, socket: &mut Socket, url: &Url) -> Result<(), ViewError> {
        let _ = (socket, url);
        Ok(())
    }

    /// Called for every client event that is not a reserved meta-event.
    fn handle_event(&mut self, socket: &mut Socket, event: &Event) -> Result<(), ViewError> {
        let _ = (socket, event);
        Err(ViewError::UnhandledEvent)
    }

    /// Called for server-posted info events.
    fn handle_info(&mut self, socket: &mut Socket, info: &Info) -> Result<(), ViewError> {
        let _ = (socket, info);
        Err(ViewError::UnhandledInfo)
    }

    /// Called when the client leaves the view.
    fn close(&mut self) {}

    /// Title configuration for this view; `None` falls back to the
    /// application-wide config.
    fn page_title_config(&self) -> Option<PageTitleConfig> {
        None
    }
}

/// Resolves a URL to a view, re-entered on join and on each live patch.
///
/// `current` carries the session's existing view on patches so a route
/// can keep its state; returning a new boxed view replaces it.
pub trait Router: Send + Sync {
    fn route(
        &self,
        url: &Url,
        current: Option<Box<dyn View>>,
    ) -> Result<Option<Box<dyn View>>, ViewError>;
}

impl<F> Router for F
where
    F: Fn(&Url, Option<Box<dyn View>>) -> Result<Option<Box<dyn View>>, ViewError> + Send + Sync,
{
    fn route(
        &self,
        url: &Url,
        current: Option<Box<dyn View>>,
    ) -> Result<Option<Box<dyn View>>, ViewError> {
        self(url, current)
    }
}
