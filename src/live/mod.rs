//! Live views: the view contract, uploads, sessions, and the HTTP bridge.

pub mod event;
pub mod funcs;
pub mod http;
pub mod js;
pub mod session;
pub mod socket;
pub mod uploads;
pub mod view;

pub use event::{Event, Info, Values};
pub use http::{LayoutDot, LiveHandler};
pub use js::{HideOpts, Js, PushOpts, ShowOpts, ToggleOpts, Transition};
pub use session::Session;
pub use socket::{InfoSender, Socket};
pub use uploads::{UploadConfig, UploadConstraints, UploadEntry};
pub use view::{Meta, PageTitleConfig, Params, Rendered, Router, View};

use std::sync::Arc;

use serde_json::Value;

use crate::error::ViewError;
use crate::template::Template;

/// Callback producing the layout template and its dot for a dead render.
pub type RenderLayout = dyn Fn(&LayoutDot) -> (Arc<Template>, Value) + Send + Sync;

/// Predicate deciding whether the bridge should consider a request.
pub type ShouldHandle = dyn Fn(&url::Url) -> bool + Send + Sync;

/// Observer for errors surfaced by the session error policy.
pub type OnViewError = dyn Fn(&ViewError) + Send + Sync;

/// CSRF token factory consulted on each dead render.
pub type MakeCsrfToken = dyn Fn() -> String + Send + Sync;

/// Configuration for a live application, shared by the HTTP bridge and
/// every session.
pub struct Config {
    /// Resolves URLs to views, on join and on each live patch.
    pub router: Arc<dyn Router>,
    /// Optional request filter for the HTTP bridge.
    pub should_handle: Option<Arc<ShouldHandle>>,
    /// Wraps dead-rendered views in the outer page.
    pub render_layout: Arc<RenderLayout>,
    /// Called for every error the session error policy surfaces.
    pub on_view_error: Option<Arc<OnViewError>>,
    /// Application-wide page title parts, used when a view has no
    /// title config of its own.
    pub page_title: PageTitleConfig,
    /// CSRF token factory; defaults to a fresh UUID per request.
    pub make_csrf_token: Option<Arc<MakeCsrfToken>>,
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(router: Arc<dyn Router>) -> Self {
        ConfigBuilder {
            config: Config {
                router,
                should_handle: None,
                render_layout: Arc::new(default_render_layout),
                on_view_error: None,
                page_title: PageTitleConfig::default(),
                make_csrf_token: None,
            },
        }
    }

    pub fn render_layout(mut self, render_layout: Arc<RenderLayout>) -> Self {
        self.config.render_layout = render_layout;
        self
    }

    pub fn should_handle(mut self, should_handle: Arc<ShouldHandle>) -> Self {
        self.config.should_handle = Some(should_handle);
        self
    }

    pub fn on_view_error(mut self, on_view_error: Arc<OnViewError>) -> Self {
        self.config.on_view_error = Some(on_view_error);
        self
    }

    pub fn page_title(mut self, page_title: PageTitleConfig) -> Self {
        self.config.page_title = page_title;
        self
    }

    pub fn make_csrf_token(mut self, make_csrf_token: Arc<MakeCsrfToken>) -> Self {
        self.config.make_csrf_token = Some(make_csrf_token);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// The fallback layout: a minimal document around the live container.
fn default_render_layout(dot: &LayoutDot) -> (Arc<Template>, Value) {
    static LAYOUT: std::sync::OnceLock<Arc<Template>> = std::sync::OnceLock::new();
    let template = LAYOUT.get_or_init(|| {
        let source = "<!DOCTYPE html>\n<html><head>{{raw .TitleTag}}</head><body>{{raw .LiveView}}</body></html>";
        Arc::new(Template::parse("layout", source).expect("default layout parses"))
    });
    (template.clone(), dot.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_builder_defaults() {
        let config = ConfigBuilder::new(Arc::new(
            |_url: &Url, _cur: Option<Box<dyn View>>| -> Result<Option<Box<dyn View>>, ViewError> {
                Ok(None)
            },
        ))
        .build();
        assert!(config.should_handle.is_none());
        assert!(config.on_view_error.is_none());
        assert!(config.make_csrf_token.is_none());
        assert_eq!(config.page_title, PageTitleConfig::default());
    }

    #[test]
    fn test_default_layout_embeds_container_and_title() {
        let dot = LayoutDot {
            live_view_id: "id1".to_string(),
            csrf_token: "tok".to_string(),
            page_title: PageTitleConfig {
                title: "T".to_string(),
                ..PageTitleConfig::default()
            },
            container: "<div id=\"phx-id1\">x</div>".to_string(),
            view_template: Arc::new(Template::parse("view", "x").unwrap()),
            view_dot: serde_json::json!({}),
        };
        let (template, value) = default_render_layout(&dot);
        let html = template.execute(&value).unwrap();
        assert!(html.contains("<div id=\"phx-id1\">x</div>"), "{html}");
        assert!(html.contains("<title>T</title>"), "{html}");
    }
}
