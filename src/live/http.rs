//! HTTP bridge: the first (dead) render and the WebSocket upgrade.
//!
//! For each request the bridge asks the router for a view. If one is
//! routable it runs mount, handle_params, and render, wraps the result
//! in the live container div, and hands the layout callback a
//! [`LayoutDot`] to produce the full page. Requests no view claims fall
//! through to the embedding server's own handling. A separate handler
//! upgrades the live socket endpoint and spawns the session tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error};
use tungstenite::Message;
use url::Url;
use uuid::Uuid;

use crate::error::{ProtocolError, ViewError};
use crate::live::funcs::live_view_container;
use crate::live::session::Session;
use crate::live::socket::Socket;
use crate::live::view::{Meta, PageTitleConfig, Params};
use crate::live::Config;
use crate::phx::{Msg, UploadMsg};

/// Everything the layout callback needs to wrap a dead-rendered view.
#[derive(Debug, Clone)]
pub struct LayoutDot {
    pub live_view_id: String,
    pub csrf_token: String,
    pub page_title: PageTitleConfig,
    /// The pre-rendered live container div, embedded with `{{raw …}}`.
    pub container: String,
    /// The template the view rendered with, for layouts that want to
    /// re-execute it themselves.
    pub view_template: Arc<crate::template::Template>,
    /// The dot the view rendered with.
    pub view_dot: Value,
}

impl LayoutDot {
    /// A ready-made layout dot: `LiveViewID`, `CSRFToken`, `PageTitle`,
    /// `TitleTag`, `LiveView`, and the view's own dot under `View`.
    pub fn to_value(&self) -> Value {
        json!({
            "LiveViewID": self.live_view_id,
            "CSRFToken": self.csrf_token,
            "PageTitle": {
                "Title": self.page_title.title,
                "Prefix": self.page_title.prefix,
                "Suffix": self.page_title.suffix,
            },
            "TitleTag": crate::live::funcs::title_tag(&self.page_title),
            "LiveView": self.container,
            "View": self.view_dot,
        })
    }
}

/// The HTTP side of the runtime.
pub struct LiveHandler {
    config: Arc<Config>,
}

impl LiveHandler {
    pub fn new(config: Arc<Config>) -> Self {
        LiveHandler { config }
    }

    /// Run the dead-render pipeline for `url`.
    ///
    /// Returns `Ok(None)` when the router claims no view (the caller
    /// should serve the request itself). Lifecycle errors surface as
    /// `Err` and should become a plain 500; no layout is rendered.
    pub fn dead_render(&self, url: &Url) -> Result<Option<String>, ViewError> {
        if let Some(should_handle) = &self.config.should_handle {
            if !should_handle(url) {
                return Ok(None);
            }
        }
        let Some(mut view) = self.config.router.route(url, None)? else {
            return Ok(None);
        };

        let csrf_token = match &self.config.make_csrf_token {
            Some(make) => make(),
            None => Uuid::new_v4().to_string(),
        };
        let mut socket = Socket::detached(url.clone(), csrf_token.clone());

        // dead renders run mount => handle_params => render and never
        // any message handler
        let params = Params {
            csrf_token: csrf_token.clone(),
            ..Params::default()
        };
        view.mount(&mut socket, &params)?;
        view.handle_params(&mut socket, url)?;

        let meta = Meta {
            csrf_token: csrf_token.clone(),
            url: url.clone(),
            uploads: socket.upload_configs.clone(),
            flash: socket.flash.clone(),
        };
        let rendered = view.render(&meta);
        let mut dot = rendered.dot;
        if let Value::Object(map) = &mut dot {
            map.insert("Meta".to_string(), meta.to_value());
        }
        let tree = rendered.template.execute_tree(&dot)?;
        let mut inner = String::new();
        tree.render_to(&mut inner);

        let live_view_id = Uuid::new_v4().to_string();
        let page_title = view
            .page_title_config()
            .unwrap_or_else(|| self.config.page_title.clone());
        let layout_dot = LayoutDot {
            container: live_view_container(&live_view_id, &inner),
            live_view_id,
            csrf_token,
            page_title,
            view_template: rendered.template,
            view_dot: dot,
        };
        let (layout, dot) = (self.config.render_layout)(&layout_dot);
        Ok(Some(layout.execute(&dot)?))
    }

    /// Serve one HTTP request. `None` means the request is not a live
    /// route and the caller's own stack should handle it.
    pub fn handle_request<B>(&self, req: &Request<B>) -> Option<Response<Full<Bytes>>> {
        let url = request_url(req)?;
        match self.dead_render(&url) {
            Ok(None) => None,
            Ok(Some(html)) => Some(html_response(html)),
            Err(err) => {
                if let Some(on_error) = &self.config.on_view_error {
                    on_error(&err);
                }
                error!(error = %err, %url, "dead render failed");
                Some(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    err.to_string(),
                ))
            }
        }
    }

    /// Upgrade a WebSocket request to the live channel and spawn the
    /// session, reader, and writer tasks.
    pub fn handle_socket<B>(&self, mut req: Request<B>) -> Response<Full<Bytes>> {
        if !is_websocket_upgrade(&req) {
            return plain_response(
                StatusCode::BAD_REQUEST,
                "Not a WebSocket upgrade request".to_string(),
            );
        }
        let request_url = request_url(&req)
            .unwrap_or_else(|| Url::parse("http://localhost/").unwrap_or_else(|_| unreachable!()));

        let (response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "websocket upgrade failed");
                return plain_response(
                    StatusCode::BAD_REQUEST,
                    format!("WebSocket upgrade error: {err}"),
                );
            }
        };

        let config = self.config.clone();
        tokio::spawn(async move {
            let stream = match websocket.await {
                Ok(stream) => stream,
                Err(err) => {
                    error!(error = %err, "websocket handshake failed");
                    return;
                }
            };
            let (sink, stream) = stream.split();

            let (msg_tx, msg_rx) = mpsc::unbounded_channel();
            let (upload_tx, upload_rx) = mpsc::unbounded_channel();
            let (readerr_tx, readerr_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::channel(32);

            tokio::spawn(write_loop(sink, out_rx));
            tokio::spawn(read_loop(stream, msg_tx, upload_tx, readerr_tx));
            Session::new(config, request_url, msg_rx, upload_rx, readerr_rx, out_tx)
                .run()
                .await;
            debug!("session finished");
        });

        response
    }

    /// Convenience server: serve live routes on `addr`, upgrading
    /// `socket_path` to the live channel and answering everything else
    /// with 404.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, socket_path: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let socket_path = socket_path.to_string();
        loop {
            let (tcp, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");
            let handler = self.clone();
            let socket_path = socket_path.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    let socket_path = socket_path.clone();
                    async move {
                        let response = if req.uri().path() == socket_path {
                            handler.handle_socket(req)
                        } else {
                            handler.handle_request(&req).unwrap_or_else(|| {
                                plain_response(StatusCode::NOT_FOUND, "not found".to_string())
                            })
                        };
                        Ok::<_, hyper::Error>(response)
                    }
                });
                let conn = http1::Builder::new()
                    .serve_connection(TokioIo::new(tcp), service)
                    .with_upgrades();
                if let Err(err) = conn.await {
                    debug!(error = %err, "connection error");
                }
            });
        }
    }
}

/// Feed parsed frames to the session until the socket fails or closes.
async fn read_loop<S>(
    mut stream: S,
    msg_tx: mpsc::UnboundedSender<Msg>,
    upload_tx: mpsc::UnboundedSender<UploadMsg>,
    readerr_tx: mpsc::UnboundedSender<ProtocolError>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(next) = stream.next().await {
        match next {
            Ok(Message::Text(text)) => match Msg::parse(text.as_bytes()) {
                Ok(msg) => {
                    if msg_tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = readerr_tx.send(err);
                    return;
                }
            },
            Ok(Message::Binary(data)) => match UploadMsg::decode(&data) {
                Ok(um) => {
                    if upload_tx.send(um).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = readerr_tx.send(err);
                    return;
                }
            },
            Ok(Message::Close(_)) => {
                let _ = readerr_tx.send(ProtocolError::ConnectionClosed);
                return;
            }
            Ok(_) => {} // ping/pong are handled by the protocol layer
            Err(err) => {
                let _ = readerr_tx.send(ProtocolError::Read(err.to_string()));
                return;
            }
        }
    }
    let _ = readerr_tx.send(ProtocolError::ConnectionClosed);
}

/// Drain session frames into the socket; closes the sink when the
/// session drops its sender.
async fn write_loop<S>(mut sink: S, mut out_rx: mpsc::Receiver<String>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = out_rx.recv().await {
        if sink.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

/// Reconstruct an absolute URL for a request from its URI and Host
/// header.
fn request_url<B>(req: &Request<B>) -> Option<Url> {
    let uri = req.uri();
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Url::parse(&format!("http://{host}{path}")).ok()
}

fn html_response(body: String) -> Response<Full<Bytes>> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8");
    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn plain_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::view::{Rendered, View};
    use crate::live::ConfigBuilder;
    use crate::template::Template;
    use crate::ViewError;

    struct Hello;

    impl View for Hello {
        fn render(&self, meta: &Meta) -> Rendered {
            let t = Template::parse("hello", "<p>hi {{.Who}} ({{.Meta.CSRFToken}})</p>")
                .unwrap();
            let _ = meta;
            Rendered::new(Arc::new(t), json!({ "Who": "world" }))
        }

        fn page_title_config(&self) -> Option<PageTitleConfig> {
            Some(PageTitleConfig {
                title: "Hello".to_string(),
                prefix: "App - ".to_string(),
                suffix: String::new(),
            })
        }
    }

    fn handler() -> LiveHandler {
        let config = ConfigBuilder::new(Arc::new(
            |url: &Url, _cur: Option<Box<dyn View>>| -> Result<_, ViewError> {
                if url.path() == "/hello" {
                    Ok(Some(Box::new(Hello) as Box<dyn View>))
                } else {
                    Ok(None)
                }
            },
        ))
        .make_csrf_token(Arc::new(|| "fixed-token".to_string()))
        .build();
        LiveHandler::new(Arc::new(config))
    }

    #[test]
    fn test_dead_render_wraps_view_in_container_and_layout() {
        let h = handler();
        let html = h
            .dead_render(&Url::parse("http://localhost/hello").unwrap())
            .unwrap()
            .unwrap();
        assert!(html.contains("<p>hi world (fixed-token)</p>"), "{html}");
        assert!(html.contains("data-phx-main=\"true\""), "{html}");
        assert!(html.contains("id=\"phx-"), "{html}");
        // the view's title config reaches the default layout's title tag
        assert!(html.contains("<title"), "{html}");
        assert!(html.contains("App - Hello"), "{html}");
    }

    #[test]
    fn test_dead_render_passes_on_unrouted_urls() {
        let h = handler();
        assert!(h
            .dead_render(&Url::parse("http://localhost/other").unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_should_handle_predicate_filters_requests() {
        let config = ConfigBuilder::new(Arc::new(
            |_url: &Url, _cur: Option<Box<dyn View>>| -> Result<_, ViewError> {
                Ok(Some(Box::new(Hello) as Box<dyn View>))
            },
        ))
        .should_handle(Arc::new(|url: &Url| url.path().starts_with("/live")))
        .build();
        let h = LiveHandler::new(Arc::new(config));
        assert!(h
            .dead_render(&Url::parse("http://localhost/static/app.js").unwrap())
            .unwrap()
            .is_none());
        assert!(h
            .dead_render(&Url::parse("http://localhost/live/x").unwrap())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_mount_error_becomes_500() {
        struct Failing;
        impl View for Failing {
            fn render(&self, _meta: &Meta) -> Rendered {
                Rendered::new(
                    Arc::new(Template::parse("f", "x").unwrap()),
                    json!({}),
                )
            }
            fn mount(&mut self, _socket: &mut Socket, _params: &Params) -> Result<(), ViewError> {
                Err(ViewError::msg("mount failed"))
            }
        }
        let config = ConfigBuilder::new(Arc::new(
            |_url: &Url, _cur: Option<Box<dyn View>>| -> Result<_, ViewError> {
                Ok(Some(Box::new(Failing) as Box<dyn View>))
            },
        ))
        .build();
        let h = LiveHandler::new(Arc::new(config));
        let req = Request::builder()
            .uri("/anything")
            .body(())
            .unwrap();
        let resp = h.handle_request(&req).unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_request_url_reconstruction() {
        let req = Request::builder()
            .uri("/a/b?c=1")
            .header(header::HOST, "example.com:8080")
            .body(())
            .unwrap();
        let url = request_url(&req).unwrap();
        assert_eq!(url.as_str(), "http://example.com:8080/a/b?c=1");
    }

    #[test]
    fn test_non_upgrade_socket_request_is_rejected() {
        let h = handler();
        let req = Request::builder().uri("/live/websocket").body(()).unwrap();
        let resp = h.handle_socket(req);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
