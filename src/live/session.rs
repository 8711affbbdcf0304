//! Per-connection session orchestrator.
//!
//! One session serves one WebSocket connection. It multiplexes four
//! input sources onto the view - parsed client messages, server-posted
//! info events, binary upload chunks, and server-queued navigation -
//! handling exactly one input to completion before the next. Each
//! handling step mutates the view, re-renders, diffs against the
//! previous tree, and writes its reply frames in order.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{ProtocolError, UploadError, ViewError};
use crate::live::event::{Event, Info, Values};
use crate::live::socket::{staging_dir, NavCommand, NavCommandKind, Socket};
use crate::live::view::{Meta, Params};
use crate::live::Config;
use crate::phx::{DiffFrame, Msg, NavFrame, NavKind, Reply, UploadMsg};
use crate::tmpl::{diff, Tree};
use crate::{LIVE_TOPIC_PREFIX, UPLOAD_TOPIC_PREFIX};

/// Error-reply pacing: 1 token per 15 seconds, burst of 3.
const ERROR_TOKENS_PER_SEC: f64 = 1.0 / 15.0;
const ERROR_TOKEN_BURST: f64 = 3.0;

/// Token bucket pacing `phx_error` replies so a misbehaving client
/// cannot provoke a retry storm.
struct TokenBucket {
    tokens: f64,
    last: Instant,
    rate: f64,
    burst: f64,
}

impl TokenBucket {
    fn new(rate: f64, burst: f64) -> Self {
        TokenBucket {
            tokens: burst,
            last: Instant::now(),
            rate,
            burst,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        let refill = now.duration_since(self.last).as_secs_f64() * self.rate;
        self.tokens = (self.tokens + refill).min(self.burst);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The per-connection state machine.
pub struct Session {
    config: Arc<Config>,
    view: Option<Box<dyn crate::live::View>>,
    socket: Socket,
    /// The live topic (`lv:<id>`), recorded at join.
    topic: String,
    /// Join-time refs, retained for error replies.
    join_ref: String,
    join_msg_ref: String,
    /// Diff baseline: the last rendered tree.
    prev_tree: Option<Tree>,
    error_bucket: TokenBucket,
    msg_rx: mpsc::UnboundedReceiver<Msg>,
    upload_rx: mpsc::UnboundedReceiver<UploadMsg>,
    info_rx: mpsc::UnboundedReceiver<Info>,
    nav_rx: mpsc::UnboundedReceiver<NavCommand>,
    readerr_rx: mpsc::UnboundedReceiver<ProtocolError>,
    out_tx: mpsc::Sender<String>,
}

impl Session {
    /// Build a session for one connection. The reader task feeds
    /// `msg_rx`/`upload_rx`/`readerr_rx`; outbound frames flow through
    /// `out_tx` to the writer task.
    pub fn new(
        config: Arc<Config>,
        request_url: Url,
        msg_rx: mpsc::UnboundedReceiver<Msg>,
        upload_rx: mpsc::UnboundedReceiver<UploadMsg>,
        readerr_rx: mpsc::UnboundedReceiver<ProtocolError>,
        out_tx: mpsc::Sender<String>,
    ) -> Self {
        let (info_tx, info_rx) = mpsc::unbounded_channel();
        let (nav_tx, nav_rx) = mpsc::unbounded_channel();
        Session {
            config,
            view: None,
            socket: Socket::new(request_url, String::new(), info_tx, nav_tx),
            topic: String::new(),
            join_ref: String::new(),
            join_msg_ref: String::new(),
            prev_tree: None,
            error_bucket: TokenBucket::new(ERROR_TOKENS_PER_SEC, ERROR_TOKEN_BURST),
            msg_rx,
            upload_rx,
            info_rx,
            nav_rx,
            readerr_rx,
            out_tx,
        }
    }

    /// Serve the connection until the read side fails or every input
    /// source closes. Inputs are serialized: one is dequeued at a time
    /// and handled to completion, including its writes.
    pub async fn run(mut self) {
        loop {
            let step = tokio::select! {
                Some(msg) = self.msg_rx.recv() => {
                    let res = self.dispatch(&msg).await;
                    self.finish_step(res).await
                }
                Some(um) = self.upload_rx.recv() => {
                    let res = self.handle_upload(&um).await;
                    self.finish_step(res).await
                }
                Some(info) = self.info_rx.recv() => {
                    let res = self.handle_info(&info);
                    self.finish_step(res).await
                }
                Some(nav) = self.nav_rx.recv() => {
                    let res = self.handle_nav(nav);
                    self.finish_step(res).await
                }
                Some(err) = self.readerr_rx.recv() => {
                    debug!(error = %err, topic = %self.topic, "websocket read failed");
                    Flow::Stop
                }
                else => Flow::Stop,
            };
            if matches!(step, Flow::Stop) {
                return;
            }
        }
    }

    /// Write the frames of one handling step, or fold an error through
    /// the error policy.
    async fn finish_step(&mut self, res: Result<Vec<String>, ViewError>) -> Flow {
        let frames = match res {
            Ok(frames) => frames,
            Err(ViewError::Internal(violation)) => {
                error!(topic = %self.topic, %violation, "fatal internal error");
                return Flow::Stop;
            }
            Err(err) => match self.view_error_frame(&err) {
                Some(frame) => vec![frame],
                None => return Flow::Continue,
            },
        };
        for frame in frames {
            if self.out_tx.send(frame).await.is_err() {
                // writer is gone; the client hung up
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Surface a view error: notify the configured callback, log it, and
    /// build a rate-limited `phx_error` frame carrying the join refs.
    fn view_error_frame(&mut self, err: &ViewError) -> Option<String> {
        if let Some(on_error) = &self.config.on_view_error {
            on_error(err);
        }
        error!(error = %err, topic = %self.topic, "view error");
        if !self.error_bucket.allow() {
            warn!(topic = %self.topic, "suppressing phx_error reply (rate limited)");
            return None;
        }
        Reply::error(&self.join_ref, &self.join_msg_ref, &self.topic)
            .json()
            .ok()
    }

    /// Dispatch one parsed text frame by event kind.
    async fn dispatch(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        match msg.event.as_str() {
            "phx_join" => self.handle_join(msg),
            "heartbeat" => Ok(vec![Reply::heartbeat(&msg.msg_ref).json()?]),
            "event" => self.handle_event(msg),
            "live_patch" => self.handle_live_patch(msg),
            "phx_leave" => {
                if let Some(view) = self.view.as_mut() {
                    view.close();
                }
                Ok(Vec::new())
            }
            "allow_upload" => self.handle_allow_upload(msg),
            "progress" => self.handle_progress(msg),
            "cancel" => self.handle_cancel(msg),
            other => Err(ViewError::msg(format!("unknown event: {other}"))),
        }
    }

    fn handle_join(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        if let Some(id) = msg.topic.strip_prefix(UPLOAD_TOPIC_PREFIX) {
            debug!(entry_ref = %id, "upload channel joined");
            self.socket.active_upload_topic = msg.topic.clone();
            return Ok(vec![Reply::empty(msg).json()?]);
        }
        if !msg.topic.starts_with(LIVE_TOPIC_PREFIX) {
            return Err(ViewError::msg(format!("unknown join topic: {:?}", msg.topic)));
        }

        // the join payload carries the url (or redirect) to route
        let url_str = msg
            .payload_str("url")
            .or_else(|| msg.payload_str("redirect"))
            .ok_or(ViewError::MissingUrl)?;
        let url = Url::parse(url_str)?;
        let view = self
            .config
            .router
            .route(&url, None)?
            .ok_or_else(|| ViewError::NoView(url_str.to_string()))?;

        let raw_params = msg
            .payload
            .get("params")
            .and_then(Value::as_object)
            .ok_or(ViewError::BadPayloadField("params"))?;
        let params = Params {
            csrf_token: raw_params
                .get("_csrf_token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            mounts: raw_params
                .get("_mounts")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            data: raw_params.clone(),
        };

        self.topic = msg.topic.clone();
        self.join_ref = msg.join_ref.clone();
        self.join_msg_ref = msg.msg_ref.clone();
        self.socket.url = url.clone();
        self.socket.csrf_token = params.csrf_token.clone();
        self.view = Some(view);

        // join is the only time mount runs; handle_params follows so the
        // view can pick up URL state
        let view = self.view.as_mut().ok_or_else(no_view)?;
        view.mount(&mut self.socket, &params)?;
        view.handle_params(&mut self.socket, &url)?;

        let tree = self.render_to_tree()?;
        let rendered = tree.json().map_err(ViewError::from)?;
        self.prev_tree = Some(tree);
        Ok(vec![Reply::rendered(msg, rendered).json()?])
    }

    fn handle_event(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        let etype = msg
            .payload_str("type")
            .ok_or(ViewError::BadPayloadField("type"))?;
        let ename = msg
            .payload_str("event")
            .ok_or(ViewError::BadPayloadField("event"))?
            .to_string();

        match etype {
            "click" | "keyup" | "keydown" | "blur" | "focus" | "hook" => {
                let value = msg
                    .payload
                    .get("value")
                    .and_then(Value::as_object)
                    .ok_or(ViewError::BadPayloadField("value"))?;
                let mut data = Values::new();
                for (k, v) in value {
                    data.add(k, &scalar_string(v));
                }
                if ename == "lv:clear-flash" {
                    // bypasses the view entirely
                    let key = data.get("key").to_string();
                    self.socket
                        .clear_flash(if key.is_empty() { None } else { Some(&key) });
                } else {
                    let view = self.view.as_mut().ok_or_else(no_view)?;
                    view.handle_event(&mut self.socket, &Event { name: ename, data })?;
                }
            }
            "form" => {
                let value = msg
                    .payload_str("value")
                    .ok_or(ViewError::BadPayloadField("value"))?;
                let data = Values::from_query(value);
                let target = data.get("_target").to_string();
                let view = self.view.as_mut().ok_or_else(no_view)?;
                view.handle_event(&mut self.socket, &Event { name: ename, data })?;

                // a submitted form may announce upload entries keyed by
                // the config ref under the `_target` config name
                if let Some(uploads) = msg.payload.get("uploads").and_then(Value::as_object) {
                    if !uploads.is_empty() {
                        if let Some(uc) = self.socket.upload_configs.get_mut(&target) {
                            if !uc.ref_id.is_empty() {
                                if let Some(entries) =
                                    uploads.get(&uc.ref_id).and_then(Value::as_array)
                                {
                                    uc.add_entries(entries);
                                }
                            }
                        }
                    }
                }
            }
            other => return Err(ViewError::msg(format!("unknown event type: {other}"))),
        }

        // a queued redirect preempts the diff
        if let Some(to) = self.socket.redirect.take() {
            return Ok(vec![Reply::redirect(msg, &to).json()?]);
        }
        let diff_json = self.render_diff()?;
        Ok(vec![Reply::with_diff(msg, diff_json).json()?])
    }

    fn handle_live_patch(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        let url = Url::parse(msg.payload_str("url").ok_or(ViewError::MissingUrl)?)?;
        // re-enter the router with the current view so the route can
        // keep or replace it
        let current = self.view.take();
        self.view = self.config.router.route(&url, current)?;
        if self.view.is_none() {
            return Err(ViewError::NoView(url.to_string()));
        }
        self.socket.url = url.clone();
        let view = self.view.as_mut().ok_or_else(no_view)?;
        view.handle_params(&mut self.socket, &url)?;

        let diff_json = self.render_diff()?;
        Ok(vec![Reply::with_diff(msg, diff_json).json()?])
    }

    fn handle_allow_upload(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        let diff_json = self.render_diff()?;

        let upload_ref = msg
            .payload_str("ref")
            .ok_or(ViewError::BadPayloadField("ref"))?
            .to_string();
        let entries = msg
            .payload
            .get("entries")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));

        let uc = self
            .socket
            .upload_configs
            .values()
            .find(|u| u.ref_id == upload_ref)
            .ok_or_else(|| UploadError::NoConfig(upload_ref.clone()))?;
        let config_json = serde_json::to_string(&uc.constraints.effective())?;
        let entries_json = serde_json::to_string(&entries)?;
        self.socket.active_upload_ref = upload_ref;

        Ok(vec![
            Reply::upload_diff(msg, diff_json, config_json, entries_json).json()?,
        ])
    }

    fn handle_progress(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        let upload_ref = msg
            .payload_str("ref")
            .ok_or(ViewError::BadPayloadField("ref"))?;
        let entry_ref = msg
            .payload_str("entry_ref")
            .ok_or(ViewError::BadPayloadField("entry_ref"))?;
        let progress = msg
            .payload
            .get("progress")
            .and_then(Value::as_i64)
            .ok_or(ViewError::BadPayloadField("progress"))?;

        let uc = self
            .socket
            .upload_configs
            .values_mut()
            .find(|u| u.ref_id == upload_ref)
            .ok_or_else(|| UploadError::NoConfig(upload_ref.to_string()))?;
        let entry = uc
            .entry_mut(entry_ref)
            .ok_or_else(|| UploadError::NoEntry(entry_ref.to_string()))?;
        entry.progress = progress;
        entry.done = progress == 100;

        let diff_json = self.render_diff()?;
        Ok(vec![Reply::with_diff(msg, diff_json).json()?])
    }

    fn handle_cancel(&mut self, msg: &Msg) -> Result<Vec<String>, ViewError> {
        let entry_ref = msg
            .payload_str("entry_ref")
            .or_else(|| msg.payload_str("ref"))
            .ok_or(ViewError::BadPayloadField("ref"))?
            .to_string();
        let config_ref = msg.payload_str("ref").unwrap_or_default().to_string();
        let active_ref = self.socket.active_upload_ref.clone();
        if let Some(uc) = self
            .socket
            .upload_configs
            .values_mut()
            .find(|u| u.ref_id == config_ref || u.ref_id == active_ref)
        {
            uc.remove_entry(&entry_ref);
        }

        let diff_json = self.render_diff()?;
        Ok(vec![Reply::with_diff(msg, diff_json).json()?])
    }

    /// Handle one binary upload chunk: stage it to disk, synchronize the
    /// client on the first chunk, and acknowledge on the upload topic.
    async fn handle_upload(&mut self, um: &UploadMsg) -> Result<Vec<String>, ViewError> {
        // the upload topic's trailing segment is the entry ref
        let entry_ref = um.topic.split(':').nth(1).unwrap_or_default();
        let active_ref = self.socket.active_upload_ref.clone();
        let uc = self
            .socket
            .upload_configs
            .values()
            .find(|u| u.ref_id == active_ref)
            .ok_or_else(|| UploadError::NoConfig(active_ref.clone()))?;
        let entry = uc
            .entry(entry_ref)
            .ok_or_else(|| UploadError::NoEntry(entry_ref.to_string()))?;
        let first_chunk = entry.progress == 0;
        let staged_name = entry.uuid.clone();

        let dir = staging_dir(&active_ref);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(UploadError::Staging)?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(dir.join(&staged_name))
            .await
            .map_err(UploadError::Staging)?;
        file.write_all(&um.payload)
            .await
            .map_err(UploadError::Staging)?;

        let mut frames = Vec::new();
        if first_chunk {
            // an empty diff on the live topic synchronizes client state
            // before the first ack
            let sync =
                DiffFrame::new(Some(um.join_ref.clone()), &self.topic, "{}".to_string());
            frames.push(sync.json()?);
        }
        frames.push(Reply::empty_upload(um).json()?);
        Ok(frames)
    }

    /// Run a server-posted info event through the view and push a diff.
    fn handle_info(&mut self, info: &Info) -> Result<Vec<String>, ViewError> {
        let view = self.view.as_mut().ok_or_else(no_view)?;
        view.handle_info(&mut self.socket, info)?;
        let diff_json = self.render_diff()?;
        Ok(vec![DiffFrame::new(None, &self.topic, diff_json).json()?])
    }

    /// Process a server-queued navigation command: resolve the URL, run
    /// handle_params against it, and emit the navigation frame.
    fn handle_nav(&mut self, nav: NavCommand) -> Result<Vec<String>, ViewError> {
        let mut url = self.socket.url.join(&nav.path)?;
        if !nav.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, vs) in nav.params.iter() {
                for v in vs {
                    pairs.append_pair(k, v);
                }
            }
        }

        let view = self.view.as_mut().ok_or_else(no_view)?;
        view.handle_params(&mut self.socket, &url)?;
        self.socket.url = url.clone();

        let kind = if nav.replace {
            NavKind::Replace
        } else {
            NavKind::Push
        };
        let frame = match nav.kind {
            NavCommandKind::Patch => NavFrame::patch(&self.topic, kind, url.to_string()),
            NavCommandKind::Redirect => NavFrame::redirect(&self.topic, kind, url.to_string()),
        };
        Ok(vec![frame.json()?])
    }

    /// Render the view to a fresh tree, attaching any pending title and
    /// queued events to the root.
    fn render_to_tree(&mut self) -> Result<Tree, ViewError> {
        let view = self.view.as_ref().ok_or_else(no_view)?;
        let meta = Meta {
            csrf_token: self.socket.csrf_token.clone(),
            url: self.socket.url.clone(),
            uploads: self.socket.upload_configs.clone(),
            flash: self.socket.flash.clone(),
        };
        let rendered = view.render(&meta);
        let mut dot = rendered.dot;
        if let Value::Object(map) = &mut dot {
            map.insert("Meta".to_string(), meta.to_value());
        }
        let mut tree = rendered.template.execute_tree(&dot)?;
        tree.validate().map_err(ViewError::Internal)?;
        if let Some(title) = self.socket.title.take() {
            tree.set_title(title);
        }
        if !self.socket.pending_events.is_empty() {
            tree.set_events(std::mem::take(&mut self.socket.pending_events));
        }
        Ok(tree)
    }

    /// Render, diff against the baseline, and advance the baseline.
    fn render_diff(&mut self) -> Result<String, ViewError> {
        let new_tree = self.render_to_tree()?;
        let diff_json = match &self.prev_tree {
            Some(prev) => diff(prev, &new_tree).json()?,
            None => new_tree.json()?,
        };
        self.prev_tree = Some(new_tree);
        Ok(diff_json)
    }
}

fn no_view() -> ViewError {
    ViewError::msg("no view joined on this session")
}

/// Stringify a payload scalar for event data. Strings pass through;
/// other values keep their JSON form.
fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::view::{Rendered, View};
    use crate::live::ConfigBuilder;
    use crate::template::Template;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        count: i64,
        template: Arc<Template>,
    }

    impl Counter {
        fn new() -> Self {
            Counter {
                count: 0,
                template: Arc::new(Template::parse("counter", "<h1>{{.Count}}</h1>").unwrap()),
            }
        }
    }

    impl View for Counter {
        fn render(&self, _meta: &Meta) -> Rendered {
            Rendered::new(self.template.clone(), json!({ "Count": self.count }))
        }

        fn mount(&mut self, _socket: &mut Socket, _params: &Params) -> Result<(), ViewError> {
            Ok(())
        }

        fn handle_event(&mut self, socket: &mut Socket, event: &Event) -> Result<(), ViewError> {
            match event.name.as_str() {
                "increment" => self.count += 1,
                "go-away" => socket.redirect("/elsewhere"),
                "boom" => return Err(ViewError::msg("exploded")),
                "save" => {}
                _ => return Err(ViewError::msg(format!("unknown event {}", event.name))),
            }
            Ok(())
        }

        fn handle_info(&mut self, _socket: &mut Socket, info: &Info) -> Result<(), ViewError> {
            if info.name == "tick" {
                self.count += 10;
            }
            Ok(())
        }
    }

    fn counter_config() -> Arc<Config> {
        Arc::new(
            ConfigBuilder::new(Arc::new(
                |_url: &Url, current: Option<Box<dyn View>>| -> Result<_, ViewError> {
                    Ok(Some(current.unwrap_or_else(|| {
                        Box::new(Counter::new()) as Box<dyn View>
                    })))
                },
            ))
            .build(),
        )
    }

    struct TestSession {
        session: Session,
        out_rx: mpsc::Receiver<String>,
    }

    fn test_session(config: Arc<Config>) -> TestSession {
        let (_msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (_upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (_readerr_tx, readerr_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::channel(32);
        let session = Session::new(
            config,
            Url::parse("http://localhost/counter").unwrap(),
            msg_rx,
            upload_rx,
            readerr_rx,
            out_tx,
        );
        TestSession { session, out_rx }
    }

    fn join_msg() -> Msg {
        Msg::parse(
            br#"["1","1","lv:phx-test","phx_join",{"url":"http://localhost/counter","params":{"_csrf_token":"tok","_mounts":0}}]"#,
        )
        .unwrap()
    }

    fn event_msg(name: &str) -> Msg {
        let frame = format!(
            r#"["1","2","lv:phx-test","event",{{"type":"click","event":{name:?},"value":{{}}}}]"#
        );
        Msg::parse(frame.as_bytes()).unwrap()
    }

    async fn join(ts: &mut TestSession) {
        let frames = ts.session.dispatch(&join_msg()).await.unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_echo() {
        let mut ts = test_session(counter_config());
        let msg = Msg::parse(br#"[null,"1","phoenix","heartbeat",{}]"#).unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert_eq!(
            frames,
            vec![r#"[null,"1","phoenix","phx_reply",{"response":{},"status":"ok"}]"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_join_replies_rendered_tree() {
        let mut ts = test_session(counter_config());
        let frames = ts.session.dispatch(&join_msg()).await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"["1","1","lv:phx-test","phx_reply",{"response":{"rendered":{"0":"0","s":["<h1>","</h1>"]}},"status":"ok"}]"#
                    .to_string()
            ]
        );
        assert!(ts.session.prev_tree.is_some());
        assert_eq!(ts.session.topic, "lv:phx-test");
        assert_eq!(ts.session.socket.csrf_token(), "tok");
    }

    #[tokio::test]
    async fn test_event_replies_sparse_diff() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let frames = ts.session.dispatch(&event_msg("increment")).await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"["1","2","lv:phx-test","phx_reply",{"response":{"diff":{"0":"1"}},"status":"ok"}]"#
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_noop_event_replies_empty_diff() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let frames = ts.session.dispatch(&event_msg("save")).await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"["1","2","lv:phx-test","phx_reply",{"response":{"diff":{}},"status":"ok"}]"#
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_queued_redirect_preempts_diff() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let frames = ts.session.dispatch(&event_msg("go-away")).await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"["1","2","lv:phx-test","phx_reply",{"response":{"redirect":{"to":"/elsewhere"}},"status":"ok"}]"#
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_form_event_decodes_urlencoded_values() {
        struct FormView {
            seen: Option<Event>,
            template: Arc<Template>,
        }
        impl View for FormView {
            fn render(&self, _meta: &Meta) -> Rendered {
                Rendered::new(
                    self.template.clone(),
                    json!({ "Name": self.seen.as_ref().map(|e| e.data.get("name").to_string()) }),
                )
            }
            fn handle_event(
                &mut self,
                _socket: &mut Socket,
                event: &Event,
            ) -> Result<(), ViewError> {
                self.seen = Some(event.clone());
                Ok(())
            }
        }
        let config = Arc::new(
            ConfigBuilder::new(Arc::new(
                |_url: &Url, _cur: Option<Box<dyn View>>| -> Result<_, ViewError> {
                    Ok(Some(Box::new(FormView {
                        seen: None,
                        template: Arc::new(Template::parse("f", "{{.Name}}").unwrap()),
                    }) as Box<dyn View>))
                },
            ))
            .build(),
        );
        let mut ts = test_session(config);
        join(&mut ts).await;
        let msg = Msg::parse(
            br#"["1","2","lv:phx-test","event",{"type":"form","event":"validate","value":"name=ada&age=36"}]"#,
        )
        .unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""diff":{"0":"ada"}"#), "{}", frames[0]);
    }

    #[tokio::test]
    async fn test_clear_flash_bypasses_view() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        ts.session.socket.put_flash("info", "saved");
        let msg = Msg::parse(
            br#"["1","2","lv:phx-test","event",{"type":"click","event":"lv:clear-flash","value":{"key":"info"}}]"#,
        )
        .unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(ts.session.socket.flash.is_empty());
    }

    #[tokio::test]
    async fn test_view_error_produces_rate_limited_phx_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let config = Arc::new(
            ConfigBuilder::new(Arc::new(
                |_url: &Url, current: Option<Box<dyn View>>| -> Result<_, ViewError> {
                    Ok(Some(current.unwrap_or_else(|| {
                        Box::new(Counter::new()) as Box<dyn View>
                    })))
                },
            ))
            .on_view_error(Arc::new(move |_err| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .build(),
        );
        let mut ts = test_session(config);
        join(&mut ts).await;

        // burst of 3 error frames, then suppression
        for i in 0..4 {
            let err = ts.session.dispatch(&event_msg("boom")).await.unwrap_err();
            let frame = ts.session.view_error_frame(&err);
            if i < 3 {
                assert_eq!(
                    frame.unwrap(),
                    r#"["1","1","lv:phx-test","phx_error",{"response":{},"status":"error"}]"#
                );
            } else {
                assert!(frame.is_none(), "fourth error frame should be suppressed");
            }
        }
        assert_eq!(errors.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_info_pushes_untagged_diff() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let frames = ts
            .session
            .handle_info(&Info::new("tick", Values::new()))
            .unwrap();
        assert_eq!(
            frames,
            vec![r#"[null,null,"lv:phx-test","diff",{"0":"10"}]"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_nav_patch_emits_live_patch_frame() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let mut params = Values::new();
        params.add("page", "2");
        let frames = ts
            .session
            .handle_nav(NavCommand {
                kind: NavCommandKind::Patch,
                path: "/counter/next".to_string(),
                params,
                replace: false,
            })
            .unwrap();
        assert_eq!(
            frames,
            vec![
                r#"[null,null,"lv:phx-test","live_patch",{"kind":"push","to":"http://localhost/counter/next?page=2"}]"#
                    .to_string()
            ]
        );
        assert_eq!(
            ts.session.socket.url().as_str(),
            "http://localhost/counter/next?page=2"
        );
    }

    #[tokio::test]
    async fn test_upload_join_sets_active_topic() {
        let mut ts = test_session(counter_config());
        let msg = Msg::parse(br#"["1","5","lvu:e1","phx_join",{}]"#).unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert_eq!(
            frames,
            vec![r#"["1","5","lvu:e1","phx_reply",{"response":{},"status":"ok"}]"#.to_string()]
        );
        assert_eq!(ts.session.socket.active_upload_topic, "lvu:e1");
    }

    fn announce_upload(ts: &mut TestSession) -> (String, String) {
        ts.session.socket.allow_upload(
            "photos",
            crate::live::UploadConstraints {
                accept: vec!["text/plain".to_string()],
                ..Default::default()
            },
        );
        let uc = ts.session.socket.upload_configs.get_mut("photos").unwrap();
        uc.add_entries(&[json!({
            "ref": "e1", "name": "cat.txt", "size": 6, "type": "text/plain",
        })]);
        assert!(uc.entries[0].valid);
        let config_ref = uc.ref_id.clone();
        let uuid = uc.entries[0].uuid.clone();
        ts.session.socket.active_upload_ref = config_ref.clone();
        (config_ref, uuid)
    }

    #[tokio::test]
    async fn test_allow_upload_echoes_constraints_and_entries() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        ts.session
            .socket
            .allow_upload("photos", Default::default());
        let config_ref = ts.session.socket.upload_configs["photos"].ref_id.clone();

        let frame = format!(
            r#"["1","3","lv:phx-test","allow_upload",{{"ref":{config_ref:?},"entries":[{{"ref":"e1","name":"cat.jpg","size":3,"type":"image/jpeg"}}]}}]"#
        );
        let msg = Msg::parse(frame.as_bytes()).unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""config":{"accept":[],"max_entries":10,"max_file_size":10485760,"chunk_size":65536}"#), "{}", frames[0]);
        assert!(frames[0].contains(r#""entries":[{"ref":"e1","name":"cat.jpg","size":3,"type":"image/jpeg"}]"#), "{}", frames[0]);
        assert_eq!(ts.session.socket.active_upload_ref, config_ref);
    }

    #[tokio::test]
    async fn test_progress_updates_entry_and_done_flag() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let (config_ref, _) = announce_upload(&mut ts);

        let frame = format!(
            r#"["1","4","lv:phx-test","progress",{{"ref":{config_ref:?},"entry_ref":"e1","progress":100}}]"#
        );
        let msg = Msg::parse(frame.as_bytes()).unwrap();
        ts.session.dispatch(&msg).await.unwrap();
        let entry = &ts.session.socket.upload_configs["photos"].entries[0];
        assert_eq!(entry.progress, 100);
        assert!(entry.done);
    }

    #[tokio::test]
    async fn test_progress_for_missing_entry_is_an_error() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let (config_ref, _) = announce_upload(&mut ts);
        let frame = format!(
            r#"["1","4","lv:phx-test","progress",{{"ref":{config_ref:?},"entry_ref":"ghost","progress":10}}]"#
        );
        let msg = Msg::parse(frame.as_bytes()).unwrap();
        let err = ts.session.dispatch(&msg).await.unwrap_err();
        assert!(matches!(
            err,
            ViewError::Upload(UploadError::NoEntry(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_chunks_stage_to_disk() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let (config_ref, uuid) = announce_upload(&mut ts);

        let chunk1 = UploadMsg {
            join_ref: "1".to_string(),
            msg_ref: "6".to_string(),
            topic: "lvu:e1".to_string(),
            event: "chunk".to_string(),
            payload: b"hello ".to_vec(),
        };
        let frames = ts.session.handle_upload(&chunk1).await.unwrap();
        // first chunk: empty diff on the live topic, then the upload ack
        assert_eq!(
            frames,
            vec![
                r#"["1",null,"lv:phx-test","diff",{}]"#.to_string(),
                r#"["1","6","lvu:e1","phx_reply",{"response":{},"status":"ok"}]"#.to_string(),
            ]
        );

        ts.session.socket.upload_configs["photos"].entries[0].progress = 50;
        let chunk2 = UploadMsg {
            payload: b"world".to_vec(),
            msg_ref: "7".to_string(),
            ..chunk1.clone()
        };
        let frames = ts.session.handle_upload(&chunk2).await.unwrap();
        assert_eq!(
            frames,
            vec![r#"["1","7","lvu:e1","phx_reply",{"response":{},"status":"ok"}]"#.to_string()]
        );

        let staged = staging_dir(&config_ref).join(&uuid);
        let contents = std::fs::read(&staged).unwrap();
        assert_eq!(contents, b"hello world");
        std::fs::remove_dir_all(staging_dir(&config_ref)).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let (config_ref, _) = announce_upload(&mut ts);
        let frame = format!(
            r#"["1","8","lv:phx-test","cancel",{{"ref":{config_ref:?},"entry_ref":"e1"}}]"#
        );
        let msg = Msg::parse(frame.as_bytes()).unwrap();
        ts.session.dispatch(&msg).await.unwrap();
        assert!(ts.session.socket.upload_configs["photos"].entries.is_empty());
    }

    #[tokio::test]
    async fn test_leave_closes_view_without_reply() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let msg = Msg::parse(br#"["1","9","lv:phx-test","phx_leave",{}]"#).unwrap();
        let frames = ts.session.dispatch(&msg).await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_pushed_events_ride_the_next_diff() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let mut data = Values::new();
        data.add("id", "42");
        ts.session.socket.push_event(&Event::new("highlight", data));
        ts.session.socket.page_title("Two");
        let frames = ts.session.dispatch(&event_msg("increment")).await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"["1","2","lv:phx-test","phx_reply",{"response":{"diff":{"0":"1","t":"Two","e":[["highlight",{"id":"42"}]]}},"status":"ok"}]"#
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_token_bucket_paces_and_refills() {
        let mut bucket = TokenBucket::new(1000.0, 2.0);
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.allow(), "bucket should refill over time");
    }

    #[tokio::test]
    async fn test_unknown_event_kind_is_an_error() {
        let mut ts = test_session(counter_config());
        join(&mut ts).await;
        let msg = Msg::parse(br#"["1","2","lv:phx-test","mystery",{}]"#).unwrap();
        assert!(ts.session.dispatch(&msg).await.is_err());
    }
}
