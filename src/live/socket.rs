//! The session handle passed to view callbacks.
//!
//! A [`Socket`] exposes everything a view may do besides rendering:
//! register uploads, consume staged files, update the page title, queue
//! client events, set flash, and request navigation. It is owned by the
//! session; view callbacks receive it as `&mut Socket` and must not
//! assume anything happens until the callback returns.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tokio::sync::mpsc;
use url::Url;

use crate::error::UploadError;
use crate::live::event::{Event, Info, Values};
use crate::live::uploads::{UploadConfig, UploadConstraints, UploadEntry};
use crate::UPLOAD_STAGING_PREFIX;

/// Where chunks for one upload config are staged.
pub(crate) fn staging_dir(upload_ref: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{UPLOAD_STAGING_PREFIX}{upload_ref}"))
}

/// Server-side navigation queued by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NavCommand {
    pub kind: NavCommandKind,
    pub path: String,
    pub params: Values,
    pub replace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NavCommandKind {
    Patch,
    Redirect,
}

/// Cloneable handle for posting info events to a session from
/// background tasks.
#[derive(Debug, Clone)]
pub struct InfoSender(mpsc::UnboundedSender<Info>);

impl InfoSender {
    /// Post an info event. Returns false if the session is gone.
    pub fn send(&self, info: Info) -> bool {
        self.0.send(info).is_ok()
    }
}

/// Per-connection state reachable from view callbacks.
pub struct Socket {
    pub(crate) url: Url,
    pub(crate) csrf_token: String,
    pub(crate) upload_configs: IndexMap<String, UploadConfig>,
    pub(crate) active_upload_ref: String,
    pub(crate) active_upload_topic: String,
    pub(crate) title: Option<String>,
    pub(crate) pending_events: Vec<String>,
    pub(crate) redirect: Option<String>,
    pub(crate) flash: IndexMap<String, String>,
    pub(crate) info_tx: mpsc::UnboundedSender<Info>,
    pub(crate) nav_tx: mpsc::UnboundedSender<NavCommand>,
}

impl Socket {
    pub(crate) fn new(
        url: Url,
        csrf_token: String,
        info_tx: mpsc::UnboundedSender<Info>,
        nav_tx: mpsc::UnboundedSender<NavCommand>,
    ) -> Self {
        Socket {
            url,
            csrf_token,
            upload_configs: IndexMap::new(),
            active_upload_ref: String::new(),
            active_upload_topic: String::new(),
            title: None,
            pending_events: Vec::new(),
            redirect: None,
            flash: IndexMap::new(),
            info_tx,
            nav_tx,
        }
    }

    /// A socket with no live session behind it, for the HTTP dead
    /// render. Queued info and navigation go nowhere.
    pub(crate) fn detached(url: Url, csrf_token: String) -> Self {
        let (info_tx, _) = mpsc::unbounded_channel();
        let (nav_tx, _) = mpsc::unbounded_channel();
        Self::new(url, csrf_token, info_tx, nav_tx)
    }

    /// The URL the view is currently mounted at.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Register an upload config under `name`, overwriting any previous
    /// config with that name.
    pub fn allow_upload(&mut self, name: &str, constraints: UploadConstraints) {
        self.upload_configs
            .insert(name.to_string(), UploadConfig::new(name, constraints));
    }

    /// Cancel the upload of one entry by config name and entry ref.
    pub fn cancel_upload(&mut self, name: &str, entry_ref: &str) {
        if let Some(uc) = self.upload_configs.get_mut(name) {
            uc.remove_entry(entry_ref);
        }
    }

    /// Consume the staged files of a config, yielding each entry's path
    /// to `f`, then clear the entries.
    ///
    /// Every entry must be fully uploaded; consuming earlier is a fatal
    /// view error.
    pub fn consume_uploaded_entries<T>(
        &mut self,
        name: &str,
        mut f: impl FnMut(&Path, &UploadEntry) -> T,
    ) -> Result<Vec<T>, UploadError> {
        let uc = self
            .upload_configs
            .get_mut(name)
            .ok_or_else(|| UploadError::NoConfigNamed(name.to_string()))?;
        let dir = staging_dir(&self.active_upload_ref);
        let mut out = Vec::with_capacity(uc.entries.len());
        for entry in &uc.entries {
            if !entry.done {
                return Err(UploadError::EntryNotDone);
            }
            out.push(f(&dir.join(&entry.uuid), entry));
        }
        uc.entries.clear();
        Ok(out)
    }

    /// Partition a config's entries into (completed, in progress).
    /// Unlike [`Self::consume_uploaded_entries`] this never fails.
    pub fn uploaded_entries(&self, name: &str) -> (Vec<UploadEntry>, Vec<UploadEntry>) {
        let Some(uc) = self.upload_configs.get(name) else {
            return (Vec::new(), Vec::new());
        };
        uc.entries.iter().cloned().partition(|e| e.done)
    }

    /// Look at a registered upload config.
    pub fn upload_config(&self, name: &str) -> Option<&UploadConfig> {
        self.upload_configs.get(name)
    }

    /// Update the page title pushed with the next render.
    pub fn page_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Queue an event to push to the client atomically with the next
    /// diff.
    pub fn push_event(&mut self, event: &Event) {
        match event.to_json() {
            Ok(envelope) => self.pending_events.push(envelope),
            Err(err) => tracing::warn!(?err, "dropping unencodable pushed event"),
        }
    }

    /// Ask the client to navigate away. Preempts the next reply.
    pub fn redirect(&mut self, url: impl Into<String>) {
        self.redirect = Some(url.into());
    }

    /// Queue a server-initiated live patch to `path` with `params`.
    pub fn push_patch(&mut self, path: &str, params: Values, replace: bool) {
        let _ = self.nav_tx.send(NavCommand {
            kind: NavCommandKind::Patch,
            path: path.to_string(),
            params,
            replace,
        });
    }

    /// Queue a server-initiated live redirect to `path` with `params`.
    pub fn push_redirect(&mut self, path: &str, params: Values, replace: bool) {
        let _ = self.nav_tx.send(NavCommand {
            kind: NavCommandKind::Redirect,
            path: path.to_string(),
            params,
            replace,
        });
    }

    /// Set a flash message surfaced via `.Meta.Flash`.
    pub fn put_flash(&mut self, key: &str, message: &str) {
        self.flash.insert(key.to_string(), message.to_string());
    }

    /// Clear one flash key, or all of them when `key` is `None`.
    pub fn clear_flash(&mut self, key: Option<&str>) {
        match key {
            Some(k) => {
                self.flash.shift_remove(k);
            }
            None => self.flash.clear(),
        }
    }

    /// Post an info event to this session from within a callback.
    pub fn send_info(&self, info: Info) {
        let _ = self.info_tx.send(info);
    }

    /// A handle for posting info events from outside the session task.
    pub fn info_sender(&self) -> InfoSender {
        InfoSender(self.info_tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn socket() -> Socket {
        Socket::detached(Url::parse("http://localhost/x").unwrap(), "tok".to_string())
    }

    fn announce(s: &mut Socket, name: &str, refs: &[&str]) {
        s.allow_upload(name, UploadConstraints::default());
        let entries: Vec<_> = refs
            .iter()
            .map(|r| json!({"ref": r, "name": format!("{r}.txt"), "size": 1, "type": "text/plain"}))
            .collect();
        if let Some(uc) = s.upload_configs.get_mut(name) {
            uc.add_entries(&entries);
        }
    }

    #[test]
    fn test_allow_upload_registers_config() {
        let mut s = socket();
        s.allow_upload("avatar", UploadConstraints::default());
        assert!(s.upload_config("avatar").is_some());
    }

    #[test]
    fn test_consume_requires_done_entries() {
        let mut s = socket();
        announce(&mut s, "docs", &["e1"]);
        let err = s.consume_uploaded_entries("docs", |_, _| ()).unwrap_err();
        assert!(matches!(err, UploadError::EntryNotDone));
    }

    #[test]
    fn test_consume_yields_paths_and_clears() {
        let mut s = socket();
        s.active_upload_ref = "phx-test".to_string();
        announce(&mut s, "docs", &["e1", "e2"]);
        for e in &mut s.upload_configs["docs"].entries {
            e.done = true;
        }
        let uuids: Vec<String> = s.upload_configs["docs"]
            .entries
            .iter()
            .map(|e| e.uuid.clone())
            .collect();

        let paths = s
            .consume_uploaded_entries("docs", |path, entry| {
                assert!(entry.done);
                path.to_path_buf()
            })
            .unwrap();
        assert_eq!(paths.len(), 2);
        for (path, uuid) in paths.iter().zip(&uuids) {
            assert!(path.ends_with(uuid));
            assert!(path.starts_with(std::env::temp_dir()));
        }
        assert!(s.upload_configs["docs"].entries.is_empty());
    }

    #[test]
    fn test_consume_unknown_config_errors() {
        let mut s = socket();
        assert!(matches!(
            s.consume_uploaded_entries("nope", |_, _| ()),
            Err(UploadError::NoConfigNamed(_))
        ));
    }

    #[test]
    fn test_uploaded_entries_partition() {
        let mut s = socket();
        announce(&mut s, "docs", &["e1", "e2", "e3"]);
        s.upload_configs["docs"].entries[1].done = true;
        let (done, pending) = s.uploaded_entries("docs");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].ref_id, "e2");
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_flash_round_trip() {
        let mut s = socket();
        s.put_flash("info", "saved");
        s.put_flash("error", "boom");
        s.clear_flash(Some("info"));
        assert!(!s.flash.contains_key("info"));
        assert!(s.flash.contains_key("error"));
        s.clear_flash(None);
        assert!(s.flash.is_empty());
    }
}
