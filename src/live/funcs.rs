//! HTML tag helpers for view and layout dots.
//!
//! These render the snippets the client-side library expects. Their
//! output is raw HTML; embed it in templates with `{{raw …}}`.

use crate::live::event::Values;
use crate::live::uploads::{UploadConfig, UploadEntry};
use crate::live::view::PageTitleConfig;
use crate::template::html_escape;

/// A title tag that the client can update from pushed titles.
pub fn title_tag(ptc: &PageTitleConfig) -> String {
    let mut out = String::from("<title");
    if !ptc.prefix.is_empty() {
        out.push_str(&format!(" data-prefix=\"{}\"", html_escape(&ptc.prefix)));
    }
    if !ptc.suffix.is_empty() {
        out.push_str(&format!(" data-suffix=\"{}\"", html_escape(&ptc.suffix)));
    }
    out.push('>');
    out.push_str(&html_escape(&format!(
        "{}{}{}",
        ptc.prefix, ptc.title, ptc.suffix
    )));
    out.push_str("</title>");
    out
}

/// Link kind for [`nav_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavLinkKind {
    /// Patch the current view in place.
    Patch,
    /// Navigate to another live view without a page refresh.
    Navigate,
}

/// A live navigation anchor.
pub fn nav_link(kind: NavLinkKind, path: &str, params: &Values, text: &str) -> String {
    let mut href = path.to_string();
    if !params.is_empty() {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (k, vs) in params.iter() {
            for v in vs {
                query.append_pair(k, v);
            }
        }
        href.push('?');
        href.push_str(&query.finish());
    }
    let link_type = match kind {
        NavLinkKind::Patch => "patch",
        NavLinkKind::Navigate => "redirect",
    };
    format!(
        "<a data-phx-link=\"{}\" data-phx-link-state=\"push\" href=\"{}\">{}</a>",
        link_type,
        html_escape(&href),
        html_escape(text)
    )
}

/// The container div that the client attaches the live view to.
/// The inner HTML is the dead-rendered view.
pub fn live_view_container(live_view_id: &str, inner: &str) -> String {
    format!(
        "<div data-phx-main=\"true\" data-phx-session=\"\" data-phx-static=\"\" id=\"phx-{}\">{}</div>",
        html_escape(live_view_id),
        inner
    )
}

/// A file input wired to an upload config.
pub fn file_input_tag(uc: &UploadConfig) -> String {
    let mut active = Vec::new();
    let mut done = Vec::new();
    let mut preflighted = Vec::new();
    for e in &uc.entries {
        active.push(e.ref_id.as_str());
        if e.done {
            done.push(e.ref_id.as_str());
        }
        if e.preflighted {
            preflighted.push(e.ref_id.as_str());
        }
    }
    let effective = uc.constraints.effective();
    format!(
        concat!(
            "<input id=\"{upload_ref}\" type=\"file\" name=\"{name}\" accept=\"{accept}\"",
            " data-phx-active-refs=\"{active}\" data-phx-done-refs=\"{done}\"",
            " data-phx-preflighted-refs=\"{preflighted}\" data-phx-update=\"ignore\"",
            " data-phx-upload-ref=\"{upload_ref}\" phx-hook=\"Phoenix.LiveFileUpload\"{multiple} />"
        ),
        upload_ref = html_escape(&uc.ref_id),
        name = html_escape(&uc.name),
        accept = html_escape(&effective.accept.join(",")),
        active = active.join(","),
        done = done.join(","),
        preflighted = preflighted.join(","),
        multiple = if effective.max_entries > 1 { " multiple" } else { "" },
    )
}

/// An image preview bound to an upload entry.
pub fn img_preview_tag(entry: &UploadEntry) -> String {
    format!(
        concat!(
            "<img id=\"phx-preview-{entry_ref}\" data-phx-upload-ref=\"{upload_ref}\"",
            " data-phx-entry-ref=\"{entry_ref}\" data-phx-hook=\"Phoenix.LiveImgPreview\"",
            " data-phx-update=\"ignore\" />"
        ),
        entry_ref = html_escape(&entry.ref_id),
        upload_ref = html_escape(&entry.upload_ref),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::uploads::UploadConstraints;

    #[test]
    fn test_title_tag_with_prefix_and_suffix() {
        let ptc = PageTitleConfig {
            title: "Home".to_string(),
            prefix: "App - ".to_string(),
            suffix: " | v2".to_string(),
        };
        assert_eq!(
            title_tag(&ptc),
            "<title data-prefix=\"App - \" data-suffix=\" | v2\">App - Home | v2</title>"
        );
    }

    #[test]
    fn test_title_tag_bare() {
        let ptc = PageTitleConfig {
            title: "Home".to_string(),
            ..PageTitleConfig::default()
        };
        assert_eq!(title_tag(&ptc), "<title>Home</title>");
    }

    #[test]
    fn test_nav_link_patch_with_params() {
        let mut params = Values::new();
        params.add("page", "2");
        assert_eq!(
            nav_link(NavLinkKind::Patch, "/items", &params, "next"),
            "<a data-phx-link=\"patch\" data-phx-link-state=\"push\" href=\"/items?page=2\">next</a>"
        );
    }

    #[test]
    fn test_nav_link_navigate_maps_to_redirect() {
        let link = nav_link(NavLinkKind::Navigate, "/away", &Values::new(), "go");
        assert!(link.contains("data-phx-link=\"redirect\""));
        assert!(link.contains("href=\"/away\""));
    }

    #[test]
    fn test_live_view_container() {
        let div = live_view_container("abc123", "<p>x</p>");
        assert_eq!(
            div,
            "<div data-phx-main=\"true\" data-phx-session=\"\" data-phx-static=\"\" id=\"phx-abc123\"><p>x</p></div>"
        );
    }

    #[test]
    fn test_file_input_tag_reflects_entry_state() {
        let mut uc = UploadConfig::new(
            "photos",
            UploadConstraints {
                accept: vec![".jpg".to_string()],
                max_entries: 3,
                ..UploadConstraints::default()
            },
        );
        uc.add_entries(&[
            serde_json::json!({"ref": "e1", "name": "a.jpg", "size": 1, "type": "image/jpeg"}),
            serde_json::json!({"ref": "e2", "name": "b.jpg", "size": 1, "type": "image/jpeg"}),
        ]);
        uc.entries[0].done = true;
        let tag = file_input_tag(&uc);
        assert!(tag.contains("data-phx-active-refs=\"e1,e2\""), "{tag}");
        assert!(tag.contains("data-phx-done-refs=\"e1\""), "{tag}");
        assert!(tag.contains("accept=\".jpg\""), "{tag}");
        assert!(tag.contains(" multiple"), "{tag}");
        assert!(tag.contains(&format!("data-phx-upload-ref=\"{}\"", uc.ref_id)), "{tag}");
    }

    #[test]
    fn test_img_preview_tag() {
        let entry = UploadEntry {
            ref_id: "e1".to_string(),
            upload_ref: "phx-u".to_string(),
            ..UploadEntry::default()
        };
        assert_eq!(
            img_preview_tag(&entry),
            "<img id=\"phx-preview-e1\" data-phx-upload-ref=\"phx-u\" data-phx-entry-ref=\"e1\" data-phx-hook=\"Phoenix.LiveImgPreview\" data-phx-update=\"ignore\" />"
        );
    }
}
