//! Upload configurations and entries.
//!
//! A view that accepts files registers an [`UploadConfig`] under a name
//! of its choosing. The client announces files through the allow-upload
//! handshake, streams chunks over a binary sidecar channel, and the view
//! consumes the staged files at form-submit time.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;
/// Default maximum entries per config.
pub const DEFAULT_MAX_ENTRIES: usize = 10;
/// Default maximum file size: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// File constraints for an upload config. Zero fields take defaults
/// when the effective constraints are computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConstraints {
    /// Unique file type specifiers that can be uploaded: extensions
    /// (".jpg") or MIME types ("image/jpeg").
    #[serde(default)]
    pub accept: Vec<String>,
    /// Maximum number of files that can be uploaded at once.
    #[serde(default)]
    pub max_entries: usize,
    /// Maximum size of each file in bytes.
    #[serde(default)]
    pub max_file_size: u64,
    /// Size of each uploaded chunk in bytes.
    #[serde(default)]
    pub chunk_size: u64,
}

impl UploadConstraints {
    /// The constraints with defaults applied to zero fields, as echoed
    /// to the client in the allow-upload reply.
    pub fn effective(&self) -> UploadConstraints {
        UploadConstraints {
            accept: self.accept.clone(),
            max_entries: if self.max_entries > 0 {
                self.max_entries
            } else {
                DEFAULT_MAX_ENTRIES
            },
            max_file_size: if self.max_file_size > 0 {
                self.max_file_size
            } else {
                DEFAULT_MAX_FILE_SIZE
            },
            chunk_size: if self.chunk_size > 0 {
                self.chunk_size
            } else {
                DEFAULT_CHUNK_SIZE
            },
        }
    }
}

/// A file and related metadata selected for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadEntry {
    /// Whether the file selection has been cancelled.
    pub cancelled: bool,
    /// When the file was last modified on the client's file system.
    pub last_modified: i64,
    /// File name on the client's file system.
    pub name: String,
    /// File size in bytes reported by the client.
    pub size: i64,
    /// MIME type reported by the client.
    #[serde(rename = "Type")]
    pub mime: String,
    /// True once the file has been fully uploaded.
    pub done: bool,
    /// True if the file has been auto-uploaded.
    pub preflighted: bool,
    /// Integer percentage of the file uploaded so far.
    pub progress: i64,
    /// The client-chosen ref of this entry.
    #[serde(rename = "Ref")]
    pub ref_id: String,
    /// The ref of the config this entry belongs to.
    pub upload_ref: String,
    /// Server-assigned id naming the staged file.
    #[serde(rename = "UUID")]
    pub uuid: String,
    /// True if the entry passed validation.
    pub valid: bool,
    /// Errors that occurred during selection or upload.
    pub errors: Vec<String>,
}

/// An entry as announced by the client in the allow-upload handshake.
#[derive(Debug, Clone, Default, Deserialize)]
struct AllowEntry {
    #[serde(default)]
    last_modified: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default, rename = "type")]
    mime: String,
    #[serde(default, rename = "ref")]
    ref_id: String,
}

/// Configuration and entry state for one named upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadConfig {
    /// The name the view registered this config under.
    pub name: String,
    /// Entries currently selected for upload.
    pub entries: Vec<UploadEntry>,
    /// Stable instance ref ("phx-" + UUID).
    pub ref_id: String,
    /// Errors at the config level (e.g. too many entries).
    pub errors: Vec<String>,
    /// Upload automatically on selection.
    pub auto_upload: bool,
    pub constraints: UploadConstraints,
}

impl UploadConfig {
    pub fn new(name: &str, constraints: UploadConstraints) -> Self {
        UploadConfig {
            name: name.to_string(),
            ref_id: format!("phx-{}", Uuid::new_v4()),
            constraints,
            ..UploadConfig::default()
        }
    }

    fn validate_type(&self, mime: &str) -> bool {
        let effective = self.constraints.effective();
        for t in &effective.accept {
            // the accept list may hold extensions or mime types
            if t == mime {
                return true;
            }
            for ext in mime_guess::get_mime_extensions_str(mime).unwrap_or(&[]) {
                if t == &format!(".{ext}") {
                    return true;
                }
            }
        }
        false
    }

    fn validate_size(&self, size: i64) -> bool {
        size >= 0 && size as u64 <= self.constraints.effective().max_file_size
    }

    fn validate_entry(&self, entry: &mut UploadEntry) -> bool {
        if entry.cancelled {
            return false;
        }
        if !self.validate_size(entry.size) {
            entry.errors.push(format!(
                "file size exceeds max of {}",
                self.constraints.effective().max_file_size
            ));
            return false;
        }
        if !self.validate_type(&entry.mime) {
            entry
                .errors
                .push(format!("file type {} is not allowed", entry.mime));
            return false;
        }
        true
    }

    /// Replace the config's entries with the client-announced set,
    /// validating each one and the config as a whole.
    pub fn add_entries(&mut self, entries: &[Value]) {
        let mut out = Vec::with_capacity(entries.len());
        for raw in entries {
            // a malformed entry still lands in the list so validation
            // can attach an error the client will see
            let parsed: AllowEntry = serde_json::from_value(raw.clone()).unwrap_or_default();
            let mut entry = UploadEntry {
                last_modified: parsed.last_modified,
                name: parsed.name,
                size: parsed.size,
                mime: parsed.mime,
                ref_id: parsed.ref_id,
                upload_ref: self.ref_id.clone(),
                uuid: Uuid::new_v4().to_string(),
                ..UploadEntry::default()
            };
            entry.valid = self.validate_entry(&mut entry);
            out.push(entry);
        }
        let max = self.constraints.effective().max_entries;
        if out.len() > max {
            self.errors.push(format!("max entries exceeded: {max}"));
        }
        self.entries = out;
    }

    /// Remove the entry with the given ref, if present.
    pub fn remove_entry(&mut self, ref_id: &str) {
        self.entries.retain(|e| e.ref_id != ref_id);
    }

    pub fn entry(&self, ref_id: &str) -> Option<&UploadEntry> {
        self.entries.iter().find(|e| e.ref_id == ref_id)
    }

    pub fn entry_mut(&mut self, ref_id: &str) -> Option<&mut UploadEntry> {
        self.entries.iter_mut().find(|e| e.ref_id == ref_id)
    }
}

// The dot form templates see: PascalCase keys, constraints inlined.
impl Serialize for UploadConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let effective = self.constraints.effective();
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Name", &self.name)?;
        map.serialize_entry("Entries", &self.entries)?;
        map.serialize_entry("Ref", &self.ref_id)?;
        map.serialize_entry("Errors", &self.errors)?;
        map.serialize_entry("AutoUpload", &self.auto_upload)?;
        map.serialize_entry("Accept", &effective.accept)?;
        map.serialize_entry("MaxEntries", &effective.max_entries)?;
        map.serialize_entry("MaxFileSize", &effective.max_file_size)?;
        map.serialize_entry("ChunkSize", &effective.chunk_size)?;
        map.end()
    }
}
