//! Data model shared across the extraction core.
//!
//! Mirrors the shape of `original_source/src/extractor/terabox.py`'s
//! `VideoInfo` dataclass and `token_manager.py`'s `SessionData`, split into
//! the immutable/mutable halves the Rust concurrency model wants.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

/// Result of resolving a Host share URL. Produced only by
/// [`crate::domain::parse`] — a `ShareLocator` never exists for an
/// unrecognized URL or an empty surl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLocator {
    pub surl: String,
    pub canonical_url: String,
}

/// Mutable, versioned session artifacts. Replaced wholesale on refresh —
/// never mutated through a shared pointer except for the single permitted
/// cookie-folding path (see [`crate::session::SessionManager`]).
#[derive(Debug, Clone)]
pub struct SessionState {
    pub cookies: HashMap<String, String>,
    pub user_agent: String,
    pub js_token: Option<String>,
    pub bdstoken: Option<String>,
    pub csrf_token: Option<String>,
    pub logid: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl SessionState {
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }

    /// Serialize cookies as a `Cookie:` header value, `name=value; name=value`.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Per-extraction working set assembled by pipeline Stage 1.
///
/// `shareid`/`uk` may be absent after Stage 1 — Stage 2's `/share/list`
/// fallback exists precisely to recover them from the server.
#[derive(Debug, Clone, Default)]
pub struct ShareContext {
    pub surl: String,
    pub shareid: Option<String>,
    pub uk: Option<String>,
    pub sign: Option<String>,
    pub timestamp: Option<i64>,
    pub title: Option<String>,
    pub file_list: Option<Vec<FileEntry>>,
}

/// One element of a share's file list. Only the fields the extraction
/// pipeline inspects are modeled; anything else on the wire is preserved
/// opaquely in `raw`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileEntry {
    pub fs_id: String,
    pub filename: String,
    pub size: u64,
    pub category: i64,
    pub mime_type: Option<String>,
    pub thumbnail: Option<String>,
    pub dlink: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

impl FileEntry {
    /// Parse one `file_list`/`list` element from the Host's JSON shape.
    ///
    /// Tolerant of both `server_filename` and `filename` keys, and of
    /// `thumbs.url3` vs. a bare `thumb` string, matching the two shapes seen
    /// across `/api/shorturlinfo`, `/share/list`, and scraped page bundles.
    pub fn from_value(v: &Value) -> Self {
        let filename = v
            .get("server_filename")
            .or_else(|| v.get("filename"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let fs_id = v
            .get("fs_id")
            .map(value_to_numeric_string)
            .unwrap_or_default();

        let size = v
            .get("size")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| v.get("size").and_then(Value::as_u64))
            .unwrap_or(0);

        let category = v.get("category").and_then(Value::as_i64).unwrap_or(0);

        let mime_type = v
            .get("mime_type")
            .or_else(|| v.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let thumbnail = v
            .get("thumbs")
            .and_then(|t| t.get("url3"))
            .or_else(|| v.get("thumb"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let dlink = v.get("dlink").and_then(Value::as_str).map(str::to_string);

        FileEntry {
            fs_id,
            filename,
            size,
            category,
            mime_type,
            thumbnail,
            dlink,
            raw: v.clone(),
        }
    }
}

fn value_to_numeric_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// One alternative playable URL discovered while walking the Stage 4 ladder.
#[derive(Debug, Clone, Serialize)]
pub struct QualityOption {
    pub label: String,
    pub url: String,
}

/// The extraction result returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub filename: String,
    pub size: u64,
    pub size_formatted: String,
    pub thumbnail: Option<String>,

    pub fs_id: String,
    pub share_id: String,
    pub uk: String,
    pub surl: String,

    pub stream_url: String,
    pub download_url: Option<String>,
    pub dlink: Option<String>,

    pub duration: u64,
    pub resolution: Option<String>,
    pub quality_options: Vec<QualityOption>,

    #[serde(skip)]
    pub raw_data: Value,
}

/// Two-decimal IEC-unit size formatting (`B, KB, MB, GB, TB, PB`), matching
/// `VideoInfo.format_size` in `original_source`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// API-layer error: an integer `errno`, a human message, and the raw body
/// for diagnostics. `benign_skip` marks an `errno == 2` from the streaming
/// endpoint, which the pipeline treats as "this stream type doesn't apply"
/// rather than a session-invalid signal (see [`crate::api_client::EndpointKind`]).
#[derive(Debug, Clone)]
pub struct HostError {
    pub errno: i64,
    pub message: String,
    pub body: Value,
    pub benign_skip: bool,
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host error {}: {}", self.errno, self.message)
    }
}

impl std::error::Error for HostError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_boundaries() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1536), "1.50 KB");
    }

    #[test]
    fn file_entry_parses_server_filename_and_thumbs() {
        let v = serde_json::json!({
            "fs_id": 9,
            "server_filename": "a.mp4",
            "size": 2048,
            "category": 1,
            "thumbs": {"url3": "https://example/thumb.jpg"},
        });
        let entry = FileEntry::from_value(&v);
        assert_eq!(entry.fs_id, "9");
        assert_eq!(entry.filename, "a.mp4");
        assert_eq!(entry.size, 2048);
        assert_eq!(entry.category, 1);
        assert_eq!(entry.thumbnail.as_deref(), Some("https://example/thumb.jpg"));
    }

    #[test]
    fn file_entry_falls_back_to_filename_and_bare_thumb() {
        let v = serde_json::json!({
            "fs_id": "42",
            "filename": "b.mkv",
            "size": "100",
            "thumb": "https://example/b.jpg",
        });
        let entry = FileEntry::from_value(&v);
        assert_eq!(entry.fs_id, "42");
        assert_eq!(entry.filename, "b.mkv");
        assert_eq!(entry.size, 100);
        assert_eq!(entry.thumbnail.as_deref(), Some("https://example/b.jpg"));
    }

    #[test]
    fn session_state_cookie_header_and_expiry() {
        let mut cookies = HashMap::new();
        cookies.insert("lang".to_string(), "en".to_string());
        let state = SessionState {
            cookies,
            user_agent: "ua".to_string(),
            js_token: None,
            bdstoken: None,
            csrf_token: None,
            logid: "1".to_string(),
            created_at: now_unix(),
            expires_at: now_unix() + 3600,
        };
        assert_eq!(state.cookie_header(), "lang=en");
        assert!(!state.is_expired());
    }
}
