//! Extraction Pipeline — orchestrates the four-stage flow from a raw URL to
//! a [`MediaInfo`]: share discovery, file listing, file selection, and the
//! stream-URL ladder.
//!
//! Grounded on `original_source/src/extractor/terabox.py`'s
//! `TeraboxExtractor`; the scraping regex tables and ladder rung order are
//! reproduced verbatim.

use std::sync::LazyLock;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api_client::{ApiClient, EndpointKind};
use crate::core::types::{format_size, now_unix, FileEntry, MediaInfo, QualityOption, ShareContext};
use crate::domain;
use crate::error::ExtractError;
use crate::session::SessionManager;

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts",
];

const STREAM_TYPES: &[&str] = &["M3U8_AUTO_720", "M3U8_AUTO_480", "M3U8_FLV_264_480", "mp4"];

/// Embedded-bundle patterns tried, in order, against a scraped share page.
/// Each captures a JSON object literal; the first that parses wins.
static SHARE_BUNDLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)<script>\s*window\.locals\s*=\s*(\{.+?\});\s*</script>",
        r"(?s)__locals\s*=\s*(\{.+?\})",
        r#"data-share-info="([^"]+)""#,
        r"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.+?\});",
        r"(?s)var\s+share(?:Info|Data)\s*=\s*(\{.+?\});",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static share-bundle pattern is valid regex"))
    .collect()
});

/// Per-field regex fallbacks used when the embedded bundle is missing or a
/// field didn't survive flattening.
static FIELD_PATTERNS: LazyLock<[(&'static str, Vec<Regex>); 4]> = LazyLock::new(|| {
    [
        (
            "shareid",
            vec![
                Regex::new(r#""shareid"\s*[=:]\s*"?(\d+)"?"#).unwrap(),
                Regex::new(r#"share_id["\s]*[=:]\s*"?(\d+)"?"#).unwrap(),
                Regex::new(r"shareid=(\d+)").unwrap(),
            ],
        ),
        (
            "uk",
            vec![
                Regex::new(r#""uk"\s*[=:]\s*"?(\d+)"?"#).unwrap(),
                Regex::new(r#"user_key["\s]*[=:]\s*"?(\d+)"?"#).unwrap(),
                Regex::new(r"uk=(\d+)").unwrap(),
            ],
        ),
        (
            "sign",
            vec![
                Regex::new(r#""sign"\s*[=:]\s*"([^"']+)""#).unwrap(),
                Regex::new(r"sign=([a-zA-Z0-9]+)").unwrap(),
            ],
        ),
        (
            "timestamp",
            vec![
                Regex::new(r#""timestamp"\s*[=:]\s*(\d+)"#).unwrap(),
                Regex::new(r"timestamp=(\d+)").unwrap(),
            ],
        ),
    ]
});

static FILE_LIST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r#"(?s)"file_list"\s*:\s*(\[.+?\])"#, r#"(?s)"list"\s*:\s*(\[.+?\])"#]
        .iter()
        .map(|p| Regex::new(p).expect("static file-list pattern is valid regex"))
        .collect()
});

pub struct ExtractionPipeline {
    api: ApiClient,
}

impl ExtractionPipeline {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn extract(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        info!(url, "starting extraction");

        let locator = domain::parse(url).ok_or_else(|| ExtractError::InvalidUrl(url.to_string()))?;
        let surl = locator.surl;
        debug!(surl, "resolved surl");

        let mut ctx = self.fetch_share_info(&surl).await?;

        let file_list = self.get_file_list(&mut ctx).await?;
        if file_list.is_empty() {
            return Err(ExtractError::NoFilesFound);
        }

        let file = select_video_file(&file_list);

        self.resolve_stream_url(&ctx, file).await
    }

    /// Stage 1 — Share discovery.
    async fn fetch_share_info(&self, surl: &str) -> Result<ShareContext, ExtractError> {
        let params = [("shorturl", surl), ("root", "1")];
        match self.api.get("/api/shorturlinfo", &params, None, EndpointKind::Other).await {
            Ok(body) => {
                let mut ctx = flatten_share_data(&body);
                ctx.surl = surl.to_string();
                return Ok(ctx);
            }
            Err(e) => warn!(error = %e, "shorturlinfo failed, falling back to page scrape"),
        }

        let page_url = domain::build_share_url(surl, self.api.current_mirror());
        let html = self.api.fetch_page(&page_url).await?;
        let mut ctx = parse_share_page(&html);
        ctx.surl = surl.to_string();
        Ok(ctx)
    }

    /// Stage 2 — File listing.
    async fn get_file_list(&self, ctx: &mut ShareContext) -> Result<Vec<FileEntry>, ExtractError> {
        if let Some(list) = ctx.file_list.take() {
            return Ok(list);
        }

        let mut params: Vec<(&str, &str)> = vec![
            ("shorturl", &ctx.surl),
            ("root", "1"),
            ("dir", "/"),
            ("page", "1"),
            ("num", "100"),
            ("order", "asc"),
            ("by", "name"),
        ];
        if let Some(shareid) = ctx.shareid.as_deref() {
            params.push(("shareid", shareid));
        }
        if let Some(uk) = ctx.uk.as_deref() {
            params.push(("uk", uk));
        }

        let body = self.api.get("/share/list", &params, None, EndpointKind::Other).await?;
        let list = body
            .get("list")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(FileEntry::from_value).collect())
            .unwrap_or_default();
        Ok(list)
    }

    /// Stage 4 — Stream-URL ladder. Returns the first non-empty URL.
    async fn resolve_stream_url(&self, ctx: &ShareContext, file: &FileEntry) -> Result<MediaInfo, ExtractError> {
        let mut info = MediaInfo {
            title: file.filename.clone(),
            filename: file.filename.clone(),
            size: file.size,
            size_formatted: format_size(file.size),
            thumbnail: file.thumbnail.clone(),
            fs_id: file.fs_id.clone(),
            share_id: ctx.shareid.clone().unwrap_or_default(),
            uk: ctx.uk.clone().unwrap_or_default(),
            surl: ctx.surl.clone(),
            stream_url: String::new(),
            download_url: None,
            dlink: None,
            duration: 0,
            resolution: None,
            quality_options: Vec::new(),
            raw_data: file.raw.clone(),
        };

        // Rung 1: pre-baked dlink.
        if let Some(dlink) = file.dlink.clone() {
            info.dlink = Some(dlink.clone());
            if let Some(url) = self.process_dlink(&dlink).await {
                info.stream_url = url;
                return Ok(info);
            }
        }

        // Rung 2: streaming endpoint.
        let (streaming_url, options) = self.fetch_streaming_url(ctx, file).await;
        info.quality_options = options;
        if let Some(url) = streaming_url {
            info.stream_url = url;
            return Ok(info);
        }

        // Rung 3: download endpoint.
        if let Some(url) = self.fetch_download_url(ctx, file).await {
            info.download_url = Some(url.clone());
            info.stream_url = url;
            return Ok(info);
        }

        // Rung 4: filemetas.
        if let Some(url) = self.fetch_filemetas_url(file).await {
            info.stream_url = url;
            return Ok(info);
        }

        // Rung 5: videoPlay.
        if let Some(url) = self.fetch_video_play_url(ctx, file).await {
            info.stream_url = url;
            return Ok(info);
        }

        Err(ExtractError::NoVideoFound)
    }

    async fn process_dlink(&self, dlink: &str) -> Option<String> {
        let terminated = if dlink.contains('?') {
            format!("{dlink}&")
        } else {
            format!("{dlink}?")
        };

        let headers = self.api_headers_for_head().await;
        let client = self.http_client();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            client.head(&terminated).headers(headers).send(),
        )
        .await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => Some(resp.url().to_string()),
            _ => Some(dlink.to_string()),
        }
    }

    async fn fetch_streaming_url(&self, ctx: &ShareContext, file: &FileEntry) -> (Option<String>, Vec<QualityOption>) {
        let referer = domain::build_share_url(&ctx.surl, self.api.current_mirror());
        let mut first_url = None;
        let mut options = Vec::new();

        for stream_type in STREAM_TYPES {
            let shareid = ctx.shareid.clone().unwrap_or_default();
            let uk = ctx.uk.clone().unwrap_or_default();
            let mut params: Vec<(&str, &str)> = vec![
                ("type", stream_type),
                ("uk", &uk),
                ("shareid", &shareid),
                ("fid", &file.fs_id),
            ];
            let sign_str;
            let ts_str;
            if let Some(sign) = ctx.sign.as_deref() {
                sign_str = sign.to_string();
                params.push(("sign", &sign_str));
            }
            if let Some(ts) = ctx.timestamp {
                ts_str = ts.to_string();
                params.push(("timestamp", &ts_str));
            }

            let result = self
                .api
                .get("/share/streaming", &params, Some(&referer), EndpointKind::Streaming)
                .await;

            match result {
                Ok(body) => {
                    if let Some(url) = extract_streaming_url(&body) {
                        options.push(QualityOption {
                            label: stream_type.to_string(),
                            url: url.clone(),
                        });
                        if first_url.is_none() {
                            first_url = Some(url);
                        }
                    }
                }
                Err(ExtractError::Host(e)) if e.benign_skip => {
                    debug!(stream_type, "streaming type not applicable, skipping");
                }
                Err(e) => {
                    debug!(stream_type, error = %e, "streaming request failed");
                }
            }
        }

        (first_url, options)
    }

    async fn fetch_download_url(&self, ctx: &ShareContext, file: &FileEntry) -> Option<String> {
        let referer = domain::build_share_url(&ctx.surl, self.api.current_mirror());
        let shareid = ctx.shareid.clone().unwrap_or_default();
        let uk = ctx.uk.clone().unwrap_or_default();
        let timestamp = ctx.timestamp.unwrap_or_else(|| now_unix() as i64);
        let sign = ctx
            .sign
            .clone()
            .unwrap_or_else(|| SessionManager::signature_for(timestamp, &shareid));
        let fid_list = format!(r#"["{}"]"#, file.fs_id);
        let ts_str = timestamp.to_string();
        let js_token = self.api.js_token().await;

        let mut params: Vec<(&str, &str)> = vec![
            ("shareid", &shareid),
            ("uk", &uk),
            ("fid_list", &fid_list),
            ("sign", &sign),
            ("timestamp", &ts_str),
        ];
        if let Some(token) = js_token.as_deref() {
            if !token.is_empty() {
                params.push(("jsToken", token));
            }
        }

        let body = self
            .api
            .get("/share/download", &params, Some(&referer), EndpointKind::Other)
            .await
            .ok()?;

        if let Some(list) = body.get("list").and_then(Value::as_array) {
            if let Some(item) = list.first() {
                if let Some(url) = item
                    .get("dlink")
                    .or_else(|| item.get("url"))
                    .and_then(Value::as_str)
                {
                    return Some(url.to_string());
                }
            }
        }
        body.get("dlink").and_then(Value::as_str).map(str::to_string)
    }

    async fn fetch_filemetas_url(&self, file: &FileEntry) -> Option<String> {
        let target = format!(r#"["{}"]"#, file.fs_id);
        let params: Vec<(&str, &str)> = vec![("dlink", "1"), ("target", &target)];
        let body = self
            .api
            .get("/api/filemetas", &params, None, EndpointKind::Other)
            .await
            .ok()?;

        body.get("info")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|item| item.get("dlink"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn fetch_video_play_url(&self, ctx: &ShareContext, file: &FileEntry) -> Option<String> {
        let params: Vec<(&str, &str)> = vec![("surl", &ctx.surl), ("fid", &file.fs_id)];
        let body = self
            .api
            .get("/share/videoPlay", &params, None, EndpointKind::Other)
            .await
            .ok()?;

        for key in ["video", "url", "stream", "hd_url", "sd_url"] {
            if let Some(url) = body.get(key).and_then(Value::as_str) {
                return Some(url.to_string());
            }
        }
        None
    }

    fn http_client(&self) -> &reqwest::Client {
        self.api.http_client()
    }

    async fn api_headers_for_head(&self) -> reqwest::header::HeaderMap {
        self.api.session_headers(None).await
    }
}

/// Extract the first populated URL field from a `/share/streaming`
/// response, descending into `urls` (list or dict) when the top-level keys
/// are absent.
fn extract_streaming_url(body: &Value) -> Option<String> {
    for key in ["lurl", "dlink", "url", "path", "mlink"] {
        if let Some(url) = body.get(key).and_then(Value::as_str) {
            return Some(url.to_string());
        }
    }

    match body.get("urls") {
        Some(Value::Array(arr)) => arr
            .first()
            .and_then(|item| item.get("url").or_else(|| item.get("dlink")))
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::Object(_)) => body
            .get("urls")
            .and_then(|o| o.get("url").or_else(|| o.get("dlink")))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Three-pass video-file selection: extension, then category, then
/// mime-type; falls back to the first entry.
fn select_video_file(files: &[FileEntry]) -> &FileEntry {
    if let Some(f) = files.iter().find(|f| {
        let lower = f.filename.to_lowercase();
        VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    }) {
        return f;
    }
    if let Some(f) = files.iter().find(|f| f.category == 1) {
        return f;
    }
    if let Some(f) = files.iter().find(|f| {
        f.mime_type
            .as_deref()
            .map(|m| m.to_lowercase().contains("video"))
            .unwrap_or(false)
    }) {
        return f;
    }
    &files[0]
}

/// Decode a scraped share page into a [`ShareContext`], trying embedded JSON
/// bundles first, then per-field regex fallbacks.
fn parse_share_page(html: &str) -> ShareContext {
    let mut ctx = ShareContext::default();

    for re in SHARE_BUNDLE_PATTERNS.iter() {
        if let Some(caps) = re.captures(html) {
            if let Some(raw) = caps.get(1) {
                if let Some(parsed) = decode_and_parse_json(raw.as_str()) {
                    let flattened = flatten_share_data(&parsed);
                    merge_context(&mut ctx, flattened);
                    break;
                }
            }
        }
    }

    for (field, patterns) in FIELD_PATTERNS.iter() {
        let already_set = match *field {
            "shareid" => ctx.shareid.is_some(),
            "uk" => ctx.uk.is_some(),
            "sign" => ctx.sign.is_some(),
            "timestamp" => ctx.timestamp.is_some(),
            _ => true,
        };
        if already_set {
            continue;
        }
        for re in patterns {
            if let Some(caps) = re.captures(html) {
                if let Some(m) = caps.get(1) {
                    apply_field(&mut ctx, field, m.as_str());
                    break;
                }
            }
        }
    }

    if ctx.file_list.is_none() {
        for re in FILE_LIST_PATTERNS.iter() {
            if let Some(caps) = re.captures(html) {
                if let Some(m) = caps.get(1) {
                    if let Ok(Value::Array(arr)) = serde_json::from_str::<Value>(m.as_str()) {
                        ctx.file_list = Some(arr.iter().map(FileEntry::from_value).collect());
                        break;
                    }
                }
            }
        }
    }

    ctx
}

fn decode_and_parse_json(raw: &str) -> Option<Value> {
    let html_decoded = raw.replace("&quot;", "\"").replace("&amp;", "&");
    let percent_decoded = percent_decode_str(&html_decoded).decode_utf8().ok()?.into_owned();
    serde_json::from_str(&percent_decoded)
        .ok()
        .or_else(|| serde_json::from_str(&html_decoded).ok())
}

fn apply_field(ctx: &mut ShareContext, field: &str, value: &str) {
    match field {
        "shareid" => ctx.shareid = Some(value.to_string()),
        "uk" => ctx.uk = Some(value.to_string()),
        "sign" => ctx.sign = Some(value.to_string()),
        "timestamp" => ctx.timestamp = value.parse().ok(),
        _ => {}
    }
}

fn merge_context(ctx: &mut ShareContext, other: ShareContext) {
    if ctx.shareid.is_none() {
        ctx.shareid = other.shareid;
    }
    if ctx.uk.is_none() {
        ctx.uk = other.uk;
    }
    if ctx.sign.is_none() {
        ctx.sign = other.sign;
    }
    if ctx.timestamp.is_none() {
        ctx.timestamp = other.timestamp;
    }
    if ctx.title.is_none() {
        ctx.title = other.title;
    }
    if ctx.file_list.is_none() {
        ctx.file_list = other.file_list;
    }
}

/// Lift `shareid`, `uk`, `sign`, `timestamp`, `title`, `file_list` from the
/// top level or from nested `share`/`file`/`list` keys, matching
/// `_flatten_share_data` in `original_source`.
fn flatten_share_data(data: &Value) -> ShareContext {
    let mut ctx = ShareContext::default();

    ctx.shareid = data.get("shareid").map(value_to_string);
    ctx.uk = data.get("uk").map(value_to_string);
    ctx.sign = data.get("sign").and_then(Value::as_str).map(str::to_string);
    ctx.timestamp = data.get("timestamp").and_then(Value::as_i64);
    ctx.title = data.get("title").and_then(Value::as_str).map(str::to_string);
    ctx.file_list = data
        .get("file_list")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(FileEntry::from_value).collect());

    if let Some(share) = data.get("share") {
        merge_context(&mut ctx, flatten_share_data(share));
    }
    match data.get("file") {
        Some(Value::Array(arr)) => {
            if ctx.file_list.is_none() {
                ctx.file_list = Some(arr.iter().map(FileEntry::from_value).collect());
            }
        }
        Some(file @ Value::Object(_)) => {
            if ctx.file_list.is_none() {
                ctx.file_list = Some(vec![FileEntry::from_value(file)]);
            }
        }
        _ => {}
    }
    if let Some(Value::Array(arr)) = data.get("list") {
        if ctx.file_list.is_none() {
            ctx.file_list = Some(arr.iter().map(FileEntry::from_value).collect());
        }
    }

    ctx
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}
