//! Session Manager — acquires and refreshes the browser-like session: seed
//! cookies, `jsToken`/`bdstoken`/`csrfToken`, and `logid`. Owns the single
//! shared [`SessionState`], mutated only by refresh (wholesale swap) or by
//! response-cookie folding (the one permitted in-place mutation).
//!
//! Grounded on `original_source/src/extractor/token_manager.py`'s
//! `TokenManager`, and on the teacher's fingerprint-fabrication style in
//! `features/antibot.rs` for the user-agent pool.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use md5::{Digest, Md5};
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::types::{now_unix, SessionState};

/// Chrome/Edge user-agent pool a freshly-bootstrapped session picks from.
/// One is chosen at session creation and held stable for the session's
/// lifetime (§3 invariant).
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
];

static JS_TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""jsToken"\s*:\s*"([^"]+)""#,
        r"jsToken\s*=\s*'([^']+)'",
        r#"jsToken\s*=\s*"([^"]+)""#,
        r#"window\.jsToken\s*=\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static jsToken pattern is valid regex"))
    .collect()
});

static BDSTOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#""bdstoken"\s*:\s*"([^"]+)""#,
        r#"bdstoken\s*=\s*['"]([^'"]+)['"]"#,
        r"'bdstoken'\s*:\s*'([^']+)'",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static bdstoken pattern is valid regex"))
    .collect()
});

fn first_capture(patterns: &[Regex], html: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

fn random_alphanumeric(n: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..n)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

fn random_lowercase_alphanumeric(n: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..n)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_logid() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis();
    format!("{millis}{}", random_lowercase_alphanumeric(8))
}

fn generate_browser_id() -> String {
    let mut rng = rand::rng();
    let seed = format!("{}{}", now_unix(), rng.random::<f64>());
    md5_hex(&seed)[..24].to_string()
}

fn pick_user_agent() -> &'static str {
    let mut rng = rand::rng();
    USER_AGENTS[rng.random_range(0..USER_AGENTS.len())]
}

fn fabricate_seed_cookies() -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    cookies.insert("lang".to_string(), "en".to_string());
    cookies.insert("ndus".to_string(), random_alphanumeric(32));
    cookies.insert("browserid".to_string(), generate_browser_id());
    cookies.insert("__bid_n".to_string(), generate_browser_id()[..16].to_string());
    cookies
}

/// Owns the single shared [`SessionState`] behind an `RwLock`. Readers
/// clone a snapshot; the refresh critical section holds the write lock for
/// the duration of the bootstrap GET, per §5 (rare, preferable to racing
/// bootstraps).
pub struct SessionManager {
    client: reqwest::Client,
    refresh_interval_secs: u64,
    state: RwLock<Option<Arc<SessionState>>>,
}

impl SessionManager {
    pub fn new(client: reqwest::Client, refresh_interval_secs: u64) -> Self {
        Self {
            client,
            refresh_interval_secs,
            state: RwLock::new(None),
        }
    }

    /// Return the current session, bootstrapping or refreshing it first if
    /// absent or expired.
    pub async fn get_or_refresh(&self) -> Arc<SessionState> {
        if let Some(state) = self.snapshot_if_fresh().await {
            return state;
        }

        let mut guard = self.state.write().await;
        // Double-check: another task may have refreshed while we waited
        // for the write lock.
        if let Some(state) = guard.as_ref() {
            if !state.is_expired() {
                return Arc::clone(state);
            }
        }

        let fresh = self.bootstrap().await;
        *guard = Some(Arc::clone(&fresh));
        fresh
    }

    async fn snapshot_if_fresh(&self) -> Option<Arc<SessionState>> {
        let guard = self.state.read().await;
        guard.as_ref().filter(|s| !s.is_expired()).map(Arc::clone)
    }

    /// Force the next [`get_or_refresh`] to perform a fresh bootstrap,
    /// regardless of the current session's TTL. Called by the API Client
    /// when a session-invalid errno is observed.
    pub async fn invalidate(&self) {
        let mut guard = self.state.write().await;
        *guard = None;
    }

    async fn bootstrap(&self) -> Arc<SessionState> {
        info!("bootstrapping new session");
        let now = now_unix();
        let mut state = SessionState {
            cookies: fabricate_seed_cookies(),
            user_agent: pick_user_agent().to_string(),
            js_token: None,
            bdstoken: None,
            csrf_token: None,
            logid: generate_logid(),
            created_at: now,
            expires_at: now + self.refresh_interval_secs,
        };

        match self.fetch_landing_page(&state).await {
            Ok((cookies, html)) => {
                state.cookies.extend(cookies);
                state.js_token = first_capture(&JS_TOKEN_PATTERNS, &html);
                state.bdstoken = first_capture(&BDSTOKEN_PATTERNS, &html);
                state.csrf_token = state.cookies.get("csrfToken").cloned();
                debug!(cookies = state.cookies.len(), "landing page scraped");
            }
            Err(e) => {
                // Keep the partially-populated state — fabricated cookies
                // alone are sometimes sufficient for subsequent probes.
                warn!(error = %e, "landing page bootstrap failed; continuing with fabricated cookies only");
            }
        }

        Arc::new(state)
    }

    async fn fetch_landing_page(
        &self,
        state: &SessionState,
    ) -> Result<(HashMap<String, String>, String), reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("sec-ch-ua", HeaderValue::from_static(r#""Chromium";v="122", "Not(A:Brand";v="24", "Google Chrome";v="122""#));
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers.insert(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_str(&state.user_agent).expect("user agent is a valid header value"),
        );

        let resp = self
            .client
            .get(format!("https://{}/", crate::domain::CANONICAL_HOST))
            .headers(headers)
            .send()
            .await?;

        let cookies = fold_set_cookie(resp.headers());
        let html = resp.text().await?;
        Ok((cookies, html))
    }

    /// Canonical API headers. `Origin` is the scheme+host prefix of
    /// `referer` when one is given.
    pub async fn headers(&self, referer: Option<&str>) -> HeaderMap {
        let state = self.get_or_refresh().await;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_str(&state.user_agent).expect("user agent is a valid header value"),
        );
        headers.insert("Accept", HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert("sec-ch-ua", HeaderValue::from_static(r#""Chromium";v="122", "Not(A:Brand";v="24", "Google Chrome";v="122""#));
        headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));

        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        if let Some(referer) = referer {
            if let Ok(v) = HeaderValue::from_str(referer) {
                headers.insert("Referer", v);
            }
            if let Some(origin) = origin_of(referer) {
                if let Ok(v) = HeaderValue::from_str(&origin) {
                    headers.insert("Origin", v);
                }
            }
        }

        headers.insert("Cookie", HeaderValue::from_str(&state.cookie_header()).unwrap_or(HeaderValue::from_static("")));
        headers
    }

    /// `md5(shareid + "_" + timestamp)`, used only when the share page did
    /// not itself provide a `sign`. Best-effort — the Host's real signature
    /// algorithm is unknown; this is empirically accepted by the download
    /// endpoint in practice.
    pub fn signature_for(timestamp: i64, shareid: &str) -> String {
        md5_hex(&format!("{shareid}_{timestamp}"))
    }

    /// The current session's scraped `jsToken`, if any. `/share/download`
    /// includes it as an optional request param when present.
    pub async fn js_token(&self) -> Option<String> {
        self.get_or_refresh().await.js_token.clone()
    }

    /// Fold `Set-Cookie` headers from an API response back into the
    /// current session's cookie map. The only mutation permitted outside
    /// of a full refresh.
    pub async fn fold_response_cookies(&self, headers: &HeaderMap) {
        let cookies = fold_set_cookie(headers);
        if cookies.is_empty() {
            return;
        }
        let mut guard = self.state.write().await;
        if let Some(state) = guard.as_mut() {
            let mut updated = (**state).clone();
            updated.cookies.extend(cookies);
            *state = Arc::new(updated);
        }
    }
}

fn fold_set_cookie(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for value in headers.get_all("set-cookie") {
        if let Ok(s) = value.to_str() {
            if let Some((name, rest)) = s.split_once('=') {
                let value = rest.split(';').next().unwrap_or("").trim();
                out.insert(name.trim().to_string(), value.to_string());
            }
        }
    }
    out
}

fn origin_of(referer: &str) -> Option<String> {
    let parsed = url::Url::parse(referer).ok()?;
    let scheme = parsed.scheme();
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logid_matches_expected_shape() {
        let id = generate_logid();
        let re = Regex::new(r"^\d{13}[a-z0-9]{8}$").unwrap();
        assert!(re.is_match(&id), "logid {id} did not match expected shape");
    }

    #[test]
    fn signature_is_deterministic_md5() {
        let sig = SessionManager::signature_for(1700000000, "123");
        assert_eq!(sig, md5_hex("123_1700000000"));
        assert_eq!(sig.len(), 32);
    }

    #[test]
    fn js_token_patterns_extract_from_html_variants() {
        assert_eq!(
            first_capture(&JS_TOKEN_PATTERNS, r#"var x = {"jsToken":"abc123"};"#),
            Some("abc123".to_string())
        );
        assert_eq!(
            first_capture(&JS_TOKEN_PATTERNS, "window.jsToken = 'xyz789';"),
            Some("xyz789".to_string())
        );
    }

    #[test]
    fn bdstoken_patterns_extract_from_html_variants() {
        let html = r#"{"bdstoken": "tok1"}"#;
        assert_eq!(
            first_capture(&BDSTOKEN_PATTERNS, html),
            Some("tok1".to_string())
        );
    }

    #[test]
    fn fold_set_cookie_parses_name_value_pairs() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1; Path=/; HttpOnly"));
        headers.append("set-cookie", HeaderValue::from_static("b=2; Secure"));
        let cookies = fold_set_cookie(&headers);
        assert_eq!(cookies.get("a"), Some(&"1".to_string()));
        assert_eq!(cookies.get("b"), Some(&"2".to_string()));
    }

    #[test]
    fn origin_of_strips_path() {
        assert_eq!(
            origin_of("https://www.terabox.com/s/abc?x=1"),
            Some("https://www.terabox.com".to_string())
        );
    }

    fn short_timeout_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn get_or_refresh_yields_unexpired_session_with_valid_logid() {
        let manager = SessionManager::new(short_timeout_client(), 3600);
        // Bootstrap attempts a real network call and may fail in a
        // sandboxed test environment; the manager must still return a
        // usable, partially-populated session rather than panicking.
        let state = manager.get_or_refresh().await;
        assert!(!state.is_expired());
        let re = Regex::new(r"^\d{13}[a-z0-9]{8}$").unwrap();
        assert!(re.is_match(&state.logid));
    }

    #[tokio::test]
    async fn js_token_mirrors_the_current_session_state() {
        let manager = SessionManager::new(short_timeout_client(), 3600);
        let state = manager.get_or_refresh().await;
        assert_eq!(manager.js_token().await, state.js_token);
    }

    #[tokio::test]
    async fn invalidate_forces_strictly_greater_created_at_on_next_refresh() {
        let manager = SessionManager::new(short_timeout_client(), 3600);
        let first = manager.get_or_refresh().await;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        manager.invalidate().await;
        let second = manager.get_or_refresh().await;
        assert!(second.created_at > first.created_at);
        assert_ne!(second.logid, first.logid);
    }
}
