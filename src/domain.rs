//! Domain Registry — recognizes Host/mirror URLs, extracts the opaque
//! share-id ("surl"), and normalizes to the canonical share URL.
//!
//! Grounded on `original_source/src/domains/resolver.py`'s `DomainResolver`;
//! the known-domain table and pattern list are reproduced verbatim.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::core::types::ShareLocator;

pub const CANONICAL_HOST: &str = "www.terabox.com";

/// All known Host domains and mirrors, lowercase, `www.` included where the
/// original table listed it.
static KNOWN_DOMAINS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "terabox.com",
        "www.terabox.com",
        "teraboxapp.com",
        "www.teraboxapp.com",
        "1024tera.com",
        "www.1024tera.com",
        "4funbox.co",
        "www.4funbox.co",
        "4funbox.com",
        "www.4funbox.com",
        "mirrobox.com",
        "www.mirrobox.com",
        "nephobox.com",
        "www.nephobox.com",
        "momerybox.com",
        "www.momerybox.com",
        "tibibox.com",
        "www.tibibox.com",
        "freeterabox.com",
        "www.freeterabox.com",
        "dubox.com",
        "www.dubox.com",
        "teraboxlink.com",
        "www.teraboxlink.com",
        "terafileshare.com",
        "www.terafileshare.com",
        "terabox.co",
        "www.terabox.co",
        "terabox.fun",
        "www.terabox.fun",
        "terabox.app",
        "www.terabox.app",
        "1024terabox.com",
        "www.1024terabox.com",
        "gibibox.com",
        "www.gibibox.com",
        "box.terabox.app",
    ]
    .into_iter()
    .collect()
});

/// Substring heuristics used when a host doesn't match the known set
/// exactly, to tolerate mirrors not yet added to the table.
const HEURISTIC_SUBSTRINGS: &[&str] = &[
    "terabox", "tera", "box", "dubox", "funbox", "nepho", "mirro", "momer",
];

/// Share-id extraction patterns, tried in order; first match wins.
static SURL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/s/([A-Za-z0-9_-]+)",
        r"/sharing/link\?surl=([A-Za-z0-9_-]+)",
        r"[?&]surl=([A-Za-z0-9_-]+)",
        r"/wap/s/([A-Za-z0-9_-]+)",
        r"/web/share/link\?surl=([A-Za-z0-9_-]+)",
        r"/share/link\?surl=([A-Za-z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static surl pattern is valid regex"))
    .collect()
});

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Check whether `s` parses as a URL belonging to the Host ecosystem.
pub fn is_host_url(s: &str) -> bool {
    let Ok(parsed) = Url::parse(&s.to_lowercase()) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let bare = strip_www(host);

    for known in KNOWN_DOMAINS.iter() {
        let known_bare = strip_www(known);
        if bare == known_bare || bare.ends_with(known_bare) {
            return true;
        }
    }

    HEURISTIC_SUBSTRINGS.iter().any(|pat| bare.contains(pat))
}

/// Extract the surl from any Host URL shape, trying regex patterns first,
/// then the parsed `surl` query param, then a `/s/<x>` path split.
pub fn extract_surl(s: &str) -> Option<String> {
    for re in SURL_PATTERNS.iter() {
        if let Some(caps) = re.captures(s) {
            if let Some(m) = caps.get(1) {
                if !m.as_str().is_empty() {
                    return Some(m.as_str().to_string());
                }
            }
        }
    }

    if let Ok(parsed) = Url::parse(s) {
        if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "surl") {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }

        let mut segments = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|seg| !seg.is_empty());
        if let Some(first) = segments.next() {
            if first == "s" {
                if let Some(second) = segments.next() {
                    if !second.is_empty() {
                        return Some(second.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Compose [`is_host_url`]/[`extract_surl`] into a full `ShareLocator`.
/// Returns `None` — never an exception — when the URL is unrecognized or
/// yields no surl; callers convert that to `ExtractError::InvalidUrl`.
pub fn parse(s: &str) -> Option<ShareLocator> {
    if !is_host_url(s) {
        return None;
    }
    let surl = extract_surl(s)?;
    if surl.is_empty() {
        return None;
    }
    Some(ShareLocator {
        canonical_url: format!("https://{CANONICAL_HOST}/s/{surl}"),
        surl,
    })
}

/// Keep only `{surl, shareid, uk, fid}` query params and force `https`,
/// matching `LinkNormalizer.clean_url` in `original_source`.
pub fn clean_url(s: &str) -> String {
    let Ok(mut parsed) = Url::parse(s) else {
        return s.to_string();
    };
    const ESSENTIAL: &[&str] = &["surl", "shareid", "uk", "fid"];
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| ESSENTIAL.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let _ = parsed.set_scheme("https");
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

/// Build a canonical share URL from a bare surl.
pub fn build_share_url(surl: &str, domain: &str) -> String {
    format!("https://{domain}/s/{surl}")
}
