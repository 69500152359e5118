//! URL and console-message filtering, and the response-body fetch
//! decision.
//!
//! User-supplied patterns are `*` wildcards compiled with `globset` and
//! matched case-insensitively against both the bare hostname and
//! `hostname+path`. Include patterns trump exclude patterns and act as a
//! whitelist when non-empty.

use std::fmt;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use url::Url;

/// Built-in tracking/analytics hosts excluded from capture unless
/// `include_all` is set. Matched as case-insensitive hostname substrings.
const TRACKING_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "analytics.google.com",
    "doubleclick.net",
    "connect.facebook.net",
    "facebook.com/tr",
    "mixpanel.com",
    "segment.io",
    "segment.com",
    "amplitude.com",
    "heapanalytics.com",
    "fullstory.com",
    "hotjar.com",
    "logrocket.com",
    "logrocket.io",
    "criteo.com",
    "criteo.net",
    "sentry.io",
    "ingest.sentry.io",
    "datadoghq.com",
    "browser-intake-datadoghq.com",
    "newrelic.com",
    "nr-data.net",
    "clarity.ms",
    "scorecardresearch.com",
    "quantserve.com",
];

/// Built-in dev-server noise suppressed from console capture.
const CONSOLE_NOISE: &[&str] = &[
    "webpack-dev-server",
    "[HMR]",
    "[WDS]",
    "Download the React DevTools",
];

/// MIME prefixes whose bodies are never fetched (binary or bulky assets).
const BODY_SKIP_MIME: &[&str] = &[
    "image/",
    "font/",
    "video/",
    "audio/",
    "text/css",
    "application/font",
    "application/vnd.ms-fontobject",
    "application/octet-stream",
];

/// URL extensions whose bodies are never fetched (same asset categories,
/// for responses with missing or generic MIME types).
const BODY_SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".avif", ".svg", ".ico", ".bmp", ".woff", ".woff2",
    ".ttf", ".otf", ".eot", ".css", ".mp4", ".webm", ".mov", ".mp3", ".wav", ".ogg", ".map",
];

/// Default response-body size cap: 5 MB, in bytes.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 5 * 1024 * 1024;

/// Filter construction error (invalid wildcard pattern).
#[derive(Debug)]
pub struct FilterError(pub String);

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filter pattern: {}", self.0)
    }
}

impl std::error::Error for FilterError {}

impl From<FilterError> for crate::error::AppError {
    fn from(e: FilterError) -> Self {
        Self::invalid_arguments(e.to_string())
    }
}

/// Compiled include/exclude wildcard pattern pair.
#[derive(Debug, Default)]
pub struct UrlPatterns {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, FilterError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| FilterError(format!("{pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| FilterError(e.to_string()))
}

impl UrlPatterns {
    /// Compile pattern lists.
    ///
    /// # Errors
    ///
    /// Returns `FilterError` when a pattern is not a valid wildcard.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    #[must_use]
    pub fn has_include(&self) -> bool {
        self.include.is_some()
    }

    fn matches(set: Option<&GlobSet>, url: &str) -> bool {
        let Some(set) = set else { return false };
        let (host, host_and_path) = host_forms(url);
        set.is_match(&host) || set.is_match(&host_and_path)
    }

    /// Does any include pattern match this URL?
    #[must_use]
    pub fn include_matches(&self, url: &str) -> bool {
        Self::matches(self.include.as_ref(), url)
    }

    /// Does any exclude pattern match this URL?
    #[must_use]
    pub fn exclude_matches(&self, url: &str) -> bool {
        Self::matches(self.exclude.as_ref(), url)
    }

    /// Capture decision for a URL.
    ///
    /// Include patterns always win and, when present, act as a whitelist;
    /// otherwise an exclude match drops; otherwise tracking domains drop
    /// unless `include_all`; otherwise keep.
    #[must_use]
    pub fn keep_url(&self, url: &str, include_all: bool) -> bool {
        if self.include.is_some() {
            return self.include_matches(url);
        }
        if self.exclude_matches(url) {
            return false;
        }
        if !include_all && is_tracking_url(url) {
            return false;
        }
        true
    }
}

/// `(hostname, hostname+path)` in lowercase for pattern matching.
fn host_forms(url: &str) -> (String, String) {
    if let Ok(parsed) = Url::parse(url) {
        let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
        let host_and_path = format!("{host}{}", parsed.path().to_ascii_lowercase());
        (host, host_and_path)
    } else {
        let lower = url.to_ascii_lowercase();
        (lower.clone(), lower)
    }
}

/// Is this URL's hostname on the built-in tracking list?
#[must_use]
pub fn is_tracking_url(url: &str) -> bool {
    let (host, _) = host_forms(url);
    TRACKING_DOMAINS.iter().any(|d| host.contains(d))
}

/// Console-message filter: wildcard patterns over the message text plus
/// the built-in noise list.
#[derive(Debug, Default)]
pub struct ConsoleFilters {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl ConsoleFilters {
    /// Compile pattern lists.
    ///
    /// # Errors
    ///
    /// Returns `FilterError` when a pattern is not a valid wildcard.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// Capture decision for a console message.
    #[must_use]
    pub fn keep_message(&self, text: &str) -> bool {
        if let Some(include) = &self.include {
            return include.is_match(text);
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(text) {
                return false;
            }
        }
        !CONSOLE_NOISE.iter().any(|noise| text.contains(noise))
    }
}

/// Decide whether a response body should be fetched.
///
/// Precedence: include-pattern match fetches; exclude-pattern match
/// skips; `fetch_all` fetches; built-in MIME skip list skips; built-in
/// URL-extension skip list skips; text-like content within `max_size`
/// fetches; everything else skips.
#[must_use]
pub fn should_fetch_body(
    patterns: &UrlPatterns,
    url: &str,
    mime_type: Option<&str>,
    size: Option<u64>,
    fetch_all: bool,
    max_size: u64,
) -> bool {
    if patterns.has_include() && patterns.include_matches(url) {
        return true;
    }
    if patterns.exclude_matches(url) {
        return false;
    }
    if fetch_all {
        return true;
    }

    let mime = mime_type.unwrap_or("").to_ascii_lowercase();
    if BODY_SKIP_MIME.iter().any(|skip| mime.starts_with(skip)) {
        return false;
    }

    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    if BODY_SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    let text_like = ["json", "javascript", "text", "html"]
        .iter()
        .any(|t| mime.contains(t));
    text_like && size.unwrap_or(0) <= max_size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(include: &[&str], exclude: &[&str]) -> UrlPatterns {
        let include: Vec<String> = include.iter().map(|s| (*s).to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| (*s).to_string()).collect();
        UrlPatterns::new(&include, &exclude).unwrap()
    }

    #[test]
    fn include_trumps_exclude() {
        let p = patterns(&["api.example.com"], &["*example.com*"]);
        assert!(p.keep_url("https://api.example.com/users", false));
        assert!(!p.keep_url("https://cdn.example.com/logo", false));
    }

    #[test]
    fn include_acts_as_whitelist() {
        let p = patterns(&["api.example.com*"], &[]);
        assert!(p.keep_url("https://api.example.com/v1/users", false));
        assert!(!p.keep_url("https://other.example.com/v1/users", false));
        assert!(!p.keep_url("https://unrelated.net/", false));
    }

    #[test]
    fn exclude_drops_when_no_include() {
        let p = patterns(&[], &["*cdn*"]);
        assert!(!p.keep_url("https://cdn.example.com/app.js", false));
        assert!(p.keep_url("https://www.example.com/app.js", false));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let p = patterns(&[], &["*EXAMPLE.com*"]);
        assert!(!p.keep_url("https://cdn.example.com/x", false));
    }

    #[test]
    fn tracking_domains_dropped_by_default() {
        let p = patterns(&[], &[]);
        assert!(!p.keep_url("https://www.google-analytics.com/collect", false));
        assert!(!p.keep_url("https://static.doubleclick.net/ad", false));
        assert!(!p.keep_url("https://o123.ingest.sentry.io/api/1/envelope/", false));
    }

    #[test]
    fn include_all_keeps_tracking_domains() {
        let p = patterns(&[], &[]);
        assert!(p.keep_url("https://www.google-analytics.com/collect", true));
    }

    #[test]
    fn plain_urls_kept_by_default() {
        let p = patterns(&[], &[]);
        assert!(p.keep_url("https://example.com/index.html", false));
    }

    #[test]
    fn body_skip_by_mime_regardless_of_patterns() {
        let p = patterns(&[], &[]);
        assert!(!should_fetch_body(
            &p,
            "http://x/y.css?q=1",
            Some("text/css"),
            Some(100),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
        assert!(!should_fetch_body(
            &p,
            "http://x/pic",
            Some("image/png"),
            Some(100),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn body_fetched_for_json_within_limit() {
        let p = patterns(&[], &[]);
        assert!(should_fetch_body(
            &p,
            "http://x/api/data",
            Some("application/json"),
            Some(100 * 1024),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn body_skipped_when_exclude_matches() {
        let p = patterns(&[], &["*x/api*"]);
        assert!(!should_fetch_body(
            &p,
            "http://x/api/data",
            Some("application/json"),
            Some(100),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn body_fetched_when_include_matches_even_if_large() {
        let p = patterns(&["*x/api*"], &[]);
        assert!(should_fetch_body(
            &p,
            "http://x/api/huge",
            Some("application/json"),
            Some(100 * 1024 * 1024),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn body_skipped_over_size_limit() {
        let p = patterns(&[], &[]);
        assert!(!should_fetch_body(
            &p,
            "http://x/api/huge",
            Some("application/json"),
            Some(DEFAULT_MAX_BODY_SIZE + 1),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn body_skipped_by_url_extension_without_mime() {
        let p = patterns(&[], &[]);
        assert!(!should_fetch_body(
            &p,
            "http://x/bundle.js.map",
            None,
            Some(100),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
        assert!(!should_fetch_body(
            &p,
            "http://x/font.woff2?v=3",
            None,
            Some(100),
            false,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn fetch_all_overrides_text_like_requirement() {
        let p = patterns(&[], &[]);
        assert!(should_fetch_body(
            &p,
            "http://x/blob",
            Some("application/x-custom"),
            Some(10),
            true,
            DEFAULT_MAX_BODY_SIZE
        ));
    }

    #[test]
    fn console_noise_suppressed() {
        let f = ConsoleFilters::default();
        assert!(!f.keep_message("[HMR] Waiting for update signal from WDS..."));
        assert!(!f.keep_message("[WDS] Hot Module Replacement enabled."));
        assert!(!f.keep_message(
            "Download the React DevTools for a better development experience"
        ));
        assert!(f.keep_message("TypeError: undefined is not a function"));
    }

    #[test]
    fn console_include_whitelists() {
        let f = ConsoleFilters::new(&["*error*".to_string()], &[]).unwrap();
        assert!(f.keep_message("request error: 500"));
        assert!(!f.keep_message("page loaded"));
    }

    #[test]
    fn console_exclude_drops() {
        let f = ConsoleFilters::new(&[], &["*heartbeat*".to_string()]).unwrap();
        assert!(!f.keep_message("ws heartbeat ok"));
        assert!(f.keep_message("something else"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let result = UrlPatterns::new(&["[".to_string()], &[]);
        assert!(result.is_err());
    }
}
