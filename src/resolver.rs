//! Tab resolution: decide whether to reuse an existing page target or
//! create a new one, drive navigation, and wait for the tab to settle on
//! the requested URL.

use serde_json::json;
use tokio::time::Duration;

use crate::cdp::{CdpClient, CdpError};
use crate::chrome::{TargetInfo, create_target_http, query_targets};
use crate::error::{AppError, ExitCode};

/// Poll cadence for the readiness wait.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Total budget for the readiness wait.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Ensure the URL carries a scheme; bare hostnames get `https://`.
#[must_use]
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Score a candidate tab URL against the requested URL.
///
/// exact 100, same host+path 90, same host with a path prefix 70, same
/// host 50, substring 30, otherwise 0.
#[must_use]
pub fn score_target(candidate: &str, wanted: &str) -> u32 {
    if candidate == wanted {
        return 100;
    }

    if let (Ok(cand), Ok(want)) = (url::Url::parse(candidate), url::Url::parse(wanted)) {
        if cand.host_str().is_some() && cand.host_str() == want.host_str() {
            if cand.path() == want.path() {
                return 90;
            }
            if cand.path().starts_with(want.path()) {
                return 70;
            }
            return 50;
        }
    }

    if candidate.contains(wanted) {
        return 30;
    }
    0
}

/// A page target considered for reuse.
#[derive(Debug)]
struct CandidateTab {
    target_id: String,
    url: String,
}

/// Pick the best-scoring candidate. Ties below an exact match log a
/// warning and take the first in Chrome's order.
fn pick_reusable<'a>(candidates: &'a [CandidateTab], wanted: &str) -> Option<&'a CandidateTab> {
    let best_score = candidates
        .iter()
        .map(|c| score_target(&c.url, wanted))
        .max()?;
    if best_score == 0 {
        return None;
    }

    let mut best = candidates
        .iter()
        .filter(|c| score_target(&c.url, wanted) == best_score);
    let winner = best.next()?;
    if best_score < 100 && best.next().is_some() {
        tracing::warn!(
            score = best_score,
            url = %winner.url,
            "multiple tabs tie for reuse, taking the first"
        );
    }
    Some(winner)
}

/// Resolve a target (tab) for the session.
///
/// With `reuse`, existing page targets are scored against the URL and
/// the winner is navigated into place; otherwise (or when nothing
/// matches) a fresh tab is created via `Target.createTarget`, with
/// `PUT /json/new` as the HTTP fallback. Either way the tab is polled
/// until its URL settles on the requested one.
///
/// # Errors
///
/// Returns `AppError` on CDP failures or when the tab never becomes
/// ready.
pub async fn resolve_tab(
    client: &CdpClient,
    host: &str,
    port: u16,
    url: &str,
    reuse: bool,
) -> Result<TargetInfo, AppError> {
    if reuse {
        if let Some(target) = try_reuse(client, host, port, url).await? {
            return Ok(target);
        }
    }
    create_tab(client, host, port, url).await
}

async fn try_reuse(
    client: &CdpClient,
    host: &str,
    port: u16,
    url: &str,
) -> Result<Option<TargetInfo>, AppError> {
    let result = client.send_command("Target.getTargets", None).await?;
    let candidates: Vec<CandidateTab> = result["targetInfos"]
        .as_array()
        .map(|infos| {
            infos
                .iter()
                .filter(|t| t["type"].as_str() == Some("page"))
                .map(|t| CandidateTab {
                    target_id: t["targetId"].as_str().unwrap_or("").to_string(),
                    url: t["url"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let Some(winner) = pick_reusable(&candidates, url) else {
        return Ok(None);
    };
    tracing::info!(target_id = %winner.target_id, url = %winner.url, "reusing existing tab");

    if winner.url != url {
        // Drive the winning tab to the requested URL.
        let session = client.create_session(&winner.target_id).await?;
        session
            .send_command("Page.navigate", Some(json!({"url": url})))
            .await?;
        return wait_for_ready(host, port, &winner.target_id, url)
            .await
            .map(Some);
    }

    // URL already matches; only the WebSocket endpoint is missing.
    lookup_target(host, port, &winner.target_id)
        .await
        .map(Some)
}

async fn create_tab(
    client: &CdpClient,
    host: &str,
    port: u16,
    url: &str,
) -> Result<TargetInfo, AppError> {
    let params = json!({"url": url, "newWindow": false});
    let target_id = match client.send_command("Target.createTarget", Some(params)).await {
        Ok(result) => result["targetId"].as_str().map(String::from),
        Err(e @ CdpError::CommandTimeout { .. }) => return Err(e.into()),
        Err(e) => {
            tracing::debug!(error = %e, "Target.createTarget failed, falling back to HTTP");
            None
        }
    };

    let target_id = match target_id {
        Some(id) => id,
        None => create_target_http(host, port, url).await?.id,
    };

    wait_for_ready(host, port, &target_id, url).await
}

/// Fetch a target's current `/json/list` entry.
async fn lookup_target(host: &str, port: u16, target_id: &str) -> Result<TargetInfo, AppError> {
    let targets = query_targets(host, port).await?;
    targets
        .into_iter()
        .find(|t| t.id == target_id)
        .ok_or_else(|| {
            AppError::new(
                format!("target {target_id} disappeared while resolving"),
                ExitCode::ResourceNotFound,
            )
        })
}

/// Poll `/json/list` until the target's URL starts with the requested URL
/// and is no longer `about:blank`.
async fn wait_for_ready(
    host: &str,
    port: u16,
    target_id: &str,
    url: &str,
) -> Result<TargetInfo, AppError> {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;

    loop {
        if let Ok(targets) = query_targets(host, port).await {
            if let Some(target) = targets.into_iter().find(|t| t.id == target_id) {
                if tab_is_ready(&target.url, url) {
                    return Ok(target);
                }
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::new(
                format!("tab did not reach {url} within {}s", READY_TIMEOUT.as_secs()),
                ExitCode::TimeoutError,
            ));
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

/// Readiness predicate for the poll loop.
fn tab_is_ready(current: &str, wanted: &str) -> bool {
    current != "about:blank" && current.starts_with(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_https_scheme() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("  example.com  "), "https://example.com");
    }

    #[test]
    fn normalize_keeps_existing_scheme() {
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(
            normalize_url("https://example.com/path"),
            "https://example.com/path"
        );
    }

    #[test]
    fn score_exact_match() {
        assert_eq!(
            score_target("https://example.com/a", "https://example.com/a"),
            100
        );
    }

    #[test]
    fn score_same_host_and_path_ignores_query() {
        assert_eq!(
            score_target("https://example.com/a?x=1", "https://example.com/a"),
            90
        );
    }

    #[test]
    fn score_path_prefix() {
        assert_eq!(
            score_target("https://example.com/docs/intro", "https://example.com/docs"),
            70
        );
    }

    #[test]
    fn score_same_host_only() {
        assert_eq!(
            score_target("https://example.com/other", "https://example.com/docs"),
            50
        );
    }

    #[test]
    fn score_substring() {
        assert_eq!(
            score_target("https://mirror.net/?u=https://example.com/x", "https://example.com/x"),
            30
        );
    }

    #[test]
    fn score_unrelated_is_zero() {
        assert_eq!(
            score_target("https://unrelated.net/", "https://example.com/"),
            0
        );
    }

    #[test]
    fn pick_highest_scoring_candidate() {
        let candidates = vec![
            CandidateTab {
                target_id: "a".into(),
                url: "https://example.com/other".into(),
            },
            CandidateTab {
                target_id: "b".into(),
                url: "https://example.com/docs".into(),
            },
        ];
        let winner = pick_reusable(&candidates, "https://example.com/docs").unwrap();
        assert_eq!(winner.target_id, "b");
    }

    #[test]
    fn pick_none_when_all_score_zero() {
        let candidates = vec![CandidateTab {
            target_id: "a".into(),
            url: "https://unrelated.net/".into(),
        }];
        assert!(pick_reusable(&candidates, "https://example.com/").is_none());
    }

    #[test]
    fn pick_first_on_tie() {
        let candidates = vec![
            CandidateTab {
                target_id: "first".into(),
                url: "https://example.com/x".into(),
            },
            CandidateTab {
                target_id: "second".into(),
                url: "https://example.com/y".into(),
            },
        ];
        let winner = pick_reusable(&candidates, "https://example.com/docs").unwrap();
        assert_eq!(winner.target_id, "first");
    }

    #[test]
    fn readiness_requires_prefix_and_not_blank() {
        assert!(tab_is_ready(
            "https://example.com/",
            "https://example.com"
        ));
        assert!(!tab_is_ready("about:blank", "https://example.com"));
        assert!(!tab_is_ready("https://other.net/", "https://example.com"));
    }
}
