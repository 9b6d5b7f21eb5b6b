//! Liveness and geolocation-policy probing (spec.md §4.3).
//!
//! Both probes dial *through* the candidate proxy itself — the probe
//! result is a statement about what the candidate's egress looks like,
//! not about reachability of the manager host.

use crate::config::{keywords_match, Combinator, GeoPolicy, LivenessPolicy};
use crate::model::{canonical_url, ProxyIdentity};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

fn build_proxied_client(identity: &ProxyIdentity, timeout: Duration) -> reqwest::Result<Client> {
    let proxy_url = canonical_url(identity);
    Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url)?)
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
}

/// Probe a candidate's liveness through the configured probe-URL list.
///
/// Per spec.md §9 open question 4 (the Go source's fall-through bug):
/// if every probe URL errors, this returns `(false, Duration::ZERO)`,
/// never `(true, _)`.
pub async fn check_liveness(identity: &ProxyIdentity, policy: &LivenessPolicy) -> (bool, Duration) {
    let timeout = policy.check_interval();
    let client = match build_proxied_client(identity, timeout) {
        Ok(c) => c,
        Err(e) => {
            debug!(host = %identity.host, error = %e, "liveness probe client build failed");
            return (false, Duration::ZERO);
        }
    };

    for url in &policy.probe_urls {
        let start = Instant::now();
        let resp = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(host = %identity.host, url, error = %e, "probe url errored, trying next");
                continue;
            }
        };
        let elapsed = start.elapsed();

        if policy.response_keywords.is_empty() {
            return (true, elapsed);
        }
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                debug!(host = %identity.host, url, error = %e, "probe body read failed, trying next");
                continue;
            }
        };
        return if keywords_match(&body, &policy.response_keywords, Combinator::Or) {
            (true, elapsed)
        } else {
            (false, Duration::ZERO)
        };
    }

    (false, Duration::ZERO)
}

#[derive(Debug, Deserialize)]
struct GeoBody {
    ip: String,
}

/// Evaluate a candidate against the geolocation include/exclude policy
/// (spec.md §4.3). Returns `(passed, exit_ip)`. A disabled policy
/// always passes with an empty `exit_ip`. `timeout` is the configured
/// check interval (spec.md §4.3: probes use independent timeouts equal
/// to `CheckInterval` seconds), not a fixed constant.
pub async fn check_geo(
    identity: &ProxyIdentity,
    policy: &GeoPolicy,
    timeout: Duration,
) -> (bool, String) {
    if !policy.enabled {
        return (true, String::new());
    }

    let client = match build_proxied_client(identity, timeout) {
        Ok(c) => c,
        Err(e) => {
            debug!(host = %identity.host, error = %e, "geo probe client build failed");
            return (false, String::new());
        }
    };

    for url in &policy.probe_urls {
        let resp = match client
            .get(url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(host = %identity.host, url, error = %e, "geo probe url errored, trying next");
                continue;
            }
        };
        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                debug!(host = %identity.host, url, error = %e, "geo probe body read failed, trying next");
                continue;
            }
        };

        if !policy.include_keywords.is_empty()
            && !keywords_match(&body, &policy.include_keywords, policy.include_combinator)
        {
            continue;
        }
        if !policy.exclude_keywords.is_empty()
            && keywords_match(&body, &policy.exclude_keywords, policy.exclude_combinator)
        {
            continue;
        }

        let exit_ip = serde_json::from_str::<GeoBody>(&body)
            .map(|g| g.ip)
            .unwrap_or_default();
        return (true, exit_ip);
    }

    (false, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_policy_disabled_short_circuits() {
        // Exercised indirectly via check_geo in async tests below; this
        // guards the synchronous precondition the async test relies on.
        let policy = GeoPolicy {
            enabled: false,
            ..Default::default()
        };
        assert!(!policy.enabled);
    }

    #[tokio::test]
    async fn disabled_geo_policy_always_passes() {
        let identity = ProxyIdentity {
            host: "127.0.0.1".into(),
            port: 1,
            username: String::new(),
            password: String::new(),
        };
        let policy = GeoPolicy::default();
        let (passed, ip) = check_geo(&identity, &policy, Duration::from_secs(10)).await;
        assert!(passed);
        assert!(ip.is_empty());
    }

    #[test]
    fn exclude_or_substring_semantics_truth_table() {
        let kws = vec!["HK".to_string(), "TW".to_string()];
        assert!(keywords_match("exit country: HK", &kws, Combinator::Or));
        assert!(keywords_match("HKLM registry dump", &kws, Combinator::Or));
        assert!(!keywords_match("exit country: DE", &kws, Combinator::Or));
    }
}
