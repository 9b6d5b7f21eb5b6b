//! The resolved configuration the core consumes. Loading, defaulting,
//! and validating the YAML file on disk is the binary crate's job
//! (spec.md §1's "out of scope" list); this module only describes the
//! shape the core is handed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    #[serde(default = "default_bind_port")]
    pub port: u16,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_bind_port() -> u16 {
    1080
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_bind_port(),
            credentials: Vec::new(),
        }
    }
}

impl ListenerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessPolicy {
    #[serde(default = "default_probe_urls")]
    pub probe_urls: Vec<String>,
    #[serde(default)]
    pub response_keywords: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Per-source recheck cadence, keyed on the source tag (e.g.
    /// `"file"`, `"hunter"`, or a custom source's name). A source with
    /// no entry here falls back to `check_interval_secs`.
    #[serde(default)]
    pub recheck_cadence_secs: std::collections::HashMap<String, u64>,
}

fn default_probe_urls() -> Vec<String> {
    vec!["https://www.gstatic.com/generate_204".to_string()]
}
fn default_concurrency() -> usize {
    20
}
fn default_check_interval_secs() -> u64 {
    10
}
fn default_min_size() -> usize {
    10
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            probe_urls: default_probe_urls(),
            response_keywords: Vec::new(),
            concurrency: default_concurrency(),
            check_interval_secs: default_check_interval_secs(),
            min_size: default_min_size(),
            recheck_cadence_secs: std::collections::HashMap::new(),
        }
    }
}

impl LivenessPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// The recheck cadence for one source tag (original's
    /// `shouldCheckNow`, switching on `p.Source`), falling back to the
    /// global check interval when the source has no explicit override.
    pub fn recheck_cadence_for(&self, source: &str) -> Duration {
        self.recheck_cadence_secs
            .get(source)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| self.check_interval())
    }
}

/// How an include/exclude keyword set combines multiple keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

impl Default for Combinator {
    fn default() -> Self {
        Combinator::Or
    }
}

/// Evaluate a keyword set against a body per spec.md §8 invariant 5:
/// OR passes on any match, AND requires all to match; an empty set
/// never rejects; an empty-string keyword inside a non-empty list is
/// a pass-through (always counts as matched).
pub fn keywords_match(body: &str, keywords: &[String], combinator: Combinator) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let mut hits = keywords
        .iter()
        .map(|k| k.is_empty() || body.contains(k.as_str()));
    match combinator {
        Combinator::Or => hits.any(|m| m),
        Combinator::And => hits.all(|m| m),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub probe_urls: Vec<String>,
    #[serde(default)]
    pub include_keywords: Vec<String>,
    #[serde(default)]
    pub include_combinator: Combinator,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub exclude_combinator: Combinator,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HunterSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_fetch_cadence_mins")]
    pub fetch_cadence_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuakeSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_fetch_cadence_mins")]
    pub fetch_cadence_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_fetch_cadence_mins")]
    pub fetch_cadence_mins: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_fetch_cadence_mins")]
    pub fetch_cadence_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Json,
    Text,
    Xpath,
}

/// Field selectors for extracting a proxy record out of one list
/// element. For `json`/`text` responses these are dotted JSON paths;
/// for `xpath` responses (see `ResponseType::Xpath`) these are CSS
/// selectors evaluated with the `scraper` crate — the corpus carries
/// no XPath-on-HTML crate, and a CSS selector is the closest
/// idiomatic substitute for "locate a node inside an extracted
/// element" (documented in DESIGN.md).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyExtractConfig {
    pub proxy_list_path: String,
    #[serde(default)]
    pub ip_field: String,
    #[serde(default)]
    pub port_field: String,
    #[serde(default)]
    pub user_field: String,
    #[serde(default)]
    pub pass_field: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSourceConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub response_type: ResponseType,
    #[serde(default)]
    pub proxy_config: ProxyExtractConfig,
    #[serde(default)]
    pub enable_paging: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_fetch_cadence_mins")]
    pub fetch_cadence_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_method() -> String {
    "GET".to_string()
}
fn default_page_size() -> usize {
    10
}
fn default_max_size() -> usize {
    100
}
fn default_fetch_cadence_mins() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    15
}

impl CustomSourceConfig {
    /// spec.md §4.2: `{page}` must appear in endpoint or body if paging
    /// is enabled; `{pageSize}` absence is a warning only.
    pub fn validate(&self) -> Result<(), String> {
        if self.enable_paging
            && !self.endpoint.contains("{page}")
            && !self.body.contains("{page}")
        {
            return Err(format!(
                "custom source `{}`: pagination enabled but neither endpoint nor body contains {{page}}",
                self.name
            ));
        }
        if self.response_type == ResponseType::Json && self.proxy_config.proxy_list_path.is_empty()
        {
            return Err(format!(
                "custom source `{}`: json response type requires proxy_config.proxy_list_path",
                self.name
            ));
        }
        if self.response_type == ResponseType::Xpath
            && self.proxy_config.proxy_list_path.is_empty()
        {
            return Err(format!(
                "custom source `{}`: xpath response type requires proxy_config.proxy_list_path",
                self.name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesConfig {
    #[serde(default)]
    pub hunter: HunterSourceConfig,
    #[serde(default)]
    pub quake: QuakeSourceConfig,
    #[serde(default)]
    pub file: FileSourceConfig,
    #[serde(default)]
    pub checker_proxy: CheckerProxyConfig,
    #[serde(default)]
    pub customs: Vec<CustomSourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolvedConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(rename = "checkSock", default)]
    pub liveness: LivenessPolicy,
    #[serde(rename = "checkGeolocate", default)]
    pub geo: GeoPolicy,
    #[serde(rename = "sourcesConfig", default)]
    pub sources: SourcesConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            liveness: LivenessPolicy::default(),
            geo: GeoPolicy::default(),
            sources: SourcesConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_match_truth_table() {
        let kws = vec!["HK".to_string(), "TW".to_string()];
        assert!(keywords_match("exit is in HK", &kws, Combinator::Or));
        assert!(!keywords_match("exit is in DE", &kws, Combinator::Or));
        // substring semantics: HKLM contains "HK"
        assert!(keywords_match("HKLM registry", &kws, Combinator::Or));

        assert!(!keywords_match("only HK here", &kws, Combinator::And));
        assert!(keywords_match("both HK and TW", &kws, Combinator::And));
    }

    #[test]
    fn empty_keyword_set_never_rejects() {
        assert!(keywords_match("anything", &[], Combinator::Or));
        assert!(keywords_match("anything", &[], Combinator::And));
    }

    #[test]
    fn empty_string_keyword_is_pass_through() {
        let kws = vec!["".to_string(), "never-matches-anything".to_string()];
        assert!(keywords_match("some body", &kws, Combinator::Or));
    }

    #[test]
    fn custom_source_requires_page_token_when_paging_enabled() {
        let mut cfg = CustomSourceConfig {
            name: "acme".into(),
            endpoint: "https://acme.example/list".into(),
            method: "GET".into(),
            headers: Default::default(),
            body: String::new(),
            response_type: ResponseType::Text,
            proxy_config: Default::default(),
            enable_paging: true,
            page_size: 10,
            max_size: 100,
            fetch_cadence_mins: 30,
            request_timeout_secs: 15,
        };
        assert!(cfg.validate().is_err());
        cfg.endpoint = "https://acme.example/list?p={page}".into();
        assert!(cfg.validate().is_ok());
    }
}
