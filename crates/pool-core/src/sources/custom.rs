//! User-defined source: driven entirely by configuration (spec.md
//! §4.2). Supports `json`, `text`, and `xpath` response bodies with
//! optional `{page}`/`{pageSize}` pagination.

use super::extract::{candidate_from_json_element, candidates_from_text, navigate_json};
use crate::config::{CustomSourceConfig, ResponseType};
use crate::source::{Source, SourceBase};
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct CustomSource {
    base: Arc<SourceBase>,
    client: Client,
    cfg: CustomSourceConfig,
}

impl CustomSource {
    pub fn new(cfg: CustomSourceConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        let cadence = std::time::Duration::from_secs(cfg.fetch_cadence_mins * 60);
        Self {
            base: Arc::new(SourceBase::new(cfg.name.clone(), cadence)),
            client,
            cfg,
        }
    }
}

fn extract_json(body: &str, cfg: &CustomSourceConfig) -> Vec<String> {
    let root: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(source = %cfg.name, error = %e, "malformed json body");
            return Vec::new();
        }
    };
    let Some(list) = navigate_json(&root, &cfg.proxy_config.proxy_list_path) else {
        warn!(source = %cfg.name, path = %cfg.proxy_config.proxy_list_path, "proxy list path not found");
        return Vec::new();
    };
    let Some(items) = list.as_array() else {
        warn!(source = %cfg.name, "proxy list path did not resolve to an array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|elem| candidate_from_json_element(elem, &cfg.proxy_config))
        .collect()
}

/// `xpath` responses are evaluated as CSS selectors via `scraper`
/// (see `ProxyExtractConfig`'s doc comment for why).
fn extract_xpath(body: &str, cfg: &CustomSourceConfig) -> Vec<String> {
    let document = Html::parse_document(body);
    let Ok(list_selector) = Selector::parse(&cfg.proxy_config.proxy_list_path) else {
        warn!(source = %cfg.name, selector = %cfg.proxy_config.proxy_list_path, "invalid list selector");
        return Vec::new();
    };

    let sub = |el: scraper::ElementRef, selector_str: &str| -> Option<String> {
        if selector_str.is_empty() {
            return None;
        }
        if let Some(attr) = selector_str.strip_prefix('@') {
            return el.value().attr(attr).map(str::to_string);
        }
        let selector = Selector::parse(selector_str).ok()?;
        el.select(&selector)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
    };

    document
        .select(&list_selector)
        .filter_map(|node| {
            let ip = sub(node, &cfg.proxy_config.ip_field)?;
            let port = sub(node, &cfg.proxy_config.port_field)?;
            let user = sub(node, &cfg.proxy_config.user_field);
            let pass = sub(node, &cfg.proxy_config.pass_field);
            Some(match (user, pass) {
                (Some(u), Some(p)) if !u.is_empty() => format!("socks5://{u}:{p}@{ip}:{port}"),
                _ => format!("socks5://{ip}:{port}"),
            })
        })
        .collect()
}

impl Source for CustomSource {
    fn name(&self) -> String {
        self.base.name()
    }

    fn fetch(&self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        self.base.stamp_fetch_start();
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let cfg = self.cfg.clone();

        tokio::spawn(async move {
            let mut page = 1usize;
            let mut total = 0usize;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let endpoint = if cfg.enable_paging {
                    cfg.endpoint
                        .replace("{page}", &page.to_string())
                        .replace("{pageSize}", &cfg.page_size.to_string())
                } else {
                    cfg.endpoint.clone()
                };
                let body_template = if cfg.enable_paging {
                    cfg.body
                        .replace("{page}", &page.to_string())
                        .replace("{pageSize}", &cfg.page_size.to_string())
                } else {
                    cfg.body.clone()
                };

                let method = cfg
                    .method
                    .parse::<reqwest::Method>()
                    .unwrap_or(reqwest::Method::GET);
                let mut req = client.request(method, &endpoint);
                for (k, v) in &cfg.headers {
                    req = req.header(k, v);
                }
                if !body_template.is_empty() {
                    req = req.body(body_template);
                }

                let resp = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = req.send() => r,
                };
                let body = match resp {
                    Ok(r) => match r.text().await {
                        Ok(b) => b,
                        Err(e) => {
                            warn!(source = %cfg.name, error = %e, "body read error");
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(source = %cfg.name, error = %e, "transient fetch error");
                        break;
                    }
                };

                let candidates = match cfg.response_type {
                    ResponseType::Json => extract_json(&body, &cfg),
                    ResponseType::Text => candidates_from_text(&body),
                    ResponseType::Xpath => extract_xpath(&body, &cfg),
                };
                let got = candidates.len();

                for candidate in candidates {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if tx.send(candidate).await.is_err() {
                        return;
                    }
                    total += 1;
                    if total >= cfg.max_size {
                        return;
                    }
                }

                if !cfg.enable_paging || got == 0 {
                    break;
                }
                page += 1;
            }
        });

        rx
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn due_for_fetch(&self) -> bool {
        self.base.due_for_fetch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyExtractConfig;
    use std::collections::HashMap;

    fn base_cfg() -> CustomSourceConfig {
        CustomSourceConfig {
            name: "acme".into(),
            endpoint: "https://acme.example/list?p={page}".into(),
            method: "GET".into(),
            headers: HashMap::new(),
            body: String::new(),
            response_type: ResponseType::Json,
            proxy_config: ProxyExtractConfig {
                proxy_list_path: "data".into(),
                ip_field: "ip".into(),
                port_field: "port".into(),
                user_field: String::new(),
                pass_field: String::new(),
            },
            enable_paging: true,
            page_size: 10,
            max_size: 25,
            fetch_cadence_mins: 30,
            request_timeout_secs: 15,
        }
    }

    #[test]
    fn extracts_json_list_of_objects() {
        let cfg = base_cfg();
        let body = r#"{"data": [{"ip": "1.1.1.1", "port": 1080}, {"ip": "2.2.2.2", "port": 1081}]}"#;
        let got = extract_json(body, &cfg);
        assert_eq!(got, vec!["socks5://1.1.1.1:1080", "socks5://2.2.2.2:1081"]);
    }

    #[test]
    fn extracts_json_list_of_strings_skipping_other_schemes() {
        let mut cfg = base_cfg();
        cfg.proxy_config.proxy_list_path = "list".into();
        let body = r#"{"list": ["1.1.1.1:1080", "http://skip:1", "socks5://2.2.2.2:1081"]}"#;
        let got = extract_json(body, &cfg);
        assert_eq!(got, vec!["1.1.1.1:1080", "socks5://2.2.2.2:1081"]);
    }
}
