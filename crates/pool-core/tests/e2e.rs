//! End-to-end scenarios from spec.md §8 that don't require live
//! upstream SOCKS5 infrastructure: pagination capping and
//! crash-mid-save recovery. Round-robin fairness and the keyword
//! truth table are covered as unit tests beside the code they exercise
//! (`store.rs`, `config.rs`) since they need no cross-module wiring.

use pool_core::config::{CustomSourceConfig, ProxyExtractConfig, ResponseType};
use pool_core::model::ProxyInfo;
use pool_core::source::Source;
use pool_core::store::PoolStore;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page_body(ips: &[(&str, u16)]) -> serde_json::Value {
    serde_json::json!({
        "data": ips.iter().map(|(ip, port)| serde_json::json!({"ip": ip, "port": port})).collect::<Vec<_>>()
    })
}

/// Scenario 6: a user-defined source with `maxSize=25` and pages of
/// 10, 10, 5 entries must yield exactly 25 candidates, not 30, and the
/// fetch loop must not issue a fourth page request.
#[tokio::test]
async fn pagination_stops_at_max_size_not_full_last_page() {
    let server = MockServer::start().await;

    let page1: Vec<(&str, u16)> = (0..10).map(|i| ("1.1.1.1", 2000 + i)).collect();
    let page2: Vec<(&str, u16)> = (0..10).map(|i| ("2.2.2.2", 2000 + i)).collect();
    let page3: Vec<(&str, u16)> = (0..5).map(|i| ("3.3.3.3", 2000 + i)).collect();

    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&page1)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&page2)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&page3)))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = CustomSourceConfig {
        name: "acme".into(),
        endpoint: format!("{}/list?page={{page}}", server.uri()),
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
    };

    let source = pool_core::sources::CustomSource::new(cfg);
    let mut rx = source.fetch(CancellationToken::new());

    let mut candidates = Vec::new();
    while let Some(c) = rx.recv().await {
        candidates.push(c);
    }

    assert_eq!(candidates.len(), 25);
}

/// Scenario 5: process killed mid-save leaves a `.tmp` sibling and an
/// intact previous version at the real path; a restart must load the
/// previous version and must never pick up the `.tmp`.
#[tokio::test]
async fn crash_mid_save_recovery_ignores_tmp_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aliveDataPath.json");

    let previous = PoolStore::new(&path);
    for i in 0..10u8 {
        let (canonical, identity) =
            pool_core::model::parse_proxy_url(&format!("10.0.0.{i}:1080")).unwrap();
        let mut info = ProxyInfo::new(canonical, identity, "file");
        info.alive = true;
        previous.insert(info);
    }
    previous.save().await.unwrap();

    // Simulate an in-flight save that was interrupted: a stray `.tmp`
    // with different (partial) content next to the completed real file.
    let tmp_path = dir.path().join("aliveDataPath.json.tmp");
    tokio::fs::write(&tmp_path, r#"{"incomplete": "#).await.unwrap();

    let reloaded = PoolStore::load(&path).await.unwrap();
    assert_eq!(reloaded.len(), 10);

    // The stray .tmp must still be exactly what we wrote; load() must
    // not have touched, repaired, or consumed it.
    let tmp_contents = tokio::fs::read_to_string(&tmp_path).await.unwrap();
    assert_eq!(tmp_contents, r#"{"incomplete": "#);
}
