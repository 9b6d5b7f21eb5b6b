//! Shared plumbing for the two paginated commercial intel APIs
//! (Hunter, Quake): interpolate page/query/key/lookback into a request
//! URL, decode a `{code, message, data}` envelope, and emit
//! `socks5://ip:port` candidates until `maxSize`, a short page, or
//! cancellation.

use crate::source::{Source, SourceBase};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use urlencoding::encode;

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Entry {
    ip: String,
    port: u16,
}

pub struct CommercialApiSource {
    base: Arc<SourceBase>,
    client: Client,
    endpoint: String,
    query: String,
    api_key: String,
    max_size: usize,
    page_size: usize,
    lookback_days: i64,
    success_code: i64,
}

impl CommercialApiSource {
    pub fn new(
        name: impl Into<String>,
        endpoint: String,
        query: String,
        api_key: String,
        max_size: usize,
        fetch_cadence: Duration,
        request_timeout: Duration,
        lookback_days: i64,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base: Arc::new(SourceBase::new(name, fetch_cadence)),
            client,
            endpoint,
            query,
            api_key,
            max_size,
            page_size: 20,
            lookback_days,
            success_code: 200,
        }
    }
}

impl Source for CommercialApiSource {
    fn name(&self) -> String {
        self.base.name()
    }

    fn fetch(&self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        self.base.stamp_fetch_start();
        let (tx, rx) = mpsc::channel(64);

        let base = self.base.clone();
        let client = self.client.clone();
        let name = self.base.name();
        let endpoint = self.endpoint.clone();
        let query = self.query.clone();
        let api_key = self.api_key.clone();
        let max_size = self.max_size;
        let page_size = self.page_size;
        let lookback_days = self.lookback_days;
        let success_code = self.success_code;

        tokio::spawn(async move {
            let mut fetched = 0usize;
            let mut page = 1usize;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let date = (chrono::Utc::now() - chrono::Duration::days(lookback_days))
                    .format("%Y-%m-%d")
                    .to_string();
                let url = format!(
                    "{}?page={}&page_size={}&query={}&key={}&start_date={}",
                    endpoint,
                    page,
                    page_size,
                    encode(&query),
                    encode(&api_key),
                    date,
                );

                let resp = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = client.get(&url).send() => r,
                };

                let resp = match resp {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(source = %name, error = %e, "transient fetch error");
                        break;
                    }
                };

                let envelope: Envelope = match resp.json().await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(source = %name, error = %e, "malformed response envelope");
                        break;
                    }
                };

                if envelope.code != success_code {
                    warn!(
                        source = %name,
                        code = envelope.code,
                        message = %envelope.message,
                        "authoritative rejection, disabling source"
                    );
                    base.set_available(false);
                    break;
                }

                let entries: Vec<Entry> = serde_json::from_value(envelope.data).unwrap_or_default();
                let got = entries.len();
                for entry in entries {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let candidate = format!("socks5://{}:{}", entry.ip, entry.port);
                    if tx.send(candidate).await.is_err() {
                        return;
                    }
                    fetched += 1;
                    if fetched >= max_size {
                        return;
                    }
                }

                if got < page_size {
                    break;
                }
                page += 1;
                debug!(source = %name, page, fetched, "sleeping between pages");
                tokio::time::sleep(Duration::from_secs(5)).await;
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
