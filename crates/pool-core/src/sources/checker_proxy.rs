//! Archival list source: walks the last `LOOKBACK_DAYS` days backward
//! from yesterday, fetching a daily proxy-list snapshot per date. A
//! failing day does not abort the walk (spec.md §4.2).

use crate::source::{Source, SourceBase};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const LOOKBACK_DAYS: i64 = 5;

#[derive(Debug, Deserialize)]
struct DailyEnvelope {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: DailyData,
}

#[derive(Debug, Default, Deserialize)]
struct DailyData {
    #[serde(default, rename = "proxyList")]
    proxy_list: Vec<String>,
}

pub struct CheckerProxySource {
    base: Arc<SourceBase>,
    client: Client,
    endpoint: String,
}

impl CheckerProxySource {
    pub fn new(endpoint: String, fetch_cadence: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base: Arc::new(SourceBase::new("checkerProxy", fetch_cadence)),
            client,
            endpoint,
        }
    }
}

impl Source for CheckerProxySource {
    fn name(&self) -> String {
        self.base.name()
    }

    fn fetch(&self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        self.base.stamp_fetch_start();
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            for days_back in 1..=LOOKBACK_DAYS {
                if cancel.is_cancelled() {
                    break;
                }
                let date = (chrono::Utc::now() - chrono::Duration::days(days_back))
                    .format("%Y-%m-%d")
                    .to_string();
                let url = format!("{endpoint}/{date}");

                let resp = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = client.get(&url).send() => r,
                };

                let envelope: DailyEnvelope = match resp {
                    Ok(r) => match r.json().await {
                        Ok(e) => e,
                        Err(e) => {
                            warn!(source = "checkerProxy", date, error = %e, "malformed day, continuing walk");
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!(source = "checkerProxy", date, error = %e, "transient fetch error, continuing walk");
                        continue;
                    }
                };

                if !envelope.success {
                    warn!(source = "checkerProxy", date, message = %envelope.message, "day reported failure, continuing walk");
                    continue;
                }

                for item in envelope.data.proxy_list {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if tx.send(format!("socks5://{item}")).await.is_err() {
                        return;
                    }
                }
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
