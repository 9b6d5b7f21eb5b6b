//! Round-robin dial dispatcher (spec.md §4.6).
//!
//! The dispatcher never mutates `alive`: liveness is exclusively the
//! recheck loop's responsibility, so one bad destination can't degrade
//! the pool for all future traffic.

use crate::error::{PoolError, Result};
use crate::store::PoolStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct Dispatcher {
    store: Arc<PoolStore>,
    check_interval: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<PoolStore>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
        }
    }

    /// Pick the next alive proxy and dial `addr` through it.
    ///
    /// `tokio_socks`'s connect future is itself cancel-safe (dropping it
    /// mid-handshake closes the socket), so racing it against `cancel`
    /// inside `tokio::select!` satisfies spec.md §4.6 step 3 without a
    /// helper task.
    #[instrument(skip(self, cancel), fields(addr = %addr))]
    pub async fn dial(
        &self,
        cancel: CancellationToken,
        network: &str,
        addr: &str,
    ) -> Result<TcpStream> {
        let record = self
            .store
            .pick_next_alive()
            .ok_or(PoolError::NoAvailableProxies)?;

        let proxy_addr = format!("{}:{}", record.host, record.port);
        let deadline = self.check_interval + record.latency;

        let dial = async {
            if record.username.is_empty() {
                Socks5Stream::connect(proxy_addr.as_str(), addr).await
            } else {
                Socks5Stream::connect_with_password(
                    proxy_addr.as_str(),
                    addr,
                    &record.username,
                    &record.password,
                )
                .await
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(url = %record.url, "dial cancelled by caller");
                Err(PoolError::DialFailed { url: record.url.clone(), reason: "cancelled".into() })
            }
            timed = tokio::time::timeout(deadline, dial) => {
                match timed {
                    Ok(Ok(stream)) => {
                        let local = stream.get_ref().local_addr().map(|a| a.to_string()).unwrap_or_default();
                        info!(
                            network,
                            remote = addr,
                            local = %local,
                            url = %record.url,
                            exit_ip = %record.exit_ip,
                            "dial success"
                        );
                        Ok(stream.into_inner())
                    }
                    Ok(Err(e)) => {
                        warn!(url = %record.url, error = %e, "dial failed");
                        Err(PoolError::DialFailed { url: record.url.clone(), reason: e.to_string() })
                    }
                    Err(_elapsed) => {
                        warn!(url = %record.url, ?deadline, "dial timed out");
                        Err(PoolError::DialFailed { url: record.url.clone(), reason: "timed out".into() })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_with_empty_pool_fails_with_no_available_proxies() {
        let store = Arc::new(PoolStore::new("unused.json"));
        let dispatcher = Dispatcher::new(store, Duration::from_secs(5));
        let err = dispatcher
            .dial(CancellationToken::new(), "tcp", "example.com:443")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NoAvailableProxies));
    }
}
