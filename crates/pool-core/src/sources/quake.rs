//! Quake commercial intel source: 1-day lookback window.

use super::commercial::CommercialApiSource;
use crate::config::QuakeSourceConfig;
use std::time::Duration;

pub fn build(cfg: &QuakeSourceConfig) -> CommercialApiSource {
    CommercialApiSource::new(
        "quake",
        cfg.endpoint.clone(),
        cfg.query.clone(),
        cfg.api_key.clone(),
        cfg.max_size,
        Duration::from_secs(cfg.fetch_cadence_mins * 60),
        Duration::from_secs(cfg.request_timeout_secs),
        1,
    )
}
