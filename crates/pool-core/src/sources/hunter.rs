//! Hunter commercial intel source: 7-day lookback window.

use super::commercial::CommercialApiSource;
use crate::config::HunterSourceConfig;
use std::time::Duration;

pub fn build(cfg: &HunterSourceConfig) -> CommercialApiSource {
    CommercialApiSource::new(
        "hunter",
        cfg.endpoint.clone(),
        cfg.query.clone(),
        cfg.api_key.clone(),
        cfg.max_size,
        Duration::from_secs(cfg.fetch_cadence_mins * 60),
        Duration::from_secs(cfg.request_timeout_secs),
        7,
    )
}
