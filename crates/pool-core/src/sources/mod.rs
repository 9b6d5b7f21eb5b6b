//! Concrete discovery sources and the registry builder that turns a
//! resolved configuration into the set of sources a scheduling round
//! iterates over.

mod checker_proxy;
mod commercial;
mod custom;
mod extract;
mod file;
mod hunter;
mod quake;

use crate::config::ResolvedConfig;
use crate::source::{Source, SourceRegistry};
use std::sync::Arc;
use std::time::Duration;

pub use custom::CustomSource;
pub use file::FileSource;

/// Build the registry of enabled sources from a resolved config.
/// Disabled sources are simply omitted, not registered-then-skipped,
/// so a due-sources scan never has to reason about disabled entries.
pub fn build_registry(cfg: &ResolvedConfig) -> SourceRegistry {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    if cfg.sources.hunter.enabled {
        sources.push(Arc::new(hunter::build(&cfg.sources.hunter)));
    }
    if cfg.sources.quake.enabled {
        sources.push(Arc::new(quake::build(&cfg.sources.quake)));
    }
    if cfg.sources.file.enabled {
        sources.push(Arc::new(FileSource::new(
            cfg.sources.file.path.clone(),
            Duration::from_secs(cfg.sources.file.fetch_cadence_mins * 60),
        )));
    }
    if cfg.sources.checker_proxy.enabled {
        sources.push(Arc::new(checker_proxy::CheckerProxySource::new(
            cfg.sources.checker_proxy.endpoint.clone(),
            Duration::from_secs(cfg.sources.checker_proxy.fetch_cadence_mins * 60),
            Duration::from_secs(cfg.sources.checker_proxy.request_timeout_secs),
        )));
    }
    for custom_cfg in &cfg.sources.customs {
        sources.push(Arc::new(CustomSource::new(custom_cfg.clone())));
    }

    SourceRegistry::new(sources)
}
