//! The three cooperative background loops (spec.md §4.5): ingest,
//! recheck, snapshot.

use crate::config::{GeoPolicy, LivenessPolicy};
use crate::model::{parse_proxy_url, ProxyInfo};
use crate::probe::{check_geo, check_liveness};
use crate::source::SourceRegistry;
use crate::store::PoolStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Candidates whose latency probe exceeds this are rejected even if
/// `alive` would otherwise be true (spec.md §3 invariant 2).
const MAX_ACCEPTABLE_LATENCY: Duration = Duration::from_secs(5);

/// Bounded parallelism across sources within one ingest round
/// (spec.md §4.5: "bounded parallelism = 4").
const SOURCE_PARALLELISM: usize = 4;

async fn probe_and_insert(
    store: &Arc<PoolStore>,
    candidate: String,
    source_tag: String,
    liveness: &LivenessPolicy,
    geo: &GeoPolicy,
) {
    let (canonical, identity) = match parse_proxy_url(&candidate) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(candidate, error = %e, "unparseable candidate, dropping");
            return;
        }
    };
    if store.contains(&canonical) {
        return;
    }

    let (geo_ok, exit_ip) = check_geo(&identity, geo, liveness.check_interval()).await;
    if !geo_ok {
        debug!(url = %canonical, "probeFailed: geo policy rejected candidate");
        return;
    }

    let (alive, latency) = check_liveness(&identity, liveness).await;
    if !alive || latency >= MAX_ACCEPTABLE_LATENCY {
        debug!(url = %canonical, alive, ?latency, "probeFailed: liveness rejected candidate");
        return;
    }

    let mut info = ProxyInfo::new(canonical, identity, source_tag);
    info.alive = true;
    info.latency = latency;
    info.exit_ip = exit_ip;
    info.last_checked = chrono::Utc::now();
    store.insert(info);
}

/// One ingest pass: pull from every due source with bounded
/// parallelism, probe every emitted candidate through a worker pool
/// sized `maxConcurrentReq`, and cancel all in-flight fetches the
/// instant the live set reaches `min_size`. Returns whether any source
/// was actually due (and thus whether this round did real work) so the
/// caller knows whether to park instead of looping again immediately.
#[instrument(skip_all)]
async fn run_ingest_round(
    store: &Arc<PoolStore>,
    registry: &Arc<SourceRegistry>,
    liveness: &LivenessPolicy,
    geo: &GeoPolicy,
    min_size: usize,
) -> bool {
    let due = registry.due_sources();
    if due.is_empty() {
        return false;
    }

    let cancel = CancellationToken::new();
    let probe_pool = Arc::new(Semaphore::new(liveness.concurrency.max(1)));
    let source_gate = Arc::new(Semaphore::new(SOURCE_PARALLELISM));

    let mut source_tasks = Vec::new();
    for source in due {
        let store = store.clone();
        let liveness = liveness.clone();
        let geo = geo.clone();
        let cancel = cancel.clone();
        let probe_pool = probe_pool.clone();
        let source_gate = source_gate.clone();
        let min_size = min_size;

        source_tasks.push(tokio::spawn(async move {
            let _gate_permit = source_gate.acquire().await.ok();
            let tag = source.name();
            let mut rx = source.fetch(cancel.clone());
            let mut probe_tasks = Vec::new();

            while let Some(candidate) = rx.recv().await {
                if store.alive_count() >= min_size {
                    cancel.cancel();
                    break;
                }
                let permit = match probe_pool.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let store = store.clone();
                let tag = tag.clone();
                let liveness = liveness.clone();
                let geo = geo.clone();
                probe_tasks.push(tokio::spawn(async move {
                    probe_and_insert(&store, candidate, tag, &liveness, &geo).await;
                    drop(permit);
                    if store.alive_count() >= min_size {
                        // best-effort: racey but harmless, recheck loop
                        // and the outer ingest loop converge regardless
                    }
                }));
            }

            for t in probe_tasks {
                let _ = t.await;
            }
        }));
    }

    for t in source_tasks {
        let _ = t.await;
    }

    true
}

/// Ingest loop: parks on `notify` (woken when the live set dips below
/// `min_size`) with a `probe_interval` safety-net timeout instead of
/// busy-spinning whenever a round does no work — either because the
/// pool is already full, or because every source is off its fetch
/// cadence even though the live set is still below `min_size` (spec.md
/// §9 open question 2; the original's `StartAutoSource` spins in both
/// of those cases).
pub async fn run_ingest_loop(
    store: Arc<PoolStore>,
    registry: Arc<SourceRegistry>,
    liveness: LivenessPolicy,
    geo: GeoPolicy,
    min_size: usize,
    notify: Arc<Notify>,
) {
    loop {
        let did_work = if store.alive_count() >= min_size {
            false
        } else {
            run_ingest_round(&store, &registry, &liveness, &geo, min_size).await
        };

        if !did_work {
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(liveness.check_interval()) => {}
            }
        }
    }
}

/// Recheck loop: continuously re-probes liveness for records whose
/// `lastChecked` has aged past their source's cadence (the original's
/// `shouldCheckNow`, switching on `p.Source`, falling back to the
/// global check interval for a source with no override). Never removes
/// a record; wakes the ingest loop if the live count falls back below
/// `min_size`.
#[instrument(skip_all)]
pub async fn run_recheck_loop(
    store: Arc<PoolStore>,
    liveness: LivenessPolicy,
    min_size: usize,
    notify: Arc<Notify>,
) {
    let probe_pool = Arc::new(Semaphore::new(liveness.concurrency.max(1)));

    loop {
        let now = chrono::Utc::now();
        let due: Vec<_> = store
            .snapshot()
            .into_iter()
            .filter(|r| {
                let cadence = liveness.recheck_cadence_for(&r.source);
                now.signed_duration_since(r.last_checked)
                    > chrono::Duration::from_std(cadence).unwrap_or(chrono::Duration::zero())
            })
            .collect();

        let mut tasks = Vec::new();
        for record in due {
            let permit = match probe_pool.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let store = store.clone();
            let liveness = liveness.clone();
            tasks.push(tokio::spawn(async move {
                let (_, identity) = match parse_proxy_url(&record.url) {
                    Ok(p) => p,
                    Err(_) => return,
                };
                let (alive, latency) = check_liveness(&identity, &liveness).await;
                store.update_probe_result(&record.url, alive, latency, None);
                drop(permit);
            }));
        }
        for t in tasks {
            let _ = t.await;
        }

        if store.alive_count() < min_size {
            notify.notify_one();
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Snapshot loop: persists the store on a short period (spec.md §9
/// open question 1 resolved to 5s).
#[instrument(skip_all)]
pub async fn run_snapshot_loop(store: Arc<PoolStore>) {
    const SNAPSHOT_PERIOD: Duration = Duration::from_secs(5);
    loop {
        tokio::time::sleep(SNAPSHOT_PERIOD).await;
        if let Err(e) = store.save().await {
            warn!(error = %e, "snapshot save failed, retrying next period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LivenessPolicy;

    #[tokio::test]
    async fn probe_and_insert_skips_already_present_url() {
        let store = Arc::new(PoolStore::new("unused.json"));
        let (canonical, identity) = parse_proxy_url("1.2.3.4:1080").unwrap();
        let mut existing = ProxyInfo::new(canonical.clone(), identity, "file");
        existing.alive = true;
        store.insert(existing);

        let liveness = LivenessPolicy {
            probe_urls: vec![],
            ..Default::default()
        };
        let geo = GeoPolicy::default();
        probe_and_insert(&store, "1.2.3.4:1080".into(), "file".into(), &liveness, &geo).await;

        assert_eq!(store.len(), 1);
    }
}
