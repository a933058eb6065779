//! Poll-cycle orchestration.
//!
//! Coordinates one full cycle (or auto-repeating cycles): load the history
//! and catalog cache, poll each device's listing, resolve metadata (from
//! cache when fresh), select new recordings, print the per-device summary,
//! then run the transfer pipeline per match and commit history. Devices and
//! recordings are processed strictly sequentially; the only shared state is
//! the Ctrl-C cancel token.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cache::CatalogCache;
use crate::config::Config;
use crate::device::{gather_devices, DeviceClient};
use crate::history::HistoryStore;
use crate::models::{CycleStats, DeviceInfo, MediaKind, Recording};
use crate::pipeline::{history_descriptor, CancelToken, ItemOutcome, Pipeline};
use crate::resolve;
use crate::select::{Decision, KindGate, SearchSpec, Selector};

/// Options resolved from the `sync` command line.
#[derive(Debug, Default)]
pub struct SyncOpts {
    pub search: String,
    pub kinds: KindGate,
    pub invert: bool,
    /// Mark matches complete without downloading.
    pub complete: bool,
    /// Load an empty history (reprocess everything).
    pub ignore_history: bool,
    /// No downloads, subprocesses, moves, or cache/history writes.
    pub dry_run: bool,
    /// Keep cycling with `run.repeat_secs` sleeps in between.
    pub repeat: bool,
}

pub async fn run_sync(config: &Config, opts: &SyncOpts) -> Result<()> {
    // An invalid search pattern is a configuration error, caught before any
    // network traffic.
    SearchSpec::compile(&opts.search)?;

    let client = DeviceClient::new(config.devices.http_timeout_secs)?;
    let cancel = CancelToken::new();
    spawn_cancel_watcher(cancel.clone());

    let mut cache = CatalogCache::load(config.cache.path.as_deref());

    loop {
        let mut history = load_history(config, opts.ignore_history);
        info!(entries = history.len(), "transfer history loaded");

        let matches = collect_matches(
            config,
            &client,
            &mut cache,
            &history,
            &opts.search,
            opts.kinds,
            opts.invert,
            &cancel,
        )
        .await?;

        if !opts.dry_run {
            if let Err(err) = cache.save() {
                warn!(error = %err, "cache save failed, continuing");
            }
        }

        let pipeline = Pipeline::new(config, &client, cancel.clone());
        for rec in &matches {
            if cancel.is_cancelled() {
                break;
            }

            if opts.complete {
                if opts.dry_run {
                    info!(identity = %rec.identity, name = %rec.display_name, "dry run: would mark complete");
                } else {
                    info!(identity = %rec.identity, name = %rec.display_name, "marking complete without download");
                    if let Err(err) = history.append(&rec.identity, &history_descriptor(rec)) {
                        warn!(identity = %rec.identity, error = %err, "history append failed");
                    }
                }
                continue;
            }

            match pipeline.run_item(rec, &mut history, opts.dry_run).await {
                Ok(ItemOutcome::Done(_)) | Ok(ItemOutcome::Skipped) => {}
                Ok(ItemOutcome::Failed) => {
                    // Already logged with device and identity; next item.
                }
                Err(err) => {
                    info!(error = %err, "run interrupted");
                    return Ok(());
                }
            }
        }

        if !opts.repeat || cancel.is_cancelled() {
            break;
        }
        info!(secs = config.run.repeat_secs, "sleeping before next cycle");
        interruptible_sleep(config.run.repeat_secs, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }

    if cancel.is_cancelled() {
        info!("interrupted, exiting");
    }
    Ok(())
}

/// Poll every device, resolve and select recordings, and print per-device
/// summaries. Shared by `sync` and `list`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn collect_matches(
    config: &Config,
    client: &DeviceClient,
    cache: &mut CatalogCache,
    history: &HistoryStore,
    search: &str,
    kinds: KindGate,
    invert: bool,
    cancel: &CancelToken,
) -> Result<Vec<Recording>> {
    let search = SearchSpec::compile(search)?;
    let mut selector = Selector::new(
        history,
        search,
        kinds,
        invert,
        config.filters.delay_secs,
        config.filters.min_duration_secs,
        config.filters.min_height,
    );

    let devices = gather_devices(config, client).await;
    if devices.is_empty() {
        warn!("no devices discovered or configured");
    }

    let mut matches = Vec::new();
    for device in &devices {
        if cancel.is_cancelled() {
            break;
        }
        let stats = poll_device(
            config,
            client,
            cache,
            &mut selector,
            device,
            &mut matches,
            cancel,
        )
        .await;
        print_device_summary(&device.addr, &stats);
    }
    Ok(matches)
}

async fn poll_device(
    config: &Config,
    client: &DeviceClient,
    cache: &mut CatalogCache,
    selector: &mut Selector<'_>,
    device: &DeviceInfo,
    matches: &mut Vec<Recording>,
    cancel: &CancelToken,
) -> CycleStats {
    let mut stats = CycleStats::default();

    let ids = match client.recording_ids(&device.addr).await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(device = %device.addr, error = %err, "listing failed, skipping device");
            return stats;
        }
    };
    stats.listed = ids.len();
    info!(device = %device.addr, name = %device.name, recordings = ids.len(), "polling device");

    let now = Utc::now().timestamp();
    let live: HashSet<u64> = ids.iter().copied().collect();

    // Newest first: when two raw entries carry the same identity, the newer
    // copy is the one that wins first-seen dedup.
    for &id in ids.iter().rev() {
        if cancel.is_cancelled() {
            break;
        }

        let rec;
        if let Some(doc) = cache.fresh_doc(&device.addr, id, now, config.cache.validity_secs) {
            stats.cached += 1;
            rec = resolve::resolve_recording(doc, &config.naming, &device.addr, id);
        } else {
            match client.metadata(&device.addr, id).await {
                Some(doc) => {
                    rec = resolve::resolve_recording(&doc, &config.naming, &device.addr, id);
                    cache.insert(&device.addr, id, rec.status.as_str(), doc, now);
                }
                None => {
                    stats.failed_metadata += 1;
                    continue;
                }
            }
        }

        if rec.identity.is_empty() {
            stats.no_identity += 1;
            warn!(device = %device.addr, id, "dropping recording with no resolvable identity");
            continue;
        }

        let decision = selector.consider(&rec, now);
        if !matches!(
            decision,
            Decision::Unfinished | Decision::AlreadyTransferred
        ) {
            match rec.kind {
                MediaKind::Tv => stats.new_tv += 1,
                MediaKind::Movie => stats.new_movies += 1,
                MediaKind::Sports => stats.new_sports += 1,
            }
        }
        match decision {
            Decision::Selected => {
                stats.queued += 1;
                matches.push(rec);
            }
            Decision::Duplicate => stats.duplicates += 1,
            Decision::TooRecent => stats.too_recent += 1,
            Decision::TooShort => stats.too_short += 1,
            Decision::LowQuality => stats.low_quality += 1,
            _ => {}
        }
    }

    // Entries for recordings the device no longer lists are dead weight.
    cache.prune_device(&device.addr, &live);

    stats
}

fn print_device_summary(addr: &str, stats: &CycleStats) {
    println!("poll {}", addr);
    println!("  recordings listed: {}", stats.listed);
    if stats.cached > 0 {
        println!("  served from cache: {}", stats.cached);
    }
    if stats.failed_metadata > 0 {
        println!("  failed metadata: {}", stats.failed_metadata);
    }
    if stats.no_identity > 0 {
        println!("  unidentifiable: {}", stats.no_identity);
    }
    println!(
        "  new: {} tv / {} movies / {} sports",
        stats.new_tv, stats.new_movies, stats.new_sports
    );
    if stats.duplicates > 0 {
        println!("  duplicates: {}", stats.duplicates);
    }
    if stats.too_recent > 0 {
        println!("  settling: {}", stats.too_recent);
    }
    if stats.too_short > 0 {
        println!("  too short: {}", stats.too_short);
    }
    if stats.low_quality > 0 {
        println!("  below quality floor: {}", stats.low_quality);
    }
    println!("  queued: {}", stats.queued);
}

pub(crate) fn load_history(config: &Config, ignore: bool) -> HistoryStore {
    if ignore {
        HistoryStore::empty(&config.history.path)
    } else {
        HistoryStore::load(&config.history.path, config.history.secondary.as_deref())
    }
}

fn spawn_cancel_watcher(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

/// Sleep in one-second steps so Ctrl-C interrupts the repeat interval.
async fn interruptible_sleep(secs: u64, cancel: &CancelToken) {
    for _ in 0..secs {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
