//! `tgo list`: show what a sync would select, without transferring.
//!
//! Runs the same resolution and selection as a sync cycle, then prints the
//! selected set ordered by (sanitized display name, identity). The cache is
//! still refreshed — listing is a metadata pass — but history is never
//! written.

use anyhow::Result;
use tracing::warn;

use crate::cache::CatalogCache;
use crate::config::Config;
use crate::device::DeviceClient;
use crate::models::Recording;
use crate::pipeline::CancelToken;
use crate::select::{listing_order, KindGate};
use crate::sync::{collect_matches, load_history};

/// Options resolved from the `list` command line.
#[derive(Debug, Default)]
pub struct ListOpts {
    pub search: String,
    pub kinds: KindGate,
    pub invert: bool,
    pub ignore_history: bool,
    /// Expand each entry with its resolved fields.
    pub long: bool,
}

pub async fn run_list(config: &Config, opts: &ListOpts) -> Result<()> {
    let client = DeviceClient::new(config.devices.http_timeout_secs)?;
    let cancel = CancelToken::new();
    let mut cache = CatalogCache::load(config.cache.path.as_deref());
    let history = load_history(config, opts.ignore_history);

    let mut matches = collect_matches(
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

    if let Err(err) = cache.save() {
        warn!(error = %err, "cache save failed");
    }

    listing_order(&mut matches);
    for rec in &matches {
        println!("{} {}", rec.identity, rec.build_name);
        if opts.long {
            print_fields(rec);
        }
    }
    Ok(())
}

/// Aligned field dump for `--long`.
fn print_fields(rec: &Recording) {
    let rows: Vec<(&str, String)> = vec![
        ("device", rec.device.clone()),
        ("recording id", rec.recording_id.to_string()),
        ("type", rec.kind.to_string()),
        ("status", rec.status.as_str().to_string()),
        ("series", rec.series.clone()),
        ("season", rec.season.clone()),
        ("episode", rec.episode.clone()),
        ("title", rec.title.clone()),
        ("genre", rec.genre.clone()),
        ("airdate", rec.airdate.clone()),
        ("date", rec.date.clone()),
        ("end", rec.end_raw.clone()),
        ("height", rec.height.to_string()),
        ("duration", rec.duration_secs.to_string()),
        ("display name", rec.display_name.clone()),
    ];
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        if !value.is_empty() {
            println!("  {:<width$} {}", format!("{}:", key), value, width = width + 1);
        }
    }
}
