//! # tablo-fetch CLI (`tgo`)
//!
//! The `tgo` binary polls Tablo OTA DVR appliances for finished recordings,
//! figures out what is new against the transfer history, and pulls each new
//! recording through segment reassembly, transcode, tagging, and placement
//! into a media library tree.
//!
//! ## Usage
//!
//! ```bash
//! tgo --config ./tablo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tgo sync [PATTERN]` | Poll devices and transfer new matching recordings |
//! | `tgo list [PATTERN]` | Show what a sync would select, without transferring |
//! | `tgo devices` | Show discovered/configured appliances and reachability |
//!
//! ## Examples
//!
//! ```bash
//! # Transfer everything new
//! tgo sync
//!
//! # Transfer new episodes matching a pattern
//! tgo sync "The Simpsons"
//!
//! # Movies only, and keep polling every cycle interval
//! tgo sync --movies --repeat
//!
//! # See what would be picked up, with full metadata
//! tgo list --long
//!
//! # Mark everything matching as already transferred
//! tgo sync "The Simpsons" --complete
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tablo_fetch::config;
use tablo_fetch::device;
use tablo_fetch::listing::{self, ListOpts};
use tablo_fetch::select::KindGate;
use tablo_fetch::sync::{self, SyncOpts};

/// tablo-fetch — pull recordings off Tablo OTA DVRs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file runs with built-in defaults.
#[derive(Parser)]
#[command(
    name = "tgo",
    about = "Pull recordings off Tablo OTA DVRs",
    version,
    long_about = "tablo-fetch polls one or more Tablo appliances, resolves each recording's \
    metadata into a normalized record, skips everything already in the transfer history, and \
    runs new recordings through segment fetch, reassembly, transcode, tagging, and placement \
    into type-specific library directories."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./tablo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Poll devices and transfer new matching recordings.
    ///
    /// The search pattern is a case-insensitive regular expression matched
    /// against display names and genres; a bare recording id or program id
    /// also matches verbatim. No pattern selects everything new.
    Sync {
        /// Search pattern (joined when given as multiple words).
        search: Vec<String>,

        /// Process only TV shows.
        #[arg(long)]
        tv: bool,

        /// Process only movies.
        #[arg(long)]
        movies: bool,

        /// Process only sports events.
        #[arg(long)]
        sports: bool,

        /// Invert the selection: transfer what the pattern does NOT match.
        #[arg(long = "not")]
        invert: bool,

        /// Mark matching recordings as transferred without downloading.
        #[arg(long)]
        complete: bool,

        /// Ignore the history files (reprocess everything).
        #[arg(long)]
        ignore_history: bool,

        /// Show what would happen without downloading, moving, or writing
        /// history/cache.
        #[arg(long)]
        dry_run: bool,

        /// Keep polling, sleeping `run.repeat_secs` between cycles.
        #[arg(long)]
        repeat: bool,
    },

    /// Show what a sync would select, without transferring.
    List {
        /// Search pattern (joined when given as multiple words).
        search: Vec<String>,

        /// List only TV shows.
        #[arg(long)]
        tv: bool,

        /// List only movies.
        #[arg(long)]
        movies: bool,

        /// List only sports events.
        #[arg(long)]
        sports: bool,

        /// Invert the selection.
        #[arg(long = "not")]
        invert: bool,

        /// Ignore the history files (list everything, transferred or not).
        #[arg(long)]
        ignore_history: bool,

        /// Expand each entry with its resolved metadata fields.
        #[arg(long)]
        long: bool,
    },

    /// Show discovered/configured appliances and whether they respond.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync {
            search,
            tv,
            movies,
            sports,
            invert,
            complete,
            ignore_history,
            dry_run,
            repeat,
        } => {
            let opts = SyncOpts {
                search: search.join(" "),
                kinds: KindGate { tv, movies, sports },
                invert,
                complete,
                ignore_history,
                dry_run,
                repeat,
            };
            sync::run_sync(&cfg, &opts).await?;
        }
        Commands::List {
            search,
            tv,
            movies,
            sports,
            invert,
            ignore_history,
            long,
        } => {
            let opts = ListOpts {
                search: search.join(" "),
                kinds: KindGate { tv, movies, sports },
                invert,
                ignore_history,
                long,
            };
            listing::run_list(&cfg, &opts).await?;
        }
        Commands::Devices => {
            device::run_devices(&cfg).await?;
        }
    }

    Ok(())
}
