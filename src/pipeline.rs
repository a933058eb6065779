//! The per-recording transfer pipeline.
//!
//! Each selected recording runs a fixed stage sequence with terminal states
//! Done / Failed / Skipped: segment probe → segment fetch and positional
//! reassembly into a single `.ts` container → optional caption extraction →
//! transcode (file or playlist input) → metadata tagging → move into the
//! type-specific destination tree → history commit. Stage failures are
//! isolated to the item; only user cancellation aborts the run, and it
//! cleans up the partial container first.
//!
//! A failed segment fetch fails the whole item by default — a container
//! missing segments plays as corrupt video. The `tools.allow_partial`
//! compatibility flag restores skip-and-continue for installations that
//! prefer a truncated recording over none.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, OutputConfig};
use crate::device::DeviceClient;
use crate::error::{Error, Stage};
use crate::history::HistoryStore;
use crate::models::{MediaKind, Recording};
use crate::sanitize::clean;

/// Shared cancellation flag, set by the Ctrl-C handler and checked at
/// segment granularity.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of one item.
#[derive(Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Placed at this path and committed to history.
    Done(PathBuf),
    /// A stage failed; logged, no history entry, other items unaffected.
    Failed,
    /// Dry run: nothing fetched, moved, or recorded.
    Skipped,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    client: &'a DeviceClient,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, client: &'a DeviceClient, cancel: CancelToken) -> Self {
        Self {
            config,
            client,
            cancel,
        }
    }

    /// Run the full stage sequence for one recording. `Err` is returned
    /// only for cancellation; every other failure resolves to
    /// [`ItemOutcome::Failed`].
    pub async fn run_item(
        &self,
        rec: &Recording,
        history: &mut HistoryStore,
        dry_run: bool,
    ) -> Result<ItemOutcome, Error> {
        let tools = &self.config.tools;
        let temp_dir = &self.config.output.temp_dir;
        let container = temp_dir.join(format!("{}.ts", rec.identity));

        if dry_run {
            info!(
                device = %rec.device,
                identity = %rec.identity,
                name = %rec.display_name,
                "dry run: would transfer"
            );
            return Ok(ItemOutcome::Skipped);
        }

        info!(
            device = %rec.device,
            identity = %rec.identity,
            name = %rec.display_name,
            "transferring"
        );

        // Reassemble the container unless a prior run already produced it
        // (idempotent retry) or the encoder reads the playlist directly.
        if tools.source == "segments" {
            if container.exists() {
                debug!(identity = %rec.identity, "container already present, skipping fetch");
            } else {
                match self.fetch_container(rec, &container).await {
                    Ok(()) => {}
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(err) => {
                        warn!(device = %rec.device, identity = %rec.identity, error = %err, "segment stage failed");
                        return Ok(ItemOutcome::Failed);
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Caption extraction is best-effort: a failure never blocks the
        // remaining stages.
        let mut captions: Option<PathBuf> = None;
        if tools.captions && tools.source == "segments" {
            let srt = temp_dir.join(format!("{}.srt", rec.identity));
            let args = fill_args(
                &tools.ccextractor_args,
                &[
                    ("input", &container.display().to_string()),
                    ("output", &srt.display().to_string()),
                ],
            );
            match run_tool(&tools.ccextractor, &args, Stage::Captions, &rec.identity) {
                Ok(()) if srt.exists() => captions = Some(srt),
                Ok(()) => {}
                Err(err) => warn!(device = %rec.device, identity = %rec.identity, error = %err, "caption extraction failed"),
            }
        }

        let final_path = if tools.transcode {
            let output = temp_dir.join(format!("{}.mp4", rec.identity));
            let input = if tools.source == "playlist" {
                match self
                    .client
                    .start_playback(&rec.device, rec.recording_id, rec.kind)
                    .await
                {
                    Ok(url) => url,
                    Err(err) => {
                        warn!(device = %rec.device, identity = %rec.identity, error = %err, "start playback failed");
                        return Ok(ItemOutcome::Failed);
                    }
                }
            } else {
                container.display().to_string()
            };

            let template = if captions.is_some() {
                &tools.transcode_cc_args
            } else {
                &tools.transcode_args
            };
            let captions_str = captions
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let args = fill_args(
                template,
                &[
                    ("input", input.as_str()),
                    ("playlist", input.as_str()),
                    ("captions", captions_str.as_str()),
                    ("output", &output.display().to_string()),
                ],
            );
            if let Err(err) = run_tool(&tools.ffmpeg, &args, Stage::Transcode, &rec.identity) {
                // The container stays in temp so a retry skips refetching.
                warn!(device = %rec.device, identity = %rec.identity, error = %err, "transcode failed");
                return Ok(ItemOutcome::Failed);
            }

            if tools.tag && !rec.tags.is_empty() {
                if let Err(err) = self.tag_file(&output, &rec.tags, &rec.identity) {
                    warn!(device = %rec.device, identity = %rec.identity, error = %err, "tagging failed, placing untagged");
                }
            }

            if !tools.keep_intermediate {
                remove_quietly(&container);
                if let Some(srt) = &captions {
                    remove_quietly(srt);
                }
            }
            output
        } else {
            container.clone()
        };

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let dest_dir = destination_dir(&self.config.output, rec);
        let placed = match place_file(
            &final_path,
            &dest_dir,
            &rec.build_name,
            &self.config.output.duplicates_dir,
        ) {
            Ok(path) => path,
            Err(err) => {
                // The file stays in the temp directory; not retried.
                warn!(device = %rec.device, identity = %rec.identity, error = %err, "move failed, leaving file in temp directory");
                return Ok(ItemOutcome::Failed);
            }
        };
        info!(identity = %rec.identity, path = %placed.display(), "placed");

        if let Err(err) = history.append(&rec.identity, &history_descriptor(rec)) {
            warn!(device = %rec.device, identity = %rec.identity, error = %err, "history append failed");
        }

        Ok(ItemOutcome::Done(placed))
    }

    /// Stage 1+2: probe the segment count, then fetch and concatenate the
    /// segments in order. Each segment is written to its own temp file,
    /// appended to the growing container, and removed.
    async fn fetch_container(&self, rec: &Recording, container: &Path) -> Result<(), Error> {
        let total = self
            .client
            .segment_count(&rec.device, rec.recording_id)
            .await?;
        info!(device = %rec.device, identity = %rec.identity, segments = total, "downloading");

        let result = self.fetch_segments(rec, container, total).await;
        if result.is_err() {
            // Never leave a partial container behind: the skip-if-exists
            // check would treat it as complete on the next run.
            remove_quietly(container);
        }
        result
    }

    async fn fetch_segments(
        &self,
        rec: &Recording,
        container: &Path,
        total: u32,
    ) -> Result<(), Error> {
        let mut out = std::fs::File::create(container).map_err(|source| Error::Persistence {
            op: "create",
            path: container.to_path_buf(),
            source,
        })?;
        let mut skipped = 0u32;

        for n in 1..=total {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let bytes = match self.client.fetch_segment(&rec.device, rec.recording_id, n).await {
                Ok(bytes) => bytes,
                Err(err) if self.config.tools.allow_partial => {
                    warn!(identity = %rec.identity, segment = n, error = %err, "segment fetch failed, skipping (allow_partial)");
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    return Err(Error::stage(
                        Stage::SegmentFetch,
                        &rec.identity,
                        format!("segment {}/{}: {}", n, total, err),
                    ));
                }
            };

            let seg_path = container.with_extension(format!("{:05}.ts", n));
            let append = std::fs::write(&seg_path, &bytes)
                .and_then(|_| out.write_all(&bytes))
                .and_then(|_| std::fs::remove_file(&seg_path));
            if let Err(source) = append {
                return Err(Error::Persistence {
                    op: "assemble",
                    path: container.to_path_buf(),
                    source,
                });
            }

            if n % 15 == 0 || n == total {
                debug!(identity = %rec.identity, segment = n, total, "fetched");
            }
        }

        if skipped > 0 {
            warn!(
                identity = %rec.identity,
                skipped,
                total,
                "container is PARTIAL: {} of {} segments missing",
                skipped,
                total
            );
        }
        Ok(())
    }

    /// Apply the recording's tag set via the encoder's metadata pass,
    /// rewriting the container in place.
    fn tag_file(
        &self,
        path: &Path,
        tags: &BTreeMap<String, String>,
        identity: &str,
    ) -> Result<(), Error> {
        let tmp = path.with_extension("tagged.mp4");
        let mut args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            path.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ];
        for (key, value) in tags {
            args.push("-metadata".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(tmp.display().to_string());

        run_tool(&self.config.tools.ffmpeg, &args, Stage::Tag, identity)?;
        std::fs::rename(&tmp, path).map_err(|source| Error::Persistence {
            op: "rename",
            path: tmp,
            source,
        })
    }
}

/// Fill `{key}` placeholders in a command argument template.
fn fill_args(template: &[String], fills: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            let mut filled = arg.clone();
            for (key, value) in fills {
                filled = filled.replace(&format!("{{{}}}", key), value);
            }
            filled
        })
        .collect()
}

/// Run an external tool, observing only its exit status.
fn run_tool(program: &str, args: &[String], stage: Stage, identity: &str) -> Result<(), Error> {
    debug!(program, ?args, "running external tool");
    let output = Command::new(program).args(args).output().map_err(|err| {
        Error::stage(
            stage,
            identity,
            format!("failed to execute '{}': {}", program, err),
        )
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::stage(
            stage,
            identity,
            format!("{} exited with {}: {}", program, output.status, stderr.trim()),
        ));
    }
    Ok(())
}

/// Where a recording belongs once final: tv under `Series/Season N` (flat
/// when directory creation is disabled), tv without season/episode data in
/// the fail directory, movies and sports in their flat roots.
fn destination_dir(output: &OutputConfig, rec: &Recording) -> PathBuf {
    match rec.kind {
        MediaKind::Tv if rec.season_episode_tag.is_empty() => output.fail_dir.clone(),
        MediaKind::Tv if output.create_season_dirs => output
            .tv_dir
            .join(clean(&rec.series))
            .join(format!("Season {}", season_number(&rec.season))),
        MediaKind::Tv => output.tv_dir.clone(),
        MediaKind::Movie => output.movie_dir.clone(),
        MediaKind::Sports => output.sports_dir.clone(),
    }
}

/// Human season number for directory names: `"03"` → `"3"`.
fn season_number(season: &str) -> &str {
    let trimmed = season.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}

/// Move `src` into `dest_dir` as `<stem>.<ext>`, creating directories on
/// demand. A name collision at the destination diverts the new file into
/// `duplicates_dir` — the existing file is never overwritten.
fn place_file(
    src: &Path,
    dest_dir: &Path,
    stem: &str,
    duplicates_dir: &Path,
) -> Result<PathBuf, Error> {
    let ext = src
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("ts");
    let file_name = format!("{}.{}", stem, ext);

    std::fs::create_dir_all(dest_dir).map_err(|source| Error::Persistence {
        op: "create",
        path: dest_dir.to_path_buf(),
        source,
    })?;

    let target_dir = if dest_dir.join(&file_name).exists() {
        std::fs::create_dir_all(duplicates_dir).map_err(|source| Error::Persistence {
            op: "create",
            path: duplicates_dir.to_path_buf(),
            source,
        })?;
        duplicates_dir
    } else {
        dest_dir
    };

    let target = target_dir.join(&file_name);
    move_file(src, &target).map_err(|source| Error::Persistence {
        op: "move",
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

/// The descriptor stored next to the identity in the history file.
pub fn history_descriptor(rec: &Recording) -> String {
    match rec.kind {
        MediaKind::Tv => format!("{} - {}", rec.series, rec.title),
        _ => rec.display_name.clone(),
    }
}

fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        // rename fails across filesystems
        Err(_) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %err, "could not remove file");
        }
    }
}
