//! Core data models used throughout tablo-fetch.
//!
//! These types represent the devices, normalized recordings, and per-cycle
//! counters that flow through the polling and transfer pipeline.

use std::collections::BTreeMap;

use serde::Deserialize;

/// A recording appliance, discovered or manually configured.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    /// IP address on the local network.
    pub addr: String,
    /// Device name as reported by the directory service.
    #[serde(default)]
    pub name: String,
    /// Hardware model identifier.
    #[serde(default)]
    pub board_type: String,
}

/// Content classification for a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Tv,
    Movie,
    Sports,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Tv => "tv",
            MediaKind::Movie => "movie",
            MediaKind::Sports => "sports",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recording state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Finished,
    Recording,
    Failed,
    Unknown,
}

impl RecordingStatus {
    /// Loose parse; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "finished" => RecordingStatus::Finished,
            "recording" => RecordingStatus::Recording,
            "failed" => RecordingStatus::Failed,
            _ => RecordingStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Finished => "finished",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Unknown => "unknown",
        }
    }
}

/// A normalized recording, derived fresh each cycle from the device's raw
/// metadata document. Never persisted — naming templates and filters are
/// reapplied every run so configuration changes take effect immediately.
#[derive(Debug, Clone)]
pub struct Recording {
    /// Address of the device this recording lives on.
    pub device: String,
    /// The device's own numeric id for the recording.
    pub recording_id: u64,
    /// Stable dedup key: canonical program id, or the derived digest when
    /// the device supplies none. Empty means the recording is unusable.
    pub identity: String,
    pub kind: MediaKind,
    pub status: RecordingStatus,
    pub series: String,
    /// Zero-padded two-digit season, e.g. `"03"`.
    pub season: String,
    /// Zero-padded two-digit episode, e.g. `"07"`.
    pub episode: String,
    pub title: String,
    pub description: String,
    pub genre: String,
    pub director: String,
    /// Original air date / release date string as reported.
    pub airdate: String,
    /// Recording date (or release year for movies).
    pub date: String,
    /// End timestamp string as reported, kept for the tag set.
    pub end_raw: String,
    /// End time resolved to UTC epoch seconds.
    pub end_epoch: i64,
    /// Video height in lines, 0 when unreported.
    pub height: i64,
    /// Duration in seconds, 0 when unreported.
    pub duration_secs: i64,
    /// `S##E##` marker; empty is the "no season/episode data" sentinel that
    /// diverts placement to the fail directory.
    pub season_episode_tag: String,
    /// Human-facing templated name.
    pub display_name: String,
    /// Sanitized on-disk name (no extension).
    pub build_name: String,
    /// Sanitized key→value metadata applied to the final container.
    pub tags: BTreeMap<String, String>,
}

/// Per-device counters for one poll cycle, printed as the cycle summary.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub listed: usize,
    pub cached: usize,
    pub failed_metadata: usize,
    pub no_identity: usize,
    pub new_tv: usize,
    pub new_movies: usize,
    pub new_sports: usize,
    pub duplicates: usize,
    pub too_recent: usize,
    pub too_short: usize,
    pub low_quality: usize,
    pub queued: usize,
}
