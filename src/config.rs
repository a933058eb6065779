use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, deserialized from a TOML file and threaded as
/// an explicit value through every component — no ambient globals.
///
/// Every section and field has a default, so a missing config file runs the
/// tool with its built-in behavior (auto-discovery, history in
/// `tablo.history`, no cache, output under `./tv`, `./movies`, `./sports`).
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DevicesConfig {
    /// Query the vendor directory service for appliances on this network.
    #[serde(default = "default_true")]
    pub discover: bool,
    /// Manually configured device addresses, used alongside (or instead of)
    /// discovery.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            discover: true,
            addresses: Vec::new(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Catalog cache snapshot path. Unset disables caching entirely.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How long a finished entry may be served without a re-fetch.
    #[serde(default = "default_cache_validity")]
    pub validity_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            validity_secs: default_cache_validity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Primary append-only history file.
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    /// Optional externally-authored history merged at load time with lower
    /// precedence than the primary file.
    #[serde(default)]
    pub secondary: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            secondary: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct FiltersConfig {
    /// Recordings shorter than this are skipped.
    #[serde(default)]
    pub min_duration_secs: i64,
    /// Recordings below this video height are skipped.
    #[serde(default)]
    pub min_height: i64,
    /// Recordings must have ended at least this long ago (settling window).
    #[serde(default)]
    pub delay_secs: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    /// Custom template applied to every type unless a per-type template is
    /// set. Placeholders: resolved fields (`{series}`, `{title}`, ...) plus
    /// any dotted raw-metadata path.
    #[serde(default)]
    pub custom: Option<String>,
    #[serde(default)]
    pub tv: Option<String>,
    #[serde(default)]
    pub movie: Option<String>,
    #[serde(default)]
    pub sports: Option<String>,
}

impl NamingConfig {
    /// The template to apply for `kind`, if any.
    pub fn template_for(&self, kind: crate::models::MediaKind) -> Option<&str> {
        use crate::models::MediaKind;
        let specific = match kind {
            MediaKind::Tv => self.tv.as_deref(),
            MediaKind::Movie => self.movie.as_deref(),
            MediaKind::Sports => self.sports.as_deref(),
        };
        specific.or(self.custom.as_deref()).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_tv_dir")]
    pub tv_dir: PathBuf,
    #[serde(default = "default_movie_dir")]
    pub movie_dir: PathBuf,
    #[serde(default = "default_sports_dir")]
    pub sports_dir: PathBuf,
    /// TV recordings without season/episode data land here.
    #[serde(default = "default_fail_dir")]
    pub fail_dir: PathBuf,
    /// Files whose destination name already exists are diverted here,
    /// never overwriting the original.
    #[serde(default = "default_duplicates_dir")]
    pub duplicates_dir: PathBuf,
    /// Working directory for containers and intermediates.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Create `Series/Season N` trees under `tv_dir`; off = flat.
    #[serde(default = "default_true")]
    pub create_season_dirs: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            tv_dir: default_tv_dir(),
            movie_dir: default_movie_dir(),
            sports_dir: default_sports_dir(),
            fail_dir: default_fail_dir(),
            duplicates_dir: default_duplicates_dir(),
            temp_dir: default_temp_dir(),
            create_season_dirs: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Path to the external encoder executable.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Encoder argument template. `{input}` (or `{playlist}`) and
    /// `{output}` are filled per item.
    #[serde(default = "default_transcode_args")]
    pub transcode_args: Vec<String>,
    /// Encoder argument template used when a caption file was extracted;
    /// additionally fills `{captions}`.
    #[serde(default = "default_transcode_cc_args")]
    pub transcode_cc_args: Vec<String>,
    /// Path to the caption extractor executable.
    #[serde(default = "default_ccextractor")]
    pub ccextractor: String,
    /// Caption extractor argument template (`{input}`, `{output}`).
    #[serde(default = "default_ccextractor_args")]
    pub ccextractor_args: Vec<String>,
    /// Extract closed captions before transcoding.
    #[serde(default)]
    pub captions: bool,
    /// Run the encoder to produce the final container. Off places the raw
    /// concatenated container directly.
    #[serde(default = "default_true")]
    pub transcode: bool,
    /// Apply the recording's metadata tag set to the final container.
    #[serde(default = "default_true")]
    pub tag: bool,
    /// Keep the intermediate container and caption file after transcoding.
    #[serde(default)]
    pub keep_intermediate: bool,
    /// Compatibility flag: skip a segment that fails to fetch and keep
    /// going, producing a truncated container. Default fails the item.
    #[serde(default)]
    pub allow_partial: bool,
    /// Transcode input: `"segments"` reassembles the container from numbered
    /// segments; `"playlist"` asks the device for a playlist URL and hands
    /// it to the encoder directly.
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            transcode_args: default_transcode_args(),
            transcode_cc_args: default_transcode_cc_args(),
            ccextractor: default_ccextractor(),
            ccextractor_args: default_ccextractor_args(),
            captions: false,
            transcode: true,
            tag: true,
            keep_intermediate: false,
            allow_partial: false,
            source: default_source(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Sleep between cycles in auto-repeat mode.
    #[serde(default = "default_repeat")]
    pub repeat_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repeat_secs: default_repeat(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_http_timeout() -> u64 {
    30
}
fn default_cache_validity() -> i64 {
    604_800
}
fn default_history_path() -> PathBuf {
    PathBuf::from("tablo.history")
}
fn default_tv_dir() -> PathBuf {
    PathBuf::from("./tv")
}
fn default_movie_dir() -> PathBuf {
    PathBuf::from("./movies")
}
fn default_sports_dir() -> PathBuf {
    PathBuf::from("./sports")
}
fn default_fail_dir() -> PathBuf {
    PathBuf::from("./fail")
}
fn default_duplicates_dir() -> PathBuf {
    PathBuf::from("./exists")
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_transcode_args() -> Vec<String> {
    [
        "-y",
        "-loglevel",
        "error",
        "-i",
        "{input}",
        "-bsf:a",
        "aac_adtstoasc",
        "-c",
        "copy",
        "{output}",
    ]
    .map(String::from)
    .to_vec()
}
fn default_transcode_cc_args() -> Vec<String> {
    [
        "-y",
        "-loglevel",
        "error",
        "-i",
        "{input}",
        "-f",
        "srt",
        "-i",
        "{captions}",
        "-bsf:a",
        "aac_adtstoasc",
        "-c:v",
        "copy",
        "-c:a",
        "copy",
        "-c:s",
        "mov_text",
        "{output}",
    ]
    .map(String::from)
    .to_vec()
}
fn default_ccextractor() -> String {
    "ccextractor".to_string()
}
fn default_ccextractor_args() -> Vec<String> {
    ["-quiet", "{input}", "-o", "{output}"]
        .map(String::from)
        .to_vec()
}
fn default_source() -> String {
    "segments".to_string()
}
fn default_repeat() -> u64 {
    1800
}

/// Load configuration from `path`. A missing file yields the defaults; a
/// present but invalid file is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.validity_secs <= 0 {
        anyhow::bail!("cache.validity_secs must be > 0");
    }

    if config.filters.delay_secs < 0
        || config.filters.min_duration_secs < 0
        || config.filters.min_height < 0
    {
        anyhow::bail!("filters values must not be negative");
    }

    match config.tools.source.as_str() {
        "segments" | "playlist" => {}
        other => anyhow::bail!(
            "Unknown tools.source: '{}'. Must be segments or playlist.",
            other
        ),
    }

    if config.tools.transcode && !config.tools.transcode_args.iter().any(|a| a.contains("{output}"))
    {
        anyhow::bail!("tools.transcode_args must contain an {{output}} placeholder");
    }

    if config.tools.source == "playlist" && !config.tools.transcode {
        anyhow::bail!("tools.source = \"playlist\" requires tools.transcode = true");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/tablo.toml")).unwrap();
        assert!(config.devices.discover);
        assert_eq!(config.history.path, PathBuf::from("tablo.history"));
        assert!(config.cache.path.is_none());
        assert_eq!(config.tools.source, "segments");
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[devices]
discover = false
addresses = ["192.168.1.55"]

[cache]
path = "tablo.cache.json"
validity_secs = 3600

[filters]
min_duration_secs = 600
min_height = 480

[tools]
captions = true
source = "playlist"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.devices.addresses, vec!["192.168.1.55"]);
        assert_eq!(config.cache.validity_secs, 3600);
        assert_eq!(config.filters.min_duration_secs, 600);
        assert!(config.tools.captions);
        assert_eq!(config.tools.source, "playlist");
    }

    #[test]
    fn test_bad_source_rejected() {
        let toml = "[tools]\nsource = \"torrent\"\n";
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_template_for_prefers_specific_over_custom() {
        use crate::models::MediaKind;
        let naming = NamingConfig {
            custom: Some("{title}".into()),
            tv: Some("{series} {title}".into()),
            movie: None,
            sports: None,
        };
        assert_eq!(naming.template_for(MediaKind::Tv), Some("{series} {title}"));
        assert_eq!(naming.template_for(MediaKind::Movie), Some("{title}"));
    }
}
