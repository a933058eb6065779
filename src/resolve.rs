//! Metadata resolution: raw device documents → normalized [`Recording`]s.
//!
//! A single recording's metadata document mixes fields from up to four
//! category shapes (`recManualProgram*`, `recSportEvent`,
//! `recMovie`/`recMovieAiring`, `recEpisode`/`recSeries`/`recSeason`),
//! and which shape carries the authoritative value differs per field. Each
//! output field therefore has an explicit, ordered probe chain: probes are
//! evaluated in listed order and a later probe overwrites the value whenever
//! its path is present, so the more specific content types sit at the end
//! of each chain and win. The chains below are the contract — reorder them
//! and titles start coming from the wrong shape.
//!
//! Resolution is total: any document, including an empty one, yields a
//! best-effort [`Recording`], because downstream deduplication needs every
//! discovered id to be classifiable. Absence never raises; it falls through
//! to defaults.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::NamingConfig;
use crate::extract::{self, lookup};
use crate::models::{MediaKind, Recording, RecordingStatus};
use crate::sanitize::{clean, squish};
use crate::template;

/// End timestamp used when the document carries none; predates any real
/// recording so delay gates always pass for undated items.
const DEFAULT_END: &str = "2014-01-01T09:00Z";

const END_TIME_PROBES: &[&str] = &[
    "recSportEvent.jsonFromTribune.endTime",
    "recEpisode.jsonFromTribune.endTime",
    "recMovieAiring.jsonFromTribune.endTime",
];

const ENTITY_TYPE_PROBES: &[&str] = &[
    "recSportEvent.jsonFromTribune.program.entityType",
    "recMovieAiring.jsonFromTribune.program.entityType",
    "recEpisode.jsonFromTribune.program.entityType",
];

const STATUS_PROBES: &[&str] = &[
    "recManualProgramAiring.jsonForClient.video.state",
    "recSportEvent.jsonForClient.video.state",
    "recMovieAiring.jsonForClient.video.state",
    "recEpisode.jsonForClient.video.state",
];

const HEIGHT_PROBES: &[&str] = &[
    "recManualProgramAiring.jsonForClient.video.height",
    "recSportEvent.jsonForClient.video.height",
    "recMovieAiring.jsonForClient.video.height",
    "recEpisode.jsonForClient.video.height",
];

const DURATION_PROBES: &[&str] = &[
    "recManualProgramAiring.jsonForClient.video.duration",
    "recSportEvent.jsonForClient.video.duration",
    "recMovieAiring.jsonForClient.video.duration",
    "recEpisode.jsonForClient.video.duration",
];

const AIRDATE_PROBES: &[&str] = &[
    "recManualProgramAiring.jsonForClient.airDate",
    "recSportEvent.jsonForClient.airDate",
    "recMovieAiring.jsonForClient.airDate",
    "recMovie.jsonFromTribune.releaseYear",
    "recEpisode.jsonForClient.originalAirDate",
];

const DATE_PROBES: &[&str] = &[
    "recManualProgramAiring.jsonForClient.airDate",
    "recSportEvent.jsonForClient.airDate",
    "recMovie.jsonForClient.releaseYear",
    "recEpisode.jsonForClient.airDate",
];

const DESCRIPTION_PROBES: &[&str] = &[
    "recSportEvent.jsonForClient.description",
    "recMovie.jsonForClient.plot",
    "recEpisode.jsonForClient.description",
];

/// Title before the episode-level override; the resolved value also serves
/// as the default series name for documents without a series shape.
const TITLE_BASE_PROBES: &[&str] = &[
    "recManualProgram.jsonForClient.title",
    "recSportEvent.jsonForClient.eventTitle",
    "recMovie.jsonForClient.title",
];

const IDENTITY_PROBES: &[&str] = &[
    "recManualProgram.jsonForClient.objectID",
    "recSportEvent.jsonFromTribune.program.tmsId",
    "recMovieAiring.jsonFromTribune.program.tmsId",
    "recEpisode.jsonFromTribune.program.tmsId",
];

const GENRE_PROBES: &[&str] = &[
    "recEpisode.jsonFromTribune.program.genres",
    "recSportEvent.jsonFromTribune.program.genres",
    "recSeries.jsonFromTribune.genres",
    "recMovie.jsonFromTribune.genres",
    "recMovieAiring.jsonFromTribune.program.genres",
];

const DIRECTOR_PROBES: &[&str] = &[
    "recMovie.jsonForClient.directors",
    "recMovie.jsonFromTribune.directors",
];

const SERIES_PROBE: &str = "recSeries.jsonForClient.title";
const SEASON_PROBE: &str = "recEpisode.jsonForClient.seasonNumber";
const EPISODE_PROBE: &str = "recEpisode.jsonForClient.episodeNumber";
const EPISODE_TITLE_PROBE: &str = "recEpisode.jsonForClient.title";

/// Resolve one raw document into a [`Recording`].
pub fn resolve_recording(
    doc: &Value,
    naming: &NamingConfig,
    device: &str,
    recording_id: u64,
) -> Recording {
    let end_raw = chain_text(doc, END_TIME_PROBES, DEFAULT_END);
    let entity = chain_text(doc, ENTITY_TYPE_PROBES, "manual");
    let status = RecordingStatus::parse(&chain_text(doc, STATUS_PROBES, "unknown"));
    let height = chain_i64(doc, HEIGHT_PROBES, 0);
    let duration_secs = chain_i64(doc, DURATION_PROBES, 0);
    let airdate = chain_text(doc, AIRDATE_PROBES, "");
    let date = chain_text(doc, DATE_PROBES, "");
    let description = chain_text(doc, DESCRIPTION_PROBES, "");
    let genre = chain_text(doc, GENRE_PROBES, "Drama");
    let director = chain_text(doc, DIRECTOR_PROBES, "Unknown");

    let title_base = chain_text(doc, TITLE_BASE_PROBES, "");
    let series = extract::resolve_text(doc, SERIES_PROBE, &title_base);
    let title = extract::resolve_text(doc, EPISODE_TITLE_PROBE, &title_base);
    let season = pad2(&extract::resolve_text(doc, SEASON_PROBE, "0"));
    let episode = pad2(&extract::resolve_text(doc, EPISODE_PROBE, "0"));

    let kind = classify(doc, &entity);

    let mut identity = chain_text(doc, IDENTITY_PROBES, "");
    // Generic show-scoped ids would collapse every episode of a series into
    // one history entry; replace them like a missing id.
    let show_scoped = kind == MediaKind::Tv && identity.starts_with("SH");
    if identity.is_empty() || show_scoped {
        identity = derived_identity(&series, &title);
        if identity.is_empty() {
            warn!(device, recording_id, "no usable identity in metadata");
        }
    }

    let end_epoch = match parse_timestamp(&end_raw) {
        Some(ts) => ts,
        None => {
            warn!(device, recording_id, end = %end_raw, "unparseable end time, using default epoch");
            parse_timestamp(DEFAULT_END).unwrap_or(0)
        }
    };

    let (raw_name, season_episode_tag) = build_name(
        doc, naming, kind, &series, &season, &episode, &title, &genre, &date, &airdate,
        &description, &director, &status, height, duration_secs, &end_raw, &identity,
    );
    let display_name = squish(&raw_name);
    let build_name = clean(&display_name);

    let tags = build_tags(
        kind,
        &series,
        &season,
        &episode,
        &title,
        &genre,
        &description,
        &director,
        &end_raw,
        &date,
    );

    Recording {
        device: device.to_string(),
        recording_id,
        identity,
        kind,
        status,
        series,
        season,
        episode,
        title,
        description,
        genre,
        director,
        airdate,
        date,
        end_raw,
        end_epoch,
        height,
        duration_secs,
        season_episode_tag,
        display_name,
        build_name,
        tags,
    }
}

/// Classify the document's content type.
///
/// A season grouping key marks a tv episode regardless of any entity-type
/// field; the entity type then separates sports events from movie-shaped
/// documents, with movie as the catch-all (manual recordings included).
fn classify(doc: &Value, entity: &str) -> MediaKind {
    let has_season = doc
        .as_object()
        .map_or(false, |map| map.contains_key("recSeason"));
    if has_season {
        MediaKind::Tv
    } else if entity == "Sports" {
        MediaKind::Sports
    } else {
        MediaKind::Movie
    }
}

/// Walk a probe chain in order; each present probe overwrites the value.
fn chain_text(doc: &Value, probes: &[&str], default: &str) -> String {
    let mut value = default.to_string();
    for path in probes {
        if let Some(v) = lookup(doc, path).and_then(|v| extract::scalar_text(v)) {
            value = v;
        }
    }
    value
}

fn chain_i64(doc: &Value, probes: &[&str], default: i64) -> i64 {
    let mut value = default;
    for path in probes {
        match lookup(doc, path) {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    value = i;
                }
            }
            Some(Value::String(s)) => {
                if let Ok(i) = s.trim().parse() {
                    value = i;
                }
            }
            _ => {}
        }
    }
    value
}

/// Zero-pad a season/episode number to two digits.
fn pad2(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 {
        trimmed.to_string()
    } else {
        format!("{:0>2}", trimmed)
    }
}

/// Parse the device's mixed temporal formats to UTC epoch seconds:
/// `Z`-suffixed date-times with or without seconds, date-only strings
/// (midnight UTC), and bare release years (January 1st).
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let t = s.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    if let Ok(year) = t.parse::<i32>() {
        if (1900..=2200).contains(&year) {
            return Some(
                NaiveDate::from_ymd_opt(year, 1, 1)?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc()
                    .timestamp(),
            );
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn build_name(
    doc: &Value,
    naming: &NamingConfig,
    kind: MediaKind,
    series: &str,
    season: &str,
    episode: &str,
    title: &str,
    genre: &str,
    date: &str,
    airdate: &str,
    description: &str,
    director: &str,
    status: &RecordingStatus,
    height: i64,
    duration_secs: i64,
    end_raw: &str,
    identity: &str,
) -> (String, String) {
    let se_tag = format!("S{}E{}", season, episode);
    let date_part = date.split('T').next().unwrap_or("").to_string();

    if let Some(tpl) = naming.template_for(kind) {
        let mut fields = BTreeMap::new();
        for (key, value) in [
            ("series", series),
            ("season", season),
            ("episode", episode),
            ("title", title),
            ("genre", genre),
            ("date", date),
            ("airdate", airdate),
            ("description", description),
            ("director", director),
            ("status", status.as_str()),
            ("end", end_raw),
            ("type", kind.as_str()),
            ("identity", identity),
        ] {
            fields.insert(key.to_string(), value.to_string());
        }
        fields.insert("height".to_string(), height.to_string());
        fields.insert("duration".to_string(), duration_secs.to_string());

        let mut name = template::fill(tpl, &fields);
        // Second pass: any dotted raw-metadata path is a valid placeholder.
        name = template::fill(&name, &extract::flatten(doc));
        // Custom-named tv items keep their tag so placement stays in the
        // normal series tree.
        return (name, se_tag);
    }

    match kind {
        MediaKind::Tv => {
            if season == "00" && episode == "00" {
                // No season/episode data: date-based name, empty tag as the
                // placement sentinel.
                let day: String = date.chars().take(10).collect();
                let mut name = format!("{} - {}", series, day);
                if !title.is_empty() {
                    name.push_str(" - ");
                    name.push_str(title);
                }
                (name, String::new())
            } else {
                let mut name = format!("{} - {}", series, se_tag);
                if !title.is_empty() {
                    name.push_str(" - ");
                    name.push_str(title);
                }
                (name, se_tag)
            }
        }
        MediaKind::Sports => (format!("{} - {} ({})", genre, title, date_part), se_tag),
        MediaKind::Movie => (format!("{} ({})", title, date_part), se_tag),
    }
}

/// Derived dedup key for recordings without a canonical program id: the
/// digest of the sanitized series+title text. Empty when there is nothing
/// to derive from.
fn derived_identity(series: &str, title: &str) -> String {
    if series.is_empty() && title.is_empty() {
        return String::new();
    }
    let basis = clean(&format!("{}.{}", series, title));
    if basis.trim_matches('.').trim().is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(basis.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the sanitized key→value set handed to the tagging stage. Keys are
/// the encoder's metadata names; values run through the sanitizer and empty
/// results are dropped.
#[allow(clippy::too_many_arguments)]
fn build_tags(
    kind: MediaKind,
    series: &str,
    season: &str,
    episode: &str,
    title: &str,
    genre: &str,
    description: &str,
    director: &str,
    end_raw: &str,
    date: &str,
) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let mut put = |key: &str, value: &str| {
        let cleaned = clean(value);
        if !cleaned.is_empty() {
            tags.insert(key.to_string(), cleaned);
        }
    };

    put("title", title);
    put("genre", genre);
    put("description", description);
    put("date", end_raw);

    match kind {
        MediaKind::Tv => {
            put("artist", series);
            put("album_artist", series);
            put("album", &format!("{}, Season {}", series, season));
            put("show", series);
            put("season_number", season);
            put("episode_sort", episode);
            put("track", episode);
        }
        MediaKind::Movie | MediaKind::Sports => {
            put("artist", director);
            put("year", date);
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn naming() -> NamingConfig {
        NamingConfig::default()
    }

    fn tv_doc() -> Value {
        json!({
            "recSeason": {"jsonForClient": {"number": 1}},
            "recSeries": {
                "jsonForClient": {"title": "Show"},
                "jsonFromTribune": {"genres": ["Drama", "Mystery"]}
            },
            "recEpisode": {
                "jsonForClient": {
                    "seasonNumber": 1,
                    "episodeNumber": 5,
                    "title": "Pilot",
                    "description": "The one that starts it all.",
                    "originalAirDate": "2016-01-01",
                    "airDate": "2016-01-05T01:00Z",
                    "video": {"state": "finished", "height": 720, "duration": 1830}
                },
                "jsonFromTribune": {
                    "endTime": "2016-01-05T01:30Z",
                    "program": {
                        "tmsId": "EP012345670005",
                        "entityType": "Episode",
                        "genres": ["Drama"]
                    }
                }
            }
        })
    }

    fn sports_doc() -> Value {
        json!({
            "recSportEvent": {
                "jsonForClient": {
                    "eventTitle": "Team A at Team B",
                    "description": "Week 9.",
                    "airDate": "2016-03-01T18:00Z",
                    "video": {"state": "finished", "height": 1080, "duration": 10800}
                },
                "jsonFromTribune": {
                    "endTime": "2016-03-01T21:00Z",
                    "program": {
                        "tmsId": "SP0003141590000",
                        "entityType": "Sports",
                        "genres": ["Football"]
                    }
                }
            }
        })
    }

    fn movie_doc() -> Value {
        json!({
            "recMovieAiring": {
                "jsonForClient": {
                    "airDate": "2016-02-01T02:00Z",
                    "video": {"state": "finished", "height": 1080, "duration": 5400}
                },
                "jsonFromTribune": {
                    "endTime": "2016-02-01T04:00Z",
                    "program": {"tmsId": "MV000111222333", "entityType": "Movie"}
                }
            },
            "recMovie": {
                "jsonForClient": {
                    "title": "Big Film",
                    "plot": "Things happen.",
                    "releaseYear": 2015,
                    "directors": ["Jane Doe"]
                },
                "jsonFromTribune": {"genres": ["Action"], "directors": ["Jane Doe"]}
            }
        })
    }

    #[test]
    fn test_tv_classification_wins_over_entity_type() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonFromTribune"]["program"]["entityType"] = json!("Sports");
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 1);
        assert_eq!(rec.kind, MediaKind::Tv);
    }

    #[test]
    fn test_sports_classification_without_season_key() {
        let rec = resolve_recording(&sports_doc(), &naming(), "10.0.0.5", 2);
        assert_eq!(rec.kind, MediaKind::Sports);
        assert_eq!(rec.display_name, "Football - Team A at Team B (2016-03-01)");
    }

    #[test]
    fn test_movie_is_catch_all() {
        let rec = resolve_recording(&movie_doc(), &naming(), "10.0.0.5", 3);
        assert_eq!(rec.kind, MediaKind::Movie);
        assert_eq!(rec.display_name, "Big Film (2015)");
        assert_eq!(rec.identity, "MV000111222333");
    }

    #[test]
    fn test_tv_episode_name_and_fields() {
        let rec = resolve_recording(&tv_doc(), &naming(), "10.0.0.5", 4);
        assert_eq!(rec.display_name, "Show - S01E05 - Pilot");
        assert_eq!(rec.season, "01");
        assert_eq!(rec.episode, "05");
        assert_eq!(rec.season_episode_tag, "S01E05");
        assert_eq!(rec.identity, "EP012345670005");
        assert_eq!(rec.status, RecordingStatus::Finished);
        assert_eq!(rec.height, 720);
        assert_eq!(rec.duration_secs, 1830);
    }

    #[test]
    fn test_tv_without_season_episode_uses_date_name() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonForClient"]["seasonNumber"] = json!(0);
        doc["recEpisode"]["jsonForClient"]["episodeNumber"] = json!(0);
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 5);
        assert_eq!(rec.display_name, "Show - 2016-01-05 - Pilot");
        assert_eq!(rec.season_episode_tag, "");
    }

    #[test]
    fn test_identity_falls_back_to_derived_digest() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonFromTribune"]["program"]
            .as_object_mut()
            .unwrap()
            .remove("tmsId");
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 6);
        assert!(!rec.identity.is_empty());
        assert_eq!(rec.identity.len(), 64);
        // Deterministic: same document, same derived identity.
        let again = resolve_recording(&doc, &naming(), "10.0.0.5", 6);
        assert_eq!(rec.identity, again.identity);
    }

    #[test]
    fn test_show_scoped_tv_id_replaced() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonFromTribune"]["program"]["tmsId"] = json!("SH012345670000");
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 7);
        assert!(!rec.identity.starts_with("SH"));
        assert_eq!(rec.identity.len(), 64);
    }

    #[test]
    fn test_empty_document_is_total_but_unidentifiable() {
        let rec = resolve_recording(&json!({}), &naming(), "10.0.0.5", 8);
        assert_eq!(rec.kind, MediaKind::Movie);
        assert_eq!(rec.status, RecordingStatus::Unknown);
        assert!(rec.identity.is_empty());
        // End time fails closed to the default epoch, not an error.
        assert_eq!(rec.end_epoch, parse_timestamp(DEFAULT_END).unwrap());
    }

    #[test]
    fn test_malformed_end_time_fails_closed() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonFromTribune"]["endTime"] = json!("not a timestamp");
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 9);
        assert_eq!(rec.end_epoch, parse_timestamp(DEFAULT_END).unwrap());
    }

    #[test]
    fn test_genre_takes_first_list_element() {
        let mut doc = tv_doc();
        doc["recEpisode"]["jsonFromTribune"]["program"]["genres"] =
            json!(["Mystery", "Drama"]);
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 10);
        assert_eq!(rec.genre, "Mystery");
    }

    #[test]
    fn test_tv_tags_use_series_as_artist() {
        let rec = resolve_recording(&tv_doc(), &naming(), "10.0.0.5", 11);
        assert_eq!(rec.tags.get("artist"), Some(&"Show".to_string()));
        assert_eq!(rec.tags.get("show"), Some(&"Show".to_string()));
        assert_eq!(rec.tags.get("season_number"), Some(&"01".to_string()));
        assert_eq!(rec.tags.get("track"), Some(&"05".to_string()));
        assert_eq!(rec.tags.get("album"), Some(&"Show, Season 01".to_string()));
    }

    #[test]
    fn test_movie_tags_use_director_as_artist() {
        let rec = resolve_recording(&movie_doc(), &naming(), "10.0.0.5", 12);
        assert_eq!(rec.tags.get("artist"), Some(&"Jane Doe".to_string()));
        assert_eq!(rec.tags.get("year"), Some(&"2015".to_string()));
        assert!(rec.tags.get("season_number").is_none());
    }

    #[test]
    fn test_tag_values_are_sanitized_and_empty_dropped() {
        let mut doc = movie_doc();
        doc["recMovie"]["jsonForClient"]["title"] = json!("Face/Off");
        doc["recMovie"]["jsonForClient"]["plot"] = json!("…");
        let rec = resolve_recording(&doc, &naming(), "10.0.0.5", 13);
        assert_eq!(rec.tags.get("title"), Some(&"Face Off".to_string()));
        // An ellipsis-only plot sanitizes to empty and is dropped.
        assert!(rec.tags.get("description").is_none());
    }

    #[test]
    fn test_custom_template_with_raw_path_and_unknown_placeholder() {
        let naming = NamingConfig {
            custom: None,
            tv: Some("{series} [{recEpisode.jsonForClient.video.height}p] {bogus}".into()),
            movie: None,
            sports: None,
        };
        let rec = resolve_recording(&tv_doc(), &naming, "10.0.0.5", 14);
        assert_eq!(rec.display_name, "Show [720p] {bogus}");
        // Custom-named tv keeps its tag so placement stays in the tv tree.
        assert_eq!(rec.season_episode_tag, "S01E05");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2014-01-01T09:00Z"), Some(1_388_566_800));
        assert_eq!(parse_timestamp("2014-01-01T09:00:00Z"), Some(1_388_566_800));
        assert_eq!(parse_timestamp("2014-01-01"), Some(1_388_534_400));
        assert_eq!(parse_timestamp("2014"), Some(1_388_534_400));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("garbage"), None);
    }

    #[test]
    fn test_pad2() {
        assert_eq!(pad2("0"), "00");
        assert_eq!(pad2("7"), "07");
        assert_eq!(pad2("12"), "12");
        assert_eq!(pad2(""), "00");
        assert_eq!(pad2("110"), "110");
    }
}
