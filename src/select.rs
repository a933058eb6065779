//! Match selection: which resolved recordings get transferred this run.
//!
//! Gate order matters for the cycle summary — each rejection maps to a
//! typed [`Decision`] so the counters distinguish "already transferred"
//! from "duplicate within this run" from "filtered by search". First-seen
//! wins for identities that appear more than once: the caller feeds
//! recordings in descending discovery order (newest first), so the newest
//! copy of a duplicated airing is the one kept.

use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use crate::history::HistoryStore;
use crate::models::{MediaKind, Recording, RecordingStatus};

/// Why a recording was or was not selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Selected,
    /// Not in a finished state on the device.
    Unfinished,
    /// Identity already present in the transfer history.
    AlreadyTransferred,
    /// Excluded by the tv/movies/sports restriction flags.
    WrongKind,
    /// Ended too recently; still inside the settling window.
    TooRecent,
    TooShort,
    LowQuality,
    /// Same identity already encountered earlier in this run.
    Duplicate,
    /// Did not satisfy (or, inverted, did satisfy) the search predicate.
    FilteredOut,
}

/// Compiled search predicate: a case-insensitive regex over display name and
/// genre, with verbatim recording-id / identity equality as an alternative.
#[derive(Debug)]
pub struct SearchSpec {
    term: String,
    pattern: Option<Regex>,
}

impl SearchSpec {
    /// Compile `term`. An empty term matches everything; an invalid regex is
    /// a fatal configuration error (matching the CLI contract).
    pub fn compile(term: &str) -> Result<Self> {
        let term = term.trim().to_string();
        let pattern = if term.is_empty() {
            None
        } else {
            Some(
                RegexBuilder::new(&term)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid search specification: '{}'", term))?,
            )
        };
        Ok(Self { term, pattern })
    }

    fn matches(&self, rec: &Recording) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };
        pattern.is_match(&rec.display_name)
            || pattern.is_match(&rec.genre)
            || self.term == rec.recording_id.to_string()
            || self.term == rec.identity
    }
}

/// Which content types the run is restricted to. No flags = all types.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindGate {
    pub tv: bool,
    pub movies: bool,
    pub sports: bool,
}

impl KindGate {
    fn allows(&self, kind: MediaKind) -> bool {
        if !(self.tv || self.movies || self.sports) {
            return true;
        }
        match kind {
            MediaKind::Tv => self.tv,
            MediaKind::Movie => self.movies,
            MediaKind::Sports => self.sports,
        }
    }
}

/// Stateful selector for one run. Holds the first-seen identity set, so one
/// instance must span all devices within a cycle.
pub struct Selector<'a> {
    history: &'a HistoryStore,
    search: SearchSpec,
    kinds: KindGate,
    invert: bool,
    delay_secs: i64,
    min_duration_secs: i64,
    min_height: i64,
    seen: HashSet<String>,
}

impl<'a> Selector<'a> {
    pub fn new(
        history: &'a HistoryStore,
        search: SearchSpec,
        kinds: KindGate,
        invert: bool,
        delay_secs: i64,
        min_duration_secs: i64,
        min_height: i64,
    ) -> Self {
        Self {
            history,
            search,
            kinds,
            invert,
            delay_secs,
            min_duration_secs,
            min_height,
            seen: HashSet::new(),
        }
    }

    /// Decide one recording. Callers must not pass an empty identity (those
    /// are dropped, and logged, before selection).
    pub fn consider(&mut self, rec: &Recording, now: i64) -> Decision {
        debug_assert!(!rec.identity.is_empty());

        if rec.status != RecordingStatus::Finished {
            return Decision::Unfinished;
        }
        if self.history.contains(&rec.identity) {
            return Decision::AlreadyTransferred;
        }
        if !self.kinds.allows(rec.kind) {
            return Decision::WrongKind;
        }
        if now - rec.end_epoch < self.delay_secs {
            return Decision::TooRecent;
        }
        if rec.duration_secs < self.min_duration_secs {
            return Decision::TooShort;
        }
        if rec.height < self.min_height {
            return Decision::LowQuality;
        }
        if self.seen.contains(&rec.identity) {
            return Decision::Duplicate;
        }

        let hit = self.search.matches(rec);
        // The inverted run selects what the predicate would have excluded,
        // but every identity that reaches this point is marked seen either
        // way, so dedup still applies under inversion.
        self.seen.insert(rec.identity.clone());
        if hit != self.invert {
            Decision::Selected
        } else {
            Decision::FilteredOut
        }
    }
}

/// Order recordings for listing output: lexicographic by (sanitized display
/// name, identity) — not discovery order.
pub fn listing_order(recordings: &mut [Recording]) {
    recordings.sort_by(|a, b| {
        (a.build_name.as_str(), a.identity.as_str()).cmp(&(b.build_name.as_str(), b.identity.as_str()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn rec(identity: &str, name: &str) -> Recording {
        Recording {
            device: "10.0.0.5".into(),
            recording_id: 100,
            identity: identity.into(),
            kind: MediaKind::Tv,
            status: RecordingStatus::Finished,
            series: "Show".into(),
            season: "01".into(),
            episode: "05".into(),
            title: "Pilot".into(),
            description: String::new(),
            genre: "Drama".into(),
            director: "Unknown".into(),
            airdate: String::new(),
            date: String::new(),
            end_raw: String::new(),
            end_epoch: 1000,
            height: 720,
            duration_secs: 1800,
            season_episode_tag: "S01E05".into(),
            display_name: name.into(),
            build_name: crate::sanitize::clean(name),
            tags: BTreeMap::new(),
        }
    }

    fn selector(history: &HistoryStore) -> Selector<'_> {
        Selector::new(
            history,
            SearchSpec::compile("").unwrap(),
            KindGate::default(),
            false,
            0,
            0,
            0,
        )
    }

    #[test]
    fn test_finished_recent_empty_history_selected() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = selector(&history);
        assert_eq!(
            sel.consider(&rec("EP1", "Show - S01E05 - Pilot"), 2000),
            Decision::Selected
        );
    }

    #[test]
    fn test_unfinished_rejected() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = selector(&history);
        let mut r = rec("EP1", "x");
        r.status = RecordingStatus::Recording;
        assert_eq!(sel.consider(&r, 2000), Decision::Unfinished);
    }

    #[test]
    fn test_history_blocks_retransfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let mut history = HistoryStore::empty(&path);
        history.append("EP1", "done").unwrap();
        let mut sel = selector(&history);
        assert_eq!(
            sel.consider(&rec("EP1", "x"), 2000),
            Decision::AlreadyTransferred
        );
    }

    #[test]
    fn test_first_seen_wins_for_same_identity() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = selector(&history);
        assert_eq!(sel.consider(&rec("EP1", "newer copy"), 2000), Decision::Selected);
        assert_eq!(sel.consider(&rec("EP1", "older copy"), 2000), Decision::Duplicate);
        assert_eq!(sel.consider(&rec("EP1", "oldest copy"), 2000), Decision::Duplicate);
    }

    #[test]
    fn test_delay_window() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = Selector::new(
            &history,
            SearchSpec::compile("").unwrap(),
            KindGate::default(),
            false,
            600,
            0,
            0,
        );
        let r = rec("EP1", "x"); // ended at 1000
        assert_eq!(sel.consider(&r, 1500), Decision::TooRecent);
        assert_eq!(sel.consider(&r, 1700), Decision::Selected);
    }

    #[test]
    fn test_duration_and_quality_gates() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = Selector::new(
            &history,
            SearchSpec::compile("").unwrap(),
            KindGate::default(),
            false,
            0,
            3600,
            0,
        );
        assert_eq!(sel.consider(&rec("EP1", "x"), 2000), Decision::TooShort);

        let mut sel = Selector::new(
            &history,
            SearchSpec::compile("").unwrap(),
            KindGate::default(),
            false,
            0,
            0,
            1080,
        );
        assert_eq!(sel.consider(&rec("EP1", "x"), 2000), Decision::LowQuality);
    }

    #[test]
    fn test_kind_restriction() {
        let history = HistoryStore::empty(Path::new("unused"));
        let gate = KindGate {
            movies: true,
            ..Default::default()
        };
        let mut sel = Selector::new(
            &history,
            SearchSpec::compile("").unwrap(),
            gate,
            false,
            0,
            0,
            0,
        );
        assert_eq!(sel.consider(&rec("EP1", "x"), 2000), Decision::WrongKind);
    }

    #[test]
    fn test_search_matches_name_genre_or_ids() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mk = |term: &str| {
            Selector::new(
                &history,
                SearchSpec::compile(term).unwrap(),
                KindGate::default(),
                false,
                0,
                0,
                0,
            )
        };

        // Case-insensitive name regex.
        assert_eq!(
            mk("pilot").consider(&rec("EP1", "Show - S01E05 - Pilot"), 2000),
            Decision::Selected
        );
        // Genre match.
        assert_eq!(mk("drama").consider(&rec("EP1", "x"), 2000), Decision::Selected);
        // Verbatim recording id.
        assert_eq!(mk("100").consider(&rec("EP1", "x"), 2000), Decision::Selected);
        // Verbatim identity.
        assert_eq!(mk("EP1").consider(&rec("EP1", "x"), 2000), Decision::Selected);
        // No match at all.
        assert_eq!(
            mk("nothing-here").consider(&rec("EP1", "x"), 2000),
            Decision::FilteredOut
        );
    }

    #[test]
    fn test_invert_flips_predicate_but_not_gates() {
        let history = HistoryStore::empty(Path::new("unused"));
        let mut sel = Selector::new(
            &history,
            SearchSpec::compile("pilot").unwrap(),
            KindGate::default(),
            true,
            0,
            0,
            0,
        );
        // Matches the predicate → excluded under inversion, but marked seen.
        assert_eq!(
            sel.consider(&rec("EP1", "Show - S01E05 - Pilot"), 2000),
            Decision::FilteredOut
        );
        // A duplicate of it is still a duplicate, not selected.
        assert_eq!(
            sel.consider(&rec("EP1", "Show - S01E05 - Pilot"), 2000),
            Decision::Duplicate
        );
        // Non-matching item is selected under inversion.
        assert_eq!(sel.consider(&rec("EP2", "Other"), 2000), Decision::Selected);
        // Gates still apply under inversion.
        let mut unfinished = rec("EP3", "Other");
        unfinished.status = RecordingStatus::Failed;
        assert_eq!(sel.consider(&unfinished, 2000), Decision::Unfinished);
    }

    #[test]
    fn test_invalid_regex_is_fatal() {
        assert!(SearchSpec::compile("[unclosed").is_err());
    }

    #[test]
    fn test_listing_order() {
        let mut recs = vec![
            rec("EP2", "Beta"),
            rec("EP1", "Alpha"),
            rec("EP0", "Beta"),
        ];
        listing_order(&mut recs);
        let names: Vec<_> = recs
            .iter()
            .map(|r| (r.build_name.as_str(), r.identity.as_str()))
            .collect();
        assert_eq!(names, vec![("Alpha", "EP1"), ("Beta", "EP0"), ("Beta", "EP2")]);
    }
}
