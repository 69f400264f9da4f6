//! Builds the series tree out of classified listing lines.
//!
//! Each service has its own reducer: a small state machine that walks the
//! output once, keeps cursors for the current series and season, and hands
//! the finished series to a shared post-pass that drops empty seasons and
//! renumbers the survivors densely.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use super::lang::{canonical_locale, dedupe_casefold, normalize_audio};
use super::matcher::{
    CrunchyLine, FlatNumber, HidiveLine, classify_crunchy, classify_hidive, crunchy_dub_list,
    crunchy_season_token, is_special_episode_title, is_special_season_label, is_trailer_title,
    is_unreleased_title, strip_air_date,
};
use super::tracks::TrackList;
use crate::constants::limits::FLAT_GROUP_TOLERANCE;
use crate::domain::{ServiceKind, episode_key, key_index, season_key};
use crate::library::sanitize_filename;
use crate::models::{Episode, Season, Series, SeriesMap};

/// Result of reducing one listing: series keyed by id.
pub type ParsedTree = SeriesMap;

/// Looks up the tracks of one episode without downloading it.
#[async_trait]
pub trait TrackProber: Send + Sync {
    async fn probe(&self, series_id: &str, season_id: &str, download_number: u32) -> TrackList;
}

#[must_use]
pub fn reduce(kind: ServiceKind, output: &str) -> ParsedTree {
    match kind {
        ServiceKind::Crunchyroll => reduce_crunchy(output),
        ServiceKind::Hidive => reduce_hidive(output),
    }
}

/// Drops empty seasons, orders the rest by their original number and rekeys
/// them `S1..SN`. Fills in the episode counts.
fn compact_seasons(series: &mut Series) {
    let mut kept: Vec<(String, Season)> = std::mem::take(&mut series.seasons)
        .into_iter()
        .filter(|(_, season)| !season.episodes.is_empty())
        .collect();
    kept.sort_by_key(|(key, season)| (season.number, key_index(key)));

    let mut total = 0;
    for (idx, (old_key, mut season)) in kept.into_iter().enumerate() {
        let number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let new_key = season_key(number);
        if new_key != old_key {
            debug!(series_id = %series.id, from = %old_key, to = %new_key, "Renumbering season");
        }
        season.number = number;
        season.episodes_count = u32::try_from(season.episodes.len()).unwrap_or(u32::MAX);
        total += season.episodes_count;
        series.seasons.insert(new_key, season);
    }
    series.episodes_count = total;
}

fn next_free_season_number(series: &Series) -> u32 {
    let mut n = u32::try_from(series.seasons.len() + 1).unwrap_or(u32::MAX);
    while series.seasons.contains_key(&season_key(n)) {
        n += 1;
    }
    n
}

#[derive(Default)]
struct CrunchyReducer {
    tree: ParsedTree,
    series_id: Option<String>,
    active_season: Option<String>,
    /// Season number printed by the tool -> our season number.
    number_map: HashMap<u32, u32>,
    /// Lowercased season name -> season key.
    name_map: HashMap<String, String>,
    /// Printed numbers shared by more than one season header.
    ambiguous_numbers: HashSet<u32>,
    /// OVA, movie and recap seasons whose episodes are dropped.
    special_numbers: HashSet<u32>,
    special_names: HashSet<String>,
    in_special_season: bool,
    season_subs: HashMap<String, Vec<String>>,
}

impl CrunchyReducer {
    fn reset_cursors(&mut self) {
        self.active_season = None;
        self.number_map.clear();
        self.name_map.clear();
        self.ambiguous_numbers.clear();
        self.special_numbers.clear();
        self.special_names.clear();
        self.in_special_season = false;
        self.season_subs.clear();
    }

    fn feed(&mut self, line: &str) {
        match classify_crunchy(line) {
            CrunchyLine::Series {
                id,
                name,
                seasons_count,
                ..
            } => {
                let mut series = Series::new(id, sanitize_filename(name));
                series.seasons_count = seasons_count;
                self.tree.insert(id.to_string(), series);
                self.series_id = Some(id.to_string());
                self.reset_cursors();
            }
            CrunchyLine::Season { id, name, number } => self.on_season(id, name, number),
            CrunchyLine::Subtitles { list } => {
                if let Some(key) = &self.active_season {
                    let locales = list
                        .split(',')
                        .filter_map(canonical_locale)
                        .collect::<Vec<_>>();
                    self.season_subs.insert(key.clone(), locales);
                }
            }
            CrunchyLine::Episode {
                special,
                full_name,
                ..
            } => self.on_episode(line, special, full_name),
            CrunchyLine::Other => {}
        }
    }

    fn current_series(&mut self) -> Option<&mut Series> {
        let id = self.series_id.as_ref()?;
        self.tree.get_mut(id)
    }

    fn on_season(&mut self, id: &str, name: &str, printed_number: u32) {
        let Some(series) = self.series_id.as_ref().and_then(|sid| self.tree.get(sid)) else {
            return;
        };
        let name = sanitize_filename(name);

        if is_special_season_label(&name) {
            debug!(season_id = id, name = %name, "Skipping special season");
            self.active_season = None;
            self.in_special_season = true;
            if !self.number_map.contains_key(&printed_number) {
                self.special_numbers.insert(printed_number);
            }
            self.special_names.insert(name.to_lowercase());
            return;
        }
        self.in_special_season = false;

        if let Some(key) = series
            .seasons
            .iter()
            .find(|(_, s)| s.id.as_deref() == Some(id))
            .map(|(k, _)| k.clone())
        {
            debug!(season_id = id, key = %key, "Season redeclared, keeping its episodes");
            self.name_map.insert(name.to_lowercase(), key.clone());
            self.active_season = Some(key);
            return;
        }

        let number = next_free_season_number(series);
        if self.number_map.contains_key(&printed_number) {
            debug!(season_id = id, printed_number, assigned = number, "Season number shared, disambiguating by name");
            self.ambiguous_numbers.insert(printed_number);
        } else {
            self.number_map.insert(printed_number, number);
            self.special_numbers.remove(&printed_number);
        }

        let key = season_key(number);
        self.name_map.insert(name.to_lowercase(), key.clone());
        self.active_season = Some(key.clone());

        if let Some(series) = self.current_series() {
            series
                .seasons
                .insert(key, Season::new(Some(id.to_string()), name, number));
        }
    }

    /// Number token first, season name when the number is shared or
    /// missing, then a new shell season.
    ///
    /// Returns `None` for episodes of skipped special seasons.
    fn resolve_season(&mut self, line: &str, full_name: &str) -> Option<String> {
        let token = crunchy_season_token(line);
        let name_guess = strip_air_date(full_name)
            .split(" - Season ")
            .next()
            .unwrap_or_default()
            .trim();
        let lookup = sanitize_filename(name_guess).to_lowercase();

        if let Some(printed) = token
            && !self.ambiguous_numbers.contains(&printed)
        {
            if let Some(n) = self.number_map.get(&printed) {
                return Some(season_key(*n));
            }
            if self.special_numbers.contains(&printed) {
                return None;
            }
        }

        if let Some(key) = self.name_map.get(&lookup) {
            return Some(key.clone());
        }
        if self.special_names.contains(&lookup) {
            return None;
        }
        if let Some(printed) = token
            && let Some(n) = self.number_map.get(&printed)
        {
            return Some(season_key(*n));
        }

        warn!(line = line.trim(), "Season not resolved by number or name, creating shell season");
        let series = self.current_series()?;
        let number = next_free_season_number(series);
        let key = season_key(number);
        series
            .seasons
            .insert(key.clone(), Season::new(None, format!("Season {number}"), number));

        if let Some(printed) = token {
            self.number_map.entry(printed).or_insert(number);
        }
        self.name_map.insert(lookup, key.clone());
        Some(key)
    }

    fn on_episode(&mut self, line: &str, special: bool, full_name: &str) {
        if self.series_id.is_none() {
            return;
        }
        if special || self.in_special_season {
            debug!(name = full_name, "Skipping special episode");
            return;
        }
        let raw_title = full_name.rsplit(" - ").next().unwrap_or(full_name);
        if is_trailer_title(strip_air_date(full_name)) || is_trailer_title(raw_title) {
            debug!(name = full_name, "Skipping trailer");
            return;
        }
        if is_special_episode_title(raw_title) {
            debug!(name = full_name, "Skipping recap or OVA episode");
            return;
        }
        if is_unreleased_title(raw_title) {
            debug!(name = full_name, "Skipping unreleased episode");
            return;
        }

        let Some(key) = self.resolve_season(line, full_name) else {
            return;
        };

        let dubs = crunchy_dub_list(line)
            .map(|list| {
                dedupe_casefold(list.split(',').filter_map(normalize_audio))
            })
            .unwrap_or_default();
        let subs = self.season_subs.get(&key).cloned().unwrap_or_default();

        let title = sanitize_filename(raw_title);

        let Some(series) = self.current_series() else {
            return;
        };
        let Some(season) = series.seasons.get_mut(&key) else {
            return;
        };

        let number = u32::try_from(season.episodes.len() + 1).unwrap_or(u32::MAX);
        let mut episode = Episode::new(number, number, title);
        episode.available_dubs = dubs;
        episode.available_subs = subs;
        season.episodes.insert(episode_key(number), episode);
    }

    fn finish(mut self) -> ParsedTree {
        for series in self.tree.values_mut() {
            compact_seasons(series);
        }
        self.tree
    }
}

/// Reduces a Crunchyroll listing.
#[must_use]
pub fn reduce_crunchy(output: &str) -> ParsedTree {
    let mut reducer = CrunchyReducer::default();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        reducer.feed(line);
    }
    reducer.finish()
}

struct HidiveSeasonMeta {
    id: String,
    number: u32,
    declared: u32,
    episodes: Vec<String>,
}

/// Consecutive flat rows sharing a season code, in listing order.
struct FlatGroup {
    season_code: u32,
    download_numbers: Vec<u32>,
}

#[derive(Default)]
struct HidiveSeriesDraft {
    id: String,
    name: String,
    seasons_count: u32,
    /// Keyed by printed season number; a redeclared number replaces the earlier one.
    seasons: BTreeMap<u32, HidiveSeasonMeta>,
    flat_groups: Vec<FlatGroup>,
}

impl HidiveSeriesDraft {
    /// Picks the flat group that supplies download numbers for a season.
    ///
    /// A group with the same season code wins; otherwise the next group whose
    /// size is within tolerance of the declared count. `ptr` only moves forward.
    fn take_flat_group(&self, ptr: &mut usize, season_number: u32, declared: u32) -> Option<&[u32]> {
        if let Some(offset) = self.flat_groups[*ptr..]
            .iter()
            .position(|g| g.season_code == season_number)
        {
            let idx = *ptr + offset;
            *ptr = idx + 1;
            return Some(&self.flat_groups[idx].download_numbers);
        }

        while *ptr < self.flat_groups.len() {
            let group = &self.flat_groups[*ptr];
            *ptr += 1;
            if group.download_numbers.len().abs_diff(declared as usize) <= FLAT_GROUP_TOLERANCE {
                return Some(&group.download_numbers);
            }
        }
        None
    }

    fn finish(self) -> Series {
        let mut series = Series::new(self.id.clone(), sanitize_filename(&self.name));
        series.seasons_count = self.seasons_count;

        let mut flat_ptr = 0;
        for meta in self.seasons.values() {
            let flat_order = self
                .take_flat_group(&mut flat_ptr, meta.number, meta.declared)
                .unwrap_or_default();
            if flat_order.is_empty() {
                debug!(season = meta.number, "No flat listing matched, numbering sequentially");
            }

            let mut season = Season::new(
                Some(meta.id.clone()),
                format!("Season {}", meta.number),
                meta.number,
            );

            let mut consumed = 0usize;
            for title in &meta.episodes {
                if is_special_episode_title(title) || is_unreleased_title(title) {
                    debug!(season = meta.number, title = %title, "Skipping special or unreleased episode");
                    continue;
                }

                let download_number = flat_order
                    .get(consumed)
                    .copied()
                    .unwrap_or_else(|| u32::try_from(consumed + 1).unwrap_or(u32::MAX));
                consumed += 1;

                let number = u32::try_from(season.episodes.len() + 1).unwrap_or(u32::MAX);
                let title = match sanitize_filename(title) {
                    t if t.is_empty() => format!("Episode {number}"),
                    t => t,
                };
                season
                    .episodes
                    .insert(episode_key(number), Episode::new(number, download_number, title));
            }

            series.seasons.insert(season_key(meta.number), season);
        }

        compact_seasons(&mut series);
        series
    }
}

#[derive(Default)]
struct HidiveReducer {
    tree: ParsedTree,
    draft: Option<HidiveSeriesDraft>,
    /// Printed number of the season episode rows attach to. `None` under special seasons.
    current_season: Option<u32>,
    last_flat_code: Option<u32>,
}

impl HidiveReducer {
    fn flush(&mut self) {
        if let Some(draft) = self.draft.take() {
            let series = draft.finish();
            self.tree.insert(series.id.clone(), series);
        }
        self.current_season = None;
        self.last_flat_code = None;
    }

    fn feed(&mut self, line: &str) {
        let event = classify_hidive(line);

        if let HidiveLine::Series {
            id,
            name,
            seasons_count,
        } = event
        {
            self.flush();
            self.draft = Some(HidiveSeriesDraft {
                id: id.to_string(),
                name: name.to_string(),
                seasons_count,
                ..HidiveSeriesDraft::default()
            });
            return;
        }

        let Some(draft) = self.draft.as_mut() else {
            return;
        };

        match event {
            HidiveLine::Season {
                id,
                number,
                episodes_count,
                ..
            } => {
                draft.seasons.insert(
                    number,
                    HidiveSeasonMeta {
                        id: id.to_string(),
                        number,
                        declared: episodes_count,
                        episodes: Vec::new(),
                    },
                );
                self.current_season = Some(number);
            }
            HidiveLine::SpecialSeason { id, label, .. } => {
                debug!(season_id = id, label, "Skipping special season");
                self.current_season = None;
            }
            HidiveLine::Episode { title, .. } => {
                if let Some(meta) = self
                    .current_season
                    .and_then(|n| draft.seasons.get_mut(&n))
                {
                    meta.episodes.push(title.to_string());
                }
            }
            HidiveLine::Flat {
                season_code,
                number,
                ..
            } => {
                let FlatNumber::Whole(download_number) = number else {
                    debug!(season_code, "Skipping fractional flat episode");
                    return;
                };
                if self.last_flat_code != Some(season_code) {
                    self.last_flat_code = Some(season_code);
                    draft.flat_groups.push(FlatGroup {
                        season_code,
                        download_numbers: Vec::new(),
                    });
                }
                if let Some(group) = draft.flat_groups.last_mut() {
                    group.download_numbers.push(download_number);
                }
            }
            HidiveLine::Series { .. } | HidiveLine::Diagnostic | HidiveLine::Other => {}
        }
    }
}

/// Reduces a HiDive listing. Track lists stay empty until [`enrich_tracks`] runs.
#[must_use]
pub fn reduce_hidive(output: &str) -> ParsedTree {
    let mut reducer = HidiveReducer::default();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        reducer.feed(line);
    }
    reducer.flush();

    if reducer.tree.is_empty() {
        warn!("No HiDive series detected in output");
    }
    reducer.tree
}

/// Fills the track lists of every episode with one probe each.
pub async fn enrich_tracks(tree: &mut ParsedTree, prober: &dyn TrackProber) {
    for series in tree.values_mut() {
        let series_id = series.id.clone();
        for season in series.seasons.values_mut() {
            let Some(season_id) = season.id.clone() else {
                continue;
            };
            for episode in season.episodes.values_mut() {
                let tracks = prober
                    .probe(&series_id, &season_id, episode.download_number)
                    .await;
                debug!(
                    series_id = %series_id,
                    season_id = %season_id,
                    episode = episode.download_number,
                    dubs = ?tracks.dubs,
                    subs = ?tracks.subs,
                    "Probed episode tracks"
                );
                episode.available_dubs = dedupe_casefold(tracks.dubs);
                episode.available_subs = dedupe_casefold(tracks.subs);
            }
        }
    }
}
