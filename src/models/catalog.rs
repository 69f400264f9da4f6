use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{ServiceKind, key_index};

/// Series records keyed by series id.
pub type SeriesMap = BTreeMap<String, Series>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub name: String,
    /// Seasons the service declared, before specials and empty seasons were dropped.
    #[serde(default)]
    pub seasons_count: u32,
    /// Episodes kept across all seasons.
    #[serde(default)]
    pub episodes_count: u32,
    #[serde(default)]
    pub seasons: BTreeMap<String, Season>,
}

impl Series {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Seasons ordered by number, then key.
    #[must_use]
    pub fn ordered_seasons(&self) -> Vec<(&String, &Season)> {
        let mut seasons: Vec<_> = self.seasons.iter().collect();
        seasons.sort_by_key(|(key, season)| (season.number, key_index(key), (*key).clone()));
        seasons
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    /// Stable id from the service. `None` for seasons inferred from episode lines.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Dense 1..N position within the series.
    pub number: u32,
    #[serde(default)]
    pub episodes_count: u32,
    #[serde(default)]
    pub episodes: BTreeMap<String, Episode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dub_override: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_override: Option<Vec<String>>,
    /// Season number used for file naming instead of `number`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_override: Option<u32>,
}

impl Season {
    #[must_use]
    pub fn new(id: Option<String>, name: impl Into<String>, number: u32) -> Self {
        Self {
            id,
            name: name.into(),
            number,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn naming_number(&self) -> u32 {
        self.number_override.unwrap_or(self.number)
    }

    #[must_use]
    pub fn ordered_episodes(&self) -> Vec<(&String, &Episode)> {
        let mut episodes: Vec<_> = self.episodes.iter().collect();
        episodes.sort_by_key(|(key, episode)| (episode.number, key_index(key)));
        episodes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Display number, dense within the season.
    pub number: u32,
    /// Number the tool expects after `-e`. May differ from `number` on HiDive.
    pub download_number: u32,
    pub title: String,
    #[serde(default)]
    pub available_dubs: Vec<String>,
    #[serde(default)]
    pub available_subs: Vec<String>,

    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub tracks_complete: bool,
}

impl Episode {
    #[must_use]
    pub fn new(number: u32, download_number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            download_number,
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Locally owned episode flags. Only these are written by status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeFlag {
    Downloaded,
    Skip,
    TracksComplete,
}

impl EpisodeFlag {
    pub const fn set(self, episode: &mut Episode, value: bool) {
        match self {
            Self::Downloaded => episode.downloaded = value,
            Self::Skip => episode.skip = value,
            Self::TracksComplete => episode.tracks_complete = value,
        }
    }
}

/// The whole catalog document: one namespace per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog(pub BTreeMap<ServiceKind, SeriesMap>);

impl Default for Catalog {
    fn default() -> Self {
        Self(
            ServiceKind::ALL
                .into_iter()
                .map(|kind| (kind, SeriesMap::new()))
                .collect(),
        )
    }
}

impl Catalog {
    #[must_use]
    pub fn service(&self, kind: ServiceKind) -> Option<&SeriesMap> {
        self.0.get(&kind)
    }

    pub fn service_mut(&mut self, kind: ServiceKind) -> &mut SeriesMap {
        self.0.entry(kind).or_default()
    }

    #[must_use]
    pub fn series(&self, kind: ServiceKind, series_id: &str) -> Option<&Series> {
        self.service(kind)?.get(series_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_has_both_namespaces() {
        let json = serde_json::to_string(&Catalog::default()).unwrap();
        assert_eq!(json, r#"{"crunchy":{},"hidive":{}}"#);
    }

    #[test]
    fn test_ordered_seasons_sorts_numerically() {
        let mut series = Series::new("1", "Show");
        for n in [10, 2, 1] {
            series
                .seasons
                .insert(format!("S{n}"), Season::new(None, format!("Season {n}"), n));
        }
        let keys: Vec<_> = series.ordered_seasons().into_iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["S1", "S2", "S10"]);
    }

    #[test]
    fn test_naming_number_prefers_override() {
        let mut season = Season::new(Some("x".into()), "Season 1", 1);
        assert_eq!(season.naming_number(), 1);
        season.number_override = Some(4);
        assert_eq!(season.naming_number(), 4);
    }
}
