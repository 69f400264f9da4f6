//! Persistent catalog of monitored series.
//!
//! One JSON document holds every service's namespace. The store keeps a
//! single in-memory copy behind a lock and rewrites the whole document
//! atomically (temp file + rename) after each mutation.

pub mod blacklist;

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ServiceKind;
use crate::models::{Catalog, Episode, EpisodeFlag, Season, Series, SeriesMap};
use crate::parser::ParsedTree;
pub use blacklist::{Rule, RuleAction};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a flag update lands.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeRef<'a> {
    pub service: ServiceKind,
    pub series_id: &'a str,
    pub season_key: &'a str,
    pub episode_key: &'a str,
}

pub struct CatalogStore {
    path: PathBuf,
    doc: Mutex<Catalog>,
}

impl CatalogStore {
    /// Loads the document at `path`.
    ///
    /// A missing or unreadable document yields an empty catalog, which is
    /// written back immediately so the file always exists after startup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();

        let (catalog, rewrite) = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match parse_document(&content) {
                Ok((catalog, migrated)) => {
                    if migrated {
                        info!(path = %path.display(), "Migrated legacy catalog into the Crunchyroll namespace");
                    }
                    (catalog, migrated)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Catalog is malformed, starting with an empty catalog");
                    (Catalog::default(), true)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No catalog found, creating an empty one");
                (Catalog::default(), true)
            }
            Err(e) => return Err(e.into()),
        };

        if rewrite {
            write_atomic(&path, &catalog).await?;
        }

        Ok(Self {
            path,
            doc: Mutex::new(catalog),
        })
    }

    async fn persist(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        write_atomic(&self.path, catalog).await
    }

    /// Merges freshly parsed series into a namespace without losing local flags.
    ///
    /// The document is written back even when `incoming` is empty.
    pub async fn merge(&self, service: ServiceKind, incoming: ParsedTree) -> Result<(), CatalogError> {
        if incoming.is_empty() {
            debug!(%service, "Nothing to merge, rewriting catalog as is");
        }

        let mut doc = self.doc.lock().await;
        let namespace = doc.service_mut(service);
        for (series_id, series) in incoming {
            let merged = match namespace.remove(&series_id) {
                Some(existing) => merge_series(existing, series),
                None => {
                    debug!(%service, series_id = %series_id, "Adding new series to catalog");
                    series
                }
            };
            namespace.insert(series_id, merged);
        }

        self.persist(&doc).await
    }

    /// Removes a series. Returns `false` (and leaves the file alone) when it is unknown.
    pub async fn remove(&self, service: ServiceKind, series_id: &str) -> Result<bool, CatalogError> {
        let mut doc = self.doc.lock().await;
        if doc.service_mut(service).remove(series_id).is_none() {
            warn!(%service, series_id, "Series not in catalog, nothing to remove");
            return Ok(false);
        }

        info!(%service, series_id, "Removed series from catalog");
        self.persist(&doc).await?;
        Ok(true)
    }

    /// Sets one locally owned flag. Missing path segments are logged and ignored.
    pub async fn update_episode_flag(
        &self,
        target: EpisodeRef<'_>,
        flag: EpisodeFlag,
        value: bool,
    ) -> Result<bool, CatalogError> {
        let mut doc = self.doc.lock().await;

        let Some(series) = doc.service_mut(target.service).get_mut(target.series_id) else {
            warn!(service = %target.service, series_id = target.series_id, "Series not found in catalog");
            return Ok(false);
        };
        let Some(season) = series.seasons.get_mut(target.season_key) else {
            warn!(series_id = target.series_id, season = target.season_key, "Season not found in catalog");
            return Ok(false);
        };
        let Some(episode) = season.episodes.get_mut(target.episode_key) else {
            warn!(
                series_id = target.series_id,
                season = target.season_key,
                episode = target.episode_key,
                "Episode not found in catalog"
            );
            return Ok(false);
        };

        flag.set(episode, value);
        debug!(
            series_id = target.series_id,
            season = target.season_key,
            episode = target.episode_key,
            ?flag,
            value,
            "Updated episode flag"
        );
        self.persist(&doc).await?;
        Ok(true)
    }

    /// Re-applies override rules to one series.
    pub async fn apply_rules(
        &self,
        service: ServiceKind,
        series_id: &str,
        rules: &[Rule],
    ) -> Result<(), CatalogError> {
        let mut doc = self.doc.lock().await;
        let Some(series) = doc.service_mut(service).get_mut(series_id) else {
            return Ok(());
        };
        blacklist::apply(series, rules);
        self.persist(&doc).await
    }

    /// Copy of one namespace; `None` when it holds no series.
    pub async fn read(&self, service: ServiceKind) -> Option<SeriesMap> {
        let doc = self.doc.lock().await;
        doc.service(service).filter(|m| !m.is_empty()).cloned()
    }

    pub async fn series_ids(&self, service: ServiceKind) -> Vec<String> {
        let doc = self.doc.lock().await;
        doc.service(service)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Catalog {
        self.doc.lock().await.clone()
    }
}

/// Parses a catalog document, migrating the old single-namespace layout.
/// The flag is set when the document was migrated.
fn parse_document(content: &str) -> Result<(Catalog, bool), serde_json::Error> {
    let value: Value = serde_json::from_str(content)?;

    let namespaced = value.as_object().is_some_and(|obj| {
        obj.keys()
            .all(|k| ServiceKind::ALL.iter().any(|s| s.cli_name() == k.as_str()))
    });

    if namespaced {
        let mut catalog: Catalog = serde_json::from_value(value)?;
        for kind in ServiceKind::ALL {
            catalog.service_mut(kind);
        }
        return Ok((catalog, false));
    }

    let legacy: SeriesMap = serde_json::from_value(value)?;
    let mut catalog = Catalog::default();
    *catalog.service_mut(ServiceKind::Crunchyroll) = legacy;
    Ok((catalog, true))
}

async fn write_atomic(path: &Path, catalog: &Catalog) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(catalog)?;
    let file_name = path
        .file_name()
        .map_or_else(|| "catalog".into(), |n| n.to_string_lossy().into_owned());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn inherit_flags(target: &mut Episode, prior: &Episode) {
    target.downloaded = prior.downloaded;
    target.skip = prior.skip;
    target.tracks_complete = prior.tracks_complete;
}

/// Merges an incoming season into the prior records that describe the same season.
fn merge_season(mut incoming: Season, priors: Vec<Season>) -> Season {
    let mut carried: BTreeMap<String, Episode> = BTreeMap::new();
    for prior in &priors {
        for (key, episode) in &prior.episodes {
            carried.entry(key.clone()).or_insert_with(|| episode.clone());
        }
    }

    for (key, episode) in &mut incoming.episodes {
        if let Some(prior) = carried.remove(key) {
            inherit_flags(episode, &prior);
        }
    }
    // Episodes the service no longer lists stay in the catalog.
    for (key, episode) in carried {
        incoming.episodes.entry(key).or_insert(episode);
    }

    if let Some(prior) = priors.first() {
        incoming.dub_override.clone_from(&prior.dub_override);
        incoming.sub_override.clone_from(&prior.sub_override);
        incoming.number_override = prior.number_override;
    }
    incoming
}

/// Series metadata comes from `incoming`; seasons are matched by stable id
/// first and by key second, collapsing duplicate keys for the same id.
fn merge_series(existing: Series, incoming: Series) -> Series {
    let Series {
        seasons: mut old_seasons,
        ..
    } = existing;
    let Series {
        id,
        name,
        seasons_count,
        episodes_count,
        seasons: new_seasons,
    } = incoming;

    let mut seasons = BTreeMap::new();
    for (key, season) in new_seasons {
        let mut prior_keys: Vec<String> = Vec::new();

        if let Some(season_id) = &season.id {
            prior_keys.extend(
                old_seasons
                    .iter()
                    .filter(|(_, s)| s.id.as_ref() == Some(season_id))
                    .map(|(k, _)| k.clone()),
            );
            // Prefer the record already at this key when it is one of the duplicates.
            if let Some(pos) = prior_keys.iter().position(|k| *k == key) {
                prior_keys.swap(0, pos);
            }
        }
        if prior_keys.is_empty()
            && old_seasons
                .get(&key)
                .is_some_and(|s| s.id.is_none() || s.id == season.id)
        {
            prior_keys.push(key.clone());
        }

        for old_key in prior_keys.iter().filter(|k| **k != key) {
            debug!(series_id = %id, from = %old_key, to = %key, "Collapsing season key");
        }

        let priors: Vec<Season> = prior_keys
            .iter()
            .filter_map(|k| old_seasons.remove(k))
            .collect();
        seasons.insert(key, merge_season(season, priors));
    }

    for (key, season) in old_seasons {
        if seasons.contains_key(&key) {
            debug!(series_id = %id, season = %key, "Dropping stale season replaced by a different id");
        } else {
            seasons.insert(key, season);
        }
    }

    Series {
        id,
        name,
        seasons_count,
        episodes_count,
        seasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_catalog_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("mdnx-autodl-catalog-{}", uuid::Uuid::new_v4()))
            .join("queue.json")
    }

    fn tree(series_id: &str, season_id: &str, key: &str, episodes: u32) -> ParsedTree {
        let mut season = Season::new(Some(season_id.to_string()), "Season 1", 1);
        for n in 1..=episodes {
            season
                .episodes
                .insert(format!("E{n}"), Episode::new(n, n, format!("Episode {n}")));
        }
        season.episodes_count = episodes;
        let mut series = Series::new(series_id, "Show");
        series.seasons.insert(key.to_string(), season);
        series.episodes_count = episodes;
        ParsedTree::from([(series_id.to_string(), series)])
    }

    fn episode_ref<'a>(series_id: &'a str, season: &'a str, episode: &'a str) -> EpisodeRef<'a> {
        EpisodeRef {
            service: ServiceKind::Crunchyroll,
            series_id,
            season_key: season,
            episode_key: episode,
        }
    }

    #[tokio::test]
    async fn test_open_creates_empty_document() {
        let path = temp_catalog_path();
        let store = CatalogStore::open(&path).await.unwrap();
        assert!(store.read(ServiceKind::Crunchyroll).await.is_none());

        let content = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&content).unwrap();
        assert!(value.get("crunchy").is_some());
        assert!(value.get("hidive").is_some());
    }

    #[tokio::test]
    async fn test_malformed_document_starts_empty() {
        let path = temp_catalog_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = CatalogStore::open(&path).await.unwrap();
        assert!(store.snapshot().await.is_empty());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<Value>(&content).is_ok());
    }

    #[tokio::test]
    async fn test_legacy_document_is_migrated() {
        let path = temp_catalog_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let legacy = serde_json::to_string(&tree("G1", "GY1", "S1", 2)).unwrap();
        std::fs::write(&path, legacy).unwrap();

        let store = CatalogStore::open(&path).await.unwrap();
        let crunchy = store.read(ServiceKind::Crunchyroll).await.unwrap();
        assert_eq!(crunchy["G1"].seasons["S1"].episodes.len(), 2);
        assert!(store.read(ServiceKind::Hidive).await.is_none());
    }

    #[tokio::test]
    async fn test_merge_preserves_flags_and_is_idempotent() {
        let store = CatalogStore::open(temp_catalog_path()).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY1", "S1", 3))
            .await
            .unwrap();
        assert!(
            store
                .update_episode_flag(episode_ref("G1", "S1", "E2"), EpisodeFlag::Downloaded, true)
                .await
                .unwrap()
        );

        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY1", "S1", 4))
            .await
            .unwrap();
        let first = store.snapshot().await;
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY1", "S1", 4))
            .await
            .unwrap();
        assert_eq!(store.snapshot().await, first);

        let series = &first.series(ServiceKind::Crunchyroll, "G1").unwrap();
        let season = &series.seasons["S1"];
        assert_eq!(season.episodes.len(), 4);
        assert!(season.episodes["E2"].downloaded);
        assert!(!season.episodes["E4"].downloaded);
    }

    #[tokio::test]
    async fn test_merge_rekeys_season_by_stable_id() {
        let store = CatalogStore::open(temp_catalog_path()).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY2", "S2", 2))
            .await
            .unwrap();
        store
            .update_episode_flag(episode_ref("G1", "S2", "E1"), EpisodeFlag::Downloaded, true)
            .await
            .unwrap();

        // The service dropped an earlier season, so GY2 is now the first one.
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY2", "S1", 2))
            .await
            .unwrap();

        let crunchy = store.read(ServiceKind::Crunchyroll).await.unwrap();
        let series = &crunchy["G1"];
        assert_eq!(series.seasons.len(), 1);
        assert!(series.seasons["S1"].episodes["E1"].downloaded);
    }

    #[tokio::test]
    async fn test_remove_only_touches_one_namespace() {
        let path = temp_catalog_path();
        let store = CatalogStore::open(&path).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("A", "GA", "S1", 1))
            .await
            .unwrap();
        store
            .merge(ServiceKind::Hidive, tree("B", "10", "S1", 1))
            .await
            .unwrap();

        assert!(store.remove(ServiceKind::Crunchyroll, "A").await.unwrap());
        assert!(!store.remove(ServiceKind::Crunchyroll, "missing").await.unwrap());

        assert!(store.read(ServiceKind::Crunchyroll).await.is_none());
        assert!(store.read(ServiceKind::Hidive).await.unwrap().contains_key("B"));

        let reopened = CatalogStore::open(&path).await.unwrap();
        assert!(reopened.read(ServiceKind::Hidive).await.unwrap().contains_key("B"));
    }

    #[tokio::test]
    async fn test_empty_merge_still_writes_document() {
        let path = temp_catalog_path();
        let store = CatalogStore::open(&path).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("A", "GA", "S1", 1))
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        store.merge(ServiceKind::Crunchyroll, ParsedTree::new()).await.unwrap();

        let reopened = CatalogStore::open(&path).await.unwrap();
        assert!(reopened.read(ServiceKind::Crunchyroll).await.unwrap().contains_key("A"));
    }

    #[tokio::test]
    async fn test_update_missing_episode_is_noop() {
        let store = CatalogStore::open(temp_catalog_path()).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY1", "S1", 1))
            .await
            .unwrap();
        let before = store.snapshot().await;

        for target in [
            episode_ref("nope", "S1", "E1"),
            episode_ref("G1", "S9", "E1"),
            episode_ref("G1", "S1", "E9"),
        ] {
            assert!(
                !store
                    .update_episode_flag(target, EpisodeFlag::Downloaded, true)
                    .await
                    .unwrap()
            );
        }
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_apply_rules_marks_skip() {
        let store = CatalogStore::open(temp_catalog_path()).await.unwrap();
        store
            .merge(ServiceKind::Crunchyroll, tree("G1", "GY1", "S1", 6))
            .await
            .unwrap();
        let rules = blacklist::parse_rules(&["S:GY1:E:3-5"]).unwrap();
        store
            .apply_rules(ServiceKind::Crunchyroll, "G1", &rules)
            .await
            .unwrap();

        let crunchy = store.read(ServiceKind::Crunchyroll).await.unwrap();
        let skipped: Vec<u32> = crunchy["G1"].seasons["S1"]
            .ordered_episodes()
            .into_iter()
            .filter(|(_, e)| e.skip)
            .map(|(_, e)| e.number)
            .collect();
        assert_eq!(skipped, vec![3, 4, 5]);
    }
}
