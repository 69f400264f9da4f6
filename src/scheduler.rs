//! The download loop.
//!
//! One iteration refreshes the catalog from the configured monitor lists,
//! downloads whatever is missing, re-checks finished files for missing
//! tracks and then runs housekeeping. Every wait is interruptible through
//! the shared [`CancellationToken`].

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogStore, EpisodeRef};
use crate::clients::mdnx::DownloadRequest;
use crate::clients::media_server::MediaServerClient;
use crate::config::{Config, DownloadConfig};
use crate::constants::DOWNLOAD_FILE_STEM;
use crate::domain::ServiceKind;
use crate::domain::events::{DownloadAction, EpisodeSnapshot, NotificationBuffer};
use crate::library::{FileTransfer, FuzzyMatcher, LibraryService};
use crate::logging::RotatingLog;
use crate::models::{Episode, EpisodeFlag, Season, Series};
use crate::services::media::{LocalTracks, MediaService, TrackInspector, with_base_languages};
use crate::services::notify::Notifier;
use crate::services::StreamingService;

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    /// `only_create_queue` is set; the loop should not continue.
    QueueOnly,
    Cancelled,
}

enum EpisodeResult {
    Done,
    Failed,
    Cancelled,
}

/// Picks the `--dubLang` values for an episode.
///
/// Desired languages (the season override, else the configured list) that
/// the episode offers win, in configured order. Otherwise the backup list is
/// tried the same way, then the lexicographically smallest offered dub.
/// `None` means the episode has no dubs at all.
#[must_use]
pub fn select_dubs(season: &Season, episode: &Episode, config: &DownloadConfig) -> Option<Vec<String>> {
    let available: BTreeSet<String> = episode
        .available_dubs
        .iter()
        .map(|d| d.to_lowercase())
        .collect();
    if available.is_empty() {
        return None;
    }

    let pick = |wanted: &[String]| -> Vec<String> {
        let mut seen = BTreeSet::new();
        wanted
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| available.contains(w) && seen.insert(w.clone()))
            .collect()
    };

    let desired = season.dub_override.as_deref().unwrap_or(&config.dub_languages);
    let chosen = pick(desired);
    if !chosen.is_empty() {
        return Some(chosen);
    }

    let backup = pick(&config.backup_dub_languages);
    if !backup.is_empty() {
        return Some(backup);
    }

    available.first().map(|first| vec![first.clone()])
}

pub struct Orchestrator {
    config: Arc<Config>,
    catalog: Arc<CatalogStore>,
    services: Vec<Arc<dyn StreamingService>>,
    library: LibraryService,
    transfer: FileTransfer,
    inspector: Arc<dyn TrackInspector>,
    fuzzy: Option<FuzzyMatcher>,
    media_server: Option<MediaServerClient>,
    notifier: Option<Notifier>,
    log: Option<RotatingLog>,
    buffer: NotificationBuffer,
    iteration: u32,
    token: CancellationToken,
}

impl Orchestrator {
    /// # Errors
    /// Returns an error if an HTTP client for the media server or notifier cannot be built.
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<CatalogStore>,
        services: Vec<Arc<dyn StreamingService>>,
        token: CancellationToken,
    ) -> Result<Self> {
        let probe_timeout = Duration::from_secs(config.downloads.probe_timeout_seconds);
        Ok(Self {
            library: LibraryService::new(&config.general.data_dir, &config.downloads),
            transfer: FileTransfer::new(config.transfer.clone()),
            inspector: Arc::new(MediaService::new(probe_timeout)),
            fuzzy: config
                .downloads
                .fuzzy_matching
                .then(|| FuzzyMatcher::new(config.downloads.fuzzy_threshold)),
            media_server: MediaServerClient::from_config(&config.media_server)?,
            notifier: Notifier::from_config(&config.notifications)?,
            log: None,
            buffer: NotificationBuffer::default(),
            iteration: 0,
            config,
            catalog,
            services,
            token,
        })
    }

    #[must_use]
    pub fn with_log(mut self, log: RotatingLog) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub fn with_inspector(mut self, inspector: Arc<dyn TrackInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Runs iterations until cancelled or queue-only mode ends the loop.
    pub async fn run(mut self) -> Result<()> {
        let interval = Duration::from_secs(self.config.scheduler.check_interval_seconds);
        info!(interval_secs = interval.as_secs(), "Download loop started");

        loop {
            match self.run_once().await? {
                IterationOutcome::Completed => {}
                IterationOutcome::QueueOnly => {
                    info!("Queue created, exiting because only_create_queue is set");
                    return Ok(());
                }
                IterationOutcome::Cancelled => break,
            }

            info!(next_in_secs = interval.as_secs(), "Iteration complete");
            if self.wait_or_cancelled(interval).await {
                break;
            }
        }

        info!("Download loop stopped");
        Ok(())
    }

    /// One full pass: refresh, downloads, track check, housekeeping.
    pub async fn run_once(&mut self) -> Result<IterationOutcome> {
        self.refresh().await;
        if self.token.is_cancelled() {
            return Ok(IterationOutcome::Cancelled);
        }

        if self.config.downloads.only_create_queue {
            return Ok(IterationOutcome::QueueOnly);
        }

        let services = self.services.clone();
        for service in &services {
            if self.download_pass(service.as_ref()).await? == IterationOutcome::Cancelled {
                return Ok(IterationOutcome::Cancelled);
            }
        }

        if self.config.downloads.check_missing_tracks {
            for service in &services {
                if self.completeness_pass(service.as_ref()).await? == IterationOutcome::Cancelled {
                    return Ok(IterationOutcome::Cancelled);
                }
            }
        } else {
            debug!("Track completeness check disabled");
        }

        self.housekeeping().await;
        Ok(IterationOutcome::Completed)
    }

    /// Starts, updates and stops monitors so the catalog follows the config.
    pub async fn refresh(&self) {
        for service in &self.services {
            let kind = service.kind();
            let monitored: BTreeSet<&String> = self.config.service(kind).monitor.keys().collect();
            let known: BTreeSet<String> = self.catalog.series_ids(kind).await.into_iter().collect();

            if monitored.is_empty() && known.is_empty() {
                debug!(service = %kind, "No series to monitor");
                continue;
            }

            for series_id in monitored.iter().copied() {
                if self.token.is_cancelled() {
                    return;
                }
                let result = if known.contains(series_id) {
                    service.update_monitor(series_id).await
                } else {
                    service.start_monitor(series_id).await
                };
                if let Err(e) = result {
                    warn!(service = %kind, %series_id, error = %e, "Failed to refresh series");
                }
            }

            for series_id in known.iter().filter(|id| !monitored.contains(id)) {
                info!(service = %kind, %series_id, "Series no longer configured");
                if let Err(e) = service.stop_monitor(series_id).await {
                    warn!(service = %kind, %series_id, error = %e, "Failed to stop monitoring series");
                }
            }
        }
        info!("Catalog refresh complete");
    }

    async fn download_pass(&mut self, service: &dyn StreamingService) -> Result<IterationOutcome> {
        let kind = service.kind();
        let Some(series_map) = self.catalog.read(kind).await else {
            return Ok(IterationOutcome::Completed);
        };
        info!(service = %kind, "Checking for episodes to download");

        for (series_id, series) in &series_map {
            for (season_key, season) in series.ordered_seasons() {
                for (episode_key, episode) in season.ordered_episodes() {
                    if self.token.is_cancelled() {
                        return Ok(IterationOutcome::Cancelled);
                    }
                    if episode.downloaded || episode.skip {
                        continue;
                    }

                    let target = EpisodeRef {
                        service: kind,
                        series_id,
                        season_key,
                        episode_key,
                    };
                    let destination = self.library.get_destination_path(series, season, episode);

                    if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                        info!(path = %destination.display(), "Episode already on disk");
                        self.catalog
                            .update_episode_flag(target, EpisodeFlag::Downloaded, true)
                            .await?;
                        continue;
                    }

                    if let Some(found) = self.fuzzy_existing(series, season, episode) {
                        info!(path = %found.display(), expected = %destination.display(), "Episode found by fuzzy match");
                        self.catalog
                            .update_episode_flag(target, EpisodeFlag::Downloaded, true)
                            .await?;
                        continue;
                    }

                    let Some(season_id) = season.id.as_deref() else {
                        warn!(%series_id, season = %season_key, "Season has no id, cannot download");
                        continue;
                    };

                    let Some(dubs) = select_dubs(season, episode, &self.config.downloads) else {
                        info!(%series_id, season = %season_key, episode = %episode_key, "No dubs available, skipping");
                        continue;
                    };

                    if self.config.downloads.dry_run {
                        info!(
                            series = %series.name,
                            season = season.naming_number(),
                            episode = episode.number,
                            ?dubs,
                            path = %destination.display(),
                            "Dry run: would download"
                        );
                        continue;
                    }

                    let request = DownloadRequest {
                        series_id: series_id.clone(),
                        season_id: season_id.to_string(),
                        download_number: episode.download_number,
                        dubs,
                    };

                    let result = self.download_to(service, &request, &destination, false).await;
                    let downloaded = matches!(result, EpisodeResult::Done);
                    self.catalog
                        .update_episode_flag(target, EpisodeFlag::Downloaded, downloaded)
                        .await?;

                    if downloaded {
                        let after = self.inspector.local_tracks(&destination).await;
                        self.record(kind, series, season, episode, DownloadAction::New, after, LocalTracks::default());
                    }

                    FileTransfer::remove_temp_files(&self.config.general.temp_dir).await;

                    if matches!(result, EpisodeResult::Cancelled) || self.pace().await {
                        return Ok(IterationOutcome::Cancelled);
                    }
                }
            }
        }

        Ok(IterationOutcome::Completed)
    }

    async fn completeness_pass(&mut self, service: &dyn StreamingService) -> Result<IterationOutcome> {
        let kind = service.kind();
        let Some(series_map) = self.catalog.read(kind).await else {
            return Ok(IterationOutcome::Completed);
        };
        info!(service = %kind, "Verifying language tracks of downloaded files");

        for (series_id, series) in &series_map {
            for (season_key, season) in series.ordered_seasons() {
                let wanted_dubs: BTreeSet<String> = season
                    .dub_override
                    .as_deref()
                    .unwrap_or(&self.config.downloads.dub_languages)
                    .iter()
                    .map(|d| d.to_lowercase())
                    .collect();
                let wanted_subs: BTreeSet<String> = season
                    .sub_override
                    .as_deref()
                    .unwrap_or(&self.config.downloads.sub_locales)
                    .iter()
                    .map(|s| s.to_lowercase())
                    .collect();

                for (episode_key, episode) in season.ordered_episodes() {
                    if self.token.is_cancelled() {
                        return Ok(IterationOutcome::Cancelled);
                    }
                    if !episode.downloaded || episode.skip || episode.tracks_complete {
                        continue;
                    }

                    let destination = self.library.get_destination_path(series, season, episode);
                    if !tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                        continue;
                    }

                    let target = EpisodeRef {
                        service: kind,
                        series_id,
                        season_key,
                        episode_key,
                    };

                    let local = self.inspector.local_tracks(&destination).await;
                    let missing_dubs: BTreeSet<String> =
                        wanted_dubs.difference(&local.dubs).cloned().collect();
                    let missing_subs: BTreeSet<String> =
                        wanted_subs.difference(&local.subs).cloned().collect();

                    if missing_dubs.is_empty() && missing_subs.is_empty() {
                        debug!(path = %destination.display(), "All wanted tracks present");
                        self.catalog
                            .update_episode_flag(target, EpisodeFlag::TracksComplete, true)
                            .await?;
                        continue;
                    }

                    let offered_dubs: BTreeSet<String> =
                        episode.available_dubs.iter().map(|d| d.to_lowercase()).collect();
                    let offered_subs = with_base_languages(&episode.available_subs);
                    let fetch_dubs: Vec<&String> =
                        missing_dubs.iter().filter(|d| offered_dubs.contains(*d)).collect();
                    let fetch_subs: Vec<&String> =
                        missing_subs.iter().filter(|s| offered_subs.contains(*s)).collect();

                    debug!(
                        path = %destination.display(),
                        ?missing_dubs,
                        ?missing_subs,
                        ?fetch_dubs,
                        ?fetch_subs,
                        "Track comparison"
                    );

                    if fetch_dubs.is_empty() && fetch_subs.is_empty() {
                        debug!(path = %destination.display(), "Missing tracks are not offered yet");
                        continue;
                    }

                    let (Some(season_id), Some(dubs)) = (
                        season.id.as_deref(),
                        select_dubs(season, episode, &self.config.downloads),
                    ) else {
                        continue;
                    };

                    if self.config.downloads.dry_run {
                        info!(path = %destination.display(), ?fetch_dubs, ?fetch_subs, "Dry run: would re-download for missing tracks");
                        continue;
                    }

                    info!(path = %destination.display(), ?fetch_dubs, ?fetch_subs, "Re-downloading to add missing tracks");
                    let request = DownloadRequest {
                        series_id: series_id.clone(),
                        season_id: season_id.to_string(),
                        download_number: episode.download_number,
                        dubs,
                    };

                    let result = self.download_to(service, &request, &destination, true).await;
                    if matches!(result, EpisodeResult::Done) {
                        let after = self.inspector.local_tracks(&destination).await;
                        self.record(kind, series, season, episode, DownloadAction::Updated, after, local);
                    } else {
                        warn!(path = %destination.display(), "Re-download failed, keeping existing file");
                    }

                    FileTransfer::remove_temp_files(&self.config.general.temp_dir).await;

                    if matches!(result, EpisodeResult::Cancelled) || self.pace().await {
                        return Ok(IterationOutcome::Cancelled);
                    }
                }
            }
        }

        Ok(IterationOutcome::Completed)
    }

    fn fuzzy_existing(&self, series: &Series, season: &Season, episode: &Episode) -> Option<PathBuf> {
        let matcher = self.fuzzy.as_ref()?;
        let relative = format!(
            "{}.{}",
            self.library.format_path(series, season, episode),
            self.library.extension()
        );
        matcher.find_existing(self.library.data_dir(), &relative)
    }

    fn temp_output(&self) -> PathBuf {
        self.config
            .general
            .temp_dir
            .join(format!("{DOWNLOAD_FILE_STEM}.{}", self.library.extension()))
    }

    /// Downloads through `service` and moves the result to `destination`.
    async fn download_to(
        &self,
        service: &dyn StreamingService,
        request: &DownloadRequest,
        destination: &Path,
        overwrite: bool,
    ) -> EpisodeResult {
        let download = service.download_episode(request);
        tokio::pin!(download);

        let result = tokio::select! {
            result = &mut download => result,
            () = self.token.cancelled() => {
                let ((), result) = tokio::join!(service.cancel_active_download(), &mut download);
                result
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return EpisodeResult::Cancelled,
            Err(e) => {
                error!(series_id = %request.series_id, episode = request.download_number, error = %e, "Download failed");
                return EpisodeResult::Failed;
            }
        }

        match self.transfer.transfer(&self.temp_output(), destination, overwrite).await {
            Ok(path) => {
                info!(path = %path.display(), "Transfer complete");
                EpisodeResult::Done
            }
            Err(e) => {
                error!(destination = %destination.display(), error = %e, "Transfer failed");
                EpisodeResult::Failed
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        service: ServiceKind,
        series: &Series,
        season: &Season,
        episode: &Episode,
        action: DownloadAction,
        after: LocalTracks,
        before: LocalTracks,
    ) {
        self.buffer.push(EpisodeSnapshot {
            service,
            series_title: series.name.clone(),
            season_number: season.naming_number(),
            episode_number: episode.number,
            episode_title: episode.title.clone(),
            action,
            dubs: after.dubs.into_iter().collect(),
            subs: after.subs.into_iter().collect(),
            previous_dubs: before.dubs.into_iter().collect(),
            previous_subs: before.subs.into_iter().collect(),
            timestamp: chrono::Local::now(),
        });
    }

    async fn housekeeping(&mut self) {
        self.iteration += 1;
        debug!(iteration = self.iteration, "Housekeeping");

        let every = self.config.scheduler.housekeeping_every.max(1);
        if self.iteration % every == 0
            && let Some(log) = &self.log
        {
            match log.rotate() {
                Ok(Some(archive)) => debug!(archive = %archive.display(), "Log rotated"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Log rotation failed"),
            }
        }

        if !self.buffer.is_empty()
            && let Some(server) = &self.media_server
        {
            server.trigger_scan().await;
        }

        if let Some(summary) = self.buffer.drain_summary(chrono::Local::now()) {
            match &self.notifier {
                Some(notifier) => notifier.send(&summary).await,
                None => info!(subject = %summary.subject, "{}", summary.body),
            }
        }
    }

    /// Waits between episodes. Returns `true` when cancelled.
    async fn pace(&self) -> bool {
        let delay = Duration::from_secs(self.config.scheduler.between_episode_seconds);
        self.wait_or_cancelled(delay).await
    }

    async fn wait_or_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => {
                info!("Stop requested");
                true
            }
            () = tokio::time::sleep(duration) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode_with_dubs(dubs: &[&str]) -> Episode {
        let mut episode = Episode::new(1, 1, "Ep");
        episode.available_dubs = dubs.iter().map(ToString::to_string).collect();
        episode
    }

    fn downloads(desired: &[&str], backup: &[&str]) -> DownloadConfig {
        DownloadConfig {
            dub_languages: desired.iter().map(ToString::to_string).collect(),
            backup_dub_languages: backup.iter().map(ToString::to_string).collect(),
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn test_select_dubs_prefers_desired_in_order() {
        let season = Season::new(Some("GY1".to_string()), "S", 1);
        let episode = episode_with_dubs(&["jpn", "eng", "spa"]);
        assert_eq!(
            select_dubs(&season, &episode, &downloads(&["eng", "JPN", "fra"], &[])),
            Some(vec!["eng".to_string(), "jpn".to_string()])
        );
    }

    #[test]
    fn test_select_dubs_falls_back_to_backup_then_smallest() {
        let season = Season::new(Some("GY1".to_string()), "S", 1);
        let episode = episode_with_dubs(&["spa", "deu"]);
        assert_eq!(
            select_dubs(&season, &episode, &downloads(&["jpn"], &["spa"])),
            Some(vec!["spa".to_string()])
        );
        assert_eq!(
            select_dubs(&season, &episode, &downloads(&["jpn"], &["eng"])),
            Some(vec!["deu".to_string()])
        );
    }

    #[test]
    fn test_select_dubs_none_without_dubs() {
        let season = Season::new(Some("GY1".to_string()), "S", 1);
        assert_eq!(select_dubs(&season, &episode_with_dubs(&[]), &downloads(&["jpn"], &[])), None);
    }

    #[test]
    fn test_select_dubs_uses_season_override() {
        let mut season = Season::new(Some("GY1".to_string()), "S", 1);
        season.dub_override = Some(vec!["eng".to_string()]);
        let episode = episode_with_dubs(&["jpn", "eng"]);
        assert_eq!(
            select_dubs(&season, &episode, &downloads(&["jpn"], &[])),
            Some(vec!["eng".to_string()])
        );
    }
}
