use crate::catalog::CatalogStore;
use crate::catalog::blacklist::parse_rules_lenient;
use crate::clients::mdnx::{DownloadRequest, MdnxClient, contains_marker};
use crate::config::ServiceConfig;
use crate::domain::ServiceKind;
use crate::parser::{TrackList, TrackProber, enrich_tracks, parse_track_output, reduce};
use crate::services::streaming_service::{ServiceError, StreamingService};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Probes episode tracks through the tool. Failures count as "no tracks".
pub struct ToolProber<'a> {
    client: &'a MdnxClient,
}

impl<'a> ToolProber<'a> {
    #[must_use]
    pub const fn new(client: &'a MdnxClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrackProber for ToolProber<'_> {
    async fn probe(&self, series_id: &str, season_id: &str, download_number: u32) -> TrackList {
        match self
            .client
            .probe_tracks(series_id, season_id, download_number)
            .await
        {
            Ok(output) => parse_track_output(&output.combined()),
            Err(e) => {
                warn!(series_id, season_id, episode = download_number, error = %e, "Track probe failed");
                TrackList::default()
            }
        }
    }
}

/// [`StreamingService`] backed by the multi-downloader-nx tool.
pub struct MdnxService {
    client: MdnxClient,
    catalog: Arc<CatalogStore>,
    config: ServiceConfig,
}

impl MdnxService {
    #[must_use]
    pub const fn new(client: MdnxClient, catalog: Arc<CatalogStore>, config: ServiceConfig) -> Self {
        Self {
            client,
            catalog,
            config,
        }
    }

    fn test_series(&self) -> &str {
        self.config
            .test_series_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.client.service().default_test_series())
    }

    async fn refresh(&self, series_id: &str) -> Result<(), ServiceError> {
        let kind = self.kind();
        let output = self.client.list_series(series_id).await?;
        if !output.success && output.stdout.trim().is_empty() {
            return Err(ServiceError::ListingFailed {
                series_id: series_id.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        debug!(service = %kind, series_id, "Listing output:\n{}", output.stdout);

        let mut tree = reduce(kind, &output.stdout);
        if !tree.contains_key(series_id) {
            warn!(service = %kind, series_id, found = tree.len(), "Listing did not contain the requested series");
        }

        if kind == ServiceKind::Hidive {
            enrich_tracks(&mut tree, &ToolProber::new(&self.client)).await;
        }

        self.catalog.merge(kind, tree).await?;

        let rules = self
            .config
            .monitor
            .get(series_id)
            .map(|raw| parse_rules_lenient(raw))
            .unwrap_or_default();
        self.catalog.apply_rules(kind, series_id, &rules).await?;
        Ok(())
    }
}

#[async_trait]
impl StreamingService for MdnxService {
    fn kind(&self) -> ServiceKind {
        self.client.service()
    }

    async fn auth(&self) -> Result<(), ServiceError> {
        let kind = self.kind();
        if !self.config.has_credentials() {
            return Err(ServiceError::MissingCredentials(kind));
        }

        info!(service = %kind, "Authenticating");
        let output = self
            .client
            .authenticate(&self.config.username, &self.config.password)
            .await?;
        debug!(service = %kind, "Auth output:\n{}", output.stdout);
        if !output.success {
            warn!(service = %kind, stderr = %output.stderr.trim(), "Authentication command reported failure");
        }
        info!(service = %kind, "Authentication complete");
        Ok(())
    }

    async fn self_test(&self) -> Result<(), ServiceError> {
        let kind = self.kind();
        if self.config.skip_api_test {
            info!(service = %kind, "API test skipped");
            return Ok(());
        }

        let series_id = self.test_series();
        info!(service = %kind, series_id, "Testing tool access");
        let output = self.client.list_series(series_id).await?;
        let tree = reduce(kind, &output.stdout);
        debug!(service = %kind, series = tree.len(), "Self-test listing parsed");

        if contains_marker(&output.combined(), &self.client.config().auth_error_markers) {
            info!(service = %kind, "Authentication error detected, re-authenticating");
            self.auth().await?;
        } else {
            info!(service = %kind, "API test successful");
        }
        Ok(())
    }

    async fn start_monitor(&self, series_id: &str) -> Result<(), ServiceError> {
        info!(service = %self.kind(), series_id, "Monitoring series");
        self.refresh(series_id).await
    }

    async fn update_monitor(&self, series_id: &str) -> Result<(), ServiceError> {
        info!(service = %self.kind(), series_id, "Updating series");
        self.refresh(series_id).await
    }

    async fn stop_monitor(&self, series_id: &str) -> Result<bool, ServiceError> {
        let removed = self.catalog.remove(self.kind(), series_id).await?;
        if removed {
            info!(service = %self.kind(), series_id, "Stopped monitoring series");
        }
        Ok(removed)
    }

    async fn download_episode(&self, request: &DownloadRequest) -> Result<(), ServiceError> {
        self.client.download(request).await?;
        Ok(())
    }

    async fn cancel_active_download(&self) {
        self.client.cancel_active_download().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MdnxConfig;

    async fn service(config: ServiceConfig) -> MdnxService {
        let path = std::env::temp_dir().join(format!("mdnx-autodl-svc-{}.json", uuid::Uuid::new_v4()));
        let catalog = Arc::new(CatalogStore::open(&path).await.unwrap());
        let client = MdnxClient::new(MdnxConfig::default(), ServiceKind::Hidive);
        MdnxService::new(client, catalog, config)
    }

    #[tokio::test]
    async fn test_auth_requires_credentials() {
        let svc = service(ServiceConfig::default()).await;
        let err = svc.auth().await.unwrap_err();
        assert!(matches!(err, ServiceError::MissingCredentials(ServiceKind::Hidive)));
    }

    #[tokio::test]
    async fn test_test_series_falls_back_to_default() {
        let svc = service(ServiceConfig::default()).await;
        assert_eq!(svc.test_series(), "1244");

        let svc = service(ServiceConfig {
            test_series_id: Some("999".to_string()),
            ..ServiceConfig::default()
        })
        .await;
        assert_eq!(svc.test_series(), "999");
    }

    #[tokio::test]
    async fn test_skipped_self_test_runs_nothing() {
        let svc = service(ServiceConfig {
            skip_api_test: true,
            ..ServiceConfig::default()
        })
        .await;
        assert!(svc.self_test().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_unknown_series() {
        let svc = service(ServiceConfig::default()).await;
        assert!(!svc.stop_monitor("nope").await.unwrap());
    }
}
