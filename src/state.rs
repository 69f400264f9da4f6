use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogStore;
use crate::clients::mdnx::MdnxClient;
use crate::config::Config;
use crate::domain::ServiceKind;
use crate::scheduler::Orchestrator;
use crate::services::{MdnxService, StreamingService};

/// Everything the commands share: configuration, catalog and one service
/// per enabled streaming service.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub catalog: Arc<CatalogStore>,

    pub services: Vec<Arc<dyn StreamingService>>,

    pub shutdown: CancellationToken,
}

impl SharedState {
    pub async fn new(config: Config) -> Result<Self> {
        let catalog = Arc::new(
            CatalogStore::open(&config.general.catalog_path)
                .await
                .context("Failed to open catalog")?,
        );

        let services = config
            .enabled_services()
            .into_iter()
            .map(|kind| {
                let client = MdnxClient::new(config.mdnx.clone(), kind);
                Arc::new(MdnxService::new(
                    client,
                    Arc::clone(&catalog),
                    config.service(kind).clone(),
                )) as Arc<dyn StreamingService>
            })
            .collect();

        Ok(Self {
            config: Arc::new(config),
            catalog,
            services,
            shutdown: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn service(&self, kind: ServiceKind) -> Option<Arc<dyn StreamingService>> {
        self.services.iter().find(|s| s.kind() == kind).cloned()
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Orchestrator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.catalog),
            self.services.clone(),
            self.shutdown.clone(),
        )
    }
}
