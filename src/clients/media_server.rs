//! Library refresh triggers for Plex and Jellyfin.

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{MediaServerConfig, MediaServerKind};
use crate::constants::{APP_NAME, intervals};

pub struct MediaServerClient {
    client: Client,
    config: MediaServerConfig,
}

impl MediaServerClient {
    /// Returns `None` when no server is configured.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &MediaServerConfig) -> Result<Option<Self>> {
        if config.kind == MediaServerKind::None {
            return Ok(None);
        }

        let client = Client::builder()
            .timeout(intervals::HTTP_TIMEOUT)
            .user_agent(format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            client,
            config: config.clone(),
        }))
    }

    /// Refresh endpoint including the auth query parameter.
    pub fn scan_url(config: &MediaServerConfig) -> Result<(Method, Url)> {
        let base = config.url.trim_end_matches('/');
        let (method, path, token_param) = match config.kind {
            MediaServerKind::Plex => (Method::GET, "/library/sections/all/refresh", "X-Plex-Token"),
            MediaServerKind::Jellyfin => (Method::POST, "/Library/Refresh", "api_key"),
            MediaServerKind::None => anyhow::bail!("No media server configured"),
        };

        let raw = if config.url_override {
            base.to_string()
        } else {
            format!("{base}{path}")
        };

        let mut url = Url::parse(&raw).with_context(|| format!("Invalid media server URL: {raw}"))?;
        url.query_pairs_mut().append_pair(token_param, &config.token);
        Ok((method, url))
    }

    /// Asks the server to rescan its libraries. Failures are logged only.
    pub async fn trigger_scan(&self) -> bool {
        let (method, url) = match Self::scan_url(&self.config) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Cannot build media server scan URL");
                return false;
            }
        };

        let kind = self.config.kind;
        match self.client.request(method, url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => {
                    debug!(?kind, status = %response.status(), "Media server responded");
                    info!(?kind, "Media server scan triggered");
                    true
                }
                Err(e) => {
                    warn!(?kind, error = %e, "Media server rejected scan request");
                    false
                }
            },
            Err(e) => {
                warn!(?kind, error = %e, "Failed to reach media server");
                false
            }
        }
    }
}
