//! Domain service for one streaming service driven through the tool.
//!
//! This module provides the [`StreamingService`] trait, which the download
//! loop talks to. Refreshing a series lists it, reduces the output and merges
//! the result into the shared catalog.

use crate::catalog::CatalogError;
use crate::clients::mdnx::{DownloadRequest, MdnxError};
use crate::domain::ServiceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Tool error: {0}")]
    Mdnx(#[from] MdnxError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("{0} username or password is not configured")]
    MissingCredentials(ServiceKind),

    #[error("Listing series {series_id} failed: {reason}")]
    ListingFailed { series_id: String, reason: String },
}

impl ServiceError {
    /// True when the download was stopped by a cancel request.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Mdnx(MdnxError::Cancelled))
    }
}

#[async_trait::async_trait]
pub trait StreamingService: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Logs in with the configured credentials.
    ///
    /// # Errors
    ///
    /// - Returns [`ServiceError::MissingCredentials`] when either value is empty
    /// - Returns [`ServiceError::Mdnx`] if the tool cannot be run
    async fn auth(&self) -> Result<(), ServiceError>;

    /// Lists a known series and re-authenticates when the output shows an
    /// expired or missing session.
    async fn self_test(&self) -> Result<(), ServiceError>;

    /// Lists a series for the first time and adds it to the catalog.
    async fn start_monitor(&self, series_id: &str) -> Result<(), ServiceError>;

    /// Re-lists a series and merges the result, keeping local flags.
    async fn update_monitor(&self, series_id: &str) -> Result<(), ServiceError>;

    /// Drops a series from the catalog. Returns `false` if it was unknown.
    async fn stop_monitor(&self, series_id: &str) -> Result<bool, ServiceError>;

    /// Downloads one episode into the tool's output directory.
    ///
    /// # Errors
    ///
    /// - Returns [`ServiceError::Mdnx`] with [`MdnxError::Cancelled`] when
    ///   [`StreamingService::cancel_active_download`] stopped it
    async fn download_episode(&self, request: &DownloadRequest) -> Result<(), ServiceError>;

    async fn cancel_active_download(&self);
}
