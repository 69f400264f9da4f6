use crate::config::TransferConfig;
use crate::library::sanitize_filename;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Source file did not settle within {0}s")]
    NotReady(u64),

    #[error("Destination exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Move failed after {attempts} attempts: {source}")]
    MoveFailed {
        attempts: u32,
        source: std::io::Error,
    },

    #[error("Directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Moves finished downloads out of the tool's output directory.
pub struct FileTransfer {
    config: TransferConfig,
}

impl FileTransfer {
    #[must_use]
    pub const fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Waits until the file size has not changed for the configured period.
    pub async fn wait_for_ready(&self, path: &Path) -> Result<(), TransferError> {
        let interval = Duration::from_millis(self.config.ready_check_interval_ms.max(1));
        let stable_for = Duration::from_secs(self.config.ready_stable_seconds);
        let timeout = Duration::from_secs(self.config.ready_timeout_seconds);
        let start = Instant::now();

        let mut last_size: Option<u64> = None;
        let mut stable = Duration::ZERO;

        while start.elapsed() < timeout {
            let size = tokio::fs::metadata(path).await?.len();
            if last_size == Some(size) {
                stable += interval;
                if stable >= stable_for {
                    debug!(path = %path.display(), size, "File is ready");
                    return Ok(());
                }
            } else {
                debug!(path = %path.display(), ?last_size, size, "File size changed");
                stable = Duration::ZERO;
                last_size = Some(size);
            }
            tokio::time::sleep(interval).await;
        }

        warn!(path = %path.display(), timeout_secs = timeout.as_secs(), "File not ready in time");
        Err(TransferError::NotReady(self.config.ready_timeout_seconds))
    }

    /// Moves `source` to `destination`, creating parent directories.
    ///
    /// Without `overwrite`, an existing destination is left untouched and the
    /// call fails. Returns the final path.
    pub async fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> Result<PathBuf, TransferError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            error!(path = %source.display(), "Downloaded file not found");
            return Err(TransferError::SourceMissing(source.to_path_buf()));
        }

        self.wait_for_ready(source).await?;

        let destination = match destination.file_name().and_then(|n| n.to_str()) {
            Some(name) => destination.with_file_name(sanitize_filename(name)),
            None => destination.to_path_buf(),
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            if !overwrite {
                return Err(TransferError::DestinationExists(destination));
            }
            self.replace_file(source, &destination).await?;
            info!(from = %source.display(), to = %destination.display(), "Replaced existing file");
            return Ok(destination);
        }

        self.move_with_retries(source, &destination).await?;
        info!(from = %source.display(), to = %destination.display(), "Moved file");
        Ok(destination)
    }

    /// Stages `source` next to `destination`, then renames it over the old
    /// file. The old file stays in place until the final rename.
    async fn replace_file(&self, source: &Path, destination: &Path) -> Result<(), TransferError> {
        let name = destination
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("episode");
        let staging = destination.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4()));

        if let Err(e) = self.move_with_retries(source, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&staging, destination).await {
            error!(staging = %staging.display(), error = %e, "Could not replace existing file");
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn move_with_retries(&self, source: &Path, destination: &Path) -> Result<(), TransferError> {
        let attempts = self.config.move_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match move_file(source, destination).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, to = %destination.display(), "Move failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(self.config.retry_delay_seconds)).await;
                    }
                }
            }
        }

        Err(TransferError::MoveFailed {
            attempts,
            source: last_error.unwrap_or_else(|| std::io::Error::other("no attempt made")),
        })
    }

    /// Writes and reads back a probe file to prove `dir` is usable.
    pub async fn check_writable(dir: &Path) -> Result<(), TransferError> {
        let not_writable = |source| TransferError::NotWritable {
            path: dir.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(dir).await.map_err(not_writable)?;
        let probe = dir.join(format!(".permtest-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok").await.map_err(not_writable)?;
        let read_back = tokio::fs::read(&probe).await;
        let _ = tokio::fs::remove_file(&probe).await;

        match read_back {
            Ok(data) if data == b"ok" => Ok(()),
            Ok(_) => Err(not_writable(std::io::Error::other("read back different content"))),
            Err(e) => Err(not_writable(e)),
        }
    }

    /// Deletes every regular file directly inside `dir`. Returns how many were removed.
    pub async fn remove_temp_files(dir: &Path) -> usize {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Temp directory not readable");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed temp file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }

        if removed > 0 {
            info!(path = %dir.display(), removed, "Temporary files removed");
        }
        removed
    }
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(source, destination).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(source, destination).await?;
    tokio::fs::remove_file(source).await
}
